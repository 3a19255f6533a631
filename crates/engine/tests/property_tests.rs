//! End-to-end properties of the store, coordinator and bridge
//!
//! 1. **Conflict exclusivity** - one of two sessions on the same base commits
//! 2. **Atomic changesets** - a failing patch leaves the view untouched
//! 3. **History integrity** - pages chain by parent and replay to the latest state
//! 4. **Discard isolation** - discarded sessions leave no trace in the store
//! 5. **Pagination completeness** - five operations page as [1,2],[3,4],[5]
//! 6. **Bridge idempotence** - replaying a range leaves the index unchanged
//! 7. **Out-of-order convergence** - the newer projection wins regardless of arrival
//! 8. **Batching arithmetic** - 2500 actions at threshold 1000 is three flushes

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use folio_core::{Claim, ClaimPath, DocKey, IndexId, PatchOp, ViewId};
use folio_engine::{BridgeSection, Database, FolioConfig};
use folio_search::{BulkRequest, IndexDocument, MemoryIndex, SearchIndex};

// ============================================================================
// Test Helpers
// ============================================================================

fn main_view() -> ViewId {
    ViewId::new("main")
}

fn documents() -> IndexId {
    IndexId::new("documents")
}

fn path(s: &str) -> ClaimPath {
    s.parse().unwrap()
}

fn manual_config() -> FolioConfig {
    FolioConfig {
        bridge: BridgeSection {
            autostart: false,
            flush_interval_ms: 3_600_000,
            ..BridgeSection::default()
        },
        ..FolioConfig::default()
    }
}

fn setup() -> (Database, Arc<MemoryIndex>) {
    let index = Arc::new(MemoryIndex::new());
    let db = Database::ephemeral_with(manual_config(), Arc::clone(&index) as Arc<dyn SearchIndex>)
        .unwrap();
    (db, index)
}

/// Commit `ops` on `key` through a session
fn edit(db: &Database, key: &str, ops: Vec<PatchOp>) -> folio_core::FolioResult<Arc<folio_core::Changeset>> {
    let coord = db.coordinator();
    let session = coord.begin_edit(&main_view(), &DocKey::new(key))?;
    coord.save_change(session, ops)?;
    coord.end_edit(session)
}

// ============================================================================
// 1. Conflict exclusivity
// ============================================================================

#[test]
fn test_conflict_exclusivity() {
    let (db, _) = setup();
    let coord = db.coordinator();
    let key = DocKey::new("q1");

    let a = coord.begin_edit(&main_view(), &key).unwrap();
    let b = coord.begin_edit(&main_view(), &key).unwrap();
    coord
        .save_change(a, vec![PatchOp::add("q1", path("title"), Claim::text("A"))])
        .unwrap();
    coord
        .save_change(b, vec![PatchOp::add("q1", path("title"), Claim::text("B"))])
        .unwrap();

    let first = coord.end_edit(a).unwrap();
    let second = coord.end_edit(b).unwrap_err();
    assert!(second.is_conflict());

    let head = db.store().head(&main_view()).unwrap().unwrap();
    assert_eq!(head.id, first.id);
    let (doc, _) = db.store().get_latest(&main_view(), &key).unwrap();
    assert_eq!(doc.get(&path("title")), Some(&Claim::text("A")));

    // resubmitting on the new head succeeds
    edit(&db, "q1", vec![PatchOp::set("q1", path("title"), Claim::text("B"))]).unwrap();
}

// ============================================================================
// 2. Atomic changesets
// ============================================================================

#[test]
fn test_atomic_changesets() {
    let (db, _) = setup();
    edit(&db, "q1", vec![PatchOp::add("q1", path("title"), Claim::text("Dune"))]).unwrap();
    let before = db.store().head(&main_view()).unwrap();

    let err = edit(
        &db,
        "q1",
        vec![
            PatchOp::set("q1", path("title"), Claim::text("Changed")),
            PatchOp::add("q1", path("year"), Claim::amount(1965.0, None)),
            PatchOp::remove("q1", path("missing")),
        ],
    )
    .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(db.store().head(&main_view()).unwrap(), before);
    let (doc, _) = db.store().get_latest(&main_view(), &DocKey::new("q1")).unwrap();
    assert_eq!(doc.len(), 1);
    assert_eq!(doc.get(&path("title")), Some(&Claim::text("Dune")));
}

// ============================================================================
// 3. History integrity
// ============================================================================

#[test]
fn test_history_integrity() {
    let (db, _) = setup();
    let key = DocKey::new("q1");
    edit(&db, "q1", vec![PatchOp::add("q1", path("v"), Claim::amount(0.0, None))]).unwrap();
    for i in 1..7 {
        // interleave another document so the key's history has gaps in seq
        edit(&db, "other", vec![PatchOp::add("other", path(&format!("p{}", i)), Claim::text("x"))])
            .unwrap();
        edit(&db, "q1", vec![PatchOp::set("q1", path("v"), Claim::amount(i as f64, None))]).unwrap();
    }

    let mut collected = Vec::new();
    let mut cursor = None;
    loop {
        let page = db.store().history(&main_view(), &key, 3, cursor.as_ref()).unwrap();
        assert!(page.changesets.len() <= 3);
        collected.extend(page.changesets);
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(collected.len(), 7);
    assert!(collected.windows(2).all(|w| w[0].seq > w[1].seq));
    assert!(collected.iter().all(|cs| cs.touches(&key)));

    let all = db.store().changesets_after(&main_view(), None, 100).unwrap();
    for pair in all.windows(2) {
        assert_eq!(pair[1].parent_id, Some(pair[0].id));
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }

    let oldest = collected.last().unwrap();
    let at_first = db.store().get_at_version(&main_view(), &key, &oldest.id).unwrap();
    assert_eq!(at_first.get(&path("v")), Some(&Claim::amount(0.0, None)));
    let newest = &collected[0];
    let at_last = db.store().get_at_version(&main_view(), &key, &newest.id).unwrap();
    let (latest, latest_id) = db.store().get_latest(&main_view(), &key).unwrap();
    assert_eq!(at_last, latest);
    assert_eq!(latest_id, newest.id);
}

// ============================================================================
// 4. Discard isolation
// ============================================================================

#[test]
fn test_discard_isolation() {
    let (db, _) = setup();
    edit(&db, "q1", vec![PatchOp::add("q1", path("title"), Claim::text("Dune"))]).unwrap();
    let head = db.store().head(&main_view()).unwrap();
    let keys = db.store().keys(&main_view()).unwrap();

    let coord = db.coordinator();
    let s = coord.begin_edit(&main_view(), &DocKey::new("q2")).unwrap();
    for i in 0..3 {
        coord
            .save_change(s, vec![PatchOp::add("q2", path(&format!("p{}", i)), Claim::text("x"))])
            .unwrap();
    }
    coord.discard_edit(s).unwrap();

    assert_eq!(db.store().head(&main_view()).unwrap(), head);
    assert_eq!(db.store().keys(&main_view()).unwrap(), keys);
    assert!(db
        .store()
        .get_latest(&main_view(), &DocKey::new("q2"))
        .unwrap_err()
        .is_not_found());
}

// ============================================================================
// 5. Pagination completeness
// ============================================================================

#[test]
fn test_pagination_completeness() {
    let (db, _) = setup();
    let coord = db.coordinator();
    let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
    for i in 0..5 {
        coord
            .save_change(s, vec![PatchOp::add("q1", path(&format!("p{}", i)), Claim::text("x"))])
            .unwrap();
    }

    let mut pages = Vec::new();
    let mut after = 0;
    loop {
        let page = coord.list_changes(s, after, 2).unwrap();
        pages.push(page.operations.iter().map(|op| op.seq).collect::<Vec<_>>());
        match page.next_after {
            Some(next) => after = next,
            None => break,
        }
    }
    assert_eq!(pages, vec![vec![1, 2], vec![3, 4], vec![5]]);

    let via_iter: Vec<u64> = coord.changes(s, 2).unwrap().map(|op| op.seq).collect();
    assert_eq!(via_iter, vec![1, 2, 3, 4, 5]);
}

// ============================================================================
// 6. Bridge idempotence
// ============================================================================

#[test]
fn test_bridge_idempotence() {
    let (db, index) = setup();
    edit(&db, "q1", vec![PatchOp::add("q1", path("title"), Claim::text("Dune"))]).unwrap();
    edit(&db, "q1", vec![PatchOp::add("q1", path("subtitle"), Claim::text("Book one"))]).unwrap();
    edit(&db, "q1", vec![PatchOp::remove("q1", path("subtitle"))]).unwrap();
    edit(&db, "q2", vec![PatchOp::add("q2", path("title"), Claim::text("Emma"))]).unwrap();

    let bridge = db.bridge(&main_view(), &documents()).unwrap();
    bridge.sync_now().unwrap();
    let first = index.documents(&documents());

    let replay = bridge.replay(None).unwrap();
    assert_eq!(replay.applied, 0);
    assert_eq!(index.documents(&documents()), first);

    // the removed field does not come back
    assert!(!first["q1"].fields.contains_key("subtitle"));
    assert_eq!(first["q1"].seq, 3);
}

// ============================================================================
// 7. Out-of-order convergence
// ============================================================================

#[test]
fn test_out_of_order_convergence() {
    let (db, index) = setup();
    let key = DocKey::new("q1");
    let c1 = edit(&db, "q1", vec![PatchOp::add("q1", path("title"), Claim::text("Dune"))]).unwrap();
    let c2 = edit(&db, "q1", vec![PatchOp::set("q1", path("title"), Claim::text("Messiah"))]).unwrap();

    let project = |cs: &folio_core::Changeset| {
        let doc = db.store().get_at_version(&main_view(), &key, &cs.id).unwrap();
        IndexDocument::project(&main_view(), &key, &doc, cs.head()).unwrap()
    };
    let newer = project(c2.as_ref());
    let older = project(c1.as_ref());

    for doc in [newer.clone(), older] {
        index
            .bulk_upsert(
                &documents(),
                BulkRequest {
                    actions: vec![doc],
                    timeout: Duration::from_secs(1),
                },
            )
            .unwrap();
    }
    assert_eq!(index.get(&documents(), "q1").unwrap(), Some(newer));
}

// ============================================================================
// 8. Batching arithmetic
// ============================================================================

#[test]
fn test_batching_arithmetic() {
    let (db, index) = setup();
    let store = db.store();
    for i in 0..2500 {
        let base = store.head(&main_view()).unwrap().map(|h| h.id);
        let key = format!("doc{:04}", i);
        store
            .propose(
                &main_view(),
                base,
                vec![PatchOp::add(key, path("title"), Claim::text("x"))],
                None,
            )
            .unwrap();
    }

    let bridge = db.bridge(&main_view(), &documents()).unwrap();
    let report = bridge.sync_now().unwrap();
    assert_eq!(report.changesets, 2500);
    assert_eq!(report.flushes, 3);
    assert_eq!(report.applied, 2500);

    let stats = index.stats();
    assert_eq!(stats.bulk_calls, 3);
    assert_eq!(stats.actions, 2500);
    let ids: HashSet<String> = index.documents(&documents()).into_keys().collect();
    assert_eq!(ids.len(), 2500);
    assert_eq!(bridge.cursor().map(|h| h.seq), Some(2500));
}

// ============================================================================
// Pagination over arbitrary logs
// ============================================================================

mod pagination {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn pages_cover_log_exactly_once(ops in 0usize..40, page_size in 1usize..12) {
            let (db, _) = setup();
            let coord = db.coordinator();
            let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
            for i in 0..ops {
                coord
                    .save_change(s, vec![PatchOp::add("q1", path(&format!("p{}", i)), Claim::text("x"))])
                    .unwrap();
            }

            let mut seen = Vec::new();
            let mut after = 0;
            loop {
                let page = coord.list_changes(s, after, page_size).unwrap();
                prop_assert!(page.operations.len() <= page_size);
                seen.extend(page.operations.iter().map(|op| op.seq));
                match page.next_after {
                    Some(next) => after = next,
                    None => break,
                }
            }
            prop_assert_eq!(seen, (1..=ops as u64).collect::<Vec<_>>());
        }
    }
}
