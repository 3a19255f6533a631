//! Concurrent tests for folio-concurrency
//!
//! These tests race real threads through the session coordinator:
//!
//! 1. **First-Committer-Wins** - exactly one of N sessions on one base commits
//! 2. **Seq Monotonicity** - retry loops produce a gap-free seq chain
//! 3. **Discard Isolation** - discarded sessions never reach the store
//!
//! ```bash
//! cargo test --test concurrent_tests
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use folio_concurrency::{SessionCoordinator, SessionStatus};
use folio_core::{Claim, ClaimPath, DocKey, PatchOp, ViewId};
use folio_storage::VersionedStore;

// ============================================================================
// Test Helpers
// ============================================================================

fn main_view() -> ViewId {
    ViewId::new("main")
}

fn setup() -> Arc<SessionCoordinator> {
    let store = VersionedStore::in_memory();
    store.create_view(&main_view()).unwrap();
    Arc::new(SessionCoordinator::new(Arc::new(store)))
}

fn path(s: &str) -> ClaimPath {
    s.parse().unwrap()
}

// ============================================================================
// First-Committer-Wins
// ============================================================================

#[test]
fn test_exactly_one_session_commits_per_base() {
    const THREADS: usize = 8;
    let coord = setup();
    let key = DocKey::new("q1");

    let sessions: Vec<_> = (0..THREADS)
        .map(|i| {
            let s = coord.begin_edit(&main_view(), &key).unwrap();
            coord
                .save_change(s, vec![PatchOp::add("q1", path(&format!("p{}", i)), Claim::text("x"))])
                .unwrap();
            s
        })
        .collect();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = sessions
        .iter()
        .map(|&s| {
            let coord = Arc::clone(&coord);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                coord.end_edit(s)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_conflict()));

    let statuses: Vec<_> = sessions
        .iter()
        .map(|&s| coord.session(s).unwrap().status)
        .collect();
    assert_eq!(statuses.iter().filter(|&&st| st == SessionStatus::Committed).count(), 1);
    assert_eq!(
        statuses.iter().filter(|&&st| st == SessionStatus::Conflicted).count(),
        THREADS - 1
    );
    assert_eq!(coord.store().head(&main_view()).unwrap().unwrap().seq, 1);
}

// ============================================================================
// Seq Monotonicity
// ============================================================================

#[test]
fn test_retry_loops_build_gap_free_chain() {
    const THREADS: usize = 4;
    const COMMITS_PER_THREAD: usize = 10;
    let coord = setup();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let coord = Arc::clone(&coord);
            thread::spawn(move || {
                let key = DocKey::new(format!("doc{}", t));
                let mut committed = 0;
                while committed < COMMITS_PER_THREAD {
                    let s = coord.begin_edit(&main_view(), &key).unwrap();
                    let value = Claim::amount(committed as f64, None);
                    let op = if committed == 0 {
                        PatchOp::add(key.clone(), path("counter"), value)
                    } else {
                        PatchOp::set(key.clone(), path("counter"), value)
                    };
                    coord.save_change(s, vec![op]).unwrap();
                    match coord.end_edit(s) {
                        Ok(_) => committed += 1,
                        Err(e) => assert!(e.is_conflict(), "unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total = (THREADS * COMMITS_PER_THREAD) as u64;
    let store = coord.store();
    let head = store.head(&main_view()).unwrap().unwrap();
    assert_eq!(head.seq, total);

    let all = store.changesets_after(&main_view(), None, 1000).unwrap();
    let seqs: Vec<u64> = all.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, (1..=total).collect::<Vec<_>>());
    for pair in all.windows(2) {
        assert_eq!(pair[1].parent_id, Some(pair[0].id));
    }
    let ids: HashSet<_> = all.iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), all.len());
}

// ============================================================================
// Discard Isolation
// ============================================================================

#[test]
fn test_concurrent_discards_leave_store_untouched() {
    let coord = setup();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coord = Arc::clone(&coord);
            thread::spawn(move || {
                let key = DocKey::new(format!("doc{}", i));
                let s = coord.begin_edit(&main_view(), &key).unwrap();
                coord
                    .save_change(s, vec![PatchOp::add(key, path("title"), Claim::text("draft"))])
                    .unwrap();
                coord.discard_edit(s).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(coord.store().head(&main_view()).unwrap(), None);
    assert!(coord.open_sessions().is_empty());
    assert_eq!(coord.stats().discarded, 8);
}
