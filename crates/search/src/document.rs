//! Index-facing projection of a document
//!
//! An [`IndexDocument`] flattens a document's claims into JSON fields plus
//! one free-text blob, and carries the seq of the changeset it was taken
//! from. The seq is what makes upserts guardable: an index keeps whichever
//! projection carries the highest seq for a key.

use crate::index::IndexError;
use folio_core::{ChangesetId, Claim, DocKey, Document, ViewHead, ViewId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use std::collections::BTreeMap;

/// Denormalised search document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Index document id (the document key)
    pub id: String,
    /// View the document was projected from
    pub view: ViewId,
    /// Seq of the changeset this projection reflects
    pub seq: u64,
    /// Id of that changeset
    pub changeset_id: ChangesetId,
    /// One entry per claim, keyed by claim path
    pub fields: BTreeMap<String, Value>,
    /// Concatenated searchable text
    pub text: String,
    /// Keys of related documents, deduplicated
    pub relations: Vec<DocKey>,
    /// Number of claims in the source document
    pub claim_count: usize,
}

impl IndexDocument {
    /// Project `document` as it stood at `source`
    ///
    /// Fails only for claims that have no JSON rendering (non-finite
    /// amounts), which validation keeps out of committed documents.
    pub fn project(
        view: &ViewId,
        key: &DocKey,
        document: &Document,
        source: ViewHead,
    ) -> Result<Self, IndexError> {
        let mut fields = BTreeMap::new();
        let mut text = Vec::new();

        for (path, claim) in document.iter() {
            let value = match claim {
                Claim::Identifier { scheme, value } => {
                    text.push(value.as_str());
                    json!({ "scheme": scheme, "value": value })
                }
                Claim::Text { value, language } => {
                    text.push(value.as_str());
                    match language {
                        Some(lang) => json!({ "value": value, "language": lang }),
                        None => Value::String(value.clone()),
                    }
                }
                Claim::Relation { predicate, target } => {
                    json!({ "predicate": predicate, "target": target.as_str() })
                }
                Claim::Amount { value, unit } => {
                    let number = Number::from_f64(*value).ok_or_else(|| IndexError::Transform {
                        key: key.clone(),
                        reason: format!("amount at '{}' is not finite", path),
                    })?;
                    match unit {
                        Some(unit) => json!({ "value": number, "unit": unit }),
                        None => Value::Number(number),
                    }
                }
                Claim::Time { value } => Value::String(value.to_rfc3339()),
                Claim::File {
                    name,
                    media_type,
                    size,
                    sha256,
                } => {
                    text.push(name.as_str());
                    json!({ "name": name, "media_type": media_type, "size": size, "sha256": sha256 })
                }
                Claim::Reference { url, title } => {
                    let mut obj = Map::new();
                    obj.insert("url".into(), Value::String(url.clone()));
                    if let Some(title) = title {
                        text.push(title.as_str());
                        obj.insert("title".into(), Value::String(title.clone()));
                    }
                    Value::Object(obj)
                }
                Claim::Flag { value } => Value::Bool(*value),
            };
            fields.insert(path.to_string(), value);
        }

        Ok(IndexDocument {
            id: key.as_str().to_string(),
            view: view.clone(),
            seq: source.seq,
            changeset_id: source.id,
            fields,
            text: text.join(" "),
            relations: document.relations(),
            claim_count: document.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::ClaimPath;

    fn path(s: &str) -> ClaimPath {
        s.parse().unwrap()
    }

    fn head(seq: u64) -> ViewHead {
        ViewHead {
            id: ChangesetId::from_bytes([seq as u8; 32]),
            seq,
        }
    }

    #[test]
    fn test_project_fields_text_and_relations() {
        let doc: Document = vec![
            (path("title"), Claim::text("Dune")),
            (path("isbn"), Claim::identifier("isbn", "9780441013593")),
            (path("author"), Claim::relation("author", "herbert")),
            (path("price"), Claim::amount(9.99, Some("EUR"))),
            (path("in_print"), Claim::Flag { value: true }),
        ]
        .into_iter()
        .collect();

        let projected =
            IndexDocument::project(&ViewId::new("main"), &DocKey::new("q1"), &doc, head(7)).unwrap();
        assert_eq!(projected.id, "q1");
        assert_eq!(projected.seq, 7);
        assert_eq!(projected.claim_count, 5);
        assert_eq!(projected.relations, vec![DocKey::new("herbert")]);
        assert_eq!(projected.fields["title"], json!("Dune"));
        assert_eq!(projected.fields["in_print"], json!(true));
        assert_eq!(projected.fields["price"]["unit"], json!("EUR"));
        assert!(projected.text.contains("Dune"));
        assert!(projected.text.contains("9780441013593"));
    }

    #[test]
    fn test_project_empty_document() {
        let projected = IndexDocument::project(
            &ViewId::new("main"),
            &DocKey::new("q1"),
            &Document::new(),
            head(3),
        )
        .unwrap();
        assert!(projected.fields.is_empty());
        assert_eq!(projected.text, "");
        assert_eq!(projected.claim_count, 0);
    }

    #[test]
    fn test_project_rejects_non_finite_amount() {
        let doc: Document = vec![(path("price"), Claim::amount(f64::INFINITY, None))]
            .into_iter()
            .collect();
        let err = IndexDocument::project(&ViewId::new("main"), &DocKey::new("q1"), &doc, head(1))
            .unwrap_err();
        assert!(matches!(err, IndexError::Transform { .. }));
    }
}
