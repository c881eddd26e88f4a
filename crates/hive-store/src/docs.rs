//! Document Store Boundary
//!
//! Collections are scoped by project so tenants never see each other's
//! data. The trait is the seam the runtime host depends on; `MemoryStore`
//! backs tests and ephemeral deployments.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use hive_query::{Document, apply_update, matches};

use crate::StoreResult;

/// The document-id field assigned on insert.
pub const ID_FIELD: &str = "_id";

/// Extract a document's id, if it carries one.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Project-scoped document collections.
pub trait DocStore: Send + Sync {
    /// All documents of a collection, in storage order.
    fn list(&self, scope: &str, collection: &str) -> StoreResult<Vec<Document>>;

    /// Fetch a single document by id.
    fn get(&self, scope: &str, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Store a new document, assigning an id when absent.
    /// Returns the document as stored.
    fn insert(&self, scope: &str, collection: &str, doc: Document) -> StoreResult<Document>;

    /// Replace the document with the given id. Returns false when no
    /// such document exists.
    fn replace(&self, scope: &str, collection: &str, id: &str, doc: Document) -> StoreResult<bool>;

    /// Delete the document with the given id. Returns false when no
    /// such document exists.
    fn remove(&self, scope: &str, collection: &str, id: &str) -> StoreResult<bool>;

    /// Match the first document against `filter` and apply `update` to
    /// it, with no interleaved write between match and apply. Returns
    /// the pre-update document, or the post-update one when
    /// `return_new` is set; `None` when nothing matched.
    fn find_one_and_update(
        &self,
        scope: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
        return_new: bool,
    ) -> StoreResult<Option<Document>>;

    /// Drop every document in a collection.
    fn clear(&self, scope: &str, collection: &str) -> StoreResult<()>;
}

/// Ensure a document carries an id, assigning a fresh uuid when absent.
pub(crate) fn ensure_id(mut doc: Document) -> (Document, String) {
    let id = match document_id(&doc) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    };
    (doc, id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory document store preserving insertion order per collection.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(scope: &str, collection: &str) -> String {
        format!("{scope}\u{1f}{collection}")
    }
}

impl DocStore for MemoryStore {
    fn list(&self, scope: &str, collection: &str) -> StoreResult<Vec<Document>> {
        let collections = self.collections.lock();
        Ok(collections
            .get(&Self::key(scope, collection))
            .cloned()
            .unwrap_or_default())
    }

    fn get(&self, scope: &str, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collections = self.collections.lock();
        Ok(collections
            .get(&Self::key(scope, collection))
            .and_then(|docs| docs.iter().find(|d| document_id(d) == Some(id)).cloned()))
    }

    fn insert(&self, scope: &str, collection: &str, doc: Document) -> StoreResult<Document> {
        let (doc, _) = ensure_id(doc);
        let mut collections = self.collections.lock();
        collections
            .entry(Self::key(scope, collection))
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    fn replace(&self, scope: &str, collection: &str, id: &str, doc: Document) -> StoreResult<bool> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(&Self::key(scope, collection)) else {
            return Ok(false);
        };
        match docs.iter_mut().find(|d| document_id(d) == Some(id)) {
            Some(slot) => {
                let mut doc = doc;
                doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
                *slot = doc;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, scope: &str, collection: &str, id: &str) -> StoreResult<bool> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(&Self::key(scope, collection)) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| document_id(d) != Some(id));
        Ok(docs.len() != before)
    }

    fn find_one_and_update(
        &self,
        scope: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
        return_new: bool,
    ) -> StoreResult<Option<Document>> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(&Self::key(scope, collection)) else {
            return Ok(None);
        };
        let Some(slot) = docs.iter_mut().find(|d| matches(d, filter)) else {
            return Ok(None);
        };
        let previous = slot.clone();
        let updated = apply_update(&previous, update);
        *slot = updated.clone();
        Ok(Some(if return_new { updated } else { previous }))
    }

    fn clear(&self, scope: &str, collection: &str) -> StoreResult<()> {
        self.collections.lock().remove(&Self::key(scope, collection));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn insert_assigns_id_and_preserves_order() {
        let store = MemoryStore::new();
        let a = store.insert("p1", "tasks", doc(json!({"n": 1}))).unwrap();
        store.insert("p1", "tasks", doc(json!({"n": 2}))).unwrap();

        assert!(document_id(&a).is_some());
        let all = store.list("p1", "tasks").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["n"], json!(1));
        assert_eq!(all[1]["n"], json!(2));
    }

    #[test]
    fn scopes_are_isolated() {
        let store = MemoryStore::new();
        store.insert("p1", "tasks", doc(json!({"n": 1}))).unwrap();
        assert!(store.list("p2", "tasks").unwrap().is_empty());
    }

    #[test]
    fn replace_and_remove_report_existence() {
        let store = MemoryStore::new();
        let inserted = store.insert("p1", "tasks", doc(json!({"n": 1}))).unwrap();
        let id = document_id(&inserted).unwrap().to_string();

        assert!(store.replace("p1", "tasks", &id, doc(json!({"n": 9}))).unwrap());
        assert_eq!(store.get("p1", "tasks", &id).unwrap().unwrap()["n"], json!(9));

        assert!(store.remove("p1", "tasks", &id).unwrap());
        assert!(!store.remove("p1", "tasks", &id).unwrap());
        assert!(!store.replace("p1", "tasks", &id, doc(json!({}))).unwrap());
    }

    #[test]
    fn replace_keeps_the_id() {
        let store = MemoryStore::new();
        let inserted = store.insert("p1", "tasks", doc(json!({"n": 1}))).unwrap();
        let id = document_id(&inserted).unwrap().to_string();

        store.replace("p1", "tasks", &id, doc(json!({"n": 2}))).unwrap();
        let fetched = store.get("p1", "tasks", &id).unwrap().unwrap();
        assert_eq!(document_id(&fetched), Some(id.as_str()));
    }

    #[test]
    fn find_one_and_update_returns_old_or_new() {
        let store = MemoryStore::new();
        store
            .insert("p1", "counters", doc(json!({"name": "hits", "count": 1})))
            .unwrap();

        let old = store
            .find_one_and_update(
                "p1",
                "counters",
                &doc(json!({"name": "hits"})),
                &doc(json!({"$inc": {"count": 1}})),
                false,
            )
            .unwrap()
            .unwrap();
        assert_eq!(old["count"], json!(1));

        let new = store
            .find_one_and_update(
                "p1",
                "counters",
                &doc(json!({"name": "hits"})),
                &doc(json!({"$inc": {"count": 1}})),
                true,
            )
            .unwrap()
            .unwrap();
        assert_eq!(new["count"], json!(3));

        assert!(store
            .find_one_and_update(
                "p1",
                "counters",
                &doc(json!({"name": "misses"})),
                &doc(json!({"$inc": {"count": 1}})),
                true,
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn clear_drops_a_collection() {
        let store = MemoryStore::new();
        store.insert("p1", "tasks", doc(json!({"n": 1}))).unwrap();
        store.clear("p1", "tasks").unwrap();
        assert!(store.list("p1", "tasks").unwrap().is_empty());
    }
}
