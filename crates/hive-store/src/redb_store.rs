//! Durable Document Store
//!
//! JSON documents in a single redb table, keyed by
//! `scope \u{1f} collection \u{1f} id` so one prefix range covers a
//! collection. find-one-and-update runs inside one write transaction,
//! which is what makes it atomic with respect to other writers.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use hive_query::{Document, apply_update, matches};

use crate::StoreResult;
use crate::docs::{DocStore, ensure_id};

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

const SEP: char = '\u{1f}';

/// Document store backed by a redb database file.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = Database::create(path)?;
        // Create the table up front so reads never see a missing table.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.commit()?;
        tracing::debug!(path = %path.display(), "document store opened");
        Ok(Self { db })
    }

    fn key(scope: &str, collection: &str, id: &str) -> String {
        format!("{scope}{SEP}{collection}{SEP}{id}")
    }

    fn prefix(scope: &str, collection: &str) -> String {
        format!("{scope}{SEP}{collection}{SEP}")
    }
}

impl DocStore for RedbStore {
    fn list(&self, scope: &str, collection: &str) -> StoreResult<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let prefix = Self::prefix(scope, collection);

        let mut docs = Vec::new();
        for item in table.range(prefix.as_str()..)? {
            let (key, value) = item?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            docs.push(serde_json::from_slice(value.value())?);
        }
        Ok(docs)
    }

    fn get(&self, scope: &str, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let key = Self::key(scope, collection, id);
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn insert(&self, scope: &str, collection: &str, doc: Document) -> StoreResult<Document> {
        let (doc, id) = ensure_id(doc);
        let payload = serde_json::to_vec(&doc)?;
        let key = Self::key(scope, collection, &id);

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.insert(key.as_str(), payload.as_slice())?;
        }
        txn.commit()?;
        Ok(doc)
    }

    fn replace(&self, scope: &str, collection: &str, id: &str, doc: Document) -> StoreResult<bool> {
        let key = Self::key(scope, collection, id);
        let mut doc = doc;
        doc.insert(
            crate::docs::ID_FIELD.to_string(),
            serde_json::Value::String(id.to_string()),
        );
        let payload = serde_json::to_vec(&doc)?;

        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            existed = table.get(key.as_str())?.is_some();
            if existed {
                table.insert(key.as_str(), payload.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(existed)
    }

    fn remove(&self, scope: &str, collection: &str, id: &str) -> StoreResult<bool> {
        let key = Self::key(scope, collection, id);
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            existed = table.remove(key.as_str())?.is_some();
        }
        txn.commit()?;
        Ok(existed)
    }

    fn find_one_and_update(
        &self,
        scope: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
        return_new: bool,
    ) -> StoreResult<Option<Document>> {
        let txn = self.db.begin_write()?;
        let result;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            let prefix = Self::prefix(scope, collection);

            let mut matched: Option<(String, Document)> = None;
            for item in table.range(prefix.as_str()..)? {
                let (key, value) = item?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                let doc: Document = serde_json::from_slice(value.value())?;
                if matches(&doc, filter) {
                    matched = Some((key.value().to_string(), doc));
                    break;
                }
            }

            result = match matched {
                None => None,
                Some((key, previous)) => {
                    let updated = apply_update(&previous, update);
                    let payload = serde_json::to_vec(&updated)?;
                    table.insert(key.as_str(), payload.as_slice())?;
                    Some(if return_new { updated } else { previous })
                }
            };
        }
        txn.commit()?;
        Ok(result)
    }

    fn clear(&self, scope: &str, collection: &str) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            let prefix = Self::prefix(scope, collection);

            let mut keys = Vec::new();
            for item in table.range(prefix.as_str()..)? {
                let (key, _) = item?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                keys.push(key.value().to_string());
            }
            for key in keys {
                table.remove(key.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::document_id;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn open_temp() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("docs.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn roundtrip_and_scope_isolation() {
        let (_dir, store) = open_temp();
        let inserted = store.insert("p1", "tasks", doc(json!({"n": 1}))).unwrap();
        let id = document_id(&inserted).unwrap().to_string();

        assert_eq!(store.get("p1", "tasks", &id).unwrap().unwrap()["n"], json!(1));
        assert!(store.get("p2", "tasks", &id).unwrap().is_none());
        assert_eq!(store.list("p1", "tasks").unwrap().len(), 1);
        assert!(store.list("p1", "other").unwrap().is_empty());
    }

    #[test]
    fn replace_remove_clear() {
        let (_dir, store) = open_temp();
        let inserted = store.insert("p1", "tasks", doc(json!({"n": 1}))).unwrap();
        let id = document_id(&inserted).unwrap().to_string();

        assert!(store.replace("p1", "tasks", &id, doc(json!({"n": 2}))).unwrap());
        assert_eq!(store.get("p1", "tasks", &id).unwrap().unwrap()["n"], json!(2));
        assert!(!store.replace("p1", "tasks", "missing", doc(json!({}))).unwrap());

        assert!(store.remove("p1", "tasks", &id).unwrap());
        assert!(!store.remove("p1", "tasks", &id).unwrap());

        store.insert("p1", "tasks", doc(json!({"n": 3}))).unwrap();
        store.clear("p1", "tasks").unwrap();
        assert!(store.list("p1", "tasks").unwrap().is_empty());
    }

    #[test]
    fn find_one_and_update_is_applied_in_place() {
        let (_dir, store) = open_temp();
        store
            .insert("p1", "counters", doc(json!({"name": "hits", "count": 1})))
            .unwrap();

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
        assert_eq!(new["count"], json!(2));

        let all = store.list("p1", "counters").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["count"], json!(2));
    }
}
