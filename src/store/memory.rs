use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{Document, DocumentStore, Query, StoreError, StoreResult};

/// In-process store with the same query semantics as the Postgres backend.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Map<String, Value>>>>,
    read_calls: AtomicU64,
    failing: AtomicBool,
    failing_collections: std::sync::Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every subsequent `get`, `query` and `put` on one collection fail.
    pub fn fail_collection(&self, collection: &str) {
        self.failing_collections
            .lock()
            .unwrap()
            .insert(collection.to_string());
    }

    pub fn reads(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub async fn insert(&self, collection: &str, id: &str, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    fn check(&self, collection: Option<&str>) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        match collection {
            Some(collection) if self.failing_collections.lock().unwrap().contains(collection) => {
                Err(StoreError::Unavailable(format!("injected failure on {collection}")))
            }
            _ => Ok(()),
        }
    }

    fn record_read(&self, collection: Option<&str>) -> StoreResult<()> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.check(collection)
    }
}

fn fields_match(fields: &Map<String, Value>, query: &Query) -> bool {
    query
        .equals
        .iter()
        .all(|(field, value)| fields.get(field) == Some(value))
}

fn project(fields: &Map<String, Value>, select: Option<&Vec<String>>) -> Map<String, Value> {
    match select {
        Some(keep) if !keep.is_empty() => fields
            .iter()
            .filter(|(name, _)| keep.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        _ => fields.clone(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.record_read(Some(collection))?;
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        self.record_read(Some(collection))?;
        let collections = self.collections.lock().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(docs
            .iter()
            .filter(|(id, _)| {
                query
                    .id_prefix
                    .as_deref()
                    .map_or(true, |prefix| id.starts_with(prefix))
            })
            .filter(|(id, _)| {
                query
                    .start_after
                    .as_deref()
                    .map_or(true, |cursor| id.as_str() > cursor)
            })
            .filter(|(_, fields)| fields_match(fields, query))
            .take(limit)
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: project(fields, query.select.as_ref()),
            })
            .collect())
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.record_read(None)?;
        Ok(self.collections.lock().await.keys().cloned().collect())
    }

    async fn put(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        self.check(Some(collection))?;
        self.insert(collection, id, fields).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn query_orders_by_id_and_honours_cursor_and_limit() {
        let store = MemoryStore::new();
        for roll in ["R3", "R1", "R2", "R4"] {
            store
                .insert("student_attendance", &format!("2025_03_{roll}"), json!({ "rollNumber": roll }))
                .await;
        }
        store
            .insert("student_attendance", "2025_04_R1", json!({ "rollNumber": "R1" }))
            .await;

        let query = Query::new()
            .id_prefix("2025_03")
            .start_after("2025_03_R1")
            .limit(2);
        let docs = store.query("student_attendance", &query).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, ["2025_03_R2", "2025_03_R3"]);
    }

    #[tokio::test]
    async fn equality_filters_and_projection_apply() {
        let store = MemoryStore::new();
        store
            .insert("attendance_2025_03", "a", json!({ "group": "G1", "subject": "CS101" }))
            .await;
        store
            .insert("attendance_2025_03", "b", json!({ "group": "G2", "subject": "CS101" }))
            .await;

        let query = Query::new().where_eq("group", "G2").select(&["subject"]);
        let docs = store.query("attendance_2025_03", &query).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("subject"), Some("CS101"));
        assert_eq!(docs[0].get_str("group"), None);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_unavailable() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let err = store.list_collections().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn failing_one_collection_leaves_others_readable() {
        let store = MemoryStore::new();
        store.insert("attendance_2025_03", "a", json!({ "group": "G1" })).await;
        store.fail_collection("attendance_metadata");

        assert!(store.get("attendance_metadata", "2025_03").await.is_err());
        assert!(store.put("attendance_metadata", "2025_03", json!({})).await.is_err());
        let docs = store.query("attendance_2025_03", &Query::new()).await.unwrap();
        assert_eq!(docs.len(), 1);
    }
}
