//! Document-store collaborator.
//!
//! Collections hold JSON documents addressed by a string ID. Query results are
//! always ordered by document ID in byte order, which is what prefix ranges and
//! `start_after` cursors rely on.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgDocumentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub equals: Vec<(String, Value)>,
    pub id_prefix: Option<String>,
    pub start_after: Option<String>,
    pub limit: Option<usize>,
    pub select: Option<Vec<String>>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.equals.push((field.to_string(), value.into()));
        self
    }

    /// Applies the filter only when a value is present.
    pub fn where_eq_opt(self, field: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.where_eq(field, value),
            None => self,
        }
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn start_after(mut self, id: impl Into<String>) -> Self {
        self.start_after = Some(id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|field| field.to_string()).collect());
        self
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    async fn put(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()>;
}

/// `attendance_{year}_{mm}`, the raw-record collection for one month.
pub fn raw_collection(year: i32, month: u32) -> String {
    format!("attendance_{}", period_key(year, month))
}

/// `{year}_{mm}`, the ID prefix shared by every pre-aggregated document of a month.
pub fn period_key(year: i32, month: u32) -> String {
    format!("{year}_{month:02}")
}

pub const METADATA_COLLECTION: &str = "attendance_metadata";
pub const STATS_COLLECTION: &str = "attendance_stats";
pub const STUDENT_COLLECTION: &str = "student_attendance";
pub const SUBJECTS_COLLECTION: &str = "subjects";
