use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Datelike;

use crate::clock::Clock;
use crate::decode;
use crate::models::{AttendanceRecord, DashboardData, SubjectTotals};
use crate::store::{raw_collection, Document, DocumentStore, Query, StoreResult, SUBJECTS_COLLECTION};

pub const DEFAULT_FIELD_SCAN_LIMIT: usize = 1000;

/// Filtered scans over the per-month raw-record collections.
///
/// The `fetch_*` methods never fail: a store error is logged and turns into an
/// empty result. The `try_*` variants hand the error back to the caller.
pub struct RawQueryService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    field_scan_limit: usize,
}

impl RawQueryService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            field_scan_limit: DEFAULT_FIELD_SCAN_LIMIT,
        }
    }

    pub fn with_field_scan_limit(mut self, limit: usize) -> Self {
        self.field_scan_limit = limit;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub async fn try_fetch_records(
        &self,
        year: i32,
        month: u32,
        group: Option<&str>,
        subject: Option<&str>,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let collection = raw_collection(year, month);
        let query = Query::new()
            .where_eq_opt("group", group)
            .where_eq_opt("subject", subject);
        let docs = self.store.query(&collection, &query).await?;
        Ok(decode_records(&collection, docs))
    }

    pub async fn fetch_records(
        &self,
        year: i32,
        month: u32,
        group: Option<&str>,
        subject: Option<&str>,
    ) -> Vec<AttendanceRecord> {
        self.try_fetch_records(year, month, group, subject)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(year, month, error = %e, "failed to fetch attendance records");
                Vec::new()
            })
    }

    pub async fn try_fetch_student_records(
        &self,
        roll_number: &str,
        year: i32,
        month: u32,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let collection = raw_collection(year, month);
        let query = Query::new().where_eq("rollNumber", roll_number);
        let docs = self.store.query(&collection, &query).await?;
        Ok(decode_records(&collection, docs))
    }

    pub async fn fetch_student_records(
        &self,
        roll_number: &str,
        year: i32,
        month: u32,
    ) -> Vec<AttendanceRecord> {
        self.try_fetch_student_records(roll_number, year, month)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(roll_number, year, month, error = %e, "failed to fetch student attendance");
                Vec::new()
            })
    }

    /// Distinct, sorted subjects seen in the first `field_scan_limit` records of the month.
    pub async fn fetch_subjects(&self, year: i32, month: u32) -> Vec<String> {
        self.distinct_field(year, month, "subject").await
    }

    /// Distinct, sorted groups seen in the first `field_scan_limit` records of the month.
    pub async fn fetch_groups(&self, year: i32, month: u32) -> Vec<String> {
        self.distinct_field(year, month, "group").await
    }

    async fn distinct_field(&self, year: i32, month: u32, field: &str) -> Vec<String> {
        let collection = raw_collection(year, month);
        let query = Query::new().select(&[field]).limit(self.field_scan_limit);

        match self.store.query(&collection, &query).await {
            Ok(docs) => docs
                .iter()
                .filter_map(|doc| doc.get_str(field))
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => {
                tracing::warn!(year, month, field, error = %e, "failed to scan distinct values");
                Vec::new()
            }
        }
    }

    /// Months of `year` that have a raw-record collection, ascending. Falls back
    /// to the current calendar month so there is always something to select.
    pub async fn fetch_available_months(&self, year: i32) -> Vec<u32> {
        let prefix = format!("attendance_{year}_");
        let months = match self.store.list_collections().await {
            Ok(collections) => collections
                .iter()
                .filter_map(|name| name.strip_prefix(&prefix))
                .filter_map(|suffix| suffix.parse::<u32>().ok())
                .filter(|month| (1..=12).contains(month))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => {
                tracing::warn!(year, error = %e, "failed to list attendance collections");
                Vec::new()
            }
        };

        if months.is_empty() {
            vec![self.clock.today().month()]
        } else {
            months
        }
    }

    pub async fn fetch_subject_totals(&self) -> BTreeMap<String, SubjectTotals> {
        match self.store.query(SUBJECTS_COLLECTION, &Query::new()).await {
            Ok(docs) => docs
                .iter()
                .map(|doc| (doc.id.clone(), decode::subject_totals(doc)))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch subject totals");
                BTreeMap::new()
            }
        }
    }

    /// Records, subjects, groups and subject totals for a month, fetched
    /// concurrently. Only the record scan can fail the batch.
    pub async fn try_fetch_dashboard_data(
        &self,
        year: i32,
        month: u32,
        group: Option<&str>,
    ) -> StoreResult<DashboardData> {
        let (records, subjects, groups, subject_totals) = tokio::join!(
            self.try_fetch_records(year, month, group, None),
            self.fetch_subjects(year, month),
            self.fetch_groups(year, month),
            self.fetch_subject_totals(),
        );

        Ok(DashboardData {
            records: records?,
            subjects,
            groups,
            subject_totals,
        })
    }
}

fn decode_records(collection: &str, docs: Vec<Document>) -> Vec<AttendanceRecord> {
    docs.iter()
        .filter_map(|doc| match decode::attendance_record(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(collection, id = %doc.id, error = %e, "dropping malformed attendance record");
                None
            }
        })
        .collect()
}
