use std::sync::Arc;

use crate::cache::TtlCache;
use crate::decode;
use crate::models::{
    AttendanceMetadata, PaginatedStudents, StudentAggregatedStats, StudentAttendanceSummary,
    SubjectStats,
};
use crate::raw::RawQueryService;
use crate::store::{
    period_key, DocumentStore, Query, StoreError, METADATA_COLLECTION, STATS_COLLECTION,
    STUDENT_COLLECTION,
};

pub const DEFAULT_STATS_SCAN_LIMIT: usize = 200;
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Outcome of a read against the pre-aggregated collections.
#[derive(Debug)]
pub enum Fetched<T> {
    /// Authoritative pre-aggregated data.
    Found(T),
    /// Rebuilt from raw records because the summary was absent; incomplete.
    Degraded(T),
    /// The pre-aggregated collections hold nothing for this request.
    Missing,
    Failed(StoreError),
}

impl<T> Fetched<T> {
    #[cfg(test)]
    pub fn is_found(&self) -> bool {
        matches!(self, Fetched::Found(_))
    }

    #[cfg(test)]
    pub fn found(self) -> Option<T> {
        match self {
            Fetched::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Soft view: whatever data there is, or the default.
    pub fn into_value(self) -> T
    where
        T: Default,
    {
        match self {
            Fetched::Found(value) | Fetched::Degraded(value) => value,
            Fetched::Missing | Fetched::Failed(_) => T::default(),
        }
    }

    pub fn error(&self) -> Option<&StoreError> {
        match self {
            Fetched::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Fetched::Found(_) => "found",
            Fetched::Degraded(_) => "degraded",
            Fetched::Missing => "missing",
            Fetched::Failed(_) => "failed",
        }
    }
}

/// Values the optimized service keeps in its cache.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Metadata(AttendanceMetadata),
    SubjectStats(Vec<SubjectStats>),
    Student(StudentAggregatedStats),
}

/// Reads the pre-aggregated `attendance_metadata`, `attendance_stats` and
/// `student_attendance` collections behind a cache-aside TTL cache.
///
/// Only authoritative results are cached. Nothing else writes to the cache.
pub struct OptimizedQueryService {
    store: Arc<dyn DocumentStore>,
    raw: Arc<RawQueryService>,
    cache: TtlCache<CachedValue>,
    stats_scan_limit: usize,
}

impl OptimizedQueryService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        raw: Arc<RawQueryService>,
        cache: TtlCache<CachedValue>,
    ) -> Self {
        Self {
            store,
            raw,
            cache,
            stats_scan_limit: DEFAULT_STATS_SCAN_LIMIT,
        }
    }

    pub fn with_stats_scan_limit(mut self, limit: usize) -> Self {
        self.stats_scan_limit = limit;
        self
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[cfg(test)]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub async fn fetch_metadata(&self, year: i32, month: u32) -> Fetched<AttendanceMetadata> {
        let key = format!("metadata_{year}_{month}");
        if let Some(CachedValue::Metadata(metadata)) = self.cache.get(&key) {
            tracing::debug!(%key, "cache hit");
            return Fetched::Found(metadata);
        }

        match self.store.get(METADATA_COLLECTION, &period_key(year, month)).await {
            Ok(Some(doc)) => {
                let metadata = decode::metadata(&doc);
                self.cache.insert(key, CachedValue::Metadata(metadata.clone()));
                Fetched::Found(metadata)
            }
            Ok(None) => {
                tracing::info!(year, month, "metadata not found, rebuilding from raw records");
                self.metadata_from_raw(year, month).await
            }
            Err(e) => {
                tracing::warn!(year, month, error = %e, "failed to fetch metadata");
                Fetched::Failed(e)
            }
        }
    }

    /// Subjects and groups only; the counts are left at zero.
    async fn metadata_from_raw(&self, year: i32, month: u32) -> Fetched<AttendanceMetadata> {
        let (subjects, groups) = tokio::join!(
            self.raw.fetch_subjects(year, month),
            self.raw.fetch_groups(year, month),
        );

        if subjects.is_empty() && groups.is_empty() {
            return Fetched::Missing;
        }

        Fetched::Degraded(AttendanceMetadata {
            subjects,
            groups,
            last_updated: self.raw.clock().timestamp_text(),
            ..AttendanceMetadata::default()
        })
    }

    /// Scans at most `stats_scan_limit` stats documents of the month by ID
    /// prefix, then filters by group and subject. Months with more stats
    /// documents than the scan limit can come back short.
    pub async fn fetch_subject_stats(
        &self,
        year: i32,
        month: u32,
        group: Option<&str>,
        subject: Option<&str>,
    ) -> Fetched<Vec<SubjectStats>> {
        // Debug formatting quotes each filter, so "A_B"/"C" and "A"/"B_C" stay apart.
        let key = format!("subject_stats_{year}_{month}_{group:?}_{subject:?}");
        if let Some(CachedValue::SubjectStats(stats)) = self.cache.get(&key) {
            tracing::debug!(%key, "cache hit");
            return Fetched::Found(stats);
        }

        let query = Query::new()
            .id_prefix(period_key(year, month))
            .limit(self.stats_scan_limit);

        match self.store.query(STATS_COLLECTION, &query).await {
            Ok(docs) => {
                let stats: Vec<SubjectStats> = docs
                    .iter()
                    .filter_map(decode::subject_stats)
                    .filter(|stats| group.map_or(true, |group| stats.group == group))
                    .filter(|stats| subject.map_or(true, |subject| stats.subject == subject))
                    .collect();

                if stats.is_empty() {
                    return Fetched::Missing;
                }
                self.cache.insert(key, CachedValue::SubjectStats(stats.clone()));
                Fetched::Found(stats)
            }
            Err(e) => {
                tracing::warn!(year, month, error = %e, "failed to fetch subject stats");
                Fetched::Failed(e)
            }
        }
    }

    pub async fn fetch_student_stats(
        &self,
        roll_number: &str,
        year: i32,
        month: u32,
    ) -> Fetched<StudentAggregatedStats> {
        let key = format!("student_{year}_{month}_{roll_number}");
        if let Some(CachedValue::Student(stats)) = self.cache.get(&key) {
            tracing::debug!(%key, "cache hit");
            return Fetched::Found(stats);
        }

        let id = format!("{}_{roll_number}", period_key(year, month));
        match self.store.get(STUDENT_COLLECTION, &id).await {
            Ok(Some(doc)) => {
                let mut stats = decode::student_stats(&doc, year, month);
                if stats.subjects.is_empty() {
                    tracing::debug!(roll_number, year, month, "student document has no subjects");
                    return Fetched::Missing;
                }
                if stats.roll_number.is_empty() {
                    stats.roll_number = roll_number.to_string();
                }
                self.cache.insert(key, CachedValue::Student(stats.clone()));
                Fetched::Found(stats)
            }
            Ok(None) => Fetched::Missing,
            Err(e) => {
                tracing::warn!(roll_number, year, month, error = %e, "failed to fetch student stats");
                Fetched::Failed(e)
            }
        }
    }

    /// One page of students enrolled in `subject`, ordered by roll number.
    ///
    /// Asks the store for `limit + 1` documents to learn whether another page
    /// exists. The returned cursor is the roll number taken from the ID of the
    /// last document scanned, which may be past the last student returned.
    pub async fn fetch_student_page(
        &self,
        subject: &str,
        year: i32,
        month: u32,
        group: Option<&str>,
        limit: usize,
        after: Option<&str>,
    ) -> Fetched<PaginatedStudents> {
        let limit = limit.max(1);
        let prefix = period_key(year, month);
        let mut query = Query::new()
            .id_prefix(prefix.clone())
            .where_eq_opt("group", group)
            .limit(limit + 1);
        if let Some(after) = after {
            query = query.start_after(format!("{prefix}_{after}"));
        }

        let mut docs = match self.store.query(STUDENT_COLLECTION, &query).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(subject, year, month, error = %e, "failed to fetch student page");
                return Fetched::Failed(e);
            }
        };

        let has_more = docs.len() > limit;
        docs.truncate(limit);

        let scanned: Vec<StudentAggregatedStats> = docs
            .iter()
            .map(|doc| decode::student_stats(doc, year, month))
            .collect();
        // The next query resumes after `{prefix}_{cursor}`, so the cursor must
        // come from the document ID rather than its rollNumber field.
        let id_prefix = format!("{prefix}_");
        let last_roll_number = docs
            .last()
            .map(|doc| doc.id.strip_prefix(&id_prefix).unwrap_or(&doc.id).to_string());

        let students: Vec<StudentAttendanceSummary> = scanned
            .into_iter()
            .filter(|stats| !stats.roll_number.is_empty())
            .filter_map(|mut stats| {
                let slice = stats.subjects.remove(subject)?;
                Some(StudentAttendanceSummary::new(stats.roll_number, slice.into()))
            })
            .collect();

        // An empty page with more behind it still carries the cursor forward.
        if students.is_empty() && !has_more {
            return Fetched::Missing;
        }

        Fetched::Found(PaginatedStudents {
            total_count: students.len(),
            students,
            has_more,
            last_roll_number,
        })
    }
}
