use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::aggregate;
use crate::fanout::FanOut;
use crate::models::{
    AttendanceMetadata, AttendanceStats, OptimizedDashboardOverview, SubjectAttendance,
    SubjectStats, SubjectTotals,
};
use crate::optimized::{Fetched, OptimizedQueryService};
use crate::raw::RawQueryService;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("attendance data unavailable: {0}")]
    Legacy(#[from] StoreError),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Optimized,
    Legacy,
}

/// The optimized tier is used when it produced authoritative, non-empty
/// metadata or a non-empty set of subject stats.
fn evaluate(metadata: &Fetched<AttendanceMetadata>, stats: &Fetched<Vec<SubjectStats>>) -> Tier {
    let metadata_ready = matches!(
        metadata,
        Fetched::Found(m) if !m.subjects.is_empty() || !m.groups.is_empty()
    );
    let stats_ready = matches!(stats, Fetched::Found(s) if !s.is_empty());
    if metadata_ready || stats_ready {
        Tier::Optimized
    } else {
        Tier::Legacy
    }
}

/// Serves attendance views from the pre-aggregated collections when they
/// have data and from raw records otherwise.
///
/// Each method decides on its own which tier to use. Only a failure of the
/// raw tier, taken as the last resort, is returned as an error.
pub struct HybridRepository {
    raw: Arc<RawQueryService>,
    optimized: Arc<OptimizedQueryService>,
    fanout: FanOut,
}

impl HybridRepository {
    pub fn new(
        raw: Arc<RawQueryService>,
        optimized: Arc<OptimizedQueryService>,
        fanout: FanOut,
    ) -> Self {
        Self {
            raw,
            optimized,
            fanout,
        }
    }

    pub async fn dashboard_overview(
        &self,
        year: i32,
        month: u32,
        group: Option<&str>,
    ) -> RepositoryResult<OptimizedDashboardOverview> {
        let started = Instant::now();

        let (metadata, subject_stats) = tokio::join!(
            self.optimized.fetch_metadata(year, month),
            self.optimized.fetch_subject_stats(year, month, group, None),
        );

        match evaluate(&metadata, &subject_stats) {
            Tier::Optimized => {
                let subject_stats = subject_stats.into_value();
                let group_stats = aggregate::group_overviews(&subject_stats);
                let load_time = started.elapsed();
                tracing::info!(year, month, ?load_time, "dashboard served from pre-aggregated data");

                Ok(OptimizedDashboardOverview {
                    metadata: metadata.into_value(),
                    subject_stats,
                    group_stats,
                    is_optimized: true,
                    load_time,
                })
            }
            Tier::Legacy => {
                tracing::info!(
                    year,
                    month,
                    metadata = metadata.describe(),
                    subject_stats = subject_stats.describe(),
                    failure = ?metadata.error().or(subject_stats.error()),
                    "falling back to raw attendance records"
                );
                let mut overview = self.legacy_dashboard(year, month, group).await?;
                overview.load_time = started.elapsed();
                Ok(overview)
            }
        }
    }

    async fn legacy_dashboard(
        &self,
        year: i32,
        month: u32,
        group: Option<&str>,
    ) -> RepositoryResult<OptimizedDashboardOverview> {
        let data = self.raw.try_fetch_dashboard_data(year, month, group).await?;
        let overview = aggregate::dashboard_overview(&data.records);

        Ok(OptimizedDashboardOverview {
            metadata: AttendanceMetadata {
                subjects: data.subjects,
                groups: data.groups,
                total_students: overview.total_students,
                total_classes: overview.total_classes,
                overall_attendance_rate: overview.overall_attendance,
                last_updated: String::new(),
            },
            subject_stats: aggregate::subject_stats(&data.records),
            group_stats: overview.group_stats,
            is_optimized: false,
            load_time: Default::default(),
        })
    }

    /// Students of one subject. A first page (`after == None`) falls back to
    /// the full raw listing when the optimized tier has nothing; continuation
    /// pages only ever come from the optimized tier.
    pub async fn subject_attendance(
        &self,
        subject: &str,
        year: i32,
        month: u32,
        group: Option<&str>,
        page_size: usize,
        after: Option<&str>,
    ) -> RepositoryResult<SubjectAttendance> {
        let fetched = self
            .optimized
            .fetch_student_page(subject, year, month, group, page_size, after)
            .await;

        match (fetched, after) {
            (Fetched::Found(page), _) => {
                tracing::debug!(
                    subject,
                    returned = page.total_count,
                    has_more = page.has_more,
                    "subject page from pre-aggregated data"
                );
                Ok(SubjectAttendance {
                    subject: subject.to_string(),
                    students: page.students,
                    has_more: page.has_more,
                    next_cursor: page.last_roll_number.filter(|_| page.has_more),
                })
            }
            (other, Some(after)) => {
                tracing::debug!(subject, after, outcome = other.describe(), "no further students");
                Ok(SubjectAttendance {
                    subject: subject.to_string(),
                    ..SubjectAttendance::default()
                })
            }
            (other, None) => {
                tracing::info!(
                    subject,
                    year,
                    month,
                    outcome = other.describe(),
                    failure = ?other.error(),
                    "subject page falling back to raw records"
                );
                self.legacy_subject_attendance(subject, year, month, group).await
            }
        }
    }

    async fn legacy_subject_attendance(
        &self,
        subject: &str,
        year: i32,
        month: u32,
        group: Option<&str>,
    ) -> RepositoryResult<SubjectAttendance> {
        let records = self
            .raw
            .try_fetch_records(year, month, group, Some(subject))
            .await?;

        Ok(SubjectAttendance {
            subject: subject.to_string(),
            students: aggregate::student_summaries(&records),
            has_more: false,
            next_cursor: None,
        })
    }

    /// Raw per-subject listings, one concurrent branch per subject.
    pub async fn subject_attendance_many(
        &self,
        subjects: &[String],
        year: i32,
        month: u32,
        group: Option<&str>,
    ) -> BTreeMap<String, SubjectAttendance> {
        let branches = subjects.iter().map(|subject| async move {
            let records = self
                .raw
                .fetch_records(year, month, group, Some(subject))
                .await;
            let attendance = SubjectAttendance {
                subject: subject.clone(),
                students: aggregate::student_summaries(&records),
                has_more: false,
                next_cursor: None,
            };
            (subject.clone(), attendance)
        });

        self.fanout.join_keyed(branches).await
    }

    pub async fn student_detail(
        &self,
        roll_number: &str,
        year: i32,
        month: u32,
    ) -> RepositoryResult<BTreeMap<String, AttendanceStats>> {
        match self.optimized.fetch_student_stats(roll_number, year, month).await {
            Fetched::Found(stats) => Ok(stats
                .subjects
                .into_iter()
                .map(|(subject, slice)| (subject, slice.into()))
                .collect()),
            other => {
                tracing::info!(
                    roll_number,
                    year,
                    month,
                    outcome = other.describe(),
                    "student detail falling back to raw records"
                );
                let records = self
                    .raw
                    .try_fetch_student_records(roll_number, year, month)
                    .await?;
                Ok(aggregate::stats_by_subject(&records))
            }
        }
    }

    pub async fn subjects_and_groups(&self, year: i32, month: u32) -> (Vec<String>, Vec<String>) {
        let metadata = self.optimized.fetch_metadata(year, month).await.into_value();
        if !metadata.subjects.is_empty() || !metadata.groups.is_empty() {
            return (metadata.subjects, metadata.groups);
        }

        tokio::join!(
            self.raw.fetch_subjects(year, month),
            self.raw.fetch_groups(year, month),
        )
    }

    pub async fn available_months(&self, year: i32) -> Vec<u32> {
        self.raw.fetch_available_months(year).await
    }

    pub async fn subject_totals(&self) -> BTreeMap<String, SubjectTotals> {
        self.raw.fetch_subject_totals().await
    }

    pub fn clear_cache(&self) {
        self.optimized.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::optimized::tests::{harness, insert_student, Harness};
    use crate::store::memory::MemoryStore;
    use crate::store::{METADATA_COLLECTION, STATS_COLLECTION, STUDENT_COLLECTION};

    fn repository(h: Harness) -> (Arc<MemoryStore>, Arc<RawQueryService>, HybridRepository) {
        let Harness {
            store,
            raw,
            optimized,
            ..
        } = h;
        let repo = HybridRepository::new(raw.clone(), Arc::new(optimized), FanOut::new(4));
        (store, raw, repo)
    }

    async fn insert_raw(store: &MemoryStore, rows: &[(&str, &str, &str, &str, &str, bool)]) {
        for (id, roll, subject, group, kind, present) in rows {
            store
                .insert(
                    "attendance_2025_03",
                    id,
                    json!({
                        "rollNumber": roll,
                        "subject": subject,
                        "group": group,
                        "type": kind,
                        "present": present,
                    }),
                )
                .await;
        }
    }

    const ROWS: &[(&str, &str, &str, &str, &str, bool)] = &[
        ("r1", "R1", "CS101", "G1", "lect", true),
        ("r2", "R1", "CS101", "G1", "lab", false),
        ("r3", "R2", "CS101", "G2", "lect", true),
        ("r4", "R2", "MA201", "G2", "tut", false),
        ("r5", "R3", "MA201", "G1", "lect", true),
    ];

    #[tokio::test]
    async fn empty_optimized_tier_falls_back_to_raw_aggregation() {
        let (store, raw, repo) = repository(harness());
        insert_raw(&store, ROWS).await;

        let overview = repo.dashboard_overview(2025, 3, None).await.unwrap();
        assert!(!overview.is_optimized);

        let direct = aggregate::dashboard_overview(&raw.fetch_records(2025, 3, None, None).await);
        assert_eq!(overview.metadata.total_students, direct.total_students);
        assert_eq!(overview.metadata.total_classes, direct.total_classes);
        assert_eq!(overview.metadata.overall_attendance_rate, direct.overall_attendance);
        assert_eq!(overview.group_stats, direct.group_stats);
        assert_eq!(overview.metadata.subjects, ["CS101", "MA201"]);
        assert_eq!(overview.subject_stats.len(), 4);
    }

    #[tokio::test]
    async fn optimized_tier_is_used_when_it_has_data() {
        let (store, _raw, repo) = repository(harness());
        store
            .insert(
                METADATA_COLLECTION,
                "2025_03",
                json!({ "subjects": ["CS101"], "groups": ["G1", "G2"], "totalStudents": 30 }),
            )
            .await;
        for (id, group, total, rate) in [
            ("2025_03_CS101_G1", "G1", 10, 90.0),
            ("2025_03_CS101_G2", "G2", 6, 50.0),
            ("2025_03_MA201_G1", "G1", 4, 70.0),
        ] {
            store
                .insert(
                    STATS_COLLECTION,
                    id,
                    json!({ "subject": id[8..13].to_string(), "group": group, "totalClasses": total, "attendanceRate": rate }),
                )
                .await;
        }

        let overview = repo.dashboard_overview(2025, 3, None).await.unwrap();
        assert!(overview.is_optimized);
        assert_eq!(overview.metadata.total_students, 30);
        assert_eq!(overview.subject_stats.len(), 3);
        assert_eq!(overview.group_stats[0].group, "G1");
        assert_eq!(overview.group_stats[0].total_classes, 14);
        assert!((overview.group_stats[0].average_attendance - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn degraded_metadata_alone_does_not_count_as_optimized() {
        let (store, _raw, repo) = repository(harness());
        insert_raw(&store, ROWS).await;

        let overview = repo.dashboard_overview(2025, 3, Some("G1")).await.unwrap();
        assert!(!overview.is_optimized);
        assert_eq!(overview.metadata.total_classes, 3);
    }

    #[tokio::test]
    async fn legacy_failure_surfaces_as_error() {
        let (store, _raw, repo) = repository(harness());
        store.set_failing(true);

        let err = repo.dashboard_overview(2025, 3, None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Legacy(_)));
        assert!(repo.student_detail("R1", 2025, 3).await.is_err());
    }

    #[tokio::test]
    async fn failing_summary_collections_fall_back_to_raw_records() {
        let h = harness();
        insert_student(&h.store, "R1", "G1", "PH110").await;
        let (store, _raw, repo) = repository(h);
        insert_raw(&store, ROWS).await;
        for collection in [METADATA_COLLECTION, STATS_COLLECTION, STUDENT_COLLECTION] {
            store.fail_collection(collection);
        }

        let overview = repo.dashboard_overview(2025, 3, None).await.unwrap();
        assert!(!overview.is_optimized);
        assert_eq!(overview.metadata.total_classes, 5);
        assert_eq!(overview.metadata.subjects, ["CS101", "MA201"]);

        let attendance = repo
            .subject_attendance("CS101", 2025, 3, None, 50, None)
            .await
            .unwrap();
        let rolls: Vec<_> = attendance.students.iter().map(|s| s.roll_number.as_str()).collect();
        assert_eq!(rolls, ["R1", "R2"]);

        let detail = repo.student_detail("R1", 2025, 3).await.unwrap();
        assert_eq!(detail.keys().collect::<Vec<_>>(), ["CS101"]);
    }

    #[tokio::test]
    async fn student_document_without_subjects_falls_back_to_raw() {
        let h = harness();
        h.store
            .insert(STUDENT_COLLECTION, "2025_03_R1", json!({ "rollNumber": "R1", "subjects": {} }))
            .await;
        let (store, _raw, repo) = repository(h);
        insert_raw(&store, ROWS).await;

        let detail = repo.student_detail("R1", 2025, 3).await.unwrap();
        assert_eq!(detail.keys().collect::<Vec<_>>(), ["CS101"]);
        assert_eq!(detail["CS101"].lab_stats.total, 1);
    }

    #[tokio::test]
    async fn subject_attendance_pages_through_optimized_students() {
        let h = harness();
        for roll in ["R1", "R2", "R3"] {
            insert_student(&h.store, roll, "G1", "CS101").await;
        }
        let (_store, _raw, repo) = repository(h);

        let first = repo
            .subject_attendance("CS101", 2025, 3, None, 2, None)
            .await
            .unwrap();
        assert_eq!(first.students.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.next_cursor.as_deref(), Some("R2"));

        let second = repo
            .subject_attendance("CS101", 2025, 3, None, 2, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.students.len(), 1);
        assert!(!second.has_more);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn subject_attendance_falls_back_to_raw_listing() {
        let (store, _raw, repo) = repository(harness());
        insert_raw(&store, ROWS).await;

        let attendance = repo
            .subject_attendance("CS101", 2025, 3, None, 50, None)
            .await
            .unwrap();
        let rolls: Vec<_> = attendance.students.iter().map(|s| s.roll_number.as_str()).collect();
        assert_eq!(rolls, ["R1", "R2"]);
        assert_eq!(attendance.students[0].stats.total_classes, 2);
        assert!(!attendance.has_more);

        let beyond = repo
            .subject_attendance("CS101", 2025, 3, None, 50, Some("R9"))
            .await
            .unwrap();
        assert!(beyond.students.is_empty());
    }

    #[tokio::test]
    async fn student_detail_prefers_optimized_document() {
        let h = harness();
        insert_student(&h.store, "R1", "G1", "PH110").await;
        let (store, _raw, repo) = repository(h);
        insert_raw(&store, ROWS).await;

        let detail = repo.student_detail("R1", 2025, 3).await.unwrap();
        assert_eq!(detail.keys().collect::<Vec<_>>(), ["PH110"]);

        let fallback = repo.student_detail("R2", 2025, 3).await.unwrap();
        assert_eq!(fallback.len(), 2);
        assert_eq!(fallback["MA201"].tutorial_stats.total, 1);
    }

    #[tokio::test]
    async fn subject_fan_out_returns_every_subject() {
        let (store, _raw, repo) = repository(harness());
        insert_raw(&store, ROWS).await;

        let subjects = vec!["CS101".to_string(), "MA201".to_string(), "PH110".to_string()];
        let data = repo.subject_attendance_many(&subjects, 2025, 3, Some("G1")).await;
        assert_eq!(data.len(), 3);
        assert_eq!(data["CS101"].students.len(), 1);
        assert_eq!(data["MA201"].students[0].roll_number, "R3");
        assert!(data["PH110"].students.is_empty());
    }

    #[tokio::test]
    async fn subjects_and_groups_use_metadata_then_raw() {
        let (store, _raw, repo) = repository(harness());
        insert_raw(&store, ROWS).await;
        let (subjects, groups) = repo.subjects_and_groups(2025, 3).await;
        assert_eq!(subjects, ["CS101", "MA201"]);
        assert_eq!(groups, ["G1", "G2"]);

        store
            .insert(METADATA_COLLECTION, "2025_03", json!({ "subjects": ["X1"], "groups": ["Z"] }))
            .await;
        let (subjects, groups) = repo.subjects_and_groups(2025, 3).await;
        assert_eq!(subjects, ["X1"]);
        assert_eq!(groups, ["Z"]);
    }
}
