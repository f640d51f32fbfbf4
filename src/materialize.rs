//! Rebuilds the pre-aggregated collections for one month from its raw records.

use serde_json::Value;

use crate::aggregate;
use crate::models::{AttendanceMetadata, StudentAggregatedStats, SubjectAttendanceStats};
use crate::raw::RawQueryService;
use crate::store::{
    period_key, DocumentStore, StoreResult, METADATA_COLLECTION, STATS_COLLECTION,
    STUDENT_COLLECTION,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeSummary {
    pub records: usize,
    pub subject_slices: usize,
    pub students: usize,
}

fn to_document<T: serde::Serialize>(value: &T) -> StoreResult<Value> {
    Ok(serde_json::to_value(value)?)
}

pub async fn rebuild_month(
    store: &dyn DocumentStore,
    raw: &RawQueryService,
    year: i32,
    month: u32,
) -> StoreResult<MaterializeSummary> {
    let records = raw.try_fetch_records(year, month, None, None).await?;
    if records.is_empty() {
        tracing::warn!(year, month, "no raw records, nothing to aggregate");
        return Ok(MaterializeSummary::default());
    }

    let period = period_key(year, month);
    let overview = aggregate::dashboard_overview(&records);
    let subject_stats = aggregate::subject_stats(&records);

    let metadata = AttendanceMetadata {
        subjects: overview.subject_stats.iter().map(|s| s.subject.clone()).collect(),
        groups: overview.group_stats.iter().map(|g| g.group.clone()).collect(),
        total_students: overview.total_students,
        total_classes: overview.total_classes,
        overall_attendance_rate: overview.overall_attendance,
        last_updated: raw.clock().timestamp_text(),
    };
    store
        .put(METADATA_COLLECTION, &period, to_document(&metadata)?)
        .await?;

    for stats in &subject_stats {
        let id = format!("{period}_{}_{}", stats.subject, stats.group);
        store.put(STATS_COLLECTION, &id, to_document(stats)?).await?;
    }

    let mut students = 0;
    for summary in aggregate::student_summaries(&records) {
        let own: Vec<_> = records
            .iter()
            .filter(|record| record.roll_number == summary.roll_number)
            .cloned()
            .collect();
        let group = own.first().map(|record| record.group.clone()).unwrap_or_default();
        let subjects = aggregate::stats_by_subject(&own)
            .iter()
            .map(|(subject, stats)| (subject.clone(), SubjectAttendanceStats::from(stats)))
            .collect();

        let doc = StudentAggregatedStats {
            roll_number: summary.roll_number.clone(),
            year,
            month,
            group,
            subjects,
            overall_stats: summary.stats,
        };
        let id = format!("{period}_{}", summary.roll_number);
        store.put(STUDENT_COLLECTION, &id, to_document(&doc)?).await?;
        students += 1;
    }

    let summary = MaterializeSummary {
        records: records.len(),
        subject_slices: subject_stats.len(),
        students,
    };
    tracing::info!(year, month, ?summary, "rebuilt pre-aggregated attendance");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::optimized::tests::{harness, Harness};
    use crate::optimized::Fetched;

    async fn seed_raw(h: &Harness) {
        let rows = [
            ("r1", "R1", "CS101", "G1", "lect", true),
            ("r2", "R1", "CS101", "G1", "lab", false),
            ("r3", "R2", "CS101", "G2", "lect", true),
            ("r4", "R2", "MA201", "G2", "tut", true),
        ];
        for (id, roll, subject, group, kind, present) in rows {
            h.store
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

    #[tokio::test]
    async fn rebuilt_documents_read_back_through_optimized_tier() {
        let h = harness();
        seed_raw(&h).await;

        let summary = rebuild_month(h.store.as_ref(), &h.raw, 2025, 3).await.unwrap();
        assert_eq!(
            summary,
            MaterializeSummary {
                records: 4,
                subject_slices: 3,
                students: 2,
            }
        );

        let Fetched::Found(metadata) = h.optimized.fetch_metadata(2025, 3).await else {
            panic!("metadata should be found after rebuild");
        };
        assert_eq!(metadata.subjects, ["CS101", "MA201"]);
        assert_eq!(metadata.total_students, 2);
        assert_eq!(metadata.total_classes, 4);
        assert!((metadata.overall_attendance_rate - 75.0).abs() < 1e-9);
        assert_eq!(metadata.last_updated, "2025-03-20 00:00:00");

        let stats = h
            .optimized
            .fetch_subject_stats(2025, 3, Some("G1"), None)
            .await
            .into_value();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].lab_stats.total, 1);

        let student = h.optimized.fetch_student_stats("R1", 2025, 3).await.into_value();
        assert_eq!(student.group, "G1");
        assert_eq!(student.subjects["CS101"].attended, 1);
        assert_eq!(student.overall_stats.total_classes, 2);
    }

    #[tokio::test]
    async fn empty_month_writes_nothing() {
        let h = harness();
        let summary = rebuild_month(h.store.as_ref(), &h.raw, 2025, 3).await.unwrap();
        assert_eq!(summary, MaterializeSummary::default());
        assert!(matches!(h.optimized.fetch_metadata(2025, 3).await, Fetched::Missing));
    }

    #[tokio::test]
    async fn store_failure_aborts_rebuild() {
        let h = harness();
        seed_raw(&h).await;
        h.store.set_failing(true);
        assert!(rebuild_month(h.store.as_ref(), &h.raw, 2025, 3).await.is_err());
    }
}
