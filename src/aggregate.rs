use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    AttendanceGrade, AttendanceRecord, AttendanceStats, ClassType, DashboardOverview,
    GroupOverview, StudentAttendanceSummary, SubjectOverview, SubjectStats, SubjectTypeStats,
};

pub fn percentage(attended: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        attended as f64 / total as f64 * 100.0
    }
}

fn count<'a, I>(records: I) -> (u32, u32)
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    records.into_iter().fold((0, 0), |(total, attended), record| {
        (total + 1, attended + u32::from(record.present))
    })
}

pub fn type_stats<'a, I>(records: I) -> SubjectTypeStats
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    let (total, attended) = count(records);
    SubjectTypeStats {
        total,
        attended,
        percentage: percentage(attended, total),
    }
}

/// Overall and per-type stats. Records with an unknown type count toward the
/// overall total only.
pub fn attendance_stats(records: &[AttendanceRecord]) -> AttendanceStats {
    let of_type = |kind: ClassType| {
        type_stats(records.iter().filter(move |record| record.class_type == kind))
    };
    let (total_classes, attended_classes) = count(records);

    AttendanceStats {
        total_classes,
        attended_classes,
        percentage: percentage(attended_classes, total_classes),
        lecture_stats: of_type(ClassType::Lecture),
        tutorial_stats: of_type(ClassType::Tutorial),
        lab_stats: of_type(ClassType::Lab),
    }
}

fn group_by<'a, F>(records: &'a [AttendanceRecord], key: F) -> BTreeMap<&'a str, Vec<AttendanceRecord>>
where
    F: Fn(&'a AttendanceRecord) -> &'a str,
{
    let mut buckets: BTreeMap<&str, Vec<AttendanceRecord>> = BTreeMap::new();
    for record in records {
        buckets.entry(key(record)).or_default().push(record.clone());
    }
    buckets
}

fn distinct_students<'a, I>(records: I) -> u32
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    records
        .into_iter()
        .map(|record| record.roll_number.as_str())
        .collect::<BTreeSet<_>>()
        .len() as u32
}

pub fn dashboard_overview(records: &[AttendanceRecord]) -> DashboardOverview {
    let (total_classes, present) = count(records);

    let subject_stats = group_by(records, |record| record.subject.as_str())
        .into_iter()
        .map(|(subject, bucket)| {
            let (total, attended) = count(&bucket);
            SubjectOverview {
                subject: subject.to_string(),
                total_classes: total,
                average_attendance: percentage(attended, total),
            }
        })
        .collect();

    let group_stats = group_by(records, |record| record.group.as_str())
        .into_iter()
        .map(|(group, bucket)| {
            let (total, attended) = count(&bucket);
            GroupOverview {
                group: group.to_string(),
                total_classes: total,
                average_attendance: percentage(attended, total),
            }
        })
        .collect();

    DashboardOverview {
        total_students: distinct_students(records),
        total_classes,
        overall_attendance: percentage(present, total_classes),
        subject_stats,
        group_stats,
    }
}

/// Group rollup over pre-aggregated subject stats: class totals are summed,
/// rates are the unweighted mean of the subject rates.
pub fn group_overviews(subject_stats: &[SubjectStats]) -> Vec<GroupOverview> {
    let mut groups: BTreeMap<&str, (u32, f64, usize)> = BTreeMap::new();
    for stats in subject_stats {
        let entry = groups.entry(stats.group.as_str()).or_insert((0, 0.0, 0));
        entry.0 += stats.total_classes;
        entry.1 += stats.attendance_rate;
        entry.2 += 1;
    }

    groups
        .into_iter()
        .map(|(group, (total_classes, rate_sum, subjects))| GroupOverview {
            group: group.to_string(),
            total_classes,
            average_attendance: if subjects == 0 {
                0.0
            } else {
                rate_sum / subjects as f64
            },
        })
        .collect()
}

/// One `SubjectStats` per (subject, group) pair, ordered by subject then group.
pub fn subject_stats(records: &[AttendanceRecord]) -> Vec<SubjectStats> {
    let mut slices: BTreeMap<(&str, &str), Vec<AttendanceRecord>> = BTreeMap::new();
    for record in records {
        slices
            .entry((record.subject.as_str(), record.group.as_str()))
            .or_default()
            .push(record.clone());
    }

    slices
        .into_iter()
        .map(|((subject, group), slice)| {
            let stats = attendance_stats(&slice);
            SubjectStats {
                subject: subject.to_string(),
                group: group.to_string(),
                total_students: distinct_students(&slice),
                total_classes: stats.total_classes,
                present_count: stats.attended_classes,
                attendance_rate: stats.percentage,
                lecture_stats: stats.lecture_stats,
                tutorial_stats: stats.tutorial_stats,
                lab_stats: stats.lab_stats,
            }
        })
        .collect()
}

pub fn student_summaries(records: &[AttendanceRecord]) -> Vec<StudentAttendanceSummary> {
    group_by(records, |record| record.roll_number.as_str())
        .into_iter()
        .map(|(roll_number, bucket)| {
            StudentAttendanceSummary::new(roll_number, attendance_stats(&bucket))
        })
        .collect()
}

pub fn stats_by_subject(records: &[AttendanceRecord]) -> BTreeMap<String, AttendanceStats> {
    group_by(records, |record| record.subject.as_str())
        .into_iter()
        .map(|(subject, bucket)| (subject.to_string(), attendance_stats(&bucket)))
        .collect()
}

pub fn grade(percentage: f64) -> AttendanceGrade {
    match percentage {
        p if p >= 90.0 => AttendanceGrade::Excellent,
        p if p >= 75.0 => AttendanceGrade::Good,
        p if p >= 65.0 => AttendanceGrade::Satisfactory,
        p if p >= 50.0 => AttendanceGrade::NeedsImprovement,
        _ => AttendanceGrade::Poor,
    }
}
