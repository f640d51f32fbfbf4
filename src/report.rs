use std::collections::BTreeMap;
use std::fmt::Write;

use crate::aggregate;
use crate::models::{OptimizedDashboardOverview, SubjectAttendance, SubjectTotals};

/// Students at or above this percentage are not listed as needing attention.
pub const ATTENTION_THRESHOLD: f64 = 75.0;

pub struct ReportInput<'a> {
    pub year: i32,
    pub month: u32,
    pub group: Option<&'a str>,
    pub overview: &'a OptimizedDashboardOverview,
    pub subject_totals: &'a BTreeMap<String, SubjectTotals>,
    pub attendance: &'a BTreeMap<String, SubjectAttendance>,
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let overview = input.overview;
    let metadata = &overview.metadata;
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(
        output,
        "Generated for {} in {}-{:02} from {}",
        input.group.unwrap_or("all groups"),
        input.year,
        input.month,
        if overview.is_optimized {
            "pre-aggregated data"
        } else {
            "raw attendance records"
        }
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Students: {}", metadata.total_students);
    let _ = writeln!(output, "- Classes recorded: {}", metadata.total_classes);
    let _ = writeln!(
        output,
        "- Overall attendance: {:.1}% ({})",
        metadata.overall_attendance_rate,
        aggregate::grade(metadata.overall_attendance_rate).label()
    );
    if !metadata.last_updated.is_empty() {
        let _ = writeln!(output, "- Summaries last rebuilt: {}", metadata.last_updated);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subjects");

    if overview.subject_stats.is_empty() {
        let _ = writeln!(output, "No subject data for this month.");
    } else {
        for stats in &overview.subject_stats {
            let _ = write!(
                output,
                "- {} / {}: {:.1}% ({}) across {} classes, {} students",
                stats.subject,
                stats.group,
                stats.attendance_rate,
                aggregate::grade(stats.attendance_rate).label(),
                stats.total_classes,
                stats.total_students
            );
            match input.subject_totals.get(&stats.subject) {
                Some(planned) if planned.total_classes() > 0 => {
                    let _ = writeln!(output, "; {} planned", planned.total_classes());
                }
                _ => {
                    let _ = writeln!(output);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Groups");

    if overview.group_stats.is_empty() {
        let _ = writeln!(output, "No group data for this month.");
    } else {
        for group in &overview.group_stats {
            let _ = writeln!(
                output,
                "- {}: {:.1}% average across {} classes",
                group.group, group.average_attendance, group.total_classes
            );
        }
    }

    let mut attention: Vec<_> = input
        .attendance
        .values()
        .flat_map(|subject| {
            subject
                .students
                .iter()
                .filter(|student| student.stats.total_classes > 0)
                .filter(|student| student.stats.percentage < ATTENTION_THRESHOLD)
                .map(move |student| (subject.subject.as_str(), student))
        })
        .collect();
    attention.sort_by(|a, b| {
        a.1.stats
            .percentage
            .total_cmp(&b.1.stats.percentage)
            .then_with(|| a.1.roll_number.cmp(&b.1.roll_number))
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");

    if attention.is_empty() {
        let _ = writeln!(output, "Every student is at or above {ATTENTION_THRESHOLD:.0}%.");
    } else {
        for (subject, student) in attention.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} in {}: {:.1}% ({} of {} classes)",
                student.roll_number,
                subject,
                student.stats.percentage,
                student.stats.attended_classes,
                student.stats.total_classes
            );
        }
    }

    output
}
