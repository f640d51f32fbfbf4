use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Kind of class session an attendance record was taken in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassType {
    Lecture,
    Tutorial,
    Lab,
    Other(String),
}

impl ClassType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "lect" => ClassType::Lecture,
            "tut" => ClassType::Tutorial,
            "lab" => ClassType::Lab,
            other => ClassType::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            ClassType::Lecture => "lect",
            ClassType::Tutorial => "tut",
            ClassType::Lab => "lab",
            ClassType::Other(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub date: String,
    pub room: String,
    pub group: String,
    pub subject: String,
    pub roll_number: String,
    pub class_type: ClassType,
    pub present: bool,
    pub timestamp: String,
    pub is_extra: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SubjectTypeStats {
    pub total: u32,
    pub attended: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_classes: u32,
    pub attended_classes: u32,
    pub percentage: f64,
    pub lecture_stats: SubjectTypeStats,
    pub tutorial_stats: SubjectTypeStats,
    pub lab_stats: SubjectTypeStats,
}

/// Per-subject slice of a pre-aggregated student document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAttendanceStats {
    pub total_classes: u32,
    pub attended: u32,
    pub percentage: f64,
    pub lecture_stats: SubjectTypeStats,
    pub tutorial_stats: SubjectTypeStats,
    pub lab_stats: SubjectTypeStats,
}

impl From<SubjectAttendanceStats> for AttendanceStats {
    fn from(stats: SubjectAttendanceStats) -> Self {
        AttendanceStats {
            total_classes: stats.total_classes,
            attended_classes: stats.attended,
            percentage: stats.percentage,
            lecture_stats: stats.lecture_stats,
            tutorial_stats: stats.tutorial_stats,
            lab_stats: stats.lab_stats,
        }
    }
}

impl From<&AttendanceStats> for SubjectAttendanceStats {
    fn from(stats: &AttendanceStats) -> Self {
        SubjectAttendanceStats {
            total_classes: stats.total_classes,
            attended: stats.attended_classes,
            percentage: stats.percentage,
            lecture_stats: stats.lecture_stats,
            tutorial_stats: stats.tutorial_stats,
            lab_stats: stats.lab_stats,
        }
    }
}

/// Store-side aggregate for one (subject, group) slice of a month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject: String,
    pub group: String,
    pub total_students: u32,
    pub total_classes: u32,
    pub present_count: u32,
    pub attendance_rate: f64,
    pub lecture_stats: SubjectTypeStats,
    pub tutorial_stats: SubjectTypeStats,
    pub lab_stats: SubjectTypeStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregatedStats {
    pub roll_number: String,
    pub year: i32,
    pub month: u32,
    pub group: String,
    pub subjects: BTreeMap<String, SubjectAttendanceStats>,
    pub overall_stats: AttendanceStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMetadata {
    pub subjects: Vec<String>,
    pub groups: Vec<String>,
    pub total_students: u32,
    pub total_classes: u32,
    pub overall_attendance_rate: f64,
    pub last_updated: String,
}

/// Planned class counts for a subject, from the `subjects` collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTotals {
    pub lect_total: u32,
    pub lab_total: u32,
    pub tut_total: u32,
}

impl SubjectTotals {
    pub fn total_classes(&self) -> u32 {
        self.lect_total + self.lab_total + self.tut_total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectOverview {
    pub subject: String,
    pub total_classes: u32,
    pub average_attendance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupOverview {
    pub group: String,
    pub total_classes: u32,
    pub average_attendance: f64,
}

/// Dashboard summary computed client-side from raw records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardOverview {
    pub total_students: u32,
    pub total_classes: u32,
    pub overall_attendance: f64,
    pub subject_stats: Vec<SubjectOverview>,
    pub group_stats: Vec<GroupOverview>,
}

/// Dashboard summary handed to callers regardless of which tier produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizedDashboardOverview {
    pub metadata: AttendanceMetadata,
    pub subject_stats: Vec<SubjectStats>,
    pub group_stats: Vec<GroupOverview>,
    pub is_optimized: bool,
    pub load_time: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentAttendanceSummary {
    pub roll_number: String,
    pub name: String,
    pub stats: AttendanceStats,
}

impl StudentAttendanceSummary {
    pub fn new(roll_number: impl Into<String>, stats: AttendanceStats) -> Self {
        let roll_number = roll_number.into();
        Self {
            name: format!("Student {roll_number}"),
            roll_number,
            stats,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectAttendance {
    pub subject: String,
    pub students: Vec<StudentAttendanceSummary>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginatedStudents {
    pub students: Vec<StudentAttendanceSummary>,
    pub has_more: bool,
    pub last_roll_number: Option<String>,
    pub total_count: usize,
}

/// Everything the raw dashboard needs, fetched in one fan-out batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardData {
    pub records: Vec<AttendanceRecord>,
    pub subjects: Vec<String>,
    pub groups: Vec<String>,
    pub subject_totals: BTreeMap<String, SubjectTotals>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceGrade {
    Excellent,
    Good,
    Satisfactory,
    NeedsImprovement,
    Poor,
}

impl AttendanceGrade {
    pub fn label(&self) -> &'static str {
        match self {
            AttendanceGrade::Excellent => "Excellent",
            AttendanceGrade::Good => "Good",
            AttendanceGrade::Satisfactory => "Satisfactory",
            AttendanceGrade::NeedsImprovement => "Needs Improvement",
            AttendanceGrade::Poor => "Poor",
        }
    }
}
