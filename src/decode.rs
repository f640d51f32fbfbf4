//! Decoding of stored documents into typed entities.
//!
//! Missing fields take the zero/empty value of their type. Raw attendance
//! records are strict about field types and are rejected when a field holds the
//! wrong kind of value; pre-aggregated documents are lenient and fall back to
//! defaults instead.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::models::{
    AttendanceMetadata, AttendanceRecord, AttendanceStats, ClassType, StudentAggregatedStats,
    SubjectAttendanceStats, SubjectStats, SubjectTotals, SubjectTypeStats,
};
use crate::store::Document;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordDoc {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    device_room: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    roll_number: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    present: Option<bool>,
    #[serde(default)]
    is_extra: Option<bool>,
    #[serde(default, deserialize_with = "timestamp_text")]
    timestamp: String,
}

pub fn attendance_record(doc: &Document) -> Result<AttendanceRecord, serde_json::Error> {
    let raw: RecordDoc = serde_json::from_value(Value::Object(doc.fields.clone()))?;
    Ok(AttendanceRecord {
        date: raw.date.unwrap_or_default(),
        room: raw.device_room.unwrap_or_default(),
        group: raw.group.unwrap_or_default(),
        subject: raw.subject.unwrap_or_default(),
        roll_number: raw.roll_number.unwrap_or_default(),
        class_type: ClassType::from_tag(raw.kind.as_deref().unwrap_or_default()),
        present: raw.present.unwrap_or_default(),
        timestamp: raw.timestamp,
        is_extra: raw.is_extra.unwrap_or_default(),
    })
}

/// Renders a stored timestamp as text: strings verbatim, `{seconds, nanos}`
/// objects and epoch milliseconds as UTC `YYYY-MM-DD HH:MM:SS`.
pub fn timestamp_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| number.to_string()),
        Value::Object(map) => {
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"));
            let nanos = map.get("nanos").or_else(|| map.get("_nanoseconds"));
            seconds
                .and_then(Value::as_i64)
                .and_then(|secs| {
                    let nanos = nanos.and_then(Value::as_u64).unwrap_or(0) as u32;
                    DateTime::from_timestamp(secs, nanos)
                })
                .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_else(|| value.to_string())
        }
        other => other.to_string(),
    }
}

fn timestamp_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(timestamp_to_text(&value))
}

fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64().map(|n| n.max(0.0) as u32).unwrap_or(0))
}

fn rate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(0.0))
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().map(str::to_string))
}

fn strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

fn nested<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient<T: DeserializeOwned + Default>(fields: &Map<String, Value>) -> T {
    serde_json::from_value(Value::Object(fields.clone())).unwrap_or_default()
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TypeStatsDoc {
    #[serde(deserialize_with = "count")]
    total: u32,
    #[serde(deserialize_with = "count")]
    attended: u32,
    #[serde(deserialize_with = "rate")]
    percentage: f64,
}

impl From<TypeStatsDoc> for SubjectTypeStats {
    fn from(doc: TypeStatsDoc) -> Self {
        SubjectTypeStats {
            total: doc.total,
            attended: doc.attended,
            percentage: doc.percentage,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct MetadataDoc {
    #[serde(deserialize_with = "strings")]
    subjects: Vec<String>,
    #[serde(deserialize_with = "strings")]
    groups: Vec<String>,
    #[serde(deserialize_with = "count")]
    total_students: u32,
    #[serde(deserialize_with = "count")]
    total_classes: u32,
    #[serde(deserialize_with = "rate")]
    overall_attendance_rate: f64,
    #[serde(deserialize_with = "timestamp_text")]
    last_updated: String,
}

pub fn metadata(doc: &Document) -> AttendanceMetadata {
    let raw: MetadataDoc = lenient(&doc.fields);
    AttendanceMetadata {
        subjects: raw.subjects,
        groups: raw.groups,
        total_students: raw.total_students,
        total_classes: raw.total_classes,
        overall_attendance_rate: raw.overall_attendance_rate,
        last_updated: raw.last_updated,
    }
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct SubjectStatsDoc {
    #[serde(deserialize_with = "text")]
    subject: Option<String>,
    #[serde(deserialize_with = "text")]
    group: Option<String>,
    #[serde(deserialize_with = "count")]
    total_students: u32,
    #[serde(deserialize_with = "count")]
    total_classes: u32,
    #[serde(deserialize_with = "count")]
    present_count: u32,
    #[serde(deserialize_with = "rate")]
    attendance_rate: f64,
    #[serde(deserialize_with = "nested")]
    lecture_stats: TypeStatsDoc,
    #[serde(deserialize_with = "nested")]
    tutorial_stats: TypeStatsDoc,
    #[serde(deserialize_with = "nested")]
    lab_stats: TypeStatsDoc,
}

/// `None` when the document does not name both its subject and group.
pub fn subject_stats(doc: &Document) -> Option<SubjectStats> {
    let raw: SubjectStatsDoc = lenient(&doc.fields);
    Some(SubjectStats {
        subject: raw.subject?,
        group: raw.group?,
        total_students: raw.total_students,
        total_classes: raw.total_classes,
        present_count: raw.present_count,
        attendance_rate: raw.attendance_rate,
        lecture_stats: raw.lecture_stats.into(),
        tutorial_stats: raw.tutorial_stats.into(),
        lab_stats: raw.lab_stats.into(),
    })
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct SubjectSliceDoc {
    #[serde(deserialize_with = "count")]
    total_classes: u32,
    #[serde(deserialize_with = "count")]
    attended: u32,
    #[serde(deserialize_with = "rate")]
    percentage: f64,
    #[serde(deserialize_with = "nested")]
    lecture_stats: TypeStatsDoc,
    #[serde(deserialize_with = "nested")]
    tutorial_stats: TypeStatsDoc,
    #[serde(deserialize_with = "nested")]
    lab_stats: TypeStatsDoc,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct OverallDoc {
    #[serde(deserialize_with = "count")]
    total_classes: u32,
    #[serde(deserialize_with = "count")]
    attended_classes: u32,
    #[serde(deserialize_with = "rate")]
    percentage: f64,
    #[serde(deserialize_with = "nested")]
    lecture_stats: TypeStatsDoc,
    #[serde(deserialize_with = "nested")]
    tutorial_stats: TypeStatsDoc,
    #[serde(deserialize_with = "nested")]
    lab_stats: TypeStatsDoc,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct StudentDoc {
    #[serde(deserialize_with = "text")]
    roll_number: Option<String>,
    #[serde(deserialize_with = "text")]
    group: Option<String>,
    #[serde(deserialize_with = "nested")]
    subjects: BTreeMap<String, Value>,
    #[serde(deserialize_with = "nested")]
    overall_stats: OverallDoc,
}

/// Decodes a `student_attendance` document. The roll number is empty when the
/// document does not carry one.
pub fn student_stats(doc: &Document, year: i32, month: u32) -> StudentAggregatedStats {
    let raw: StudentDoc = lenient(&doc.fields);
    let subjects = raw
        .subjects
        .into_iter()
        .map(|(subject, value)| {
            let slice: SubjectSliceDoc = serde_json::from_value(value).unwrap_or_default();
            let stats = SubjectAttendanceStats {
                total_classes: slice.total_classes,
                attended: slice.attended,
                percentage: slice.percentage,
                lecture_stats: slice.lecture_stats.into(),
                tutorial_stats: slice.tutorial_stats.into(),
                lab_stats: slice.lab_stats.into(),
            };
            (subject, stats)
        })
        .collect();

    let overall = raw.overall_stats;
    StudentAggregatedStats {
        roll_number: raw.roll_number.unwrap_or_default(),
        year,
        month,
        group: raw.group.unwrap_or_default(),
        subjects,
        overall_stats: AttendanceStats {
            total_classes: overall.total_classes,
            attended_classes: overall.attended_classes,
            percentage: overall.percentage,
            lecture_stats: overall.lecture_stats.into(),
            tutorial_stats: overall.tutorial_stats.into(),
            lab_stats: overall.lab_stats.into(),
        },
    }
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct SubjectTotalsDoc {
    #[serde(deserialize_with = "count")]
    lect_total: u32,
    #[serde(deserialize_with = "count")]
    lab_total: u32,
    #[serde(deserialize_with = "count")]
    tut_total: u32,
}

pub fn subject_totals(doc: &Document) -> SubjectTotals {
    let raw: SubjectTotalsDoc = lenient(&doc.fields);
    SubjectTotals {
        lect_total: raw.lect_total,
        lab_total: raw.lab_total,
        tut_total: raw.tut_total,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(fields: Value) -> Document {
        let Value::Object(fields) = fields else {
            panic!("test document must be an object");
        };
        Document {
            id: "doc".to_string(),
            fields,
        }
    }

    #[test]
    fn record_fields_default_when_missing() {
        let record = attendance_record(&doc(json!({
            "rollNumber": "21CS042",
            "subject": "CS101",
            "type": "lab",
            "present": true,
        })))
        .unwrap();

        assert_eq!(record.roll_number, "21CS042");
        assert_eq!(record.class_type, ClassType::Lab);
        assert!(record.present);
        assert_eq!(record.group, "");
        assert_eq!(record.timestamp, "");
        assert!(!record.is_extra);
    }

    #[test]
    fn record_with_mistyped_field_is_rejected() {
        let result = attendance_record(&doc(json!({
            "rollNumber": "21CS042",
            "present": "yes",
        })));
        assert!(result.is_err());
    }

    #[test]
    fn null_text_fields_read_as_empty() {
        let record = attendance_record(&doc(json!({ "group": null, "type": "lect" }))).unwrap();
        assert_eq!(record.group, "");
        assert_eq!(record.class_type, ClassType::Lecture);
    }

    #[test]
    fn timestamps_render_from_each_stored_shape() {
        assert_eq!(timestamp_to_text(&json!("2025-03-04 09:00")), "2025-03-04 09:00");
        assert_eq!(
            timestamp_to_text(&json!({ "seconds": 1741078800, "nanos": 0 })),
            "2025-03-04 09:00:00"
        );
        assert_eq!(
            timestamp_to_text(&json!({ "_seconds": 1741078800, "_nanoseconds": 5 })),
            "2025-03-04 09:00:00"
        );
        assert_eq!(timestamp_to_text(&json!(1741078800000_i64)), "2025-03-04 09:00:00");
        assert_eq!(timestamp_to_text(&Value::Null), "");
    }

    #[test]
    fn metadata_accepts_float_counts_and_skips_non_strings() {
        let metadata = metadata(&doc(json!({
            "subjects": ["CS101", 7, "MA201"],
            "totalStudents": 42.0,
            "totalClasses": "many",
            "overallAttendanceRate": 81.5,
        })));

        assert_eq!(metadata.subjects, ["CS101", "MA201"]);
        assert!(metadata.groups.is_empty());
        assert_eq!(metadata.total_students, 42);
        assert_eq!(metadata.total_classes, 0);
        assert_eq!(metadata.overall_attendance_rate, 81.5);
    }

    #[test]
    fn subject_stats_require_subject_and_group() {
        assert!(subject_stats(&doc(json!({ "subject": "CS101" }))).is_none());

        let stats = subject_stats(&doc(json!({
            "subject": "CS101",
            "group": "G1",
            "totalClasses": 12,
            "presentCount": 9,
            "attendanceRate": 75.0,
            "lectureStats": { "total": 8, "attended": 6, "percentage": 75.0 },
            "labStats": "broken",
        })))
        .unwrap();

        assert_eq!(stats.total_classes, 12);
        assert_eq!(stats.lecture_stats.attended, 6);
        assert_eq!(stats.lab_stats, SubjectTypeStats::default());
    }

    #[test]
    fn student_document_decodes_subject_map() {
        let stats = student_stats(
            &doc(json!({
                "rollNumber": "R7",
                "group": "G2",
                "subjects": {
                    "CS101": { "totalClasses": 4, "attended": 3, "percentage": 75.0 },
                    "MA201": 12,
                },
                "overallStats": { "totalClasses": 4, "attendedClasses": 3, "percentage": 75.0 },
            })),
            2025,
            3,
        );

        assert_eq!(stats.roll_number, "R7");
        assert_eq!(stats.subjects["CS101"].attended, 3);
        assert_eq!(stats.subjects["MA201"], SubjectAttendanceStats::default());
        assert_eq!(stats.overall_stats.attended_classes, 3);
    }

    #[test]
    fn subject_totals_default_to_zero() {
        let totals = subject_totals(&doc(json!({ "lectTotal": 20, "labTotal": 5 })));
        assert_eq!(totals.total_classes(), 25);
    }
}
