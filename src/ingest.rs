use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use serde_json::json;
use uuid::Uuid;

use crate::models::ClassType;
use crate::store::{raw_collection, DocumentStore, SUBJECTS_COLLECTION};

const SEED_SUBJECTS: [(&str, u32, u32, u32); 3] = [
    ("CS101", 12, 6, 4),
    ("MA201", 10, 0, 6),
    ("PH110", 8, 4, 2),
];
const SEED_GROUPS: [(&str, [&str; 3]); 2] = [
    ("G1", ["21CS001", "21CS002", "21CS003"]),
    ("G2", ["21CS101", "21CS102", "21CS103"]),
];
const SEED_DAYS: [u32; 4] = [3, 4, 10, 11];

/// Writes planned class totals and a small month of raw attendance.
/// Returns the number of raw records written.
pub async fn seed(store: &dyn DocumentStore, year: i32, month: u32) -> anyhow::Result<usize> {
    for (subject, lect, lab, tut) in SEED_SUBJECTS {
        store
            .put(
                SUBJECTS_COLLECTION,
                subject,
                json!({ "lectTotal": lect, "labTotal": lab, "tutTotal": tut }),
            )
            .await?;
    }

    let collection = raw_collection(year, month);
    let mut written = 0usize;
    for (day_index, day) in SEED_DAYS.into_iter().enumerate() {
        let date = NaiveDate::from_ymd_opt(year, month, day).context("invalid seed date")?;
        for (subject_index, (subject, _, labs, _)) in SEED_SUBJECTS.into_iter().enumerate() {
            let class_type = match (day_index + subject_index) % 3 {
                0 => ClassType::Lecture,
                1 if labs > 0 => ClassType::Lab,
                _ => ClassType::Tutorial,
            };
            for (group, rolls) in SEED_GROUPS {
                for (roll_index, roll) in rolls.into_iter().enumerate() {
                    // Every third student misses roughly a third of classes.
                    let present = (day_index + subject_index + roll_index) % 3 != 0 || roll_index != 2;
                    let id = format!("seed-{date}-{subject}-{roll}");
                    store
                        .put(
                            &collection,
                            &id,
                            json!({
                                "date": date.to_string(),
                                "deviceRoom": format!("R-{}", 100 + subject_index),
                                "group": group,
                                "subject": subject,
                                "rollNumber": roll,
                                "type": class_type.tag(),
                                "present": present,
                                "timestamp": format!("{date} 09:00:00"),
                                "isExtra": false,
                            }),
                        )
                        .await?;
                    written += 1;
                }
            }
        }
    }

    Ok(written)
}

#[derive(serde::Deserialize)]
struct CsvRow {
    date: NaiveDate,
    #[serde(default)]
    room: String,
    group: String,
    subject: String,
    roll_number: String,
    #[serde(rename = "type")]
    class_type: String,
    present: bool,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    is_extra: Option<bool>,
    #[serde(default)]
    source_key: Option<String>,
}

/// Imports raw attendance rows, routing each to its month's collection.
/// Returns rows written per collection.
pub async fn import_csv(
    store: &dyn DocumentStore,
    csv_path: &Path,
) -> anyhow::Result<BTreeMap<String, usize>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    import_csv_reader(store, file).await
}

pub async fn import_csv_reader<R: Read>(
    store: &dyn DocumentStore,
    source: R,
) -> anyhow::Result<BTreeMap<String, usize>> {
    let mut reader = csv::Reader::from_reader(source);
    let mut written: BTreeMap<String, usize> = BTreeMap::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", line + 1))?;
        let collection = raw_collection(row.date.year(), row.date.month());
        let id = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let timestamp = row
            .timestamp
            .unwrap_or_else(|| format!("{} 00:00:00", row.date));

        store
            .put(
                &collection,
                &id,
                json!({
                    "date": row.date.to_string(),
                    "deviceRoom": row.room,
                    "group": row.group,
                    "subject": row.subject,
                    "rollNumber": row.roll_number,
                    "type": ClassType::from_tag(&row.class_type).tag(),
                    "present": row.present,
                    "timestamp": timestamp,
                    "isExtra": row.is_extra.unwrap_or(false),
                }),
            )
            .await?;
        *written.entry(collection).or_default() += 1;
    }

    Ok(written)
}
