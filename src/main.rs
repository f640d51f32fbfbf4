use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Datelike;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod cache;
mod clock;
mod config;
mod decode;
mod fanout;
mod ingest;
mod materialize;
mod models;
mod optimized;
mod raw;
mod report;
mod repository;
mod session;
mod store;

use cache::TtlCache;
use clock::{Clock, SystemClock};
use config::Settings;
use fanout::FanOut;
use optimized::{OptimizedQueryService, DEFAULT_PAGE_SIZE};
use raw::RawQueryService;
use repository::HybridRepository;
use session::DashboardSession;
use store::{DocumentStore, PgDocumentStore};

#[derive(Parser)]
#[command(name = "smart-attend")]
#[command(about = "Attendance dashboard over raw and pre-aggregated records", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct Period {
    #[arg(long)]
    year: Option<i32>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    month: Option<u32>,
}

impl Period {
    fn resolve(self, clock: &dyn Clock) -> (i32, u32) {
        let today = clock.today();
        (
            self.year.unwrap_or(today.year()),
            self.month.unwrap_or(today.month()),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo subjects and a month of raw attendance
    Seed {
        #[command(flatten)]
        period: Period,
    },
    /// Import raw attendance rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Rebuild the pre-aggregated collections for a month
    Aggregate {
        #[command(flatten)]
        period: Period,
    },
    /// List months of a year that have attendance
    Months {
        #[arg(long)]
        year: Option<i32>,
    },
    /// Print the dashboard overview
    Dashboard {
        #[command(flatten)]
        period: Period,
        #[arg(long)]
        group: Option<String>,
    },
    /// Print students enrolled in a subject
    Subject {
        #[arg(long)]
        subject: String,
        #[command(flatten)]
        period: Period,
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Roll number to continue after
        #[arg(long)]
        after: Option<String>,
    },
    /// Print one student's per-subject attendance
    Student {
        #[arg(long)]
        roll: String,
        #[command(flatten)]
        period: Period,
        /// Also list the raw attendance records
        #[arg(long)]
        records: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        period: Period,
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_repository(
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    settings: &Settings,
) -> (Arc<RawQueryService>, Arc<HybridRepository>) {
    let raw = Arc::new(
        RawQueryService::new(store.clone(), clock.clone())
            .with_field_scan_limit(settings.field_scan_limit),
    );
    let cache = TtlCache::new(clock, settings.cache_ttl(), settings.cache_capacity);
    let optimized = OptimizedQueryService::new(store, raw.clone(), cache)
        .with_stats_scan_limit(settings.stats_scan_limit);
    let repository = HybridRepository::new(
        raw.clone(),
        Arc::new(optimized),
        FanOut::new(settings.fanout_limit),
    );
    (raw, Arc::new(repository))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings;
    init_tracing(&settings);

    let database_url = settings
        .database_url
        .clone()
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    let pg = PgDocumentStore::connect(&database_url, settings.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    tracing::info!(backend = pg.backend_tag(), "document store connected");

    if let Commands::InitDb = cli.command {
        pg.init_db().await?;
        println!("Schema ready.");
        return Ok(());
    }

    let store: Arc<dyn DocumentStore> = Arc::new(pg);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (raw, repository) = build_repository(store.clone(), clock.clone(), &settings);

    match cli.command {
        Commands::InitDb => {}
        Commands::Seed { period } => {
            let (year, month) = period.resolve(clock.as_ref());
            let written = ingest::seed(store.as_ref(), year, month).await?;
            println!("Seed data inserted: {written} records for {year}-{month:02}.");
        }
        Commands::Import { csv } => {
            let written = ingest::import_csv(store.as_ref(), &csv).await?;
            let total: usize = written.values().sum();
            println!("Inserted {total} records from {}.", csv.display());
            for (collection, count) in &written {
                println!("- {collection}: {count}");
            }
        }
        Commands::Aggregate { period } => {
            let (year, month) = period.resolve(clock.as_ref());
            let summary = materialize::rebuild_month(store.as_ref(), &raw, year, month)
                .await
                .context("failed to rebuild pre-aggregated attendance")?;
            println!(
                "Aggregated {} records into {} subject slices and {} student documents.",
                summary.records, summary.subject_slices, summary.students
            );
        }
        Commands::Months { year } => {
            let year = year.unwrap_or(clock.today().year());
            let months = repository.available_months(year).await;
            let listed: Vec<String> = months.iter().map(|m| format!("{year}-{m:02}")).collect();
            println!("Available months: {}", listed.join(", "));
        }
        Commands::Dashboard { period, group } => {
            let (year, month) = period.resolve(clock.as_ref());
            let session = DashboardSession::new(repository.clone(), year, month);
            session.select(year, month, group).await;
            session.load().await;
            let state = session.state().await;

            if let Some(error) = state.error {
                anyhow::bail!("dashboard unavailable: {error}");
            }
            let Some(overview) = state.overview else {
                println!("No dashboard data for {year}-{month:02}.");
                return Ok(());
            };

            println!(
                "Dashboard {year}-{month:02} ({}, loaded in {:?})",
                if overview.is_optimized { "optimized" } else { "legacy" },
                overview.load_time
            );
            println!(
                "{} students, {} classes, {:.1}% overall ({})",
                overview.metadata.total_students,
                overview.metadata.total_classes,
                overview.metadata.overall_attendance_rate,
                aggregate::grade(overview.metadata.overall_attendance_rate).label()
            );
            println!("Subjects: {}", state.subjects.join(", "));
            println!("Groups: {}", state.groups.join(", "));
            for group in &overview.group_stats {
                println!(
                    "- {}: {:.1}% across {} classes",
                    group.group, group.average_attendance, group.total_classes
                );
            }
        }
        Commands::Subject {
            subject,
            period,
            group,
            page_size,
            after,
        } => {
            let (year, month) = period.resolve(clock.as_ref());
            let attendance = repository
                .subject_attendance(&subject, year, month, group.as_deref(), page_size, after.as_deref())
                .await?;

            if attendance.students.is_empty() {
                println!("No students found for {subject} in {year}-{month:02}.");
            }
            for student in &attendance.students {
                println!(
                    "- {} ({}) {:.1}% ({} of {})",
                    student.name,
                    student.roll_number,
                    student.stats.percentage,
                    student.stats.attended_classes,
                    student.stats.total_classes
                );
            }
            if let (true, Some(cursor)) = (attendance.has_more, attendance.next_cursor) {
                println!("More students: pass --after {cursor}");
            }
        }
        Commands::Student {
            roll,
            period,
            records,
        } => {
            let (year, month) = period.resolve(clock.as_ref());
            let detail = repository.student_detail(&roll, year, month).await?;

            if detail.is_empty() {
                println!("No attendance for {roll} in {year}-{month:02}.");
            }
            for (subject, stats) in &detail {
                println!(
                    "- {subject}: {:.1}% ({}), lect {}/{}, tut {}/{}, lab {}/{}",
                    stats.percentage,
                    aggregate::grade(stats.percentage).label(),
                    stats.lecture_stats.attended,
                    stats.lecture_stats.total,
                    stats.tutorial_stats.attended,
                    stats.tutorial_stats.total,
                    stats.lab_stats.attended,
                    stats.lab_stats.total
                );
            }

            if records {
                for record in raw.fetch_student_records(&roll, year, month).await {
                    println!(
                        "  {} {} {} in {}: {}{} at {}",
                        record.date,
                        record.subject,
                        record.class_type.tag(),
                        record.room,
                        if record.present { "present" } else { "absent" },
                        if record.is_extra { " (extra)" } else { "" },
                        record.timestamp
                    );
                }
            }
        }
        Commands::Report { period, group, out } => {
            let (year, month) = period.resolve(clock.as_ref());
            let overview = repository
                .dashboard_overview(year, month, group.as_deref())
                .await?;
            let (subjects, _) = repository.subjects_and_groups(year, month).await;
            let (subject_totals, attendance) = tokio::join!(
                repository.subject_totals(),
                repository.subject_attendance_many(&subjects, year, month, group.as_deref()),
            );

            let report = report::build_report(&report::ReportInput {
                year,
                month,
                group: group.as_deref(),
                overview: &overview,
                subject_totals: &subject_totals,
                attendance: &attendance,
            });
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
