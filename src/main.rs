use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod activity;
mod clock;
mod config;
mod db;
mod dedup;
mod detectors;
mod error;
#[cfg(test)]
mod memory;
mod models;
mod report;
mod scheduler;

use crate::activity::{resolve_range, Period};
use crate::clock::{Clock, SystemClock};
use crate::config::{AlertSettings, DEFAULT_UTC_OFFSET_MINUTES};
use crate::db::{Datastore, PgDatastore};
use crate::detectors::{AnomalyDetector, DeadlineNotifier, Detector, IdleDetector};
use crate::scheduler::AlertScheduler;

const INBOX_LIMIT: i64 = 200;

#[derive(Parser)]
#[command(name = "workforce-alerts")]
#[command(about = "Idle, deadline and performance alerts with productivity reporting", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    verbose: bool,

    /// Civil timezone, in minutes east of UTC, used for calendar dates
    #[arg(
        long,
        global = true,
        env = "WORKFORCE_UTC_OFFSET_MINUTES",
        default_value_t = DEFAULT_UTC_OFFSET_MINUTES,
        allow_negative_numbers = true
    )]
    utc_offset_minutes: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DetectorKind {
    Idle,
    Deadline,
    Anomaly,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Run every detector on its interval until Ctrl-C
    Run {
        #[command(flatten)]
        settings: AlertSettings,
    },
    /// Run a single detector pass now
    Check {
        #[arg(value_enum)]
        detector: DetectorKind,
        #[command(flatten)]
        settings: AlertSettings,
    },
    /// Per-day, per-user productivity rows
    Productivity {
        /// day, week, month or custom; anything else means the last seven days
        #[arg(long)]
        period: Option<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Write the rows as CSV instead of printing them
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Task and hour totals per department
    Department {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Rule-based coaching suggestions
    Suggestions {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long, default_value_t = report::DEFAULT_SUGGESTION_LIMIT)]
        limit: usize,
    },
    /// Generate a markdown productivity report
    Report {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Show a user's latest notifications
    Inbox {
        #[arg(long)]
        user: Uuid,
        #[arg(long, default_value_t = INBOX_LIMIT)]
        limit: i64,
    },
    /// Mark one of a user's notifications as read
    MarkRead {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        id: Uuid,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "workforce_alerts=debug,warn"
    } else {
        "workforce_alerts=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let tz = config::civil_timezone(cli.utc_offset_minutes)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(tz));

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store: Arc<dyn Datastore> = Arc::new(PgDatastore::new(pool.clone()));

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, clock.as_ref()).await?;
            println!("Seed data inserted.");
        }
        Commands::Run { settings } => {
            let config = settings.resolve()?;
            let handle = AlertScheduler::with_default_detectors(store, clock, &config).spawn();
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("shutdown requested");
            handle.shutdown().await;
        }
        Commands::Check { detector, settings } => {
            let config = settings.resolve()?;
            let detector: Box<dyn Detector> = match detector {
                DetectorKind::Idle => Box::new(IdleDetector::new(config.idle)),
                DetectorKind::Deadline => Box::new(DeadlineNotifier::new(config.deadline)),
                DetectorKind::Anomaly => Box::new(AnomalyDetector::new(config.anomaly)),
            };
            let report =
                scheduler::run_pass(store.as_ref(), clock.as_ref(), detector.as_ref()).await?;
            println!(
                "{} pass: examined {}, flagged {}, sent {} notifications ({} suppressed, {} skipped).",
                detector.name(),
                report.examined,
                report.flagged,
                report.notifications,
                report.suppressed,
                report.skipped
            );
        }
        Commands::Productivity {
            period,
            start,
            end,
            csv,
            json,
        } => {
            let range = resolve_range(Period::parse(period.as_deref()), start, end, clock.today())?;
            let mut session = store.open_session().await?;
            let rows = activity::productivity_rows(session.as_mut(), range, tz).await?;

            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report::write_productivity_csv(file, &rows)?;
                println!("Wrote {} rows for {range} to {}.", rows.len(), path.display());
            } else if json {
                let rounded: Vec<_> = rows.iter().map(report::rounded_row).collect();
                println!("{}", serde_json::to_string_pretty(&rounded)?);
            } else if rows.is_empty() {
                println!("No activity recorded for {range}.");
            } else {
                println!("Productivity for {range}:");
                for row in &rows {
                    println!(
                        "- {} {}: {}/{} tasks ({:.1}%), {:.2} hours",
                        row.date,
                        row.user_name.as_deref().unwrap_or("unknown user"),
                        row.tasks_completed,
                        row.tasks_assigned,
                        row.completion_rate,
                        row.work_hours
                    );
                }
            }
        }
        Commands::Department { start, end } => {
            let range = report::reporting_range(start, end, clock.today())?;
            let mut session = store.open_session().await?;
            let summaries = report::department_dashboard(session.as_mut(), range, tz).await?;

            println!("Department dashboard ({range}):");
            if summaries.is_empty() {
                println!("No users on record.");
            }
            for summary in &summaries {
                println!(
                    "- {}: {} members, {}/{} tasks completed ({:.1}%), {:.1} hours",
                    summary.department,
                    summary.members,
                    summary.tasks_completed,
                    summary.tasks_assigned,
                    summary.completion_rate,
                    summary.work_hours
                );
            }
        }
        Commands::Suggestions { start, end, limit } => {
            let range = report::reporting_range(start, end, clock.today())?;
            let mut session = store.open_session().await?;
            let suggestions = report::ai_suggestions(session.as_mut(), range, tz, limit).await?;

            if suggestions.is_empty() {
                println!("No suggestions for {range}.");
                return Ok(());
            }

            println!("Suggestions for {range}:");
            for suggestion in &suggestions {
                println!(
                    "- {} ({}): {} [{}]",
                    suggestion.user_name.as_deref().unwrap_or("unknown user"),
                    suggestion.user_id,
                    suggestion.suggestion,
                    suggestion.reason
                );
            }
        }
        Commands::Report { start, end, out } => {
            let range = report::reporting_range(start, end, clock.today())?;
            let mut session = store.open_session().await?;
            let departments = report::department_dashboard(session.as_mut(), range, tz).await?;
            let rows = activity::productivity_rows(session.as_mut(), range, tz).await?;
            let suggestions =
                report::suggestions_from_rows(&rows, report::DEFAULT_SUGGESTION_LIMIT);

            let markdown = report::build_report(range, &departments, &suggestions, &rows);
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Inbox { user, limit } => {
            let mut session = store.open_session().await?;
            let notifications = session.notifications_for(user, limit).await?;
            let unread = session.unread_count(user).await?;

            println!("{unread} unread of {} shown.", notifications.len());
            for notification in &notifications {
                let marker = if notification.is_read { " " } else { "*" };
                println!(
                    "{marker} {} [{}] {}: {}",
                    notification.created_at.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
                    notification.id,
                    notification.title,
                    notification.message
                );
            }
        }
        Commands::MarkRead { user, id } => {
            let mut session = store.open_session().await?;
            if session.mark_read(user, id).await? {
                println!("Notification {id} marked as read.");
            } else {
                anyhow::bail!("notification {id} not found for user {user}");
            }
        }
    }

    Ok(())
}
