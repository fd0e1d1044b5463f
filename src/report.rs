use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::io;

use chrono::{Duration, FixedOffset, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::activity::{completion_rate, productivity_rows, DateRange};
use crate::db::{Session, UserFilter};
use crate::error::ReportError;
use crate::models::{
    Attendance, DepartmentSummary, MemberStats, ProductivityRow, Suggestion, SuggestionKind, Task,
    User,
};

pub const DEFAULT_REPORT_DAYS: i64 = 30;
pub const DEFAULT_SUGGESTION_LIMIT: usize = 10;
const UNKNOWN_DEPARTMENT: &str = "Unknown";

/// Explicit range when both bounds are given, otherwise the 30 days up to `today`.
pub fn reporting_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<DateRange, ReportError> {
    match (start, end) {
        (Some(start), Some(end)) => DateRange::new(start, end),
        _ => DateRange::new(today - Duration::days(DEFAULT_REPORT_DAYS), today),
    }
}

/// One entry per user, with tasks created in the range and attendance hours in it.
pub fn member_stats(
    range: DateRange,
    tz: FixedOffset,
    users: &[User],
    tasks: &[Task],
    attendance: &[Attendance],
) -> Vec<MemberStats> {
    let window = range.to_window(tz);
    let mut counts: HashMap<Uuid, (i64, i64)> = HashMap::new();
    for task in tasks.iter().filter(|t| window.contains(t.created_at)) {
        if let Some(assignee) = task.assigned_to {
            let entry = counts.entry(assignee).or_default();
            entry.0 += 1;
            if task.mentions_completed() {
                entry.1 += 1;
            }
        }
    }

    let mut hours: HashMap<Uuid, f64> = HashMap::new();
    for record in attendance.iter().filter(|a| range.contains(a.date)) {
        *hours.entry(record.user_id).or_default() += record.work_hours;
    }

    users
        .iter()
        .map(|user| {
            let (tasks_assigned, tasks_completed) = counts.get(&user.id).copied().unwrap_or((0, 0));
            MemberStats {
                department: user
                    .department
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_DEPARTMENT.to_string()),
                user_id: user.id,
                user_name: user.name.clone(),
                tasks_assigned,
                tasks_completed,
                work_hours: hours.get(&user.id).copied().unwrap_or(0.0),
            }
        })
        .collect()
}

/// Sums member stats per department, ordered by department name.
pub fn summarize_departments(members: &[MemberStats]) -> Vec<DepartmentSummary> {
    let mut grouped: BTreeMap<&str, DepartmentSummary> = BTreeMap::new();

    for member in members {
        let entry = grouped
            .entry(member.department.as_str())
            .or_insert_with(|| DepartmentSummary {
                department: member.department.clone(),
                members: 0,
                tasks_assigned: 0,
                tasks_completed: 0,
                work_hours: 0.0,
                completion_rate: 0.0,
            });
        entry.members += 1;
        entry.tasks_assigned += member.tasks_assigned;
        entry.tasks_completed += member.tasks_completed;
        entry.work_hours += member.work_hours;
    }

    grouped
        .into_values()
        .map(|mut summary| {
            summary.completion_rate =
                completion_rate(summary.tasks_assigned, summary.tasks_completed);
            summary
        })
        .collect()
}

pub async fn department_dashboard(
    session: &mut dyn Session,
    range: DateRange,
    tz: FixedOffset,
) -> Result<Vec<DepartmentSummary>, ReportError> {
    let users = session.list_users(UserFilter::all()).await?;
    let tasks = session.tasks_created_within(range.to_window(tz)).await?;
    let attendance = session.attendance_between(range.start, range.end).await?;
    let members = member_stats(range, tz, &users, &tasks, &attendance);
    Ok(summarize_departments(&members))
}

/// Coaching rule for one user's totals; rules are checked in priority order.
pub fn suggest_for(
    tasks_assigned: i64,
    completion_rate: f64,
    work_hours: f64,
) -> Option<(SuggestionKind, String, String)> {
    if tasks_assigned == 0 {
        return None;
    }
    if completion_rate < 40.0 && work_hours > 20.0 {
        Some((
            SuggestionKind::TimeManagement,
            "Time-management training and a review of task blockers".to_string(),
            format!("Low completion {completion_rate:.1}% despite high hours ({work_hours:.1}h)"),
        ))
    } else if completion_rate < 40.0 && work_hours < 10.0 {
        Some((
            SuggestionKind::WorkloadReview,
            "Check workload or capability; assign a mentor".to_string(),
            format!("Low completion {completion_rate:.1}% and low hours ({work_hours:.1}h)"),
        ))
    } else if completion_rate > 80.0 && work_hours > 30.0 {
        Some((
            SuggestionKind::HighPerformer,
            "High performer: consider rewards or a knowledge-sharing session".to_string(),
            format!("High completion {completion_rate:.1}% and high hours ({work_hours:.1}h)"),
        ))
    } else {
        None
    }
}

#[derive(Default)]
struct UserTotals {
    user_name: Option<String>,
    tasks_assigned: i64,
    tasks_completed: i64,
    work_hours: f64,
}

/// Rolls productivity rows up per user and applies [`suggest_for`], in user id order.
pub fn suggestions_from_rows(rows: &[ProductivityRow], limit: usize) -> Vec<Suggestion> {
    let mut totals: BTreeMap<Uuid, UserTotals> = BTreeMap::new();
    for row in rows {
        let entry = totals.entry(row.user_id).or_default();
        if entry.user_name.is_none() {
            entry.user_name = row.user_name.clone();
        }
        entry.tasks_assigned += row.tasks_assigned;
        entry.tasks_completed += row.tasks_completed;
        entry.work_hours += row.work_hours;
    }

    totals
        .into_iter()
        .filter_map(|(user_id, t)| {
            let rate = completion_rate(t.tasks_assigned, t.tasks_completed);
            suggest_for(t.tasks_assigned, rate, t.work_hours).map(|(kind, suggestion, reason)| {
                Suggestion {
                    user_id,
                    user_name: t.user_name,
                    kind,
                    suggestion,
                    reason,
                }
            })
        })
        .take(limit)
        .collect()
}

pub async fn ai_suggestions(
    session: &mut dyn Session,
    range: DateRange,
    tz: FixedOffset,
    limit: usize,
) -> Result<Vec<Suggestion>, ReportError> {
    let rows = productivity_rows(session, range, tz).await?;
    Ok(suggestions_from_rows(&rows, limit))
}

#[derive(Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "User ID")]
    user_id: Uuid,
    #[serde(rename = "User Name")]
    user_name: &'a str,
    #[serde(rename = "Tasks Assigned")]
    tasks_assigned: i64,
    #[serde(rename = "Tasks Completed")]
    tasks_completed: i64,
    #[serde(rename = "Completion %")]
    completion_rate: f64,
    #[serde(rename = "Work Hours")]
    work_hours: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Copy of `row` with rate and hours rounded to two decimals for display.
pub fn rounded_row(row: &ProductivityRow) -> ProductivityRow {
    ProductivityRow {
        completion_rate: round2(row.completion_rate),
        work_hours: round2(row.work_hours),
        ..row.clone()
    }
}

pub fn write_productivity_csv<W: io::Write>(
    writer: W,
    rows: &[ProductivityRow],
) -> anyhow::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for row in rows {
        out.serialize(ExportRow {
            date: row.date,
            user_id: row.user_id,
            user_name: row.user_name.as_deref().unwrap_or(""),
            tasks_assigned: row.tasks_assigned,
            tasks_completed: row.tasks_completed,
            completion_rate: round2(row.completion_rate),
            work_hours: round2(row.work_hours),
        })?;
    }
    out.flush()?;
    Ok(())
}

pub fn build_report(
    range: DateRange,
    departments: &[DepartmentSummary],
    suggestions: &[Suggestion],
    rows: &[ProductivityRow],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Workforce Productivity Report");
    let _ = writeln!(output, "Covering {range}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Departments");

    if departments.is_empty() {
        let _ = writeln!(output, "No users on record.");
    } else {
        for summary in departments {
            let _ = writeln!(
                output,
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

    let _ = writeln!(output);
    let _ = writeln!(output, "## Coaching Suggestions");

    if suggestions.is_empty() {
        let _ = writeln!(output, "No suggestions for this window.");
    } else {
        for suggestion in suggestions {
            let _ = writeln!(
                output,
                "- {}: {} ({})",
                suggestion.user_name.as_deref().unwrap_or("unknown user"),
                suggestion.suggestion,
                suggestion.reason
            );
        }
    }

    let mut recent = rows.to_vec();
    recent.sort_by(|a, b| b.date.cmp(&a.date).then(a.user_id.cmp(&b.user_id)));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Daily Activity");

    if recent.is_empty() {
        let _ = writeln!(output, "No activity recorded for this window.");
    } else {
        for row in recent.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} {}: {}/{} tasks ({:.1}%), {:.1} hours",
                row.date,
                row.user_name.as_deref().unwrap_or("unknown user"),
                row.tasks_completed,
                row.tasks_assigned,
                row.completion_rate,
                row.work_hours
            );
        }
    }

    output
}
