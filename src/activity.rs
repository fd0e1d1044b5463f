//! Activity aggregation shared by the detectors and the reporting engine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, Utc};
use uuid::Uuid;

use crate::clock::start_of_day;
use crate::db::{Session, UserFilter};
use crate::error::ReportError;
use crate::models::{ActivitySources, Attendance, ProductivityRow, Task, User};

/// Instant range starting at `start`; `end` is excluded unless `closed_end` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub closed_end: bool,
}

impl TimeWindow {
    /// `[start, end)`
    pub fn half_open(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            closed_end: false,
        }
    }

    /// `[start, end]`
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            closed_end: true,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && (instant < self.end || (self.closed_end && instant == self.end))
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ReportError> {
        if start > end {
            return Err(ReportError::InvalidInput(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn trailing_days(today: NaiveDate, days: i64) -> Self {
        Self {
            start: today - Duration::days(days.max(1) - 1),
            end: today,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every instant whose civil date falls in the range.
    pub fn to_window(self, tz: FixedOffset) -> TimeWindow {
        TimeWindow::half_open(
            start_of_day(self.start, tz),
            start_of_day(self.end, tz) + Duration::days(1),
        )
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
    Custom,
    /// Anything unrecognised: the seven days ending today.
    Trailing,
}

impl Period {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("day") => Period::Day,
            Some("week") => Period::Week,
            Some("month") => Period::Month,
            Some("custom") => Period::Custom,
            _ => Period::Trailing,
        }
    }
}

pub fn resolve_range(
    period: Period,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<DateRange, ReportError> {
    match period {
        Period::Day => Ok(DateRange {
            start: today,
            end: today,
        }),
        Period::Week => {
            let monday =
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            Ok(DateRange {
                start: monday,
                end: monday + Duration::days(6),
            })
        }
        Period::Month => {
            let first = today - Duration::days(i64::from(today.day0()));
            let last = first
                .checked_add_months(Months::new(1))
                .and_then(|next| next.pred_opt())
                .ok_or_else(|| {
                    ReportError::InvalidInput(format!("month of {today} is out of range"))
                })?;
            Ok(DateRange { start: first, end: last })
        }
        Period::Custom => match (start, end) {
            (Some(start), Some(end)) => DateRange::new(start, end),
            _ => Err(ReportError::InvalidInput(
                "custom period requires both a start and an end date".to_string(),
            )),
        },
        Period::Trailing => Ok(DateRange::trailing_days(today, 7)),
    }
}

/// Latest of tracking, task creation and attendance punches; `None` when nothing is known.
pub fn last_activity(sources: &ActivitySources) -> Option<DateTime<Utc>> {
    let punch = sources.latest_attendance.and_then(|record| {
        record
            .punch_in
            .map(|punch_in| record.punch_out.unwrap_or(punch_in))
    });

    [
        sources.latest_tracking_update,
        sources.latest_task_created,
        punch,
    ]
    .into_iter()
    .flatten()
    .max()
}

pub fn completion_rate(assigned: i64, completed: i64) -> f64 {
    if assigned > 0 {
        completed as f64 / assigned as f64 * 100.0
    } else {
        0.0
    }
}

#[derive(Default)]
struct RowAccumulator {
    task_ids: Vec<Uuid>,
    completed: i64,
    work_hours: f64,
}

/// Per-(date, user) productivity rows, ordered by date then user id.
///
/// Tasks are bucketed by the civil date of their creation and attributed to their
/// assignee; unassigned tasks are ignored. Attendance contributes work hours. A
/// user present in only one source still gets a row with the other side zeroed.
pub fn aggregate_productivity(
    range: DateRange,
    tz: FixedOffset,
    tasks: &[Task],
    attendance: &[Attendance],
    users: &[User],
) -> Vec<ProductivityRow> {
    let names: HashMap<Uuid, &str> = users.iter().map(|u| (u.id, u.name.as_str())).collect();
    let window = range.to_window(tz);
    let mut rows: BTreeMap<(NaiveDate, Uuid), RowAccumulator> = BTreeMap::new();

    for task in tasks.iter().filter(|t| window.contains(t.created_at)) {
        let Some(assignee) = task.assigned_to else {
            continue;
        };
        let date = task.created_at.with_timezone(&tz).date_naive();
        let entry = rows.entry((date, assignee)).or_default();
        if !entry.task_ids.contains(&task.id) {
            entry.task_ids.push(task.id);
            if task.is_completed() {
                entry.completed += 1;
            }
        }
    }

    for record in attendance.iter().filter(|a| range.contains(a.date)) {
        rows.entry((record.date, record.user_id)).or_default().work_hours += record.work_hours;
    }

    rows.into_iter()
        .map(|((date, user_id), acc)| {
            let assigned = acc.task_ids.len() as i64;
            ProductivityRow {
                date,
                user_id,
                user_name: names.get(&user_id).map(|name| name.to_string()),
                tasks_assigned: assigned,
                tasks_completed: acc.completed,
                completion_rate: completion_rate(assigned, acc.completed),
                work_hours: acc.work_hours,
            }
        })
        .collect()
}

/// Loads tasks, attendance and users for `range` and aggregates them.
pub async fn productivity_rows(
    session: &mut dyn Session,
    range: DateRange,
    tz: FixedOffset,
) -> Result<Vec<ProductivityRow>, ReportError> {
    let tasks = session.tasks_created_within(range.to_window(tz)).await?;
    let attendance = session.attendance_between(range.start, range.end).await?;
    let users = session.list_users(UserFilter::all()).await?;
    Ok(aggregate_productivity(range, tz, &tasks, &attendance, &users))
}
