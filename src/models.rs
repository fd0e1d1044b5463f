use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Role of a user. Stored as free text; anything outside the known set is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Manager,
    Employee,
    Other(String),
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "employee" => Role::Employee,
            _ => Role::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Employee => "employee",
            Role::Other(value) => value,
        }
    }

    /// Managers receive escalated alerts about other users.
    pub fn is_escalation_target(&self) -> bool {
        matches!(self, Role::Manager)
    }

    /// Everyone except admins and managers is watched by the detectors.
    pub fn is_monitored_subject(&self) -> bool {
        !matches!(self, Role::Admin | Role::Manager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub department: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub created_by: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: String,
    pub progress: f64,
}

impl Task {
    /// Exact, case-insensitive match used by the productivity aggregate.
    pub fn is_completed(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("completed")
    }

    /// Substring match used by the detectors and the department dashboard.
    pub fn mentions_completed(&self) -> bool {
        self.status.to_ascii_lowercase().contains("completed")
    }
}

#[derive(Debug, Clone)]
pub struct Attendance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub punch_in: Option<DateTime<Utc>>,
    pub punch_out: Option<DateTime<Utc>>,
    pub work_hours: f64,
}

#[derive(Debug, Clone)]
pub struct Tracking {
    pub id: Uuid,
    pub task_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Punch times of the most recent attendance record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PunchRecord {
    pub punch_in: Option<DateTime<Utc>>,
    pub punch_out: Option<DateTime<Utc>>,
}

/// Raw signals the idle detector folds into a single last-activity timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivitySources {
    pub latest_tracking_update: Option<DateTime<Utc>>,
    pub latest_task_created: Option<DateTime<Utc>>,
    pub latest_attendance: Option<PunchRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductivityRow {
    pub date: NaiveDate,
    pub user_id: Uuid,
    pub user_name: Option<String>,
    pub tasks_assigned: i64,
    pub tasks_completed: i64,
    pub completion_rate: f64,
    pub work_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberStats {
    pub department: String,
    pub user_id: Uuid,
    pub user_name: String,
    pub tasks_assigned: i64,
    pub tasks_completed: i64,
    pub work_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentSummary {
    pub department: String,
    pub members: usize,
    pub tasks_assigned: i64,
    pub tasks_completed: i64,
    pub work_hours: f64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    TimeManagement,
    WorkloadReview,
    HighPerformer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub user_id: Uuid,
    pub user_name: Option<String>,
    pub kind: SuggestionKind,
    pub suggestion: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_status(status: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "Quarterly audit".to_string(),
            created_by: None,
            assigned_to: None,
            created_at: Utc::now(),
            due_date: None,
            status: status.to_string(),
            progress: 0.0,
        }
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(Role::parse("Manager"), Role::Manager);
        assert_eq!(Role::parse(" ADMIN "), Role::Admin);
        assert_eq!(Role::parse("employee"), Role::Employee);
        assert_eq!(Role::parse("Contractor"), Role::Other("Contractor".to_string()));
    }

    #[test]
    fn role_capabilities_split_subjects_from_recipients() {
        assert!(Role::Manager.is_escalation_target());
        assert!(!Role::Manager.is_monitored_subject());
        assert!(!Role::Admin.is_monitored_subject());
        assert!(!Role::Admin.is_escalation_target());
        assert!(Role::Employee.is_monitored_subject());
        assert!(Role::Other("intern".to_string()).is_monitored_subject());
    }

    #[test]
    fn completion_checks_differ_between_exact_and_substring() {
        assert!(task_with_status("Completed").is_completed());
        assert!(task_with_status("COMPLETED").mentions_completed());
        assert!(!task_with_status("Not completed yet").is_completed());
        assert!(task_with_status("Not completed yet").mentions_completed());
        assert!(!task_with_status("In Progress").mentions_completed());
    }
}
