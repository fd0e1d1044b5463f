//! Duplicate-alert suppression.
//!
//! Detectors look up the most recent notification of their alert class with a
//! case-insensitive LIKE pattern on the title, then refuse to write another one
//! while it is younger than the detector's suppression window.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::Notification;

/// Alert classes produced by the detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertClass {
    Idle,
    DueSoon,
    Anomaly,
}

impl AlertClass {
    pub fn name(self) -> &'static str {
        match self {
            AlertClass::Idle => "idle",
            AlertClass::DueSoon => "deadline",
            AlertClass::Anomaly => "anomaly",
        }
    }
}

/// Which notifications count as an earlier copy of an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQuery {
    pub recipient: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub title_pattern: String,
}

impl NotificationQuery {
    /// Idle alerts addressed to the subject themselves.
    pub fn idle(subject: Uuid) -> Self {
        Self {
            recipient: Some(subject),
            task_id: None,
            title_pattern: "%idle%".to_string(),
        }
    }

    /// Any due-soon alert about the task, whoever received it.
    pub fn due_soon(task_id: Uuid) -> Self {
        Self {
            recipient: None,
            task_id: Some(task_id),
            title_pattern: "%due%".to_string(),
        }
    }

    /// Anomaly alerts about `subject` sent to `manager`.
    pub fn anomaly(manager: Uuid, subject: Uuid) -> Self {
        Self {
            recipient: Some(manager),
            task_id: None,
            title_pattern: format!("%anomaly%{subject}%"),
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        if self.recipient.is_some() && notification.user_id != self.recipient {
            return false;
        }
        if self.task_id.is_some() && notification.task_id != self.task_id {
            return false;
        }
        ilike(&self.title_pattern, &notification.title)
    }
}

/// True while `previous` is younger than `window` at `now`.
pub fn is_suppressed(
    previous: Option<&Notification>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    previous.is_some_and(|notification| now - notification.created_at < window)
}

/// Case-insensitive SQL LIKE: `%` matches any run, `_` any single character.
pub fn ilike(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '_' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}
