//! Periodic alert detectors.
//!
//! A detector owns its thresholds and performs one pass against a session handed
//! to it by the scheduler. Passes return a [`PassReport`]; anything that cannot be
//! computed (no baseline, nothing due) is counted there rather than raised.

pub mod anomaly;
pub mod deadline;
pub mod idle;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::Session;
use crate::error::StoreError;
use crate::models::NewNotification;

pub use anomaly::AnomalyDetector;
pub use deadline::DeadlineNotifier;
pub use idle::IdleDetector;

/// Time as seen by a single pass.
#[derive(Debug, Clone, Copy)]
pub struct PassContext {
    pub now: DateTime<Utc>,
    pub tz: FixedOffset,
}

impl PassContext {
    pub fn from_clock(clock: &dyn Clock) -> Self {
        Self {
            now: clock.now(),
            tz: clock.timezone(),
        }
    }

    /// RFC 3339 rendering in the civil timezone, used in alert messages.
    pub fn local(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.tz).to_rfc3339()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Subjects (users or tasks) looked at.
    pub examined: usize,
    /// Subjects that met the alert condition.
    pub flagged: usize,
    pub notifications: usize,
    pub suppressed: usize,
    /// Subjects with nothing to compare against.
    pub skipped: usize,
}

#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn run_pass(
        &self,
        session: &mut dyn Session,
        ctx: PassContext,
    ) -> Result<PassReport, StoreError>;
}

async fn notify(
    session: &mut dyn Session,
    report: &mut PassReport,
    ctx: PassContext,
    recipient: Uuid,
    task_id: Option<Uuid>,
    title: String,
    message: String,
) -> Result<(), StoreError> {
    session
        .insert_notification(NewNotification {
            user_id: recipient,
            task_id,
            title,
            message,
            created_at: ctx.now,
        })
        .await?;
    report.notifications += 1;
    Ok(())
}
