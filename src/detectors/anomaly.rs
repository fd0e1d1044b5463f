use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::activity::TimeWindow;
use crate::config::AnomalyConfig;
use crate::db::{Session, UserFilter};
use crate::dedup::{is_suppressed, AlertClass, NotificationQuery};
use crate::error::StoreError;
use crate::models::Role;

use super::{notify, Detector, PassContext, PassReport};

/// The two equal halves of the lookback period. `previous` is half-open and ends
/// where `recent` starts; `recent` includes `now` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonWindows {
    pub previous: TimeWindow,
    pub recent: TimeWindow,
}

impl ComparisonWindows {
    pub fn ending_at(now: DateTime<Utc>, lookback: chrono::Duration) -> Self {
        let half = lookback / 2;
        let split = now.checked_sub_signed(half).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let start = split.checked_sub_signed(half).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            previous: TimeWindow::half_open(start, split),
            recent: TimeWindow::closed(split, now),
        }
    }
}

/// Percentage fall from `previous` to `recent`; `None` without a baseline.
pub fn completion_drop(previous: i64, recent: i64) -> Option<f64> {
    if previous <= 0 {
        return None;
    }
    Some((1.0 - recent as f64 / previous as f64) * 100.0)
}

/// Warns managers when a user's completed-task count collapses between two windows.
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Detector for AnomalyDetector {
    fn name(&self) -> &'static str {
        AlertClass::Anomaly.name()
    }

    fn interval(&self) -> Duration {
        self.config.interval
    }

    async fn run_pass(
        &self,
        session: &mut dyn Session,
        ctx: PassContext,
    ) -> Result<PassReport, StoreError> {
        let mut report = PassReport::default();
        let windows = ComparisonWindows::ending_at(ctx.now, self.config.lookback);
        let lookback_days = self.config.lookback.num_days();
        let users = session.list_users(UserFilter::active()).await?;
        let managers = session.list_users(UserFilter::with_role(Role::Manager)).await?;

        for user in users.iter().filter(|u| u.role.is_monitored_subject()) {
            report.examined += 1;
            let recent = session.count_completed_tasks(user.id, windows.recent).await?;
            let previous = session
                .count_completed_tasks(user.id, windows.previous)
                .await?;

            let Some(drop_pct) = completion_drop(previous, recent) else {
                report.skipped += 1;
                continue;
            };
            if drop_pct < self.config.drop_percent {
                continue;
            }
            report.flagged += 1;

            for manager in managers.iter().filter(|m| m.role.is_escalation_target()) {
                let earlier = session
                    .latest_notification(&NotificationQuery::anomaly(manager.id, user.id))
                    .await?;
                if is_suppressed(earlier.as_ref(), ctx.now, self.config.suppression) {
                    debug!(user_id = %user.id, manager_id = %manager.id, "anomaly alert suppressed");
                    report.suppressed += 1;
                    continue;
                }

                notify(
                    session,
                    &mut report,
                    ctx,
                    manager.id,
                    None,
                    format!("Performance anomaly: user {} (id:{})", user.name, user.id),
                    format!(
                        "Completed tasks dropped from {previous} to {recent} (~{drop_pct:.1}% drop) \
                         in the last {lookback_days} days."
                    ),
                )
                .await?;
            }
        }

        Ok(report)
    }
}
