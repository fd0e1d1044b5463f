use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DeadlineConfig;
use crate::db::{Session, UserFilter};
use crate::dedup::{is_suppressed, AlertClass, NotificationQuery};
use crate::error::StoreError;
use crate::models::Role;

use super::{notify, Detector, PassContext, PassReport};

/// Reminds assignees, creators and managers about tasks coming due.
pub struct DeadlineNotifier {
    config: DeadlineConfig,
}

impl DeadlineNotifier {
    pub fn new(config: DeadlineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Detector for DeadlineNotifier {
    fn name(&self) -> &'static str {
        AlertClass::DueSoon.name()
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
        let until = ctx
            .now
            .checked_add_signed(self.config.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let tasks = session.tasks_due_between(ctx.now, until).await?;
        if tasks.is_empty() {
            return Ok(report);
        }
        let managers = session.list_users(UserFilter::with_role(Role::Manager)).await?;

        for task in &tasks {
            report.examined += 1;
            let Some(due) = task.due_date else {
                continue;
            };
            report.flagged += 1;

            let previous = session
                .latest_notification(&NotificationQuery::due_soon(task.id))
                .await?;
            if is_suppressed(previous.as_ref(), ctx.now, self.config.suppression) {
                debug!(task_id = %task.id, "deadline alert suppressed");
                report.suppressed += 1;
                continue;
            }

            let due_label = ctx.local(due);
            if let Some(assignee) = task.assigned_to {
                notify(
                    session,
                    &mut report,
                    ctx,
                    assignee,
                    Some(task.id),
                    "Task due soon".to_string(),
                    format!(
                        "Task '{}' is due at {due_label}. Please complete or request extension.",
                        task.title
                    ),
                )
                .await?;
            }

            if let Some(creator) = task.created_by {
                notify(
                    session,
                    &mut report,
                    ctx,
                    creator,
                    Some(task.id),
                    "Task due soon (created)".to_string(),
                    format!("Task '{}' you created is due at {due_label}.", task.title),
                )
                .await?;
            }

            let assignee_label = task
                .assigned_to
                .map_or_else(|| "nobody".to_string(), |id| id.to_string());
            for manager in managers.iter().filter(|m| m.role.is_escalation_target()) {
                notify(
                    session,
                    &mut report,
                    ctx,
                    manager.id,
                    Some(task.id),
                    format!("Task due soon: {}", task.title),
                    format!(
                        "Task '{}' assigned to {assignee_label} is due at {due_label}.",
                        task.title
                    ),
                )
                .await?;
            }
        }

        Ok(report)
    }
}
