use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;

use crate::activity::last_activity;
use crate::config::IdleConfig;
use crate::db::{Session, UserFilter};
use crate::dedup::{is_suppressed, AlertClass, NotificationQuery};
use crate::error::StoreError;
use crate::models::Role;

use super::{notify, Detector, PassContext, PassReport};

/// Flags monitored users whose last known activity is older than the threshold.
pub struct IdleDetector {
    config: IdleConfig,
}

impl IdleDetector {
    pub fn new(config: IdleConfig) -> Self {
        Self { config }
    }
}

/// Unknown activity is always idle.
pub fn is_idle(last: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: ChronoDuration) -> bool {
    last.map_or(true, |last| {
        now.checked_sub_signed(threshold)
            .is_some_and(|cutoff| last < cutoff)
    })
}

#[async_trait]
impl Detector for IdleDetector {
    fn name(&self) -> &'static str {
        AlertClass::Idle.name()
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
        let threshold_minutes = self.config.threshold.num_minutes();
        let users = session.list_users(UserFilter::active()).await?;
        let managers = session.list_users(UserFilter::with_role(Role::Manager)).await?;

        for user in users.iter().filter(|u| u.role.is_monitored_subject()) {
            report.examined += 1;
            let sources = session.activity_sources(user.id).await?;
            let last = last_activity(&sources);
            if !is_idle(last, ctx.now, self.config.threshold) {
                continue;
            }
            report.flagged += 1;

            let previous = session
                .latest_notification(&NotificationQuery::idle(user.id))
                .await?;
            if is_suppressed(previous.as_ref(), ctx.now, self.config.suppression) {
                debug!(user_id = %user.id, "idle alert suppressed");
                report.suppressed += 1;
                continue;
            }

            let message = match last {
                Some(last) => format!(
                    "No activity detected since {}. You've been idle for over {threshold_minutes} minutes.",
                    ctx.local(last)
                ),
                None => format!(
                    "No recorded activity found. Please update task progress / punch-in. \
                     Idle threshold: {threshold_minutes} minutes."
                ),
            };
            notify(
                session,
                &mut report,
                ctx,
                user.id,
                None,
                "Idle-time alert".to_string(),
                message,
            )
            .await?;

            let last_label = last.map_or_else(|| "No record".to_string(), |l| ctx.local(l));
            for manager in managers.iter().filter(|m| m.role.is_escalation_target()) {
                notify(
                    session,
                    &mut report,
                    ctx,
                    manager.id,
                    None,
                    format!("Employee idle: {}", user.name),
                    format!(
                        "Employee {} (id: {}) appears idle. Last activity: {last_label}.",
                        user.name, user.id
                    ),
                )
                .await?;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;
    use crate::db::Datastore;
    use crate::detectors::fixtures::{base_time, ctx_at, task, user};
    use crate::memory::MemoryDatastore;
    use crate::models::{Attendance, PunchRecord, Tracking};
    use uuid::Uuid;

    fn detector() -> IdleDetector {
        IdleDetector::new(AlertConfig::default().idle)
    }

    async fn pass(store: &MemoryDatastore, now: DateTime<Utc>) -> PassReport {
        let mut session = store.open_session().await.unwrap();
        detector().run_pass(session.as_mut(), ctx_at(now)).await.unwrap()
    }

    #[test]
    fn idle_check_treats_unknown_as_idle() {
        let now = base_time();
        let threshold = ChronoDuration::minutes(30);
        assert!(is_idle(None, now, threshold));
        assert!(is_idle(Some(now - ChronoDuration::minutes(31)), now, threshold));
        assert!(!is_idle(Some(now - ChronoDuration::minutes(30)), now, threshold));
        assert!(!is_idle(Some(now - ChronoDuration::minutes(5)), now, threshold));
    }

    #[tokio::test]
    async fn user_without_records_is_flagged_and_managers_escalated() {
        let store = MemoryDatastore::new();
        let employee = user("Avery Lee", Role::Employee);
        let manager = user("Priya Nair", Role::Manager);
        let admin = user("Rowan Hale", Role::Admin);
        store.add_user(employee.clone());
        store.add_user(manager.clone());
        store.add_user(admin.clone());

        let report = pass(&store, base_time()).await;
        assert_eq!(report.examined, 1);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.notifications, 2);

        let own = store.notifications_to(employee.id);
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].title, "Idle-time alert");
        assert!(own[0].message.starts_with("No recorded activity found"));

        let escalated = store.notifications_to(manager.id);
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].title, "Employee idle: Avery Lee");
        assert!(escalated[0].message.contains("No record"));
        assert!(store.notifications_to(admin.id).is_empty());
    }

    #[tokio::test]
    async fn recent_activity_is_not_idle() {
        let store = MemoryDatastore::new();
        let employee = user("Avery Lee", Role::Employee);
        store.add_user(employee.clone());
        let work = task("Incident review", Some(employee.id), base_time() - ChronoDuration::hours(6));
        store.add_tracking(Tracking {
            id: Uuid::new_v4(),
            task_id: Some(work.id),
            project_id: None,
            status: "In Progress".to_string(),
            updated_at: base_time() - ChronoDuration::minutes(10),
        });
        store.add_task(work);

        let report = pass(&store, base_time()).await;
        assert_eq!(report.flagged, 0);
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn open_punch_in_is_last_activity() {
        let store = MemoryDatastore::new();
        let employee = user("Jules Moreno", Role::Employee);
        store.add_user(employee.clone());
        let punch_in = base_time() - ChronoDuration::hours(2);
        store.add_attendance(Attendance {
            id: Uuid::new_v4(),
            user_id: employee.id,
            date: punch_in.date_naive(),
            punch_in: Some(punch_in),
            punch_out: None,
            work_hours: 0.0,
        });

        let mut session = store.open_session().await.unwrap();
        let sources = session.activity_sources(employee.id).await.unwrap();
        assert_eq!(
            sources.latest_attendance,
            Some(PunchRecord { punch_in: Some(punch_in), punch_out: None })
        );
        drop(session);

        pass(&store, base_time()).await;
        let own = store.notifications_to(employee.id);
        assert_eq!(own.len(), 1);
        assert!(own[0].message.contains("2026-03-10T09:30:00+05:30"));
    }

    #[tokio::test]
    async fn realert_waits_for_full_threshold() {
        let store = MemoryDatastore::new();
        let employee = user("Kiara Patel", Role::Employee);
        store.add_user(employee.clone());
        let start = base_time();

        pass(&store, start).await;
        let second = pass(&store, start + ChronoDuration::minutes(29)).await;
        assert_eq!(second.suppressed, 1);
        assert_eq!(store.notifications_to(employee.id).len(), 1);

        let third = pass(&store, start + ChronoDuration::minutes(30)).await;
        assert_eq!(third.suppressed, 0);
        assert_eq!(store.notifications_to(employee.id).len(), 2);
    }

    #[tokio::test]
    async fn failed_write_abandons_pass_and_keeps_earlier_writes() {
        let store = MemoryDatastore::new();
        let manager = user("Priya Nair", Role::Manager);
        store.add_user(user("Avery Lee", Role::Employee));
        store.add_user(user("Kiara Patel", Role::Employee));
        store.add_user(manager.clone());
        store.fail_inserts_after(1);

        let mut session = store.open_session().await.unwrap();
        let result = detector().run_pass(session.as_mut(), ctx_at(base_time())).await;
        drop(session);
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        // The first user's own alert stays; the escalation that failed is not retried.
        let written = store.notifications();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].title, "Idle-time alert");

        store.allow_inserts();
        let next = pass(&store, base_time() + ChronoDuration::minutes(1)).await;
        assert_eq!(next.suppressed, 1);
        assert_eq!(next.notifications, 2);
        assert_eq!(store.notifications().len(), 3);
        assert_eq!(store.notifications_to(manager.id).len(), 1);
        assert_eq!(store.sessions_open_now(), 0);
    }

    #[tokio::test]
    async fn inactive_users_are_ignored() {
        let store = MemoryDatastore::new();
        let mut former = user("Former Staff", Role::Employee);
        former.is_active = false;
        store.add_user(former);

        let report = pass(&store, base_time()).await;
        assert_eq!(report.examined, 0);
        assert!(store.notifications().is_empty());
    }
}
