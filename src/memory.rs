//! In-process datastore used by the test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::activity::TimeWindow;
use crate::db::{Datastore, Session, UserFilter};
use crate::dedup::NotificationQuery;
use crate::error::StoreError;
use crate::models::{
    ActivitySources, Attendance, NewNotification, Notification, PunchRecord, Task, Tracking, User,
};

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    tasks: Vec<Task>,
    attendance: Vec<Attendance>,
    trackings: Vec<Tracking>,
    notifications: Vec<Notification>,
}

const UNLIMITED: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct MemoryDatastore {
    tables: Arc<Mutex<Tables>>,
    failing_sessions: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    open_now: Arc<AtomicUsize>,
    insert_budget: Arc<AtomicUsize>,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            failing_sessions: Arc::default(),
            opened: Arc::default(),
            open_now: Arc::default(),
            insert_budget: Arc::new(AtomicUsize::new(UNLIMITED)),
        }
    }
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory store poisoned")
    }

    pub fn add_user(&self, user: User) {
        self.tables().users.push(user);
    }

    pub fn add_task(&self, task: Task) {
        self.tables().tasks.push(task);
    }

    pub fn add_attendance(&self, record: Attendance) {
        self.tables().attendance.push(record);
    }

    pub fn add_tracking(&self, tracking: Tracking) {
        self.tables().trackings.push(tracking);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.tables().notifications.clone()
    }

    pub fn notifications_to(&self, recipient: Uuid) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.user_id == Some(recipient))
            .collect()
    }

    /// The next `count` calls to `open_session` fail.
    pub fn fail_next_sessions(&self, count: usize) {
        self.failing_sessions.store(count, Ordering::SeqCst);
    }

    /// Notification inserts fail once `count` more have succeeded, across all sessions.
    pub fn fail_inserts_after(&self, count: usize) {
        self.insert_budget.store(count, Ordering::SeqCst);
    }

    pub fn allow_inserts(&self) {
        self.insert_budget.store(UNLIMITED, Ordering::SeqCst);
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn open_session(&self) -> Result<Box<dyn Session>, StoreError> {
        let failing = self.failing_sessions.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_sessions.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected session failure".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_now.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            tables: Arc::clone(&self.tables),
            open_now: Arc::clone(&self.open_now),
            insert_budget: Arc::clone(&self.insert_budget),
        }))
    }
}

pub struct MemorySession {
    tables: Arc<Mutex<Tables>>,
    open_now: Arc<AtomicUsize>,
    insert_budget: Arc<AtomicUsize>,
}

impl MemorySession {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

fn touches(task: &Task, user_id: Uuid) -> bool {
    task.assigned_to == Some(user_id) || task.created_by == Some(user_id)
}

#[async_trait]
impl Session for MemorySession {
    async fn list_users(&mut self, filter: UserFilter) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .tables()?
            .users
            .iter()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn activity_sources(&mut self, user_id: Uuid) -> Result<ActivitySources, StoreError> {
        let tables = self.tables()?;
        let own_tasks: Vec<&Task> = tables.tasks.iter().filter(|t| touches(t, user_id)).collect();

        let latest_tracking_update = tables
            .trackings
            .iter()
            .filter(|tr| {
                tr.task_id
                    .is_some_and(|task_id| own_tasks.iter().any(|t| t.id == task_id))
            })
            .map(|tr| tr.updated_at)
            .max();
        let latest_task_created = own_tasks.iter().map(|t| t.created_at).max();
        let latest_attendance = tables
            .attendance
            .iter()
            .filter(|a| a.user_id == user_id)
            .max_by_key(|a| (a.date, a.punch_in.is_some(), a.punch_in))
            .map(|a| PunchRecord {
                punch_in: a.punch_in,
                punch_out: a.punch_out,
            });

        Ok(ActivitySources {
            latest_tracking_update,
            latest_task_created,
            latest_attendance,
        })
    }

    async fn tasks_due_between(
        &mut self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tables()?
            .tasks
            .iter()
            .filter(|t| t.due_date.is_some_and(|due| after < due && due <= until))
            .filter(|t| !t.mentions_completed())
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.due_date, t.id));
        Ok(tasks)
    }

    async fn count_completed_tasks(
        &mut self,
        assignee: Uuid,
        window: TimeWindow,
    ) -> Result<i64, StoreError> {
        let count = self
            .tables()?
            .tasks
            .iter()
            .filter(|t| t.assigned_to == Some(assignee))
            .filter(|t| t.mentions_completed() && window.contains(t.created_at))
            .count();
        Ok(count as i64)
    }

    async fn tasks_created_within(&mut self, window: TimeWindow) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tables()?
            .tasks
            .iter()
            .filter(|t| window.contains(t.created_at))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn attendance_between(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Attendance>, StoreError> {
        let mut records: Vec<Attendance> = self
            .tables()?
            .attendance
            .iter()
            .filter(|a| start <= a.date && a.date <= end)
            .cloned()
            .collect();
        records.sort_by_key(|a| (a.date, a.user_id));
        Ok(records)
    }

    async fn latest_notification(
        &mut self,
        query: &NotificationQuery,
    ) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .tables()?
            .notifications
            .iter()
            .filter(|n| query.matches(n))
            .max_by_key(|n| n.created_at)
            .cloned())
    }

    async fn insert_notification(
        &mut self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let budget = self.insert_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }
        if budget != UNLIMITED {
            self.insert_budget.store(budget - 1, Ordering::SeqCst);
        }

        let stored = Notification {
            id: Uuid::new_v4(),
            user_id: Some(notification.user_id),
            task_id: notification.task_id,
            title: notification.title,
            message: notification.message,
            is_read: false,
            created_at: notification.created_at,
        };
        self.tables()?.notifications.push(stored.clone());
        Ok(stored)
    }

    async fn notifications_for(
        &mut self,
        recipient: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut found: Vec<Notification> = self
            .tables()?
            .notifications
            .iter()
            .filter(|n| n.user_id == Some(recipient))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(found)
    }

    async fn unread_count(&mut self, recipient: Uuid) -> Result<i64, StoreError> {
        let count = self
            .tables()?
            .notifications
            .iter()
            .filter(|n| n.user_id == Some(recipient) && !n.is_read)
            .count();
        Ok(count as i64)
    }

    async fn mark_read(&mut self, recipient: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        match tables
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == Some(recipient))
        {
            Some(notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn inbox_lists_newest_first_and_marks_read() {
        let store = MemoryDatastore::new();
        let recipient = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();

        let mut session = store.open_session().await.unwrap();
        for minutes in [0, 10, 5] {
            session
                .insert_notification(NewNotification {
                    user_id: recipient,
                    task_id: None,
                    title: format!("Alert {minutes}"),
                    message: String::new(),
                    created_at: base + Duration::minutes(minutes),
                })
                .await
                .unwrap();
        }

        let inbox = session.notifications_for(recipient, 2).await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].title, "Alert 10");
        assert_eq!(inbox[1].title, "Alert 5");

        assert_eq!(session.unread_count(recipient).await.unwrap(), 3);
        assert!(session.mark_read(recipient, inbox[0].id).await.unwrap());
        assert!(!session.mark_read(Uuid::new_v4(), inbox[1].id).await.unwrap());
        assert_eq!(session.unread_count(recipient).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sessions_are_released_on_drop() {
        let store = MemoryDatastore::new();
        {
            let _session = store.open_session().await.unwrap();
            assert_eq!(store.sessions_open_now(), 1);
        }
        assert_eq!(store.sessions_open_now(), 0);
        assert_eq!(store.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn insert_budget_spans_sessions() {
        let store = MemoryDatastore::new();
        store.fail_inserts_after(1);
        let note = || NewNotification {
            user_id: Uuid::new_v4(),
            task_id: None,
            title: "Idle-time alert".to_string(),
            message: String::new(),
            created_at: Utc::now(),
        };

        let mut first = store.open_session().await.unwrap();
        assert!(first.insert_notification(note()).await.is_ok());
        drop(first);
        let mut second = store.open_session().await.unwrap();
        assert!(second.insert_notification(note()).await.is_err());

        store.allow_inserts();
        assert!(second.insert_notification(note()).await.is_ok());
        assert_eq!(store.notifications().len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryDatastore::new();
        store.fail_next_sessions(1);
        assert!(store.open_session().await.is_err());
        assert!(store.open_session().await.is_ok());
    }
}
