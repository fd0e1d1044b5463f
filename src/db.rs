use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::activity::TimeWindow;
use crate::clock::Clock;
use crate::dedup::NotificationQuery;
use crate::error::StoreError;
use crate::models::{
    ActivitySources, Attendance, NewNotification, Notification, PunchRecord, Role, Task, Tracking,
    User,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub active_only: bool,
    pub role: Option<Role>,
}

impl UserFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            active_only: true,
            role: None,
        }
    }

    pub fn with_role(role: Role) -> Self {
        Self {
            active_only: false,
            role: Some(role),
        }
    }

    /// Value bound against `lower(btrim(role))`.
    pub fn role_key(&self) -> Option<String> {
        self.role.as_ref().map(|role| role.as_str().trim().to_lowercase())
    }

    pub fn matches(&self, user: &User) -> bool {
        (!self.active_only || user.is_active)
            && self.role.as_ref().map_or(true, |role| *role == user.role)
    }
}

/// Hands out one session per unit of work.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn Session>, StoreError>;
}

/// A unit of work against the store. Resources are released when it is dropped.
#[async_trait]
pub trait Session: Send {
    async fn list_users(&mut self, filter: UserFilter) -> Result<Vec<User>, StoreError>;

    async fn activity_sources(&mut self, user_id: Uuid) -> Result<ActivitySources, StoreError>;

    /// Tasks not marked completed whose due date lies in `(after, until]`.
    async fn tasks_due_between(
        &mut self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError>;

    async fn count_completed_tasks(
        &mut self,
        assignee: Uuid,
        window: TimeWindow,
    ) -> Result<i64, StoreError>;

    async fn tasks_created_within(&mut self, window: TimeWindow) -> Result<Vec<Task>, StoreError>;

    async fn attendance_between(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Attendance>, StoreError>;

    async fn latest_notification(
        &mut self,
        query: &NotificationQuery,
    ) -> Result<Option<Notification>, StoreError>;

    async fn insert_notification(
        &mut self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError>;

    async fn notifications_for(
        &mut self,
        recipient: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn unread_count(&mut self, recipient: Uuid) -> Result<i64, StoreError>;

    /// Returns false when no such notification belongs to `recipient`.
    async fn mark_read(&mut self, recipient: Uuid, id: Uuid) -> Result<bool, StoreError>;
}

pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn open_session(&self) -> Result<Box<dyn Session>, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }
}

/// Holds one pooled connection; it goes back to the pool on drop.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

// Roles are compared trimmed and lowercased, the same way `Role::parse` reads them.
const LIST_USERS: &str = r#"
    SELECT id, name, role, department, is_active
    FROM workforce.users
    WHERE ($1 = FALSE OR is_active)
      AND ($2::TEXT IS NULL OR lower(btrim(role)) = $2)
    ORDER BY id
"#;

const TASK_COLUMNS: &str =
    "id, title, created_by, assigned_to, created_at, due_date, status, progress";
const NOTIFICATION_COLUMNS: &str = "id, user_id, task_id, title, message, is_read, created_at";

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        role: Role::parse(&role),
        department: row.try_get("department")?,
        is_active: row.try_get("is_active")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<Task, sqlx::Error> {
    Ok(Task {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_by: row.try_get("created_by")?,
        assigned_to: row.try_get("assigned_to")?,
        created_at: row.try_get("created_at")?,
        due_date: row.try_get("due_date")?,
        status: row.try_get("status")?,
        progress: row.try_get("progress")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, sqlx::Error> {
    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        task_id: row.try_get("task_id")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Session for PgSession {
    async fn list_users(&mut self, filter: UserFilter) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(LIST_USERS)
            .bind(filter.active_only)
            .bind(filter.role_key())
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows.iter().map(user_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn activity_sources(&mut self, user_id: Uuid) -> Result<ActivitySources, StoreError> {
        let latest_tracking_update: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT max(tr.updated_at)
            FROM workforce.trackings tr
            JOIN workforce.tasks t ON t.id = tr.task_id
            WHERE t.assigned_to = $1 OR t.created_by = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *self.conn)
        .await?;

        let latest_task_created: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT max(created_at) FROM workforce.tasks WHERE assigned_to = $1 OR created_by = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.conn)
        .await?;

        let latest_attendance = sqlx::query(
            r#"
            SELECT punch_in, punch_out
            FROM workforce.attendance
            WHERE user_id = $1
            ORDER BY date DESC, punch_in DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.conn)
        .await?
        .map(|row| -> Result<PunchRecord, sqlx::Error> {
            Ok(PunchRecord {
                punch_in: row.try_get("punch_in")?,
                punch_out: row.try_get("punch_out")?,
            })
        })
        .transpose()?;

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
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM workforce.tasks \
             WHERE due_date IS NOT NULL AND due_date > $1 AND due_date <= $2 \
             AND status NOT ILIKE '%completed%' \
             ORDER BY due_date, id"
        ))
        .bind(after)
        .bind(until)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.iter().map(task_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn count_completed_tasks(
        &mut self,
        assignee: Uuid,
        window: TimeWindow,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*)
            FROM workforce.tasks
            WHERE assigned_to = $1
              AND status ILIKE '%completed%'
              AND created_at >= $2
              AND (created_at < $3 OR ($4 AND created_at = $3))
            "#,
        )
        .bind(assignee)
        .bind(window.start)
        .bind(window.end)
        .bind(window.closed_end)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(count)
    }

    async fn tasks_created_within(&mut self, window: TimeWindow) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM workforce.tasks \
             WHERE created_at >= $1 AND (created_at < $2 OR ($3 AND created_at = $2)) \
             ORDER BY created_at, id"
        ))
        .bind(window.start)
        .bind(window.end)
        .bind(window.closed_end)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.iter().map(task_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn attendance_between(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Attendance>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, date, punch_in, punch_out, work_hours
            FROM workforce.attendance
            WHERE date >= $1 AND date <= $2
            ORDER BY date, user_id
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Attendance {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                date: row.try_get("date")?,
                punch_in: row.try_get("punch_in")?,
                punch_out: row.try_get("punch_out")?,
                work_hours: row.try_get("work_hours")?,
            });
        }
        Ok(records)
    }

    async fn latest_notification(
        &mut self,
        query: &NotificationQuery,
    ) -> Result<Option<Notification>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM workforce.notifications \
             WHERE ($1::UUID IS NULL OR user_id = $1) \
             AND ($2::UUID IS NULL OR task_id = $2) \
             AND title ILIKE $3 \
             ORDER BY created_at DESC \
             LIMIT 1"
        ))
        .bind(query.recipient)
        .bind(query.task_id)
        .bind(&query.title_pattern)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.as_ref().map(notification_from_row).transpose()?)
    }

    async fn insert_notification(
        &mut self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO workforce.notifications \
             (id, user_id, task_id, title, message, is_read, created_at) \
             VALUES ($1, $2, $3, $4, $5, FALSE, $6) \
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(notification.user_id)
        .bind(notification.task_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.created_at)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(notification_from_row(&row)?)
    }

    async fn notifications_for(
        &mut self,
        recipient: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM workforce.notifications \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(recipient)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.iter().map(notification_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn unread_count(&mut self, recipient: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM workforce.notifications WHERE user_id = $1 AND NOT is_read",
        )
        .bind(recipient)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(count)
    }

    async fn mark_read(&mut self, recipient: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE workforce.notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(recipient)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads a small team with a mix of busy, idle and slipping employees.
pub async fn seed(pool: &PgPool, clock: &dyn Clock) -> anyhow::Result<()> {
    let now = clock.now();
    let today = clock.today();
    let admin = Uuid::parse_str("6a1f3c2e-8d4b-4c59-9e21-0f6b7d3a1c01")?;
    let manager = Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?;
    let avery = Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?;
    let jules = Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?;
    let kiara = Uuid::parse_str("9b8e7c41-5d2a-4f6e-a3b0-71c4e2d9f815")?;

    let users = vec![
        (admin, "Rowan Hale", "rowan.hale@example.com", "admin", "Operations"),
        (manager, "Priya Nair", "priya.nair@example.com", "manager", "Engineering"),
        (avery, "Avery Lee", "avery.lee@example.com", "employee", "Engineering"),
        (jules, "Jules Moreno", "jules.moreno@example.com", "employee", "Engineering"),
        (kiara, "Kiara Patel", "kiara.patel@example.com", "employee", "Design"),
    ];

    for (id, name, email, role, department) in users {
        sqlx::query(
            r#"
            INSERT INTO workforce.users (id, name, email, role, department, is_active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (email) DO UPDATE
            SET name = EXCLUDED.name, role = EXCLUDED.role, department = EXCLUDED.department
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(role)
        .bind(department)
        .execute(pool)
        .await?;
    }

    // Jules completed plenty last week and little this week.
    let mut tasks = Vec::new();
    for day in 8..=12 {
        for slot in 0..2 {
            tasks.push((
                format!("Backlog ticket {day}-{slot}"),
                jules,
                now - Duration::days(day) + Duration::hours(slot),
                None,
                "Completed",
            ));
        }
    }
    tasks.push(("Release notes".to_string(), jules, now - Duration::days(2), None, "Completed"));
    tasks.push((
        "Incident review".to_string(),
        avery,
        now - Duration::hours(5),
        Some(now + Duration::minutes(45)),
        "In Progress",
    ));
    tasks.push((
        "Onboarding flow mockups".to_string(),
        kiara,
        now - Duration::days(1),
        Some(now + Duration::hours(3)),
        "Pending",
    ));

    let mut task_ids = Vec::with_capacity(tasks.len());
    for (index, (title, assignee, created_at, due_date, status)) in tasks.into_iter().enumerate() {
        let id = Uuid::from_u128(0x5eed_0000_0000_0000_0000_0000_0000_0000 + index as u128);
        task_ids.push(id);
        sqlx::query(
            r#"
            INSERT INTO workforce.tasks
            (id, title, created_by, assigned_to, created_at, due_date, status, progress)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&title)
        .bind(manager)
        .bind(assignee)
        .bind(created_at)
        .bind(due_date)
        .bind(status)
        .bind(if status == "Completed" { 100.0 } else { 40.0 })
        .execute(pool)
        .await?;
    }

    let attendance = vec![
        (avery, today, Some(now - Duration::hours(4)), None, 0.0),
        (
            jules,
            today - Duration::days(1),
            Some(now - Duration::hours(30)),
            Some(now - Duration::hours(22)),
            8.0,
        ),
        (
            kiara,
            today - Duration::days(1),
            Some(now - Duration::hours(29)),
            Some(now - Duration::hours(26)),
            3.0,
        ),
    ];

    for (index, (user_id, date, punch_in, punch_out, hours)) in attendance.into_iter().enumerate() {
        let id = Uuid::from_u128(0xa77e_0000_0000_0000_0000_0000_0000_0000 + index as u128);
        sqlx::query(
            r#"
            INSERT INTO workforce.attendance (id, user_id, date, punch_in, punch_out, work_hours)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(date)
        .bind(punch_in)
        .bind(punch_out)
        .bind(hours)
        .execute(pool)
        .await
        .context("failed to insert attendance")?;
    }

    // Progress updates on the open tasks.
    let trackings = task_ids
        .iter()
        .rev()
        .take(2)
        .enumerate()
        .map(|(index, task_id)| Tracking {
            id: Uuid::from_u128(0x7ac0_0000_0000_0000_0000_0000_0000_0000 + index as u128),
            task_id: Some(*task_id),
            project_id: None,
            status: "In Progress".to_string(),
            updated_at: now - Duration::minutes(20 + 90 * index as i64),
        });

    for tracking in trackings {
        sqlx::query(
            r#"
            INSERT INTO workforce.trackings (id, task_id, project_id, status, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(tracking.id)
        .bind(tracking.task_id)
        .bind(tracking.project_id)
        .bind(&tracking.status)
        .bind(tracking.updated_at)
        .execute(pool)
        .await?;
    }

    Ok(())
}
