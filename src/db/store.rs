use std::str::FromStr;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::models::{ChangeEvent, NewTask, OldTask, Principal, Task, TaskId, TaskPatch};
use crate::remote::{AuthService, Notification, RecordStore, Scope, Subscription};

const CHANNEL_CAPACITY: usize = 256;
const MIN_PASSWORD_LEN: usize = 6;

/// SQLite-backed stand-in for the hosted platform: task table, password
/// accounts and change fan-out.
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
    events: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { db, events }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Single-connection in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn publish(&self, event: ChangeEvent) {
        let kind = event.kind();
        let id = event.id();
        // No receivers is fine: nobody is listening.
        if self.events.send(event).is_err() {
            debug!(kind, %id, "change event had no subscribers");
        }
    }

    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            "SELECT id, title, notes, user_id, completed, created_at FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
    }

    async fn find_scoped(&self, scope: &Scope, id: TaskId) -> Result<Task, AppError> {
        match self.find_task(id).await? {
            Some(task) if scope.admits(&task) => Ok(task),
            _ => Err(AppError::NotFound),
        }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn select_all(&self, scope: &Scope) -> Result<Vec<Task>, AppError> {
        let rows = match scope.owner_id() {
            Some(owner) => {
                sqlx::query_as::<_, Task>(
                    "SELECT id, title, notes, user_id, completed, created_at FROM tasks WHERE user_id = ? ORDER BY id DESC",
                )
                .bind(owner)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, Task>(
                    "SELECT id, title, notes, user_id, completed, created_at FROM tasks ORDER BY id DESC",
                )
                .fetch_all(&self.db)
                .await?
            }
        };
        Ok(rows)
    }

    async fn insert(&self, scope: &Scope, task: &NewTask) -> Result<Task, AppError> {
        let now = Utc::now().to_rfc3339();
        let owner = scope.owner_id().map(str::to_string);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tasks (title, notes, user_id, completed, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            RETURNING id
            "#,
        )
        .bind(&task.title)
        .bind(&task.notes)
        .bind(&owner)
        .bind(&now)
        .fetch_one(&self.db)
        .await?;

        let created = Task {
            id: TaskId(id),
            title: task.title.clone(),
            notes: task.notes.clone(),
            user_id: owner,
            completed: false,
            created_at: now,
        };
        self.publish(ChangeEvent::Insert { new: created.clone() });
        Ok(created)
    }

    async fn update(&self, scope: &Scope, id: TaskId, patch: &TaskPatch) -> Result<(), AppError> {
        let mut current = self.find_scoped(scope, id).await?;
        patch.apply_to(&mut current);

        sqlx::query(
            r#"
            UPDATE tasks
            SET title = ?1,
                notes = ?2,
                completed = ?3
            WHERE id = ?4
            "#,
        )
        .bind(&current.title)
        .bind(&current.notes)
        .bind(current.completed)
        .bind(id)
        .execute(&self.db)
        .await?;

        self.publish(ChangeEvent::Update { new: current });
        Ok(())
    }

    async fn delete(&self, scope: &Scope, id: TaskId) -> Result<(), AppError> {
        let current = self.find_scoped(scope, id).await?;

        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        self.publish(ChangeEvent::Delete {
            old: OldTask {
                id,
                user_id: current.user_id,
            },
        });
        Ok(())
    }

    async fn subscribe(&self, scope: &Scope) -> Result<Subscription, AppError> {
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let scope = scope.clone();

        let task = tokio::spawn(async move {
            loop {
                let notification = match events.recv().await {
                    Ok(event) if scope.admits_event(&event) => Notification::Change(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "change subscriber lagged, requesting resync");
                        Notification::Resync
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(notification).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

#[async_trait]
impl AuthService for SqliteStore {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AppError> {
        let email = email.trim().to_lowercase();
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, password_hash FROM accounts WHERE email = ?")
                .bind(&email)
                .fetch_optional(&self.db)
                .await?;

        let Some((id, hash)) = row else {
            return Err(AuthError::InvalidCredentials.into());
        };
        if !verify_password(password, &hash)? {
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(Principal::new(id, email))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AppError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AuthError::Rejected("email is required".to_string()).into());
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword.into());
        }

        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM accounts WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AuthError::AccountExists.into());
        }

        let id = Uuid::new_v4().to_string();
        let hash = hash_password(password)?;
        sqlx::query(
            "INSERT INTO accounts (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&id)
        .bind(&email)
        .bind(&hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(Principal::new(id, email))
    }

    async fn sign_out(&self, _principal: &Principal) -> Result<(), AppError> {
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!("password hashing failed: {}", e);
            AppError::InternalServerError
        })
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        tracing::error!("stored password hash is malformed: {}", e);
        AppError::InternalServerError
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
