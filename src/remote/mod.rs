pub mod dto;
pub mod http;
pub mod poller;

use std::env;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::AppError;
use crate::models::{ChangeEvent, NewTask, Principal, Task, TaskId, TaskPatch};

pub use http::RestPlatformClient;
pub use poller::ChangePoller;

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub project_url: String,
    pub anon_key: String,
    pub table: String,
    pub poll_interval_secs: u64,
    /// Upper bound on a whole request, body included.
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl PlatformConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let project_url = env::var("TASKS_PROJECT_URL")
            .map_err(|_| AppError::BadRequest("TASKS_PROJECT_URL is not set".to_string()))?;
        let anon_key = env::var("TASKS_ANON_KEY")
            .map_err(|_| AppError::BadRequest("TASKS_ANON_KEY is not set".to_string()))?;
        let table = env::var("TASKS_TABLE").unwrap_or_else(|_| "tasks".to_string());

        Ok(Self {
            project_url: project_url.trim_end_matches('/').to_string(),
            anon_key,
            table,
            poll_interval_secs: secs_from_env("TASKS_POLL_INTERVAL_SECS", 5)?,
            request_timeout_secs: secs_from_env("TASKS_HTTP_TIMEOUT_SECS", 10)?,
            connect_timeout_secs: secs_from_env("TASKS_HTTP_CONNECT_TIMEOUT_SECS", 5)?,
        })
    }
}

fn secs_from_env(key: &str, default: u64) -> Result<u64, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::BadRequest(format!("{} is not a number: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Which rows a call may see or touch.
#[derive(Clone, Debug, PartialEq)]
pub enum Scope {
    All,
    Owner(Principal),
}

impl Scope {
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Owner(p) => Some(p.id.as_str()),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Owner(p) => p.access_token.as_deref(),
        }
    }

    pub fn admits(&self, task: &Task) -> bool {
        match self.owner_id() {
            None => true,
            Some(owner) => task.user_id.as_deref() == Some(owner),
        }
    }

    pub fn admits_event(&self, event: &ChangeEvent) -> bool {
        match self.owner_id() {
            None => true,
            Some(owner) => event.owner() == Some(owner),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Change(ChangeEvent),
    /// The subscriber missed events and must reload.
    Resync,
}

/// A live change channel. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Notification>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// `None` once the channel has ended.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        debug!("unsubscribing change channel");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select_all(&self, scope: &Scope) -> Result<Vec<Task>, AppError>;
    async fn insert(&self, scope: &Scope, task: &NewTask) -> Result<Task, AppError>;
    async fn update(&self, scope: &Scope, id: TaskId, patch: &TaskPatch) -> Result<(), AppError>;
    async fn delete(&self, scope: &Scope, id: TaskId) -> Result<(), AppError>;
    async fn subscribe(&self, scope: &Scope) -> Result<Subscription, AppError>;
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AppError>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AppError>;
    async fn sign_out(&self, principal: &Principal) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OldTask;

    fn owned(id: i64, owner: Option<&str>) -> Task {
        Task {
            id: TaskId(id),
            title: "t".to_string(),
            notes: None,
            user_id: owner.map(str::to_string),
            completed: false,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_scope_admits_only_owner_rows() {
        let scope = Scope::Owner(Principal::new("u1", "a@example.com"));
        assert!(scope.admits(&owned(1, Some("u1"))));
        assert!(!scope.admits(&owned(2, Some("u2"))));
        assert!(!scope.admits(&owned(3, None)));
        assert!(Scope::All.admits(&owned(3, None)));
    }

    #[test]
    fn test_scope_filters_delete_events_by_owner() {
        let scope = Scope::Owner(Principal::new("u1", "a@example.com"));
        let mine = ChangeEvent::Delete { old: OldTask { id: TaskId(1), user_id: Some("u1".into()) } };
        let theirs = ChangeEvent::Delete { old: OldTask { id: TaskId(1), user_id: Some("u2".into()) } };
        assert!(scope.admits_event(&mine));
        assert!(!scope.admits_event(&theirs));
    }
}
