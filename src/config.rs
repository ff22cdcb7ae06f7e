use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;
use crate::remote::PlatformConfig;
use crate::services::{SessionConfig, SyncMode};

#[derive(Clone, Debug)]
pub enum Backend {
    /// Local SQLite stand-in for the hosted platform.
    Sqlite { database_url: String },
    /// The hosted platform's REST API.
    Rest(PlatformConfig),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: Backend,
    pub session: SessionConfig,
    pub bind: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let backend = match env::var("TASKS_BACKEND").as_deref().unwrap_or("sqlite") {
            "sqlite" => Backend::Sqlite {
                database_url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://taskline.db?mode=rwc".to_string()),
            },
            "rest" => Backend::Rest(PlatformConfig::new_from_env()?),
            other => {
                return Err(AppError::BadRequest(format!(
                    "TASKS_BACKEND must be 'sqlite' or 'rest', got '{}'",
                    other
                )));
            }
        };

        let owner_scoped = parse_bool("TASKS_OWNER_SCOPED", true)?;

        let sync_mode = match env::var("TASKS_SYNC_MODE").as_deref().unwrap_or("realtime") {
            "realtime" => SyncMode::Realtime,
            "refetch" => SyncMode::Refetch,
            other => {
                return Err(AppError::BadRequest(format!(
                    "TASKS_SYNC_MODE must be 'realtime' or 'refetch', got '{}'",
                    other
                )));
            }
        };

        let bind = env::var("TASKS_BIND").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind = bind
            .parse()
            .map_err(|_| AppError::BadRequest(format!("TASKS_BIND is not an address: {}", bind)))?;

        Ok(Self {
            backend,
            session: SessionConfig {
                owner_scoped,
                sync_mode,
                resubscribe_delay: Duration::from_secs(5),
            },
            bind,
        })
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, AppError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(AppError::BadRequest(format!("{} must be a boolean, got '{}'", key, raw))),
        },
    }
}
