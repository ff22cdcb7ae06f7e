use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};

use crate::error::{AppError, AuthError};
use crate::models::{NewTask, Principal, Task, TaskId, TaskPatch};
use crate::remote::{dto, AuthService, ChangePoller, PlatformConfig, RecordStore, Scope, Subscription};

/// Client for the hosted platform's REST table API and password auth.
#[derive(Clone)]
pub struct RestPlatformClient {
    client: Client,
    config: PlatformConfig,
}

impl RestPlatformClient {
    pub fn new(config: PlatformConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::BadRequest(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.project_url, self.config.table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.project_url, path)
    }

    fn authorized(&self, builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let bearer = token.unwrap_or(self.config.anon_key.as_str());
        builder
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn check(response: Response, action: &str) -> Result<Response, AppError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound);
        }
        Err(AppError::Remote(format!("Failed to {}: {} {}", action, status, body)))
    }

    async fn auth_failure(response: Response) -> AppError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        AppError::Auth(classify_auth_error(status, &body))
    }

    fn principal_from(response: dto::SessionResponse, email: &str) -> Result<Principal, AppError> {
        let id = response
            .user_id()
            .ok_or_else(|| AppError::Remote("auth response carried no user".to_string()))?
            .to_string();
        let email = response.user_email().unwrap_or(email).to_string();

        Ok(Principal {
            id,
            email,
            access_token: response.access_token,
        })
    }
}

#[async_trait]
impl RecordStore for RestPlatformClient {
    async fn select_all(&self, scope: &Scope) -> Result<Vec<Task>, AppError> {
        let mut url = format!("{}?select=*&order=id.desc", self.table_url());
        if let Some(owner) = scope.owner_id() {
            url.push_str(&format!("&user_id=eq.{}", owner));
        }

        let response = self
            .authorized(self.client.get(&url), scope.access_token())
            .send()
            .await?;
        let response = Self::check(response, "fetch tasks").await?;

        let body_text = response.text().await.unwrap_or_default();
        serde_json::from_str::<Vec<Task>>(&body_text).map_err(|e| {
            tracing::error!("Failed to parse: {}", e);
            AppError::Remote(format!("Failed to parse task rows: {}", e))
        })
    }

    async fn insert(&self, scope: &Scope, task: &NewTask) -> Result<Task, AppError> {
        let row = dto::InsertTaskRow {
            title: &task.title,
            notes: task.notes.as_deref(),
            user_id: scope.owner_id(),
        };

        let response = self
            .authorized(self.client.post(self.table_url()), scope.access_token())
            .header("Prefer", "return=representation")
            .json(&[row])
            .send()
            .await?;
        let response = Self::check(response, "insert task").await?;

        let mut rows: Vec<Task> = response
            .json()
            .await
            .map_err(|e| AppError::Remote(format!("Failed to parse inserted row: {}", e)))?;
        if rows.is_empty() {
            return Err(AppError::Remote("insert returned no row".to_string()));
        }
        Ok(rows.remove(0))
    }

    async fn update(&self, scope: &Scope, id: TaskId, patch: &TaskPatch) -> Result<(), AppError> {
        let url = format!("{}?id=eq.{}", self.table_url(), id);

        let response = self
            .authorized(self.client.patch(&url), scope.access_token())
            .json(&dto::UpdateTaskRow::from(patch))
            .send()
            .await?;
        Self::check(response, "update task").await?;
        Ok(())
    }

    async fn delete(&self, scope: &Scope, id: TaskId) -> Result<(), AppError> {
        let url = format!("{}?id=eq.{}", self.table_url(), id);

        let response = self
            .authorized(self.client.delete(&url), scope.access_token())
            .send()
            .await?;
        Self::check(response, "delete task").await?;
        Ok(())
    }

    async fn subscribe(&self, scope: &Scope) -> Result<Subscription, AppError> {
        let poller = ChangePoller::new(
            Arc::new(self.clone()),
            scope.clone(),
            Duration::from_secs(self.config.poll_interval_secs.max(1)),
        );
        poller.spawn().await
    }
}

#[async_trait]
impl AuthService for RestPlatformClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AppError> {
        let response = self
            .authorized(self.client.post(self.auth_url("token?grant_type=password")), None)
            .json(&dto::PasswordGrantRequest { email, password })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::auth_failure(response).await);
        }
        let session: dto::SessionResponse = response.json().await?;
        Self::principal_from(session, email)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AppError> {
        let response = self
            .authorized(self.client.post(self.auth_url("signup")), None)
            .json(&dto::PasswordGrantRequest { email, password })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::auth_failure(response).await);
        }
        let session: dto::SessionResponse = response.json().await?;
        Self::principal_from(session, email)
    }

    async fn sign_out(&self, principal: &Principal) -> Result<(), AppError> {
        let Some(token) = principal.access_token.as_deref() else {
            return Ok(());
        };

        let response = self
            .authorized(self.client.post(self.auth_url("logout")), Some(token))
            .send()
            .await?;
        Self::check(response, "sign out").await?;
        Ok(())
    }
}

fn classify_auth_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    let parsed: dto::AuthErrorBody = serde_json::from_str(body).unwrap_or_default();
    match parsed.code() {
        "invalid_credentials" | "invalid_grant" => AuthError::InvalidCredentials,
        "user_already_exists" | "email_exists" => AuthError::AccountExists,
        "weak_password" => AuthError::WeakPassword,
        _ => AuthError::Rejected(format!("{} {}", status, parsed.message())),
    }
}
