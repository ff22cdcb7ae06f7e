use axum::Json;
use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::routing::{patch, post};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::*;
use crate::services::TaskView;
use crate::state::AppState;

#[derive(Deserialize)]
struct ViewSettings {
    filter_text: Option<String>,
    hide_completed: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/reload", post(reload_tasks))
        .route("/tasks/{id}", patch(update_task).delete(delete_task))
        .route("/tasks/{id}/toggle", post(toggle_task))
        .route("/tasks/{id}/edit", post(begin_edit).delete(cancel_edit))
        .route("/view", patch(update_view))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-out", post(sign_out))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> StatusCode {
    if state.session.is_open() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn list_tasks(State(state): State<AppState>) -> Json<TaskView> {
    Json(state.session.view())
}

async fn reload_tasks(State(state): State<AppState>) -> Result<Json<TaskView>, AppError> {
    state.session.load_all().await?;
    Ok(Json(state.session.view()))
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTask>,
) -> Result<Response, AppError> {
    let created = state.session.insert(req).await?;
    Ok(match created {
        Some(task) => (StatusCode::CREATED, Json(task)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TaskPatch>,
) -> Result<Response, AppError> {
    let updated = state.session.update(TaskId(id), req).await?;
    Ok(task_or_no_content(updated))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.session.remove(TaskId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let updated = state.session.toggle_completed(TaskId(id)).await?;
    Ok(task_or_no_content(updated))
}

async fn begin_edit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.session.begin_edit(TaskId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_edit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.session.cancel_edit_of(TaskId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_view(
    State(state): State<AppState>,
    Json(req): Json<ViewSettings>,
) -> Result<Json<TaskView>, AppError> {
    if let Some(text) = req.filter_text {
        state.session.set_filter_text(text).await?;
    }
    if let Some(hide) = req.hide_completed {
        state.session.set_hide_completed(hide).await?;
    }
    Ok(Json(state.session.view()))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<Principal>, AppError> {
    let principal = state.session.sign_in(&req.email, &req.password).await?;
    Ok(Json(principal))
}

async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<Principal>, AppError> {
    let principal = state.session.sign_up(&req.email, &req.password).await?;
    Ok(Json(principal))
}

async fn sign_out(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.session.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

fn task_or_no_content(task: Option<Task>) -> Response {
    match task {
        Some(task) => Json(task).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
