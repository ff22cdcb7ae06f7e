use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use taskline::{
    api::router,
    db::SqliteStore,
    services::{Session, SessionConfig, SyncMode},
    state::AppState,
};
use tower::ServiceExt;

async fn setup(owner_scoped: bool) -> (Router, Session) {
    let store = Arc::new(SqliteStore::in_memory().await.expect("Failed to create store"));
    let session = Session::open(
        store.clone(),
        store,
        SessionConfig {
            owner_scoped,
            sync_mode: SyncMode::Realtime,
            resubscribe_delay: Duration::from_millis(50),
        },
    );
    let app = router(AppState {
        session: session.handle(),
    });
    (app, session)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = app.clone().oneshot(request).await.expect("request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not json")
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, session) = setup(false).await;
    let (status, _) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    session.close().await;
}

#[tokio::test]
async fn test_task_crud_flow() {
    let (app, session) = setup(false).await;

    let (status, _) = call(&app, Method::POST, "/tasks", Some(json!({ "title": "   " }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, created) = call(
        &app,
        Method::POST,
        "/tasks",
        Some(json!({ "title": "Buy milk", "notes": "oat" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().expect("id should be a number");
    assert_eq!(created["completed"], json!(false));

    let (status, toggled) = call(&app, Method::POST, &format!("/tasks/{}/toggle", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["completed"], json!(true));

    let (status, edited) = call(
        &app,
        Method::PATCH,
        &format!("/tasks/{}", id),
        Some(json!({ "title": "Buy oat milk" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["title"], json!("Buy oat milk"));

    let (_, view) = call(&app, Method::GET, "/tasks", None).await;
    assert_eq!(view["total"], json!(1));
    assert_eq!(view["tasks"][0]["title"], json!("Buy oat milk"));

    let (status, _) = call(&app, Method::DELETE, &format!("/tasks/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, view) = call(&app, Method::GET, "/tasks", None).await;
    assert_eq!(view["total"], json!(0));

    session.close().await;
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let (app, session) = setup(false).await;

    let (status, body) = call(&app, Method::POST, "/tasks/999/toggle", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], json!("Not Found"));

    let (status, _) = call(&app, Method::POST, "/tasks/999/edit", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    session.close().await;
}

#[tokio::test]
async fn test_cancel_edit_targets_the_given_task() {
    let (app, session) = setup(false).await;
    let (_, first) = call(&app, Method::POST, "/tasks", Some(json!({ "title": "first" }))).await;
    let (_, second) = call(&app, Method::POST, "/tasks", Some(json!({ "title": "second" }))).await;
    let first_id = first["id"].as_i64().expect("id should be a number");
    let second_id = second["id"].as_i64().expect("id should be a number");

    let (status, _) = call(&app, Method::POST, &format!("/tasks/{}/edit", first_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, Method::DELETE, &format!("/tasks/{}/edit", second_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, view) = call(&app, Method::GET, "/tasks", None).await;
    assert_eq!(view["editing"], json!(first_id));

    call(&app, Method::DELETE, &format!("/tasks/{}/edit", first_id), None).await;
    let (_, view) = call(&app, Method::GET, "/tasks", None).await;
    assert_eq!(view["editing"], Value::Null);

    session.close().await;
}

#[tokio::test]
async fn test_view_settings_filter_tasks() {
    let (app, session) = setup(false).await;
    for title in ["Buy milk", "Call Al"] {
        call(&app, Method::POST, "/tasks", Some(json!({ "title": title }))).await;
    }

    let (status, view) = call(
        &app,
        Method::PATCH,
        "/view",
        Some(json!({ "filter_text": "MILK" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["filter_text"], json!("MILK"));
    assert_eq!(view["tasks"].as_array().map(Vec::len), Some(1));
    assert_eq!(view["tasks"][0]["title"], json!("Buy milk"));
    assert_eq!(view["total"], json!(2));

    session.close().await;
}

#[tokio::test]
async fn test_auth_flow() {
    let (app, session) = setup(true).await;

    let (status, _) = call(&app, Method::POST, "/tasks/reload", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let creds = json!({ "email": "ada@example.com", "password": "hunter22" });
    let (status, principal) = call(&app, Method::POST, "/auth/sign-up", Some(creds.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(principal["email"], json!("ada@example.com"));
    assert!(principal.get("access_token").is_none());

    let (status, _) = call(&app, Method::POST, "/auth/sign-up", Some(creds.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        Method::POST,
        "/auth/sign-in",
        Some(json!({ "email": "ada@example.com", "password": "wrong-one" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::POST, "/tasks", Some(json!({ "title": "mine" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&app, Method::POST, "/auth/sign-out", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, view) = call(&app, Method::GET, "/tasks", None).await;
    assert_eq!(view["total"], json!(0));
    assert_eq!(view["loaded"], json!(false));
    assert_eq!(view["principal"], Value::Null);

    session.close().await;
}
