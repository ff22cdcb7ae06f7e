use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskline::api::router;
use taskline::config::{AppConfig, Backend};
use taskline::db::SqliteStore;
use taskline::remote::{AuthService, RecordStore, RestPlatformClient};
use taskline::services::Session;
use taskline::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "taskline=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let (store, auth): (Arc<dyn RecordStore>, Arc<dyn AuthService>) = match &config.backend {
        Backend::Sqlite { database_url } => {
            info!("using local sqlite store at {}", database_url);
            let sqlite = Arc::new(SqliteStore::connect(database_url).await?);
            let store: Arc<dyn RecordStore> = sqlite.clone();
            let auth: Arc<dyn AuthService> = sqlite;
            (store, auth)
        }
        Backend::Rest(platform) => {
            info!("using hosted platform at {}", platform.project_url);
            let client = Arc::new(RestPlatformClient::new(platform.clone())?);
            let store: Arc<dyn RecordStore> = client.clone();
            let auth: Arc<dyn AuthService> = client;
            (store, auth)
        }
    };

    let session = Session::open(store, auth, config.session.clone());
    let app = router(AppState {
        session: session.handle(),
    });

    info!("listening on http://{}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    session.close().await;
    Ok(())
}
