mod app;
mod auth;
mod config;
mod db;
mod state;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "bandsync=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    // A missing signing secret stops the process here, before anything binds.
    let config = AppConfig::from_env()?;
    let db = db::connect(&config).await?;
    db::migrate(&db).await;

    let state = AppState::from_parts(&config, db);
    app::serve(app::build_app(state)).await
}
