use exam_registration::{build_state, config::AppConfig, routes::build_router};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = AppConfig::from_env();
    if config.uses_default_admin_password() {
        tracing::warn!("ADMIN_PASSWORD is not set, the admin surface accepts the built-in default");
    }
    if config.webhook_url.is_none() {
        tracing::warn!("SHEETS_WEBHOOK_URL is not set, completed tests will not be submitted");
    }
    if let Some(path) = config.question_bank_path.as_deref() {
        tracing::info!("question bank edits are stored in {}", path);
    }

    let addr = config.bind_addr()?;
    let state = build_state(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("backend listening on {}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
