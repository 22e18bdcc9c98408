use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use docbuilder::{
    auth::jwt::TokenService,
    config::AppConfig,
    db,
    email::{LettreMailer, Mailer},
    export::Renderers,
    init_tracing, routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        smtp_enabled = config.smtp.is_some(),
        pandoc = %config.pandoc_path,
        wkhtmltopdf = %config.wkhtmltopdf_path,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;

    let tokens = TokenService::from_config(&config);
    let mailer: Arc<dyn Mailer> = Arc::new(LettreMailer::from_config(&config)?);
    let renderers = Renderers::from_config(&config);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid SERVER_HOST/PORT")?;

    let state = AppState::new(pool, config, tokens, mailer, renderers);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "docbuilder listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("received shutdown signal");
}
