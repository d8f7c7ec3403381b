use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;

use crm_backend::{
    auth::jwt::JwtService,
    config::AppConfig,
    db, routes,
    state::AppState,
    store::{CrmStore, PgStore},
    telemetry::init_tracing,
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
        automation_actor = config.automation_actor.as_deref().unwrap_or("<earliest admin>"),
        "loaded backend configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let migrations_pool = pool.clone();
    let applied = tokio::task::spawn_blocking(move || db::run_migrations(&migrations_pool))
        .await
        .context("migration task panicked")??;
    tracing::info!(applied, "database migrations up to date");

    let jwt = JwtService::from_config(&config)?;
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid SERVER_HOST/SERVER_PORT")?;

    let store: Arc<dyn CrmStore> = Arc::new(PgStore::new(pool));
    let state = AppState::new(store, config, jwt);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("server received shutdown signal");
        })
        .await?;

    Ok(())
}
