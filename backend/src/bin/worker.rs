use std::{sync::Arc, time::Duration};

use tokio::signal;

use crm_backend::{
    auth::jwt::JwtService,
    config::AppConfig,
    db, default_sweeps,
    state::AppState,
    store::{CrmStore, PgStore},
    telemetry::init_tracing,
    AutomationWorker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        interval_secs = config.automation_interval_seconds,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let jwt = JwtService::from_config(&config)?;
    let interval = Duration::from_secs(config.automation_interval_seconds);

    let store: Arc<dyn CrmStore> = Arc::new(PgStore::new(pool));
    let state = Arc::new(AppState::new(store, config, jwt));
    let worker = AutomationWorker::new(state, default_sweeps(), interval);

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}
