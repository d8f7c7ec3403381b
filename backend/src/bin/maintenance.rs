use std::{env, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use crm_backend::{
    auth::{jwt::JwtService, password},
    automation::{default_sweeps, run_sweeps},
    config::AppConfig,
    db,
    leads::{self, recompute_status},
    models::{NewUser, Role},
    policy::LeadScope,
    state::AppState,
    store::{CrmStore, LeadFilter, Pagination, PgStore, MAX_PAGE_SIZE},
    telemetry::init_tracing,
};

const USAGE: &str = "Usage: maintenance <create-user <username> <password> <role> | sweep | check-status>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let command: Vec<&str> = args.iter().map(String::as_str).collect();
    match command.as_slice() {
        ["create-user", username, password, role] => create_user(username, password, role).await?,
        ["sweep"] => sweep().await?,
        ["check-status"] => check_status().await?,
        [] => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
        [cmd, ..] => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<(AppConfig, Arc<dyn CrmStore>)> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    Ok((config, Arc::new(PgStore::new(pool))))
}

async fn create_user(username: &str, raw_password: &str, role: &str) -> Result<()> {
    let role: Role = role.parse().context("role must be admin, lead_gen or outreach")?;
    let username = username.trim();
    if username.is_empty() {
        bail!("username must not be empty");
    }
    leads::ensure_fits("username", username, leads::MAX_USERNAME_LEN)?;
    let (_, store) = connect()?;
    if store.find_user_by_username(username).await?.is_some() {
        bail!("user {username} already exists");
    }

    let user = store
        .insert_user(NewUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password::hash_password(raw_password)?,
            role,
        })
        .await
        .context("failed to insert user")?;
    println!("Created {} user {} ({})", user.role, user.username, user.id);
    Ok(())
}

async fn sweep() -> Result<()> {
    let (config, store) = connect()?;
    let jwt = JwtService::from_config(&config)?;
    let state = Arc::new(AppState::new(store, config, jwt));
    let report = run_sweeps(state, &default_sweeps(), Utc::now().naive_utc()).await;
    for (name, count) in &report.results {
        println!("{name}: {count}");
    }
    if !report.failed.is_empty() {
        bail!("sweeps failed: {}", report.failed.join(", "));
    }
    Ok(())
}

/// Reports leads whose stored status differs from the newest history row.
async fn check_status() -> Result<()> {
    let (_, store) = connect()?;
    let filter = LeadFilter::scoped(LeadScope::All);
    let mut page = Pagination::new(Some(1), Some(MAX_PAGE_SIZE));
    let mut checked = 0usize;
    let mut diverged = 0usize;

    loop {
        let leads = store.list_leads(&filter, page).await?;
        if leads.is_empty() {
            break;
        }
        for lead in &leads {
            checked += 1;
            let derived = recompute_status(store.as_ref(), lead.id).await?;
            if derived != lead.status {
                diverged += 1;
                println!(
                    "{}: stored {} but history says {}",
                    lead.id, lead.status, derived
                );
            }
        }
        page.page += 1;
    }

    println!("Checked {checked} leads, {diverged} diverged.");
    if diverged > 0 {
        std::process::exit(2);
    }
    Ok(())
}
