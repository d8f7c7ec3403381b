use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_AUTOMATION_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub cors_allowed_origin: Option<String>,
    pub automation_interval_seconds: u64,
    pub automation_actor: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "leadline".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "leadline-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let automation_interval_seconds = env::var("AUTOMATION_INTERVAL_SECONDS")
            .ok()
            .map(|value| value.parse::<u64>())
            .transpose()
            .context("AUTOMATION_INTERVAL_SECONDS must be a positive integer")?
            .unwrap_or(DEFAULT_AUTOMATION_INTERVAL_SECONDS)
            .max(1);
        let automation_actor = env::var("AUTOMATION_ACTOR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            cors_allowed_origin,
            automation_interval_seconds,
            automation_actor,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    /// Origins listed in `CORS_ALLOWED_ORIGIN`, comma separated.
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origin
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_origins(origins: Option<&str>) -> AppConfig {
        AppConfig {
            database_url: "postgres://crm:hunter2@db/crm".into(),
            database_max_pool_size: 2,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            jwt_secret: "secret".into(),
            jwt_issuer: "leadline".into(),
            jwt_audience: "leadline-clients".into(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: origins.map(str::to_string),
            automation_interval_seconds: DEFAULT_AUTOMATION_INTERVAL_SECONDS,
            automation_actor: None,
        }
    }

    #[test]
    fn masks_the_database_password() {
        let redacted = config_with_origins(None).redacted_database_url();
        assert_eq!(redacted, "postgres://crm:*****@db/crm");
    }

    #[test]
    fn leaves_urls_without_password_alone() {
        assert_eq!(
            redact_database_url("postgres://localhost/crm"),
            "postgres://localhost/crm"
        );
        assert_eq!(redact_database_url("::"), "***");
    }

    #[test]
    fn splits_cors_origins() {
        let config = config_with_origins(Some("https://crm.example.com, http://localhost:5173,"));
        assert_eq!(
            config.cors_origins(),
            vec!["https://crm.example.com", "http://localhost:5173"]
        );
        assert!(config_with_origins(None).cors_origins().is_empty());
    }
}
