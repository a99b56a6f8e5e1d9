use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Platform admin bearer token.
    pub admin_token: String,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
    pub storefront_cache_ttl_secs: u64,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            admin_token: std::env::var("ADMIN_TOKEN")
                .map_err(|_| anyhow::anyhow!("ADMIN_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().len() < 16 {
                        anyhow::bail!("ADMIN_TOKEN must be at least 16 characters");
                    }
                    Ok(token)
                })?,
            rate_limit_per_second: parse_positive("RATE_LIMIT_PER_SECOND", 10)?,
            rate_limit_burst: parse_positive("RATE_LIMIT_BURST", 20)?,
            max_body_bytes: parse_positive("MAX_BODY_BYTES", 1024 * 1024)?,
            storefront_cache_ttl_secs: parse_positive("STOREFRONT_CACHE_TTL_SECS", 60)?,
            run_migrations: std::env::var("RUN_MIGRATIONS")
                .map(|v| !matches!(v.trim(), "0" | "false" | "no"))
                .unwrap_or(true),
        };

        // Never log the admin token or the full database URL
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database: {}", database_target(&config.database_url));
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "Rate limit: {}/s, burst {}",
            config.rate_limit_per_second,
            config.rate_limit_burst
        );

        Ok(config)
    }
}

/// Host and database name of a connection URL, without credentials.
fn database_target(url: &str) -> String {
    match PgConnectOptions::from_str(url) {
        Ok(options) => format!(
            "{}/{}",
            options.get_host(),
            options.get_database().unwrap_or("<default>")
        ),
        Err(_) => "<unparseable url>".to_string(),
    }
}

/// Reads an optional numeric variable, rejecting zero and garbage.
fn parse_positive<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value: T = raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{} must be a positive number", name))?;
            if value == T::default() {
                anyhow::bail!("{} must be greater than zero", name);
            }
            Ok(value)
        }
        _ => Ok(default),
    }
}
