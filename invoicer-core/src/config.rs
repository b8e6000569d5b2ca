use anyhow::{anyhow, Context};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings read from the environment.
///
/// Call `dotenv().ok()` first to pick up a local `.env` file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub database_max_connections: u32,
    pub poll_interval: Duration,
    /// Upper bound on waiting for the invoice number lock
    pub sequence_lock_timeout: Duration,
    pub overdue_sweep_enabled: bool,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;

        Ok(Settings {
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "SCHEDULER_POLL_INTERVAL_SECONDS",
                3600,
            )?),
            sequence_lock_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SEQUENCE_LOCK_TIMEOUT_MS",
                5000,
            )?),
            overdue_sweep_enabled: parse_or(&lookup, "OVERDUE_SWEEP_ENABLED", true)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}
