//! Runtime configuration read from the environment (and `.env` via dotenvy).

use anyhow::{Context, Result};

use crate::services::OrderNumberPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    /// Postgres when set, in-memory stores otherwise.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub event_subject_prefix: String,
    pub order_numbers: OrderNumberPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str, default: u32| -> Result<u32> {
            non_empty(key).map(|v| v.parse::<u32>().with_context(|| format!("{key} must be a number, got {v:?}"))).transpose().map(|v| v.unwrap_or(default))
        };

        let port = non_empty("PORT")
            .map(|v| v.parse::<u16>().with_context(|| format!("PORT must be a port number, got {v:?}")))
            .transpose()?
            .unwrap_or(8083);

        Ok(Self {
            port,
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: non_empty("NATS_URL"),
            event_subject_prefix: non_empty("EVENT_SUBJECT_PREFIX").unwrap_or_else(|| "ecommerce.orders".to_string()),
            order_numbers: OrderNumberPolicy {
                prefix: non_empty("ORDER_NUMBER_PREFIX").unwrap_or_else(|| "ORD".to_string()),
                max_attempts: parsed("ORDER_NUMBER_MAX_ATTEMPTS", 8)?.max(1),
            },
        })
    }
}
