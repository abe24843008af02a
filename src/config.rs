use std::{env, time::Duration};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HISTORY_WINDOW: usize = 20;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const API_KEY_PLACEHOLDER: &str = "your_openai_api_key_here";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown STORE_BACKEND {0:?} (expected \"memory\" or \"postgres\")")]
    UnknownBackend(String),
    #[error("STORE_BACKEND=postgres requires DATABASE_URL or POSTGRES_* variables")]
    MissingDatabaseUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { url: String, max_connections: u32 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub store: StoreBackend,
    pub run_migrations: bool,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub analysis_model: String,
    pub completion_timeout: Duration,
    pub history_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            environment: "development".to_string(),
            store: StoreBackend::Memory,
            run_migrations: true,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            chat_model: DEFAULT_MODEL.to_string(),
            analysis_model: DEFAULT_MODEL.to_string(),
            completion_timeout: Duration::from_secs(30),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a local `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Config::default();

        let port = parse_or(get("PORT"), "PORT", defaults.port)?;
        let environment = get("APP_ENV")
            .or_else(|| get("NODE_ENV"))
            .unwrap_or(defaults.environment);

        let database_url = resolve_database_url(&get);
        let max_connections = parse_or(
            get("DATABASE_MAX_CONNECTIONS"),
            "DATABASE_MAX_CONNECTIONS",
            10u32,
        )?;
        let store = match get("STORE_BACKEND").map(|v| v.to_ascii_lowercase()) {
            None => match database_url {
                Some(url) => StoreBackend::Postgres {
                    url,
                    max_connections,
                },
                None => StoreBackend::Memory,
            },
            Some(backend) if backend == "memory" => StoreBackend::Memory,
            Some(backend) if backend == "postgres" => StoreBackend::Postgres {
                url: database_url.ok_or(ConfigError::MissingDatabaseUrl)?,
                max_connections,
            },
            Some(other) => return Err(ConfigError::UnknownBackend(other)),
        };

        let run_migrations = match get("RUN_MIGRATIONS") {
            None => defaults.run_migrations,
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidValue {
                key: "RUN_MIGRATIONS",
                value,
            })?,
        };

        // Deployment dashboards tend to paste keys with trailing newlines.
        let openai_api_key = lookup("OPENAI_API_KEY")
            .map(|key| key.replace(['\n', '\r'], "").trim().to_string())
            .filter(|key| !key.is_empty() && key != API_KEY_PLACEHOLDER);

        let timeout_secs = parse_or(
            get("COMPLETION_TIMEOUT_SECS"),
            "COMPLETION_TIMEOUT_SECS",
            defaults.completion_timeout.as_secs(),
        )?;
        let history_window: usize =
            parse_or(get("HISTORY_WINDOW"), "HISTORY_WINDOW", defaults.history_window)?;

        Ok(Self {
            port,
            environment,
            store,
            run_migrations,
            openai_api_key,
            openai_base_url: get("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            chat_model: get("OPENAI_CHAT_MODEL").unwrap_or(defaults.chat_model),
            analysis_model: get("OPENAI_ANALYSIS_MODEL").unwrap_or(defaults.analysis_model),
            completion_timeout: Duration::from_secs(timeout_secs.max(1)),
            history_window: history_window.max(2),
        })
    }

    pub fn openai_configured(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

/// `DATABASE_URL` wins; otherwise the URL is assembled from `POSTGRES_*`
/// (or libpq `PG*`) variables, but only when a host or database is named.
fn resolve_database_url<G>(get: &G) -> Option<String>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(url) = get("DATABASE_URL") {
        return Some(url);
    }
    let host = get("POSTGRES_HOST").or_else(|| get("PGHOST"));
    let db = get("POSTGRES_DB").or_else(|| get("PGDATABASE"));
    if host.is_none() && db.is_none() {
        return None;
    }
    let host = host.unwrap_or_else(|| "localhost".to_string());
    let db = db.unwrap_or_else(|| "nio_chat".to_string());
    let port = get("POSTGRES_PORT")
        .or_else(|| get("PGPORT"))
        .unwrap_or_else(|| "5432".to_string());
    let user = get("POSTGRES_USER")
        .or_else(|| get("PGUSER"))
        .unwrap_or_else(|| "postgres".to_string());
    let auth = match get("POSTGRES_PASSWORD").or_else(|| get("PGPASSWORD")) {
        Some(password) => format!("{user}:{password}"),
        None => user,
    };
    Some(format!("postgres://{auth}@{host}:{port}/{db}"))
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
