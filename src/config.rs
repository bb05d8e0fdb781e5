use crate::constants::{
    DEFAULT_ACCOUNT_GROUPS, DEFAULT_DATE_COLUMN, DEFAULT_POSTGRES_SCHEMA,
    DEFAULT_RATE_LIMIT_MAX_RETRIES, DEFAULT_RATE_LIMIT_SLEEP_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_RETENTION_DAYS, DEFAULT_SQLSERVER_PORT, DEFAULT_SQLSERVER_SCHEMA,
    DEFAULT_SYNC_CHUNK_SIZE, DEFAULT_SYNC_MAPPINGS, DEFAULT_SYNC_MAX_WORKERS,
    DEFAULT_UPSERT_CHUNK_SIZE, FACEBOOK_API_VERSION, FACEBOOK_BASE_URL,
};
use crate::models::{Account, SyncMapping};
use dotenv::dotenv;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid account configuration format: '{0}'. Expected format: account_id:table_name")]
    InvalidAccount(String),
    #[error("Invalid sync mapping: '{0}'. Expected format: view_name:table_name")]
    InvalidMapping(String),
    #[error("No Graph API tokens configured")]
    NoTokens,
    #[error("No Meta accounts configured")]
    NoAccounts,
    #[error("Duplicate account ID in configuration: {0}")]
    DuplicateAccount(String),
    #[error("Duplicate table name in configuration: {0}")]
    DuplicateTable(String),
}

/// Accounts plus the token pool they rotate through.
#[derive(Debug, Clone)]
pub struct AccountsConfig {
    accounts: Vec<Account>,
    tokens: Vec<String>,
}

impl AccountsConfig {
    /// Parses `id:table,...` and `token,...` lists and validates them.
    pub fn parse(accounts: &str, tokens: &str) -> Result<Self, ConfigError> {
        let tokens: Vec<String> = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        let mut parsed = Vec::new();
        for item in accounts.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (account_id, table) = split_pair(item)
                .ok_or_else(|| ConfigError::InvalidAccount(item.to_string()))?;
            parsed.push(Account::new(account_id, table));
        }

        Self::new(parsed, tokens)
    }

    pub fn new(accounts: Vec<Account>, tokens: Vec<String>) -> Result<Self, ConfigError> {
        if tokens.is_empty() {
            return Err(ConfigError::NoTokens);
        }
        if accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        let mut ids = HashSet::new();
        let mut tables = HashSet::new();
        for account in &accounts {
            if !ids.insert(account.account_id.as_str()) {
                return Err(ConfigError::DuplicateAccount(account.account_id.clone()));
            }
            if !tables.insert(account.table.as_str()) {
                return Err(ConfigError::DuplicateTable(account.table.clone()));
            }
        }

        Ok(Self { accounts, tokens })
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Round-robin: several accounts may share one token.
    pub fn token_for(&self, account_index: usize) -> &str {
        &self.tokens[account_index % self.tokens.len()]
    }

    /// `(global index, account, token)` in configuration order.
    pub fn assignments(&self) -> Vec<(usize, Account, String)> {
        self.accounts
            .iter()
            .enumerate()
            .map(|(idx, account)| (idx, account.clone(), self.token_for(idx).to_string()))
            .collect()
    }

    /// Contiguous groups of at most `ceil(len / num_groups)` assignments.
    pub fn split_into_groups(&self, num_groups: usize) -> Vec<Vec<(usize, Account, String)>> {
        let assignments = self.assignments();
        let per_group = assignments.len().div_ceil(num_groups.max(1));
        assignments
            .chunks(per_group.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct GraphApiConfig {
    pub base_url: String,
    pub api_version: String,
    pub request_timeout: Duration,
    pub rate_limit_sleep: Duration,
    /// `None` retries a rate-limited request forever.
    pub max_rate_limit_retries: Option<u32>,
    pub retention_days: i64,
}

impl Default for GraphApiConfig {
    fn default() -> Self {
        Self {
            base_url: FACEBOOK_BASE_URL.to_string(),
            api_version: FACEBOOK_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_sleep: Duration::from_secs(DEFAULT_RATE_LIMIT_SLEEP_SECS),
            max_rate_limit_retries: Some(DEFAULT_RATE_LIMIT_MAX_RETRIES),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub schema: String,
    pub ssl_verify: bool,
    pub upsert_chunk_size: usize,
}

#[derive(Debug, Clone)]
pub struct SqlServerConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub schema: String,
    pub trust_cert: bool,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub mappings: Vec<SyncMapping>,
    pub date_column: String,
    pub retention_days: i64,
    pub chunk_size: usize,
    pub max_workers: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub accounts: AccountsConfig,
    pub graph_api: GraphApiConfig,
    pub postgres: PostgresConfig,
    pub sqlserver: SqlServerConfig,
    pub sync: SyncConfig,
    pub account_groups: usize,
    pub worker_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let accounts = AccountsConfig::parse(
            &env.required("META_ACCOUNTS")?,
            &env.required("GRAPH_API_TOKENS")?,
        )?;

        let base_url = env.or("GRAPH_API_BASE_URL", FACEBOOK_BASE_URL.to_string())?;
        Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidValue("GRAPH_API_BASE_URL".to_string(), e.to_string()))?;

        let max_retries: u32 = env.or("RATE_LIMIT_MAX_RETRIES", DEFAULT_RATE_LIMIT_MAX_RETRIES)?;
        let retention_days: i64 = env.or("DATA_RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?;
        if retention_days < 0 {
            return Err(ConfigError::InvalidValue(
                "DATA_RETENTION_DAYS".to_string(),
                retention_days.to_string(),
            ));
        }

        let graph_api = GraphApiConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: env.or("GRAPH_API_VERSION", FACEBOOK_API_VERSION.to_string())?,
            request_timeout: Duration::from_secs(
                env.or("API_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            ),
            rate_limit_sleep: Duration::from_secs(
                env.or("RATE_LIMIT_SLEEP_SECONDS", DEFAULT_RATE_LIMIT_SLEEP_SECS)?,
            ),
            max_rate_limit_retries: (max_retries > 0).then_some(max_retries),
            retention_days,
        };

        let database_url = env.required("DATABASE_URL")?;
        // Validate the URL format
        Url::parse(&database_url).map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;

        let postgres = PostgresConfig {
            database_url,
            schema: env.or("POSTGRES_SCHEMA", DEFAULT_POSTGRES_SCHEMA.to_string())?,
            ssl_verify: env.or("POSTGRES_SSL_VERIFY", true)?,
            upsert_chunk_size: env.positive("UPSERT_CHUNK_SIZE", DEFAULT_UPSERT_CHUNK_SIZE)?,
        };

        let sqlserver = SqlServerConfig {
            host: env.required("SQLSERVER_HOST")?,
            port: env.or("SQLSERVER_PORT", DEFAULT_SQLSERVER_PORT)?,
            database: env.required("SQLSERVER_DATABASE")?,
            user: env.required("SQLSERVER_USER")?,
            password: env.required("SQLSERVER_PASSWORD")?,
            schema: env.or("SQLSERVER_SCHEMA", DEFAULT_SQLSERVER_SCHEMA.to_string())?,
            trust_cert: env.or("SQLSERVER_TRUST_CERT", false)?,
        };

        let sync = SyncConfig {
            mappings: parse_mappings(&env.or("SYNC_MAPPINGS", DEFAULT_SYNC_MAPPINGS.to_string())?)?,
            date_column: env.or("SYNC_DATE_COLUMN", DEFAULT_DATE_COLUMN.to_string())?,
            retention_days: env.or("SYNC_RETENTION_DAYS", retention_days)?,
            chunk_size: env.positive("SYNC_CHUNK_SIZE", DEFAULT_SYNC_CHUNK_SIZE)?,
            max_workers: env.positive("SYNC_MAX_WORKERS", DEFAULT_SYNC_MAX_WORKERS)?,
        };

        let worker_interval = match env.get("WORKER_INTERVAL_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("WORKER_INTERVAL_SECS", &raw)?)),
            None => None,
        };

        Ok(Self {
            accounts,
            graph_api,
            postgres,
            sqlserver,
            sync,
            account_groups: env.positive("ACCOUNT_GROUPS", DEFAULT_ACCOUNT_GROUPS)?,
            worker_interval,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
    }

    fn or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.or(key, default)?;
        if value == 0 {
            return Err(ConfigError::InvalidValue(key.to_string(), "0".to_string()));
        }
        Ok(value)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), raw.to_string()))
}

fn split_pair(item: &str) -> Option<(&str, &str)> {
    let mut parts = item.split(':');
    let (left, right) = (parts.next()?.trim(), parts.next()?.trim());
    if parts.next().is_some() || left.is_empty() || right.is_empty() {
        return None;
    }
    Some((left, right))
}

pub fn parse_mappings(raw: &str) -> Result<Vec<SyncMapping>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .map(|item| {
            split_pair(item)
                .map(|(view, table)| SyncMapping::new(view, table))
                .ok_or_else(|| ConfigError::InvalidMapping(item.to_string()))
        })
        .collect()
}
