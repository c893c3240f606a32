use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub chat: ChatConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub api_base_url: Option<String>,
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    /// CRM product id of the synthetic shipping line.
    pub shipping_product_id: String,
    pub batch_limit: usize,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub enabled: bool,
    pub api_base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub poll_interval_secs: u64,
    pub max_conversations_per_tick: usize,
    pub conversation_delay_ms: u64,
    pub default_backoff_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub push_enabled: bool,
    pub push_interval_secs: u64,
    pub discovery_batch_size: u32,
    pub token_refresh_interval_secs: u64,
    pub webhook_lookup_attempts: u32,
    pub webhook_lookup_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub crm_enabled: Option<bool>,
    pub crm_api_base_url: Option<String>,
    pub crm_client_id: Option<String>,
    pub crm_client_secret: Option<String>,
    pub crm_refresh_token: Option<String>,
    pub crm_webhook_secret: Option<String>,
    pub chat_enabled: Option<bool>,
    pub chat_api_base_url: Option<String>,
    pub chat_api_token: Option<String>,
    pub push_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://ordersync.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            crm: CrmConfig {
                enabled: false,
                api_base_url: None,
                token_url: None,
                client_id: None,
                client_secret: None,
                refresh_token: None,
                webhook_secret: None,
                timeout_secs: 30,
                shipping_product_id: "shipping".to_string(),
                batch_limit: 100,
            },
            chat: ChatConfig {
                enabled: false,
                api_base_url: None,
                api_token: None,
                poll_interval_secs: 60,
                max_conversations_per_tick: 50,
                conversation_delay_ms: 500,
                default_backoff_secs: 60,
                timeout_secs: 30,
            },
            sync: SyncConfig {
                push_enabled: true,
                push_interval_secs: 60,
                discovery_batch_size: 50,
                token_refresh_interval_secs: 1_800,
                webhook_lookup_attempts: 5,
                webhook_lookup_delay_ms: 200,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl CrmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ChatConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn conversation_delay(&self) -> Duration {
        Duration::from_millis(self.conversation_delay_ms)
    }

    pub fn default_backoff(&self) -> Duration {
        Duration::from_secs(self.default_backoff_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SyncConfig {
    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs)
    }

    pub fn webhook_lookup_delay(&self) -> Duration {
        Duration::from_millis(self.webhook_lookup_delay_ms)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ordersync.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(enabled) = crm.enabled {
                self.crm.enabled = enabled;
            }
            if let Some(api_base_url) = crm.api_base_url {
                self.crm.api_base_url = Some(api_base_url);
            }
            if let Some(token_url) = crm.token_url {
                self.crm.token_url = Some(token_url);
            }
            if let Some(client_id) = crm.client_id {
                self.crm.client_id = Some(client_id);
            }
            if let Some(crm_client_secret_value) = crm.client_secret {
                self.crm.client_secret = Some(secret_value(crm_client_secret_value));
            }
            if let Some(crm_refresh_token_value) = crm.refresh_token {
                self.crm.refresh_token = Some(secret_value(crm_refresh_token_value));
            }
            if let Some(webhook_secret) = crm.webhook_secret {
                self.crm.webhook_secret = Some(webhook_secret);
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
            if let Some(shipping_product_id) = crm.shipping_product_id {
                self.crm.shipping_product_id = shipping_product_id;
            }
            if let Some(batch_limit) = crm.batch_limit {
                self.crm.batch_limit = batch_limit;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(enabled) = chat.enabled {
                self.chat.enabled = enabled;
            }
            if let Some(api_base_url) = chat.api_base_url {
                self.chat.api_base_url = Some(api_base_url);
            }
            if let Some(chat_api_token_value) = chat.api_token {
                self.chat.api_token = Some(secret_value(chat_api_token_value));
            }
            if let Some(poll_interval_secs) = chat.poll_interval_secs {
                self.chat.poll_interval_secs = poll_interval_secs;
            }
            if let Some(max_conversations_per_tick) = chat.max_conversations_per_tick {
                self.chat.max_conversations_per_tick = max_conversations_per_tick;
            }
            if let Some(conversation_delay_ms) = chat.conversation_delay_ms {
                self.chat.conversation_delay_ms = conversation_delay_ms;
            }
            if let Some(default_backoff_secs) = chat.default_backoff_secs {
                self.chat.default_backoff_secs = default_backoff_secs;
            }
            if let Some(timeout_secs) = chat.timeout_secs {
                self.chat.timeout_secs = timeout_secs;
            }
        }

        if let Some(sync) = patch.sync {
            if let Some(push_enabled) = sync.push_enabled {
                self.sync.push_enabled = push_enabled;
            }
            if let Some(push_interval_secs) = sync.push_interval_secs {
                self.sync.push_interval_secs = push_interval_secs;
            }
            if let Some(discovery_batch_size) = sync.discovery_batch_size {
                self.sync.discovery_batch_size = discovery_batch_size;
            }
            if let Some(token_refresh_interval_secs) = sync.token_refresh_interval_secs {
                self.sync.token_refresh_interval_secs = token_refresh_interval_secs;
            }
            if let Some(webhook_lookup_attempts) = sync.webhook_lookup_attempts {
                self.sync.webhook_lookup_attempts = webhook_lookup_attempts;
            }
            if let Some(webhook_lookup_delay_ms) = sync.webhook_lookup_delay_ms {
                self.sync.webhook_lookup_delay_ms = webhook_lookup_delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ORDERSYNC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ORDERSYNC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("ORDERSYNC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ORDERSYNC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ORDERSYNC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ORDERSYNC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ORDERSYNC_SERVER_PORT") {
            self.server.port = parse_u16("ORDERSYNC_SERVER_PORT", &value)?;
        }

        if let Some(value) = read_env("ORDERSYNC_CRM_ENABLED") {
            self.crm.enabled = parse_bool("ORDERSYNC_CRM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ORDERSYNC_CRM_API_BASE_URL") {
            self.crm.api_base_url = Some(value);
        }
        if let Some(value) = read_env("ORDERSYNC_CRM_TOKEN_URL") {
            self.crm.token_url = Some(value);
        }
        if let Some(value) = read_env("ORDERSYNC_CRM_CLIENT_ID") {
            self.crm.client_id = Some(value);
        }
        if let Some(value) = read_env("ORDERSYNC_CRM_CLIENT_SECRET") {
            self.crm.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("ORDERSYNC_CRM_REFRESH_TOKEN") {
            self.crm.refresh_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("ORDERSYNC_CRM_WEBHOOK_SECRET") {
            self.crm.webhook_secret = Some(value);
        }
        if let Some(value) = read_env("ORDERSYNC_CRM_SHIPPING_PRODUCT_ID") {
            self.crm.shipping_product_id = value;
        }

        if let Some(value) = read_env("ORDERSYNC_CHAT_ENABLED") {
            self.chat.enabled = parse_bool("ORDERSYNC_CHAT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ORDERSYNC_CHAT_API_BASE_URL") {
            self.chat.api_base_url = Some(value);
        }
        if let Some(value) = read_env("ORDERSYNC_CHAT_API_TOKEN") {
            self.chat.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("ORDERSYNC_CHAT_POLL_INTERVAL_SECS") {
            self.chat.poll_interval_secs = parse_u64("ORDERSYNC_CHAT_POLL_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("ORDERSYNC_SYNC_PUSH_ENABLED") {
            self.sync.push_enabled = parse_bool("ORDERSYNC_SYNC_PUSH_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ORDERSYNC_SYNC_PUSH_INTERVAL_SECS") {
            self.sync.push_interval_secs = parse_u64("ORDERSYNC_SYNC_PUSH_INTERVAL_SECS", &value)?;
        }

        let log_level =
            read_env("ORDERSYNC_LOGGING_LEVEL").or_else(|| read_env("ORDERSYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ORDERSYNC_LOGGING_FORMAT").or_else(|| read_env("ORDERSYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.crm_enabled {
            self.crm.enabled = enabled;
        }
        if let Some(api_base_url) = overrides.crm_api_base_url {
            self.crm.api_base_url = Some(api_base_url);
        }
        if let Some(client_id) = overrides.crm_client_id {
            self.crm.client_id = Some(client_id);
        }
        if let Some(client_secret) = overrides.crm_client_secret {
            self.crm.client_secret = Some(secret_value(client_secret));
        }
        if let Some(refresh_token) = overrides.crm_refresh_token {
            self.crm.refresh_token = Some(secret_value(refresh_token));
        }
        if let Some(webhook_secret) = overrides.crm_webhook_secret {
            self.crm.webhook_secret = Some(webhook_secret);
        }
        if let Some(enabled) = overrides.chat_enabled {
            self.chat.enabled = enabled;
        }
        if let Some(api_base_url) = overrides.chat_api_base_url {
            self.chat.api_base_url = Some(api_base_url);
        }
        if let Some(api_token) = overrides.chat_api_token {
            self.chat.api_token = Some(secret_value(api_token));
        }
        if let Some(push_enabled) = overrides.push_enabled {
            self.sync.push_enabled = push_enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_crm(&self.crm)?;
        validate_chat(&self.chat)?;
        validate_sync(&self.sync)?;
        validate_logging(&self.logging)?;
        if self.chat.enabled && !self.crm.enabled {
            return Err(ConfigError::Validation(
                "chat.enabled requires crm.enabled: messages are relayed into the crm".to_string(),
            ));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ordersync.toml"), PathBuf::from("config/ordersync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let interpolated = interpolate_env_vars(&raw)?;

    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.timeout_secs == 0 || crm.timeout_secs > 120 {
        return Err(ConfigError::Validation("crm.timeout_secs must be in range 1..=120".to_string()));
    }
    if crm.batch_limit == 0 || crm.batch_limit > 100 {
        return Err(ConfigError::Validation("crm.batch_limit must be in range 1..=100".to_string()));
    }
    if crm.shipping_product_id.trim().is_empty() {
        return Err(ConfigError::Validation("crm.shipping_product_id must not be empty".to_string()));
    }

    for (key, url) in [("crm.api_base_url", &crm.api_base_url), ("crm.token_url", &crm.token_url)]
    {
        if let Some(url) = url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{key} must start with http:// or https://"
                )));
            }
        }
    }

    if crm.enabled {
        if crm.api_base_url.is_none() || crm.token_url.is_none() {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.api_base_url or crm.token_url is missing".to_string(),
            ));
        }
        if crm.client_id.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.client_id is missing".to_string(),
            ));
        }
        let missing_secret = [&crm.client_secret, &crm.refresh_token].into_iter().any(|secret| {
            secret.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true)
        });
        if missing_secret {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.client_secret or crm.refresh_token is missing"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.timeout_secs == 0 || chat.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "chat.timeout_secs must be in range 1..=120".to_string(),
        ));
    }
    if chat.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "chat.poll_interval_secs must be greater than zero".to_string(),
        ));
    }
    if chat.max_conversations_per_tick == 0 {
        return Err(ConfigError::Validation(
            "chat.max_conversations_per_tick must be greater than zero".to_string(),
        ));
    }

    if chat.enabled {
        if chat.api_base_url.is_none() {
            return Err(ConfigError::Validation(
                "chat.enabled is true but chat.api_base_url is missing".to_string(),
            ));
        }
        let missing_token = chat
            .api_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "chat.enabled is true but chat.api_token is missing".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_sync(sync: &SyncConfig) -> Result<(), ConfigError> {
    if sync.push_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sync.push_interval_secs must be greater than zero".to_string(),
        ));
    }
    if sync.discovery_batch_size == 0 {
        return Err(ConfigError::Validation(
            "sync.discovery_batch_size must be greater than zero".to_string(),
        ));
    }
    if sync.token_refresh_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sync.token_refresh_interval_secs must be greater than zero".to_string(),
        ));
    }
    if sync.webhook_lookup_attempts == 0 || sync.webhook_lookup_attempts > 20 {
        return Err(ConfigError::Validation(
            "sync.webhook_lookup_attempts must be in range 1..=20".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    crm: Option<CrmPatch>,
    chat: Option<ChatPatch>,
    sync: Option<SyncPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    api_base_url: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    webhook_secret: Option<String>,
    timeout_secs: Option<u64>,
    shipping_product_id: Option<String>,
    batch_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    enabled: Option<bool>,
    api_base_url: Option<String>,
    api_token: Option<String>,
    poll_interval_secs: Option<u64>,
    max_conversations_per_tick: Option<usize>,
    conversation_delay_ms: Option<u64>,
    default_backoff_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncPatch {
    push_enabled: Option<bool>,
    push_interval_secs: Option<u64>,
    discovery_batch_size: Option<u32>,
    token_refresh_interval_secs: Option<u64>,
    webhook_lookup_attempts: Option<u32>,
    webhook_lookup_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
