use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ordersync_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in effective_values(&config) {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, Option<&'static str>)> {
    vec![
        ("database.url", config.database.url.clone(), Some("ORDERSYNC_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("ORDERSYNC_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("ORDERSYNC_DATABASE_TIMEOUT_SECS"),
        ),
        ("server.bind_address", config.server.bind_address.clone(), Some("ORDERSYNC_SERVER_BIND_ADDRESS")),
        ("server.port", config.server.port.to_string(), Some("ORDERSYNC_SERVER_PORT")),
        ("crm.enabled", config.crm.enabled.to_string(), Some("ORDERSYNC_CRM_ENABLED")),
        ("crm.api_base_url", unset_or(config.crm.api_base_url.as_deref()), Some("ORDERSYNC_CRM_API_BASE_URL")),
        ("crm.token_url", unset_or(config.crm.token_url.as_deref()), Some("ORDERSYNC_CRM_TOKEN_URL")),
        ("crm.client_id", unset_or(config.crm.client_id.as_deref()), Some("ORDERSYNC_CRM_CLIENT_ID")),
        ("crm.client_secret", redact_secret(config.crm.client_secret.as_ref()), Some("ORDERSYNC_CRM_CLIENT_SECRET")),
        ("crm.refresh_token", redact_secret(config.crm.refresh_token.as_ref()), Some("ORDERSYNC_CRM_REFRESH_TOKEN")),
        (
            "crm.webhook_secret",
            if config.crm.webhook_secret.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
            Some("ORDERSYNC_CRM_WEBHOOK_SECRET"),
        ),
        (
            "crm.shipping_product_id",
            config.crm.shipping_product_id.clone(),
            Some("ORDERSYNC_CRM_SHIPPING_PRODUCT_ID"),
        ),
        ("crm.batch_limit", config.crm.batch_limit.to_string(), None),
        ("chat.enabled", config.chat.enabled.to_string(), Some("ORDERSYNC_CHAT_ENABLED")),
        ("chat.api_base_url", unset_or(config.chat.api_base_url.as_deref()), Some("ORDERSYNC_CHAT_API_BASE_URL")),
        ("chat.api_token", redact_secret(config.chat.api_token.as_ref()), Some("ORDERSYNC_CHAT_API_TOKEN")),
        (
            "chat.poll_interval_secs",
            config.chat.poll_interval_secs.to_string(),
            Some("ORDERSYNC_CHAT_POLL_INTERVAL_SECS"),
        ),
        ("chat.max_conversations_per_tick", config.chat.max_conversations_per_tick.to_string(), None),
        ("sync.push_enabled", config.sync.push_enabled.to_string(), Some("ORDERSYNC_SYNC_PUSH_ENABLED")),
        (
            "sync.push_interval_secs",
            config.sync.push_interval_secs.to_string(),
            Some("ORDERSYNC_SYNC_PUSH_INTERVAL_SECS"),
        ),
        ("sync.webhook_lookup_attempts", config.sync.webhook_lookup_attempts.to_string(), None),
        ("logging.level", config.logging.level.clone(), Some("ORDERSYNC_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("ORDERSYNC_LOGGING_FORMAT")),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("ordersync.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/ordersync.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn unset_or(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    // Zoho-style tokens keep their `1000.` prefix visible.
    if let Some((prefix, _)) = trimmed.split_once('.') {
        return format!("{prefix}.***");
    }

    "<redacted>".to_string()
}
