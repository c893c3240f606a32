use std::sync::Arc;

use ordersync_db::repositories::SqlWatermarkRepository;
use ordersync_sync::transport::http_client;
use ordersync_sync::{ChatRelay, HttpChatProvider, RelaySettings, TickOutcome};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::commands::push::sync_failure;
use crate::commands::runtime::{block_on, crm_client, load_config, open_database, Failure};
use crate::commands::CommandResult;

/// Runs one chat relay tick against the configured provider.
pub fn run_once() -> CommandResult {
    const COMMAND: &str = "relay-once";
    let config = match load_config() {
        Ok(config) => config,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code);
        }
    };
    if !config.chat.enabled {
        return CommandResult::failure(
            COMMAND,
            "chat_disabled",
            "chat relay is disabled (set chat.enabled or ORDERSYNC_CHAT_ENABLED)",
            6,
        );
    }

    block_on(COMMAND, async move {
        let crm = crm_client(&config)?;
        let (Some(base_url), Some(token)) =
            (config.chat.api_base_url.clone(), config.chat.api_token.clone())
        else {
            return Err((
                "chat_credentials",
                "chat.api_base_url and chat.api_token must be configured".to_string(),
                6,
            ));
        };
        let client = http_client(config.chat.timeout())
            .map_err(|error| ("http_client", error.to_string(), 6u8))?;
        let pool = open_database(&config).await?;

        let relay = ChatRelay::new(
            Arc::new(HttpChatProvider::new(client, base_url, token)),
            crm,
            Arc::new(SqlWatermarkRepository::new(pool.clone())),
            RelaySettings::from_config(&config.chat),
        );
        let outcome = relay.tick(&CancellationToken::new()).await.map_err(sync_failure);
        pool.close().await;

        let (message, details) = summarize(&outcome?);
        Ok::<_, Failure>(CommandResult::success_with_details(COMMAND, message, Some(details)))
    })
}

fn summarize(outcome: &TickOutcome) -> (String, serde_json::Value) {
    match outcome {
        TickOutcome::SkippedBackoff => {
            ("relay paused by rate limit".to_string(), json!({"outcome": "skipped_backoff"}))
        }
        TickOutcome::Completed { processed, forwarded } => (
            format!("relayed {forwarded} messages from {processed} conversations"),
            json!({"outcome": "completed", "processed": processed, "forwarded": forwarded}),
        ),
        TickOutcome::RateLimited { resume_at, retry_after } => (
            format!("rate limited; retry after {}s", retry_after.as_secs()),
            json!({
                "outcome": "rate_limited",
                "resume_at": resume_at.as_ref().map(|id| id.0.clone()),
                "retry_after_secs": retry_after.as_secs(),
            }),
        ),
        TickOutcome::Stopped { processed } => (
            format!("stopped after {processed} conversations"),
            json!({"outcome": "stopped", "processed": processed}),
        ),
    }
}
