use std::future::Future;
use std::sync::Arc;

use ordersync_core::config::{AppConfig, LoadOptions};
use ordersync_db::{connect_with_settings, migrations, DbPool};
use ordersync_sync::transport::http_client;
use ordersync_sync::{HttpCrmClient, OAuthCredentials, OAuthTokenSource};

use crate::commands::CommandResult;

/// Error class, message and process exit code.
pub(crate) type Failure = (&'static str, String, u8);

pub(crate) fn load_config() -> Result<AppConfig, Failure> {
    AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2))
}

/// Runs `work` on a current-thread runtime and folds failures into the
/// command's JSON envelope.
pub(crate) fn block_on<F>(command: &str, work: F) -> CommandResult
where
    F: Future<Output = Result<CommandResult, Failure>>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(work) {
        Ok(result) => result,
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

pub(crate) async fn open_database(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

pub(crate) fn crm_client(config: &AppConfig) -> Result<Arc<HttpCrmClient>, Failure> {
    if !config.crm.enabled {
        return Err((
            "crm_disabled",
            "crm integration is disabled (set crm.enabled or ORDERSYNC_CRM_ENABLED)".to_string(),
            6,
        ));
    }
    let client =
        http_client(config.crm.timeout()).map_err(|error| ("http_client", error.to_string(), 6u8))?;
    let credentials = OAuthCredentials::from_config(&config.crm)
        .map_err(|error| ("crm_credentials", error.to_string(), 6u8))?;
    let base_url = config
        .crm
        .api_base_url
        .clone()
        .ok_or_else(|| ("crm_credentials", "crm.api_base_url is not configured".to_string(), 6u8))?;
    let tokens = Arc::new(OAuthTokenSource::new(client.clone(), credentials));
    Ok(Arc::new(HttpCrmClient::new(client, base_url, tokens)))
}
