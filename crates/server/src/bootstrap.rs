use std::sync::Arc;

use ordersync_core::config::{AppConfig, ConfigError, LoadOptions};
use ordersync_db::repositories::{
    OrderRepository, ProductRepository, SnapshotRepository, SqlOrderRepository,
    SqlProductRepository, SqlSnapshotRepository, SqlWatermarkRepository,
};
use ordersync_db::{connect_with_settings, migrations, DbPool};
use ordersync_sync::chat::{ChatRelay, HttpChatProvider, RelaySettings};
use ordersync_sync::crm::{CrmError, HttpCrmClient};
use ordersync_sync::token_cache::{CredentialRefreshTask, OAuthCredentials, OAuthTokenSource};
use ordersync_sync::transport::http_client;
use ordersync_sync::{
    B2bDealBuilder, OrderPushService, PushSettings, Scheduler, WebhookHandler, WebhookSettings,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Request-path services shared by the HTTP routes.
pub struct Services {
    /// `None` while the CRM integration is disabled.
    pub push: Option<Arc<OrderPushService>>,
    pub deals: Option<Arc<B2bDealBuilder>>,
    pub webhook: Arc<WebhookHandler>,
}

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Arc<Services>,
    pub scheduler: Scheduler,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("crm credentials unavailable: {0}")]
    Credentials(#[source] CrmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let orders: Arc<dyn OrderRepository> = Arc::new(SqlOrderRepository::new(db_pool.clone()));
    let products: Arc<dyn ProductRepository> = Arc::new(SqlProductRepository::new(db_pool.clone()));
    let snapshots: Arc<dyn SnapshotRepository> =
        Arc::new(SqlSnapshotRepository::new(db_pool.clone()));

    let shutdown = CancellationToken::new();
    let mut scheduler = Scheduler::new(shutdown.clone());

    let webhook = Arc::new(WebhookHandler::new(
        Arc::clone(&orders),
        snapshots,
        WebhookSettings::from_config(&config.crm, &config.sync),
    ));

    let mut push = None;
    let mut deals = None;
    if config.crm.enabled {
        let client = http_client(config.crm.timeout()).map_err(BootstrapError::HttpClient)?;
        let credentials =
            OAuthCredentials::from_config(&config.crm).map_err(BootstrapError::Credentials)?;
        let tokens = Arc::new(OAuthTokenSource::new(client.clone(), credentials));
        let base_url = config.crm.api_base_url.clone().ok_or_else(|| {
            ConfigError::Validation("crm.api_base_url is required when crm is enabled".to_string())
        })?;
        let crm = Arc::new(HttpCrmClient::new(client, base_url, tokens.clone()));

        scheduler.register(Arc::new(CredentialRefreshTask::new(
            tokens,
            config.sync.token_refresh_interval(),
        )));

        let push_service = Arc::new(OrderPushService::new(
            crm.clone(),
            Arc::clone(&orders),
            Arc::clone(&products),
            PushSettings::from_config(&config.crm, &config.sync),
        ));
        if config.sync.push_enabled {
            scheduler.register(push_service.clone());
        }
        push = Some(push_service);
        deals = Some(Arc::new(B2bDealBuilder::new(
            crm.clone(),
            Arc::clone(&orders),
            Arc::clone(&products),
            config.crm.batch_limit,
        )));

        if config.chat.enabled {
            let chat_client =
                http_client(config.chat.timeout()).map_err(BootstrapError::HttpClient)?;
            let (Some(chat_url), Some(chat_token)) =
                (config.chat.api_base_url.clone(), config.chat.api_token.clone())
            else {
                return Err(ConfigError::Validation(
                    "chat.api_base_url and chat.api_token are required when chat is enabled"
                        .to_string(),
                )
                .into());
            };
            let provider = Arc::new(HttpChatProvider::new(chat_client, chat_url, chat_token));
            let relay = ChatRelay::new(
                provider,
                crm,
                Arc::new(SqlWatermarkRepository::new(db_pool.clone())),
                RelaySettings::from_config(&config.chat),
            );
            scheduler.register(Arc::new(relay));
        }
    }

    info!(
        event_name = "system.bootstrap.services_ready",
        crm_enabled = config.crm.enabled,
        chat_enabled = config.chat.enabled,
        tasks = ?scheduler.task_names(),
        "sync services initialized"
    );

    Ok(Application {
        config,
        db_pool,
        services: Arc::new(Services { push, deals, webhook }),
        scheduler,
        shutdown,
    })
}
