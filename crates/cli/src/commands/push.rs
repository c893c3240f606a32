use std::sync::Arc;

use ordersync_core::domain::order::OrderId;
use ordersync_db::repositories::{SqlOrderRepository, SqlProductRepository};
use ordersync_sync::{OrderPushService, PushOutcome, PushSettings, SyncError};
use tokio_util::sync::CancellationToken;

use crate::commands::runtime::{block_on, crm_client, load_config, open_database, Failure};
use crate::commands::CommandResult;

/// Pushes one stored order, bypassing discovery.
pub fn run_order(order_id: i64) -> CommandResult {
    const COMMAND: &str = "push-order";
    let config = match load_config() {
        Ok(config) => config,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code);
        }
    };

    block_on(COMMAND, async move {
        let crm = crm_client(&config)?;
        let pool = open_database(&config).await?;
        let service = OrderPushService::new(
            crm,
            Arc::new(SqlOrderRepository::new(pool.clone())),
            Arc::new(SqlProductRepository::new(pool.clone())),
            PushSettings::from_config(&config.crm, &config.sync),
        );

        let outcome = service
            .push_order_by_id(OrderId(order_id), &CancellationToken::new())
            .await
            .map_err(sync_failure);
        pool.close().await;
        let outcome = outcome?;

        Ok::<_, Failure>(CommandResult::success_with_details(
            COMMAND,
            describe(order_id, &outcome),
            serde_json::to_value(&outcome).ok(),
        ))
    })
}

/// Runs a single discovery cycle, as the scheduler would.
pub fn run_pending() -> CommandResult {
    const COMMAND: &str = "push-pending";
    let config = match load_config() {
        Ok(config) => config,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code);
        }
    };

    block_on(COMMAND, async move {
        let crm = crm_client(&config)?;
        let pool = open_database(&config).await?;
        let service = OrderPushService::new(
            crm,
            Arc::new(SqlOrderRepository::new(pool.clone())),
            Arc::new(SqlProductRepository::new(pool.clone())),
            PushSettings::from_config(&config.crm, &config.sync),
        );

        let report = service.push_pending(&CancellationToken::new()).await.map_err(sync_failure);
        pool.close().await;
        let report = report?;

        Ok::<_, Failure>(CommandResult::success_with_details(
            COMMAND,
            format!(
                "discovered {} orders: {} synced, {} partial, {} retained, {} failed",
                report.discovered,
                report.synced,
                report.partially_synced,
                report.retained,
                report.failed
            ),
            serde_json::to_value(&report).ok(),
        ))
    })
}

fn describe(order_id: i64, outcome: &PushOutcome) -> String {
    match outcome {
        PushOutcome::Synced { external_id } => {
            format!("order {order_id} synced as `{external_id}`")
        }
        PushOutcome::PartiallySynced { external_id, uploaded_chunks, total_chunks } => format!(
            "order {order_id} created as `{external_id}` with {uploaded_chunks}/{total_chunks} extra item chunks"
        ),
        PushOutcome::Retained { reason } => format!("order {order_id} retained: {reason}"),
        PushOutcome::SkippedB2b => format!("order {order_id} belongs to a business client"),
        PushOutcome::AlreadySynced => format!("order {order_id} is already synced"),
    }
}

pub(crate) fn sync_failure(error: SyncError) -> Failure {
    let exit_code = match &error {
        SyncError::NotFound(_) => 8,
        SyncError::Validation(_) | SyncError::Domain(_) => 9,
        _ => 7,
    };
    (error.kind(), error.to_string(), exit_code)
}
