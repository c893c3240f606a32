//! Sales-order push: discovery of unsynced orders and their creation in the CRM.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ordersync_core::config::{CrmConfig, SyncConfig};
use ordersync_core::domain::order::{CheckoutOrder, LineItem, OrderId, B2B_SENTINEL_EXTERNAL_ID};
use ordersync_core::domain::status::Language;
use ordersync_core::finance::{
    discount, recalc_with_discount, round_money, round_percent, split_chunks, tax_rate,
};
use ordersync_db::repositories::{DiscoveryCursor, OrderRepository, ProductRepository};

use crate::crm::{CrmClient, CrmLineItem, RecordKind, SalesOrderPayload, CRM_BATCH_LIMIT};
use crate::errors::SyncError;
use crate::pipeline::{
    crm_line_item, shipping_line_item, upload_chunks, OrderPipeline, Preparation, RetainReason,
};
use crate::scheduler::PeriodicTask;

#[derive(Clone, Debug)]
pub struct PushSettings {
    pub shipping_product_id: String,
    pub batch_limit: usize,
    pub discovery_batch_size: u32,
    pub interval: Duration,
}

impl PushSettings {
    pub fn from_config(crm: &CrmConfig, sync: &SyncConfig) -> Self {
        Self {
            shipping_product_id: crm.shipping_product_id.clone(),
            batch_limit: crm.batch_limit.clamp(1, CRM_BATCH_LIMIT),
            discovery_batch_size: sync.discovery_batch_size,
            interval: sync.push_interval(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    Synced { external_id: String },
    /// Created in the CRM, but some line-item chunks are missing.
    PartiallySynced { external_id: String, uploaded_chunks: usize, total_chunks: usize },
    Retained { reason: RetainReason },
    SkippedB2b,
    AlreadySynced,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PushCycleReport {
    pub discovered: usize,
    pub synced: usize,
    pub partially_synced: usize,
    pub retained: usize,
    pub skipped_b2b: usize,
    pub failed: usize,
    pub stopped_early: bool,
}

impl PushCycleReport {
    fn record(&mut self, outcome: &PushOutcome) {
        match outcome {
            PushOutcome::Synced { .. } => self.synced += 1,
            PushOutcome::PartiallySynced { .. } => self.partially_synced += 1,
            PushOutcome::Retained { .. } => self.retained += 1,
            PushOutcome::SkippedB2b => self.skipped_b2b += 1,
            PushOutcome::AlreadySynced => {}
        }
    }
}

pub struct OrderPushService {
    pipeline: OrderPipeline,
    settings: PushSettings,
}

impl OrderPushService {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        orders: Arc<dyn OrderRepository>,
        products: Arc<dyn ProductRepository>,
        settings: PushSettings,
    ) -> Self {
        Self { pipeline: OrderPipeline::new(crm, orders, products), settings }
    }

    /// One discovery cycle over every unsynced order, fetched in pages of
    /// `discovery_batch_size` past the last order seen. Retained orders stay
    /// behind the cursor, so they never hide newer ones. Failures stay with
    /// their order; the stop signal is honoured between orders.
    pub async fn push_pending(&self, shutdown: &CancellationToken) -> Result<PushCycleReport, SyncError> {
        let page_size = self.settings.discovery_batch_size.max(1);
        let mut report = PushCycleReport::default();
        let mut cursor: Option<DiscoveryCursor> = None;

        'pages: loop {
            let page = self.pipeline.orders().list_unsynced(cursor.as_ref(), page_size).await?;
            let exhausted = page.len() < page_size as usize;
            report.discovered += page.len();
            cursor = page.last().map(DiscoveryCursor::after);

            for order in page {
                if shutdown.is_cancelled() {
                    report.stopped_early = true;
                    break 'pages;
                }

                let order_id = order.id;
                match self.push_order(order, shutdown).await {
                    Ok(outcome) => report.record(&outcome),
                    Err(push_error) => {
                        report.failed += 1;
                        warn!(
                            event_name = "push.order.failed",
                            order_id = %order_id,
                            kind = push_error.kind(),
                            error = %push_error,
                            "order push failed; will retry next cycle"
                        );
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        info!(
            event_name = "push.cycle.completed",
            discovered = report.discovered,
            synced = report.synced,
            partially_synced = report.partially_synced,
            retained = report.retained,
            skipped_b2b = report.skipped_b2b,
            failed = report.failed,
            stopped_early = report.stopped_early,
            "order push cycle completed"
        );
        Ok(report)
    }

    pub async fn push_order_by_id(
        &self,
        id: OrderId,
        shutdown: &CancellationToken,
    ) -> Result<PushOutcome, SyncError> {
        let order = self
            .pipeline
            .orders()
            .find_by_id(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("order `{id}`")))?;
        self.push_order(order, shutdown).await
    }

    pub async fn push_order(
        &self,
        order: CheckoutOrder,
        shutdown: &CancellationToken,
    ) -> Result<PushOutcome, SyncError> {
        if order.is_synced() {
            return Ok(PushOutcome::AlreadySynced);
        }
        if order.product_items().next().is_none() {
            return Ok(retained(order.id, RetainReason::MissingItems));
        }
        let Some(client) = order.client.clone() else {
            return Ok(retained(order.id, RetainReason::MissingClient));
        };

        let orders = self.pipeline.orders();
        if client.is_b2b() {
            orders.set_external_id(order.id, B2B_SENTINEL_EXTERNAL_ID, None).await?;
            info!(event_name = "push.order.b2b", order_id = %order.id, "b2b order excluded from push");
            return Ok(PushOutcome::SkippedB2b);
        }

        if !order.is_balanced() {
            warn!(
                event_name = "push.order.unbalanced",
                order_id = %order.id,
                delta = %order.balance_delta(),
                "stored totals do not add up; discount follows the grand total"
            );
        }

        let (contact_id, mut items) =
            match self.pipeline.prepare(order.id, &client, order.items.clone()).await? {
                Preparation::Ready { contact_id, items } => (contact_id, items),
                Preparation::Retained(reason) => return Ok(retained(order.id, reason)),
            };

        let totals = &order.totals;
        let order_discount = discount(&items, totals.total, totals.tax_value, totals.shipping_value);
        let discount_percent = round_percent(order_discount.percent);
        recalc_with_discount(&mut items, totals.total - totals.tax_value, totals.shipping_value);

        let crm_items = self.crm_items(&items, discount_percent, totals.shipping_value);
        let chunked = split_chunks(crm_items, self.settings.batch_limit);
        let tracking_reference = format!("push-{}", Uuid::new_v4());
        let sub_total: Decimal = items.iter().filter(|item| !item.is_shipping).map(|item| item.total).sum();

        let payload = SalesOrderPayload {
            subject: format!("Order #{}", order.id),
            contact_id,
            currency: order.currency.clone(),
            status: order.status.display_name(Language::English).to_string(),
            items: chunked.embedded,
            sub_total: round_money(sub_total),
            discount: round_money(order_discount.value),
            tax: round_money(totals.tax_value),
            tax_rate: round_money(tax_rate(totals.total, totals.tax_value, totals.shipping_value)),
            shipping: round_money(totals.shipping_value),
            grand_total: round_money(totals.total),
            comment: order.comment.clone(),
            local_order_id: order.id.0,
            tracking_reference: tracking_reference.clone(),
        };

        let external_id = self.pipeline.crm().create_sales_order(&payload).await?;
        match orders.set_external_id(order.id, &external_id, Some(&tracking_reference)).await {
            Ok(true) => {}
            Ok(false) => warn!(
                event_name = "push.order.already_stamped",
                order_id = %order.id,
                external_id = %external_id,
                "order gained an external id while it was being pushed"
            ),
            Err(persist_error) => {
                error!(
                    event_name = "push.order.persist_failed",
                    order_id = %order.id,
                    external_id = %external_id,
                    error = %persist_error,
                    "crm order created but external id not stored; next cycle may duplicate it"
                );
                return Err(persist_error.into());
            }
        }

        let upload = upload_chunks(
            self.pipeline.crm().as_ref(),
            orders.as_ref(),
            RecordKind::SalesOrder,
            order.id,
            &external_id,
            chunked.chunks,
            shutdown,
        )
        .await?;

        info!(
            event_name = "push.order.synced",
            order_id = %order.id,
            external_id = %external_id,
            chunks_uploaded = upload.uploaded,
            chunks_total = upload.total,
            "order pushed to crm"
        );

        if upload.is_complete() {
            Ok(PushOutcome::Synced { external_id })
        } else {
            Ok(PushOutcome::PartiallySynced {
                external_id,
                uploaded_chunks: upload.uploaded,
                total_chunks: upload.total,
            })
        }
    }

    /// Product lines first, then the shipping line: the flagged item when the
    /// order has one, otherwise one synthesized from the shipping value.
    fn crm_items(&self, items: &[LineItem], discount_percent: Decimal, shipping: Decimal) -> Vec<CrmLineItem> {
        let mut crm_items: Vec<CrmLineItem> = items
            .iter()
            .filter(|item| !item.is_shipping)
            .map(|item| crm_line_item(item, discount_percent))
            .collect();

        let shipping_value = items.iter().find(|item| item.is_shipping).map(|item| item.total).unwrap_or(shipping);
        if shipping_value > Decimal::ZERO {
            crm_items.push(shipping_line_item(&self.settings.shipping_product_id, round_money(shipping_value)));
        }
        crm_items
    }
}

fn retained(order_id: OrderId, reason: RetainReason) -> PushOutcome {
    info!(
        event_name = "push.order.retained",
        order_id = %order_id,
        reason = %reason,
        "order retained for a later cycle"
    );
    PushOutcome::Retained { reason }
}

#[async_trait]
impl PeriodicTask for OrderPushService {
    fn name(&self) -> &'static str {
        "order_push"
    }

    fn interval(&self) -> Duration {
        self.settings.interval
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> Result<(), SyncError> {
        self.push_pending(shutdown).await.map(|_| ())
    }
}
