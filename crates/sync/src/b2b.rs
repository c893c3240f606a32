//! Deals for business customers, built from a pre-totalled order.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use ordersync_core::domain::client::ClientDetails;
use ordersync_core::domain::order::{LineItem, OrderId};
use ordersync_core::errors::DomainError;
use ordersync_core::finance::{recalc_with_discount, round_money, round_percent, split_chunks};
use ordersync_db::repositories::{OrderRepository, ProductRepository};

use crate::crm::{CrmClient, DealPayload, RecordKind, CRM_BATCH_LIMIT};
use crate::errors::SyncError;
use crate::pipeline::{crm_line_item, upload_chunks, OrderPipeline, Preparation, RetainReason};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct B2bOrder {
    pub order_id: OrderId,
    pub client: ClientDetails,
    pub items: Vec<LineItem>,
    pub currency: String,
    /// Net value of the goods before `discount_percent` is applied.
    pub subtotal: Decimal,
    pub total_vat: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
}

impl B2bOrder {
    /// What the lines add up to once the discount is taken off `subtotal`.
    pub fn discounted_subtotal(&self) -> Decimal {
        round_money(self.subtotal * (Decimal::ONE_HUNDRED - self.discount_percent) / Decimal::ONE_HUNDRED)
    }
}

/// Currencies with a dedicated amount field on the deal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DealCurrency {
    Pln,
    Eur,
    Usd,
    Gbp,
}

impl FromStr for DealCurrency {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PLN" => Ok(Self::Pln),
            "EUR" => Ok(Self::Eur),
            "USD" => Ok(Self::Usd),
            "GBP" => Ok(Self::Gbp),
            _ => Err(DomainError::UnsupportedCurrency(value.trim().to_string())),
        }
    }
}

impl DealCurrency {
    pub fn code(self) -> &'static str {
        match self {
            Self::Pln => "PLN",
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Gbp => "GBP",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DealOutcome {
    Created { deal_id: String, uploaded_chunks: usize, total_chunks: usize },
    AlreadyExists { deal_id: String },
    Retained { reason: RetainReason },
}

/// `total_vat` as a percentage of `subtotal`; zero for an empty subtotal.
pub fn vat_rate(subtotal: Decimal, total_vat: Decimal) -> Decimal {
    if subtotal.is_zero() {
        return Decimal::ZERO;
    }
    total_vat * Decimal::ONE_HUNDRED / subtotal
}

pub struct B2bDealBuilder {
    pipeline: OrderPipeline,
    batch_limit: usize,
}

impl B2bDealBuilder {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        orders: Arc<dyn OrderRepository>,
        products: Arc<dyn ProductRepository>,
        batch_limit: usize,
    ) -> Self {
        Self {
            pipeline: OrderPipeline::new(crm, orders, products),
            batch_limit: batch_limit.clamp(1, CRM_BATCH_LIMIT),
        }
    }

    pub async fn push_deal(
        &self,
        order: B2bOrder,
        shutdown: &CancellationToken,
    ) -> Result<DealOutcome, SyncError> {
        let currency: DealCurrency = order.currency.parse()?;
        if order.discount_percent.is_sign_negative() || order.discount_percent > Decimal::ONE_HUNDRED {
            return Err(SyncError::Validation(format!(
                "discount percent {} is outside 0..=100",
                order.discount_percent
            )));
        }
        let orders = self.pipeline.orders();
        let stored = orders
            .find_by_id(order.order_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("order `{}`", order.order_id)))?;
        if let Some(deal_id) = stored.deal_id.filter(|deal_id| !deal_id.trim().is_empty()) {
            return Ok(DealOutcome::AlreadyExists { deal_id });
        }
        if !order.items.iter().any(|item| !item.is_shipping) {
            return Ok(DealOutcome::Retained { reason: RetainReason::MissingItems });
        }

        let (contact_id, mut items) =
            match self.pipeline.prepare(order.order_id, &order.client, order.items.clone()).await? {
                Preparation::Ready { contact_id, items } => (contact_id, items),
                Preparation::Retained(reason) => return Ok(DealOutcome::Retained { reason }),
            };

        let discount_percent = round_percent(order.discount_percent);
        recalc_with_discount(&mut items, order.discounted_subtotal(), Decimal::ZERO);
        let crm_items = items
            .iter()
            .filter(|item| !item.is_shipping)
            .map(|item| crm_line_item(item, discount_percent))
            .collect();
        let chunked = split_chunks(crm_items, self.batch_limit);

        let amount = Some(round_money(order.total));
        let mut deal = DealPayload {
            deal_name: format!("B2B order #{}", order.order_id),
            contact_id,
            currency: currency.code().to_string(),
            items: chunked.embedded,
            discount_percent,
            vat_rate: round_money(vat_rate(order.subtotal, order.total_vat)),
            exchange_rate: Decimal::ONE,
            sub_total: round_money(order.subtotal),
            total_vat: round_money(order.total_vat),
            amount_pln: None,
            amount_eur: None,
            amount_usd: None,
            amount_gbp: None,
            local_order_id: order.order_id.0,
        };
        match currency {
            DealCurrency::Pln => deal.amount_pln = amount,
            DealCurrency::Eur => deal.amount_eur = amount,
            DealCurrency::Usd => deal.amount_usd = amount,
            DealCurrency::Gbp => deal.amount_gbp = amount,
        }

        let crm = self.pipeline.crm();
        let deal_id = crm.create_deal(&deal).await?;
        orders.set_deal_id(order.order_id, &deal_id).await?;

        let upload = upload_chunks(
            crm.as_ref(),
            orders.as_ref(),
            RecordKind::Deal,
            order.order_id,
            &deal_id,
            chunked.chunks,
            shutdown,
        )
        .await?;

        info!(
            event_name = "b2b.deal.created",
            order_id = %order.order_id,
            deal_id = %deal_id,
            currency = currency.code(),
            chunks_uploaded = upload.uploaded,
            chunks_total = upload.total,
            "b2b deal created"
        );
        Ok(DealOutcome::Created { deal_id, uploaded_chunks: upload.uploaded, total_chunks: upload.total })
    }
}
