//! Steps shared by the sales-order push and the B2B deal builder.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ordersync_core::domain::client::ClientDetails;
use ordersync_core::domain::order::{LineItem, OrderId};
use ordersync_core::domain::product::ProductUid;
use ordersync_db::repositories::{OrderRepository, ProductRepository};

use crate::crm::response::duplicate_record_id;
use crate::crm::{ContactPayload, CrmClient, CrmError, CrmLineItem, RecordKind};
use crate::errors::SyncError;

/// Why an order stays in the discovery queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RetainReason {
    MissingItems,
    MissingClient,
    MissingUid { item_id: i64 },
    UnresolvedProducts(Vec<String>),
    InvalidItem(String),
}

impl fmt::Display for RetainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingItems => write!(f, "order has no product line items"),
            Self::MissingClient => write!(f, "order has no client details"),
            Self::MissingUid { item_id } => write!(f, "line item `{item_id}` has no product uid"),
            Self::UnresolvedProducts(uids) => {
                write!(f, "no crm product for uids: {}", uids.join(", "))
            }
            Self::InvalidItem(message) => write!(f, "{message}"),
        }
    }
}

/// Creates the CRM contact for a client, falling back to the existing record
/// when the CRM reports a duplicate.
pub struct ContactResolver {
    crm: Arc<dyn CrmClient>,
}

impl ContactResolver {
    pub fn new(crm: Arc<dyn CrmClient>) -> Self {
        Self { crm }
    }

    pub async fn resolve(&self, order_id: OrderId, client: &ClientDetails) -> Result<String, SyncError> {
        let payload = ContactPayload::from_client(client);
        match self.crm.create_contact(&payload).await {
            Ok(contact_id) => Ok(contact_id),
            Err(CrmError::Rejected { status, body }) => {
                let Some(existing) = duplicate_record_id(&body) else {
                    return Err(CrmError::Rejected { status, body }.into());
                };

                info!(
                    event_name = "crm.contact.duplicate",
                    order_id = %order_id,
                    contact_id = %existing,
                    "reusing existing crm contact"
                );
                if let Err(error) = self.crm.update_contact(&existing, &payload).await {
                    warn!(
                        event_name = "crm.contact.refresh_failed",
                        order_id = %order_id,
                        contact_id = %existing,
                        error = %error,
                        "failed to refresh existing crm contact"
                    );
                }
                Ok(existing)
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// Line items ready for a CRM payload, or the reason they are not.
#[derive(Debug)]
pub enum Preparation {
    Ready { contact_id: String, items: Vec<LineItem> },
    Retained(RetainReason),
}

/// Validation, contact resolution and product mapping ahead of a CRM write.
pub struct OrderPipeline {
    crm: Arc<dyn CrmClient>,
    orders: Arc<dyn OrderRepository>,
    products: Arc<dyn ProductRepository>,
    contacts: ContactResolver,
}

impl OrderPipeline {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        orders: Arc<dyn OrderRepository>,
        products: Arc<dyn ProductRepository>,
    ) -> Self {
        let contacts = ContactResolver::new(Arc::clone(&crm));
        Self { crm, orders, products, contacts }
    }

    pub fn crm(&self) -> &Arc<dyn CrmClient> {
        &self.crm
    }

    pub fn orders(&self) -> &Arc<dyn OrderRepository> {
        &self.orders
    }

    pub async fn prepare(
        &self,
        order_id: OrderId,
        client: &ClientDetails,
        mut items: Vec<LineItem>,
    ) -> Result<Preparation, SyncError> {
        for item in &items {
            if let Err(error) = item.validate() {
                return Ok(Preparation::Retained(RetainReason::InvalidItem(error.to_string())));
            }
        }

        let contact_id = self.contacts.resolve(order_id, client).await?;

        if let Some(item) = items.iter().find(|item| !item.is_shipping && item.product_uid().is_none()) {
            return Ok(Preparation::Retained(RetainReason::MissingUid { item_id: item.id }));
        }

        let missing = self.resolve_products(order_id, &mut items).await?;
        if !missing.is_empty() {
            return Ok(Preparation::Retained(RetainReason::UnresolvedProducts(missing)));
        }

        Ok(Preparation::Ready { contact_id, items })
    }

    /// Fills empty CRM product ids from the product mapping and persists
    /// whatever was found. Returns the UIDs still without a mapping.
    async fn resolve_products(
        &self,
        order_id: OrderId,
        items: &mut [LineItem],
    ) -> Result<Vec<String>, SyncError> {
        let pending: Vec<ProductUid> = items
            .iter()
            .filter(|item| !item.is_shipping && !item.has_external_product())
            .filter_map(LineItem::product_uid)
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mapped = self.products.resolve_external_ids(&pending).await?;
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for item in items.iter_mut().filter(|item| !item.is_shipping && !item.has_external_product()) {
            let Some(uid) = item.product_uid() else { continue };
            match mapped.get(&uid) {
                Some(external_id) => {
                    item.external_product_id = external_id.clone();
                    resolved.push((item.id, external_id.clone()));
                }
                None if !missing.contains(&uid.0) => missing.push(uid.0),
                None => {}
            }
        }

        if !resolved.is_empty() {
            self.orders.update_line_item_external_ids(order_id, &resolved).await?;
        }
        Ok(missing)
    }
}

pub fn crm_line_item(item: &LineItem, discount_percent: Decimal) -> CrmLineItem {
    CrmLineItem {
        product_id: item.external_product_id.trim().to_string(),
        quantity: item.quantity,
        list_price: item.price,
        discount_percent,
        tax: item.tax,
        total: item.net_total,
    }
}

pub fn shipping_line_item(product_id: &str, value: Decimal) -> CrmLineItem {
    CrmLineItem {
        product_id: product_id.to_string(),
        quantity: 1,
        list_price: value,
        discount_percent: Decimal::ZERO,
        tax: Decimal::ZERO,
        total: value,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkUpload {
    pub uploaded: usize,
    pub total: usize,
}

impl ChunkUpload {
    pub fn is_complete(&self) -> bool {
        self.uploaded == self.total
    }
}

/// Appends the remaining item chunks one call at a time.
///
/// The record already exists, so nothing is rolled back: a failed call or a
/// stop request ends the loop and leaves a sync note on the order.
pub async fn upload_chunks(
    crm: &dyn CrmClient,
    orders: &dyn OrderRepository,
    kind: RecordKind,
    order_id: OrderId,
    record_id: &str,
    chunks: Vec<Vec<CrmLineItem>>,
    shutdown: &CancellationToken,
) -> Result<ChunkUpload, SyncError> {
    let total = chunks.len();
    let mut uploaded = 0;

    for chunk in chunks {
        if shutdown.is_cancelled() {
            let note = format!(
                "{} {record_id}: stopped after {uploaded} of {total} line item chunks",
                kind.module()
            );
            orders.mark_sync_incomplete(order_id, &note).await?;
            warn!(event_name = "sync.chunks.stopped", order_id = %order_id, uploaded, total, "chunk upload stopped");
            return Ok(ChunkUpload { uploaded, total });
        }

        if let Err(error) = crm.append_line_items(kind, record_id, &chunk).await {
            let note = format!(
                "{} {record_id}: uploaded {uploaded} of {total} line item chunks, then failed: {error}",
                kind.module()
            );
            orders.mark_sync_incomplete(order_id, &note).await?;
            warn!(
                event_name = "sync.chunks.failed",
                order_id = %order_id,
                external_id = record_id,
                uploaded,
                total,
                error = %error,
                "line item chunk upload failed"
            );
            return Ok(ChunkUpload { uploaded, total });
        }
        uploaded += 1;
    }

    Ok(ChunkUpload { uploaded, total })
}
