use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientDetails;
use crate::domain::product::ProductUid;
use crate::domain::status::OrderStatus;
use crate::errors::DomainError;

/// External id stamped on business orders so consumer discovery skips them.
pub const B2B_SENTINEL_EXTERNAL_ID: &str = "B2B";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub i64);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub uid: String,
    pub external_product_id: String,
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
    pub tax: Decimal,
    /// Pre-discount line value.
    pub total: Decimal,
    pub discount_percent: Decimal,
    /// Line value after discount.
    pub net_total: Decimal,
    pub is_shipping: bool,
}

impl LineItem {
    pub fn gross_value(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    pub fn product_uid(&self) -> Option<ProductUid> {
        let uid = self.uid.trim();
        (!uid.is_empty()).then(|| ProductUid(uid.to_string()))
    }

    pub fn has_external_product(&self) -> bool {
        !self.external_product_id.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity == 0 {
            return Err(DomainError::InvariantViolation(format!(
                "line item `{}` has zero quantity",
                self.id
            )));
        }
        if self.price.is_sign_negative() && !self.price.is_zero() {
            return Err(DomainError::InvariantViolation(format!(
                "line item `{}` has negative price",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub total: Decimal,
    pub sub_total: Decimal,
    pub tax_value: Decimal,
    pub tax_title: String,
    pub shipping_value: Decimal,
    pub shipping_title: String,
    pub discount_value: Decimal,
    pub discount_percent: Decimal,
    pub coupon_value: Decimal,
    pub coupon_title: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutOrder {
    pub id: OrderId,
    pub client_ref: String,
    pub items: Vec<LineItem>,
    pub client: Option<ClientDetails>,
    pub totals: OrderTotals,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// CRM record id; its presence is the sync barrier.
    pub external_id: Option<String>,
    pub deal_id: Option<String>,
    /// Marker written by our own pushes so the CRM echo webhook can be ignored.
    pub tracking_reference: Option<String>,
    pub source: String,
    pub comment: String,
    pub sync_note: Option<String>,
}

impl CheckoutOrder {
    pub fn is_synced(&self) -> bool {
        non_empty(self.external_id.as_deref())
    }

    pub fn has_tracking_reference(&self) -> bool {
        non_empty(self.tracking_reference.as_deref())
    }

    pub fn product_items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(|item| !item.is_shipping)
    }

    pub fn shipping_item(&self) -> Option<&LineItem> {
        self.items.iter().find(|item| item.is_shipping)
    }

    /// `Σ product totals + tax + shipping − discount − coupon − grand total`.
    pub fn balance_delta(&self) -> Decimal {
        balance_delta(&self.items, &self.totals)
    }

    pub fn is_balanced(&self) -> bool {
        within_tolerance(self.balance_delta())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub order_id: OrderId,
    pub event: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Everything a CRM amendment rewrites; applied as one unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderAmendment {
    pub order_id: OrderId,
    pub items: Vec<LineItem>,
    pub totals: OrderTotals,
    pub history: HistoryEntry,
}

impl OrderAmendment {
    /// Balance of the order as it will read once the amendment is applied.
    pub fn balance_delta(&self) -> Decimal {
        balance_delta(&self.items, &self.totals)
    }

    pub fn is_balanced(&self) -> bool {
        within_tolerance(self.balance_delta())
    }
}

fn balance_delta(items: &[LineItem], totals: &OrderTotals) -> Decimal {
    let products: Decimal =
        items.iter().filter(|item| !item.is_shipping).map(|item| item.total).sum();
    products + totals.tax_value + totals.shipping_value
        - totals.discount_value
        - totals.coupon_value
        - totals.total
}

fn within_tolerance(delta: Decimal) -> bool {
    delta.abs() <= Decimal::new(1, 2)
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|value| !value.trim().is_empty())
}
