//! CRM collaborator: the calls the sync engine makes and the payloads it sends.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use ordersync_core::domain::chat::{ChatMessage, Conversation};
use ordersync_core::domain::client::ClientDetails;

pub mod http;
pub mod response;

pub use http::HttpCrmClient;

/// Maximum number of line items the CRM accepts in one call.
pub const CRM_BATCH_LIMIT: usize = 100;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CrmError {
    #[error("crm transport failure: {0}")]
    Transport(String),
    #[error("crm rate limit hit")]
    RateLimited { retry_after: Option<Duration> },
    #[error("crm rejected request with status {status}")]
    Rejected { status: u16, body: serde_json::Value },
    #[error("crm response malformed: {0}")]
    Malformed(String),
    #[error("crm authorization failed: {0}")]
    Unauthorized(String),
}

/// Module a line-item chunk is appended to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    SalesOrder,
    Deal,
}

impl RecordKind {
    pub fn module(self) -> &'static str {
        match self {
            Self::SalesOrder => "Sales_Orders",
            Self::Deal => "Deals",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContactPayload {
    #[serde(rename = "First_Name")]
    pub first_name: String,
    #[serde(rename = "Last_Name")]
    pub last_name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Mailing_Street")]
    pub street: String,
    #[serde(rename = "Mailing_City")]
    pub city: String,
    #[serde(rename = "Mailing_Zip")]
    pub postal_code: String,
    #[serde(rename = "Mailing_Country")]
    pub country: String,
    #[serde(rename = "Tax_Id", skip_serializing_if = "String::is_empty")]
    pub tax_id: String,
}

impl ContactPayload {
    pub fn from_client(client: &ClientDetails) -> Self {
        let (first_name, last_name) = client.split_name();
        Self {
            first_name,
            last_name,
            email: client.email.trim().to_string(),
            phone: client.phone.trim().to_string(),
            street: client.street.trim().to_string(),
            city: client.city.trim().to_string(),
            postal_code: client.normalized_postal_code(),
            country: client.country_code(),
            tax_id: client.tax_id.trim().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrmLineItem {
    #[serde(rename = "Product_Id")]
    pub product_id: String,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "List_Price", with = "rust_decimal::serde::float")]
    pub list_price: Decimal,
    #[serde(rename = "Discount_Percent", with = "rust_decimal::serde::float")]
    pub discount_percent: Decimal,
    #[serde(rename = "Tax", with = "rust_decimal::serde::float")]
    pub tax: Decimal,
    /// Line value after discount.
    #[serde(rename = "Total", with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SalesOrderPayload {
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Contact_Id")]
    pub contact_id: String,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Line_Items")]
    pub items: Vec<CrmLineItem>,
    #[serde(rename = "Sub_Total", with = "rust_decimal::serde::float")]
    pub sub_total: Decimal,
    #[serde(rename = "Discount", with = "rust_decimal::serde::float")]
    pub discount: Decimal,
    #[serde(rename = "Tax", with = "rust_decimal::serde::float")]
    pub tax: Decimal,
    #[serde(rename = "Tax_Rate", with = "rust_decimal::serde::float")]
    pub tax_rate: Decimal,
    #[serde(rename = "Shipping", with = "rust_decimal::serde::float")]
    pub shipping: Decimal,
    #[serde(rename = "Grand_Total", with = "rust_decimal::serde::float")]
    pub grand_total: Decimal,
    #[serde(rename = "Description", skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(rename = "Local_Order_Id")]
    pub local_order_id: i64,
    #[serde(rename = "Tracking_Reference")]
    pub tracking_reference: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DealPayload {
    #[serde(rename = "Deal_Name")]
    pub deal_name: String,
    #[serde(rename = "Contact_Id")]
    pub contact_id: String,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "Line_Items")]
    pub items: Vec<CrmLineItem>,
    #[serde(rename = "Discount_Percent", with = "rust_decimal::serde::float")]
    pub discount_percent: Decimal,
    #[serde(rename = "Vat_Rate", with = "rust_decimal::serde::float")]
    pub vat_rate: Decimal,
    #[serde(rename = "Exchange_Rate", with = "rust_decimal::serde::float")]
    pub exchange_rate: Decimal,
    #[serde(rename = "Sub_Total", with = "rust_decimal::serde::float")]
    pub sub_total: Decimal,
    #[serde(rename = "Total_Vat", with = "rust_decimal::serde::float")]
    pub total_vat: Decimal,
    #[serde(
        rename = "Amount_PLN",
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount_pln: Option<Decimal>,
    #[serde(
        rename = "Amount_EUR",
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount_eur: Option<Decimal>,
    #[serde(
        rename = "Amount_USD",
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount_usd: Option<Decimal>,
    #[serde(
        rename = "Amount_GBP",
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount_gbp: Option<Decimal>,
    #[serde(rename = "Local_Order_Id")]
    pub local_order_id: i64,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Creates a contact and returns its CRM id. A duplicate surfaces as
    /// [`CrmError::Rejected`] carrying the raw response body.
    async fn create_contact(&self, contact: &ContactPayload) -> Result<String, CrmError>;

    async fn update_contact(&self, id: &str, contact: &ContactPayload) -> Result<(), CrmError>;

    async fn create_sales_order(&self, order: &SalesOrderPayload) -> Result<String, CrmError>;

    async fn create_deal(&self, deal: &DealPayload) -> Result<String, CrmError>;

    /// Appends at most [`CRM_BATCH_LIMIT`] items to an existing record.
    async fn append_line_items(
        &self,
        kind: RecordKind,
        record_id: &str,
        items: &[CrmLineItem],
    ) -> Result<(), CrmError>;
}

#[async_trait]
pub trait CrmMessaging: Send + Sync {
    async fn forward_messages(
        &self,
        conversation: &Conversation,
        messages: &[ChatMessage],
    ) -> Result<(), CrmError>;
}
