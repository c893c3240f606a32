//! Scripted collaborators and order builders shared by the sync tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::Mutex;

use ordersync_core::domain::chat::{ChatMessage, Conversation, ConversationId};
use ordersync_core::domain::client::ClientDetails;
use ordersync_core::domain::order::{CheckoutOrder, LineItem, OrderId, OrderTotals};
use ordersync_core::domain::status::OrderStatus;

use crate::chat::{ChatError, ChatProvider, Page};
use crate::crm::{
    ContactPayload, CrmClient, CrmError, CrmLineItem, CrmMessaging, DealPayload, RecordKind,
    SalesOrderPayload,
};

pub fn line(id: i64, price_cents: i64, quantity: u32) -> LineItem {
    let price = Decimal::new(price_cents, 2);
    LineItem {
        id,
        uid: format!("uid-{id}"),
        external_product_id: format!("crm-{id}"),
        name: format!("Product {id}"),
        quantity,
        price,
        total: price * Decimal::from(quantity),
        ..LineItem::default()
    }
}

pub fn client() -> ClientDetails {
    ClientDetails {
        name: "Jan Kowalski".to_string(),
        email: "jan@example.com".to_string(),
        country: "Polska".to_string(),
        postal_code: "00950".to_string(),
        ..ClientDetails::default()
    }
}

pub fn order(id: i64, items: Vec<LineItem>, totals: OrderTotals) -> CheckoutOrder {
    CheckoutOrder {
        id: OrderId(id),
        client_ref: format!("client-{id}"),
        items,
        client: Some(client()),
        totals,
        currency: "PLN".to_string(),
        status: OrderStatus::New,
        created_at: Utc::now(),
        external_id: None,
        deal_id: None,
        tracking_reference: None,
        source: "shop".to_string(),
        comment: String::new(),
        sync_note: None,
    }
}

/// One 100.00 line, 23.00 tax, 10.00 discount, grand total 113.00.
pub fn discounted_order(id: i64) -> CheckoutOrder {
    order(
        id,
        vec![line(1, 10_000, 1)],
        OrderTotals {
            total: Decimal::new(11_300, 2),
            sub_total: Decimal::new(10_000, 2),
            tax_value: Decimal::new(2_300, 2),
            discount_value: Decimal::new(1_000, 2),
            ..OrderTotals::default()
        },
    )
}

pub fn text_message(
    conversation: &str,
    id: &str,
    content: &str,
    created_at: DateTime<Utc>,
) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        conversation_id: ConversationId(conversation.to_string()),
        kind: "text".to_string(),
        author: "buyer".to_string(),
        content: content.to_string(),
        created_at,
    }
}

#[derive(Default)]
struct CrmScript {
    duplicate_contact: Option<String>,
    fail_append_call: Option<usize>,
    contacts_created: usize,
    contact_updates: Vec<String>,
    sales_orders: Vec<SalesOrderPayload>,
    deals: Vec<DealPayload>,
    appends: Vec<(RecordKind, String, usize)>,
    append_calls: usize,
}

/// CRM double that records every call and can script conflicts and failures.
#[derive(Default)]
pub struct ScriptedCrm {
    script: Mutex<CrmScript>,
}

impl ScriptedCrm {
    /// Every contact creation is rejected as a duplicate of `existing_id`.
    pub fn with_duplicate_contact(mut self, existing_id: &str) -> Self {
        self.script.get_mut().duplicate_contact = Some(existing_id.to_string());
        self
    }

    /// The `call`-th append (1-based) fails with a transport error.
    pub fn failing_append(mut self, call: usize) -> Self {
        self.script.get_mut().fail_append_call = Some(call);
        self
    }

    pub async fn contacts_created(&self) -> usize {
        self.script.lock().await.contacts_created
    }

    pub async fn contact_updates(&self) -> Vec<String> {
        self.script.lock().await.contact_updates.clone()
    }

    pub async fn sales_orders(&self) -> Vec<SalesOrderPayload> {
        self.script.lock().await.sales_orders.clone()
    }

    pub async fn deals(&self) -> Vec<DealPayload> {
        self.script.lock().await.deals.clone()
    }

    pub async fn appends(&self) -> Vec<(RecordKind, String, usize)> {
        self.script.lock().await.appends.clone()
    }
}

#[async_trait]
impl CrmClient for ScriptedCrm {
    async fn create_contact(&self, _contact: &ContactPayload) -> Result<String, CrmError> {
        let mut script = self.script.lock().await;
        if let Some(existing) = &script.duplicate_contact {
            return Err(CrmError::Rejected {
                status: 400,
                body: json!({
                    "data": [{
                        "code": "DUPLICATE_DATA",
                        "status": "error",
                        "details": { "duplicate_record": { "id": existing } }
                    }]
                }),
            });
        }
        script.contacts_created += 1;
        Ok(format!("contact-{}", script.contacts_created))
    }

    async fn update_contact(&self, id: &str, _contact: &ContactPayload) -> Result<(), CrmError> {
        self.script.lock().await.contact_updates.push(id.to_string());
        Ok(())
    }

    async fn create_sales_order(&self, order: &SalesOrderPayload) -> Result<String, CrmError> {
        let mut script = self.script.lock().await;
        script.sales_orders.push(order.clone());
        Ok(format!("so-{}", script.sales_orders.len()))
    }

    async fn create_deal(&self, deal: &DealPayload) -> Result<String, CrmError> {
        let mut script = self.script.lock().await;
        script.deals.push(deal.clone());
        Ok(format!("deal-{}", script.deals.len()))
    }

    async fn append_line_items(
        &self,
        kind: RecordKind,
        record_id: &str,
        items: &[CrmLineItem],
    ) -> Result<(), CrmError> {
        let mut script = self.script.lock().await;
        script.append_calls += 1;
        if script.fail_append_call == Some(script.append_calls) {
            return Err(CrmError::Transport("connection reset".to_string()));
        }
        script.appends.push((kind, record_id.to_string(), items.len()));
        Ok(())
    }
}

/// Messaging double recording forwarded message ids per conversation.
#[derive(Default)]
pub struct RecordingMessaging {
    forwarded: Mutex<Vec<(String, Vec<String>)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMessaging {
    pub async fn fail_for(&self, conversation: &str) {
        self.failing.lock().await.insert(conversation.to_string());
    }

    pub async fn forwarded(&self) -> Vec<(String, Vec<String>)> {
        self.forwarded.lock().await.clone()
    }
}

#[async_trait]
impl CrmMessaging for RecordingMessaging {
    async fn forward_messages(
        &self,
        conversation: &Conversation,
        messages: &[ChatMessage],
    ) -> Result<(), CrmError> {
        if self.failing.lock().await.contains(&conversation.id.0) {
            return Err(CrmError::Transport("crm unavailable".to_string()));
        }
        self.forwarded.lock().await.push((
            conversation.id.0.clone(),
            messages.iter().map(|message| message.id.clone()).collect(),
        ));
        Ok(())
    }
}

const CONVERSATION_PAGE_SIZE: usize = 2;

/// Chat provider serving fixed conversations two per page.
pub struct FakeChatProvider {
    conversations: Vec<Conversation>,
    messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
    rate_limits: Mutex<HashMap<String, ChatError>>,
    message_requests: Mutex<Vec<String>>,
}

impl FakeChatProvider {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            conversations: ids
                .iter()
                .map(|id| Conversation {
                    id: ConversationId((*id).to_string()),
                    title: format!("Conversation {id}"),
                    updated_at: None,
                })
                .collect(),
            messages: Mutex::new(HashMap::new()),
            rate_limits: Mutex::new(HashMap::new()),
            message_requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn add_message(&self, message: ChatMessage) {
        self.messages
            .lock()
            .await
            .entry(message.conversation_id.0.clone())
            .or_default()
            .push(message);
    }

    /// The next message listing for `conversation` fails with `error`.
    pub async fn rate_limit_once(&self, conversation: &str, error: ChatError) {
        self.rate_limits.lock().await.insert(conversation.to_string(), error);
    }

    pub async fn message_requests(&self) -> Vec<String> {
        self.message_requests.lock().await.clone()
    }

    pub async fn clear_message_requests(&self) {
        self.message_requests.lock().await.clear();
    }
}

#[async_trait]
impl ChatProvider for FakeChatProvider {
    async fn list_conversations(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<Conversation>, ChatError> {
        let offset = cursor.and_then(|cursor| cursor.parse::<usize>().ok()).unwrap_or(0);
        let end = (offset + CONVERSATION_PAGE_SIZE).min(self.conversations.len());
        let items = self.conversations.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < self.conversations.len()).then(|| end.to_string());
        Ok(Page { items, next_cursor })
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
        after: Option<DateTime<Utc>>,
        _cursor: Option<&str>,
    ) -> Result<Page<ChatMessage>, ChatError> {
        self.message_requests.lock().await.push(conversation.0.clone());
        if let Some(error) = self.rate_limits.lock().await.remove(&conversation.0) {
            return Err(error);
        }

        let messages = self.messages.lock().await;
        let items = messages
            .get(&conversation.0)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|message| after.map_or(true, |after| message.created_at > after))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Page::last(items))
    }
}
