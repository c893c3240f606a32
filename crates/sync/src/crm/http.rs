use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use ordersync_core::domain::chat::{ChatMessage, Conversation};

use super::response::{ensure_succeeded, record_id};
use super::{
    ContactPayload, CrmClient, CrmError, CrmLineItem, CrmMessaging, DealPayload, RecordKind,
    SalesOrderPayload,
};
use crate::token_cache::AccessTokenSource;
use crate::transport::{is_rate_limited, retry_after};

/// CRM REST client. Records are wrapped as `{"data": [record]}`.
pub struct HttpCrmClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl HttpCrmClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, tokens }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(u16, Value), CrmError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .request(method.clone(), self.url(path))
            .header("Authorization", format!("Zoho-oauthtoken {}", token.expose_secret()))
            .json(body)
            .send()
            .await
            .map_err(|error| CrmError::Transport(error.to_string()))?;

        let status = response.status();
        debug!(method = %method, path, status = status.as_u16(), "crm call completed");

        if is_rate_limited(status) {
            return Err(CrmError::RateLimited { retry_after: retry_after(response.headers()) });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
            return Err(CrmError::Unauthorized(format!("{method} {path} returned 401")));
        }

        let text = response.text().await.map_err(|error| CrmError::Transport(error.to_string()))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            warn!(method = %method, path, status = status.as_u16(), "crm rejected request");
            return Err(CrmError::Rejected { status: status.as_u16(), body });
        }

        Ok((status.as_u16(), body))
    }

    async fn create(&self, module: &str, record: Value) -> Result<String, CrmError> {
        let (status, body) = self.send(Method::POST, module, &json!({ "data": [record] })).await?;
        record_id(status, &body)
    }
}

fn to_record<T: Serialize>(payload: &T) -> Result<Value, CrmError> {
    serde_json::to_value(payload)
        .map_err(|error| CrmError::Malformed(format!("failed to encode payload: {error}")))
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn create_contact(&self, contact: &ContactPayload) -> Result<String, CrmError> {
        self.create("Contacts", to_record(contact)?).await
    }

    async fn update_contact(&self, id: &str, contact: &ContactPayload) -> Result<(), CrmError> {
        let mut record = to_record(contact)?;
        if let Value::Object(fields) = &mut record {
            fields.insert("id".to_string(), Value::String(id.to_string()));
        }
        let (status, body) =
            self.send(Method::PUT, &format!("Contacts/{id}"), &json!({ "data": [record] })).await?;
        ensure_succeeded(status, &body)
    }

    async fn create_sales_order(&self, order: &SalesOrderPayload) -> Result<String, CrmError> {
        self.create(RecordKind::SalesOrder.module(), to_record(order)?).await
    }

    async fn create_deal(&self, deal: &DealPayload) -> Result<String, CrmError> {
        self.create(RecordKind::Deal.module(), to_record(deal)?).await
    }

    async fn append_line_items(
        &self,
        kind: RecordKind,
        record_id: &str,
        items: &[CrmLineItem],
    ) -> Result<(), CrmError> {
        let path = format!("{}/{record_id}/Line_Items", kind.module());
        let (status, body) = self.send(Method::POST, &path, &json!({ "data": items })).await?;
        ensure_succeeded(status, &body)
    }
}

#[async_trait]
impl CrmMessaging for HttpCrmClient {
    async fn forward_messages(
        &self,
        conversation: &Conversation,
        messages: &[ChatMessage],
    ) -> Result<(), CrmError> {
        let records: Vec<Value> = messages
            .iter()
            .map(|message| {
                json!({
                    "Conversation_Id": conversation.id.0,
                    "Conversation_Title": conversation.title,
                    "Message_Id": message.id,
                    "Author": message.author,
                    "Content": message.content,
                    "Sent_At": message.created_at.to_rfc3339(),
                })
            })
            .collect();

        let (status, body) =
            self.send(Method::POST, "Chat_Messages", &json!({ "data": records })).await?;
        ensure_succeeded(status, &body)
    }
}
