use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use ordersync_core::domain::chat::{ChatMessage, Conversation, ConversationId};

use super::{ChatError, ChatProvider, Page};
use crate::transport::{is_rate_limited, retry_after};

#[derive(Deserialize)]
struct PageBody<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ConversationBody {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct MessageBody {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    text: String,
    created_at: DateTime<Utc>,
}

pub struct HttpChatProvider {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl HttpChatProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: SecretString) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, token }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<PageBody<T>, ChatError> {
        let response = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|error| ChatError::Transport(error.to_string()))?;

        let status = response.status();
        debug!(path, status = status.as_u16(), "chat provider call completed");

        if is_rate_limited(status) {
            return Err(ChatError::RateLimited { retry_after: retry_after(response.headers()) });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Rejected { status: status.as_u16(), body });
        }

        response.json().await.map_err(|error| ChatError::Malformed(error.to_string()))
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn list_conversations(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<Conversation>, ChatError> {
        let query: Vec<(&str, String)> =
            cursor.map(|cursor| vec![("cursor", cursor.to_string())]).unwrap_or_default();
        let page: PageBody<ConversationBody> = self.get_page("conversations", &query).await?;

        Ok(Page {
            items: page
                .data
                .into_iter()
                .map(|body| Conversation {
                    id: ConversationId(body.id),
                    title: body.title,
                    updated_at: body.updated_at,
                })
                .collect(),
            next_cursor: page.next_cursor.filter(|cursor| !cursor.is_empty()),
        })
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
        after: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> Result<Page<ChatMessage>, ChatError> {
        let mut query = Vec::new();
        if let Some(after) = after {
            query.push(("after", after.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let path = format!("conversations/{}/messages", conversation.0);
        let page: PageBody<MessageBody> = self.get_page(&path, &query).await?;

        Ok(Page {
            items: page
                .data
                .into_iter()
                .map(|body| ChatMessage {
                    id: body.id,
                    conversation_id: conversation.clone(),
                    kind: body.kind,
                    author: body.author,
                    content: body.text,
                    created_at: body.created_at,
                })
                .collect(),
            next_cursor: page.next_cursor.filter(|cursor| !cursor.is_empty()),
        })
    }
}
