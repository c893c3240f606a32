//! Chat provider collaborator and the relay loop that forwards its messages.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use ordersync_core::domain::chat::{ChatMessage, Conversation, ConversationId};

pub mod http;
pub mod relay;

pub use http::HttpChatProvider;
pub use relay::{ChatRelay, RelaySettings, TickOutcome};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ChatError {
    #[error("chat transport failure: {0}")]
    Transport(String),
    #[error("chat provider rate limit hit")]
    RateLimited { retry_after: Option<Duration> },
    #[error("chat provider rejected request with status {status}")]
    Rejected { status: u16, body: String },
    #[error("chat response malformed: {0}")]
    Malformed(String),
}

/// One page of a cursor-paginated listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next_cursor: None }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn list_conversations(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<Conversation>, ChatError>;

    /// Messages of one conversation created after `after`, oldest first.
    async fn list_messages(
        &self,
        conversation: &ConversationId,
        after: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> Result<Page<ChatMessage>, ChatError>;
}
