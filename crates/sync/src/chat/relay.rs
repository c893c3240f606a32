use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ordersync_core::config::ChatConfig;
use ordersync_core::domain::chat::{ChatMessage, Conversation, ConversationId};
use ordersync_db::repositories::WatermarkRepository;

use super::ChatProvider;
use crate::crm::CrmMessaging;
use crate::errors::SyncError;
use crate::scheduler::PeriodicTask;

#[derive(Clone, Debug)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub max_conversations_per_tick: usize,
    pub conversation_delay: Duration,
    pub default_backoff: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_conversations_per_tick: config.max_conversations_per_tick,
            conversation_delay: config.conversation_delay(),
            default_backoff: config.default_backoff(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    SkippedBackoff,
    Completed { processed: usize, forwarded: usize },
    /// `resume_at` is where the next tick starts; `None` when the listing
    /// itself was throttled.
    RateLimited { resume_at: Option<ConversationId>, retry_after: Duration },
    Stopped { processed: usize },
}

/// Cursors already followed within one paginated listing.
#[derive(Default)]
struct CursorTrail {
    seen: HashSet<String>,
}

impl CursorTrail {
    /// The cursor to request next. `None` ends the listing, also when the
    /// provider hands back a cursor it already gave or pages without items.
    fn follow(&mut self, listing: &'static str, fetched: usize, next: Option<String>) -> Option<String> {
        let next = next?;
        if fetched == 0 || !self.seen.insert(next.clone()) {
            warn!(
                event_name = "chat.pagination.stalled",
                listing,
                cursor = %next,
                fetched,
                "provider pagination made no progress; listing ends here"
            );
            return None;
        }
        Some(next)
    }
}

#[derive(Default)]
struct RelayState {
    backoff_until: RwLock<Option<Instant>>,
    resume_cursor: RwLock<Option<ConversationId>>,
    watermarks: RwLock<Option<HashMap<ConversationId, DateTime<Utc>>>>,
}

/// Forwards new chat messages into the CRM, one conversation at a time.
///
/// Watermarks only move after the CRM accepted a batch. A rate limit from
/// either side pauses the relay and remembers the interrupted conversation so
/// the next tick starts there.
pub struct ChatRelay {
    provider: Arc<dyn ChatProvider>,
    crm: Arc<dyn CrmMessaging>,
    watermarks: Arc<dyn WatermarkRepository>,
    settings: RelaySettings,
    state: RelayState,
}

impl ChatRelay {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        crm: Arc<dyn CrmMessaging>,
        watermarks: Arc<dyn WatermarkRepository>,
        settings: RelaySettings,
    ) -> Self {
        Self { provider, crm, watermarks, settings, state: RelayState::default() }
    }

    pub async fn resume_cursor(&self) -> Option<ConversationId> {
        self.state.resume_cursor.read().await.clone()
    }

    pub async fn backoff_active(&self) -> bool {
        self.state.backoff_until.read().await.is_some_and(|until| until > Instant::now())
    }

    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<TickOutcome, SyncError> {
        if self.backoff_active().await {
            debug!(event_name = "chat.relay.backoff", "chat relay paused by rate limit");
            return Ok(TickOutcome::SkippedBackoff);
        }

        self.ensure_watermarks_loaded().await?;

        let conversations = match self.list_all_conversations().await {
            Ok(conversations) => conversations,
            Err(SyncError::RateLimited { retry_after }) => {
                let retry_after = self.enter_backoff(retry_after).await;
                return Ok(TickOutcome::RateLimited { resume_at: self.resume_cursor().await, retry_after });
            }
            Err(error) => return Err(error),
        };

        let resume = self.state.resume_cursor.write().await.take();
        let start = resume
            .as_ref()
            .and_then(|cursor| conversations.iter().position(|conversation| &conversation.id == cursor))
            .unwrap_or(0);
        if let Some(cursor) = &resume {
            info!(
                event_name = "chat.relay.resume",
                conversation_id = %cursor,
                skipped = start,
                "resuming chat relay after rate limit"
            );
        }

        let mut processed = 0;
        let mut forwarded = 0;
        let batch = conversations.iter().skip(start).take(self.settings.max_conversations_per_tick);

        for (index, conversation) in batch.enumerate() {
            if index > 0 && !self.settings.conversation_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.conversation_delay) => {}
                }
            }
            if shutdown.is_cancelled() {
                return Ok(TickOutcome::Stopped { processed });
            }
            if self.backoff_active().await {
                *self.state.resume_cursor.write().await = Some(conversation.id.clone());
                return Ok(TickOutcome::SkippedBackoff);
            }

            match self.relay_conversation(conversation).await {
                Ok(count) => {
                    processed += 1;
                    forwarded += count;
                }
                Err(SyncError::RateLimited { retry_after }) => {
                    *self.state.resume_cursor.write().await = Some(conversation.id.clone());
                    let retry_after = self.enter_backoff(retry_after).await;
                    warn!(
                        event_name = "chat.relay.rate_limited",
                        conversation_id = %conversation.id,
                        retry_after_secs = retry_after.as_secs(),
                        "chat relay interrupted by rate limit"
                    );
                    return Ok(TickOutcome::RateLimited {
                        resume_at: Some(conversation.id.clone()),
                        retry_after,
                    });
                }
                Err(error) => {
                    warn!(
                        event_name = "chat.relay.conversation_failed",
                        conversation_id = %conversation.id,
                        kind = error.kind(),
                        error = %error,
                        "failed to relay conversation"
                    );
                }
            }
        }

        info!(
            event_name = "chat.relay.tick",
            processed,
            forwarded,
            "chat relay tick completed"
        );
        Ok(TickOutcome::Completed { processed, forwarded })
    }

    async fn ensure_watermarks_loaded(&self) -> Result<(), SyncError> {
        if self.state.watermarks.read().await.is_some() {
            return Ok(());
        }
        let mut cache = self.state.watermarks.write().await;
        if cache.is_none() {
            *cache = Some(self.watermarks.load_all().await?);
        }
        Ok(())
    }

    async fn watermark(&self, id: &ConversationId) -> Option<DateTime<Utc>> {
        self.state.watermarks.read().await.as_ref().and_then(|cache| cache.get(id).copied())
    }

    async fn list_all_conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        let mut conversations = Vec::new();
        let mut trail = CursorTrail::default();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.provider.list_conversations(cursor.as_deref()).await?;
            let fetched = page.items.len();
            conversations.extend(page.items);
            match trail.follow("conversations", fetched, page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(conversations)
    }

    async fn relay_conversation(&self, conversation: &Conversation) -> Result<usize, SyncError> {
        let watermark = self.watermark(&conversation.id).await;
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut trail = CursorTrail::default();
        let mut cursor: Option<String> = None;
        loop {
            let page =
                self.provider.list_messages(&conversation.id, watermark, cursor.as_deref()).await?;
            let fetched = page.items.len();
            messages.extend(page.items.into_iter().filter(|message| {
                message.is_relayable() && watermark.map_or(true, |mark| message.created_at > mark)
            }));
            match trail.follow("messages", fetched, page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let Some(newest) = messages.iter().map(|message| message.created_at).max() else {
            return Ok(0);
        };
        messages.sort_by_key(|message| message.created_at);

        self.crm.forward_messages(conversation, &messages).await?;
        self.watermarks.save(&conversation.id, newest).await?;
        if let Some(cache) = self.state.watermarks.write().await.as_mut() {
            cache.insert(conversation.id.clone(), newest);
        }

        debug!(
            event_name = "chat.relay.forwarded",
            conversation_id = %conversation.id,
            count = messages.len(),
            "chat messages forwarded"
        );
        Ok(messages.len())
    }

    async fn enter_backoff(&self, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or(self.settings.default_backoff);
        *self.state.backoff_until.write().await = Some(Instant::now() + delay);
        delay
    }
}

#[async_trait]
impl PeriodicTask for ChatRelay {
    fn name(&self) -> &'static str {
        "chat_relay"
    }

    fn interval(&self) -> Duration {
        self.settings.poll_interval
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> Result<(), SyncError> {
        self.tick(shutdown).await.map(|_| ())
    }
}
