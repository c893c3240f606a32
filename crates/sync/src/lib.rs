pub mod b2b;
pub mod chat;
pub mod crm;
pub mod errors;
pub mod pipeline;
pub mod push;
pub mod scheduler;
pub mod token_cache;
pub mod transport;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use b2b::{B2bDealBuilder, B2bOrder, DealCurrency, DealOutcome};
pub use chat::{ChatProvider, ChatRelay, HttpChatProvider, RelaySettings, TickOutcome};
pub use crm::{CrmClient, CrmError, CrmMessaging, HttpCrmClient};
pub use errors::SyncError;
pub use push::{OrderPushService, PushCycleReport, PushOutcome, PushSettings};
pub use scheduler::{PeriodicTask, Scheduler};
pub use token_cache::{CredentialRefreshTask, OAuthCredentials, OAuthTokenSource};
pub use webhook::{AmendmentEvent, WebhookHandler, WebhookOutcome, WebhookSettings};
