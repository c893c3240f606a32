pub mod address;
pub mod config;
pub mod domain;
pub mod errors;
pub mod finance;

pub use domain::chat::{ChatMessage, Conversation, ConversationId};
pub use domain::client::ClientDetails;
pub use domain::order::{
    CheckoutOrder, HistoryEntry, LineItem, OrderAmendment, OrderId, OrderTotals,
    B2B_SENTINEL_EXTERNAL_ID,
};
pub use domain::product::{Product, ProductUid};
pub use domain::status::{Language, OrderStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use finance::{Chunked, Discount};
