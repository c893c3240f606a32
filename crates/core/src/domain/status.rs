use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Display language of a status name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    English,
    Polish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    AwaitingPayment,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Returned,
    OnHold,
}

struct StatusEntry {
    status: OrderStatus,
    id: i64,
    code: &'static str,
    english: &'static str,
    polish: &'static str,
}

const STATUS_TABLE: &[StatusEntry] = &[
    StatusEntry { status: OrderStatus::New, id: 1, code: "new", english: "New", polish: "Nowe" },
    StatusEntry {
        status: OrderStatus::AwaitingPayment,
        id: 2,
        code: "awaiting_payment",
        english: "Awaiting payment",
        polish: "Oczekuje na płatność",
    },
    StatusEntry { status: OrderStatus::Paid, id: 3, code: "paid", english: "Paid", polish: "Opłacone" },
    StatusEntry {
        status: OrderStatus::Processing,
        id: 4,
        code: "processing",
        english: "Processing",
        polish: "W realizacji",
    },
    StatusEntry {
        status: OrderStatus::Shipped,
        id: 5,
        code: "shipped",
        english: "Shipped",
        polish: "Wysłane",
    },
    StatusEntry {
        status: OrderStatus::Delivered,
        id: 6,
        code: "delivered",
        english: "Delivered",
        polish: "Dostarczone",
    },
    StatusEntry {
        status: OrderStatus::Completed,
        id: 7,
        code: "completed",
        english: "Completed",
        polish: "Zakończone",
    },
    StatusEntry {
        status: OrderStatus::Cancelled,
        id: 8,
        code: "cancelled",
        english: "Cancelled",
        polish: "Anulowane",
    },
    StatusEntry {
        status: OrderStatus::Returned,
        id: 9,
        code: "returned",
        english: "Returned",
        polish: "Zwrócone",
    },
    StatusEntry {
        status: OrderStatus::OnHold,
        id: 10,
        code: "on_hold",
        english: "On hold",
        polish: "Wstrzymane",
    },
];

impl OrderStatus {
    fn entry(self) -> &'static StatusEntry {
        // rows are declared in variant order
        let index = match self {
            Self::New => 0,
            Self::AwaitingPayment => 1,
            Self::Paid => 2,
            Self::Processing => 3,
            Self::Shipped => 4,
            Self::Delivered => 5,
            Self::Completed => 6,
            Self::Cancelled => 7,
            Self::Returned => 8,
            Self::OnHold => 9,
        };
        &STATUS_TABLE[index]
    }

    pub fn id(self) -> i64 {
        self.entry().id
    }

    pub fn as_str(self) -> &'static str {
        self.entry().code
    }

    pub fn display_name(self, language: Language) -> &'static str {
        let entry = self.entry();
        match language {
            Language::English => entry.english,
            Language::Polish => entry.polish,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        STATUS_TABLE.iter().find(|entry| entry.id == id).map(|entry| entry.status)
    }

    /// Reverse lookup used for CRM-supplied names. Accepts the code, the
    /// English name or the Polish name, ignoring case and repeated whitespace.
    pub fn from_display_name(name: &str) -> Option<Self> {
        let wanted = normalize_name(name);
        if wanted.is_empty() {
            return None;
        }

        STATUS_TABLE
            .iter()
            .find(|entry| {
                [entry.code, entry.english, entry.polish]
                    .iter()
                    .any(|candidate| normalize_name(candidate) == wanted)
            })
            .map(|entry| entry.status)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_display_name(value).ok_or_else(|| DomainError::UnknownStatus(value.to_string()))
    }
}

fn normalize_name(raw: &str) -> String {
    raw.split(|ch: char| ch.is_whitespace() || ch == '_')
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
