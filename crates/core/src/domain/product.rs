use serde::{Deserialize, Serialize};

/// Stable internal product key carried by every line item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductUid(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub uid: ProductUid,
    pub name: String,
    pub external_id: Option<String>,
}

impl Product {
    pub fn is_mapped(&self) -> bool {
        self.external_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}
