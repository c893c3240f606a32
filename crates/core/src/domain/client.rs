use serde::{Deserialize, Serialize};

use crate::address::{country_code, normalize_postal_code};

/// Client groups that belong to business accounts.
pub const B2B_GROUP_IDS: [i64; 5] = [6, 7, 16, 18, 19];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub country: String,
    pub postal_code: String,
    pub city: String,
    pub street: String,
    pub tax_id: String,
    pub group_id: Option<i64>,
}

impl ClientDetails {
    pub fn is_b2b(&self) -> bool {
        self.group_id.is_some_and(|group| B2B_GROUP_IDS.contains(&group))
    }

    pub fn country_code(&self) -> String {
        country_code(&self.country)
    }

    pub fn normalized_postal_code(&self) -> String {
        normalize_postal_code(&self.postal_code)
    }

    /// Splits the stored full name into first and last name; a single word
    /// becomes the last name.
    pub fn split_name(&self) -> (String, String) {
        let trimmed = self.name.trim();
        match trimmed.rsplit_once(char::is_whitespace) {
            Some((first, last)) => (first.trim().to_string(), last.trim().to_string()),
            None => (String::new(), trimmed.to_string()),
        }
    }
}
