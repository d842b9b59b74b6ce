//! API response models for users.

use crate::types::UserId;
use serde::{Deserialize, Serialize};

/// The signed-in user as seen by the backend.
///
/// Identity (name, id) is owned by the identity provider; the usage counters are owned by the
/// backend and change with every proxied request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub current_request_usage: Option<u64>,
    #[serde(default)]
    pub request_limit: Option<u64>,
    #[serde(default, alias = "subscribed")]
    pub is_subscribed: bool,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("Unnamed User")
    }
}
