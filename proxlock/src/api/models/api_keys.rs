//! API request/response models for split API keys.
//!
//! When a key is created the backend splits it: one half stays server-side, the other half
//! (the *partial key*) is returned exactly once in the creation response. Clients send the
//! partial key with proxied requests. The list and read models never carry it.

use crate::types::ApiKeyId;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

// API Key response models
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: ApiKeyId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Identifier sent alongside the partial key when proxying
    #[serde(default)]
    pub association_id: Option<String>,
}

impl ApiKey {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("Unnamed Key")
    }
}

/// Response of a key creation: the key plus its one-time partial key.
///
/// Hand the partial key to [`crate::reveal::SecretReveal`]; it must not be stored anywhere else.
#[derive(Debug)]
pub struct CreatedKey {
    pub key: ApiKey,
    pub partial_key: Option<SecretString>,
}

#[derive(Deserialize)]
pub(crate) struct CreatedKeyBody {
    #[serde(flatten)]
    key: ApiKey,
    #[serde(default, rename = "userPartialKey", alias = "partialKey")]
    partial_key: Option<String>,
}

impl From<CreatedKeyBody> for CreatedKey {
    fn from(body: CreatedKeyBody) -> Self {
        Self {
            key: body.key,
            partial_key: body.partial_key.filter(|k| !k.is_empty()).map(SecretString::from),
        }
    }
}

// API Key request models.
#[derive(Debug)]
pub struct KeyCreate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// The full upstream API key; split by the backend and never stored client-side
    pub api_key: SecretString,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyCreateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    api_key: &'a str,
}

impl KeyCreate {
    pub(crate) fn body(&self) -> KeyCreateBody<'_> {
        KeyCreateBody {
            name: self.name.as_deref(),
            description: self.description.as_deref(),
            api_key: self.api_key.expose_secret(),
        }
    }
}

// API Key update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
