//! API request/response models for Apple DeviceCheck credentials.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{Error, Result};

/// Apple developer team identifier: exactly ten characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TeamId(String);

impl TeamId {
    pub const LEN: usize = 10;

    /// Accepts the input only when it is exactly [`TeamId::LEN`] characters long.
    pub fn parse(input: &str) -> Result<Self> {
        let len = input.chars().count();
        if len != Self::LEN {
            return Err(Error::Validation {
                message: format!("Team ID must be exactly {} characters (got {len})", Self::LEN),
            });
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCheckCredential {
    #[serde(rename = "teamID")]
    pub team_id: String,
    #[serde(rename = "keyID")]
    pub key_id: String,
    /// Server-issued token that lets development builds skip attestation
    #[serde(default, rename = "bypassToken")]
    pub bypass_token: Option<String>,
}

/// Upload of a new credential. The private key blob is sent once and not retained.
#[derive(Debug)]
pub struct DeviceCheckUpload {
    pub team_id: TeamId,
    pub key_id: String,
    pub private_key: SecretString,
}

#[derive(Serialize)]
pub(crate) struct DeviceCheckUploadBody<'a> {
    #[serde(rename = "teamID")]
    team_id: &'a str,
    #[serde(rename = "keyID")]
    key_id: &'a str,
    #[serde(rename = "privateKey")]
    private_key: &'a str,
}

impl DeviceCheckUpload {
    pub(crate) fn body(&self) -> DeviceCheckUploadBody<'_> {
        DeviceCheckUploadBody {
            team_id: self.team_id.as_str(),
            key_id: &self.key_id,
            private_key: self.private_key.expose_secret(),
        }
    }
}

/// Link an existing credential from the user's pool to a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCheckLink {
    #[serde(rename = "teamID")]
    pub team_id: String,
    #[serde(rename = "keyID")]
    pub key_id: String,
}

impl From<&DeviceCheckCredential> for DeviceCheckLink {
    fn from(credential: &DeviceCheckCredential) -> Self {
        Self {
            team_id: credential.team_id.clone(),
            key_id: credential.key_id.clone(),
        }
    }
}
