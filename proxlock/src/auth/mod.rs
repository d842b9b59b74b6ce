//! Session token acquisition.
//!
//! ProxLock does not sign users in itself. The hosted identity provider owns sign-in and
//! sessions; this crate only needs a bearer token for each backend call, obtained through the
//! [`TokenProvider`] trait. The token is treated as opaque.
//!
//! # Providers
//!
//! - [`session::StaticToken`]: a token supplied up front (config file or `PROXLOCK_TOKEN`)
//! - [`session::CommandToken`]: runs an external command per call and reads a fresh token from
//!   its stdout, for identity providers with short-lived session tokens
//!
//! A provider that cannot produce a token returns [`Error::TokenUnavailable`], which aborts the
//! API call before any request is sent.
//!
//! [`Error::TokenUnavailable`]: crate::errors::Error::TokenUnavailable

pub mod session;

use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::Result;

/// Supplies a bearer token on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<SecretString>;
}

/// Build the token provider described by the configuration.
///
/// A configured `token_command` wins over a static `token`; with neither, every call fails
/// with a token error.
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn TokenProvider>> {
    if let Some(command) = &config.token_command {
        return Ok(Arc::new(session::CommandToken::parse(command)?));
    }
    match &config.token {
        Some(token) => Ok(Arc::new(session::StaticToken::new(token.clone()))),
        None => Ok(Arc::new(session::StaticToken::signed_out())),
    }
}
