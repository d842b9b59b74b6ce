//! Concrete session token providers.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use super::TokenProvider;
use crate::errors::{Error, Result};

/// A token supplied once at startup.
pub struct StaticToken {
    token: Option<SecretString>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(SecretString::from(token.into())),
        }
    }

    /// A provider with no session; every call fails with a token error.
    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<SecretString> {
        match &self.token {
            Some(token) if !token.expose_secret().is_empty() => Ok(SecretString::from(token.expose_secret().to_owned())),
            _ => Err(Error::TokenUnavailable {
                message: "no session token configured".to_string(),
            }),
        }
    }
}

/// Runs an external command for every token request and uses its trimmed stdout.
#[derive(Debug, Clone)]
pub struct CommandToken {
    program: String,
    args: Vec<String>,
}

impl CommandToken {
    /// Split a command line on whitespace. Quoting is not supported.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| Error::Validation {
            message: "token_command cannot be empty".to_string(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl TokenProvider for CommandToken {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn token(&self) -> Result<SecretString> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| Error::TokenUnavailable {
                message: format!("failed to run token command: {e}"),
            })?;

        if !output.status.success() {
            return Err(Error::TokenUnavailable {
                message: format!("token command exited with {}", output.status),
            });
        }

        let token = String::from_utf8(output.stdout).map_err(|_| Error::TokenUnavailable {
            message: "token command printed invalid UTF-8".to_string(),
        })?;
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::TokenUnavailable {
                message: "token command printed nothing".to_string(),
            });
        }

        debug!("Obtained session token from command");
        Ok(SecretString::from(token.to_owned()))
    }
}
