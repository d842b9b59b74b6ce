//! One-time reveal of a newly created partial key.
//!
//! The backend returns the partial key exactly once, in the key-creation response. The flow
//! moves `Hidden -> Revealed` when that response arrives and `Revealed -> Dismissed` when the
//! user copies the key or closes the dialog. There is no way back to `Revealed`: seeing the
//! key again means creating a new one. The secret is dropped (and zeroized) on dismissal, so it
//! never outlives the flow.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::api::models::api_keys::{ApiKey, CreatedKey};
use crate::api::proxy::partial_key_placeholder;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealState {
    Hidden,
    Revealed,
    Dismissed,
}

/// Destination for the copy action.
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn copy(&self, text: &str) -> Result<()>;
}

/// Reveal flow for one created key.
#[derive(Debug)]
pub struct SecretReveal {
    state: RevealState,
    key: Option<ApiKey>,
    secret: Option<SecretString>,
}

impl Default for SecretReveal {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretReveal {
    pub fn new() -> Self {
        Self {
            state: RevealState::Hidden,
            key: None,
            secret: None,
        }
    }

    /// Take the partial key out of a creation response.
    ///
    /// A response without a partial key leaves the flow `Hidden`. A flow that has already
    /// revealed a secret refuses a second one.
    pub fn reveal(&mut self, created: CreatedKey) -> Result<()> {
        if self.state != RevealState::Hidden {
            return Err(Error::SecretAlreadyRevealed);
        }

        self.key = Some(created.key);
        match created.partial_key {
            Some(partial_key) => {
                self.secret = Some(partial_key);
                self.state = RevealState::Revealed;
                debug!("Partial key revealed");
            }
            None => warn!("Key creation response carried no partial key"),
        }
        Ok(())
    }

    pub fn state(&self) -> RevealState {
        self.state
    }

    /// The created key's metadata, once a creation response was received
    pub fn key(&self) -> Option<&ApiKey> {
        self.key.as_ref()
    }

    /// The partial key, only while revealed
    pub fn secret(&self) -> Option<&SecretString> {
        match self.state {
            RevealState::Revealed => self.secret.as_ref(),
            _ => None,
        }
    }

    /// Placeholder referencing the partial key inside proxied requests, only while revealed
    pub fn placeholder(&self) -> Option<String> {
        self.secret().map(|secret| partial_key_placeholder(secret.expose_secret()))
    }

    /// Close the dialog. Idempotent.
    pub fn dismiss(&mut self) {
        self.secret = None;
        if self.state == RevealState::Revealed {
            debug!("Partial key dismissed");
        }
        if self.state != RevealState::Hidden || self.key.is_some() {
            self.state = RevealState::Dismissed;
        }
    }

    /// Copy the partial key and dismiss. On copy failure the flow stays revealed so the user can
    /// copy it manually.
    pub async fn copy_and_dismiss(&mut self, clipboard: &dyn Clipboard) -> Result<()> {
        let Some(secret) = self.secret() else {
            return Err(Error::Validation {
                message: "There is no partial key to copy".to_string(),
            });
        };

        clipboard.copy(secret.expose_secret()).await?;
        self.dismiss();
        Ok(())
    }
}

/// Pipes the text into an external command such as `pbcopy` or `wl-copy`.
#[derive(Debug, Clone)]
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
}

impl CommandClipboard {
    /// Split a command line on whitespace. Quoting is not supported.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| Error::Validation {
            message: "Clipboard command cannot be empty".to_string(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl Clipboard for CommandClipboard {
    async fn copy(&self, text: &str) -> Result<()> {
        let clipboard_error = |message: String| Error::Clipboard { message };

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| clipboard_error(format!("failed to run {}: {e}", self.program)))?;

        // Dropping stdin closes it, so the command sees the end of input
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| clipboard_error(format!("failed to write to {}: {e}", self.program)))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| clipboard_error(format!("failed to wait for {}: {e}", self.program)))?;
        if !status.success() {
            return Err(clipboard_error(format!("{} exited with {status}", self.program)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingClipboard {
        copied: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Clipboard for RecordingClipboard {
        async fn copy(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(Error::Clipboard {
                    message: "permission denied".to_string(),
                });
            }
            self.copied.lock().push(text.to_string());
            Ok(())
        }
    }

    fn created(partial_key: Option<&str>) -> CreatedKey {
        CreatedKey {
            key: ApiKey {
                id: Uuid::new_v4(),
                name: Some("OpenAI".to_string()),
                description: None,
                association_id: Some("assoc-1".to_string()),
            },
            partial_key: partial_key.map(|k| SecretString::from(k.to_string())),
        }
    }

    #[test]
    fn test_reveal_once_then_dismiss() {
        let mut reveal = SecretReveal::new();
        assert_eq!(reveal.state(), RevealState::Hidden);
        assert!(reveal.secret().is_none());

        reveal.reveal(created(Some("pk-half"))).unwrap();
        assert_eq!(reveal.state(), RevealState::Revealed);
        assert_eq!(reveal.secret().unwrap().expose_secret(), "pk-half");
        assert_eq!(reveal.placeholder().unwrap(), "%APIProxy_PARTIAL_KEY:pk-half%");

        // A second response cannot re-enter the revealed state
        assert!(matches!(
            reveal.reveal(created(Some("pk-other"))),
            Err(Error::SecretAlreadyRevealed)
        ));
        assert_eq!(reveal.secret().unwrap().expose_secret(), "pk-half");

        reveal.dismiss();
        assert_eq!(reveal.state(), RevealState::Dismissed);
        assert!(reveal.secret().is_none());
        assert!(reveal.placeholder().is_none());
        assert!(!format!("{reveal:?}").contains("pk-half"));

        assert!(matches!(
            reveal.reveal(created(Some("pk-again"))),
            Err(Error::SecretAlreadyRevealed)
        ));
    }

    #[test]
    fn test_response_without_partial_key_stays_hidden() {
        let mut reveal = SecretReveal::new();
        reveal.reveal(created(None)).unwrap();
        assert_eq!(reveal.state(), RevealState::Hidden);
        assert_eq!(reveal.key().unwrap().display_name(), "OpenAI");
        assert!(reveal.secret().is_none());
    }

    #[tokio::test]
    async fn test_copy_and_dismiss() {
        let clipboard = RecordingClipboard::default();
        let mut reveal = SecretReveal::new();
        reveal.reveal(created(Some("pk-half"))).unwrap();

        reveal.copy_and_dismiss(&clipboard).await.unwrap();
        assert_eq!(clipboard.copied.lock().as_slice(), ["pk-half"]);
        assert_eq!(reveal.state(), RevealState::Dismissed);
        assert!(reveal.copy_and_dismiss(&clipboard).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_copy_stays_revealed() {
        let clipboard = RecordingClipboard {
            fail: true,
            ..Default::default()
        };
        let mut reveal = SecretReveal::new();
        reveal.reveal(created(Some("pk-half"))).unwrap();

        let err = reveal.copy_and_dismiss(&clipboard).await.unwrap_err();
        assert_eq!(err.user_message(), "Failed to copy to clipboard. Please copy manually.");
        assert_eq!(reveal.state(), RevealState::Revealed);
        assert_eq!(reveal.secret().unwrap().expose_secret(), "pk-half");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_clipboard() {
        assert!(CommandClipboard::parse("cat").unwrap().copy("pk-half").await.is_ok());
        assert!(matches!(
            CommandClipboard::parse("false").unwrap().copy("pk-half").await,
            Err(Error::Clipboard { .. })
        ));
        assert!(matches!(
            CommandClipboard::parse("definitely-not-a-clipboard-xyz").unwrap().copy("pk-half").await,
            Err(Error::Clipboard { .. })
        ));
        assert!(CommandClipboard::parse("  ").is_err());
    }
}
