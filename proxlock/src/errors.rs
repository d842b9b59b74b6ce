use reqwest::StatusCode;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The session token provider could not supply a bearer token
    #[error("Failed to obtain session token: {message}")]
    TokenUnavailable { message: String },

    /// Network or transport failure, no response was received
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status
    #[error("Failed to {operation}: {status_text}")]
    Api {
        operation: String,
        status: StatusCode,
        status_text: String,
    },

    /// The backend answered 2xx but the body did not have the expected shape
    #[error("Failed to {operation}: unexpected response body ({message})")]
    Decode { operation: String, message: String },

    /// Form input rejected before anything was sent
    #[error("{message}")]
    Validation { message: String },

    /// A one-time secret can only be revealed once
    #[error("The partial key has already been revealed")]
    SecretAlreadyRevealed,

    /// Copying a revealed secret failed; the secret stays revealed
    #[error("Failed to copy to clipboard: {message}")]
    Clipboard { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status of the failed call, if the backend answered at all
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Transport(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::NOT_FOUND)
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::TokenUnavailable { .. } => "You are not signed in. Please sign in and try again.".to_string(),
            Error::Transport(e) if e.is_timeout() => "The request timed out. Please try again.".to_string(),
            Error::Transport(_) => "Could not reach the server. Please check your connection and try again.".to_string(),
            Error::Api { .. } => self.to_string(),
            Error::Decode { operation, .. } => format!("Failed to {operation}: the server sent an unexpected response"),
            Error::Validation { message } => message.clone(),
            Error::SecretAlreadyRevealed => self.to_string(),
            Error::Clipboard { .. } => "Failed to copy to clipboard. Please copy manually.".to_string(),
            Error::Other(_) => "Something went wrong. Please try again.".to_string(),
        }
    }

    /// Log the error at a level matching its severity
    pub fn log(&self) {
        match self {
            Error::Transport(_) | Error::Decode { .. } | Error::Other(_) => {
                tracing::error!("Client error: {:#}", self);
            }
            Error::Api { status, .. } if status.is_server_error() => {
                tracing::error!("Backend error: {}", self);
            }
            Error::Api { .. } => {
                tracing::warn!("Request rejected: {}", self);
            }
            Error::TokenUnavailable { .. } => {
                tracing::info!("Authentication error: {}", self);
            }
            Error::Validation { .. } | Error::SecretAlreadyRevealed | Error::Clipboard { .. } => {
                tracing::debug!("Input error: {}", self);
            }
        }
    }

    pub(crate) fn api(operation: impl Into<String>, status: StatusCode) -> Self {
        Error::Api {
            operation: operation.into(),
            status,
            status_text: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
        }
    }
}

/// Type alias for client operation results
pub type Result<T> = std::result::Result<T, Error>;
