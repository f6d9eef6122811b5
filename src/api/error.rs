//! Errors returned by [`ApiClient`](super::ApiClient).

use serde_json::Value;
use thiserror::Error;

use crate::notify::{Notifier, ToastKind};
use crate::storage::StorageError;

/// Fallback when neither the payload nor the transport offers a message.
pub const GENERIC_FAILURE: &str = "Request failed";

/// Message the backend uses when a user has no GitHub link yet.
const GITHUB_NOT_CONNECTED: &str = "GitHub account not connected";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response from a request/response call.
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        url: String,
        payload: Option<Value>,
    },

    /// 401 from any call. Stored tokens have already been cleared.
    #[error("{message}")]
    Unauthorized { message: String, url: String },

    /// The streaming endpoint refused the request.
    #[error("Request failed ({status})")]
    StreamRejected { status: u16 },

    /// Reading the streaming body failed part way through.
    #[error("{0}")]
    Stream(String),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// 2xx response whose body could not be used.
    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// HTTP status attached to the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::StreamRejected { status } => Some(*status),
            Self::Unauthorized { .. } => Some(401),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Server-side failures are errors; everything else is informational.
    pub fn toast_kind(&self) -> ToastKind {
        match self.status() {
            Some(status) if status >= 500 => ToastKind::Error,
            _ => ToastKind::Info,
        }
    }

    /// User-facing text; never empty.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            GENERIC_FAILURE.to_string()
        } else {
            message
        }
    }

    /// The repo listing legitimately fails for users without a GitHub link;
    /// that case is not worth a toast.
    fn is_quiet(&self) -> bool {
        match self {
            Self::Http { message, url, .. } => {
                message == GITHUB_NOT_CONNECTED && url.contains("/repos")
            }
            _ => false,
        }
    }

    /// Report this error through `notifier`, once.
    pub fn surface<N: Notifier + ?Sized>(&self, notifier: &mut N) {
        if self.is_quiet() {
            tracing::debug!("Not surfacing expected error: {}", self);
            return;
        }
        notifier.notify(&self.user_message(), self.toast_kind());
    }
}

/// Pick the message for a failed call: `detail`, then `message`, then the
/// generic fallback.
pub(crate) fn extract_message(payload: Option<&Value>) -> String {
    payload
        .and_then(|p| {
            p.get("detail")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    p.get("message")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                })
        })
        .unwrap_or(GENERIC_FAILURE)
        .to_string()
}
