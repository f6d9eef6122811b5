//! Transient user notifications ("toasts").
//!
//! The poller and the API error path report through the [`Notifier`] trait.
//! [`ToastStore`] is the default sink: an owned list where each toast expires
//! after its duration unless it was created sticky.

use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default lifetime of a toast.
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_millis(4000);

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

impl std::fmt::Display for ToastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single notification.
#[derive(Debug, Clone)]
pub struct Toast {
    pub id: String,
    pub message: String,
    pub kind: ToastKind,
    /// `None` means the toast stays until removed.
    pub expires_at: Option<Instant>,
}

impl Toast {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Anything that can surface a message to the user.
pub trait Notifier: Send {
    fn notify(&mut self, message: &str, kind: ToastKind);
}

/// Owned list of live toasts.
#[derive(Debug)]
pub struct ToastStore {
    toasts: Vec<Toast>,
    default_duration: Duration,
}

impl Default for ToastStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_DURATION)
    }
}

impl ToastStore {
    pub fn new(default_duration: Duration) -> Self {
        Self {
            toasts: Vec::new(),
            default_duration,
        }
    }

    /// Add a toast and return its id.
    ///
    /// `duration` falls back to the store default; a zero duration makes the
    /// toast sticky.
    pub fn add(
        &mut self,
        message: impl Into<String>,
        kind: ToastKind,
        duration: Option<Duration>,
    ) -> String {
        let duration = duration.unwrap_or(self.default_duration);
        let expires_at = (!duration.is_zero()).then(|| Instant::now() + duration);
        let toast = Toast {
            id: Uuid::new_v4().to_string(),
            message: message.into(),
            kind,
            expires_at,
        };

        match kind {
            ToastKind::Error => tracing::warn!(toast_id = %toast.id, "{}", toast.message),
            _ => tracing::info!(toast_id = %toast.id, kind = %kind, "{}", toast.message),
        }

        let id = toast.id.clone();
        self.toasts.push(toast);
        id
    }

    /// Remove a toast. Unknown ids are ignored.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|t| t.id != id);
        self.toasts.len() != before
    }

    /// Drop every toast whose lifetime has passed. Returns how many were dropped.
    pub fn prune_expired(&mut self, now: Instant) -> usize {
        let before = self.toasts.len();
        self.toasts.retain(|t| !t.is_expired(now));
        before - self.toasts.len()
    }

    /// Live toasts in insertion order.
    pub fn toasts(&self) -> &[Toast] {
        &self.toasts
    }

    /// Take every toast out of the store.
    pub fn drain(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.toasts)
    }
}

impl Notifier for ToastStore {
    fn notify(&mut self, message: &str, kind: ToastKind) {
        self.add(message, kind, None);
    }
}
