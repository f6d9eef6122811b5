//! # DocuBot client
//!
//! A headless client for the DocuBot documentation service.
//!
//! This library provides:
//! - A typed HTTP client with bearer auth and uniform error surfacing
//! - Streaming chat over server-sent events, decoded incrementally
//! - A persisted registry of background jobs (repository analysis, doc
//!   generation) and a poller that drives them to completion
//! - Transient notifications for job outcomes and request failures
//!
//! ## Example
//!
//! ```rust,ignore
//! use docubot_client::{ApiClient, ChatSession, Config, LocalStore, TokenStore};
//!
//! let config = Config::from_env()?;
//! let store = std::sync::Arc::new(LocalStore::open(&config.state_dir).await);
//! let client = ApiClient::new(&config, TokenStore::new(store))?;
//! let mut chat = ChatSession::new(42);
//! chat.ask(&client, "Where is the entry point?", &cancel, |_| {}).await;
//! ```

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod notify;
pub mod sse;
pub mod storage;
pub mod tasks;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthSession, TokenStore};
pub use chat::{ChatEvent, ChatSession, ChatState, ExchangeOutcome};
pub use config::Config;
pub use notify::{Notifier, Toast, ToastKind, ToastStore};
pub use storage::{LocalStore, SharedLocalStore};
pub use tasks::poller::TaskPoller;
pub use tasks::{SharedTaskRegistry, TaskItem, TaskKind, TaskRegistry, TaskStatus};
