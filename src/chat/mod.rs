//! Streaming chat against a repository.
//!
//! A [`ChatSession`] runs one exchange at a time: it posts the question to
//! the streaming endpoint, applies each decoded event to its [`ChatState`],
//! and remembers the backend session id for the next question. Once the
//! exchange is cancelled nothing further is applied.

mod events;

pub use events::ChatEvent;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::api::types::ChatRequest;
use crate::api::{ApiClient, ApiError};
use crate::sse::StreamFrame;

/// Shown when a failure carries no message of its own.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Observable state of the chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    /// Answer accumulated so far in the current exchange
    pub answer: String,
    /// Backend session continued by the next question
    pub session_id: Option<i64>,
    /// An exchange is in flight
    pub loading: bool,
    /// Error of the current exchange, if any
    pub error: Option<String>,
}

impl ChatState {
    /// Reset per-exchange fields. The session id carries over.
    fn begin(&mut self) {
        self.answer.clear();
        self.error = None;
        self.loading = true;
    }

    /// Apply one event.
    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Meta { session_id } => {
                if let Some(id) = session_id {
                    self.session_id = Some(*id);
                }
            }
            ChatEvent::Text { content } => self.answer.push_str(content),
            ChatEvent::Error { message } => self.fail(message.clone()),
            ChatEvent::Done => self.loading = false,
        }
    }

    fn fail(&mut self, message: String) {
        self.error = Some(if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        });
        self.loading = false;
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The stream ended; `state().answer` holds the answer.
    Completed,
    /// The exchange failed with this message (also in `state().error`).
    Failed(String),
    /// The streaming endpoint answered with a non-2xx status before any
    /// frame was read. The message is in `state().error`.
    Rejected { status: u16 },
    /// Cancelled before the stream ended; later events were not applied.
    Cancelled,
}

/// Chat with one repository, keeping the backend session between questions.
#[derive(Debug, Clone)]
pub struct ChatSession {
    repo_id: i64,
    state: ChatState,
}

impl ChatSession {
    pub fn new(repo_id: i64) -> Self {
        Self {
            repo_id,
            state: ChatState::default(),
        }
    }

    /// Continue an existing backend session.
    pub fn resume(repo_id: i64, session_id: i64) -> Self {
        Self {
            repo_id,
            state: ChatState {
                session_id: Some(session_id),
                ..ChatState::default()
            },
        }
    }

    pub fn repo_id(&self) -> i64 {
        self.repo_id
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    fn request(&self, query: &str) -> ChatRequest {
        ChatRequest {
            repo_id: self.repo_id,
            query: query.to_string(),
            session_id: self.state.session_id,
        }
    }

    /// Ask a question over the streaming endpoint.
    ///
    /// `on_event` sees every applied event, in order, e.g. to print text as it
    /// arrives.
    pub async fn ask<F>(
        &mut self,
        client: &ApiClient,
        query: &str,
        cancel: &CancellationToken,
        on_event: F,
    ) -> ExchangeOutcome
    where
        F: FnMut(&ChatEvent),
    {
        self.state.begin();
        let request = self.request(query);
        tracing::debug!(repo_id = self.repo_id, session_id = ?request.session_id, "Starting chat exchange");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.state.loading = false;
                return ExchangeOutcome::Cancelled;
            }
            opened = client.chat_stream(&request) => opened,
        };

        match opened {
            Ok(frames) => self.consume(frames, cancel, on_event).await,
            Err(e) => {
                tracing::warn!(repo_id = self.repo_id, "Chat request failed: {}", e);
                self.state.fail(e.to_string());
                match e {
                    ApiError::StreamRejected { status } => ExchangeOutcome::Rejected { status },
                    _ => ExchangeOutcome::Failed(self.state.error.clone().unwrap_or_default()),
                }
            }
        }
    }

    /// Ask over the one-shot endpoint; the whole answer arrives at once.
    pub async fn ask_once(&mut self, client: &ApiClient, query: &str) -> Result<&str, ApiError> {
        self.state.begin();
        let result = client.chat(&self.request(query)).await;
        self.state.loading = false;
        match result {
            Ok(response) => {
                if let Some(id) = response.session_id {
                    self.state.session_id = Some(id);
                }
                self.state.answer = response.answer;
                Ok(&self.state.answer)
            }
            Err(e) => {
                self.state.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    /// Apply a stream of decoded frames until it ends, fails, or `cancel` fires.
    pub async fn consume<S, F>(
        &mut self,
        frames: S,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> ExchangeOutcome
    where
        S: Stream<Item = Result<StreamFrame, ApiError>>,
        F: FnMut(&ChatEvent),
    {
        let mut frames = std::pin::pin!(frames);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(repo_id = self.repo_id, "Chat exchange cancelled");
                    self.state.loading = false;
                    return ExchangeOutcome::Cancelled;
                }
                next = frames.next() => next,
            };

            match next {
                None => break,
                Some(Ok(frame)) => {
                    let Some(event) = ChatEvent::from_frame(frame) else {
                        continue;
                    };
                    tracing::trace!(event = event.event_name(), "Chat event");
                    self.state.apply(&event);
                    on_event(&event);
                }
                Some(Err(e)) => {
                    tracing::warn!(repo_id = self.repo_id, "Chat stream aborted: {}", e);
                    self.state.fail(e.to_string());
                    return ExchangeOutcome::Failed(self.state.error.clone().unwrap_or_default());
                }
            }
        }

        self.state.loading = false;
        match &self.state.error {
            Some(message) => ExchangeOutcome::Failed(message.clone()),
            None => ExchangeOutcome::Completed,
        }
    }
}
