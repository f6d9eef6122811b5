//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /chat/stream` and `POST /chat`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub repo_id: i64,

    pub query: String,

    /// Session to continue; serialized as `null` for a fresh conversation
    pub session_id: Option<i64>,
}

/// Response of the non-streaming `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub answer: String,

    #[serde(default)]
    pub session_id: Option<i64>,
}

/// Status envelope of an asynchronous backend job.
///
/// `result` is whatever the job returned; only the `status` and `error`
/// string fields of an object result are interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    #[serde(default)]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JobStatus {
    /// Business-level status nested in the result payload, if present and non-empty.
    pub fn result_status(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("status"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Error message nested in the result payload.
    pub fn result_error(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("error"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Top-level error message of a failed job.
    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Response after queueing an analysis or docs job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSubmitted {
    #[serde(default)]
    pub task_id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,
}

/// Body of `POST /docs/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateDocsRequest {
    pub repo_id: i64,

    pub doc_type: String,
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,

    pub password: String,
}

/// Body of `POST /auth/login/code`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginCodeRequest {
    pub email: String,

    pub code: String,
}

/// Token issued by the login endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub token_type: Option<String>,
}

/// Body of `PATCH /auth/me`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateProfileRequest {
    pub full_name: String,
}

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: i64,

    pub email: String,

    #[serde(default)]
    pub full_name: Option<String>,
}

/// Body of `POST /repos`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRepoRequest {
    pub url: String,
}

/// A repository registered with the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,

    pub name: String,

    #[serde(default)]
    pub full_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
}

/// Generated documentation for a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Documentation {
    #[serde(default)]
    pub id: Option<i64>,

    #[serde(default)]
    pub repository_id: Option<i64>,

    #[serde(default)]
    pub doc_type: Option<String>,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub version: Option<String>,
}
