//! HTTP client for the DocuBot backend.
//!
//! Every call goes to `{api_url}/api/v1{path}` with a JSON body and, when a
//! token is stored, an `Authorization: Bearer` header. Failures come back as
//! [`ApiError`]; a 401 from any endpoint clears the stored tokens first.
//! Nothing is retried.

mod error;
pub mod types;

pub use error::{ApiError, GENERIC_FAILURE};

use futures::{Stream, StreamExt};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::auth::TokenStore;
use crate::config::Config;
use crate::sse::{StreamDecoder, StreamFrame};
use types::{
    AuthUser, ChatRequest, ChatResponse, CreateRepoRequest, Documentation, GenerateDocsRequest,
    JobStatus, JobSubmitted, LoginCodeRequest, LoginRequest, Repository, TokenResponse,
    UpdateProfileRequest,
};

/// Client for the versioned backend API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &Config, tokens: TokenStore) -> Result<Self, ApiError> {
        // No client-wide timeout: it would also cut off long chat streams.
        let http = reqwest::Client::builder()
            .user_agent(concat!("docubot-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base(),
            tokens,
            request_timeout: config.request_timeout,
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.tokens.get().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Turn a 401 into a cleared session.
    async fn expire_session(&self, url: &str) {
        tracing::warn!(url = %url, "Backend rejected credentials; clearing stored token");
        if let Err(e) = self.tokens.clear().await {
            tracing::warn!("Failed to clear stored token: {}", e);
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.timeout(self.request_timeout).send().await?;
        let response = self.check_status(response).await?;
        let url = response.url().to_string();
        let body = response.bytes().await?;

        // Some endpoints answer with an empty body; read that as JSON null.
        let value: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).map_err(|e| ApiError::InvalidResponse {
                url: url.clone(),
                reason: e.to_string(),
            })?
        };
        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse {
            url,
            reason: e.to_string(),
        })
    }

    async fn check_status(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let payload: Option<Value> = response.json().await.ok();
        let message = error::extract_message(payload.as_ref());
        tracing::debug!(url = %url, status = status.as_u16(), "API call failed: {}", message);

        if status == StatusCode::UNAUTHORIZED {
            self.expire_session(&url).await;
            return Err(ApiError::Unauthorized { message, url });
        }

        Err(ApiError::Http {
            status: status.as_u16(),
            message,
            url,
            payload,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(self.request(Method::GET, path).await).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        self.send_json(self.request(Method::GET, path).await.query(query))
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(self.request(Method::POST, path).await.json(body))
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(self.request(Method::PATCH, path).await.json(body))
            .await
    }

    // ── Auth ──────────────────────────────────────────────────────────

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post("/auth/login", &body).await
    }

    pub async fn login_with_code(&self, email: &str, code: &str) -> Result<TokenResponse, ApiError> {
        let body = LoginCodeRequest {
            email: email.to_string(),
            code: code.to_string(),
        };
        self.post("/auth/login/code", &body).await
    }

    pub async fn me(&self) -> Result<AuthUser, ApiError> {
        self.get("/auth/me").await
    }

    pub async fn update_me(&self, full_name: &str) -> Result<AuthUser, ApiError> {
        let body = UpdateProfileRequest {
            full_name: full_name.to_string(),
        };
        self.patch("/auth/me", &body).await
    }

    // ── Repositories ──────────────────────────────────────────────────

    /// Repositories visible to the user. The shape comes straight from GitHub,
    /// so entries are left as raw JSON.
    pub async fn list_repos(&self) -> Result<Vec<Value>, ApiError> {
        let repos: Option<Vec<Value>> = self.get("/repos").await?;
        Ok(repos.unwrap_or_default())
    }

    pub async fn get_repo(&self, repo_id: i64) -> Result<Repository, ApiError> {
        self.get(&format!("/repos/{}", repo_id)).await
    }

    pub async fn create_repo(&self, url: &str) -> Result<Repository, ApiError> {
        let body = CreateRepoRequest {
            url: url.trim().to_string(),
        };
        self.post("/repos", &body).await
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    pub async fn start_analysis(&self, repo_id: i64) -> Result<JobSubmitted, ApiError> {
        let path = format!("/repos/{}/analyze", repo_id);
        self.send_json(self.request(Method::POST, &path).await).await
    }

    pub async fn analysis_status(&self, repo_id: i64, task_id: &str) -> Result<JobStatus, ApiError> {
        self.get(&format!(
            "/repos/{}/analyze/{}",
            repo_id,
            urlencoding::encode(task_id)
        ))
        .await
    }

    pub async fn generate_docs(&self, repo_id: i64, doc_type: &str) -> Result<JobSubmitted, ApiError> {
        let body = GenerateDocsRequest {
            repo_id,
            doc_type: doc_type.to_string(),
        };
        self.post("/docs/generate", &body).await
    }

    pub async fn docs_status(&self, task_id: &str) -> Result<JobStatus, ApiError> {
        self.get(&format!("/docs/generate/{}", urlencoding::encode(task_id)))
            .await
    }

    pub async fn get_docs(&self, repo_id: i64, doc_type: &str) -> Result<Documentation, ApiError> {
        self.get_with_query(&format!("/docs/{}", repo_id), &[("doc_type", doc_type)])
            .await
    }

    // ── Chat ──────────────────────────────────────────────────────────

    /// One-shot chat: the whole answer in a single response.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.post("/chat", request).await
    }

    /// Open the streaming chat endpoint and decode its body into frames.
    ///
    /// A non-2xx status fails the whole exchange with
    /// [`ApiError::StreamRejected`]. A read error mid-stream is yielded once as
    /// [`ApiError::Stream`] and ends the stream. An undelimited tail at end of
    /// stream is dropped.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<impl Stream<Item = Result<StreamFrame, ApiError>>, ApiError> {
        let response = self
            .request(Method::POST, "/chat/stream")
            .await
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.expire_session(response.url().as_str()).await;
            }
            return Err(ApiError::StreamRejected {
                status: status.as_u16(),
            });
        }

        let mut body = response.bytes_stream();
        Ok(async_stream::stream! {
            let mut decoder = StreamDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk: bytes::Bytes = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ApiError::Stream(e.to_string()));
                        break;
                    }
                };
                for frame in decoder.feed_bytes(&chunk) {
                    yield Ok(frame);
                }
            }
            decoder.finish();
        })
    }
}
