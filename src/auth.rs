//! Bearer-token storage and the signed-in session.
//!
//! A token lives in exactly one of two slots: the persistent slot when the
//! user asked to be remembered, the session slot otherwise. Writing one slot
//! clears the other.

use crate::api::types::{AuthUser, TokenResponse};
use crate::api::{ApiClient, ApiError};
use crate::storage::{SharedLocalStore, Slot, StorageError};

/// Storage key holding the bearer token in either slot.
pub const TOKEN_KEY: &str = "token";

/// Reads and writes the bearer token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    store: SharedLocalStore,
}

impl TokenStore {
    pub fn new(store: SharedLocalStore) -> Self {
        Self { store }
    }

    /// The stored token, preferring the persistent slot.
    pub async fn get(&self) -> Option<String> {
        match self.store.get(Slot::Persistent, TOKEN_KEY).await {
            Some(token) => Some(token),
            None => self.store.get(Slot::Session, TOKEN_KEY).await,
        }
        .filter(|t| !t.is_empty())
    }

    /// Store `token` in the slot chosen by `persist`, clearing the other one.
    /// `None` clears both.
    pub async fn set(&self, token: Option<&str>, persist: bool) -> Result<(), StorageError> {
        let Some(token) = token else {
            return self.clear().await;
        };
        let (keep, other) = if persist {
            (Slot::Persistent, Slot::Session)
        } else {
            (Slot::Session, Slot::Persistent)
        };
        self.store.set(keep, TOKEN_KEY, token.to_string()).await?;
        self.store.remove(other, TOKEN_KEY).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(Slot::Persistent, TOKEN_KEY).await?;
        self.store.remove(Slot::Session, TOKEN_KEY).await
    }
}

/// The signed-in user and the operations that change who that is.
#[derive(Debug)]
pub struct AuthSession {
    client: ApiClient,
    user: Option<AuthUser>,
    token: Option<String>,
    error: Option<String>,
}

impl AuthSession {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            user: None,
            token: None,
            error: None,
        }
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Message of the last failed login.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Pick up a token left by a previous run.
    pub async fn hydrate(&mut self) {
        self.token = self.client.tokens().get().await;
    }

    /// Password login. `remember` selects the persistent token slot.
    pub async fn login(
        &mut self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<&AuthUser, ApiError> {
        self.error = None;
        let issued = self.client.login(email, password).await;
        self.complete_login(issued, remember).await
    }

    /// One-time-code login.
    pub async fn login_with_code(
        &mut self,
        email: &str,
        code: &str,
        remember: bool,
    ) -> Result<&AuthUser, ApiError> {
        self.error = None;
        let issued = self.client.login_with_code(email, code).await;
        self.complete_login(issued, remember).await
    }

    async fn complete_login(
        &mut self,
        issued: Result<TokenResponse, ApiError>,
        remember: bool,
    ) -> Result<&AuthUser, ApiError> {
        match self.store_and_fetch_user(issued, remember).await {
            Ok(user) => {
                tracing::info!(user_id = user.id, "Signed in as {}", user.email);
                Ok(&*self.user.insert(user))
            }
            Err(e) => {
                self.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    async fn store_and_fetch_user(
        &mut self,
        issued: Result<TokenResponse, ApiError>,
        remember: bool,
    ) -> Result<AuthUser, ApiError> {
        let token = issued?
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::InvalidInput("No access token returned".to_string()))?;

        self.client.tokens().set(Some(&token), remember).await?;
        self.token = Some(token);
        self.client.me().await
    }

    /// Forget the user and both stored tokens.
    pub async fn logout(&mut self) -> Result<(), StorageError> {
        self.user = None;
        self.token = None;
        self.client.tokens().clear().await
    }

    /// Re-validate the stored token. Any failure signs the user out.
    pub async fn refresh(&mut self) -> Option<&AuthUser> {
        let token = match self.token.clone() {
            Some(token) => Some(token),
            None => self.client.tokens().get().await,
        };
        if token.is_none() {
            self.logout_quietly().await;
            return None;
        }
        self.token = token;

        match self.client.me().await {
            Ok(user) => Some(&*self.user.insert(user)),
            Err(e) => {
                tracing::info!("Stored session is no longer valid: {}", e);
                self.logout_quietly().await;
                None
            }
        }
    }

    async fn logout_quietly(&mut self) {
        if let Err(e) = self.logout().await {
            tracing::warn!("Failed to clear stored token: {}", e);
        }
    }

    /// Change the display name. The name is trimmed and must not be empty.
    pub async fn update_name(&mut self, first_name: &str) -> Result<&AuthUser, ApiError> {
        let name = first_name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidInput("First name is required".to_string()));
        }
        let user = self.client.update_me(name).await?;
        Ok(&*self.user.insert(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::LocalStore;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[tokio::test]
    async fn slots_are_mutually_exclusive() {
        let store = Arc::new(LocalStore::in_memory());
        let tokens = TokenStore::new(store.clone());

        tokens.set(Some("long-lived"), true).await.expect("persist");
        assert_eq!(
            store.get(Slot::Persistent, TOKEN_KEY).await.as_deref(),
            Some("long-lived")
        );
        assert_eq!(store.get(Slot::Session, TOKEN_KEY).await, None);

        tokens.set(Some("short-lived"), false).await.expect("session");
        assert_eq!(store.get(Slot::Persistent, TOKEN_KEY).await, None);
        assert_eq!(tokens.get().await.as_deref(), Some("short-lived"));

        tokens.set(None, true).await.expect("clear");
        assert_eq!(tokens.get().await, None);
    }

    fn session_for(server: &mockito::ServerGuard) -> (AuthSession, SharedLocalStore) {
        let store: SharedLocalStore = Arc::new(LocalStore::in_memory());
        let config = Config::new(server.url(), PathBuf::from("/tmp/unused"));
        let client = ApiClient::new(&config, TokenStore::new(store.clone())).expect("client");
        (AuthSession::new(client), store)
    }

    #[tokio::test]
    async fn login_without_remember_uses_session_slot() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/auth/login")
            .with_status(200)
            .with_body(r#"{"access_token": "token123", "token_type": "bearer"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/auth/me")
            .match_header("authorization", "Bearer token123")
            .with_status(200)
            .with_body(r#"{"id": 1, "email": "test@example.com"}"#)
            .create_async()
            .await;

        let (mut session, store) = session_for(&server);
        let user = session
            .login("test@example.com", "password123", false)
            .await
            .expect("login");
        assert_eq!(user.id, 1);
        assert_eq!(session.token(), Some("token123"));
        assert_eq!(store.get(Slot::Persistent, TOKEN_KEY).await, None);
        assert_eq!(
            store.get(Slot::Session, TOKEN_KEY).await.as_deref(),
            Some("token123")
        );
    }

    #[tokio::test]
    async fn login_without_token_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/auth/login/code")
            .with_status(200)
            .with_body(r#"{"token_type": "bearer"}"#)
            .create_async()
            .await;

        let (mut session, _store) = session_for(&server);
        let err = session
            .login_with_code("test@example.com", "123456", true)
            .await
            .expect_err("missing token");
        assert_eq!(err.to_string(), "No access token returned");
        assert_eq!(session.error(), Some("No access token returned"));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn refresh_without_token_logs_out() {
        let server = mockito::Server::new_async().await;
        let (mut session, _store) = session_for(&server);
        assert!(session.refresh().await.is_none());
        assert!(session.user().is_none());
    }

    #[tokio::test]
    async fn update_name_rejects_blank() {
        let server = mockito::Server::new_async().await;
        let (mut session, _store) = session_for(&server);
        let err = session.update_name("   ").await.expect_err("blank name");
        assert_eq!(err.to_string(), "First name is required");
    }
}
