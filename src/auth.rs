// =============================================================================
// Authentication capability — token source for the streaming handshake
// =============================================================================
//
// The streaming layer never performs a login itself. It asks an
// `AuthProvider` whether the session is authenticated and, at connect time,
// for a bearer token that is passed to the feed as the `access_token` query
// parameter (WebSocket handshakes cannot carry custom headers).
//
// Any interactive fallback (popup, device flow, ...) is the provider's
// business; from here a token request simply succeeds or fails.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure to obtain an access token.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("user not authenticated")]
    NotAuthenticated,

    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),
}

/// Opaque authentication capability consumed by the connection manager.
pub trait AuthProvider: Send + Sync + 'static {
    /// Whether a user session currently exists.
    fn is_authenticated(&self) -> bool;

    /// Acquire a token for the next handshake. May suspend.
    fn access_token(&self) -> BoxFuture<'_, Result<String, AuthError>>;
}

// =============================================================================
// StaticTokenAuth
// =============================================================================

/// Auth provider backed by a pre-issued token (service accounts, local
/// development, tests).
///
/// The authenticated flag can be flipped at runtime to simulate sign-in and
/// sign-out.
pub struct StaticTokenAuth {
    token: RwLock<Option<String>>,
    authenticated: AtomicBool,
}

impl StaticTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            authenticated: AtomicBool::new(true),
        }
    }

    /// A session with no token; every handshake attempt fails.
    pub fn anonymous() -> Self {
        Self {
            token: RwLock::new(None),
            authenticated: AtomicBool::new(false),
        }
    }

    /// Read the token from the environment variable `var`.
    ///
    /// A missing or empty variable yields an unauthenticated session.
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Self::new(token.trim()),
            _ => {
                warn!(var = %var, "access token not set — streaming will stay disconnected");
                Self::anonymous()
            }
        }
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Replace the token used for subsequent handshakes.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }
}

impl AuthProvider for StaticTokenAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn access_token(&self) -> BoxFuture<'_, Result<String, AuthError>> {
        async move {
            if !self.is_authenticated() {
                return Err(AuthError::NotAuthenticated);
            }
            let token = self.token.read().clone();
            match token {
                Some(token) => {
                    debug!("static access token issued");
                    Ok(token)
                }
                None => Err(AuthError::TokenAcquisition("no token configured".into())),
            }
        }
        .boxed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_while_authenticated() {
        let auth = StaticTokenAuth::new("tok-123");
        assert!(auth.is_authenticated());
        assert_eq!(auth.access_token().await.unwrap(), "tok-123");
    }

    #[tokio::test]
    async fn signed_out_session_refuses_tokens() {
        let auth = StaticTokenAuth::new("tok-123");
        auth.set_authenticated(false);
        assert!(matches!(
            auth.access_token().await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn missing_token_is_an_acquisition_failure() {
        let auth = StaticTokenAuth::new("tok");
        auth.set_token(None);
        assert!(matches!(
            auth.access_token().await,
            Err(AuthError::TokenAcquisition(_))
        ));
    }

    #[test]
    fn anonymous_session_is_not_authenticated() {
        assert!(!StaticTokenAuth::anonymous().is_authenticated());
    }

    #[test]
    fn from_env_without_variable_is_anonymous() {
        let auth = StaticTokenAuth::from_env("QUOTE_STREAM_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(!auth.is_authenticated());
    }
}
