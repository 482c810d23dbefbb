//! Process-wide holder of the current token
//!
//! All mutation happens under one async mutex, which is also held across the
//! network refresh. That makes concurrent `get` callers on an expired token
//! wait for a single refresh instead of each issuing their own.
//!
//! The persistence callback runs synchronously while the lock is held, so
//! saves are totally ordered with the mutations that produced them. Keep it
//! fast; it blocks every other token consumer while it runs.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::error::{AuthError, AuthErrorKind};
use super::exchange::TokenExchangeClient;
use super::tokens::Token;

/// Persistence hook: `Some` to store a snapshot, `None` to forget the token.
pub type SaveToken = Arc<dyn Fn(Option<&Token>) + Send + Sync>;

pub struct TokenStore {
    token: Mutex<Option<Token>>,
    exchange: Arc<TokenExchangeClient>,
    on_save: Option<SaveToken>,
}

impl TokenStore {
    pub fn new(
        initial: Option<Token>,
        exchange: Arc<TokenExchangeClient>,
        on_save: Option<SaveToken>,
    ) -> Self {
        Self {
            token: Mutex::new(initial),
            exchange,
            on_save,
        }
    }

    /// Current token, refreshed first if it has expired.
    ///
    /// `Ok(None)` means anonymous. A refresh rejected with `invalid_grant`
    /// clears the store before the error is returned; any other refresh
    /// failure leaves it untouched.
    pub async fn get(&self) -> Result<Option<Token>, AuthError> {
        let mut guard = self.token.lock().await;
        let current = match guard.as_ref() {
            None => return Ok(None),
            Some(t) => t,
        };
        if !current.is_expired(self.exchange.clock().now()) {
            return Ok(Some(current.clone()));
        }
        if !current.has_refresh_token() {
            return Err(AuthError::new(
                AuthErrorKind::RefreshFailed,
                "empty refresh token",
            ));
        }

        tracing::info!("Access token expired, refreshing");
        let refresh_token = current.refresh_token.clone();
        match self.exchange.refresh(&refresh_token).await {
            Ok(token) => {
                let token = keep_refresh_token(token, refresh_token);
                self.save(Some(&token));
                *guard = Some(token.clone());
                Ok(Some(token))
            }
            Err(e) => {
                if e.kind() == &AuthErrorKind::InvalidGrant {
                    tracing::warn!("Refresh token rejected, signing out");
                    *guard = None;
                    self.save(None);
                }
                Err(e)
            }
        }
    }

    /// Refresh after the API rejected a request made with `rejected`.
    ///
    /// Returns `true` when a usable token is now stored: either this call
    /// refreshed it, or another caller already replaced `rejected` while the
    /// request was in flight. Only the caller still holding the current token
    /// hits the network.
    pub async fn try_refresh(&self, rejected: &Token) -> bool {
        let mut guard = self.token.lock().await;
        let current = match guard.as_ref() {
            None => return false,
            Some(t) => t,
        };
        if current.access_token != rejected.access_token {
            tracing::debug!("Token already replaced, not refreshing");
            return !current.access_token.is_empty();
        }
        if !current.has_refresh_token() {
            return false;
        }

        tracing::info!("Access token rejected, refreshing");
        let refresh_token = current.refresh_token.clone();
        match self.exchange.refresh(&refresh_token).await {
            Ok(token) => {
                let token = keep_refresh_token(token, refresh_token);
                self.save(Some(&token));
                *guard = Some(token);
                true
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                if e.kind() == &AuthErrorKind::InvalidGrant {
                    *guard = None;
                    self.save(None);
                }
                false
            }
        }
    }

    /// Replace the token unconditionally.
    pub async fn update(&self, token: Option<Token>) {
        let mut guard = self.token.lock().await;
        self.save(token.as_ref());
        *guard = token;
    }

    /// Current token as stored, without refreshing.
    pub async fn current(&self) -> Option<Token> {
        self.token.lock().await.clone()
    }

    fn save(&self, token: Option<&Token>) {
        if let Some(ref on_save) = self.on_save {
            on_save(token);
        }
    }
}

/// Servers may omit the refresh token on refresh; the old one stays valid then.
fn keep_refresh_token(mut token: Token, previous: String) -> Token {
    if token.refresh_token.is_empty() {
        token.refresh_token = previous;
    }
    token
}
