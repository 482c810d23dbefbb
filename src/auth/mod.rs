//! Authentication for the Globalping API
//!
//! Implements the OAuth2 authorization code flow with PKCE against the
//! Globalping auth server, and keeps the resulting token fresh.

pub mod error;
pub mod exchange;
pub mod flow;
pub mod pkce;
pub mod store;
pub mod tokens;

pub use error::{AuthError, AuthErrorKind};
pub use exchange::{IntrospectionResponse, TokenExchangeClient};
pub use flow::{Authorization, AuthorizationFlow, CALLBACK_PORTS};
pub use store::{SaveToken, TokenStore};
pub use tokens::{Clock, SystemClock, Token};

/// OAuth client registration for the CLI
pub struct AuthConfig {
    /// Auth server base URL
    pub auth_url: &'static str,
    /// Dashboard hosting the post-login landing pages
    pub dashboard_url: &'static str,
    /// OAuth2 client ID (public client)
    pub client_id: &'static str,
    pub client_secret: &'static str,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_url: "https://auth.globalping.io",
            dashboard_url: "https://dash.globalping.io",
            client_id: "be231712-03f4-45bf-9f15-023506ce0b72",
            client_secret: "public",
        }
    }
}
