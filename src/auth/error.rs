//! Authorization error taxonomy

use std::fmt;

use serde::Deserialize;

/// What went wrong, as a closed set. Callers branch on this, never on text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    ExchangeFailed,
    RefreshFailed,
    RevokeFailed,
    IntrospectionFailed,
    InvalidGrant,
    NotAuthorized,
    MissingCode,
    /// The loopback callback server stopped accepting before the redirect arrived.
    ServerFailed,
    /// `error` parameter reported by the authorization server on the redirect.
    Authorization(String),
}

impl AuthErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExchangeFailed => "exchange_failed",
            Self::RefreshFailed => "refresh_failed",
            Self::RevokeFailed => "revoke_failed",
            Self::IntrospectionFailed => "introspection_failed",
            Self::InvalidGrant => "invalid_grant",
            Self::NotAuthorized => "not_authorized",
            Self::MissingCode => "missing_code",
            Self::ServerFailed => "failed to start server",
            Self::Authorization(code) => code,
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {description}")]
pub struct AuthError {
    /// HTTP status of the failed call, when there was one.
    pub code: Option<u16>,
    pub kind: AuthErrorKind,
    pub description: String,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, description: impl Into<String>) -> Self {
        Self {
            code: None,
            kind,
            description: description.into(),
        }
    }

    pub fn kind(&self) -> &AuthErrorKind {
        &self.kind
    }

    /// The stored credentials are dead and the user has to sign in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self.kind,
            AuthErrorKind::InvalidGrant | AuthErrorKind::NotAuthorized
        )
    }

    /// Build an error from a non-200 OAuth response. The body is decoded
    /// opportunistically: `invalid_grant` is the only server code promoted to
    /// its own kind, anything else keeps the operation's kind.
    pub(crate) fn from_response(
        kind: AuthErrorKind,
        status: reqwest::StatusCode,
        body: &[u8],
    ) -> Self {
        let mut err = Self {
            code: Some(status.as_u16()),
            kind,
            description: status.to_string(),
        };
        if let Ok(server) = serde_json::from_slice::<OAuthErrorBody>(body) {
            if let Some(desc) = server.error_description.filter(|d| !d.is_empty()) {
                err.description = desc;
            } else if let Some(code) = server.error.as_deref().filter(|c| !c.is_empty()) {
                err.description = code.to_string();
            }
            if server.error.as_deref() == Some("invalid_grant") {
                err.kind = AuthErrorKind::InvalidGrant;
            }
        }
        err
    }
}

/// RFC 6749 §5.2 error body.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}
