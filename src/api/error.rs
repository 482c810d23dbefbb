//! Measurement API errors

use crate::auth::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementErrorKind {
    /// 422: the location filter matched no online probes
    NoProbesFound,
    /// 400: one or more request parameters were rejected
    Validation,
    /// 429: out of rate limit and credits
    RateLimitExceeded,
    /// 5xx or an error type the client does not know
    Api,
    /// 401/403 that could not be recovered from
    Unauthorized,
    /// 401/403 after which the token was refreshed; the request may be retried once
    TokenRefreshed,
    NotFound,
    /// Transport failure, nothing came back
    Request,
    /// Response body did not match the expected shape
    Decode,
    /// A 304 arrived for a body that is not cached
    CacheMiss,
    /// Obtaining a token for the request failed
    Auth,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct MeasurementError {
    /// HTTP status, when the server answered
    pub code: Option<u16>,
    pub kind: MeasurementErrorKind,
    pub message: String,
    #[source]
    pub source: Option<AuthError>,
}

impl MeasurementError {
    pub fn new(kind: MeasurementErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: None,
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn kind(&self) -> MeasurementErrorKind {
        self.kind
    }

    /// The caller should repeat the request once with the refreshed token.
    pub fn is_token_refreshed(&self) -> bool {
        self.kind == MeasurementErrorKind::TokenRefreshed
    }
}

impl From<AuthError> for MeasurementError {
    fn from(e: AuthError) -> Self {
        Self {
            code: e.code,
            kind: MeasurementErrorKind::Auth,
            message: format!("failed to get token: {}", e),
            source: Some(e),
        }
    }
}
