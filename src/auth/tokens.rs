//! OAuth token value and the clock used to stamp its expiry

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Source of "now" for expiry computations.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Token as returned by the authorization server and persisted in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expires_in: i64,
    /// Absolute expiry, stamped once when the token is received.
    /// `None` means the token never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Token {
    /// Token entered by hand (or from the environment): no refresh, no expiry.
    pub fn from_access_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: String::new(),
            expires_in: 0,
            expiry: None,
        }
    }

    /// Fill in the fields the server may omit. Called exactly once, on receipt.
    pub(crate) fn stamp(mut self, clock: &dyn Clock) -> Self {
        if self.token_type.is_empty() {
            self.token_type = "Bearer".to_string();
        }
        if self.expires_in != 0 {
            // Out-of-range lifetimes degrade to "never expires".
            self.expiry = Duration::try_seconds(self.expires_in)
                .and_then(|d| clock.now().checked_add_signed(d));
        }
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(exp) => exp < now,
            None => false,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        let kind = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", kind, self.access_token)
    }
}
