//! Rate limit messaging for 429 responses

use reqwest::header::HeaderMap;

const MORE_CREDITS_REQUIRED_NO_AUTH: &str = "You only have {remaining} remaining, and {cost} were required. Try requesting fewer probes or wait {reset} for the rate limit to reset. You can get higher limits by creating an account. Sign up at https://dash.globalping.io?view=add-credits";
const MORE_CREDITS_REQUIRED_AUTH: &str = "You only have {remaining} remaining, and {cost} were required. Try requesting fewer probes or wait {reset} for the rate limit to reset. You can get higher limits by sponsoring us or hosting probes. Learn more at https://dash.globalping.io?view=add-credits";
const NO_CREDITS_NO_AUTH: &str = "You have run out of credits for this session. You can wait {reset} for the rate limit to reset or get higher limits by creating an account. Sign up at https://dash.globalping.io?view=add-credits";
const NO_CREDITS_AUTH: &str = "You have run out of credits for this session. You can wait {reset} for the rate limit to reset or get higher limits by sponsoring us or hosting probes. Learn more at https://dash.globalping.io?view=add-credits";

/// Rate limit state reported in 429 response headers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub rate_limit_remaining: i64,
    /// Seconds until the rate limit window resets
    pub rate_limit_reset: i64,
    pub credits_remaining: i64,
    pub request_cost: i64,
}

impl RateLimitHeaders {
    /// Missing or malformed headers read as zero.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let int = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };
        Self {
            rate_limit_remaining: int("X-RateLimit-Remaining").unwrap_or(0),
            rate_limit_reset: int("X-RateLimit-Reset").unwrap_or(0),
            credits_remaining: int("X-Credits-Remaining").unwrap_or(0),
            request_cost: int("X-Request-Cost")
                .or_else(|| int("X-Credits-Required"))
                .unwrap_or(0),
        }
    }

    pub fn remaining(&self) -> i64 {
        self.rate_limit_remaining.saturating_add(self.credits_remaining)
    }

    pub fn message(&self, authenticated: bool) -> String {
        let remaining = self.remaining();
        let template = match (remaining > 0, authenticated) {
            (true, false) => MORE_CREDITS_REQUIRED_NO_AUTH,
            (true, true) => MORE_CREDITS_REQUIRED_AUTH,
            (false, false) => NO_CREDITS_NO_AUTH,
            (false, true) => NO_CREDITS_AUTH,
        };
        template
            .replace("{remaining}", &pluralize(remaining, "credit"))
            .replace("{cost}", &self.request_cost.to_string())
            .replace("{reset}", &format_seconds(self.rate_limit_reset))
    }
}

pub fn pluralize(count: i64, singular: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}s", count, singular)
    }
}

/// Human duration, rounded to the largest whole unit.
pub fn format_seconds(seconds: i64) -> String {
    let rounded = |unit: i64| (seconds as f64 / unit as f64).round() as i64;
    if seconds < 60 {
        pluralize(seconds, "second")
    } else if seconds < 3600 {
        pluralize(rounded(60), "minute")
    } else if seconds < 86400 {
        pluralize(rounded(3600), "hour")
    } else {
        pluralize(rounded(86400), "day")
    }
}
