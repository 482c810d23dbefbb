//! Authenticated HTTP client for the Globalping API
//!
//! Wraps reqwest::Client with bearer token injection, reactive refresh on
//! 401/403 and ETag-conditional result fetching.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;

use super::cache::MeasurementCache;
use super::error::{MeasurementError, MeasurementErrorKind};
use super::limits::RateLimitHeaders;
use crate::auth::{
    AuthConfig, AuthError, AuthErrorKind, Authorization, AuthorizationFlow, Clock,
    IntrospectionResponse, SaveToken, SystemClock, Token, TokenExchangeClient, TokenStore,
    CALLBACK_PORTS,
};
use crate::models::{
    LimitsResponse, Measurement, MeasurementCreate, MeasurementCreateResponse,
    MeasurementErrorResponse, MeasurementStatus,
};

pub const API_URL: &str = "https://api.globalping.io/v1";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const INVALID_REFRESH_TOKEN: &str =
    "You have been signed out by the API. Please try signing in again.";
const INVALID_TOKEN: &str =
    "Your access token has been rejected by the API. Try signing in with a new token.";

/// Everything needed to build a [`GlobalpingClient`].
pub struct ClientConfig {
    pub api_url: String,
    pub auth_url: String,
    pub dashboard_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    /// Previously persisted token
    pub token: Option<Token>,
    /// Fixed access token (e.g. from the environment). Takes precedence over
    /// `token`, is never refreshed and never persisted.
    pub access_token: Option<String>,
    pub callback_ports: Vec<u16>,
    pub timeout: Duration,
    pub clock: Arc<dyn Clock>,
    pub on_token_change: Option<SaveToken>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            api_url: API_URL.to_string(),
            auth_url: auth.auth_url.to_string(),
            dashboard_url: auth.dashboard_url.to_string(),
            client_id: auth.client_id.to_string(),
            client_secret: auth.client_secret.to_string(),
            user_agent: user_agent(),
            token: None,
            access_token: None,
            callback_ports: CALLBACK_PORTS.to_vec(),
            timeout: Duration::from_secs(30),
            clock: Arc::new(SystemClock),
            on_token_change: None,
        }
    }
}

pub fn user_agent() -> String {
    format!(
        "globalping-cli/v{} (https://github.com/jsdelivr/globalping-cli)",
        env!("CARGO_PKG_VERSION")
    )
}

pub struct GlobalpingClient {
    http: reqwest::Client,
    api_url: String,
    exchange: Arc<TokenExchangeClient>,
    store: Arc<TokenStore>,
    flow: AuthorizationFlow,
    cache: MeasurementCache,
}

impl GlobalpingClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let exchange = Arc::new(
            TokenExchangeClient::new(
                http.clone(),
                config.auth_url,
                config.client_id,
                config.client_secret,
                config.clock,
            )
            .context("Invalid auth server URL")?,
        );
        let store = Arc::new(match config.access_token {
            Some(access_token) => TokenStore::new(
                Some(Token::from_access_token(access_token)),
                Arc::clone(&exchange),
                None,
            ),
            None => TokenStore::new(config.token, Arc::clone(&exchange), config.on_token_change),
        });
        let flow = AuthorizationFlow::new(
            Arc::clone(&exchange),
            Arc::clone(&store),
            config.dashboard_url,
            config.callback_ports,
        );

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            exchange,
            store,
            flow,
            cache: MeasurementCache::new(),
        })
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.store
    }

    /// Submit a measurement.
    ///
    /// A 401/403 with a refreshable token refreshes it and comes back as
    /// [`MeasurementErrorKind::TokenRefreshed`]; the caller may retry once.
    pub async fn create_measurement(
        &self,
        measurement: &MeasurementCreate,
    ) -> Result<MeasurementCreateResponse, MeasurementError> {
        let token = self.store.get().await?;
        let url = format!("{}/measurements", self.api_url);
        tracing::debug!("POST {}", url);

        let mut req = self
            .http
            .post(&url)
            .header(ACCEPT_ENCODING, "br")
            .json(measurement);
        if let Some(ref t) = token {
            req = req.header(AUTHORIZATION, t.authorization());
        }
        let resp = req.send().await.map_err(|e| {
            tracing::debug!("POST {} failed: {}", url, e);
            MeasurementError::new(
                MeasurementErrorKind::Request,
                "request failed - please try again later",
            )
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = read_body(resp).await?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| {
                MeasurementError::new(
                    MeasurementErrorKind::Decode,
                    format!(
                        "invalid post measurement format returned - please report this bug: {}",
                        e
                    ),
                )
            });
        }

        let data: MeasurementErrorResponse = serde_json::from_slice(&body).unwrap_or_default();
        let code = status.as_u16();
        let err = match status {
            StatusCode::BAD_REQUEST => {
                let params: Vec<String> = data
                    .error
                    .params
                    .values()
                    .map(|v| match v {
                        serde_json::Value::String(s) => format!(" - {}", s),
                        other => format!(" - {}", other),
                    })
                    .collect();
                let mut message = String::from("invalid parameters");
                if !params.is_empty() {
                    message.push('\n');
                    message.push_str(&params.join("\n"));
                }
                MeasurementError::new(MeasurementErrorKind::Validation, message)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => match token {
                None => MeasurementError::new(
                    MeasurementErrorKind::Unauthorized,
                    format!("unauthorized: {}", data.error.message),
                ),
                Some(t) if !t.has_refresh_token() => {
                    MeasurementError::new(MeasurementErrorKind::Unauthorized, INVALID_TOKEN)
                }
                Some(t) => {
                    if self.store.try_refresh(&t).await {
                        MeasurementError::new(
                            MeasurementErrorKind::TokenRefreshed,
                            format!("unauthorized: {}", data.error.message),
                        )
                    } else {
                        MeasurementError::new(
                            MeasurementErrorKind::Unauthorized,
                            INVALID_REFRESH_TOKEN,
                        )
                    }
                }
            },
            StatusCode::UNPROCESSABLE_ENTITY => MeasurementError::new(
                MeasurementErrorKind::NoProbesFound,
                "no suitable probes found - please choose a different location",
            ),
            StatusCode::TOO_MANY_REQUESTS => MeasurementError::new(
                MeasurementErrorKind::RateLimitExceeded,
                RateLimitHeaders::from_headers(&headers).message(token.is_some()),
            ),
            StatusCode::INTERNAL_SERVER_ERROR => MeasurementError::new(
                MeasurementErrorKind::Api,
                "internal server error - please try again later",
            ),
            _ if data.error.error_type.is_empty() => MeasurementError::new(
                MeasurementErrorKind::Api,
                format!("response code {}", code),
            ),
            _ => MeasurementError::new(
                MeasurementErrorKind::Api,
                format!("unknown error response: {}", data.error.error_type),
            ),
        };
        Err(err.with_code(code))
    }

    /// [`create_measurement`](Self::create_measurement), retried once after a token refresh.
    pub async fn submit(
        &self,
        measurement: &MeasurementCreate,
    ) -> Result<MeasurementCreateResponse, MeasurementError> {
        match self.create_measurement(measurement).await {
            Err(e) if e.is_token_refreshed() => {
                tracing::info!("Retrying measurement with refreshed token");
                self.create_measurement(measurement).await
            }
            other => other,
        }
    }

    /// Raw JSON of a measurement, served from the ETag cache on 304.
    pub async fn get_measurement_raw(&self, id: &str) -> Result<Arc<[u8]>, MeasurementError> {
        let token = self.store.get().await?;
        let url = format!("{}/measurements/{}", self.api_url, id);

        let mut req = self.http.get(&url).header(ACCEPT_ENCODING, "br");
        if let Some(ref t) = token {
            req = req.header(AUTHORIZATION, t.authorization());
        }
        let etag = self.cache.etag(id);
        if let Some(ref etag) = etag {
            req = req.header(IF_NONE_MATCH, etag.as_str());
        }
        tracing::debug!("GET {} (etag: {:?})", url, etag);

        let resp = req.send().await.map_err(|e| {
            tracing::debug!("GET {} failed: {}", url, e);
            MeasurementError::new(MeasurementErrorKind::Request, "request failed")
        })?;

        let status = resp.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(
                    MeasurementError::new(MeasurementErrorKind::NotFound, "measurement not found")
                        .with_code(404),
                )
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                return Err(MeasurementError::new(
                    MeasurementErrorKind::Api,
                    "internal server error - please try again later",
                )
                .with_code(500))
            }
            StatusCode::NOT_MODIFIED => {
                tracing::debug!("Measurement {} not modified", id);
                return etag
                    .and_then(|etag| self.cache.body(&etag))
                    .ok_or_else(|| {
                        MeasurementError::new(
                            MeasurementErrorKind::CacheMiss,
                            "response not found in etags cache",
                        )
                        .with_code(304)
                    });
            }
            s if s.as_u16() >= 400 => {
                return Err(MeasurementError::new(
                    MeasurementErrorKind::Api,
                    format!("response code {}", s.as_u16()),
                )
                .with_code(s.as_u16()))
            }
            _ => {}
        }

        let new_etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Arc<[u8]> = Arc::from(read_body(resp).await?);
        match new_etag {
            Some(ref etag) if !etag.is_empty() => {
                self.cache.store(id, etag, Arc::clone(&body))
            }
            _ => self.cache.forget(id),
        }
        Ok(body)
    }

    pub async fn get_measurement(&self, id: &str) -> Result<Measurement, MeasurementError> {
        let body = self.get_measurement_raw(id).await?;
        serde_json::from_slice(&body).map_err(|e| {
            MeasurementError::new(
                MeasurementErrorKind::Decode,
                format!(
                    "invalid get measurement format returned: {} {}",
                    e,
                    String::from_utf8_lossy(&body)
                ),
            )
        })
    }

    /// Poll until the measurement leaves `in-progress`.
    pub async fn await_measurement(&self, id: &str) -> Result<Measurement, MeasurementError> {
        loop {
            let measurement = self.get_measurement(id).await?;
            if measurement.status != MeasurementStatus::InProgress {
                return Ok(measurement);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Rate limits and credits for the caller (IP or account).
    pub async fn limits(&self) -> Result<LimitsResponse, MeasurementError> {
        let token = self.store.get().await?;
        let url = format!("{}/limits", self.api_url);
        tracing::debug!("GET {}", url);

        let mut req = self.http.get(&url).header(ACCEPT_ENCODING, "br");
        if let Some(ref t) = token {
            req = req.header(AUTHORIZATION, t.authorization());
        }
        let resp = req.send().await.map_err(|_| {
            MeasurementError::new(
                MeasurementErrorKind::Request,
                "request failed - please try again later",
            )
        })?;
        let status = resp.status();
        let body = read_body(resp).await?;
        if status != StatusCode::OK {
            let data: MeasurementErrorResponse =
                serde_json::from_slice(&body).unwrap_or_default();
            let message = if data.error.message.is_empty() {
                format!("unexpected status code: {}", status)
            } else {
                data.error.message
            };
            return Err(
                MeasurementError::new(MeasurementErrorKind::Api, message)
                    .with_code(status.as_u16()),
            );
        }
        serde_json::from_slice(&body).map_err(|_| {
            MeasurementError::new(
                MeasurementErrorKind::Decode,
                "invalid format returned - please report this bug",
            )
        })
    }

    /// Start the browser login; see [`Authorization`].
    pub async fn authorize(&self) -> Result<Authorization, AuthError> {
        self.flow.start().await
    }

    /// Introspect `token`, or the current token when `token` is empty.
    pub async fn token_introspection(
        &self,
        token: &str,
    ) -> Result<IntrospectionResponse, AuthError> {
        let token = if token.is_empty() {
            match self.store.get().await {
                Ok(Some(t)) => t.access_token,
                Ok(None) => {
                    return Err(AuthError::new(
                        AuthErrorKind::NotAuthorized,
                        "client is not authorized",
                    ))
                }
                Err(e) => {
                    return Err(AuthError::new(AuthErrorKind::NotAuthorized, e.to_string()))
                }
            }
        } else {
            token.to_string()
        };
        self.exchange.introspect(&token).await
    }

    /// Store a manually supplied access token after checking it is active.
    /// Returns the username it belongs to.
    pub async fn login_with_token(&self, access_token: &str) -> Result<String, AuthError> {
        if access_token.is_empty() {
            return Err(AuthError::new(AuthErrorKind::NotAuthorized, "empty token"));
        }
        let introspection = self.exchange.introspect(access_token).await?;
        if !introspection.active {
            return Err(AuthError::new(AuthErrorKind::NotAuthorized, "invalid token"));
        }
        self.store
            .update(Some(Token::from_access_token(access_token)))
            .await;
        Ok(introspection.username)
    }

    /// Revoke the refresh token (if any) and forget the stored token.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let current = match self.store.current().await {
            Some(t) => t,
            None => return Ok(()),
        };
        self.exchange.revoke(&current.refresh_token).await?;
        self.store.update(None).await;
        Ok(())
    }

    pub async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        self.exchange.revoke(token).await
    }
}

/// Read the full body, undoing `Content-Encoding: br`.
async fn read_body(resp: reqwest::Response) -> Result<Vec<u8>, MeasurementError> {
    let brotli = resp
        .headers()
        .get(CONTENT_ENCODING)
        .map_or(false, |v| v.as_bytes().eq_ignore_ascii_case(b"br"));
    let bytes = resp.bytes().await.map_err(|_| {
        MeasurementError::new(MeasurementErrorKind::Request, "failed to read response body")
    })?;
    if !brotli {
        return Ok(bytes.to_vec());
    }
    let mut decompressed = Vec::new();
    brotli::Decompressor::new(&bytes[..], 4096)
        .read_to_end(&mut decompressed)
        .map_err(|e| {
            MeasurementError::new(
                MeasurementErrorKind::Decode,
                format!("failed to decompress response body: {}", e),
            )
        })?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::test_clock::{default_time, FixedClock};
    use chrono::Duration as ChronoDuration;
    use std::io::Write;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ClientConfig {
        ClientConfig {
            api_url: server.uri(),
            auth_url: server.uri(),
            dashboard_url: server.uri(),
            client_id: "<client_id>".into(),
            client_secret: "<client_secret>".into(),
            clock: Arc::new(FixedClock(default_time())),
            callback_ports: vec![0],
            ..ClientConfig::default()
        }
    }

    fn valid_token() -> Token {
        Token {
            access_token: "tok3n".into(),
            token_type: "bearer".into(),
            refresh_token: "refresh_tok3n".into(),
            expires_in: 3600,
            expiry: Some(default_time() + ChronoDuration::hours(1)),
        }
    }

    fn ping() -> MeasurementCreate {
        MeasurementCreate {
            measurement_type: "ping".into(),
            target: "jsdelivr.com".into(),
            limit: 1,
            locations: vec![],
            in_progress_updates: false,
            measurement_options: None,
        }
    }

    fn created() -> ResponseTemplate {
        ResponseTemplate::new(202).set_body_json(serde_json::json!({
            "id": "nzGzfAGL7sZfUs3c",
            "probesCount": 1
        }))
    }

    fn refreshed() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new_token",
            "token_type": "bearer",
            "refresh_token": "new_refresh_token",
            "expires_in": 3600
        }))
    }

    fn brotli(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, 11, 22);
            w.write_all(data).unwrap();
        }
        out
    }

    #[tokio::test]
    async fn test_create_anonymous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .and(header("Accept-Encoding", "br"))
            .and(body_string_contains("\"type\":\"ping\""))
            .respond_with(created())
            .expect(1)
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let res = client.create_measurement(&ping()).await.unwrap();
        assert_eq!(res.id, "nzGzfAGL7sZfUs3c");
        assert_eq!(res.probes_count, 1);

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
        assert!(requests[0]
            .headers
            .get("user-agent")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("globalping-cli/v"));
    }

    #[tokio::test]
    async fn test_create_expired_token_is_refreshed_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(refreshed())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .and(header("Authorization", "bearer new_token"))
            .respond_with(created())
            .expect(1)
            .mount(&server)
            .await;

        let mut token = valid_token();
        token.expiry = Some(default_time() - ChronoDuration::seconds(1));
        let client = GlobalpingClient::new(ClientConfig {
            token: Some(token),
            ..config(&server)
        })
        .unwrap();

        let res = client.submit(&ping()).await.unwrap();
        assert_eq!(res.id, "nzGzfAGL7sZfUs3c");
    }

    #[tokio::test]
    async fn test_create_rejected_token_refresh_and_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .and(header("Authorization", "bearer tok3n"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "type": "unauthorized", "message": "Unauthorized." }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("refresh_token=refresh_tok3n"))
            .respond_with(refreshed())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .and(header("Authorization", "bearer new_token"))
            .respond_with(created())
            .expect(1)
            .mount(&server)
            .await;

        let saved = Arc::new(Mutex::new(Vec::<Option<Token>>::new()));
        let sink = Arc::clone(&saved);
        let client = GlobalpingClient::new(ClientConfig {
            token: Some(valid_token()),
            on_token_change: Some(Arc::new(move |t: Option<&Token>| {
                sink.lock().unwrap().push(t.cloned());
            })),
            ..config(&server)
        })
        .unwrap();

        let res = client.submit(&ping()).await.unwrap();
        assert_eq!(res.id, "nzGzfAGL7sZfUs3c");
        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].as_ref().unwrap().access_token, "new_token");
    }

    #[tokio::test]
    async fn test_concurrent_submits_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .and(header("Authorization", "bearer tok3n"))
            .respond_with(
                ResponseTemplate::new(401).set_delay(std::time::Duration::from_millis(100)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(refreshed().set_delay(std::time::Duration::from_millis(50)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .and(header("Authorization", "bearer new_token"))
            .respond_with(created())
            .expect(2)
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(ClientConfig {
            token: Some(valid_token()),
            ..config(&server)
        })
        .unwrap();

        let payload = ping();
        let (a, b) = tokio::join!(client.submit(&payload), client.submit(&payload));
        assert_eq!(a.unwrap().id, "nzGzfAGL7sZfUs3c");
        assert_eq!(b.unwrap().id, "nzGzfAGL7sZfUs3c");
        assert_eq!(
            client.token_store().current().await.unwrap().access_token,
            "new_token"
        );
    }

    #[tokio::test]
    async fn test_create_rejected_static_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(refreshed())
            .expect(0)
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(ClientConfig {
            access_token: Some("static".into()),
            ..config(&server)
        })
        .unwrap();

        let err = client.create_measurement(&ping()).await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::Unauthorized);
        assert_eq!(err.code, Some(403));
        assert_eq!(err.message, INVALID_TOKEN);
    }

    #[tokio::test]
    async fn test_create_refresh_rejected_signs_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(ClientConfig {
            token: Some(valid_token()),
            ..config(&server)
        })
        .unwrap();

        let err = client.submit(&ping()).await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::Unauthorized);
        assert_eq!(err.message, INVALID_REFRESH_TOKEN);
        assert_eq!(client.token_store().current().await, None);
    }

    #[tokio::test]
    async fn test_create_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "type": "validation_error",
                    "message": "Parameter validation failed.",
                    "params": {
                        "measurement": "\"measurement\" does not match any of the allowed types",
                        "target": "\"target\" must be a valid hostname"
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.create_measurement(&ping()).await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::Validation);
        assert_eq!(
            err.message,
            "invalid parameters\n - \"measurement\" does not match any of the allowed types\n - \"target\" must be a valid hostname"
        );
    }

    #[tokio::test]
    async fn test_create_no_probes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "error": { "type": "no_probes_found", "message": "No suitable probes found." }
            })))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.create_measurement(&ping()).await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::NoProbesFound);
        assert_eq!(err.code, Some(422));
    }

    #[tokio::test]
    async fn test_create_rate_limited_anonymous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("X-RateLimit-Remaining", "0")
                    .insert_header("X-Credits-Remaining", "0")
                    .insert_header("X-RateLimit-Reset", "5")
                    .set_body_json(serde_json::json!({
                        "error": { "type": "rate_limit_exceeded", "message": "Too many requests." }
                    })),
            )
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.create_measurement(&ping()).await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::RateLimitExceeded);
        assert_eq!(
            err.message,
            "You have run out of credits for this session. You can wait 5 seconds for the rate limit to reset or get higher limits by creating an account. Sign up at https://dash.globalping.io?view=add-credits"
        );
    }

    #[tokio::test]
    async fn test_create_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/measurements"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.create_measurement(&ping()).await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::Api);
        assert_eq!(err.message, "internal server error - please try again later");
    }

    #[tokio::test]
    async fn test_fetch_uses_etag_cache() {
        let server = MockServer::start().await;
        let body = br#"{"id":"abc","type":"ping","status":"finished","target":"jsdelivr.com","results":[]}"#;
        Mock::given(method("GET"))
            .and(path("/measurements/abc"))
            .and(header("If-None-Match", "\"e1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/measurements/abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"e1\"")
                    .set_body_bytes(&body[..]),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let first = client.get_measurement_raw("abc").await.unwrap();
        let second = client.get_measurement_raw("abc").await.unwrap();
        assert_eq!(&*first, &body[..]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_brotli_body() {
        let server = MockServer::start().await;
        let body = br#"{"id":"abc","type":"ping","status":"in-progress","target":"jsdelivr.com"}"#;
        Mock::given(method("GET"))
            .and(path("/measurements/abc"))
            .and(header("Accept-Encoding", "br"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "br")
                    .insert_header("ETag", "e1")
                    .set_body_bytes(brotli(body)),
            )
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let m = client.get_measurement("abc").await.unwrap();
        assert_eq!(m.status, MeasurementStatus::InProgress);
        assert_eq!(m.target, "jsdelivr.com");
    }

    #[tokio::test]
    async fn test_fetch_unexpected_304_is_cache_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/measurements/abc"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.get_measurement_raw("abc").await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::CacheMiss);
        assert_eq!(err.message, "response not found in etags cache");
    }

    #[tokio::test]
    async fn test_fetch_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/measurements/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/measurements/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/measurements/teapot"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.get_measurement_raw("missing").await.unwrap_err();
        assert_eq!(err.kind(), MeasurementErrorKind::NotFound);
        assert_eq!(err.message, "measurement not found");
        let err = client.get_measurement_raw("broken").await.unwrap_err();
        assert_eq!(err.message, "internal server error - please try again later");
        let err = client.get_measurement_raw("teapot").await.unwrap_err();
        assert_eq!(err.message, "response code 418");
    }

    #[tokio::test]
    async fn test_fetch_attaches_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/measurements/abc"))
            .and(header("Authorization", "bearer tok3n"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(ClientConfig {
            token: Some(valid_token()),
            ..config(&server)
        })
        .unwrap();
        let body = client.get_measurement_raw("abc").await.unwrap();
        assert_eq!(&*body, b"{}");
    }

    #[tokio::test]
    async fn test_await_measurement_polls_until_finished() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/measurements/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc", "type": "ping", "status": "in-progress", "target": "a"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/measurements/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc", "type": "ping", "status": "finished", "target": "a"
            })))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let m = client.await_measurement("abc").await.unwrap();
        assert_eq!(m.status, MeasurementStatus::Finished);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_limits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limits"))
            .and(header("Authorization", "bearer tok3n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rateLimit": { "measurements": { "create": {
                    "type": "user", "limit": 500, "remaining": 350, "reset": 600
                } } },
                "credits": { "remaining": 1000 }
            })))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(ClientConfig {
            token: Some(valid_token()),
            ..config(&server)
        })
        .unwrap();
        let limits = client.limits().await.unwrap();
        let create = &limits.rate_limit.measurements.create;
        assert_eq!(create.limit_type, crate::models::CreateLimitType::User);
        assert_eq!(create.remaining, 350);
        assert_eq!(limits.credits.remaining, 1000);
    }

    #[tokio::test]
    async fn test_introspection_uses_current_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/introspect"))
            .and(body_string_contains("token=tok3n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true, "username": "user"
            })))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(ClientConfig {
            token: Some(valid_token()),
            ..config(&server)
        })
        .unwrap();
        let res = client.token_introspection("").await.unwrap();
        assert!(res.active);
        assert_eq!(res.username, "user");
    }

    #[tokio::test]
    async fn test_introspection_anonymous_not_authorized() {
        let server = MockServer::start().await;
        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.token_introspection("").await.unwrap_err();
        assert_eq!(err.kind(), &AuthErrorKind::NotAuthorized);
    }

    #[tokio::test]
    async fn test_logout_without_refresh_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let saved = Arc::new(Mutex::new(Vec::<Option<Token>>::new()));
        let sink = Arc::clone(&saved);
        let client = GlobalpingClient::new(ClientConfig {
            token: Some(Token::from_access_token("tok3n")),
            on_token_change: Some(Arc::new(move |t: Option<&Token>| {
                sink.lock().unwrap().push(t.cloned());
            })),
            ..config(&server)
        })
        .unwrap();

        client.logout().await.unwrap();
        assert_eq!(client.token_store().current().await, None);
        assert_eq!(*saved.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_logout_revokes_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/revoke"))
            .and(body_string_contains("token=refresh_tok3n"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(ClientConfig {
            token: Some(valid_token()),
            ..config(&server)
        })
        .unwrap();
        client.logout().await.unwrap();
        assert_eq!(client.token_store().current().await, None);
    }

    #[tokio::test]
    async fn test_login_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/introspect"))
            .and(body_string_contains("token=good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true, "username": "user"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/introspect"))
            .and(body_string_contains("token=bad"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "active": false })),
            )
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(config(&server)).unwrap();
        let err = client.login_with_token("bad").await.unwrap_err();
        assert_eq!(err.description, "invalid token");
        assert_eq!(client.token_store().current().await, None);

        let username = client.login_with_token("good").await.unwrap();
        assert_eq!(username, "user");
        let token = client.token_store().current().await.unwrap();
        assert_eq!(token.access_token, "good");
        assert_eq!(token.expiry, None);
    }
}
