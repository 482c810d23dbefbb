//! OAuth2 token endpoint calls: code exchange, refresh, revoke, introspection
//!
//! Requests are built by the `oauth2` client and sent through the shared
//! reqwest client. Failures are classified into [`AuthErrorKind`] per
//! operation; nothing here retries or touches state.

use std::future::Future;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oauth2::basic::{BasicErrorResponse, BasicRevocationErrorResponse};
use oauth2::{
    AccessToken, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret,
    EmptyExtraTokenFields, ErrorResponse, HttpRequest, HttpResponse, IntrospectionUrl,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, RevocationUrl, Scope,
    StandardRevocableToken, StandardTokenIntrospectionResponse, TokenIntrospectionResponse,
    TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthErrorKind};
use super::tokens::{Clock, Token};

/// Query parameters delivered to the loopback `/callback`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// RFC 7662 §2.1 introspection response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrospectionResponse {
    pub active: bool,
    pub scope: String,
    pub client_id: String,
    pub username: String,
    pub token_type: String,
    /// Expiration time, unix seconds
    pub exp: i64,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Not before, unix seconds
    pub nbf: i64,
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub jti: String,
}

impl From<StandardTokenIntrospectionResponse<EmptyExtraTokenFields, TokenTypeName>>
    for IntrospectionResponse
{
    fn from(res: StandardTokenIntrospectionResponse<EmptyExtraTokenFields, TokenTypeName>) -> Self {
        let text = |v: Option<&str>| v.unwrap_or_default().to_string();
        Self {
            active: res.active(),
            scope: res
                .scopes()
                .map(|scopes| {
                    scopes
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default(),
            client_id: text(res.client_id().map(|c| c.as_str())),
            username: text(res.username()),
            token_type: text(res.token_type().map(|t| t.0.as_str())),
            exp: res.exp().map_or(0, |t| t.timestamp()),
            iat: res.iat().map_or(0, |t| t.timestamp()),
            nbf: res.nbf().map_or(0, |t| t.timestamp()),
            sub: text(res.sub()),
            aud: res.aud().map(|a| a.join(" ")).unwrap_or_default(),
            iss: text(res.iss()),
            jti: text(res.jti()),
        }
    }
}

/// `token_type` exactly as the server spelled it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenTypeName(pub String);

impl oauth2::TokenType for TokenTypeName {}

/// RFC 6749 §5.1 token response. Every field but `access_token` may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEndpointResponse {
    access_token: AccessToken,
    #[serde(default)]
    token_type: TokenTypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(default)]
    expires_in: i64,
}

impl TokenResponse<TokenTypeName> for TokenEndpointResponse {
    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &TokenTypeName {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        u64::try_from(self.expires_in)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<Scope>> {
        None
    }
}

impl TokenEndpointResponse {
    fn into_token(self, clock: &dyn Clock) -> Token {
        Token {
            access_token: self.access_token.secret().to_string(),
            token_type: self.token_type.0,
            refresh_token: self
                .refresh_token
                .map(|t| t.secret().to_string())
                .unwrap_or_default(),
            expires_in: self.expires_in,
            expiry: None,
        }
        .stamp(clock)
    }
}

type OAuthClient = oauth2::Client<
    BasicErrorResponse,
    TokenEndpointResponse,
    TokenTypeName,
    StandardTokenIntrospectionResponse<EmptyExtraTokenFields, TokenTypeName>,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Stateless client for the authorization server's token endpoints.
pub struct TokenExchangeClient {
    http: reqwest::Client,
    oauth: OAuthClient,
    auth_url: String,
    client_id: String,
    clock: Arc<dyn Clock>,
}

impl TokenExchangeClient {
    pub fn new(
        http: reqwest::Client,
        auth_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, url::ParseError> {
        let auth_url = auth_url.into().trim_end_matches('/').to_string();
        let client_id = client_id.into();

        let oauth = OAuthClient::new(
            ClientId::new(client_id.clone()),
            Some(ClientSecret::new(client_secret.into())),
            AuthUrl::new(format!("{}/oauth/authorize", auth_url))?,
            Some(TokenUrl::new(format!("{}/oauth/token", auth_url))?),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_revocation_uri(RevocationUrl::new(format!("{}/oauth/token/revoke", auth_url))?)
        .set_introspection_uri(IntrospectionUrl::new(format!(
            "{}/oauth/token/introspect",
            auth_url
        ))?);

        Ok(Self {
            http,
            oauth,
            auth_url,
            client_id,
            clock,
        })
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Trade the authorization code from the redirect for a token.
    pub async fn exchange(
        &self,
        params: &CallbackParams,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<Token, AuthError> {
        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(AuthError::new(
                AuthErrorKind::Authorization(error.to_string()),
                params.error_description.clone().unwrap_or_default(),
            ));
        }
        let code = match params.code.as_deref() {
            Some(code) if !code.is_empty() => code,
            _ => {
                return Err(AuthError::new(
                    AuthErrorKind::MissingCode,
                    "missing code in response",
                ))
            }
        };
        let redirect_uri = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| AuthError::new(AuthErrorKind::ExchangeFailed, e.to_string()))?;

        tracing::debug!("Exchanging authorization code at {}/oauth/token", self.auth_url);
        let client = self.oauth.clone().set_redirect_uri(redirect_uri);
        let status = AtomicU16::new(0);
        let res = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()))
            .request_async(|req| self.send(req, &status))
            .await
            .map_err(|e| request_error(AuthErrorKind::ExchangeFailed, &status, e))?;
        Ok(res.into_token(self.clock()))
    }

    /// Trade a refresh token for a new token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token, AuthError> {
        tracing::debug!("Refreshing token at {}/oauth/token", self.auth_url);
        let status = AtomicU16::new(0);
        let res = self
            .oauth
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(|req| self.send(req, &status))
            .await
            .map_err(|e| request_error(AuthErrorKind::RefreshFailed, &status, e))?;
        Ok(res.into_token(self.clock()))
    }

    /// Revoke a refresh token. An empty token is a no-op.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        if token.is_empty() {
            return Ok(());
        }
        tracing::debug!("Revoking token at {}/oauth/token/revoke", self.auth_url);
        let status = AtomicU16::new(0);
        self.oauth
            .revoke_token(StandardRevocableToken::RefreshToken(RefreshToken::new(
                token.to_string(),
            )))
            .map_err(|e| AuthError::new(AuthErrorKind::RevokeFailed, e.to_string()))?
            .request_async(|req| self.send(req, &status))
            .await
            .map_err(|e| request_error(AuthErrorKind::RevokeFailed, &status, e))
    }

    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, AuthError> {
        tracing::debug!("Introspecting token at {}/oauth/token/introspect", self.auth_url);
        let status = AtomicU16::new(0);
        let token = AccessToken::new(token.to_string());
        let res = self
            .oauth
            .introspect(&token)
            .map_err(|e| AuthError::new(AuthErrorKind::IntrospectionFailed, e.to_string()))?
            .request_async(|req| self.send(req, &status))
            .await
            .map_err(|e| request_error(AuthErrorKind::IntrospectionFailed, &status, e))?;
        Ok(res.into())
    }

    /// Transport for the oauth2 requests. Records the response status in
    /// `status` so failures can carry it.
    fn send<'a>(
        &'a self,
        request: HttpRequest,
        status: &'a AtomicU16,
    ) -> impl Future<Output = Result<HttpResponse, reqwest::Error>> + 'a {
        async move {
            let resp = self
                .http
                .request(request.method, request.url.as_str())
                .headers(request.headers)
                .body(request.body)
                .send()
                .await?;
            let status_code = resp.status();
            status.store(status_code.as_u16(), Ordering::Relaxed);
            if !status_code.is_success() {
                tracing::debug!("POST {} returned {}", request.url, status_code);
            }
            let headers = resp.headers().clone();
            let body = resp.bytes().await?.to_vec();
            Ok(HttpResponse {
                status_code,
                headers,
                body,
            })
        }
    }
}

/// Classify an oauth2 request failure. Server error bodies go through
/// [`AuthError::from_response`] so `invalid_grant` is recognised.
fn request_error<T>(
    kind: AuthErrorKind,
    status: &AtomicU16,
    err: RequestTokenError<reqwest::Error, T>,
) -> AuthError
where
    T: ErrorResponse + 'static,
{
    let status = reqwest::StatusCode::from_u16(status.load(Ordering::Relaxed))
        .ok()
        .filter(|s| !s.is_success());
    match (err, status) {
        (RequestTokenError::ServerResponse(server), Some(status)) => {
            let body = serde_json::to_vec(&server).unwrap_or_default();
            AuthError::from_response(kind, status, &body)
        }
        (RequestTokenError::Parse(_, body), Some(status)) => {
            AuthError::from_response(kind, status, &body)
        }
        (RequestTokenError::Other(_), Some(status)) => AuthError::from_response(kind, status, b""),
        (err, _) => AuthError::new(kind, err.to_string()),
    }
}
