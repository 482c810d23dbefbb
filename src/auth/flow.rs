//! Browser-based authorization: PKCE + a loopback HTTP server on localhost
//! that receives the redirect and exchanges the code.
//!
//! The server runs as a spawned task. The caller gets an [`Authorization`]
//! handle carrying the URLs to show, a completion future, and an idempotent
//! shutdown.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

use super::error::{AuthError, AuthErrorKind};
use super::exchange::{CallbackParams, TokenExchangeClient};
use super::pkce;
use super::store::TokenStore;

/// Documented redirect ports registered for the CLI client, tried in order.
pub const CALLBACK_PORTS: [u16; 10] = [
    60000, 60010, 60020, 60030, 60040, 60100, 60110, 60120, 60130, 60140,
];

const MAX_REQUEST_HEAD: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    ListenerBound,
    AwaitingCallback,
    Exchanging,
    Succeeded,
    Failed,
}

pub struct AuthorizationFlow {
    exchange: Arc<TokenExchangeClient>,
    store: Arc<TokenStore>,
    dashboard_url: String,
    ports: Vec<u16>,
}

impl AuthorizationFlow {
    pub fn new(
        exchange: Arc<TokenExchangeClient>,
        store: Arc<TokenStore>,
        dashboard_url: impl Into<String>,
        ports: Vec<u16>,
    ) -> Self {
        Self {
            exchange,
            store,
            dashboard_url: dashboard_url.into().trim_end_matches('/').to_string(),
            ports,
        }
    }

    /// Bind the callback listener and start serving it.
    ///
    /// Fails only when none of the candidate ports can be bound.
    pub async fn start(&self) -> Result<Authorization, AuthError> {
        let state = Arc::new(Mutex::new(FlowState::Idle));
        let verifier = pkce::generate_verifier();
        let challenge = pkce::challenge(&verifier);

        let (listener, port) = bind_first(&self.ports).await?;
        let callback_url = format!("http://localhost:{}/callback", port);
        tracing::debug!("Callback listener bound on port {}", port);
        *state.lock().unwrap_or_else(|e| e.into_inner()) = FlowState::ListenerBound;

        let authorize_url = url::Url::parse_with_params(
            &format!("{}/oauth/authorize", self.exchange.auth_url()),
            &[
                ("client_id", self.exchange.client_id()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("response_type", "code"),
                ("scope", "measurements"),
                ("redirect_uri", callback_url.as_str()),
            ],
        )
        .map_err(|e| AuthError::new(AuthErrorKind::ServerFailed, e.to_string()))?
        .to_string();

        let (done_tx, done_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let ctx = Arc::new(CallbackContext {
            exchange: Arc::clone(&self.exchange),
            store: Arc::clone(&self.store),
            verifier,
            callback_url: callback_url.clone(),
            dashboard_url: self.dashboard_url.clone(),
            done: Mutex::new(Some(done_tx)),
            shutdown: Arc::clone(&shutdown_tx),
            state: Arc::clone(&state),
        });
        tokio::spawn(serve(listener, ctx, shutdown_rx));

        Ok(Authorization {
            authorize_url,
            callback_url,
            done: done_rx,
            shutdown: shutdown_tx,
            state,
        })
    }
}

/// Handle to an in-flight browser authorization.
pub struct Authorization {
    authorize_url: String,
    callback_url: String,
    done: oneshot::Receiver<Result<(), AuthError>>,
    shutdown: Arc<watch::Sender<bool>>,
    state: Arc<Mutex<FlowState>>,
}

impl Authorization {
    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    pub fn state(&self) -> FlowState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop the callback server. Safe to call any number of times.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolve once the redirect has been handled (or the server died).
    pub async fn wait(mut self) -> Result<(), AuthError> {
        match (&mut self.done).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::new(
                AuthErrorKind::ServerFailed,
                format!("callback server stopped while {:?}", self.state()),
            )),
        }
    }
}

impl Drop for Authorization {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct CallbackContext {
    exchange: Arc<TokenExchangeClient>,
    store: Arc<TokenStore>,
    verifier: String,
    callback_url: String,
    dashboard_url: String,
    done: Mutex<Option<oneshot::Sender<Result<(), AuthError>>>>,
    shutdown: Arc<watch::Sender<bool>>,
    state: Arc<Mutex<FlowState>>,
}

impl CallbackContext {
    fn set_state(&self, state: FlowState) {
        tracing::debug!("Authorization flow -> {:?}", state);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn take_done(&self) -> Option<oneshot::Sender<Result<(), AuthError>>> {
        self.done.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn finish(&self, result: Result<(), AuthError>) {
        if let Some(done) = self.take_done() {
            let _ = done.send(result);
        }
    }
}

async fn bind_first(ports: &[u16]) -> Result<(TcpListener, u16), AuthError> {
    let mut last_err = None;
    for &port in ports {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                let bound = listener
                    .local_addr()
                    .map_err(|e| AuthError::new(AuthErrorKind::ServerFailed, e.to_string()))?
                    .port();
                return Ok((listener, bound));
            }
            Err(e) => {
                tracing::debug!("Port {} unavailable: {}", port, e);
                last_err = Some(e);
            }
        }
    }
    Err(AuthError::new(
        AuthErrorKind::ServerFailed,
        match last_err {
            Some(e) => format!("no callback port available: {}", e),
            None => "no callback ports configured".to_string(),
        },
    ))
}

async fn serve(
    listener: TcpListener,
    ctx: Arc<CallbackContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    ctx.set_state(FlowState::AwaitingCallback);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&ctx), shutdown.clone()));
                }
                Err(e) => {
                    tracing::warn!("Callback server stopped: {}", e);
                    ctx.set_state(FlowState::Failed);
                    ctx.finish(Err(AuthError::new(AuthErrorKind::ServerFailed, e.to_string())));
                    break;
                }
            }
        }
    }
    // Nobody can deliver a redirect any more.
    if let Some(done) = ctx.take_done() {
        ctx.set_state(FlowState::Failed);
        let _ = done.send(Err(AuthError::new(
            AuthErrorKind::ServerFailed,
            "callback server shut down before the redirect arrived",
        )));
    }
    tracing::debug!("Callback server shut down");
}

async fn handle_connection(
    mut stream: TcpStream,
    ctx: Arc<CallbackContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    if *shutdown.borrow() {
        return;
    }
    let target = tokio::select! {
        target = read_request_target(&mut stream) => target,
        _ = shutdown.changed() => None,
    };
    let target = match target {
        Some(t) => t,
        None => return,
    };
    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    if path != "/callback" {
        let _ = write_response(&mut stream, "404 Not Found", None).await;
        return;
    }
    // First redirect wins; late or repeated hits get nothing to exchange.
    let done = match ctx.take_done() {
        Some(done) => done,
        None => {
            let _ = write_response(&mut stream, "410 Gone", None).await;
            return;
        }
    };

    ctx.set_state(FlowState::Exchanging);
    let params = CallbackParams::from_query(query);
    let result = ctx
        .exchange
        .exchange(&params, &ctx.verifier, &ctx.callback_url)
        .await;

    let location = match result {
        Ok(_) => format!("{}/authorize/success", ctx.dashboard_url),
        Err(ref e) => {
            tracing::warn!("Authorization failed: {}", e);
            format!("{}/authorize/error", ctx.dashboard_url)
        }
    };
    if let Err(e) = write_response(&mut stream, "302 Found", Some(&location)).await {
        tracing::debug!("Failed to redirect browser: {}", e);
    }

    tokio::spawn(async move {
        ctx.shutdown.send_replace(true);
        let outcome = match result {
            Ok(token) => {
                ctx.store.update(Some(token)).await;
                ctx.set_state(FlowState::Succeeded);
                Ok(())
            }
            Err(e) => {
                ctx.set_state(FlowState::Failed);
                Err(e)
            }
        };
        let _ = done.send(outcome);
    });
}

/// Read the request head and return the request target (`/path?query`).
async fn read_request_target(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        if buf.len() >= MAX_REQUEST_HEAD {
            return None;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    parts.next().map(str::to_string)
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    location: Option<&str>,
) -> std::io::Result<()> {
    let mut resp = format!("HTTP/1.1 {}\r\n", status);
    if let Some(location) = location {
        resp.push_str(&format!("Location: {}\r\n", location));
    }
    resp.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(resp.as_bytes()).await?;
    stream.shutdown().await
}
