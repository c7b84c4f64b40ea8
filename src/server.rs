//! HTTP facade: tool execution, JSON-RPC endpoint, notification pull.
//!
//! Thin adapter from JSON requests to the tool surface. The facade owns the
//! rate limiter (and its sweep task) and enforces the content-type and
//! body-size perimeter; everything under `/mcp` carries rate-limit headers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, Path, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::ratelimit::{Decision, RateLimitConfig, RateLimiter, spawn_sweeper};
use crate::safety::signing;
use crate::store::Store;
use crate::tools::{Tools, tool_descriptors};

const MAX_BODY_BYTES: usize = 1024 * 1024;
const JSONRPC_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server handle: bound address plus shutdown plumbing.
pub struct ApiServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    sweeper_tx: watch::Sender<bool>,
}

#[derive(Clone)]
struct AppState {
    tools: Tools,
    store: Arc<dyn Store>,
    limiter: Arc<RateLimiter>,
    config: Arc<Config>,
}

impl ApiServer {
    /// Bind and start serving. The rate limiter's sweep task lives and dies
    /// with this server.
    pub async fn start(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        ratelimit: RateLimitConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.http_addr)
            .await
            .with_context(|| format!("failed to bind listener on {}", config.http_addr))?;
        let actual_addr = listener.local_addr()?;

        let limiter = Arc::new(RateLimiter::new(ratelimit));
        let (_sweeper_handle, sweeper_tx) = spawn_sweeper(limiter.clone());

        let state = AppState {
            tools: Tools::new(store.clone(), config.clone()),
            store,
            limiter,
            config,
        };

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(run_server(listener, state, shutdown_rx));

        info!(addr = %actual_addr, "api server started");

        Ok(Self {
            addr: actual_addr,
            shutdown_tx,
            sweeper_tx,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and kill the sweep task.
    pub async fn shutdown(self) {
        let _ = self.sweeper_tx.send(true);
        let _ = self.shutdown_tx.send(());
    }
}

async fn run_server(
    listener: TcpListener,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let app = build_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    })
    .await
    .ok();
}

fn build_router(state: AppState) -> Router {
    // Layer order matters: the rate limiter is layered last, so it runs
    // outermost and stamps its headers on every /mcp response, including
    // the 415s produced by the content-type check.
    let mcp = Router::new()
        .route("/", post(jsonrpc_endpoint))
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route("/notifications/{session_id}", get(pull_notifications))
        .route("/webhooks/verify", post(verify_signature))
        .layer(middleware::from_fn(require_json_content_type))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_layer,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/mcp", mcp)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

// ============================================================================
// Middleware
// ============================================================================

/// POST bodies must be JSON; anything else is 415 before the handler runs.
async fn require_json_content_type(req: Request<Body>, next: Next) -> Response {
    if req.method() == axum::http::Method::POST {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Json(json!({
                    "success": false,
                    "error": "Content-Type must be application/json",
                })),
            )
                .into_response();
        }
    }
    next.run(req).await
}

/// Source key: first hop of the trust-proxied chain, else the connection
/// peer. Never anything the client can choose per-request beyond its IP.
fn client_key(req: &Request<Body>, peer: SocketAddr) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

async fn rate_limit_layer(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&req, peer);

    match state.limiter.check(&key, Utc::now()) {
        Decision::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", header_num(limit as i64));
            headers.insert("x-ratelimit-remaining", header_num(remaining as i64));
            response
        }
        Decision::Denied {
            limit,
            retry_after_secs,
        } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "success": false,
                    "error": "Rate limit exceeded; retry later",
                })),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", header_num(limit as i64));
            headers.insert("x-ratelimit-remaining", header_num(0));
            headers.insert(header::RETRY_AFTER, header_num(retry_after_secs));
            response
        }
    }
}

fn header_num(value: i64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

// ============================================================================
// Handlers
// ============================================================================

async fn healthz() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "tempo",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_tools() -> Json<Value> {
    Json(json!({"tools": tool_descriptors()}))
}

#[derive(Debug, Deserialize)]
struct ToolCallContext {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolCallBody {
    tool: String,
    #[serde(default)]
    params: Value,
    context: Option<ToolCallContext>,
}

fn session_of(context: Option<&ToolCallContext>) -> String {
    context
        .and_then(|c| c.session_id.clone())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn call_tool(State(state): State<AppState>, Json(body): Json<ToolCallBody>) -> Json<Value> {
    let session_id = session_of(body.context.as_ref());
    Json(run_tool(&state, &body.tool, &body.params, &session_id).await)
}

/// Execute a tool and fold the error policy into the wire shape.
async fn run_tool(state: &AppState, tool: &str, params: &Value, session_id: &str) -> Value {
    match state.tools.execute(tool, params, session_id).await {
        Ok(result) => result,
        Err(err) => {
            if err.is_internal() {
                error!(tool, error = %err, "tool execution failed internally");
            }
            let dev_mode = !state.config.environment.is_production();
            json!({"success": false, "error": err.wire_message(dev_mode)})
        }
    }
}

async fn pull_notifications(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    match state
        .store
        .pull_notifications(&session_id, Utc::now())
        .await
    {
        Ok(notifications) => {
            let items: Vec<Value> = notifications
                .iter()
                .map(|n| {
                    json!({
                        "id": n.id.to_string(),
                        "task_id": n.task_id.to_string(),
                        "payload": n.payload,
                        "created_at": n.created_at.to_rfc3339(),
                    })
                })
                .collect();
            Json(json!({"success": true, "count": items.len(), "notifications": items}))
        }
        Err(err) => {
            error!(error = %err, "notification pull failed");
            Json(json!({"success": false, "error": "An error occurred processing your request"}))
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    payload: Value,
    signature: String,
    timestamp: String,
}

/// Sample verifier for webhook receivers: checks a signature produced by
/// the dispatcher against this server's secret.
async fn verify_signature(
    State(state): State<AppState>,
    Json(body): Json<VerifyBody>,
) -> Json<Value> {
    let payload_bytes = match &body.payload {
        Value::String(raw) => raw.clone().into_bytes(),
        other => serde_json::to_vec(other).unwrap_or_default(),
    };

    match signing::verify(
        &state.config.hmac_secret,
        &payload_bytes,
        &body.signature,
        &body.timestamp,
        signing::default_max_skew(),
        Utc::now(),
    ) {
        Ok(()) => Json(json!({"valid": true})),
        Err(err) => Json(json!({"valid": false, "error": err.to_string()})),
    }
}

// ============================================================================
// JSON-RPC
// ============================================================================

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn jsonrpc_endpoint(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    let Value::Object(ref request) = body else {
        return Json(rpc_error(Value::Null, -32600, "Invalid Request"));
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Json(rpc_error(id, -32600, "Invalid Request"));
    }
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return Json(rpc_error(id, -32600, "Invalid Request"));
    };
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let response = match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": JSONRPC_PROTOCOL_VERSION,
                "serverInfo": {"name": "tempo", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {"tools": {}},
            }),
        ),
        "tools/list" => rpc_result(id, json!({"tools": tool_descriptors()})),
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Json(rpc_error(id, -32600, "Invalid Request"));
            };
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("anonymous");
            let result = run_tool(&state, name, &arguments, session_id).await;
            rpc_result(id, result)
        }
        _ => rpc_error(id, -32601, "Method not found"),
    };
    Json(response)
}
