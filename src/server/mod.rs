//! Client-facing HTTP surface.
//!
//! Exposes the gateway as a single JSON-RPC endpoint:
//! - `POST {endpoint}` — JSON-RPC 2.0 requests
//! - `GET {endpoint}` — plain-text API info
//!
//! Responses are framed as a single SSE `event: message` when the client's
//! `Accept` header asks for `text/event-stream`, and as a plain JSON body
//! otherwise. Notifications are acknowledged with `202 Accepted` and no
//! body.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::gateway::types::{error_codes, IncomingRequest, JsonRpcResponse};
use crate::gateway::{Gateway, GatewayError};

/// Bind the listener and serve until ctrl-c, then close the gateway.
pub async fn run(config: &Config, gateway: Arc<Gateway>) -> Result<(), GatewayError> {
    let app = build_router(&config.gateway.endpoint, gateway.clone());

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Server {
            reason: format!("failed to bind {addr}: {e}"),
        })?;

    tracing::info!(%addr, endpoint = %config.gateway.endpoint, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GatewayError::Server {
            reason: format!("server error: {e}"),
        })?;

    gateway.close().await;
    Ok(())
}

/// Build the axum router serving the gateway at `endpoint`.
pub fn build_router(endpoint: &str, gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(endpoint, get(handle_info).post(handle_rpc))
        .with_state(gateway)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn handle_info() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        "MCP Gateway\n\
         \n\
         POST JSON-RPC 2.0 requests to this endpoint. Backend tools are\n\
         reached through the meta-tools: list_tools, describe_tool,\n\
         call_tool. Direct calls to backend tool names are rejected.\n",
    )
        .into_response()
}

async fn handle_rpc(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let sse = wants_sse(&headers);

    // Distinguish malformed JSON (-32700) from a JSON value that is not
    // a request object (-32600).
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            return respond(
                sse,
                JsonRpcResponse::error(
                    Value::Null,
                    error_codes::PARSE_ERROR,
                    format!("parse error: {e}"),
                ),
            );
        }
    };

    let request: IncomingRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return respond(
                sse,
                JsonRpcResponse::error(
                    Value::Null,
                    error_codes::INVALID_REQUEST,
                    format!("invalid request: {e}"),
                ),
            );
        }
    };

    tracing::debug!(method = %request.method, "client request");

    match gateway.handle_request(request).await {
        Some(response) => respond(sse, response),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn wants_sse(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Frame a JSON-RPC response for the wire.
fn respond(sse: bool, response: JsonRpcResponse) -> Response {
    if !sse {
        return Json(response).into_response();
    }

    let json = match serde_json::to_string(&response) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(format!("event: message\ndata: {json}\n\n")))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
