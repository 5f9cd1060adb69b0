//! HTTP surface: session routes, the authorized WebSocket upgrade, and
//! `POST /rpc`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use huddle_core::{ErrorKind, LobbyError, SessionCode, UserId};
use huddle_session::ClientContext;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::deadline::with_deadline;
use crate::hub::run_ws_session;
use crate::metrics::{HTTP_REQUESTS_TOTAL, WS_REJECTIONS_TOTAL};
use crate::rpc::errors::PARSE_ERROR;
use crate::rpc::types::{RpcRequest, RpcResponse};
use crate::server::AppState;

/// HTTP status for a session error. Caller mistakes are 400, retry-safe
/// failures 503, an expired deadline 504.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError
        | ErrorKind::NotFound
        | ErrorKind::Conflict
        | ErrorKind::Unauthorized => StatusCode::BAD_REQUEST,
        ErrorKind::CapacityExceeded | ErrorKind::StoreUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// `{"error": {"message", "code"}}` with the matching status.
pub fn error_response(err: &LobbyError) -> Response {
    let kind = err.kind();
    let body = json!({
        "error": {
            "message": err.public_message(),
            "code": kind.code(),
        }
    });
    (status_for(kind), Json(body)).into_response()
}

fn data_response<T: Serialize>(data: &T) -> Response {
    (StatusCode::OK, Json(json!({ "data": data }))).into_response()
}

/// Request origin, for logs only.
pub struct ClientInfo(pub ClientContext);

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(client_context(&parts.headers, parts.extensions.get::<ConnectInfo<SocketAddr>>())))
    }
}

/// First `X-Forwarded-For` hop, else the peer address.
fn client_context(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> ClientContext {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty());
    ClientContext {
        remote_addr: forwarded.or_else(|| peer.map(|ConnectInfo(addr)| addr.to_string())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned),
    }
}

/// Body of `POST /api/v1/session/new`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    /// Game kind to host.
    #[serde(alias = "gameName")]
    pub game_type: String,
}

/// Body of `POST /api/v1/session/join`.
#[derive(Debug, Deserialize)]
pub struct JoinSessionBody {
    /// Join code.
    #[serde(alias = "gameId")]
    pub code: String,
    /// Requested display name.
    #[serde(alias = "playerName")]
    pub name: String,
}

fn record_http(route: &'static str, status: StatusCode) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => status.as_str().to_owned()
    )
    .increment(1);
}

fn body_error(rejection: &JsonRejection) -> LobbyError {
    LobbyError::validation(rejection.body_text())
}

/// POST /api/v1/session/new
#[instrument(skip_all)]
pub async fn create_session(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    body: Result<Json<CreateSessionBody>, JsonRejection>,
) -> Response {
    let response = match body {
        Err(rejection) => error_response(&body_error(&rejection)),
        Ok(Json(body)) => {
            let sessions = Arc::clone(&state.ctx.sessions);
            let result = with_deadline(state.ctx.request_timeout, async move {
                sessions.create_session(&body.game_type, &client).await
            })
            .await;
            match result {
                Ok(created) => data_response(&created),
                Err(err) => error_response(&err),
            }
        }
    };
    record_http("session.new", response.status());
    response
}

/// POST /api/v1/session/join
#[instrument(skip_all)]
pub async fn join_session(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    body: Result<Json<JoinSessionBody>, JsonRejection>,
) -> Response {
    let response = match body {
        Err(rejection) => error_response(&body_error(&rejection)),
        Ok(Json(JoinSessionBody { code, name })) => {
            debug!(
                code = %code,
                remote_addr = client.remote_addr.as_deref().unwrap_or("-"),
                "join requested"
            );
            let sessions = Arc::clone(&state.ctx.sessions);
            let code = SessionCode::from(code);
            let result = with_deadline(state.ctx.request_timeout, async move {
                sessions.join_session(&code, &name).await
            })
            .await;
            match result {
                Ok(joined) => data_response(&joined),
                Err(err) => error_response(&err),
            }
        }
    };
    record_http("session.join", response.status());
    response
}

/// GET /ws/{game}/{code}/{user}
///
/// Authorization runs before the upgrade; a refused request never becomes a
/// WebSocket.
#[instrument(skip_all)]
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path((game_type, code, user)): Path<(String, String, String)>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let code = SessionCode::from(code);
    let sessions = Arc::clone(&state.ctx.sessions);
    let target = code.clone();
    let authorized = with_deadline(state.ctx.request_timeout, async move {
        sessions
            .authorize(&game_type, &target, &UserId::from(user))
            .await
    })
    .await;

    let participant = match authorized {
        Ok(participant) => participant,
        Err(err) => {
            counter!(WS_REJECTIONS_TOTAL, "reason" => err.kind().code()).increment(1);
            info!(code = %code, error = %err, "connection refused");
            return error_response(&err);
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.ctx.hub.clone();
    let config = Arc::clone(&state.config);
    let shutdown = state.shutdown.token();
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, code, participant, hub, config, shutdown))
}

/// POST /rpc
#[instrument(skip_all)]
pub async fn rpc(State(state): State<AppState>, body: String) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "unparseable RPC request");
            return Json(RpcResponse::error("", PARSE_ERROR, format!("Invalid request: {e}")));
        }
    };
    Json(state.registry.dispatch(request, &state.ctx).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn caller_errors_are_400() {
        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::Unauthorized,
        ] {
            assert_eq!(status_for(kind), StatusCode::BAD_REQUEST, "{kind}");
        }
    }

    #[test]
    fn retry_safe_errors_are_503_and_timeout_504() {
        assert_eq!(status_for(ErrorKind::CapacityExceeded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::StoreUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn error_body_shape() {
        let resp = error_response(&LobbyError::not_found("AB3F9"));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["code"], "NOT_FOUND");
        assert_eq!(parsed["error"]["message"], "No game with code AB3F9 exists");
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let _ = headers.insert(header::USER_AGENT, HeaderValue::from_static("quiz-client/2.1"));
        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)));

        let ctx = client_context(&headers, Some(&peer));
        assert_eq!(ctx.remote_addr.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("quiz-client/2.1"));
    }

    #[test]
    fn peer_address_fallback() {
        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)));
        let ctx = client_context(&HeaderMap::new(), Some(&peer));
        assert_eq!(ctx.remote_addr.as_deref(), Some("127.0.0.1:4000"));
        assert!(ctx.user_agent.is_none());
        assert_eq!(client_context(&HeaderMap::new(), None), ClientContext::default());
    }

    #[test]
    fn body_aliases() {
        let create: CreateSessionBody =
            serde_json::from_str(r#"{"gameName":"kooky-quiz"}"#).unwrap();
        assert_eq!(create.game_type, "kooky-quiz");
        let join: JoinSessionBody =
            serde_json::from_str(r#"{"gameId":"AB3F9","playerName":"Alice"}"#).unwrap();
        assert_eq!(join.code, "AB3F9");
        assert_eq!(join.name, "Alice");
    }
}
