//! Session handlers: create, join, get, setPhase.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_core::{LobbyError, Phase, Session, SessionCode, UserId};
use huddle_session::ClientContext;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::deadline::with_deadline;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::handlers::{require_param, require_string_param};
use crate::rpc::registry::MethodHandler;
use crate::rpc::types::RpcEvent;

/// Pushed to every connection of a session after a phase change.
pub const EVENT_SESSION_PHASE: &str = "session.phase";

/// What any holder of the join code may see. User ids are left out since
/// they admit a connection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Join code.
    pub code: SessionCode,
    /// Game kind.
    pub game_type: String,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Player names in join order.
    pub players: Vec<String>,
    /// Write stamp.
    pub revision: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            code: session.id.clone(),
            game_type: session.game_type.clone(),
            phase: session.phase,
            players: session.players.iter().map(|p| p.name.clone()).collect(),
            revision: session.revision,
            created_at: session.created_at,
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Internal {
        message: e.to_string(),
    })
}

/// Create a lobby and return its join code plus the master's credentials.
pub struct CreateSessionHandler;

#[async_trait]
impl MethodHandler for CreateSessionHandler {
    #[instrument(skip(self, ctx), fields(method = "session.create"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let game_type = require_string_param(params.as_ref(), "gameType")?;
        let sessions = Arc::clone(&ctx.sessions);
        let created = with_deadline(ctx.request_timeout, async move {
            sessions.create_session(&game_type, &ClientContext::default()).await
        })
        .await?;
        to_value(&created)
    }
}

/// Join a lobby under a display name.
pub struct JoinSessionHandler;

#[async_trait]
impl MethodHandler for JoinSessionHandler {
    #[instrument(skip(self, ctx), fields(method = "session.join"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let code = SessionCode::from(require_string_param(params.as_ref(), "code")?);
        let name = require_string_param(params.as_ref(), "name")?;
        let sessions = Arc::clone(&ctx.sessions);
        let joined = with_deadline(ctx.request_timeout, async move {
            sessions.join_session(&code, &name).await
        })
        .await?;
        to_value(&joined)
    }
}

/// Public snapshot of a session.
pub struct GetSessionHandler;

#[async_trait]
impl MethodHandler for GetSessionHandler {
    #[instrument(skip(self, ctx), fields(method = "session.get"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let code = SessionCode::from(require_string_param(params.as_ref(), "code")?);
        let sessions = Arc::clone(&ctx.sessions);
        let session = with_deadline(ctx.request_timeout, async move {
            sessions.get_session(&code).await
        })
        .await?;
        to_value(&SessionSnapshot::from(&session))
    }
}

/// Advance the phase of a session. Only its master may do this.
pub struct SetPhaseHandler;

#[async_trait]
impl MethodHandler for SetPhaseHandler {
    #[instrument(skip(self, ctx), fields(method = "session.setPhase"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let code = SessionCode::from(require_string_param(params.as_ref(), "code")?);
        let user_id = UserId::from(require_string_param(params.as_ref(), "userId")?);
        let phase: Phase = serde_json::from_value(require_param(params.as_ref(), "phase")?.clone())
            .map_err(|_| RpcError::InvalidParams {
                message: "Parameter 'phase' must be one of LOBBY, ACTIVE, FINISHED".into(),
            })?;

        let sessions = Arc::clone(&ctx.sessions);
        let target = code.clone();
        let session = with_deadline(ctx.request_timeout, async move {
            let current = sessions.get_session(&target).await?;
            if current.master.user_id != user_id {
                return Err(LobbyError::unauthorized(format!(
                    "Only the master of {target} may change its phase"
                )));
            }
            sessions.set_phase(&target, phase).await
        })
        .await?;

        let event = RpcEvent::new(
            EVENT_SESSION_PHASE,
            Some(code.to_string()),
            Some(json!({ "phase": session.phase, "revision": session.revision })),
        );
        if let Err(e) = ctx.hub.broadcast(&code, &event).await {
            warn!(code = %code, error = %e, "phase change not broadcast");
        }
        to_value(&SessionSnapshot::from(&session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::test_helpers::make_test_context;
    use assert_matches::assert_matches;

    async fn create(ctx: &RpcContext) -> Value {
        CreateSessionHandler
            .handle(Some(json!({"gameType": "kooky-quiz"})), ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_returns_code_and_master() {
        let ctx = make_test_context();
        let created = create(&ctx).await;
        let code = created["code"].as_str().unwrap();
        assert_eq!(code.len(), 5);
        let address = created["connectionAddress"].as_str().unwrap();
        let master = created["masterUserId"].as_str().unwrap();
        assert_eq!(
            address,
            format!("ws://localhost:50051/ws/kooky-quiz/{code}/{master}")
        );
    }

    #[tokio::test]
    async fn create_rejects_unknown_game() {
        let ctx = make_test_context();
        let err = CreateSessionHandler
            .handle(Some(json!({"gameType": "chess"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn create_requires_game_type() {
        let ctx = make_test_context();
        let err = CreateSessionHandler.handle(None, &ctx).await.unwrap_err();
        assert_matches!(err, RpcError::InvalidParams { .. });
    }

    #[tokio::test]
    async fn join_then_duplicate_conflicts() {
        let ctx = make_test_context();
        let code = create(&ctx).await["code"].as_str().unwrap().to_owned();

        let joined = JoinSessionHandler
            .handle(Some(json!({"code": code, "name": "  Alice "})), &ctx)
            .await
            .unwrap();
        assert!(joined["connectionAddress"].as_str().unwrap().contains(&code));

        let err = JoinSessionHandler
            .handle(Some(json!({"code": code, "name": "Alice"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn join_unknown_code() {
        let ctx = make_test_context();
        let err = JoinSessionHandler
            .handle(Some(json!({"code": "ZZZZZ", "name": "Alice"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn get_hides_user_ids() {
        let ctx = make_test_context();
        let code = create(&ctx).await["code"].as_str().unwrap().to_owned();
        let _ = JoinSessionHandler
            .handle(Some(json!({"code": code, "name": "Alice"})), &ctx)
            .await
            .unwrap();

        let snapshot = GetSessionHandler
            .handle(Some(json!({"code": code})), &ctx)
            .await
            .unwrap();
        assert_eq!(snapshot["phase"], "LOBBY");
        assert_eq!(snapshot["players"], json!(["Alice"]));
        assert_eq!(snapshot["revision"], 2);
        assert!(snapshot.get("master").is_none());
    }

    #[tokio::test]
    async fn master_advances_phase() {
        let ctx = make_test_context();
        let created = create(&ctx).await;
        let params = json!({
            "code": created["code"],
            "userId": created["masterUserId"],
            "phase": "ACTIVE",
        });
        let snapshot = SetPhaseHandler.handle(Some(params), &ctx).await.unwrap();
        assert_eq!(snapshot["phase"], "ACTIVE");
    }

    #[tokio::test]
    async fn player_cannot_change_phase() {
        let ctx = make_test_context();
        let code = create(&ctx).await["code"].as_str().unwrap().to_owned();
        let joined = JoinSessionHandler
            .handle(Some(json!({"code": code, "name": "Alice"})), &ctx)
            .await
            .unwrap();
        let params = json!({"code": code, "userId": joined["userId"], "phase": "ACTIVE"});
        let err = SetPhaseHandler.handle(Some(params), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn bad_phase_is_invalid_params() {
        let ctx = make_test_context();
        let created = create(&ctx).await;
        let params = json!({
            "code": created["code"],
            "userId": created["masterUserId"],
            "phase": "PAUSED",
        });
        let err = SetPhaseHandler.handle(Some(params), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn backward_phase_is_validation_error() {
        let ctx = make_test_context();
        let created = create(&ctx).await;
        let mut params = json!({
            "code": created["code"],
            "userId": created["masterUserId"],
            "phase": "FINISHED",
        });
        let _ = SetPhaseHandler.handle(Some(params.clone()), &ctx).await.unwrap();
        params["phase"] = json!("ACTIVE");
        let err = SetPhaseHandler.handle(Some(params), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
