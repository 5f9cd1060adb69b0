//! RPC error codes and error type.

use huddle_core::LobbyError;

use crate::rpc::types::RpcErrorBody;

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Request body was not a valid RPC envelope.
pub const PARSE_ERROR: &str = "PARSE_ERROR";

/// RPC error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] LobbyError),

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Session(err) => err.kind().code(),
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code().to_owned(),
            message: sanitize_error_message(self),
        }
    }
}

/// Message safe for clients: store and internal details are not leaked.
pub fn sanitize_error_message(err: &RpcError) -> String {
    match err {
        RpcError::InvalidParams { message } => message.clone(),
        RpcError::Session(err) => err.public_message(),
        RpcError::Internal { .. } => "Internal error".to_string(),
    }
}
