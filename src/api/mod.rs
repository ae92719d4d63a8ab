//! HTTP Collaborator Layer
//!
//! Thin validation and forwarding over the engine, the coordinator and the
//! store. Error kinds map onto status codes here; nothing below this layer
//! knows about HTTP.

pub mod handlers;
pub mod routes;

use crate::clearnode::ClearnodeError;
use crate::services::matching::EngineError;
use crate::services::session::SessionError;
use crate::utils::response::AppError;

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match &e {
            EngineError::Validation(msg) => AppError::bad_request(msg),
            EngineError::Expired => AppError::bad_request("order expired"),
            EngineError::CommitmentMismatch(msg) => {
                AppError::forbidden("COMMITMENT_MISMATCH", msg)
            }
            EngineError::NotOwner => AppError::forbidden("NOT_OWNER", "not the order owner"),
            EngineError::OrderTerminal => {
                AppError::conflict("ORDER_TERMINAL", "order already terminal")
            }
            EngineError::ChannelFull => AppError::overloaded("engine saturated, retry later"),
            EngineError::OrderNotFound(_) => AppError::not_found(&e.to_string()),
            EngineError::Storage(_) | EngineError::Chain(_) => AppError::internal(&e.to_string()),
        }
    }
}

impl From<ClearnodeError> for AppError {
    fn from(e: ClearnodeError) -> Self {
        match &e {
            ClearnodeError::Timeout => AppError::timeout("clearing network timed out"),
            ClearnodeError::Unauthenticated(msg) => AppError::unauthenticated(msg),
            _ => AppError::internal(&e.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NoPendingSession(_) | SessionError::NotFound(_) => {
                AppError::not_found(&e.to_string())
            }
            SessionError::Clearnode(inner) => inner.into(),
            SessionError::Storage(inner) => AppError::internal(&inner.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::internal(&e.to_string())
    }
}
