use crate::domain::event::{DomainEventType, Provider};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("illegal transition for {subject}: event {event:?} is not valid from state {state}")]
    IllegalTransition {
        subject: String,
        state: String,
        event: DomainEventType,
    },
    #[error("gateway account {account} is missing the organisation id required by its provider")]
    MissingOrganisationId { account: String },
    #[error("one-off mandate {mandate} must have exactly one payment, found {found}")]
    Cardinality { mandate: String, found: usize },
    #[error("no handler registered for provider {0:?}")]
    UnknownProvider(Provider),
    #[error("state graph already has an edge for ({state}, {event:?})")]
    GraphConstruction {
        state: String,
        event: DomainEventType,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("provider call failed: {0}")]
    ProviderCall(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
