//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Target identifier is not registered with the relay
    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    /// Operation was superseded by a teardown
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Short machine-readable code, used on the wire and in metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidStateTransition(_) => "INVALID_STATE",
            DomainError::Unreachable(_) => "UNREACHABLE",
            DomainError::MediaAcquisition(_) => "MEDIA_ACQUISITION",
            DomainError::Negotiation(_) => "NEGOTIATION",
            DomainError::TransportDisconnected(_) => "TRANSPORT_DISCONNECTED",
            DomainError::Cancelled(_) => "CANCELLED",
            DomainError::ValidationError(_) => "VALIDATION",
            DomainError::Conflict(_) => "CONFLICT",
            DomainError::Internal(_) => "INTERNAL",
        }
    }
}
