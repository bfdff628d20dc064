use crate::model::ReservationStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict with existing booking: {with}")]
    Conflict { with: String },
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("authentication failed")]
    Authentication,
    #[error("{0} still has bookings")]
    HasBookings(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl From<crate::model::TimeError> for EngineError {
    fn from(e: crate::model::TimeError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
