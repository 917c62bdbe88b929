use std::fmt;
use thiserror::Error;

/// Outcome codes surfaced to callers, mirroring HTTP status semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    PreconditionFailed,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    /// Numeric HTTP code for this status
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::Conflict => 409,
            Status::PreconditionFailed => 412,
            Status::TooManyRequests => 429,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Which optimistic-concurrency precondition was violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A create found an existing record with the same identity
    Duplicate,
    /// The stored ETag no longer matches the one read by the caller
    EtagMismatch,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Duplicate => write!(f, "duplicate"),
            ConflictKind::EtagMismatch => write!(f, "etag mismatch"),
        }
    }
}

/// A single validation failure on a record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone)]
pub enum VellumError {
    #[error("Validation failed: {}", join_violations(.0))]
    ValidationFailed(Vec<Violation>),

    #[error("Conflict ({kind}): {message}")]
    Conflict { kind: ConflictKind, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unexpected backend fault. `detail` is kept for operators and never
    /// rendered by `Display`.
    #[error("Internal error: {message}")]
    Internal { message: String, detail: String },
}

pub type Result<T> = std::result::Result<T, VellumError>;

impl VellumError {
    pub fn duplicate(message: impl Into<String>) -> Self {
        VellumError::Conflict {
            kind: ConflictKind::Duplicate,
            message: message.into(),
        }
    }

    pub fn etag_mismatch(message: impl Into<String>) -> Self {
        VellumError::Conflict {
            kind: ConflictKind::EtagMismatch,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>, detail: impl fmt::Display) -> Self {
        VellumError::Internal {
            message: message.into(),
            detail: detail.to_string(),
        }
    }

    /// Map onto the HTTP-style status taxonomy
    pub fn status(&self) -> Status {
        match self {
            VellumError::ValidationFailed(_)
            | VellumError::Unsupported(_)
            | VellumError::Serialization(_) => Status::BadRequest,
            VellumError::Conflict {
                kind: ConflictKind::Duplicate,
                ..
            } => Status::Conflict,
            VellumError::Conflict {
                kind: ConflictKind::EtagMismatch,
                ..
            } => Status::PreconditionFailed,
            VellumError::NotFound(_) => Status::NotFound,
            VellumError::Forbidden(_) => Status::Forbidden,
            VellumError::Throttled(_) => Status::TooManyRequests,
            VellumError::Unavailable(_) => Status::ServiceUnavailable,
            VellumError::Cancelled | VellumError::Config(_) | VellumError::Internal { .. } => {
                Status::InternalServerError
            }
        }
    }

    /// Transient faults the caller may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, VellumError::Throttled(_) | VellumError::Unavailable(_))
    }

    /// Both duplicate creates and stale ETags; the caller must re-read
    pub fn is_conflict(&self) -> bool {
        matches!(self, VellumError::Conflict { .. })
    }

    /// Operator-facing detail for internal faults
    pub fn detail(&self) -> Option<&str> {
        match self {
            VellumError::Internal { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for VellumError {
    fn from(err: serde_json::Error) -> Self {
        VellumError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for VellumError {
    fn from(err: anyhow::Error) -> Self {
        VellumError::internal("unexpected failure", format!("{err:#}"))
    }
}

impl From<tokio::task::JoinError> for VellumError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            VellumError::Cancelled
        } else {
            VellumError::internal("blocking task failed", err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(VellumError::duplicate("x").status().code(), 409);
        assert_eq!(VellumError::etag_mismatch("x").status().code(), 412);
        assert_eq!(VellumError::Throttled("x".into()).status().code(), 429);
        assert_eq!(VellumError::Unavailable("x".into()).status().code(), 503);
        assert_eq!(VellumError::ValidationFailed(vec![]).status().code(), 400);
        assert_eq!(VellumError::Forbidden("x".into()).status().code(), 403);
    }

    #[test]
    fn test_internal_detail_hidden_from_display() {
        let err = VellumError::internal("write failed", "MDB_CORRUPTED at page 42");
        assert!(!err.to_string().contains("page 42"));
        assert_eq!(err.detail(), Some("MDB_CORRUPTED at page 42"));
    }

    #[test]
    fn test_validation_lists_every_violation() {
        let err = VellumError::ValidationFailed(vec![
            Violation::new("id", "must not be empty"),
            Violation::new("partitionKey", "must not be empty"),
        ]);
        let text = err.to_string();
        assert!(text.contains("id: must not be empty"));
        assert!(text.contains("partitionKey: must not be empty"));
        assert!(!err.is_retryable());
    }
}
