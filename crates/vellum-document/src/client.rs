//! Transport contract of the document database
//!
//! The adapter never talks HTTP itself; it drives a [`DocumentClient`] and
//! translates the status codes it reports.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use vellum_core::{NativeFilter, QuerySpec, VellumError};

/// Status codes reported by the document service
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const FAILED_DEPENDENCY: u16 = 424;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    pub fn is_success(code: u16) -> bool {
        (200..300).contains(&code)
    }
}

#[derive(Debug, Clone, Error)]
#[error("document service returned {status_code}: {message}")]
pub struct ClientError {
    pub status_code: u16,
    pub message: String,
}

impl ClientError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Translate a service status code into the store-neutral taxonomy
pub fn map_status(code: u16, message: impl Into<String>) -> VellumError {
    let message = message.into();
    match code {
        status::NOT_FOUND => VellumError::NotFound(message),
        status::CONFLICT => VellumError::duplicate(message),
        status::PRECONDITION_FAILED => VellumError::etag_mismatch(message),
        status::UNAUTHORIZED | status::FORBIDDEN => VellumError::Forbidden(message),
        status::TOO_MANY_REQUESTS => VellumError::Throttled(message),
        status::REQUEST_TIMEOUT | status::RETRY_WITH | status::SERVICE_UNAVAILABLE => {
            VellumError::Unavailable(message)
        }
        status::BAD_REQUEST => VellumError::internal("document service rejected the request", message),
        other => VellumError::internal(
            "unexpected document service status",
            format!("{other}: {message}"),
        ),
    }
}

impl From<ClientError> for VellumError {
    fn from(e: ClientError) -> Self {
        map_status(e.status_code, e.message)
    }
}

/// One operation of a transactional batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    /// Insert; fails with 409 when the id exists
    Create { item: Value },
    /// Overwrite an existing item; 404 when absent, 412 when `if_match`
    /// differs from the stored ETag
    Replace {
        id: String,
        item: Value,
        if_match: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationResult {
    pub status_code: u16,
}

/// Outcome of a transactional batch, one result per operation in order
///
/// When any operation fails nothing is committed; the failing operation
/// reports its own status and the others report 424.
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    pub results: Vec<OperationResult>,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| status::is_success(r.status_code))
    }
}

/// Query handed to the service's own query engine
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    /// Restrict to one logical partition
    pub partition_key: Option<String>,
    pub filter: NativeFilter,
    /// Applied after `filter`, operators in order
    pub spec: QuerySpec,
    pub max_item_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub items: Vec<Value>,
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountProperties {
    pub id: String,
    pub readable_regions: Vec<String>,
    pub writable_regions: Vec<String>,
}

#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn create_container_if_not_exists(&self, container: &str) -> ClientResult<()>;

    /// Point read; 404 when absent
    async fn read_item(&self, container: &str, partition_key: &str, id: &str) -> ClientResult<Value>;

    /// Execute ordered operations against one partition, all or nothing
    async fn execute_batch(
        &self,
        container: &str,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> ClientResult<BatchResponse>;

    async fn query(
        &self,
        container: &str,
        query: &DocumentQuery,
        continuation: Option<String>,
    ) -> ClientResult<QueryResponse>;

    async fn read_account(&self) -> ClientResult<AccountProperties>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(404, "x").status().code(), 404);
        assert_eq!(map_status(409, "x").status().code(), 409);
        assert_eq!(map_status(412, "x").status().code(), 412);
        assert_eq!(map_status(401, "x").status().code(), 403);
        assert!(map_status(429, "x").is_retryable());
        assert!(map_status(449, "x").is_retryable());
        assert_eq!(map_status(500, "x").status().code(), 500);
    }

    #[test]
    fn test_internal_detail_not_rendered() {
        let err = map_status(400, "partition key mismatch");
        assert!(!err.to_string().contains("partition key mismatch"));
        assert_eq!(err.detail(), Some("partition key mismatch"));
    }
}
