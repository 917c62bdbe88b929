use rusqlite::ErrorCode;
use vellum_core::VellumError;

/// Translate a SQLite error into the store-neutral taxonomy
pub fn map_sqlite_error(error: rusqlite::Error) -> VellumError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                VellumError::Throttled(format!("database is busy: {error}"))
            }
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure
            | ErrorCode::FileLockingProtocolFailed => {
                VellumError::Unavailable(format!("database unavailable: {error}"))
            }
            ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied
            | ErrorCode::ReadOnly => {
                VellumError::Forbidden(error.to_string())
            }
            ErrorCode::ConstraintViolation => VellumError::duplicate(error.to_string()),
            _ => VellumError::internal("sqlite operation failed", &error),
        },
        _ => VellumError::internal("sqlite operation failed", &error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_and_locked_are_throttled() {
        assert_eq!(map_sqlite_error(failure(rusqlite::ffi::SQLITE_BUSY)).status().code(), 429);
        assert_eq!(map_sqlite_error(failure(rusqlite::ffi::SQLITE_LOCKED)).status().code(), 429);
    }

    #[test]
    fn test_other_failures() {
        assert_eq!(map_sqlite_error(failure(rusqlite::ffi::SQLITE_CANTOPEN)).status().code(), 503);
        assert_eq!(map_sqlite_error(failure(rusqlite::ffi::SQLITE_PERM)).status().code(), 403);
        assert_eq!(
            map_sqlite_error(rusqlite::Error::QueryReturnedNoRows).status().code(),
            500
        );
    }
}
