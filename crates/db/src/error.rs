//! Mapping of database failures onto store errors.

use clearbook_core::store::StoreError;
use sea_orm::{DbErr, RuntimeErr, SqlErr};

/// SQLSTATE Postgres raises when a `BIGINT` result is out of range.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

/// SQLSTATE codes Postgres raises for conflicts a retry can clear.
const TRANSIENT_SQLSTATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

/// Converts a database error into a [`StoreError`].
///
/// Connection and transient lock failures become `Unavailable` so callers
/// may retry them.
pub fn db_error(err: DbErr) -> StoreError {
    if is_transient(&err) {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Database(err.to_string())
    }
}

/// Returns true if the error is a unique constraint violation.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Returns true if the statement overflowed a numeric column.
pub fn is_out_of_range(err: &DbErr) -> bool {
    sqlstate(err).is_some_and(|code| code == NUMERIC_OUT_OF_RANGE)
}

fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(e))) => {
            e.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

fn is_transient(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(_)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(_))) => {
            sqlstate(err).is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_str()))
        }
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))) => {
            true
        }
        _ => false,
    }
}

/// Error for a stored value that no longer parses into its domain type.
pub(crate) fn corrupt(what: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(format!("unrecognised {what} '{value}'"))
}

/// Error for a JSON column that fails to decode or encode.
pub(crate) fn json_error(err: &serde_json::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failures_are_retryable() {
        let err = db_error(DbErr::Conn(RuntimeErr::Internal("refused".to_string())));
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_failures_are_not_retryable() {
        let err = db_error(DbErr::RecordNotFound("journal_entries".to_string()));
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_retryable());
        assert!(!is_unique_violation(&DbErr::Custom("boom".to_string())));
        assert!(!is_out_of_range(&DbErr::Custom("boom".to_string())));
    }

    #[test]
    fn test_corrupt_values_are_serialization_errors() {
        assert_eq!(
            corrupt("direction", "sideways").to_string(),
            "Serialization error: unrecognised direction 'sideways'"
        );
    }
}
