use metrika_common::{MetricError, MetricKind, Transient};
use sea_orm::{DbErr, RuntimeErr};
use std::path::PathBuf;

/// Errors raised by storage backends.
///
/// # Examples
///
/// ```rust
/// use metrika_common::{MetricKind, Transient};
/// use metrika_storage::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: MetricKind::Gauge,
///     name: "Alloc".to_string(),
/// };
/// assert!(err.to_string().contains("Alloc"));
/// assert!(!err.is_transient());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The snapshot file could not be opened, read or written.
    #[error("Storage: snapshot file {} unavailable: {source}", path.display())]
    FileUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database could not be reached. Worth retrying.
    #[error("Storage: database connection error: {0}")]
    DatabaseConnection(DbErr),

    #[error("Storage: database error: {0}")]
    Database(DbErr),

    #[error("Storage: {0} is not supported by the {1} backend")]
    Unsupported(&'static str, &'static str),

    #[error("Storage: metric {kind}/{name} not found")]
    NotFound { kind: MetricKind, name: String },

    #[error("Storage: {0}")]
    Metric(#[from] MetricError),

    #[error("Storage: snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<DbErr> for StorageError {
    fn from(err: DbErr) -> Self {
        if is_connection_error(&err) {
            StorageError::DatabaseConnection(err)
        } else {
            StorageError::Database(err)
        }
    }
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::FileUnavailable { .. } | StorageError::DatabaseConnection(_)
        )
    }
}

fn is_connection_error(err: &DbErr) -> bool {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            is_connection_sqlx(e)
        }
        _ => false,
    }
}

/// Pool failures, socket errors and SQLSTATE class 08 (connection exception).
fn is_connection_sqlx(err: &sea_orm::sqlx::Error) -> bool {
    use sea_orm::sqlx::Error;
    match err {
        Error::Io(_) | Error::PoolTimedOut | Error::PoolClosed | Error::WorkerCrashed => true,
        Error::Database(db) => db.code().map(|c| c.starts_with("08")).unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::ConnAcquireErr;

    #[test]
    fn connection_errors_are_transient() {
        let err = StorageError::from(DbErr::ConnectionAcquire(ConnAcquireErr::Timeout));
        assert!(matches!(err, StorageError::DatabaseConnection(_)));
        assert!(err.is_transient());

        let err = StorageError::from(DbErr::Conn(RuntimeErr::Internal("refused".into())));
        assert!(err.is_transient());
    }

    #[test]
    fn other_db_errors_are_permanent() {
        let err = StorageError::from(DbErr::Custom("constraint".into()));
        assert!(matches!(err, StorageError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn file_errors_are_transient() {
        let err = StorageError::FileUnavailable {
            path: PathBuf::from("/tmp/x.json"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.is_transient());
    }
}
