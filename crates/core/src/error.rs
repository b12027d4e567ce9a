//! Unified error types for markgo-shell.
//!
//! Display strings carry a stable upper-case code prefix so tool output and logs
//! can be matched without parsing messages.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the delivery layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty post body).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Network unreachable, connection reset, offline gate closed.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// HTTP error response where a success was required.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Fetched document lacks the expected content region.
    #[error("STRUCTURE_MISMATCH: {0}")]
    StructureMismatch(String),

    /// Definitive 401/403 from the origin.
    #[error("AUTH_REJECTED: status {0}")]
    AuthRejected(u16),

    /// The origin answered a live submission with a non-auth rejection.
    #[error("REJECTED: status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Precache population failed; the agent stays uninstalled.
    #[error("INSTALL_FAILED: {0}")]
    InstallFailed(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Persistent store refused a write because it is full.
    #[error("QUOTA_EXCEEDED: {0}")]
    QuotaExceeded(String),
}

impl Error {
    /// Transport-class failures: the request never produced a usable response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_) | Error::FetchTooLarge(_))
    }
}

fn is_disk_full(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::DiskFull))
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e.into(),
            other => Error::Database(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if is_disk_full(&err) {
            return Error::QuotaExceeded(err.to_string());
        }
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::Network(msg) => (-32006, msg.clone()),
            Error::HttpError(msg) => (-32008, msg.clone()),
            Error::FetchTooLarge(msg) => (-32007, msg.clone()),
            Error::StructureMismatch(msg) => (-32000, msg.clone()),
            Error::AuthRejected(status) => (-32009, format!("not authorized (status {status})")),
            Error::Rejected { status, message } => (-32010, format!("status {status}: {message}")),
            Error::InstallFailed(msg) => (-32011, msg.clone()),
            Error::QuotaExceeded(msg) => (-32012, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

/// Outcome of an operation whose failure must never reach the primary path.
///
/// Background revalidation, content-tier writes, eviction sweeps and quota-limited
/// persistence all report through this type instead of discarding the error.
#[derive(Debug)]
pub enum BestEffort {
    Applied,
    Ignored(Error),
}

impl BestEffort {
    /// Fold a result into a best-effort outcome, logging the ignored failure.
    pub fn from_result<T>(result: Result<T, Error>, operation: &str) -> Self {
        match result {
            Ok(_) => BestEffort::Applied,
            Err(err) => {
                tracing::warn!(operation, error = %err, "best-effort operation failed, ignoring");
                BestEffort::Ignored(err)
            }
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, BestEffort::Ignored(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            BestEffort::Applied => None,
            BestEffort::Ignored(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::StructureMismatch("no #main-content".to_string());
        assert!(err.to_string().contains("STRUCTURE_MISMATCH"));
        assert!(err.to_string().contains("#main-content"));
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::AuthRejected(403);
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32009);
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::Network("offline".into()).is_transport());
        assert!(!Error::AuthRejected(401).is_transport());
        assert!(!Error::HttpError("status 500".into()).is_transport());
    }

    #[test]
    fn test_disk_full_maps_to_quota() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            Some("database or disk is full".into()),
        );
        assert!(matches!(Error::from(err), Error::QuotaExceeded(_)));
    }

    #[test]
    fn test_best_effort_records_ignored_error() {
        let ok = BestEffort::from_result(Ok::<_, Error>(()), "put");
        assert!(!ok.is_ignored());

        let ignored = BestEffort::from_result(Err::<(), _>(Error::QuotaExceeded("full".into())), "put");
        assert!(ignored.is_ignored());
        assert!(matches!(ignored.error(), Some(Error::QuotaExceeded(_))));
    }
}
