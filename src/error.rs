use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "postgres")]
use tokio_postgres;

#[derive(Debug, Error)]
pub enum SqlDalError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Row mapping error: {0}")]
    Mapping(String),

    #[error("Query returned {0} rows where at most one was expected")]
    MultipleResults(usize),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("A transaction is already in progress on this data layer")]
    TransactionInProgress,

    #[error("Transaction already completed")]
    TransactionCompleted,

    #[error("Other database error: {0}")]
    Other(String),
}

/// Coarse classification of an error, used to decide between bulk fallback and propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connectivity, timeout, or protocol failure while talking to the store.
    Store,
    /// Data or constraint violation reported by the store.
    Constraint,
    /// Caller-requested abort.
    Cancellation,
    /// Anything unrelated to the store's view of the data (bad parameters, mapping, misuse).
    Fatal,
}

impl ErrorClass {
    /// Store and constraint failures can be retried row by row; nothing else can.
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorClass::Store | ErrorClass::Constraint)
    }
}

impl SqlDalError {
    /// Classify this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            #[cfg(feature = "sqlite")]
            SqlDalError::SqliteError(err) => classify_sqlite(err),
            #[cfg(feature = "postgres")]
            SqlDalError::PostgresError(err) => classify_postgres(err),
            SqlDalError::ExecutionError(_) => ErrorClass::Store,
            SqlDalError::Cancelled => ErrorClass::Cancellation,
            SqlDalError::ConfigError(_)
            | SqlDalError::ConnectionError(_)
            | SqlDalError::ParameterError(_)
            | SqlDalError::Mapping(_)
            | SqlDalError::MultipleResults(_)
            | SqlDalError::TransactionInProgress
            | SqlDalError::TransactionCompleted
            | SqlDalError::Other(_) => ErrorClass::Fatal,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.class() == ErrorClass::Cancellation
    }

    #[must_use]
    pub fn is_constraint(&self) -> bool {
        self.class() == ErrorClass::Constraint
    }
}

#[cfg(feature = "sqlite")]
fn classify_sqlite(err: &rusqlite::Error) -> ErrorClass {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            rusqlite::ErrorCode::ConstraintViolation => ErrorClass::Constraint,
            rusqlite::ErrorCode::OperationInterrupted => ErrorClass::Cancellation,
            _ => ErrorClass::Store,
        },
        // raised by rusqlite on the client side, never by the store
        _ => ErrorClass::Fatal,
    }
}

#[cfg(feature = "postgres")]
fn classify_postgres(err: &tokio_postgres::Error) -> ErrorClass {
    err.code().map_or(ErrorClass::Store, classify_sqlstate)
}

#[cfg(feature = "postgres")]
fn classify_sqlstate(state: &tokio_postgres::error::SqlState) -> ErrorClass {
    if *state == tokio_postgres::error::SqlState::QUERY_CANCELED {
        ErrorClass::Cancellation
    } else if state.code().starts_with("23") {
        // SQLSTATE class 23: integrity constraint violation
        ErrorClass::Constraint
    } else {
        ErrorClass::Store
    }
}
