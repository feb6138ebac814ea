use tokio_util::sync::CancellationToken;

use crate::config::StoreOptions;
use crate::error::SqlDalError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

#[cfg(feature = "postgres")]
use crate::postgres::PostgresConnection;
#[cfg(feature = "sqlite")]
use crate::sqlite::SqliteConnection;

/// Fail fast when the caller has already cancelled.
///
/// # Errors
/// Returns `SqlDalError::Cancelled` if `cancel` has fired.
pub(crate) fn ensure_not_cancelled(cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(SqlDalError::Cancelled),
        _ => Ok(()),
    }
}

/// One physical connection to the configured store.
///
/// Owned by exactly one call (or one transaction) and closed when dropped.
#[derive(Debug)]
pub enum StoreConnection {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteConnection),
    #[cfg(feature = "postgres")]
    Postgres(PostgresConnection),
}

impl StoreConnection {
    /// Open a fresh connection for `options`.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConnectionError` if the store is unreachable, or
    /// `SqlDalError::Cancelled` if `cancel` fires first.
    pub async fn open(
        options: &StoreOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<Self, SqlDalError> {
        match options.db_type {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => Ok(StoreConnection::Sqlite(
                SqliteConnection::open(options.sqlite_path(), options.busy_timeout, cancel).await?,
            )),
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => Ok(StoreConnection::Postgres(
                PostgresConnection::open(&options.connection_string, cancel).await?,
            )),
        }
    }

    #[must_use]
    pub fn db_type(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(_) => DatabaseType::Sqlite,
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(_) => DatabaseType::Postgres,
        }
    }

    /// Run a SELECT with positional parameters.
    ///
    /// # Errors
    /// Returns the backend's error for preparation or execution failures.
    pub async fn query(
        &self,
        sql: &str,
        params: &[RowValues],
        cancel: Option<&CancellationToken>,
    ) -> Result<ResultSet, SqlDalError> {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(conn) => conn.query(sql, params, cancel).await,
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(conn) => conn.query(sql, params, cancel).await,
        }
    }

    /// Run one write with positional parameters.
    ///
    /// # Errors
    /// Returns the backend's error for preparation or execution failures.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
        cancel: Option<&CancellationToken>,
    ) -> Result<usize, SqlDalError> {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(conn) => conn.execute(sql, params, cancel).await,
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(conn) => conn.execute(sql, params, cancel).await,
        }
    }

    /// Run one prepared write once per parameter set.
    ///
    /// # Errors
    /// Returns the first failing execution's error.
    pub async fn execute_many(
        &self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
        cancel: Option<&CancellationToken>,
    ) -> Result<usize, SqlDalError> {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(conn) => conn.execute_many(sql, param_sets, cancel).await,
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(conn) => conn.execute_many(sql, param_sets, cancel).await,
        }
    }

    /// # Errors
    /// Returns the backend's error if `BEGIN` fails.
    pub async fn begin(&self, cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(conn) => conn.begin(cancel).await,
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(conn) => conn.begin(cancel).await,
        }
    }

    /// # Errors
    /// Returns the backend's error if `COMMIT` fails.
    pub async fn commit(&self, cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(conn) => conn.commit(cancel).await,
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(conn) => conn.commit(cancel).await,
        }
    }

    /// # Errors
    /// Returns the backend's error if `ROLLBACK` fails.
    pub async fn rollback(&self) -> Result<(), SqlDalError> {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(conn) => conn.rollback().await,
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(conn) => conn.rollback().await,
        }
    }

    /// Roll back, logging instead of returning failures.
    pub async fn rollback_best_effort(&self) {
        if let Err(e) = self.rollback().await {
            tracing::warn!(db_type = ?self.db_type(), error = %e, "rollback failed");
        }
    }

    /// Whether the connection can still carry commands.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            StoreConnection::Sqlite(conn) => conn.is_usable(),
            #[cfg(feature = "postgres")]
            StoreConnection::Postgres(conn) => conn.is_usable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_token_is_rejected_up_front() {
        let token = CancellationToken::new();
        assert!(ensure_not_cancelled(Some(&token)).is_ok());
        token.cancel();
        assert!(matches!(
            ensure_not_cancelled(Some(&token)),
            Err(SqlDalError::Cancelled)
        ));
        assert!(ensure_not_cancelled(None).is_ok());
    }
}
