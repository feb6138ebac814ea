use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{InterruptHandle, params_from_iter};
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use super::params::convert_params;
use super::query::build_result_set;
use crate::connection::ensure_not_cancelled;
use crate::error::{ErrorClass, SqlDalError};
use crate::results::ResultSet;
use crate::types::RowValues;

type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// A single `SQLite` connection.
///
/// Every statement runs on tokio's blocking pool. Cancelling a call interrupts the running
/// statement through the connection's interrupt handle and waits for the blocking task to
/// release the connection before reporting `SqlDalError::Cancelled`.
pub struct SqliteConnection {
    conn: SharedSqliteConnection,
    interrupt: InterruptHandle,
    path: String,
}

impl SqliteConnection {
    /// Open `path` (a filesystem path or `file:` URI) with the given busy timeout.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConnectionError` if the database cannot be opened, or
    /// `SqlDalError::Cancelled` if `cancel` fires first.
    pub async fn open(
        path: &str,
        busy_timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Self, SqlDalError> {
        ensure_not_cancelled(cancel)?;
        let owned = path.to_owned();
        let mut task = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&owned).map_err(|e| {
                SqlDalError::ConnectionError(format!("cannot open SQLite database {owned:?}: {e}"))
            })?;
            conn.busy_timeout(busy_timeout).map_err(|e| {
                SqlDalError::ConnectionError(format!("cannot set busy timeout: {e}"))
            })?;
            Ok(conn)
        });

        let conn = match cancel {
            Some(token) => tokio::select! {
                biased;
                joined = &mut task => flatten(joined)?,
                () = token.cancelled() => return Err(SqlDalError::Cancelled),
            },
            None => flatten(task.await)?,
        };

        let interrupt = conn.get_interrupt_handle();
        tracing::trace!(path, "sqlite connection opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            path: path.to_owned(),
        })
    }

    /// Run `func` against the connection on the blocking pool, honouring `cancel`.
    async fn run<F, R>(&self, cancel: Option<&CancellationToken>, func: F) -> Result<R, SqlDalError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlDalError> + Send + 'static,
        R: Send + 'static,
    {
        ensure_not_cancelled(cancel)?;
        let conn = Arc::clone(&self.conn);
        let mut task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.blocking_lock();
            func(&mut guard)
        });

        let Some(token) = cancel else {
            return flatten(task.await);
        };
        tokio::select! {
            biased;
            joined = &mut task => flatten(joined),
            () = token.cancelled() => {
                self.interrupt.interrupt();
                // the statement must let go of the connection before it can be rolled back
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "sqlite task failed after interrupt");
                }
                Err(SqlDalError::Cancelled)
            }
        }
    }

    /// Run a SELECT and collect its rows.
    ///
    /// # Errors
    /// Returns `SqlDalError` if preparation or execution fails.
    pub async fn query(
        &self,
        sql: &str,
        params: &[RowValues],
        cancel: Option<&CancellationToken>,
    ) -> Result<ResultSet, SqlDalError> {
        let sql = sql.to_owned();
        let values = convert_params(params);
        self.run(cancel, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            build_result_set(&mut stmt, &values)
        })
        .await
    }

    /// Run one write and return the affected-row count.
    ///
    /// # Errors
    /// Returns `SqlDalError` if preparation or execution fails.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
        cancel: Option<&CancellationToken>,
    ) -> Result<usize, SqlDalError> {
        let sql = sql.to_owned();
        let values = convert_params(params);
        self.run(cancel, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            Ok(stmt.execute(params_from_iter(values.iter()))?)
        })
        .await
    }

    /// Prepare `sql` once and execute it for every parameter set.
    ///
    /// Stops at the first failing set; the caller owns the surrounding transaction.
    ///
    /// # Errors
    /// Returns `SqlDalError` from the first failing execution.
    pub async fn execute_many(
        &self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
        cancel: Option<&CancellationToken>,
    ) -> Result<usize, SqlDalError> {
        let sql = sql.to_owned();
        let sets: Vec<_> = param_sets.iter().map(|set| convert_params(set)).collect();
        self.run(cancel, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut total = 0;
            for values in &sets {
                total += stmt.execute(params_from_iter(values.iter()))?;
            }
            Ok(total)
        })
        .await
    }

    async fn execute_script(
        &self,
        sql: &'static str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SqlDalError> {
        self.run(cancel, move |conn| Ok(conn.execute_batch(sql)?))
            .await
    }

    /// # Errors
    /// Returns `SqlDalError` if `BEGIN` fails.
    pub async fn begin(&self, cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
        self.execute_script("BEGIN", cancel).await
    }

    /// # Errors
    /// Returns `SqlDalError` if `COMMIT` fails.
    pub async fn commit(&self, cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
        self.execute_script("COMMIT", cancel).await
    }

    /// Roll back the open transaction. Never cancellable.
    ///
    /// # Errors
    /// Returns `SqlDalError` if `ROLLBACK` fails.
    pub async fn rollback(&self) -> Result<(), SqlDalError> {
        self.execute_script("ROLLBACK", None).await
    }

    /// `SQLite` connections stay usable until dropped.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        true
    }
}

fn flatten<R>(joined: Result<Result<R, SqlDalError>, JoinError>) -> Result<R, SqlDalError> {
    match joined {
        Ok(Err(err)) if err.class() == ErrorClass::Cancellation => Err(SqlDalError::Cancelled),
        Ok(result) => result,
        Err(e) => Err(SqlDalError::ExecutionError(format!(
            "sqlite spawn_blocking join error: {e}"
        ))),
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() {
        let conn = SqliteConnection::open(":memory:", Duration::from_millis(100), None)
            .await
            .unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[], None)
            .await
            .unwrap();
        let n = conn
            .execute_many(
                "INSERT INTO t VALUES (?1, ?2)",
                &[
                    vec![RowValues::Int(1), RowValues::Text("a".into())],
                    vec![RowValues::Int(2), RowValues::Text("b".into())],
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(n, 2);

        let rs = conn
            .query("SELECT name FROM t WHERE id = ?1", &[RowValues::Int(2)], None)
            .await
            .unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.results[0].get("name"), Some(&RowValues::Text("b".into())));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let conn = SqliteConnection::open(":memory:", Duration::from_millis(100), None)
            .await
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = conn.query("SELECT 1", &[], Some(&token)).await.unwrap_err();
        assert!(matches!(err, SqlDalError::Cancelled));
    }

    #[tokio::test]
    async fn bad_path_is_a_connection_error() {
        let err = SqliteConnection::open(
            "/nonexistent-dir/definitely/missing.db",
            Duration::from_millis(10),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SqlDalError::ConnectionError(_)));
    }
}
