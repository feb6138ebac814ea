use std::fmt;
use std::future::Future;

use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;

use super::params::as_refs;
use super::query::build_result_set;
use crate::connection::ensure_not_cancelled;
use crate::error::SqlDalError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// A single Postgres client and its background connection task.
pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    /// Connect using a `postgres://` URL or libpq-style key/value string.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConnectionError` if the string does not parse or the server cannot
    /// be reached, or `SqlDalError::Cancelled` if `cancel` fires first.
    pub async fn open(
        connection_string: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Self, SqlDalError> {
        ensure_not_cancelled(cancel)?;
        let config: tokio_postgres::Config = connection_string.parse().map_err(|e| {
            SqlDalError::ConnectionError(format!("invalid Postgres connection string: {e}"))
        })?;

        let connect = config.connect(NoTls);
        let (client, connection) = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(SqlDalError::Cancelled),
                res = connect => res,
            },
            None => connect.await,
        }
        .map_err(|e| SqlDalError::ConnectionError(format!("cannot connect to Postgres: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection task ended with error");
            }
        });
        tracing::trace!("postgres connection opened");
        Ok(Self { client })
    }

    /// Await `fut`, sending a server-side cancel request if `cancel` fires first.
    async fn run<F, R>(&self, cancel: Option<&CancellationToken>, fut: F) -> Result<R, SqlDalError>
    where
        F: Future<Output = Result<R, SqlDalError>>,
    {
        ensure_not_cancelled(cancel)?;
        let Some(token) = cancel else {
            return fut.await;
        };
        tokio::select! {
            biased;
            res = fut => res,
            () = token.cancelled() => {
                let cancel_token = self.client.cancel_token();
                tokio::spawn(async move {
                    if let Err(e) = cancel_token.cancel_query(NoTls).await {
                        tracing::warn!(error = %e, "postgres cancel request failed");
                    }
                });
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
        self.run(cancel, async {
            let stmt = self.client.prepare(sql).await?;
            let rows = self.client.query(&stmt, &as_refs(params)).await?;
            build_result_set(&stmt, &rows)
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
        self.run(cancel, async {
            let rows = self.client.execute(sql, &as_refs(params)).await?;
            affected(rows)
        })
        .await
    }

    /// Prepare `sql` once and execute it for every parameter set.
    ///
    /// # Errors
    /// Returns `SqlDalError` from the first failing execution.
    pub async fn execute_many(
        &self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
        cancel: Option<&CancellationToken>,
    ) -> Result<usize, SqlDalError> {
        self.run(cancel, async {
            let stmt = self.client.prepare(sql).await?;
            let mut total = 0;
            for params in param_sets {
                total += affected(self.client.execute(&stmt, &as_refs(params)).await?)?;
            }
            Ok::<_, SqlDalError>(total)
        })
        .await
    }

    /// # Errors
    /// Returns `SqlDalError` if `BEGIN` fails.
    pub async fn begin(&self, cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
        self.run(cancel, async {
            self.client
                .batch_execute("BEGIN")
                .await
                .map_err(SqlDalError::from)
        })
        .await
    }

    /// # Errors
    /// Returns `SqlDalError` if `COMMIT` fails.
    pub async fn commit(&self, cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
        self.run(cancel, async {
            self.client
                .batch_execute("COMMIT")
                .await
                .map_err(SqlDalError::from)
        })
        .await
    }

    /// Roll back the open transaction. Never cancellable.
    ///
    /// # Errors
    /// Returns `SqlDalError` if `ROLLBACK` fails.
    pub async fn rollback(&self) -> Result<(), SqlDalError> {
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.client.is_closed()
    }
}

fn affected(rows: u64) -> Result<usize, SqlDalError> {
    usize::try_from(rows).map_err(|e| {
        SqlDalError::ExecutionError(format!("postgres affected rows conversion error: {e}"))
    })
}

impl fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}
