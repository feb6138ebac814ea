use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::connection::{StoreConnection, ensure_not_cancelled};
use crate::error::SqlDalError;
use crate::executor::DataLayer;
use crate::params::{Params, describe_item};
use crate::translation::NamedQuery;
use crate::types::RowValues;

/// Outcome of a batch write.
///
/// `success_count + failure_count` always equals the number of items passed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Items applied, either as part of a committed chunk or individually after a fallback.
    pub success_count: usize,
    /// Items that failed on their individual retry.
    pub failure_count: usize,
    /// One `error executing for <item>: <message>` line per failed item, in input order.
    pub errors: Vec<String>,
    /// Affected rows reported by the store across all committed writes.
    pub rows_affected: usize,
    /// Chunk-level bulk writes attempted.
    pub bulk_commands: usize,
    /// Chunks that failed as a whole and were retried item by item.
    pub fallback_chunks: usize,
}

impl BatchResult {
    /// Items accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }

    /// No item failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failure_count == 0
    }
}

/// Chunked bulk writer with per-item fallback.
///
/// Items are split into chunks of `chunk_size`. Each chunk runs as one prepared statement executed
/// for every item inside a single transaction on its own connection. When a chunk fails with a
/// recoverable error (see [`ErrorClass::is_recoverable`](crate::ErrorClass::is_recoverable)) it is
/// rolled back and every item in it is retried on its own through [`DataLayer::execute`]. Any
/// other failure, including cancellation, stops the batch and is returned.
#[derive(Debug, Clone)]
pub struct BatchExecutor<'a> {
    dal: &'a DataLayer,
    text: String,
    query: NamedQuery,
    shared: Params,
    chunk_size: usize,
    cancel: Option<CancellationToken>,
}

impl BatchExecutor<'_> {
    /// Write every item.
    ///
    /// An empty slice returns an all-zero result without touching the store.
    ///
    /// # Errors
    /// Returns fatal errors: an item that does not serialize to named parameters, a connection
    /// that cannot be opened, or cancellation.
    pub async fn run<T: Serialize>(&self, items: &[T]) -> Result<BatchResult, SqlDalError> {
        let mut result = BatchResult::default();
        if items.is_empty() {
            return Ok(result);
        }
        ensure_not_cancelled(self.cancel.as_ref())?;

        for (index, chunk) in items.chunks(self.chunk_size).enumerate() {
            let param_sets = chunk
                .iter()
                .map(|item| self.item_params(item))
                .collect::<Result<Vec<_>, _>>()?;
            let bound = param_sets
                .iter()
                .map(|params| self.query.bind(params))
                .collect::<Result<Vec<_>, _>>()?;

            tracing::debug!(chunk = index, items = chunk.len(), "writing batch chunk");
            result.bulk_commands += 1;
            match self.write_chunk(&bound).await {
                Ok(rows) => {
                    result.success_count += chunk.len();
                    result.rows_affected += rows;
                }
                Err(err) if err.class().is_recoverable() => {
                    tracing::warn!(
                        chunk = index,
                        items = chunk.len(),
                        error = %err,
                        "bulk write failed; retrying items individually"
                    );
                    result.fallback_chunks += 1;
                    self.write_items(chunk, param_sets, &mut result).await?;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            success = result.success_count,
            failure = result.failure_count,
            rows_affected = result.rows_affected,
            fallback_chunks = result.fallback_chunks,
            "batch finished"
        );
        Ok(result)
    }

    fn item_params<T: Serialize>(&self, item: &T) -> Result<Params, SqlDalError> {
        let mut params = Params::from_serialize(item)?;
        params.merge_missing(&self.shared);
        Ok(params)
    }

    /// One connection, one transaction, one prepared statement for the whole chunk.
    async fn write_chunk(&self, bound: &[Vec<RowValues>]) -> Result<usize, SqlDalError> {
        let cancel = self.cancel.as_ref();
        let conn = StoreConnection::open(self.dal.options(), cancel).await?;
        conn.begin(cancel).await?;
        let written = match conn.execute_many(self.query.sql(), bound, cancel).await {
            Ok(rows) => conn.commit(cancel).await.map(|()| rows),
            Err(e) => Err(e),
        };
        if written.is_err() {
            conn.rollback_best_effort().await;
        }
        written
    }

    async fn write_items<T: Serialize>(
        &self,
        chunk: &[T],
        param_sets: Vec<Params>,
        result: &mut BatchResult,
    ) -> Result<(), SqlDalError> {
        for (item, params) in chunk.iter().zip(param_sets) {
            let mut cmd = Command::new(self.text.as_str()).with_params(params);
            if let Some(token) = &self.cancel {
                cmd = cmd.cancel(token);
            }
            match self.dal.execute(cmd).await {
                Ok(rows) => {
                    result.success_count += 1;
                    result.rows_affected += rows;
                }
                Err(err) if err.class().is_recoverable() => {
                    let line = format!("error executing for {}: {err}", describe_item(item));
                    tracing::debug!(error = %line, "batch item failed");
                    result.failure_count += 1;
                    result.errors.push(line);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Fluent configuration for a batch write; see [`DataLayer::batch`].
#[derive(Debug, Clone)]
#[must_use]
pub struct BatchBuilder<'a> {
    dal: &'a DataLayer,
    text: String,
    shared: Params,
    chunk_size: Option<usize>,
    cancel: Option<CancellationToken>,
}

impl<'a> BatchBuilder<'a> {
    /// Parameters applied to every item that does not supply the same name itself.
    pub fn shared(mut self, params: Params) -> Self {
        self.shared = params;
        self
    }

    /// Override the layer's chunk size for this batch.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn cancel(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Validate the configuration into a reusable executor.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the chunk size is zero.
    pub fn build(self) -> Result<BatchExecutor<'a>, SqlDalError> {
        let chunk_size = self
            .chunk_size
            .unwrap_or(self.dal.options().chunk_size);
        if chunk_size == 0 {
            return Err(SqlDalError::ConfigError(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(BatchExecutor {
            dal: self.dal,
            query: self.dal.prepare(&self.text),
            text: self.text,
            shared: self.shared,
            chunk_size,
            cancel: self.cancel,
        })
    }

    /// Build and run in one step.
    ///
    /// # Errors
    /// See [`BatchBuilder::build`] and [`BatchExecutor::run`].
    pub async fn run<T: Serialize>(self, items: &[T]) -> Result<BatchResult, SqlDalError> {
        self.build()?.run(items).await
    }
}

impl DataLayer {
    /// Start a batch write of `query`, run once per item with the item's fields as parameters.
    ///
    /// ```rust,no_run
    /// use serde::Serialize;
    /// use sql_dal::prelude::*;
    ///
    /// #[derive(Serialize)]
    /// struct User { id: i64, name: String }
    ///
    /// # async fn demo(dal: &DataLayer, users: Vec<User>) -> Result<(), SqlDalError> {
    /// let report = dal
    ///     .batch("insert into users (id, name, source) values (@id, @name, @source)")
    ///     .shared(params! { "source" => "import" })
    ///     .chunk_size(100)
    ///     .run(&users)
    ///     .await?;
    /// for line in &report.errors {
    ///     eprintln!("{line}");
    /// }
    /// # Ok(()) }
    /// ```
    pub fn batch(&self, query: impl Into<String>) -> BatchBuilder<'_> {
        BatchBuilder {
            dal: self,
            text: query.into(),
            shared: Params::new(),
            chunk_size: None,
            cancel: None,
        }
    }

    /// Write `items` with the layer's chunk size and optional shared parameters.
    ///
    /// # Errors
    /// See [`BatchExecutor::run`].
    pub async fn execute_batch<T: Serialize>(
        &self,
        query: &str,
        items: &[T],
        shared: Option<&Params>,
    ) -> Result<BatchResult, SqlDalError> {
        let mut builder = self.batch(query);
        if let Some(shared) = shared {
            builder = builder.shared(shared.clone());
        }
        builder.run(items).await
    }
}
