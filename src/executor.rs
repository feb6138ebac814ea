use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;

use crate::command::Command;
use crate::config::{StoreHandle, StoreOptions, StoreOptionsBuilder};
use crate::connection::StoreConnection;
use crate::error::SqlDalError;
use crate::params::Params;
use crate::results::ResultSet;
use crate::transaction::{TxConnection, ambient_transaction};
use crate::translation::{NamedQuery, PlaceholderStyle};
use crate::types::DatabaseType;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Entry point of the crate: issues commands, scopes transactions, and runs batches against one
/// store.
///
/// Every call opens its own connection and closes it before returning, unless the call joins an
/// open transaction. Clones share the same identity, so a transaction opened through one clone
/// is ambient for all of them.
///
/// ```rust,no_run
/// use sql_dal::prelude::*;
///
/// # async fn demo() -> Result<(), SqlDalError> {
/// let dal = DataLayer::builder("app.db").chunk_size(500).build()?;
/// dal.execute(Command::new("create table if not exists t (id integer)")).await?;
/// let ids: Vec<i64> = dal.query(Command::new("select id from t")).await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct DataLayer {
    id: u64,
    store: StoreHandle,
}

/// Connection a command runs on: the bound transaction's, or one opened for the call.
enum Lease {
    Joined(TxConnection),
    Fresh(StoreConnection),
}

impl Deref for Lease {
    type Target = StoreConnection;

    fn deref(&self) -> &StoreConnection {
        match self {
            Lease::Joined(conn) => &**conn,
            Lease::Fresh(conn) => conn,
        }
    }
}

impl DataLayer {
    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the options are invalid.
    pub fn new(options: StoreOptions) -> Result<Self, SqlDalError> {
        let store = StoreHandle::new(options)?;
        if store.connection_string().contains(":memory:") {
            tracing::warn!(
                "in-memory SQLite gives every connection its own empty database; \
                 use a file path to share data between calls"
            );
        }
        Ok(Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            store,
        })
    }

    /// Start building a `DataLayer` for `connection_string`.
    #[must_use]
    pub fn builder(connection_string: impl Into<String>) -> StoreOptionsBuilder {
        StoreOptionsBuilder::new(connection_string)
    }

    /// Build from `SQL_DAL_*` environment variables.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the environment is incomplete or invalid.
    pub fn from_env() -> Result<Self, SqlDalError> {
        Self::new(StoreOptions::from_env()?)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        self.store.options()
    }

    #[must_use]
    pub fn db_type(&self) -> DatabaseType {
        self.store.db_type()
    }

    /// Open a connection and run a trivial query.
    ///
    /// # Errors
    /// Returns the connection or query error.
    pub async fn ping(&self) -> Result<(), SqlDalError> {
        let conn = StoreConnection::open(self.options(), None).await?;
        conn.query("SELECT 1", &[], None).await?;
        Ok(())
    }

    /// Run a query and map every row into `T`.
    ///
    /// Struct targets match field names to column names ignoring ASCII case; scalar targets take
    /// the first column. No rows gives an empty vector.
    ///
    /// # Errors
    /// Returns store, parameter, cancellation, or mapping errors.
    pub async fn query<T: DeserializeOwned>(&self, cmd: Command) -> Result<Vec<T>, SqlDalError> {
        self.query_result_set(cmd).await?.map_rows::<T>()
    }

    /// Run a query and map its first row, if any.
    ///
    /// Extra rows are discarded unless the layer was built with `strict_single`, in which case
    /// they are an error.
    ///
    /// # Errors
    /// Returns store, parameter, cancellation, or mapping errors, and
    /// `SqlDalError::MultipleResults` in strict mode.
    pub async fn query_single<T: DeserializeOwned>(
        &self,
        cmd: Command,
    ) -> Result<Option<T>, SqlDalError> {
        let rows = self.query_result_set(cmd).await?;
        if rows.len() > 1 {
            if self.options().strict_single {
                return Err(SqlDalError::MultipleResults(rows.len()));
            }
            tracing::debug!(rows = rows.len(), "query_single keeping first row");
        }
        rows.map_first::<T>()
    }

    /// Run a query and return the raw rows.
    ///
    /// # Errors
    /// Returns store, parameter, or cancellation errors.
    pub async fn query_result_set(&self, cmd: Command) -> Result<ResultSet, SqlDalError> {
        let compiled = self.prepare(cmd.text());
        let values = compiled.bind(cmd.params())?;
        let conn = self.lease(&cmd).await?;
        conn.query(compiled.sql(), &values, cmd.cancel_token()).await
    }

    /// Run a write and return the affected-row count.
    ///
    /// # Errors
    /// Returns store, constraint, parameter, or cancellation errors.
    pub async fn execute(&self, cmd: Command) -> Result<usize, SqlDalError> {
        let compiled = self.prepare(cmd.text());
        let values = compiled.bind(cmd.params())?;
        let conn = self.lease(&cmd).await?;
        conn.execute(compiled.sql(), &values, cmd.cancel_token()).await
    }

    /// [`query`](DataLayer::query) joining the ambient transaction, if one is open.
    ///
    /// # Errors
    /// As [`query`](DataLayer::query).
    pub async fn query_text<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: Params,
    ) -> Result<Vec<T>, SqlDalError> {
        self.query(self.ambient_command(sql, params)).await
    }

    /// [`query_single`](DataLayer::query_single) joining the ambient transaction, if one is open.
    ///
    /// # Errors
    /// As [`query_single`](DataLayer::query_single).
    pub async fn query_single_text<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: Params,
    ) -> Result<Option<T>, SqlDalError> {
        self.query_single(self.ambient_command(sql, params)).await
    }

    /// [`execute`](DataLayer::execute) joining the ambient transaction, if one is open.
    ///
    /// # Errors
    /// As [`execute`](DataLayer::execute).
    pub async fn execute_text(&self, sql: &str, params: Params) -> Result<usize, SqlDalError> {
        self.execute(self.ambient_command(sql, params)).await
    }

    fn ambient_command(&self, sql: &str, params: Params) -> Command {
        Command::new(sql)
            .with_params(params)
            .maybe_transaction(ambient_transaction(self.id))
    }

    /// Rewrite named placeholders for this layer's backend.
    pub(crate) fn prepare(&self, text: &str) -> NamedQuery {
        NamedQuery::compile(text, PlaceholderStyle::for_database(self.db_type()))
    }

    async fn lease(&self, cmd: &Command) -> Result<Lease, SqlDalError> {
        if let Some(tx) = cmd.bound_transaction() {
            if let Some(conn) = tx.lease().await {
                return Ok(Lease::Joined(conn));
            }
            tracing::debug!("bound transaction is no longer open; using a fresh connection");
        }
        Ok(Lease::Fresh(
            StoreConnection::open(self.options(), cmd.cancel_token()).await?,
        ))
    }
}
