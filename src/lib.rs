//! Async data-access layer over `SQLite` and `PostgreSQL`.
//!
//! Three operations sit on top of a [`DataLayer`]:
//!
//! - **commands**: [`DataLayer::query`], [`DataLayer::query_single`], and
//!   [`DataLayer::execute`] run one parameterized statement on a fresh connection (or on a
//!   bound [`Transaction`]) and map rows into any `serde::Deserialize` type;
//! - **transactions**: [`DataLayer::run_in_transaction`] wraps a unit of work in
//!   begin/commit/rollback and makes the transaction ambient for the `*_text` calls inside it;
//! - **batches**: [`DataLayer::batch`] writes large datasets in chunks, falling back to
//!   per-item writes when a chunk fails and reporting every failed item.
//!
//! Parameters are named (`@id` or `:id`) and rewritten to the backend's positional form.
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use sql_dal::prelude::*;
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! # async fn demo() -> Result<(), SqlDalError> {
//! let dal = DataLayer::builder("users.db").build()?;
//! dal.execute(Command::new(
//!     "create table if not exists users (id integer primary key, name text unique)",
//! ))
//! .await?;
//!
//! let users = vec![User { id: 1, name: "a".into() }, User { id: 2, name: "a".into() }];
//! let report = dal
//!     .execute_batch("insert into users (id, name) values (@id, @name)", &users, None)
//!     .await?;
//! assert_eq!(report.success_count + report.failure_count, users.len());
//!
//! let dal = &dal;
//! let committed = dal
//!     .run_in_transaction_bool(|_tx| async move {
//!         dal.execute_text("delete from users where id = @id", params! { "id" => 1 })
//!             .await?;
//!         Ok::<_, SqlDalError>(())
//!     })
//!     .await?;
//!
//! let user: Option<User> = dal
//!     .query_single(Command::new("select * from users where id = @id").param("id", 2))
//!     .await?;
//! # let _ = (committed, user);
//! # Ok(()) }
//! ```

pub mod batch;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod params;
pub mod prelude;
pub mod results;
pub mod transaction;
pub mod translation;
pub mod tx_outcome;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use batch::{BatchBuilder, BatchExecutor, BatchResult};
pub use command::Command;
pub use config::{DEFAULT_CHUNK_SIZE, StoreHandle, StoreOptions, StoreOptionsBuilder};
pub use error::{ErrorClass, SqlDalError};
pub use executor::DataLayer;
pub use params::Params;
pub use results::{CustomDbRow, ResultSet, from_row};
pub use transaction::Transaction;
pub use tx_outcome::TxOutcome;
pub use types::{DatabaseType, RowValues};
