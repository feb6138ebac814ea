//! Convenient imports for common functionality.
//!
//! ```rust
//! use sql_dal::prelude::*;
//! ```

pub use crate::batch::{BatchBuilder, BatchExecutor, BatchResult};
pub use crate::command::Command;
pub use crate::config::{StoreHandle, StoreOptions, StoreOptionsBuilder};
pub use crate::error::{ErrorClass, SqlDalError};
pub use crate::executor::DataLayer;
pub use crate::params;
pub use crate::params::Params;
pub use crate::results::{CustomDbRow, ResultSet, from_row};
pub use crate::transaction::Transaction;
pub use crate::translation::{NamedQuery, PlaceholderStyle};
pub use crate::tx_outcome::TxOutcome;
pub use crate::types::{DatabaseType, RowValues};

pub use tokio_util::sync::CancellationToken;
