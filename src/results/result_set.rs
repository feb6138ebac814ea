use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::mapping::from_row;
use super::row::CustomDbRow;
use crate::error::SqlDalError;
use crate::types::RowValues;

/// A result set from a database query
///
/// This struct represents the result of a database query,
/// containing the rows returned by the query and metadata.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// Number of rows collected
    pub rows_affected: usize,
    /// Column names shared by all rows (to avoid duplicating in each row)
    column_names: Option<Arc<Vec<String>>>,
}

impl ResultSet {
    /// Create a new result set with a known capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            rows_affected: 0,
            column_names: None,
        }
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_names = Some(column_names);
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row to the result set.
    ///
    /// Rows added before column names are set get an empty column list.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        let column_names = self
            .column_names
            .get_or_insert_with(|| Arc::new(Vec::new()))
            .clone();
        self.results.push(CustomDbRow::new(column_names, row_values));
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Map every row into `T`.
    ///
    /// # Errors
    /// Returns `SqlDalError::Mapping` on the first row that does not fit `T`.
    pub fn map_rows<T: DeserializeOwned>(&self) -> Result<Vec<T>, SqlDalError> {
        self.results.iter().map(from_row::<T>).collect()
    }

    /// Map the first row into `T`, ignoring any further rows.
    ///
    /// # Errors
    /// Returns `SqlDalError::Mapping` if the first row does not fit `T`.
    pub fn map_first<T: DeserializeOwned>(&self) -> Result<Option<T>, SqlDalError> {
        self.results.first().map(from_row::<T>).transpose()
    }
}
