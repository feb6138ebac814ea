use crate::error::SqlDalError;

/// Result of a unit of work run by [`DataLayer::run_in_transaction`](crate::DataLayer::run_in_transaction).
///
/// A rolled back unit keeps the error that caused it. Callers that only care whether a value
/// came back can use [`into_option`](TxOutcome::into_option).
#[derive(Debug)]
#[must_use]
pub enum TxOutcome<T> {
    /// The work succeeded and its writes were committed.
    Committed(T),
    /// The work (or the commit) failed and the transaction was rolled back.
    RolledBack(SqlDalError),
}

impl<T> TxOutcome<T> {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }

    /// The committed value, or `None` after a rollback.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            TxOutcome::Committed(value) => Some(value),
            TxOutcome::RolledBack(_) => None,
        }
    }

    /// Why the transaction rolled back.
    #[must_use]
    pub fn cause(&self) -> Option<&SqlDalError> {
        match self {
            TxOutcome::Committed(_) => None,
            TxOutcome::RolledBack(err) => Some(err),
        }
    }

    /// Convert into a plain `Result`, surfacing the rollback cause as the error.
    ///
    /// # Errors
    /// Returns the rollback cause.
    pub fn into_result(self) -> Result<T, SqlDalError> {
        match self {
            TxOutcome::Committed(value) => Ok(value),
            TxOutcome::RolledBack(err) => Err(err),
        }
    }
}
