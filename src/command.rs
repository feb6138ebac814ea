use tokio_util::sync::CancellationToken;

use crate::params::Params;
use crate::transaction::Transaction;

/// One query or write: text, named parameters, and optional transaction and cancellation.
///
/// ```rust
/// use sql_dal::prelude::*;
///
/// let cmd = Command::new("select * from users where id = @id").param("id", 7);
/// assert_eq!(cmd.params().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Command {
    text: String,
    params: Params,
    transaction: Option<Transaction>,
    cancel: Option<CancellationToken>,
}

impl Command {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Replace the whole parameter set.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Add or replace a single parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<crate::types::RowValues>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Run on `tx`'s connection while it is open.
    #[must_use]
    pub fn transaction(mut self, tx: &Transaction) -> Self {
        self.transaction = Some(tx.clone());
        self
    }

    #[must_use]
    pub fn maybe_transaction(mut self, tx: Option<Transaction>) -> Self {
        self.transaction = tx;
        self
    }

    #[must_use]
    pub fn cancel(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn bound_transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    #[must_use]
    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}
