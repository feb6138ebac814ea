use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::connection::StoreConnection;
use crate::error::SqlDalError;
use crate::executor::DataLayer;
use crate::tx_outcome::TxOutcome;

tokio::task_local! {
    static AMBIENT: AmbientContext;
}

/// Transactions visible to the current task, one per `DataLayer` instance.
#[derive(Clone, Default)]
struct AmbientContext {
    entries: Vec<(u64, Transaction)>,
}

impl AmbientContext {
    fn current() -> Self {
        AMBIENT.try_with(Clone::clone).unwrap_or_default()
    }

    fn with(mut self, owner: u64, tx: Transaction) -> Self {
        self.entries.retain(|(id, _)| *id != owner);
        self.entries.push((owner, tx));
        self
    }
}

/// The live transaction published for `owner` in this task, if any.
///
/// A transaction that has completed or whose connection went bad counts as absent.
pub(crate) fn ambient_transaction(owner: u64) -> Option<Transaction> {
    AMBIENT
        .try_with(|ctx| {
            ctx.entries
                .iter()
                .find(|(id, _)| *id == owner)
                .map(|(_, tx)| tx.clone())
        })
        .ok()
        .flatten()
        .filter(Transaction::is_active)
}

/// Connection of an open transaction, locked for one command.
pub(crate) type TxConnection = OwnedMappedMutexGuard<Option<StoreConnection>, StoreConnection>;

pub(crate) struct TxInner {
    conn: Arc<Mutex<Option<StoreConnection>>>,
    completed: AtomicBool,
}

impl TxInner {
    fn new(conn: StoreConnection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            completed: AtomicBool::new(false),
        }
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    async fn commit(&self, cancel: Option<&CancellationToken>) -> Result<(), SqlDalError> {
        let mut slot = self.conn.lock().await;
        self.completed.store(true, Ordering::Release);
        let conn = slot.take().ok_or(SqlDalError::TransactionCompleted)?;
        if let Err(e) = conn.commit(cancel).await {
            conn.rollback_best_effort().await;
            return Err(e);
        }
        Ok(())
    }

    async fn rollback(&self) {
        let mut slot = self.conn.lock().await;
        self.completed.store(true, Ordering::Release);
        if let Some(conn) = slot.take() {
            conn.rollback_best_effort().await;
        }
    }
}

/// Non-owning handle to an open transaction.
///
/// Handed to the unit of work by [`DataLayer::run_in_transaction`] and attachable to a
/// [`Command`](crate::Command). Once the transaction commits or rolls back every handle goes
/// dead, and commands bound to a dead handle run on a fresh connection instead.
#[derive(Clone)]
pub struct Transaction {
    inner: Weak<TxInner>,
}

impl Transaction {
    fn new(inner: &Arc<TxInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    /// Whether the transaction is still open on a usable connection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.live().is_some()
    }

    fn live(&self) -> Option<Arc<TxInner>> {
        let inner = self.inner.upgrade()?;
        if inner.is_completed() {
            return None;
        }
        // a connection busy with another command is still live
        let usable = match inner.conn.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(StoreConnection::is_usable),
            Err(_) => true,
        };
        usable.then_some(inner)
    }

    /// Lock the transaction's connection for one command.
    ///
    /// `None` if the transaction has finished, including while waiting for the lock.
    pub(crate) async fn lease(&self) -> Option<TxConnection> {
        let inner = self.live()?;
        let slot = Arc::clone(&inner.conn).lock_owned().await;
        OwnedMutexGuard::try_map(slot, Option::as_mut).ok()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Rolls back on drop if the scope was abandoned before commit or rollback.
struct TxGuard {
    inner: Option<Arc<TxInner>>,
}

impl TxGuard {
    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take()
            && !inner.is_completed()
        {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        inner.rollback().await;
                    });
                }
                Err(_) => tracing::warn!("transaction dropped outside a runtime; not rolled back"),
            }
        }
    }
}

impl DataLayer {
    /// Run `work` inside a transaction on a dedicated connection.
    ///
    /// While `work` runs, the transaction is the ambient transaction for this `DataLayer` in the
    /// current task: the `*_text` calls join it automatically, and it is passed to `work` for
    /// binding to a [`Command`](crate::Command). The ambient context does not follow work moved
    /// into other tasks with `tokio::spawn`.
    ///
    /// `Ok(TxOutcome::Committed(value))` means every write is durable;
    /// `Ok(TxOutcome::RolledBack(cause))` means none is.
    ///
    /// # Errors
    /// Returns `SqlDalError::TransactionInProgress` if called from inside another transaction
    /// scope of the same `DataLayer`, and the connection or `BEGIN` error if the transaction
    /// could not be started.
    pub async fn run_in_transaction<T, F, Fut>(&self, work: F) -> Result<TxOutcome<T>, SqlDalError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, SqlDalError>>,
    {
        self.run_transaction(None, work).await
    }

    /// [`run_in_transaction`](DataLayer::run_in_transaction) honouring a cancellation token for
    /// the connection open, `BEGIN`, and `COMMIT`.
    ///
    /// # Errors
    /// As [`run_in_transaction`](DataLayer::run_in_transaction), plus `SqlDalError::Cancelled` if
    /// the token fires before the transaction starts.
    pub async fn run_in_transaction_with_cancel<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<TxOutcome<T>, SqlDalError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, SqlDalError>>,
    {
        self.run_transaction(Some(cancel), work).await
    }

    /// Like [`run_in_transaction`](DataLayer::run_in_transaction) but reports only whether the
    /// work committed.
    ///
    /// # Errors
    /// Same as [`run_in_transaction`](DataLayer::run_in_transaction).
    pub async fn run_in_transaction_bool<F, Fut>(&self, work: F) -> Result<bool, SqlDalError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<(), SqlDalError>>,
    {
        Ok(self.run_transaction(None, work).await?.is_committed())
    }

    async fn run_transaction<T, F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        work: F,
    ) -> Result<TxOutcome<T>, SqlDalError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, SqlDalError>>,
    {
        if ambient_transaction(self.id()).is_some() {
            return Err(SqlDalError::TransactionInProgress);
        }

        let conn = StoreConnection::open(self.options(), cancel).await?;
        conn.begin(cancel).await?;
        tracing::debug!(db_type = ?conn.db_type(), "transaction started");

        let inner = Arc::new(TxInner::new(conn));
        let mut guard = TxGuard {
            inner: Some(Arc::clone(&inner)),
        };
        let tx = Transaction::new(&inner);
        let ctx = AmbientContext::current().with(self.id(), tx.clone());

        let outcome = match AMBIENT.scope(ctx, work(tx)).await {
            Ok(value) => match inner.commit(cancel).await {
                Ok(()) => {
                    tracing::debug!("transaction committed");
                    TxOutcome::Committed(value)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "commit failed; transaction rolled back");
                    TxOutcome::RolledBack(e)
                }
            },
            Err(e) => {
                inner.rollback().await;
                tracing::debug!(error = %e, "transaction rolled back");
                TxOutcome::RolledBack(e)
            }
        };
        guard.disarm();
        Ok(outcome)
    }
}
