use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::{QueryResult, Value};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of a transaction. `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl TxState {
    fn as_u8(&self) -> u8 {
        match self {
            TxState::Active => 0,
            TxState::Committed => 1,
            TxState::RolledBack => 2,
        }
    }

    fn new(state: u8) -> Self {
        match state {
            1 => TxState::Committed,
            2 => TxState::RolledBack,
            _ => TxState::Active,
        }
    }
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug)]
pub struct TxStateAtomic(AtomicU8);

impl TxStateAtomic {
    pub fn new(state: TxState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> TxState {
        TxState::new(self.0.load(Ordering::SeqCst))
    }

    /// Move from `Active` to `to`. On failure returns the state already reached.
    pub fn finish(&self, to: TxState) -> std::result::Result<(), TxState> {
        self.0
            .compare_exchange(
                TxState::Active.as_u8(),
                to.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(TxState::new)
    }
}

struct TxInner<Q> {
    executor: Q,
    state: TxStateAtomic,
}

/// Transaction-scoped query capability handed to a workload.
///
/// Cloning is cheap; every clone shares the same executor and state.
pub struct Transaction<Q: Executor> {
    inner: Arc<TxInner<Q>>,
}

impl<Q: Executor> Clone for Transaction<Q> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Q: Executor> std::fmt::Debug for Transaction<Q> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state())
            .finish()
    }
}

impl<Q: Executor> Transaction<Q> {
    pub fn new(executor: Q) -> Self {
        Self {
            inner: Arc::new(TxInner {
                executor,
                state: TxStateAtomic::new(TxState::Active),
            }),
        }
    }

    pub fn state(&self) -> TxState {
        self.inner.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state() == TxState::Active
    }

    pub async fn query(&self, statement: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner.executor.query(statement, params).await
    }

    pub async fn begin(&self) -> Result<QueryResult> {
        self.query("BEGIN", &[]).await
    }

    /// Issue COMMIT. Fails with [`Error::Finished`] without touching the
    /// connection if the transaction already committed or rolled back.
    pub async fn commit(&self) -> Result<QueryResult> {
        self.finish(TxState::Committed, "COMMIT").await
    }

    /// Issue ROLLBACK, same rules as [`commit`](Self::commit).
    pub async fn rollback(&self) -> Result<QueryResult> {
        self.finish(TxState::RolledBack, "ROLLBACK").await
    }

    // state moves before the statement is sent, a failed COMMIT still counts
    async fn finish(&self, to: TxState, statement: &str) -> Result<QueryResult> {
        self.inner
            .state
            .finish(to)
            .map_err(|state| Error::Finished { state })?;
        self.query(statement, &[]).await
    }
}

#[async_trait]
impl<Q: Executor> Executor for Transaction<Q> {
    async fn query(&self, statement: &str, params: &[Value]) -> Result<QueryResult> {
        Transaction::query(self, statement, params).await
    }
}

/// Finalize on behalf of the coordinator: skipped when the workload already
/// committed or rolled back.
async fn finalize<Q: Executor>(tx: &Transaction<Q>, to: TxState) -> Result<()> {
    let result = match to {
        TxState::Committed => tx.commit().await,
        _ => tx.rollback().await,
    };
    match result {
        Ok(_) => {
            log::debug!("transaction {}", to);
            Ok(())
        }
        Err(Error::Finished { state }) => {
            log::debug!("transaction already {}, skip implicit {}", state, to);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Run `workload` inside BEGIN ... COMMIT/ROLLBACK on `executor`.
///
/// * BEGIN failure: `release` runs, the BEGIN error is returned, no ROLLBACK.
/// * `Ok` from the workload: COMMIT unless the workload already finished the
///   transaction, then `release`, then the value.
/// * `Err` or a panic from the workload: ROLLBACK unless already finished,
///   then `release`, then the workload error. A panic surfaces as
///   [`Error::Workload`].
/// * A failing COMMIT or ROLLBACK replaces the result with its own error.
///
/// `release` runs exactly once on every path, before the result is returned.
pub async fn run_transactional<Q, R, F, Fut, T, E>(
    executor: Q,
    release: R,
    workload: F,
) -> std::result::Result<T, E>
where
    Q: Executor,
    R: FnOnce(),
    F: FnOnce(Transaction<Q>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<Error>,
{
    let tx = Transaction::new(executor);
    if let Err(e) = tx.begin().await {
        log::warn!("BEGIN failed: {}", e);
        release();
        return Err(E::from(e));
    }

    let outcome = match catch_unwind(AssertUnwindSafe(|| workload(tx.clone()))) {
        Ok(fut) => AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(E::from(Error::from_panic(payload)))),
        Err(payload) => Err(E::from(Error::from_panic(payload))),
    };

    match outcome {
        Ok(value) => {
            let committed = finalize(&tx, TxState::Committed).await;
            release();
            committed.map_err(E::from)?;
            Ok(value)
        }
        Err(err) => {
            let rolled_back = finalize(&tx, TxState::RolledBack).await;
            release();
            if let Err(e) = rolled_back {
                log::warn!("ROLLBACK failed: {}", e);
                return Err(E::from(e));
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod test {
    use super::{TxState, TxStateAtomic};

    #[test]
    fn test_state_finish_once() {
        let state = TxStateAtomic::new(TxState::Active);
        assert_eq!(state.finish(TxState::Committed), Ok(()));
        assert_eq!(state.get(), TxState::Committed);
        assert_eq!(state.finish(TxState::RolledBack), Err(TxState::Committed));
        assert_eq!(state.finish(TxState::Committed), Err(TxState::Committed));
        assert_eq!(state.get(), TxState::Committed);
    }

    #[test]
    fn test_state_roundtrip() {
        for s in [TxState::Active, TxState::Committed, TxState::RolledBack] {
            assert_eq!(TxState::new(s.as_u8()), s);
        }
        assert_eq!(TxState::RolledBack.to_string(), "rolled back");
    }
}
