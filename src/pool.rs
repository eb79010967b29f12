use crate::connection::{connect, PooledConnection};
use crate::error::{Error, Result};
use crate::guard::ConnectionGuard;
use crate::state::PoolState;
use crate::transaction::{run_transactional, Transaction};
use crate::{Driver, Executor, QueryResult, Value};
use dark_std::sync::AtomicDuration;
use futures_core::future::BoxFuture;
use futures_util::future::{FutureExt, Shared};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;

type ConnectFuture<D> = Shared<BoxFuture<'static, Result<Arc<PooledConnection<D>>>>>;

enum Slot<D: Driver> {
    Empty,
    Connecting(ConnectFuture<D>),
    Ready(Arc<PooledConnection<D>>),
    Closed,
}

/// Pool shares one lazily established connection between all callers.
///
/// Nothing touches the network until the first [`acquire`](Self::acquire).
/// Concurrent acquisitions during a connect wait on the same attempt.
/// Transactions on the shared connection run one at a time. Plain
/// [`acquire`](Self::acquire) and [`connect_and_query`](Self::connect_and_query)
/// do not wait for them, so their statements run inside whatever transaction
/// is open on the connection at that moment.
pub struct Pool<D: Driver> {
    pub driver: Arc<D>,
    pub config: Arc<D::Config>,
    slot: Arc<Mutex<Slot<D>>>,
    tx_lock: Arc<Semaphore>,
    pub(crate) in_use: Arc<AtomicU64>,
    pub(crate) connects: Arc<AtomicU64>,
    //connect timeout, default None (wait for the driver)
    pub connect_timeout: Arc<AtomicDuration>,
}

impl<D: Driver> Debug for Pool<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        Debug::fmt(&state, f)
    }
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            config: self.config.clone(),
            slot: self.slot.clone(),
            tx_lock: self.tx_lock.clone(),
            in_use: self.in_use.clone(),
            connects: self.connects.clone(),
            connect_timeout: self.connect_timeout.clone(),
        }
    }
}

fn lock<D: Driver>(slot: &Mutex<Slot<D>>) -> MutexGuard<'_, Slot<D>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: Driver> Pool<D> {
    pub fn new(driver: D, config: D::Config) -> Self {
        Self {
            driver: Arc::new(driver),
            config: Arc::new(config),
            slot: Arc::new(Mutex::new(Slot::Empty)),
            tx_lock: Arc::new(Semaphore::new(1)),
            in_use: Arc::new(AtomicU64::new(0)),
            connects: Arc::new(AtomicU64::new(0)),
            connect_timeout: Arc::new(AtomicDuration::new(None)),
        }
    }

    /// Lease the shared connection, establishing it first if needed.
    pub async fn acquire(&self) -> Result<ConnectionGuard<D>> {
        let conn = self.connection().await?;
        self.in_use.fetch_add(1, Ordering::SeqCst);
        let in_use = self.in_use.clone();
        Ok(ConnectionGuard::new(
            conn,
            self.driver.clone(),
            Box::new(move || {
                in_use.fetch_sub(1, Ordering::SeqCst);
            }),
        ))
    }

    async fn connection(&self) -> Result<Arc<PooledConnection<D>>> {
        let pending = {
            let mut slot = lock(&self.slot);
            match &*slot {
                Slot::Ready(conn) => return Ok(conn.clone()),
                Slot::Closed => return Err(Error::Closed),
                Slot::Connecting(f) => f.clone(),
                Slot::Empty => {
                    let f = self.start_connect();
                    *slot = Slot::Connecting(f.clone());
                    f
                }
            }
        };
        pending.await
    }

    // the attempt settles the slot itself. If every waiter went away it stays
    // Connecting until the next acquire polls the shared attempt again
    fn start_connect(&self) -> ConnectFuture<D> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let driver = self.driver.clone();
        let config = self.config.clone();
        let slot: Weak<Mutex<Slot<D>>> = Arc::downgrade(&self.slot);
        let timeout = self.connect_timeout.get();
        log::debug!("pool connect attempt {}", n);
        async move {
            let result = connect(&driver, &config, timeout)
                .await
                .map(|raw| Arc::new(PooledConnection::<D>::new(n, raw)));
            let Some(slot) = slot.upgrade() else {
                if let Ok(conn) = &result {
                    conn.close(&driver);
                }
                return Err(Error::Closed);
            };
            let mut slot = lock(&slot);
            let connecting = matches!(&*slot, Slot::Connecting(_));
            match (connecting, result) {
                (true, Ok(conn)) => {
                    *slot = Slot::Ready(conn.clone());
                    Ok(conn)
                }
                (true, Err(e)) => {
                    log::warn!("pool connect attempt {} failed: {}", n, e);
                    *slot = Slot::Empty;
                    Err(e)
                }
                // closed while connecting
                (false, Ok(conn)) => {
                    conn.close(&driver);
                    Err(Error::Closed)
                }
                (false, Err(e)) => Err(e),
            }
        }
        .boxed()
        .shared()
    }

    /// Run one statement and give the connection back, on success and on error.
    pub async fn connect_and_query(&self, statement: &str, params: &[Value]) -> Result<QueryResult> {
        let guard = self.acquire().await?;
        guard.query(statement, params).await
    }

    /// Run `workload` in a transaction on the shared connection.
    ///
    /// Waits for any other transaction of this pool to finish first.
    pub async fn run_transactional<F, Fut, T, E>(&self, workload: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction<ConnectionGuard<D>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let permit = self
            .tx_lock
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| E::from(Error::Closed))?;
        let mut guard = self.acquire().await.map_err(E::from)?;
        let release = guard.detach_release();
        run_transactional(
            guard,
            move || {
                release();
                drop(permit);
            },
            workload,
        )
        .await
    }

    /// Close the shared connection. Later acquisitions fail with [`Error::Closed`].
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *lock(&self.slot), Slot::Closed);
        self.tx_lock.close();
        if let Slot::Ready(conn) = previous {
            conn.close(&self.driver);
        }
    }

    pub fn state(&self) -> PoolState {
        let slot = lock(&self.slot);
        PoolState {
            connected: matches!(&*slot, Slot::Ready(_)),
            connecting: matches!(&*slot, Slot::Connecting(_)),
            closed: matches!(&*slot, Slot::Closed),
            in_use: self.in_use.load(Ordering::SeqCst),
            connects: self.connects.load(Ordering::SeqCst),
        }
    }

    /// Set the timeout for establishing the connection. None waits forever.
    pub fn set_connect_timeout(&self, duration: Option<Duration>) {
        self.connect_timeout.store(duration);
    }

    pub fn get_connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.get()
    }
}
