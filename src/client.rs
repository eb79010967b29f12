use crate::connection::{connect, BusyGuard, PooledConnection};
use crate::error::{Error, Result};
use crate::guard::ConnectionGuard;
use crate::state::ClientState;
use crate::sweep::{take_reclaimable, ScheduledSweep};
use crate::transaction::{run_transactional, Transaction};
use crate::{Driver, Executor, QueryResult, Value};
use dark_std::sync::AtomicDuration;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type ConnectionSet<D> = HashMap<u64, Arc<PooledConnection<D>>>;

/// Client opens a new connection for every acquisition and keeps track of
/// all of them.
///
/// Idle connections are reclaimed by a sweep scheduled after each new
/// connection is registered, or on demand with [`release`](Self::release).
/// There is no upper bound on the number of live connections: bursts of
/// concurrent work grow the set, sweeps shrink it back.
pub struct Client<D: Driver> {
    pub driver: Arc<D>,
    pub config: Arc<D::Config>,
    connections: Arc<Mutex<ConnectionSet<D>>>,
    next_id: Arc<AtomicU64>,
    pub(crate) connecting: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    sweep: Arc<ScheduledSweep>,
    //connect timeout, default None (wait for the driver)
    pub connect_timeout: Arc<AtomicDuration>,
}

impl<D: Driver> Debug for Client<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        Debug::fmt(&state, f)
    }
}

impl<D: Driver> Clone for Client<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            config: self.config.clone(),
            connections: self.connections.clone(),
            next_id: self.next_id.clone(),
            connecting: self.connecting.clone(),
            closed: self.closed.clone(),
            sweep: self.sweep.clone(),
            connect_timeout: self.connect_timeout.clone(),
        }
    }
}

impl<D: Driver> Client<D> {
    pub fn new(driver: D, config: D::Config) -> Self {
        Self {
            driver: Arc::new(driver),
            config: Arc::new(config),
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            connecting: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            sweep: Arc::new(ScheduledSweep::new()),
            connect_timeout: Arc::new(AtomicDuration::new(None)),
        }
    }

    fn set(&self) -> MutexGuard<'_, ConnectionSet<D>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection and lease it.
    ///
    /// Concurrent calls produce distinct connections.
    pub async fn acquire(&self) -> Result<ConnectionGuard<D>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let raw = {
            let _connecting = BusyGuard::new(&self.connecting);
            connect(&self.driver, &self.config, self.connect_timeout.get()).await?
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(PooledConnection::new(id, raw));
        // leased before it is visible to any sweep
        let guard = ConnectionGuard::new(conn.clone(), self.driver.clone(), Box::new(|| {}));
        {
            let mut set = self.set();
            if self.is_closed() {
                drop(set);
                conn.close(&self.driver);
                return Err(Error::Closed);
            }
            set.insert(id, conn);
            log::debug!("client registered connection {}, live={}", id, set.len());
        }
        self.schedule_sweep();
        Ok(guard)
    }

    /// Schedule a non-forced sweep on a later scheduling tick.
    fn schedule_sweep(&self) {
        let client = self.clone();
        self.sweep.schedule(async move {
            tokio::task::yield_now().await;
            client.release(false);
        });
    }

    /// Sweep the managed set now and return how many connections were closed.
    ///
    /// Idle connections are always reclaimed; with `force` leased and busy
    /// ones are closed too, and their handles fail later with [`Error::Closed`].
    pub fn release(&self, force: bool) -> usize {
        let reclaimed = take_reclaimable(&mut self.set(), force);
        for conn in &reclaimed {
            conn.close(&self.driver);
        }
        if !reclaimed.is_empty() {
            log::debug!(
                "client sweep force={} reclaimed {} connection(s)",
                force,
                reclaimed.len()
            );
        }
        reclaimed.len()
    }

    /// Wait until the scheduled sweep, if any, has run.
    pub async fn settle(&self) {
        self.sweep.settle().await;
    }

    /// Cancel the scheduled sweep. Returns whether one was pending.
    pub fn cancel_sweep(&self) -> bool {
        self.sweep.cancel()
    }

    /// Run one statement on a fresh connection and release it afterwards.
    pub async fn connect_and_query(&self, statement: &str, params: &[Value]) -> Result<QueryResult> {
        let guard = self.acquire().await?;
        guard.query(statement, params).await
    }

    /// Run `workload` in a transaction on a fresh connection.
    pub async fn run_transactional<F, Fut, T, E>(&self, workload: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction<ConnectionGuard<D>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let mut guard = self.acquire().await.map_err(E::from)?;
        let release = guard.detach_release();
        run_transactional(guard, release, workload).await
    }

    /// Close every connection and refuse further acquisitions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sweep.cancel();
        self.release(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ClientState {
        let set = self.set();
        let idle = set.values().filter(|c| c.is_idle()).count() as u64;
        ClientState {
            connections: set.len() as u64,
            idle,
            busy: set.len() as u64 - idle,
            pending: set.values().map(|c| c.pending()).sum(),
            connecting: self.connecting.load(Ordering::SeqCst),
            sweep_pending: self.sweep.is_pending(),
            closed: self.is_closed(),
        }
    }

    /// Set the timeout for establishing each connection. None waits forever.
    pub fn set_connect_timeout(&self, duration: Option<Duration>) {
        self.connect_timeout.store(duration);
    }

    pub fn get_connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.get()
    }
}
