use crate::error::{Error, Result};
use crate::Driver;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A driver connection plus the bookkeeping the managers need to decide
/// whether it is idle.
///
/// A connection is busy while at least one [`ConnectionGuard`](crate::ConnectionGuard)
/// leases it or at least one statement is pending on it.
pub struct PooledConnection<D: Driver> {
    pub id: u64,
    raw: D::Connection,
    leases: AtomicU64,
    pending: AtomicU64,
    closed: AtomicBool,
    created_at: Instant,
}

impl<D: Driver> PooledConnection<D> {
    pub fn new(id: u64, raw: D::Connection) -> Self {
        Self {
            id,
            raw,
            leases: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    #[inline]
    pub fn raw(&self) -> &D::Connection {
        &self.raw
    }

    /// Outstanding handles on this connection
    #[inline]
    pub fn leases(&self) -> u64 {
        self.leases.load(Ordering::SeqCst)
    }

    /// Statements issued but not completed yet
    #[inline]
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// No lease and no pending statement.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.leases() == 0 && self.pending() == 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn lease(&self) {
        self.leases.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn unlease(&self) {
        _ = self
            .leases
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Mark one statement pending until the returned guard drops.
    pub(crate) fn busy(&self) -> BusyGuard<'_> {
        BusyGuard::new(&self.pending)
    }

    /// Close through the driver. Returns false if it was already closed.
    pub(crate) fn close(&self, driver: &D) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::debug!("closing connection {} after {:?}", self.id, self.age());
        driver.close(&self.raw);
        true
    }
}

impl<D: Driver> Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("leases", &self.leases())
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Holds a counter incremented for as long as it lives.
pub(crate) struct BusyGuard<'a>(&'a AtomicU64);

impl<'a> BusyGuard<'a> {
    pub(crate) fn new(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Receiving end of one connect attempt.
///
/// If the attempt is abandoned (timeout or the caller's future dropped), a
/// connection the driver hands over later is closed instead of leaked.
struct PendingConnect<D: Driver> {
    driver: Arc<D>,
    recv: flume::Receiver<std::result::Result<D::Connection, D::Error>>,
    abandoned: Arc<Mutex<bool>>,
}

impl<D: Driver> Drop for PendingConnect<D> {
    fn drop(&mut self) {
        let mut abandoned = self.abandoned.lock().unwrap_or_else(PoisonError::into_inner);
        *abandoned = true;
        while let Ok(result) = self.recv.try_recv() {
            if let Ok(conn) = result {
                log::debug!("closing connection that arrived after connect was abandoned");
                self.driver.close(&conn);
            }
        }
    }
}

/// Open one connection through the driver's callback and wait for it,
/// optionally bounded by `timeout`.
pub async fn connect<D: Driver>(
    driver: &Arc<D>,
    config: &D::Config,
    timeout: Option<Duration>,
) -> Result<D::Connection> {
    let (send, recv) = flume::bounded(1);
    let pending = PendingConnect {
        driver: driver.clone(),
        recv,
        abandoned: Arc::new(Mutex::new(false)),
    };
    let abandoned = pending.abandoned.clone();
    let late = driver.clone();
    driver.connect(
        config,
        Box::new(move |result| {
            // under the lock: either the receiver drains it or it is closed here
            let abandoned = abandoned.lock().unwrap_or_else(PoisonError::into_inner);
            if *abandoned {
                if let Ok(conn) = result {
                    log::debug!("closing connection that arrived after connect was abandoned");
                    late.close(&conn);
                }
                return;
            }
            _ = send.send(result);
        }),
    );
    let received = match timeout {
        None => pending.recv.recv_async().await,
        Some(d) => tokio::time::timeout(d, pending.recv.recv_async())
            .await
            .map_err(|_| Error::connection(format!("connect_timeout={:?}", d)))?,
    };
    match received {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(Error::connection(e.to_string())),
        Err(_) => Err(Error::connection("driver dropped the connect callback")),
    }
}
