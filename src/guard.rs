use crate::connection::PooledConnection;
use crate::error::Result;
use crate::executor::{execute, Executor};
use crate::{Driver, QueryResult, Value};
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

/// Pool or client bookkeeping run when a handle is released.
pub type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// ConnectionGuard is the leased handle of one connection.
///
/// The release callback runs exactly once, either through [`release`](Self::release)
/// or when the guard is dropped.
pub struct ConnectionGuard<D: Driver> {
    pub inner: Arc<PooledConnection<D>>,
    driver: Arc<D>,
    release: Option<ReleaseFn>,
}

impl<D: Driver> ConnectionGuard<D> {
    pub fn new(conn: Arc<PooledConnection<D>>, driver: Arc<D>, release: ReleaseFn) -> Self {
        conn.lease();
        Self {
            inner: conn,
            driver,
            release: Some(release),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }

    /// Give the connection back to its manager now.
    pub fn release(mut self) {
        self.release_now();
    }

    /// Split the release callback off, leaving a handle that can still run
    /// statements but no longer releases anything on drop.
    pub fn detach_release(&mut self) -> ReleaseFn {
        match self.release.take() {
            Some(f) => {
                let conn = self.inner.clone();
                Box::new(move || {
                    conn.unlease();
                    f();
                })
            }
            None => Box::new(|| {}),
        }
    }

    fn release_now(&mut self) {
        if let Some(f) = self.release.take() {
            self.inner.unlease();
            f();
        }
    }
}

impl<D: Driver> Debug for ConnectionGuard<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("conn", &self.inner)
            .field("released", &self.is_released())
            .finish()
    }
}

impl<D: Driver> Deref for ConnectionGuard<D> {
    type Target = D::Connection;

    fn deref(&self) -> &Self::Target {
        self.inner.raw()
    }
}

#[async_trait]
impl<D: Driver> Executor for ConnectionGuard<D> {
    async fn query(&self, statement: &str, params: &[Value]) -> Result<QueryResult> {
        execute(&*self.driver, &self.inner, statement, params).await
    }
}

impl<D: Driver> Drop for ConnectionGuard<D> {
    fn drop(&mut self) {
        self.release_now();
    }
}
