//! Async connection managers and a transaction coordinator for database
//! drivers whose primitives complete through callbacks.
//!
//! * [`Pool`] keeps one lazily established connection and shares it.
//! * [`Client`] opens a fresh connection for every acquisition and reclaims
//!   idle ones with best-effort sweeps.
//! * [`run_transactional`] drives BEGIN, the caller's workload, then COMMIT or
//!   ROLLBACK, and releases the connection exactly once.

pub mod client;
pub mod connection;
pub mod error;
pub mod executor;
pub mod guard;
pub mod pool;
pub mod state;
pub mod sweep;
pub mod transaction;
pub mod value;

use std::fmt::Display;

/// One-shot completion handed to the driver.
pub type Callback<T, E> = Box<dyn FnOnce(std::result::Result<T, E>) + Send + 'static>;

/// Driver create Connection and run statements, completing through callbacks
pub trait Driver: Send + Sync + 'static {
    /// Connection configuration (url, credentials, ...)
    type Config: Send + Sync + 'static;

    type Connection: Send + Sync + 'static;

    type Error: Display + Send + 'static;

    ///open one Connection, call `done` exactly once
    fn connect(&self, config: &Self::Config, done: Callback<Self::Connection, Self::Error>);

    ///run one statement on `conn`, call `done` exactly once.
    ///statements issued on the same Connection are queued by the driver
    fn query(
        &self,
        conn: &Self::Connection,
        statement: &str,
        params: &[Value],
        done: Callback<QueryResult, Self::Error>,
    );

    ///tear the Connection down
    fn close(&self, conn: &Self::Connection);
}

pub use client::Client;
pub use connection::PooledConnection;
pub use error::{Error, Result};
pub use executor::{execute, Executor};
pub use guard::ConnectionGuard;
pub use pool::Pool;
pub use state::{ClientState, PoolState};
pub use transaction::{run_transactional, Transaction, TxState};
pub use value::{QueryResult, Row, Value};
