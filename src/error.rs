use crate::transaction::TxState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the connection managers, the query executor and the
/// transaction coordinator.
///
/// `Error` is `Clone` because one in-flight connect result is handed to
/// every task waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Connecting to the store failed (config, network, auth or timeout).
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// A statement failed on the driver.
    #[error("query failed: {message} (statement: {statement})")]
    Query { message: String, statement: String },

    /// The transactional workload panicked.
    #[error("workload failed: {message}")]
    Workload { message: String },

    /// `commit()` or `rollback()` was called on a finished transaction.
    #[error("transaction already {state}")]
    Finished { state: TxState },

    /// The manager or the connection was already closed.
    #[error("connection closed")]
    Closed,
}

impl Error {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>, statement: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            statement: statement.into(),
        }
    }

    pub fn workload(message: impl Into<String>) -> Self {
        Self::Workload {
            message: message.into(),
        }
    }

    /// Build a workload error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "workload panicked".to_string()
        };
        Self::workload(message)
    }
}
