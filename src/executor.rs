use crate::connection::PooledConnection;
use crate::error::{Error, Result};
use crate::{Driver, QueryResult, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// Anything statements can be sent to: a connection handle, a transaction,
/// or a test double.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn query(&self, statement: &str, params: &[Value]) -> Result<QueryResult>;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for &E {
    async fn query(&self, statement: &str, params: &[Value]) -> Result<QueryResult> {
        (**self).query(statement, params).await
    }
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Arc<E> {
    async fn query(&self, statement: &str, params: &[Value]) -> Result<QueryResult> {
        (**self).query(statement, params).await
    }
}

/// Run one statement on an acquired connection.
///
/// The connection counts as busy from the call until the completion arrives
/// or the returned future is dropped. Failures are never retried.
pub async fn execute<D: Driver>(
    driver: &D,
    conn: &PooledConnection<D>,
    statement: &str,
    params: &[Value],
) -> Result<QueryResult> {
    if conn.is_closed() {
        return Err(Error::Closed);
    }
    let _busy = conn.busy();
    let (send, recv) = flume::bounded(1);
    driver.query(
        conn.raw(),
        statement,
        params,
        Box::new(move |result| {
            _ = send.send(result);
        }),
    );
    match recv.recv_async().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(Error::query(e.to_string(), statement)),
        Err(_) => Err(Error::query("driver dropped the query callback", statement)),
    }
}
