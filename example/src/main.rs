use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use txn_pool::{Callback, Client, Driver, Error, Pool, QueryResult, Row, Value};

/// Toy driver keeping account balances in memory.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    accounts: Arc<Mutex<HashMap<i64, i64>>>,
}

pub struct MemoryConnection;

impl Driver for MemoryDriver {
    type Config = String;
    type Connection = MemoryConnection;
    type Error = String;

    fn connect(&self, config: &Self::Config, done: Callback<Self::Connection, Self::Error>) {
        println!("connect {}", config);
        tokio::spawn(async move { done(Ok(MemoryConnection)) });
    }

    fn query(
        &self,
        _conn: &Self::Connection,
        statement: &str,
        params: &[Value],
        done: Callback<QueryResult, Self::Error>,
    ) {
        let mut accounts = self.accounts.lock().unwrap();
        let result = match (statement, params) {
            ("ADD", [Value::Int(id), Value::Int(amount)]) => {
                *accounts.entry(*id).or_insert(0) += amount;
                Ok(QueryResult::affected(1))
            }
            ("BALANCE", [Value::Int(id)]) => Ok(QueryResult::with_rows(vec![
                Row::new().with("amount", accounts.get(id).copied().unwrap_or(0)),
            ])),
            ("BEGIN" | "COMMIT" | "ROLLBACK", _) => Ok(QueryResult::default()),
            _ => Err(format!("unknown statement {}", statement)),
        };
        tokio::spawn(async move { done(result) });
    }

    fn close(&self, _conn: &Self::Connection) {
        println!("close");
    }
}

#[tokio::main]
async fn main() {
    let pool = Pool::new(MemoryDriver::default(), "memory://bank".to_string());
    println!("state = {}", pool.state());

    pool.run_transactional(|tx| async move {
        tx.query("ADD", &[1.into(), 100.into()]).await?;
        tx.query("ADD", &[2.into(), 100.into()]).await?;
        Ok::<_, Error>(())
    })
    .await
    .unwrap();

    let balance = pool
        .connect_and_query("BALANCE", &[1.into()])
        .await
        .unwrap();
    println!("balance = {:?}", balance.rows[0].get("amount"));
    println!("state = {}", pool.state());
    pool.close();

    let client = Client::new(MemoryDriver::default(), "memory://bank".to_string());
    for id in 0..3i64 {
        client.connect_and_query("ADD", &[id.into(), 10.into()]).await.unwrap();
    }
    println!("state = {}", client.state());
    client.release(true);
    client.settle().await;
    println!("state = {}", client.state());
}
