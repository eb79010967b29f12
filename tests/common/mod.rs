#![allow(dead_code)]

use async_trait::async_trait;
use log::LevelFilter;
use std::collections::HashSet;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use txn_pool::{Callback, Driver, Error, Executor, QueryResult, Result, Row, Value};

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger.is_test(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub url: String,
}

impl MockConfig {
    pub fn new() -> Self {
        Self {
            url: "mock://localhost/test".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
}

/// Shared view of everything the mock driver did.
#[derive(Debug, Default)]
pub struct MockState {
    pub statements: Mutex<Vec<String>>,
    pub connects: AtomicU64,
    pub closed: Mutex<Vec<u64>>,
    pub open: AtomicU64,
    pub peak_open: AtomicU64,
    pub fail_connect: AtomicBool,
    pub connect_delay_ms: AtomicU64,
    pub failing: Mutex<HashSet<String>>,
}

/// Callback driver completing on spawned tokio tasks.
///
/// `SLEEP <ms>` statements complete after the given delay; statements added
/// with [`MockDriver::fail_on`] complete with an error.
#[derive(Debug, Clone, Default)]
pub struct MockDriver(pub Arc<MockState>);

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.0.statements.lock().unwrap().clone()
    }

    pub fn count(&self, statement: &str) -> usize {
        self.statements().iter().filter(|s| *s == statement).count()
    }

    pub fn connects(&self) -> u64 {
        self.0.connects.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<u64> {
        self.0.closed.lock().unwrap().clone()
    }

    pub fn open(&self) -> u64 {
        self.0.open.load(Ordering::SeqCst)
    }

    pub fn peak_open(&self) -> u64 {
        self.0.peak_open.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.0.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, ms: u64) {
        self.0.connect_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn fail_on(&self, statement: &str) {
        self.0.failing.lock().unwrap().insert(statement.to_string());
    }
}

fn sleep_ms(statement: &str) -> Option<u64> {
    statement.strip_prefix("SLEEP ")?.trim().parse().ok()
}

fn respond(statement: &str) -> QueryResult {
    match statement {
        "SELECT 1 AS count" => QueryResult::with_rows(vec![Row::new().with("count", 1)]),
        s if s.starts_with("UPDATE") || s.starts_with("INSERT") => QueryResult::affected(1),
        _ => QueryResult::default(),
    }
}

impl Driver for MockDriver {
    type Config = MockConfig;
    type Connection = MockConnection;
    type Error = String;

    fn connect(&self, config: &Self::Config, done: Callback<Self::Connection, Self::Error>) {
        let state = self.0.clone();
        let id = state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = state.fail_connect.load(Ordering::SeqCst);
        let delay = state.connect_delay_ms.load(Ordering::SeqCst);
        let url = config.url.clone();
        tokio::spawn(async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if fail {
                done(Err(format!("could not connect to {}", url)));
                return;
            }
            let open = state.open.fetch_add(1, Ordering::SeqCst) + 1;
            state.peak_open.fetch_max(open, Ordering::SeqCst);
            done(Ok(MockConnection { id }));
        });
    }

    fn query(
        &self,
        _conn: &Self::Connection,
        statement: &str,
        _params: &[Value],
        done: Callback<QueryResult, Self::Error>,
    ) {
        self.0.statements.lock().unwrap().push(statement.to_string());
        let fail = self.0.failing.lock().unwrap().contains(statement);
        let delay = sleep_ms(statement);
        let statement = statement.to_string();
        tokio::spawn(async move {
            if let Some(ms) = delay {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if fail {
                done(Err(format!("syntax error at or near \"{}\"", statement)));
            } else {
                done(Ok(respond(&statement)));
            }
        });
    }

    fn close(&self, conn: &Self::Connection) {
        self.0.closed.lock().unwrap().push(conn.id);
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executor recording statements in call order, completing immediately.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    pub statements: Mutex<Vec<String>>,
    pub failing: Mutex<HashSet<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(statement: &str) -> Self {
        let e = Self::default();
        e.failing.lock().unwrap().insert(statement.to_string());
        e
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn count(&self, statement: &str) -> usize {
        self.statements().iter().filter(|s| *s == statement).count()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn query(&self, statement: &str, _params: &[Value]) -> Result<QueryResult> {
        self.statements.lock().unwrap().push(statement.to_string());
        if self.failing.lock().unwrap().contains(statement) {
            return Err(Error::query("mock failure", statement));
        }
        Ok(respond(statement))
    }
}
