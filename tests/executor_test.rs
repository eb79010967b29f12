mod common;

#[cfg(test)]
mod test {
    use crate::common::{MockConfig, MockConnection, MockDriver};
    use std::sync::Arc;
    use std::time::Duration;
    use txn_pool::connection::connect;
    use txn_pool::{execute, Error, PooledConnection, Value};

    #[tokio::test]
    async fn test_execute_rows() {
        let driver = MockDriver::new();
        let conn = PooledConnection::<MockDriver>::new(1, MockConnection { id: 1 });
        let r = execute(&driver, &conn, "SELECT 1 AS count", &[]).await.unwrap();
        assert_eq!(r.row_count, 1);
        assert_eq!(r.rows[0].get("count"), Some(&Value::Int(1)));
        assert_eq!(r.rows[0].get("missing"), None);
        assert_eq!(driver.statements(), vec!["SELECT 1 AS count"]);
    }

    #[tokio::test]
    async fn test_execute_error_is_not_retried() {
        let driver = MockDriver::new();
        driver.fail_on("SYNTAX ERROR");
        let conn = PooledConnection::<MockDriver>::new(1, MockConnection { id: 1 });
        let e = execute(&driver, &conn, "SYNTAX ERROR", &[]).await.unwrap_err();
        assert_eq!(
            e,
            Error::query("syntax error at or near \"SYNTAX ERROR\"", "SYNTAX ERROR")
        );
        assert_eq!(driver.count("SYNTAX ERROR"), 1);
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test]
    async fn test_pending_tracks_in_flight_statement() {
        let driver = MockDriver::new();
        let conn = PooledConnection::<MockDriver>::new(1, MockConnection { id: 1 });
        assert!(conn.is_idle());
        let (r, pending) = tokio::join!(execute(&driver, &conn, "SLEEP 30", &[]), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            conn.pending()
        });
        assert!(r.is_ok());
        assert_eq!(pending, 1);
        assert_eq!(conn.pending(), 0);
        assert!(conn.is_idle());
    }

    #[tokio::test]
    async fn test_dropped_execute_is_not_pending() {
        let driver = MockDriver::new();
        let conn = PooledConnection::<MockDriver>::new(1, MockConnection { id: 1 });
        let r = tokio::time::timeout(
            Duration::from_millis(5),
            execute(&driver, &conn, "SLEEP 100", &[]),
        )
        .await;
        assert!(r.is_err());
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test]
    async fn test_connect_bridge() {
        let driver = Arc::new(MockDriver::new());
        let raw = connect(&driver, &MockConfig::new(), None).await.unwrap();
        assert_eq!(raw.id, 1);

        driver.set_fail_connect(true);
        let e = connect(&driver, &MockConfig::new(), None).await.unwrap_err();
        assert_eq!(
            e,
            Error::connection("could not connect to mock://localhost/test")
        );
    }

    #[tokio::test]
    async fn test_abandoned_connect_closes_connection() {
        let driver = Arc::new(MockDriver::new());
        driver.set_connect_delay(30);
        let r = tokio::time::timeout(
            Duration::from_millis(5),
            connect(&driver, &MockConfig::new(), None),
        )
        .await;
        assert!(r.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(driver.open(), 0);
        assert_eq!(driver.closed(), vec![1]);
    }

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from("a").to_string(), "'a'");
    }
}
