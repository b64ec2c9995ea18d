use citus_check::config::{ConnectionConfig, RetryPolicy};
use citus_check::connector::{Connector, RetryBudget};
use citus_check::engine::postgres::PostgresDriver;
use citus_check::engine::sqlite::SqliteDriver;
use citus_check::error::{DriverErrorKind, HarnessError};
use citus_check::events::{HarnessEvent, RecordingSink};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod harness_common;
use harness_common::{connector, Fixture, FlakyDriver};

#[test]
fn retry_budget_is_consumed_monotonically() {
    let mut budget = RetryBudget::new(&RetryPolicy::new(3, 250));
    assert_eq!(budget.remaining(), 3);
    assert_eq!(budget.delay(), Duration::from_millis(250));
    assert_eq!(budget.next_attempt(), Some(1));
    assert_eq!(budget.next_attempt(), Some(2));
    assert_eq!(budget.next_attempt(), Some(3));
    assert_eq!(budget.next_attempt(), None);
    assert_eq!(budget.next_attempt(), None);
    assert_eq!(budget.used(), 3);
    assert_eq!(budget.remaining(), 0);
}

#[tokio::test]
async fn permanently_failing_target_uses_exactly_the_budget() {
    let fixture = Fixture::new();
    let driver = Arc::new(FlakyDriver::new(Arc::new(fixture.driver())).failing_first(u32::MAX));
    let events = RecordingSink::new();
    let connector = connector(driver.clone(), Arc::new(events.clone()));

    let err = connector.connect(&RetryPolicy::new(4, 0)).await.unwrap_err();

    match err {
        HarnessError::ConnectionFailure {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 4);
            assert_eq!(last_error.kind, DriverErrorKind::Connectivity);
            assert!(last_error.message.contains("attempt 4"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.attempts(), 4);
    assert_eq!(events.connect_attempts(), 4);

    // Only the last failure is reported without a retry.
    let retries: Vec<bool> = events
        .events()
        .iter()
        .filter_map(|e| match e {
            HarnessEvent::ConnectFailed { will_retry, .. } => Some(*will_retry),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![true, true, true, false]);
}

#[tokio::test]
async fn success_on_attempt_k_stops_retrying() {
    let fixture = Fixture::new();
    let driver = Arc::new(FlakyDriver::new(Arc::new(fixture.driver())).failing_first(2));
    let events = RecordingSink::new();
    let connector = connector(driver.clone(), Arc::new(events.clone()));

    let mut session = connector.connect(&RetryPolicy::new(5, 0)).await.unwrap();

    assert!(session.is_open());
    assert!(session.is_autocommit());
    assert_eq!(driver.attempts(), 3);
    assert_eq!(events.connect_attempts(), 3);
    assert!(events
        .events()
        .contains(&HarnessEvent::Connected {
            target: ConnectionConfig::default().target(),
            attempts: 3,
        }));

    connector.disconnect(&mut session).await;
    assert!(!session.is_open());
    assert_eq!(driver.closed(), 1);
}

#[tokio::test]
async fn waits_between_attempts_but_not_after_the_last() {
    let fixture = Fixture::new();
    let driver = Arc::new(FlakyDriver::new(Arc::new(fixture.driver())).failing_first(u32::MAX));
    let connector = connector(driver, Arc::new(RecordingSink::new()));

    let started = Instant::now();
    let _ = connector.connect(&RetryPolicy::new(3, 50)).await;
    let elapsed = started.elapsed();

    // Two waits of 50ms; a third would push it past 150ms.
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150) + Duration::from_millis(500));
}

#[tokio::test]
async fn rejected_connection_is_not_retried() {
    let fixture = Fixture::new();
    let driver = Arc::new(
        FlakyDriver::new(Arc::new(fixture.driver()))
            .failing_first(u32::MAX)
            .with_kind(DriverErrorKind::Rejected),
    );
    let events = RecordingSink::new();
    let connector = connector(driver.clone(), Arc::new(events.clone()));

    let err = connector.connect(&RetryPolicy::new(5, 0)).await.unwrap_err();
    match err {
        HarnessError::ConnectionFailure {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(last_error.kind, DriverErrorKind::Rejected);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.attempts(), 1);
    assert_eq!(events.connect_attempts(), 1);
    assert!(events.events().contains(&HarnessEvent::ConnectFailed {
        attempt: 1,
        error: "simulated failure on attempt 1".to_string(),
        will_retry: false,
    }));
}

#[tokio::test]
async fn unopenable_sqlite_file_is_a_connectivity_failure() {
    let dir = tempfile::tempdir().unwrap();
    let driver = SqliteDriver::new(dir.path().join("missing").join("db.sqlite"));
    let connector = Connector::new(
        Arc::new(driver),
        ConnectionConfig::default(),
        Arc::new(RecordingSink::new()),
    );

    let err = connector.connect(&RetryPolicy::new(2, 0)).await.unwrap_err();
    match err {
        HarnessError::ConnectionFailure {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_error.kind, DriverErrorKind::Connectivity);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_postgres_exhausts_the_budget() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let events = RecordingSink::new();
    let connector = Connector::new(
        Arc::new(PostgresDriver::new(Duration::from_secs(2))),
        ConnectionConfig::new("127.0.0.1", port, "citus", "citus", "citus123"),
        Arc::new(events.clone()),
    );

    let err = connector.connect(&RetryPolicy::new(3, 0)).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::ConnectionFailure { attempts: 3, .. }
    ));
    assert_eq!(events.connect_attempts(), 3);
}
