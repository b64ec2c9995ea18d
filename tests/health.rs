use citus_check::config::HealthQueries;
use citus_check::error::HarnessError;
use citus_check::executor::execute;
use citus_check::health::{Component, HealthInspector, HealthLevel, HealthStatus};
use citus_check::session::Session;
use std::sync::Arc;

mod harness_common;
use harness_common::{open_session, Fixture};

fn sqlite_queries() -> HealthQueries {
    HealthQueries {
        coordinator: "SELECT name FROM nodes WHERE role = 'coordinator'".to_string(),
        workers: "SELECT name FROM nodes WHERE role = 'worker' AND active = 1".to_string(),
        distributed_tables: "SELECT name FROM dist_tables".to_string(),
    }
}

async fn topology(session: &mut Session, workers: usize) {
    for sql in [
        "CREATE TABLE nodes (name TEXT, role TEXT, active INTEGER)",
        "CREATE TABLE dist_tables (name TEXT)",
        "INSERT INTO nodes VALUES ('coord', 'coordinator', 1)",
        "INSERT INTO nodes VALUES ('down', 'worker', 0)",
    ] {
        assert!(execute(session, sql).await.unwrap().is_success());
    }
    for i in 0..workers {
        let sql = format!("INSERT INTO nodes VALUES ('worker-{}', 'worker', 1)", i);
        assert!(execute(session, &sql).await.unwrap().is_success());
    }
}

#[tokio::test]
async fn healthy_cluster_without_distributed_tables_warns() {
    let fixture = Fixture::new();
    let mut session = open_session(Arc::new(fixture.driver())).await;
    topology(&mut session, 2).await;

    let report = HealthInspector::new(sqlite_queries())
        .check(&mut session)
        .await
        .unwrap();

    assert_eq!(
        report.get(Component::Coordinator),
        Some(&HealthStatus::Ok(String::new()))
    );
    assert_eq!(
        report.get(Component::Workers),
        Some(&HealthStatus::Ok("2 active workers".to_string()))
    );
    assert_eq!(
        report.get(Component::DistributedTables).map(|s| s.level()),
        Some(HealthLevel::Warning)
    );
    assert!(!report.is_healthy());

    execute(&mut session, "INSERT INTO dist_tables VALUES ('orders')")
        .await
        .unwrap();
    let report = HealthInspector::new(sqlite_queries())
        .check(&mut session)
        .await
        .unwrap();
    assert_eq!(
        report.get(Component::DistributedTables),
        Some(&HealthStatus::Ok("1 tables".to_string()))
    );
    assert!(report.is_healthy());

    session.close().await;
}

#[tokio::test]
async fn no_active_workers_is_an_error() {
    let fixture = Fixture::new();
    let mut session = open_session(Arc::new(fixture.driver())).await;
    topology(&mut session, 0).await;

    let report = HealthInspector::new(sqlite_queries())
        .check(&mut session)
        .await
        .unwrap();

    assert_eq!(
        report.get(Component::Workers).map(|s| s.level()),
        Some(HealthLevel::Error)
    );
    assert!(report.get(Component::Coordinator).unwrap().is_ok());

    session.close().await;
}

#[tokio::test]
async fn failing_query_only_affects_its_component() {
    let fixture = Fixture::new();
    let mut session = open_session(Arc::new(fixture.driver())).await;
    topology(&mut session, 1).await;

    let mut queries = sqlite_queries();
    queries.coordinator = "SELECT * FROM citus_get_coordinator_node()".to_string();
    let report = HealthInspector::new(queries)
        .check(&mut session)
        .await
        .unwrap();

    match report.get(Component::Coordinator) {
        Some(HealthStatus::Error(cause)) => assert!(!cause.is_empty()),
        other => panic!("expected coordinator error, got {other:?}"),
    }
    assert!(report.get(Component::Workers).unwrap().is_ok());
    assert_eq!(
        report.get(Component::DistributedTables).map(|s| s.level()),
        Some(HealthLevel::Warning)
    );

    session.close().await;
}

#[tokio::test]
async fn repeated_checks_classify_the_same_way() {
    let fixture = Fixture::new();
    let mut session = open_session(Arc::new(fixture.driver())).await;
    topology(&mut session, 3).await;
    let inspector = HealthInspector::new(sqlite_queries());

    let first = inspector.check(&mut session).await.unwrap();
    let second = inspector.check(&mut session).await.unwrap();

    assert_eq!(first.levels(), second.levels());
    assert_eq!(first.levels().len(), 3);

    session.close().await;
}

#[tokio::test]
async fn report_renders_like_the_log_lines() {
    assert_eq!(HealthStatus::Ok(String::new()).to_string(), "OK");
    assert_eq!(
        HealthStatus::Ok("3 active workers".to_string()).to_string(),
        "OK (3 active workers)"
    );
    assert_eq!(
        HealthStatus::Warning("no distributed tables found".to_string()).to_string(),
        "WARNING: no distributed tables found"
    );
    assert_eq!(Component::DistributedTables.to_string(), "distributed_tables");
}

#[tokio::test]
async fn closed_session_cannot_be_inspected() {
    let fixture = Fixture::new();
    let mut session = open_session(Arc::new(fixture.driver())).await;
    session.close().await;

    let err = HealthInspector::default()
        .check(&mut session)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::NoActiveSession));
}
