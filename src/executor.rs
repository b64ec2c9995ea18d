use crate::engine::ResultSet;
use crate::error::{HarnessError, Result};
use crate::session::Session;

const READ_KEYWORDS: [&str; 6] = ["SELECT", "WITH", "SHOW", "VALUES", "EXPLAIN", "TABLE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces a row set that is fetched in full.
    Read,
    /// Produces an affected-row count and is committed afterwards.
    Write,
}

impl StatementKind {
    /// Classifies by the statement's leading keyword.
    pub fn classify(sql: &str) -> Self {
        let keyword: String = sql
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        if READ_KEYWORDS.contains(&keyword.as_str()) {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }
}

/// Result of running one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Rows(ResultSet),
    Count(u64),
    /// The statement failed and its transaction was rolled back.
    Failed(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ExecutionOutcome::Failed(_))
    }
}

/// Runs a single statement on the open session.
///
/// Statement errors never escape: the transaction is rolled back and the
/// error comes back as `ExecutionOutcome::Failed`. The only error returned is
/// `NoActiveSession`, raised before anything is sent.
pub async fn execute(session: &mut Session, sql: &str) -> Result<ExecutionOutcome> {
    if !session.is_open() {
        return Err(HarnessError::NoActiveSession);
    }

    let result = match StatementKind::classify(sql) {
        StatementKind::Read => session.query(sql).await.map(ExecutionOutcome::Rows),
        StatementKind::Write => match session.execute(sql).await {
            Ok(count) => session.commit().await.map(|_| ExecutionOutcome::Count(count)),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            // Rollback problems are secondary; the statement error is what gets reported.
            let _ = session.rollback().await;
            Ok(ExecutionOutcome::Failed(e.message))
        }
    }
}
