//! Store statement tracing.

use std::future::Future;
use std::time::Instant;

use tracing::debug;

use crate::metrics::{names, MetricsRecorder};
use crate::tracer::{Span, SpanKind};

const UNKNOWN_OPERATION: &str = "UNKNOWN";
const UNKNOWN_TABLE: &str = "unknown";

/// Statement type and target table, derived from SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementInfo {
    pub operation_type: String,
    pub table: String,
}

impl StatementInfo {
    /// Best-effort parse. Unrecognised statements yield `UNKNOWN`/`unknown`.
    pub fn parse(statement: &str) -> Self {
        let tokens: Vec<&str> = statement.split_whitespace().collect();
        let operation_type = tokens
            .first()
            .map(|t| t.trim_end_matches(';').to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_OPERATION.to_string());

        let keyword = match operation_type.as_str() {
            "SELECT" | "DELETE" => Some("FROM"),
            "INSERT" => Some("INTO"),
            "UPDATE" => Some("UPDATE"),
            _ => None,
        };

        let table = keyword
            .and_then(|kw| {
                tokens
                    .iter()
                    .position(|t| t.eq_ignore_ascii_case(kw))
                    .and_then(|i| tokens.get(i + 1))
            })
            .map(|t| clean_identifier(t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_TABLE.to_string());

        Self {
            operation_type,
            table,
        }
    }
}

fn clean_identifier(token: &str) -> String {
    let token = token.split('(').next().unwrap_or(token);
    token
        .trim_end_matches([';', ','])
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect()
}

/// Run a store call inside a client child span of `parent`, recording
/// `db_operation_duration_seconds{operation_type,table}`.
pub async fn traced_statement<F, T, E>(
    parent: &Span,
    recorder: &MetricsRecorder,
    statement: &str,
    call: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error,
{
    let info = StatementInfo::parse(statement);
    let mut span = parent
        .child_builder(format!("{} {}", info.operation_type, info.table))
        .with_kind(SpanKind::Client)
        .with_attribute("db.statement", statement)
        .with_attribute("db.statement_type", info.operation_type.as_str())
        .with_attribute("db.sql.table", info.table.as_str())
        .start();

    let started = Instant::now();
    let result = call.await;
    let elapsed = started.elapsed();

    span.set_attribute("db.execution_time_ms", elapsed.as_secs_f64() * 1000.0);
    if let Err(e) = &result {
        span.record_error(e);
    }
    let exemplar = span.is_sampled().then(|| span.trace_id());
    if let Err(e) = span.end() {
        debug!(error = %e, "Statement span already ended");
    }

    recorder.observe_latency(
        names::DB_OPERATION_DURATION_SECONDS,
        &[
            ("operation_type", info.operation_type.as_str()),
            ("table", info.table.as_str()),
        ],
        elapsed.as_secs_f64(),
        exemplar,
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RandomIdGenerator, Sampler};
    use crate::tracer::{InMemorySpanProcessor, SpanStatus, Tracer};
    use std::sync::Arc;

    fn info(op: &str, table: &str) -> StatementInfo {
        StatementInfo {
            operation_type: op.to_string(),
            table: table.to_string(),
        }
    }

    #[test]
    fn test_parse_statements() {
        assert_eq!(
            StatementInfo::parse("SELECT id, name FROM users WHERE id = $1"),
            info("SELECT", "users")
        );
        assert_eq!(
            StatementInfo::parse("insert into items(title, owner_id) values ($1, $2)"),
            info("INSERT", "items")
        );
        assert_eq!(
            StatementInfo::parse("UPDATE \"users\" SET name = $1"),
            info("UPDATE", "users")
        );
        assert_eq!(
            StatementInfo::parse("DELETE FROM items;"),
            info("DELETE", "items")
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(StatementInfo::parse(""), info("UNKNOWN", "unknown"));
        assert_eq!(StatementInfo::parse("BEGIN;"), info("BEGIN", "unknown"));
        assert_eq!(StatementInfo::parse("SELECT 1"), info("SELECT", "unknown"));
    }

    #[tokio::test]
    async fn test_traced_statement_records_span_and_metric() {
        let recorder = Arc::new(MetricsRecorder::new());
        let spans = Arc::new(InMemorySpanProcessor::new());
        let tracer = Tracer::new(
            "api",
            Arc::new(RandomIdGenerator),
            Sampler::always_on(),
            Arc::clone(&recorder),
            vec![spans.clone()],
        );
        let root = tracer.start_span("read_users", None);

        let rows: Result<Vec<u32>, std::io::Error> = traced_statement(
            &root,
            &recorder,
            "SELECT * FROM users",
            async { Ok(vec![1, 2]) },
        )
        .await;
        assert_eq!(rows.unwrap().len(), 2);

        let failed: Result<(), std::io::Error> =
            traced_statement(&root, &recorder, "DELETE FROM items", async {
                Err(std::io::Error::other("constraint violation"))
            })
            .await;
        assert!(failed.is_err());

        let finished = spans.spans();
        assert_eq!(finished[0].name, "SELECT users");
        assert_eq!(finished[0].kind, SpanKind::Client);
        assert_eq!(finished[0].parent_span_id, Some(root.span_id()));
        assert_eq!(finished[1].status, SpanStatus::Error);

        let snapshot = recorder.histogram_snapshot(
            names::DB_OPERATION_DURATION_SECONDS,
            &[("operation_type", "SELECT"), ("table", "users")],
        );
        assert_eq!(snapshot.count, 1);
    }
}
