//! Persisted warn+ log, attributed to tasks.
//!
//! A record's `task_id` is the event's own `task_id` field when it has one,
//! otherwise the task scope of the innermost enclosing span. Store and handler
//! spans declare `task_id`, so a warning raised while updating a task is
//! findable with `tasklist logs --task <id>` without every call site repeating
//! the id.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::Connection;
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const TASK_FIELD: &str = "task_id";

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        logged_at TEXT NOT NULL,
        severity INTEGER NOT NULL,
        target TEXT NOT NULL,
        operation TEXT,
        task_id TEXT,
        message TEXT NOT NULL,
        fields TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_task ON logs(task_id, id);
    CREATE INDEX IF NOT EXISTS idx_logs_logged_at ON logs(logged_at);
";

/// A persisted log record.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub id: i64,
    pub logged_at: DateTime<Utc>,
    pub level: Level,
    pub target: String,
    /// Name of the innermost span the event was raised in, e.g. `update_by_id`.
    pub operation: Option<String>,
    pub task_id: Option<String>,
    pub message: String,
    /// Remaining event fields as a JSON object.
    pub fields: Option<String>,
}

/// Filter for [`TaskLog::query`]. Results are newest first.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Keep records at this level or more severe.
    pub min_level: Option<Level>,
    pub task_id: Option<String>,
    /// Substring of the event target, e.g. `store`.
    pub target: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl LogQuery {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Default::default()
        }
    }
}

/// The SQLite log database.
pub struct TaskLog {
    conn: Mutex<Connection>,
}

impl TaskLog {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, entry: &LogEntry) {
        // Nowhere to report a failed write from inside the subscriber.
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (logged_at, severity, target, operation, task_id, message, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                format_stamp(&entry.logged_at),
                severity(entry.level),
                entry.target,
                entry.operation,
                entry.task_id,
                entry.message,
                entry.fields,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(level) = q.min_level {
            params.push(Value::Integer(severity(level)));
            clauses.push(format!("severity >= ?{}", params.len()));
        }
        if let Some(task_id) = &q.task_id {
            params.push(Value::Text(task_id.clone()));
            clauses.push(format!("task_id = ?{}", params.len()));
        }
        if let Some(target) = &q.target {
            params.push(Value::Text(format!("%{target}%")));
            clauses.push(format!("target LIKE ?{}", params.len()));
        }
        if let Some(since) = &q.since {
            params.push(Value::Text(format_stamp(since)));
            clauses.push(format!("logged_at >= ?{}", params.len()));
        }

        let mut sql = String::from(
            "SELECT id, logged_at, severity, target, operation, task_id, message, fields FROM logs",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                logged_at: parse_stamp(1, row.get(1)?)?,
                level: level_of(row.get(2)?),
                target: row.get(3)?,
                operation: row.get(4)?,
                task_id: row.get(5)?,
                message: row.get(6)?,
                fields: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

/// Larger is more severe.
fn severity(level: Level) -> i64 {
    match level {
        Level::ERROR => 5,
        Level::WARN => 4,
        Level::INFO => 3,
        Level::DEBUG => 2,
        Level::TRACE => 1,
    }
}

fn level_of(severity: i64) -> Level {
    match severity {
        s if s >= 5 => Level::ERROR,
        4 => Level::WARN,
        3 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Fixed-width UTC stamps so `logged_at >= ?` compares correctly as text.
fn format_stamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(idx: usize, raw: String) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

struct LogEntry {
    logged_at: DateTime<Utc>,
    level: Level,
    target: String,
    operation: Option<String>,
    task_id: Option<String>,
    message: String,
    fields: Option<String>,
}

/// Task a span is working on, kept in the span's extensions.
struct TaskScope(String);

/// Splits recorded fields into the message, the task id, and the rest.
#[derive(Default)]
struct FieldSplitter {
    message: Option<String>,
    task_id: Option<String>,
    rest: serde_json::Map<String, serde_json::Value>,
}

impl FieldSplitter {
    fn put(&mut self, field: &Field, value: serde_json::Value) {
        match (field.name(), value) {
            ("message", serde_json::Value::String(s)) => self.message = Some(s),
            (TASK_FIELD, serde_json::Value::String(s)) => self.task_id = Some(s),
            (name, value) => {
                self.rest.insert(name.to_owned(), value);
            }
        }
    }
}

impl Visit for FieldSplitter {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `%id` display values arrive here already formatted.
        self.put(field, format!("{value:?}").into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

/// Layer that appends WARN and ERROR events to a [`TaskLog`].
pub struct TaskLogLayer {
    log: Arc<TaskLog>,
}

impl TaskLogLayer {
    pub fn new(log: Arc<TaskLog>) -> Self {
        Self { log }
    }

    fn scope_span<S>(id: &span::Id, ctx: &Context<'_, S>, values: FieldSplitter)
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        let (Some(task_id), Some(span)) = (values.task_id, ctx.span(id)) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<TaskScope>() {
            Some(scope) => scope.0 = task_id,
            None => extensions.insert(TaskScope(task_id)),
        }
    }
}

impl<S> Layer<S> for TaskLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut values = FieldSplitter::default();
        attrs.record(&mut values);
        Self::scope_span(id, &ctx, values);
    }

    // `create` only learns its task id after the span has opened.
    fn on_record(&self, id: &span::Id, record: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut values = FieldSplitter::default();
        record.record(&mut values);
        Self::scope_span(id, &ctx, values);
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut values = FieldSplitter::default();
        event.record(&mut values);

        let task_id = values.task_id.or_else(|| {
            ctx.event_scope(event)?.find_map(|span| {
                let extensions = span.extensions();
                extensions.get::<TaskScope>().map(|scope| scope.0.clone())
            })
        });
        let operation = ctx
            .event_scope(event)
            .and_then(|mut scope| scope.next())
            .map(|span| span.name().to_owned());

        self.log.append(&LogEntry {
            logged_at: Utc::now(),
            level,
            target: event.metadata().target().to_owned(),
            operation,
            task_id,
            message: values.message.unwrap_or_default(),
            fields: (!values.rest.is_empty())
                .then(|| serde_json::Value::Object(values.rest).to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tasklist-test-logs-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("logs.db")
    }

    fn entry(second: u32, level: Level, target: &str, task_id: Option<&str>, message: &str) -> LogEntry {
        LogEntry {
            logged_at: Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, second).unwrap(),
            level,
            target: target.into(),
            operation: None,
            task_id: task_id.map(str::to_owned),
            message: message.into(),
            fields: None,
        }
    }

    fn capture(log: &Arc<TaskLog>, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(TaskLogLayer::new(log.clone()));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn min_level_keeps_more_severe_records() {
        let log = TaskLog::open(&temp_db()).unwrap();
        log.append(&entry(0, Level::WARN, "test", None, "warning"));
        log.append(&entry(1, Level::ERROR, "test", None, "failure"));

        let errors = log
            .query(&LogQuery {
                min_level: Some(Level::ERROR),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].level, Level::ERROR);

        let warnings = log
            .query(&LogQuery {
                min_level: Some(Level::WARN),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].message, "failure");
    }

    #[test]
    fn query_by_task_target_and_since() {
        let log = TaskLog::open(&temp_db()).unwrap();
        log.append(&entry(0, Level::WARN, "tasklist_server::handlers", Some("task_a"), "A"));
        log.append(&entry(5, Level::ERROR, "tasklist_store::tasks", Some("task_b"), "B"));
        log.append(&entry(9, Level::WARN, "tasklist_store::seed", None, "C"));

        let by_task = log.query(&LogQuery::for_task("task_a")).unwrap();
        assert_eq!(by_task.len(), 1);
        assert_eq!(by_task[0].message, "A");

        let by_target = log
            .query(&LogQuery {
                target: Some("store".into()),
                ..Default::default()
            })
            .unwrap();
        let messages: Vec<_> = by_target.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["C", "B"]);

        let recent = log
            .query(&LogQuery {
                since: Some(Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 5).unwrap()),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "C");
        assert_eq!(
            recent[0].logged_at,
            Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 9).unwrap()
        );
    }

    #[test]
    fn events_take_task_and_operation_from_enclosing_span() {
        let log = Arc::new(TaskLog::open(&temp_db()).unwrap());

        capture(&log, || {
            tracing::info!("not persisted");
            let span = tracing::info_span!("update_by_id", task_id = "task_42");
            let _guard = span.enter();
            tracing::warn!(attempt = 1u64, "update rejected");

            let nested = tracing::info_span!("render");
            let _nested = nested.enter();
            tracing::error!("template failed");
        });

        let records = log.query(&LogQuery::for_task("task_42")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "template failed");
        assert_eq!(records[0].operation.as_deref(), Some("render"));
        assert_eq!(records[1].level, Level::WARN);
        assert_eq!(records[1].operation.as_deref(), Some("update_by_id"));
        assert_eq!(records[1].fields.as_deref(), Some(r#"{"attempt":1}"#));
    }

    #[test]
    fn task_id_recorded_after_span_opens_is_picked_up() {
        let log = Arc::new(TaskLog::open(&temp_db()).unwrap());

        capture(&log, || {
            let span = tracing::info_span!("create", task_id = tracing::field::Empty);
            let _guard = span.enter();
            tracing::warn!("before id");
            span.record("task_id", "task_43");
            tracing::warn!("after id");
        });

        let records = log.query(&LogQuery::default()).unwrap();
        assert_eq!(records[0].task_id.as_deref(), Some("task_43"));
        assert_eq!(records[1].task_id, None);
    }

    #[test]
    fn explicit_event_task_id_overrides_span_scope() {
        let log = Arc::new(TaskLog::open(&temp_db()).unwrap());

        capture(&log, || {
            let span = tracing::info_span!("seed", task_id = "task_outer");
            let _guard = span.enter();
            tracing::warn!(task_id = "task_inner", "insert failed");
        });

        let records = log.query(&LogQuery::default()).unwrap();
        assert_eq!(records[0].task_id.as_deref(), Some("task_inner"));
        assert!(records[0].fields.is_none());
    }

    #[test]
    fn display_task_ids_are_unquoted() {
        let log = Arc::new(TaskLog::open(&temp_db()).unwrap());
        let id = String::from("task_display");

        capture(&log, || {
            let span = tracing::info_span!("destroy", task_id = %id);
            let _guard = span.enter();
            tracing::warn!("delete failed");
        });

        assert_eq!(log.query(&LogQuery::for_task("task_display")).unwrap().len(), 1);
        assert_eq!(log.count().unwrap(), 1);
    }
}
