pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  parent_span TEXT,
  project TEXT NOT NULL,
  sdk_name TEXT,
  span_op TEXT NOT NULL,
  description TEXT NOT NULL,
  transaction_name TEXT NOT NULL,
  is_segment BOOLEAN NOT NULL,
  precise_start_ts DOUBLE NOT NULL,
  precise_finish_ts DOUBLE NOT NULL,
  PRIMARY KEY(trace_id, span_id)
);

CREATE TABLE IF NOT EXISTS errors (
  trace_id TEXT NOT NULL,
  event_id TEXT NOT NULL,
  project TEXT NOT NULL,
  ts DOUBLE NOT NULL,
  PRIMARY KEY(trace_id, event_id)
);

CREATE TABLE IF NOT EXISTS occurrences (
  trace_id TEXT NOT NULL,
  occurrence_id TEXT NOT NULL,
  project TEXT NOT NULL,
  ts DOUBLE NOT NULL,
  PRIMARY KEY(trace_id, occurrence_id)
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_start ON spans(precise_start_ts);
CREATE INDEX IF NOT EXISTS idx_errors_trace ON errors(trace_id);
CREATE INDEX IF NOT EXISTS idx_occurrences_trace ON occurrences(trace_id);
"#;
