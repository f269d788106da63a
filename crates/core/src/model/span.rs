use serde::{Deserialize, Serialize};

use crate::ids::SpanId;

/// A span row as stored in the `spans` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span: Option<String>,
    pub project: String,
    pub sdk_name: Option<String>,
    pub span_op: String,
    #[serde(default)]
    pub description: String,
    pub transaction: String,
    #[serde(default)]
    pub is_segment: bool,
    /// Seconds since the epoch, microsecond precision.
    pub precise_start_ts: f64,
    pub precise_finish_ts: f64,
}

impl SpanRecord {
    pub fn is_root(&self) -> bool {
        SpanId::is_null_parent(self.parent_span.as_deref())
    }

    pub fn duration_ms(&self) -> i64 {
        (secs_to_ms(self.precise_finish_ts) - secs_to_ms(self.precise_start_ts)).max(0)
    }
}

/// The subset of span columns the breakdown merge needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakdownSpan {
    pub trace: String,
    pub project: String,
    pub sdk_name: Option<String>,
    pub span_op: String,
    pub parent_span: Option<String>,
    pub transaction: String,
    pub precise_start_ts: f64,
    pub precise_finish_ts: f64,
}

impl BreakdownSpan {
    pub fn is_root(&self) -> bool {
        SpanId::is_null_parent(self.parent_span.as_deref())
    }
}

impl From<&SpanRecord> for BreakdownSpan {
    fn from(span: &SpanRecord) -> Self {
        Self {
            trace: span.trace_id.clone(),
            project: span.project.clone(),
            sdk_name: span.sdk_name.clone(),
            span_op: span.span_op.clone(),
            parent_span: span.parent_span.clone(),
            transaction: span.transaction.clone(),
            precise_start_ts: span.precise_start_ts,
            precise_finish_ts: span.precise_finish_ts,
        }
    }
}

/// A span returned to callers as a representative sample of a trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampledSpan {
    pub id: String,
    pub parent_span: Option<String>,
    pub project: String,
    pub sdk_name: Option<String>,
    pub span_op: String,
    pub description: String,
    pub transaction: String,
    pub start: i64,
    pub end: i64,
    pub duration: i64,
}

impl From<&SpanRecord> for SampledSpan {
    fn from(span: &SpanRecord) -> Self {
        Self {
            id: span.span_id.clone(),
            parent_span: span.parent_span.clone(),
            project: span.project.clone(),
            sdk_name: span.sdk_name.clone(),
            span_op: span.span_op.clone(),
            description: span.description.clone(),
            transaction: span.transaction.clone(),
            start: secs_to_ms(span.precise_start_ts),
            end: secs_to_ms(span.precise_finish_ts),
            duration: span.duration_ms(),
        }
    }
}

/// Float seconds to integer milliseconds, truncating.
pub fn secs_to_ms(secs: f64) -> i64 {
    (secs * 1000.0) as i64
}
