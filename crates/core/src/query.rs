use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breakdown::{DEFAULT_SLICES, MAX_SLICES, TraceInterval};
use crate::condition::SpanQuery;
use crate::error::{Result, TracexError};
use crate::model::span::SampledSpan;
use crate::time::TimeWindow;

pub const MAX_TRACES: usize = 100;
pub const MAX_SPANS_PER_TRACE: usize = 100;

/// Missing fields fall back to [`TracesRequest::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracesRequest {
    /// Each entry is a span query; a trace must match all of them.
    pub queries: Vec<String>,
    pub suggested_query: Option<String>,
    pub window: TimeWindow,
    pub limit: usize,
    pub breakdown_slices: u32,
    pub max_spans_per_trace: usize,
}

impl Default for TracesRequest {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            suggested_query: None,
            window: TimeWindow::all(),
            limit: 10,
            breakdown_slices: DEFAULT_SLICES,
            max_spans_per_trace: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedQueries {
    pub user: Vec<SpanQuery>,
    pub suggested: Option<SpanQuery>,
}

impl TracesRequest {
    /// Checks the numeric bounds and parses every query string.
    pub fn validate(&self) -> Result<ParsedQueries> {
        if !(1..=MAX_TRACES).contains(&self.limit) {
            return Err(TracexError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_TRACES}, got {}",
                self.limit
            )));
        }
        if !(1..=MAX_SLICES).contains(&self.breakdown_slices) {
            return Err(TracexError::InvalidArgument(format!(
                "breakdown_slices must be between 1 and {MAX_SLICES}, got {}",
                self.breakdown_slices
            )));
        }
        if !(1..=MAX_SPANS_PER_TRACE).contains(&self.max_spans_per_trace) {
            return Err(TracexError::InvalidArgument(format!(
                "max_spans_per_trace must be between 1 and {MAX_SPANS_PER_TRACE}, got {}",
                self.max_spans_per_trace
            )));
        }

        let user = self
            .queries
            .iter()
            .map(|q| SpanQuery::parse(q))
            .collect::<Result<Vec<_>>>()?;
        let suggested = self
            .suggested_query
            .as_deref()
            .map(SpanQuery::parse)
            .transpose()?
            .filter(|q| !q.is_empty());

        Ok(ParsedQueries { user, suggested })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    pub trace: String,
    pub num_errors: usize,
    pub num_occurrences: usize,
    pub num_spans: usize,
    pub matching_spans: usize,
    pub project: Option<String>,
    pub name: Option<String>,
    pub duration: i64,
    pub start: i64,
    pub end: i64,
    pub breakdowns: Vec<TraceInterval>,
    pub spans: Vec<SampledSpan>,
    pub suggested_spans: Vec<SampledSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TracesMeta {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub discovered: usize,
    pub dropped: usize,
    pub breakdown_diagnostics: usize,
    pub breakdown_failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracesResponse {
    pub data: Vec<TraceResult>,
    pub meta: TracesMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub spans_count: usize,
    pub traces_count: usize,
    pub errors_count: usize,
    pub occurrences_count: usize,
    pub oldest_ts: Option<DateTime<Utc>>,
    pub newest_ts: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_is_valid() {
        let parsed = TracesRequest::default().validate().unwrap();
        assert!(parsed.user.is_empty());
        assert!(parsed.suggested.is_none());
    }

    #[test]
    fn bounds_are_enforced() {
        for req in [
            TracesRequest {
                limit: 0,
                ..TracesRequest::default()
            },
            TracesRequest {
                breakdown_slices: 101,
                ..TracesRequest::default()
            },
            TracesRequest {
                max_spans_per_trace: 0,
                ..TracesRequest::default()
            },
            TracesRequest {
                queries: vec!["span.op".into()],
                ..TracesRequest::default()
            },
        ] {
            assert!(req.validate().is_err());
        }
    }

    #[test]
    fn blank_suggested_query_is_ignored() {
        let req = TracesRequest {
            queries: vec!["span.op:db".into(), "project:api".into()],
            suggested_query: Some(" ".into()),
            ..TracesRequest::default()
        };
        let parsed = req.validate().unwrap();
        assert_eq!(parsed.user.len(), 2);
        assert!(parsed.suggested.is_none());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: TracesRequest = serde_json::from_str(
            r#"{"limit": 5, "breakdown_slices": 20, "max_spans_per_trace": 2}"#,
        )
        .unwrap();
        assert!(req.queries.is_empty());
        assert!(req.window.since.is_none());
        assert_eq!(req.breakdown_slices, 20);

        let bare: TracesRequest = serde_json::from_str(r#"{"queries": ["span.op:db"]}"#).unwrap();
        assert_eq!(bare.limit, 10);
        assert_eq!(bare.breakdown_slices, DEFAULT_SLICES);
    }
}
