use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::params_from_iter;
use duckdb::types::Value;
use tracex_core::assemble::{AssemblyInput, TraceMeta, assemble};
use tracex_core::condition::{SpanQuery, trace_matches_all};
use tracex_core::config::Config;
use tracex_core::error::{Result, TracexError};
use tracex_core::model::span::{BreakdownSpan, SampledSpan, SpanRecord, secs_to_ms};
use tracex_core::query::{ParsedQueries, TracesMeta, TracesRequest, TracesResponse};
use tracex_core::time::{chunks_backward, epoch_secs};
use tracing::debug;

use crate::Store;

const SPAN_COLUMNS: &str = "trace_id, span_id, parent_span, project, sdk_name, span_op, \
     description, transaction_name, is_segment, precise_start_ts, precise_finish_ts";

/// Server side knobs that shape how a [`TracesRequest`] is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub default_window: Duration,
    pub discovery_chunk: Duration,
    pub max_trace_ids_per_query: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for QueryOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            default_window: cfg.default_window,
            discovery_chunk: cfg.discovery_chunk,
            max_trace_ids_per_query: cfg.max_trace_ids_per_query,
        }
    }
}

impl Store {
    pub fn query_traces(&self, req: &TracesRequest, opts: &QueryOptions) -> Result<TracesResponse> {
        self.query_traces_at(req, opts, Utc::now())
    }

    /// Like [`Store::query_traces`], with open window ends resolved against `now`.
    pub fn query_traces_at(
        &self,
        req: &TracesRequest,
        opts: &QueryOptions,
        now: DateTime<Utc>,
    ) -> Result<TracesResponse> {
        let parsed = req.validate()?;
        let (since, until) = req.window.resolve(now, opts.default_window)?;
        let batch_size = opts.max_trace_ids_per_query.max(1);

        let trace_ids = self.discover_traces(
            &parsed.user,
            since,
            until,
            req.limit,
            opts.discovery_chunk,
            batch_size,
        )?;
        let discovered = trace_ids.len();
        debug!(discovered, %since, %until, "discovered traces");

        let mut input = AssemblyInput {
            trace_ids: trace_ids.clone(),
            slices: req.breakdown_slices,
            ..AssemblyInput::default()
        };
        for batch in trace_ids.chunks(batch_size) {
            self.collect_batch(batch, &parsed, req.max_spans_per_trace, &mut input)?;
        }

        let assembled = assemble(input);
        Ok(TracesResponse {
            data: assembled.results,
            meta: TracesMeta {
                since: Some(since),
                until: Some(until),
                discovered,
                dropped: assembled.dropped,
                breakdown_diagnostics: assembled.breakdown_diagnostics,
                breakdown_failed: assembled.breakdown_failed,
            },
        })
    }

    /// Walks the window newest chunk first and returns up to `limit` trace ids,
    /// most recently active first.
    fn discover_traces(
        &self,
        queries: &[SpanQuery],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
        chunk: Duration,
        batch_size: usize,
    ) -> Result<Vec<String>> {
        let window = (epoch_secs(since), epoch_secs(until));
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        let chunks = chunks_backward(since, until, chunk)?;
        for (i, (start, end)) in chunks.into_iter().enumerate() {
            let candidates = self
                .traces_started_in(epoch_secs(start), epoch_secs(end), i == 0)?
                .into_iter()
                .filter(|trace| seen.insert(trace.clone()))
                .collect::<Vec<_>>();
            if candidates.is_empty() {
                continue;
            }

            if queries.is_empty() {
                found.extend(candidates);
            } else {
                for batch in candidates.chunks(batch_size) {
                    let spans = self.fetch_spans(batch, Some(window))?;
                    let grouped = group_by_trace(&spans);
                    for trace in batch {
                        if let Some(spans) = grouped.get(trace.as_str())
                            && trace_matches_all(queries, spans.iter().copied())
                        {
                            found.push(trace.clone());
                        }
                    }
                }
            }

            if found.len() >= limit {
                break;
            }
        }

        found.truncate(limit);
        Ok(found)
    }

    fn traces_started_in(&self, start: f64, end: f64, inclusive_end: bool) -> Result<Vec<String>> {
        let upper = if inclusive_end { "<=" } else { "<" };
        let sql = format!(
            "SELECT trace_id FROM spans
             WHERE precise_start_ts >= ? AND precise_start_ts {upper} ?
             GROUP BY trace_id
             ORDER BY MAX(precise_start_ts) DESC, trace_id ASC"
        );

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TracexError::Store(format!("prepare trace discovery failed: {e}")))?;
        let rows = stmt
            .query_map(params_from_iter([start, end]), |row| row.get::<_, String>(0))
            .map_err(|e| TracexError::Store(format!("trace discovery failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| TracexError::Store(format!("map trace id failed: {e}")))?);
        }
        Ok(out)
    }

    /// Every span of `trace_ids`, optionally limited to spans starting inside
    /// `window`, ordered by trace then start time.
    fn fetch_spans(
        &self,
        trace_ids: &[String],
        window: Option<(f64, f64)>,
    ) -> Result<Vec<SpanRecord>> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = trace_ids
            .iter()
            .map(|t| Value::Text(t.clone()))
            .collect::<Vec<_>>();
        let mut sql = format!(
            "SELECT {SPAN_COLUMNS} FROM spans WHERE trace_id IN ({})",
            placeholders(trace_ids.len())
        );
        if let Some((since, until)) = window {
            sql.push_str(" AND precise_start_ts >= ? AND precise_start_ts <= ?");
            args.push(Value::Double(since));
            args.push(Value::Double(until));
        }
        sql.push_str(" ORDER BY trace_id ASC, precise_start_ts ASC, span_id ASC");

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TracexError::Store(format!("prepare span fetch failed: {e}")))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(SpanRecord {
                    trace_id: row.get::<_, String>(0)?,
                    span_id: row.get::<_, String>(1)?,
                    parent_span: row.get::<_, Option<String>>(2)?,
                    project: row.get::<_, String>(3)?,
                    sdk_name: row.get::<_, Option<String>>(4)?,
                    span_op: row.get::<_, String>(5)?,
                    description: row.get::<_, String>(6)?,
                    transaction: row.get::<_, String>(7)?,
                    is_segment: row.get::<_, bool>(8)?,
                    precise_start_ts: row.get::<_, f64>(9)?,
                    precise_finish_ts: row.get::<_, f64>(10)?,
                })
            })
            .map_err(|e| TracexError::Store(format!("span fetch failed: {e}")))?;

        let mut spans = Vec::new();
        for row in rows {
            spans.push(row.map_err(|e| TracexError::Store(format!("map span failed: {e}")))?);
        }
        Ok(spans)
    }

    fn count_by_trace(
        &self,
        table: CountTable,
        trace_ids: &[String],
    ) -> Result<HashMap<String, usize>> {
        if trace_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT trace_id, COUNT(*) FROM {} WHERE trace_id IN ({}) GROUP BY trace_id",
            table.name(),
            placeholders(trace_ids.len())
        );

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| {
                TracexError::Store(format!("prepare {} count failed: {e}", table.name()))
            })?;
        let rows = stmt
            .query_map(params_from_iter(trace_ids.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| TracexError::Store(format!("{} count failed: {e}", table.name())))?;

        let mut out = HashMap::new();
        for row in rows {
            let (trace, count) = row.map_err(|e| {
                TracexError::Store(format!("map {} count failed: {e}", table.name()))
            })?;
            out.insert(trace, count as usize);
        }
        Ok(out)
    }

    /// Runs the per-trace fan-out for one batch and folds the results into `input`.
    fn collect_batch(
        &self,
        batch: &[String],
        parsed: &ParsedQueries,
        max_spans_per_trace: usize,
        input: &mut AssemblyInput,
    ) -> Result<()> {
        let spans = self.fetch_spans(batch, None)?;
        input
            .error_counts
            .extend(self.count_by_trace(CountTable::Errors, batch)?);
        input
            .occurrence_counts
            .extend(self.count_by_trace(CountTable::Occurrences, batch)?);

        let grouped = group_by_trace(&spans);
        for trace in batch {
            let Some(spans) = grouped.get(trace.as_str()) else {
                continue;
            };

            let matching = spans
                .iter()
                .copied()
                .filter(|s| parsed.user.is_empty() || matches_any(&parsed.user, s))
                .collect::<Vec<_>>();

            input.meta.insert(trace.clone(), trace_meta(spans, matching.len()));
            input.breakdown_spans.extend(
                spans
                    .iter()
                    .filter(|s| s.is_segment || matches_any(&parsed.user, s))
                    .map(|s| BreakdownSpan::from(*s)),
            );
            input.sampled_spans.insert(
                trace.clone(),
                matching
                    .iter()
                    .take(max_spans_per_trace)
                    .map(|s| SampledSpan::from(*s))
                    .collect(),
            );
            if let Some(suggested) = &parsed.suggested {
                input.suggested_spans.insert(
                    trace.clone(),
                    spans
                        .iter()
                        .filter(|s| suggested.matches(s))
                        .take(max_spans_per_trace)
                        .map(|s| SampledSpan::from(*s))
                        .collect(),
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum CountTable {
    Errors,
    Occurrences,
}

impl CountTable {
    fn name(self) -> &'static str {
        match self {
            Self::Errors => "errors",
            Self::Occurrences => "occurrences",
        }
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn group_by_trace(spans: &[SpanRecord]) -> HashMap<&str, Vec<&SpanRecord>> {
    let mut out: HashMap<&str, Vec<&SpanRecord>> = HashMap::new();
    for span in spans {
        out.entry(span.trace_id.as_str()).or_default().push(span);
    }
    out
}

/// A span matches when any user query accepts it. Never true without queries.
fn matches_any(queries: &[SpanQuery], span: &SpanRecord) -> bool {
    queries.iter().any(|q| q.matches(span))
}

fn trace_meta(spans: &[&SpanRecord], matching_spans: usize) -> TraceMeta {
    let first_seen = spans
        .iter()
        .map(|s| secs_to_ms(s.precise_start_ts))
        .min()
        .unwrap_or_default();
    let last_seen = spans
        .iter()
        .map(|s| secs_to_ms(s.precise_finish_ts))
        .max()
        .unwrap_or_default();
    TraceMeta {
        first_seen,
        last_seen,
        num_spans: spans.len(),
        matching_spans,
    }
}
