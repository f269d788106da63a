//! Joins the independently fetched per-trace result sets into one
//! [`TraceResult`] per trace.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use crate::breakdown::{Breakdowns, Diagnostic, TraceRange, process_breakdowns};
use crate::model::span::{BreakdownSpan, SampledSpan};
use crate::query::TraceResult;

/// Span ops that can stand in for a missing root when naming a trace.
pub const CANDIDATE_ROOT_OPS: [&str; 2] = ["pageload", "navigation"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceMeta {
    /// First and last seen timestamps in ms.
    pub first_seen: i64,
    pub last_seen: i64,
    pub num_spans: usize,
    pub matching_spans: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyInput {
    /// Traces in the order they should be returned.
    pub trace_ids: Vec<String>,
    pub meta: HashMap<String, TraceMeta>,
    pub error_counts: HashMap<String, usize>,
    pub occurrence_counts: HashMap<String, usize>,
    pub breakdown_spans: Vec<BreakdownSpan>,
    pub sampled_spans: HashMap<String, Vec<SampledSpan>>,
    pub suggested_spans: HashMap<String, Vec<SampledSpan>>,
    pub slices: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Assembled {
    pub results: Vec<TraceResult>,
    pub dropped: usize,
    pub breakdown_diagnostics: usize,
    pub breakdown_failed: bool,
}

pub fn assemble(mut input: AssemblyInput) -> Assembled {
    let ranges = input
        .meta
        .iter()
        .map(|(trace, meta)| {
            (
                trace.clone(),
                TraceRange {
                    start: meta.first_seen,
                    end: meta.last_seen,
                    slices: input.slices,
                },
            )
        })
        .collect::<HashMap<_, _>>();

    let (breakdowns, breakdown_failed) = match process_breakdowns(&input.breakdown_spans, &ranges)
    {
        Ok(b) => (b, false),
        Err(err) => {
            error!(error = %err, traces = ?input.trace_ids, "failed to build trace breakdowns");
            (Breakdowns::default(), true)
        }
    };
    report_diagnostics(&breakdowns.diagnostics);

    let mut spans_by_trace: HashMap<&str, Vec<&BreakdownSpan>> = HashMap::new();
    for span in &input.breakdown_spans {
        spans_by_trace.entry(span.trace.as_str()).or_default().push(span);
    }

    let mut out = Assembled {
        breakdown_diagnostics: breakdowns.diagnostics.len(),
        breakdown_failed,
        ..Assembled::default()
    };

    for trace in &input.trace_ids {
        let Some(meta) = input.meta.get(trace) else {
            warn!(trace = %trace, "trace has no metadata, dropping");
            out.dropped += 1;
            continue;
        };

        let spans = input.sampled_spans.remove(trace).unwrap_or_default();
        if spans.is_empty() {
            warn!(trace = %trace, "trace has no sampled spans, dropping");
            out.dropped += 1;
            continue;
        }

        let root = spans_by_trace
            .get(trace.as_str())
            .and_then(|candidates| resolve_root(candidates));

        out.results.push(TraceResult {
            trace: trace.clone(),
            num_errors: input.error_counts.get(trace).copied().unwrap_or(0),
            num_occurrences: input.occurrence_counts.get(trace).copied().unwrap_or(0),
            num_spans: meta.num_spans,
            matching_spans: meta.matching_spans,
            project: root.map(|s| s.project.clone()),
            name: root.map(|s| s.transaction.clone()),
            duration: meta.last_seen - meta.first_seen,
            start: meta.first_seen,
            end: meta.last_seen,
            breakdowns: breakdowns.get(trace).to_vec(),
            spans,
            suggested_spans: input.suggested_spans.remove(trace).unwrap_or_default(),
        });
    }

    out
}

/// Picks the span a trace is named after: the first true root, else the first
/// span with a root-like op.
pub fn resolve_root<'a>(spans: &[&'a BreakdownSpan]) -> Option<&'a BreakdownSpan> {
    spans
        .iter()
        .find(|s| s.is_root())
        .or_else(|| {
            spans
                .iter()
                .find(|s| CANDIDATE_ROOT_OPS.contains(&s.span_op.as_str()))
        })
        .copied()
}

fn report_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::RowSkipped { trace, error } => {
                warn!(trace = %trace, error = %error, "skipped span while building breakdown");
            }
            Diagnostic::SliceClipped {
                trace,
                edge,
                raw,
                clipped,
            } => {
                debug!(trace = %trace, ?edge, raw, clipped, "slice index was adjusted");
            }
        }
    }
}
