//! Trace breakdowns: the per-trace service timeline drawn under each trace in
//! the explorer.
//!
//! Span rows are clipped to their trace's bounds, quantized onto a fixed
//! number of slices and swept left to right, merging overlapping spans of the
//! same service into a minimal list of [`TraceInterval`]s.

mod merge;
mod slice;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use merge::process_breakdowns;
pub use slice::{QuantizedRange, clip, convert_to_slice, quantize_range};

pub const DEFAULT_SLICES: u32 = 40;
pub const MAX_SLICES: u32 = 100;

/// Overall bounds of a trace in milliseconds and the number of rendering
/// slices its timeline is divided into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceRange {
    pub start: i64,
    pub end: i64,
    pub slices: u32,
}

impl TraceRange {
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    #[default]
    Project,
    /// Gap between known intervals. Not produced yet.
    Missing,
    /// Tail of a trace not covered by any interval. Not produced yet.
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceInterval {
    pub kind: IntervalKind,
    pub project: Option<String>,
    pub sdk_name: Option<String>,
    pub start: i64,
    pub end: i64,
    pub slice_start: u32,
    pub slice_end: u32,
    pub slice_width: u32,
    pub duration: i64,
    pub is_root: bool,
    /// Disjoint raw `(start, end)` sub-ranges absorbed into this interval.
    /// Emptied on finalization.
    #[serde(skip)]
    components: Vec<(i64, i64)>,
}

impl TraceInterval {
    pub fn components(&self) -> &[(i64, i64)] {
        &self.components
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BreakdownError {
    #[error("no trace range for trace {0}")]
    MissingTraceRange(String),

    #[error("non-finite timestamp on span in trace {0}")]
    NonFiniteTimestamp(String),

    #[error("span in trace {trace} finishes before it starts ({start} > {finish})")]
    InvertedSpan {
        trace: String,
        start: i64,
        finish: i64,
    },

    #[error("trace {0} has a slice count of zero")]
    ZeroSlices(String),

    #[error("interval in trace {trace} is out of bounds: {detail}")]
    IntervalOutOfBounds { trace: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceEdge {
    Start,
    End,
}

/// Non-fatal findings collected while building breakdowns.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The row could not be quantized and was left out.
    RowSkipped {
        trace: String,
        error: BreakdownError,
    },
    /// A slice index fell outside `[0, slices]` and was clipped.
    SliceClipped {
        trace: String,
        edge: SliceEdge,
        raw: i64,
        clipped: u32,
    },
}

impl Diagnostic {
    pub fn trace(&self) -> &str {
        match self {
            Self::RowSkipped { trace, .. } | Self::SliceClipped { trace, .. } => trace,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Breakdowns {
    pub by_trace: HashMap<String, Vec<TraceInterval>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Breakdowns {
    pub fn get(&self, trace: &str) -> &[TraceInterval] {
        self.by_trace.get(trace).map(Vec::as_slice).unwrap_or(&[])
    }
}
