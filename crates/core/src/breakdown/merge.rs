use std::cmp::Reverse;
use std::collections::HashMap;

use super::slice::{QuantizedRange, clip, quantize_range};
use super::{
    BreakdownError, Breakdowns, Diagnostic, IntervalKind, SliceEdge, TraceInterval, TraceRange,
};
use crate::model::span::{BreakdownSpan, secs_to_ms};

/// Builds the breakdown of every trace that has rows in `rows`.
///
/// Rows that cannot be quantized are skipped and reported through
/// [`Breakdowns::diagnostics`]. An `Err` means the batch as a whole is
/// unusable and the caller should fall back to empty breakdowns.
pub fn process_breakdowns(
    rows: &[BreakdownSpan],
    ranges: &HashMap<String, TraceRange>,
) -> Result<Breakdowns, BreakdownError> {
    if let Some((trace, _)) = ranges.iter().find(|(_, r)| r.slices == 0) {
        return Err(BreakdownError::ZeroSlices(trace.clone()));
    }

    let mut diagnostics = Vec::new();
    let mut quantized = Vec::with_capacity(rows.len());
    for row in rows {
        match quantize_row(row, ranges) {
            Ok(q) => {
                if q.range.start_clipped() {
                    diagnostics.push(Diagnostic::SliceClipped {
                        trace: row.trace.clone(),
                        edge: SliceEdge::Start,
                        raw: q.range.raw_start_index,
                        clipped: q.range.start_index,
                    });
                }
                if q.range.end_clipped() {
                    diagnostics.push(Diagnostic::SliceClipped {
                        trace: row.trace.clone(),
                        edge: SliceEdge::End,
                        raw: q.range.raw_end_index,
                        clipped: q.range.end_index,
                    });
                }
                quantized.push(q);
            }
            Err(error) => diagnostics.push(Diagnostic::RowSkipped {
                trace: row.trace.clone(),
                error,
            }),
        }
    }

    // the sweep needs non-decreasing starts, with wider spans first on ties
    quantized.sort_by_key(|q| {
        (
            q.range.start_index,
            q.precise_start,
            Reverse(q.range.end_index),
            Reverse(q.precise_finish),
        )
    });

    let mut merger = Merger::default();
    for q in quantized {
        merger.push(q);
    }

    let by_trace = merger.finalize(ranges)?;
    Ok(Breakdowns {
        by_trace,
        diagnostics,
    })
}

struct QuantizedSpan<'a> {
    row: &'a BreakdownSpan,
    precise_start: i64,
    precise_finish: i64,
    range: QuantizedRange,
}

/// Rows finishing before they start are rejected rather than quantized, so every
/// interval keeps `start <= end`.
fn quantize_row<'a>(
    row: &'a BreakdownSpan,
    ranges: &HashMap<String, TraceRange>,
) -> Result<QuantizedSpan<'a>, BreakdownError> {
    let range = ranges
        .get(&row.trace)
        .ok_or_else(|| BreakdownError::MissingTraceRange(row.trace.clone()))?;

    if !row.precise_start_ts.is_finite() || !row.precise_finish_ts.is_finite() {
        return Err(BreakdownError::NonFiniteTimestamp(row.trace.clone()));
    }

    let start = secs_to_ms(row.precise_start_ts);
    let finish = secs_to_ms(row.precise_finish_ts);
    if finish < start {
        return Err(BreakdownError::InvertedSpan {
            trace: row.trace.clone(),
            start,
            finish,
        });
    }

    let precise_start = clip(start, range.start, range.end);
    let precise_finish = clip(finish, range.start, range.end);

    Ok(QuantizedSpan {
        row,
        precise_start,
        precise_finish,
        range: quantize_range(precise_start, precise_finish, range),
    })
}

/// Working state of one trace. Both lists index into [`Merger::arena`], so an
/// interval extended through the stack is extended in the breakdown too.
#[derive(Default)]
struct TraceMergeState {
    breakdown: Vec<usize>,
    stack: Vec<usize>,
}

#[derive(Default)]
struct Merger {
    arena: Vec<TraceInterval>,
    states: HashMap<String, TraceMergeState>,
}

impl Merger {
    fn push(&mut self, q: QuantizedSpan<'_>) {
        if q.range.start_index == q.range.end_index {
            // too narrow to render a single slice
            return;
        }

        let cur = TraceInterval {
            kind: IntervalKind::Project,
            project: Some(q.row.project.clone()),
            sdk_name: q.row.sdk_name.clone(),
            start: q.range.start,
            end: q.range.end,
            slice_start: q.range.start_index,
            slice_end: q.range.end_index,
            slice_width: q.range.end_index - q.range.start_index,
            duration: 0,
            is_root: q.row.is_root(),
            components: vec![(q.precise_start, q.precise_finish)],
        };

        let state = self.states.entry(q.row.trace.clone()).or_default();
        stack_clear(state, &self.arena, cur.start);

        let target = state
            .stack
            .iter()
            .rev()
            .copied()
            .find(|&idx| should_merge(&self.arena[idx], &cur));

        match target {
            Some(idx) => self.arena[idx].absorb(cur),
            None => {
                let idx = self.arena.len();
                self.arena.push(cur);
                // breakdown first, then stack: gap filling would need to look
                // at the stack without the new interval on it
                state.breakdown.push(idx);
                state.stack.push(idx);
            }
        }
    }

    fn finalize(
        self,
        ranges: &HashMap<String, TraceRange>,
    ) -> Result<HashMap<String, Vec<TraceInterval>>, BreakdownError> {
        let mut arena = self.arena.into_iter().map(Some).collect::<Vec<_>>();
        let mut out = HashMap::with_capacity(self.states.len());

        for (trace, state) in self.states {
            let range = ranges
                .get(&trace)
                .ok_or_else(|| BreakdownError::MissingTraceRange(trace.clone()))?;

            let mut intervals = Vec::with_capacity(state.breakdown.len());
            for idx in state.breakdown {
                let Some(mut interval) = arena[idx].take() else {
                    continue;
                };
                check_bounds(&trace, &interval, range)?;
                interval.finalize();
                intervals.push(interval);
            }
            out.insert(trace, intervals);
        }

        Ok(out)
    }
}

/// Drops stack entries that ended before `until`, stopping at the first one
/// still open.
fn stack_clear(state: &mut TraceMergeState, arena: &[TraceInterval], until: i64) {
    while let Some(&top) = state.stack.last() {
        if arena[top].end >= until {
            break;
        }
        state.stack.pop();
    }
}

fn should_merge(existing: &TraceInterval, cur: &TraceInterval) -> bool {
    // roots mark transaction boundaries and always stay separate
    !existing.is_root
        && !cur.is_root
        && existing.end >= cur.start
        && existing.project == cur.project
        && existing.sdk_name == cur.sdk_name
}

fn check_bounds(
    trace: &str,
    interval: &TraceInterval,
    range: &TraceRange,
) -> Result<(), BreakdownError> {
    let detail = if interval.slice_start > interval.slice_end || interval.slice_end > range.slices
    {
        Some(format!(
            "slices {}..{} outside 0..{}",
            interval.slice_start, interval.slice_end, range.slices
        ))
    } else if interval.start > interval.end
        || interval.start < range.start
        || interval.end > range.end
    {
        Some(format!(
            "span {}..{} outside trace {}..{}",
            interval.start, interval.end, range.start, range.end
        ))
    } else {
        None
    };

    match detail {
        Some(detail) => Err(BreakdownError::IntervalOutOfBounds {
            trace: trace.to_string(),
            detail,
        }),
        None => Ok(()),
    }
}

impl TraceInterval {
    fn absorb(&mut self, other: TraceInterval) {
        self.end = self.end.max(other.end);
        self.slice_end = self.slice_end.max(other.slice_end);

        // a fresh interval always carries exactly one component
        let Some(&(start, end)) = other.components.first() else {
            return;
        };
        match self.components.last_mut() {
            Some(last) if last.1 >= start => last.1 = last.1.max(end),
            _ => self.components.push((start, end)),
        }
    }

    fn finalize(&mut self) {
        let component_duration: i64 = self.components.drain(..).map(|(s, e)| e - s).sum();
        self.duration = if component_duration > 0 {
            component_duration
        } else {
            self.end - self.start
        };
        self.slice_width = self.slice_end - self.slice_start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

    fn span(
        project: &str,
        sdk: &str,
        parent: Option<&str>,
        start_ms: i64,
        end_ms: i64,
    ) -> BreakdownSpan {
        BreakdownSpan {
            trace: TRACE.to_string(),
            project: project.to_string(),
            sdk_name: Some(sdk.to_string()),
            span_op: "db".to_string(),
            parent_span: parent.map(str::to_string),
            transaction: "GET /".to_string(),
            precise_start_ts: start_ms as f64 / 1000.0,
            precise_finish_ts: end_ms as f64 / 1000.0,
        }
    }

    fn ranges(start: i64, end: i64, slices: u32) -> HashMap<String, TraceRange> {
        HashMap::from([(TRACE.to_string(), TraceRange { start, end, slices })])
    }

    const PARENT: Option<&str> = Some("00f067aa0ba902b7");

    #[test]
    fn overlapping_same_service_spans_merge() {
        let rows = vec![
            span("api", "python", PARENT, 0, 100),
            span("api", "python", PARENT, 50, 150),
        ];
        let out = process_breakdowns(&rows, &ranges(0, 200, 200)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!(breakdown.len(), 1);
        assert_eq!((breakdown[0].start, breakdown[0].end), (0, 150));
        assert_eq!(breakdown[0].duration, 150);
        assert_eq!(breakdown[0].slice_width, 150);
        assert!(breakdown[0].components().is_empty());
    }

    #[test]
    fn disjoint_components_sum_without_the_gap() {
        // both round onto the 100ms bin boundary, so they merge even though
        // the precise ranges leave a 20ms gap
        let rows = vec![
            span("api", "python", PARENT, 0, 120),
            span("api", "python", PARENT, 140, 300),
        ];
        let out = process_breakdowns(&rows, &ranges(0, 1000, 10)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!(breakdown.len(), 1);
        assert_eq!((breakdown[0].start, breakdown[0].end), (0, 300));
        assert_eq!(breakdown[0].duration, 280);
    }

    #[test]
    fn different_sdks_never_merge() {
        let rows = vec![
            span("api", "python", PARENT, 0, 100),
            span("api", "javascript", PARENT, 50, 150),
        ];
        let out = process_breakdowns(&rows, &ranges(0, 200, 200)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].sdk_name.as_deref(), Some("python"));
        assert_eq!(breakdown[1].sdk_name.as_deref(), Some("javascript"));
    }

    #[test]
    fn different_projects_never_merge() {
        let rows = vec![
            span("api", "python", PARENT, 0, 100),
            span("worker", "python", PARENT, 50, 150),
        ];
        let out = process_breakdowns(&rows, &ranges(0, 200, 200)).unwrap();
        assert_eq!(out.get(TRACE).len(), 2);
    }

    #[test]
    fn root_spans_never_merge() {
        let rows = vec![
            span("api", "python", None, 0, 200),
            span("api", "python", PARENT, 0, 200),
        ];
        let out = process_breakdowns(&rows, &ranges(0, 200, 40)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown.iter().filter(|i| i.is_root).count(), 1);
    }

    #[test]
    fn narrow_spans_are_dropped() {
        let rows = vec![span("api", "python", PARENT, 1000, 1000)];
        let out = process_breakdowns(&rows, &ranges(0, 1000, 10)).unwrap();
        assert!(out.get(TRACE).is_empty());
    }

    #[test]
    fn zero_duration_trace_fills_every_slice() {
        let rows = vec![span("api", "python", None, 500, 500)];
        let out = process_breakdowns(&rows, &ranges(500, 500, 40)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!(breakdown.len(), 1);
        assert_eq!((breakdown[0].slice_start, breakdown[0].slice_end), (0, 40));
        assert_eq!(breakdown[0].duration, 0);
    }

    #[test]
    fn root_and_child_breakdown() {
        let rows = vec![
            span("A", "x", PARENT, 100, 200),
            span("A", "x", None, 0, 1000),
        ];
        let out = process_breakdowns(&rows, &ranges(0, 1000, 10)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!(breakdown.len(), 2);

        let root = &breakdown[0];
        assert!(root.is_root);
        assert_eq!((root.slice_start, root.slice_end), (0, 10));
        assert_eq!((root.start, root.end), (0, 1000));
        assert_eq!(root.kind, IntervalKind::Project);

        let child = &breakdown[1];
        assert!(!child.is_root);
        assert_eq!((child.slice_start, child.slice_end), (1, 2));
        assert_eq!(child.slice_width, 1);
        assert_eq!(child.duration, 100);
    }

    #[test]
    fn closed_intervals_are_not_merge_targets() {
        // each gap evicts the previous interval from the stack
        let rows = vec![
            span("api", "python", PARENT, 0, 100),
            span("db", "python", PARENT, 300, 400),
            span("api", "python", PARENT, 500, 600),
        ];
        let out = process_breakdowns(&rows, &ranges(0, 1000, 100)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!(breakdown.len(), 3);
        assert_eq!(breakdown[2].start, 500);
    }

    #[test]
    fn spans_are_clipped_to_trace_bounds() {
        let rows = vec![span("api", "python", PARENT, -500, 1500)];
        let out = process_breakdowns(&rows, &ranges(0, 1000, 10)).unwrap();
        let breakdown = out.get(TRACE);
        assert_eq!((breakdown[0].start, breakdown[0].end), (0, 1000));
        assert_eq!(breakdown[0].duration, 1000);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn bad_rows_are_skipped_and_reported() {
        let mut nan = span("api", "python", PARENT, 0, 100);
        nan.precise_finish_ts = f64::NAN;
        let mut orphan = span("api", "python", PARENT, 0, 100);
        orphan.trace = "ffffffffffffffffffffffffffffffff".to_string();
        let inverted = span("api", "python", PARENT, 300, 200);
        let good = span("api", "python", PARENT, 0, 500);

        let out =
            process_breakdowns(&[nan, orphan, inverted, good], &ranges(0, 1000, 10)).unwrap();
        assert_eq!(out.get(TRACE).len(), 1);
        assert_eq!(out.diagnostics.len(), 3);
        assert!(matches!(
            &out.diagnostics[1],
            Diagnostic::RowSkipped {
                error: BreakdownError::MissingTraceRange(_),
                ..
            }
        ));
        assert_eq!(out.diagnostics[2].trace(), TRACE);
    }

    #[test]
    fn zero_slices_fail_the_batch() {
        let rows = vec![span("api", "python", PARENT, 0, 100)];
        let err = process_breakdowns(&rows, &ranges(0, 1000, 0)).unwrap_err();
        assert_eq!(err, BreakdownError::ZeroSlices(TRACE.to_string()));
    }

    #[test]
    fn traces_are_merged_independently() {
        let other = "00000000000000000000000000000001";
        let mut rows = vec![span("api", "python", PARENT, 0, 100)];
        let mut foreign = span("api", "python", PARENT, 50, 150);
        foreign.trace = other.to_string();
        rows.push(foreign);

        let mut all = ranges(0, 200, 200);
        all.insert(
            other.to_string(),
            TraceRange {
                start: 0,
                end: 200,
                slices: 200,
            },
        );
        let out = process_breakdowns(&rows, &all).unwrap();
        assert_eq!(out.get(TRACE).len(), 1);
        assert_eq!(out.get(other).len(), 1);
        assert_eq!(out.get(other)[0].start, 50);
    }

    #[test]
    fn finalized_intervals_serialize_without_components() {
        let rows = vec![span("api", "python", None, 0, 1000)];
        let out = process_breakdowns(&rows, &ranges(0, 1000, 10)).unwrap();
        let value = serde_json::to_value(&out.get(TRACE)[0]).unwrap();
        assert_eq!(value["kind"], "project");
        assert_eq!(value["sdkName"], "python");
        assert_eq!(value["sliceEnd"], 10);
        assert_eq!(value["isRoot"], true);
        assert!(value.get("components").is_none());
    }
}
