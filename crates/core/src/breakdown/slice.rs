use super::TraceRange;

pub fn clip(value: i64, lower: i64, upper: i64) -> i64 {
    value.max(lower).min(upper)
}

/// Maps a timestamp onto a slice index of `range`.
///
/// With a `left_bound`, an index that would land on or before it is bumped to
/// `left_bound + 1` while still below `range.slices`, so an end index stays
/// strictly after its start index.
///
/// `range` must have a non-zero duration; [`quantize_range`] handles the
/// degenerate case itself.
pub fn convert_to_slice(timestamp: i64, range: &TraceRange, left_bound: Option<u32>) -> i64 {
    debug_assert!(range.duration() != 0, "convert_to_slice on empty trace range");

    let slices = i64::from(range.slices);
    let offset = (timestamp - range.start) as f64;
    let mut idx = (offset * slices as f64 / range.duration() as f64).round_ties_even() as i64;

    if let Some(bound) = left_bound.map(i64::from)
        && idx <= bound
        && idx < slices
    {
        idx = bound + 1;
    }

    idx
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedRange {
    /// Span start rounded to a bin boundary, in ms.
    pub start: i64,
    /// Span end rounded to a bin boundary, in ms.
    pub end: i64,
    pub start_index: u32,
    pub end_index: u32,
    /// Slice indices before clipping to `[0, slices]`.
    pub raw_start_index: i64,
    pub raw_end_index: i64,
}

impl QuantizedRange {
    pub fn start_clipped(&self) -> bool {
        self.raw_start_index != i64::from(self.start_index)
    }

    pub fn end_clipped(&self) -> bool {
        self.raw_end_index != i64::from(self.end_index)
    }
}

/// Quantizes an already clipped span onto the slices of `range`.
///
/// Slice indices drive merge decisions; the rounded `start`/`end` are what
/// gets rendered.
pub fn quantize_range(span_start: i64, span_end: i64, range: &TraceRange) -> QuantizedRange {
    let slices = i64::from(range.slices);

    let (raw_start_index, raw_end_index) = if range.duration() == 0 {
        // a zero length trace spans every slice
        (0, slices)
    } else {
        let raw_start = convert_to_slice(span_start, range, None);
        let start_index = clip(raw_start, 0, slices) as u32;
        let raw_end = convert_to_slice(span_end, range, Some(start_index));
        (raw_start, raw_end)
    };
    let start_index = clip(raw_start_index, 0, slices) as u32;
    let end_index = clip(raw_end_index, 0, slices) as u32;

    let mut rounded_start = span_start;
    let mut rounded_end = span_end;
    if slices > 0 {
        let bin_size = range.duration() / slices;
        if bin_size > 0 {
            rounded_start = round_to_bin(span_start, range.start, bin_size);
            rounded_end = round_to_bin(span_end, range.start, bin_size);

            if rounded_start == rounded_end {
                rounded_end += bin_size;
            }
        }
    }

    // only spans touching the trace edges are snapped, so the timeline has no
    // gap at either end
    if span_start <= range.start {
        rounded_start = range.start;
    }
    if span_end >= range.end {
        rounded_end = range.end;
    }

    QuantizedRange {
        start: clip(rounded_start, range.start, range.end),
        end: clip(rounded_end, range.start, range.end),
        start_index,
        end_index,
        raw_start_index,
        raw_end_index,
    }
}

fn round_to_bin(ts: i64, origin: i64, bin_size: i64) -> i64 {
    let bins = ((ts - origin) as f64 / bin_size as f64).round_ties_even() as i64;
    bins * bin_size + origin
}
