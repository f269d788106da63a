use chrono::SecondsFormat;
use owo_colors::OwoColorize;
use tracex_core::breakdown::TraceInterval;
use tracex_core::model::span::SampledSpan;
use tracex_core::query::{StatusResponse, TraceResult, TracesResponse};

const PALETTE_SIZE: usize = 6;

pub fn print_traces_human(v: &TracesResponse) {
    for trace in &v.data {
        print_trace_human(trace);
    }
    println!(
        "-- {} traces ({} discovered, {} dropped) --",
        v.data.len(),
        v.meta.discovered,
        v.meta.dropped
    );
    if v.meta.breakdown_failed {
        eprintln!("warning: breakdowns could not be computed for this page");
    } else if v.meta.breakdown_diagnostics > 0 {
        eprintln!(
            "note: {} span(s) were adjusted or skipped while building breakdowns",
            v.meta.breakdown_diagnostics
        );
    }
}

fn print_trace_human(t: &TraceResult) {
    println!(
        "trace={} name=\"{}\" project={} duration={}ms spans={}/{} errors={} occurrences={}",
        t.trace,
        t.name.as_deref().unwrap_or("-"),
        t.project.as_deref().unwrap_or("-"),
        t.duration,
        t.matching_spans,
        t.num_spans,
        t.num_errors,
        t.num_occurrences
    );

    if !t.breakdowns.is_empty() {
        let legend = legend(&t.breakdowns);
        println!("  |{}|", render_bar(&t.breakdowns, &legend));
        let labels = legend
            .iter()
            .enumerate()
            .map(|(i, key)| colorize(key, i))
            .collect::<Vec<_>>()
            .join(" ");
        println!("  {labels}");
    }

    for span in &t.spans {
        print_span_line("span", span);
    }
    for span in &t.suggested_spans {
        print_span_line("suggested", span);
    }
}

fn print_span_line(label: &str, span: &SampledSpan) {
    println!(
        "  {label}={} op={} project={} duration={}ms | {}",
        span.id, span.span_op, span.project, span.duration, span.description
    );
}

/// Distinct `project (sdk)` keys in the order they first appear.
fn legend(intervals: &[TraceInterval]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for interval in intervals {
        let key = interval_key(interval);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn interval_key(interval: &TraceInterval) -> String {
    let project = interval.project.as_deref().unwrap_or("?");
    match &interval.sdk_name {
        Some(sdk) => format!("{project} ({sdk})"),
        None => project.to_string(),
    }
}

/// Assigns each slice the legend index of the last interval covering it.
fn bar_cells(intervals: &[TraceInterval], legend: &[String]) -> Vec<Option<usize>> {
    let width = intervals.iter().map(|i| i.slice_end).max().unwrap_or(0) as usize;
    let mut cells = vec![None; width];
    for interval in intervals {
        let key = interval_key(interval);
        let color = legend.iter().position(|k| *k == key);
        for cell in cells
            .iter_mut()
            .take(interval.slice_end as usize)
            .skip(interval.slice_start as usize)
        {
            *cell = color;
        }
    }
    cells
}

fn render_bar(intervals: &[TraceInterval], legend: &[String]) -> String {
    bar_cells(intervals, legend)
        .into_iter()
        .map(|cell| match cell {
            Some(i) => colorize("█", i),
            None => " ".to_string(),
        })
        .collect()
}

fn colorize(text: &str, index: usize) -> String {
    match index % PALETTE_SIZE {
        0 => text.cyan().to_string(),
        1 => text.green().to_string(),
        2 => text.yellow().to_string(),
        3 => text.magenta().to_string(),
        4 => text.blue().to_string(),
        _ => text.red().to_string(),
    }
}

pub fn print_status_human(v: &StatusResponse) {
    println!("db_path={}", v.db_path);
    println!("db_size_bytes={}", v.db_size_bytes);
    println!(
        "spans={} traces={} errors={} occurrences={}",
        v.spans_count, v.traces_count, v.errors_count, v.occurrences_count
    );
    if let Some(oldest) = v.oldest_ts {
        println!(
            "oldest={}",
            oldest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
    if let Some(newest) = v.newest_ts {
        println!(
            "newest={}",
            newest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
}

#[cfg(test)]
mod tests {
    use tracex_core::breakdown::IntervalKind;

    use super::*;

    fn interval(project: &str, slice_start: u32, slice_end: u32) -> TraceInterval {
        serde_json::from_value(serde_json::json!({
            "kind": "project",
            "project": project,
            "sdkName": null,
            "start": 0,
            "end": 0,
            "sliceStart": slice_start,
            "sliceEnd": slice_end,
            "sliceWidth": slice_end - slice_start,
            "duration": 0,
            "isRoot": false,
        }))
        .unwrap()
    }

    #[test]
    fn later_intervals_paint_over_earlier_ones() {
        let intervals = vec![interval("web", 0, 10), interval("api", 2, 5)];
        assert_eq!(intervals[0].kind, IntervalKind::Project);

        let legend = legend(&intervals);
        assert_eq!(legend, vec!["web".to_string(), "api".to_string()]);

        let cells = bar_cells(&intervals, &legend);
        assert_eq!(cells.len(), 10);
        assert_eq!(cells[0], Some(0));
        assert_eq!(cells[2], Some(1));
        assert_eq!(cells[4], Some(1));
        assert_eq!(cells[5], Some(0));
    }

    #[test]
    fn gaps_stay_empty() {
        let intervals = vec![interval("web", 0, 2), interval("web", 6, 8)];
        let legend = legend(&intervals);
        assert_eq!(legend.len(), 1);
        let cells = bar_cells(&intervals, &legend);
        assert_eq!(cells[3], None);
        assert_eq!(cells[7], Some(0));
    }
}
