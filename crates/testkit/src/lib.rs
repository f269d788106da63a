use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tracex_core::model::event::{ErrorEvent, Occurrence};
use tracex_core::model::span::SpanRecord;
use tracex_core::time::epoch_secs;

pub const CHECKOUT_TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
pub const HOME_TRACE: &str = "5bf92f3577b34da6a3ce929d0e0e4736";
pub const WORKER_TRACE: &str = "6bf92f3577b34da6a3ce929d0e0e4736";

#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub spans: Vec<SpanRecord>,
    pub errors: Vec<ErrorEvent>,
    pub occurrences: Vec<Occurrence>,
}

/// Start of the fixture timeline. Every fixture offset is a multiple of
/// 125ms so seconds convert to milliseconds exactly.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

fn at(offset_ms: i64) -> f64 {
    epoch_secs(base_time()) + offset_ms as f64 / 1000.0
}

#[allow(clippy::too_many_arguments)]
fn span(
    trace_id: &str,
    span_id: &str,
    parent_span: Option<&str>,
    project: &str,
    sdk_name: &str,
    span_op: &str,
    description: &str,
    transaction: &str,
    is_segment: bool,
    start_ms: i64,
    end_ms: i64,
) -> SpanRecord {
    SpanRecord {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        parent_span: parent_span.map(str::to_string),
        project: project.to_string(),
        sdk_name: Some(sdk_name.to_string()),
        span_op: span_op.to_string(),
        description: description.to_string(),
        transaction: transaction.to_string(),
        is_segment,
        precise_start_ts: at(start_ms),
        precise_finish_ts: at(end_ms),
    }
}

/// Three traces spread over two hours:
///
/// * checkout at +0s: a browser pageload calling into the api, which hits the db
/// * home at +10m: a pageload with a long task
/// * worker at +2h: a queue task without a browser root
pub fn sample_traces() -> Fixture {
    const JS: &str = "sentry.javascript.react";
    const PY: &str = "sentry.python";

    #[rustfmt::skip]
    let spans = vec![
        span(
            CHECKOUT_TRACE, "a000000000000001", None, "web", JS,
            "pageload", "/checkout", "/checkout", true, 0, 2000,
        ),
        span(
            CHECKOUT_TRACE, "a000000000000002", Some("a000000000000001"), "web", JS,
            "http.client", "GET /api/orders", "/checkout", false, 375, 1625,
        ),
        span(
            CHECKOUT_TRACE, "a000000000000003", Some("a000000000000002"), "api", PY,
            "http.server", "GET /api/orders", "GET /api/orders", true, 500, 1500,
        ),
        span(
            CHECKOUT_TRACE, "a000000000000004", Some("a000000000000003"), "api", PY,
            "db.sql", "SELECT * FROM orders", "GET /api/orders", false, 750, 1250,
        ),
        span(
            HOME_TRACE, "b000000000000001", None, "web", JS,
            "pageload", "/home", "/home", true, 600_000, 601_000,
        ),
        span(
            HOME_TRACE, "b000000000000002", Some("b000000000000001"), "web", JS,
            "ui.long-task", "Main UI thread blocked", "/home", false, 600_250, 600_500,
        ),
        span(
            WORKER_TRACE, "c000000000000001", Some("0000000000000000"), "worker", PY,
            "queue.task", "process_order", "process_order", true, 7_200_000, 7_202_000,
        ),
        span(
            WORKER_TRACE, "c000000000000002", Some("c000000000000001"), "worker", PY,
            "db.sql", "UPDATE orders SET state = 'paid'", "process_order", false,
            7_200_500, 7_201_000,
        ),
    ];

    let errors = vec![
        ErrorEvent {
            trace_id: CHECKOUT_TRACE.to_string(),
            event_id: "e1".to_string(),
            project: "api".to_string(),
            ts: at(1250),
        },
        ErrorEvent {
            trace_id: CHECKOUT_TRACE.to_string(),
            event_id: "e2".to_string(),
            project: "web".to_string(),
            ts: at(1750),
        },
        ErrorEvent {
            trace_id: WORKER_TRACE.to_string(),
            event_id: "e3".to_string(),
            project: "worker".to_string(),
            ts: at(7_201_000),
        },
    ];

    let occurrences = vec![Occurrence {
        trace_id: HOME_TRACE.to_string(),
        occurrence_id: "o1".to_string(),
        project: "web".to_string(),
        ts: at(600_500),
    }];

    Fixture {
        spans,
        errors,
        occurrences,
    }
}

/// The fixture as an import file, one tagged record per line.
pub fn sample_ndjson() -> String {
    let fixture = sample_traces();
    let mut out = String::new();
    for span in &fixture.spans {
        out.push_str(&json!({ "span": span }).to_string());
        out.push('\n');
    }
    for error in &fixture.errors {
        out.push_str(&json!({ "error": error }).to_string());
        out.push('\n');
    }
    for occurrence in &fixture.occurrences {
        out.push_str(&json!({ "occurrence": occurrence }).to_string());
        out.push('\n');
    }
    out
}
