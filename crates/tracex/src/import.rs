use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracex_core::ids::{SpanId, TraceId};
use tracex_core::model::event::{ErrorEvent, Occurrence};
use tracex_core::model::span::SpanRecord;
use tracex_store::Store;

const IMPORT_BATCH: usize = 1000;

/// One line of an import file: `{"span": {...}}`, `{"error": {...}}` or
/// `{"occurrence": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ImportLine {
    Span(SpanRecord),
    Error(ErrorEvent),
    Occurrence(Occurrence),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub spans: usize,
    pub errors: usize,
    pub occurrences: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct Pending {
    spans: Vec<SpanRecord>,
    errors: Vec<ErrorEvent>,
    occurrences: Vec<Occurrence>,
}

impl Pending {
    fn len(&self) -> usize {
        self.spans.len() + self.errors.len() + self.occurrences.len()
    }

    fn flush(&mut self, store: &Store, summary: &mut ImportSummary) -> anyhow::Result<()> {
        store.insert_spans(&self.spans)?;
        store.insert_errors(&self.errors)?;
        store.insert_occurrences(&self.occurrences)?;
        summary.spans += self.spans.len();
        summary.errors += self.errors.len();
        summary.occurrences += self.occurrences.len();
        *self = Self::default();
        Ok(())
    }
}

pub fn import_file(store: &Store, path: &Path) -> anyhow::Result<ImportSummary> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    import_reader(store, BufReader::new(file))
}

/// Loads records line by line. Lines that do not parse or carry malformed ids
/// are logged and skipped.
pub fn import_reader<R: BufRead>(store: &Store, reader: R) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut pending = Pending::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("read line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = serde_json::from_str::<ImportLine>(&line)
            .map_err(anyhow::Error::from)
            .and_then(normalize);
        match parsed {
            Ok(ImportLine::Span(span)) => pending.spans.push(span),
            Ok(ImportLine::Error(event)) => pending.errors.push(event),
            Ok(ImportLine::Occurrence(occurrence)) => pending.occurrences.push(occurrence),
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "skipping import line");
                summary.skipped += 1;
                continue;
            }
        }

        if pending.len() >= IMPORT_BATCH {
            pending.flush(store, &mut summary)?;
        }
    }

    pending.flush(store, &mut summary)?;
    tracing::info!(
        spans = summary.spans,
        errors = summary.errors,
        occurrences = summary.occurrences,
        skipped = summary.skipped,
        "import finished"
    );
    Ok(summary)
}

/// Lowercases ids and rejects records whose ids are not hex of the right width.
/// Null parents (`"0"`, empty, all zeros) become `None`.
fn normalize(line: ImportLine) -> anyhow::Result<ImportLine> {
    Ok(match line {
        ImportLine::Span(mut span) => {
            span.trace_id = TraceId::parse(&span.trace_id)?.as_str().to_string();
            span.span_id = SpanId::parse(&span.span_id)?.as_str().to_string();
            span.parent_span = match span.parent_span.take() {
                Some(parent) if !SpanId::is_null_parent(Some(&parent)) => {
                    Some(SpanId::parse(&parent)?.as_str().to_string())
                }
                _ => None,
            };
            ImportLine::Span(span)
        }
        ImportLine::Error(mut event) => {
            event.trace_id = TraceId::parse(&event.trace_id)?.as_str().to_string();
            ImportLine::Error(event)
        }
        ImportLine::Occurrence(mut occurrence) => {
            occurrence.trace_id = TraceId::parse(&occurrence.trace_id)?.as_str().to_string();
            ImportLine::Occurrence(occurrence)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tracex_core::query::TracesRequest;
    use tracex_core::time::TimeWindow;
    use tracex_store::query::QueryOptions;

    use super::*;

    #[test]
    fn imports_fixture_file() {
        let store = Store::open_in_memory().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(testkit::sample_ndjson().as_bytes()).unwrap();

        let summary = import_file(&store, file.path()).unwrap();
        let fixture = testkit::sample_traces();
        assert_eq!(
            summary,
            ImportSummary {
                spans: fixture.spans.len(),
                errors: fixture.errors.len(),
                occurrences: fixture.occurrences.len(),
                skipped: 0,
            }
        );
        assert_eq!(store.status().unwrap().traces_count, 3);
    }

    #[test]
    fn zero_parent_is_imported_as_root() {
        let store = Store::open_in_memory().unwrap();
        let input = [
            r#"{"span": {"trace_id": "7bf92f3577b34da6a3ce929d0e0e4736", "span_id": "d000000000000001", "parent_span": "0", "project": "web", "sdk_name": "sentry.javascript.react", "span_op": "pageload", "description": "/cart", "transaction": "/cart", "is_segment": true, "precise_start_ts": 1769904000.0, "precise_finish_ts": 1769904001.0}}"#,
            r#"{"span": {"trace_id": "7bf92f3577b34da6a3ce929d0e0e4736", "span_id": "d000000000000002", "parent_span": "D000000000000001", "project": "web", "sdk_name": "sentry.javascript.react", "span_op": "resource.script", "description": "app.js", "transaction": "/cart", "precise_start_ts": 1769904000.25, "precise_finish_ts": 1769904000.5}}"#,
        ]
        .join("\n");

        let summary = import_reader(&store, input.as_bytes()).unwrap();
        assert_eq!(summary.spans, 2);
        assert_eq!(summary.skipped, 0);

        let req = TracesRequest {
            window: TimeWindow {
                since: Some(testkit::base_time() - chrono::Duration::minutes(5)),
                until: Some(testkit::base_time() + chrono::Duration::minutes(5)),
            },
            ..TracesRequest::default()
        };
        let res = store.query_traces(&req, &QueryOptions::default()).unwrap();
        assert_eq!(res.data.len(), 1);
        let trace = &res.data[0];
        assert_eq!(trace.name.as_deref(), Some("/cart"));
        assert_eq!(trace.spans[0].parent_span, None);
        assert_eq!(trace.breakdowns.len(), 1);
        assert!(trace.breakdowns[0].is_root);
    }

    #[test]
    fn bad_lines_are_skipped() {
        let store = Store::open_in_memory().unwrap();
        let input = [
            r#"{"error": {"trace_id": "4BF92F3577B34DA6A3CE929D0E0E4736", "event_id": "e1", "project": "api", "ts": 1.5}}"#,
            "",
            "not json",
            r#"{"error": {"trace_id": "nope", "event_id": "e2", "project": "api", "ts": 1.5}}"#,
            r#"{"metric": {"name": "x"}}"#,
        ]
        .join("\n");

        let summary = import_reader(&store, input.as_bytes()).unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(store.status().unwrap().errors_count, 1);
    }
}
