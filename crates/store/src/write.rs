use duckdb::params;
use tracex_core::error::{Result, TracexError};
use tracex_core::model::event::{ErrorEvent, Occurrence};
use tracex_core::model::span::SpanRecord;

use crate::Store;

impl Store {
    pub fn insert_spans(&self, spans: &[SpanRecord]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| TracexError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO spans
                     (trace_id, span_id, parent_span, project, sdk_name, span_op, description,
                      transaction_name, is_segment, precise_start_ts, precise_finish_ts)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| TracexError::Store(format!("prepare insert spans failed: {e}")))?;

            for span in spans {
                stmt.execute(params![
                    span.trace_id,
                    span.span_id,
                    span.parent_span,
                    span.project,
                    span.sdk_name,
                    span.span_op,
                    span.description,
                    span.transaction,
                    span.is_segment,
                    span.precise_start_ts,
                    span.precise_finish_ts,
                ])
                .map_err(|e| TracexError::Store(format!("insert span failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| TracexError::Store(format!("commit spans failed: {e}")))
    }

    pub fn insert_errors(&self, errors: &[ErrorEvent]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| TracexError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO errors (trace_id, event_id, project, ts)
                     VALUES (?, ?, ?, ?)",
                )
                .map_err(|e| TracexError::Store(format!("prepare insert errors failed: {e}")))?;

            for event in errors {
                stmt.execute(params![event.trace_id, event.event_id, event.project, event.ts])
                    .map_err(|e| TracexError::Store(format!("insert error failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| TracexError::Store(format!("commit errors failed: {e}")))
    }

    pub fn insert_occurrences(&self, occurrences: &[Occurrence]) -> Result<()> {
        if occurrences.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| TracexError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO occurrences (trace_id, occurrence_id, project, ts)
                     VALUES (?, ?, ?, ?)",
                )
                .map_err(|e| {
                    TracexError::Store(format!("prepare insert occurrences failed: {e}"))
                })?;

            for occurrence in occurrences {
                stmt.execute(params![
                    occurrence.trace_id,
                    occurrence.occurrence_id,
                    occurrence.project,
                    occurrence.ts,
                ])
                .map_err(|e| TracexError::Store(format!("insert occurrence failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| TracexError::Store(format!("commit occurrences failed: {e}")))
    }
}
