use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    pub trace_id: String,
    pub event_id: String,
    pub project: String,
    pub ts: f64,
}

/// An issue occurrence (performance issue, cron failure, ...) attached to a trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Occurrence {
    pub trace_id: String,
    pub occurrence_id: String,
    pub project: String,
    pub ts: f64,
}
