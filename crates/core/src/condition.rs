use std::str::FromStr;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TracexError};
use crate::model::span::SpanRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpanField {
    Project,
    SdkName,
    SpanOp,
    Description,
    Transaction,
    Trace,
}

impl SpanField {
    fn value<'a>(&self, span: &'a SpanRecord) -> &'a str {
        match self {
            Self::Project => &span.project,
            Self::SdkName => span.sdk_name.as_deref().unwrap_or_default(),
            Self::SpanOp => &span.span_op,
            Self::Description => &span.description,
            Self::Transaction => &span.transaction,
            Self::Trace => &span.trace_id,
        }
    }
}

impl FromStr for SpanField {
    type Err = TracexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "project" => Ok(Self::Project),
            "sdk.name" => Ok(Self::SdkName),
            "span.op" => Ok(Self::SpanOp),
            "span.description" => Ok(Self::Description),
            "transaction" => Ok(Self::Transaction),
            "trace" => Ok(Self::Trace),
            _ => Err(TracexError::Parse(format!("unknown span field: {s}"))),
        }
    }
}

/// A single `key:glob` term, optionally negated with a leading `!`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    pub field: SpanField,
    pub value_glob: String,
    pub negated: bool,
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self> {
        let (negated, term) = match input.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, input),
        };
        let (key, value_glob) = term
            .split_once(':')
            .ok_or_else(|| TracexError::Parse(format!("invalid condition: {input}")))?;

        if key.trim().is_empty() || value_glob.trim().is_empty() {
            return Err(TracexError::Parse(format!("invalid condition: {input}")));
        }
        Pattern::new(value_glob.trim())
            .map_err(|e| TracexError::Parse(format!("invalid pattern in {input}: {e}")))?;

        Ok(Self {
            field: key.trim().parse()?,
            value_glob: value_glob.trim().to_string(),
            negated,
        })
    }

    pub fn matches(&self, span: &SpanRecord) -> bool {
        let hit = Pattern::new(&self.value_glob)
            .map(|p| p.matches(self.field.value(span)))
            .unwrap_or(false);
        hit != self.negated
    }
}

/// A whitespace separated conjunction of [`Condition`]s. Empty matches
/// everything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SpanQuery {
    pub conditions: Vec<Condition>,
}

impl SpanQuery {
    pub fn parse(input: &str) -> Result<Self> {
        let conditions = input
            .split_whitespace()
            .map(Condition::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, span: &SpanRecord) -> bool {
        self.conditions.iter().all(|c| c.matches(span))
    }
}

/// A trace qualifies when every query matches at least one of its spans.
pub fn trace_matches_all<'a>(
    queries: &[SpanQuery],
    spans: impl IntoIterator<Item = &'a SpanRecord> + Clone,
) -> bool {
    queries
        .iter()
        .all(|q| spans.clone().into_iter().any(|s| q.matches(s)))
}
