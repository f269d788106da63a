use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TracexError};

pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now()
            - chrono::Duration::from_std(duration).map_err(|e| {
                TracexError::Parse(format!("failed to parse duration to chrono: {e}"))
            })?);
    }

    Err(TracexError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| TracexError::Parse(format!("invalid duration {input}: {e}")))
}

pub fn epoch_secs(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn all() -> Self {
        Self {
            since: None,
            until: None,
        }
    }

    /// Fills open ends: `until` defaults to `now`, `since` to `until - default_span`.
    pub fn resolve(
        &self,
        now: DateTime<Utc>,
        default_span: Duration,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let until = self.until.unwrap_or(now);
        let since = match self.since {
            Some(since) => since,
            None => {
                until
                    - chrono::Duration::from_std(default_span).map_err(|e| {
                        TracexError::InvalidArgument(format!("window too large: {e}"))
                    })?
            }
        };
        if since > until {
            return Err(TracexError::InvalidArgument(format!(
                "window start {since} is after window end {until}"
            )));
        }
        Ok((since, until))
    }
}

/// Splits `[since, until]` into consecutive chunks, newest first.
pub fn chunks_backward(
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    chunk: Duration,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    let step = chrono::Duration::from_std(chunk)
        .map_err(|e| TracexError::InvalidArgument(format!("bad chunk size: {e}")))?;
    if step <= chrono::Duration::zero() {
        return Err(TracexError::InvalidArgument(
            "chunk size must be positive".to_string(),
        ));
    }

    let mut out = Vec::new();
    let mut end = until;
    while end > since {
        let start = (end - step).max(since);
        out.push((start, end));
        end = start;
    }
    if out.is_empty() {
        out.push((since, until));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_rfc3339() {
        let ts = parse_time_or_relative("2026-01-01T00:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn parses_duration() {
        let now = Utc::now();
        let ts = parse_time_or_relative("5m").unwrap();
        assert!(ts < now);
    }

    #[test]
    fn rejects_invalid() {
        assert!(parse_time_or_relative("nope").is_err());
    }

    #[test]
    fn window_defaults_and_ordering() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let (since, until) = TimeWindow::all()
            .resolve(now, Duration::from_secs(3600))
            .unwrap();
        assert_eq!(until, now);
        assert_eq!(since, Utc.with_ymd_and_hms(2026, 2, 1, 11, 0, 0).unwrap());

        let inverted = TimeWindow {
            since: Some(now),
            until: Some(now - chrono::Duration::seconds(1)),
        };
        assert!(inverted.resolve(now, Duration::from_secs(60)).is_err());
    }

    #[test]
    fn chunks_cover_window_newest_first() {
        let since = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let until = since + chrono::Duration::minutes(150);
        let chunks = chunks_backward(since, until, Duration::from_secs(3600)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].1, until);
        assert_eq!(chunks[2].0, since);
        assert_eq!(chunks[2].1 - chunks[2].0, chrono::Duration::minutes(30));
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].0, pair[1].1);
        }
    }

    #[test]
    fn epoch_secs_keeps_micros() {
        let ts = DateTime::from_timestamp_micros(1_700_000_000_250_000).unwrap();
        assert_eq!(epoch_secs(ts), 1_700_000_000.25);
    }
}
