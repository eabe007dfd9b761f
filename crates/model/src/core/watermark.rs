use crate::execution::errors::ModelError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Marks the latest committed record for a source entity.
///
/// Watermarks of different kinds do not compare meaningfully; callers that
/// advance a checkpoint must check [`Watermark::same_kind`] first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Watermark {
    Timestamp(DateTime<Utc>),
    Sequence(u64),
}

impl Watermark {
    pub fn same_kind(&self, other: &Watermark) -> bool {
        matches!(
            (self, other),
            (Watermark::Timestamp(_), Watermark::Timestamp(_))
                | (Watermark::Sequence(_), Watermark::Sequence(_))
        )
    }

    /// Reads a watermark out of a record's cursor field.
    ///
    /// Unsigned integers become sequences; strings are parsed as RFC 3339
    /// timestamps, plain dates, or decimal sequences.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().map(Watermark::Sequence),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Value sent to the source API as the inclusive lower bound of a fetch.
    pub fn to_query_param(&self) -> String {
        match self {
            Watermark::Timestamp(ts) => ts.format("%Y-%m-%d").to_string(),
            Watermark::Sequence(n) => n.to_string(),
        }
    }
}

impl FromStr for Watermark {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(Watermark::Sequence(n));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Ok(Watermark::Timestamp(ts.with_timezone(&Utc)));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Watermark::Timestamp(
                date.and_time(NaiveTime::MIN).and_utc(),
            ));
        }
        Err(ModelError::InvalidWatermark(s.to_string()))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Watermark::Sequence(n) => write!(f, "{n}"),
        }
    }
}
