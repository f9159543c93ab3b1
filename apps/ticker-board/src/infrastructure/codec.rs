//! Frame Codec
//!
//! Decodes inbound ticker frames from JSON text.
//!
//! ```json
//! {"page":1,"tickers":[{"ticker":"ABC","name":"Acme","currency":"USD","price":10,"updated":1000}]}
//! ```
//!
//! `updated` may be epoch milliseconds (integer, float or numeric string),
//! an RFC 3339 or RFC 2822 string, a naive ISO-8601 date-time (read as UTC)
//! or the `Date::toString` form. An entry whose timestamp fits none of these
//! is kept with no timestamp. A missing or `null` `tickers` field is an empty
//! page. Any other malformed entry fails the whole frame.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::domain::ticker::{Page, TickerUpdate};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerFrame {
    /// Page the server says is current.
    pub page: Page,
    /// Entries in wire order.
    pub tickers: Vec<TickerUpdate>,
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    page: Page,
    #[serde(default)]
    tickers: Option<Vec<WireTicker>>,
}

#[derive(Debug, Deserialize)]
struct WireTicker {
    ticker: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    currency: String,
    price: f64,
    updated: WireTimestamp,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    FractionalMillis(f64),
    Text(String),
}

impl WireTimestamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            Self::FractionalMillis(ms) => fractional_millis(*ms),
            Self::Text(text) => parse_text_timestamp(text.trim()),
        }
    }
}

/// Naive layouts read as UTC.
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// `Date::toString` layout, after the trailing zone name is dropped.
const JS_DATE_FORMAT: &str = "%a %b %d %Y %H:%M:%S GMT%z";

fn parse_text_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ms) = text.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms);
    }
    if let Ok(ms) = text.parse::<f64>() {
        return fractional_millis(ms);
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    let without_zone_name = text.split(" (").next().unwrap_or(text);
    DateTime::parse_from_str(without_zone_name, JS_DATE_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl std::fmt::Display for WireTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms}"),
            Self::FractionalMillis(ms) => write!(f, "{ms}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn fractional_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() || ms.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(ms.round() as i64)
}

/// JSON codec for ticker frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid frame.
    pub fn decode_frame(text: &str) -> Result<TickerFrame, CodecError> {
        let wire: WireFrame = serde_json::from_str(text.trim())?;

        let tickers = wire
            .tickers
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let updated_at = entry.updated.to_utc();
                if updated_at.is_none() {
                    debug!(ticker = %entry.ticker, updated = ?entry.updated, "Unusable timestamp");
                }
                TickerUpdate {
                    identifier: entry.ticker,
                    name: entry.name,
                    currency: entry.currency,
                    price: entry.price,
                    updated_at,
                }
            })
            .collect();

        Ok(TickerFrame {
            page: wire.page,
            tickers,
        })
    }
}
