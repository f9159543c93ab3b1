//! Ticker Board Domain Types
//!
//! Per-instrument price history and the fold that merges each incoming
//! update into it.
//!
//! # Fold Rules
//!
//! - Prices are clamped to zero; a record never holds a negative price.
//! - A repeated price leaves direction and both change fields untouched.
//! - A price move from zero keeps the previous percent change, since the
//!   ratio is undefined there. The absolute change still updates.
//! - An update without a usable timestamp keeps the record's previous one.
//! - History only grows. Seeing a ticker on another page moves the record,
//!   it never removes it.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Instrument identifier (ticker symbol).
pub type Symbol = String;

/// Server-assigned page number.
pub type Page = i64;

// =============================================================================
// Direction
// =============================================================================

/// Sign of an instrument's latest price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Last move was a rise. Also the label for a first sighting.
    #[default]
    Up,
    /// Last move was a fall.
    Down,
}

impl Direction {
    /// Display colour for this direction.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Up => "green",
            Self::Down => "red",
        }
    }
}

// =============================================================================
// Updates and Records
// =============================================================================

/// One instrument entry from an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerUpdate {
    /// Instrument identifier.
    pub identifier: Symbol,
    /// Display name.
    pub name: String,
    /// Currency code.
    pub currency: String,
    /// Raw price as sent; may be negative.
    pub price: f64,
    /// Server timestamp of the price, when the feed sent a usable one.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Folded state for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRecord {
    /// Instrument identifier.
    pub identifier: Symbol,
    /// Display name.
    pub name: String,
    /// Currency code.
    pub currency: String,
    /// Latest price, never negative.
    pub last_price: f64,
    /// Direction of the latest move.
    pub direction: Direction,
    /// Latest non-zero price delta.
    pub absolute_change: f64,
    /// Latest price delta as a fraction of the previous price.
    pub percent_change: f64,
    /// Timestamp of the latest update that carried a usable one.
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Page the instrument was last seen on.
    pub page: Page,
}

impl InstrumentRecord {
    /// Record for an instrument seen for the first time.
    #[must_use]
    pub fn first_sight(update: TickerUpdate, page: Page) -> Self {
        Self {
            identifier: update.identifier,
            name: update.name,
            currency: update.currency,
            last_price: clamp_price(update.price),
            direction: Direction::default(),
            absolute_change: 0.0,
            percent_change: 0.0,
            last_updated_at: update.updated_at,
            page,
        }
    }

    /// Fold `update` into this record, producing its successor.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn folded(&self, update: TickerUpdate, page: Page) -> Self {
        let old_price = self.last_price;
        let new_price = clamp_price(update.price);

        let (direction, absolute_change, percent_change) = if new_price == old_price {
            (self.direction, self.absolute_change, self.percent_change)
        } else {
            let delta = new_price - old_price;
            let direction = if delta > 0.0 {
                Direction::Up
            } else {
                Direction::Down
            };
            let percent = if old_price == 0.0 {
                self.percent_change
            } else {
                delta / old_price
            };
            (direction, delta, percent)
        };

        Self {
            identifier: update.identifier,
            name: update.name,
            currency: update.currency,
            last_price: new_price,
            direction,
            absolute_change,
            percent_change,
            last_updated_at: update.updated_at.or(self.last_updated_at),
            page,
        }
    }

    /// Display colour of the latest move.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        self.direction.color()
    }
}

fn clamp_price(price: f64) -> f64 {
    price.max(0.0)
}

// =============================================================================
// History
// =============================================================================

/// Insertion-ordered map of instrument records for one session.
#[derive(Debug, Clone, Default)]
pub struct TickerHistory {
    records: IndexMap<Symbol, InstrumentRecord>,
}

impl TickerHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one update observed on `page`.
    pub fn fold(&mut self, update: TickerUpdate, page: Page) -> &InstrumentRecord {
        let next = match self.records.get(&update.identifier) {
            Some(existing) => existing.folded(update, page),
            None => InstrumentRecord::first_sight(update, page),
        };
        let (index, _) = self.records.insert_full(next.identifier.clone(), next);
        &self.records[index]
    }

    /// Fold a whole frame's updates, left to right.
    pub fn fold_all(&mut self, updates: impl IntoIterator<Item = TickerUpdate>, page: Page) {
        for update in updates {
            self.fold(update, page);
        }
    }

    /// Look up one record.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&InstrumentRecord> {
        self.records.get(identifier)
    }

    /// Whether a record exists for `identifier`.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.records.contains_key(identifier)
    }

    /// Number of instruments seen this session.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records last seen on `page`, in first-insertion order.
    #[must_use]
    pub fn rows_for_page(&self, page: Page) -> Vec<InstrumentRecord> {
        self.records
            .values()
            .filter(|record| record.page == page)
            .cloned()
            .collect()
    }
}

// =============================================================================
// Read Model
// =============================================================================

/// What the renderer consumes: the visible rows and the active page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    /// Rows for the current page, in first-insertion order.
    pub rows: Vec<InstrumentRecord>,
    /// Page declared by the latest valid frame; `None` before the first one.
    pub current_page: Option<Page>,
}

// =============================================================================
// Page Navigation
// =============================================================================

/// Outbound page navigation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageCommand {
    /// Ask the server for the previous page.
    Prev,
    /// Ask the server for the next page.
    Next,
}

impl PageCommand {
    /// Wire token for this command.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prev => "PREV_PAGE",
            Self::Next => "NEXT_PAGE",
        }
    }
}

/// Unrecognized navigation input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown page command: {0}")]
pub struct UnknownPageCommand(pub String);

impl FromStr for PageCommand {
    type Err = UnknownPageCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prev" | "p" | "prev_page" => Ok(Self::Prev),
            "next" | "n" | "next_page" => Ok(Self::Next),
            other => Err(UnknownPageCommand(other.to_string())),
        }
    }
}
