use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price movement relative to the instrument's base price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Anything strictly above zero is `Up`, zero and below is `Down`
    pub fn from_variation(variation: Decimal) -> Self {
        if variation > Decimal::ZERO {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

/// One simulated quote for one instrument, produced and consumed within a single tick
///
/// Field names on the wire are the ones existing front-ends already read
/// (`pair`, `change`), hence the renames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(rename = "pair")]
    pub instrument: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "change")]
    pub direction: Direction,
}

impl Quote {
    /// Ask minus bid
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}
