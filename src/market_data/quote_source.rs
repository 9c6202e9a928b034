use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;

use crate::config::InstrumentConfig;
use crate::errors::QuoteError;
use crate::models::{Direction, Quote};

/// Decimal places quotes are rounded to
pub const PRICE_SCALE: u32 = 5;

/// Pluggable producer of one quote per tracked instrument per tick
///
/// Implementations must not touch engine state; the scheduler only reads
/// what they return.
pub trait QuoteSource: Send + Sync {
    /// Instruments to quote, in emission order
    fn instruments(&self) -> Vec<String>;

    /// Produce the next quote for `instrument`
    fn next_quote(&self, instrument: &str) -> Result<Quote, QuoteError>;
}

/// Random-walk-free price simulator around a fixed base-price table
///
/// Every tick draws a fresh uniform variation around the base price, so
/// quotes never drift: `bid = base + variation`, `ask = bid + spread`.
pub struct SimulatedQuoteSource {
    instruments: Vec<InstrumentConfig>,
}

impl SimulatedQuoteSource {
    pub fn new(instruments: Vec<InstrumentConfig>) -> Self {
        Self { instruments }
    }

    fn config_for(&self, instrument: &str) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.pair == instrument)
    }

    /// Build a quote from an explicit variation (used by `next_quote` and tests)
    fn quote_with_variation(
        config: &InstrumentConfig,
        variation: f64,
    ) -> Result<Quote, QuoteError> {
        let variation = Decimal::from_f64_retain(variation).ok_or_else(|| {
            QuoteError::InvalidPrice {
                pair: config.pair.clone(),
                reason: format!("variation {} is not representable", variation),
            }
        })?;

        let bid = (config.base_price + variation).round_dp(PRICE_SCALE);
        if bid <= Decimal::ZERO {
            return Err(QuoteError::InvalidPrice {
                pair: config.pair.clone(),
                reason: format!("bid {} is not positive", bid),
            });
        }
        let ask = (bid + config.spread).round_dp(PRICE_SCALE);

        Ok(Quote {
            instrument: config.pair.clone(),
            bid,
            ask,
            timestamp: Utc::now(),
            direction: Direction::from_variation(variation),
        })
    }
}

impl QuoteSource for SimulatedQuoteSource {
    fn instruments(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.pair.clone()).collect()
    }

    fn next_quote(&self, instrument: &str) -> Result<Quote, QuoteError> {
        let config = self
            .config_for(instrument)
            .ok_or_else(|| QuoteError::UnknownInstrument(instrument.to_string()))?;

        let mut rng = rand::rng();
        let variation = (rng.random::<f64>() - 0.5) * config.variation;

        Self::quote_with_variation(config, variation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn eurusd() -> InstrumentConfig {
        InstrumentConfig::new("EUR/USD", dec!(1.0856))
    }

    #[test]
    fn test_quote_with_variation() {
        let quote = SimulatedQuoteSource::quote_with_variation(&eurusd(), 0.00031).unwrap();

        assert_eq!(quote.instrument, "EUR/USD");
        assert_eq!(quote.bid, dec!(1.08591));
        assert_eq!(quote.ask, dec!(1.08611));
        assert_eq!(quote.direction, Direction::Up);

        let quote = SimulatedQuoteSource::quote_with_variation(&eurusd(), -0.0002).unwrap();
        assert_eq!(quote.bid, dec!(1.0854));
        assert_eq!(quote.direction, Direction::Down);
    }

    #[test]
    fn test_quotes_stay_within_variation_band() {
        let source = SimulatedQuoteSource::new(vec![eurusd()]);

        for _ in 0..200 {
            let quote = source.next_quote("EUR/USD").unwrap();
            assert!(quote.bid >= dec!(1.0851) && quote.bid <= dec!(1.0861));
            assert_eq!(quote.spread(), dec!(0.0002));
            assert!(quote.bid.scale() <= PRICE_SCALE);
        }
    }

    #[test]
    fn test_unknown_instrument() {
        let source = SimulatedQuoteSource::new(vec![eurusd()]);
        assert!(matches!(
            source.next_quote("BTC/USD"),
            Err(QuoteError::UnknownInstrument(ref i)) if i == "BTC/USD"
        ));
    }

    #[test]
    fn test_instruments_keep_config_order() {
        let source = SimulatedQuoteSource::new(vec![
            InstrumentConfig::new("USD/JPY", dec!(149.32)),
            eurusd(),
        ]);
        assert_eq!(source.instruments(), vec!["USD/JPY", "EUR/USD"]);
    }

    #[test]
    fn test_non_positive_bid_is_rejected() {
        let tiny = InstrumentConfig::new("TINY", dec!(0.0001));
        assert!(matches!(
            SimulatedQuoteSource::quote_with_variation(&tiny, -0.0005),
            Err(QuoteError::InvalidPrice { .. })
        ));
    }
}
