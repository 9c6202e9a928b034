//! Helper functions for topic naming
//!
//! Topics follow the `<category>:<instrument>` convention. No registry of valid
//! topics exists: an unknown topic is legal, it simply never matches a quote.

/// Topic prefix carried by the default quote source
pub const MARKET_DATA: &str = "market_data";

/// Build a topic from an arbitrary prefix and instrument
pub fn topic(prefix: &str, instrument: &str) -> String {
    format!("{}:{}", prefix, instrument)
}

/// Topic that quotes for `instrument` are published on
pub fn market_data(instrument: &str) -> String {
    topic(MARKET_DATA, instrument)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_naming() {
        assert_eq!(market_data("EUR/USD"), "market_data:EUR/USD");
        assert_eq!(topic("news", "ECB"), "news:ECB");
    }
}
