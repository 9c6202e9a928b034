/// Market data production
///
/// A `QuoteSource` prices each tracked instrument on demand and the
/// `BroadcastScheduler` pulls one quote per instrument every period, fanning
/// each out to the connections subscribed to `market_data:<instrument>`.

pub mod quote_source;
pub mod scheduler;

pub use quote_source::{QuoteSource, SimulatedQuoteSource, PRICE_SCALE};
pub use scheduler::{BroadcastScheduler, SchedulerStats, TickReport};
