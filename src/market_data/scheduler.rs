use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use utoipa::ToSchema;

use super::quote_source::QuoteSource;
use crate::connections::{ConnectionId, ConnectionRegistry};
use crate::errors::EngineError;
use crate::models::topics;
use crate::websocket::messages::ServerMessage;

/// Statistics for the broadcast scheduler
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchedulerStats {
    /// Whether the tick task is alive
    pub running: bool,
    /// Ticks executed (lifetime)
    pub ticks: u64,
    /// Quotes produced and fanned out
    pub quotes_published: u64,
    /// Individual quote deliveries queued
    pub deliveries: u64,
    /// Connections removed because a send failed during a tick
    pub dropped_connections: u64,
    /// Instruments the quote source failed to price
    pub quote_failures: u64,
}

/// What a single tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub quotes: usize,
    pub deliveries: usize,
    pub dropped: Vec<ConnectionId>,
    pub failed_instruments: Vec<String>,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    quotes: AtomicU64,
    deliveries: AtomicU64,
    dropped: AtomicU64,
    quote_failures: AtomicU64,
}

/// State shared between the scheduler handle and its tick task
struct Fanout {
    registry: Arc<ConnectionRegistry>,
    source: Arc<dyn QuoteSource>,
    counters: Counters,
}

impl Fanout {
    /// One pass: a quote per instrument, each delivered to its topic's subscribers.
    ///
    /// Subscription changes racing with a tick may or may not be seen by it; the
    /// next tick always reflects them. Every failure is isolated to its
    /// instrument or connection and never aborts the rest of the tick.
    fn tick(&self) -> TickReport {
        let tick = self.counters.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        // Sources are pluggable; a panicking one must not take the tick task down.
        let instruments = match catch_unwind(AssertUnwindSafe(|| self.source.instruments())) {
            Ok(instruments) => instruments,
            Err(payload) => {
                tracing::error!(
                    "📡 Tick {}: quote source panicked listing instruments: {}",
                    tick,
                    panic_message(payload.as_ref())
                );
                Vec::new()
            }
        };

        for instrument in instruments {
            let quote = match catch_unwind(AssertUnwindSafe(|| self.source.next_quote(&instrument))) {
                Ok(Ok(quote)) => quote,
                Ok(Err(e)) => {
                    tracing::warn!("📡 Tick {}: no quote for {}: {}", tick, instrument, e);
                    report.failed_instruments.push(instrument);
                    continue;
                }
                Err(payload) => {
                    tracing::error!(
                        "📡 Tick {}: quote source panicked for {}: {}",
                        tick,
                        instrument,
                        panic_message(payload.as_ref())
                    );
                    report.failed_instruments.push(instrument);
                    continue;
                }
            };

            let topic = topics::market_data(&quote.instrument);
            let frame = match (ServerMessage::MarketData { data: quote }).to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("📡 Tick {}: failed to encode {}: {}", tick, instrument, e);
                    report.failed_instruments.push(instrument);
                    continue;
                }
            };

            let delivery = self.registry.publish(&topic, frame);
            report.quotes += 1;
            report.deliveries += delivery.delivered;
            report.dropped.extend(delivery.dropped);
        }

        self.counters
            .quotes
            .fetch_add(report.quotes as u64, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(report.deliveries as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped.len() as u64, Ordering::Relaxed);
        self.counters
            .quote_failures
            .fetch_add(report.failed_instruments.len() as u64, Ordering::Relaxed);

        tracing::debug!(
            "📡 Tick {}: {} quotes, {} deliveries, {} dropped",
            tick,
            report.quotes,
            report.deliveries,
            report.dropped.len()
        );
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fixed-period scheduler that fans quotes out to subscribed connections
///
/// Lifecycle is explicit: `start()` spawns the tick task and keeps its handle,
/// `stop()` aborts it. Quotes for one instrument reach a connection in tick
/// order because ticks run sequentially on a single task.
///
/// # Example
/// ```ignore
/// let scheduler = BroadcastScheduler::new(registry, source, Duration::from_secs(1));
/// scheduler.start()?;
/// // ...
/// scheduler.stop();
/// ```
pub struct BroadcastScheduler {
    fanout: Arc<Fanout>,
    period: Duration,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastScheduler {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        source: Arc<dyn QuoteSource>,
        period: Duration,
    ) -> Self {
        Self {
            fanout: Arc::new(Fanout {
                registry,
                source,
                counters: Counters::default(),
            }),
            period,
            task_handle: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the tick task. The first tick fires one period after start.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.period.is_zero() {
            return Err(EngineError::InvalidPeriod("broadcast interval"));
        }

        let mut handle = self.task_handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(EngineError::SchedulerAlreadyRunning);
        }

        let fanout = Arc::clone(&self.fanout);
        let period = self.period;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                fanout.tick();
            }
        }));

        tracing::info!("📡 Broadcast scheduler started (every {:?})", self.period);
        Ok(())
    }

    /// Stop ticking. No new tick starts after this returns. Returns false if not running.
    pub fn stop(&self) -> bool {
        match self.task_handle.lock().take() {
            Some(handle) => {
                handle.abort();
                tracing::info!("📡 Broadcast scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Run one tick on the caller's task
    pub fn run_tick(&self) -> TickReport {
        self.fanout.tick()
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.fanout.counters;
        SchedulerStats {
            running: self.is_running(),
            ticks: counters.ticks.load(Ordering::Relaxed),
            quotes_published: counters.quotes.load(Ordering::Relaxed),
            deliveries: counters.deliveries.load(Ordering::Relaxed),
            dropped_connections: counters.dropped.load(Ordering::Relaxed),
            quote_failures: counters.quote_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BroadcastScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.get_mut().take() {
            handle.abort();
        }
    }
}
