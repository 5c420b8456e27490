use biometrics::{Collector, Counter, Moments};

pub(crate) static EXCHANGES: Counter = Counter::new("sparkle.exchange.started");
pub(crate) static EXCHANGE_COMPLETED: Counter = Counter::new("sparkle.exchange.completed");
pub(crate) static EXCHANGE_REMOTE_ERRORS: Counter = Counter::new("sparkle.exchange.remote_errors");
pub(crate) static EXCHANGE_TRANSPORT_ERRORS: Counter =
    Counter::new("sparkle.exchange.transport_errors");
pub(crate) static EXCHANGE_CLOSED_EARLY: Counter = Counter::new("sparkle.exchange.closed_early");
pub(crate) static EXCHANGE_TIMEOUTS: Counter = Counter::new("sparkle.exchange.timeouts");
pub(crate) static EXCHANGE_REJECTED_BUSY: Counter = Counter::new("sparkle.exchange.rejected_busy");
pub(crate) static EXCHANGE_LATE_EVENTS: Counter = Counter::new("sparkle.exchange.late_events");
pub(crate) static EXCHANGE_DURATION: Moments =
    Moments::new("sparkle.exchange.duration_seconds");

pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("sparkle.stream.fragments");
pub(crate) static STREAM_BYTES: Counter = Counter::new("sparkle.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("sparkle.stream.ttfb_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&EXCHANGES);
    collector.register_counter(&EXCHANGE_COMPLETED);
    collector.register_counter(&EXCHANGE_REMOTE_ERRORS);
    collector.register_counter(&EXCHANGE_TRANSPORT_ERRORS);
    collector.register_counter(&EXCHANGE_CLOSED_EARLY);
    collector.register_counter(&EXCHANGE_TIMEOUTS);
    collector.register_counter(&EXCHANGE_REJECTED_BUSY);
    collector.register_counter(&EXCHANGE_LATE_EVENTS);
    collector.register_moments(&EXCHANGE_DURATION);

    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
}
