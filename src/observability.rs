use biometrics::{Collector, Counter, Moments};

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("chatterbox.stream.chunks");
pub(crate) static STREAM_BYTES: Counter = Counter::new("chatterbox.stream.bytes");
pub(crate) static STREAM_BLOCKS: Counter = Counter::new("chatterbox.stream.blocks");
pub(crate) static STREAM_DROPPED_TAILS: Counter =
    Counter::new("chatterbox.stream.dropped_trailing_blocks");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("chatterbox.stream.errors");

pub(crate) static EVENTS_DELTA: Counter = Counter::new("chatterbox.events.delta");
pub(crate) static EVENTS_PROGRESS: Counter = Counter::new("chatterbox.events.progress");
pub(crate) static EVENTS_INTERRUPT: Counter = Counter::new("chatterbox.events.interrupt");
pub(crate) static EVENTS_PORTFOLIO: Counter = Counter::new("chatterbox.events.portfolio");
pub(crate) static EVENTS_DONE: Counter = Counter::new("chatterbox.events.done");
pub(crate) static EVENTS_MALFORMED: Counter = Counter::new("chatterbox.events.malformed");
pub(crate) static EVENTS_SUPPRESSED: Counter = Counter::new("chatterbox.events.suppressed");
pub(crate) static EVENTS_STALE: Counter = Counter::new("chatterbox.events.stale");

pub(crate) static TURNS_STARTED: Counter = Counter::new("chatterbox.turns.started");
pub(crate) static TURNS_COMPLETED: Counter = Counter::new("chatterbox.turns.completed");
pub(crate) static TURNS_CANCELLED: Counter = Counter::new("chatterbox.turns.cancelled");
pub(crate) static TURNS_FAILED: Counter = Counter::new("chatterbox.turns.failed");
pub(crate) static TURN_FIRST_EVENT: Moments =
    Moments::new("chatterbox.turns.first_event_seconds");
pub(crate) static TURN_DURATION: Moments = Moments::new("chatterbox.turns.duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_BLOCKS);
    collector.register_counter(&STREAM_DROPPED_TAILS);
    collector.register_counter(&STREAM_ERRORS);

    collector.register_counter(&EVENTS_DELTA);
    collector.register_counter(&EVENTS_PROGRESS);
    collector.register_counter(&EVENTS_INTERRUPT);
    collector.register_counter(&EVENTS_PORTFOLIO);
    collector.register_counter(&EVENTS_DONE);
    collector.register_counter(&EVENTS_MALFORMED);
    collector.register_counter(&EVENTS_SUPPRESSED);
    collector.register_counter(&EVENTS_STALE);

    collector.register_counter(&TURNS_STARTED);
    collector.register_counter(&TURNS_COMPLETED);
    collector.register_counter(&TURNS_CANCELLED);
    collector.register_counter(&TURNS_FAILED);
    collector.register_moments(&TURN_FIRST_EVENT);
    collector.register_moments(&TURN_DURATION);
}
