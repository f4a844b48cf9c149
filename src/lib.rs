// Public modules
pub mod chat;
pub mod config;
pub mod error;
pub mod event_logger;
pub mod events;
pub mod format;
pub mod generation;
pub mod message;
pub mod observability;
pub mod progress;
pub mod render;
pub mod session;
pub mod sse;
pub mod transport;
pub mod utils;

// Re-exports
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use event_logger::{EventLogger, JsonLinesLogger};
pub use events::{
    EventInterpreter, FieldType, Interpretation, Interrupt, InterruptField, PortfolioResult,
    ProgressUpdate, StreamEvent,
};
pub use generation::{CancelHandle, Generation, RequestTracker};
pub use message::{Message, MessageContent, MessageId, MessageKind, Role};
pub use observability::register_biometrics;
pub use progress::{ProgressStep, ProgressTracker, StepDefinition, StepState};
pub use render::{PlainTextRenderer, SessionObserver};
pub use session::{
    EventDisposition, PreparedTurn, Session, SessionState, SessionStats, TurnOutcome,
};
pub use sse::{FrameDecoder, decode_blocks};
pub use transport::{
    ByteStream, ChatRequest, HistoryEntry, HttpTransport, MockTransport, ScriptedReply,
    ScriptedTransport, Transport,
};
