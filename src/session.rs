//! The conversation state machine.
//!
//! A [`Session`] owns the transcript and every piece of per-turn state.  It
//! is mutated only through its transition functions; the async drivers
//! [`Session::send`] and [`Session::resolve_interrupt`] are thin loops that
//! feed a transport's bytes through the frame decoder and the event
//! interpreter into [`Session::apply_event`], racing each read against the
//! request tracker so a cancellation takes effect at the next await point.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, from_reader, to_writer_pretty};

use crate::config::EngineConfig;
use crate::event_logger::EventLogger;
use crate::events::{EventInterpreter, Interrupt, StreamEvent};
use crate::format::confirmation_text;
use crate::generation::{CancelHandle, Generation, RequestTracker};
use crate::message::{Message, MessageContent, MessageId, MessageKind, Role};
use crate::observability::{
    EVENTS_STALE, STREAM_ERRORS, TURN_DURATION, TURN_FIRST_EVENT, TURNS_CANCELLED,
    TURNS_COMPLETED, TURNS_FAILED, TURNS_STARTED,
};
use crate::progress::{ProgressStep, ProgressTracker};
use crate::render::SessionObserver;
use crate::sse::{FrameDecoder, decode_blocks};
use crate::transport::{ChatRequest, Transport};
use crate::{Error, Result};

/// Where the conversation stands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// No turn in flight and nothing pending.
    #[default]
    Idle,
    /// A turn is streaming.
    Streaming,
    /// An interrupt is waiting for the user's answer.
    AwaitingInput,
}

/// How a driven turn ended, when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream ended or hit its terminator.
    Completed,
    /// The turn was cancelled or superseded.
    Cancelled,
    /// The command was a no-op (blank input); no turn was opened.
    Ignored,
}

/// A turn that has been opened but not yet streamed.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedTurn {
    /// The turn's generation.
    pub generation: Generation,
    /// The body to send.
    pub request: ChatRequest,
}

/// What [`Session::apply_event`] did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventDisposition {
    /// The event changed session state.
    Applied,
    /// The event's generation is no longer live; nothing changed.
    Stale,
    /// The stream's terminator; stop reading.
    Terminate,
}

/// Counters over the life of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages in the transcript.
    pub message_count: usize,
    /// Turns opened.
    pub turns_started: u64,
    /// Turns that ended normally.
    pub turns_completed: u64,
    /// Turns cancelled or superseded.
    pub turns_cancelled: u64,
    /// Turns that failed in transport.
    pub turns_failed: u64,
    /// Events applied to the session.
    pub events_applied: u64,
    /// Events dropped because their turn was no longer live.
    pub stale_events: u64,
}

#[derive(Debug)]
struct ActiveTurn {
    generation: Generation,
    reply: Option<MessageId>,
    started: Instant,
    first_event_seen: bool,
}

/// A single conversation.
pub struct Session {
    config: EngineConfig,
    tracker: RequestTracker,
    messages: Vec<Message>,
    state: SessionState,
    progress: ProgressTracker,
    progress_visible: bool,
    anchor: Option<MessageId>,
    pending: Option<MessageId>,
    turn: Option<ActiveTurn>,
    stats: SessionStats,
    logger: Option<Arc<dyn EventLogger>>,
}

impl Session {
    /// Creates a session whose transcript holds only the greeting.
    pub fn new(config: EngineConfig) -> Self {
        let progress = ProgressTracker::new(config.progress_steps.clone());
        let greeting = Message::assistant(config.greeting.clone());
        Self {
            config,
            tracker: RequestTracker::new(),
            messages: vec![greeting],
            state: SessionState::Idle,
            progress,
            progress_visible: false,
            anchor: None,
            pending: None,
            turn: None,
            stats: SessionStats::default(),
            logger: None,
        }
    }

    /// Attaches an event logger.
    pub fn with_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle that cancels the live turn from another task or thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.tracker.clone())
    }

    ////////////////////////////////////////// Queries //////////////////////////////////////////

    /// The transcript, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Looks up one message.
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    /// The conversation state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while a turn is in flight.
    pub fn is_streaming(&self) -> bool {
        self.turn.is_some()
    }

    /// True while a turn is in flight but no reply text has arrived.
    pub fn shows_typing_indicator(&self) -> bool {
        self.turn.as_ref().is_some_and(|turn| turn.reply.is_none())
    }

    /// The progress checklist.
    pub fn progress_steps(&self) -> &[ProgressStep] {
        self.progress.steps()
    }

    /// Whether the progress panel is shown.
    pub fn progress_visible(&self) -> bool {
        self.progress_visible
    }

    /// The message the progress panel is attached beneath.
    pub fn anchor(&self) -> Option<MessageId> {
        self.anchor
    }

    /// The interrupt awaiting an answer, if any.
    pub fn pending_interrupt(&self) -> Option<(MessageId, &Interrupt)> {
        let id = self.pending?;
        self.message(id)
            .and_then(Message::as_interrupt)
            .map(|interrupt| (id, interrupt))
    }

    /// The generation of the live turn, if one is in flight.
    pub fn current_generation(&self) -> Option<Generation> {
        self.turn.as_ref().map(|turn| turn.generation)
    }

    /// Session counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            message_count: self.messages.len(),
            ..self.stats.clone()
        }
    }

    //////////////////////////////////////// Transitions ////////////////////////////////////////

    /// Opens a turn for `text`.
    ///
    /// Returns `None` without touching anything when the trimmed text is
    /// empty.  Any turn still in flight is superseded first.
    pub fn begin_send(&mut self, text: &str) -> Option<PreparedTurn> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let message = Message::user(text);
        let anchor = message.id;
        self.messages.push(message);
        let request = ChatRequest::history(&self.messages);
        Some(self.open_turn(anchor, request))
    }

    /// Replaces the interrupt `interrupt_id` with a confirmation of `values`
    /// and opens a turn that resumes the conversation with them.
    pub fn begin_resume(
        &mut self,
        interrupt_id: MessageId,
        values: Map<String, Value>,
    ) -> Result<PreparedTurn> {
        let Some(index) = self.messages.iter().position(|message| {
            message.id == interrupt_id && message.kind() == MessageKind::InterruptRequest
        }) else {
            return Err(Error::validation(
                format!("no interrupt request with id {interrupt_id}"),
                Some("interrupt_id".to_string()),
            ));
        };
        let text = match self.messages[index].as_interrupt() {
            Some(interrupt) => confirmation_text(interrupt, &values),
            None => String::new(),
        };
        self.messages[index] = Message {
            id: interrupt_id,
            role: Role::User,
            content: MessageContent::Text(text),
            created_at: crate::utils::time::now(),
        };
        Ok(self.open_turn(interrupt_id, ChatRequest::resume(values)))
    }

    /// Applies one interpreted event of `generation`.
    ///
    /// Events of a generation that is no longer live are dropped.
    pub fn apply_event(&mut self, generation: Generation, event: &StreamEvent) -> EventDisposition {
        self.settle_cancelled_turn();
        let live = self.tracker.is_current(generation)
            && self
                .turn
                .as_ref()
                .is_some_and(|turn| turn.generation == generation);
        if !live {
            EVENTS_STALE.click();
            self.stats.stale_events += 1;
            if let Some(logger) = &self.logger {
                logger.log_stale(generation, event);
            }
            return EventDisposition::Stale;
        }
        if let Some(turn) = self.turn.as_mut()
            && !turn.first_event_seen
        {
            turn.first_event_seen = true;
            TURN_FIRST_EVENT.add(turn.started.elapsed().as_secs_f64());
        }
        if let Some(logger) = &self.logger {
            logger.log_event(generation, event);
        }
        match event {
            StreamEvent::Delta { text } | StreamEvent::Malformed { raw_text: text } => {
                self.append_reply(text);
            }
            StreamEvent::Progress(update) => {
                self.progress
                    .apply(&update.step_id, update.status, update.label.as_deref());
            }
            StreamEvent::Done => {
                self.progress_visible = false;
            }
            StreamEvent::Interrupt(interrupt) => {
                let message = Message::interrupt(interrupt.clone());
                self.anchor = Some(message.id);
                self.pending = Some(message.id);
                self.messages.push(message);
                self.state = SessionState::AwaitingInput;
            }
            StreamEvent::PortfolioResult(result) => {
                self.messages.push(Message::portfolio(result.clone()));
            }
            StreamEvent::Terminator => return EventDisposition::Terminate,
        }
        self.stats.events_applied += 1;
        EventDisposition::Applied
    }

    /// Ends `generation`'s turn normally.  Returns false if it was not live.
    ///
    /// The progress panel stays as it is; only a `Done` event hides it.  A
    /// turn cancelled through a [`CancelHandle`] is settled as cancelled.
    pub fn finish_turn(&mut self, generation: Generation) -> bool {
        self.settle_cancelled_turn();
        let Some(turn) = self.take_turn(generation) else {
            return false;
        };
        self.leave_streaming();
        self.stats.turns_completed += 1;
        TURNS_COMPLETED.click();
        TURN_DURATION.add(turn.started.elapsed().as_secs_f64());
        self.log_outcome(generation, "completed", None);
        true
    }

    /// Ends `generation`'s turn after a transport failure.  Returns false if
    /// it was not live.
    ///
    /// Whatever reply text already arrived stays in the transcript.
    pub fn fail_turn(&mut self, generation: Generation, error: &Error) -> bool {
        self.settle_cancelled_turn();
        let Some(turn) = self.take_turn(generation) else {
            return false;
        };
        self.leave_streaming();
        self.progress_visible = false;
        self.stats.turns_failed += 1;
        TURNS_FAILED.click();
        TURN_DURATION.add(turn.started.elapsed().as_secs_f64());
        self.log_outcome(generation, "failed", Some(&error.to_string()));
        true
    }

    /// Invalidates the live turn.  Returns true if one was in flight.
    ///
    /// A reply bubble that is still blank is filled with the cancellation
    /// placeholder.
    pub fn cancel(&mut self) -> bool {
        self.tracker.cancel();
        match self.turn.take() {
            Some(turn) => {
                self.settle_cancelled(turn);
                true
            }
            None => false,
        }
    }

    /// Settles a live turn whose generation a [`CancelHandle`] invalidated.
    /// Returns true if one was settled.
    pub fn settle_cancelled_turn(&mut self) -> bool {
        match self.turn.take() {
            Some(turn) if !self.tracker.is_current(turn.generation) => {
                self.settle_cancelled(turn);
                true
            }
            other => {
                self.turn = other;
                false
            }
        }
    }

    /// Cancels any live turn and restores the transcript to the greeting.
    pub fn reset(&mut self) {
        self.cancel();
        self.messages = vec![Message::assistant(self.config.greeting.clone())];
        self.state = SessionState::Idle;
        self.progress.rearm();
        self.progress_visible = false;
        self.anchor = None;
        self.pending = None;
    }

    ////////////////////////////////////////// Drivers //////////////////////////////////////////

    /// Sends `text` and streams the reply through `transport`.
    ///
    /// Blank text is ignored.  A transport failure is returned as `Err`
    /// after the session has been returned to a usable state; cancellation
    /// is reported as [`TurnOutcome::Cancelled`], never as an error.
    pub async fn send(
        &mut self,
        text: &str,
        transport: &dyn Transport,
        observer: &mut dyn SessionObserver,
    ) -> Result<TurnOutcome> {
        let Some(turn) = self.begin_send(text) else {
            return Ok(TurnOutcome::Ignored);
        };
        self.drive(turn, transport, observer).await
    }

    /// Answers the interrupt `interrupt_id` with `values` and streams the
    /// continuation through `transport`.
    pub async fn resolve_interrupt(
        &mut self,
        interrupt_id: MessageId,
        values: Map<String, Value>,
        transport: &dyn Transport,
        observer: &mut dyn SessionObserver,
    ) -> Result<TurnOutcome> {
        let turn = self.begin_resume(interrupt_id, values)?;
        self.drive(turn, transport, observer).await
    }

    /// Streams a prepared turn to its end.
    pub async fn drive(
        &mut self,
        turn: PreparedTurn,
        transport: &dyn Transport,
        observer: &mut dyn SessionObserver,
    ) -> Result<TurnOutcome> {
        let PreparedTurn {
            generation,
            request,
        } = turn;
        observer.on_turn_started(generation);
        let tracker = self.tracker.clone();

        let opened = tokio::select! {
            biased;
            _ = tracker.superseded(generation) => None,
            opened = transport.open(&request) => Some(opened),
        };
        let bytes = match opened {
            None => return Ok(self.settle_superseded(observer)),
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => return Err(self.abort_turn(generation, err, observer)),
        };

        let decoder = FrameDecoder::with_limit(self.config.max_frame_bytes);
        let mut interpreter = EventInterpreter::new(self.config.skip_space_handshake);
        let mut blocks =
            std::pin::pin!(decode_blocks(bytes, decoder, self.config.flush_trailing_block));

        loop {
            let next = tokio::select! {
                biased;
                _ = tracker.superseded(generation) => None,
                next = blocks.next() => Some(next),
            };
            let block = match next {
                None => return Ok(self.settle_superseded(observer)),
                Some(None) => break,
                Some(Some(Ok(block))) => block,
                Some(Some(Err(err))) => {
                    STREAM_ERRORS.click();
                    return Err(self.abort_turn(generation, err, observer));
                }
            };
            if let Some(logger) = &self.logger {
                logger.log_block(generation, &block);
            }
            let interpretation = interpreter.interpret(&block);
            let mut terminated = interpretation.terminated;
            for event in &interpretation.events {
                match self.apply_event(generation, event) {
                    EventDisposition::Applied => self.notify(observer, event),
                    EventDisposition::Stale => {
                        return Ok(self.settle_superseded(observer));
                    }
                    EventDisposition::Terminate => {
                        terminated = true;
                        break;
                    }
                }
            }
            if terminated {
                break;
            }
        }

        if !self.finish_turn(generation) {
            return Ok(self.settle_superseded(observer));
        }
        observer.on_turn_finished();
        Ok(TurnOutcome::Completed)
    }

    ///////////////////////////////////////// Transcripts /////////////////////////////////////////

    /// Saves the transcript to the specified path.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let transcript = TranscriptFile::new(&self.messages);
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &transcript).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })
    }

    /// Loads a transcript from disk, replacing the current conversation.
    ///
    /// Any live turn is cancelled.  A transcript that ends in an interrupt
    /// request leaves the session awaiting input.
    pub fn load_transcript_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())
            .map_err(|err| Error::io("failed to open transcript file", err))?;
        let reader = BufReader::new(file);
        let transcript: TranscriptFile = from_reader(reader).map_err(|err| {
            Error::serialization("failed to parse transcript", Some(Box::new(err)))
        })?;
        if transcript.version != TRANSCRIPT_VERSION {
            return Err(Error::validation(
                format!("unsupported transcript version {}", transcript.version),
                Some("version".to_string()),
            ));
        }
        self.cancel();
        self.messages = transcript.messages;
        self.pending = self
            .messages
            .last()
            .filter(|message| message.kind() == MessageKind::InterruptRequest)
            .map(|message| message.id);
        self.anchor = self.pending;
        self.state = if self.pending.is_some() {
            SessionState::AwaitingInput
        } else {
            SessionState::Idle
        };
        self.progress.rearm();
        self.progress_visible = false;
        Ok(())
    }

    ////////////////////////////////////////// Internals //////////////////////////////////////////

    fn open_turn(&mut self, anchor: MessageId, request: ChatRequest) -> PreparedTurn {
        if let Some(previous) = self.turn.take() {
            self.settle_cancelled(previous);
        }
        let generation = self.tracker.begin_turn();
        self.anchor = Some(anchor);
        self.pending = None;
        self.progress.rearm();
        self.progress_visible = true;
        self.state = SessionState::Streaming;
        self.turn = Some(ActiveTurn {
            generation,
            reply: None,
            started: Instant::now(),
            first_event_seen: false,
        });
        self.stats.turns_started += 1;
        TURNS_STARTED.click();
        if let Some(logger) = &self.logger {
            logger.log_request(generation, &request);
        }
        PreparedTurn {
            generation,
            request,
        }
    }

    fn take_turn(&mut self, generation: Generation) -> Option<ActiveTurn> {
        if self
            .turn
            .as_ref()
            .is_some_and(|turn| turn.generation == generation)
            && self.tracker.is_current(generation)
        {
            self.turn.take()
        } else {
            None
        }
    }

    fn leave_streaming(&mut self) {
        if self.state == SessionState::Streaming {
            self.state = SessionState::Idle;
        }
    }

    fn settle_cancelled(&mut self, turn: ActiveTurn) {
        let placeholder = self.config.cancel_placeholder.clone();
        if let Some(reply_id) = turn.reply
            && let Some(reply) = self.message_mut(reply_id)
            && reply.text().is_some_and(|text| text.trim().is_empty())
        {
            reply.content = MessageContent::Text(placeholder);
        }
        self.leave_streaming();
        self.progress_visible = false;
        self.stats.turns_cancelled += 1;
        TURNS_CANCELLED.click();
        TURN_DURATION.add(turn.started.elapsed().as_secs_f64());
        self.log_outcome(turn.generation, "cancelled", None);
    }

    /// Bookkeeping for a turn whose generation was invalidated from outside.
    fn settle_superseded(&mut self, observer: &mut dyn SessionObserver) -> TurnOutcome {
        self.settle_cancelled_turn();
        observer.on_turn_cancelled();
        TurnOutcome::Cancelled
    }

    fn abort_turn(
        &mut self,
        generation: Generation,
        error: Error,
        observer: &mut dyn SessionObserver,
    ) -> Error {
        self.fail_turn(generation, &error);
        observer.on_turn_failed(&error);
        error
    }

    fn append_reply(&mut self, text: &str) {
        let reply_id = self.turn.as_ref().and_then(|turn| turn.reply);
        if let Some(id) = reply_id
            && let Some(reply) = self.message_mut(id)
        {
            reply.push_text(text);
            return;
        }
        let reply = Message::assistant(text);
        if let Some(turn) = self.turn.as_mut() {
            turn.reply = Some(reply.id);
        }
        self.messages.push(reply);
    }

    fn notify(&self, observer: &mut dyn SessionObserver, event: &StreamEvent) {
        match event {
            StreamEvent::Delta { text } | StreamEvent::Malformed { raw_text: text } => {
                observer.on_delta(text)
            }
            StreamEvent::Progress(update) => observer.on_progress(update, self.progress.steps()),
            StreamEvent::Interrupt(interrupt) => {
                if let Some(id) = self.pending {
                    observer.on_interrupt(id, interrupt);
                }
            }
            StreamEvent::PortfolioResult(result) => observer.on_portfolio_result(result),
            StreamEvent::Done => observer.on_done(),
            StreamEvent::Terminator => {}
        }
    }

    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    fn log_outcome(&self, generation: Generation, outcome: &str, error: Option<&str>) {
        if let Some(logger) = &self.logger {
            logger.log_outcome(generation, outcome, error);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

const TRANSCRIPT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct TranscriptFile {
    version: u8,
    messages: Vec<Message>,
}

impl TranscriptFile {
    fn new(messages: &[Message]) -> Self {
        Self {
            version: TRANSCRIPT_VERSION,
            messages: messages.to_vec(),
        }
    }
}
