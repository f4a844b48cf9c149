//! Logging hooks for stream traffic.
//!
//! This module provides the [`EventLogger`] trait that captures everything a
//! [`crate::Session`] sends and receives: outbound requests, raw event
//! blocks, interpreted events, stale events that were dropped, and the
//! outcome of every turn.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde_json::{Value, json};

use crate::events::StreamEvent;
use crate::generation::Generation;
use crate::transport::ChatRequest;
use crate::{Error, Result};

/// A trait for logging session traffic.
///
/// All hooks default to doing nothing; implement the ones you care about.
///
/// # Example
///
/// ```rust,ignore
/// use chatterbox::{EventLogger, Generation, StreamEvent};
///
/// struct StderrLogger;
///
/// impl EventLogger for StderrLogger {
///     fn log_event(&self, generation: Generation, event: &StreamEvent) {
///         eprintln!("{generation}: {}", event.name());
///     }
/// }
/// ```
pub trait EventLogger: Send + Sync {
    /// Called once per turn before the request is sent.
    fn log_request(&self, generation: Generation, request: &ChatRequest) {
        _ = generation;
        _ = request;
    }

    /// Called for every complete event block, before interpretation.
    fn log_block(&self, generation: Generation, block: &str) {
        _ = generation;
        _ = block;
    }

    /// Called for every event that was applied to the session.
    fn log_event(&self, generation: Generation, event: &StreamEvent) {
        _ = generation;
        _ = event;
    }

    /// Called for an event dropped because its turn is no longer current.
    fn log_stale(&self, generation: Generation, event: &StreamEvent) {
        _ = generation;
        _ = event;
    }

    /// Called when a turn ends, with a short outcome label and optional
    /// error text.
    fn log_outcome(&self, generation: Generation, outcome: &str, error: Option<&str>) {
        _ = generation;
        _ = outcome;
        _ = error;
    }
}

/// Writes one JSON object per line for every hook.
pub struct JsonLinesLogger {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesLogger {
    /// Opens `path` for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| Error::io(format!("failed to open {}", path.display()), err))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write(&self, record: Value) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        if serde_json::to_writer(&mut *writer, &record).is_ok() {
            let _ = writer.write_all(b"\n");
            let _ = writer.flush();
        }
    }
}

impl EventLogger for JsonLinesLogger {
    fn log_request(&self, generation: Generation, request: &ChatRequest) {
        self.write(json!({
            "generation": generation.get(),
            "request": request,
        }));
    }

    fn log_block(&self, generation: Generation, block: &str) {
        self.write(json!({
            "generation": generation.get(),
            "block": block,
        }));
    }

    fn log_event(&self, generation: Generation, event: &StreamEvent) {
        self.write(json!({
            "generation": generation.get(),
            "applied": event,
        }));
    }

    fn log_stale(&self, generation: Generation, event: &StreamEvent) {
        self.write(json!({
            "generation": generation.get(),
            "stale": event,
        }));
    }

    fn log_outcome(&self, generation: Generation, outcome: &str, error: Option<&str>) {
        self.write(json!({
            "generation": generation.get(),
            "outcome": outcome,
            "error": error,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::RequestTracker;

    #[test]
    fn writes_one_line_per_record() {
        let path = std::env::temp_dir().join(format!(
            "chatterbox-events-{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let generation = RequestTracker::new().begin_turn();
        {
            let logger = JsonLinesLogger::open(&path).unwrap();
            logger.log_block(generation, "data: {\"delta\":\"Hi\"}");
            logger.log_event(
                generation,
                &StreamEvent::Delta {
                    text: "Hi".to_string(),
                },
            );
            logger.log_outcome(generation, "completed", None);
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["block"], json!("data: {\"delta\":\"Hi\"}"));
        assert_eq!(lines[1]["applied"]["event"], json!("delta"));
        assert_eq!(lines[2]["outcome"], json!("completed"));
        assert_eq!(lines[2]["generation"], json!(1));
        let _ = std::fs::remove_file(&path);
    }
}
