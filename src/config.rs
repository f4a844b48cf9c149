//! Engine configuration.
//!
//! Every knob that changes how a session frames, interprets, or presents a
//! stream lives here.  The struct deserializes from YAML with every field
//! optional, so a config file only needs to name what it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::progress::StepDefinition;
use crate::{Error, Result};

/// Greeting the transcript starts with.
pub const DEFAULT_GREETING: &str = "Hello! This is the chatbot demo. How can I help you?";

/// Text that fills an empty reply when its turn is cancelled.
pub const DEFAULT_CANCEL_PLACEHOLDER: &str = "(stopped)";

/// Configuration for a [`crate::Session`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The assistant message a fresh or reset transcript begins with.
    pub greeting: String,

    /// Replacement for a reply bubble that was still empty when cancelled.
    pub cancel_placeholder: String,

    /// Discard the first single-space delta of each stream.
    pub skip_space_handshake: bool,

    /// Deliver a final block that never saw its blank-line terminator.
    pub flush_trailing_block: bool,

    /// Upper bound on unterminated bytes buffered between chunks.
    pub max_frame_bytes: Option<usize>,

    /// The ordered progress-step catalogue.
    pub progress_steps: Vec<StepDefinition>,
}

impl EngineConfig {
    /// Creates a new EngineConfig with default values.
    ///
    /// Defaults:
    /// - Handshake skipping: disabled
    /// - Trailing blocks: dropped
    /// - Frame buffer: unbounded
    pub fn new() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            cancel_placeholder: DEFAULT_CANCEL_PLACEHOLDER.to_string(),
            skip_space_handshake: false,
            flush_trailing_block: false,
            max_frame_bytes: None,
            progress_steps: default_progress_steps(),
        }
    }

    /// Loads a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        Self::from_yaml_str(&content)
    }

    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_bytes == Some(0) {
            return Err(Error::config("max_frame_bytes must be positive"));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.progress_steps {
            if step.id.is_empty() {
                return Err(Error::config("progress step ids must not be empty"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(Error::config(format!(
                    "progress step {:?} is listed twice",
                    step.id
                )));
            }
        }
        Ok(())
    }

    /// Sets the greeting.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Sets the cancellation placeholder.
    pub fn with_cancel_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.cancel_placeholder = placeholder.into();
        self
    }

    /// Enables or disables the single-space handshake.
    pub fn with_space_handshake(mut self, skip: bool) -> Self {
        self.skip_space_handshake = skip;
        self
    }

    /// Enables or disables flushing an unterminated final block.
    pub fn with_trailing_flush(mut self, flush: bool) -> Self {
        self.flush_trailing_block = flush;
        self
    }

    /// Caps the frame buffer.
    pub fn with_max_frame_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    /// Replaces the progress catalogue.
    pub fn with_progress_steps(mut self, steps: Vec<StepDefinition>) -> Self {
        self.progress_steps = steps;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_progress_steps() -> Vec<StepDefinition> {
    vec![
        StepDefinition::new("understand", "Understanding the request"),
        StepDefinition::new("research", "Researching products"),
        StepDefinition::new("allocate", "Computing the allocation"),
        StepDefinition::new("summarize", "Summarizing"),
    ]
}
