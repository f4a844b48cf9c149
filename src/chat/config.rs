//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! configuration the REPL runs with.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::Result;
use crate::config::EngineConfig;
use crate::transport::{HttpTransport, MockTransport, Transport};

/// Default delay between mock chunks.
const DEFAULT_MOCK_DELAY_MS: u64 = 45;

/// Command-line arguments for the chatterbox-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Streaming endpoint to POST turns to.
    #[arrrg(optional, "Streaming endpoint URL (default: built-in mock)", "URL")]
    pub endpoint: Option<String>,

    /// Answer locally even when an endpoint is given.
    #[arrrg(flag, "Use the built-in mock server")]
    pub mock: bool,

    /// Delay between mock chunks.
    #[arrrg(optional, "Delay between mock chunks in milliseconds (default: 45)", "MS")]
    pub mock_delay_ms: Option<u64>,

    /// Connection timeout.
    #[arrrg(optional, "Connection timeout in seconds (default: 30)", "SECS")]
    pub timeout_secs: Option<u64>,

    /// Engine configuration file.
    #[arrrg(optional, "YAML engine configuration file", "PATH")]
    pub config: Option<String>,

    /// File to append JSON-lines event records to.
    #[arrrg(optional, "Append every stream event to this file as JSON lines", "PATH")]
    pub log_events: Option<String>,

    /// Discard the first single-space delta of each reply.
    #[arrrg(flag, "Treat the first single-space delta as a handshake")]
    pub skip_handshake: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for a chat run.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Endpoint to stream from; `None` selects the mock.
    pub endpoint: Option<String>,

    /// Delay between mock chunks.
    pub mock_delay: Duration,

    /// Connection timeout for the HTTP transport.
    pub connect_timeout: Option<Duration>,

    /// Session engine settings.
    pub engine: EngineConfig,

    /// Where to log stream events, if anywhere.
    pub event_log: Option<PathBuf>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Transport: mock
    /// - Color: enabled
    /// - Event log: disabled
    pub fn new() -> Self {
        Self {
            endpoint: None,
            mock_delay: Duration::from_millis(DEFAULT_MOCK_DELAY_MS),
            connect_timeout: None,
            engine: EngineConfig::new(),
            event_log: None,
            use_color: true,
        }
    }

    /// Resolves command-line arguments, loading the engine configuration
    /// file when one is named.
    pub fn from_args(args: ChatArgs) -> Result<Self> {
        let mut engine = match &args.config {
            Some(path) => EngineConfig::from_yaml_file(path)?,
            None => EngineConfig::new(),
        };
        if args.skip_handshake {
            engine.skip_space_handshake = true;
        }
        let endpoint = if args.mock { None } else { args.endpoint };
        Ok(ChatConfig {
            endpoint,
            mock_delay: Duration::from_millis(args.mock_delay_ms.unwrap_or(DEFAULT_MOCK_DELAY_MS)),
            connect_timeout: args.timeout_secs.map(Duration::from_secs),
            engine,
            event_log: args.log_events.map(PathBuf::from),
            use_color: !args.no_color,
        })
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// True when turns are answered by the built-in mock.
    pub fn uses_mock(&self) -> bool {
        self.endpoint.is_none()
    }

    /// Builds the transport this configuration selects.
    pub fn transport(&self) -> Result<Box<dyn Transport>> {
        match &self.endpoint {
            Some(endpoint) => Ok(Box::new(HttpTransport::new(
                endpoint,
                self.connect_timeout,
            )?)),
            None => {
                let steps = self
                    .engine
                    .progress_steps
                    .iter()
                    .map(|step| step.id.clone())
                    .collect();
                Ok(Box::new(
                    MockTransport::new(self.mock_delay).with_progress_steps(steps),
                ))
            }
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}
