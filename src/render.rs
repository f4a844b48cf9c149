//! Output rendering for streaming sessions.
//!
//! This module provides the [`SessionObserver`] trait a [`crate::Session`]
//! pushes committed changes into, and a plain-text terminal implementation.

use std::io::{self, Stdout, Write};

use crate::events::{Interrupt, PortfolioResult, ProgressUpdate};
use crate::format::{format_amount, format_field_value};
use crate::generation::Generation;
use crate::message::{Message, MessageContent, MessageId, Role};
use crate::progress::{ProgressStep, StepState};
use crate::Error;

/// ANSI escape code for dim text (used for progress and timestamps).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for interrupt forms).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for green text (used for the user label and results).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

///////////////////////////////////////// Observer /////////////////////////////////////////

/// Receives every change a session commits while driving a turn.
///
/// Hooks fire only for events of the live generation; stale events never
/// reach an observer.  Every hook defaults to doing nothing.
pub trait SessionObserver: Send {
    /// A turn was opened.
    fn on_turn_started(&mut self, generation: Generation) {
        _ = generation;
    }

    /// Reply text was appended.
    fn on_delta(&mut self, text: &str) {
        _ = text;
    }

    /// A progress step changed; `steps` is the whole checklist afterwards.
    fn on_progress(&mut self, update: &ProgressUpdate, steps: &[ProgressStep]) {
        _ = update;
        _ = steps;
    }

    /// The server paused for input; `message_id` names the new message.
    fn on_interrupt(&mut self, message_id: MessageId, interrupt: &Interrupt) {
        _ = message_id;
        _ = interrupt;
    }

    /// A portfolio result was appended.
    fn on_portfolio_result(&mut self, result: &PortfolioResult) {
        _ = result;
    }

    /// The server reported it is done with this turn.
    fn on_done(&mut self) {}

    /// The turn was cancelled.
    fn on_turn_cancelled(&mut self) {}

    /// The turn failed in transport.
    fn on_turn_failed(&mut self, error: &Error) {
        _ = error;
    }

    /// The turn's stream ended normally.
    fn on_turn_finished(&mut self) {}
}

impl SessionObserver for () {}

///////////////////////////////////////// Plain text /////////////////////////////////////////

/// Plain text renderer with optional ANSI styling.
///
/// This renderer outputs text directly to stdout, streaming reply text as it
/// arrives and printing progress, interrupts, and results on their own lines.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    line_start: bool,
    in_reply: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            line_start: true,
            in_reply: false,
        }
    }

    /// Prints an informational line.
    pub fn print_info(&mut self, info: &str) {
        self.end_line();
        println!("{info}");
        self.flush();
    }

    /// Prints an error line to stderr.
    pub fn print_error(&mut self, error: &str) {
        self.end_line();
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    /// Prints one transcript message in full.
    pub fn print_message(&mut self, message: &Message) {
        self.end_line();
        let stamp = self.dim(&format!("[{}]", message.clock_label()));
        let label = self.role_label(message.role);
        match &message.content {
            MessageContent::Text(text) => println!("{stamp} {label} {text}"),
            MessageContent::InterruptRequest(interrupt) => {
                println!("{stamp} {label}");
                self.write_block(&interrupt_form(interrupt));
            }
            MessageContent::PortfolioResult(result) => {
                println!("{stamp} {label}");
                self.write_block(&portfolio_card(result));
            }
        }
        self.flush();
    }

    /// Prints the progress checklist.
    pub fn print_progress(&mut self, steps: &[ProgressStep]) {
        self.end_line();
        for step in steps {
            let line = progress_line(step);
            println!("{}", self.dim(&line));
        }
        self.flush();
    }

    fn role_label(&self, role: Role) -> String {
        let (color, label) = match role {
            Role::User => (ANSI_GREEN, "you>"),
            Role::Assistant => (ANSI_CYAN, "assistant>"),
        };
        if self.use_color {
            format!("{color}{label}{ANSI_RESET}")
        } else {
            label.to_string()
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.use_color {
            format!("{ANSI_DIM}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn write_block(&mut self, block: &str) {
        if self.use_color {
            println!("{ANSI_YELLOW}{block}{ANSI_RESET}");
        } else {
            println!("{block}");
        }
        self.line_start = true;
    }

    fn end_line(&mut self) {
        if !self.line_start {
            println!();
            self.line_start = true;
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionObserver for PlainTextRenderer {
    fn on_turn_started(&mut self, _: Generation) {
        self.in_reply = false;
    }

    fn on_delta(&mut self, text: &str) {
        if !self.in_reply {
            self.end_line();
            print!("{} ", self.role_label(Role::Assistant));
            self.in_reply = true;
        }
        print!("{text}");
        self.line_start = text.ends_with('\n');
        self.flush();
    }

    fn on_progress(&mut self, update: &ProgressUpdate, steps: &[ProgressStep]) {
        let Some(step) = steps.iter().find(|step| step.id == update.step_id) else {
            return;
        };
        self.end_line();
        println!("{}", self.dim(&progress_line(step)));
        self.in_reply = false;
        self.flush();
    }

    fn on_interrupt(&mut self, _: MessageId, interrupt: &Interrupt) {
        self.end_line();
        self.write_block(&interrupt_form(interrupt));
        println!("{}", self.dim("(type /resume to answer)"));
        self.in_reply = false;
        self.flush();
    }

    fn on_portfolio_result(&mut self, result: &PortfolioResult) {
        self.end_line();
        self.write_block(&portfolio_card(result));
        self.in_reply = false;
        self.flush();
    }

    fn on_turn_cancelled(&mut self) {
        self.end_line();
        println!("{}", self.dim("[stopped]"));
        self.flush();
    }

    fn on_turn_failed(&mut self, error: &Error) {
        self.print_error(&error.to_string());
    }

    fn on_turn_finished(&mut self) {
        self.end_line();
        self.flush();
    }
}

/// One checklist row, e.g. `[~] Researching products`.
pub fn progress_line(step: &ProgressStep) -> String {
    let mark = match step.state {
        StepState::Idle => ' ',
        StepState::Running => '~',
        StepState::Done => 'x',
    };
    format!("[{mark}] {}", step.label)
}

/// The interrupt's question followed by one `label: value` line per field.
pub fn interrupt_form(interrupt: &Interrupt) -> String {
    let mut lines = Vec::with_capacity(interrupt.fields.len() + 1);
    if !interrupt.message.is_empty() {
        lines.push(interrupt.message.clone());
    }
    for field in &interrupt.fields {
        lines.push(format!(
            "  {}: {}",
            field.display_label(),
            format_field_value(field.field_type, &field.value)
        ));
    }
    lines.join("\n")
}

/// A portfolio result as a small text card.
pub fn portfolio_card(result: &PortfolioResult) -> String {
    let mut lines = vec![
        format!("  Product: {}", result.financial_product_name),
        format!("  Stock: {}", result.stock_name),
    ];
    if let Some(percent) = result.allocation_percent {
        lines.push(format!("  Allocation: {}%", format_amount(percent)));
    }
    if let Some(total) = result.total_amount {
        lines.push(format!("  Total: {}", format_amount(total)));
    }
    lines.join("\n")
}
