//! Interactive chat application over a server-pushed event stream.
//!
//! This binary provides a streaming REPL on top of the chatterbox session
//! engine.  Without an endpoint it answers from a built-in mock.
//!
//! # Usage
//!
//! ```bash
//! # Talk to the built-in mock
//! chatterbox-chat
//!
//! # Talk to a real endpoint
//! chatterbox-chat --endpoint http://localhost:8000/chat/stream
//!
//! # Load engine settings and keep an event log
//! chatterbox-chat --config engine.yaml --log-events events.jsonl
//!
//! # Disable colors (useful for piping output)
//! chatterbox-chat --no-color
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/resume` - Answer a pending question
//! - `/clear` - Start over
//! - `/quit` - Exit the application

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::{Map, Value};

use chatterbox::chat::{ChatArgs, ChatCommand, ChatConfig, help_text, parse_command};
use chatterbox::format::{input_text, parse_field_input};
use chatterbox::{
    Interrupt, JsonLinesLogger, PlainTextRenderer, Session, SessionState, Transport, TurnOutcome,
};

/// Main entry point for the chatterbox-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("chatterbox-chat [OPTIONS]");
    let config = ChatConfig::from_args(args)?;
    let transport = config.transport()?;

    let mut session = Session::new(config.engine.clone());
    if let Some(path) = &config.event_log {
        session = session.with_logger(Arc::new(JsonLinesLogger::open(path)?));
    }
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    // Ctrl+C while a reply streams cancels the turn; at the prompt the
    // line editor reports it instead.
    let cancel = session.cancel_handle();
    ctrlc::set_handler(move || cancel.cancel())?;

    match &config.endpoint {
        Some(endpoint) => println!("chatterbox chat (endpoint: {endpoint})"),
        None => println!("chatterbox chat (mock server)"),
    }
    println!("Type /help for commands, /quit to exit\n");
    for message in session.messages() {
        renderer.print_message(message);
    }

    loop {
        let prompt = match session.state() {
            SessionState::AwaitingInput => "You (/resume to answer): ",
            _ => "You: ",
        };
        let readline = rl.readline(prompt);

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            session.reset();
                            renderer.print_info("Conversation cleared.");
                            for message in session.messages() {
                                renderer.print_message(message);
                            }
                        }
                        ChatCommand::Resume => {
                            resume(&mut session, &mut rl, transport.as_ref(), &mut renderer)
                                .await;
                        }
                        ChatCommand::Progress => {
                            renderer.print_progress(session.progress_steps());
                            if !session.progress_visible() {
                                renderer.print_info("(progress panel hidden)");
                            }
                        }
                        ChatCommand::History => {
                            for message in session.messages() {
                                renderer.print_message(message);
                            }
                        }
                        ChatCommand::Stats => {
                            print_stats(&session);
                        }
                        ChatCommand::SaveTranscript(path) => {
                            match session.save_transcript_to(&path) {
                                Ok(_) => {
                                    renderer.print_info(&format!("Transcript saved to {}", path))
                                }
                                Err(err) => renderer
                                    .print_error(&format!("Failed to save transcript: {}", err)),
                            }
                        }
                        ChatCommand::LoadTranscript(path) => {
                            match session.load_transcript_from(&path) {
                                Ok(_) => {
                                    renderer.print_info(&format!("Transcript loaded from {}", path))
                                }
                                Err(err) => renderer
                                    .print_error(&format!("Failed to load transcript: {}", err)),
                            }
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                let result = session.send(line, transport.as_ref(), &mut renderer).await;
                report(result, &mut renderer);
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

/// Walks the pending interrupt's fields and resumes with the answers.
async fn resume(
    session: &mut Session,
    rl: &mut DefaultEditor,
    transport: &dyn Transport,
    renderer: &mut PlainTextRenderer,
) {
    let Some((interrupt_id, interrupt)) = session.pending_interrupt() else {
        renderer.print_info("Nothing is waiting for an answer.");
        return;
    };
    let interrupt = interrupt.clone();
    match prompt_values(rl, &interrupt) {
        Ok(Some(values)) => {
            let result = session
                .resolve_interrupt(interrupt_id, values, transport, renderer)
                .await;
            report(result, renderer);
        }
        Ok(None) => renderer.print_info("Answer abandoned."),
        Err(err) => renderer.print_error(&format!("Input error: {}", err)),
    }
}

/// Prompts for every field, pre-filled with the proposed value.
///
/// Returns `None` if the user pressed Ctrl+C or Ctrl+D part way through.
fn prompt_values(
    rl: &mut DefaultEditor,
    interrupt: &Interrupt,
) -> Result<Option<Map<String, Value>>, ReadlineError> {
    if !interrupt.message.is_empty() {
        println!("{}", interrupt.message);
    }
    let mut values = interrupt.proposed_values();
    for field in &interrupt.fields {
        let initial = input_text(&field.value);
        let prompt = format!("  {}: ", field.display_label());
        match rl.readline_with_initial(&prompt, (initial.as_str(), "")) {
            Ok(answer) => {
                values.insert(
                    field.name.clone(),
                    parse_field_input(field.field_type, &answer),
                );
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(None),
            Err(err) => return Err(err),
        }
    }
    Ok(Some(values))
}

/// Prints errors the renderer has not already shown.
fn report(result: chatterbox::Result<TurnOutcome>, renderer: &mut PlainTextRenderer) {
    if let Err(err) = result
        && !err.is_transport()
    {
        renderer.print_error(&err.to_string());
    }
}

fn print_stats(session: &Session) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Messages: {}", stats.message_count);
    println!("      State: {:?}", session.state());
    println!(
        "      Turns: {} started, {} completed, {} cancelled, {} failed",
        stats.turns_started, stats.turns_completed, stats.turns_cancelled, stats.turns_failed
    );
    println!("      Events applied: {}", stats.events_applied);
    println!("      Stale events dropped: {}", stats.stale_events);
}
