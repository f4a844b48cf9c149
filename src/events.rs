//! Typed stream events and the interpreter that produces them.
//!
//! Each event block carries one or more `data:` lines.  A payload is either
//! the `[DONE]` sentinel or JSON; JSON objects with a `kind` discriminant
//! become structured events and everything else is treated as reply text.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::observability::{
    EVENTS_DELTA, EVENTS_DONE, EVENTS_INTERRUPT, EVENTS_MALFORMED, EVENTS_PORTFOLIO,
    EVENTS_PROGRESS, EVENTS_SUPPRESSED,
};
use crate::progress::StepState;

/// Payload that ends the stream.
pub const TERMINATOR: &str = "[DONE]";

/// Field marker that introduces a payload line.
pub const DATA_FIELD: &str = "data:";

/// Replacement for single-space deltas so the space survives rendering.
pub const NON_BREAKING_SPACE: char = '\u{00A0}';

/// Key of the framework-style "paused for interrupt" envelope.
pub const PAUSED_ENVELOPE: &str = "__interrupt__";

///////////////////////////////////////////// Events ////////////////////////////////////////////

/// A progress report for one named step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// The step being reported on.
    #[serde(rename = "id", alias = "stepId", alias = "step_id", alias = "step")]
    pub step_id: String,
    /// The step's new state.
    pub status: StepState,
    /// A replacement label, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// How an interrupt field's value should be treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Numeric input, displayed with digit grouping.
    #[serde(alias = "integer", alias = "float", alias = "currency", alias = "amount")]
    Number,
    /// Free text.
    #[default]
    #[serde(alias = "string")]
    Text,
    /// Any other declared type; rendered as plain text.
    #[serde(other)]
    Other,
}

/// One input the server asks the user to confirm or edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterruptField {
    /// Key used in the resume request.
    pub name: String,
    /// Human-facing label.
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    /// Declared type; absent or null means text.
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub field_type: FieldType,
    /// The value the server proposes.
    #[serde(
        default,
        alias = "proposed",
        alias = "proposedValue",
        alias = "default"
    )]
    pub value: Value,
}

impl InterruptField {
    /// The label to show, falling back to the field name.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }
}

/// A server-requested pause for structured user input.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Text explaining what is being asked.
    #[serde(
        default,
        alias = "question",
        alias = "prompt",
        alias = "text",
        deserialize_with = "null_as_default"
    )]
    pub message: String,
    /// The requested inputs, in display order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<InterruptField>,
}

impl Interrupt {
    /// True when the interrupt asks nothing and says nothing.
    pub fn is_empty(&self) -> bool {
        self.message.trim().is_empty() && self.fields.is_empty()
    }

    /// The server-proposed values keyed by field name, in field order.
    pub fn proposed_values(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|field| (field.name.clone(), field.value.clone()))
            .collect()
    }
}

/// A structured portfolio recommendation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioResult {
    /// Name of the financial product.
    #[serde(default, deserialize_with = "null_as_default")]
    pub financial_product_name: String,
    /// Name of the underlying stock.
    #[serde(default, deserialize_with = "null_as_default")]
    pub stock_name: String,
    /// Share of the total allocated, in percent.
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub allocation_percent: Option<f64>,
    /// Total amount invested.
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_amount: Option<f64>,
}

/// Reads `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads a number that may arrive as JSON number, as a string with group
/// separators, or as `null`.  Anything unreadable is treated as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text
            .trim()
            .chars()
            .filter(|c| *c != ',')
            .collect::<String>()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite()),
        _ => None,
    })
}

/// One interpreted unit of the event stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Reply text to append.
    Delta {
        /// The text.
        text: String,
    },
    /// A progress-step update.
    Progress(ProgressUpdate),
    /// The server paused for user input.
    Interrupt(Interrupt),
    /// A structured portfolio result.
    PortfolioResult(PortfolioResult),
    /// The server finished its work for this turn.
    Done,
    /// The stream's end sentinel.
    Terminator,
    /// A payload that was not JSON; applied as reply text.
    Malformed {
        /// The payload, verbatim.
        raw_text: String,
    },
}

impl StreamEvent {
    /// Returns the text this event appends to the reply, if any.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            StreamEvent::Delta { text } => Some(text),
            StreamEvent::Malformed { raw_text } => Some(raw_text),
            _ => None,
        }
    }

    /// A short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::Progress(_) => "progress",
            StreamEvent::Interrupt(_) => "interrupt",
            StreamEvent::PortfolioResult(_) => "portfolio_result",
            StreamEvent::Done => "done",
            StreamEvent::Terminator => "terminator",
            StreamEvent::Malformed { .. } => "malformed",
        }
    }
}

/////////////////////////////////////////// Envelopes ///////////////////////////////////////////

/// The shapes an interrupt can arrive in.
#[derive(Clone, Copy, Debug, PartialEq)]
enum InterruptEnvelope<'a> {
    /// `{"interrupt": value}`
    Bare(&'a Value),
    /// `{"kind": "interrupt", "payload": value}`
    Payload(&'a Value),
    /// `{"__interrupt__": [{"value": value, ...}]}`, possibly without the
    /// array or the `value` wrapper.
    Paused(&'a Value),
    /// `{"kind": "interrupt"}` with nothing attached.
    Missing,
}

impl<'a> InterruptEnvelope<'a> {
    fn detect(kind: Option<&str>, obj: &'a Map<String, Value>) -> Option<Self> {
        if kind == Some("interrupt") {
            return Some(
                obj.get("payload")
                    .map(InterruptEnvelope::Payload)
                    .or_else(|| obj.get("interrupt").map(InterruptEnvelope::Bare))
                    .or_else(|| obj.get(PAUSED_ENVELOPE).map(InterruptEnvelope::Paused))
                    .unwrap_or(InterruptEnvelope::Missing),
            );
        }
        if let Some(value) = obj.get("interrupt") {
            return Some(InterruptEnvelope::Bare(value));
        }
        obj.get(PAUSED_ENVELOPE).map(InterruptEnvelope::Paused)
    }

    fn value(self) -> Option<&'a Value> {
        match self {
            InterruptEnvelope::Bare(value) | InterruptEnvelope::Payload(value) => Some(value),
            InterruptEnvelope::Paused(value) => {
                let value = match value {
                    Value::Array(items) if items.len() == 1 => &items[0],
                    Value::Array(_) => return None,
                    other => other,
                };
                match value {
                    Value::Object(wrapper) if wrapper.contains_key("value") => {
                        wrapper.get("value")
                    }
                    other => Some(other),
                }
            }
            InterruptEnvelope::Missing => None,
        }
    }
}

fn normalize_interrupt(value: &Value) -> Option<Interrupt> {
    let interrupt = match value {
        Value::Object(_) => serde_json::from_value::<Interrupt>(value.clone()).ok()?,
        Value::String(message) => Interrupt {
            message: message.clone(),
            fields: Vec::new(),
        },
        Value::Array(_) => Interrupt {
            message: String::new(),
            fields: serde_json::from_value(value.clone()).ok()?,
        },
        _ => return None,
    };
    if interrupt.is_empty() {
        None
    } else {
        Some(interrupt)
    }
}

////////////////////////////////////////// Interpreter //////////////////////////////////////////

/// The events decoded from one block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Interpretation {
    /// Events in wire order.
    pub events: Vec<StreamEvent>,
    /// True when the terminator was seen; no further blocks should be read.
    pub terminated: bool,
}

/// Turns event blocks into typed events.
///
/// One interpreter serves one stream: it remembers whether the single-space
/// handshake has been consumed and whether the terminator has been seen.
#[derive(Clone, Debug, Default)]
pub struct EventInterpreter {
    skip_space_handshake: bool,
    handshake_seen: bool,
    terminated: bool,
}

impl EventInterpreter {
    /// Creates an interpreter.  When `skip_space_handshake` is set, the first
    /// single-space delta of the stream is discarded.
    pub fn new(skip_space_handshake: bool) -> Self {
        Self {
            skip_space_handshake,
            ..Self::default()
        }
    }

    /// True once the terminator has been interpreted.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Interprets every `data:` line of `block` in order.
    pub fn interpret(&mut self, block: &str) -> Interpretation {
        let mut out = Interpretation::default();
        if self.terminated {
            out.terminated = true;
            return out;
        }
        for line in block.lines() {
            let Some(payload) = line.strip_prefix(DATA_FIELD) else {
                continue;
            };
            let payload = payload.trim();
            if payload == TERMINATOR {
                self.terminated = true;
                out.events.push(StreamEvent::Terminator);
                out.terminated = true;
                break;
            }
            if let Some(event) = self.interpret_payload(payload) {
                out.events.push(event);
            }
        }
        out
    }

    fn interpret_payload(&mut self, payload: &str) -> Option<StreamEvent> {
        let value = match serde_json::from_str::<Value>(payload) {
            Ok(value) => value,
            Err(_) => {
                EVENTS_MALFORMED.click();
                let raw_text = self.map_delta(payload.to_string())?;
                return Some(StreamEvent::Malformed { raw_text });
            }
        };
        let Value::Object(obj) = value else {
            EVENTS_SUPPRESSED.click();
            return None;
        };
        let kind = obj.get("kind").and_then(Value::as_str);
        match kind {
            Some("progress") => {
                let event =
                    serde_json::from_value::<ProgressUpdate>(Value::Object(obj.clone())).ok();
                return suppressed_unless(event.map(StreamEvent::Progress));
            }
            Some("done") => {
                EVENTS_DONE.click();
                return Some(StreamEvent::Done);
            }
            Some("portfolio") => {
                let event = obj
                    .get("result")
                    .filter(|result| !result.is_null())
                    .and_then(|result| {
                        serde_json::from_value::<PortfolioResult>(result.clone()).ok()
                    })
                    .map(StreamEvent::PortfolioResult);
                return suppressed_unless(event);
            }
            _ => {}
        }
        if let Some(envelope) = InterruptEnvelope::detect(kind, &obj) {
            let event = envelope
                .value()
                .and_then(normalize_interrupt)
                .map(StreamEvent::Interrupt);
            return suppressed_unless(event);
        }
        let delta = obj.get("delta").and_then(Value::as_str)?;
        let text = self.map_delta(delta.to_string())?;
        EVENTS_DELTA.click();
        Some(StreamEvent::Delta { text })
    }

    fn map_delta(&mut self, text: String) -> Option<String> {
        if text == " " {
            if self.skip_space_handshake && !self.handshake_seen {
                self.handshake_seen = true;
                return None;
            }
            return Some(NON_BREAKING_SPACE.to_string());
        }
        if text.is_empty() { None } else { Some(text) }
    }
}

fn suppressed_unless(event: Option<StreamEvent>) -> Option<StreamEvent> {
    match &event {
        Some(StreamEvent::Progress(_)) => EVENTS_PROGRESS.click(),
        Some(StreamEvent::Interrupt(_)) => EVENTS_INTERRUPT.click(),
        Some(StreamEvent::PortfolioResult(_)) => EVENTS_PORTFOLIO.click(),
        Some(_) => {}
        None => EVENTS_SUPPRESSED.click(),
    }
    event
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn interpret(block: &str) -> Interpretation {
        EventInterpreter::new(false).interpret(block)
    }

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::Delta {
            text: text.to_string(),
        }
    }

    fn sample_interrupt() -> Value {
        json!({
            "message": "Confirm the order",
            "fields": [
                {"name": "amount", "label": "Amount", "type": "number", "value": 1234567},
                {"name": "memo", "label": "Memo", "type": "text", "value": "monthly"}
            ]
        })
    }

    #[test]
    fn progress_then_delta_then_terminator() {
        let mut interpreter = EventInterpreter::new(false);
        let first = interpreter
            .interpret("data: {\"kind\":\"progress\",\"id\":\"p1\",\"status\":\"running\"}");
        assert_eq!(
            first.events,
            vec![StreamEvent::Progress(ProgressUpdate {
                step_id: "p1".to_string(),
                status: StepState::Running,
                label: None,
            })]
        );
        assert!(!first.terminated);
        let second = interpreter.interpret("data: {\"delta\":\"Hi\"}");
        assert_eq!(second.events, vec![delta("Hi")]);
        let third = interpreter.interpret("data: [DONE]");
        assert_eq!(third.events, vec![StreamEvent::Terminator]);
        assert!(third.terminated);
        assert!(interpreter.is_terminated());
    }

    #[test]
    fn terminator_stops_the_block_and_the_stream() {
        let mut interpreter = EventInterpreter::new(false);
        let out = interpreter
            .interpret("data: {\"delta\":\"a\"}\ndata: [DONE]\ndata: {\"delta\":\"b\"}");
        assert_eq!(out.events, vec![delta("a"), StreamEvent::Terminator]);
        let after = interpreter.interpret("data: {\"delta\":\"c\"}");
        assert!(after.events.is_empty());
        assert!(after.terminated);
    }

    #[test]
    fn multiple_data_lines_in_order() {
        let out = interpret("id: 7\ndata: {\"delta\":\"a\"}\n: comment\ndata:{\"delta\":\"b\"}");
        assert_eq!(out.events, vec![delta("a"), delta("b")]);
    }

    #[test]
    fn malformed_payload_falls_back_to_raw_text() {
        let out = interpret("data: hello there ");
        assert_eq!(
            out.events,
            vec![StreamEvent::Malformed {
                raw_text: "hello there".to_string()
            }]
        );
        assert_eq!(out.events[0].as_text_delta(), Some("hello there"));
    }

    #[test]
    fn objects_without_delta_emit_nothing() {
        assert!(interpret("data: {\"foo\":1}").events.is_empty());
        assert!(interpret("data: {\"delta\":\"\"}").events.is_empty());
        assert!(interpret("data: 42").events.is_empty());
        assert!(interpret("data:").events.is_empty());
    }

    #[test]
    fn done_kind() {
        let out = interpret("data: {\"kind\":\"done\"}");
        assert_eq!(out.events, vec![StreamEvent::Done]);
    }

    #[test]
    fn progress_with_label_and_alias() {
        let out =
            interpret("data: {\"kind\":\"progress\",\"stepId\":\"p2\",\"status\":\"done\",\"label\":\"Priced\"}");
        assert_eq!(
            out.events,
            vec![StreamEvent::Progress(ProgressUpdate {
                step_id: "p2".to_string(),
                status: StepState::Done,
                label: Some("Priced".to_string()),
            })]
        );
    }

    #[test]
    fn progress_with_unknown_status_is_suppressed() {
        let out = interpret("data: {\"kind\":\"progress\",\"id\":\"p2\",\"status\":\"weird\"}");
        assert!(out.events.is_empty());
    }

    #[test]
    fn portfolio_requires_result() {
        let payload = json!({
            "kind": "portfolio",
            "result": {
                "financialProductName": "Growth Fund",
                "stockName": "ACME",
                "allocationPercent": 40.0,
                "totalAmount": 1500000.0
            }
        });
        let out = interpret(&format!("data: {payload}"));
        assert_eq!(
            out.events,
            vec![StreamEvent::PortfolioResult(PortfolioResult {
                financial_product_name: "Growth Fund".to_string(),
                stock_name: "ACME".to_string(),
                allocation_percent: Some(40.0),
                total_amount: Some(1500000.0),
            })]
        );
        assert!(interpret("data: {\"kind\":\"portfolio\",\"result\":null}")
            .events
            .is_empty());
        assert!(interpret("data: {\"kind\":\"portfolio\"}").events.is_empty());
    }

    #[test]
    fn portfolio_amounts_are_lenient() {
        let text_amount = interpret(
            r#"data: {"kind":"portfolio","result":{"financialProductName":"Fund","stockName":"ACME","totalAmount":"1,500,000","allocationPercent":"25"}}"#,
        );
        assert_eq!(
            text_amount.events,
            vec![StreamEvent::PortfolioResult(PortfolioResult {
                financial_product_name: "Fund".to_string(),
                stock_name: "ACME".to_string(),
                allocation_percent: Some(25.0),
                total_amount: Some(1500000.0),
            })]
        );
        let null_amount = interpret(
            r#"data: {"kind":"portfolio","result":{"financialProductName":"Fund","stockName":null,"totalAmount":null,"allocationPercent":null}}"#,
        );
        assert_eq!(
            null_amount.events,
            vec![StreamEvent::PortfolioResult(PortfolioResult {
                financial_product_name: "Fund".to_string(),
                stock_name: String::new(),
                allocation_percent: None,
                total_amount: None,
            })]
        );
    }

    #[test]
    fn interrupt_members_may_be_null() {
        let expected = |message: &str, label: &str, field_type: FieldType| {
            vec![StreamEvent::Interrupt(Interrupt {
                message: message.to_string(),
                fields: vec![InterruptField {
                    name: "amount".to_string(),
                    label: label.to_string(),
                    field_type,
                    value: json!(1000),
                }],
            })]
        };
        let null_message = interpret(
            r#"data: {"interrupt":{"message":null,"fields":[{"name":"amount","label":"Amount","type":"number","value":1000}]}}"#,
        );
        assert_eq!(null_message.events, expected("", "Amount", FieldType::Number));
        let null_label = interpret(
            r#"data: {"interrupt":{"message":"Confirm","fields":[{"name":"amount","label":null,"type":"number","value":1000}]}}"#,
        );
        assert_eq!(null_label.events, expected("Confirm", "", FieldType::Number));
        let null_type = interpret(
            r#"data: {"interrupt":{"message":"Confirm","fields":[{"name":"amount","label":"Amount","type":null,"value":1000}]}}"#,
        );
        assert_eq!(null_type.events, expected("Confirm", "Amount", FieldType::Text));
        let null_fields = interpret(r#"data: {"interrupt":{"message":"Sure?","fields":null}}"#);
        assert_eq!(null_fields.events.len(), 1);
        let nothing = interpret(r#"data: {"interrupt":{"message":null,"fields":null}}"#);
        assert!(nothing.events.is_empty());
    }

    #[test]
    fn three_interrupt_envelopes_normalize_identically() {
        let value = sample_interrupt();
        let bare = json!({ "interrupt": value });
        let payload = json!({ "kind": "interrupt", "payload": value });
        let paused = json!({ "__interrupt__": [{ "value": value, "resumable": true }] });

        let bare = interpret(&format!("data: {bare}")).events;
        let payload = interpret(&format!("data: {payload}")).events;
        let paused = interpret(&format!("data: {paused}")).events;

        assert_eq!(bare.len(), 1);
        assert_eq!(bare, payload);
        assert_eq!(bare, paused);
        let StreamEvent::Interrupt(interrupt) = &bare[0] else {
            panic!("expected an interrupt, got {bare:?}");
        };
        assert_eq!(interrupt.message, "Confirm the order");
        assert_eq!(interrupt.fields.len(), 2);
        assert_eq!(interrupt.fields[0].field_type, FieldType::Number);
        assert_eq!(interrupt.fields[0].value, json!(1234567));
    }

    #[test]
    fn paused_envelope_without_array_or_wrapper() {
        let value = sample_interrupt();
        let unwrapped = json!({ "__interrupt__": { "value": value } });
        let raw = json!({ "__interrupt__": value });
        assert_eq!(
            interpret(&format!("data: {unwrapped}")).events,
            interpret(&format!("data: {raw}")).events
        );
    }

    #[test]
    fn empty_interrupts_are_suppressed() {
        assert!(interpret("data: {\"kind\":\"interrupt\"}").events.is_empty());
        assert!(interpret("data: {\"interrupt\":null}").events.is_empty());
        assert!(interpret("data: {\"interrupt\":{}}").events.is_empty());
        assert!(interpret("data: {\"__interrupt__\":[]}").events.is_empty());
        assert!(
            interpret("data: {\"__interrupt__\":[{\"value\":{\"message\":\"  \"}}]}")
                .events
                .is_empty()
        );
    }

    #[test]
    fn string_interrupt_becomes_message() {
        let out = interpret("data: {\"interrupt\":\"Proceed?\"}");
        assert_eq!(
            out.events,
            vec![StreamEvent::Interrupt(Interrupt {
                message: "Proceed?".to_string(),
                fields: Vec::new(),
            })]
        );
    }

    #[test]
    fn first_space_is_handshake_when_enabled() {
        let mut interpreter = EventInterpreter::new(true);
        let out = interpreter.interpret("data: {\"delta\":\" \"}\ndata: {\"delta\":\" \"}");
        assert_eq!(out.events, vec![delta("\u{00A0}")]);
        let later = interpreter.interpret("data: {\"delta\":\" \"}");
        assert_eq!(later.events, vec![delta("\u{00A0}")]);
    }

    #[test]
    fn spaces_are_kept_when_handshake_disabled() {
        let out = interpret("data: {\"delta\":\" \"}\ndata: {\"delta\":\" \"}");
        assert_eq!(out.events, vec![delta("\u{00A0}"), delta("\u{00A0}")]);
    }

    #[test]
    fn handshake_only_applies_to_single_spaces() {
        let mut interpreter = EventInterpreter::new(true);
        let out = interpreter.interpret("data: {\"delta\":\"  \"}\ndata: {\"delta\":\"x \"}");
        assert_eq!(out.events, vec![delta("  "), delta("x ")]);
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(delta("hi")).unwrap();
        assert_eq!(value, json!({"event": "delta", "text": "hi"}));
        let value = serde_json::to_value(StreamEvent::Done).unwrap();
        assert_eq!(value, json!({"event": "done"}));
    }
}
