//! The cancellable byte channel a turn streams over.
//!
//! A [`Transport`] turns a [`ChatRequest`] into an ordered stream of byte
//! chunks.  [`HttpTransport`] POSTs to a server-sent-events endpoint,
//! [`MockTransport`] fabricates a reply locally, and [`ScriptedTransport`]
//! replays canned chunks for tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use url::Url;

use crate::events::TERMINATOR;
use crate::message::{Message, MessageContent, Role};
use crate::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MOCK_DELAY: Duration = Duration::from_millis(45);

/// An ordered stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/////////////////////////////////////////// Requests ////////////////////////////////////////////

/// One prior message as sent to the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author.
    pub role: Role,
    /// Text.
    pub content: String,
}

/// The JSON body of an outbound turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatRequest {
    /// A new user turn: `{"messages": [{role, content}, ...]}`.
    History {
        /// The conversation so far.
        messages: Vec<HistoryEntry>,
    },
    /// A resumed turn: `{"resume": {field: value, ...}}`.
    Resume {
        /// The user's answers to the interrupt.
        resume: Map<String, Value>,
    },
}

impl ChatRequest {
    /// Builds a history request from the text messages of a transcript.
    pub fn history(messages: &[Message]) -> Self {
        let messages = messages
            .iter()
            .filter_map(|message| match &message.content {
                MessageContent::Text(text) => Some(HistoryEntry {
                    role: message.role,
                    content: text.clone(),
                }),
                _ => None,
            })
            .collect();
        ChatRequest::History { messages }
    }

    /// Builds a resume request.
    pub fn resume(values: Map<String, Value>) -> Self {
        ChatRequest::Resume { resume: values }
    }
}

//////////////////////////////////////////// Transport ////////////////////////////////////////////

/// Opens the byte stream for one turn.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response body as a chunk stream.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the request is refused or the body
    /// cannot be opened.
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/////////////////////////////////////////// HttpTransport ///////////////////////////////////////////

/// Streams turns from an HTTP server-sent-events endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    endpoint: Url,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for `endpoint`.
    ///
    /// `timeout` bounds connection setup only; a stream may run as long as
    /// the server keeps it open.
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let timeout = timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// The endpoint requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        headers
    }

    /// Convert a non-success response into an error.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ErrorDetail>,
            message: Option<String>,
            detail: Option<String>,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            message: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let message = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .error
                    .and_then(|detail| detail.message)
                    .or(parsed.message)
                    .or(parsed.detail)
            })
            .unwrap_or(error_body);

        match status_code {
            408 | 504 => Error::timeout(message, None),
            _ => Error::api(status_code, message),
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(Self::default_headers())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {}", e),
                        Some(self.timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(stream))
    }
}

/////////////////////////////////////////// MockTransport ///////////////////////////////////////////

/// Answers every turn locally with a canned reply, streamed in small pieces.
///
/// Useful for exercising the full pipeline without a server.
#[derive(Debug, Clone)]
pub struct MockTransport {
    delay: Duration,
    progress_steps: Vec<String>,
}

impl MockTransport {
    /// Creates a mock that waits `delay` before each chunk.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            progress_steps: Vec::new(),
        }
    }

    /// Reports each named step as running then done before replying.
    pub fn with_progress_steps(mut self, steps: Vec<String>) -> Self {
        self.progress_steps = steps;
        self
    }

    /// The frames a reply to `request` consists of.
    pub fn frames(&self, request: &ChatRequest) -> Vec<String> {
        let reply = match request {
            ChatRequest::History { messages } => {
                let prompt = messages
                    .iter()
                    .rev()
                    .find(|entry| entry.role == Role::User)
                    .map(|entry| entry.content.as_str())
                    .unwrap_or_default();
                format!(
                    "Question: {prompt}\n\nThis is a mock response. Connect a real endpoint and the model's answer will arrive here instead."
                )
            }
            ChatRequest::Resume { resume } => {
                let values = resume
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Resumed with {values}. This is a mock response.")
            }
        };

        let mut frames = Vec::new();
        for step in &self.progress_steps {
            for status in ["running", "done"] {
                frames.push(data_frame(
                    &json!({"kind": "progress", "id": step, "status": status}),
                ));
            }
        }
        for piece in split_pieces(&reply) {
            frames.push(data_frame(&json!({ "delta": piece })));
        }
        frames.push(data_frame(&json!({"kind": "done"})));
        frames.push(format!("data: {TERMINATOR}\n\n"));
        frames
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_DELAY)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream> {
        let delay = self.delay;
        let stream = stream::iter(self.frames(request)).then(move |frame| async move {
            tokio::time::sleep(delay).await;
            Ok(Bytes::from(frame))
        });
        Ok(Box::pin(stream))
    }
}

fn data_frame(payload: &Value) -> String {
    format!("data: {payload}\n\n")
}

/// Splits text into pieces of one to three characters, cycling.
fn split_pieces(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut idx = 0;
    let mut width = 1;
    while idx < chars.len() {
        let end = (idx + width).min(chars.len());
        pieces.push(chars[idx..end].iter().collect());
        idx = end;
        width = width % 3 + 1;
    }
    pieces
}

///////////////////////////////////////// ScriptedTransport /////////////////////////////////////////

/// One canned response for [`ScriptedTransport`].
#[derive(Debug)]
pub struct ScriptedReply {
    opened: std::result::Result<Vec<Result<Bytes>>, Error>,
    stall: bool,
}

impl ScriptedReply {
    /// A response whose body is `chunks`, in order.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opened: Ok(chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from(chunk.into())))
                .collect()),
            stall: false,
        }
    }

    /// A request that fails before any body is produced.
    pub fn reject(error: Error) -> Self {
        Self {
            opened: Err(error),
            stall: false,
        }
    }

    /// Appends a body failure after the chunks.
    pub fn then_fail(mut self, error: Error) -> Self {
        if let Ok(chunks) = &mut self.opened {
            chunks.push(Err(error));
        }
        self
    }

    /// Keeps the body open forever after the chunks.
    pub fn then_stall(mut self) -> Self {
        self.stall = true;
        self
    }
}

/// Replays scripted replies, one per opened turn, and records requests.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    /// Creates a transport that answers turns with `replies` in order.
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues another reply.
    pub fn push(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Every request opened so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .ok_or_else(|| Error::connection("no scripted reply left", None))?;
        let body = stream::iter(reply.opened?);
        if reply.stall {
            Ok(Box::pin(body.chain(stream::pending())))
        } else {
            Ok(Box::pin(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventInterpreter, StreamEvent};
    use crate::sse::FrameDecoder;

    #[test]
    fn history_request_shape() {
        let transcript = vec![
            Message::assistant("Hello"),
            Message::user("What should I buy?"),
            Message::interrupt(Default::default()),
        ];
        let request = ChatRequest::history(&transcript);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"messages": [
                {"role": "assistant", "content": "Hello"},
                {"role": "user", "content": "What should I buy?"}
            ]})
        );
    }

    #[test]
    fn resume_request_shape() {
        let mut values = Map::new();
        values.insert("amount".to_string(), json!(1000));
        values.insert("memo".to_string(), json!("x"));
        let request = ChatRequest::resume(values);
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            "{\"resume\":{\"amount\":1000,\"memo\":\"x\"}}"
        );
    }

    #[test]
    fn pieces_cover_text() {
        let pieces = split_pieces("안녕하세요 world");
        assert_eq!(pieces.concat(), "안녕하세요 world");
        assert_eq!(pieces[0].chars().count(), 1);
        assert_eq!(pieces[1].chars().count(), 2);
        assert_eq!(pieces[2].chars().count(), 3);
    }

    #[test]
    fn mock_frames_decode_to_reply() {
        let mock = MockTransport::default().with_progress_steps(vec!["understand".to_string()]);
        let request = ChatRequest::history(&[Message::user("hi")]);
        let mut decoder = FrameDecoder::new();
        let mut interpreter = EventInterpreter::new(false);
        let mut text = String::new();
        let mut events = Vec::new();
        for frame in mock.frames(&request) {
            for block in decoder.push_str(&frame).unwrap() {
                events.extend(interpreter.interpret(&block).events);
            }
        }
        for event in &events {
            if let Some(delta) = event.as_text_delta() {
                text.push_str(delta);
            }
        }
        assert!(matches!(events[0], StreamEvent::Progress(_)));
        assert_eq!(events.last(), Some(&StreamEvent::Terminator));
        assert!(events.contains(&StreamEvent::Done));
        assert!(text.replace('\u{00A0}', " ").starts_with("Question: hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_streams_with_delay() {
        let mock = MockTransport::new(Duration::from_millis(100));
        let request = ChatRequest::resume(Map::new());
        let expected = mock.frames(&request).len();
        let started = tokio::time::Instant::now();
        let chunks: Vec<Result<Bytes>> = mock.open(&request).await.unwrap().collect().await;
        assert_eq!(chunks.len(), expected);
        assert!(started.elapsed() >= Duration::from_millis(100) * expected as u32);
    }

    #[tokio::test]
    async fn scripted_replies_in_order() {
        let transport = ScriptedTransport::new([
            ScriptedReply::chunks(["data: a\n\n"]),
            ScriptedReply::reject(Error::api(500, "boom")),
        ]);
        let request = ChatRequest::resume(Map::new());
        let first: Vec<Result<Bytes>> = transport.open(&request).await.unwrap().collect().await;
        assert_eq!(first.len(), 1);
        let second = transport.open(&request).await;
        assert_eq!(second.err().and_then(|e| e.status_code()), Some(500));
        assert!(transport.open(&request).await.is_err());
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn http_transport_rejects_bad_url() {
        let err = HttpTransport::new("not a url", None).unwrap_err();
        assert!(matches!(err, Error::Url { .. }));
    }
}
