//! Server-Sent Events framing.
//!
//! This module turns the raw, arbitrarily-fragmented byte stream of a turn
//! into complete event blocks.  A block ends at a blank line once CRLF has
//! been normalized to LF.  Bytes that do not yet form a complete block stay
//! buffered and are prefixed onto the next chunk.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::observability::{STREAM_BLOCKS, STREAM_BYTES, STREAM_CHUNKS, STREAM_DROPPED_TAILS};
use crate::{Error, Result};

const BLOCK_DELIMITER: &str = "\n\n";
const REPLACEMENT: char = '\u{FFFD}';

/// Incremental decoder from text chunks to event blocks.
///
/// Framing never fails.  The only error is exceeding the optional buffer
/// limit, which bounds how much unterminated data may be held between chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    partial_utf8: Vec<u8>,
    max_buffered: Option<usize>,
}

impl FrameDecoder {
    /// Creates a decoder with an unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder that fails once more than `max_buffered` bytes of
    /// unterminated data are pending.
    pub fn with_limit(max_buffered: Option<usize>) -> Self {
        Self {
            max_buffered,
            ..Self::default()
        }
    }

    /// Feeds raw bytes, returning every block they complete.
    ///
    /// Multi-byte characters split across chunks are reassembled.  Invalid
    /// sequences decode to U+FFFD.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.partial_utf8.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.partial_utf8) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.partial_utf8.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.partial_utf8[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            text.push(REPLACEMENT);
                            self.partial_utf8.drain(..valid + bad);
                        }
                        None => {
                            self.partial_utf8.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        self.push_str(&text)
    }

    /// Feeds decoded text, returning every block it completes.
    pub fn push_str(&mut self, text: &str) -> Result<Vec<String>> {
        self.buffer.push_str(text);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        let mut blocks = Vec::new();
        while let Some(idx) = self.buffer.find(BLOCK_DELIMITER) {
            let block: String = self.buffer.drain(..idx + BLOCK_DELIMITER.len()).collect();
            let block = &block[..idx];
            if !block.trim().is_empty() {
                blocks.push(block.to_string());
            }
        }
        if let Some(limit) = self.max_buffered
            && self.buffered_len() > limit
        {
            return Err(Error::streaming(
                format!(
                    "unterminated event data exceeds {limit} bytes ({} pending)",
                    self.buffered_len()
                ),
                None,
            ));
        }
        Ok(blocks)
    }

    /// Ends the stream, returning the unterminated remainder if it holds
    /// anything but whitespace.
    pub fn finish(&mut self) -> Option<String> {
        if !self.partial_utf8.is_empty() {
            self.partial_utf8.clear();
            self.buffer.push(REPLACEMENT);
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Number of bytes held waiting for a block terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.partial_utf8.len()
    }
}

/// Process a stream of bytes into a stream of complete event blocks.
///
/// Each chunk is fully framed before the next one is awaited, so blocks come
/// out in exactly the order their bytes arrived.  When the byte stream ends,
/// an unterminated trailing block is yielded only if `flush_trailing` is set;
/// otherwise it is dropped.
///
/// ```
/// use bytes::Bytes;
/// use chatterbox::sse::{FrameDecoder, decode_blocks};
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let chunks = futures::stream::iter(vec![
///     Ok(Bytes::from_static(b"data: {\"delta\":\"Hi\"}\n")),
///     Ok(Bytes::from_static(b"\ndata: [DONE]\n\n")),
/// ]);
/// let blocks: Vec<_> = decode_blocks(chunks, FrameDecoder::new(), false)
///     .collect()
///     .await;
/// assert_eq!(blocks.len(), 2);
/// # });
/// ```
pub fn decode_blocks<S>(
    byte_stream: S,
    decoder: FrameDecoder,
    flush_trailing: bool,
) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let ready: std::collections::VecDeque<String> = std::collections::VecDeque::new();

    stream::unfold(
        (byte_stream, decoder, ready, false),
        move |(mut stream, mut decoder, mut ready, mut finished)| async move {
            loop {
                if let Some(block) = ready.pop_front() {
                    STREAM_BLOCKS.click();
                    return Some((Ok(block), (stream, decoder, ready, finished)));
                }
                if finished {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_CHUNKS.click();
                        STREAM_BYTES.count(bytes.len() as u64);
                        match decoder.push_bytes(&bytes) {
                            Ok(blocks) => ready.extend(blocks),
                            Err(e) => {
                                finished = true;
                                return Some((Err(e), (stream, decoder, ready, finished)));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        finished = true;
                        return Some((Err(e), (stream, decoder, ready, finished)));
                    }
                    None => {
                        finished = true;
                        if let Some(rest) = decoder.finish() {
                            if flush_trailing {
                                ready.push_back(rest);
                            } else {
                                STREAM_DROPPED_TAILS.click();
                            }
                        }
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE: &str = concat!(
        "data: {\"kind\":\"progress\",\"id\":\"p1\",\"status\":\"running\"}\r\n\r\n",
        "event: message\ndata: {\"delta\":\"안녕\"}\n\n",
        "data: {\"delta\":\"a\"}\ndata: {\"delta\":\"b\"}\n\n",
        "data: [DONE]\n\n",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = FrameDecoder::new();
        let mut blocks = Vec::new();
        for chunk in chunks {
            blocks.extend(decoder.push_bytes(chunk).unwrap());
        }
        blocks
    }

    #[test]
    fn single_chunk() {
        let blocks = decode_all(&[WIRE.as_bytes()]);
        assert_eq!(
            blocks,
            vec![
                "data: {\"kind\":\"progress\",\"id\":\"p1\",\"status\":\"running\"}",
                "event: message\ndata: {\"delta\":\"안녕\"}",
                "data: {\"delta\":\"a\"}\ndata: {\"delta\":\"b\"}",
                "data: [DONE]",
            ]
        );
    }

    #[test]
    fn every_two_way_split_matches_single_chunk() {
        let expected = decode_all(&[WIRE.as_bytes()]);
        let bytes = WIRE.as_bytes();
        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            assert_eq!(decode_all(&[head, tail]), expected, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let expected = decode_all(&[WIRE.as_bytes()]);
        let chunks: Vec<&[u8]> = WIRE.as_bytes().chunks(1).collect();
        assert_eq!(decode_all(&chunks), expected);
    }

    #[test]
    fn three_way_splits_match_single_chunk() {
        let expected = decode_all(&[WIRE.as_bytes()]);
        let bytes = WIRE.as_bytes();
        for first in (0..bytes.len()).step_by(7) {
            for second in (first..=bytes.len()).step_by(5) {
                let chunks = [&bytes[..first], &bytes[first..second], &bytes[second..]];
                assert_eq!(decode_all(&chunks), expected, "splits at {first}/{second}");
            }
        }
    }

    #[test]
    fn unterminated_tail_is_retained() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_str("data: {\"delta\":\"x\"}").unwrap().is_empty());
        assert_eq!(decoder.buffered_len(), 19);
        assert_eq!(
            decoder.push_str("\n\n").unwrap(),
            vec!["data: {\"delta\":\"x\"}"]
        );
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn finish_returns_nonblank_remainder() {
        let mut decoder = FrameDecoder::new();
        decoder.push_str("data: tail\n").unwrap();
        assert_eq!(decoder.finish(), Some("data: tail".to_string()));
        assert_eq!(decoder.finish(), None);
        decoder.push_str("\n").unwrap();
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut decoder = FrameDecoder::new();
        let blocks = decoder.push_bytes(b"data: a\xffb\n\n").unwrap();
        assert_eq!(blocks, vec!["data: a\u{FFFD}b"]);
    }

    #[test]
    fn limit_is_enforced_on_unterminated_data() {
        let mut decoder = FrameDecoder::with_limit(Some(8));
        assert!(decoder.push_str("data: 1\n\n").is_ok());
        let err = decoder.push_str("data: 123456789").unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn stream_drops_unterminated_tail_by_default() {
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"data: one\n\ndata: two"))]);
        let blocks: Vec<String> = decode_blocks(chunks, FrameDecoder::new(), false)
            .map(|b| b.unwrap())
            .collect()
            .await;
        assert_eq!(blocks, vec!["data: one"]);
    }

    #[tokio::test]
    async fn stream_flushes_tail_when_asked() {
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"data: one\n\ndata: two"))]);
        let blocks: Vec<String> = decode_blocks(chunks, FrameDecoder::new(), true)
            .map(|b| b.unwrap())
            .collect()
            .await;
        assert_eq!(blocks, vec!["data: one", "data: two"]);
    }

    #[tokio::test]
    async fn stream_surfaces_transport_errors() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err(Error::streaming("connection reset", None)),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ]);
        let items: Vec<Result<String>> = decode_blocks(chunks, FrameDecoder::new(), false)
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "data: one");
        assert!(items[1].is_err());
    }
}
