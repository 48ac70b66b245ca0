//! Message framing shared by every pipe and socket in the system.
//!
//! A message is a byte string followed by `\0`. A line-oriented writer emits
//! `payload + '\n' + '\0'`. Three sentinels structure the streams: `READY\0`
//! ends a logical response, `INVALID\0` flags a rejected command, and an
//! empty `\0` ("DONE") ends an input batch.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const READY: &str = "READY";
pub const INVALID: &str = "INVALID";

/// Default cap on a single transport read, when no buffer size was
/// configured on the command line.
pub const DEFAULT_CHUNK: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection mid-message")]
    Truncated,
}

/// One decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Ordinary content; a single trailing newline from the line writer is
    /// stripped, interior newlines are preserved.
    Payload(String),
    Ready,
    Invalid,
    Done,
}

impl Frame {
    fn classify(raw: &str) -> Frame {
        match raw {
            "" => Frame::Done,
            READY => Frame::Ready,
            INVALID => Frame::Invalid,
            payload => Frame::Payload(payload.strip_suffix('\n').unwrap_or(payload).to_string()),
        }
    }
}

/// Decode every complete `\0`-terminated message in `buffer`, shifting the
/// unconsumed partial tail to the buffer head.
pub fn decode(buffer: &mut Vec<u8>) -> Result<Vec<Frame>, FrameError> {
    let mut out = Vec::new();
    let mut consumed = 0;

    let mut rest = buffer.as_slice();
    while let Some(pos) = rest.iter().position(|b| *b == 0) {
        out.push(Frame::classify(std::str::from_utf8(&rest[..pos])?));
        consumed += pos + 1;
        rest = &rest[pos + 1..];
    }

    let len = buffer.len();
    if consumed != 0 && consumed != len {
        buffer.copy_within(consumed..len, 0); // Shift remainder to front.
    }
    buffer.truncate(len - consumed);

    Ok(out)
}

/// Async message source over any transport. Refills its receive buffer in
/// reads of at most `chunk` bytes and hands out completed frames in order.
pub struct MessageReader<R> {
    reader: R,
    buffer: Vec<u8>,
    decoded: std::collections::VecDeque<Frame>,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R, chunk: usize) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            decoded: std::collections::VecDeque::new(),
            scratch: vec![0u8; chunk.max(1)],
        }
    }

    /// The next frame, or None on a clean end-of-stream between messages.
    pub async fn next(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            if let Some(frame) = self.decoded.pop_front() {
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::Truncated);
            }
            self.buffer.extend_from_slice(&self.scratch[..n]);
            self.decoded.extend(decode(&mut self.buffer)?);
        }
    }
}

/// A worker's or broker's complete answer to one command: the payload lines
/// read up to READY, and whether the peer flagged the command INVALID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub invalid: bool,
}

/// Collect one READY-terminated reply. Multi-line payloads are split into
/// their lines; DONE markers inside the stream are batch separators and
/// carry no content.
pub async fn read_reply<R: AsyncRead + Unpin>(
    reader: &mut MessageReader<R>,
) -> Result<Reply, FrameError> {
    let mut reply = Reply::default();
    loop {
        match reader.next().await? {
            Some(Frame::Payload(payload)) => {
                reply.lines.extend(payload.lines().map(str::to_string));
            }
            Some(Frame::Invalid) => reply.invalid = true,
            Some(Frame::Ready) => return Ok(reply),
            Some(Frame::Done) => {}
            None => return Err(FrameError::Truncated),
        }
    }
}

pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, payload: &str) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload.as_bytes());
    frame.push(0);
    w.write_all(&frame).await
}

/// `payload + '\n' + '\0'`.
pub async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, line: &str) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(line.len() + 2);
    frame.extend_from_slice(line.as_bytes());
    frame.extend_from_slice(b"\n\0");
    w.write_all(&frame).await
}

pub async fn write_ready<W: AsyncWrite + Unpin>(w: &mut W) -> std::io::Result<()> {
    write_message(w, READY).await
}

pub async fn write_invalid<W: AsyncWrite + Unpin>(w: &mut W) -> std::io::Result<()> {
    write_message(w, INVALID).await
}

pub async fn write_done<W: AsyncWrite + Unpin>(w: &mut W) -> std::io::Result<()> {
    write_message(w, "").await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_complete_messages_and_keeps_the_tail() {
        let mut buffer = b"hello\n\0READY\0par".to_vec();
        let frames = decode(&mut buffer).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Payload("hello".to_string()), Frame::Ready]
        );
        // Partial tail shifted to the front.
        assert_eq!(buffer, b"par".to_vec());

        buffer.extend_from_slice(b"tial\0");
        assert_eq!(
            decode(&mut buffer).unwrap(),
            vec![Frame::Payload("partial".to_string())]
        );
        assert!(buffer.is_empty());
        assert_eq!(decode(&mut buffer).unwrap(), vec![]);
    }

    #[test]
    fn classifies_sentinels() {
        let mut buffer = b"\0INVALID\0READY\0\n\0".to_vec();
        assert_eq!(
            decode(&mut buffer).unwrap(),
            vec![
                Frame::Done,
                Frame::Invalid,
                Frame::Ready,
                // A lone newline is a blank line, not a DONE marker.
                Frame::Payload(String::new()),
            ]
        );
    }

    #[test]
    fn interior_newlines_survive() {
        let mut buffer = b"3\n4891\n\0".to_vec();
        assert_eq!(
            decode(&mut buffer).unwrap(),
            vec![Frame::Payload("3\n4891".to_string())]
        );
    }

    #[tokio::test]
    async fn reader_reassembles_across_tiny_chunks() {
        let wire = b"first\n\0second line\n\0READY\0".to_vec();
        // A one-byte chunk forces reassembly on every boundary.
        let mut reader = MessageReader::new(wire.as_slice(), 1);
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Frame::Payload("first".to_string()))
        );
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Frame::Payload("second line".to_string()))
        );
        assert_eq!(reader.next().await.unwrap(), Some(Frame::Ready));
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_flags_truncated_streams() {
        let wire = b"dangling".to_vec();
        let mut reader = MessageReader::new(wire.as_slice(), 16);
        assert!(matches!(
            reader.next().await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn reply_collects_lines_until_ready() {
        let wire = b"China 3\n\0Italy 1\n\0\0READY\0".to_vec();
        let mut reader = MessageReader::new(wire.as_slice(), 8);
        let reply = read_reply(&mut reader).await.unwrap();
        assert_eq!(
            reply,
            Reply {
                lines: vec!["China 3".to_string(), "Italy 1".to_string()],
                invalid: false,
            }
        );
    }

    #[tokio::test]
    async fn reply_with_no_payload_is_one_empty_reply() {
        let wire = b"READY\0".to_vec();
        let mut reader = MessageReader::new(wire.as_slice(), 8);
        assert_eq!(read_reply(&mut reader).await.unwrap(), Reply::default());
    }

    #[tokio::test]
    async fn invalid_reply_is_flagged() {
        let wire = b"INVALID\0READY\0".to_vec();
        let mut reader = MessageReader::new(wire.as_slice(), 8);
        let reply = read_reply(&mut reader).await.unwrap();
        assert!(reply.invalid);
        assert!(reply.lines.is_empty());
    }

    #[tokio::test]
    async fn writers_emit_the_wire_grammar() {
        let mut sink = std::io::Cursor::new(Vec::new());
        write_line(&mut sink, "42\n1066").await.unwrap();
        write_message(&mut sink, "raw").await.unwrap();
        write_invalid(&mut sink).await.unwrap();
        write_done(&mut sink).await.unwrap();
        write_ready(&mut sink).await.unwrap();
        let wire = sink.into_inner();
        assert_eq!(wire, b"42\n1066\n\0raw\0INVALID\0\0READY\0".to_vec());

        // What we write, our reader reads back.
        let mut reader = MessageReader::new(wire.as_slice(), 4);
        let mut frames = Vec::new();
        while let Some(frame) = reader.next().await.unwrap() {
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![
                Frame::Payload("42\n1066".to_string()),
                Frame::Payload("raw".to_string()),
                Frame::Invalid,
                Frame::Done,
                Frame::Ready,
            ]
        );
    }
}
