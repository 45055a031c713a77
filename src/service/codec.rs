//! Wire codec for the tools-service stream.
//!
//! One frame is an ASCII header block terminated by `\r\n\r\n` followed by a
//! UTF-8 JSON body whose byte length is declared by the mandatory
//! `Content-Length` header. The next header block begins immediately after
//! the body; there is no trailing delimiter.

use std::io;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use super::error::{ProtocolError, ServiceResult};

/// JSON-RPC version stamped on every outbound body.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Floor size of the reader buffer. The buffer grows past this for large
/// result payloads and shrinks back once the frame is consumed.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// JSON formatter matching the reference client's serializer (`", "` item
/// and `": "` key separators), so outbound frames are byte-stable and the
/// declared content length is reproducible.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }
}

/// Serialize an outbound request body.
///
/// Key order is fixed (`id`, `jsonrpc`, `method`, `params`) and map keys
/// inside `params` keep insertion order, so the same request always
/// produces the same bytes.
pub fn encode_body(method: &str, params: &Value, id: &Value) -> ServiceResult<Vec<u8>> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        id: &'a Value,
        jsonrpc: &'a str,
        method: &'a str,
        params: &'a Value,
    }

    let envelope = Envelope {
        id,
        jsonrpc: PROTOCOL_VERSION,
        method,
        params,
    };

    let mut ser = serde_json::Serializer::with_formatter(Vec::new(), SpacedFormatter);
    envelope
        .serialize(&mut ser)
        .map_err(ProtocolError::SerializeFailed)?;
    Ok(ser.into_inner())
}

/// Build one complete wire frame: header block plus JSON body.
pub fn encode_frame(method: &str, params: &Value, id: &Value) -> ServiceResult<Vec<u8>> {
    let body = encode_body(method, params, id)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Framed writer over the tools-service stdin.
pub struct MessageWriter<W> {
    stream: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream: BufWriter::new(stream),
        }
    }

    /// Write one framed request and flush.
    ///
    /// A rejected write (closed or broken pipe) fails with
    /// [`ProtocolError::StreamClosed`]; the codec does not retry.
    pub async fn send(&mut self, method: &str, params: &Value, id: &Value) -> ServiceResult<()> {
        let frame = encode_frame(method, params, id)?;
        self.stream
            .write_all(&frame)
            .await
            .map_err(ProtocolError::StreamClosed)?;
        self.stream
            .flush()
            .await
            .map_err(ProtocolError::StreamClosed)
    }

    /// Shut down the underlying stream (closes the service's stdin).
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    AwaitingHeader,
    AwaitingBody { content_length: usize },
}

/// Incremental framed reader over the tools-service stdout.
///
/// Maintains a growable buffer with a consumed offset and a filled offset.
/// The buffer doubles when less than a quarter of it is free before a
/// physical read, and drops back to the floor size once the oversized frame
/// has been fully consumed.
pub struct MessageReader<R> {
    stream: R,
    buf: Vec<u8>,
    floor: usize,
    consumed: usize,
    filled: usize,
    state: ReadState,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(stream: R) -> Self {
        Self::with_buffer_size(stream, DEFAULT_BUFFER_SIZE)
    }

    /// Construct with a specific initial buffer size (also the floor the
    /// buffer shrinks back to). Used by tests to force resize paths.
    pub fn with_buffer_size(stream: R, size: usize) -> Self {
        let size = size.max(1);
        Self {
            stream,
            buf: vec![0; size],
            floor: size,
            consumed: 0,
            filled: 0,
            state: ReadState::AwaitingHeader,
        }
    }

    /// Read and decode the next framed message.
    ///
    /// Zero bytes from the physical read mid-frame is
    /// [`ProtocolError::UnexpectedEof`]. Header and body failures
    /// (`MissingContentLength`, `InvalidContentLength`, `MalformedBody`)
    /// leave the stream framing unrecoverable; the caller must not retry.
    pub async fn read_message(&mut self) -> ServiceResult<Value> {
        loop {
            match self.state {
                ReadState::AwaitingHeader => {
                    if let Some(content_length) = self.scan_header()? {
                        self.state = ReadState::AwaitingBody { content_length };
                        continue;
                    }
                }
                ReadState::AwaitingBody { content_length } => {
                    if self.filled - self.consumed >= content_length {
                        return self.take_body(content_length);
                    }
                }
            }
            self.fill().await?;
        }
    }

    /// True when the state machine sits between frames.
    pub fn is_awaiting_header(&self) -> bool {
        self.state == ReadState::AwaitingHeader
    }

    /// Current physical size of the internal buffer.
    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    /// Look for a complete header block in the live region. On success the
    /// consumed offset moves past the terminator and the declared content
    /// length is returned.
    fn scan_header(&mut self) -> ServiceResult<Option<usize>> {
        let live = &self.buf[self.consumed..self.filled];
        let Some(end) = find_terminator(live) else {
            return Ok(None);
        };
        let content_length = parse_header_block(&live[..end])?;
        self.consumed += end + HEADER_TERMINATOR.len();
        Ok(Some(content_length))
    }

    fn take_body(&mut self, content_length: usize) -> ServiceResult<Value> {
        let start = self.consumed;
        let end = start + content_length;
        let message =
            serde_json::from_slice(&self.buf[start..end]).map_err(ProtocolError::MalformedBody)?;
        self.consumed = end;
        self.state = ReadState::AwaitingHeader;
        self.compact();
        Ok(message)
    }

    /// Discard consumed bytes and release memory grown for an oversized
    /// frame once the live region fits back under the floor.
    fn compact(&mut self) {
        if self.consumed > 0 {
            self.buf.copy_within(self.consumed..self.filled, 0);
            self.filled -= self.consumed;
            self.consumed = 0;
        }
        if self.buf.len() > self.floor && self.filled <= self.floor {
            self.buf.truncate(self.floor);
            self.buf.shrink_to_fit();
        }
    }

    /// One physical read into the free tail, growing the buffer first when
    /// less than a quarter of it is free.
    async fn fill(&mut self) -> ServiceResult<()> {
        let free = self.buf.len() - self.filled;
        if free * 4 < self.buf.len() {
            if self.consumed > 0 {
                self.buf.copy_within(self.consumed..self.filled, 0);
                self.filled -= self.consumed;
                self.consumed = 0;
            }
            let doubled = self.buf.len() * 2;
            self.buf.resize(doubled, 0);
        }
        let n = self
            .stream
            .read(&mut self.buf[self.filled..])
            .await
            .map_err(ProtocolError::StreamClosed)?;
        if n == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }
        self.filled += n;
        Ok(())
    }
}

/// Find the position of `\r\n\r\n` separating headers from the body.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Parse the header block: `\n`-delimited lines split on the first colon,
/// names lower-cased for case-insensitive lookup.
fn parse_header_block(header: &[u8]) -> ServiceResult<usize> {
    let text = String::from_utf8_lossy(header);
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().to_ascii_lowercase() == CONTENT_LENGTH {
            let value = value.trim();
            return value
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()));
        }
    }
    Err(ProtocolError::MissingContentLength)
}
