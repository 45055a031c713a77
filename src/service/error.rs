//! Transport-level error types.

use std::io;
use thiserror::Error;

/// Result type for tools-service operations.
pub type ServiceResult<T> = Result<T, ProtocolError>;

/// Errors that can occur on the tools-service transport.
///
/// Codec and loop failures are captured on the dispatcher (first one wins)
/// and handed to the next caller that polls, rather than being thrown from
/// the background tasks.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Request rejected before anything was enqueued.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Write or read attempted on a closed stream.
    #[error("stream closed: {0}")]
    StreamClosed(#[source] io::Error),

    /// The physical read returned zero bytes mid-protocol.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Header block arrived without a content-length header.
    #[error("message header is missing content-length")]
    MissingContentLength,

    /// Content-length header value is not a decimal integer.
    #[error("invalid content-length value: {0:?}")]
    InvalidContentLength(String),

    /// Failed to serialize an outbound request body.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Message body is not valid JSON (or not valid UTF-8).
    #[error("malformed message body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    /// Failed to spawn the tools-service process.
    #[error("failed to spawn tools service: {0}")]
    SpawnFailed(#[source] io::Error),
}

impl ProtocolError {
    /// Check if this failure makes the framing unrecoverable for the stream.
    ///
    /// Once the header scanner has lost sync there is no way to find the
    /// next frame boundary, so the inbound loop exits.
    pub fn is_fatal_to_stream(&self) -> bool {
        matches!(
            self,
            Self::StreamClosed(_)
                | Self::UnexpectedEof
                | Self::MissingContentLength
                | Self::InvalidContentLength(_)
                | Self::MalformedBody(_)
        )
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        Self::StreamClosed(err)
    }
}
