use thiserror::Error;

/// Failure of the HTTP negotiation that precedes the streaming connection.
///
/// Always recoverable: the connection manager routes it into the retry
/// path, never out of the process.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("negotiation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("negotiation returned status {0}")]
    Status(u16),
    #[error("negotiation body is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),
    #[error("negotiation body carries no ConnectionToken")]
    MissingToken,
}

/// Failure on the streaming socket: open, read, write or abrupt close.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid stream url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid connect request: {0}")]
    Request(#[from] http::Error),
    #[error("stream url has no host")]
    MissingHost,
}

/// Failure decoding a frame or a single topic inside one.
///
/// Scoped to the decoder: a bad topic is dropped and logged, the rest of
/// the frame and the session continue untouched.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("topic '{topic}' carries invalid base64: {source}")]
    Base64 {
        topic: String,
        source: base64::DecodeError,
    },
    #[error("topic '{topic}' failed to inflate: {source}")]
    Inflate {
        topic: String,
        source: std::io::Error,
    },
    #[error("topic '{topic}' decompressed to invalid JSON: {source}")]
    Payload {
        topic: String,
        source: serde_json::Error,
    },
}
