use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Transport failure categories, assigned once at the transport boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    ConnectionRefused,
    /// No pooled connection could be handed out for the attempt.
    PoolExhausted,
    HandshakeTimeout,
    IoTimeout,
    UnexpectedEof,
    AwaitingHeadersTimeout,
    ConnectionReset,
    Dns,
    Tls,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::PoolExhausted => "pool_exhausted",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::IoTimeout => "io_timeout",
            Self::UnexpectedEof => "unexpected_eof",
            Self::AwaitingHeadersTimeout => "awaiting_headers_timeout",
            Self::ConnectionReset => "connection_reset",
            Self::Dns => "dns",
            Self::Tls => "tls",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidTarget,
    RequestBody,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    Transport,
    ReadingResponseBody,
    ResponseBodyTooLarge,
    RequestFailed,
    Deserialize,
    Cancelled,
    LoggingInit,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTarget => "invalid_target",
            Self::RequestBody => "request_body",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::Transport => "transport",
            Self::ReadingResponseBody => "reading_response_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::RequestFailed => "request_failed",
            Self::Deserialize => "deserialize",
            Self::Cancelled => "cancelled",
            Self::LoggingInit => "logging_init",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("target url is invalid: {target:?}")]
    InvalidTarget { target: String },
    #[error("failed to convert request body data to json: {source}")]
    RequestBody {
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("error reading response body: {source}")]
    ReadingResponseBody {
        #[source]
        source: std::io::Error,
    },
    #[error("response body too large ({actual_bytes} bytes > {limit_bytes} bytes)")]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
    },
    #[error("error making request: {method} {uri} failed: {status_line} {body}")]
    RequestFailed {
        status: u16,
        status_line: String,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("exchange cancelled for {method} {uri}")]
    Cancelled { method: Method, uri: String },
    #[error("failed to install log subscriber: {message}")]
    LoggingInit { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidTarget { .. } => ErrorCode::InvalidTarget,
            Self::RequestBody { .. } => ErrorCode::RequestBody,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::ReadingResponseBody { .. } => ErrorCode::ReadingResponseBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::RequestFailed { .. } => ErrorCode::RequestFailed,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::LoggingInit { .. } => ErrorCode::LoggingInit,
        }
    }

    pub const fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Status code of a response that failed classification.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the standard retry policy treats this error as transient.
    pub fn is_retryable(&self) -> bool {
        self.transport_kind()
            .is_some_and(|kind| crate::retry::default_retryable_kinds().contains(&kind))
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, TransportErrorKind};
    use http::Method;

    fn transport(kind: TransportErrorKind) -> Error {
        Error::Transport {
            kind,
            method: Method::GET,
            uri: "http://example.test/".to_owned(),
            source: Box::new(std::io::Error::other("boom")),
        }
    }

    #[test]
    fn refused_connection_is_retryable_but_dns_is_not() {
        assert!(transport(TransportErrorKind::ConnectionRefused).is_retryable());
        assert!(transport(TransportErrorKind::UnexpectedEof).is_retryable());
        assert!(!transport(TransportErrorKind::Dns).is_retryable());
        assert!(
            !Error::InvalidTarget {
                target: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn request_failed_message_carries_status_line_and_body() {
        let error = Error::RequestFailed {
            status: 500,
            status_line: "500 Internal Server Error".to_owned(),
            method: Method::GET,
            uri: "http://x/fail".to_owned(),
            body: "boom".to_owned(),
        };
        let text = error.to_string();
        assert!(text.contains("500 Internal Server Error"));
        assert!(text.contains("boom"));
        assert_eq!(error.code(), ErrorCode::RequestFailed);
        assert_eq!(error.code().as_str(), "request_failed");
        assert_eq!(error.status(), Some(500));
    }
}
