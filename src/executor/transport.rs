use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::OpsResult;
use crate::error::{Error, TransportErrorKind};
use crate::util::{is_secure, redact_uri_for_logs};

/// A fully validated request, ready to be handed to a transport.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl PreparedRequest {
    pub fn redacted_uri(&self) -> String {
        redact_uri_for_logs(&self.uri.to_string())
    }

    /// Builds the transport error for this request.
    pub fn transport_error(
        &self,
        kind: TransportErrorKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Error {
        Error::Transport {
            kind,
            method: self.method.clone(),
            uri: self.redacted_uri(),
            source: source.into(),
        }
    }
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Box<dyn Read + Send>,
}

/// Source of connections for exchanges.
pub trait Transport: Send + Sync {
    /// Picks the client used for every attempt of one exchange.
    fn client_for(&self, uri: &Uri) -> Arc<dyn TransportClient>;
}

/// Clients must be shareable: a cancellable attempt runs on its own thread
/// and is left behind if the exchange is cancelled mid-flight.
pub trait TransportClient: Send + Sync {
    /// Sends one attempt. Failures before a response arrives must be
    /// reported as [`Error::Transport`] so the retry loop can classify them.
    fn send(&self, request: &PreparedRequest, timeout: Duration) -> OpsResult<TransportResponse>;
}

#[derive(Clone, Debug)]
pub(crate) struct AgentSettings {
    pub(crate) user_agent: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) pool_idle_timeout: Duration,
    pub(crate) pool_max_idle_per_host: usize,
    pub(crate) pool_max_idle_connections: usize,
}

/// Production transport backed by `ureq`.
///
/// Plain-text targets share one pooled agent. Each `https` exchange gets its
/// own agent on the rustls provider, which refuses anything older than
/// TLS 1.2.
pub struct UreqTransport {
    shared: ureq::Agent,
    settings: AgentSettings,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UreqTransport")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl UreqTransport {
    pub(crate) fn new(settings: AgentSettings) -> Self {
        let shared = make_agent(&settings, None);
        Self { shared, settings }
    }
}

impl Transport for UreqTransport {
    fn client_for(&self, uri: &Uri) -> Arc<dyn TransportClient> {
        let agent = if is_secure(uri) {
            let tls_config = ureq::tls::TlsConfig::builder()
                .provider(ureq::tls::TlsProvider::Rustls)
                .build();
            make_agent(&self.settings, Some(tls_config))
        } else {
            self.shared.clone()
        };
        Arc::new(AgentClient {
            agent,
            connect_timeout: self.settings.connect_timeout,
        })
    }
}

fn make_agent(settings: &AgentSettings, tls_config: Option<ureq::tls::TlsConfig>) -> ureq::Agent {
    let builder = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .user_agent(settings.user_agent.as_str())
        .max_idle_age(settings.pool_idle_timeout)
        .max_idle_connections_per_host(settings.pool_max_idle_per_host)
        .max_idle_connections(settings.pool_max_idle_connections);
    let builder = match tls_config {
        Some(tls_config) => builder.tls_config(tls_config),
        None => builder,
    };
    builder.build().new_agent()
}

struct AgentClient {
    agent: ureq::Agent,
    connect_timeout: Duration,
}

impl AgentClient {
    fn run<S: ureq::AsSendBody>(
        &self,
        request: &PreparedRequest,
        outgoing: ureq::http::Request<S>,
        timeout: Duration,
    ) -> OpsResult<TransportResponse> {
        let configured = self
            .agent
            .configure_request(outgoing)
            .timeout_global(Some(timeout))
            .timeout_connect(Some(self.connect_timeout.min(timeout)))
            .build();

        let response = self
            .agent
            .run(configured)
            .map_err(|source| request.transport_error(classify_ureq_error(&source), source))?;
        let (parts, body) = response.into_parts();
        Ok(TransportResponse {
            status: parts.status,
            headers: parts.headers,
            body: Box::new(body.into_reader()),
        })
    }
}

impl TransportClient for AgentClient {
    fn send(&self, request: &PreparedRequest, timeout: Duration) -> OpsResult<TransportResponse> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.clone())
            .uri(request.uri.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        match &request.body {
            Some(body) => {
                let outgoing = builder
                    .body(body.to_vec())
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(request, outgoing, timeout)
            }
            None => {
                let outgoing = builder
                    .body(())
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(request, outgoing, timeout)
            }
        }
    }
}

pub(crate) fn classify_ureq_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::Timeout(timeout) => match timeout {
            ureq::Timeout::Connect => TransportErrorKind::HandshakeTimeout,
            ureq::Timeout::Global | ureq::Timeout::PerCall | ureq::Timeout::RecvResponse => {
                TransportErrorKind::AwaitingHeadersTimeout
            }
            _ => TransportErrorKind::IoTimeout,
        },
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::ConnectionFailed => TransportErrorKind::ConnectionRefused,
        ureq::Error::Tls(_) | ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        ureq::Error::Io(source) => classify_io_error(source),
        _ => TransportErrorKind::Other,
    }
}

pub(crate) fn classify_io_error(error: &std::io::Error) -> TransportErrorKind {
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            TransportErrorKind::IoTimeout
        }
        std::io::ErrorKind::UnexpectedEof => TransportErrorKind::UnexpectedEof,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe => TransportErrorKind::ConnectionReset,
        std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
        _ => TransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Error as IoError, ErrorKind};

    use super::{classify_io_error, classify_ureq_error};
    use crate::error::TransportErrorKind;

    #[test]
    fn io_errors_map_to_closed_kind_set() {
        let cases = [
            (ErrorKind::ConnectionRefused, TransportErrorKind::ConnectionRefused),
            (ErrorKind::TimedOut, TransportErrorKind::IoTimeout),
            (ErrorKind::UnexpectedEof, TransportErrorKind::UnexpectedEof),
            (ErrorKind::ConnectionReset, TransportErrorKind::ConnectionReset),
            (ErrorKind::PermissionDenied, TransportErrorKind::Other),
        ];
        for (io_kind, expected) in cases {
            assert_eq!(classify_io_error(&IoError::from(io_kind)), expected);
        }
    }

    #[test]
    fn ureq_errors_map_to_closed_kind_set() {
        assert_eq!(
            classify_ureq_error(&ureq::Error::HostNotFound),
            TransportErrorKind::Dns
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::ConnectionFailed),
            TransportErrorKind::ConnectionRefused
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::Timeout(ureq::Timeout::RecvResponse)),
            TransportErrorKind::AwaitingHeadersTimeout
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::Timeout(ureq::Timeout::Connect)),
            TransportErrorKind::HandshakeTimeout
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::Timeout(ureq::Timeout::RecvBody)),
            TransportErrorKind::IoTimeout
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::Io(IoError::from(ErrorKind::ConnectionRefused))),
            TransportErrorKind::ConnectionRefused
        );
    }
}
