use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use serde::Serialize;
use tracing::{Span, debug, info_span, warn};

use crate::OpsResult;
use crate::cancel::CancelSignal;
use crate::error::{Error, TransportErrorKind};
use crate::response::ExchangeResponse;
use crate::util::truncate_body;

use super::transport::{PreparedRequest, TransportClient, TransportResponse};
use super::{Exchange, Executor, ExecutorBuilder};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl Executor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    pub fn get(&self, target: impl Into<String>) -> OpsResult<ExchangeResponse> {
        self.exchange(Exchange::get(target))
    }

    pub fn post_json<T>(&self, target: impl Into<String>, body: &T) -> OpsResult<ExchangeResponse>
    where
        T: Serialize + ?Sized,
    {
        self.exchange(Exchange::post(target).json(body)?)
    }

    pub fn post_text(
        &self,
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> OpsResult<ExchangeResponse> {
        self.exchange(Exchange::post(target).text(body))
    }

    pub fn delete(&self, target: impl Into<String>) -> OpsResult<ExchangeResponse> {
        self.exchange(Exchange::delete(target))
    }

    /// Runs one logical exchange, retrying transient transport failures.
    ///
    /// The returned response already carries its body text; non-success
    /// statuses come back as [`Error::RequestFailed`].
    pub fn exchange(&self, exchange: Exchange) -> OpsResult<ExchangeResponse> {
        let request = exchange.prepare()?;
        let redacted_uri = request.redacted_uri();
        let span = info_span!(
            "opskit.exchange",
            method = %request.method,
            uri = %redacted_uri
        );
        let _enter = span.enter();

        let timeout = exchange.timeout_value().unwrap_or(self.default_timeout);
        let cancel = exchange.cancel();
        let client = self.transport.client_for(&request.uri);
        let started_at = Instant::now();
        let mut retry = self.retry_policy.start(started_at);

        loop {
            ensure_not_cancelled(cancel, &request)?;
            debug!("sending request");
            let outcome = send_attempt(&client, &request, timeout, cancel);
            ensure_not_cancelled(cancel, &request)?;

            let error = match outcome {
                Ok(response) => {
                    let response = ExchangeResponse::streaming(
                        response.status,
                        response.headers,
                        response.body,
                        self.max_response_body_bytes,
                    );
                    return complete(&request, response, started_at);
                }
                Err(error) => error,
            };

            let Some(kind) = error.transport_kind() else {
                return Err(error);
            };
            let Some(delay) = retry.next_delay(kind, Instant::now()) else {
                return Err(error);
            };
            warn!(
                delay_ms = delay.as_millis() as u64,
                retries_remaining = retry.retries_remaining(),
                error = %error,
                "retrying request after transport error"
            );
            if !self.sleeper.sleep(delay, cancel) {
                return Err(cancelled_error(&request));
            }
        }
    }
}

/// Without a cancel signal the attempt runs on the calling thread. With one,
/// it runs on a worker thread so a fired signal returns at once; the
/// abandoned attempt ends on its own when its timeout elapses.
fn send_attempt(
    client: &Arc<dyn TransportClient>,
    request: &PreparedRequest,
    timeout: Duration,
    cancel: Option<&CancelSignal>,
) -> OpsResult<TransportResponse> {
    let Some(cancel) = cancel else {
        return client.send(request, timeout);
    };

    let (sender, receiver) = mpsc::channel();
    let worker_client = Arc::clone(client);
    let worker_request = request.clone();
    let span = Span::current();
    thread::Builder::new()
        .name("opskit-attempt".to_owned())
        .spawn(move || {
            let _enter = span.enter();
            let _ = sender.send(worker_client.send(&worker_request, timeout));
        })
        .map_err(|source| request.transport_error(TransportErrorKind::Other, source))?;

    loop {
        match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(outcome) => return outcome,
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    debug!("abandoning in-flight attempt after cancel");
                    return Err(cancelled_error(request));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(request.transport_error(
                    TransportErrorKind::Other,
                    std::io::Error::other("attempt worker exited without a result"),
                ));
            }
        }
    }
}

fn complete(
    request: &PreparedRequest,
    mut response: ExchangeResponse,
    started_at: Instant,
) -> OpsResult<ExchangeResponse> {
    response.fill_body()?;
    let status = response.status();
    debug!(
        status = status.as_u16(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    if is_success(&request.method, status) {
        return Ok(response);
    }
    let body = truncate_body(response.body_text()?);
    Err(Error::RequestFailed {
        status: status.as_u16(),
        status_line: response.status_line(),
        method: request.method.clone(),
        uri: request.redacted_uri(),
        body,
    })
}

/// 200 always succeeds; 201 only for `POST` and 204 only for `DELETE`.
pub(crate) fn is_success(method: &Method, status: StatusCode) -> bool {
    match status {
        StatusCode::OK => true,
        StatusCode::CREATED => *method == Method::POST,
        StatusCode::NO_CONTENT => *method == Method::DELETE,
        _ => false,
    }
}

fn ensure_not_cancelled(cancel: Option<&CancelSignal>, request: &PreparedRequest) -> OpsResult<()> {
    match cancel {
        Some(signal) if signal.is_cancelled() => Err(cancelled_error(request)),
        _ => Ok(()),
    }
}

fn cancelled_error(request: &PreparedRequest) -> Error {
    Error::Cancelled {
        method: request.method.clone(),
        uri: request.redacted_uri(),
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::is_success;

    #[test]
    fn success_table_is_method_specific() {
        let cases = [
            (Method::GET, StatusCode::OK, true),
            (Method::POST, StatusCode::OK, true),
            (Method::DELETE, StatusCode::OK, true),
            (Method::POST, StatusCode::CREATED, true),
            (Method::GET, StatusCode::CREATED, false),
            (Method::DELETE, StatusCode::NO_CONTENT, true),
            (Method::POST, StatusCode::NO_CONTENT, false),
            (Method::PUT, StatusCode::ACCEPTED, false),
            (Method::GET, StatusCode::NOT_FOUND, false),
        ];
        for (method, status, expected) in cases {
            assert_eq!(is_success(&method, status), expected, "{method} {status}");
        }
    }
}
