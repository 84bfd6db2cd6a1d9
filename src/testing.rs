//! In-memory doubles for code built on [`Executor`](crate::Executor).
//!
//! None of these touch the network. Only [`ScriptedOutcome::Stall`] blocks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{HeaderMap, StatusCode, Uri};

use crate::OpsResult;
use crate::cancel::CancelSignal;
use crate::error::{Error, TransportErrorKind};
use crate::executor::{
    Exchange, Exchanger, PreparedRequest, Transport, TransportClient, TransportResponse,
    is_success,
};
use crate::extensions::Sleeper;
use crate::response::ExchangeResponse;
use crate::util::{lock_unpoisoned, redact_uri_for_logs, status_line, truncate_body};

/// One scripted attempt outcome.
#[derive(Clone, Debug)]
pub enum ScriptedOutcome {
    Respond {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },
    Fail(TransportErrorKind),
    /// Blocks the attempt for `delay`, then resolves to `then`.
    Stall {
        delay: Duration,
        then: Box<ScriptedOutcome>,
    },
}

impl ScriptedOutcome {
    pub fn respond(status: u16, body: impl Into<String>) -> Self {
        Self::Respond {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn fail(kind: TransportErrorKind) -> Self {
        Self::Fail(kind)
    }

    /// An attempt that hangs like a slow peer. Pair a stall as long as the
    /// exchange timeout with a timeout failure to mimic a timed-out attempt.
    pub fn stall(delay: Duration, then: ScriptedOutcome) -> Self {
        Self::Stall {
            delay,
            then: Box::new(then),
        }
    }
}

/// Transport that replays queued outcomes, one per attempt.
///
/// Once the queue runs dry every attempt fails with
/// [`TransportErrorKind::Other`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Arc<Script>,
    clients: AtomicUsize,
}

#[derive(Debug, Default)]
struct Script {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    requests: Mutex<Vec<PreparedRequest>>,
}

impl ScriptedTransport {
    pub fn new(outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        Self {
            script: Arc::new(Script {
                outcomes: Mutex::new(outcomes.into_iter().collect()),
                requests: Mutex::default(),
            }),
            clients: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        lock_unpoisoned(&self.script.outcomes).push_back(outcome);
    }

    /// Every request sent, in order.
    pub fn requests(&self) -> Vec<PreparedRequest> {
        lock_unpoisoned(&self.script.requests).clone()
    }

    pub fn attempts(&self) -> usize {
        lock_unpoisoned(&self.script.requests).len()
    }

    /// How many times a client was selected, i.e. how many exchanges got past
    /// validation.
    pub fn clients_created(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        lock_unpoisoned(&self.script.outcomes).len()
    }
}

impl Transport for ScriptedTransport {
    fn client_for(&self, _uri: &Uri) -> Arc<dyn TransportClient> {
        self.clients.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedClient {
            script: Arc::clone(&self.script),
        })
    }
}

struct ScriptedClient {
    script: Arc<Script>,
}

impl TransportClient for ScriptedClient {
    fn send(&self, request: &PreparedRequest, _timeout: Duration) -> OpsResult<TransportResponse> {
        lock_unpoisoned(&self.script.requests).push(request.clone());
        let next = lock_unpoisoned(&self.script.outcomes).pop_front();
        resolve(request, next)
    }
}

fn resolve(
    request: &PreparedRequest,
    outcome: Option<ScriptedOutcome>,
) -> OpsResult<TransportResponse> {
    match outcome {
        Some(ScriptedOutcome::Stall { delay, then }) => {
            std::thread::sleep(delay);
            resolve(request, Some(*then))
        }
        Some(ScriptedOutcome::Respond {
            status,
            headers,
            body,
        }) => Ok(TransportResponse {
            status,
            headers,
            body: Box::new(std::io::Cursor::new(body.into_bytes())),
        }),
        Some(ScriptedOutcome::Fail(kind)) => Err(request.transport_error(
            kind,
            std::io::Error::other(format!("scripted {kind} failure")),
        )),
        None => Err(request.transport_error(
            TransportErrorKind::Other,
            std::io::Error::other("scripted transport has no outcomes left"),
        )),
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        lock_unpoisoned(&self.delays).clone()
    }

    pub fn total(&self) -> Duration {
        lock_unpoisoned(&self.delays).iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration, cancel: Option<&CancelSignal>) -> bool {
        lock_unpoisoned(&self.delays).push(delay);
        !cancel.is_some_and(CancelSignal::is_cancelled)
    }
}

/// [`Exchanger`] double that hands out queued results and records the
/// exchanges it receives.
///
/// Queued responses go through the same status rules as
/// [`Executor`](crate::Executor): a status that is not a success for the
/// exchange's method comes back as [`Error::RequestFailed`].
#[derive(Debug, Default)]
pub struct ScriptedExchanger {
    results: Mutex<VecDeque<OpsResult<ExchangeResponse>>>,
    exchanges: Mutex<Vec<Exchange>>,
}

impl ScriptedExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: impl Into<String>) -> &Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        lock_unpoisoned(&self.results).push_back(Ok(ExchangeResponse::buffered(
            status,
            HeaderMap::new(),
            body,
        )));
        self
    }

    pub fn push_error(&self, error: Error) -> &Self {
        lock_unpoisoned(&self.results).push_back(Err(error));
        self
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        lock_unpoisoned(&self.exchanges).clone()
    }
}

impl Exchanger for ScriptedExchanger {
    fn exchange(&self, exchange: Exchange) -> OpsResult<ExchangeResponse> {
        let method = exchange.method().clone();
        let uri = redact_uri_for_logs(exchange.target());
        lock_unpoisoned(&self.exchanges).push(exchange);

        let next = lock_unpoisoned(&self.results).pop_front();
        let mut response = match next {
            Some(result) => result?,
            None => {
                return Err(Error::Transport {
                    kind: TransportErrorKind::Other,
                    method,
                    uri,
                    source: Box::new(std::io::Error::other(
                        "scripted exchanger has no results left",
                    )),
                });
            }
        };

        let status = response.status();
        if is_success(&method, status) {
            return Ok(response);
        }
        Err(Error::RequestFailed {
            status: status.as_u16(),
            status_line: status_line(status),
            method,
            uri,
            body: truncate_body(response.body_text()?),
        })
    }
}
