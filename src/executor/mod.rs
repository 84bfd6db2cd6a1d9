use std::sync::Arc;
use std::time::Duration;

use crate::OpsResult;
use crate::extensions::Sleeper;
use crate::response::ExchangeResponse;
use crate::retry::RetryPolicy;

mod builder;
mod exchange;
mod execute;
mod transport;

pub(crate) use execute::is_success;
pub use exchange::{Exchange, Payload};
pub use transport::{PreparedRequest, Transport, TransportClient, TransportResponse, UreqTransport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 100;
const DEFAULT_POOL_MAX_IDLE_CONNECTIONS: usize = 100;
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_USER_AGENT: &str = concat!("opskit/", env!("CARGO_PKG_VERSION"));

/// Anything that can run an [`Exchange`].
///
/// [`Executor`] is the production implementation;
/// [`ScriptedExchanger`](crate::testing::ScriptedExchanger) stands in for it
/// in tests of code that only needs status and body.
pub trait Exchanger: Send + Sync {
    fn exchange(&self, exchange: Exchange) -> OpsResult<ExchangeResponse>;
}

pub struct ExecutorBuilder {
    default_timeout: Duration,
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_max_idle_connections: usize,
    max_response_body_bytes: usize,
    user_agent: String,
    retry_policy: RetryPolicy,
    transport: Option<Arc<dyn Transport>>,
    sleeper: Arc<dyn Sleeper>,
}

/// Blocking request executor with sawtooth retry on transient transport
/// failures. Cheap to share behind an `Arc`.
pub struct Executor {
    default_timeout: Duration,
    max_response_body_bytes: usize,
    retry_policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Executor")
            .field("default_timeout", &self.default_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Exchanger for Executor {
    fn exchange(&self, exchange: Exchange) -> OpsResult<ExchangeResponse> {
        Executor::exchange(self, exchange)
    }
}
