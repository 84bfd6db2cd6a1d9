//! `opskit` is a blocking HTTP request executor for operations tooling.
//!
//! One call sends a request, retries transient transport failures with a
//! sawtooth backoff, and classifies the final status against method-specific
//! success rules.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use opskit::prelude::{Exchange, Executor, RetryPolicy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     opskit::logging::init_from_env()?;
//!
//!     let executor = Executor::builder()
//!         .default_timeout(Duration::from_secs(10))
//!         .retry_policy(RetryPolicy::standard().max_retries(5))
//!         .build();
//!
//!     let (status, body) = executor
//!         .exchange(
//!             Exchange::post("https://api.example.com/v1/items")
//!                 .header("authorization", "Bearer token")
//!                 .json(&serde_json::json!({ "name": "demo" }))?,
//!         )?
//!         .into_parts()?;
//!
//!     println!("created status={status} body={body}");
//!     Ok(())
//! }
//! ```
//!
//! # Success Rules
//!
//! - `200` succeeds for every method.
//! - `201` additionally succeeds for `POST`, `204` for `DELETE`.
//! - Anything else is [`Error::RequestFailed`] carrying the status line and body.

mod cancel;
mod error;
mod executor;
mod extensions;
pub mod logging;
mod response;
mod retry;
pub mod testing;
mod util;

pub use crate::cancel::CancelSignal;
pub use crate::error::{BoxError, Error, ErrorCode, TransportErrorKind};
pub use crate::executor::{
    Exchange, Exchanger, Executor, ExecutorBuilder, Payload, PreparedRequest, Transport,
    TransportClient, TransportResponse, UreqTransport,
};
pub use crate::extensions::{Sleeper, ThreadSleeper};
pub use crate::response::ExchangeResponse;
pub use crate::retry::{BackoffShape, RetryPolicy};

pub type OpsResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BackoffShape, CancelSignal, Error, ErrorCode, Exchange, ExchangeResponse, Exchanger,
        Executor, ExecutorBuilder, OpsResult, Payload, RetryPolicy, TransportErrorKind,
    };
}
