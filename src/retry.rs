use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::error::TransportErrorKind;

const DEFAULT_MAX_RETRIES: usize = 30;
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(10);

/// What happens to the delay once doubling would push it past the ceiling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackoffShape {
    /// Restart from the base delay: 1, 2, 4, 8, 1, 2, 4, 8, ...
    #[default]
    Sawtooth,
    /// Stay at the ceiling: 1, 2, 4, 8, 10, 10, ...
    HoldAtCeiling,
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: usize,
    base_backoff: Duration,
    backoff_ceiling: Duration,
    backoff_shape: BackoffShape,
    deadline: Option<Duration>,
    retryable_kinds: BTreeSet<TransportErrorKind>,
}

impl RetryPolicy {
    pub fn standard() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
            backoff_ceiling: DEFAULT_BACKOFF_CEILING,
            backoff_shape: BackoffShape::Sawtooth,
            deadline: None,
            retryable_kinds: default_retryable_kinds(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff.max(Duration::from_millis(1));
        if self.backoff_ceiling < self.base_backoff {
            self.backoff_ceiling = self.base_backoff;
        }
        self
    }

    pub fn backoff_ceiling(mut self, backoff_ceiling: Duration) -> Self {
        self.backoff_ceiling = backoff_ceiling.max(self.base_backoff);
        self
    }

    pub fn backoff_shape(mut self, backoff_shape: BackoffShape) -> Self {
        self.backoff_shape = backoff_shape;
        self
    }

    /// Wall-clock limit for retrying, measured from the first attempt.
    ///
    /// A failure that arrives after the deadline is returned instead of
    /// retried. When unset, only the retry budget applies; the exchange
    /// timeout bounds each attempt, not the whole call.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline.max(Duration::from_millis(1)));
        self
    }

    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = TransportErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    pub fn max_retries_value(&self) -> usize {
        self.max_retries
    }

    pub fn base_backoff_value(&self) -> Duration {
        self.base_backoff
    }

    pub fn backoff_ceiling_value(&self) -> Duration {
        self.backoff_ceiling
    }

    pub fn deadline_value(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn is_retryable(&self, kind: TransportErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Delays the policy would sleep for, in order, if every attempt failed.
    pub fn backoff_schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut current = self.base_backoff;
        (0..self.max_retries).map(move |_| {
            let delay = current;
            current = self.next_backoff(current);
            delay
        })
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        let doubled = current.saturating_mul(2);
        if doubled <= self.backoff_ceiling {
            return doubled;
        }
        match self.backoff_shape {
            BackoffShape::Sawtooth => self.base_backoff,
            BackoffShape::HoldAtCeiling => self.backoff_ceiling,
        }
    }

    pub(crate) fn start(&self, started_at: Instant) -> RetryState<'_> {
        RetryState {
            policy: self,
            retries_remaining: self.max_retries,
            backoff: self.base_backoff,
            started_at,
            deadline: self.deadline,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Per-exchange retry bookkeeping; lives on the calling thread's stack.
#[derive(Debug)]
pub(crate) struct RetryState<'a> {
    policy: &'a RetryPolicy,
    retries_remaining: usize,
    backoff: Duration,
    started_at: Instant,
    deadline: Option<Duration>,
}

impl RetryState<'_> {
    /// Returns the delay to sleep before the next attempt, or `None` when the
    /// failure is terminal, the budget is spent, or the failure arrived after
    /// the deadline.
    pub(crate) fn next_delay(&mut self, kind: TransportErrorKind, now: Instant) -> Option<Duration> {
        if !self.policy.is_retryable(kind) || self.retries_remaining == 0 {
            return None;
        }
        if let Some(deadline) = self.deadline
            && now.saturating_duration_since(self.started_at) > deadline
        {
            return None;
        }

        let delay = self.backoff;
        self.retries_remaining -= 1;
        self.backoff = self.policy.next_backoff(self.backoff);
        Some(delay)
    }

    pub(crate) fn retries_remaining(&self) -> usize {
        self.retries_remaining
    }
}

pub(crate) fn default_retryable_kinds() -> BTreeSet<TransportErrorKind> {
    [
        TransportErrorKind::ConnectionRefused,
        TransportErrorKind::PoolExhausted,
        TransportErrorKind::HandshakeTimeout,
        TransportErrorKind::IoTimeout,
        TransportErrorKind::UnexpectedEof,
        TransportErrorKind::AwaitingHeadersTimeout,
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{BackoffShape, RetryPolicy};
    use crate::error::TransportErrorKind;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn standard_schedule_is_a_sawtooth() {
        let schedule: Vec<_> = RetryPolicy::standard().backoff_schedule().take(10).collect();
        assert_eq!(schedule, secs(&[1, 2, 4, 8, 1, 2, 4, 8, 1, 2]));
        assert_eq!(RetryPolicy::standard().backoff_schedule().count(), 30);
    }

    #[test]
    fn hold_at_ceiling_schedule_caps_and_stays() {
        let schedule: Vec<_> = RetryPolicy::standard()
            .backoff_shape(BackoffShape::HoldAtCeiling)
            .backoff_schedule()
            .take(7)
            .collect();
        assert_eq!(schedule, secs(&[1, 2, 4, 8, 10, 10, 10]));
    }

    #[test]
    fn ceiling_never_drops_below_base() {
        let policy = RetryPolicy::standard()
            .base_backoff(Duration::from_secs(5))
            .backoff_ceiling(Duration::from_secs(2));
        assert_eq!(policy.backoff_ceiling_value(), Duration::from_secs(5));
    }

    #[test]
    fn state_stops_when_budget_is_spent() {
        let policy = RetryPolicy::standard().max_retries(2);
        let now = Instant::now();
        let mut state = policy.start(now);

        let kind = TransportErrorKind::ConnectionRefused;
        assert_eq!(state.next_delay(kind, now), Some(Duration::from_secs(1)));
        assert_eq!(state.next_delay(kind, now), Some(Duration::from_secs(2)));
        assert_eq!(state.retries_remaining(), 0);
        assert_eq!(state.next_delay(kind, now), None);
    }

    #[test]
    fn state_stops_once_failure_arrives_after_deadline() {
        let policy = RetryPolicy::standard().deadline(Duration::from_secs(5));
        let started_at = Instant::now();
        let mut state = policy.start(started_at);

        let kind = TransportErrorKind::IoTimeout;
        assert_eq!(state.next_delay(kind, started_at), Some(Duration::from_secs(1)));
        // The upcoming delay is not counted against the deadline.
        let near_deadline = started_at + Duration::from_millis(4_900);
        assert_eq!(state.next_delay(kind, near_deadline), Some(Duration::from_secs(2)));
        let past_deadline = started_at + Duration::from_secs(6);
        assert_eq!(state.next_delay(kind, past_deadline), None);
    }

    #[test]
    fn without_deadline_only_budget_limits_retries() {
        let policy = RetryPolicy::standard();
        let started_at = Instant::now();
        let mut state = policy.start(started_at);

        let far_later = started_at + Duration::from_secs(3_600);
        let delays: Vec<_> = std::iter::from_fn(|| {
            state.next_delay(TransportErrorKind::AwaitingHeadersTimeout, far_later)
        })
        .collect();
        assert_eq!(delays.len(), 30);
        assert_eq!(delays, policy.backoff_schedule().collect::<Vec<_>>());
    }

    #[test]
    fn non_retryable_kind_never_yields_a_delay() {
        let policy = RetryPolicy::standard();
        let now = Instant::now();
        let mut state = policy.start(now);
        assert_eq!(state.next_delay(TransportErrorKind::Dns, now), None);
        assert_eq!(state.next_delay(TransportErrorKind::Tls, now), None);
        assert_eq!(state.retries_remaining(), 30);
    }

    #[test]
    fn disabled_policy_has_no_retries() {
        let policy = RetryPolicy::disabled();
        let now = Instant::now();
        let mut state = policy.start(now);
        assert_eq!(state.next_delay(TransportErrorKind::ConnectionRefused, now), None);
        assert_eq!(policy.backoff_schedule().count(), 0);
    }
}
