use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::RetryStrategy;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BrokerError;
use crate::event::{ConnectionEvent, ConnectionStatus};

/// Capacity of each connection's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Behaviour shared by pooled broker connections.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    fn broker_id(&self) -> &str;

    fn broker_url(&self) -> &str;

    /// Establish the connection. Waits until the broker accepted it.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Close the connection for good. The instance cannot be reused.
    async fn disconnect(&self);

    fn status(&self) -> ConnectionStatus;

    /// Follow status transitions.
    fn watch_status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Receive [`ConnectionEvent`]s from now on.
    fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

/// Automatic reconnection after a transport error.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`. After
/// `max_attempts` failures the connection stays in
/// [`ConnectionStatus::Error`] until `connect()` is called again.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before 1-based reconnect `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        RetryStrategy::exponential(self.base_delay, 2.0).delay_for(attempt.saturating_sub(1))
    }
}

/// Outcome of [`ConnectionState::next_reconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectStep {
    /// Wait `delay`, then make 1-based attempt `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The policy is used up and the state is already `Error`.
    Exhausted,
}

/// Status, events and reconnect bookkeeping shared by connection types.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ConnectionEvent>,
    reconnect_attempts: AtomicU32,
    closed: CancellationToken,
}

impl ConnectionState {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            status,
            events,
            reconnect_attempts: AtomicU32::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn set_connecting(&self) {
        self.status.send_replace(ConnectionStatus::Connecting);
        self.emit(ConnectionEvent::Connecting);
    }

    pub(crate) fn set_connected(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.status.send_replace(ConnectionStatus::Connected);
        self.emit(ConnectionEvent::Connected);
    }

    pub(crate) fn set_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(%reason, "broker connection entered error state");
        self.status.send_replace(ConnectionStatus::Error);
        self.emit(ConnectionEvent::Error(reason));
    }

    pub(crate) fn set_closed(&self) {
        self.closed.cancel();
        self.status.send_replace(ConnectionStatus::Disconnected);
        self.emit(ConnectionEvent::Closed);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Count one more reconnect attempt, returning its 1-based number.
    pub(crate) fn next_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    /// Count a reconnect attempt against `policy`. Once the policy is
    /// exhausted the state moves to `Error` with a
    /// [`BrokerError::ReconnectExhausted`] event.
    pub(crate) fn next_reconnect(&self, policy: &ReconnectPolicy, broker_id: &str) -> ReconnectStep {
        let attempt = self.next_attempt();
        if attempt > policy.max_attempts {
            let err = BrokerError::ReconnectExhausted {
                attempts: policy.max_attempts,
            };
            error!(broker_id, error = %err, "giving up on broker connection");
            self.set_error(err.to_string());
            return ReconnectStep::Exhausted;
        }
        ReconnectStep::Retry {
            attempt,
            delay: policy.delay_for(attempt),
        }
    }

    /// Call `open` with backoff until it succeeds, `policy` runs out or the
    /// connection is closed. Returns whether the link is back up.
    pub(crate) async fn reconnect_with<F, Fut>(
        &self,
        policy: &ReconnectPolicy,
        broker_id: &str,
        mut open: F,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), BrokerError>>,
    {
        let closed = self.closed_token();
        loop {
            let ReconnectStep::Retry { attempt, delay } = self.next_reconnect(policy, broker_id) else {
                return false;
            };
            debug!(broker_id, attempt, ?delay, "scheduling reconnect");
            tokio::select! {
                biased;
                () = closed.cancelled() => return false,
                () = tokio::time::sleep(delay) => {}
            }

            self.set_connecting();
            match open().await {
                Ok(()) => {
                    info!(broker_id, attempt, "reconnected to broker");
                    self.set_connected();
                    return true;
                }
                Err(e) => {
                    warn!(broker_id, attempt, error = %e, "reconnect failed");
                    self.set_error(e.to_string());
                }
            }
        }
    }

    /// Wait until the status leaves `Connecting`.
    pub(crate) async fn settled(&self) -> ConnectionStatus {
        let mut rx = self.watch();
        match rx.wait_for(|status| *status != ConnectionStatus::Connecting).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_from_base() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn state_transitions_emit_events() {
        let state = ConnectionState::new();
        let mut events = state.subscribe();

        state.set_connecting();
        state.set_connected();
        state.set_error("boom");
        state.set_closed();

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connecting);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Error("boom".into())
        );
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Closed);
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert!(state.is_closed());
    }

    #[test]
    fn exhausted_policy_reports_error() {
        let state = ConnectionState::new();
        let mut events = state.subscribe();
        let policy = ReconnectPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(250),
        };

        assert_eq!(
            state.next_reconnect(&policy, "b1"),
            ReconnectStep::Retry {
                attempt: 1,
                delay: Duration::from_millis(250),
            }
        );
        assert_eq!(state.next_reconnect(&policy, "b1"), ReconnectStep::Exhausted);
        assert_eq!(state.status(), ConnectionStatus::Error);
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::Error("reconnect attempts exhausted after 1 tries".into())
        );
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_max_attempts() {
        tokio::time::pause();
        let state = ConnectionState::new();
        let mut events = state.subscribe();
        let policy = ReconnectPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
        };
        let opens = AtomicU32::new(0);

        let reconnected = state
            .reconnect_with(&policy, "b1", || {
                opens.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::Connect("connection refused".into())) }
            })
            .await;

        assert!(!reconnected);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(state.status(), ConnectionStatus::Error);
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen.last(),
            Some(&ConnectionEvent::Error(
                "reconnect attempts exhausted after 2 tries".into()
            ))
        );
        assert_eq!(
            seen.iter()
                .filter(|e| **e == ConnectionEvent::Connecting)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn reconnect_succeeds_and_resets_attempts() {
        tokio::time::pause();
        let state = ConnectionState::new();
        let policy = ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
        };
        let opens = AtomicU32::new(0);

        let reconnected = state
            .reconnect_with(&policy, "b1", || {
                let n = opens.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BrokerError::Connect("connection refused".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(reconnected);
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.next_attempt(), 1);
    }

    #[tokio::test]
    async fn closing_stops_reconnect() {
        let state = ConnectionState::new();
        state.set_closed();
        let policy = ReconnectPolicy::default();
        let opens = AtomicU32::new(0);

        let reconnected = state
            .reconnect_with(&policy, "b1", || {
                opens.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(!reconnected);
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn attempts_reset_on_connect() {
        let state = ConnectionState::new();
        assert_eq!(state.next_attempt(), 1);
        assert_eq!(state.next_attempt(), 2);
        state.set_connected();
        assert_eq!(state.next_attempt(), 1);
    }
}
