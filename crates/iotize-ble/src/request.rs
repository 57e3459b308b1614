use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RequestError;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Sent,
    Answered,
    TimedOut,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Answered | Self::TimedOut | Self::Cancelled)
    }
}

#[derive(Debug)]
struct Slot {
    state: RequestState,
    sent_at: Option<Instant>,
    response: Option<Vec<u8>>,
    failure: Option<String>,
}

#[derive(Debug)]
struct RequestInner {
    id: RequestId,
    payload: Vec<u8>,
    slot: watch::Sender<Slot>,
}

/// One command/response exchange.
///
/// Clones share the same exchange: the dispatcher holds one while the request
/// is queued or in flight, the caller holds another to await the answer.
/// State only moves forward; transitions out of a terminal state are refused.
#[derive(Debug, Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        let (slot, _) = watch::channel(Slot {
            state: RequestState::Created,
            sent_at: None,
            response: None,
            failure: None,
        });
        Self {
            inner: Arc::new(RequestInner {
                id: RequestId::next(),
                payload: payload.into(),
                slot,
            }),
        }
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    /// Outbound payload, without checksum.
    pub fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    pub fn state(&self) -> RequestState {
        self.inner.slot.borrow().state
    }

    pub fn response(&self) -> Option<Vec<u8>> {
        self.inner.slot.borrow().response.clone()
    }

    /// Instant the request was handed to the transport; starts its timeout clock.
    pub fn sent_at(&self) -> Option<Instant> {
        self.inner.slot.borrow().sent_at
    }

    /// `None` until sent, or when `timeout` reaches past the clock's range.
    pub fn deadline(&self, timeout: Duration) -> Option<Instant> {
        self.sent_at()?.checked_add(timeout)
    }

    /// Created -> Sent.
    pub fn mark_sent(&self) -> bool {
        self.transition(|slot| {
            if slot.state != RequestState::Created {
                return false;
            }
            slot.state = RequestState::Sent;
            slot.sent_at = Some(Instant::now());
            true
        })
    }

    /// Sent -> Answered.
    pub fn complete(&self, response: Vec<u8>) -> bool {
        self.transition(|slot| {
            if slot.state != RequestState::Sent {
                return false;
            }
            slot.state = RequestState::Answered;
            slot.response = Some(response);
            true
        })
    }

    /// Sent -> TimedOut.
    pub fn time_out(&self) -> bool {
        self.transition(|slot| {
            if slot.state != RequestState::Sent {
                return false;
            }
            slot.state = RequestState::TimedOut;
            true
        })
    }

    /// Any non-terminal state -> Cancelled.
    pub fn cancel(&self) -> bool {
        self.transition(|slot| {
            if slot.state.is_terminal() {
                return false;
            }
            slot.state = RequestState::Cancelled;
            true
        })
    }

    /// Cancels because the transport failed; waiters see the transport error.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.transition(|slot| {
            if slot.state.is_terminal() {
                return false;
            }
            slot.state = RequestState::Cancelled;
            slot.failure = Some(reason);
            true
        })
    }

    fn transition(&self, apply: impl FnOnce(&mut Slot) -> bool) -> bool {
        self.inner.slot.send_if_modified(apply)
    }

    /// Waits until the request is answered, cancelled or `timeout` has elapsed
    /// since it was sent.
    ///
    /// The clock does not run while the request is still queued. On expiry the
    /// request is moved to `TimedOut` unless it reached a terminal state first.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<Vec<u8>, RequestError> {
        let mut rx = self.inner.slot.subscribe();
        let sent_at = match rx
            .wait_for(|slot| slot.state != RequestState::Created)
            .await
        {
            Ok(slot) => slot.sent_at,
            Err(_) => return Err(RequestError::Cancelled),
        };

        let Some(sent_at) = sent_at else {
            return self.outcome();
        };
        let settled = rx.wait_for(|slot| slot.state.is_terminal());
        let expired = match sent_at.checked_add(timeout) {
            Some(deadline) => tokio::time::timeout_at(deadline, settled).await.is_err(),
            None => {
                let _ = settled.await;
                false
            }
        };
        if expired && self.time_out() {
            debug!(request = %self.id(), ?timeout, "request wait expired");
        }
        self.outcome()
    }

    fn outcome(&self) -> Result<Vec<u8>, RequestError> {
        let slot = self.inner.slot.borrow();
        match slot.state {
            RequestState::Answered => Ok(slot.response.clone().unwrap_or_default()),
            RequestState::Cancelled => match &slot.failure {
                Some(reason) => Err(RequestError::Transport(reason.clone())),
                None => Err(RequestError::Cancelled),
            },
            RequestState::TimedOut | RequestState::Sent | RequestState::Created => {
                Err(RequestError::Timeout {
                    payload: self.inner.payload.clone(),
                })
            }
        }
    }
}
