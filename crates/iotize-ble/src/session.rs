use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use iotize_transport::BleLink;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::check_payload_len;
use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, PumpExit, RequestQueue};
use crate::error::{ConfigError, SessionError};
use crate::request::Request;
use crate::stats::{SessionStats, StatsCounters};

const EVENT_CAPACITY: usize = 16;

/// Connection lifecycle notifications, see [`Session::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    LinkLost { reason: String },
}

#[derive(Debug)]
struct SessionShared {
    ready: AtomicBool,
    last_error: Mutex<Option<SessionError>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    fn last_error(&self) -> MutexGuard<'_, Option<SessionError>> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[derive(Debug)]
struct Pump<L> {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<L>,
}

/// A request/response session over one BLE link.
///
/// `connect` opens the link and spawns the dispatcher task; `send` only
/// enqueues. The link is handed back to the session when the dispatcher exits,
/// so a session can be reconnected after `disconnect` or a lost link.
#[derive(Debug)]
pub struct Session<L: BleLink> {
    config: SessionConfig,
    link: Option<L>,
    queue: Arc<RequestQueue>,
    stats: Arc<StatsCounters>,
    shared: Arc<SessionShared>,
    pump: Option<Pump<L>>,
}

impl<L: BleLink> Session<L> {
    pub fn new(link: L, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            link: Some(link),
            queue: Arc::new(RequestQueue::default()),
            stats: Arc::new(StatsCounters::default()),
            shared: Arc::new(SessionShared {
                ready: AtomicBool::new(false),
                last_error: Mutex::new(None),
                events,
            }),
            pump: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens the link, then marks the session ready and starts dispatching.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.reap_finished_pump().await;
        if self.pump.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        let mut link = self.link.take().ok_or(SessionError::LinkUnavailable)?;

        let ready = match link.open().await {
            Ok(ready) => ready,
            Err(err) => {
                warn!(error = %err, "failed to open link");
                self.link = Some(link);
                return Err(SessionError::Link(err.to_string()));
            }
        };

        *self.shared.last_error() = None;
        if let Some(found) = ready.firmware {
            let minimum = self.config.min_firmware;
            if found.is_at_least(minimum) {
                debug!(firmware = %found, "firmware version accepted");
            } else {
                warn!(firmware = %found, minimum = %minimum, "BLE firmware is outdated");
                *self.shared.last_error() = Some(SessionError::FirmwareOutdated { found, minimum });
            }
        }

        self.queue.reopen();
        self.shared.ready.store(true, Ordering::Release);

        let (stop_tx, stop_rx) = oneshot::channel();
        let dispatcher = Dispatcher::new(
            link,
            self.config.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.stats),
        );
        let shared = Arc::clone(&self.shared);
        let notifications = ready.notifications;
        let task = tokio::spawn(async move {
            let (link, exit) = dispatcher.run(notifications, stop_rx).await;
            if exit == PumpExit::LinkLost {
                shared.ready.store(false, Ordering::Release);
                let reason = "notification stream ended".to_string();
                *shared.last_error() = Some(SessionError::LinkLost(reason.clone()));
                shared.emit(SessionEvent::LinkLost { reason });
            }
            link
        });
        self.pump = Some(Pump { stop_tx, task });

        info!("session connected");
        self.shared.emit(SessionEvent::Connected);
        Ok(())
    }

    /// Stops dispatching, cancels outstanding requests and closes the link.
    ///
    /// Returns once the dispatcher has finished tearing down.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.shared.ready.store(false, Ordering::Release);
        let Some(pump) = self.pump.take() else {
            return Ok(());
        };
        // The dispatcher may already be gone after a lost link.
        let _ = pump.stop_tx.send(());
        let link = pump.task.await.map_err(|err| {
            warn!(error = %err, "dispatcher task failed");
            SessionError::Link(format!("dispatcher task failed: {err}"))
        })?;
        self.link = Some(link);

        info!("session disconnected");
        self.shared.emit(SessionEvent::Disconnected);
        Ok(())
    }

    async fn reap_finished_pump(&mut self) {
        if !self.pump.as_ref().is_some_and(|pump| pump.task.is_finished()) {
            return;
        }
        if let Some(pump) = self.pump.take() {
            match pump.task.await {
                Ok(link) => self.link = Some(link),
                Err(err) => warn!(error = %err, "dispatcher task failed"),
            }
        }
    }

    /// Enqueues `payload` and returns the request handle without waiting.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<Request, SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }
        let payload = payload.into();
        check_payload_len(payload.len(), self.config.packet_size)?;

        let request = Request::new(payload);
        self.queue
            .push(request.clone())
            .map_err(|_| SessionError::NotReady)?;
        debug!(
            request = %request.id(),
            payload = %hex::encode(request.payload()),
            pending = self.queue.len(),
            "request queued"
        );
        Ok(request)
    }

    /// Sends `payload` and waits for the answer using the configured timeout.
    pub async fn request(&self, payload: impl Into<Vec<u8>>) -> Result<Vec<u8>, SessionError> {
        self.request_with_timeout(payload, self.config.request_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        payload: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Vec<u8>, SessionError> {
        let request = self.send(payload)?;
        Ok(request.wait_for_completion(timeout).await?)
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Requests queued and not yet handed to the link.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Last error recorded by `connect` or by the dispatcher, if any.
    pub fn check_connection(&self) -> Result<(), SessionError> {
        match self.shared.last_error().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<L: BleLink> Drop for Session<L> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            let _ = pump.stop_tx.send(());
        }
    }
}
