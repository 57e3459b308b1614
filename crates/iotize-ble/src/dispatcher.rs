//! Single-in-flight request pump.
//!
//! One task owns the link, the packet assembler and the current request.
//! Notifications, queue wake-ups and the periodic tick are all served by that
//! task, so at most one request is ever between `Sent` and a terminal state.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use iotize_transport::BleLink;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::codec::{encode_packets, PacketAssembler, ReassembledFrame};
use crate::config::SessionConfig;
use crate::request::{Request, RequestState};
use crate::stats::StatsCounters;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<Request>,
    closed: bool,
}

/// FIFO of requests waiting for the dispatcher. Safe to push from any task.
#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl RequestQueue {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends and wakes the dispatcher. Hands the request back once closed.
    pub fn push(&self, request: Request) -> Result<(), Request> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(request);
            }
            inner.pending.push_back(request);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub fn pop(&self) -> Option<Request> {
        self.lock().pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Refuses further pushes and returns everything still queued.
    pub fn close_and_drain(&self) -> Vec<Request> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.pending.drain(..).collect()
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchState {
    Idle,
    Sending,
    AwaitingResponse,
}

/// Why [`Dispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpExit {
    Stopped,
    /// The notification stream ended underneath the dispatcher.
    LinkLost,
}

pub(crate) struct Dispatcher<L: BleLink> {
    link: L,
    config: SessionConfig,
    queue: Arc<RequestQueue>,
    stats: Arc<StatsCounters>,
    assembler: PacketAssembler,
    current: Option<Request>,
    state: DispatchState,
}

impl<L: BleLink> Dispatcher<L> {
    pub fn new(
        link: L,
        config: SessionConfig,
        queue: Arc<RequestQueue>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        let assembler = PacketAssembler::new(config.rx_buffer_capacity);
        Self {
            link,
            config,
            queue,
            stats,
            assembler,
            current: None,
            state: DispatchState::Idle,
        }
    }

    /// Pumps until stopped or until the link goes away, then tears down and
    /// hands the link back.
    pub async fn run(
        mut self,
        mut notifications: mpsc::Receiver<Vec<u8>>,
        mut stop: oneshot::Receiver<()>,
    ) -> (L, PumpExit) {
        let mut tick = time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let queue = Arc::clone(&self.queue);

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut stop => break PumpExit::Stopped,
                packet = notifications.recv() => match packet {
                    Some(packet) => self.on_notification(&packet),
                    None => break PumpExit::LinkLost,
                },
                _ = queue.notified() => {}
                _ = tick.tick() => {}
            }

            self.expire_current();
            if self.dispatch_next(&mut stop).await.is_break() {
                break PumpExit::Stopped;
            }
        };

        match exit {
            PumpExit::Stopped => debug!("dispatcher stopping"),
            PumpExit::LinkLost => warn!("notification stream ended, dispatcher stopping"),
        }
        self.teardown().await;
        (self.link, exit)
    }

    fn set_state(&mut self, next: DispatchState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "dispatch state");
            self.state = next;
        }
    }

    fn on_notification(&mut self, packet: &[u8]) {
        StatsCounters::bump(&self.stats.packets_received);
        if let Some(frame) = self.assembler.ingest(packet) {
            self.on_frame(frame);
        }
    }

    fn on_frame(&mut self, frame: ReassembledFrame) {
        StatsCounters::bump(&self.stats.frames_completed);
        if !frame.checksum_ok {
            StatsCounters::bump(&self.stats.checksum_errors);
            warn!(frame = %hex::encode(&frame.bytes), "checksum mismatch on inbound frame");
        }

        self.expire_current();
        match &self.current {
            Some(request) => {
                debug!(
                    request = %request.id(),
                    response = %hex::encode(&frame.bytes),
                    "response received"
                );
                request.complete(frame.bytes);
            }
            None => {
                StatsCounters::bump(&self.stats.orphan_frames);
                debug!(frame = %hex::encode(&frame.bytes), "dropping frame with no request awaiting it");
            }
        }
        self.release_current();
    }

    /// Times out the current request past its deadline and releases it once
    /// it is terminal.
    fn expire_current(&mut self) {
        let Some(request) = &self.current else {
            return;
        };
        if !request.state().is_terminal() {
            match request.deadline(self.config.request_timeout) {
                Some(deadline) if Instant::now() >= deadline => {
                    if request.time_out() {
                        warn!(
                            request = %request.id(),
                            payload = %hex::encode(request.payload()),
                            "request timed out"
                        );
                    }
                }
                _ => return,
            }
        }
        self.release_current();
    }

    fn release_current(&mut self) {
        let Some(request) = self.current.take() else {
            return;
        };
        let counter = match request.state() {
            RequestState::Answered => &self.stats.requests_answered,
            RequestState::TimedOut => &self.stats.requests_timed_out,
            RequestState::Cancelled => &self.stats.requests_cancelled,
            RequestState::Created | RequestState::Sent => {
                // Released before settling; keep it current.
                self.current = Some(request);
                return;
            }
        };
        StatsCounters::bump(counter);
        self.set_state(DispatchState::Idle);
    }

    async fn dispatch_next(&mut self, stop: &mut oneshot::Receiver<()>) -> ControlFlow<()> {
        if self.current.is_some() {
            return ControlFlow::Continue(());
        }
        let request = loop {
            let Some(request) = self.queue.pop() else {
                return ControlFlow::Continue(());
            };
            if request.mark_sent() {
                break request;
            }
            debug!(request = %request.id(), state = ?request.state(), "skipping settled request");
        };

        self.assembler.reset();
        StatsCounters::bump(&self.stats.requests_dispatched);
        self.current = Some(request.clone());
        self.set_state(DispatchState::Sending);

        let packets = match encode_packets(request.payload(), self.config.packet_size) {
            Ok(packets) => packets,
            Err(err) => {
                warn!(request = %request.id(), error = %err, "request cannot be encoded");
                request.fail(err.to_string());
                self.release_current();
                return ControlFlow::Continue(());
            }
        };
        debug!(
            request = %request.id(),
            payload = %hex::encode(request.payload()),
            packets = packets.len(),
            "dispatching request"
        );

        let deadline = request.deadline(self.config.request_timeout);
        for packet in &packets {
            if request.state().is_terminal() {
                debug!(request = %request.id(), state = ?request.state(), "request settled mid-send");
                self.release_current();
                return ControlFlow::Continue(());
            }
            let written = tokio::select! {
                biased;
                _ = &mut *stop => return ControlFlow::Break(()),
                _ = sleep_until_deadline(deadline) => None,
                result = self.link.write_packet(packet) => Some(result),
            };
            match written {
                Some(Ok(())) => StatsCounters::bump(&self.stats.packets_written),
                Some(Err(err)) => {
                    StatsCounters::bump(&self.stats.write_errors);
                    warn!(request = %request.id(), error = %err, "packet write failed");
                    request.fail(err.to_string());
                    self.release_current();
                    return ControlFlow::Continue(());
                }
                None => {
                    if request.time_out() {
                        warn!(request = %request.id(), "request timed out while sending");
                    }
                    self.release_current();
                    return ControlFlow::Continue(());
                }
            }
        }

        self.set_state(DispatchState::AwaitingResponse);
        ControlFlow::Continue(())
    }

    /// Cancels the current request, drains the queue and closes the link.
    ///
    /// Every cancellation is followed by a `cancel_settle` pause so a write
    /// acknowledgment still in transit can land before the link goes away.
    async fn teardown(&mut self) {
        let cancelled_current = match &self.current {
            Some(request) if request.cancel() => {
                debug!(request = %request.id(), "cancelled in-flight request");
                true
            }
            _ => false,
        };
        self.release_current();
        if cancelled_current {
            time::sleep(self.config.cancel_settle).await;
        }

        for request in self.queue.close_and_drain() {
            if request.cancel() {
                StatsCounters::bump(&self.stats.requests_cancelled);
                debug!(request = %request.id(), "cancelled queued request");
                time::sleep(self.config.cancel_settle).await;
            }
        }

        self.assembler.reset();
        self.link.close().await;
        self.set_state(DispatchState::Idle);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
