use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::link::{BleLink, FirmwareVersion, LinkReady};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InMemoryLinkError {
    #[error("link open rejected")]
    OpenRejected,
    #[error("packet write rejected")]
    WriteRejected,
    #[error("link is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Shared {
    notify_tx: Option<mpsc::Sender<Vec<u8>>>,
    reject_open: bool,
    reject_writes: bool,
    firmware: Option<FirmwareVersion>,
    open_count: u64,
    close_count: u64,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory link for tests and simulations.
///
/// Written packets are captured for the paired [`InMemoryPeer`], which plays
/// the device side and injects notifications.
#[derive(Debug)]
pub struct InMemoryLink {
    shared: Arc<Mutex<Shared>>,
    writes_tx: mpsc::UnboundedSender<Vec<u8>>,
    notification_capacity: usize,
    open: bool,
}

/// Device side of an [`InMemoryLink`].
#[derive(Debug)]
pub struct InMemoryPeer {
    shared: Arc<Mutex<Shared>>,
    writes_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Creates a connected link/peer pair.
pub fn in_memory_link(notification_capacity: usize) -> (InMemoryLink, InMemoryPeer) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let (writes_tx, writes_rx) = mpsc::unbounded_channel();
    (
        InMemoryLink {
            shared: Arc::clone(&shared),
            writes_tx,
            notification_capacity: notification_capacity.max(1),
            open: false,
        },
        InMemoryPeer { shared, writes_rx },
    )
}

impl BleLink for InMemoryLink {
    type Error = InMemoryLinkError;

    async fn open(&mut self) -> Result<LinkReady, Self::Error> {
        let mut shared = lock(&self.shared);
        if shared.reject_open {
            return Err(InMemoryLinkError::OpenRejected);
        }
        let (notify_tx, notifications) = mpsc::channel(self.notification_capacity);
        shared.notify_tx = Some(notify_tx);
        shared.open_count += 1;
        self.open = true;
        Ok(LinkReady {
            notifications,
            firmware: shared.firmware,
        })
    }

    async fn write_packet(&mut self, packet: &[u8]) -> Result<(), Self::Error> {
        if !self.open {
            return Err(InMemoryLinkError::Closed);
        }
        if lock(&self.shared).reject_writes {
            return Err(InMemoryLinkError::WriteRejected);
        }
        self.writes_tx
            .send(packet.to_vec())
            .map_err(|_| InMemoryLinkError::Closed)
    }

    async fn close(&mut self) {
        let mut shared = lock(&self.shared);
        shared.notify_tx = None;
        shared.close_count += 1;
        self.open = false;
    }
}

impl InMemoryPeer {
    /// Waits for the next packet written by the link.
    pub async fn next_write(&mut self) -> Option<Vec<u8>> {
        self.writes_rx.recv().await
    }

    /// Returns the next written packet if one is already captured.
    pub fn try_next_write(&mut self) -> Option<Vec<u8>> {
        self.writes_rx.try_recv().ok()
    }

    /// Drains every packet captured so far.
    pub fn drain_writes(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(packet) = self.writes_rx.try_recv() {
            out.push(packet);
        }
        out
    }

    /// Delivers one notification value to the link, as the device would.
    pub async fn notify(&self, value: Vec<u8>) -> Result<(), InMemoryLinkError> {
        let notify_tx = lock(&self.shared)
            .notify_tx
            .clone()
            .ok_or(InMemoryLinkError::Closed)?;
        notify_tx
            .send(value)
            .await
            .map_err(|_| InMemoryLinkError::Closed)
    }

    /// Simulates the device going away: the notification stream ends.
    pub fn drop_link(&self) {
        lock(&self.shared).notify_tx = None;
    }

    pub fn set_reject_open(&self, reject: bool) {
        lock(&self.shared).reject_open = reject;
    }

    pub fn set_reject_writes(&self, reject: bool) {
        lock(&self.shared).reject_writes = reject;
    }

    /// Firmware version reported on the next `open`.
    pub fn set_firmware(&self, firmware: Option<FirmwareVersion>) {
        lock(&self.shared).firmware = firmware;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared).notify_tx.is_some()
    }

    pub fn open_count(&self) -> u64 {
        lock(&self.shared).open_count
    }

    pub fn close_count(&self) -> u64 {
        lock(&self.shared).close_count
    }
}

#[cfg(test)]
mod tests {
    use super::{in_memory_link, InMemoryLinkError};
    use crate::link::{BleLink, FirmwareVersion};

    #[tokio::test]
    async fn writes_and_notifications_flow_between_pair() {
        let (mut link, mut peer) = in_memory_link(8);
        peer.set_firmware(Some(FirmwareVersion::new(1, 9)));

        let mut ready = link.open().await.expect("open should succeed");
        assert_eq!(ready.firmware, Some(FirmwareVersion::new(1, 9)));
        assert!(peer.is_open());

        link.write_packet(&[0, 1, 2]).await.expect("write should succeed");
        assert_eq!(peer.next_write().await, Some(vec![0, 1, 2]));

        peer.notify(vec![9, 8]).await.expect("notify should succeed");
        assert_eq!(ready.notifications.recv().await, Some(vec![9, 8]));
    }

    #[tokio::test]
    async fn rejected_operations_surface_errors() {
        let (mut link, peer) = in_memory_link(8);
        assert_eq!(
            link.write_packet(&[1]).await,
            Err(InMemoryLinkError::Closed),
            "writes before open must fail"
        );

        peer.set_reject_open(true);
        assert_eq!(
            link.open().await.err(),
            Some(InMemoryLinkError::OpenRejected)
        );

        peer.set_reject_open(false);
        let _ready = link.open().await.expect("open should succeed");
        peer.set_reject_writes(true);
        assert_eq!(
            link.write_packet(&[1]).await,
            Err(InMemoryLinkError::WriteRejected)
        );
    }

    #[tokio::test]
    async fn dropping_or_closing_ends_notification_stream() {
        let (mut link, peer) = in_memory_link(8);
        let mut ready = link.open().await.expect("open should succeed");
        peer.drop_link();
        assert_eq!(ready.notifications.recv().await, None);
        assert_eq!(
            peer.notify(vec![1]).await,
            Err(InMemoryLinkError::Closed)
        );

        let _ready = link.open().await.expect("reopen should succeed");
        link.close().await;
        assert!(!peer.is_open());
        assert_eq!(peer.open_count(), 2);
        assert_eq!(peer.close_count(), 1);
    }
}
