use std::time::Duration;

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures_util::StreamExt;
use iotize_transport::{BleLink, FirmwareVersion, LinkReady};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{APP_INFO_CHAR_UUID, BUFFER_CHAR_UUID, SPP_SERVICE_UUID};

#[derive(Debug, Clone)]
pub struct BtleplugLinkConfig {
    /// How long [`BtleplugLink::find`] scans before giving up.
    pub scan_window: Duration,
    pub notification_capacity: usize,
}

impl Default for BtleplugLinkConfig {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(5),
            notification_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum BtleplugLinkError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("invalid uuid: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("no bluetooth adapter available")]
    AdapterUnavailable,
    #[error("no peripheral named or addressed {0:?} found")]
    PeripheralNotFound(String),
    #[error("SPP buffer characteristic not found")]
    CharacteristicMissing,
    #[error("link is not open")]
    NotOpen,
}

/// [`BleLink`] over a `btleplug` peripheral exposing the IoTize SPP service.
#[derive(Debug)]
pub struct BtleplugLink {
    peripheral: Peripheral,
    config: BtleplugLinkConfig,
    buffer: Option<Characteristic>,
    write_type: WriteType,
    forwarder: Option<JoinHandle<()>>,
}

impl BtleplugLink {
    pub fn new(peripheral: Peripheral, config: BtleplugLinkConfig) -> Self {
        Self {
            peripheral,
            config,
            buffer: None,
            write_type: WriteType::WithResponse,
            forwarder: None,
        }
    }

    /// Scans on the first adapter for a peripheral whose local name or address
    /// equals `target`.
    pub async fn find(target: &str, config: BtleplugLinkConfig) -> Result<Self, BtleplugLinkError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BtleplugLinkError::AdapterUnavailable)?;

        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(config.scan_window).await;
        let peripherals = adapter.peripherals().await?;
        if let Err(err) = adapter.stop_scan().await {
            debug!(error = %err, "stop_scan failed");
        }

        for peripheral in peripherals {
            let address = peripheral.address().to_string();
            let local_name = peripheral
                .properties()
                .await?
                .and_then(|props| props.local_name);
            if local_name.as_deref() == Some(target) || address.eq_ignore_ascii_case(target) {
                info!(%address, name = ?local_name, "peripheral found");
                return Ok(Self::new(peripheral, config));
            }
        }
        Err(BtleplugLinkError::PeripheralNotFound(target.to_string()))
    }

    async fn read_firmware(&self, characteristics: &[Characteristic]) -> Option<FirmwareVersion> {
        let app_info = Uuid::parse_str(APP_INFO_CHAR_UUID).ok()?;
        let characteristic = characteristics.iter().find(|c| c.uuid == app_info)?;
        match self.peripheral.read(characteristic).await {
            Ok(value) => FirmwareVersion::from_app_info(&value),
            Err(err) => {
                warn!(error = %err, "failed to read app info characteristic");
                None
            }
        }
    }
}

impl BleLink for BtleplugLink {
    type Error = BtleplugLinkError;

    async fn open(&mut self) -> Result<LinkReady, Self::Error> {
        let service = Uuid::parse_str(SPP_SERVICE_UUID)?;
        let buffer_uuid = Uuid::parse_str(BUFFER_CHAR_UUID)?;

        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        self.peripheral.discover_services().await?;

        let characteristics: Vec<Characteristic> =
            self.peripheral.characteristics().into_iter().collect();
        let buffer = characteristics
            .iter()
            .find(|c| c.uuid == buffer_uuid && c.service_uuid == service)
            .cloned()
            .ok_or(BtleplugLinkError::CharacteristicMissing)?;
        self.write_type = if buffer.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        let firmware = self.read_firmware(&characteristics).await;

        self.peripheral.subscribe(&buffer).await?;
        let mut stream = self.peripheral.notifications().await?;
        let (tx, notifications) = mpsc::channel(self.config.notification_capacity.max(1));
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != buffer_uuid {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
            debug!("notification stream closed");
        }));

        info!(
            write_type = ?self.write_type,
            firmware = ?firmware.map(|f| f.to_string()),
            "link open"
        );
        self.buffer = Some(buffer);
        Ok(LinkReady {
            notifications,
            firmware,
        })
    }

    async fn write_packet(&mut self, packet: &[u8]) -> Result<(), Self::Error> {
        let buffer = self.buffer.as_ref().ok_or(BtleplugLinkError::NotOpen)?;
        self.peripheral.write(buffer, packet, self.write_type).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(buffer) = self.buffer.take() {
            if let Err(err) = self.peripheral.unsubscribe(&buffer).await {
                debug!(error = %err, "unsubscribe failed");
            }
        }
        if let Err(err) = self.peripheral.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
