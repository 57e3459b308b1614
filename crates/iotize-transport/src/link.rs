use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// BLE firmware version reported by the device upgrade service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parses the app info characteristic value; major/minor are bytes 2 and 3.
    pub fn from_app_info(value: &[u8]) -> Option<Self> {
        match value {
            [_, _, major, minor, ..] => Some(Self::new(*major, *minor)),
            _ => None,
        }
    }

    pub fn is_at_least(&self, minimum: FirmwareVersion) -> bool {
        *self >= minimum
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid firmware version {0:?} (expected MAJOR.MINOR)")]
pub struct ParseFirmwareVersionError(pub String);

impl FromStr for FirmwareVersion {
    type Err = ParseFirmwareVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseFirmwareVersionError(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self::new(
            major.parse().map_err(|_| invalid())?,
            minor.parse().map_err(|_| invalid())?,
        ))
    }
}

impl TryFrom<String> for FirmwareVersion {
    type Error = ParseFirmwareVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Handed back by [`BleLink::open`] once the buffer characteristic is
/// resolved and notifications are enabled.
#[derive(Debug)]
pub struct LinkReady {
    /// Raw notification values of the buffer characteristic, in arrival order.
    pub notifications: mpsc::Receiver<Vec<u8>>,
    /// Firmware version, when the device exposes the upgrade service.
    pub firmware: Option<FirmwareVersion>,
}

/// Packet-level BLE link consumed by the protocol engine.
///
/// Implementations own the platform handle. The engine never writes two
/// packets concurrently and waits for each write to be acknowledged before
/// issuing the next one.
pub trait BleLink: Send + 'static {
    /// Link-specific error, passed through to callers as text.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves the buffer characteristic and subscribes to its notifications.
    fn open(&mut self) -> impl Future<Output = Result<LinkReady, Self::Error>> + Send;

    /// Writes one packet; resolves when the transport acknowledges the write.
    fn write_packet(
        &mut self,
        packet: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Unsubscribes and releases the platform handle.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::FirmwareVersion;

    #[test]
    fn app_info_bytes_carry_major_and_minor() {
        let v = FirmwareVersion::from_app_info(&[0x00, 0x01, 1, 9, 0xFF]).expect("four bytes");
        assert_eq!(v, FirmwareVersion::new(1, 9));
        assert!(FirmwareVersion::from_app_info(&[1, 2, 3]).is_none());
    }

    #[test]
    fn version_ordering_is_major_then_minor() {
        let minimum = FirmwareVersion::new(1, 9);
        assert!(FirmwareVersion::new(1, 9).is_at_least(minimum));
        assert!(FirmwareVersion::new(1, 10).is_at_least(minimum));
        assert!(FirmwareVersion::new(2, 0).is_at_least(minimum));
        assert!(!FirmwareVersion::new(1, 8).is_at_least(minimum));
        assert!(!FirmwareVersion::new(0, 99).is_at_least(minimum));
    }

    #[test]
    fn parses_and_displays_dotted_form() {
        let v: FirmwareVersion = "1.9".parse().expect("valid version");
        assert_eq!(v.to_string(), "1.9");
        assert!("19".parse::<FirmwareVersion>().is_err());
        assert!("1.x".parse::<FirmwareVersion>().is_err());
    }

    #[test]
    fn deserializes_from_string() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            min: FirmwareVersion,
        }
        let w: Wrapper = toml::from_str("min = \"2.3\"").expect("toml should parse");
        assert_eq!(w.min, FirmwareVersion::new(2, 3));
    }
}
