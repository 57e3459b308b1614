use std::time::Duration;

use iotize_transport::FirmwareVersion;
use serde::Deserialize;

use crate::codec::max_frame_len;
use crate::error::ConfigError;
use crate::protocol::{MAX_HEADER_OFFSET, PACKET_DATA_LEN, RX_BUFFER_CAPACITY};

const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Frame bytes carried per packet, header excluded.
    pub packet_size: usize,
    /// Receive buffer size of the packet assembler.
    pub rx_buffer_capacity: usize,
    /// Time a request may wait for its answer, counted from the first packet write.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Dispatcher tick: queue checks and deadline checks.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Pause after each cancellation on teardown.
    #[serde(with = "humantime_serde")]
    pub cancel_settle: Duration,
    /// Oldest BLE firmware accepted without recording an error.
    pub min_firmware: FirmwareVersion,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_size: PACKET_DATA_LEN,
            rx_buffer_capacity: RX_BUFFER_CAPACITY,
            request_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(20),
            cancel_settle: Duration::from_millis(30),
            min_firmware: FirmwareVersion::new(1, 9),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_size == 0 || self.packet_size > MAX_HEADER_OFFSET {
            return Err(ConfigError::Invalid("packet_size must be within 1..=255"));
        }
        // Fragments must end strictly below capacity to be kept.
        if self.rx_buffer_capacity <= max_frame_len(self.packet_size) {
            return Err(ConfigError::Invalid(
                "rx_buffer_capacity must exceed the largest encodable frame",
            ));
        }
        if self.request_timeout.is_zero() || self.request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::Invalid(
                "request_timeout must be non-zero and at most one day",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use iotize_transport::FirmwareVersion;

    use super::SessionConfig;
    use crate::error::ConfigError;

    #[test]
    fn defaults_match_device_values() {
        let config = SessionConfig::default();
        assert_eq!(config.packet_size, 19);
        assert_eq!(config.rx_buffer_capacity, 300);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.cancel_settle, Duration::from_millis(30));
        assert_eq!(config.min_firmware, FirmwareVersion::new(1, 9));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            request_timeout = "5s"
            poll_interval = "10ms"
            min_firmware = "2.1"
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.min_firmware, FirmwareVersion::new(2, 1));
        assert_eq!(config.packet_size, 19);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            SessionConfig::from_toml_str("mtu = 23"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("packet_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("rx_buffer_capacity = 64"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str(r#"poll_interval = "0s""#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn buffer_must_exceed_largest_frame() {
        // 255 + 19 byte frame.
        assert!(matches!(
            SessionConfig::from_toml_str("rx_buffer_capacity = 274"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(SessionConfig::from_toml_str("rx_buffer_capacity = 275").is_ok());
    }

    #[test]
    fn request_timeout_is_bounded() {
        assert!(SessionConfig::from_toml_str(r#"request_timeout = "24h""#).is_ok());
        assert!(matches!(
            SessionConfig::from_toml_str(r#"request_timeout = "25h""#),
            Err(ConfigError::Invalid(_))
        ));
        let config = SessionConfig {
            request_timeout: Duration::MAX,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
