use iotize_transport::FirmwareVersion;
use thiserror::Error;

/// Errors returned by the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The frame's highest packet offset would not fit in the one-byte header.
    #[error("frame of {len} bytes exceeds the {max} byte limit of the offset header")]
    FrameTooLarge { len: usize, max: usize },
}

/// Outcome of a request that did not get an answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request timed out waiting for answer to {}", hex::encode(.payload))]
    Timeout { payload: Vec<u8> },
    #[error("request cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is not ready")]
    NotReady,
    #[error("session is already connected")]
    AlreadyConnected,
    #[error("link unavailable")]
    LinkUnavailable,
    #[error("link error: {0}")]
    Link(String),
    #[error("link lost: {0}")]
    LinkLost(String),
    #[error("BLE firmware {found} is older than required {minimum}")]
    FirmwareOutdated {
        found: FirmwareVersion,
        minimum: FirmwareVersion,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}
