//! Request/response protocol engine for IoTize devices over BLE.
//!
//! Payloads are framed with a one-byte additive checksum, cut into packets
//! carrying a one-byte offset header and written tail first over the SPP
//! buffer characteristic. A [`Session`] keeps at most one request in flight
//! and matches each reassembled frame to it. The platform link is abstracted
//! behind `iotize_transport::BleLink`; enable the `btleplug` feature for the
//! desktop backend.

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod request;
pub mod session;
pub mod stats;

pub use codec::{encode_packets, PacketAssembler, ReassembledFrame};
pub use config::SessionConfig;
pub use dispatcher::RequestQueue;
pub use error::{CodecError, ConfigError, RequestError, SessionError};
pub use iotize_transport::{BleLink, FirmwareVersion, LinkReady};
pub use request::{Request, RequestId, RequestState};
pub use session::{Session, SessionEvent};
pub use stats::SessionStats;
