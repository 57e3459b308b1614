//! Link abstractions for IoTize BLE devices.
//!
//! The protocol engine only depends on the packet-oriented `BleLink` contract
//! defined in this crate. Platform bindings implement it; tests use the
//! in-memory pair from [`memory`].

pub mod link;
pub mod memory;

pub use link::{BleLink, FirmwareVersion, LinkReady, ParseFirmwareVersionError};
pub use memory::{in_memory_link, InMemoryLink, InMemoryLinkError, InMemoryPeer};
