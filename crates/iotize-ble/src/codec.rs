//! Frame codec: checksum framing, tail-first fragmentation, reassembly.
//!
//! A frame is `payload || checksum`. It is cut into packets of at most
//! `packet_size` frame bytes, each prefixed with the frame offset of its
//! fragment. Packets go out from the highest offset down to offset 0; the
//! receiver treats header `0` (derived offset `-1`) as end of frame.

use tracing::{debug, warn};

use crate::error::CodecError;
use crate::protocol::{checksum, CHECKSUM_ERROR_CODE, MAX_HEADER_OFFSET};

/// Largest frame (payload plus checksum) the offset header can address.
pub fn max_frame_len(packet_size: usize) -> usize {
    MAX_HEADER_OFFSET + packet_size.max(1)
}

/// Largest payload accepted by [`encode_packets`].
pub fn max_payload_len(packet_size: usize) -> usize {
    max_frame_len(packet_size) - 1
}

pub fn check_payload_len(payload_len: usize, packet_size: usize) -> Result<(), CodecError> {
    let max = max_frame_len(packet_size);
    let len = payload_len + 1;
    if len > max {
        return Err(CodecError::FrameTooLarge { len, max });
    }
    Ok(())
}

/// Encodes `payload` into packets in transmission order (tail first).
///
/// An empty payload yields no packets.
pub fn encode_packets(payload: &[u8], packet_size: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let packet_size = packet_size.max(1);
    check_payload_len(payload.len(), packet_size)?;

    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));

    let mut tail_packets = frame.len() / packet_size;
    let mut rest = frame.len() % packet_size;
    if rest == 0 {
        tail_packets -= 1;
        rest = packet_size;
    }

    let mut packets = Vec::with_capacity(tail_packets + 1);
    for num in (0..=tail_packets).rev() {
        let (offset, len) = if num > 0 {
            (rest + (num - 1) * packet_size, packet_size)
        } else {
            (0, rest)
        };
        let mut packet = Vec::with_capacity(len + 1);
        // check_payload_len keeps every offset <= MAX_HEADER_OFFSET.
        packet.push(offset as u8);
        packet.extend_from_slice(&frame[offset..offset + len]);
        packets.push(packet);
    }
    Ok(packets)
}

/// Frame handed up by the assembler, checksum byte removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledFrame {
    /// Payload bytes; on checksum mismatch the last two carry `0x66 0x02`.
    pub bytes: Vec<u8>,
    pub checksum_ok: bool,
}

/// Reassembles inbound packets into frames over a fixed-capacity buffer.
#[derive(Debug)]
pub struct PacketAssembler {
    buffer: Vec<u8>,
    len: usize,
}

impl PacketAssembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(1)],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes accumulated for the frame in progress.
    pub fn pending_len(&self) -> usize {
        self.len
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0);
        self.len = 0;
    }

    /// Ingests one notification value; returns the frame once its head packet arrives.
    pub fn ingest(&mut self, packet: &[u8]) -> Option<ReassembledFrame> {
        let (&header, fragment) = packet.split_first()?;
        let capacity = self.buffer.len();

        self.len = (self.len + fragment.len()).min(capacity);

        let start = usize::from(header);
        let end = start + fragment.len();
        // The last buffer byte is never written, matching the device firmware.
        if end < capacity {
            self.buffer[start..end].copy_from_slice(fragment);
        } else {
            warn!(header, len = fragment.len(), capacity, "dropping out-of-range fragment");
        }

        let offset = i16::from(header) - 1;
        if offset != -1 {
            return None;
        }
        Some(self.finish())
    }

    fn finish(&mut self) -> ReassembledFrame {
        let received = self.len;
        let frame = match received.checked_sub(1) {
            Some(payload_len) => {
                let mut bytes = self.buffer[..payload_len].to_vec();
                let checksum_ok = checksum(&bytes) == self.buffer[payload_len];
                if !checksum_ok {
                    mark_checksum_error(&mut bytes);
                }
                ReassembledFrame { bytes, checksum_ok }
            }
            None => {
                let mut bytes = Vec::new();
                mark_checksum_error(&mut bytes);
                ReassembledFrame {
                    bytes,
                    checksum_ok: false,
                }
            }
        };
        debug!(
            len = frame.bytes.len(),
            checksum_ok = frame.checksum_ok,
            "frame reassembled"
        );
        self.reset();
        frame
    }
}

fn mark_checksum_error(bytes: &mut Vec<u8>) {
    let n = bytes.len();
    if n >= CHECKSUM_ERROR_CODE.len() {
        bytes[n - 2..].copy_from_slice(&CHECKSUM_ERROR_CODE);
    } else {
        *bytes = CHECKSUM_ERROR_CODE.to_vec();
    }
}
