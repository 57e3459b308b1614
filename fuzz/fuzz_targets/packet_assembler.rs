#![no_main]

use iotize_ble::codec::PacketAssembler;
use iotize_ble::protocol::{PACKET_DATA_LEN, RX_BUFFER_CAPACITY};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut assembler = PacketAssembler::new(RX_BUFFER_CAPACITY);
    for packet in data.chunks(PACKET_DATA_LEN + 1) {
        let _ = assembler.ingest(packet);
        assert!(assembler.pending_len() <= assembler.capacity());
    }
});
