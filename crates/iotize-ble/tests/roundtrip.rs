use iotize_ble::codec::{encode_packets, max_payload_len, PacketAssembler};
use iotize_ble::protocol::{PACKET_DATA_LEN, RX_BUFFER_CAPACITY};
use iotize_ble::CodecError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn random_payloads_survive_fragmentation() {
    let mut rng = StdRng::seed_from_u64(0x1073_17E);
    let mut assembler = PacketAssembler::new(RX_BUFFER_CAPACITY);

    for len in 1..=max_payload_len(PACKET_DATA_LEN) {
        for _ in 0..4 {
            let mut payload = vec![0u8; len];
            rng.fill(payload.as_mut_slice());

            let packets = encode_packets(&payload, PACKET_DATA_LEN).expect("encodable");
            let mut frame = None;
            for (i, packet) in packets.iter().enumerate() {
                let out = assembler.ingest(packet);
                if i + 1 < packets.len() {
                    assert!(out.is_none(), "frame completed early for len {len}");
                }
                frame = out;
            }
            let frame = frame.expect("head packet completes the frame");
            assert!(frame.checksum_ok, "checksum for len {len}");
            assert_eq!(frame.bytes, payload, "payload for len {len}");
        }
    }
}

#[test]
fn payloads_beyond_header_range_are_rejected() {
    let max = max_payload_len(PACKET_DATA_LEN);
    for len in (max + 1)..=1000 {
        match encode_packets(&vec![0xA5; len], PACKET_DATA_LEN) {
            Err(CodecError::FrameTooLarge { len: frame_len, .. }) => assert_eq!(frame_len, len + 1),
            other => panic!("expected FrameTooLarge for len {len}, got {other:?}"),
        }
    }
}
