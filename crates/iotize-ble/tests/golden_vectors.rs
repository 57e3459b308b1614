use iotize_ble::codec::encode_packets;
use iotize_ble::protocol::{checksum, PACKET_DATA_LEN};

/// (payload length, expected headers in send order, expected packet lengths)
const VECTORS: &[(usize, &[u8], &[usize])] = &[
    (0, &[], &[]),
    (1, &[0], &[3]),
    (18, &[0], &[20]),
    (19, &[1, 0], &[20, 2]),
    (20, &[2, 0], &[20, 3]),
    (38, &[20, 1, 0], &[20, 20, 2]),
    (39, &[21, 2, 0], &[20, 20, 3]),
    (57, &[39, 20, 1, 0], &[20, 20, 20, 2]),
];

fn payload_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn fragmentation_matches_golden_headers() {
    for &(len, headers, lengths) in VECTORS {
        let packets = encode_packets(&payload_of(len), PACKET_DATA_LEN).expect("encodable");
        let got_headers: Vec<u8> = packets.iter().map(|p| p[0]).collect();
        let got_lengths: Vec<usize> = packets.iter().map(Vec::len).collect();
        assert_eq!(got_headers, headers, "headers for payload length {len}");
        assert_eq!(got_lengths, lengths, "packet lengths for payload length {len}");
    }
}

#[test]
fn fragments_tile_the_frame_exactly() {
    for &(len, _, _) in VECTORS {
        let payload = payload_of(len);
        let packets = encode_packets(&payload, PACKET_DATA_LEN).expect("encodable");
        if len == 0 {
            assert!(packets.is_empty());
            continue;
        }

        let mut frame = payload.clone();
        frame.push(checksum(&payload));
        let mut rebuilt = vec![None; frame.len()];
        for packet in &packets {
            let offset = usize::from(packet[0]);
            for (i, byte) in packet[1..].iter().enumerate() {
                assert!(rebuilt[offset + i].is_none(), "overlap at {} for len {len}", offset + i);
                rebuilt[offset + i] = Some(*byte);
            }
        }
        let rebuilt: Vec<u8> = rebuilt
            .into_iter()
            .map(|b| b.expect("every frame byte covered"))
            .collect();
        assert_eq!(rebuilt, frame, "payload length {len}");
    }
}

#[test]
fn concrete_three_byte_example() {
    assert_eq!(
        encode_packets(&[0x01, 0x02, 0x03], PACKET_DATA_LEN).unwrap(),
        vec![vec![0x00, 0x01, 0x02, 0x03, 0x06]]
    );
}
