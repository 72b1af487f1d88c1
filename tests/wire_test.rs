//! End-to-end wire framing scenarios: a packet survives encode/decode
//! across the v1/v2 header split, padding, and compression working
//! together rather than each in isolation.

use bitchat_core::types::MessageType;
use bitchat_core::wire::packet::Packet;

fn peer(byte: u8) -> [u8; 8] {
    [byte; 8]
}

#[test]
fn v1_broadcast_survives_padding_and_decode() {
    let packet = Packet::new_broadcast(MessageType::Announce, 7, peer(1), b"hello from the mesh".to_vec());
    let bytes = packet.encode(true).unwrap();
    let decoded = Packet::decode(&bytes).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn v2_directed_packet_with_route_and_padding_round_trips() {
    let mut packet = Packet::new_broadcast(MessageType::Message, 4, peer(2), vec![9u8; 600])
        .with_recipient(peer(3));
    packet.version = 2;
    packet.route = vec![peer(10), peer(11), peer(12)];

    let bytes = packet.encode(true).unwrap();
    let decoded = Packet::decode(&bytes).unwrap();
    assert_eq!(decoded.route, packet.route);
    assert_eq!(decoded.recipient_id, Some(peer(3)));
    assert_eq!(decoded.payload, packet.payload);
}

#[test]
fn large_compressible_payload_shrinks_on_the_wire_and_still_round_trips() {
    let payload = vec![b'a'; 8192];
    let packet = Packet::new_broadcast(MessageType::FileTransfer, 3, peer(4), payload.clone());
    let bytes = packet.encode(true).unwrap();
    assert!(bytes.len() < payload.len());
    let decoded = Packet::decode(&bytes).unwrap();
    assert_eq!(decoded.payload, payload);
}

#[test]
fn signed_broadcast_preserves_signature_through_padding() {
    let packet = Packet::new_broadcast(MessageType::Announce, 7, peer(5), b"alice".to_vec())
        .with_signature([0x11; 64]);
    let bytes = packet.encode(true).unwrap();
    let decoded = Packet::decode(&bytes).unwrap();
    assert_eq!(decoded.signature, Some([0x11; 64]));
}

#[test]
fn decode_rejects_garbage_bytes() {
    let garbage = vec![0xFFu8; 20];
    assert!(Packet::decode(&garbage).is_err());
}
