//! Frame Tests
//!
//! Tests for the length prefix and reassembly of arbitrarily split reads.

use bytes::BytesMut;
use gamewire::protocol::{
    frame_payload, pack, peek_frame, try_unpack, BincodeCodec, Codec, FrameBuffer,
    LEN_PREFIX_SIZE,
};
use gamewire::GamewireError;

const MAX: usize = 1024 * 1024;

fn frames(payloads: &[&[u8]]) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|p| frame_payload(p).unwrap().to_vec())
        .collect()
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_prefix_is_little_endian_payload_length() {
    let frame = frame_payload(&[0xAA; 300]).unwrap();
    assert_eq!(frame.len(), LEN_PREFIX_SIZE + 300);
    assert_eq!(&frame[..4], &[0x2C, 0x01, 0x00, 0x00]);
}

#[test]
fn test_pack_frames_codec_output() {
    let codec = BincodeCodec::<String>::new();
    let item = "hello".to_string();
    let frame = pack(&codec, &item).unwrap();
    let payload = codec.encode(&item).unwrap();

    assert_eq!(&frame[LEN_PREFIX_SIZE..], payload.as_slice());
}

// =============================================================================
// Reassembly Tests
// =============================================================================

#[test]
fn test_every_prefix_split_yields_nothing_then_one_frame() {
    let wire = frames(&[b"abcdefgh"]);

    for cut in 0..wire.len() {
        let mut buf = FrameBuffer::new(MAX);
        buf.extend(&wire[..cut]);
        assert!(buf.next_frame().unwrap().is_none(), "cut at {}", cut);
        assert_eq!(buf.len(), cut);

        buf.extend(&wire[cut..]);
        assert_eq!(buf.next_frame().unwrap().unwrap().as_ref(), b"abcdefgh");
        assert!(buf.is_empty());
    }
}

#[test]
fn test_concatenated_frames_come_out_in_order() {
    let wire = frames(&[b"one", b"", b"three", b"four"]);
    let mut buf = FrameBuffer::new(MAX);
    buf.extend(&wire);

    let mut out = Vec::new();
    while let Some(frame) = buf.next_frame().unwrap() {
        out.push(frame.to_vec());
    }
    assert_eq!(out, vec![b"one".to_vec(), vec![], b"three".to_vec(), b"four".to_vec()]);
    assert!(buf.is_empty());
}

#[test]
fn test_large_frame_fed_in_small_chunks() {
    let payload: Vec<u8> = (0..10 * 1024).map(|i| (i % 251) as u8).collect();
    let wire = frames(&[&payload]);

    let mut buf = FrameBuffer::new(MAX);
    let mut got = None;
    for chunk in wire.chunks(2048) {
        assert!(got.is_none());
        buf.extend(chunk);
        got = buf.next_frame().unwrap();
    }
    assert_eq!(got.unwrap().as_ref(), payload.as_slice());
}

#[test]
fn test_trailing_partial_frame_is_kept() {
    let mut wire = frames(&[b"full"]);
    let next = frames(&[b"partial"]);
    wire.extend_from_slice(&next[..6]);

    let mut buf = BytesMut::from(&wire[..]);
    assert_eq!(try_unpack(&mut buf, MAX).unwrap().unwrap().as_ref(), b"full");
    assert!(try_unpack(&mut buf, MAX).unwrap().is_none());
    assert_eq!(buf.len(), 6);
}

#[test]
fn test_oversized_length_is_rejected_before_payload_arrives() {
    let mut buf = FrameBuffer::new(16);
    buf.extend(&100u32.to_le_bytes());
    assert!(matches!(
        buf.next_frame(),
        Err(GamewireError::FrameTooLarge { size: 100, max: 16 })
    ));
}

#[test]
fn test_peek_reports_consumed_bytes() {
    let wire = frames(&[b"xy", b"z"]);
    let (payload, used) = peek_frame(&wire, MAX).unwrap().unwrap();
    assert_eq!(payload, b"xy");
    assert_eq!(used, LEN_PREFIX_SIZE + 2);
}
