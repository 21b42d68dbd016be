//! End-to-end pipeline tests: container bytes in, sample stream out.

use tapecast::loader::load_bytes;
use tapecast::player::{PlaybackState, Player};
use tapecast::sink::MemorySink;
use tapecast::TapeError;

const RATIO: f64 = 44_100.0 / 3_500_000.0;

fn tap_record(flag: u8, body: &[u8]) -> Vec<u8> {
    let len = (body.len() + 2) as u16;
    let mut rec = Vec::new();
    rec.extend_from_slice(&len.to_le_bytes());
    rec.push(flag);
    rec.extend_from_slice(body);
    rec.push(flag ^ body.iter().fold(0u8, |acc, &b| acc ^ b));
    rec
}

fn header_record(type_byte: u8, name: &str) -> Vec<u8> {
    let mut body = vec![type_byte];
    let mut padded = name.as_bytes().to_vec();
    padded.resize(10, b' ');
    body.extend_from_slice(&padded);
    body.extend_from_slice(&[0u8; 6]);
    tap_record(0x00, &body)
}

/// Exact T-state cost of bit-encoding a payload, all bytes whole.
fn payload_tstates(payload: &[u8]) -> f64 {
    payload
        .iter()
        .map(|&byte| {
            let ones = u32::from(byte.count_ones());
            let zeros = 8 - ones;
            f64::from(ones) * 2.0 * 1710.0 + f64::from(zeros) * 2.0 * 855.0
        })
        .sum()
}

#[test]
fn minimal_tap_renders_both_blocks() {
    let mut bytes = header_record(0, "PIPELINE");
    let payload = [1u8, 2, 3, 4];
    bytes.extend_from_slice(&tap_record(0xFF, &payload));

    let (tape, source) = load_bytes(bytes).unwrap();
    assert_eq!(tape.num_blocks(), 2);
    assert_eq!(tape.name, "PIPELINE");

    let mut player = Player::new(tape, source);
    let mut sink = MemorySink::new(44_100);
    let state = player.play(&mut sink).unwrap();
    assert_eq!(state, PlaybackState::Idle);

    // Header: long pilot. Data: short pilot. Both: syncs, payload bits and
    // one second of inter-block silence each.
    let header_payload: Vec<u8> = {
        let mut p = vec![0x00u8, 0x00];
        p.extend_from_slice(b"PIPELINE  ");
        p.extend_from_slice(&[0u8; 6]);
        let chk = p.iter().fold(0u8, |acc, &b| acc ^ b);
        p.push(chk);
        p
    };
    let data_payload: Vec<u8> = {
        let mut p = vec![0xFFu8];
        p.extend_from_slice(&payload);
        p.push(0xFF ^ 1 ^ 2 ^ 3 ^ 4);
        p
    };

    let tstates = (8063.0 + 3223.0) * 2168.0
        + 2.0 * (667.0 + 735.0)
        + payload_tstates(&header_payload)
        + payload_tstates(&data_payload);
    let expected = tstates * RATIO + 2.0 * 44_100.0;

    let generated = sink.frames() as f64;
    assert!(
        (generated - expected).abs() <= 8.0,
        "generated {} vs expected {}",
        generated,
        expected
    );
}

#[test]
fn corrupted_tap_never_reaches_playback() {
    let mut bytes = header_record(0, "BROKEN");
    bytes.extend_from_slice(&tap_record(0xFF, &[9, 9, 9]));
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    match load_bytes(bytes) {
        Err(TapeError::Corrupted { block, .. }) => assert_eq!(block, 1),
        other => panic!("expected corruption, got {:?}", other.map(|(t, _)| t)),
    }
}

#[test]
fn reloading_a_tape_is_idempotent() {
    let mut bytes_a = header_record(0, "SIDEA");
    bytes_a.extend_from_slice(&tap_record(0xFF, &[0x10, 0x20]));

    let mut bytes_b = header_record(3, "SIDEB");
    bytes_b.extend_from_slice(&tap_record(0xFF, &[0xFE; 40]));

    let (first, _) = load_bytes(bytes_a.clone()).unwrap();
    let (_middle, _) = load_bytes(bytes_b).unwrap();
    let (again, _) = load_bytes(bytes_a).unwrap();

    assert_eq!(first, again);
}

#[test]
fn split_turbo_block_stitches_partitions_seamlessly() {
    // A payload larger than one partition must produce exactly the same
    // stream as the sum of its parts: pilot and syncs once, bits for every
    // byte, mask applied only at the very end.
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    let mut bytes = b"ZXTape!\x1A".to_vec();
    bytes.extend_from_slice(&[1, 20]);
    bytes.push(0x11);
    for timing in [2168u16, 667, 735, 855, 1710] {
        bytes.extend_from_slice(&timing.to_le_bytes());
    }
    bytes.extend_from_slice(&16u16.to_le_bytes()); // short pilot
    bytes.push(5); // used bits in last byte
    bytes.extend_from_slice(&100u16.to_le_bytes()); // pause
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    bytes.extend_from_slice(&payload);

    let (tape, source) = load_bytes(bytes).unwrap();
    let mut player = Player::new(tape, source);
    let mut sink = MemorySink::new(44_100);
    player.play(&mut sink).unwrap();

    let whole_bytes = &payload[..payload.len() - 1];
    let last = payload[payload.len() - 1];
    let masked_ones = u32::from((last >> 3).count_ones());
    let masked_zeros = 5 - masked_ones;

    let tstates = 16.0 * 2168.0
        + 667.0
        + 735.0
        + payload_tstates(whole_bytes)
        + f64::from(masked_ones) * 2.0 * 1710.0
        + f64::from(masked_zeros) * 2.0 * 855.0;
    let expected = tstates * RATIO + 0.1 * 44_100.0;

    let generated = sink.frames() as f64;
    assert!(
        (generated - expected).abs() <= 8.0,
        "generated {} vs expected {}",
        generated,
        expected
    );
}

#[test]
fn stop_mid_tape_resumes_from_current_block() {
    let mut bytes = b"ZXTape!\x1A".to_vec();
    bytes.extend_from_slice(&[1, 20]);
    for _ in 0..3 {
        bytes.push(0x12);
        bytes.extend_from_slice(&2168u16.to_le_bytes());
        bytes.extend_from_slice(&10u16.to_le_bytes());
    }
    bytes.push(0x20);
    bytes.extend_from_slice(&10u16.to_le_bytes());

    let (tape, source) = load_bytes(bytes).unwrap();
    let mut player = Player::new(tape, source);
    let control = player.control();

    // Pause immediately: nothing rendered, position kept
    control.request_pause();
    let mut sink = MemorySink::new(44_100);
    assert_eq!(player.play(&mut sink).unwrap(), PlaybackState::Paused);
    let resumed_from = player.current_block();

    control.request_play();
    assert_eq!(player.play(&mut sink).unwrap(), PlaybackState::Idle);
    assert!(player.current_block() <= resumed_from + 4);
    assert!(sink.frames() > 0);
}
