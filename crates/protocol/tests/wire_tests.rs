//! Cross-module wire format tests
//!
//! Exercises the properties the hardware depends on: frame round-trips for
//! every legal payload size, rejection of malformed and oversized input, and
//! status-wrapper validation under independent byte corruption.

use protocol::mass_storage::{
    self, CSW_LEN, CSW_READ_LEN, CSW_SIGNATURE_INDEX, CSW_SIGNATURE_OK, CSW_STATUS_INDEX,
    Direction,
};
use protocol::packet::{
    self, COMMAND_PACKAGE, GENERAL_SEND_ADDRESS, MAX_PACKAGE_SIZE,
};
use protocol::{DeviceModel, ProtocolError};

/// Small deterministic generator so the sweeps do not depend on a PRNG crate
fn next(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    *seed
}

#[test]
fn packet_roundtrip_every_legal_content_size() {
    // fill_package adds 5 bytes of framing; the encoder takes packages up to
    // MAX_PACKAGE_SIZE - 4 bytes
    let max_content = MAX_PACKAGE_SIZE - 4 - 5;
    let mut seed = 0xDEAD_BEEF;

    for content_len in 0..=max_content {
        let content: Vec<u8> = (0..content_len).map(|_| next(&mut seed) as u8).collect();
        let package = packet::fill_package(COMMAND_PACKAGE, &content).unwrap();
        let frame = packet::encode_frame(GENERAL_SEND_ADDRESS, &package).unwrap();
        let decoded = packet::decode_frame(&frame).unwrap();

        assert_eq!(&decoded[..], &package[..package.len() - 2]);
        assert_eq!(&decoded[3..], &content[..]);
    }
}

#[test]
fn packet_encode_rejects_every_oversize_length() {
    for package_len in (MAX_PACKAGE_SIZE - 3)..(MAX_PACKAGE_SIZE + 16) {
        let package = vec![0u8; package_len];
        assert!(matches!(
            packet::encode_frame(GENERAL_SEND_ADDRESS, &package),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}

#[test]
fn packet_decode_rejects_corrupted_sync_bytes() {
    let package = packet::fill_package(COMMAND_PACKAGE, &[0x01]).unwrap();
    let frame = packet::encode_frame(GENERAL_SEND_ADDRESS, &package).unwrap();

    for byte in 0..=255u8 {
        for index in 0..2 {
            if frame[index] == byte {
                continue;
            }
            let mut corrupted = frame.clone();
            corrupted[index] = byte;
            assert!(packet::decode_frame(&corrupted).is_err());
        }
    }
}

#[test]
fn status_wrapper_rejects_single_byte_corruption() {
    let mut ok = [0u8; CSW_LEN];
    ok[CSW_SIGNATURE_INDEX] = CSW_SIGNATURE_OK;
    assert!(mass_storage::verify_status(&ok));

    // Corrupt each checked position independently through all values
    for value in 0..=255u8 {
        if value != CSW_SIGNATURE_OK {
            let mut status = ok;
            status[CSW_SIGNATURE_INDEX] = value;
            assert!(!mass_storage::verify_status(&status));
        }
        if value != 0 {
            let mut status = ok;
            status[CSW_STATUS_INDEX] = value;
            assert!(!mass_storage::verify_status(&status));
        }
    }

    // Unchecked positions may hold anything
    let mut status = ok;
    for i in 0..CSW_READ_LEN {
        if i == CSW_SIGNATURE_INDEX || i == CSW_STATUS_INDEX {
            continue;
        }
        status[i] = 0xA5;
    }
    assert!(mass_storage::verify_status(&status));
}

#[test]
fn command_block_roundtrips_through_echo_check() {
    for (len, dir) in [(31u32, Direction::Out), (64, Direction::In), (0, Direction::Out)] {
        let block = mass_storage::command_block(len, dir);
        let mut status = [0u8; CSW_LEN];
        status[..12].copy_from_slice(&block[..12]);
        assert!(mass_storage::echo_matches(&status, &block, 0..12));
        assert!(mass_storage::echo_matches(&status, &block, 4..8));
    }
}

#[test]
fn classification_is_exclusive_over_sampled_space() {
    let mut seed = 0x1234_5678;
    let mut supported = 0usize;

    for _ in 0..4096 {
        let word = next(&mut seed);
        let vid = (word >> 16) as u16;
        let pid = word as u16;

        let hf = protocol::is_hf_security_device(vid, pid);
        let futronic = protocol::is_futronic_device(vid, pid);
        assert!(!(hf && futronic));

        match DeviceModel::classify(vid, pid) {
            Some(DeviceModel::HfSecurity(_)) => {
                assert!(hf);
                supported += 1;
            }
            Some(DeviceModel::Futronic) => {
                assert!(futronic);
                supported += 1;
            }
            // Unknown pairs are rejected, never default-classified
            None => assert!(!futronic && (!hf || (vid, pid) == (1155, 22240))),
        }
    }

    // The sample space is huge; hitting a supported pair by chance is rare
    assert!(supported <= 4096);
}
