//! Protocol level properties of the telegram framing.

use linstage_core::error::StageError;
use linstage_core::protocol::telegram::{derive_handshake, Telegram, TelegramCodec};
use linstage_core::protocol::{registers, PollTarget};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn every_command_frame_survives_the_codec() {
    let commands = [
        registers::status_request(),
        registers::shutdown(),
        registers::switch_on(),
        registers::enable_operation(),
        registers::start_motion(),
        registers::get_mode(),
        registers::get_position(),
        Telegram::write_u8(registers::SET_MODE, 0, 6),
        Telegram::write_u16(registers::FEED_CONSTANT, 1, 15_000),
        Telegram::write_u24(registers::HOMING_ACCELERATION, 0, 48_000),
        Telegram::write_u32(registers::TARGET_POSITION, 0, 1_000),
    ];
    let mut codec = TelegramCodec;
    let mut buf = BytesMut::new();
    for command in &commands {
        codec.encode(command.clone(), &mut buf).unwrap();
    }
    for command in &commands {
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded, command);
    }
    assert!(buf.is_empty());
}

#[test]
fn handshakes_depend_only_on_the_frame_prefix() {
    for (a, b) in [
        (
            Telegram::write_u32(registers::TARGET_POSITION, 0, 0),
            Telegram::write_u32(registers::TARGET_POSITION, 0, u32::MAX),
        ),
        (
            Telegram::write_u16(registers::CONTROL_WORD, 0, 6),
            Telegram::write_u16(registers::CONTROL_WORD, 0, 31),
        ),
    ] {
        assert_eq!(
            derive_handshake(&a).unwrap(),
            derive_handshake(&b).unwrap()
        );
    }
}

#[test]
fn a_zero_length_byte_is_a_protocol_error() {
    let mut frame = registers::shutdown().as_bytes().to_vec();
    frame[5] = 0;
    let mut buf = BytesMut::from(&frame[..]);
    let err = TelegramCodec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, StageError::Protocol(_)));
}

#[test]
fn status_targets_accept_supersets_and_reject_subsets() {
    // Rows: target, reply, expected match.
    let cases = [
        (registers::operation_enabled(), registers::operation_enabled(), true),
        (registers::operation_enabled(), registers::target_reached(), true),
        (registers::operation_enabled(), registers::switched_on(), false),
        (registers::target_reached(), registers::operation_enabled(), false),
        (registers::ready_to_switch_on(), registers::switched_on(), true),
        (registers::switched_on(), registers::ready_to_switch_on(), false),
        (registers::target_reached(), registers::motion_in_progress(), false),
    ];
    for (target, reply, expected) in cases {
        let target = PollTarget::new(target);
        assert_eq!(
            target.matches(&reply),
            expected,
            "target {:?} against reply {reply}",
            target
        );
    }
}
