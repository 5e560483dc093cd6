//! Object registers and canned telegrams for the stepper drive
//!
//! Register names follow the CiA 402 object dictionary. The two bytes
//! are the decimal values the drive expects at bytes 12 and 13 of a
//! telegram, so 6041h is written as index 96, object 65.

use crate::protocol::telegram::Telegram;

/// Two byte object register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    /// Byte 12 of a telegram.
    pub index: u8,
    /// Byte 13 of a telegram.
    pub object: u8,
}

/// Control word, 6040h.
pub const CONTROL_WORD: Register = Register { index: 96, object: 64 };
/// Status word, 6041h.
pub const STATUS_WORD: Register = Register { index: 96, object: 65 };
/// Set operating mode, 6060h.
pub const SET_MODE: Register = Register { index: 96, object: 96 };
/// Get operating mode, 6061h.
pub const GET_MODE: Register = Register { index: 96, object: 97 };
/// Actual position, 6064h.
pub const POSITION_ACTUAL: Register = Register { index: 96, object: 100 };
/// Target position, 607Ah.
pub const TARGET_POSITION: Register = Register { index: 96, object: 122 };
/// Profile velocity, 6081h.
pub const PROFILE_VELOCITY: Register = Register { index: 96, object: 129 };
/// Profile acceleration, 6083h.
pub const PROFILE_ACCELERATION: Register = Register { index: 96, object: 131 };
/// Feed constant, 6092h. Subindex 1 is feed, subindex 2 shaft revolutions.
pub const FEED_CONSTANT: Register = Register { index: 96, object: 146 };
/// Homing speeds, 6099h. Subindex 1 is switch search, subindex 2 zero search.
pub const HOMING_SPEEDS: Register = Register { index: 96, object: 153 };
/// Homing acceleration, 609Ah.
pub const HOMING_ACCELERATION: Register = Register { index: 96, object: 154 };

/// Read command for the drive status word.
pub fn status_request() -> Telegram {
    Telegram::read_request(STATUS_WORD, 0, 2)
}

/// Control word commanding the shutdown transition.
pub fn shutdown() -> Telegram {
    Telegram::write_u16(CONTROL_WORD, 0, 6)
}

/// Control word commanding the switch on transition.
pub fn switch_on() -> Telegram {
    Telegram::write_u16(CONTROL_WORD, 0, 7)
}

/// Control word enabling operation.
pub fn enable_operation() -> Telegram {
    Telegram::write_u16(CONTROL_WORD, 0, 15)
}

/// Control word with the start bit set, kicking off the active mode.
pub fn start_motion() -> Telegram {
    Telegram::write_u16(CONTROL_WORD, 0, 31)
}

/// Read command for the active operating mode.
pub fn get_mode() -> Telegram {
    Telegram::read_request(GET_MODE, 0, 1)
}

/// Read command for the actual position.
pub fn get_position() -> Telegram {
    Telegram::read_request(POSITION_ACTUAL, 0, 4)
}

/// Mode reply carrying the active mode code.
pub fn mode_reply(mode: u8) -> Telegram {
    Telegram::response(GET_MODE, 0, &[mode])
}

fn status_reply(byte19: u8, byte20: u8) -> Telegram {
    Telegram::response(STATUS_WORD, 0, &[byte19, byte20])
}

/// Status reply: switch on disabled.
pub fn switch_on_disabled() -> Telegram {
    status_reply(64, 6)
}

/// Status reply: ready to switch on.
pub fn ready_to_switch_on() -> Telegram {
    status_reply(33, 6)
}

/// Status reply: switched on.
pub fn switched_on() -> Telegram {
    status_reply(35, 6)
}

/// Status reply: operation enabled.
pub fn operation_enabled() -> Telegram {
    status_reply(39, 6)
}

/// Status reply: target reached.
pub fn target_reached() -> Telegram {
    status_reply(39, 22)
}

/// Status reply: homing or move being executed.
pub fn motion_in_progress() -> Telegram {
    status_reply(39, 2)
}

/// Name of a known status reply for telemetry, if the frame matches one.
pub fn state_name(telegram: &Telegram) -> Option<&'static str> {
    if *telegram == switch_on_disabled() {
        Some("switch on disabled")
    } else if *telegram == ready_to_switch_on() {
        Some("ready to switch on")
    } else if *telegram == switched_on() {
        Some("switched on")
    } else if *telegram == operation_enabled() {
        Some("operation enabled")
    } else if *telegram == target_reached() {
        Some("target reached")
    } else if *telegram == motion_in_progress() {
        Some("motion in progress")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn canned_commands_match_drive_manual() {
        assert_eq!(
            shutdown().as_bytes(),
            &[0, 0, 0, 0, 0, 15, 0, 43, 13, 1, 0, 0, 96, 64, 0, 0, 0, 0, 2, 6, 0]
        );
        assert_eq!(
            start_motion().as_bytes(),
            &[0, 0, 0, 0, 0, 15, 0, 43, 13, 1, 0, 0, 96, 64, 0, 0, 0, 0, 2, 31, 0]
        );
        assert_eq!(
            get_mode().as_bytes(),
            &[0, 0, 0, 0, 0, 13, 0, 43, 13, 0, 0, 0, 96, 97, 0, 0, 0, 0, 1]
        );
        assert_eq!(
            get_position().as_bytes(),
            &[0, 0, 0, 0, 0, 13, 0, 43, 13, 0, 0, 0, 96, 100, 0, 0, 0, 0, 4]
        );
    }

    #[test]
    fn canned_status_replies_match_drive_manual() {
        assert_eq!(
            operation_enabled().as_bytes(),
            &[0, 0, 0, 0, 0, 15, 0, 43, 13, 0, 0, 0, 96, 65, 0, 0, 0, 0, 2, 39, 6]
        );
        assert_eq!(
            target_reached().as_bytes(),
            &[0, 0, 0, 0, 0, 15, 0, 43, 13, 0, 0, 0, 96, 65, 0, 0, 0, 0, 2, 39, 22]
        );
    }

    #[test]
    fn state_names_cover_all_canned_replies() {
        for (t, name) in [
            (switch_on_disabled(), "switch on disabled"),
            (ready_to_switch_on(), "ready to switch on"),
            (switched_on(), "switched on"),
            (operation_enabled(), "operation enabled"),
            (target_reached(), "target reached"),
            (motion_in_progress(), "motion in progress"),
        ] {
            assert_eq!(state_name(&t), Some(name));
        }
        assert_eq!(state_name(&status_request()), None);
    }
}
