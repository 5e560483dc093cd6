//! ASCII line protocol for the motion controller
//!
//! Commands go out as `/<device> <axis> <command>` and replies come
//! back as `@<address> <axis> [<id>] <flag> <status> <warning> <data>`,
//! one line each. The optional message id field is only present when
//! the device has message ids enabled; it is carried through opaquely.

use std::fmt;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StageError;

/// An outbound command line, addressed to one device and axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiCommand {
    /// Daisy chain address of the device.
    pub device: u8,
    /// Axis number, 0 addresses all axes of the device.
    pub axis: u8,
    /// Command body, empty for a bare status query.
    pub body: String,
}

impl AsciiCommand {
    /// New command line.
    pub fn new(device: u8, axis: u8, body: impl Into<String>) -> Self {
        AsciiCommand {
            device,
            axis,
            body: body.into(),
        }
    }
}

impl fmt::Display for AsciiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "/{} {}", self.device, self.axis)
        } else {
            write!(f, "/{} {} {}", self.device, self.axis, self.body)
        }
    }
}

/// Acceptance flag of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFlag {
    /// Command accepted.
    Ok,
    /// Command rejected.
    Rejected,
}

/// A parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiReply {
    /// Device address the reply came from.
    pub address: u8,
    /// Axis number the reply concerns.
    pub axis: u8,
    /// Message id, present only when the device has ids enabled.
    pub message_id: Option<String>,
    /// Whether the command was accepted.
    pub flag: ReplyFlag,
    /// Device status, IDLE or BUSY.
    pub status: String,
    /// Warning field, `--` when no warning is active.
    pub warning: String,
    /// Response data, `--` on a bare rejection.
    pub data: String,
}

/// Outcome of classifying a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    /// Accepted with no active warning.
    Accepted,
    /// Accepted, but a warning flag is set.
    AcceptedWithWarning {
        /// Human readable warning description.
        reason: String,
    },
    /// Rejected by the device.
    Rejected {
        /// Human readable rejection description.
        reason: String,
    },
}

impl AsciiReply {
    /// Parse one reply line, with or without the leading `@`.
    pub fn parse(line: &str) -> Result<Self, StageError> {
        let line = line.trim().trim_start_matches('@');
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(StageError::Protocol(format!(
                "reply line has {} fields, expected at least 5: {line:?}",
                fields.len()
            )));
        }
        let address: u8 = fields[0]
            .parse()
            .map_err(|_| StageError::Protocol(format!("bad device address in reply: {line:?}")))?;
        let axis: u8 = fields[1]
            .parse()
            .map_err(|_| StageError::Protocol(format!("bad axis number in reply: {line:?}")))?;
        // With message ids enabled an extra field sits before the flag.
        let (message_id, rest) = match fields[2] {
            "OK" | "RJ" => (None, &fields[2..]),
            _ => (Some(fields[2].to_string()), &fields[3..]),
        };
        if rest.len() < 3 {
            return Err(StageError::Protocol(format!(
                "reply line truncated after the flag field: {line:?}"
            )));
        }
        let flag = match rest[0] {
            "OK" => ReplyFlag::Ok,
            "RJ" => ReplyFlag::Rejected,
            other => {
                return Err(StageError::Protocol(format!(
                    "unknown reply flag {other:?} in {line:?}"
                )))
            }
        };
        Ok(AsciiReply {
            address,
            axis,
            message_id,
            flag,
            status: rest[1].to_string(),
            warning: rest[2].to_string(),
            data: rest.get(3..).map(|f| f.join(" ")).unwrap_or_default(),
        })
    }

    /// Classify the reply into accepted, accepted with warning or rejected.
    pub fn classify(&self) -> ReplyStatus {
        match (self.flag, self.warning.as_str()) {
            (ReplyFlag::Rejected, "--") => ReplyStatus::Rejected {
                reason: describe_reply_code(&self.data)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.data.clone()),
            },
            (ReplyFlag::Rejected, warning) => ReplyStatus::Rejected {
                reason: describe_warning(warning)
                    .map(str::to_string)
                    .unwrap_or_else(|| warning.to_string()),
            },
            (ReplyFlag::Ok, "--") => ReplyStatus::Accepted,
            (ReplyFlag::Ok, warning) => ReplyStatus::AcceptedWithWarning {
                reason: describe_warning(warning)
                    .map(str::to_string)
                    .unwrap_or_else(|| warning.to_string()),
            },
        }
    }
}

/// Description of a rejection keyword carried in the data field.
pub fn describe_reply_code(code: &str) -> Option<&'static str> {
    let text = match code {
        "BADDATA" => "The data provided in the command is incorrect",
        "AGAIN" => "The command cannot be processed right now. The user or application should send the command again",
        "BADAXIS" => "The command was sent with an axis number greater than the number of axes available",
        "BADCOMMAND" => "The command or setting is incorrect or invalid",
        "BADMESSAGEID" => "A message ID was provided, but was not either -- or a number from 0 to 99",
        "DEVICEONLY" => "An axis number was specified when trying to execute a device only command",
        "FULL" => "The device has run out of permanent storage and cannot accept the command",
        "LOCKSTEP" => "An axis cannot be moved using normal motion commands because it is part of a lockstep group",
        "NOACCESS" => "The command or setting is not available for the current access level",
        "PARKED" => "The device cannot move because it is currently parked",
        "STATUSBUSY" => "The device cannot be parked, nor can certain settings be changed, because it is currently busy",
        _ => return None,
    };
    Some(text)
}

/// Description of a warning flag carried in the warning field.
pub fn describe_warning(flag: &str) -> Option<&'static str> {
    let text = match flag {
        "WR" => "No reference position",
        "--" => "No warning",
        "FD" => "The driver has disabled itself due to overheating",
        "FQ" => "The encoder-measured position may be unreliable. The encoder has encountered a read error due to poor sensor alignment, vibration, dirt or other environmental conditions",
        "FS" => "Stalling was detected and the axis has stopped itself",
        "FT" => "The lockstep group has exceeded allowable twist and has stopped",
        "FB" => "A previous streamed motion could not be executed because it failed a precondition (e.g. motion exceeds device bounds, calls nested too deeply)",
        "FP" => "Streamed or sinusoidal motion was terminated because an axis slipped and thus the device deviated from the requested path",
        "FE" => "The target limit sensor cannot be reached or is faulty",
        "WH" => "The device has a position reference, but has not been homed. As a result, calibration has been disabled",
        "WL" => "A movement operation did not complete due to a triggered limit sensor. This flag is set if a movement operation is interrupted by a limit sensor and the No Reference Position (WR) warning flag is not present",
        "WP" => "The saved calibration data type for the specified peripheral.serial value is unsupported by the current peripheral id",
        "WV" => "The supply voltage is outside the recommended operating range of the device. Damage could result to the device if not remedied",
        "WT" => "The internal temperature of the controller has exceeded the recommended limit for the device",
        "WM" => "While not in motion, the axis has been forced out of its position",
        "NC" => "Axis is busy due to manual control via the knob",
        "NI" => "A movement operation (command or manual control) was requested while the axis was executing another movement command. This indicates that a movement command did not complete",
        "ND" => "The device has slowed down while following a streamed motion path because it has run out of queued motions",
        "NU" => "A setting is pending to be updated or a reset is pending",
        "NJ" => "Joystick calibration is in progress. Moving the joystick will have no effect",
        _ => return None,
    };
    Some(text)
}

/// Codec framing reply lines, terminated by CR, LF or CR LF.
#[derive(Debug, Default)]
pub struct AsciiCodec;

impl Decoder for AsciiCodec {
    type Item = AsciiReply;
    type Error = StageError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<AsciiReply>, StageError> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                return Ok(None);
            };
            let line = src.split_to(pos + 1);
            let text = std::str::from_utf8(&line[..pos])
                .map_err(|_| StageError::Protocol("reply line is not valid UTF-8".to_string()))?
                .trim();
            // Empty segment between CR and LF.
            if text.is_empty() {
                continue;
            }
            return AsciiReply::parse(text).map(Some);
        }
    }
}

impl Encoder<AsciiCommand> for AsciiCodec {
    type Error = StageError;

    fn encode(&mut self, item: AsciiCommand, dst: &mut BytesMut) -> Result<(), StageError> {
        dst.extend_from_slice(item.to_string().as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}
