//! Binary telegram framing for the stepper drive
//!
//! A telegram is a variable length frame with a fixed 19 byte preamble:
//!
//! ```text
//! byte 0..=4   reserved, always zero
//! byte 5       number of bytes that follow byte 5
//! byte 6..=8   constant header 0, 43, 13
//! byte 9       direction, 1 = write, 0 = read
//! byte 10..=11 reserved, always zero
//! byte 12..=13 object register
//! byte 14      register subindex
//! byte 15..=17 reserved, zero on commands
//! byte 18      declared data length
//! byte 19..    little-endian payload
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StageError;
use crate::protocol::registers::{self, Register};

/// Index of the length byte within a frame.
pub const LENGTH_OFFSET: usize = 5;
/// Number of bytes not counted by the length byte.
pub const LENGTH_BASE: usize = 6;
/// Offset of the first payload byte.
pub const PAYLOAD_OFFSET: usize = 19;
/// Length of a frame that carries no payload.
pub const HEADER_LEN: usize = 19;

/// Transfer direction encoded in byte 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host reads an object from the drive.
    Read,
    /// Host writes an object to the drive.
    Write,
}

impl Direction {
    fn code(self) -> u8 {
        match self {
            Direction::Read => 0,
            Direction::Write => 1,
        }
    }
}

/// Operating mode of the drive, register 6060h/6061h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// No mode selected yet.
    Undefined,
    /// Profile position mode.
    Position,
    /// Homing mode.
    Homing,
}

impl DriveMode {
    /// Wire value for the mode.
    pub fn code(self) -> u8 {
        match self {
            DriveMode::Undefined => 0,
            DriveMode::Position => 1,
            DriveMode::Homing => 6,
        }
    }
}

/// A complete telegram frame.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Telegram {
    bytes: Vec<u8>,
}

impl Telegram {
    fn build(direction: Direction, register: Register, subindex: u8, declared: u8, payload: &[u8]) -> Self {
        let mut bytes = vec![0u8; HEADER_LEN + payload.len()];
        bytes[LENGTH_OFFSET] = (HEADER_LEN + payload.len() - LENGTH_BASE) as u8;
        bytes[7] = 43;
        bytes[8] = 13;
        bytes[9] = direction.code();
        bytes[12] = register.index;
        bytes[13] = register.object;
        bytes[14] = subindex;
        bytes[18] = declared;
        bytes[PAYLOAD_OFFSET..].copy_from_slice(payload);
        Telegram { bytes }
    }

    /// Write command carrying `payload` to a register.
    pub fn write(register: Register, subindex: u8, payload: &[u8]) -> Self {
        Self::build(Direction::Write, register, subindex, payload.len() as u8, payload)
    }

    /// Write command with a one byte payload.
    pub fn write_u8(register: Register, subindex: u8, value: u8) -> Self {
        Self::write(register, subindex, &[value])
    }

    /// Write command with a little-endian two byte payload.
    pub fn write_u16(register: Register, subindex: u8, value: u16) -> Self {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        Self::write(register, subindex, &buf)
    }

    /// Write command with a little-endian three byte payload.
    pub fn write_u24(register: Register, subindex: u8, value: u32) -> Self {
        let mut buf = [0u8; 3];
        LittleEndian::write_u24(&mut buf, value);
        Self::write(register, subindex, &buf)
    }

    /// Write command with a little-endian four byte payload.
    pub fn write_u32(register: Register, subindex: u8, value: u32) -> Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        Self::write(register, subindex, &buf)
    }

    /// Read command asking the drive for `expected` bytes of an object.
    pub fn read_request(register: Register, subindex: u8, expected: u8) -> Self {
        Self::build(Direction::Read, register, subindex, expected, &[])
    }

    /// Read-direction frame carrying object data back to the host.
    pub fn response(register: Register, subindex: u8, payload: &[u8]) -> Self {
        Self::build(Direction::Read, register, subindex, payload.len() as u8, payload)
    }

    /// Parse a frame from raw bytes, validating the length byte.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, StageError> {
        if bytes.len() < HEADER_LEN {
            return Err(StageError::Protocol(format!(
                "frame of {} bytes is shorter than the {} byte preamble",
                bytes.len(),
                HEADER_LEN
            )));
        }
        let declared = bytes[LENGTH_OFFSET] as usize;
        if declared == 0 {
            return Err(StageError::Protocol(
                "frame declares a zero length suffix".to_string(),
            ));
        }
        if declared != bytes.len() - LENGTH_BASE {
            return Err(StageError::Protocol(format!(
                "length byte {} does not match frame of {} bytes",
                declared,
                bytes.len()
            )));
        }
        Ok(Telegram { bytes })
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total frame length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame is empty. Never true for a parsed telegram.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Single byte at `index`, if present.
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// True if byte 9 marks this as a write command.
    pub fn is_write(&self) -> bool {
        self.bytes[9] == Direction::Write.code()
    }

    /// Register addressed by bytes 12 and 13.
    pub fn register(&self) -> Register {
        Register {
            index: self.bytes[12],
            object: self.bytes[13],
        }
    }

    /// Register subindex, byte 14.
    pub fn subindex(&self) -> u8 {
        self.bytes[14]
    }

    /// Declared data length, byte 18.
    pub fn declared_len(&self) -> u8 {
        self.bytes[18]
    }

    /// Payload bytes following the preamble.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_OFFSET..]
    }

    /// Payload interpreted as a little-endian unsigned integer. Zero
    /// for a frame with no payload.
    pub fn payload_uint(&self) -> u64 {
        let payload = self.payload();
        if payload.is_empty() {
            return 0;
        }
        LittleEndian::read_uint(payload, payload.len().min(8))
    }
}

impl fmt::Debug for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Telegram({:?})", self.bytes)
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.bytes)
    }
}

/// Codec framing telegrams by their length byte.
#[derive(Debug, Default)]
pub struct TelegramCodec;

impl Decoder for TelegramCodec {
    type Item = Telegram;
    type Error = StageError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Telegram>, StageError> {
        if src.len() < LENGTH_BASE {
            return Ok(None);
        }
        let declared = src[LENGTH_OFFSET] as usize;
        if declared == 0 {
            return Err(StageError::Protocol(
                "frame declares a zero length suffix".to_string(),
            ));
        }
        let total = LENGTH_BASE + declared;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let frame = src.split_to(total);
        Telegram::from_bytes(frame.to_vec()).map(Some)
    }
}

impl Encoder<Telegram> for TelegramCodec {
    type Error = StageError;

    fn encode(&mut self, item: Telegram, dst: &mut BytesMut) -> Result<(), StageError> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

/// Derive the echo the drive sends to acknowledge a command.
///
/// A write command is acknowledged by its own first 19 bytes with the
/// length byte set to 13 and bytes 15 through 18 zeroed. The status
/// request read command gets a full status word back instead, so there
/// is no fixed echo to check against.
pub fn derive_handshake(command: &Telegram) -> Result<Option<Telegram>, StageError> {
    if command.is_write() {
        let mut bytes = command.as_bytes()[..HEADER_LEN].to_vec();
        bytes[LENGTH_OFFSET] = (HEADER_LEN - LENGTH_BASE) as u8;
        for b in &mut bytes[15..HEADER_LEN] {
            *b = 0;
        }
        let echo = Telegram::from_bytes(bytes)?;
        return Ok(Some(echo));
    }
    if *command == registers::status_request() {
        return Ok(None);
    }
    Err(StageError::UnrecognizedTelegram)
}

/// Render a human readable summary of a status word reply.
///
/// Byte 19 carries the drive state bits, byte 20 the mode dependent
/// bits. Unknown patterns never fail, the summary just says the
/// telegram could not be interpreted.
pub fn interpret_status(telegram: &Telegram, mode: DriveMode) -> String {
    let mut msg = format!("Telegram {telegram}:");
    let mut recognized = false;

    if telegram.register() == registers::STATUS_WORD && telegram.len() >= 21 {
        match telegram.byte(19) {
            Some(33) => {
                recognized = true;
                msg.push_str(" Interpreted as byte 19: Switched on, quick stop active.");
            }
            Some(39) => {
                recognized = true;
                msg.push_str(" Interpreted as byte 19: Operation enabled.");
            }
            Some(8) => {
                recognized = true;
                msg.push_str(" Interpreted as byte 19: Fault.");
            }
            Some(64) => {
                recognized = true;
                msg.push_str(" Interpreted as byte 19: Switch on disabled.");
            }
            _ => {}
        }
        match mode {
            DriveMode::Homing => {
                msg.push_str(" Currently in homing mode.");
                match telegram.byte(20) {
                    Some(2) => {
                        recognized = true;
                        msg.push_str(" Interpreted as byte 20: Homing being executed.");
                    }
                    Some(22) => {
                        recognized = true;
                        msg.push_str(" Interpreted as byte 20: Homing complete, target reached.");
                    }
                    Some(34) => {
                        recognized = true;
                        msg.push_str(" Interpreted as byte 20: Homing error.");
                    }
                    _ => {
                        msg.push_str(" Could not interpret byte 20.");
                    }
                }
            }
            DriveMode::Position | DriveMode::Undefined => {
                msg.push_str(" Currently in profile position mode.");
                match telegram.byte(20) {
                    Some(2) => {
                        recognized = true;
                        msg.push_str(" Interpreted as byte 20: Move being executed.");
                    }
                    Some(4) => {
                        recognized = true;
                        msg.push_str(" Interpreted as byte 20: Drive waiting for setpoint.");
                    }
                    Some(6) => {
                        recognized = true;
                        msg.push_str(" Interpreted as byte 20: Setpoint acknowledged.");
                    }
                    Some(18) => {
                        recognized = true;
                        msg.push_str(" Interpreted as byte 20: Move complete, target reached.");
                    }
                    _ => {
                        msg.push_str(" Could not interpret byte 20.");
                    }
                }
            }
        }
    }

    if recognized {
        msg
    } else {
        format!("Telegram {telegram} could not be interpreted")
    }
}
