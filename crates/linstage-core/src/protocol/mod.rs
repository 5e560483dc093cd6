//! Wire protocols and device sessions
//!
//! Two controller families are supported: a stepper drive speaking a
//! fixed binary telegram format over TCP, and a motion controller
//! speaking a line oriented ASCII protocol over serial or TCP. Both
//! run through the same [`session::Session`], parameterized by codec.

pub mod ascii;
pub mod poll;
pub mod registers;
pub mod session;
pub mod stream;
pub mod telegram;

use std::time::Duration;

/// Default deadline for a command reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(20);
/// Default deadline for opening a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default status polling rate in Hz.
pub const DEFAULT_POLL_FREQUENCY_HZ: f64 = 2.0;

pub use ascii::{AsciiCodec, AsciiCommand, AsciiReply, ReplyFlag, ReplyStatus};
pub use poll::{PollFailure, PollTarget, Poller};
pub use registers::Register;
pub use session::Session;
pub use stream::{connect_tcp, list_ports, open_serial, ByteStream, PortInfo};
pub use telegram::{derive_handshake, interpret_status, DriveMode, Telegram, TelegramCodec};
