//! Stage configuration
//!
//! Configurations deserialize from JSON or YAML fragments handed down
//! by a supervisory system, with defaults for the timing knobs most
//! deployments never touch.

use serde::{Deserialize, Serialize};

use crate::protocol::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_POLL_FREQUENCY_HZ, DEFAULT_REPLY_TIMEOUT,
};

fn default_connection_timeout() -> f64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs_f64()
}

fn default_reply_timeout() -> f64 {
    DEFAULT_REPLY_TIMEOUT.as_secs_f64()
}

fn default_poll_frequency() -> f64 {
    DEFAULT_POLL_FREQUENCY_HZ
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_daisy_chain_address() -> u8 {
    1
}

fn default_move_timeout() -> f64 {
    30.0
}

/// Configuration for a stepper drive stage on TCP.
///
/// Speeds are mm/s, accelerations mm/s², strokes and feeds mm, and
/// timeouts seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepperConfig {
    /// Host name or address of the drive.
    pub socket_address: String,
    /// TCP port of the drive.
    pub socket_port: u16,
    /// Linear feed per shaft revolution.
    pub feed_rate: f64,
    /// Travel limit. Demanded positions must stay within 0..=maximum_stroke.
    pub maximum_stroke: f64,
    /// Speed used while searching for the home switch.
    pub homing_speed: f64,
    /// Acceleration used while homing.
    pub homing_acceleration: f64,
    /// How long a homing run may take before it is abandoned.
    pub homing_timeout: f64,
    /// Profile speed for commanded moves.
    pub motion_speed: f64,
    /// Profile acceleration for commanded moves.
    pub motion_acceleration: f64,
    /// Deadline for opening the TCP connection.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: f64,
    /// Deadline for a single command reply.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout: f64,
    /// Status polling rate in Hz.
    #[serde(default = "default_poll_frequency")]
    pub poll_frequency: f64,
}

impl Default for StepperConfig {
    fn default() -> Self {
        StepperConfig {
            socket_address: "127.0.0.1".to_string(),
            socket_port: 502,
            feed_rate: 150.0,
            maximum_stroke: 1000.0,
            homing_speed: 30.0,
            homing_acceleration: 20.0,
            homing_timeout: 60.0,
            motion_speed: 50.0,
            motion_acceleration: 20.0,
            connection_timeout: default_connection_timeout(),
            reply_timeout: default_reply_timeout(),
            poll_frequency: default_poll_frequency(),
        }
    }
}

/// Configuration for an ASCII protocol stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AsciiConfig {
    /// Serial device path, or `host:port` to connect over TCP.
    pub port: String,
    /// Serial baud rate. Ignored for TCP.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Address of the device on the daisy chain.
    #[serde(default = "default_daisy_chain_address")]
    pub daisy_chain_address: u8,
    /// Conversion between device steps and millimeters.
    pub steps_per_mm: f64,
    /// Deadline for a single command reply.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout: f64,
    /// Status polling rate in Hz while waiting for moves.
    #[serde(default = "default_poll_frequency")]
    pub poll_frequency: f64,
    /// How long a move or homing run may stay busy.
    #[serde(default = "default_move_timeout")]
    pub move_timeout: f64,
}

impl Default for AsciiConfig {
    fn default() -> Self {
        AsciiConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            daisy_chain_address: default_daisy_chain_address(),
            steps_per_mm: 1000.0,
            reply_timeout: default_reply_timeout(),
            poll_frequency: default_poll_frequency(),
            move_timeout: default_move_timeout(),
        }
    }
}
