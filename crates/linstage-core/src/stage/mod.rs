//! Stage backends
//!
//! A stage is one linear axis behind some controller. Backends expose
//! the same lifecycle regardless of the wire protocol underneath:
//! connect, enable, home, move, report.

pub mod ascii;
pub mod stepper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StageError;

pub use ascii::AsciiStage;
pub use stepper::StepperStage;

/// One telemetry sample from a stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// Position in millimeters.
    pub position: f64,
    /// Human readable controller status.
    pub status: String,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl StageReport {
    /// New report stamped with the current time.
    pub fn new(position: f64, status: impl Into<String>) -> Self {
        StageReport {
            position,
            status: status.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Common behavior of every stage backend.
#[async_trait]
pub trait Stage: Send {
    /// Open the connection to the controller.
    async fn connect(&mut self) -> Result<(), StageError>;

    /// Close the connection. Disconnecting an idle stage is not an error.
    async fn disconnect(&mut self) -> Result<(), StageError>;

    /// Whether the controller connection is open.
    async fn is_connected(&self) -> bool;

    /// Power up the motor and push drive settings where applicable.
    async fn enable_motor(&mut self) -> Result<(), StageError>;

    /// Power down the motor.
    async fn disable_motor(&mut self) -> Result<(), StageError>;

    /// Find the reference position. Blocks until homing completes.
    async fn home(&mut self) -> Result<(), StageError>;

    /// Move to an absolute position in millimeters. Blocks until the
    /// target is reached.
    async fn move_absolute(&mut self, position: f64) -> Result<(), StageError>;

    /// Move by an offset in millimeters relative to the current
    /// position. Blocks until the target is reached.
    async fn move_relative(&mut self, offset: f64) -> Result<(), StageError>;

    /// Halt a move in progress, where the controller supports it.
    async fn stop(&mut self) -> Result<(), StageError>;

    /// Fetch position and status from the controller.
    async fn update(&mut self) -> Result<StageReport, StageError>;
}
