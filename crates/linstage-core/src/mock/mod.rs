//! Emulated controllers for testing without hardware
//!
//! Each emulator listens on an ephemeral local TCP port and models
//! just enough device behavior for the stage backends to run their
//! full lifecycle against it.

pub mod ascii;
pub mod stepper;

pub use ascii::MockAsciiDevice;
pub use stepper::MockStepperDevice;
