//! # Linear Stage Core Library
//!
//! Control library for single axis linear stages used on telescope
//! instrument mounts.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Binary telegram protocol for CiA 402 style stepper drives
//! - Line oriented ASCII protocol for daisy chained motion controllers
//! - A shared session and polling layer over TCP and serial transports
//! - Emulated devices for testing without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use linstage_core::prelude::*;
//!
//! let mut stage = StepperStage::new(config);
//! stage.connect().await?;
//! stage.enable_motor().await?;
//! stage.home().await?;
//! stage.move_absolute(10.0).await?;
//! let report = stage.update().await?;
//! println!("position: {} mm", report.position);
//! ```

pub mod config;
pub mod error;
pub mod mock;
pub mod protocol;
pub mod stage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AsciiConfig, StepperConfig};
    pub use crate::error::StageError;
    pub use crate::protocol::{
        AsciiCommand, AsciiReply, DriveMode, ReplyStatus, Session, Telegram,
    };
    pub use crate::stage::{AsciiStage, Stage, StageReport, StepperStage};
}

/// Library version from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
