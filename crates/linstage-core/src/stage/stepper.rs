//! Stepper drive backend
//!
//! Drives a stepper motor controller over TCP using the binary
//! telegram protocol. The drive exposes a CiA 402 style state machine,
//! so every lifecycle step is a control word write followed by status
//! polling until the expected state bits appear.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::StepperConfig;
use crate::error::StageError;
use crate::protocol::poll::{PollFailure, PollTarget, Poller};
use crate::protocol::registers;
use crate::protocol::session::Session;
use crate::protocol::stream::connect_tcp;
use crate::protocol::telegram::{interpret_status, DriveMode, Telegram, TelegramCodec};
use crate::stage::{Stage, StageReport};

/// Slack added on top of the predicted move duration before a move is
/// declared stuck.
const MOVE_TIMEOUT_SLACK: f64 = 5.0;

/// Drive values are scaled by 100 on the wire.
const SCALE: f64 = 100.0;

/// A linear stage behind a binary telegram stepper drive.
pub struct StepperStage {
    config: StepperConfig,
    session: Session<TelegramCodec>,
    position: f64,
    mode: DriveMode,
}

impl StepperStage {
    /// New stage for the given configuration, not yet connected.
    pub fn new(config: StepperConfig) -> Self {
        StepperStage {
            config,
            session: Session::new(),
            position: 0.0,
            mode: DriveMode::Undefined,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    fn reply_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.reply_timeout)
    }

    /// Fetch the current status word from the drive.
    pub async fn retrieve_status(&self) -> Result<Telegram, StageError> {
        self.session
            .send_telegram(&registers::status_request(), true, false, self.reply_timeout())
            .await?
            .ok_or_else(|| StageError::Communication("response not received".to_string()))
    }

    /// Fetch the current position in millimeters from the drive.
    pub async fn query_position(&self) -> Result<f64, StageError> {
        let reply = self
            .session
            .send_telegram(&registers::get_position(), true, false, self.reply_timeout())
            .await?
            .ok_or_else(|| StageError::Communication("response not received".to_string()))?;
        Ok(reply.payload_uint() as f64 / SCALE)
    }

    async fn send_checked(&self, command: &Telegram) -> Result<(), StageError> {
        self.session
            .send_telegram(command, false, true, self.reply_timeout())
            .await?;
        Ok(())
    }

    /// Repeat `command` until a reply satisfies one of `targets`.
    async fn poll_telegram(
        &self,
        command: &Telegram,
        targets: &[PollTarget],
        timeout: Duration,
    ) -> Result<Telegram, StageError> {
        let poller = Poller::new(self.config.poll_frequency, timeout);
        let reply_timeout = self.reply_timeout();
        let session = &self.session;
        let result = poller
            .run(
                || async move {
                    session
                        .send_telegram(command, true, false, reply_timeout)
                        .await?
                        .ok_or_else(|| {
                            StageError::Communication("response not received".to_string())
                        })
                },
                |reply| targets.iter().any(|t| t.matches(reply)),
            )
            .await;
        match result {
            Ok(reply) => Ok(reply),
            Err(PollFailure::TimedOut { elapsed, last }) => {
                let diagnostic = interpret_status(&last, self.mode);
                Err(StageError::PollTimeout {
                    elapsed,
                    last: Some(last),
                    diagnostic,
                })
            }
            Err(PollFailure::Session(e)) => Err(e),
        }
    }

    async fn poll_status(
        &self,
        targets: &[PollTarget],
        timeout: Duration,
    ) -> Result<Telegram, StageError> {
        self.poll_telegram(&registers::status_request(), targets, timeout)
            .await
    }

    async fn set_mode(&mut self, mode: DriveMode) -> Result<(), StageError> {
        debug!(?mode, "selecting drive mode");
        self.send_checked(&Telegram::write_u8(registers::SET_MODE, 0, mode.code()))
            .await?;
        self.poll_telegram(
            &registers::get_mode(),
            &[PollTarget::new(registers::mode_reply(mode.code()))],
            self.reply_timeout(),
        )
        .await?;
        self.mode = mode;
        Ok(())
    }

    /// Push feed, homing and profile parameters to the drive.
    async fn apply_drive_settings(&self) -> Result<(), StageError> {
        let cfg = &self.config;
        debug!("writing drive settings");

        let feed = quantize("feed constant", cfg.feed_rate * SCALE, 16)?;
        self.send_checked(&Telegram::write_u16(registers::FEED_CONSTANT, 1, feed as u16))
            .await?;
        self.send_checked(&Telegram::write_u8(registers::FEED_CONSTANT, 2, 1))
            .await?;

        // Homing speeds are rpm on the wire, zero search at half the
        // switch search speed.
        let switch_rpm = quantize(
            "homing switch search speed",
            cfg.homing_speed / cfg.feed_rate * 60.0 * SCALE,
            16,
        )?;
        self.send_checked(&Telegram::write_u16(
            registers::HOMING_SPEEDS,
            1,
            switch_rpm as u16,
        ))
        .await?;
        self.send_checked(&Telegram::write_u16(
            registers::HOMING_SPEEDS,
            2,
            (switch_rpm / 2) as u16,
        ))
        .await?;

        // Homing acceleration is rpm/min² on the wire.
        let homing_accel = quantize(
            "homing acceleration",
            cfg.homing_acceleration / cfg.feed_rate * 3600.0 * SCALE,
            24,
        )?;
        self.send_checked(&Telegram::write_u24(
            registers::HOMING_ACCELERATION,
            0,
            homing_accel,
        ))
        .await?;

        let velocity = quantize("profile velocity", cfg.motion_speed * SCALE, 16)?;
        self.send_checked(&Telegram::write_u16(
            registers::PROFILE_VELOCITY,
            0,
            velocity as u16,
        ))
        .await?;
        let acceleration = quantize("profile acceleration", cfg.motion_acceleration * SCALE, 24)?;
        self.send_checked(&Telegram::write_u24(
            registers::PROFILE_ACCELERATION,
            0,
            acceleration,
        ))
        .await?;
        Ok(())
    }

    /// Predicted duration of a move to `target` in seconds, assuming a
    /// trapezoidal velocity profile with the configured speed and
    /// acceleration.
    pub fn time_to_target(&self, target: f64) -> f64 {
        let distance = (target - self.position).abs();
        let speed = self.config.motion_speed;
        let acceleration = self.config.motion_acceleration;
        // Distance covered while ramping between zero and full speed.
        let ramp_distance = speed.powi(2) / (2.0 * acceleration);
        if distance < 2.0 * ramp_distance {
            // Full speed is never reached.
            2.0 * (distance / acceleration).sqrt()
        } else {
            2.0 * (2.0 * ramp_distance / acceleration).sqrt()
                + (distance - 2.0 * ramp_distance) / speed
        }
    }
}

fn quantize(name: &'static str, scaled: f64, bits: u32) -> Result<u32, StageError> {
    let value = scaled.round();
    let limit = (1u64 << bits) as f64;
    if !(0.0..limit).contains(&value) {
        return Err(StageError::ParameterRange {
            name,
            value: scaled,
            limit,
        });
    }
    Ok(value as u32)
}

#[async_trait]
impl Stage for StepperStage {
    async fn connect(&mut self) -> Result<(), StageError> {
        if self.session.is_connected().await {
            return Err(StageError::AlreadyConnected);
        }
        let stream = connect_tcp(
            &self.config.socket_address,
            self.config.socket_port,
            Duration::from_secs_f64(self.config.connection_timeout),
        )
        .await?;
        self.session.attach(stream).await?;

        // The drive only accepts commands once its enable inputs are
        // high. Refuse the connection rather than fail on the first
        // command later.
        let status = self.retrieve_status().await?;
        if status.byte(20).unwrap_or(0) & 0b111 == 0 {
            self.session.detach().await;
            return Err(StageError::InvalidState(format!(
                "drive enable inputs are not active: {}",
                interpret_status(&status, self.mode)
            )));
        }
        info!(
            address = %self.config.socket_address,
            port = self.config.socket_port,
            "connected to stepper drive"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), StageError> {
        self.session.detach().await;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    async fn enable_motor(&mut self) -> Result<(), StageError> {
        info!("enabling motor");
        let timeout = self.reply_timeout();
        self.send_checked(&registers::shutdown()).await?;
        self.poll_status(&[PollTarget::new(registers::ready_to_switch_on())], timeout)
            .await?;
        self.set_mode(DriveMode::Position).await?;
        self.send_checked(&registers::switch_on()).await?;
        self.poll_status(&[PollTarget::new(registers::switched_on())], timeout)
            .await?;
        self.send_checked(&registers::enable_operation()).await?;
        self.poll_status(&[PollTarget::new(registers::operation_enabled())], timeout)
            .await?;
        self.apply_drive_settings().await?;
        Ok(())
    }

    async fn disable_motor(&mut self) -> Result<(), StageError> {
        info!("disabling motor");
        self.set_mode(DriveMode::Position).await?;
        self.send_checked(&registers::shutdown()).await?;
        self.poll_status(
            &[PollTarget::new(registers::ready_to_switch_on())],
            self.reply_timeout(),
        )
        .await?;
        Ok(())
    }

    async fn home(&mut self) -> Result<(), StageError> {
        let status = self.retrieve_status().await?;
        if status != registers::operation_enabled() && status != registers::target_reached() {
            return Err(StageError::InvalidState(format!(
                "drive is not ready to home: {}",
                interpret_status(&status, self.mode)
            )));
        }
        info!("homing");
        self.set_mode(DriveMode::Homing).await?;
        self.send_checked(&registers::enable_operation()).await?;
        self.send_checked(&registers::start_motion()).await?;
        self.poll_status(
            &[PollTarget::new(registers::target_reached())],
            Duration::from_secs_f64(self.config.homing_timeout),
        )
        .await?;
        self.set_mode(DriveMode::Position).await?;
        self.position = self.query_position().await?;
        info!(position = self.position, "homing complete");
        Ok(())
    }

    async fn move_absolute(&mut self, position: f64) -> Result<(), StageError> {
        if !(0.0..=self.config.maximum_stroke).contains(&position) {
            return Err(StageError::OutOfRange {
                value: position,
                max: self.config.maximum_stroke,
            });
        }
        info!(target = position, "moving");
        self.send_checked(&registers::enable_operation()).await?;
        self.send_checked(&Telegram::write_u32(
            registers::TARGET_POSITION,
            0,
            (position * SCALE).round() as u32,
        ))
        .await?;
        // Reset the start bit before raising it again.
        self.send_checked(&registers::enable_operation()).await?;
        let duration = self.time_to_target(position);
        self.send_checked(&registers::start_motion()).await?;
        self.poll_status(
            &[PollTarget::new(registers::target_reached())],
            Duration::from_secs_f64(duration + MOVE_TIMEOUT_SLACK),
        )
        .await?;
        self.position = self.query_position().await?;
        Ok(())
    }

    async fn move_relative(&mut self, offset: f64) -> Result<(), StageError> {
        let current = self.query_position().await?;
        self.position = current;
        self.move_absolute(current + offset).await
    }

    async fn stop(&mut self) -> Result<(), StageError> {
        Err(StageError::Unsupported(
            "the stepper drive cannot halt a move in progress",
        ))
    }

    async fn update(&mut self) -> Result<StageReport, StageError> {
        let status = self.retrieve_status().await?;
        let position = self.query_position().await?;
        self.position = position;
        let summary = registers::state_name(&status)
            .map(str::to_string)
            .unwrap_or_else(|| interpret_status(&status, self.mode));
        Ok(StageReport::new(position, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> StepperStage {
        StepperStage::new(StepperConfig::default())
    }

    #[test]
    fn time_to_target_is_zero_for_no_move() {
        assert_eq!(stage().time_to_target(0.0), 0.0);
    }

    #[test]
    fn time_to_target_is_symmetric() {
        let mut s = stage();
        s.position = 500.0;
        let up = s.time_to_target(600.0);
        let down = s.time_to_target(400.0);
        assert!((up - down).abs() < 1e-9);
    }

    #[test]
    fn time_to_target_grows_with_distance() {
        let s = stage();
        let mut last = 0.0;
        for target in [1.0, 10.0, 100.0, 500.0, 1000.0] {
            let t = s.time_to_target(target);
            assert!(t > last, "expected {t} > {last} for target {target}");
            last = t;
        }
    }

    #[test]
    fn time_to_target_covers_both_profile_shapes() {
        let s = stage();
        // Short move: never reaches full speed, pure ramp.
        let short = s.time_to_target(10.0);
        assert!((short - 2.0 * (10.0_f64 / 20.0).sqrt()).abs() < 1e-9);
        // Long move: ramp up, cruise, ramp down.
        let ramp = 50.0_f64.powi(2) / (2.0 * 20.0);
        let expected = 2.0 * (2.0 * ramp / 20.0).sqrt() + (1000.0 - 2.0 * ramp) / 50.0;
        assert!((s.time_to_target(1000.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn quantize_accepts_values_in_range() {
        assert_eq!(quantize("feed constant", 15_000.0, 16).unwrap(), 15_000);
    }

    #[test]
    fn quantize_rejects_values_beyond_the_register_width() {
        let err = quantize("feed constant", 70_000.0, 16).unwrap_err();
        assert!(matches!(
            err,
            StageError::ParameterRange { name: "feed constant", .. }
        ));
        assert!(quantize("profile acceleration", 70_000.0, 24).is_ok());
    }

    #[test]
    fn quantize_rejects_negative_values() {
        assert!(quantize("feed constant", -1.0, 16).is_err());
    }
}
