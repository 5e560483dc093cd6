//! ASCII motion controller backend
//!
//! Drives a stage speaking the line oriented ASCII protocol, normally
//! over a serial link. A `host:port` value in the configuration
//! connects over TCP instead, which is how the emulated device is
//! reached.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::AsciiConfig;
use crate::error::StageError;
use crate::protocol::ascii::{AsciiCodec, AsciiCommand, AsciiReply, ReplyStatus};
use crate::protocol::poll::{PollFailure, Poller};
use crate::protocol::session::Session;
use crate::protocol::stream::{connect_tcp, open_serial};
use crate::protocol::DEFAULT_CONNECT_TIMEOUT;
use crate::stage::{Stage, StageReport};

/// A linear stage behind an ASCII protocol motion controller.
pub struct AsciiStage {
    config: AsciiConfig,
    session: Session<AsciiCodec>,
    position: f64,
}

impl AsciiStage {
    /// New stage for the given configuration, not yet connected.
    pub fn new(config: AsciiConfig) -> Self {
        AsciiStage {
            config,
            session: Session::new(),
            position: 0.0,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &AsciiConfig {
        &self.config
    }

    fn reply_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.reply_timeout)
    }

    /// Send one command line and classify the reply. Rejections become
    /// errors, warnings are logged and the reply passed through.
    async fn send_command(&self, body: &str) -> Result<AsciiReply, StageError> {
        let command = AsciiCommand::new(self.config.daisy_chain_address, 0, body);
        debug!(%command, "sending command");
        let reply = self
            .session
            .transact(command, true, self.reply_timeout())
            .await?
            .ok_or_else(|| StageError::Communication("response not received".to_string()))?;
        match reply.classify() {
            ReplyStatus::Accepted => Ok(reply),
            ReplyStatus::AcceptedWithWarning { reason } => {
                warn!(%reason, "command accepted with an active warning");
                Ok(reply)
            }
            ReplyStatus::Rejected { reason } => Err(StageError::Rejected(reason)),
        }
    }

    /// Poll the device status until it reports IDLE.
    async fn wait_until_idle(&self) -> Result<(), StageError> {
        let poller = Poller::new(
            self.config.poll_frequency,
            Duration::from_secs_f64(self.config.move_timeout),
        );
        let result = poller
            .run(|| self.send_command(""), |reply| reply.status == "IDLE")
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(PollFailure::TimedOut { elapsed, last }) => Err(StageError::PollTimeout {
                elapsed,
                last: None,
                diagnostic: format!("device still {} after {elapsed:?}", last.status),
            }),
            Err(PollFailure::Session(e)) => Err(e),
        }
    }

    /// Fetch the current position in millimeters from the device.
    pub async fn query_position(&self) -> Result<f64, StageError> {
        let reply = self.send_command("get pos").await?;
        let steps: f64 = reply
            .data
            .split_whitespace()
            .next()
            .unwrap_or("")
            .parse()
            .map_err(|_| {
                StageError::Protocol(format!("position reply carries no number: {:?}", reply.data))
            })?;
        Ok(steps / self.config.steps_per_mm)
    }

    fn steps(&self, millimeters: f64) -> i64 {
        (millimeters * self.config.steps_per_mm).round() as i64
    }
}

#[async_trait]
impl Stage for AsciiStage {
    async fn connect(&mut self) -> Result<(), StageError> {
        if self.session.is_connected().await {
            return Err(StageError::AlreadyConnected);
        }
        let stream = match self.config.port.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| {
                    StageError::Communication(format!(
                        "bad port number in {:?}",
                        self.config.port
                    ))
                })?;
                connect_tcp(host, port, DEFAULT_CONNECT_TIMEOUT).await?
            }
            None => open_serial(&self.config.port, self.config.baud_rate)?,
        };
        self.session.attach(stream).await?;
        info!(port = %self.config.port, "connected to motion controller");
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
        // The controller energizes its motor on its own.
        debug!("enable requested, nothing to do");
        Ok(())
    }

    async fn disable_motor(&mut self) -> Result<(), StageError> {
        debug!("disable requested, nothing to do");
        Ok(())
    }

    async fn home(&mut self) -> Result<(), StageError> {
        info!("homing");
        self.send_command("home").await?;
        self.wait_until_idle().await?;
        self.position = self.query_position().await?;
        info!(position = self.position, "homing complete");
        Ok(())
    }

    async fn move_absolute(&mut self, position: f64) -> Result<(), StageError> {
        info!(target = position, "moving");
        self.send_command(&format!("move abs {}", self.steps(position)))
            .await?;
        self.wait_until_idle().await?;
        self.position = self.query_position().await?;
        Ok(())
    }

    async fn move_relative(&mut self, offset: f64) -> Result<(), StageError> {
        info!(offset, "moving relative");
        self.send_command(&format!("move rel {}", self.steps(offset)))
            .await?;
        self.wait_until_idle().await?;
        self.position = self.query_position().await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), StageError> {
        info!("stopping");
        self.send_command("stop").await?;
        self.wait_until_idle().await?;
        self.position = self.query_position().await?;
        Ok(())
    }

    async fn update(&mut self) -> Result<StageReport, StageError> {
        let status = self.send_command("").await?;
        let position = self.query_position().await?;
        self.position = position;
        Ok(StageReport::new(position, status.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_round_to_the_nearest_step() {
        let stage = AsciiStage::new(AsciiConfig {
            steps_per_mm: 4000.0,
            ..AsciiConfig::default()
        });
        assert_eq!(stage.steps(10.0), 40_000);
        assert_eq!(stage.steps(0.00011), 0);
        assert_eq!(stage.steps(-2.5), -10_000);
    }
}
