//! Emulated stepper drive
//!
//! Models the drive state machine well enough to exercise the full
//! enable, home and move lifecycle: control word writes walk the
//! states, reads report canned status words, and motions complete on
//! a timer scaled by the configured profile velocity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::protocol::registers;
use crate::protocol::telegram::{derive_handshake, Telegram, TelegramCodec};

/// How long the emulated homing run takes.
const HOMING_DURATION: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveState {
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    MotionInProgress,
    TargetReached,
}

#[derive(Debug)]
struct DriveModel {
    state: DriveState,
    mode: u8,
    position: f64,
    target: f64,
    motion_speed: f64,
    inputs_active: bool,
    frames_received: u64,
}

impl DriveModel {
    fn new() -> Self {
        DriveModel {
            state: DriveState::SwitchOnDisabled,
            mode: 0,
            position: 0.0,
            target: 0.0,
            motion_speed: 0.0,
            inputs_active: true,
            frames_received: 0,
        }
    }

    fn status(&self) -> Telegram {
        if !self.inputs_active {
            // Enable inputs low: byte 20 reads all zero.
            return Telegram::response(registers::STATUS_WORD, 0, &[64, 0]);
        }
        match self.state {
            DriveState::SwitchOnDisabled => registers::switch_on_disabled(),
            DriveState::ReadyToSwitchOn => registers::ready_to_switch_on(),
            DriveState::SwitchedOn => registers::switched_on(),
            DriveState::OperationEnabled => registers::operation_enabled(),
            DriveState::MotionInProgress => registers::motion_in_progress(),
            DriveState::TargetReached => registers::target_reached(),
        }
    }
}

/// Emulated stepper drive on a local TCP port.
pub struct MockStepperDevice {
    addr: SocketAddr,
    model: Arc<Mutex<DriveModel>>,
    accept_task: JoinHandle<()>,
}

impl MockStepperDevice {
    /// Start the emulator on an ephemeral port.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let model = Arc::new(Mutex::new(DriveModel::new()));
        let serve_model = Arc::clone(&model);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "drive client connected");
                        serve(stream, Arc::clone(&serve_model)).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });
        Ok(MockStepperDevice {
            addr,
            model,
            accept_task,
        })
    }

    /// Address the emulator listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the emulator listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of telegrams received so far.
    pub async fn frames_received(&self) -> u64 {
        self.model.lock().await.frames_received
    }

    /// Current modeled position in millimeters.
    pub async fn position(&self) -> f64 {
        self.model.lock().await.position
    }

    /// Raise or drop the modeled hardware enable inputs.
    pub async fn set_enable_inputs(&self, active: bool) {
        self.model.lock().await.inputs_active = active;
    }

    /// Shut the emulator down.
    pub fn stop(self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, model: Arc<Mutex<DriveModel>>) {
    let mut framed = Framed::new(stream, TelegramCodec);
    while let Some(frame) = framed.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "dropping client after framing error");
                return;
            }
        };
        let reply = {
            let mut guard = model.lock().await;
            guard.frames_received += 1;
            handle(&mut guard, &model, &frame)
        };
        match reply {
            Ok(reply) => {
                if framed.send(reply).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, telegram = %frame, "dropping client after unhandled telegram");
                return;
            }
        }
    }
    debug!("drive client disconnected");
}

fn handle(
    model: &mut DriveModel,
    shared: &Arc<Mutex<DriveModel>>,
    telegram: &Telegram,
) -> Result<Telegram, StageError> {
    let register = telegram.register();

    if !telegram.is_write() {
        return match register {
            registers::STATUS_WORD => Ok(model.status()),
            registers::GET_MODE => Ok(registers::mode_reply(model.mode)),
            registers::POSITION_ACTUAL => {
                let mut buf = [0u8; 4];
                LittleEndian::write_u32(&mut buf, (model.position * 100.0).round() as u32);
                Ok(Telegram::response(registers::POSITION_ACTUAL, 0, &buf))
            }
            _ => Err(StageError::Protocol(format!(
                "read of unmodeled register {register:?}"
            ))),
        };
    }

    match register {
        registers::CONTROL_WORD => {
            let word = telegram.payload_uint() as u16;
            apply_control_word(model, shared, word)?;
        }
        registers::SET_MODE => {
            model.mode = telegram.payload().first().copied().unwrap_or(0);
        }
        registers::TARGET_POSITION => {
            model.target = telegram.payload_uint() as f64 / 100.0;
        }
        registers::PROFILE_VELOCITY => {
            model.motion_speed = telegram.payload_uint() as f64 / 100.0;
        }
        registers::FEED_CONSTANT
        | registers::HOMING_SPEEDS
        | registers::HOMING_ACCELERATION
        | registers::PROFILE_ACCELERATION => {
            // Accepted and acknowledged, values do not affect the model.
        }
        _ => {
            return Err(StageError::Protocol(format!(
                "write to unmodeled register {register:?}"
            )))
        }
    }
    derive_handshake(telegram)?.ok_or_else(|| {
        StageError::Protocol("write telegram without a derivable handshake".to_string())
    })
}

fn apply_control_word(
    model: &mut DriveModel,
    shared: &Arc<Mutex<DriveModel>>,
    word: u16,
) -> Result<(), StageError> {
    match word {
        6 => model.state = DriveState::ReadyToSwitchOn,
        7 => {
            if model.state == DriveState::ReadyToSwitchOn {
                model.state = DriveState::SwitchedOn;
            }
        }
        15 => {
            if matches!(
                model.state,
                DriveState::SwitchedOn
                    | DriveState::OperationEnabled
                    | DriveState::TargetReached
            ) {
                model.state = DriveState::OperationEnabled;
            }
        }
        31 => start_motion(model, shared),
        other => {
            return Err(StageError::Protocol(format!(
                "unmodeled control word {other}"
            )))
        }
    }
    Ok(())
}

fn start_motion(model: &mut DriveModel, shared: &Arc<Mutex<DriveModel>>) {
    let (target, duration) = match model.mode {
        6 => (0.0, HOMING_DURATION),
        _ => {
            let distance = (model.target - model.position).abs();
            let duration = if model.motion_speed > 0.0 {
                Duration::from_secs_f64(distance / model.motion_speed)
            } else {
                Duration::ZERO
            };
            (model.target, duration)
        }
    };
    model.state = DriveState::MotionInProgress;
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let mut guard = shared.lock().await;
        guard.position = target;
        guard.state = DriveState::TargetReached;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn control_words_walk_the_state_machine() {
        let device = MockStepperDevice::start().await.unwrap();
        {
            let mut model = device.model.lock().await;
            let shared = Arc::clone(&device.model);
            assert_eq!(
                handle(&mut model, &shared, &registers::shutdown()).unwrap(),
                derive_handshake(&registers::shutdown()).unwrap().unwrap()
            );
            assert_eq!(model.state, DriveState::ReadyToSwitchOn);
            handle(&mut model, &shared, &registers::switch_on()).unwrap();
            assert_eq!(model.state, DriveState::SwitchedOn);
            handle(&mut model, &shared, &registers::enable_operation()).unwrap();
            assert_eq!(model.state, DriveState::OperationEnabled);
            assert_eq!(model.status(), registers::operation_enabled());
        }
        device.stop();
    }

    #[tokio::test]
    async fn inactive_inputs_zero_the_mode_bits() {
        let device = MockStepperDevice::start().await.unwrap();
        device.set_enable_inputs(false).await;
        let status = device.model.lock().await.status();
        assert_eq!(status.byte(20), Some(0));
        device.stop();
    }
}
