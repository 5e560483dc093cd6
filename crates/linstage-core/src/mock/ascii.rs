//! Emulated ASCII motion controller
//!
//! Speaks the line protocol over a local TCP port. Moves settle on a
//! timer, the status field reports BUSY until they do, and commands
//! outside the modeled travel range are rejected the way the real
//! device rejects them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Travel range of the modeled axis in steps.
const TRAVEL_RANGE: std::ops::RangeInclusive<i64> = 0..=1_000_000;
/// Modeled speed in steps per second.
const SPEED_STEPS_PER_S: f64 = 100_000.0;

#[derive(Debug)]
struct AxisModel {
    address: u8,
    position: i64,
    target: i64,
    moving_until: Option<Instant>,
}

impl AxisModel {
    fn new(address: u8) -> Self {
        AxisModel {
            address,
            position: 0,
            target: 0,
            moving_until: None,
        }
    }

    /// Fold a finished move into the position.
    fn settle(&mut self) {
        if let Some(until) = self.moving_until {
            if Instant::now() >= until {
                self.position = self.target;
                self.moving_until = None;
            }
        }
    }

    fn status(&self) -> &'static str {
        if self.moving_until.is_some() {
            "BUSY"
        } else {
            "IDLE"
        }
    }

    fn begin_move(&mut self, target: i64) {
        let distance = (target - self.position).abs() as f64;
        self.target = target;
        self.moving_until =
            Some(Instant::now() + Duration::from_secs_f64(distance / SPEED_STEPS_PER_S));
    }

    fn reply(&self, flag: &str, data: impl std::fmt::Display) -> String {
        format!("@{:02} 0 {} {} -- {}", self.address, flag, self.status(), data)
    }

    fn handle(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;
        let mut fields = rest.splitn(3, ' ');
        let device: u8 = fields.next()?.parse().ok()?;
        let _axis: u8 = fields.next()?.parse().ok()?;
        if device != self.address {
            // Another device on the chain, stay silent.
            return None;
        }
        let body = fields.next().unwrap_or("").trim();
        self.settle();

        let words: Vec<&str> = body.split_whitespace().collect();
        let reply = match words.as_slice() {
            [] => self.reply("OK", 0),
            ["home"] => {
                self.begin_move(0);
                self.reply("OK", 0)
            }
            ["get", "pos"] => self.reply("OK", self.position),
            ["stop"] => {
                self.moving_until = None;
                self.target = self.position;
                self.reply("OK", 0)
            }
            ["move", which @ ("abs" | "rel"), value] => match value.parse::<i64>() {
                Ok(value) => {
                    let target = if *which == "abs" {
                        value
                    } else {
                        self.position + value
                    };
                    if TRAVEL_RANGE.contains(&target) {
                        self.begin_move(target);
                        self.reply("OK", 0)
                    } else {
                        self.reply("RJ", "BADDATA")
                    }
                }
                Err(_) => self.reply("RJ", "BADDATA"),
            },
            _ => self.reply("RJ", "BADCOMMAND"),
        };
        Some(reply)
    }
}

/// Emulated ASCII motion controller on a local TCP port.
pub struct MockAsciiDevice {
    addr: SocketAddr,
    model: Arc<Mutex<AxisModel>>,
    accept_task: JoinHandle<()>,
}

impl MockAsciiDevice {
    /// Start the emulator on an ephemeral port.
    pub async fn start(address: u8) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let model = Arc::new(Mutex::new(AxisModel::new(address)));
        let serve_model = Arc::clone(&model);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "controller client connected");
                        serve(stream, Arc::clone(&serve_model)).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });
        Ok(MockAsciiDevice {
            addr,
            model,
            accept_task,
        })
    }

    /// `host:port` string the emulator listens on.
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Current modeled position in steps, after settling any move.
    pub async fn position(&self) -> i64 {
        let mut model = self.model.lock().await;
        model.settle();
        model.position
    }

    /// Shut the emulator down.
    pub fn stop(self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, model: Arc<Mutex<AxisModel>>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        };
        let reply = model.lock().await.handle(&line);
        if let Some(reply) = reply {
            if write.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() {
                break;
            }
        }
    }
    debug!("controller client disconnected");
}
