//! Byte stream transports
//!
//! Sessions are generic over anything that can move bytes, so stages
//! work the same over TCP, a serial line or an in-memory duplex used
//! by tests.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::error::StageError;

/// Transport bound for stage sessions.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug> ByteStream for T {}

/// Open a TCP connection to a controller, failing after `timeout`.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Box<dyn ByteStream>, StageError> {
    debug!(host, port, "opening TCP connection");
    let connect = TcpStream::connect((host, port));
    let stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| {
            StageError::Communication(format!(
                "could not connect to {host}:{port} within {timeout:?}"
            ))
        })?
        .map_err(|e| StageError::Communication(format!("could not connect to {host}:{port}: {e}")))?;
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

/// Open a serial port at the given baud rate.
pub fn open_serial(path: &str, baud_rate: u32) -> Result<Box<dyn ByteStream>, StageError> {
    debug!(path, baud_rate, "opening serial port");
    let stream = tokio_serial::new(path, baud_rate)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| StageError::Communication(format!("could not open {path}: {e}")))?;
    Ok(Box::new(stream))
}

/// Description of a serial port found on the host.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Device path, for example `/dev/ttyUSB0`.
    pub path: String,
    /// Port kind reported by the operating system.
    pub kind: String,
}

/// List serial ports available on the host. Errors are treated as no
/// ports found.
pub fn list_ports() -> Vec<PortInfo> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|p| PortInfo {
            path: p.port_name,
            kind: format!("{:?}", p.port_type),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_tcp_reports_refused_connections() {
        // Port 1 is essentially never listening.
        let err = connect_tcp("127.0.0.1", 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Communication(_)));
    }

    #[test]
    fn open_serial_reports_missing_device() {
        let err = open_serial("/dev/does-not-exist", 115200).unwrap_err();
        assert!(matches!(err, StageError::Communication(_)));
    }
}
