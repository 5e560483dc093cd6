//! Device session over a framed byte stream
//!
//! A session owns the transport and serializes command/reply exchanges
//! behind an async mutex, so concurrent callers cannot interleave
//! frames. Any transport failure drops the transport; the caller must
//! reconnect before issuing further commands.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, warn};

use crate::error::StageError;
use crate::protocol::stream::ByteStream;
use crate::protocol::telegram::{derive_handshake, Telegram, TelegramCodec};

/// A connection to one device, framed by codec `C`.
pub struct Session<C> {
    transport: Mutex<Option<Framed<Box<dyn ByteStream>, C>>>,
}

impl<C> Default for Session<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Session<C> {
    /// New session with no transport attached.
    pub fn new() -> Self {
        Session {
            transport: Mutex::new(None),
        }
    }

    /// Whether a transport is currently attached.
    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Attach a freshly opened transport.
    pub async fn attach(&self, stream: Box<dyn ByteStream>) -> Result<(), StageError>
    where
        C: Default,
    {
        let mut guard = self.transport.lock().await;
        if guard.is_some() {
            return Err(StageError::AlreadyConnected);
        }
        *guard = Some(Framed::new(stream, C::default()));
        Ok(())
    }

    /// Drop the transport. Detaching an idle session is not an error.
    pub async fn detach(&self) {
        let mut guard = self.transport.lock().await;
        if guard.take().is_some() {
            debug!("session detached");
        }
    }

    /// Send one frame and, if `want_reply` is set, wait up to `timeout`
    /// for the next inbound frame.
    ///
    /// A closed stream, a read timeout or a framing error all drop the
    /// transport before the error is returned.
    pub async fn transact<I>(
        &self,
        item: I,
        want_reply: bool,
        timeout: Duration,
    ) -> Result<Option<<C as Decoder>::Item>, StageError>
    where
        C: Decoder<Error = StageError> + Encoder<I, Error = StageError>,
    {
        let mut guard = self.transport.lock().await;
        let framed = guard.as_mut().ok_or(StageError::NotConnected)?;

        if let Err(e) = framed.send(item).await {
            warn!(error = %e, "write failed, dropping transport");
            *guard = None;
            return Err(communication(e));
        }
        if !want_reply {
            return Ok(None);
        }

        match tokio::time::timeout(timeout, framed.next()).await {
            Err(_) => {
                warn!("no reply within {timeout:?}, dropping transport");
                *guard = None;
                Err(StageError::Communication(format!(
                    "no reply received within {timeout:?}"
                )))
            }
            Ok(None) => {
                warn!("connection closed by device");
                *guard = None;
                Err(StageError::Communication(
                    "connection closed by device".to_string(),
                ))
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "read failed, dropping transport");
                *guard = None;
                Err(communication(e))
            }
            Ok(Some(Ok(frame))) => Ok(Some(frame)),
        }
    }
}

/// I/O errors become communication errors; typed protocol errors pass
/// through unchanged.
fn communication(e: StageError) -> StageError {
    match e {
        StageError::Io(io) => StageError::Communication(io.to_string()),
        other => other,
    }
}

impl Session<TelegramCodec> {
    /// Send a telegram to the drive.
    ///
    /// With `check_handshake` set the drive's echo is read and compared
    /// against the expected acknowledgement for the command. With
    /// `return_response` set the reply frame is handed back to the
    /// caller instead.
    pub async fn send_telegram(
        &self,
        command: &Telegram,
        return_response: bool,
        check_handshake: bool,
        timeout: Duration,
    ) -> Result<Option<Telegram>, StageError> {
        let want_reply = return_response || check_handshake;
        let reply = self.transact(command.clone(), want_reply, timeout).await?;

        if check_handshake {
            if let Some(expected) = derive_handshake(command)? {
                let actual = reply
                    .clone()
                    .ok_or_else(|| StageError::Communication("response not received".to_string()))?;
                if actual != expected {
                    return Err(StageError::HandshakeMismatch { expected, actual });
                }
            }
        }

        Ok(if return_response { reply } else { None })
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    use super::*;
    use crate::protocol::registers;

    async fn attach_duplex(
        session: &Session<TelegramCodec>,
    ) -> Framed<tokio::io::DuplexStream, TelegramCodec> {
        let (near, far) = tokio::io::duplex(1024);
        session.attach(Box::new(near)).await.unwrap();
        Framed::new(far, TelegramCodec)
    }

    #[tokio::test]
    async fn transact_without_transport_is_not_connected() {
        let session: Session<TelegramCodec> = Session::new();
        let err = session
            .transact(registers::status_request(), true, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::NotConnected));
    }

    #[tokio::test]
    async fn attach_twice_is_already_connected() {
        let session: Session<TelegramCodec> = Session::new();
        let _far = attach_duplex(&session).await;
        let (near, _keep) = tokio::io::duplex(64);
        let err = session.attach(Box::new(near)).await.unwrap_err();
        assert!(matches!(err, StageError::AlreadyConnected));
    }

    #[tokio::test]
    async fn handshake_mismatch_is_detected() {
        let session: Session<TelegramCodec> = Session::new();
        let mut far = attach_duplex(&session).await;

        let device = tokio::spawn(async move {
            // Echo a wrong acknowledgement.
            let _cmd = far.next().await.unwrap().unwrap();
            far.send(registers::operation_enabled()).await.unwrap();
            far
        });

        let err = session
            .send_telegram(&registers::shutdown(), false, true, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::HandshakeMismatch { .. }));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn valid_handshake_passes() {
        let session: Session<TelegramCodec> = Session::new();
        let mut far = attach_duplex(&session).await;

        let device = tokio::spawn(async move {
            let cmd = far.next().await.unwrap().unwrap();
            let echo = derive_handshake(&cmd).unwrap().unwrap();
            far.send(echo).await.unwrap();
            far
        });

        session
            .send_telegram(&registers::shutdown(), false, true, Duration::from_secs(1))
            .await
            .unwrap();
        device.await.unwrap();
    }

    #[tokio::test]
    async fn closed_stream_detaches_the_session() {
        let session: Session<TelegramCodec> = Session::new();
        let far = attach_duplex(&session).await;
        drop(far);

        let err = session
            .transact(registers::status_request(), true, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Communication(_)));
        assert!(!session.is_connected().await);
    }
}
