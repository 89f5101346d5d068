//! RCON protocol client.
//!
//! Owns one TCP connection to the server's RCON port. The request-id
//! counter is owned by the client instance and seeded randomly at
//! construction so ids don't collide across supervisor restarts. Ids
//! increase monotonically and wrap mod 2^32 by `fetch_add` semantics.
//!
//! The protocol has no application-level multiplexing: callers must keep at
//! most one `authenticate`/`run_command` exchange in flight per connection.
//! Both take `&mut self`, and the supervisor's command lock is the
//! serialization boundary that makes this hold system-wide.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use mcservd_core::ChannelError;

use crate::frame::{Frame, KIND_AUTH, KIND_AUTH_FAILED, KIND_COMMAND};

/// Client for the server's remote console protocol.
pub struct RconClient {
    stream: TcpStream,
    request_id: AtomicU32,
    closed: bool,
}

/// Random seed in `[1, 0x7fff_ffff]`, sourced from a v4 uuid (the workspace
/// carries no direct rand dependency).
fn seed_request_id() -> u32 {
    let raw = uuid::Uuid::new_v4().as_u128() as u32 & 0x7fff_ffff;
    raw.max(1)
}

impl RconClient {
    /// Open a connection to the RCON port.
    ///
    /// A refused connection surfaces as [`ChannelError::Transport`]; the
    /// supervisor treats that as recoverable and retries.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect((host, port)).await?;
        debug!(%host, %port, "rcon connection established");
        Ok(Self {
            stream,
            request_id: AtomicU32::new(seed_request_id()),
            closed: false,
        })
    }

    fn next_request_id(&self) -> u32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        let raw = frame
            .encode()
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        self.stream.write_all(&raw).await?;
        self.stream.flush().await?;
        trace!(request_id = frame.request_id, kind = frame.kind, "frame sent");
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Frame, ChannelError> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await?;
        let size = u32::from_le_bytes(prefix) as usize;

        let mut raw = Vec::with_capacity(4 + size);
        raw.extend_from_slice(&prefix);
        raw.resize(4 + size, 0);
        self.stream.read_exact(&mut raw[4..]).await?;

        let frame = Frame::decode(&raw).map_err(|e| ChannelError::Protocol(e.to_string()))?;
        trace!(request_id = frame.request_id, kind = frame.kind, "frame received");
        Ok(frame)
    }

    async fn exchange(&mut self, kind: u32, payload: Vec<u8>) -> Result<(Frame, Frame), ChannelError> {
        let sent = Frame::new(self.next_request_id(), kind, payload);
        self.send_frame(&sent).await?;
        let received = self.recv_frame().await?;
        Ok((sent, received))
    }

    /// Present the RCON password.
    ///
    /// `Ok(false)` on a clean rejection (the connection stays open but is
    /// unusable for commands); a reply that neither fails nor echoes our
    /// request id means the connection is desynchronized and is a protocol
    /// violation.
    pub async fn authenticate(&mut self, secret: &str) -> Result<bool, ChannelError> {
        let (sent, received) = self.exchange(KIND_AUTH, secret.as_bytes().to_vec()).await?;

        if received.kind == KIND_AUTH_FAILED {
            return Ok(false);
        }
        if received.request_id == sent.request_id {
            return Ok(true);
        }
        Err(ChannelError::Protocol(format!(
            "auth reply neither failed nor succeeded: id {} (sent {}), kind {}",
            received.request_id, sent.request_id, received.kind
        )))
    }

    /// Issue one command (argv joined by single spaces) and return the raw
    /// response payload.
    pub async fn run_command(&mut self, argv: &[String]) -> Result<Vec<u8>, ChannelError> {
        let payload = argv.join(" ").into_bytes();
        let (_, received) = self.exchange(KIND_COMMAND, payload).await?;
        Ok(received.payload)
    }

    /// Half-close the write side and release the connection. Idempotent.
    pub async fn close(&mut self) {
        if !self.closed {
            let _ = self.stream.shutdown().await;
            self.closed = true;
        }
    }
}
