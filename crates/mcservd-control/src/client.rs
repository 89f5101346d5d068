//! One-shot control-socket client.
//!
//! Writes a single length-prefixed request, half-closes the write side,
//! and reads the reply to end-of-stream.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::wire::{ControlWireError, encode_request};

#[derive(Debug, Error)]
pub enum ControlClientError {
    /// The socket file is missing or nobody is listening on it.
    #[error("The server daemon is not running.")]
    NotRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] ControlWireError),

    #[error("reply is not a JSON array: {0}")]
    MalformedReply(String),
}

/// Send one request and decode the reply array.
pub async fn send_request(
    path: &Path,
    elements: &[Value],
) -> Result<Vec<Value>, ControlClientError> {
    let mut stream = match UnixStream::connect(path).await {
        Ok(stream) => stream,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Err(ControlClientError::NotRunning);
        }
        Err(e) => return Err(e.into()),
    };

    stream.write_all(&encode_request(elements)?).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;

    match serde_json::from_slice(&raw) {
        Ok(Value::Array(reply)) => Ok(reply),
        Ok(other) => Err(ControlClientError::MalformedReply(other.to_string())),
        Err(_) => Err(ControlClientError::MalformedReply(
            String::from_utf8_lossy(&raw).into_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_socket_means_the_daemon_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let err = send_request(&dir.path().join("nope.sock"), &[json!("query")])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlClientError::NotRunning));
    }

    #[tokio::test]
    async fn stale_socket_means_the_daemon_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(tokio::net::UnixListener::bind(&path).unwrap());

        let err = send_request(&path, &[json!("query")]).await.unwrap_err();
        assert!(matches!(err, ControlClientError::NotRunning));
    }
}
