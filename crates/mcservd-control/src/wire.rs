//! Control-socket framing.
//!
//! Requests are a `u32` little-endian byte count followed by that many
//! bytes of UTF-8 JSON, expected to parse as a non-empty array
//! `[method, ...args]`. Replies are a bare JSON array with no length
//! prefix; the client reads to end-of-stream.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a request payload. Nothing legitimate comes close; this
/// keeps a garbage length prefix from allocating gigabytes.
pub const MAX_REQUEST_LEN: u32 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ControlWireError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("request of {0} bytes exceeds the {MAX_REQUEST_LEN} byte limit")]
    TooLarge(u32),

    #[error("request is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request must be a non-empty array [method, ...args]")]
    Malformed,
}

/// Read one length-prefixed request and parse it into its elements.
pub async fn read_request<R>(reader: &mut R) -> Result<Vec<Value>, ControlWireError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await?;
    if len > MAX_REQUEST_LEN {
        return Err(ControlWireError::TooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    match serde_json::from_slice(&payload)? {
        Value::Array(elements) if !elements.is_empty() => Ok(elements),
        _ => Err(ControlWireError::Malformed),
    }
}

/// Serialize and send one reply array, flushing the stream.
pub async fn write_reply<W>(writer: &mut W, reply: &[Value]) -> Result<(), ControlWireError>
where
    W: AsyncWrite + Unpin,
{
    let raw = serde_json::to_vec(reply)?;
    writer.write_all(&raw).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode one request the way `read_request` expects it.
pub fn encode_request(elements: &[Value]) -> Result<Vec<u8>, ControlWireError> {
    let payload = serde_json::to_vec(elements)?;
    let len = u32::try_from(payload.len()).map_err(|_| ControlWireError::TooLarge(u32::MAX))?;
    if len > MAX_REQUEST_LEN {
        return Err(ControlWireError::TooLarge(len));
    }
    let mut raw = Vec::with_capacity(4 + payload.len());
    raw.extend_from_slice(&len.to_le_bytes());
    raw.extend_from_slice(&payload);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reads_an_encoded_request() {
        let raw = encode_request(&[json!("ban"), json!("Steve"), json!("griefing")]).unwrap();
        let mut reader = std::io::Cursor::new(raw);
        let elements = read_request(&mut reader).await.unwrap();
        assert_eq!(elements, vec![json!("ban"), json!("Steve"), json!("griefing")]);
    }

    #[tokio::test]
    async fn rejects_oversized_length_prefix() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(MAX_REQUEST_LEN + 1).to_le_bytes());
        let mut reader = std::io::Cursor::new(raw);
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, ControlWireError::TooLarge(_)));
    }

    #[tokio::test]
    async fn rejects_non_array_and_empty_payloads() {
        for payload in [r#"{"method":"stop"}"#, "[]", "42"] {
            let mut raw = Vec::new();
            raw.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_le_bytes());
            raw.extend_from_slice(payload.as_bytes());
            let mut reader = std::io::Cursor::new(raw);
            let err = read_request(&mut reader).await.unwrap_err();
            assert!(matches!(err, ControlWireError::Malformed), "payload {payload}");
        }
    }

    #[tokio::test]
    async fn rejects_truncated_payload() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(b"[\"stop\"]");
        let mut reader = std::io::Cursor::new(raw);
        assert!(matches!(
            read_request(&mut reader).await.unwrap_err(),
            ControlWireError::Io(_)
        ));
    }

    #[tokio::test]
    async fn reply_is_bare_json_with_no_prefix() {
        let mut out = Vec::new();
        write_reply(&mut out, &[json!(true), json!(42)]).await.unwrap();
        assert_eq!(out, br"[true,42]");
    }
}
