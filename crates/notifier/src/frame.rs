//! Length-prefixed frames carrying suspension events.
//!
//! Wire format: a 4-byte big-endian length followed by that many bytes of
//! JSON-encoded [`SuspensionEvent`].

use bytes::{BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};

use warden_core::{types::SuspensionEvent, Error, Result};

/// Largest payload accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::transport(format!(
            "frame too large: {} > {}",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Read one frame. Returns `None` when the peer closed the stream cleanly
/// before a new frame started.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; LENGTH_PREFIX];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::transport(format!("failed to read frame length: {}", e))),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::transport(format!("frame too large: {} > {}", len, MAX_FRAME_SIZE)));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::transport(format!("failed to read frame body: {}", e)))?;

    Ok(Some(Bytes::from(buf)))
}

/// Serialize an event into the opaque payload handed to the transport.
pub fn encode_event(event: &SuspensionEvent) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(event)?))
}

/// Decode a payload read by [`read_frame`].
pub fn decode_event(payload: &[u8]) -> Result<SuspensionEvent> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::types::{Infraction, PERMANENT};

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(b"first").unwrap());
        wire.extend_from_slice(&encode_frame(b"").unwrap());
        wire.extend_from_slice(&encode_frame(b"third").unwrap());

        let mut reader = wire.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), Bytes::from_static(b"first"));
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), Bytes::new());
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), Bytes::from_static(b"third"));
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let frame = encode_frame(b"truncated").unwrap();
        let mut reader = &frame[..frame.len() - 2];
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let wire = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        let mut reader = &wire[..];
        assert!(read_frame(&mut reader).await.is_err());
        assert!(encode_frame(&vec![0u8; MAX_FRAME_SIZE + 1]).is_err());
    }

    #[test]
    fn test_event_payload() {
        let event = SuspensionEvent::from_infraction(
            Infraction::new(4, "hpotter", 1000).with_expiration(Some(PERMANENT)),
        );
        let decoded = decode_event(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert!(decode_event(b"not json").is_err());
    }
}
