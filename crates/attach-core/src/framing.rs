//! Length-prefixed frame codec.
//!
//! Each frame is a 4-byte big-endian length prefix followed by exactly
//! that many payload bytes. Payloads are opaque: text commands, text
//! responses, and serialized property bundles all travel through the same
//! codec, byte-for-byte, including embedded NUL bytes.
//!
//! A clean close by the peer before any byte of a new frame is the normal
//! "controller disconnected" signal and is reported as `Ok(None)`; an end
//! of stream anywhere inside a frame is a protocol violation and is
//! reported as [`ProtocolError::Truncated`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};

/// Write one frame and flush it.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds
/// [`MAX_FRAME_SIZE`], or [`ProtocolError::Io`] on transport failure.
pub async fn send_frame<W>(writer: &mut W, payload: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::frame_too_large(payload.len()));
    }
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_FRAME_SIZE above
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(Some(payload))` for a complete frame and `Ok(None)` when
/// the peer closed the connection cleanly before any byte of a new frame
/// arrived.
///
/// # Errors
///
/// - [`ProtocolError::FrameTooLarge`] when the length prefix announces
///   more than [`MAX_FRAME_SIZE`] bytes. The announced payload is drained
///   first so the stream stays synchronized; the caller may answer with an
///   error response and keep reading.
/// - [`ProtocolError::Truncated`] when the stream ends inside the length
///   prefix or the payload.
/// - [`ProtocolError::Io`] on transport failure.
pub async fn receive_frame<R>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0_u8; 4];

    // The first byte decides between a clean close and a truncation.
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut prefix[1..])
        .await
        .map_err(|e| eof_as_truncated(e, "length prefix"))?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        drain(reader, len).await?;
        return Err(ProtocolError::frame_too_large(len));
    }

    let mut payload = vec![0_u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| eof_as_truncated(e, "frame payload"))?;
    Ok(Some(payload))
}

/// Discard `remaining` payload bytes from the stream.
async fn drain<R>(reader: &mut R, mut remaining: usize) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut sink = [0_u8; 8192];
    while remaining > 0 {
        let chunk = remaining.min(sink.len());
        reader
            .read_exact(&mut sink[..chunk])
            .await
            .map_err(|e| eof_as_truncated(e, "oversized frame payload"))?;
        remaining -= chunk;
    }
    Ok(())
}

fn eof_as_truncated(err: std::io::Error, context: &'static str) -> ProtocolError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::truncated(context)
    } else {
        ProtocolError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Round-trip a payload through an in-memory duplex stream.
    async fn round_trip(payload: &[u8]) -> Vec<u8> {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        send_frame(&mut client, payload).await.unwrap();
        receive_frame(&mut server).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_text() {
        assert_eq!(round_trip(b"ATTACH_ACK").await, b"ATTACH_ACK");
    }

    #[tokio::test]
    async fn test_round_trip_empty_payload() {
        assert_eq!(round_trip(b"").await, b"");
    }

    #[tokio::test]
    async fn test_round_trip_binary_safe() {
        let payload = b"ATTACH_START_MANAGEMENT_AGENT\0key=value\n\0\xff\x00tail";
        assert_eq!(round_trip(payload).await, payload);
    }

    #[tokio::test]
    async fn test_clean_close_is_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(receive_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let err = receive_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&8_u32.to_be_bytes()).await.unwrap();
        client.write_all(b"half").await.unwrap();
        drop(client);

        let err = receive_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[tokio::test]
    async fn test_oversized_frame_drained_and_recoverable() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        #[allow(clippy::cast_possible_truncation)]
        let oversized = (MAX_FRAME_SIZE + 1) as u32;
        let writer = tokio::spawn(async move {
            client.write_all(&oversized.to_be_bytes()).await.unwrap();
            client
                .write_all(&vec![0_u8; MAX_FRAME_SIZE + 1])
                .await
                .unwrap();
            send_frame(&mut client, b"next").await.unwrap();
        });

        let err = receive_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
        assert!(!err.is_fatal());

        // The oversized payload was drained; the stream is still in sync.
        assert_eq!(receive_frame(&mut server).await.unwrap().unwrap(), b"next");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_payload() {
        let (mut client, _server) = tokio::io::duplex(64);
        let payload = vec![0_u8; MAX_FRAME_SIZE + 1];
        let err = send_frame(&mut client, &payload).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_sequential_frames() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        for i in 0..5_u8 {
            send_frame(&mut client, &[i; 3]).await.unwrap();
        }
        for i in 0..5_u8 {
            assert_eq!(receive_frame(&mut server).await.unwrap().unwrap(), [i; 3]);
        }
    }
}
