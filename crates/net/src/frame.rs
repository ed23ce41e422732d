//! Reading and writing frames over a byte stream.
//!
//! The transport may split a frame across any number of reads, so the
//! reader accumulates until the declared length is collected and only then
//! deserializes.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use systek_protocol::codec::{decode_payload, encode_frame, parse_header};
use systek_protocol::constants::HEADER_SIZE;
use systek_protocol::WireMessage;

use crate::error::NetError;

/// Reads one frame.
///
/// Waits without a deadline for the first header byte. Returns `Ok(None)`
/// if the stream ends there, between frames. Every later read for the same
/// frame is bounded by `stall_timeout`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    stall_timeout: Duration,
) -> Result<Option<WireMessage>, NetError> {
    let mut header = [0u8; HEADER_SIZE];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    read_exact_bounded(reader, &mut header[1..], stall_timeout).await?;

    let len = parse_header(header)?;
    let mut payload = vec![0u8; len];
    read_exact_bounded(reader, &mut payload, stall_timeout).await?;

    Ok(Some(decode_payload(&payload)?))
}

async fn read_exact_bounded<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    stall_timeout: Duration,
) -> Result<(), NetError> {
    let mut filled = 0;
    while filled < buf.len() {
        match tokio::time::timeout(stall_timeout, reader.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => return Err(NetError::UnexpectedEof),
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(NetError::Io(e)),
            Err(_) => return Err(NetError::Stalled),
        }
    }
    Ok(())
}

/// Encodes and writes one frame, then flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &WireMessage,
) -> Result<(), NetError> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use systek_protocol::{AreaType, CodecError, LogLevel, MessageType};

    const STALL: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn reads_frame_split_across_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let msg = WireMessage::log(LogLevel::Info, AreaType::UnitTest, "a".repeat(300));
        let frame = encode_frame(&msg).unwrap();

        let writer = tokio::spawn(async move {
            for chunk in frame.chunks(7) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });

        let read = read_frame(&mut server, STALL).await.unwrap();
        assert_eq!(read, Some(msg));
        drop(writer.await.unwrap());
        assert!(read_frame(&mut server, STALL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn back_to_back_frames() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, &WireMessage::ack()).await.unwrap();
        write_frame(&mut client, &WireMessage::close()).await.unwrap();
        drop(client);

        let first = read_frame(&mut server, STALL).await.unwrap().unwrap();
        let second = read_frame(&mut server, STALL).await.unwrap().unwrap();
        assert_eq!(first.msg_type, MessageType::Ack);
        assert_eq!(second.msg_type, MessageType::Close);
        assert!(read_frame(&mut server, STALL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let frame = encode_frame(&WireMessage::ack()).unwrap();
        client.write_all(&frame[..frame.len() - 3]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, STALL).await.unwrap_err();
        assert!(matches!(err, NetError::UnexpectedEof));
    }

    #[tokio::test]
    async fn eof_inside_header_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(16);
        client.write_all(&[5, 0]).await.unwrap();
        drop(client);
        assert!(matches!(
            read_frame(&mut server, STALL).await,
            Err(NetError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn oversized_header_is_rejected_before_payload() {
        let (mut client, mut server) = tokio::io::duplex(16);
        client.write_all(&70_000i32.to_le_bytes()).await.unwrap();

        let err = read_frame(&mut server, STALL).await.unwrap_err();
        assert!(matches!(
            err,
            NetError::Codec(CodecError::FrameTooLarge { size: 70_000, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_times_out_mid_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[40, 0, 0, 0, b'{']).await.unwrap();

        let err = read_frame(&mut server, STALL).await.unwrap_err();
        assert!(matches!(err, NetError::Stalled));
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_has_no_deadline() {
        let (_client, mut server) = tokio::io::duplex(64);
        let waited = tokio::time::timeout(STALL * 10, read_frame(&mut server, STALL)).await;
        assert!(waited.is_err(), "idle read must still be pending");
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let payload = b"{\"v\":1,\"type\":\"BOGUS\"}";
        client
            .write_all(&(payload.len() as i32).to_le_bytes())
            .await
            .unwrap();
        client.write_all(payload).await.unwrap();

        assert!(matches!(
            read_frame(&mut server, STALL).await,
            Err(NetError::Codec(CodecError::Json(_)))
        ));
    }
}
