//! Wire framing: a 4-byte big-endian length, then one JSON `Message`

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Largest payload either side accepts. A full chat backlog is the biggest
/// message in practice.
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Serialize `msg` into a complete frame, header included
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
    let mut frame = vec![0u8; HEADER_LEN];
    serde_json::to_writer(&mut frame, msg).map_err(|e| Error::Protocol(format!("Cannot encode message: {}", e)))?;

    let len = frame.len() - HEADER_LEN;
    check_len(len)?;
    frame[..HEADER_LEN].copy_from_slice(&(len as u32).to_be_bytes());
    Ok(frame)
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut header = [0u8; HEADER_LEN];
    fill(reader, &mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    check_len(len)?;

    let mut payload = vec![0u8; len];
    fill(reader, &mut payload).await?;
    Message::from_bytes(&payload).map_err(|e| Error::Protocol(format!("Malformed message: {}", e)))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn check_len(len: usize) -> Result<()> {
    match len {
        0 => Err(Error::Protocol("Zero-length frame".into())),
        n if n > MAX_FRAME_LEN => Err(Error::Protocol(format!(
            "Frame of {} bytes exceeds limit of {}",
            n, MAX_FRAME_LEN
        ))),
        _ => Ok(()),
    }
}

/// Read exactly `buf.len()` bytes; a peer hanging up mid-frame is a close
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::Ping).await.unwrap();
        write_frame(&mut buf, &Message::Pong).await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor).await.unwrap(), Message::Ping));
        assert!(matches!(read_frame(&mut cursor).await.unwrap(), Message::Pong));
        assert!(matches!(read_frame(&mut cursor).await, Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_encoded_header_matches_payload() {
        let frame = encode_frame(&Message::Ping).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_close() {
        let mut frame = encode_frame(&Message::Pong).unwrap();
        frame.pop();
        let mut cursor = Cursor::new(frame);
        assert!(matches!(read_frame(&mut cursor).await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_bad_lengths_and_payloads_rejected() {
        let mut zero = Cursor::new(vec![0u8; HEADER_LEN]);
        assert!(matches!(read_frame(&mut zero).await, Err(Error::Protocol(_))));

        let huge = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut huge = Cursor::new(huge.to_vec());
        assert!(matches!(read_frame(&mut huge).await, Err(Error::Protocol(_))));

        let mut junk = 5u32.to_be_bytes().to_vec();
        junk.extend_from_slice(b"{oops");
        let mut junk = Cursor::new(junk);
        assert!(matches!(read_frame(&mut junk).await, Err(Error::Protocol(_))));
    }
}
