//! Tag framing for multiplexed sessions
//!
//! A tag frame is a 4-byte little-endian `i32` length followed by the
//! UTF-8 bytes of the tag. A multiplexing session sends exactly one tag
//! frame before any payload byte; the dispatcher consumes it fully
//! before switching to raw forwarding.
//!
//! The heartbeat exchange is deliberately asymmetric: the probe is a
//! regular tag frame carrying [`crate::HEARTBEAT_TAG`], while the
//! response is the raw 4 bytes [`crate::HEARTBEAT_REPLY`] with no
//! length prefix. Existing peers depend on this, so both sides must
//! keep it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_TAG_LEN;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("declared tag length {0} is out of range")]
    InvalidLength(i32),

    #[error("tag is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("connection closed mid-frame")]
    UnexpectedEof,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a tag into a length-prefixed frame.
pub fn encode_tag(tag: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + tag.len());
    buf.put_i32_le(tag.len() as i32);
    buf.put_slice(tag.as_bytes());
    buf.freeze()
}

/// Decode a complete tag frame.
pub fn decode_tag(mut buf: Bytes) -> Result<String, FrameError> {
    if buf.len() < 4 {
        return Err(FrameError::UnexpectedEof);
    }

    let length = buf.get_i32_le();
    if length < 0 || length as usize > MAX_TAG_LEN {
        return Err(FrameError::InvalidLength(length));
    }

    if buf.remaining() < length as usize {
        return Err(FrameError::UnexpectedEof);
    }

    let tag = buf.split_to(length as usize);
    Ok(String::from_utf8(tag.to_vec())?)
}

/// Write a tag frame and flush it.
pub async fn write_tag<W>(writer: &mut W, tag: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_tag(tag)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one tag frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly
/// before sending a frame. EOF in the middle of a frame, a declared
/// length outside `0..=MAX_TAG_LEN`, and invalid UTF-8 are all errors:
/// the length prefix comes off the wire and is never trusted blindly.
pub async fn read_tag<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let n = reader.read(&mut len_buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < 4 {
        reader
            .read_exact(&mut len_buf[n..])
            .await
            .map_err(map_eof)?;
    }

    let length = i32::from_le_bytes(len_buf);
    if length < 0 || length as usize > MAX_TAG_LEN {
        return Err(FrameError::InvalidLength(length));
    }

    let mut tag_buf = vec![0u8; length as usize];
    reader.read_exact(&mut tag_buf).await.map_err(map_eof)?;

    Ok(Some(String::from_utf8(tag_buf)?))
}

fn map_eof(err: std::io::Error) -> FrameError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::UnexpectedEof
    } else {
        FrameError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_empty() {
        let encoded = encode_tag("");
        assert_eq!(decode_tag(encoded).unwrap(), "");
    }

    #[test]
    fn test_round_trip_single_byte() {
        let encoded = encode_tag("x");
        assert_eq!(decode_tag(encoded).unwrap(), "x");
    }

    #[test]
    fn test_round_trip_large() {
        let tag = "a".repeat(65536);
        let encoded = encode_tag(&tag);
        assert_eq!(encoded.len(), 4 + 65536);
        assert_eq!(decode_tag(encoded).unwrap(), tag);
    }

    #[test]
    fn test_round_trip_multibyte() {
        let tag = "postgres-日本語-ütf8";
        let encoded = encode_tag(tag);
        assert_eq!(decode_tag(encoded).unwrap(), tag);
    }

    #[test]
    fn test_length_prefix_is_little_endian() {
        let encoded = encode_tag("ping");
        assert_eq!(&encoded[..4], &[4, 0, 0, 0]);
        assert_eq!(&encoded[4..], b"ping");
    }

    #[test]
    fn test_decode_rejects_negative_length() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-1);
        assert!(matches!(
            decode_tag(buf.freeze()),
            Err(FrameError::InvalidLength(-1))
        ));
    }

    #[test]
    fn test_decode_rejects_oversize_length() {
        let mut buf = BytesMut::new();
        buf.put_i32_le((MAX_TAG_LEN + 1) as i32);
        assert!(matches!(
            decode_tag(buf.freeze()),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(10);
        buf.put_slice(b"abc");
        assert!(matches!(
            decode_tag(buf.freeze()),
            Err(FrameError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut a, mut b) = tokio::io::duplex(256);

        write_tag(&mut a, "svc-db").await.unwrap();
        let tag = read_tag(&mut b).await.unwrap();
        assert_eq!(tag.as_deref(), Some("svc-db"));
    }

    #[tokio::test]
    async fn test_read_clean_eof_is_none() {
        let (a, mut b) = tokio::io::duplex(256);
        drop(a);

        let tag = read_tag(&mut b).await.unwrap();
        assert!(tag.is_none());
    }

    #[tokio::test]
    async fn test_read_mid_frame_eof_is_error() {
        let (mut a, mut b) = tokio::io::duplex(256);

        a.write_all(&8i32.to_le_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        assert!(matches!(
            read_tag(&mut b).await,
            Err(FrameError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_read_rejects_negative_length() {
        let (mut a, mut b) = tokio::io::duplex(256);

        a.write_all(&(-42i32).to_le_bytes()).await.unwrap();

        assert!(matches!(
            read_tag(&mut b).await,
            Err(FrameError::InvalidLength(-42))
        ));
    }
}
