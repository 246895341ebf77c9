use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{AgentMessage, ProtoError, Result};

pub const MAX_FRAME_LEN: usize = 1024 * 1024; // 1 MiB for now

/// Reads one frame.
///
/// Returns `Ok(None)` if the stream is already at end of file, which is how
/// a client ends the session. End of file anywhere inside a frame is an
/// error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<AgentMessage>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut header = [0u8; 4];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[first..]).await.map_err(eof)?;

    let len = check_len(u32::from_be_bytes(header) as usize)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof)?;
    decode_body(Bytes::from(body)).map(Some)
}

pub async fn write_frame<W>(writer: &mut W, message: &AgentMessage) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    let frame = encode_frame(message);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Encodes `length | type | contents`.
pub fn encode_frame(message: &AgentMessage) -> Bytes {
    let body_len = message.body_len();
    let mut buf = BytesMut::with_capacity(4 + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u8(message.message_type());
    if let Some(contents) = message.contents() {
        buf.put_slice(contents);
    }
    buf.freeze()
}

/// Decodes a complete frame including its length prefix.
pub fn decode_frame(frame: &[u8]) -> Result<AgentMessage> {
    let mut buf = Bytes::copy_from_slice(frame);
    if buf.remaining() < 4 {
        return Err(ProtoError::UnexpectedEof);
    }
    let len = check_len(buf.get_u32() as usize)?;
    if buf.remaining() < len {
        return Err(ProtoError::UnexpectedEof);
    }
    if buf.remaining() > len {
        return Err(ProtoError::InvalidMessage("trailing bytes after frame"));
    }
    decode_body(buf)
}

fn decode_body(mut body: Bytes) -> Result<AgentMessage> {
    if !body.has_remaining() {
        return Err(ProtoError::InvalidMessage("missing message type"));
    }
    let message_type = body.get_u8();
    Ok(AgentMessage::new(message_type, Some(body)))
}

fn check_len(len: usize) -> Result<usize> {
    if len == 0 {
        return Err(ProtoError::InvalidMessage("zero-length frame"));
    }
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }
    Ok(len)
}

fn eof(err: std::io::Error) -> ProtoError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtoError::UnexpectedEof
    } else {
        ProtoError::Io(err)
    }
}

pub(crate) fn read_string<B: Buf>(buf: &mut B) -> Result<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(ProtoError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }
    if buf.remaining() < len {
        return Err(ProtoError::UnexpectedEof);
    }
    let data = buf.copy_to_bytes(len).to_vec();
    Ok(data)
}

pub(crate) fn write_string(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}
