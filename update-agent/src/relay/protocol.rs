//! Wire format of the local feed relay.
//!
//! ```text
//! request:  [command: u8]
//! response: [status: u8] [length: u32 BE] [payload]   (status = ok)
//!           [status: u8]                              (status = error | not-found)
//! ```

use crate::feed::FeedDocuments;
use crate::utils::errors::{Result, UpdateError};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound a client accepts for a single payload.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    MainFeed = 0x01,
    UpdateFeed = 0x02,
    MainSignature = 0x03,
    UpdateSignature = 0x04,
    Close = 0x0F,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::MainFeed),
            0x02 => Some(Command::UpdateFeed),
            0x03 => Some(Command::MainSignature),
            0x04 => Some(Command::UpdateSignature),
            0x0F => Some(Command::Close),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// The document this command asks for; `None` for [`Command::Close`].
    pub fn select(self, documents: &FeedDocuments) -> Option<&Bytes> {
        match self {
            Command::MainFeed => Some(&documents.main_feed),
            Command::UpdateFeed => Some(&documents.update_feed),
            Command::MainSignature => Some(&documents.main_signature),
            Command::UpdateSignature => Some(&documents.update_signature),
            Command::Close => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Error = 0x01,
    NotFound = 0x02,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::Error),
            0x02 => Some(Status::NotFound),
            _ => None,
        }
    }
}

/// Answer a document request. Empty documents are reported as not found.
pub async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return write_status(writer, Status::NotFound).await;
    }
    let Ok(len) = u32::try_from(payload.len()) else {
        return write_status(writer, Status::Error).await;
    };

    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(Status::Ok as u8);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await
}

pub async fn write_status<W>(writer: &mut W, status: Status) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[status as u8]).await?;
    writer.flush().await
}

/// Read one response. `Ok(None)` means the server had nothing for the command.
pub async fn read_response<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let status = reader.read_u8().await?;
    match Status::from_byte(status) {
        Some(Status::Ok) => {}
        Some(Status::NotFound) => return Ok(None),
        Some(Status::Error) => return Err(UpdateError::Relay("server rejected the command".into())),
        None => return Err(UpdateError::Relay(format!("unknown status byte {status:#04x}"))),
    }

    let len = reader.read_u32().await?;
    if len > MAX_PAYLOAD_LEN {
        return Err(UpdateError::Relay(format!("payload of {len} bytes exceeds limit")));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        for byte in [0x01, 0x02, 0x03, 0x04, 0x0F] {
            assert_eq!(Command::from_byte(byte).unwrap().as_byte(), byte);
        }
        assert_eq!(Command::from_byte(0x00), None);
        assert_eq!(Command::from_byte(0x05), None);
    }

    #[tokio::test]
    async fn test_ok_frame_layout() {
        let mut buf = Vec::new();
        write_payload(&mut buf, b"abc").await.unwrap();
        assert_eq!(buf, vec![0x00, 0, 0, 0, 3, b'a', b'b', b'c']);

        let decoded = read_response(&mut &buf[..]).await.unwrap();
        assert_eq!(decoded.as_deref(), Some(&b"abc"[..]));
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_found() {
        let mut buf = Vec::new();
        write_payload(&mut buf, b"").await.unwrap();
        assert_eq!(buf, vec![0x02]);
        assert!(read_response(&mut &buf[..]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_status() {
        let mut buf = Vec::new();
        write_status(&mut buf, Status::Error).await.unwrap();
        assert_eq!(buf, vec![0x01]);
        assert!(matches!(
            read_response(&mut &buf[..]).await,
            Err(UpdateError::Relay(_))
        ));
    }
}
