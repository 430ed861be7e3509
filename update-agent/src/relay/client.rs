//! Consuming side of the feed relay, used by the launched client.

use super::protocol::{self, Command};
use crate::feed::FeedDocuments;
use crate::utils::errors::{Result, UpdateError};
use bytes::Bytes;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

pub struct RelayClient {
    stream: UnixStream,
}

impl RelayClient {
    /// Connect using the channel id handed over by the parent process.
    pub async fn connect(channel_id: impl AsRef<Path>) -> Result<Self> {
        let path = channel_id.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            UpdateError::Relay(format!("cannot connect to {}: {e}", path.display()))
        })?;
        debug!("Connected to feed relay at {}", path.display());
        Ok(Self { stream })
    }

    /// Request one document. `None` if the relay holds nothing for it.
    pub async fn fetch(&mut self, command: Command) -> Result<Option<Bytes>> {
        if command == Command::Close {
            return Err(UpdateError::Relay("close is not a document request".into()));
        }
        self.fetch_raw(command.as_byte()).await
    }

    pub(crate) async fn fetch_raw(&mut self, command: u8) -> Result<Option<Bytes>> {
        self.stream.write_all(&[command]).await?;
        protocol::read_response(&mut self.stream).await
    }

    /// Fetch all four documents; missing ones come back empty.
    pub async fn fetch_documents(&mut self) -> Result<FeedDocuments> {
        let main_feed = self.fetch(Command::MainFeed).await?.unwrap_or_default();
        let update_feed = self.fetch(Command::UpdateFeed).await?.unwrap_or_default();
        let main_signature = self.fetch(Command::MainSignature).await?.unwrap_or_default();
        let update_signature = self.fetch(Command::UpdateSignature).await?.unwrap_or_default();

        Ok(FeedDocuments {
            main_feed,
            main_signature,
            update_feed,
            update_signature,
        })
    }

    /// Tell the relay we are done; it shuts down and removes its socket.
    pub async fn close(mut self) -> Result<()> {
        self.stream.write_all(&[Command::Close.as_byte()]).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
