//! Transparent decoding of compressed response bodies.

use crate::utils::errors::{Result, UpdateError};
use async_compression::tokio::bufread::{GzipDecoder, ZlibDecoder, ZstdDecoder};
use reqwest::header::HeaderValue;
use std::pin::Pin;
use tokio::io::{AsyncBufRead, AsyncRead};

/// Value sent in `Accept-Encoding` for file bodies.
pub const ACCEPTED_ENCODINGS: &str = "gzip, deflate, zstd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Zstd,
}

impl ContentEncoding {
    /// Interpret a `Content-Encoding` header; absence means identity.
    pub fn from_header(value: Option<&HeaderValue>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(ContentEncoding::Identity);
        };
        let raw = value
            .to_str()
            .map_err(|_| UpdateError::Transport("unreadable Content-Encoding".into()))?;

        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(ContentEncoding::Identity),
            "gzip" | "x-gzip" => Ok(ContentEncoding::Gzip),
            "deflate" => Ok(ContentEncoding::Deflate),
            "zstd" => Ok(ContentEncoding::Zstd),
            other => Err(UpdateError::Transport(format!(
                "unsupported Content-Encoding {other:?}"
            ))),
        }
    }

    /// Wrap `body` so reads yield the decoded bytes.
    pub fn decoder<R>(self, body: R) -> Pin<Box<dyn AsyncRead + Send>>
    where
        R: AsyncBufRead + Send + 'static,
    {
        match self {
            ContentEncoding::Identity => Box::pin(body),
            ContentEncoding::Gzip => Box::pin(GzipDecoder::new(body)),
            // HTTP "deflate" is the zlib container
            ContentEncoding::Deflate => Box::pin(ZlibDecoder::new(body)),
            ContentEncoding::Zstd => Box::pin(ZstdDecoder::new(body)),
        }
    }
}
