//! Retrieval and authentication of the feed documents.
//!
//! Mirrors are tried strictly in priority order. For each mirror the two
//! documents and their signatures are requested concurrently; any failure,
//! bad signature or malformed entry abandons that mirror as a whole. The
//! first mirror that passes every check wins and later mirrors are never
//! contacted.

use super::mirror::{FeedKind, Mirror};
use super::{FeedDocuments, FetchedFeed, Manifest};
use crate::utils::errors::{MirrorFailure, Result, UpdateError};
use crate::verify::FeedVerifier;
use bytes::Bytes;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct FeedFetcher {
    client: Client,
    verifier: FeedVerifier,
    request_timeout: Duration,
}

impl FeedFetcher {
    pub fn new(client: Client, verifier: FeedVerifier, request_timeout: Duration) -> Self {
        Self {
            client,
            verifier,
            request_timeout,
        }
    }

    /// Fetch and verify the manifest from the first mirror that can supply it.
    ///
    /// Fails with [`UpdateError::FeedExhausted`] carrying one cause per mirror.
    pub async fn fetch(&self, mirrors: &[Mirror], channel: &str) -> Result<FetchedFeed> {
        let mut causes = Vec::with_capacity(mirrors.len());

        for mirror in mirrors {
            match self.fetch_from(mirror, channel).await {
                Ok(feed) => {
                    info!(
                        "Feed accepted from {} ({} entries, min revision {:?})",
                        mirror,
                        feed.manifest.entries().len(),
                        feed.manifest.min_revision()
                    );
                    return Ok(feed);
                }
                Err(e) => {
                    warn!("Abandoning mirror {} for feed: {}", mirror, e);
                    causes.push(MirrorFailure {
                        mirror: mirror.to_string(),
                        error: e,
                    });
                }
            }
        }

        Err(UpdateError::FeedExhausted { causes })
    }

    async fn fetch_from(&self, mirror: &Mirror, channel: &str) -> Result<FetchedFeed> {
        debug!("Requesting feeds from {}", mirror);

        let (main_feed, main_signature, update_feed, update_signature) = tokio::try_join!(
            self.get(mirror.feed_url(channel, FeedKind::Main)),
            self.get(mirror.signature_url(channel, FeedKind::Main)),
            self.get(mirror.feed_url(channel, FeedKind::Update)),
            self.get(mirror.signature_url(channel, FeedKind::Update)),
        )?;

        if !self.verifier.verify(&main_feed, &main_signature) {
            return Err(UpdateError::Authenticity("main feed".into()));
        }
        if !self.verifier.verify(&update_feed, &update_signature) {
            return Err(UpdateError::Authenticity("update feed".into()));
        }

        let manifest = Manifest::from_feeds(&main_feed, &update_feed)?;

        Ok(FetchedFeed {
            mirror: mirror.to_string(),
            manifest,
            documents: FeedDocuments {
                main_feed,
                main_signature,
                update_feed,
                update_signature,
            },
        })
    }

    async fn get(&self, url: Url) -> Result<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Transport(format!("HTTP {status} from {url}")));
        }

        Ok(response.bytes().await?)
    }
}
