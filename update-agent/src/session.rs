//! One update (or repair) session: fetch, reconcile, download.
//!
//! Stages run strictly in order and each gates the next. All session state
//! (winning feed, mirror health, counters) lives in this object, so two
//! sessions never share anything.

use crate::config::{Config, SessionMode};
use crate::executor::{DownloadExecutor, ExecutionReport};
use crate::feed::fetcher::FeedFetcher;
use crate::feed::mirror::{http_client, parse_mirrors};
use crate::feed::FetchedFeed;
use crate::fs::cleanup::remove_stale_temporaries;
use crate::fs::{InstallRoot, Platform};
use crate::reconcile::Reconciler;
use crate::sink::{keys, ProgressSink};
use crate::utils::errors::{FailureKind, Result, UpdateError};
use crate::verify::FeedVerifier;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Everything a caller needs after a successful session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub feed: FetchedFeed,
    pub report: ExecutionReport,
    /// The running client is older than the feed's minimum revision.
    pub client_outdated: bool,
}

impl SessionOutcome {
    /// Serve the verified feed documents to the client about to launch.
    #[cfg(unix)]
    pub fn start_relay(&self, config: &Config) -> Result<crate::relay::RelayServer> {
        let socket_dir = config
            .relay
            .socket_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        crate::relay::RelayServer::start(
            self.feed.documents.clone(),
            &socket_dir,
            config.accept_timeout(),
            config.shutdown_timeout(),
        )
    }
}

pub struct UpdateSession {
    id: Uuid,
    config: Config,
    verifier: FeedVerifier,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    platform: Platform,
    client_revision: Option<i64>,
}

impl UpdateSession {
    /// Session verifying feeds against the embedded release key.
    pub fn new(config: Config, sink: Arc<dyn ProgressSink>) -> Result<Self> {
        Ok(Self::with_verifier(config, sink, FeedVerifier::embedded()?))
    }

    pub fn with_verifier(config: Config, sink: Arc<dyn ProgressSink>, verifier: FeedVerifier) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            verifier,
            sink,
            cancel: CancellationToken::new(),
            platform: Platform::current(),
            client_revision: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Revision of the installed client, checked against `min_revision`.
    pub fn with_client_revision(mut self, revision: i64) -> Self {
        self.client_revision = Some(revision);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the session on the runtime; the handle resolves with its outcome.
    pub fn spawn(self) -> JoinHandle<Result<SessionOutcome>> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> Result<SessionOutcome> {
        let span = info_span!("session", id = %self.id, mode = ?self.config.install.mode);
        let sink = Arc::clone(&self.sink);

        let result = self.run_stages().instrument(span).await;

        if let Err(e) = &result {
            if e.kind() != FailureKind::Cancelled {
                report_failure(sink.as_ref(), e);
            }
        }
        result
    }

    async fn run_stages(self) -> Result<SessionOutcome> {
        self.config.validate()?;

        let mode = self.config.install.mode;
        info!("Starting {:?} session", mode);

        let root = InstallRoot::new(&self.config.install.root);
        let root_path = root.path().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || remove_stale_temporaries(&root_path))
            .await
            .unwrap_or_else(|e| {
                warn!("Temporary cleanup task failed: {}", e);
                0
            });
        if removed > 0 {
            info!("Removed {} stale temporary file(s)", removed);
        }

        let mirrors = parse_mirrors(&self.config.feed.mirrors)?;
        let client = http_client(self.config.connect_timeout())?;
        let channel = self.config.feed.channel.clone();

        self.sink.status(stage_text(mode, Stage::Fetching), 0.0);
        let fetcher = FeedFetcher::new(
            client.clone(),
            self.verifier.clone(),
            self.config.request_timeout(),
        );
        let feed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
            feed = fetcher.fetch(&mirrors, &channel) => feed?,
        };

        let client_outdated = self
            .client_revision
            .is_some_and(|rev| feed.manifest.requires_client_update(rev));
        if client_outdated {
            warn!(
                "Client revision {:?} is below the required {:?}",
                self.client_revision,
                feed.manifest.min_revision()
            );
            self.sink.info(
                keys::CLIENT_OUTDATED,
                &[feed
                    .manifest
                    .min_revision()
                    .map(|r| r.to_string())
                    .unwrap_or_default()],
            );
        }

        self.sink.status(stage_text(mode, Stage::Checking), 0.0);
        self.sink.detail(
            keys::CHECKING_FILES,
            0.0,
            &[feed.manifest.entries().len().to_string()],
        );
        let plan = Reconciler::new(root)
            .with_platform(self.platform)
            .plan_async(feed.manifest.clone(), self.config.skip_verification())
            .await?;

        if self.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let executor = DownloadExecutor::new(
            client,
            mirrors,
            channel,
            self.config.concurrency(),
            Arc::clone(&self.sink),
        )
        .with_cancel(self.cancel.clone())
        .with_read_timeout(self.config.read_timeout());
        let report = executor.execute(plan).await?;

        info!(
            "Session complete: {} file(s) updated from feed of {}",
            report.files_completed, feed.mirror
        );

        Ok(SessionOutcome {
            session_id: self.id,
            feed,
            report,
            client_outdated,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Fetching,
    Checking,
}

fn stage_text(mode: SessionMode, stage: Stage) -> &'static str {
    match (mode, stage) {
        (SessionMode::Update, Stage::Fetching) => "Checking for updates",
        (SessionMode::Update, Stage::Checking) => "Verifying installed files",
        (SessionMode::Repair, Stage::Fetching) => "Preparing repair",
        (SessionMode::Repair, Stage::Checking) => "Checking every installed file",
    }
}

fn failure_title(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Exhausted => "Update server unavailable",
        FailureKind::FatalIo => "Cannot write to the installation",
        FailureKind::Authenticity | FailureKind::Integrity => "Update verification failed",
        _ => "Update failed",
    }
}

/// Hand a propagated error to the front end with its per-candidate causes.
fn report_failure(sink: &dyn ProgressSink, error: &UpdateError) {
    let mut message = error.to_string();
    for cause in error.causes() {
        message.push_str("\n  ");
        message.push_str(&cause);
    }
    sink.error(&message, failure_title(error.kind()), Box::new(|| {}));
}
