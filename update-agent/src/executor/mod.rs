//! Download orchestrator - brings the install tree in line with a plan.
//!
//! Each planned file is owned by one task for its whole mirror fallback
//! loop. At most `concurrency` tasks run at once. Session-wide state is:
//! - the disabled-mirror set ([`MirrorHealth`]), which only grows
//! - the byte and file counters ([`DownloadProgress`])
//!
//! A file that no mirror can deliver fails on its own; other files carry on.
//! So does a file whose temporary cannot be written locally; that failure
//! never disables a mirror. A failure to delete or rename the target is fatal
//! for the whole run. A body that goes quiet for longer than the read timeout
//! counts as a transport failure of that mirror.
//! Files are written to `<name>.TEMPORARY` in the target's directory and
//! renamed over the target, so replacement is exactly as atomic as a
//! same-directory rename on the underlying filesystem.

pub mod attempt;
pub mod health;

use crate::feed::mirror::Mirror;
use crate::fs::checksum::{checksums_match, sha256_file_async};
use crate::fs::paths::temporary_path;
use crate::reconcile::{DownloadPlan, PlannedFile};
use crate::sink::{keys, ProgressSink};
use crate::transfer::encoding::{ContentEncoding, ACCEPTED_ENCODINGS};
use crate::transfer::progress::{format_speed, DownloadProgress, ThroughputSampler};
use crate::transfer::progress_stream::{ProgressCallback, ProgressStream};
use crate::utils::errors::{FileFailure, MirrorFailure, Result, UpdateError};
use attempt::{AttemptOutcome, FileAttempt};
use futures_util::TryStreamExt;
use health::MirrorHealth;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often throughput and overall percent are recomputed.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Longest silence tolerated from a mirror mid-response.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

const COPY_BUFFER_SIZE: usize = 64 * 1024;

const STATUS_DOWNLOADING: &str = "Downloading updates";
const STATUS_COMPLETE: &str = "Installation up to date";

/// Summary of a fully successful run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub files_completed: usize,
    pub bytes_transferred: u64,
    pub disabled_mirrors: Vec<String>,
    pub duration: Duration,
}

/// How one file task ended.
enum FileResult {
    Completed,
    Failed(FileFailure),
    Cancelled,
    Fatal(UpdateError),
}

/// Why one attempt stopped before a complete temporary was on disk.
enum FetchError {
    Cancelled,
    /// The mirror or the connection misbehaved.
    Remote(UpdateError),
    /// Writing the temporary failed; the mirror is not at fault.
    Local(UpdateError),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Remote(e.into())
    }
}

fn local(e: std::io::Error) -> FetchError {
    FetchError::Local(UpdateError::Io(e))
}

/// State shared by every file task of one run.
struct RunContext {
    client: Client,
    mirrors: Arc<Vec<Mirror>>,
    channel: String,
    health: Arc<MirrorHealth>,
    progress: Arc<DownloadProgress>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    read_timeout: Duration,
}

/// Executes download plans against a prioritised mirror list.
pub struct DownloadExecutor {
    client: Client,
    mirrors: Arc<Vec<Mirror>>,
    channel: String,
    concurrency: usize,
    health: Arc<MirrorHealth>,
    sink: Arc<dyn ProgressSink>,
    cancel_token: CancellationToken,
    tick_interval: Duration,
    read_timeout: Duration,
}

impl DownloadExecutor {
    /// Create an executor; `concurrency` is clamped into 1..=4.
    pub fn new(
        client: Client,
        mirrors: Vec<Mirror>,
        channel: impl Into<String>,
        concurrency: usize,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let health = Arc::new(MirrorHealth::new(mirrors.len()));
        Self {
            client,
            mirrors: Arc::new(mirrors),
            channel: channel.into(),
            concurrency: concurrency.clamp(
                crate::config::MIN_CONCURRENCY,
                crate::config::MAX_CONCURRENCY,
            ),
            health,
            sink,
            cancel_token: CancellationToken::new(),
            tick_interval: TICK_INTERVAL,
            read_timeout: READ_TIMEOUT,
        }
    }

    /// Use an external shutdown token.
    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Give up on a mirror that sends nothing for this long.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn mirror_health(&self) -> &MirrorHealth {
        &self.health
    }

    /// Mirrors disabled so far in this session, by origin.
    pub fn disabled_mirrors(&self) -> Vec<String> {
        self.health
            .disabled_indices()
            .into_iter()
            .filter_map(|i| self.mirrors.get(i).map(ToString::to_string))
            .collect()
    }

    /// Download every planned file.
    ///
    /// Returns once all file tasks have finished. Fails with
    /// [`UpdateError::FatalIo`] if a target could not be replaced,
    /// [`UpdateError::Cancelled`] on shutdown, and
    /// [`UpdateError::DownloadsExhausted`] if any file could not be obtained.
    pub async fn execute(&self, plan: DownloadPlan) -> Result<ExecutionReport> {
        let start_time = Instant::now();

        if plan.is_empty() {
            info!("Download plan is empty, nothing to do");
            self.sink.status(STATUS_COMPLETE, 100.0);
            return Ok(self.report(0, 0, start_time));
        }

        let total_files = plan.len();
        let progress = Arc::new(DownloadProgress::new(total_files, plan.estimated_bytes()));

        info!(
            "Downloading {} file(s), ~{} bytes, concurrency {}",
            total_files,
            plan.estimated_bytes(),
            self.concurrency
        );
        self.sink.status(STATUS_DOWNLOADING, 0.0);

        // Fatal errors cancel this run only; the caller's token is left alone.
        let run_cancel = self.cancel_token.child_token();
        let context = Arc::new(RunContext {
            client: self.client.clone(),
            mirrors: Arc::clone(&self.mirrors),
            channel: self.channel.clone(),
            health: Arc::clone(&self.health),
            progress: Arc::clone(&progress),
            sink: Arc::clone(&self.sink),
            cancel: run_cancel.clone(),
            read_timeout: self.read_timeout,
        });

        let ticker_stop = CancellationToken::new();
        let ticker = spawn_ticker(
            Arc::clone(&progress),
            Arc::clone(&self.sink),
            self.tick_interval,
            ticker_stop.clone(),
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total_files);

        for file in plan.into_files() {
            let sem = Arc::clone(&semaphore);
            let context = Arc::clone(&context);
            let path = file.entry.relative_path.clone();

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = sem.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return FileResult::Cancelled,
                    },
                    _ = context.cancel.cancelled() => return FileResult::Cancelled,
                };

                let result = download_file(&context, &file).await;
                drop(permit);

                if let FileResult::Fatal(e) = &result {
                    error!("Aborting downloads: {}", e);
                    context.cancel.cancel();
                }
                result
            });

            handles.push((path, handle));
        }

        let mut fatal = None;
        let mut failures = Vec::new();
        let mut cancelled = 0usize;

        for (path, handle) in handles {
            match handle.await {
                Ok(FileResult::Completed) => {}
                Ok(FileResult::Failed(failure)) => failures.push(failure),
                Ok(FileResult::Cancelled) => cancelled += 1,
                Ok(FileResult::Fatal(e)) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    warn!("Download task for {} ended abnormally: {}", path, e);
                    progress.fail_file();
                    failures.push(FileFailure {
                        path,
                        causes: vec![MirrorFailure {
                            mirror: "-".to_string(),
                            error: UpdateError::Transport(format!("worker failed: {e}")),
                        }],
                    });
                }
            }
        }

        ticker_stop.cancel();
        let _ = ticker.await;

        let files_completed = progress.files_completed();
        let bytes_transferred = progress.transferred_bytes();

        if let Some(e) = fatal {
            return Err(e);
        }
        if cancelled > 0 && self.cancel_token.is_cancelled() {
            info!(
                "Downloads cancelled: {} of {} files completed",
                files_completed, total_files
            );
            return Err(UpdateError::Cancelled);
        }
        if !failures.is_empty() {
            warn!(
                "{} of {} files could not be downloaded",
                failures.len(),
                total_files
            );
            return Err(UpdateError::DownloadsExhausted { failures });
        }

        self.sink.speed(&format_speed(0));
        self.sink.status(STATUS_COMPLETE, 100.0);
        info!(
            "Downloads complete: {} files, {} bytes in {}s",
            files_completed,
            bytes_transferred,
            start_time.elapsed().as_secs()
        );

        Ok(self.report(files_completed, bytes_transferred, start_time))
    }

    fn report(&self, files_completed: usize, bytes_transferred: u64, start: Instant) -> ExecutionReport {
        ExecutionReport {
            files_completed,
            bytes_transferred,
            disabled_mirrors: self.disabled_mirrors(),
            duration: start.elapsed(),
        }
    }
}

/// Periodically publish throughput and percent until `stop` fires.
fn spawn_ticker(
    progress: Arc<DownloadProgress>,
    sink: Arc<dyn ProgressSink>,
    period: Duration,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        let mut sampler = ThroughputSampler::new(progress.transferred_bytes());

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop.cancelled() => break,
            }

            let bytes_per_second = sampler.sample(progress.transferred_bytes());
            sink.speed(&format_speed(bytes_per_second));
            sink.status(STATUS_DOWNLOADING, progress.percent());
        }
    })
}

/// Walk the mirror list for one file until it is installed or exhausted.
async fn download_file(ctx: &RunContext, file: &PlannedFile) -> FileResult {
    let path = &file.entry.relative_path;
    let mirror_name = |i: usize| {
        ctx.mirrors
            .get(i)
            .map(ToString::to_string)
            .unwrap_or_default()
    };
    let mut attempt = FileAttempt::new(ctx.mirrors.len());

    ctx.sink
        .detail(keys::DOWNLOADING_FILE, ctx.progress.percent(), &[path.clone()]);

    while let Some(index) = attempt.next_candidate(&ctx.health, mirror_name) {
        if ctx.cancel.is_cancelled() {
            return FileResult::Cancelled;
        }

        let mirror = &ctx.mirrors[index];
        let temp = temporary_path(&file.target);
        let mut written = 0u64;

        let outcome = match fetch_to_temp(ctx, mirror, file, &temp, &mut written).await {
            Ok(()) => verify_temp(&file.entry.checksum, &temp).await,
            Err(FetchError::Cancelled) => {
                ctx.progress.rollback_written(written);
                discard(&temp).await;
                return FileResult::Cancelled;
            }
            Err(FetchError::Remote(e)) => AttemptOutcome::Transport(e),
            Err(FetchError::Local(e)) => AttemptOutcome::Local(e),
        };

        match outcome {
            AttemptOutcome::Verified => {
                if let Err(e) = replace_target(&temp, &file.target).await {
                    discard(&temp).await;
                    return FileResult::Fatal(e);
                }

                attempt.record(mirror.to_string(), AttemptOutcome::Verified);
                ctx.progress.complete_file();
                ctx.sink
                    .detail(keys::FILE_DONE, ctx.progress.percent(), &[path.clone()]);
                debug!("Installed {} from {}", path, mirror);
                return FileResult::Completed;
            }
            failed => {
                discard(&temp).await;
                ctx.progress.rollback_written(written);
                if failed.blames_mirror() {
                    warn!("Mirror {} failed for {}: {:?}", mirror, path, failed);
                    if ctx.health.disable(index) {
                        ctx.sink
                            .info(keys::MIRROR_DISABLED, &[mirror.to_string()]);
                    }
                } else {
                    warn!("Cannot write {}: {:?}", temp.display(), failed);
                }
                attempt.record(mirror.to_string(), failed);
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        return FileResult::Cancelled;
    }

    ctx.progress.fail_file();
    ctx.sink.info(keys::FILE_FAILED, &[path.clone()]);
    FileResult::Failed(FileFailure {
        path: path.clone(),
        causes: attempt.into_causes(),
    })
}

/// Stream one file body from `mirror` into `temp`, decoding as needed.
///
/// Decoded bytes counted towards progress are added to `written` so the
/// caller can take them back if the attempt is thrown away.
async fn fetch_to_temp(
    ctx: &RunContext,
    mirror: &Mirror,
    file: &PlannedFile,
    temp: &Path,
    written: &mut u64,
) -> std::result::Result<(), FetchError> {
    let url = mirror.file_url(&ctx.channel, &file.entry);

    if let Some(parent) = temp.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(local)?;
    }

    let request = ctx
        .client
        .get(url.clone())
        .header(ACCEPT_ENCODING, ACCEPTED_ENCODINGS)
        .send();

    let response = tokio::select! {
        response = tokio::time::timeout(ctx.read_timeout, request) => match response {
            Ok(response) => response?,
            Err(_) => return Err(stalled(&url, ctx.read_timeout)),
        },
        _ = ctx.cancel.cancelled() => return Err(FetchError::Cancelled),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Remote(UpdateError::Transport(format!(
            "HTTP {status} from {url}"
        ))));
    }

    let encoding = ContentEncoding::from_header(response.headers().get(CONTENT_ENCODING))
        .map_err(FetchError::Remote)?;

    let progress = Arc::clone(&ctx.progress);
    let callback: ProgressCallback = Arc::new(move |bytes| progress.add_bytes(bytes));
    let body = ProgressStream::new(Box::pin(response.bytes_stream()), callback)
        .map_err(|e| std::io::Error::other(e));
    let mut reader = encoding.decoder(StreamReader::new(body));

    let counts_towards_estimate = file.entry.estimated_size().is_some();
    let mut out = tokio::fs::File::create(temp).await.map_err(local)?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut decoded = 0u64;

    loop {
        let read = tokio::select! {
            read = tokio::time::timeout(ctx.read_timeout, reader.read(&mut buf)) => read,
            _ = ctx.cancel.cancelled() => return Err(FetchError::Cancelled),
        };
        let n = match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                return Err(FetchError::Remote(UpdateError::Transport(format!(
                    "reading {url}: {e}"
                ))))
            }
            Err(_) => return Err(stalled(&url, ctx.read_timeout)),
        };

        out.write_all(&buf[..n]).await.map_err(local)?;
        decoded += n as u64;
        if counts_towards_estimate {
            ctx.progress.add_written(n as u64);
            *written += n as u64;
        }
    }
    out.flush().await.map_err(local)?;
    out.sync_all().await.map_err(local)?;

    debug!("Fetched {} ({} bytes decoded)", url, decoded);
    Ok(())
}

fn stalled(url: &reqwest::Url, timeout: Duration) -> FetchError {
    FetchError::Remote(UpdateError::Transport(format!(
        "no data from {url} for {}ms",
        timeout.as_millis()
    )))
}

async fn verify_temp(expected: &str, temp: &Path) -> AttemptOutcome {
    match sha256_file_async(temp.to_path_buf()).await {
        Ok(actual) if checksums_match(expected, &actual) => AttemptOutcome::Verified,
        Ok(actual) => AttemptOutcome::ChecksumMismatch(UpdateError::Integrity {
            expected: expected.to_string(),
            actual,
        }),
        Err(e) => AttemptOutcome::Local(UpdateError::Io(e)),
    }
}

/// Delete the old target, then move the verified temporary onto it.
async fn replace_target(temp: &Path, target: &Path) -> Result<()> {
    match tokio::fs::remove_file(target).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(UpdateError::FatalIo {
                path: target.to_path_buf(),
                source,
            })
        }
    }

    tokio::fs::rename(temp, target)
        .await
        .map_err(|source| UpdateError::FatalIo {
            path: target.to_path_buf(),
            source,
        })
}

async fn discard(temp: &Path) {
    if let Err(e) = tokio::fs::remove_file(temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", temp.display(), e);
        }
    }
}
