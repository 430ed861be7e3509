//! Progress reporting towards whatever front end drives the session.
//!
//! The core never renders anything itself. It reports through a
//! [`ProgressSink`]; keys are stable identifiers a front end localises.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Maximum number of queued events per subscriber
const BROADCAST_CAPACITY: usize = 256;

/// Message keys passed to [`ProgressSink::detail`] and [`ProgressSink::info`].
pub mod keys {
    pub const CHECKING_FILES: &str = "reconcile.checking";
    pub const DOWNLOADING_FILE: &str = "download.file";
    pub const FILE_DONE: &str = "download.file_done";
    pub const FILE_FAILED: &str = "download.file_failed";
    pub const MIRROR_DISABLED: &str = "download.mirror_disabled";
    pub const CLIENT_OUTDATED: &str = "feed.client_outdated";
}

/// Called once the user dismissed an error.
pub type Acknowledge = Box<dyn FnOnce() + Send>;

pub trait ProgressSink: Send + Sync {
    /// Overall stage text with percentage.
    fn status(&self, text: &str, percent: f64);

    /// Per-item progress line.
    fn detail(&self, key: &str, percent: f64, args: &[String]);

    /// Informational notice.
    fn info(&self, key: &str, args: &[String]);

    /// Error to present; `on_acknowledge` runs once it has been dismissed.
    fn error(&self, message: &str, title: &str, on_acknowledge: Acknowledge);

    /// Current throughput, already formatted.
    fn speed(&self, text: &str);
}

/// Sink that only writes to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn status(&self, text: &str, percent: f64) {
        info!("{} ({:.0}%)", text, percent);
    }

    fn detail(&self, key: &str, percent: f64, args: &[String]) {
        debug!("{} {:?} ({:.0}%)", key, args, percent);
    }

    fn info(&self, key: &str, args: &[String]) {
        info!("{} {:?}", key, args);
    }

    fn error(&self, message: &str, title: &str, on_acknowledge: Acknowledge) {
        error!("{}: {}", title, message);
        on_acknowledge();
    }

    fn speed(&self, text: &str) {
        debug!("Throughput {}", text);
    }
}

/// Event published by [`BroadcastSink`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ProgressEvent {
    #[serde(rename = "progress:status")]
    Status {
        text: String,
        percent: f64,
        at: DateTime<Utc>,
    },

    #[serde(rename = "progress:detail")]
    Detail {
        key: String,
        percent: f64,
        args: Vec<String>,
        at: DateTime<Utc>,
    },

    #[serde(rename = "progress:info")]
    Info {
        key: String,
        args: Vec<String>,
        at: DateTime<Utc>,
    },

    #[serde(rename = "progress:error")]
    Error {
        message: String,
        title: String,
        at: DateTime<Utc>,
    },

    #[serde(rename = "progress:speed")]
    Speed { text: String, at: DateTime<Utc> },
}

/// Sink that fans events out to any number of subscribers (e.g. a UI bridge).
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
    pending_ack: Mutex<Option<Acknowledge>>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            pending_ack: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Run the acknowledgement of the last reported error, if any.
    pub fn acknowledge(&self) -> bool {
        let pending = match self.pending_ack.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match pending {
            Some(ack) => {
                ack();
                true
            }
            None => false,
        }
    }

    fn publish(&self, event: ProgressEvent) {
        // No subscribers is not an error; events are best effort.
        let _ = self.tx.send(event);
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BroadcastSink {
    fn status(&self, text: &str, percent: f64) {
        self.publish(ProgressEvent::Status {
            text: text.to_string(),
            percent,
            at: Utc::now(),
        });
    }

    fn detail(&self, key: &str, percent: f64, args: &[String]) {
        self.publish(ProgressEvent::Detail {
            key: key.to_string(),
            percent,
            args: args.to_vec(),
            at: Utc::now(),
        });
    }

    fn info(&self, key: &str, args: &[String]) {
        self.publish(ProgressEvent::Info {
            key: key.to_string(),
            args: args.to_vec(),
            at: Utc::now(),
        });
    }

    fn error(&self, message: &str, title: &str, on_acknowledge: Acknowledge) {
        match self.pending_ack.lock() {
            Ok(mut slot) => *slot = Some(on_acknowledge),
            Err(poisoned) => *poisoned.into_inner() = Some(on_acknowledge),
        }
        self.publish(ProgressEvent::Error {
            message: message.to_string(),
            title: title.to_string(),
            at: Utc::now(),
        });
    }

    fn speed(&self, text: &str) {
        self.publish(ProgressEvent::Speed {
            text: text.to_string(),
            at: Utc::now(),
        });
    }
}
