//! Per-file mirror fallback as an explicit state machine.
//!
//! ```text
//! Trying(i) --transport failure--> Trying(next enabled > i) | Exhausted
//! Trying(i) --checksum mismatch--> Trying(next enabled > i) | Exhausted
//! Trying(i) --verified-----------> Done
//! Trying(i) --local I/O failure--> Exhausted
//! ```
//!
//! Mirrors disabled by other workers are skipped without being contacted.
//! A local failure says nothing about the mirror, so no other mirror is tried.

use super::health::MirrorHealth;
use crate::utils::errors::{MirrorFailure, UpdateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Trying(usize),
    Done,
    Exhausted,
}

/// Result of one download attempt against one mirror.
#[derive(Debug)]
pub enum AttemptOutcome {
    Transport(UpdateError),
    ChecksumMismatch(UpdateError),
    /// The temporary file could not be written or read back.
    Local(UpdateError),
    Verified,
}

impl AttemptOutcome {
    /// Whether the outcome counts against the mirror.
    pub fn blames_mirror(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ChecksumMismatch(_))
    }
}

#[derive(Debug)]
pub struct FileAttempt {
    state: AttemptState,
    mirror_count: usize,
    causes: Vec<MirrorFailure>,
}

impl FileAttempt {
    pub fn new(mirror_count: usize) -> Self {
        Self {
            state: AttemptState::Trying(0),
            mirror_count,
            causes: Vec::new(),
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Settle on the next mirror to contact, skipping disabled ones.
    ///
    /// `mirror_name` labels skipped mirrors in the cause list.
    pub fn next_candidate(
        &mut self,
        health: &MirrorHealth,
        mirror_name: impl Fn(usize) -> String,
    ) -> Option<usize> {
        let AttemptState::Trying(mut index) = self.state else {
            return None;
        };

        while index < self.mirror_count && health.is_disabled(index) {
            self.causes.push(MirrorFailure {
                mirror: mirror_name(index),
                error: UpdateError::Transport("mirror disabled earlier in this session".into()),
            });
            index += 1;
        }

        if index >= self.mirror_count {
            self.state = AttemptState::Exhausted;
            return None;
        }

        self.state = AttemptState::Trying(index);
        Some(index)
    }

    /// Apply the outcome of contacting the current mirror.
    pub fn record(&mut self, mirror: String, outcome: AttemptOutcome) {
        let AttemptState::Trying(index) = self.state else {
            return;
        };

        match outcome {
            AttemptOutcome::Verified => self.state = AttemptState::Done,
            AttemptOutcome::Transport(error) | AttemptOutcome::ChecksumMismatch(error) => {
                self.causes.push(MirrorFailure { mirror, error });
                self.state = if index + 1 < self.mirror_count {
                    AttemptState::Trying(index + 1)
                } else {
                    AttemptState::Exhausted
                };
            }
            AttemptOutcome::Local(error) => {
                self.causes.push(MirrorFailure { mirror, error });
                self.state = AttemptState::Exhausted;
            }
        }
    }

    pub fn into_causes(self) -> Vec<MirrorFailure> {
        self.causes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(i: usize) -> String {
        format!("mirror-{i}")
    }

    #[test]
    fn test_transport_then_checksum_then_success() {
        let health = MirrorHealth::new(3);
        let mut attempt = FileAttempt::new(3);

        assert_eq!(attempt.next_candidate(&health, name), Some(0));
        attempt.record(name(0), AttemptOutcome::Transport(UpdateError::Transport("503".into())));
        assert_eq!(attempt.state(), AttemptState::Trying(1));

        assert_eq!(attempt.next_candidate(&health, name), Some(1));
        attempt.record(
            name(1),
            AttemptOutcome::ChecksumMismatch(UpdateError::Integrity {
                expected: "a".into(),
                actual: "b".into(),
            }),
        );

        assert_eq!(attempt.next_candidate(&health, name), Some(2));
        attempt.record(name(2), AttemptOutcome::Verified);
        assert_eq!(attempt.state(), AttemptState::Done);
        assert_eq!(attempt.next_candidate(&health, name), None);
        assert_eq!(attempt.into_causes().len(), 2);
    }

    #[test]
    fn test_disabled_mirrors_are_skipped() {
        let health = MirrorHealth::new(3);
        health.disable(0);
        health.disable(1);

        let mut attempt = FileAttempt::new(3);
        assert_eq!(attempt.next_candidate(&health, name), Some(2));

        let causes = attempt.into_causes();
        assert_eq!(causes.len(), 2);
        assert_eq!(causes[0].mirror, "mirror-0");
    }

    #[test]
    fn test_exhaustion() {
        let health = MirrorHealth::new(2);
        let mut attempt = FileAttempt::new(2);

        assert_eq!(attempt.next_candidate(&health, name), Some(0));
        attempt.record(name(0), AttemptOutcome::Transport(UpdateError::Transport("x".into())));
        health.disable(1);
        assert_eq!(attempt.next_candidate(&health, name), None);
        assert_eq!(attempt.state(), AttemptState::Exhausted);
    }

    #[test]
    fn test_local_failure_ends_without_next_mirror() {
        let health = MirrorHealth::new(3);
        let mut attempt = FileAttempt::new(3);

        assert_eq!(attempt.next_candidate(&health, name), Some(0));
        let outcome = AttemptOutcome::Local(UpdateError::Io(std::io::Error::other("disk full")));
        assert!(!outcome.blames_mirror());
        attempt.record(name(0), outcome);

        assert_eq!(attempt.state(), AttemptState::Exhausted);
        assert_eq!(attempt.next_candidate(&health, name), None);
        assert_eq!(attempt.into_causes().len(), 1);
        assert!(!health.is_disabled(0));
    }

    #[test]
    fn test_no_mirrors_is_immediately_exhausted() {
        let health = MirrorHealth::new(0);
        let mut attempt = FileAttempt::new(0);
        assert_eq!(attempt.next_candidate(&health, name), None);
        assert_eq!(attempt.state(), AttemptState::Exhausted);
    }
}
