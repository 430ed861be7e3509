//! Per-session mirror health.
//!
//! A mirror is disabled on its first failure and stays disabled until the
//! session ends. The set only ever grows, so workers can read it without
//! coordination.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct MirrorHealth {
    disabled: Vec<AtomicBool>,
}

impl MirrorHealth {
    /// All `mirror_count` mirrors start enabled.
    pub fn new(mirror_count: usize) -> Self {
        Self {
            disabled: (0..mirror_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Disable a mirror. Returns `true` if this call disabled it.
    pub fn disable(&self, index: usize) -> bool {
        self.disabled
            .get(index)
            .is_some_and(|flag| !flag.swap(true, Ordering::AcqRel))
    }

    /// Unknown indices count as disabled.
    pub fn is_disabled(&self, index: usize) -> bool {
        self.disabled
            .get(index)
            .map_or(true, |flag| flag.load(Ordering::Acquire))
    }

    pub fn disabled_indices(&self) -> Vec<usize> {
        (0..self.disabled.len())
            .filter(|&i| self.is_disabled(i))
            .collect()
    }

    pub fn all_disabled(&self) -> bool {
        (0..self.disabled.len()).all(|i| self.is_disabled(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_disable_is_monotonic() {
        let health = MirrorHealth::new(3);
        assert!(health.disabled_indices().is_empty());

        assert!(health.disable(1));
        assert!(!health.disable(1));
        assert!(health.is_disabled(1));
        assert!(!health.is_disabled(0));
        assert_eq!(health.disabled_indices(), vec![1]);
        assert!(!health.all_disabled());
    }

    #[test]
    fn test_out_of_range() {
        let health = MirrorHealth::new(1);
        assert!(!health.disable(5));
        assert!(health.is_disabled(5));
    }

    #[test]
    fn test_concurrent_disable_counts_once() {
        let health = Arc::new(MirrorHealth::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let health = Arc::clone(&health);
                std::thread::spawn(move || health.disable(0))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
        assert!(health.all_disabled());
    }
}
