//! Host health tracking
//!
//! Turns topology events into a single "cluster reachable" flag. Writers that
//! hit a no-host-available error park on [`HostHealthTracker::wait_until_available`]
//! until at least one host is up again.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::session::TopologyListener;

/// Per-host state: `Unknown -> Up -> Down -> (Up | Removed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Unknown,
    Up,
    Down,
    Removed,
}

#[derive(Default)]
pub struct HostHealthTracker {
    hosts: Mutex<HashMap<String, HostState>>,
    available: AtomicBool,
}

impl HostHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff at least one host is up
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn host_state(&self, host: &str) -> HostState {
        self.hosts
            .lock()
            .get(host)
            .copied()
            .unwrap_or(HostState::Unknown)
    }

    pub fn up_hosts(&self) -> usize {
        self.hosts
            .lock()
            .values()
            .filter(|s| **s == HostState::Up)
            .count()
    }

    /// Sleep `delay` at a time until a host is up; returns the number of sleeps.
    ///
    /// There is no upper bound: the synchronizer is a long-running daemon and
    /// waits for the cluster to come back.
    pub async fn wait_until_available(&self, delay: Duration) -> u64 {
        let mut waits = 0u64;
        loop {
            tokio::time::sleep(delay).await;
            waits += 1;
            if self.is_available() {
                break;
            }
            if waits % 12 == 0 {
                tracing::warn!(waits, "Still waiting for a cluster host to come up");
            }
        }
        tracing::info!(waits, "Cluster reachable again");
        waits
    }

    fn set(&self, host: &str, state: HostState) {
        let mut hosts = self.hosts.lock();
        hosts.insert(host.to_string(), state);
        let any_up = hosts.values().any(|s| *s == HostState::Up);
        self.available.store(any_up, Ordering::SeqCst);
    }
}

impl TopologyListener for HostHealthTracker {
    fn on_add(&self, host: &str) {
        tracing::info!(host = %host, "Host added");
        self.set(host, HostState::Up);
    }

    fn on_up(&self, host: &str) {
        tracing::info!(host = %host, "Host up");
        self.set(host, HostState::Up);
    }

    fn on_down(&self, host: &str) {
        tracing::warn!(host = %host, "Host down");
        self.set(host, HostState::Down);
        if !self.is_available() {
            tracing::warn!("No cluster host reachable");
        }
    }

    fn on_remove(&self, host: &str) {
        tracing::warn!(host = %host, "Host removed");
        self.set(host, HostState::Removed);
        if !self.is_available() {
            tracing::warn!("No cluster host reachable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_state_machine() {
        let tracker = HostHealthTracker::new();
        assert_eq!(tracker.host_state("a"), HostState::Unknown);
        assert!(!tracker.is_available());

        tracker.on_add("a");
        tracker.on_add("b");
        assert_eq!(tracker.host_state("a"), HostState::Up);
        assert!(tracker.is_available());
        assert_eq!(tracker.up_hosts(), 2);

        tracker.on_down("a");
        assert_eq!(tracker.host_state("a"), HostState::Down);
        assert!(tracker.is_available());

        tracker.on_remove("b");
        assert_eq!(tracker.host_state("b"), HostState::Removed);
        assert!(!tracker.is_available());

        tracker.on_up("a");
        assert!(tracker.is_available());
    }

    #[tokio::test]
    async fn test_wait_until_available() {
        let tracker = Arc::new(HostHealthTracker::new());
        tracker.on_down("a");

        let background = Arc::clone(&tracker);
        let revive = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            background.on_up("a");
        });

        let waits = tracker.wait_until_available(Duration::from_millis(5)).await;
        assert!(waits >= 2);
        assert!(tracker.is_available());
        revive.await.unwrap();
    }
}
