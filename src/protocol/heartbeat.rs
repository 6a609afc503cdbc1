//! Heartbeat replies and liveness deadlines.
//!
//! A connection with heartbeats enabled answers every client heartbeat with
//! one of its own. When `disconnect_on_timeout` is set the first heartbeat
//! arms a deadline; any later package pushes it out again, and the connection
//! is closed if the deadline passes without traffic.

use std::time::Duration;

use tokio::time::Instant;

use crate::core::package::{Package, PackageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// `None` disables heartbeats entirely.
    pub interval: Option<Duration>,
    pub timeout: Duration,
    pub disconnect_on_timeout: bool,
}

impl HeartbeatSettings {
    /// Heartbeats off.
    pub const fn disabled() -> Self {
        Self {
            interval: None,
            timeout: Duration::ZERO,
            disconnect_on_timeout: false,
        }
    }

    /// Build from second-based options. A `timeout_secs` of `0` means twice
    /// the interval.
    pub fn from_secs(heartbeat_secs: u64, timeout_secs: u64, disconnect_on_timeout: bool) -> Self {
        if heartbeat_secs == 0 {
            return Self::disabled();
        }
        let interval = Duration::from_secs(heartbeat_secs);
        let timeout = if timeout_secs == 0 {
            interval * 2
        } else {
            Duration::from_secs(timeout_secs)
        };
        Self {
            interval: Some(interval),
            timeout,
            disconnect_on_timeout,
        }
    }

    pub fn enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Interval advertised in the handshake response.
    pub fn interval_secs(&self) -> u64 {
        self.interval.map_or(0, |d| d.as_secs())
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    settings: HeartbeatSettings,
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(settings: HeartbeatSettings) -> Self {
        Self {
            settings,
            deadline: None,
        }
    }

    /// Arm the deadline for a fresh connection, so a peer that never completes
    /// the handshake is still timed out. No-op unless heartbeats are on and
    /// configured to disconnect.
    pub fn start(&mut self) {
        if self.settings.enabled() && self.settings.disconnect_on_timeout {
            self.deadline = Some(Instant::now() + self.settings.timeout);
        }
    }

    /// Any inbound package counts as liveness.
    pub fn on_package(&mut self) {
        if self.deadline.is_some() {
            self.deadline = Some(Instant::now() + self.settings.timeout);
        }
    }

    /// Handle a heartbeat event. Returns the reply to send, if heartbeats are
    /// on, and arms the timeout when configured to disconnect.
    pub fn on_heartbeat(&mut self) -> Option<Package> {
        if !self.settings.enabled() {
            return None;
        }
        if self.settings.disconnect_on_timeout {
            self.deadline = Some(Instant::now() + self.settings.timeout);
        }
        Some(Package::empty(PackageType::Heartbeat))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_to_twice_interval() {
        let settings = HeartbeatSettings::from_secs(10, 0, true);
        assert_eq!(settings.timeout, Duration::from_secs(20));
        assert_eq!(settings.interval_secs(), 10);
        assert!(!HeartbeatSettings::from_secs(0, 30, true).enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_armed_by_heartbeat_and_pushed_by_traffic() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatSettings::from_secs(1, 3, true));
        monitor.on_package();
        assert!(monitor.deadline().is_none());

        let reply = monitor.on_heartbeat().unwrap();
        assert_eq!(reply.kind, PackageType::Heartbeat);
        let first = monitor.deadline().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        monitor.on_package();
        assert!(monitor.deadline().unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn start_arms_deadline_for_silent_peers() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatSettings::from_secs(20, 100, true));
        let now = Instant::now();
        monitor.start();
        assert_eq!(monitor.deadline(), Some(now + Duration::from_secs(100)));

        let mut lenient = HeartbeatMonitor::new(HeartbeatSettings::from_secs(20, 100, false));
        lenient.start();
        assert!(lenient.deadline().is_none());

        let mut off = HeartbeatMonitor::new(HeartbeatSettings::disabled());
        off.start();
        assert!(off.deadline().is_none());
    }

    #[test]
    fn no_deadline_without_disconnect_on_timeout() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatSettings::from_secs(1, 0, false));
        monitor.start();
        assert!(monitor.on_heartbeat().is_some());
        assert!(monitor.deadline().is_none());
        assert!(HeartbeatMonitor::new(HeartbeatSettings::disabled())
            .on_heartbeat()
            .is_none());
    }
}
