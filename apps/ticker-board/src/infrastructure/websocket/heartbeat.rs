//! Heartbeat Monitor
//!
//! Tracks the last time the peer showed signs of life. The channel task
//! ticks the monitor on its ping interval; any inbound frame or pong counts
//! as activity. Silence beyond the timeout ends the channel.

use std::time::{Duration, Instant};

use crate::infrastructure::config::WebSocketSettings;

/// Shortest ping interval accepted.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after which the channel is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_settings(&WebSocketSettings::default())
    }
}

impl HeartbeatConfig {
    /// Build from the WebSocket settings.
    #[must_use]
    pub fn from_settings(settings: &WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval.max(MIN_INTERVAL),
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the channel task should do on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// The peer has been silent too long; treat the channel as closed.
    Timeout,
}

/// Liveness bookkeeping for one channel.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_activity: Instant,
}

impl HeartbeatMonitor {
    /// Start monitoring at `now`.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
        }
    }

    /// Note inbound traffic.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Decide what to do on a ping tick.
    #[must_use]
    pub fn on_tick(&self, now: Instant) -> HeartbeatAction {
        if self.silence(now) >= self.config.pong_timeout {
            HeartbeatAction::Timeout
        } else {
            HeartbeatAction::SendPing
        }
    }

    /// Ping interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.ping_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: HeartbeatConfig = HeartbeatConfig {
        ping_interval: Duration::from_secs(20),
        pong_timeout: Duration::from_secs(40),
    };

    #[test]
    fn pings_while_peer_is_recent() {
        let start = Instant::now();
        let monitor = HeartbeatMonitor::new(CONFIG, start);

        assert_eq!(
            monitor.on_tick(start + Duration::from_secs(20)),
            HeartbeatAction::SendPing
        );
    }

    #[test]
    fn times_out_after_silence() {
        let start = Instant::now();
        let monitor = HeartbeatMonitor::new(CONFIG, start);

        assert_eq!(
            monitor.on_tick(start + Duration::from_secs(40)),
            HeartbeatAction::Timeout
        );
    }

    #[test]
    fn activity_pushes_the_deadline() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(CONFIG, start);
        monitor.record_activity(start + Duration::from_secs(30));

        assert_eq!(
            monitor.on_tick(start + Duration::from_secs(60)),
            HeartbeatAction::SendPing
        );
        assert_eq!(
            monitor.silence(start + Duration::from_secs(60)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn zero_interval_is_clamped() {
        let settings = WebSocketSettings {
            heartbeat_interval: Duration::ZERO,
            ..WebSocketSettings::default()
        };
        assert_eq!(
            HeartbeatConfig::from_settings(&settings).ping_interval,
            MIN_INTERVAL
        );
    }
}
