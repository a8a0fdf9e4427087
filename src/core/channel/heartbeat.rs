//! Heartbeat deadlines for an open transport.
//!
//! The connection task owns one [`Heartbeat`] per transport and rebuilds it
//! whenever a transport opens, so deadlines never leak across reconnects.

use std::time::Duration;

use tokio::time::Instant;

use super::base::HeartbeatConfig;

/// Used in place of a disabled deadline so `sleep_until` stays valid.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

/// Ping schedule plus the traffic timeout armed by each ping.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Option<Duration>,
    timeout: Option<Duration>,
    next_ping: Instant,
    deadline: Option<Instant>,
}

impl Heartbeat {
    pub fn new(config: &HeartbeatConfig, now: Instant) -> Self {
        let interval =
            (config.ping_interval_ms > 0).then(|| Duration::from_millis(config.ping_interval_ms));
        let timeout = interval
            .and((config.ping_timeout_ms > 0).then(|| Duration::from_millis(config.ping_timeout_ms)));
        Self {
            interval,
            timeout,
            next_ping: now + interval.unwrap_or(FAR_FUTURE),
            deadline: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// When the next ping is due.
    pub fn next_ping_at(&self) -> Instant {
        self.next_ping
    }

    /// Armed traffic deadline, if a ping is outstanding.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Deadline for `sleep_until`; far in the future when disarmed.
    pub fn deadline_or_far(&self, now: Instant) -> Instant {
        self.deadline.unwrap_or(now + FAR_FUTURE)
    }

    /// Record a sent ping: schedule the next one and (re)arm the timeout.
    pub fn ping_sent(&mut self, now: Instant) {
        if let Some(interval) = self.interval {
            self.next_ping = now + interval;
        }
        if let Some(timeout) = self.timeout {
            self.deadline = Some(now + timeout);
        }
    }

    /// Any inbound frame proves liveness and disarms the timeout.
    pub fn traffic_received(&mut self) {
        self.deadline = None;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(interval: u64, timeout: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            ping_interval_ms: interval,
            ping_timeout_ms: timeout,
            answer_bare_ping: true,
        }
    }

    #[test]
    fn test_ping_arms_deadline() {
        let now = Instant::now();
        let mut hb = Heartbeat::new(&config(1000, 300), now);
        assert!(hb.is_enabled());
        assert_eq!(hb.next_ping_at(), now + Duration::from_millis(1000));
        assert!(hb.deadline().is_none());

        let sent_at = now + Duration::from_millis(1000);
        hb.ping_sent(sent_at);
        assert_eq!(hb.deadline(), Some(sent_at + Duration::from_millis(300)));
        assert_eq!(hb.next_ping_at(), sent_at + Duration::from_millis(1000));
        assert!(!hb.is_expired(sent_at + Duration::from_millis(299)));
        assert!(hb.is_expired(sent_at + Duration::from_millis(300)));
    }

    #[test]
    fn test_traffic_disarms_deadline() {
        let now = Instant::now();
        let mut hb = Heartbeat::new(&config(1000, 300), now);
        hb.ping_sent(now);
        hb.traffic_received();
        assert!(hb.deadline().is_none());
        assert!(!hb.is_expired(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_disabled_heartbeat() {
        let now = Instant::now();
        let mut hb = Heartbeat::new(&config(0, 300), now);
        assert!(!hb.is_enabled());
        hb.ping_sent(now);
        assert!(hb.deadline().is_none());
        assert!(hb.next_ping_at() > now + Duration::from_secs(3600));
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let now = Instant::now();
        let mut hb = Heartbeat::new(&config(100, 0), now);
        hb.ping_sent(now);
        assert!(hb.deadline().is_none());
        assert!(hb.deadline_or_far(now) > now + Duration::from_secs(3600));
    }
}
