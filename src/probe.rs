//! SSH reachability probing.
//!
//! A pod's SSH port is considered reachable as soon as a TCP connection to
//! it succeeds. The prober polls at a fixed interval and gives up once its
//! deadline passes, reporting `false` instead of an error so the caller
//! decides whether that is fatal.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::TimingSettings;

/// Shortest connect attempt, so a nearly spent deadline still gets one try.
const MIN_ATTEMPT: Duration = Duration::from_millis(50);

/// Polls a TCP endpoint until it accepts connections.
#[derive(Debug, Clone, Copy)]
pub struct ReachabilityProber {
    /// Delay between attempts.
    interval: Duration,
    /// Budget of a single connect attempt.
    connect_timeout: Duration,
}

impl ReachabilityProber {
    /// Creates a prober.
    #[must_use]
    pub const fn new(interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            interval,
            connect_timeout,
        }
    }

    /// Creates a prober from timing settings.
    #[must_use]
    pub const fn from_timing(timing: &TimingSettings) -> Self {
        Self::new(timing.probe_interval(), timing.connect_timeout())
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Tries one connection.
    pub async fn probe_once(&self, host: &str, port: u16) -> bool {
        self.attempt(host, port, self.connect_timeout).await
    }

    async fn attempt(&self, host: &str, port: u16, budget: Duration) -> bool {
        match tokio::time::timeout(budget, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                trace!("Connect to {host}:{port} failed: {e}");
                false
            }
            Err(_) => {
                trace!("Connect to {host}:{port} timed out after {budget:?}");
                false
            }
        }
    }

    /// Polls `host:port` until it accepts a connection or `timeout` elapses.
    ///
    /// Returns `false` no earlier than `timeout` after the call, and no later
    /// than `timeout` plus one connect attempt.
    pub async fn wait_until_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = self.connect_timeout.min(remaining).max(MIN_ATTEMPT);

            if self.attempt(host, port, budget).await {
                debug!("{host}:{port} reachable after {attempts} attempt(s)");
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("{host}:{port} unreachable after {attempts} attempt(s) in {timeout:?}");
                return false;
            }

            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
