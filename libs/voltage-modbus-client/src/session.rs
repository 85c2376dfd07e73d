//! Connection session management
//!
//! One physical connection serves one endpoint at a time. Before each
//! attempt the session closes a connection that belongs to another
//! endpoint, flushes stray bytes and paces requests on a reused one, and
//! opens a connection when none is up.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_TIMEOUT_MS, POLL_INTERVAL, RESPONSE_BUFFER_SIZE};
use crate::frame::format_hex;
use crate::target::TargetHost;
use crate::transport::Transport;

/// Session state kept by the worker between requests
#[derive(Debug)]
pub struct SessionManager {
    /// Target of the most recently finalized request
    last_target: Option<TargetHost>,
    /// Endpoint the open connection belongs to
    connected_to: Option<TargetHost>,
    /// End of the previous attempt, start of the pacing window
    last_request: Instant,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            last_target: None,
            connected_to: None,
            last_request: Instant::now(),
        }
    }

    /// Make the transport ready for a request to `target`
    ///
    /// Returns whether a connection is up afterwards; `false` is a
    /// connection failure for the retry controller.
    pub async fn prepare<T>(&mut self, transport: &mut T, target: &TargetHost) -> bool
    where
        T: Transport + ?Sized,
    {
        if transport.is_connected() {
            if self.connected_to.as_ref() != Some(target) {
                info!(
                    "Target changed: {} -> {} (last served {}), disconnect",
                    describe(self.connected_to.as_ref()),
                    target,
                    describe(self.last_target.as_ref())
                );
                self.close(transport).await;
                tokio::time::sleep(POLL_INTERVAL).await;
            } else {
                self.drain(transport);
                self.pace(target).await;
            }
        }

        if !transport.is_connected() {
            debug!("Target connect: {}", target);
            match transport
                .connect(&target.host, target.port, connect_timeout(target))
                .await
            {
                Ok(()) => self.connected_to = Some(target.clone()),
                Err(e) => {
                    warn!("Connect {} failed: {}", target, e);
                    self.connected_to = None;
                },
            }
            tokio::task::yield_now().await;
        }

        transport.is_connected()
    }

    /// Force the connection closed
    pub async fn close<T>(&mut self, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        transport.stop().await;
        self.connected_to = None;
    }

    /// Discard bytes left over from a previous exchange
    fn drain<T>(&mut self, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
        loop {
            match transport.try_read(&mut buf) {
                Ok(0) => break,
                Ok(n) => debug!("Stray RX dropped: {}", format_hex(&buf[..n])),
                Err(e) => {
                    debug!("Drain stopped: {}", e);
                    if !transport.is_connected() {
                        self.connected_to = None;
                    }
                    break;
                },
            }
        }
    }

    /// Wait until the target's interval has passed since the last attempt
    async fn pace(&self, target: &TargetHost) {
        let ready_at = self.last_request + target.interval();
        if Instant::now() < ready_at {
            debug!("Pacing {}: {:?}", target, ready_at - Instant::now());
            sleep_until(ready_at).await;
        }
    }

    /// Stamp the end of an attempt
    pub fn mark_attempt(&mut self) {
        self.last_request = Instant::now();
    }

    /// Record the target of a finalized request
    pub fn finalize(&mut self, target: &TargetHost) {
        self.last_target = Some(target.clone());
    }

    pub fn last_target(&self) -> Option<&TargetHost> {
        self.last_target.as_ref()
    }

    pub fn connected_to(&self) -> Option<&TargetHost> {
        self.connected_to.as_ref()
    }
}

fn describe(target: Option<&TargetHost>) -> String {
    target.map_or_else(|| "-".to_string(), ToString::to_string)
}

fn connect_timeout(target: &TargetHost) -> Duration {
    if target.timeout_ms == 0 {
        Duration::from_millis(u64::from(DEFAULT_TIMEOUT_MS))
    } else {
        target.timeout()
    }
}
