//! Target host descriptor

use std::fmt;
use std::time::Duration;

/// Where a request goes and how patiently it is served
///
/// Two targets address the same endpoint when host and port match; the
/// timeout and interval do not take part in that comparison.
#[derive(Debug, Clone)]
pub struct TargetHost {
    pub host: String,
    pub port: u16,
    /// Response timeout in milliseconds
    pub timeout_ms: u32,
    /// Minimum gap between two requests to this target in milliseconds
    pub interval_ms: u32,
}

impl TargetHost {
    pub fn new(host: impl Into<String>, port: u16, timeout_ms: u32, interval_ms: u32) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms,
            interval_ms,
        }
    }

    /// Placeholder for "no target configured yet"
    pub fn unset(timeout_ms: u32, interval_ms: u32) -> Self {
        Self::new("0.0.0.0", 0, timeout_ms, interval_ms)
    }

    /// Same host and port
    pub fn same_endpoint(&self, other: &TargetHost) -> bool {
        self.host == other.host && self.port == other.port
    }

    pub fn is_unset(&self) -> bool {
        self.port == 0
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }
}

impl PartialEq for TargetHost {
    fn eq(&self, other: &Self) -> bool {
        self.same_endpoint(other)
    }
}

impl Eq for TargetHost {}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
