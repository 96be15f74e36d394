//! Typed session settings.
//!
//! Loading these from a file or environment is the embedding application's
//! job; this module only defines the shape, the defaults and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Session;

/// Invalid [`SessionConfig`] value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Queue capacity below one
    #[error("{queue} queue length must be at least 1")]
    EmptyQueue {
        /// "read" or "write"
        queue: &'static str,
    },

    /// Duration that must be positive is zero
    #[error("{field} must be positive")]
    ZeroDuration {
        /// Offending field name
        field: &'static str,
    },
}

/// Settings applied to every session an endpoint creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session name used in logs and stats; unset keeps the per-kind
    /// default ("tcp-session", "udp-session", "framed-session")
    pub name: Option<String>,
    /// Largest accepted package, in bytes (0 disables the check)
    pub max_msg_len: usize,
    /// Read queue capacity
    pub read_queue_len: usize,
    /// Write queue capacity
    pub write_queue_len: usize,
    /// Per-call transport read timeout
    pub read_timeout: Duration,
    /// Per-call transport write timeout
    pub write_timeout: Duration,
    /// Close grace period and socket linger
    pub wait_timeout: Duration,
    /// Heartbeat period
    pub cron_period: Duration,
    /// Disable Nagle on TCP sockets
    pub tcp_no_delay: bool,
    /// TCP keepalive probe interval
    pub keep_alive_period: Duration,
    /// Consecutive datagram decode failures tolerated; `None` never gives up
    pub datagram_error_limit: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_msg_len: 1024,
            read_queue_len: 1024,
            write_queue_len: 1024,
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(7),
            cron_period: Duration::from_secs(60),
            tcp_no_delay: true,
            keep_alive_period: Duration::from_secs(180),
            datagram_error_limit: None,
        }
    }
}

impl SessionConfig {
    /// Check every value the session setters would reject.
    ///
    /// # Errors
    ///
    /// - `ConfigError::EmptyQueue` for a zero queue length
    /// - `ConfigError::ZeroDuration` for a zero cron period, wait timeout or
    ///   I/O timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_queue_len == 0 {
            return Err(ConfigError::EmptyQueue { queue: "read" });
        }
        if self.write_queue_len == 0 {
            return Err(ConfigError::EmptyQueue { queue: "write" });
        }

        let durations = [
            ("cron_period", self.cron_period),
            ("wait_timeout", self.wait_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
        ];
        if let Some(&(field, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::ZeroDuration { field });
        }

        Ok(())
    }

    /// Validate and apply to a session that has not been run yet.
    ///
    /// # Errors
    ///
    /// Returns the validation error and leaves the session untouched.
    pub fn apply<P: Send + 'static>(&self, session: &Session<P>) -> Result<(), ConfigError> {
        self.validate()?;

        if let Some(name) = &self.name {
            session.set_name(name);
        }
        session.set_max_msg_len(self.max_msg_len);
        session.set_rq_len(self.read_queue_len);
        session.set_wq_len(self.write_queue_len);
        session.set_read_timeout(self.read_timeout);
        session.set_write_timeout(self.write_timeout);
        session.set_wait_time(self.wait_timeout);
        session.set_cron_period(self.cron_period);
        session.set_datagram_error_limit(self.datagram_error_limit);

        Ok(())
    }
}
