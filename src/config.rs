//! Per-transfer configuration.
//!
//! The CLI in `main.rs` builds a [`Config`] from the command line; tests
//! build one directly and usually shrink the timers.

use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::{HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::timer::TimerConfig;

/// Handshake retry policy for the active opener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// How long one attempt waits for SYN+ACK before starting over.
    pub attempt_timeout: Duration,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(5000),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Largest encoded segment (header + payload) in bytes.
    pub mtu: usize,
    /// Sliding window size: unacknowledged segments at the sender,
    /// buffered out-of-order segments at the receiver.
    pub window: usize,
    pub timer: TimerConfig,
    pub handshake: HandshakeConfig,
}

impl Config {
    /// Build a configuration with default timers.
    pub fn new(mtu: usize, window: usize) -> Result<Self, ConfigError> {
        let config = Self {
            mtu,
            window,
            timer: TimerConfig::default(),
            handshake: HandshakeConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engines rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu <= HEADER_LEN {
            return Err(ConfigError::MtuTooSmall {
                mtu: self.mtu,
                header: HEADER_LEN,
            });
        }
        if self.mtu - HEADER_LEN > MAX_PAYLOAD_LEN {
            return Err(ConfigError::MtuTooLarge(self.mtu));
        }
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.timer.min_rto > self.timer.max_rto {
            return Err(ConfigError::InvertedRtoBounds);
        }
        Ok(())
    }

    /// Payload bytes carried by one full DATA segment.
    pub fn max_payload(&self) -> usize {
        self.mtu - HEADER_LEN
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: 1024,
            window: 4,
            timer: TimerConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_mtu_minus_header() {
        let config = Config::new(1024, 4).unwrap();
        assert_eq!(config.max_payload(), 1000);
    }

    #[test]
    fn rejects_mtu_without_payload_room() {
        assert_eq!(
            Config::new(HEADER_LEN, 4),
            Err(ConfigError::MtuTooSmall { mtu: 24, header: 24 })
        );
        assert!(Config::new(HEADER_LEN + 1, 4).is_ok());
    }

    #[test]
    fn rejects_zero_window() {
        assert_eq!(Config::new(1500, 0), Err(ConfigError::ZeroWindow));
    }

    #[test]
    fn rejects_inverted_rto_bounds() {
        let mut config = Config::default();
        config.timer.min_rto = Duration::from_secs(120);
        assert_eq!(config.validate(), Err(ConfigError::InvertedRtoBounds));
    }
}
