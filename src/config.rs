//! Tunable parameters consumed by the core, mirroring the table in the
//! external-interfaces section of the design. Defaults match that table.

use serde::Deserialize;

use crate::error::{Result, StackError};
use crate::tcp::sequence::WrappingInt32;

/// Upper bound on bytes carried in a single TCP segment's payload.
pub const MAX_PAYLOAD_SIZE: usize = 1_452;

/// Number of consecutive retransmissions after which a connection resets.
pub const MAX_RETX_ATTEMPTS: u32 = 8;

/// ARP cache entry lifetime, in milliseconds.
pub const ARP_CACHE_TTL_MS: usize = 30_000;

/// Minimum interval between ARP requests for the same target, in milliseconds.
pub const ARP_REQUEST_COOLDOWN_MS: usize = 5_000;

/// Multiplier applied to `rt_timeout` to derive the post-close linger window.
pub const LINGER_MULTIPLIER: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Byte-stream and reassembler capacity in octets.
    pub capacity: usize,
    /// Initial retransmission timeout, in milliseconds.
    pub rt_timeout: u32,
    /// Fixed initial sequence number, overriding the random default.
    pub fixed_isn: Option<u32>,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            capacity: 65_000,
            rt_timeout: 1_000,
            fixed_isn: None,
        }
    }
}

impl StackConfig {
    pub fn fixed_isn(&self) -> Option<WrappingInt32> {
        self.fixed_isn.map(WrappingInt32::new)
    }

    /// Loads a config from a TOML document, falling back to `Default` for any
    /// field the document omits, then validates the result.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: StackConfig =
            toml::from_str(text).map_err(|e| StackError::Config(format!("{e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(StackError::Config(
                "capacity must be greater than zero".into(),
            ));
        }
        if self.rt_timeout == 0 {
            return Err(StackError::Config(
                "rt_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = StackConfig::default();
        assert_eq!(cfg.capacity, 65_000);
        assert_eq!(cfg.rt_timeout, 1_000);
        assert!(cfg.fixed_isn.is_none());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg = StackConfig::from_toml_str("rt_timeout = 250\n").unwrap();
        assert_eq!(cfg.rt_timeout, 250);
        assert_eq!(cfg.capacity, 65_000);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = StackConfig::from_toml_str("capacity = 0\n").unwrap_err();
        assert!(matches!(err, StackError::Config(_)));
    }
}
