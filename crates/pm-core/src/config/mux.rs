//! Multiplexer configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use pm_protocol::MAX_PAYLOAD_SIZE;

/// Tuning knobs for a single multiplexed connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Largest Data frame payload a write is split into
    pub max_frame_payload: usize,

    /// Frames that may be queued for the writer before callers wait
    pub outbound_queue: usize,

    /// Peer-opened streams that may wait for `accept` before the reader waits
    pub accept_backlog: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_frame_payload: 16 * 1024,
            outbound_queue: 256,
            accept_backlog: 64,
        }
    }
}

impl MuxConfig {
    /// Check that every field is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_payload == 0 || self.max_frame_payload > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_frame_payload must be between 1 and {}",
                MAX_PAYLOAD_SIZE
            )));
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::Invalid(
                "outbound_queue must be at least 1".to_string(),
            ));
        }
        if self.accept_backlog == 0 {
            return Err(ConfigError::Invalid(
                "accept_backlog must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MuxConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_frames() {
        let config = MuxConfig {
            max_frame_payload: MAX_PAYLOAD_SIZE + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_queue() {
        let config = MuxConfig {
            outbound_queue: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MuxConfig = serde_json::from_str(r#"{"max_frame_payload":1024}"#).unwrap();
        assert_eq!(config.max_frame_payload, 1024);
        assert_eq!(config.outbound_queue, 256);
        assert_eq!(config.accept_backlog, 64);
    }
}
