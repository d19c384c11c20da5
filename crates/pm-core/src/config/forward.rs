//! Port-forwarding defaults

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defaults for `portmux forward`, overridable on the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Remote portmux server to dial
    pub remote: Option<String>,

    /// Local address forwarded ports listen on
    pub bind_host: String,

    /// Transport connect timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Opaque source selector passed to the remote side
    pub source: Option<String>,

    /// Opaque module selectors passed to the remote side
    pub modules: Vec<String>,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            remote: None,
            bind_host: "127.0.0.1".to_string(),
            timeout: Duration::from_secs(30),
            source: None,
            modules: vec![],
        }
    }
}

/// Defaults for `portmux serve`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Address to accept transports on
    pub listen: String,

    /// Host that accepted streams are connected to
    pub target_host: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7070".to_string(),
            target_host: "127.0.0.1".to_string(),
        }
    }
}
