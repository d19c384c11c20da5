//! Command-line options for `portmux forward`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use pm_core::config::ForwardConfig;
use pm_core::ConfigError;
use pm_protocol::{Headers, PORT_HEADER, STREAM_TYPE_HEADER};

/// Header key carrying the opaque source selector
pub const SOURCE_HEADER: &str = "source";

/// Header key carrying the comma-joined module selectors
pub const MODULES_HEADER: &str = "modules";

/// Stream type of forwarded connections
pub const DATA_STREAM_TYPE: &str = "data";

/// Options shared by every port of one `forward` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOptions {
    /// Transport connect timeout
    pub timeout: Duration,
    /// Module selectors given on the command line
    pub modules: Vec<String>,
    /// File listing additional modules, one per line
    pub modules_file: Option<PathBuf>,
    /// Print the plan instead of connecting
    pub dry_run: bool,
    /// Opaque source selector
    pub source: Option<String>,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self::from(&ForwardConfig::default())
    }
}

impl From<&ForwardConfig> for ForwardOptions {
    fn from(config: &ForwardConfig) -> Self {
        Self {
            timeout: config.timeout,
            modules: config.modules.clone(),
            modules_file: None,
            dry_run: false,
            source: config.source.clone(),
        }
    }
}

impl ForwardOptions {
    /// Sanity-check the options before anything is dialed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Command-line modules followed by those listed in `modules_file`
    pub fn resolve_modules(&self) -> Result<Vec<String>, ConfigError> {
        let mut modules = self.modules.clone();
        if let Some(path) = &self.modules_file {
            modules.extend(read_modules_file(path)?);
        }
        Ok(modules)
    }

    /// Headers for a stream forwarding to `remote_port`
    pub fn stream_headers(&self, modules: &[String], remote_port: u16) -> Headers {
        let mut headers = Headers::new()
            .with(PORT_HEADER, remote_port.to_string())
            .with(STREAM_TYPE_HEADER, DATA_STREAM_TYPE);
        if let Some(source) = &self.source {
            headers = headers.with(SOURCE_HEADER, source.as_str());
        }
        if !modules.is_empty() {
            headers = headers.with(MODULES_HEADER, modules.join(","));
        }
        headers
    }
}

/// Read module names from a file, skipping blank lines and `#` comments
pub fn read_modules_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read modules file: {}", e)))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Parse a `--timeout` value.
///
/// Accepts humantime durations (`500ms`, `30s`, `2m`, `1h 30m`) and bare
/// numbers of seconds. Zero parses; `ForwardOptions::validate` rejects it.
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.starts_with('-') {
        return Err(ConfigError::InvalidTimeout.to_string());
    }
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| format!("invalid timeout '{}': {}", value, e));
    }
    humantime::parse_duration(value).map_err(|e| format!("invalid timeout '{}': {}", value, e))
}

/// A `LOCAL[:REMOTE]` port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port listened on locally
    pub local: u16,
    /// Port the server connects to
    pub remote: u16,
}

impl FromStr for PortMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{}' in '{}'", part, s))
        };

        let (local, remote) = match s.split_once(':') {
            Some((local, remote)) => (parse(local)?, parse(remote)?),
            None => {
                let port = parse(s)?;
                (port, port)
            }
        };

        if remote == 0 {
            return Err(format!("remote port must be non-zero in '{}'", s));
        }
        Ok(Self { local, remote })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}
