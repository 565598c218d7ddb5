//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Port descriptor loading, bus addresses and logging settings."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};
use crate::line::{BaudRate, DataBits, LineConfig, Parity, StopBits};
use crate::logging::LogFormat;

/// Address the relay binds for publishers; endpoints publish here.
pub const DEFAULT_NORTH_URL: &str = "ipc:///tmp/ezmb_north.ipc";
/// Address the relay binds for subscribers; endpoints subscribe here.
pub const DEFAULT_SOUTH_URL: &str = "ipc:///tmp/ezmb_south.ipc";
/// Default read-buffer capacity in bytes.
pub const DEFAULT_MAXLEN: usize = 1024;
/// Largest accepted read-buffer capacity in bytes.
pub const MAX_MAXLEN: usize = 1 << 20;
/// Default read timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

fn default_baud() -> i64 {
    i64::from(BaudRate::default().get())
}

fn default_databits() -> i64 {
    8
}

fn default_stopbits() -> i64 {
    1
}

fn default_parity() -> String {
    "n".to_owned()
}

fn default_maxlen() -> i64 {
    DEFAULT_MAXLEN as i64
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_MS as i64
}

/// Derive a bus-safe identifier from a device path.
///
/// Takes the final path component, lower-cases it and replaces every
/// non-alphanumeric character with `_`, so `/dev/ttyUSB0` becomes `ttyusb0`.
pub fn device_uid(device: &Path) -> String {
    let base = device
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| device.to_string_lossy().into_owned());
    base.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Descriptor for one serial port managed by a collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortConfig {
    /// Stable identifier, also used as the bus endpoint id.
    pub uid: String,
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub device: PathBuf,
    /// Line discipline.
    #[serde(flatten)]
    pub line: LineConfig,
    /// Minimum delay between consecutive writes, in milliseconds.
    pub mindelay: u64,
    /// Read-buffer capacity; a single read never returns more than this.
    pub maxlen: usize,
    /// Read timeout, in milliseconds.
    pub timeout: u64,
}

impl PortConfig {
    /// Descriptor with documented defaults for everything but identity.
    pub fn new(uid: impl Into<String>, device: impl Into<PathBuf>) -> Self {
        Self {
            uid: uid.into(),
            device: device.into(),
            line: LineConfig::default(),
            mindelay: 0,
            maxlen: DEFAULT_MAXLEN,
            timeout: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Replace the line discipline.
    pub fn with_line(mut self, line: LineConfig) -> Self {
        self.line = line;
        self
    }

    /// Replace the read-buffer capacity.
    pub fn with_maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = maxlen;
        self
    }

    /// Replace the minimum inter-send delay.
    pub fn with_mindelay(mut self, mindelay_ms: u64) -> Self {
        self.mindelay = mindelay_ms;
        self
    }

    /// Minimum delay between writes.
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.mindelay)
    }

    /// Read timeout applied to the open device.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Check fields that are not already constrained by their types.
    pub fn validate(&self) -> Result<()> {
        if self.uid.trim().is_empty() {
            return Err(ConfigError::invalid("port uid may not be empty"));
        }
        if self.device.as_os_str().is_empty() {
            return Err(ConfigError::invalid(format!(
                "port '{}' has an empty device path",
                self.uid
            )));
        }
        if self.maxlen == 0 || self.maxlen > MAX_MAXLEN {
            return Err(ConfigError::invalid(format!(
                "port '{}' maxlen must be 1-{}, got {}",
                self.uid, MAX_MAXLEN, self.maxlen
            )));
        }
        if self.timeout == 0 {
            return Err(ConfigError::invalid(format!(
                "port '{}' timeout must be > 0",
                self.uid
            )));
        }
        Ok(())
    }
}

/// Loosely typed entry as written in the descriptor file.
///
/// Numeric fields are signed so out-of-range values reach validation and are
/// reported together instead of aborting the decoder at the first one.
#[derive(Debug, Deserialize)]
struct RawPortEntry {
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    device: Option<String>,
    #[serde(default = "default_baud")]
    baud: i64,
    #[serde(default = "default_databits")]
    databits: i64,
    #[serde(default = "default_stopbits")]
    stopbits: i64,
    #[serde(default = "default_parity")]
    parity: String,
    #[serde(default)]
    mindelay: i64,
    #[serde(default = "default_maxlen")]
    maxlen: i64,
    #[serde(default = "default_timeout")]
    timeout: i64,
}

impl RawPortEntry {
    fn into_port(self, device: String, errors: &mut Vec<String>) -> Option<PortConfig> {
        let device = PathBuf::from(device);
        let uid = match self.uid {
            Some(uid) if !uid.trim().is_empty() => uid,
            _ => device_uid(&device),
        };
        let before = errors.len();
        let mut note = |message: String| errors.push(format!("port '{uid}': {message}"));

        let baud = u32::try_from(self.baud)
            .map_err(|_| ConfigError::invalid(format!("unsupported baud rate {}", self.baud)))
            .and_then(BaudRate::new);
        let databits = u8::try_from(self.databits)
            .map_err(|_| ConfigError::invalid(format!("data bits must be 5-8, got {}", self.databits)))
            .and_then(DataBits::try_from);
        let stopbits = u8::try_from(self.stopbits)
            .map_err(|_| ConfigError::invalid(format!("stop bits must be 1 or 2, got {}", self.stopbits)))
            .and_then(StopBits::try_from);
        let parity = self.parity.parse::<Parity>();

        if self.mindelay < 0 {
            note(format!("mindelay must be >= 0, got {}", self.mindelay));
        }
        if self.maxlen <= 0 || self.maxlen > MAX_MAXLEN as i64 {
            note(format!("maxlen must be 1-{MAX_MAXLEN}, got {}", self.maxlen));
        }
        if self.timeout <= 0 {
            note(format!("timeout must be > 0, got {}", self.timeout));
        }

        let line = match (baud, databits, stopbits, parity) {
            (Ok(baud), Ok(databits), Ok(stopbits), Ok(parity)) => Some(LineConfig {
                baud,
                databits,
                stopbits,
                parity,
            }),
            (baud, databits, stopbits, parity) => {
                for err in [baud.err(), databits.err(), stopbits.err(), parity.err()]
                    .into_iter()
                    .flatten()
                {
                    note(err.to_string());
                }
                None
            }
        };

        if errors.len() != before {
            return None;
        }
        Some(PortConfig {
            uid,
            device,
            line: line?,
            mindelay: self.mindelay as u64,
            maxlen: self.maxlen as usize,
            timeout: self.timeout as u64,
        })
    }
}

/// Port descriptors loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortConfigFile {
    /// Valid descriptors in file order.
    pub ports: Vec<PortConfig>,
    /// Number of entries skipped because they had no `device`.
    #[serde(skip)]
    pub skipped: usize,
}

impl PortConfigFile {
    /// Read and validate a descriptor file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading port descriptors");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_value(document)
    }

    /// Validate an already decoded document.
    ///
    /// Accepts either `{"ports": [...]}` or a bare array of descriptors.
    pub fn from_value(document: Value) -> Result<Self> {
        let entries = match document {
            Value::Array(entries) => entries,
            Value::Object(mut root) => match root.remove("ports") {
                Some(Value::Array(entries)) => entries,
                _ => return Err(ConfigError::invalid("missing or invalid 'ports' array")),
            },
            _ => return Err(ConfigError::invalid("descriptor document must be an object or array")),
        };

        let mut errors = Vec::new();
        let mut ports = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();
        let mut skipped = 0usize;

        for (index, entry) in entries.into_iter().enumerate() {
            let raw: RawPortEntry = match serde_json::from_value(entry) {
                Ok(raw) => raw,
                Err(err) => {
                    errors.push(format!("entry {index}: {err}"));
                    continue;
                }
            };
            let Some(device) = raw.device.clone().filter(|d| !d.trim().is_empty()) else {
                warn!(entry = index, "skipping port descriptor without device");
                skipped += 1;
                continue;
            };
            if let Some(port) = raw.into_port(device, &mut errors) {
                if !seen.insert(port.uid.clone()) {
                    errors.push(format!("duplicate port uid '{}'", port.uid));
                    continue;
                }
                ports.push(port);
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::Validation {
                details: errors.join("\n"),
            });
        }
        Ok(Self { ports, skipped })
    }
}

impl std::str::FromStr for PortConfigFile {
    type Err = ConfigError;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let document: Value = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_value(document)
    }
}

/// Relay addresses shared by every bus participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Args)]
pub struct BusAddresses {
    /// Relay inbound address; publishers connect here.
    #[arg(long = "north-url", env = "EZMB_NORTH_URL", default_value = DEFAULT_NORTH_URL)]
    pub north: String,
    /// Relay outbound address; subscribers connect here.
    #[arg(long = "south-url", env = "EZMB_SOUTH_URL", default_value = DEFAULT_SOUTH_URL)]
    pub south: String,
}

impl BusAddresses {
    /// Explicit pair of addresses.
    pub fn new(north: impl Into<String>, south: impl Into<String>) -> Self {
        Self {
            north: north.into(),
            south: south.into(),
        }
    }

    /// `ipc://` addresses rooted in `dir`, used to isolate test buses.
    pub fn ipc_in(dir: &Path) -> Self {
        Self::new(
            format!("ipc://{}", dir.join("north.ipc").display()),
            format!("ipc://{}", dir.join("south.ipc").display()),
        )
    }
}

impl Default for BusAddresses {
    fn default() -> Self {
        Self::new(DEFAULT_NORTH_URL, DEFAULT_SOUTH_URL)
    }
}

/// Logging settings shared by the gateway binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Args)]
pub struct LoggingConfig {
    /// Directory for daily rolling JSON log files; stdout only when unset.
    #[arg(long = "log-dir", env = "EZMB_LOG_DIR", value_name = "DIR")]
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Stdout log format.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Pretty)]
    #[serde(default)]
    pub format: LogFormat,
    /// File name prefix for rolling logs; defaults to the service name.
    #[arg(skip)]
    #[serde(default)]
    pub file_prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn descriptors_fill_documented_defaults() {
        let file: PortConfigFile = r#"{"ports": [{"uid": "U1", "device": "/dev/ttyS1"}]}"#
            .parse()
            .unwrap();
        let port = &file.ports[0];
        assert_eq!(port.uid, "U1");
        assert_eq!(port.line, LineConfig::default());
        assert_eq!(port.mindelay, 0);
        assert_eq!(port.maxlen, 1024);
        assert_eq!(port.timeout, 100);
    }

    #[test]
    fn bare_array_is_accepted() {
        let file: PortConfigFile =
            r#"[{"uid": "A", "device": "/dev/a", "baud": 9600, "parity": "E", "maxlen": 16}]"#
                .parse()
                .unwrap();
        assert_eq!(file.ports.len(), 1);
        assert_eq!(file.ports[0].line.baud.get(), 9600);
        assert_eq!(file.ports[0].line.parity, Parity::Even);
        assert_eq!(file.ports[0].maxlen, 16);
    }

    #[test]
    fn entries_without_device_are_skipped() {
        let file: PortConfigFile =
            r#"{"ports": [{"uid": "ghost"}, {"uid": "real", "device": "/dev/real"}]}"#
                .parse()
                .unwrap();
        assert_eq!(file.skipped, 1);
        assert_eq!(file.ports.len(), 1);
        assert_eq!(file.ports[0].uid, "real");
    }

    #[test]
    fn missing_uid_is_derived_from_device() {
        let file: PortConfigFile = r#"{"ports": [{"device": "/dev/ttyUSB-0"}]}"#.parse().unwrap();
        assert_eq!(file.ports[0].uid, "ttyusb_0");
    }

    #[test]
    fn validation_collects_every_problem() {
        let err = r#"{"ports": [
            {"uid": "a", "device": "/dev/a", "baud": 12345},
            {"uid": "b", "device": "/dev/b", "databits": 9, "maxlen": 0},
            {"uid": "c", "device": "/dev/c"},
            {"uid": "c", "device": "/dev/d"}
        ]}"#
        .parse::<PortConfigFile>()
        .unwrap_err();
        let ConfigError::Validation { details } = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(details.contains("unsupported baud rate 12345"));
        assert!(details.contains("data bits must be 5-8"));
        assert!(details.contains("maxlen must be 1-1048576, got 0"));
        assert!(details.contains("duplicate port uid 'c'"));
    }

    #[test]
    fn oversized_maxlen_in_file_is_rejected() {
        let err = r#"[{"uid": "BIG", "device": "/dev/a", "maxlen": 1152921504606846976}]"#
            .parse::<PortConfigFile>()
            .unwrap_err();
        let ConfigError::Validation { details } = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(details.contains("port 'BIG': maxlen must be 1-1048576"));
    }

    #[test]
    fn missing_ports_array_is_rejected() {
        let err = r#"{"devices": []}"#.parse::<PortConfigFile>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_reports_path_on_parse_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = PortConfigFile::load(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ports": [{{"uid": "U1", "device": "/dev/ttyS1", "mindelay": 20}}]}}"#
        )
        .unwrap();
        let loaded = PortConfigFile::load(file.path()).unwrap();
        assert_eq!(loaded.ports[0].min_delay(), Duration::from_millis(20));
    }

    #[test]
    fn port_config_validate_bounds_capacity() {
        let port = PortConfig::new("U1", "/dev/ttyS1").with_maxlen(0);
        assert!(port.validate().is_err());
        let port = PortConfig::new("U1", "/dev/ttyS1").with_maxlen(MAX_MAXLEN + 1);
        assert!(port.validate().is_err());
        assert!(PortConfig::new("U1", "/dev/ttyS1").with_maxlen(MAX_MAXLEN).validate().is_ok());
        assert!(PortConfig::new("U1", "/dev/ttyS1").validate().is_ok());
        assert!(PortConfig::new(" ", "/dev/ttyS1").validate().is_err());
    }

    #[test]
    fn ipc_addresses_are_rooted_in_directory() {
        let addrs = BusAddresses::ipc_in(Path::new("/tmp/bus"));
        assert_eq!(addrs.north, "ipc:///tmp/bus/north.ipc");
        assert_eq!(addrs.south, "ipc:///tmp/bus/south.ipc");
        assert_eq!(BusAddresses::default().north, DEFAULT_NORTH_URL);
    }
}
