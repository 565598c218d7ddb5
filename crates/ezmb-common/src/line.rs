//! ---
//! ezmb_section: "01-core-functionality"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Serial line parameters with range validation."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
//! Serial line parameters.
//!
//! Every type here only admits values the serial driver can apply exactly.
//! Unsupported baud rates are rejected rather than rounded to the nearest
//! standard rate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Baud rate restricted to the standard POSIX set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BaudRate(u32);

impl BaudRate {
    /// Every rate accepted by [`BaudRate::new`].
    pub const SUPPORTED: [u32; 30] = [
        50, 75, 110, 134, 150, 200, 300, 600, 1_200, 1_800, 2_400, 4_800, 9_600, 19_200, 38_400,
        57_600, 115_200, 230_400, 460_800, 500_000, 576_000, 921_600, 1_000_000, 1_152_000,
        1_500_000, 2_000_000, 2_500_000, 3_000_000, 3_500_000, 4_000_000,
    ];

    /// Validate `rate` against the supported set.
    pub fn new(rate: u32) -> Result<Self, ConfigError> {
        if Self::SUPPORTED.contains(&rate) {
            Ok(Self(rate))
        } else {
            Err(ConfigError::invalid(format!("unsupported baud rate {rate}")))
        }
    }

    /// Raw rate in bits per second.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self(115_200)
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BaudRate> for u32 {
    fn from(value: BaudRate) -> Self {
        value.0
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Character size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    /// 5 bits per character.
    Five,
    /// 6 bits per character.
    Six,
    /// 7 bits per character.
    Seven,
    /// 8 bits per character.
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ConfigError::invalid(format!(
                "data bits must be 5-8, got {other}"
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ConfigError::invalid(format!(
                "stop bits must be 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Parity checking mode.
///
/// Parsed from the first character of the input, case-insensitively, so
/// `"n"`, `"N"` and `"none"` are equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

impl Parity {
    /// Lower-case label used in serialized descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
        }
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('n') => Ok(Parity::None),
            Some('e') => Ok(Parity::Even),
            Some('o') => Ok(Parity::Odd),
            _ => Err(ConfigError::invalid(format!(
                "parity must be one of n/e/o, got {s:?}"
            ))),
        }
    }
}

impl TryFrom<String> for Parity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Parity> for String {
    fn from(value: Parity) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line discipline applied to an open serial descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineConfig {
    /// Baud rate.
    #[serde(default)]
    pub baud: BaudRate,
    /// Character size.
    #[serde(default)]
    pub databits: DataBits,
    /// Stop bits.
    #[serde(default)]
    pub stopbits: StopBits,
    /// Parity mode.
    #[serde(default)]
    pub parity: Parity,
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud,
            u8::from(self.databits),
            parity,
            u8::from(self.stopbits)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_rate_rejects_non_standard_values() {
        assert_eq!(BaudRate::new(9_600).unwrap().get(), 9_600);
        assert_eq!(BaudRate::new(4_000_000).unwrap().get(), 4_000_000);
        let err = BaudRate::new(12_345).unwrap_err();
        assert!(err.to_string().contains("12345"));
        assert!(BaudRate::new(0).is_err());
    }

    #[test]
    fn data_and_stop_bits_are_range_checked() {
        assert_eq!(DataBits::try_from(5).unwrap(), DataBits::Five);
        assert!(DataBits::try_from(4).is_err());
        assert!(DataBits::try_from(9).is_err());
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(0).is_err());
        assert!(StopBits::try_from(3).is_err());
    }

    #[test]
    fn parity_accepts_first_letter_case_insensitively() {
        assert_eq!("N".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("none".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("Even".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("o".parse::<Parity>().unwrap(), Parity::Odd);
        assert!("x".parse::<Parity>().is_err());
        assert!("".parse::<Parity>().is_err());
    }

    #[test]
    fn line_config_serde_uses_descriptor_field_names() {
        let line: LineConfig =
            serde_json::from_str(r#"{"baud": 9600, "databits": 7, "stopbits": 2, "parity": "e"}"#)
                .unwrap();
        assert_eq!(line.baud.get(), 9_600);
        assert_eq!(line.databits, DataBits::Seven);
        assert_eq!(line.stopbits, StopBits::Two);
        assert_eq!(line.parity, Parity::Even);
        assert_eq!(line.to_string(), "9600 7E2");

        let encoded = serde_json::to_value(line).unwrap();
        assert_eq!(encoded["parity"], "even");
        assert_eq!(encoded["baud"], 9600);
    }

    #[test]
    fn line_config_defaults_to_115200_8n1() {
        let line: LineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(line, LineConfig::default());
        assert_eq!(line.to_string(), "115200 8N1");
    }
}
