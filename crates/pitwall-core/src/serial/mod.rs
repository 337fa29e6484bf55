//! Serial telemetry configuration and frame decoding.
//!
//! The car radios Motec data over a transparent serial bridge, so the byte
//! stream is whatever the CAN-to-serial converter emits: either CSV text
//! lines or length-prefixed binary frames. Decoding is pure (buffer in,
//! channels out) so the reader task stays a thin I/O loop.

mod csv;
mod motec;

pub use csv::parse_csv_line;
pub use motec::{crc16_ccitt, MotecDecoder, MOTEC_SYNC};

use serde::{Deserialize, Serialize};

/// Wire format of the serial stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialFormat {
    Csv,
    MotecBinary,
    Auto,
}

impl SerialFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::MotecBinary => "motec_binary",
            Self::Auto => "auto",
        }
    }
}

/// Connection state of the modem link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ModemState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

/// Which telemetry source feeds the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePreference {
    Auto,
    Serial,
    Simulated,
}

impl SourcePreference {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Serial => "serial",
            Self::Simulated => "simulated",
        }
    }
}

impl std::str::FromStr for SourcePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "serial" => Ok(Self::Serial),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("Source must be one of: auto, serial, simulated (got '{other}')")),
        }
    }
}

/// Baud rates the modem hardware supports.
pub const VALID_BAUD_RATES: [u32; 10] = [
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115_200, 230_400, 460_800,
];

/// Serial link configuration (singleton, persisted in settings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_format: SerialFormat,
    /// Positional mapping of CSV columns onto sensor ids.
    pub csv_channel_order: Vec<String>,
    pub csv_separator: String,
    /// Read timeout, seconds.
    pub timeout: f64,
    /// Delay before re-opening the port after a fault, seconds.
    pub reconnect_interval: f64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            data_format: SerialFormat::Csv,
            csv_channel_order: [
                "speed",
                "rpm",
                "throttle",
                "brake_pressure",
                "coolant_temp",
                "oil_temp",
                "intake_temp",
                "exhaust_temp",
                "g_lateral",
                "g_longitudinal",
                "wheel_fl",
                "wheel_fr",
                "wheel_rl",
                "wheel_rr",
                "battery_voltage",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            csv_separator: ",".to_string(),
            timeout: 2.0,
            reconnect_interval: 5.0,
        }
    }
}

impl SerialConfig {
    /// Validates configured limits.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message suitable for a 400 response.
    pub fn validate(&self) -> Result<(), String> {
        if self.port.len() > 256 {
            return Err("Port path is too long".to_string());
        }
        if !VALID_BAUD_RATES.contains(&self.baud_rate) {
            let allowed = VALID_BAUD_RATES
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!("Baud rate must be one of: {allowed}"));
        }
        if !(0.1..=60.0).contains(&self.timeout) {
            return Err("Timeout must be between 0.1 and 60 seconds".to_string());
        }
        if !(1.0..=300.0).contains(&self.reconnect_interval) {
            return Err("Reconnect interval must be between 1 and 300 seconds".to_string());
        }
        if self.csv_separator.is_empty() || self.csv_separator.len() > 5 {
            return Err("CSV separator must be 1 to 5 characters".to_string());
        }
        Ok(())
    }
}

/// Number of bytes peeked for format auto-detection.
pub const AUTO_DETECT_PEEK: usize = 256;

/// Decides the wire format from an initial peek at the stream.
///
/// Mostly-printable ASCII containing a line terminator is CSV; anything
/// else is treated as Motec binary.
#[must_use]
pub fn detect_format(peek: &[u8]) -> SerialFormat {
    if peek.is_empty() {
        return SerialFormat::MotecBinary;
    }
    let printable = peek
        .iter()
        .filter(|b| b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .count();
    let has_terminator = peek.contains(&b'\n');
    if printable * 100 >= peek.len() * 80 && has_terminator {
        SerialFormat::Csv
    } else {
        SerialFormat::MotecBinary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        SerialConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = SerialConfig::default();
        cfg.baud_rate = 9601;
        assert!(cfg.validate().is_err());

        let mut cfg = SerialConfig::default();
        cfg.timeout = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = SerialConfig::default();
        cfg.reconnect_interval = 500.0;
        assert!(cfg.validate().is_err());

        let mut cfg = SerialConfig::default();
        cfg.csv_separator = "::::::".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_detect_csv() {
        let peek = b"101.5,9300,45.2,0.0\n102.1,9400,47.9,0.0\n";
        assert_eq!(detect_format(peek), SerialFormat::Csv);
    }

    #[test]
    fn test_detect_binary() {
        let peek = [0xAA, 0xF0, 0x05, 0x04, 0x01, 0x02, 0x03, 0x04, 0x9c, 0x11];
        assert_eq!(detect_format(&peek), SerialFormat::MotecBinary);
    }

    #[test]
    fn test_printable_without_newline_is_binary() {
        assert_eq!(detect_format(b"123,456,789"), SerialFormat::MotecBinary);
    }

    #[test]
    fn test_format_serde_spelling() {
        assert_eq!(
            serde_json::to_string(&SerialFormat::MotecBinary).unwrap(),
            "\"motec_binary\""
        );
        assert_eq!(
            serde_json::to_string(&ModemState::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }
}
