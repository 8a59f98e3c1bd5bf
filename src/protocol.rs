//! Pump 33 ASCII protocol: command codes, framing and response parsing.
//!
//! Reference: Harvard Apparatus Pump 33 User's Manual
//!
//! Protocol Overview:
//! - Format: ASCII command lines, optionally prefixed with the pump address
//! - Baud: 9600, 8 data bits, no parity, 2 stop bits
//! - Terminator: CR (\r) on commands
//! - Example: "1RAT 5000 UM\r" (address 1, set rate to 5000 µl/min)
//!
//! Every reply ends with a prompt made of the address and one marker character
//! giving the pump state (`:` stopped, `>` infusing, `<` refilling, `*` stalled).
//! Query replies put their value on a line before the prompt:
//!
//! ```text
//! \r\n5000.0\r\n1:
//! ```
//!
//! The functions here never touch the wire. They build outgoing frames and turn
//! decoded reply text into typed values, returning [`ParseError`] when the text
//! does not hold what was asked for.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Terminator appended to every outgoing command.
pub const COMMAND_TERMINATOR: char = '\r';

/// Size of the buffer a single reply is read into.
pub const RESPONSE_BUFFER_LEN: usize = 64;

/// Significant digits used for rate and diameter arguments.
pub const SIGNIFICANT_DIGITS: usize = 5;

/// Unit suffix for rates (µl/min).
pub const RATE_UNIT: &str = "UM";

/// Reply fragment the pump uses to reject a numeric argument.
pub const OUT_OF_RANGE_MARKER: &str = "OOR";

/// Highest address the pump accepts.
pub const MAX_ADDRESS: u8 = 99;

/// A reply that could not be mapped to the expected value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not parse {expected} from pump response {raw:?}")]
pub struct ParseError {
    /// What the caller was trying to read.
    pub expected: &'static str,
    /// The text that was received.
    pub raw: String,
}

impl ParseError {
    /// Create a parse error for `expected` with the offending text.
    pub fn new(expected: &'static str, raw: impl Into<String>) -> Self {
        Self {
            expected,
            raw: raw.into(),
        }
    }
}

/// Bus address of a pump (0-99).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PumpAddress(u8);

impl PumpAddress {
    /// Validate and wrap an address.
    pub fn new(address: u8) -> Result<Self, ParseError> {
        if address > MAX_ADDRESS {
            return Err(ParseError::new("pump address (0-99)", address.to_string()));
        }
        Ok(Self(address))
    }

    /// The numeric address.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for PumpAddress {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u8> for PumpAddress {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PumpAddress> for u8 {
    fn from(value: PumpAddress) -> Self {
        value.0
    }
}

impl fmt::Display for PumpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pumping direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpDirection {
    /// Push the plunger in.
    Infuse,
    /// Pull the plunger out.
    Refill,
    /// Swap whichever direction is current.
    Reverse,
}

impl PumpDirection {
    /// Three letter device code.
    pub fn code(self) -> &'static str {
        match self {
            PumpDirection::Infuse => "INF",
            PumpDirection::Refill => "REF",
            PumpDirection::Reverse => "REV",
        }
    }
}

impl fmt::Display for PumpDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PumpDirection {
    type Err = ParseError;

    /// Accepts the device code or the full name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_word(s).as_str() {
            "INF" | "INFUSE" => Ok(PumpDirection::Infuse),
            "REF" | "REFILL" => Ok(PumpDirection::Refill),
            "REV" | "REVERSE" => Ok(PumpDirection::Reverse),
            _ => Err(ParseError::new("pump direction", s)),
        }
    }
}

/// Pumping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpMode {
    /// Stop when the target volume is reached.
    AutoStop,
    /// Both syringes move in proportion.
    Proportional,
    /// Continuous infuse/refill cycling.
    Continuous,
}

impl PumpMode {
    /// All modes, in device order.
    pub const ALL: [PumpMode; 3] = [
        PumpMode::AutoStop,
        PumpMode::Proportional,
        PumpMode::Continuous,
    ];

    /// Three letter device code.
    pub fn code(self) -> &'static str {
        match self {
            PumpMode::AutoStop => "AUT",
            PumpMode::Proportional => "PRO",
            PumpMode::Continuous => "CON",
        }
    }
}

impl fmt::Display for PumpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PumpMode {
    type Err = ParseError;

    /// Accepts the device code or a spelled-out name such as `AUTO STOP`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_word(s).as_str() {
            "AUT" | "AUTO STOP" => Ok(PumpMode::AutoStop),
            "PRO" | "PROPORTIONAL" => Ok(PumpMode::Proportional),
            "CON" | "CONTINUOUS" => Ok(PumpMode::Continuous),
            _ => Err(ParseError::new("pump mode", s)),
        }
    }
}

/// Operating state reported in the pump prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpState {
    /// `:` prompt.
    Stopped,
    /// `>` prompt.
    Infusing,
    /// `<` prompt.
    Refilling,
    /// `*` prompt.
    Stalled,
}

impl PumpState {
    /// Classify a prompt marker character.
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ':' => Some(PumpState::Stopped),
            '>' => Some(PumpState::Infusing),
            '<' => Some(PumpState::Refilling),
            '*' => Some(PumpState::Stalled),
            _ => None,
        }
    }

    /// The prompt marker for this state.
    pub fn marker(self) -> char {
        match self {
            PumpState::Stopped => ':',
            PumpState::Infusing => '>',
            PumpState::Refilling => '<',
            PumpState::Stalled => '*',
        }
    }
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PumpState::Stopped => "stopped",
            PumpState::Infusing => "infusing",
            PumpState::Refilling => "refilling",
            PumpState::Stalled => "stalled",
        };
        f.write_str(name)
    }
}

// Upper-cased with runs of whitespace collapsed to one space.
fn normalize_word(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

/// Build the bytes-on-the-wire form of `command`.
///
/// The address, when given, is written in decimal directly before the command
/// and a single carriage return closes the line.
pub fn frame_command(address: Option<PumpAddress>, command: &str) -> String {
    match address {
        Some(address) => format!("{}{}{}", address, command, COMMAND_TERMINATOR),
        None => format!("{}{}", command, COMMAND_TERMINATOR),
    }
}

/// Format `value` with `digits` significant digits, `%g` style.
///
/// Trailing zeros are dropped; exponent notation is used only for very small or
/// very large magnitudes (`5000.0` gives `5000`, `123456.0` gives `1.2346e+05`).
pub fn format_significant(value: f64, digits: usize) -> String {
    let digits = digits.max(1);
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }

    // Rounding to `digits` first decides the exponent, as %g does.
    let scientific = format!("{:.*e}", digits - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return scientific;
    };

    let precision = digits as i32;
    if exponent < -4 || exponent >= precision {
        format!("{}e{:+03}", strip_trailing_zeros(mantissa), exponent)
    } else {
        let decimals = (precision - 1 - exponent) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn strip_trailing_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Decode raw reply bytes as ASCII. Non-ASCII bytes become U+FFFD.
pub fn decode_response(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii() {
                char::from(b)
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect()
}

/// The first line of a reply with surrounding control characters removed.
///
/// Leading line breaks are skipped, so `"\r\n33V1.0\r\n1:"` yields `"33V1.0"`.
pub fn first_line(response: &str) -> &str {
    let body = response.trim_start_matches(|c: char| c.is_ascii_control() || c == ' ');
    let end = body.find(|c| c == '\r' || c == '\n').unwrap_or(body.len());
    body[..end].trim_matches(|c: char| c.is_ascii_control() || c.is_whitespace())
}

/// Parse the first token of the first reply line as a number.
pub fn parse_number(response: &str, expected: &'static str) -> Result<f64, ParseError> {
    first_line(response)
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .ok_or_else(|| ParseError::new(expected, response))
}

/// Parse the mode code from a reply.
pub fn parse_mode(response: &str) -> Result<PumpMode, ParseError> {
    first_line(response)
        .parse()
        .map_err(|_| ParseError::new("pump mode", response))
}

/// Parse the direction the pump reports: `INFUSE` or `REFILL`.
pub fn parse_direction(response: &str) -> Result<&str, ParseError> {
    match first_line(response) {
        line @ ("INFUSE" | "REFILL") => Ok(line),
        _ => Err(ParseError::new("pump direction", response)),
    }
}

/// First reply line, which must not be empty.
pub fn parse_text<'a>(response: &'a str, expected: &'static str) -> Result<&'a str, ParseError> {
    match first_line(response) {
        "" => Err(ParseError::new(expected, response)),
        line => Ok(line),
    }
}

/// Classify the pump state from the last marker character in a reply.
///
/// The prompt closes every reply, so the last marker wins. A reply with no
/// marker at all (timeout, garbled read) is an error rather than a guess.
pub fn parse_state(response: &str) -> Result<PumpState, ParseError> {
    response
        .chars()
        .rev()
        .find_map(PumpState::from_marker)
        .ok_or_else(|| ParseError::new("pump state", response))
}

/// True when the pump flagged a numeric argument as out of range.
pub fn is_out_of_range(response: &str) -> bool {
    response.contains(OUT_OF_RANGE_MARKER)
}

/// The reply line when the pump refused the command (`?` or `NA`).
pub fn rejection(response: &str) -> Option<&str> {
    let line = first_line(response);
    match line {
        "?" | "NA" => Some(line),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_command() {
        let address = PumpAddress::new(1).unwrap();
        assert_eq!(frame_command(Some(address), "RAT 5000 UM"), "1RAT 5000 UM\r");
        assert_eq!(frame_command(Some(address), ""), "1\r");
        assert_eq!(frame_command(None, "VER"), "VER\r");
        let far = PumpAddress::new(42).unwrap();
        assert_eq!(frame_command(Some(far), "STP"), "42STP\r");
    }

    #[test]
    fn test_address_validation() {
        assert_eq!(PumpAddress::default().get(), 1);
        assert!(PumpAddress::new(0).is_ok());
        assert!(PumpAddress::new(99).is_ok());
        assert!(PumpAddress::new(100).is_err());
    }

    #[test]
    fn test_format_significant() {
        assert_eq!(format_significant(5000.0, 5), "5000");
        assert_eq!(format_significant(14.5, 5), "14.5");
        assert_eq!(format_significant(12.345678, 5), "12.346");
        assert_eq!(format_significant(0.001, 5), "0.001");
        assert_eq!(format_significant(0.00012345678, 5), "0.00012346");
        assert_eq!(format_significant(0.0000123456, 5), "1.2346e-05");
        assert_eq!(format_significant(123456.0, 5), "1.2346e+05");
        assert_eq!(format_significant(99999.9, 5), "1e+05");
        assert_eq!(format_significant(0.0, 5), "0");
        assert_eq!(format_significant(-2.5, 5), "-2.5");
    }

    #[test]
    fn test_codes_round_trip() {
        for mode in PumpMode::ALL {
            assert_eq!(mode.code().parse::<PumpMode>().unwrap(), mode);
        }
        for direction in [
            PumpDirection::Infuse,
            PumpDirection::Refill,
            PumpDirection::Reverse,
        ] {
            assert_eq!(direction.code().parse::<PumpDirection>().unwrap(), direction);
        }
        assert_eq!("auto stop".parse::<PumpMode>().unwrap(), PumpMode::AutoStop);
        assert_eq!("INFUSE".parse::<PumpDirection>().unwrap(), PumpDirection::Infuse);
        assert!("XY".parse::<PumpMode>().is_err());
        assert!("FOO".parse::<PumpDirection>().is_err());
    }

    #[test]
    fn test_words_starting_with_a_code_are_rejected() {
        assert!("CONFUSED".parse::<PumpMode>().is_err());
        assert!("AUTUMN".parse::<PumpMode>().is_err());
        assert!("PROMPT".parse::<PumpMode>().is_err());
        assert!("INFO".parse::<PumpDirection>().is_err());
        assert!("REFERENCE".parse::<PumpDirection>().is_err());

        assert_eq!("  Auto   Stop ".parse::<PumpMode>().unwrap(), PumpMode::AutoStop);
        assert_eq!("proportional".parse::<PumpMode>().unwrap(), PumpMode::Proportional);
        assert_eq!("Reverse".parse::<PumpDirection>().unwrap(), PumpDirection::Reverse);
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("\r\n33V1.0\r\n1:"), "33V1.0");
        assert_eq!(first_line("33V1.0\r\n"), "33V1.0");
        assert_eq!(first_line("\n INFUSE \r\n1>"), "INFUSE");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("\r\n5000.0\r\n1:", "rate").unwrap(), 5000.0);
        assert_eq!(parse_number("\r\n14.5 mm\r\n1:", "diameter").unwrap(), 14.5);
        assert_eq!(parse_number("1.2e-3\r\n", "rate").unwrap(), 0.0012);

        let err = parse_number("\r\nOOR\r\n1:", "rate").unwrap_err();
        assert_eq!(err.expected, "rate");
        assert!(parse_number("", "rate").is_err());
        assert!(parse_number("NaN", "rate").is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("\r\nPRO\r\n1:").unwrap(), PumpMode::Proportional);
        assert_eq!(parse_mode("\r\nCONTINUOUS\r\n1:").unwrap(), PumpMode::Continuous);
        assert!(parse_mode("\r\n???\r\n1:").is_err());
        assert!(parse_mode("\r\nCONFUSED\r\n1:").is_err());
    }

    #[test]
    fn test_parse_direction_and_text() {
        assert_eq!(parse_direction("\r\nINFUSE\r\n1:").unwrap(), "INFUSE");
        assert_eq!(parse_direction("\r\nREFILL\r\n1<").unwrap(), "REFILL");
        assert!(parse_direction("\r\nINF\r\n1:").is_err());
        assert!(parse_direction("").is_err());

        assert_eq!(parse_text("\r\n33V1.0\r\n1:", "version").unwrap(), "33V1.0");
        let err = parse_text("", "version").unwrap_err();
        assert_eq!(err.expected, "version");
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("\r\n1:").unwrap(), PumpState::Stopped);
        assert_eq!(parse_state("\r\n1>").unwrap(), PumpState::Infusing);
        assert_eq!(parse_state("\r\n1<").unwrap(), PumpState::Refilling);
        assert_eq!(parse_state("\r\n1*").unwrap(), PumpState::Stalled);
        // Value lines before the prompt do not confuse the classifier
        assert_eq!(parse_state("\r\n5000.0\r\n1>").unwrap(), PumpState::Infusing);

        let err = parse_state("").unwrap_err();
        assert_eq!(err.expected, "pump state");
        assert!(parse_state("\r\n12\r\n").is_err());
    }

    #[test]
    fn test_out_of_range_and_rejection() {
        assert!(is_out_of_range("\r\nOOR\r\n1:"));
        assert!(!is_out_of_range("\r\n1:"));
        assert_eq!(rejection("\r\n?\r\n1:"), Some("?"));
        assert_eq!(rejection("\r\nNA\r\n1>"), Some("NA"));
        assert_eq!(rejection("\r\n1:"), None);
    }

    #[test]
    fn test_decode_response() {
        assert_eq!(decode_response(b"\r\n1:"), "\r\n1:");
        assert_eq!(decode_response(&[b'1', 0xFF, b':']), "1\u{FFFD}:");
    }
}
