//! Command frames sent to the adapter

use obd_core::{MetricKind, PollClass};

use crate::codec::byte_to_hex_ascii;

/// Mode 01: show current data
pub const MODE_CURRENT_DATA: u8 = 0x01;

/// Frame terminator (carriage return)
pub const TERMINATOR: u8 = 0x0D;

/// Adapter configuration commands issued once per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtCommand {
    /// `ATZ` - full adapter reset
    Reset,
    /// `ATE0` - disable command echo
    EchoOff,
    /// `ATSP6` - ISO 15765-4 CAN, 11-bit ID, 500 kbaud
    SetProtocol,
}

/// Initialization order after the characteristic becomes ready
pub const INIT_SEQUENCE: [AtCommand; 3] =
    [AtCommand::Reset, AtCommand::EchoOff, AtCommand::SetProtocol];

impl AtCommand {
    pub fn frame(&self) -> &'static [u8] {
        match self {
            AtCommand::Reset => b"ATZ\r",
            AtCommand::EchoOff => b"ATE0\r",
            AtCommand::SetProtocol => b"ATSP6\r",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AtCommand::Reset => "ATZ",
            AtCommand::EchoOff => "ATE0",
            AtCommand::SetProtocol => "ATSP6",
        }
    }
}

/// A mode-01 request for one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidCommand {
    kind: MetricKind,
    class: PollClass,
    frame: [u8; 5],
}

impl PidCommand {
    pub fn new(kind: MetricKind, class: PollClass) -> Self {
        let [m_hi, m_lo] = byte_to_hex_ascii(MODE_CURRENT_DATA);
        let [p_hi, p_lo] = byte_to_hex_ascii(kind.pid());
        Self {
            kind,
            class,
            frame: [m_hi, m_lo, p_hi, p_lo, TERMINATOR],
        }
    }

    /// Wire bytes, including the terminator
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn pid(&self) -> u8 {
        self.kind.pid()
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn class(&self) -> PollClass {
        self.class
    }
}

impl std::fmt::Display for PidCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Frame is ASCII by construction; drop the terminator
        for &b in &self.frame[..4] {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(MetricKind::Speed, b"010D\r")]
    #[case(MetricKind::EngineRpm, b"010C\r")]
    #[case(MetricKind::FuelLevel, b"012F\r")]
    #[case(MetricKind::CoolantTemp, b"0105\r")]
    fn test_pid_frames(#[case] kind: MetricKind, #[case] expected: &[u8]) {
        let cmd = PidCommand::new(kind, PollClass::Fast);
        assert_eq!(cmd.frame(), expected);
        assert_eq!(cmd.pid(), kind.pid());
    }

    #[test]
    fn test_init_frames() {
        let frames: Vec<&[u8]> = INIT_SEQUENCE.iter().map(|c| c.frame()).collect();
        let expected: Vec<&[u8]> = vec![b"ATZ\r", b"ATE0\r", b"ATSP6\r"];
        assert_eq!(frames, expected);
    }

    #[test]
    fn test_display_omits_terminator() {
        let cmd = PidCommand::new(MetricKind::FuelLevel, PollClass::Slow);
        assert_eq!(cmd.to_string(), "012F");
        assert_eq!(cmd.class(), PollClass::Slow);
    }
}
