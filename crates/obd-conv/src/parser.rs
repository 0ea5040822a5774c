//! Decoding adapter replies into metrics
//!
//! Fields are read at fixed byte offsets from the start of the frame
//! (see the crate docs for the layout). The parser never looks past the
//! last field it needs, so trailing `\r` and `>` prompt bytes are ignored.

use obd_core::{Metric, MetricKind};

use crate::codec::hex_ascii_to_byte;
use crate::command::PidCommand;
use crate::error::ParseError;

/// Tank size assumed when none is configured
pub const DEFAULT_TANK_CAPACITY_L: u32 = 50;

const MIN_FRAME_LEN: usize = 8;
const ERROR_MARKER: &[u8; 4] = b"ERRO";
const ERROR_MARKER_OFFSET: usize = 4;
const POSITIVE_RESPONSE: &[u8; 2] = b"41";
const PID_OFFSET: usize = 3;
const DATA_A_OFFSET: usize = 6;
const DATA_B_OFFSET: usize = 9;

/// Stateless decoder for mode-01 replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseParser {
    tank_capacity_l: u32,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(DEFAULT_TANK_CAPACITY_L)
    }
}

impl ResponseParser {
    pub fn new(tank_capacity_l: u32) -> Self {
        Self { tank_capacity_l }
    }

    pub fn tank_capacity_l(&self) -> u32 {
        self.tank_capacity_l
    }

    /// Decode one reply frame against the command currently in flight
    ///
    /// The checks run in a fixed order: length, adapter error marker,
    /// positive-response marker, PID match, payload.
    pub fn parse(&self, frame: &[u8], expected: Option<&PidCommand>) -> Result<Metric, ParseError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(ParseError::Truncated {
                len: frame.len(),
                needed: MIN_FRAME_LEN,
            });
        }

        if &frame[ERROR_MARKER_OFFSET..ERROR_MARKER_OFFSET + 4] == ERROR_MARKER {
            return Err(ParseError::AdapterError);
        }

        if &frame[..2] != POSITIVE_RESPONSE {
            return Err(ParseError::UnexpectedResponse);
        }

        let pid = read_byte(frame, PID_OFFSET)?;
        let command = match expected {
            Some(cmd) if cmd.pid() == pid => cmd,
            _ => {
                return Err(ParseError::Mismatch {
                    expected: expected.map(PidCommand::pid),
                    actual: pid,
                })
            }
        };

        let value = match command.kind() {
            MetricKind::Speed => i32::from(read_byte(frame, DATA_A_OFFSET)?),
            MetricKind::EngineRpm => {
                let a = u32::from(read_byte(frame, DATA_A_OFFSET)?);
                let b = u32::from(read_byte(frame, DATA_B_OFFSET)?);
                // quarter-rpm resolution, fraction truncated
                (((a << 8) | b) / 4) as i32
            }
            MetricKind::FuelLevel => {
                let a = u64::from(read_byte(frame, DATA_A_OFFSET)?);
                // percent = A*100/255, litres = percent*capacity/100
                let litres = a * u64::from(self.tank_capacity_l) / 255;
                i32::try_from(litres).unwrap_or(i32::MAX)
            }
            MetricKind::CoolantTemp => i32::from(read_byte(frame, DATA_A_OFFSET)?) - 40,
        };

        Ok(Metric::new(command.kind(), value))
    }
}

fn read_byte(frame: &[u8], offset: usize) -> Result<u8, ParseError> {
    if frame.len() < offset + 2 {
        return Err(ParseError::Truncated {
            len: frame.len(),
            needed: offset + 2,
        });
    }
    hex_ascii_to_byte(frame[offset], frame[offset + 1])
        .map_err(|source| ParseError::InvalidHex { offset, source })
}
