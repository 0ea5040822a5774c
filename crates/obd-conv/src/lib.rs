//! obd-conv - Wire conversions for ELM327-style OBD-II adapters
//!
//! Everything here is synchronous and side-effect free: turning bytes into
//! uppercase ASCII-hex and back, building the fixed command frames, and
//! decoding an adapter reply into a typed [`Metric`](obd_core::Metric).
//!
//! # Wire format
//!
//! Requests are ASCII, no spaces, terminated by a carriage return:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `ATZ\r` | Reset adapter |
//! | `ATE0\r` | Echo off |
//! | `ATSP6\r` | Protocol 6 (ISO 15765-4 CAN 11/500) |
//! | `010D\r` | Vehicle speed |
//! | `010C\r` | Engine RPM |
//! | `012F\r` | Fuel tank level |
//! | `0105\r` | Coolant temperature |
//!
//! Replies arrive as one frame per notification, space separated:
//!
//! ```text
//! offset  0 1 2 3 4 5 6 7 8 9 10
//!         4 1 _ 0 C _ 1 A _ F 8      -> RPM, A=0x1A B=0xF8
//!         C A N _ E R R O R          -> adapter error ("ERRO" at 4..8)
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use obd_conv::{PidCommand, ResponseParser};
//! use obd_core::{MetricKind, PollClass};
//!
//! let cmd = PidCommand::new(MetricKind::EngineRpm, PollClass::Fast);
//! assert_eq!(cmd.frame(), b"010C\r");
//!
//! let parser = ResponseParser::default();
//! let metric = parser.parse(b"41 0C 1A F8", Some(&cmd)).unwrap();
//! assert_eq!(metric.value, 1726);
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod parser;

pub use codec::{byte_to_hex_ascii, hex_ascii_to_byte};
pub use command::{AtCommand, PidCommand, INIT_SEQUENCE};
pub use error::{ErrorKind, HexError, ParseError};
pub use parser::{ResponseParser, DEFAULT_TANK_CAPACITY_L};
