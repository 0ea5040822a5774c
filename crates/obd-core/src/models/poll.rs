//! Polling classes

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Priority/interval bucket grouping metrics by refresh rate
///
/// Declaration order is priority order: when several classes are due on
/// the same tick, `Fast` goes first and `Slow` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollClass {
    Fast,
    Medium,
    Slow,
}

impl PollClass {
    /// All classes in priority order
    pub const PRIORITY: [PollClass; 3] = [PollClass::Fast, PollClass::Medium, PollClass::Slow];

    /// Built-in refresh interval
    pub fn default_interval(&self) -> Duration {
        match self {
            PollClass::Fast => Duration::from_millis(100),
            PollClass::Medium => Duration::from_millis(1000),
            PollClass::Slow => Duration::from_millis(10_000),
        }
    }

    /// Index into per-class tables
    pub fn index(&self) -> usize {
        match self {
            PollClass::Fast => 0,
            PollClass::Medium => 1,
            PollClass::Slow => 2,
        }
    }
}

impl std::fmt::Display for PollClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PollClass::Fast => "fast",
            PollClass::Medium => "medium",
            PollClass::Slow => "slow",
        };
        f.write_str(s)
    }
}
