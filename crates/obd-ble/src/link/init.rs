//! Adapter initialization sequence
//!
//! After the link becomes ready the adapter is reset, echo is turned off
//! and the CAN protocol is selected. The adapter has no flow control, so
//! each step waits for a fixed delay; when prompt tracking is enabled the
//! `>` prompt ends the wait early.

use std::time::{Duration, Instant};

use obd_conv::{AtCommand, INIT_SEQUENCE};

use crate::config::InitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inactive,
    Settling { since: Instant },
    Awaiting { step: usize, sent_at: Instant, prompted: bool },
    Complete,
}

/// What the driver should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Sequence not running (not started, or already complete)
    Inactive,
    /// Waiting for the current delay or prompt
    Wait,
    /// Write this command now
    Send(AtCommand),
    /// The sequence completed on this call
    Finished,
}

#[derive(Debug, Clone)]
pub struct InitSequence {
    phase: Phase,
    settle_delay: Duration,
    step_delay: Duration,
    advance_on_prompt: bool,
}

impl InitSequence {
    pub fn new(config: &InitConfig) -> Self {
        Self {
            phase: Phase::Inactive,
            settle_delay: config.settle_delay(),
            step_delay: config.step_delay(),
            advance_on_prompt: config.advance_on_prompt,
        }
    }

    /// Begin the sequence; the first command goes out after the settle delay
    pub fn start(&mut self, now: Instant) {
        self.phase = Phase::Settling { since: now };
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Inactive;
    }

    /// Started and not yet complete
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Settling { .. } | Phase::Awaiting { .. })
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Feed a notification received while the sequence is running
    pub fn on_response(&mut self, data: &[u8]) {
        if !self.advance_on_prompt {
            return;
        }
        if let Phase::Awaiting { prompted, .. } = &mut self.phase {
            if data.contains(&b'>') {
                *prompted = true;
            }
        }
    }

    /// Advance the sequence
    pub fn poll(&mut self, now: Instant) -> InitStep {
        match self.phase {
            Phase::Inactive | Phase::Complete => InitStep::Inactive,
            Phase::Settling { since } => {
                if now.saturating_duration_since(since) < self.settle_delay {
                    return InitStep::Wait;
                }
                self.phase = Phase::Awaiting {
                    step: 0,
                    sent_at: now,
                    prompted: false,
                };
                InitStep::Send(INIT_SEQUENCE[0])
            }
            Phase::Awaiting {
                step,
                sent_at,
                prompted,
            } => {
                if !prompted && now.saturating_duration_since(sent_at) < self.step_delay {
                    return InitStep::Wait;
                }
                let next = step + 1;
                match INIT_SEQUENCE.get(next) {
                    Some(&command) => {
                        self.phase = Phase::Awaiting {
                            step: next,
                            sent_at: now,
                            prompted: false,
                        };
                        InitStep::Send(command)
                    }
                    None => {
                        self.phase = Phase::Complete;
                        InitStep::Finished
                    }
                }
            }
        }
    }
}
