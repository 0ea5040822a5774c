//! Multi-rate polling scheduler
//!
//! Each [`PollClass`] keeps its own last-fire timestamp. When a class is
//! due its command sequence is queued, and commands leave the queue one at
//! a time: the link is half-duplex, so nothing new is emitted while a
//! command is still waiting for its response.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use obd_conv::PidCommand;
use obd_core::PollClass;
use tracing::{debug, warn};

use crate::config::PollingConfig;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    command: PidCommand,
    sent_at: Instant,
}

#[derive(Debug)]
pub struct Scheduler {
    intervals: [Duration; 3],
    sequences: [Vec<PidCommand>; 3],
    /// `None` means the class has not fired since the last reset
    last_fire: [Option<Instant>; 3],
    queue: VecDeque<PidCommand>,
    in_flight: Option<InFlight>,
    response_timeout: Option<Duration>,
}

impl Scheduler {
    pub fn new(config: &PollingConfig) -> Self {
        let sequence = |class: PollClass| -> Vec<PidCommand> {
            config
                .metrics(class)
                .iter()
                .map(|&kind| PidCommand::new(kind, class))
                .collect()
        };

        Self {
            intervals: PollClass::PRIORITY.map(|class| config.interval(class)),
            sequences: PollClass::PRIORITY.map(sequence),
            last_fire: [None; 3],
            queue: VecDeque::new(),
            in_flight: None,
            response_timeout: config.response_timeout(),
        }
    }

    /// Classes due at `now`, in priority order, marking them as fired
    ///
    /// A class fires at most once per call however long it has been
    /// overdue, and is skipped while commands from its previous firing are
    /// still queued. Nothing is due unless `ready`.
    pub fn due_classes(&mut self, now: Instant, ready: bool) -> Vec<PollClass> {
        if !ready {
            return Vec::new();
        }

        let mut due = Vec::new();
        for class in PollClass::PRIORITY {
            let i = class.index();
            if self.sequences[i].is_empty() || self.queue.iter().any(|c| c.class() == class) {
                continue;
            }
            let elapsed = match self.last_fire[i] {
                Some(last) => now.saturating_duration_since(last) >= self.intervals[i],
                None => true,
            };
            if elapsed {
                self.last_fire[i] = Some(now);
                due.push(class);
            }
        }
        due
    }

    /// Next command to write, if any
    ///
    /// Returns `None` while a command is awaiting its response. When a
    /// response timeout is configured an expired command is abandoned
    /// first.
    pub fn next_command(&mut self, now: Instant, ready: bool) -> Option<PidCommand> {
        if !ready {
            return None;
        }

        if let Some(in_flight) = self.in_flight {
            match self.response_timeout {
                Some(timeout) if now.saturating_duration_since(in_flight.sent_at) >= timeout => {
                    warn!(
                        command = %in_flight.command,
                        timeout_ms = timeout.as_millis() as u64,
                        "No response, abandoning command"
                    );
                    self.in_flight = None;
                }
                _ => return None,
            }
        }

        for class in self.due_classes(now, ready) {
            debug!(%class, "Poll class due");
            self.queue.extend(self.sequences[class.index()].iter().copied());
        }

        let command = self.queue.pop_front()?;
        self.in_flight = Some(InFlight {
            command,
            sent_at: now,
        });
        Some(command)
    }

    /// The command whose response is awaited
    pub fn in_flight(&self) -> Option<&PidCommand> {
        self.in_flight.as_ref().map(|f| &f.command)
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Commands queued behind the one in flight
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The awaited response arrived (or was an adapter error)
    pub fn complete(&mut self) -> Option<PidCommand> {
        self.in_flight.take().map(|f| f.command)
    }

    /// Drop all pending work and restart every class timer
    pub fn reset(&mut self) {
        self.queue.clear();
        self.in_flight = None;
        self.last_fire = [None; 3];
    }
}
