//! Retry / timeout state machine
//!
//! Connection failures and response timeouts are transient: the request
//! stays at the front of the queue and is tried again while budget
//! remains. Any other outcome finalizes the request on first occurrence.
//! The budget is restored after every finalization.

use tracing::{debug, warn};

use crate::constants::RETRIES;
use crate::error::ModbusError;
use crate::message::ModbusMessage;

/// Where the current request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    AwaitingResponse,
    Success,
    RetryableFailure,
    FatalFailure,
}

/// Result of one attempt
#[derive(Debug)]
pub enum Attempt {
    /// No connection could be established (or it broke while sending)
    ConnectFailed,
    /// Whatever the receive step produced, errors included
    Response(ModbusMessage),
}

/// What the worker does next with the front entry
#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    /// Keep the entry queued and try again
    Retry { reconnect: bool },
    /// Deliver this outcome and pop the entry
    Finalize(ModbusMessage),
}

#[derive(Debug)]
pub struct RetryController {
    budget: u8,
    remaining: u8,
    phase: Phase,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RETRIES)
    }
}

impl RetryController {
    pub fn new(budget: u8) -> Self {
        Self {
            budget,
            remaining: budget,
            phase: Phase::Idle,
        }
    }

    pub fn sending(&mut self) {
        self.phase = Phase::Sending;
    }

    pub fn awaiting_response(&mut self) {
        self.phase = Phase::AwaitingResponse;
    }

    /// Classify an attempt for `request`
    pub fn decide(&mut self, request: &ModbusMessage, attempt: Attempt) -> Decision {
        match attempt {
            Attempt::ConnectFailed => {
                if self.take_retry() {
                    warn!("Retry on connect failure ({} left)", self.remaining);
                    Decision::Retry { reconnect: true }
                } else {
                    self.phase = Phase::FatalFailure;
                    Decision::Finalize(ModbusMessage::error_for(
                        request.server_id(),
                        request.function_code(),
                        ModbusError::IpConnectionFailed,
                    ))
                }
            },
            Attempt::Response(response) => match response.error() {
                ModbusError::Success => {
                    self.phase = Phase::Success;
                    Decision::Finalize(response)
                },
                ModbusError::Timeout => {
                    if self.take_retry() {
                        warn!("Retry on timeout ({} left)", self.remaining);
                        Decision::Retry { reconnect: false }
                    } else {
                        self.phase = Phase::FatalFailure;
                        Decision::Finalize(response)
                    }
                },
                other => {
                    debug!("Not retried: {}", other);
                    self.phase = Phase::FatalFailure;
                    Decision::Finalize(response)
                },
            },
        }
    }

    fn take_retry(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.phase = Phase::RetryableFailure;
        true
    }

    /// Restore the budget after a finalization
    pub fn reset(&mut self) {
        self.remaining = self.budget;
        self.phase = Phase::Idle;
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}
