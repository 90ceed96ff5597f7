//! Job Phase State Machine (Pure Domain Logic)
//!
//! - `Phase` enum for the five working stages plus three terminal markers
//! - Pure transition validation (no DB, no async, no side effects)
//! - Normalization of stored phase text, including the legacy `genid` alias
//!
//! # State Machine
//!
//! ```text
//! queue -> submit -> progress -> publish -> watermark -> done
//!   |        |          |          |            |
//!   v        v          v          v            v
//!          failed / canceled (from each working state)
//! ```
//!
//! Terminal states: `done`, `failed`, `canceled`

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STATE MACHINE ERROR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error type for phase transitions absent from the transition table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid phase transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PHASE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stage of a job inside the fixed five-stage pipeline.
///
/// Valid transitions:
/// - queue -> submit
/// - submit -> progress
/// - progress -> publish
/// - publish -> watermark
/// - watermark -> done
/// - `queue|submit|progress|publish|watermark` -> failed
/// - `queue|submit|progress|publish|watermark` -> canceled
///
/// Terminal states (no outgoing transitions): done, failed, canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for a worker.
    Queue,
    /// Sending the generation request.
    Submit,
    /// Polling the remote task until it settles.
    Progress,
    /// Sharing the finished artifact.
    Publish,
    /// Running the external watermark removal.
    Watermark,
    /// Finished successfully.
    Done,
    /// Finished with an unrecoverable error.
    Failed,
    /// Canceled by an operator.
    Canceled,
}

impl Phase {
    /// Returns the string representation of this phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Submit => "submit",
            Self::Progress => "progress",
            Self::Publish => "publish",
            Self::Watermark => "watermark",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Returns true if this phase is terminal (no valid outgoing transitions).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    /// The phase that follows a successful execution of `self`.
    #[must_use]
    pub const fn default_next(&self) -> Option<Self> {
        match self {
            Self::Queue => Some(Self::Submit),
            Self::Submit => Some(Self::Progress),
            Self::Progress => Some(Self::Publish),
            Self::Publish => Some(Self::Watermark),
            Self::Watermark => Some(Self::Done),
            Self::Done | Self::Failed | Self::Canceled => None,
        }
    }

    /// Allowed targets for `self` in the static transition table.
    #[must_use]
    pub const fn allowed_targets(&self) -> &'static [Self] {
        match self {
            Self::Queue => &[Self::Submit, Self::Failed, Self::Canceled],
            Self::Submit => &[Self::Progress, Self::Failed, Self::Canceled],
            Self::Progress => &[Self::Publish, Self::Failed, Self::Canceled],
            Self::Publish => &[Self::Watermark, Self::Failed, Self::Canceled],
            Self::Watermark => &[Self::Done, Self::Failed, Self::Canceled],
            Self::Done | Self::Failed | Self::Canceled => &[],
        }
    }

    /// Returns true if a transition from `self` to `target` is in the table.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Validates that a transition from `self` to `target` is allowed.
    pub fn validate_transition(&self, target: Self) -> std::result::Result<(), TransitionError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }

    /// Returns all phases as a slice.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Queue,
            Self::Submit,
            Self::Progress,
            Self::Publish,
            Self::Watermark,
            Self::Done,
            Self::Failed,
            Self::Canceled,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queue" => Ok(Self::Queue),
            "submit" => Ok(Self::Submit),
            "progress" => Ok(Self::Progress),
            "publish" => Ok(Self::Publish),
            "watermark" => Ok(Self::Watermark),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(Error::ParseError(format!("Invalid phase: {s}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STATE MACHINE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Phase transition gate used by the engine after every successful phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMachine;

impl StateMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Normalize stored phase text. Blank or unknown text maps to `queue`,
    /// and the legacy `genid` stage folds into `progress`.
    #[must_use]
    pub fn normalize_phase(&self, raw: &str) -> Phase {
        let text = raw.trim().to_ascii_lowercase();
        if text == "genid" {
            return Phase::Progress;
        }
        Phase::from_str(&text).unwrap_or(Phase::Queue)
    }

    /// Fail unless `target` is an allowed successor of `current`, after
    /// normalizing both.
    pub fn assert_transition(&self, current: &str, target: &str) -> Result<()> {
        let from = self.normalize_phase(current);
        let to = self.normalize_phase(target);
        from.validate_transition(to).map_err(Error::from)
    }

    /// Typed variant of [`Self::assert_transition`].
    pub fn assert_phase_transition(&self, current: Phase, target: Phase) -> Result<()> {
        current.validate_transition(target).map_err(Error::from)
    }
}
