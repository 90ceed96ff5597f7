//! Failure classification.
//!
//! Maps raw failure text (or a crate [`Error`]) onto a structured
//! [`Classification`]. Rules are evaluated in order and the first
//! case-insensitive substring match wins.

use serde::Serialize;
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

use crate::Error;

/// Structured error class recorded on runs, jobs and phase attempts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, IntoStaticStr, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ExecutionContextDestroyed,
    PageClosedExternal,
    NavigationAborted,
    ProfilePreempted,
    AuthExpired,
    IxbrowserBusy,
    UnknownError,
}

/// Remedy applied before a retry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, IntoStaticStr, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecoverAction {
    PageRecreate,
    SessionReconnect,
    SleepRetry,
    Abort,
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub error_class: ErrorClass,
    pub retryable: bool,
    pub recover_action: RecoverAction,
    pub error_code: Option<String>,
}

impl Classification {
    const fn new(error_class: ErrorClass, retryable: bool, recover_action: RecoverAction) -> Self {
        Self {
            error_class,
            retryable,
            recover_action,
            error_code: None,
        }
    }

    fn with_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    const fn abort(error_class: ErrorClass) -> Self {
        Self::new(error_class, false, RecoverAction::Abort)
    }
}

const CLOSED_MARKERS: &[&str] = &[
    "target page, context or browser has been closed",
    "target closed",
    "context has been closed",
    "browser has been closed",
    "connection closed",
];
const PREEMPT_MARKERS: &[&str] = &["profile lock", "profile preempt"];
const AUTH_MARKERS: &[&str] = &["401", "unauthorized", "access token"];
const BUSY_1008_MARKERS: &[&str] = &["1008", "server busy", "ixbrowser busy"];
const BUSY_111003_MARKERS: &[&str] = &["111003", "already open"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Pure failure classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify raw failure text.
    #[must_use]
    pub fn classify_text(&self, text: &str) -> Classification {
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return Classification::abort(ErrorClass::UnknownError);
        }
        if lowered.contains("execution context was destroyed") {
            return Classification::new(
                ErrorClass::ExecutionContextDestroyed,
                true,
                RecoverAction::PageRecreate,
            );
        }
        if contains_any(&lowered, CLOSED_MARKERS) {
            return Classification::new(
                ErrorClass::PageClosedExternal,
                true,
                RecoverAction::SessionReconnect,
            );
        }
        if lowered.contains("net::err_aborted") {
            return Classification::new(
                ErrorClass::NavigationAborted,
                true,
                RecoverAction::SleepRetry,
            );
        }
        if contains_any(&lowered, PREEMPT_MARKERS) {
            return Classification::abort(ErrorClass::ProfilePreempted);
        }
        if contains_any(&lowered, AUTH_MARKERS) {
            return Classification::abort(ErrorClass::AuthExpired);
        }
        if contains_any(&lowered, BUSY_1008_MARKERS) {
            return Classification::new(ErrorClass::IxbrowserBusy, true, RecoverAction::SleepRetry)
                .with_code("1008");
        }
        if contains_any(&lowered, BUSY_111003_MARKERS) {
            return Classification::new(ErrorClass::IxbrowserBusy, true, RecoverAction::SleepRetry)
                .with_code("111003");
        }
        Classification::abort(ErrorClass::UnknownError)
    }

    /// Classify a crate error. Lease loss is always a preemption, cancellation
    /// and ownership failures always abort; everything else is judged by text.
    #[must_use]
    pub fn classify(&self, err: &Error) -> Classification {
        match err {
            Error::LeaseLost { .. } => Classification::abort(ErrorClass::ProfilePreempted),
            Error::Canceled | Error::PermissionDenied { .. } | Error::Transition(_) => {
                Classification::abort(ErrorClass::UnknownError)
            }
            other => self.classify_text(&other.to_string()),
        }
    }
}
