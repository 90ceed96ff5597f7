//! Domain records and the timestamp encoding shared by the store.

pub mod records;
pub mod status;

use chrono::{DateTime, SecondsFormat, Utc};

pub use self::{
    records::{
        Job, JobFilter, JobPatch, NewJob, NewPhaseAttempt, NewRun, NewTimelineEvent,
        PhaseAttempt, PhaseAttemptSummary, Run, RunPatch, TimelineEvent, DEFAULT_PRIORITY,
    },
    status::{AttemptOutcome, JobStatus, RunStatus, TimelineEventType, WatermarkStatus},
};
pub use crate::engine::state_machine::Phase;
use crate::{Error, Result};

/// Encode a timestamp as fixed-width RFC3339 so lexical order is time order.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a stored timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::ParseError(format!("Invalid timestamp '{raw}': {e}")))
}
