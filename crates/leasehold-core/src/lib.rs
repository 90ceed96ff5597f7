//! # Leasehold Core
//!
//! Profile-leased, multi-phase job engine.
//!
//! A job runs on exactly one browser profile. Each engine invocation (a
//! *run*) claims that profile through a durable lease row, drives the job
//! through `submit → progress → publish → watermark`, and records every
//! phase attempt and state change in an append-only ledger.
//!
//! ## Layout
//!
//! - [`engine`]: the orchestrator plus its pure parts: transition table,
//!   error classifier, retry policy
//! - [`lease`]: the profile lease registry and actor view
//! - [`session`]: run-owned browser sessions and retrying page operations
//! - [`store`]: `SQLite` persistence for jobs, runs, attempts and timeline
//! - [`workflows`]: seams to the remote service and account dispatch
//! - [`pool`]: bounded concurrent execution
//! - [`config`]: layered configuration
//!
//! ## Laws
//!
//! - No `unwrap()`, `expect()` or `panic!()` outside tests
//! - All fallible operations return [`Result`]

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod domain;
pub mod engine;
mod error;
pub mod lease;
pub mod pool;
pub mod session;
pub mod store;
pub mod workflows;

pub use config::{EngineConfig, HeartbeatPolicy};
pub use domain::{Job, JobStatus, NewJob, Phase};
pub use engine::{
    classifier::{Classification, ErrorClass, ErrorClassifier, RecoverAction},
    retry_policy::{RetryDecision, RetryPolicy},
    state_machine::StateMachine,
    JobEngine, RunOutcome,
};
pub use error::{Error, Result};
pub use lease::{ProfileActorScheduler, ProfileRegistry};
pub use pool::{BatchSummary, JobReport, WorkerPool};
pub use store::JobStore;
