//! Argument definitions, process setup and output helpers.

pub mod args;
pub mod output;
pub mod setup;
