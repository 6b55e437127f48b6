//! Command-line interface module.
//!
//! This module handles:
//! - Argument parsing via clap
//! - Per-packet summaries (table, CSV, JSON)

mod args;
mod output;

pub use args::Args;
pub use output::{format_timestamp, SummaryFormat, SummaryFormatter};
