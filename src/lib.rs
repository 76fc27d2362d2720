//! # groupsum
//!
//! Grouped sums over delimited files too large to hold in memory.
//!
//! ## Usage
//!
//! ```bash
//! groupsum run data.csv [--output sums.csv] [--chunk-size BYTES] [-j WIDTH]
//! groupsum resume data.csv
//! groupsum clean
//! ```
//!
//! The first three columns of the input form the group; the remaining
//! columns are summed as 64-bit integers.
//!
//! ## Modules
//!
//! - `app` - Logging setup and fatal error reporting for the binary
//! - `config` - Pipeline settings from defaults, TOML and environment
//! - `error` - The pipeline error type and exit codes
//! - `mapreduce` - Split, sort, merge and reduce phases with checkpointed resume
pub mod app;
pub mod config;
pub mod error;
pub mod mapreduce;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use mapreduce::{Pipeline, PipelineReport};
