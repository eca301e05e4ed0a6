//! Loudness analysis: command construction, subprocess execution, and
//! output reduction.
//!
//! - [`command`]: derives the structured ffmpeg argv for a stored upload
//! - [`runner`]: executes the argv with a wall-clock budget
//! - [`filter`]: keeps only the loudnorm summary lines of the raw output

pub mod command;
pub mod filter;
pub mod runner;
