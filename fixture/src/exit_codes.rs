//! Stable exit codes for the `fixture` binary.
//!
//! A completed run exits with its failure count. Argument and config errors
//! exit with [`INVALID`], which shares its value with a single failure; the
//! error text on stderr tells them apart.

/// Every selected test passed.
pub const OK: i32 = 0;
/// Invalid command line or configuration; no tests were run.
pub const INVALID: i32 = 1;
/// Largest status a process can report.
pub const MAX_STATUS: i32 = 255;

/// Exit status for a run that ended with `failures` failed tests.
pub fn for_failures(failures: u32) -> i32 {
    i32::try_from(failures).map_or(MAX_STATUS, |count| count.min(MAX_STATUS))
}
