//! Side-effecting helpers: configuration files and output sinks.

pub mod config;
pub mod sink;
