//! Deterministic, pure logic shared by the test engine.
//!
//! Core modules must be free of I/O side effects. They operate on plain
//! values and return deterministic answers; printing and context updates
//! happen in the layers above.

pub mod compare;
pub mod options;
pub mod selector;
pub mod style;
pub mod types;
