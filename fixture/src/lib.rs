//! Minimal unit-test execution engine.
//!
//! Tests are plain functions registered in named groups. Each runs with
//! optional setup and teardown against a [`context::TestContext`], which
//! tracks the current test's verdict and run totals. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure logic (comparisons, display styles, option parsing,
//!   filters). No I/O, fully testable in isolation.
//! - **[`io`]**: Output sinks and the TOML config file.
//!
//! [`assert`] reports mismatches through the context and aborts the test body
//! with `?`. [`fixture`] sequences setup, body, teardown, patch restoration
//! and leak checks. [`memory`] and [`patch`] provide the guarded allocator and
//! the pointer-patch stack that tests use through the context.

pub mod assert;
pub mod context;
pub mod core;
pub mod exit_codes;
pub mod fixture;
pub mod format;
pub mod io;
pub mod logging;
pub mod memory;
pub mod patch;
pub mod selftest;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
