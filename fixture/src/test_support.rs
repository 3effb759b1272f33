//! Test-only helpers for driving a context with captured output.

use crate::context::TestContext;
use crate::core::options::RunOptions;
use crate::fixture::{Registry, begin, end, run_all};
use crate::io::sink::BufferSink;

/// Label given to the test entered by [`captured_context`].
pub const UNIT_LABEL: &str = "TEST(Unit, case)";

/// Context writing to a shared buffer, already inside a test.
pub fn captured_context() -> (TestContext, BufferSink) {
    let (mut ctx, sink) = captured_with(RunOptions::default());
    ctx.enter_test(UNIT_LABEL.to_string(), file!(), line!());
    (ctx, sink)
}

/// Context writing to a shared buffer with explicit options, between tests.
pub fn captured_with(options: RunOptions) -> (TestContext, BufferSink) {
    let sink = BufferSink::new();
    let ctx = TestContext::new(options, Box::new(sink.clone()));
    (ctx, sink)
}

/// Lines of `text` reporting a failure.
pub fn failure_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|line| line.contains(":FAIL")).collect()
}

/// One repetition of `run_repeated` without the banner; returns the failure
/// count and output.
pub fn run_once(registry: &Registry, options: RunOptions) -> (u32, String) {
    let (mut ctx, sink) = captured_with(options);
    begin(&mut ctx);
    run_all(&mut ctx, registry);
    ctx.out().put_char(b'\n');
    let failures = end(&mut ctx);
    (failures, sink.contents())
}
