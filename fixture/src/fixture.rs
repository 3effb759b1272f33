//! Fixture runner: test registry, per-test lifecycle and run summary.
//!
//! Tests are registered at runtime through a [`Registry`]:
//!
//! ```
//! use fixture::assert;
//! use fixture::context::TestContext;
//! use fixture::core::types::Outcome;
//! use fixture::fixture::Registry;
//!
//! fn adds(ctx: &mut TestContext) -> Outcome {
//!     assert::equal_int(ctx, 3, 1 + 2, None)
//! }
//!
//! let mut registry = Registry::new();
//! registry.group("Math").test("adds", adds);
//! assert_eq!(registry.len(), 1);
//! ```
//!
//! Each selected test runs as: setup, body (only if setup left the test
//! neither failed nor ignored), teardown (always), then the
//! patch stack is drained and, for tests not already failed, the allocator
//! is checked for leaks.

use std::any::Any;
use std::panic::Location;

use anyhow::Result;
use tracing::{debug, info};

use crate::context::TestContext;
use crate::core::options::{RunOptions, parse_args};
use crate::core::selector::is_selected;
use crate::core::types::{Outcome, TestVerdict};
use crate::format;

/// Setup, body and teardown functions all share this signature.
pub type TestFn = fn(&mut TestContext) -> Outcome;

/// Creates a fresh local-storage value for each test of a group.
pub type StorageFactory = fn() -> Box<dyn Any>;

const SUMMARY_RULE: &str = "-----------------------";

fn no_op(_ctx: &mut TestContext) -> Outcome {
    Ok(())
}

fn default_storage<T: Default + 'static>() -> Box<dyn Any> {
    Box::new(T::default())
}

/// One registered test.
#[derive(Debug, Clone)]
pub struct TestRegistration {
    pub group: String,
    pub name: String,
    pub setup: TestFn,
    pub body: TestFn,
    pub teardown: TestFn,
    pub file: &'static str,
    pub line: u32,
    /// Registered with [`GroupBuilder::ignore_test`]: counted, never run.
    pub ignored: bool,
    pub storage: Option<StorageFactory>,
}

impl TestRegistration {
    /// Printable label, `TEST(<group>, <name>)`.
    pub fn label(&self) -> String {
        format!("TEST({}, {})", self.group, self.name)
    }
}

/// Ordered list of registered tests.
#[derive(Debug, Default)]
pub struct Registry {
    tests: Vec<TestRegistration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start registering tests that share a group's setup, teardown and
    /// local storage.
    pub fn group(&mut self, name: &str) -> GroupBuilder<'_> {
        GroupBuilder {
            registry: self,
            group: name.to_string(),
            setup: no_op,
            teardown: no_op,
            storage: None,
        }
    }

    pub fn register(&mut self, registration: TestRegistration) {
        self.tests.push(registration);
    }

    pub fn tests(&self) -> &[TestRegistration] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Builder returned by [`Registry::group`].
pub struct GroupBuilder<'r> {
    registry: &'r mut Registry,
    group: String,
    setup: TestFn,
    teardown: TestFn,
    storage: Option<StorageFactory>,
}

impl GroupBuilder<'_> {
    pub fn setup(mut self, setup: TestFn) -> Self {
        self.setup = setup;
        self
    }

    pub fn teardown(mut self, teardown: TestFn) -> Self {
        self.teardown = teardown;
        self
    }

    /// Give each test a fresh `T::default()` as local storage.
    pub fn storage<T: Default + 'static>(mut self) -> Self {
        self.storage = Some(default_storage::<T>);
        self
    }

    pub fn storage_with(mut self, factory: StorageFactory) -> Self {
        self.storage = Some(factory);
        self
    }

    /// Register a test; its location is the caller's.
    #[track_caller]
    pub fn test(&mut self, name: &str, body: TestFn) -> &mut Self {
        self.push(name, body, false, Location::caller())
    }

    /// Register a test that is counted as ignored and never run.
    #[track_caller]
    pub fn ignore_test(&mut self, name: &str, body: TestFn) -> &mut Self {
        self.push(name, body, true, Location::caller())
    }

    fn push(
        &mut self,
        name: &str,
        body: TestFn,
        ignored: bool,
        location: &'static Location<'static>,
    ) -> &mut Self {
        self.registry.register(TestRegistration {
            group: self.group.clone(),
            name: name.to_string(),
            setup: self.setup,
            body,
            teardown: self.teardown,
            file: location.file(),
            line: location.line(),
            ignored,
            storage: self.storage,
        });
        self
    }
}

/// Reset counts at the start of a run.
pub fn begin(ctx: &mut TestContext) {
    ctx.reset_counts();
}

/// Print the run summary and return the failure count.
pub fn end(ctx: &mut TestContext) -> u32 {
    let counts = ctx.counts();
    let out = ctx.out();
    out.put_str(SUMMARY_RULE);
    out.put_char(b'\n');
    format::print_unsigned(out, u64::from(counts.tests));
    out.put_str(" Tests ");
    format::print_unsigned(out, u64::from(counts.failures));
    out.put_str(" Failures ");
    format::print_unsigned(out, u64::from(counts.ignores));
    out.put_str(" Ignored\n");
    out.put_str(if counts.failures == 0 { "OK" } else { "FAIL" });
    out.put_char(b'\n');
    out.flush();
    info!(
        tests = counts.tests,
        failures = counts.failures,
        ignored = counts.ignores,
        "test run finished"
    );
    counts.failures
}

fn print_marker(ctx: &mut TestContext, label: &str, marker: u8) {
    if ctx.options().verbose {
        format::print_str(ctx.out(), label.as_bytes());
    } else {
        ctx.out().put_char(marker);
    }
}

/// Run one registration. Returns `None` if the filters deselect it.
pub fn run_test(ctx: &mut TestContext, test: &TestRegistration) -> Option<TestVerdict> {
    if !is_selected(ctx.options(), &test.group, &test.name) {
        return None;
    }
    let label = test.label();
    print_marker(ctx, &label, if test.ignored { b'!' } else { b'.' });
    ctx.enter_test(label, test.file, test.line);
    if test.ignored {
        ctx.mark_ignored();
        return Some(ctx.conclude());
    }
    debug!(label = ctx.label(), "running test");

    ctx.reset_diagnostics();
    ctx.attach_local(test.storage.map(|make| make()));

    // Outcomes are already recorded in the context flags.
    let _ = (test.setup)(ctx);
    if !ctx.should_skip() {
        let _ = (test.body)(ctx);
    }
    let _ = (test.teardown)(ctx);

    let restored = ctx.undo_patches();
    if !ctx.is_failed() {
        let _ = ctx.check_leaks();
    }
    drop(ctx.detach_local());
    debug!(label = ctx.label(), restored, "test epilogue done");
    Some(ctx.conclude())
}

/// Run one test without a registry or group, the way a hand-written runner
/// calls it. Teardown is skipped for ignored tests and a passing test prints
/// `<file>:<line>:<name>:PASS` in every mode. No leak check is done.
#[track_caller]
pub fn run_plain(
    ctx: &mut TestContext,
    name: &str,
    line: u32,
    setup: TestFn,
    body: TestFn,
    teardown: TestFn,
) -> TestVerdict {
    let file = Location::caller().file();
    ctx.enter_test(name.to_string(), file, line);
    ctx.reset_diagnostics();
    debug!(label = ctx.label(), "running plain test");

    let _ = setup(ctx);
    if !ctx.should_skip() {
        let _ = body(ctx);
    }
    if !ctx.is_ignored() {
        let _ = teardown(ctx);
    }
    ctx.undo_patches();
    ctx.conclude_plain()
}

/// Run every registration in order.
pub fn run_all(ctx: &mut TestContext, registry: &Registry) {
    for test in registry.tests() {
        run_test(ctx, test);
    }
}

/// Run the whole suite `options.repeat` times; counts restart at every
/// repetition. Returns the failure count of the last repetition.
pub fn run_repeated(ctx: &mut TestContext, registry: &Registry) -> u32 {
    let repeat = ctx.options().repeat;
    let mut failures = 0;
    for run in 1..=repeat {
        let out = ctx.out();
        out.put_str("Test run ");
        format::print_unsigned(out, u64::from(run));
        out.put_str(" of ");
        format::print_unsigned(out, u64::from(repeat));
        out.put_char(b'\n');
        info!(run, repeat, "starting test run");

        begin(ctx);
        run_all(ctx, registry);
        ctx.out().put_char(b'\n');
        failures = end(ctx);
    }
    failures
}

/// Parse fixture arguments on top of the context's current options, then
/// run the suite.
pub fn run_main<I, S>(ctx: &mut TestContext, registry: &Registry, args: I) -> Result<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let options: RunOptions = parse_args(args, ctx.options().clone())?;
    debug!(?options, "parsed fixture options");
    ctx.set_options(options);
    Ok(run_repeated(ctx, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert;
    use crate::core::types::RunCounts;
    use crate::io::sink::BufferSink;

    fn passes(_ctx: &mut TestContext) -> Outcome {
        Ok(())
    }

    fn fails(ctx: &mut TestContext) -> Outcome {
        assert::equal_int(ctx, 1, 2, None)
    }

    fn ignores(ctx: &mut TestContext) -> Outcome {
        assert::ignore(ctx, None)
    }

    fn leaks(ctx: &mut TestContext) -> Outcome {
        ctx.alloc(4);
        Ok(())
    }

    fn context(options: RunOptions) -> (TestContext, BufferSink) {
        let sink = BufferSink::new();
        let ctx = TestContext::new(options, Box::new(sink.clone()));
        (ctx, sink)
    }

    #[test]
    fn label_names_group_and_test() {
        let mut registry = Registry::new();
        registry.group("G").test("a", passes);
        assert_eq!(registry.tests()[0].label(), "TEST(G, a)");
        assert_eq!(registry.tests()[0].file, file!());
    }

    #[test]
    fn quiet_run_prints_markers_and_summary() {
        let mut registry = Registry::new();
        registry
            .group("G")
            .test("pass", passes)
            .test("ignore", ignores)
            .ignore_test("skipped", passes);
        let (mut ctx, sink) = context(RunOptions::default());
        begin(&mut ctx);
        run_all(&mut ctx, &registry);
        assert_eq!(end(&mut ctx), 0);
        let text = sink.contents();
        assert!(text.starts_with("..\n"), "{text}");
        assert!(text.contains(":TEST(G, ignore):IGNORE\n!"));
        assert!(text.ends_with("-----------------------\n3 Tests 0 Failures 2 Ignored\nOK\n"));
    }

    #[test]
    fn failing_test_is_counted_and_summary_says_fail() {
        let mut registry = Registry::new();
        registry.group("G").test("bad", fails).test("good", passes);
        let (mut ctx, sink) = context(RunOptions::default());
        begin(&mut ctx);
        run_all(&mut ctx, &registry);
        assert_eq!(end(&mut ctx), 1);
        assert_eq!(
            ctx.counts(),
            RunCounts {
                tests: 2,
                failures: 1,
                ignores: 0
            }
        );
        assert!(sink.contents().ends_with("2 Tests 1 Failures 0 Ignored\nFAIL\n"));
    }

    #[test]
    fn verbose_run_prints_labels_and_pass() {
        let mut registry = Registry::new();
        registry.group("G").test("a", passes).ignore_test("b", passes);
        let options = RunOptions {
            verbose: true,
            ..RunOptions::default()
        };
        let (mut ctx, sink) = context(options);
        begin(&mut ctx);
        run_all(&mut ctx, &registry);
        assert_eq!(sink.contents(), "TEST(G, a) PASS\nTEST(G, b)\n");
    }

    #[test]
    fn filtered_tests_print_nothing() {
        let mut registry = Registry::new();
        registry.group("G1").test("a", passes);
        registry.group("G2").test("a", fails);
        let options = RunOptions {
            group_filter: Some("G1".to_string()),
            ..RunOptions::default()
        };
        let (mut ctx, sink) = context(options);
        assert_eq!(run_test(&mut ctx, &registry.tests()[1]), None);
        assert_eq!(sink.contents(), "");
        assert_eq!(run_test(&mut ctx, &registry.tests()[0]), Some(TestVerdict::Passed));
    }

    #[test]
    fn leak_is_reported_against_the_test() {
        let mut registry = Registry::new();
        registry.group("Mem").test("leaks", leaks);
        let (mut ctx, sink) = context(RunOptions::default());
        let verdict = run_test(&mut ctx, &registry.tests()[0]);
        assert_eq!(verdict, Some(TestVerdict::Failed));
        assert!(sink.contents().contains(":TEST(Mem, leaks):FAIL: This test leaks!\n"));
    }

    #[test]
    fn repeat_resets_counts_each_run() {
        let mut registry = Registry::new();
        registry.group("G").test("bad", fails);
        let (mut ctx, sink) = context(RunOptions::default());
        let failures = run_main(&mut ctx, &registry, ["-r", "3"]).expect("run");
        assert_eq!(failures, 1);
        let text = sink.contents();
        assert!(text.starts_with("Test run 1 of 3\n"));
        assert!(text.contains("Test run 3 of 3\n"));
        assert_eq!(text.matches("1 Tests 1 Failures 0 Ignored").count(), 3);
    }

    thread_local! {
        static TEARDOWNS: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
    }

    fn counts_teardown(_ctx: &mut TestContext) -> Outcome {
        TEARDOWNS.with(|runs| runs.set(runs.get() + 1));
        Ok(())
    }

    #[test]
    fn plain_pass_prints_result_line_when_quiet() {
        let (mut ctx, sink) = context(RunOptions::default());
        let verdict = run_plain(&mut ctx, "test_adds", 12, passes, passes, passes);
        assert_eq!(verdict, TestVerdict::Passed);
        let expected = format!("\n{}:12:test_adds:PASS\n", file!());
        assert_eq!(sink.contents(), expected);
    }

    #[test]
    fn plain_ignore_skips_teardown() {
        TEARDOWNS.with(|runs| runs.set(0));
        let (mut ctx, sink) = context(RunOptions::default());
        let verdict = run_plain(&mut ctx, "later", 3, passes, ignores, counts_teardown);
        assert_eq!(verdict, TestVerdict::Ignored);
        assert_eq!(TEARDOWNS.with(std::cell::Cell::get), 0);
        assert!(sink.contents().contains(":later:IGNORE"));
        assert!(!sink.contents().contains("PASS"));

        let verdict = run_plain(&mut ctx, "bad", 4, passes, fails, counts_teardown);
        assert_eq!(verdict, TestVerdict::Failed);
        assert_eq!(TEARDOWNS.with(std::cell::Cell::get), 1);
        assert_eq!(
            ctx.counts(),
            RunCounts {
                tests: 2,
                failures: 1,
                ignores: 1
            }
        );
    }

    #[test]
    fn plain_failed_setup_skips_body() {
        let (mut ctx, sink) = context(RunOptions::default());
        let verdict = run_plain(&mut ctx, "broken", 7, fails, ignores, passes);
        assert_eq!(verdict, TestVerdict::Failed);
        let text = sink.contents();
        assert!(text.contains(":broken:FAIL: Expected 1 Was 2"));
        assert!(!text.contains("IGNORE"));
    }

    #[test]
    fn run_main_rejects_missing_filter() {
        let registry = Registry::new();
        let (mut ctx, sink) = context(RunOptions::default());
        run_main(&mut ctx, &registry, ["-n"]).expect_err("missing name");
        assert_eq!(sink.contents(), "");
    }
}
