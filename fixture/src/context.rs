//! Mutable state of one test run, passed by `&mut` to every operation.
//!
//! A [`TestContext`] owns the output sink, the allocation capability and the
//! pointer-patch stack, so several contexts can coexist in one process.

use std::any::Any;
use std::panic::Location;
use std::ptr::NonNull;

use tracing::debug;

use crate::core::options::RunOptions;
use crate::core::types::{Abort, Outcome, RunCounts, TestVerdict};
use crate::format;
use crate::io::sink::OutputSink;
use crate::memory::{Allocator, GuardedAllocator, MemoryFault};
use crate::patch::{DEFAULT_CAPACITY, PatchStack, StackFull};

const SPACER: &str = ". ";

pub const MSG_OVERRUN_FREE: &str = "Buffer overrun detected during free()";
pub const MSG_OVERRUN_REALLOC: &str = "Buffer overrun detected during realloc()";
pub const MSG_NOT_OWNED: &str = "Pointer released twice or not allocated here";
pub const MSG_LEAK: &str = "This test leaks!";
pub const MSG_PATCH_FULL: &str = "Too many pointers set";
pub const MSG_NO_LOCAL: &str = "Test local storage missing or of another type";

pub struct TestContext {
    label: String,
    file: &'static str,
    line: u32,
    counts: RunCounts,
    failed: bool,
    ignored: bool,
    local: Option<Box<dyn Any>>,
    options: RunOptions,
    out: Box<dyn OutputSink>,
    allocator: Box<dyn Allocator>,
    patches: PatchStack,
}

impl TestContext {
    /// Context with a [`GuardedAllocator`] and a default-sized patch stack.
    pub fn new(options: RunOptions, out: Box<dyn OutputSink>) -> Self {
        Self {
            label: String::new(),
            file: "",
            line: 0,
            counts: RunCounts::default(),
            failed: false,
            ignored: false,
            local: None,
            options,
            out,
            allocator: Box::new(GuardedAllocator::new()),
            patches: PatchStack::with_capacity(DEFAULT_CAPACITY),
        }
    }

    pub fn with_allocator(mut self, allocator: Box<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_patch_capacity(mut self, capacity: usize) -> Self {
        self.patches = PatchStack::with_capacity(capacity);
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: RunOptions) {
        self.options = options;
    }

    pub fn counts(&self) -> RunCounts {
        self.counts
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// True once the current test is failed or ignored; assertions then no-op.
    pub fn should_skip(&self) -> bool {
        self.failed || self.ignored
    }

    /// Label of the current test, e.g. `TEST(Group, name)`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn out(&mut self) -> &mut dyn OutputSink {
        self.out.as_mut()
    }

    pub fn patches(&self) -> &PatchStack {
        &self.patches
    }

    // Lifecycle hooks driven by the fixture runner.

    pub(crate) fn reset_counts(&mut self) {
        self.counts = RunCounts::default();
        self.label.clear();
        self.file = "";
        self.line = 0;
        self.failed = false;
        self.ignored = false;
        self.local = None;
    }

    pub(crate) fn enter_test(&mut self, label: String, file: &'static str, line: u32) {
        self.label = label;
        self.file = file;
        self.line = line;
        self.failed = false;
        self.counts.tests += 1;
    }

    pub(crate) fn mark_ignored(&mut self) {
        self.ignored = true;
    }

    pub(crate) fn reset_diagnostics(&mut self) {
        self.allocator.begin_test();
        self.patches.init();
    }

    pub(crate) fn attach_local(&mut self, data: Option<Box<dyn Any>>) {
        self.local = data;
    }

    pub(crate) fn detach_local(&mut self) -> Option<Box<dyn Any>> {
        self.local.take()
    }

    pub(crate) fn undo_patches(&mut self) -> usize {
        self.patches.undo_all()
    }

    /// Report blocks still live at the end of the current test.
    pub(crate) fn check_leaks(&mut self) -> Outcome {
        match self.allocator.end_test() {
            Err(MemoryFault::Leak(leaked)) => {
                debug!(leaked, label = %self.label, "leak check failed");
                self.fail_at(self.file, self.line, Some(MSG_LEAK))
            }
            _ => Ok(()),
        }
    }

    /// Fold the current test's flags into the counts and reset them.
    pub(crate) fn conclude(&mut self) -> TestVerdict {
        let verdict = if self.ignored {
            if self.options.verbose {
                self.out.put_char(b'\n');
            }
            self.counts.ignores += 1;
            TestVerdict::Ignored
        } else if self.failed {
            self.counts.failures += 1;
            TestVerdict::Failed
        } else {
            if self.options.verbose {
                self.out.put_str(" PASS\n");
            }
            TestVerdict::Passed
        };
        self.failed = false;
        self.ignored = false;
        verdict
    }

    /// Conclude a test run without a fixture: a passing test prints
    /// `<file>:<line>:<label>:PASS` whatever the verbosity.
    pub(crate) fn conclude_plain(&mut self) -> TestVerdict {
        if !self.failed && !self.ignored {
            self.begin_result(self.file, self.line);
            self.out.put_str("PASS\n");
        }
        let verdict = if self.ignored {
            self.counts.ignores += 1;
            TestVerdict::Ignored
        } else if self.failed {
            self.counts.failures += 1;
            TestVerdict::Failed
        } else {
            TestVerdict::Passed
        };
        self.failed = false;
        self.ignored = false;
        verdict
    }

    // Result lines.

    fn begin_result(&mut self, file: &str, line: u32) {
        self.out.put_char(b'\n');
        format::print_str(self.out.as_mut(), file.as_bytes());
        self.out.put_char(b':');
        format::print_unsigned(self.out.as_mut(), u64::from(line));
        self.out.put_char(b':');
        format::print_str(self.out.as_mut(), self.label.as_bytes());
        self.out.put_char(b':');
    }

    /// Start a `<file>:<line>:<label>:FAIL:` line for an assertion detail.
    pub(crate) fn begin_failure(&mut self, location: &Location<'_>) {
        self.begin_result(location.file(), location.line());
        self.out.put_str("FAIL:");
    }

    /// Append the optional message, end the line and mark the test failed.
    pub(crate) fn end_failure(&mut self, msg: Option<&str>) -> Abort {
        if let Some(msg) = msg {
            self.out.put_str(SPACER);
            format::print_str(self.out.as_mut(), msg.as_bytes());
        }
        self.out.put_char(b'\n');
        self.failed = true;
        Abort::Failed
    }

    /// Print `<file>:<line>:<label>:FAIL[: message]` and mark the test failed.
    pub(crate) fn fail_at(&mut self, file: &str, line: u32, message: Option<&str>) -> Outcome {
        if self.should_skip() {
            return Ok(());
        }
        self.fail_unchecked(file, line, message)
    }

    /// Like [`fail_at`](Self::fail_at) but printed even when the test has
    /// already failed or been ignored.
    pub(crate) fn fail_unchecked(
        &mut self,
        file: &str,
        line: u32,
        message: Option<&str>,
    ) -> Outcome {
        self.begin_result(file, line);
        self.out.put_str("FAIL");
        if let Some(message) = message {
            self.out.put_char(b':');
            if !message.starts_with(' ') {
                self.out.put_char(b' ');
            }
            format::print_str(self.out.as_mut(), message.as_bytes());
        }
        self.out.put_char(b'\n');
        self.failed = true;
        Err(Abort::Failed)
    }

    /// Print `<file>:<line>:<label>:IGNORE[: message]` and mark the test ignored.
    pub(crate) fn ignore_at(&mut self, file: &str, line: u32, message: Option<&str>) -> Outcome {
        if self.should_skip() {
            return Ok(());
        }
        self.begin_result(file, line);
        self.out.put_str("IGNORE");
        if let Some(message) = message {
            self.out.put_str(": ");
            format::print_str(self.out.as_mut(), message.as_bytes());
        }
        self.out.put_char(b'\n');
        self.ignored = true;
        Err(Abort::Ignored)
    }

    // Per-test local storage.

    pub fn local<T: 'static>(&self) -> Option<&T> {
        self.local.as_ref()?.downcast_ref::<T>()
    }

    pub fn local_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.local.as_mut()?.downcast_mut::<T>()
    }

    /// Run `f` with the context and the test's local storage of type `T`.
    ///
    /// Fails the test if no storage of that type is attached.
    #[track_caller]
    pub fn with_local<T, F>(&mut self, f: F) -> Outcome
    where
        T: 'static,
        F: FnOnce(&mut TestContext, &mut T) -> Outcome,
    {
        let location = Location::caller();
        let Some(mut data) = self.local.take() else {
            return self.fail_at(location.file(), location.line(), Some(MSG_NO_LOCAL));
        };
        let outcome = match data.downcast_mut::<T>() {
            Some(typed) => f(self, typed),
            None => self.fail_at(location.file(), location.line(), Some(MSG_NO_LOCAL)),
        };
        self.local = Some(data);
        outcome
    }

    // Allocation through the context's allocator.

    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.allocator.allocate(size)
    }

    pub fn zalloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.allocator.zero_allocate(count, size)
    }

    /// Resize a block, failing the test if its guard was overwritten.
    #[track_caller]
    pub fn realloc(
        &mut self,
        block: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, Abort> {
        let location = Location::caller();
        match self.allocator.resize(block, size) {
            Ok(block) => Ok(block),
            Err(fault) => {
                self.report_fault(location, fault, MSG_OVERRUN_REALLOC)?;
                Ok(None)
            }
        }
    }

    /// Release a block, failing the test on overrun or foreign pointers.
    #[track_caller]
    pub fn free(&mut self, block: NonNull<u8>) -> Outcome {
        let location = Location::caller();
        match self.allocator.release(block) {
            Ok(()) => Ok(()),
            Err(fault) => self.report_fault(location, fault, MSG_OVERRUN_FREE),
        }
    }

    fn report_fault(
        &mut self,
        location: &Location<'_>,
        fault: MemoryFault,
        overrun: &str,
    ) -> Outcome {
        let message = match fault {
            MemoryFault::Overrun => overrun,
            MemoryFault::NotOwned => MSG_NOT_OWNED,
            MemoryFault::Leak(_) => MSG_LEAK,
        };
        self.fail_at(location.file(), location.line(), Some(message))
    }

    /// Let `countdown` more allocations succeed, then fail one.
    pub fn fail_allocation_after(&mut self, countdown: usize) {
        self.allocator.fail_after(countdown);
    }

    pub fn live_blocks(&self) -> usize {
        self.allocator.live_blocks()
    }

    /// Patch `location` with `value` until the end of the current test.
    ///
    /// Fails the test with `Too many pointers set` when the stack is full.
    ///
    /// # Safety
    ///
    /// Same contract as [`PatchStack::set`]: `location` must stay valid and
    /// unaliased until the runner restores it after the test.
    #[allow(unsafe_code)]
    #[track_caller]
    pub unsafe fn patch<T: 'static>(&mut self, location: *mut T, value: T) -> Outcome {
        let caller = Location::caller();
        // SAFETY: forwarded from the caller.
        match unsafe { self.patches.set(location, value) } {
            Ok(()) => Ok(()),
            Err(StackFull) => self.fail_at(caller.file(), caller.line(), Some(MSG_PATCH_FULL)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sink::BufferSink;

    fn context() -> (TestContext, BufferSink) {
        let sink = BufferSink::new();
        let ctx = TestContext::new(RunOptions::default(), Box::new(sink.clone()));
        (ctx, sink)
    }

    #[test]
    fn fail_prints_location_label_and_message() {
        let (mut ctx, sink) = context();
        ctx.enter_test("TEST(G, a)".to_string(), "g.rs", 3);
        assert_eq!(ctx.fail_at("g.rs", 7, Some("boom")), Err(Abort::Failed));
        assert_eq!(sink.contents(), "\ng.rs:7:TEST(G, a):FAIL: boom\n");
        assert!(ctx.is_failed());
    }

    #[test]
    fn fail_is_skipped_once_failed() {
        let (mut ctx, sink) = context();
        ctx.enter_test("t".to_string(), "f.rs", 1);
        ctx.fail_at("f.rs", 2, None).expect_err("first failure");
        let before = sink.contents();
        assert_eq!(ctx.fail_at("f.rs", 3, Some("again")), Ok(()));
        assert_eq!(sink.contents(), before);
    }

    #[test]
    fn ignore_marks_test_and_prints_message() {
        let (mut ctx, sink) = context();
        ctx.enter_test("t".to_string(), "f.rs", 1);
        assert_eq!(ctx.ignore_at("f.rs", 4, Some("later")), Err(Abort::Ignored));
        assert_eq!(sink.contents(), "\nf.rs:4:t:IGNORE: later\n");
        assert_eq!(ctx.conclude(), TestVerdict::Ignored);
        assert_eq!(ctx.counts().ignores, 1);
        assert!(!ctx.is_ignored());
    }

    #[test]
    fn conclude_counts_failures_and_prints_pass_when_verbose() {
        let sink = BufferSink::new();
        let options = RunOptions {
            verbose: true,
            ..RunOptions::default()
        };
        let mut ctx = TestContext::new(options, Box::new(sink.clone()));
        ctx.enter_test("t".to_string(), "f.rs", 1);
        assert_eq!(ctx.conclude(), TestVerdict::Passed);
        assert_eq!(sink.contents(), " PASS\n");
        ctx.enter_test("u".to_string(), "f.rs", 2);
        ctx.fail_at("f.rs", 2, None).expect_err("fail");
        assert_eq!(ctx.conclude(), TestVerdict::Failed);
        assert_eq!(
            ctx.counts(),
            RunCounts {
                tests: 2,
                failures: 1,
                ignores: 0
            }
        );
    }

    #[test]
    fn with_local_lends_typed_storage() {
        let (mut ctx, _sink) = context();
        let data: Box<dyn Any> = Box::new(41u32);
        ctx.attach_local(Some(data));
        ctx.with_local::<u32, _>(|_, value| {
            *value += 1;
            Ok(())
        })
        .expect("storage present");
        assert_eq!(ctx.local::<u32>(), Some(&42));
    }

    #[test]
    fn with_local_fails_without_storage() {
        let (mut ctx, sink) = context();
        ctx.enter_test("t".to_string(), "f.rs", 1);
        let outcome = ctx.with_local::<u32, _>(|_, _| Ok(()));
        assert_eq!(outcome, Err(Abort::Failed));
        assert!(sink.contents().contains(MSG_NO_LOCAL));
    }

    #[test]
    fn free_reports_foreign_pointer() {
        let (mut ctx, sink) = context();
        ctx.enter_test("t".to_string(), "f.rs", 1);
        let mut byte = 0u8;
        let foreign = NonNull::from(&mut byte);
        assert_eq!(ctx.free(foreign), Err(Abort::Failed));
        assert!(sink.contents().contains(MSG_NOT_OWNED));
    }

    #[test]
    #[allow(unsafe_code)]
    fn realloc_reports_overrun_and_releases_block() {
        let (mut ctx, sink) = context();
        ctx.enter_test("t".to_string(), "f.rs", 1);
        let block = ctx.alloc(4).expect("block");
        // SAFETY: the guard bytes follow the 4 requested bytes.
        unsafe { block.as_ptr().add(4).write(b'X') };
        assert_eq!(ctx.realloc(Some(block), 32), Err(Abort::Failed));
        assert!(sink.contents().contains(MSG_OVERRUN_REALLOC));
        assert_eq!(ctx.live_blocks(), 0);
    }

    #[test]
    fn realloc_to_zero_frees_block() {
        let (mut ctx, sink) = context();
        ctx.enter_test("t".to_string(), "f.rs", 1);
        let block = ctx.alloc(16).expect("block");
        assert_eq!(ctx.realloc(Some(block), 0), Ok(None));
        assert_eq!(ctx.live_blocks(), 0);
        assert_eq!(sink.contents(), "");
    }

    #[test]
    #[allow(unsafe_code)]
    fn zalloc_returns_zeroed_bytes() {
        let (mut ctx, _sink) = context();
        let block = ctx.zalloc(3, 4).expect("block");
        // SAFETY: the block holds 12 initialized bytes.
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 12) };
        assert!(bytes.iter().all(|&b| b == 0));
        ctx.free(block).expect("free");
    }

    #[test]
    fn leak_check_fails_current_test() {
        let (mut ctx, sink) = context();
        ctx.enter_test("TEST(M, leak)".to_string(), "m.rs", 9);
        ctx.reset_diagnostics();
        ctx.alloc(8).expect("block");
        assert_eq!(ctx.check_leaks(), Err(Abort::Failed));
        assert_eq!(sink.contents(), "\nm.rs:9:TEST(M, leak):FAIL: This test leaks!\n");
        assert_eq!(ctx.live_blocks(), 0);
    }
}
