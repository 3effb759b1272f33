//! Built-in suite run by the `fixture` binary.
//!
//! The suite checks the engine with the engine: failing assertions are
//! evaluated against a separate inner context whose output is captured, and
//! the outer test asserts on what the inner context printed.

use std::cell::Cell;

use crate::assert;
use crate::context::{MSG_OVERRUN_FREE, MSG_PATCH_FULL, TestContext};
use crate::core::options::RunOptions;
use crate::core::style::DisplayStyle;
use crate::core::types::{Abort, Outcome};
use crate::fixture::Registry;
use crate::format;
use crate::io::sink::BufferSink;

/// Register every self-test.
pub fn registry() -> Registry {
    let mut registry = Registry::new();

    registry
        .group("Format")
        .test("decimal_and_hex", format_decimal_and_hex)
        .test("escaped_strings", format_escaped_strings)
        .test("floats", format_floats);

    registry
        .group("Assert")
        .test("mismatch_reports_both_values", assert_mismatch_reports_both_values)
        .test("skip_after_first_failure", assert_skip_after_first_failure)
        .test("nan_is_never_close", assert_nan_is_never_close)
        .test("pointless_comparisons_fail", assert_pointless_comparisons_fail)
        .test("null_rule", assert_null_rule)
        .ignore_test("wide_character_strings", assert_wide_character_strings);

    registry
        .group("Fixture")
        .storage::<Lifecycle>()
        .setup(fixture_setup)
        .teardown(fixture_teardown)
        .test("setup_runs_before_body", fixture_setup_runs_before_body)
        .test("storage_is_fresh_per_test", fixture_storage_is_fresh_per_test);

    registry
        .group("Memory")
        .test("round_trip", memory_round_trip)
        .test("overrun_detected", memory_overrun_detected)
        .test("simulated_failure", memory_simulated_failure);

    registry
        .group("Patch")
        .test("substitutes_function", patch_substitutes_function)
        .test("restored_after_test", patch_restored_after_test)
        .test("capacity_exhausted", patch_capacity_exhausted);

    registry
}

/// Run `check` against a fresh context; returns its outcome and output.
fn observe(check: impl FnOnce(&mut TestContext) -> Outcome) -> (Outcome, String) {
    let sink = BufferSink::new();
    let mut inner = TestContext::new(RunOptions::default(), Box::new(sink.clone()));
    inner.enter_test("TEST(Inner, inner)".to_string(), file!(), line!());
    let outcome = check(&mut inner);
    (outcome, sink.contents())
}

fn contains(ctx: &mut TestContext, text: &str, needle: &str) -> Outcome {
    let message = format!("output was '{text}'");
    assert::is_true(ctx, text.contains(needle), Some(&message))
}

fn rendered(print: impl FnOnce(&mut BufferSink)) -> String {
    let mut sink = BufferSink::new();
    print(&mut sink);
    sink.contents()
}

// Format

fn format_decimal_and_hex(ctx: &mut TestContext) -> Outcome {
    let text = rendered(|out| format::print_signed(out, -42));
    assert::string_equal(ctx, Some("-42"), Some(&text), None)?;
    let text = rendered(|out| format::print_by_style(out, 0xBEEF, DisplayStyle::HEX16));
    assert::string_equal(ctx, Some("0xBEEF"), Some(&text), None)?;
    let text = rendered(|out| format::print_by_style(out, -1, DisplayStyle::UINT16));
    assert::string_equal(ctx, Some("65535"), Some(&text), None)
}

fn format_escaped_strings(ctx: &mut TestContext) -> Outcome {
    let text = rendered(|out| format::print_str(out, b"tab\there\r\n"));
    assert::string_equal(ctx, Some("tab\\09here\\r\\n"), Some(&text), None)
}

fn format_floats(ctx: &mut TestContext) -> Outcome {
    let text = rendered(|out| format::print_float(out, 0.5));
    assert::string_equal(ctx, Some("0.500000"), Some(&text), None)?;
    let text = rendered(|out| format::print_float(out, f64::NEG_INFINITY));
    assert::string_equal(ctx, Some("Negative Infinity"), Some(&text), None)
}

// Assert

fn assert_mismatch_reports_both_values(ctx: &mut TestContext) -> Outcome {
    let (outcome, text) = observe(|inner| assert::equal_int(inner, 5, 6, Some("values")));
    assert::is_true(ctx, outcome == Err(Abort::Failed), None)?;
    contains(ctx, &text, ":TEST(Inner, inner):FAIL: Expected 5 Was 6. values\n")
}

fn assert_skip_after_first_failure(ctx: &mut TestContext) -> Outcome {
    let mut second = Err(Abort::Failed);
    let (first, text) = observe(|inner| {
        let first = assert::equal_int(inner, 1, 2, None);
        second = assert::equal_int(inner, 3, 4, None);
        first
    });
    assert::is_true(ctx, first.is_err(), None)?;
    assert::is_true(ctx, second.is_ok(), Some("skipped checks report no new failure"))?;
    let reported = text.matches(":FAIL:").count() as i64;
    assert::equal_int(ctx, 1, reported, None)
}

fn assert_nan_is_never_close(ctx: &mut TestContext) -> Outcome {
    for delta in [0.0f64, 1.0, -1.0, f64::MAX] {
        let (outcome, _) =
            observe(|inner| assert::floats_within(inner, delta, 0.0, f64::NAN, None));
        assert::is_true(ctx, outcome.is_err(), Some("NaN compared within delta"))?;
    }
    let (outcome, _) = observe(|inner| assert::float_is_nan(inner, 1.0f32, None));
    assert::is_true(ctx, outcome.is_err(), Some("finite value reported as NaN"))?;
    let (outcome, _) = observe(|inner| assert::float_is_inf(inner, 1.0f32, None));
    assert::is_true(ctx, outcome.is_err(), Some("finite value reported as Infinity"))
}

fn assert_pointless_comparisons_fail(ctx: &mut TestContext) -> Outcome {
    let data = [1u32, 2, 3];
    let (outcome, text) = observe(|inner| {
        let data = Some(&data[..]);
        assert::int_array_equal(inner, data, data, 0, DisplayStyle::UINT32, None)
    });
    assert::is_true(ctx, outcome.is_err(), None)?;
    contains(ctx, &text, "Compare Nothing")?;
    let bytes = &b"ab"[..];
    let (outcome, _) =
        observe(|inner| assert::memory_equal(inner, Some(bytes), Some(bytes), 2, 0, None));
    assert::is_true(ctx, outcome.is_err(), None)
}

fn assert_null_rule(ctx: &mut TestContext) -> Outcome {
    let data = [7u8];
    let (outcome, _) = observe(|inner| assert::memory_equal(inner, None, None, 1, 1, None));
    assert::is_true(ctx, outcome.is_ok(), Some("two absent buffers are equal"))?;
    let (_, text) = observe(|inner| assert::memory_equal(inner, None, Some(&data[..]), 1, 1, None));
    contains(ctx, &text, "Expected pointer to be NULL")?;
    let (_, text) = observe(|inner| assert::memory_equal(inner, Some(&data[..]), None, 1, 1, None));
    contains(ctx, &text, "Actual pointer was NULL")
}

fn assert_wide_character_strings(ctx: &mut TestContext) -> Outcome {
    assert::fail(ctx, Some("wide strings are not compared"))
}

// Fixture

#[derive(Debug, Default)]
struct Lifecycle {
    setup_ran: bool,
    body_ran: bool,
}

fn fixture_setup(ctx: &mut TestContext) -> Outcome {
    ctx.with_local::<Lifecycle, _>(|ctx, state| {
        assert::is_false(ctx, state.body_ran, Some("storage reused across tests"))?;
        state.setup_ran = true;
        Ok(())
    })
}

fn fixture_teardown(ctx: &mut TestContext) -> Outcome {
    ctx.with_local::<Lifecycle, _>(|ctx, state| {
        assert::is_true(ctx, state.body_ran, Some("body did not run before teardown"))
    })
}

fn fixture_setup_runs_before_body(ctx: &mut TestContext) -> Outcome {
    ctx.with_local::<Lifecycle, _>(|ctx, state| {
        assert::is_true(ctx, state.setup_ran, None)?;
        state.body_ran = true;
        Ok(())
    })
}

fn fixture_storage_is_fresh_per_test(ctx: &mut TestContext) -> Outcome {
    ctx.with_local::<Lifecycle, _>(|ctx, state| {
        assert::is_true(ctx, state.setup_ran && !state.body_ran, None)?;
        state.body_ran = true;
        Ok(())
    })
}

// Memory

#[allow(unsafe_code)]
fn memory_round_trip(ctx: &mut TestContext) -> Outcome {
    let Some(block) = ctx.alloc(8) else {
        return assert::fail(ctx, Some("allocation failed"));
    };
    // SAFETY: the block holds 8 writable bytes.
    unsafe { std::ptr::write_bytes(block.as_ptr(), 0x5A, 8) };
    let live = ctx.live_blocks() as i64;
    assert::equal_int(ctx, 1, live, None)?;
    ctx.free(block)
}

#[allow(unsafe_code)]
fn memory_overrun_detected(ctx: &mut TestContext) -> Outcome {
    let (outcome, text) = observe(|inner| {
        let Some(block) = inner.alloc(4) else {
            return assert::fail(inner, Some("allocation failed"));
        };
        // SAFETY: writes the first sentinel byte, which the guarded
        // allocator places right after the 4-byte payload.
        unsafe { block.as_ptr().add(4).write(b'!') };
        inner.free(block)
    });
    assert::is_true(ctx, outcome.is_err(), Some("overrun went unnoticed"))?;
    contains(ctx, &text, MSG_OVERRUN_FREE)
}

fn memory_simulated_failure(ctx: &mut TestContext) -> Outcome {
    ctx.fail_allocation_after(1);
    let first = ctx.alloc(2);
    let second = ctx.alloc(2);
    assert::not_null(ctx, first.map_or(std::ptr::null(), |p| p.as_ptr().cast_const()), None)?;
    assert::is_null(ctx, second.map_or(std::ptr::null(), |p| p.as_ptr().cast_const()), None)?;
    match first {
        Some(block) => ctx.free(block),
        None => Ok(()),
    }
}

// Patch

fn real_greeting() -> &'static str {
    "hello"
}

fn fake_greeting() -> &'static str {
    "patched"
}

type Greeter = fn() -> &'static str;

thread_local! {
    static GREETER: Cell<Greeter> = Cell::new(real_greeting as Greeter);
}

fn greet() -> &'static str {
    GREETER.with(Cell::get)()
}

fn greeter_slot() -> *mut Greeter {
    GREETER.with(Cell::as_ptr)
}

#[allow(unsafe_code)]
fn patch_substitutes_function(ctx: &mut TestContext) -> Outcome {
    // SAFETY: the thread-local outlives the test and is only accessed
    // through `greet` on this thread.
    unsafe { ctx.patch(greeter_slot(), fake_greeting as Greeter)? };
    assert::string_equal(ctx, Some("patched"), Some(greet()), None)
}

fn patch_restored_after_test(ctx: &mut TestContext) -> Outcome {
    assert::string_equal(ctx, Some("hello"), Some(greet()), None)
}

#[allow(unsafe_code)]
fn patch_capacity_exhausted(ctx: &mut TestContext) -> Outcome {
    let mut value = 0u8;
    let slot: *mut u8 = &mut value;
    let sink = BufferSink::new();
    let mut inner =
        TestContext::new(RunOptions::default(), Box::new(sink.clone())).with_patch_capacity(1);
    inner.enter_test("TEST(Inner, patches)".to_string(), file!(), line!());
    // SAFETY: `value` outlives `inner`'s patches, which are undone below.
    let second = unsafe {
        let first = inner.patch(slot, 1);
        assert::is_true(ctx, first.is_ok(), None)?;
        inner.patch(slot, 2)
    };
    inner.undo_patches();
    assert::is_true(ctx, second == Err(Abort::Failed), None)?;
    assert::equal_int(ctx, 0, i64::from(value), Some("patch not restored"))?;
    contains(ctx, &sink.contents(), MSG_PATCH_FULL)
}
