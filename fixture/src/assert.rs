//! Assertion evaluator.
//!
//! Every function here takes the context, the values to compare and an
//! optional message, and returns an [`Outcome`]. The contract is the same for
//! all of them:
//!
//! - If the current test is already failed or ignored, nothing is compared,
//!   nothing is printed and `Ok(())` is returned.
//! - On a mismatch a single `<file>:<line>:<label>:FAIL:<detail>` line is
//!   printed, the test is marked failed and `Err(Abort::Failed)` is returned.
//!
//! Callers must propagate the error with `?` so that no statement after a
//! failed check runs:
//!
//! ```
//! use fixture::assert;
//! use fixture::context::TestContext;
//! use fixture::core::types::Outcome;
//!
//! fn body(ctx: &mut TestContext) -> Outcome {
//!     assert::equal_int(ctx, 4, 2 + 2, None)?;
//!     assert::string_equal(ctx, Some("ok"), Some("ok"), Some("status"))?;
//!     Ok(())
//! }
//! ```
//!
//! The reported file and line are those of the caller (`#[track_caller]`).

use std::panic::Location;

use bytemuck::Pod;

use crate::context::TestContext;
use crate::core::compare::{self, FloatValue};
use crate::core::style::{DisplayStyle, Range};
use crate::core::types::{Abort, Outcome};
use crate::format;
use crate::io::sink::OutputSink;

const STR_EXPECTED: &str = " Expected ";
const STR_WAS: &str = " Was ";
const STR_ELEMENT: &str = " Element ";
const STR_BYTE: &str = " Byte ";
const STR_MEMORY: &str = " Memory Mismatch.";
const STR_DELTA: &str = " Values Not Within Delta ";
const STR_POINTLESS: &str = " You Asked Me To Compare Nothing, Which Was Pointless.";
const STR_NULL_EXPECTED: &str = " Expected pointer to be NULL";
const STR_NULL_ACTUAL: &str = " Actual pointer was NULL";
const STR_SHORT_BUFFER: &str = " Element Count Exceeds Buffer";
const STR_NULL: &str = "NULL";

/// Print the detail with `detail`, finish the line and mark the test failed.
fn fail_with(
    ctx: &mut TestContext,
    location: &Location<'_>,
    msg: Option<&str>,
    detail: impl FnOnce(&mut dyn OutputSink),
) -> Outcome {
    ctx.begin_failure(location);
    detail(ctx.out());
    Err(ctx.end_failure(msg))
}

fn expected_was(
    out: &mut dyn OutputSink,
    expected: impl FnOnce(&mut dyn OutputSink),
    actual: impl FnOnce(&mut dyn OutputSink),
) {
    out.put_str(STR_EXPECTED);
    expected(out);
    out.put_str(STR_WAS);
    actual(out);
}

fn print_element_index(out: &mut dyn OutputSink, index: usize) {
    out.put_str(STR_ELEMENT);
    format::print_unsigned(out, index as u64);
}

/// Shared prelude of array, memory and string-array comparisons.
///
/// Zero-length comparisons fail. Two absent buffers pass (`Ok(None)`), one
/// absent buffer fails, two present buffers are handed back for comparison.
fn array_prelude<'a, T: ?Sized>(
    ctx: &mut TestContext,
    location: &Location<'_>,
    empty: bool,
    expected: Option<&'a T>,
    actual: Option<&'a T>,
    msg: Option<&str>,
) -> Result<Option<(&'a T, &'a T)>, Abort> {
    if empty {
        fail_with(ctx, location, msg, |out| out.put_str(STR_POINTLESS))?;
    }
    match (expected, actual) {
        (None, None) => Ok(None),
        (None, Some(_)) => {
            fail_with(ctx, location, msg, |out| out.put_str(STR_NULL_EXPECTED))?;
            Ok(None)
        }
        (Some(_), None) => {
            fail_with(ctx, location, msg, |out| out.put_str(STR_NULL_ACTUAL))?;
            Ok(None)
        }
        (Some(expected), Some(actual)) => Ok(Some((expected, actual))),
    }
}

fn short_buffer(ctx: &mut TestContext, location: &Location<'_>, msg: Option<&str>) -> Outcome {
    fail_with(ctx, location, msg, |out| out.put_str(STR_SHORT_BUFFER))
}

// Scalars.

/// Compare two integers, rendering both per `style` on mismatch.
#[track_caller]
pub fn equal_number(
    ctx: &mut TestContext,
    expected: i64,
    actual: i64,
    style: DisplayStyle,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() || expected == actual {
        return Ok(());
    }
    fail_with(ctx, location, msg, |out| {
        expected_was(
            out,
            |out| format::print_by_style(out, expected, style),
            |out| format::print_by_style(out, actual, style),
        );
    })
}

#[track_caller]
pub fn equal_int(ctx: &mut TestContext, expected: i64, actual: i64, msg: Option<&str>) -> Outcome {
    equal_number(ctx, expected, actual, DisplayStyle::INT, msg)
}

#[track_caller]
pub fn equal_uint(ctx: &mut TestContext, expected: u32, actual: u32, msg: Option<&str>) -> Outcome {
    equal_number(
        ctx,
        i64::from(expected),
        i64::from(actual),
        DisplayStyle::UINT,
        msg,
    )
}

/// Fail if `actual` is further than `delta` from `expected`.
///
/// Unsigned and hex styles use unsigned arithmetic; a negative delta with a
/// signed style always fails.
#[track_caller]
pub fn number_within(
    ctx: &mut TestContext,
    delta: i64,
    expected: i64,
    actual: i64,
    style: DisplayStyle,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() || !compare::numbers_differ(delta, expected, actual, style) {
        return Ok(());
    }
    fail_with(ctx, location, msg, |out| {
        out.put_str(STR_DELTA);
        format::print_by_style(out, delta, style);
        expected_was(
            out,
            |out| format::print_by_style(out, expected, style),
            |out| format::print_by_style(out, actual, style),
        );
    })
}

/// Compare only the bits selected by `mask`.
#[track_caller]
pub fn bits(
    ctx: &mut TestContext,
    mask: u64,
    expected: u64,
    actual: u64,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() || !compare::bits_differ(mask, expected, actual) {
        return Ok(());
    }
    fail_with(ctx, location, msg, |out| {
        expected_was(
            out,
            |out| format::print_mask(out, mask, expected),
            |out| format::print_mask(out, mask, actual),
        );
    })
}

// Floating point.

#[track_caller]
pub fn floats_within<F: FloatValue>(
    ctx: &mut TestContext,
    delta: F,
    expected: F,
    actual: F,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() || !compare::floats_differ(delta, expected, actual) {
        return Ok(());
    }
    fail_with(ctx, location, msg, |out| {
        expected_was(
            out,
            |out| format::print_float(out, expected.to_f64()),
            |out| format::print_float(out, actual.to_f64()),
        );
    })
}

/// Equality within the type's relative precision of `expected`.
#[track_caller]
pub fn float_equal<F: FloatValue>(
    ctx: &mut TestContext,
    expected: F,
    actual: F,
    msg: Option<&str>,
) -> Outcome {
    floats_within(ctx, compare::relative_delta(expected), expected, actual, msg)
}

fn float_predicate<F: FloatValue>(
    ctx: &mut TestContext,
    location: &Location<'_>,
    holds: bool,
    expected_word: &str,
    actual: F,
    msg: Option<&str>,
) -> Outcome {
    if ctx.should_skip() || holds {
        return Ok(());
    }
    fail_with(ctx, location, msg, |out| {
        expected_was(
            out,
            |out| out.put_str(expected_word),
            |out| format::print_float(out, actual.to_f64()),
        );
    })
}

#[track_caller]
pub fn float_is_inf<F: FloatValue>(ctx: &mut TestContext, actual: F, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    float_predicate(ctx, location, actual == F::INFINITY, "Infinity", actual, msg)
}

#[track_caller]
pub fn float_is_neg_inf<F: FloatValue>(
    ctx: &mut TestContext,
    actual: F,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    let holds = actual == F::NEG_INFINITY;
    float_predicate(ctx, location, holds, "Negative Infinity", actual, msg)
}

#[track_caller]
pub fn float_is_nan<F: FloatValue>(ctx: &mut TestContext, actual: F, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    float_predicate(ctx, location, compare::is_nan(actual), "NaN", actual, msg)
}

// Arrays and memory.

/// Decode one array element of the style's width from native-endian bytes.
fn read_element(chunk: &[u8], style: DisplayStyle) -> i64 {
    let width = chunk.len();
    let mut raw = [0u8; 8];
    if cfg!(target_endian = "little") {
        raw[..width].copy_from_slice(chunk);
    } else {
        raw[8 - width..].copy_from_slice(chunk);
    }
    let value = u64::from_ne_bytes(raw);
    match style.range() {
        Range::Signed => {
            let shift = 64 - width as u32 * 8;
            ((value << shift) as i64) >> shift
        }
        Range::Unsigned | Range::Hex => value as i64,
    }
}

/// Compare the first `count` elements of two integer buffers.
///
/// The buffers are viewed as bytes and strided by the style width, so a
/// `&[u8]` can be compared as 16-bit elements and so on. Buffers shorter than
/// `count` elements of that width fail.
#[track_caller]
pub fn int_array_equal<T: Pod>(
    ctx: &mut TestContext,
    expected: Option<&[T]>,
    actual: Option<&[T]>,
    count: usize,
    style: DisplayStyle,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() {
        return Ok(());
    }
    let Some((expected, actual)) = array_prelude(ctx, location, count == 0, expected, actual, msg)?
    else {
        return Ok(());
    };
    let expected: &[u8] = bytemuck::cast_slice(expected);
    let actual: &[u8] = bytemuck::cast_slice(actual);
    let width = usize::from(style.width());
    match count.checked_mul(width) {
        Some(span) if span <= expected.len() && span <= actual.len() => {}
        _ => return short_buffer(ctx, location, msg),
    }
    let pairs = expected.chunks_exact(width).zip(actual.chunks_exact(width));
    for (index, (e, a)) in pairs.take(count).enumerate() {
        if e != a {
            let (e, a) = (read_element(e, style), read_element(a, style));
            return fail_with(ctx, location, msg, |out| {
                print_element_index(out, index);
                expected_was(
                    out,
                    |out| format::print_by_style(out, e, style),
                    |out| format::print_by_style(out, a, style),
                );
            });
        }
    }
    Ok(())
}

/// Compare the first `count` floats, each within relative precision.
#[track_caller]
pub fn float_array_equal<F: FloatValue>(
    ctx: &mut TestContext,
    expected: Option<&[F]>,
    actual: Option<&[F]>,
    count: usize,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() {
        return Ok(());
    }
    let Some((expected, actual)) = array_prelude(ctx, location, count == 0, expected, actual, msg)?
    else {
        return Ok(());
    };
    if count > expected.len() || count > actual.len() {
        return short_buffer(ctx, location, msg);
    }
    for (index, (&e, &a)) in expected.iter().zip(actual).take(count).enumerate() {
        if compare::floats_differ(compare::relative_delta(e), e, a) {
            return fail_with(ctx, location, msg, |out| {
                print_element_index(out, index);
                expected_was(
                    out,
                    |out| format::print_float(out, e.to_f64()),
                    |out| format::print_float(out, a.to_f64()),
                );
            });
        }
    }
    Ok(())
}

/// Compare `count` consecutive blocks of `length` bytes.
///
/// Mismatches report the byte index, plus the block index when more than
/// one block is compared.
#[track_caller]
pub fn memory_equal(
    ctx: &mut TestContext,
    expected: Option<&[u8]>,
    actual: Option<&[u8]>,
    length: usize,
    count: usize,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() {
        return Ok(());
    }
    let empty = length == 0 || count == 0;
    let Some((expected, actual)) =
        array_prelude(ctx, location, empty, expected, actual, msg)?
    else {
        return Ok(());
    };
    match length.checked_mul(count) {
        Some(span) if span <= expected.len() && span <= actual.len() => {}
        _ => return short_buffer(ctx, location, msg),
    }
    let blocks = expected.chunks_exact(length).zip(actual.chunks_exact(length));
    for (element, (e_block, a_block)) in blocks.take(count).enumerate() {
        let mismatch = e_block.iter().zip(a_block).position(|(e, a)| e != a);
        if let Some(byte) = mismatch {
            let (e, a) = (e_block[byte], a_block[byte]);
            return fail_with(ctx, location, msg, |out| {
                out.put_str(STR_MEMORY);
                if count > 1 {
                    print_element_index(out, element);
                }
                out.put_str(STR_BYTE);
                format::print_unsigned(out, byte as u64);
                expected_was(
                    out,
                    |out| format::print_by_style(out, i64::from(e), DisplayStyle::HEX8),
                    |out| format::print_by_style(out, i64::from(a), DisplayStyle::HEX8),
                );
            });
        }
    }
    Ok(())
}

// Strings.

fn print_quoted(out: &mut dyn OutputSink, text: Option<&str>) {
    match text {
        Some(text) => {
            out.put_char(b'\'');
            format::print_str(out, text.as_bytes());
            out.put_char(b'\'');
        }
        None => out.put_str(STR_NULL),
    }
}

/// Compare two strings up to their terminators. `None` plays the role of a
/// NULL string: two `None`s are equal, one `None` is a mismatch.
#[track_caller]
pub fn string_equal(
    ctx: &mut TestContext,
    expected: Option<&str>,
    actual: Option<&str>,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() || !compare::optional_strings_differ(expected, actual) {
        return Ok(());
    }
    fail_with(ctx, location, msg, |out| {
        expected_was(
            out,
            |out| print_quoted(out, expected),
            |out| print_quoted(out, actual),
        );
    })
}

/// Compare the first `count` strings of two string arrays.
#[track_caller]
pub fn string_array_equal(
    ctx: &mut TestContext,
    expected: Option<&[Option<&str>]>,
    actual: Option<&[Option<&str>]>,
    count: usize,
    msg: Option<&str>,
) -> Outcome {
    let location = Location::caller();
    if ctx.should_skip() {
        return Ok(());
    }
    let Some((expected, actual)) = array_prelude(ctx, location, count == 0, expected, actual, msg)?
    else {
        return Ok(());
    };
    if count > expected.len() || count > actual.len() {
        return short_buffer(ctx, location, msg);
    }
    for (index, (&e, &a)) in expected.iter().zip(actual).take(count).enumerate() {
        if compare::optional_strings_differ(e, a) {
            return fail_with(ctx, location, msg, |out| {
                if count > 1 {
                    print_element_index(out, index);
                }
                expected_was(out, |out| print_quoted(out, e), |out| print_quoted(out, a));
            });
        }
    }
    Ok(())
}

// Conditions and control.

#[track_caller]
pub fn is_true(ctx: &mut TestContext, condition: bool, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    if condition {
        return Ok(());
    }
    let message = msg.unwrap_or(" Expected TRUE Was FALSE");
    ctx.fail_at(location.file(), location.line(), Some(message))
}

#[track_caller]
pub fn is_false(ctx: &mut TestContext, condition: bool, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    if !condition {
        return Ok(());
    }
    let message = msg.unwrap_or(" Expected FALSE Was TRUE");
    ctx.fail_at(location.file(), location.line(), Some(message))
}

#[track_caller]
pub fn is_null<T>(ctx: &mut TestContext, pointer: *const T, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    if pointer.is_null() {
        return Ok(());
    }
    let message = msg.unwrap_or(" Expected NULL");
    ctx.fail_at(location.file(), location.line(), Some(message))
}

#[track_caller]
pub fn not_null<T>(ctx: &mut TestContext, pointer: *const T, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    if !pointer.is_null() {
        return Ok(());
    }
    let message = msg.unwrap_or(" Expected Non-NULL");
    ctx.fail_at(location.file(), location.line(), Some(message))
}

/// Compare two addresses, rendered as pointer-width hex.
#[track_caller]
pub fn pointer_equal<T>(
    ctx: &mut TestContext,
    expected: *const T,
    actual: *const T,
    msg: Option<&str>,
) -> Outcome {
    equal_number(
        ctx,
        expected as usize as i64,
        actual as usize as i64,
        DisplayStyle::POINTER,
        msg,
    )
}

/// Fail the current test unconditionally.
#[track_caller]
pub fn fail(ctx: &mut TestContext, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    ctx.fail_at(location.file(), location.line(), msg)
}

/// Fail the current test and print the line even if it already failed.
#[track_caller]
pub fn fail_no_skip(ctx: &mut TestContext, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    ctx.fail_unchecked(location.file(), location.line(), msg)
}

/// Stop the calling function if the test has already failed, reporting
/// where execution was cut short. Passes silently otherwise.
#[track_caller]
pub fn skip_on_failure(ctx: &mut TestContext, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    if !ctx.is_failed() {
        return Ok(());
    }
    ctx.fail_unchecked(location.file(), location.line(), msg)
}

/// Stop the current test and count it as ignored.
#[track_caller]
pub fn ignore(ctx: &mut TestContext, msg: Option<&str>) -> Outcome {
    let location = Location::caller();
    ctx.ignore_at(location.file(), location.line(), msg)
}
