//! Pure comparison rules used by the assertion evaluator.
//!
//! Nothing here touches the output sink or the test context; each function
//! answers "does this comparison fail?".

use std::ops::{Mul, Sub};

use crate::core::style::{DisplayStyle, Range};

/// Floating-point types the evaluator accepts.
pub trait FloatValue: Copy + PartialOrd + Sub<Output = Self> + Mul<Output = Self> {
    const ZERO: Self;
    const INFINITY: Self;
    const NEG_INFINITY: Self;
    /// Relative tolerance used by equality and array comparisons.
    const PRECISION: Self;

    fn to_f64(self) -> f64;
}

impl FloatValue for f32 {
    const ZERO: Self = 0.0;
    const INFINITY: Self = f32::INFINITY;
    const NEG_INFINITY: Self = f32::NEG_INFINITY;
    const PRECISION: Self = 0.00001;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl FloatValue for f64 {
    const ZERO: Self = 0.0;
    const INFINITY: Self = f64::INFINITY;
    const NEG_INFINITY: Self = f64::NEG_INFINITY;
    const PRECISION: Self = 1e-12;

    fn to_f64(self) -> f64 {
        self
    }
}

fn non_negative<F: FloatValue>(value: F) -> F {
    if value < F::ZERO { F::ZERO - value } else { value }
}

/// True if `diff` is NaN or infinite: `x * 0` is `0` only for finite `x`.
#[allow(clippy::eq_op)]
pub fn is_non_finite<F: FloatValue>(diff: F) -> bool {
    diff * F::ZERO != F::ZERO
}

/// True if `actual` is not within `delta` of `expected`.
///
/// A NaN or infinite difference always fails, whatever the delta.
pub fn floats_differ<F: FloatValue>(delta: F, expected: F, actual: F) -> bool {
    let diff = non_negative(actual - expected);
    let delta = non_negative(delta);
    is_non_finite(diff) || delta < diff
}

/// Tolerance for equality comparisons: precision scaled by the expected value.
pub fn relative_delta<F: FloatValue>(expected: F) -> F {
    non_negative(F::PRECISION * expected)
}

/// True if `x` is NaN.
#[allow(clippy::eq_op)]
pub fn is_nan<F: FloatValue>(x: F) -> bool {
    x != x
}

/// True if `actual` is further than `delta` from `expected`.
///
/// Unsigned and hex styles compare with unsigned arithmetic so values above
/// `i64::MAX` are not sign-extended.
pub fn numbers_differ(delta: i64, expected: i64, actual: i64, style: DisplayStyle) -> bool {
    match style.range() {
        Range::Signed => delta < 0 || actual.abs_diff(expected) > delta as u64,
        Range::Unsigned | Range::Hex => (actual as u64).abs_diff(expected as u64) > delta as u64,
    }
}

/// True if the masked bits of `expected` and `actual` differ.
pub fn bits_differ(mask: u64, expected: u64, actual: u64) -> bool {
    (mask & expected) != (mask & actual)
}

/// Byte at `index`, reading the end of the slice as a terminator.
fn byte_at(text: &[u8], index: usize) -> u8 {
    text.get(index).copied().unwrap_or(0)
}

/// Compare two byte strings up to their terminators (end of slice or NUL).
pub fn c_strings_differ(expected: &[u8], actual: &[u8]) -> bool {
    let mut index = 0;
    loop {
        let (e, a) = (byte_at(expected, index), byte_at(actual, index));
        if e != a {
            return true;
        }
        if e == 0 {
            return false;
        }
        index += 1;
    }
}

/// Compare two optional strings: both absent is equal, one absent differs.
pub fn optional_strings_differ(expected: Option<&str>, actual: Option<&str>) -> bool {
    match (expected, actual) {
        (Some(expected), Some(actual)) => c_strings_differ(expected.as_bytes(), actual.as_bytes()),
        (None, None) => false,
        _ => true,
    }
}
