//! Display styles selecting how integers are rendered in diagnostics.
//!
//! A style packs two independent bit-fields into one byte: the range class in
//! the high nibble (`0x10` signed, `0x20` unsigned, `0x40` hex, plus `0x80`
//! for "auto") and the byte width (1, 2, 4 or 8) in the low nibble.

use std::ffi::c_int;

const RANGE_INT: u8 = 0x10;
const RANGE_UINT: u8 = 0x20;
const RANGE_HEX: u8 = 0x40;
const RANGE_AUTO: u8 = 0x80;
const WIDTH_MASK: u8 = 0x0F;

/// Width in bytes of the platform's native C `int`.
pub const NATIVE_INT_BYTES: u8 = size_of::<c_int>() as u8;

/// Width in bytes of a data pointer.
pub const POINTER_BYTES: u8 = size_of::<usize>() as u8;

/// Numeric range class of a style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Signed,
    Unsigned,
    Hex,
}

/// Rendering descriptor: range class plus byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayStyle(u8);

impl DisplayStyle {
    pub const INT: Self = Self(RANGE_INT | RANGE_AUTO);
    pub const INT8: Self = Self(RANGE_INT | 1);
    pub const INT16: Self = Self(RANGE_INT | 2);
    pub const INT32: Self = Self(RANGE_INT | 4);
    pub const INT64: Self = Self(RANGE_INT | 8);

    pub const UINT: Self = Self(RANGE_UINT | RANGE_AUTO);
    pub const UINT8: Self = Self(RANGE_UINT | 1);
    pub const UINT16: Self = Self(RANGE_UINT | 2);
    pub const UINT32: Self = Self(RANGE_UINT | 4);
    pub const UINT64: Self = Self(RANGE_UINT | 8);

    pub const HEX8: Self = Self(RANGE_HEX | 1);
    pub const HEX16: Self = Self(RANGE_HEX | 2);
    pub const HEX32: Self = Self(RANGE_HEX | 4);
    pub const HEX64: Self = Self(RANGE_HEX | 8);

    /// Hex at pointer width.
    pub const POINTER: Self = Self(RANGE_HEX | POINTER_BYTES);

    /// Build a style from its parts. `None` width means auto (native int).
    pub const fn new(range: Range, width: Option<u8>) -> Self {
        let range_bits = match range {
            Range::Signed => RANGE_INT,
            Range::Unsigned => RANGE_UINT,
            Range::Hex => RANGE_HEX,
        };
        match width {
            Some(bytes) => Self(range_bits | (bytes & WIDTH_MASK)),
            None => Self(range_bits | RANGE_AUTO),
        }
    }

    /// Raw encoded byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn range(self) -> Range {
        if self.0 & RANGE_INT != 0 {
            Range::Signed
        } else if self.0 & RANGE_UINT != 0 {
            Range::Unsigned
        } else {
            Range::Hex
        }
    }

    pub const fn is_auto(self) -> bool {
        self.0 & RANGE_AUTO != 0
    }

    /// Byte width, resolving auto to the native int width.
    ///
    /// Widths outside 1/2/4/8 fall back to 4, matching the default stride of
    /// the array comparison.
    pub const fn width(self) -> u8 {
        if self.is_auto() {
            return NATIVE_INT_BYTES;
        }
        match self.0 & WIDTH_MASK {
            width @ (1 | 2 | 4 | 8) => width,
            _ => 4,
        }
    }

    /// All-ones mask covering the style width.
    pub const fn value_mask(self) -> u64 {
        match self.width() {
            8 => u64::MAX,
            width => (1u64 << (width as u32 * 8)) - 1,
        }
    }
}
