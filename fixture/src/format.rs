//! Value formatter: renders numbers, masks and strings onto an output sink.
//!
//! Digits are produced by divisor scaling rather than `format!`, so the sink
//! sees exactly one call per character. Floats are the exception and go
//! through `format!` for the six-decimal rendering.

use crate::core::style::{DisplayStyle, NATIVE_INT_BYTES, Range};
use crate::io::sink::OutputSink;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Print `text` up to its first NUL, escaping anything outside printable ASCII.
///
/// CR and LF become the two-character sequences `\r` and `\n`; any other
/// non-printable byte becomes `\` followed by two uppercase hex digits.
pub fn print_str(out: &mut dyn OutputSink, text: &[u8]) {
    for &byte in text.iter().take_while(|&&byte| byte != 0) {
        match byte {
            32..=126 => out.put_char(byte),
            b'\r' => {
                out.put_char(b'\\');
                out.put_char(b'r');
            }
            b'\n' => {
                out.put_char(b'\\');
                out.put_char(b'n');
            }
            _ => {
                out.put_char(b'\\');
                put_nibbles(out, u64::from(byte), 2);
            }
        }
    }
}

/// Print a signed decimal with a leading `-` for negatives.
pub fn print_signed(out: &mut dyn OutputSink, value: i64) {
    if value < 0 {
        out.put_char(b'-');
    }
    print_unsigned(out, value.unsigned_abs());
}

/// Print an unsigned decimal with no leading zeros.
pub fn print_unsigned(out: &mut dyn OutputSink, value: u64) {
    let mut divisor: u64 = 1;
    while value / divisor > 9 {
        divisor *= 10;
    }
    loop {
        out.put_char(b'0' + (value / divisor % 10) as u8);
        divisor /= 10;
        if divisor == 0 {
            break;
        }
    }
}

/// Print `0x` followed by exactly `nibbles` uppercase hex digits.
pub fn print_hex(out: &mut dyn OutputSink, value: u64, nibbles: u8) {
    out.put_char(b'0');
    out.put_char(b'x');
    put_nibbles(out, value, nibbles);
}

fn put_nibbles(out: &mut dyn OutputSink, value: u64, nibbles: u8) {
    for index in (0..u32::from(nibbles.min(16))).rev() {
        let nibble = (value >> (index * 4)) & 0xF;
        out.put_char(HEX_DIGITS[nibble as usize]);
    }
}

/// Print `value` the way `style` asks for.
///
/// Unsigned styles mask the value to the style width first; hex styles print
/// two nibbles per byte of width.
pub fn print_by_style(out: &mut dyn OutputSink, value: i64, style: DisplayStyle) {
    match style.range() {
        Range::Signed => print_signed(out, value),
        Range::Unsigned => print_unsigned(out, value as u64 & style.value_mask()),
        Range::Hex => print_hex(out, value as u64, style.width() * 2),
    }
}

/// Print one character per bit, most significant first.
///
/// Bits covered by `mask` print as `1` or `0`; others print as `X`. The
/// rendering spans the native int width unless the mask reaches above it.
pub fn print_mask(out: &mut dyn OutputSink, mask: u64, value: u64) {
    let native_bits = u32::from(NATIVE_INT_BYTES) * 8;
    let bits = if native_bits < 64 && mask >> native_bits != 0 {
        64
    } else {
        native_bits.min(64)
    };
    for index in (0..bits).rev() {
        let bit = 1u64 << index;
        let ch = match (mask & bit != 0, value & bit != 0) {
            (false, _) => b'X',
            (true, true) => b'1',
            (true, false) => b'0',
        };
        out.put_char(ch);
    }
}

/// Print a float with six decimals, or a word for non-finite values.
pub fn print_float(out: &mut dyn OutputSink, value: f64) {
    if value.is_nan() {
        out.put_str("NaN");
    } else if value == f64::INFINITY {
        out.put_str("Infinity");
    } else if value == f64::NEG_INFINITY {
        out.put_str("Negative Infinity");
    } else {
        out.put_str(&format!("{value:.6}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sink::BufferSink;

    fn render(print: impl FnOnce(&mut dyn OutputSink)) -> String {
        let mut sink = BufferSink::new();
        print(&mut sink);
        sink.contents()
    }

    #[test]
    fn strings_escape_control_bytes() {
        assert_eq!(render(|out| print_str(out, b"ab c~")), "ab c~");
        assert_eq!(render(|out| print_str(out, b"a\r\nb")), "a\\r\\nb");
        assert_eq!(render(|out| print_str(out, b"\x01\x7f\xff")), "\\01\\7F\\FF");
    }

    #[test]
    fn strings_stop_at_nul() {
        assert_eq!(render(|out| print_str(out, b"abc\0def")), "abc");
    }

    #[test]
    fn signed_decimals() {
        assert_eq!(render(|out| print_signed(out, 0)), "0");
        assert_eq!(render(|out| print_signed(out, 7)), "7");
        assert_eq!(render(|out| print_signed(out, -120)), "-120");
        assert_eq!(
            render(|out| print_signed(out, i64::MIN)),
            "-9223372036854775808"
        );
    }

    #[test]
    fn unsigned_decimals_cover_full_range() {
        assert_eq!(render(|out| print_unsigned(out, 10)), "10");
        assert_eq!(
            render(|out| print_unsigned(out, u64::MAX)),
            "18446744073709551615"
        );
    }

    #[test]
    fn hex_prints_fixed_nibbles() {
        assert_eq!(render(|out| print_hex(out, 0xAB, 4)), "0x00AB");
        assert_eq!(render(|out| print_hex(out, 0x1234, 2)), "0x34");
        assert_eq!(render(|out| print_hex(out, u64::MAX, 16)), "0xFFFFFFFFFFFFFFFF");
    }

    #[test]
    fn style_selects_rendering() {
        assert_eq!(render(|out| print_by_style(out, -1, DisplayStyle::INT)), "-1");
        assert_eq!(render(|out| print_by_style(out, -1, DisplayStyle::UINT8)), "255");
        assert_eq!(
            render(|out| print_by_style(out, -1, DisplayStyle::UINT16)),
            "65535"
        );
        assert_eq!(render(|out| print_by_style(out, 0x2A, DisplayStyle::HEX8)), "0x2A");
        assert_eq!(
            render(|out| print_by_style(out, 0x2A, DisplayStyle::HEX32)),
            "0x0000002A"
        );
    }

    #[test]
    fn mask_marks_uncovered_bits() {
        let text = render(|out| print_mask(out, 0b1010, 0b1000));
        let width = usize::from(NATIVE_INT_BYTES) * 8;
        assert_eq!(text.len(), width);
        assert!(text.ends_with("1X0X"));
        assert!(text[..width - 4].bytes().all(|b| b == b'X'));
    }

    #[test]
    fn mask_widens_for_high_bits() {
        let text = render(|out| print_mask(out, 1 << 63, 1 << 63));
        assert_eq!(text.len(), 64);
        assert!(text.starts_with('1'));
    }

    #[test]
    fn floats_use_six_decimals_and_words() {
        assert_eq!(render(|out| print_float(out, 1.5)), "1.500000");
        assert_eq!(render(|out| print_float(out, -0.25)), "-0.250000");
        assert_eq!(render(|out| print_float(out, f64::NAN)), "NaN");
        assert_eq!(render(|out| print_float(out, f64::INFINITY)), "Infinity");
        assert_eq!(
            render(|out| print_float(out, f64::NEG_INFINITY)),
            "Negative Infinity"
        );
    }
}
