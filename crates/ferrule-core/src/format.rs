//! # Format Codes
//!
//! Rendering of scalar values under a `/FMT` format specification.
//!
//! A format is an optional repeat count, a code letter and a size letter:
//!
//! | code | meaning            | size | width            |
//! |------|--------------------|------|------------------|
//! | `o`  | octal              | `b`  | byte             |
//! | `x`  | hexadecimal        | `h`  | halfword (16)    |
//! | `d`  | signed decimal     | `w`  | word (32)        |
//! | `u`  | unsigned decimal   | `g`  | giant word (64)  |
//! | `t`  | binary             |      |                  |
//! | `f`  | floating point     |      |                  |
//! | `a`  | address            |      |                  |
//! | `c`  | character          |      |                  |
//! | `s`  | string             |      |                  |
//! | `i`  | instruction        |      |                  |
//!
//! Anything left unspecified is *native*: the natural rendering for the
//! value's type. `fill` pads hexadecimal and octal output with zeroes to the
//! width of the requested size.
//!
//! ## Example
//!
//! ```rust
//! use ferrule_core::format::{format_integer, Format};
//!
//! let fmt: Format = "/xh".parse().unwrap();
//! assert_eq!(format_integer(&fmt, 0x2a, 2, false).unwrap(), "0x2a");
//! assert_eq!(format_integer(&fmt.filled(), 0x2a, 2, false).unwrap(), "0x002a");
//! ```

use std::fmt::Write as _;
use std::str::FromStr;

use crate::context::PrintOptions;
use crate::error::{FerruleError, FerruleResult};
use crate::types::SourceLanguage;

/// Format code letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatCode
{
    /// `o`
    Octal,
    /// `x`
    Hex,
    /// `d`
    Decimal,
    /// `u`
    Unsigned,
    /// `t`
    Binary,
    /// `f`
    Float,
    /// `a`
    Address,
    /// `c`
    Char,
    /// `s`
    String,
    /// `i`
    Instruction,
    /// `n` or absent
    #[default]
    Native,
}

impl FormatCode
{
    fn from_letter(letter: char) -> Option<Self>
    {
        Some(match letter {
            'o' => FormatCode::Octal,
            'x' => FormatCode::Hex,
            'd' => FormatCode::Decimal,
            'u' => FormatCode::Unsigned,
            't' => FormatCode::Binary,
            'f' => FormatCode::Float,
            'a' => FormatCode::Address,
            'c' => FormatCode::Char,
            's' => FormatCode::String,
            'i' => FormatCode::Instruction,
            'n' => FormatCode::Native,
            _ => return None,
        })
    }
}

/// Format size letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatSize
{
    /// `b`
    Byte,
    /// `h`
    Half,
    /// `w`
    Word,
    /// `g`
    Giant,
    /// Size of the value's type
    #[default]
    Native,
}

impl FormatSize
{
    fn from_letter(letter: char) -> Option<Self>
    {
        Some(match letter {
            'b' => FormatSize::Byte,
            'h' => FormatSize::Half,
            'w' => FormatSize::Word,
            'g' => FormatSize::Giant,
            _ => return None,
        })
    }

    /// Width in bytes, `None` for native
    #[must_use]
    pub const fn bytes(self) -> Option<usize>
    {
        match self {
            FormatSize::Byte => Some(1),
            FormatSize::Half => Some(2),
            FormatSize::Word => Some(4),
            FormatSize::Giant => Some(8),
            FormatSize::Native => None,
        }
    }
}

/// Parsed `/FMT` specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format
{
    /// Repeat count (used by memory examination)
    pub count: u16,
    /// Code letter
    pub code: FormatCode,
    /// Size letter
    pub size: FormatSize,
    /// Pad hex and octal output with zeroes
    pub fill: bool,
}

impl Default for Format
{
    fn default() -> Self
    {
        Format {
            count: 1,
            code: FormatCode::Native,
            size: FormatSize::Native,
            fill: false,
        }
    }
}

impl Format
{
    /// Same format with zero fill enabled
    #[must_use]
    pub const fn filled(mut self) -> Self
    {
        self.fill = true;
        self
    }

    /// Whether the code is native
    #[must_use]
    pub fn is_native(&self) -> bool
    {
        self.code == FormatCode::Native
    }
}

impl FromStr for Format
{
    type Err = FerruleError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let spec = s.trim().strip_prefix('/').unwrap_or(s.trim());
        let digits: String = spec.chars().take_while(char::is_ascii_digit).collect();
        let mut format = Format::default();
        if !digits.is_empty() {
            format.count = digits
                .parse()
                .map_err(|_| FerruleError::syntax(format!("Invalid repeat count \"{digits}\"")))?;
        }
        for letter in spec[digits.len()..].chars() {
            if let Some(size) = FormatSize::from_letter(letter) {
                format.size = size;
            } else if let Some(code) = FormatCode::from_letter(letter) {
                format.code = code;
            } else {
                return Err(FerruleError::syntax(format!("Undefined output format \"{letter}\"")));
            }
        }
        Ok(format)
    }
}

/// Sign-extend or zero-extend the low `size` bytes of `value`
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn truncate_to_size(value: i64, size: usize, signed: bool) -> i64
{
    if size == 0 || size >= 8 {
        return value;
    }
    let shift = 64 - size * 8;
    if signed {
        (value << shift) >> shift
    } else {
        (((value as u64) << shift) >> shift) as i64
    }
}

fn hex_width(size: usize) -> usize
{
    size * 2
}

fn octal_width(size: usize) -> usize
{
    (size * 8).div_ceil(3)
}

/// Binary digits of the low `bits` bits, without leading zeroes
#[must_use]
pub fn format_binary(value: i64, bits: usize) -> String
{
    let mut out = String::new();
    for i in (0..bits.min(64)).rev() {
        let set = (value >> i) & 1 == 1;
        if set || !out.is_empty() || i == 0 {
            out.push(if set { '1' } else { '0' });
        }
    }
    out
}

/// Render an integer of `size` bytes
///
/// ## Errors
///
/// `i` (instruction) cannot be applied to an integer.
#[allow(clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn format_integer(fmt: &Format, value: i64, size: usize, signed: bool) -> FerruleResult<String>
{
    let width = fmt.size.bytes().unwrap_or(size.max(1));
    let unsigned = truncate_to_size(value, width, false) as u64;
    Ok(match fmt.code {
        FormatCode::Hex | FormatCode::Address if fmt.fill => format!("0x{unsigned:0w$x}", w = hex_width(width)),
        FormatCode::Hex | FormatCode::Address => format!("0x{unsigned:x}"),
        FormatCode::Octal if fmt.fill => format!("0{unsigned:0w$o}", w = octal_width(width)),
        FormatCode::Octal => format!("0{unsigned:o}"),
        FormatCode::Decimal => truncate_to_size(value, width, true).to_string(),
        FormatCode::Unsigned => unsigned.to_string(),
        FormatCode::Binary => format_binary(value, width * 8),
        FormatCode::Float => {
            #[allow(clippy::cast_possible_truncation)]
            let real = if width == 4 {
                f64::from(f32::from_bits(unsigned as u32))
            } else if width == 8 {
                f64::from_bits(unsigned)
            } else {
                value as f64
            };
            format_g(real, 10)
        }
        FormatCode::Char => {
            #[allow(clippy::cast_possible_truncation)]
            let byte = unsigned as u8;
            format!("'{}'", escape_char(byte, '\''))
        }
        FormatCode::Instruction => return Err(FerruleError::eval("Cannot disassemble an integer")),
        FormatCode::String | FormatCode::Native => {
            if signed {
                truncate_to_size(value, size, true).to_string()
            } else {
                (truncate_to_size(value, size, false) as u64).to_string()
            }
        }
    })
}

/// Render a character of one byte
///
/// Native rendering is the numeric value followed by the quoted character.
///
/// ## Errors
///
/// See [`format_integer`].
pub fn format_char(fmt: &Format, value: i64, signed: bool) -> FerruleResult<String>
{
    if !fmt.is_native() {
        return format_integer(fmt, value, 1, signed);
    }
    let number = truncate_to_size(value, 1, signed);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let byte = number as u8;
    Ok(format!("{number} '{}'", escape_char(byte, '\'')))
}

/// Render a boolean in the language's spelling
///
/// ## Errors
///
/// See [`format_integer`].
pub fn format_bool(fmt: &Format, value: bool, language: SourceLanguage) -> FerruleResult<String>
{
    if !fmt.is_native() {
        return format_integer(fmt, i64::from(value), 4, false);
    }
    let text = match language {
        SourceLanguage::C | SourceLanguage::C89 | SourceLanguage::C99 => {
            if value {
                "TRUE"
            } else {
                "FALSE"
            }
        }
        SourceLanguage::CPlusPlus => {
            if value {
                "true"
            } else {
                "false"
            }
        }
        l if l.is_fortran() => {
            if value {
                ".true."
            } else {
                ".false."
            }
        }
        _ => {
            if value {
                "1"
            } else {
                "0"
            }
        }
    };
    Ok(text.to_string())
}

/// Render a real under a format
///
/// Native C rendering uses `sig_digits` significant digits (`%g` style);
/// native Fortran rendering uses `sig_digits` fixed decimals. Integer codes
/// convert the value to an integer first.
///
/// ## Errors
///
/// See [`format_integer`].
#[allow(clippy::cast_possible_truncation)]
pub fn format_real(fmt: &Format, value: f64, sig_digits: usize, truncate: bool) -> FerruleResult<String>
{
    match fmt.code {
        FormatCode::Native => {
            if truncate {
                Ok(format_g(value, sig_digits))
            } else {
                Ok(format!("{value:.sig_digits$}"))
            }
        }
        FormatCode::Float => Ok(format_g(value, 10)),
        FormatCode::Binary => Ok(format_binary(value as i64, 64)),
        _ => format_integer(fmt, value as i64, 8, true),
    }
}

/// C `%.<precision>g` formatting
#[must_use]
pub fn format_g(value: f64, precision: usize) -> String
{
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let precision = precision.max(1);
    let scientific = format!("{value:.p$e}", p = precision - 1);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    let p = precision as i32;
    if exponent < -4 || exponent >= p {
        let mantissa = strip_fraction_zeros(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    } else {
        #[allow(clippy::cast_sign_loss)]
        let decimals = (p - 1 - exponent) as usize;
        strip_fraction_zeros(&format!("{value:.decimals$}")).to_string()
    }
}

fn strip_fraction_zeros(text: &str) -> &str
{
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Escape one byte for display inside `quote` delimiters
#[must_use]
pub fn escape_char(byte: u8, quote: char) -> String
{
    match byte {
        b'\n' => "\\n".to_string(),
        b'\r' => "\\r".to_string(),
        0x07 => "\\a".to_string(),
        b'\t' => "\\t".to_string(),
        0x0b => "\\v".to_string(),
        0x08 => "\\b".to_string(),
        0x0c => "\\f".to_string(),
        b'\\' => "\\\\".to_string(),
        0 => "\\0".to_string(),
        27 => "\\e".to_string(),
        b if char::from(b) == quote => format!("\\{quote}"),
        b if b.is_ascii_graphic() || b == b' ' => char::from(b).to_string(),
        b => format!("\\{b:03o}"),
    }
}

/// Escape a string body, compressing runs and honouring the element limit
///
/// Runs of at least `options.repeats` identical characters print as
/// ` <repeats N times>`; output stops with `...` after
/// `options.max_elements` characters (100 when aggregates are truncated).
#[must_use]
pub fn escape_string(text: &[u8], quote: char, options: &PrintOptions) -> String
{
    let mut max_chars = options.max_elements;
    if options.truncate_aggregates {
        max_chars = max_chars.min(100);
    }
    let mut out = String::new();
    let mut i = 0;
    let mut emitted = 0;
    while i < text.len() {
        let byte = text[i];
        if byte == 0 {
            break;
        }
        let run = text[i..].iter().take_while(|&&b| b == byte).count();
        if emitted >= max_chars {
            out.push_str("...");
            break;
        }
        if options.repeats > 0 && run > options.repeats {
            let _ = write!(out, "{} <repeats {run} times>", escape_char(byte, quote));
            emitted += 1;
            i += run;
        } else {
            out.push_str(&escape_char(byte, quote));
            emitted += 1;
            i += 1;
        }
    }
    out
}

/// Replace verbose standard-library spellings with their common names
#[must_use]
pub fn simplify_type_name(name: &str) -> String
{
    const VERBOSE: &str = "basic_string<char,std::char_traits<char>,std::allocator<char> >";
    name.replace(&format!("std::{VERBOSE}"), "std::string").replace(VERBOSE, "std::string")
}

#[cfg(test)]
mod tests
{
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_format()
    {
        let fmt: Format = "/4xh".parse().unwrap();
        assert_eq!(fmt.count, 4);
        assert_eq!(fmt.code, FormatCode::Hex);
        assert_eq!(fmt.size, FormatSize::Half);
        assert!(!fmt.fill);
        assert!("/q".parse::<Format>().is_err());
        assert_eq!("".parse::<Format>().unwrap(), Format::default());
    }

    #[test]
    fn test_hex_halfword()
    {
        let fmt: Format = "xh".parse().unwrap();
        assert_eq!(format_integer(&fmt, 0x1f, 2, false).unwrap(), "0x1f");
        assert_eq!(format_integer(&fmt.filled(), 0x1f, 2, false).unwrap(), "0x001f");
        assert_eq!(format_integer(&fmt, -1, 2, true).unwrap(), "0xffff");
    }

    #[test]
    fn test_octal_and_binary()
    {
        let octal: Format = "o".parse().unwrap();
        assert_eq!(format_integer(&octal, 8, 4, false).unwrap(), "010");
        let binary: Format = "t".parse().unwrap();
        assert_eq!(format_integer(&binary, 5, 1, false).unwrap(), "101");
        assert_eq!(format_integer(&binary, 0, 1, false).unwrap(), "0");
    }

    #[test]
    fn test_native_integers_respect_sign()
    {
        let fmt = Format::default();
        assert_eq!(format_integer(&fmt, 0xff, 1, true).unwrap(), "-1");
        assert_eq!(format_integer(&fmt, 0xff, 1, false).unwrap(), "255");
        assert_eq!(format_integer(&fmt, -1, 8, false).unwrap(), "18446744073709551615");
    }

    #[test]
    fn test_instruction_code_on_integer()
    {
        let fmt: Format = "i".parse().unwrap();
        assert!(format_integer(&fmt, 1, 4, true).is_err());
    }

    #[test]
    fn test_char_rendering()
    {
        let fmt = Format::default();
        assert_eq!(format_char(&fmt, 65, true).unwrap(), "65 'A'");
        assert_eq!(format_char(&fmt, 10, true).unwrap(), "10 '\\n'");
        assert_eq!(format_char(&fmt, 1, false).unwrap(), "1 '\\001'");
    }

    #[test]
    fn test_bool_per_language()
    {
        let fmt = Format::default();
        assert_eq!(format_bool(&fmt, true, SourceLanguage::CPlusPlus).unwrap(), "true");
        assert_eq!(format_bool(&fmt, false, SourceLanguage::C).unwrap(), "FALSE");
        assert_eq!(format_bool(&fmt, true, SourceLanguage::Fortran90).unwrap(), ".true.");
    }

    #[test]
    fn test_format_g()
    {
        assert_eq!(format_g(1.5, 10), "1.5");
        assert_eq!(format_g(100.0, 10), "100");
        assert_eq!(format_g(0.0001, 10), "0.0001");
        assert_eq!(format_g(1.0e-5, 10), "1e-05");
        assert_eq!(format_g(1.0e20, 10), "1e+20");
        assert_eq!(format_g(3.141_592_653_589_793, 4), "3.142");
    }

    #[test]
    fn test_escape_string_repeats_and_limit()
    {
        let options = PrintOptions::default();
        assert_eq!(escape_string(b"ab\"c", '"', &options), "ab\\\"c");
        let run = vec![b'x'; 20];
        assert_eq!(escape_string(&run, '"', &options), "x <repeats 20 times>");
        let limited = PrintOptions {
            max_elements: 3,
            ..PrintOptions::default()
        };
        assert_eq!(escape_string(b"abcdef", '"', &limited), "abc...");
    }

    #[test]
    fn test_simplify_type_name()
    {
        assert_eq!(
            simplify_type_name("std::basic_string<char,std::char_traits<char>,std::allocator<char> >"),
            "std::string"
        );
        assert_eq!(
            simplify_type_name("basic_string<char,std::char_traits<char>,std::allocator<char> >"),
            "std::string"
        );
        assert_eq!(
            simplify_type_name("map<std::basic_string<char,std::char_traits<char>,std::allocator<char> >, int>"),
            "map<std::string, int>"
        );
    }

    proptest! {
        #[test]
        fn test_unfilled_hex_has_no_leading_zeros(v in 1u16..)
        {
            let fmt: Format = "xh".parse().unwrap();
            let text = format_integer(&fmt, i64::from(v), 2, false).unwrap();
            prop_assert!(!text.starts_with("0x0"));
            prop_assert_eq!(text, format!("0x{v:x}"));
        }

        #[test]
        fn test_filled_hex_has_fixed_width(v in any::<u16>())
        {
            let fmt: Format = "xh".parse().unwrap();
            let text = format_integer(&fmt.filled(), i64::from(v), 2, false).unwrap();
            prop_assert_eq!(text.len(), 6);
        }
    }
}
