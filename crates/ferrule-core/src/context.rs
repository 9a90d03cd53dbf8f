//! # Evaluation Context
//!
//! [`EvalContext`] bundles everything one top-level evaluation needs: the
//! compilation unit, an optional target, the selected frame, the source
//! language and the print options. It is built per evaluation and passed by
//! `&mut` through every call; nothing here is global.
//!
//! ## Environment Variables
//!
//! [`PrintOptions::from_env`] overlays `FERRULE_PRINT_<NAME>` variables on the
//! defaults, e.g. `FERRULE_PRINT_PRETTY=on` or `FERRULE_PRINT_MAX_ELEMENTS=50`.

use std::env;
use std::fmt;

use gimli::RunTimeEndian;
use tracing::warn;

use crate::dwarf::{CompUnit, Die, DieId};
use crate::error::{FerruleError, FerruleResult};
use crate::format::Format;
use crate::target::{Target, MAX_STRING_READ};
use crate::types::{Address, Architecture, RegisterId, SourceLanguage};

/// Formatting switches
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PrintOptions
{
    /// One member per line, indented
    pub pretty: bool,
    /// One element per line for arrays
    pub pretty_arrays: bool,
    /// Runs longer than this print as `<repeats N times>`; 0 disables
    pub repeats: usize,
    /// Elements printed before `...`
    pub max_elements: usize,
    /// Significant digits for reals, 0 for "depends on the type"
    pub sig_digits: usize,
    /// Shorten aggregates and reals (used for summaries)
    pub truncate_aggregates: bool,
    /// Recognise standard-library strings
    pub stl_strings: bool,
    /// Recognise standard-library vectors
    pub stl_vectors: bool,
    /// Recognise standard-library maps
    pub stl_maps: bool,
    /// Recognise standard-library lists
    pub stl_lists: bool,
    /// Print objects through their dynamic type
    pub object: bool,
    /// Print pointer and reference addresses
    pub show_address: bool,
    /// Print the value behind references
    pub show_reference: bool,
    /// Print members when printing a type
    pub show_contents: bool,
}

impl Default for PrintOptions
{
    fn default() -> Self
    {
        Self {
            pretty: false,
            pretty_arrays: false,
            repeats: 10,
            max_elements: 200,
            sig_digits: 10,
            truncate_aggregates: false,
            stl_strings: true,
            stl_vectors: true,
            stl_maps: true,
            stl_lists: true,
            object: true,
            show_address: true,
            show_reference: true,
            show_contents: true,
        }
    }
}

impl PrintOptions
{
    /// Defaults overlaid with `FERRULE_PRINT_*` environment variables
    ///
    /// Unparsable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`
    ///
    /// `lookup` receives full variable names such as `FERRULE_PRINT_PRETTY`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        let flag = |name: &str, slot: &mut bool| {
            let var = format!("FERRULE_PRINT_{name}");
            if let Some(raw) = lookup(&var) {
                match parse_flag(&raw) {
                    Some(value) => *slot = value,
                    None => warn!(variable = %var, value = %raw, "ignoring invalid boolean"),
                }
            }
        };
        flag("PRETTY", &mut options.pretty);
        flag("PRETTY_ARRAYS", &mut options.pretty_arrays);
        flag("TRUNCATE", &mut options.truncate_aggregates);
        flag("STL_STRINGS", &mut options.stl_strings);
        flag("STL_VECTORS", &mut options.stl_vectors);
        flag("STL_MAPS", &mut options.stl_maps);
        flag("STL_LISTS", &mut options.stl_lists);
        flag("OBJECT", &mut options.object);
        flag("ADDRESS", &mut options.show_address);
        flag("REFERENCE", &mut options.show_reference);
        flag("CONTENTS", &mut options.show_contents);

        let number = |name: &str, slot: &mut usize| {
            let var = format!("FERRULE_PRINT_{name}");
            if let Some(raw) = lookup(&var) {
                match raw.trim().parse() {
                    Ok(value) => *slot = value,
                    Err(_) => warn!(variable = %var, value = %raw, "ignoring invalid number"),
                }
            }
        };
        number("REPEATS", &mut options.repeats);
        number("MAX_ELEMENTS", &mut options.max_elements);
        number("SIG_DIGITS", &mut options.sig_digits);
        options
    }

    /// Options adjusted for a language: Fortran reals print type-dependent digits
    #[must_use]
    pub fn for_language(mut self, language: SourceLanguage) -> Self
    {
        if language.is_fortran() && self.sig_digits == 10 {
            self.sig_digits = 0;
        }
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool>
{
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Per-evaluation state threaded through the type layer and the evaluator
pub struct EvalContext<'a>
{
    unit: &'a CompUnit,
    target: Option<&'a mut dyn Target>,
    function: Option<DieId>,
    /// Frame base (`DW_AT_frame_base`) of the selected frame
    pub frame_base: Option<u64>,
    /// Program counter of the selected frame
    pub pc: Option<u64>,
    /// Dialect used for parsing and printing
    pub language: SourceLanguage,
    /// Output format for scalars
    pub format: Format,
    /// Formatting switches
    pub options: PrintOptions,
    /// Evaluate lvalues to their address instead of loading them
    pub address_only: bool,
    output: String,
}

impl<'a> EvalContext<'a>
{
    /// Static-only context: no process, no frame
    #[must_use]
    pub fn new(unit: &'a CompUnit) -> Self
    {
        let language = unit.language();
        Self {
            unit,
            target: None,
            function: None,
            frame_base: None,
            pc: None,
            language,
            format: Format::default(),
            options: PrintOptions::default().for_language(language),
            address_only: false,
            output: String::new(),
        }
    }

    /// Attach a live or post-mortem target
    #[must_use]
    pub fn with_target(mut self, target: &'a mut dyn Target) -> Self
    {
        self.target = Some(target);
        self
    }

    /// Select a frame: the function's entry, its frame base and pc
    #[must_use]
    pub fn with_frame(mut self, function: Option<DieId>, frame_base: Option<u64>, pc: Option<u64>) -> Self
    {
        self.function = function;
        self.frame_base = frame_base;
        self.pc = pc;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: PrintOptions) -> Self
    {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self
    {
        self.format = format;
        self
    }

    #[must_use]
    pub fn unit(&self) -> &'a CompUnit
    {
        self.unit
    }

    /// Function entry of the selected frame
    #[must_use]
    pub fn function(&self) -> Option<Die<'a>>
    {
        self.function.map(|id| self.unit.die(id))
    }

    #[must_use]
    pub fn address_size(&self) -> usize
    {
        usize::from(self.unit.address_size())
    }

    #[must_use]
    pub fn endian(&self) -> RunTimeEndian
    {
        self.unit.endian()
    }

    /// Whether an attached target is live
    #[must_use]
    pub fn is_active(&self) -> bool
    {
        self.target.as_ref().is_some_and(|t| t.is_active())
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.target.as_ref().map_or_else(Architecture::current, |t| t.architecture())
    }

    /// The attached target
    ///
    /// ## Errors
    ///
    /// [`FerruleError::NoProcess`] if there is no target or it is not active.
    pub fn target(&self) -> FerruleResult<&dyn Target>
    {
        match &self.target {
            Some(target) if target.is_active() => Ok(&**target),
            _ => Err(FerruleError::NoProcess),
        }
    }

    /// The attached target, mutably
    ///
    /// ## Errors
    ///
    /// [`FerruleError::NoProcess`] if there is no target or it is not active.
    pub fn target_mut(&mut self) -> FerruleResult<&mut (dyn Target + 'a)>
    {
        match &mut self.target {
            Some(target) if target.is_active() => Ok(&mut **target),
            _ => Err(FerruleError::NoProcess),
        }
    }

    /// The attached target even if inactive (symbol lookups only)
    #[must_use]
    pub fn symbols(&self) -> Option<&dyn Target>
    {
        self.target.as_deref()
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> FerruleResult<Vec<u8>>
    {
        let bytes = self.target()?.read_memory(Address::new(addr), len)?;
        if bytes.len() < len {
            return Err(FerruleError::memory(addr, "short read"));
        }
        Ok(bytes)
    }

    /// Unsigned integer of `size` bytes in target byte order
    pub fn read_uint(&self, addr: u64, size: usize) -> FerruleResult<u64>
    {
        if size == 0 || size > 8 {
            return Err(FerruleError::eval(format!("Cannot load a {size} byte integer")));
        }
        let bytes = self.read_bytes(addr, size)?;
        Ok(decode_uint(&bytes, self.endian()))
    }

    /// Sign-extended integer of `size` bytes
    pub fn read_int(&self, addr: u64, size: usize) -> FerruleResult<i64>
    {
        let raw = self.read_uint(addr, size)?;
        Ok(sign_extend(raw, size))
    }

    /// Integer of `size` bytes, sign-extended when `signed`
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_value(&self, addr: u64, size: usize, signed: bool) -> FerruleResult<i64>
    {
        if signed {
            self.read_int(addr, size)
        } else {
            Ok(self.read_uint(addr, size)? as i64)
        }
    }

    /// Target pointer
    pub fn read_ptr(&self, addr: u64) -> FerruleResult<u64>
    {
        self.read_uint(addr, self.address_size())
    }

    pub fn read_string(&self, addr: u64) -> FerruleResult<String>
    {
        self.target()?.read_string(Address::new(addr), MAX_STRING_READ)
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> FerruleResult<()>
    {
        let written = self.target_mut()?.write_memory(Address::new(addr), data)?;
        if written < data.len() {
            return Err(FerruleError::memory(addr, "short write"));
        }
        Ok(())
    }

    /// Store the low `size` bytes of `value` in target byte order
    pub fn write_uint(&mut self, addr: u64, size: usize, value: u64) -> FerruleResult<()>
    {
        let bytes = encode_uint(value, size, self.endian());
        self.write_bytes(addr, &bytes)
    }

    pub fn read_register(&self, number: u16) -> FerruleResult<u64>
    {
        self.target()?.read_register(RegisterId::Dwarf(number))
    }

    pub fn write_register(&mut self, number: u16, value: u64) -> FerruleResult<()>
    {
        self.target_mut()?.write_register(RegisterId::Dwarf(number), value)
    }

    /// Append to the output sink
    pub fn emit(&mut self, text: &str)
    {
        self.output.push_str(text);
    }

    /// Drain the output sink
    pub fn take_output(&mut self) -> String
    {
        std::mem::take(&mut self.output)
    }
}

impl fmt::Debug for EvalContext<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("EvalContext")
            .field("language", &self.language)
            .field("frame_base", &self.frame_base)
            .field("pc", &self.pc)
            .field("has_target", &self.target.is_some())
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Decode up to 8 bytes as an unsigned integer
#[must_use]
pub fn decode_uint(bytes: &[u8], endian: RunTimeEndian) -> u64
{
    let take = bytes.len().min(8);
    let mut value = 0u64;
    if endian == RunTimeEndian::Big {
        for byte in &bytes[..take] {
            value = (value << 8) | u64::from(*byte);
        }
    } else {
        for byte in bytes[..take].iter().rev() {
            value = (value << 8) | u64::from(*byte);
        }
    }
    value
}

/// Encode the low `size` bytes of `value`
#[must_use]
pub fn encode_uint(value: u64, size: usize, endian: RunTimeEndian) -> Vec<u8>
{
    let size = size.min(8);
    let le = value.to_le_bytes();
    let mut bytes = le[..size].to_vec();
    if endian == RunTimeEndian::Big {
        bytes.reverse();
    }
    bytes
}

/// Sign-extend the low `size` bytes of `raw`
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn sign_extend(raw: u64, size: usize) -> i64
{
    if size == 0 || size >= 8 {
        return raw as i64;
    }
    let shift = 64 - size * 8;
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_print_options_from_lookup()
    {
        let vars: HashMap<&str, &str> = [
            ("FERRULE_PRINT_PRETTY", "on"),
            ("FERRULE_PRINT_MAX_ELEMENTS", "50"),
            ("FERRULE_PRINT_STL_MAPS", "0"),
            ("FERRULE_PRINT_REPEATS", "lots"),
        ]
        .into_iter()
        .collect();
        let options = PrintOptions::from_lookup(|name| vars.get(name).map(|v| (*v).to_string()));
        assert!(options.pretty);
        assert_eq!(options.max_elements, 50);
        assert!(!options.stl_maps);
        assert_eq!(options.repeats, 10);
    }

    #[test]
    fn test_fortran_sig_digits()
    {
        let options = PrintOptions::default().for_language(SourceLanguage::Fortran90);
        assert_eq!(options.sig_digits, 0);
        let options = PrintOptions::default().for_language(SourceLanguage::C);
        assert_eq!(options.sig_digits, 10);
    }

    #[test]
    fn test_integer_codec()
    {
        assert_eq!(decode_uint(&[0x34, 0x12], RunTimeEndian::Little), 0x1234);
        assert_eq!(decode_uint(&[0x12, 0x34], RunTimeEndian::Big), 0x1234);
        assert_eq!(encode_uint(0x1234, 2, RunTimeEndian::Big), vec![0x12, 0x34]);
        assert_eq!(sign_extend(0xff, 1), -1);
        assert_eq!(sign_extend(0x7f, 1), 127);
    }
}
