//! Source language and symbol location types.

use std::fmt;

use gimli::DwLang;

use crate::demangle::demangle;

/// Source language of a compilation unit
///
/// Printing, parsing and name matching all branch on the language, so it is
/// carried as a small closed enum rather than the raw `DW_LANG_*` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceLanguage
{
    /// K&R or unspecified C
    #[default]
    C,
    /// ANSI C89
    C89,
    /// C99 and later
    C99,
    /// C++
    CPlusPlus,
    /// Fortran 77
    Fortran77,
    /// Fortran 90
    Fortran90,
    /// Fortran 95 and later
    Fortran95,
    /// Any other language, printed with C conventions
    Other(u16),
}

impl SourceLanguage
{
    /// Whether identifiers compare case-insensitively
    #[must_use]
    pub const fn is_case_blind(self) -> bool
    {
        self.is_fortran()
    }

    /// Whether this is one of the Fortran dialects
    #[must_use]
    pub const fn is_fortran(self) -> bool
    {
        matches!(self, SourceLanguage::Fortran77 | SourceLanguage::Fortran90 | SourceLanguage::Fortran95)
    }

    /// Whether this is C++
    #[must_use]
    pub const fn is_cplusplus(self) -> bool
    {
        matches!(self, SourceLanguage::CPlusPlus)
    }

    /// Whether nested subprograms must be loaded eagerly
    ///
    /// Fortran contains internal procedures whose declarations must be visible
    /// without expanding the parent first, so nothing is deferred.
    #[must_use]
    pub const fn loads_eagerly(self) -> bool
    {
        self.is_fortran()
    }

    /// Compare two identifiers under this language's case rules
    #[must_use]
    pub fn names_equal(self, a: &str, b: &str) -> bool
    {
        if self.is_case_blind() {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }
}

impl From<DwLang> for SourceLanguage
{
    fn from(lang: DwLang) -> Self
    {
        match lang {
            gimli::DW_LANG_C => SourceLanguage::C,
            gimli::DW_LANG_C89 => SourceLanguage::C89,
            gimli::DW_LANG_C99 | gimli::DW_LANG_C11 => SourceLanguage::C99,
            gimli::DW_LANG_C_plus_plus
            | gimli::DW_LANG_C_plus_plus_03
            | gimli::DW_LANG_C_plus_plus_11
            | gimli::DW_LANG_C_plus_plus_14 => SourceLanguage::CPlusPlus,
            gimli::DW_LANG_Fortran77 => SourceLanguage::Fortran77,
            gimli::DW_LANG_Fortran90 => SourceLanguage::Fortran90,
            gimli::DW_LANG_Fortran95 | gimli::DW_LANG_Fortran03 | gimli::DW_LANG_Fortran08 => SourceLanguage::Fortran95,
            other => SourceLanguage::Other(other.0),
        }
    }
}

impl From<SourceLanguage> for DwLang
{
    fn from(lang: SourceLanguage) -> Self
    {
        match lang {
            SourceLanguage::C => gimli::DW_LANG_C,
            SourceLanguage::C89 => gimli::DW_LANG_C89,
            SourceLanguage::C99 => gimli::DW_LANG_C99,
            SourceLanguage::CPlusPlus => gimli::DW_LANG_C_plus_plus,
            SourceLanguage::Fortran77 => gimli::DW_LANG_Fortran77,
            SourceLanguage::Fortran90 => gimli::DW_LANG_Fortran90,
            SourceLanguage::Fortran95 => gimli::DW_LANG_Fortran95,
            SourceLanguage::Other(raw) => DwLang(raw),
        }
    }
}

impl fmt::Display for SourceLanguage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            SourceLanguage::C | SourceLanguage::C89 | SourceLanguage::C99 => "c",
            SourceLanguage::CPlusPlus => "c++",
            SourceLanguage::Fortran77 => "fortran77",
            SourceLanguage::Fortran90 | SourceLanguage::Fortran95 => "fortran90",
            SourceLanguage::Other(_) => "unknown",
        };
        write!(f, "{label}")
    }
}

/// Result of resolving an address to the nearest preceding symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolLocation
{
    /// Raw (possibly mangled) symbol name
    pub name: String,
    /// Byte offset of the address past the symbol start
    pub offset: u64,
}

impl SymbolLocation
{
    /// Helper to build a location from a symbol and offset.
    pub fn new(name: impl Into<String>, offset: u64) -> Self
    {
        Self {
            name: name.into(),
            offset,
        }
    }

    /// Preferred presentation (demangled, falling back to raw).
    #[must_use]
    pub fn display_name(&self) -> String
    {
        demangle(&self.name).unwrap_or_else(|| self.name.clone())
    }
}

impl fmt::Display for SymbolLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if self.offset == 0 {
            write!(f, "{}", self.display_name())
        } else {
            write!(f, "{}+{}", self.display_name(), self.offset)
        }
    }
}
