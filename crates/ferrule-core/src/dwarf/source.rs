//! Entry decoding seam between the loader and a concrete DWARF reader.

use std::fmt;

use gimli::{DwAt, DwTag, RunTimeEndian};
use smallvec::SmallVec;

use crate::dwarf::DieId;
use crate::error::FerruleResult;

/// Byte offset of an entry, relative to the start of its compilation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DieOffset(pub usize);

impl fmt::Display for DieOffset
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "<0x{:x}>", self.0)
    }
}

/// Same-unit reference held by an attribute
///
/// Starts out pending and is memoized to the resolved entry the first time it
/// is followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference
{
    /// Entry already materialized in the unit arena
    Resolved(DieId),
    /// Offset of an entry that may not have been decoded yet
    Pending(DieOffset),
}

/// Decoded attribute value
///
/// Every DWARF form collapses to one of four kinds. Flags, enumerated
/// constants (encoding, language, accessibility) and addresses are integers.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue
{
    /// Constant, flag, address or enumerated value
    Int(i64),
    /// Location expression or raw block
    Block(SmallVec<[u8; 16]>),
    /// String, already resolved from the string tables
    Str(String),
    /// Reference to another entry of the same unit
    Ref(Reference),
}

impl AttrValue
{
    /// Integer payload
    #[must_use]
    pub const fn as_int(&self) -> Option<i64>
    {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload
    #[must_use]
    pub fn as_str(&self) -> Option<&str>
    {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Block payload
    #[must_use]
    pub fn as_block(&self) -> Option<&[u8]>
    {
        match self {
            AttrValue::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Shorthand for a block attribute
    #[must_use]
    pub fn block(bytes: &[u8]) -> Self
    {
        AttrValue::Block(SmallVec::from_slice(bytes))
    }
}

/// One record of the entry stream
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord
{
    /// A debugging information entry
    Entry
    {
        /// Offset of this entry
        offset: DieOffset,
        /// Entry tag
        tag: DwTag,
        /// Whether children (and a terminating null record) follow
        has_children: bool,
        /// Attributes in encoded order
        attrs: Vec<(DwAt, AttrValue)>,
        /// Offset of the record following this one
        next: DieOffset,
    },
    /// Terminator of a sibling chain
    Null
    {
        /// Offset of the record following the terminator
        next: DieOffset,
    },
}

/// Random-access reader over the entries of one compilation unit
///
/// The loader only ever asks for one record at a time, at offsets it got from
/// a previous record (`next`, sibling references) or from [`Self::root_offset`].
pub trait EntrySource
{
    /// Offset of the unit's root entry
    fn root_offset(&self) -> DieOffset;

    /// Decode the record at `at`
    ///
    /// ## Errors
    ///
    /// Returns [`crate::FerruleError::MalformedDebugInfo`] for offsets outside
    /// the unit or undecodable records.
    fn read_entry(&self, at: DieOffset) -> FerruleResult<RawRecord>;

    /// Size of a target address in bytes
    fn address_size(&self) -> u8;

    /// Encoding used to evaluate location expressions
    fn encoding(&self) -> gimli::Encoding;

    /// Byte order of the target
    fn endian(&self) -> RunTimeEndian;

    /// Whether the unit uses the 64-bit DWARF format
    fn is_64bit(&self) -> bool
    {
        self.encoding().format == gimli::Format::Dwarf64
    }
}
