//! Borrowed entry handles.

use std::fmt;

use gimli::{constants, DwAt, DwTag};

use crate::dwarf::source::{AttrValue, DieOffset};
use crate::dwarf::{CompUnit, DieId};
use crate::error::FerruleResult;
use crate::types::SourceLanguage;

/// Handle to one entry, bounded by the lifetime of its compilation unit
///
/// Handles are `Copy` and compare by identity. Every accessor goes through the
/// unit, so deferred children and pending references are expanded on demand.
#[derive(Clone, Copy)]
pub struct Die<'u>
{
    unit: &'u CompUnit,
    id: DieId,
}

impl<'u> Die<'u>
{
    pub(crate) const fn new(unit: &'u CompUnit, id: DieId) -> Self
    {
        Self { unit, id }
    }

    #[must_use]
    pub fn id(self) -> DieId
    {
        self.id
    }

    #[must_use]
    pub fn unit(self) -> &'u CompUnit
    {
        self.unit
    }

    #[must_use]
    pub fn tag(self) -> DwTag
    {
        self.unit.with_entry(self.id, |entry| entry.tag)
    }

    /// Offset in the unit, `None` for synthesized entries
    #[must_use]
    pub fn offset(self) -> Option<DieOffset>
    {
        self.unit.with_entry(self.id, |entry| entry.offset)
    }

    #[must_use]
    pub fn language(self) -> SourceLanguage
    {
        self.unit.language()
    }

    /// Attribute along the declaration chain (own, origin/specification, more info)
    ///
    /// ## Errors
    ///
    /// Following the chain may decode deferred subtrees.
    pub fn attr(self, at: DwAt) -> FerruleResult<Option<AttrValue>>
    {
        self.unit.attr(self.id, at, true)
    }

    /// Attribute of this entry only
    #[must_use]
    pub fn own_attr(self, at: DwAt) -> Option<AttrValue>
    {
        self.unit.own_attr(self.id, at)
    }

    /// Integer attribute along the declaration chain
    ///
    /// ## Errors
    ///
    /// See [`Die::attr`].
    pub fn attr_int(self, at: DwAt) -> FerruleResult<Option<i64>>
    {
        Ok(self.attr(at)?.and_then(|v| v.as_int()))
    }

    /// Whether the attribute is present anywhere along the declaration chain
    ///
    /// ## Errors
    ///
    /// See [`Die::attr`].
    pub fn has_attr(self, at: DwAt) -> FerruleResult<bool>
    {
        Ok(self.attr(at)?.is_some())
    }

    /// Source name, or empty for anonymous entries
    ///
    /// ## Errors
    ///
    /// See [`Die::attr`].
    pub fn name(self) -> FerruleResult<String>
    {
        Ok(self
            .attr(constants::DW_AT_name)?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    /// Name used in the symbol table
    ///
    /// Prefers the linkage name so the result can be passed to symbol lookups.
    ///
    /// ## Errors
    ///
    /// See [`Die::attr`].
    pub fn symbol_name(self) -> FerruleResult<String>
    {
        for at in [constants::DW_AT_linkage_name, constants::DW_AT_MIPS_linkage_name] {
            if let Some(AttrValue::Str(name)) = self.attr(at)? {
                return Ok(name);
            }
        }
        self.name()
    }

    /// Entry referenced by an attribute, resolving lazily
    ///
    /// A reference that cannot be resolved reads as absent.
    ///
    /// ## Errors
    ///
    /// Propagates decoding failures and non-reference forms.
    pub fn reference(self, at: DwAt) -> FerruleResult<Option<Die<'u>>>
    {
        Ok(self
            .unit
            .reference(self.id, at, true)?
            .map(|id| Die::new(self.unit, id)))
    }

    /// Entry named by `DW_AT_type`, `None` for `void`
    ///
    /// ## Errors
    ///
    /// See [`Die::reference`].
    pub fn type_die(self) -> FerruleResult<Option<Die<'u>>>
    {
        self.reference(constants::DW_AT_type)
    }

    /// Children, expanding a deferred subtree first
    ///
    /// ## Errors
    ///
    /// Propagates decoding failures.
    pub fn children(self) -> FerruleResult<Vec<Die<'u>>>
    {
        Ok(self
            .unit
            .children(self.id)?
            .into_iter()
            .map(|id| Die::new(self.unit, id))
            .collect())
    }

    /// Whether the children are materialized (no deferred marker)
    #[must_use]
    pub fn is_loaded(self) -> bool
    {
        self.unit.is_loaded(self.id)
    }

    /// Decode deferred children if needed; idempotent
    ///
    /// ## Errors
    ///
    /// Propagates decoding failures.
    pub fn check_loaded(self) -> FerruleResult<()>
    {
        self.unit.check_loaded(self.id)
    }

    #[must_use]
    pub fn parent(self) -> Option<Die<'u>>
    {
        self.unit
            .with_entry(self.id, |entry| entry.parent)
            .map(|id| Die::new(self.unit, id))
    }

    /// Definition entry completing this declaration
    #[must_use]
    pub fn more_info(self) -> Option<Die<'u>>
    {
        self.unit
            .with_entry(self.id, |entry| entry.more_info)
            .map(|id| Die::new(self.unit, id))
    }

    #[must_use]
    pub fn is_declaration(self) -> bool
    {
        self.own_attr(constants::DW_AT_declaration)
            .and_then(|v| v.as_int())
            .is_some_and(|flag| flag != 0)
    }

    #[must_use]
    pub fn is_artificial(self) -> bool
    {
        self.own_attr(constants::DW_AT_artificial)
            .and_then(|v| v.as_int())
            .is_some_and(|flag| flag != 0)
    }

    /// Whether the entry has a user-visible name worth listing
    ///
    /// ## Errors
    ///
    /// See [`Die::attr`].
    pub fn is_printable(self) -> FerruleResult<bool>
    {
        Ok(match self.tag() {
            constants::DW_TAG_member | constants::DW_TAG_variable | constants::DW_TAG_formal_parameter => {
                !self.name()?.is_empty()
            }
            constants::DW_TAG_structure_type
            | constants::DW_TAG_class_type
            | constants::DW_TAG_union_type
            | constants::DW_TAG_typedef
            | constants::DW_TAG_subprogram => true,
            _ => false,
        })
    }

    /// Compare this name against `name` under the unit's case rules
    ///
    /// ## Errors
    ///
    /// See [`Die::attr`].
    pub fn name_matches(self, name: &str) -> FerruleResult<bool>
    {
        let own = self.name()?;
        Ok(!own.is_empty() && self.language().names_equal(&own, name))
    }
}

impl PartialEq for Die<'_>
{
    fn eq(&self, other: &Self) -> bool
    {
        std::ptr::eq(self.unit, other.unit) && self.id == other.id
    }
}

impl Eq for Die<'_> {}

impl fmt::Debug for Die<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = self.own_attr(constants::DW_AT_name);
        f.debug_struct("Die")
            .field("id", &self.id)
            .field("tag", &self.tag().static_string().unwrap_or("DW_TAG_<unknown>"))
            .field("name", &name.as_ref().and_then(AttrValue::as_str))
            .finish()
    }
}
