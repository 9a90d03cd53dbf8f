//! [`EntrySource`] over gimli-parsed `.debug_info`.

use std::sync::Arc;

use gimli::{constants, AttributeValue, Dwarf, EndianArcSlice, Reader, RunTimeEndian, Section, SectionId, Unit, UnitOffset};
use smallvec::SmallVec;
use tracing::debug;

use crate::dwarf::source::{AttrValue, DieOffset, EntrySource, RawRecord, Reference};
use crate::error::{map_dwarf_error, FerruleError, FerruleResult};

/// Reader type owning its section data
pub type OwnedReader = EndianArcSlice<RunTimeEndian>;
/// Fully loaded DWARF sections
pub type OwnedDwarf = Dwarf<OwnedReader>;

/// One compilation unit of a loaded object
pub struct GimliUnitSource
{
    dwarf: Arc<OwnedDwarf>,
    unit: Unit<OwnedReader>,
    root: DieOffset,
}

impl GimliUnitSource
{
    /// Load DWARF sections through a name lookup
    ///
    /// `section` receives ELF-style section names (`.debug_info`, ...) and
    /// returns the section bytes, or `None` if the object lacks it.
    ///
    /// ## Errors
    ///
    /// Fails if gimli rejects the section set.
    pub fn load<F>(endian: RunTimeEndian, mut section: F) -> FerruleResult<Arc<OwnedDwarf>>
    where
        F: FnMut(&str) -> Option<Vec<u8>>,
    {
        let dwarf = Dwarf::load(|id: SectionId| {
            let data = section(id.name()).unwrap_or_default();
            Ok::<_, gimli::Error>(EndianArcSlice::new(Arc::from(data.into_boxed_slice()), endian))
        })
        .map_err(|err| map_dwarf_error("loading DWARF sections", err))?;
        Ok(Arc::new(dwarf))
    }

    /// Every compilation unit in `.debug_info`, in section order
    ///
    /// ## Errors
    ///
    /// Fails on the first unit header that cannot be parsed.
    pub fn units(dwarf: &Arc<OwnedDwarf>) -> FerruleResult<Vec<GimliUnitSource>>
    {
        let mut sources = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers
            .next()
            .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
        {
            let unit = dwarf
                .unit(header)
                .map_err(|err| map_dwarf_error("parsing compilation unit", err))?;
            sources.push(Self::new(Arc::clone(dwarf), unit)?);
        }
        debug!(count = sources.len(), "enumerated compilation units");
        Ok(sources)
    }

    /// Wrap an already parsed unit
    ///
    /// ## Errors
    ///
    /// Fails if the unit has no readable root entry.
    pub fn new(dwarf: Arc<OwnedDwarf>, unit: Unit<OwnedReader>) -> FerruleResult<Self>
    {
        let root = unit
            .entries_raw(None)
            .map_err(|err| map_dwarf_error("locating unit root", err))?
            .next_offset();
        Ok(Self {
            dwarf,
            unit,
            root: DieOffset(root.0),
        })
    }

    fn attr_to_string(&self, value: AttributeValue<OwnedReader>) -> FerruleResult<String>
    {
        let reader = self
            .dwarf
            .attr_string(&self.unit, value)
            .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
        let owned = match reader.to_string() {
            Ok(cow) => cow.into_owned(),
            Err(_) => reader
                .to_string_lossy()
                .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
                .into_owned(),
        };
        Ok(owned)
    }

    fn block(reader: &OwnedReader) -> FerruleResult<AttrValue>
    {
        let bytes = reader
            .to_slice()
            .map_err(|err| map_dwarf_error("reading attribute block", err))?;
        Ok(AttrValue::Block(SmallVec::from_slice(&bytes)))
    }

    /// Collapse one gimli attribute into the loader's four kinds
    ///
    /// Returns `None` for forms the engine does not use (location lists,
    /// cross-unit and type-signature references, section offsets).
    #[allow(clippy::cast_possible_wrap)]
    fn convert(&self, name: constants::DwAt, value: AttributeValue<OwnedReader>) -> FerruleResult<Option<AttrValue>>
    {
        let converted = match value {
            AttributeValue::UnitRef(offset) => Some(AttrValue::Ref(Reference::Pending(DieOffset(offset.0)))),
            AttributeValue::DebugInfoRef(offset) => offset
                .to_unit_offset(&self.unit.header)
                .map(|local| AttrValue::Ref(Reference::Pending(DieOffset(local.0)))),
            AttributeValue::Block(ref reader) => Some(Self::block(reader)?),
            AttributeValue::Exprloc(ref expr) => Some(Self::block(&expr.0)?),
            AttributeValue::String(_)
            | AttributeValue::DebugStrRef(_)
            | AttributeValue::DebugStrRefSup(_)
            | AttributeValue::DebugLineStrRef(_)
            | AttributeValue::DebugStrOffsetsIndex(_) => Some(AttrValue::Str(self.attr_to_string(value)?)),
            AttributeValue::Addr(_) | AttributeValue::DebugAddrIndex(_) => self
                .dwarf
                .attr_address(&self.unit, value)
                .map_err(|err| map_dwarf_error("resolving address attribute", err))?
                .map(|addr| AttrValue::Int(addr as i64)),
            AttributeValue::Flag(flag) => Some(AttrValue::Int(i64::from(flag))),
            AttributeValue::Language(lang) => Some(AttrValue::Int(i64::from(lang.0))),
            AttributeValue::Encoding(enc) => Some(AttrValue::Int(i64::from(enc.0))),
            AttributeValue::Accessibility(access) => Some(AttrValue::Int(i64::from(access.0))),
            AttributeValue::Virtuality(virtuality) => Some(AttrValue::Int(i64::from(virtuality.0))),
            AttributeValue::Inline(inline) => Some(AttrValue::Int(i64::from(inline.0))),
            AttributeValue::Ordering(ordering) => Some(AttrValue::Int(i64::from(ordering.0))),
            AttributeValue::FileIndex(index) => Some(AttrValue::Int(index as i64)),
            AttributeValue::Sdata(v) => Some(AttrValue::Int(v)),
            AttributeValue::Udata(v) => Some(AttrValue::Int(v as i64)),
            other => match (other.sdata_value(), other.udata_value()) {
                // signed constants keep their sign, everything else is unsigned
                (Some(v), _) if name == constants::DW_AT_const_value
                    || name == constants::DW_AT_lower_bound
                    || name == constants::DW_AT_upper_bound =>
                {
                    Some(AttrValue::Int(v))
                }
                (_, Some(v)) => Some(AttrValue::Int(v as i64)),
                _ => None,
            },
        };
        Ok(converted)
    }
}

impl EntrySource for GimliUnitSource
{
    fn root_offset(&self) -> DieOffset
    {
        self.root
    }

    fn read_entry(&self, at: DieOffset) -> FerruleResult<RawRecord>
    {
        let mut entries = self
            .unit
            .entries_raw(Some(UnitOffset(at.0)))
            .map_err(|err| map_dwarf_error("seeking to entry", err))?;
        if entries.is_empty() {
            return Err(FerruleError::MalformedDebugInfo(format!("entry offset {at} is past the end of the unit")));
        }
        let Some(abbrev) = entries
            .read_abbreviation()
            .map_err(|err| map_dwarf_error("reading abbreviation", err))?
        else {
            return Ok(RawRecord::Null {
                next: DieOffset(entries.next_offset().0),
            });
        };

        let mut attrs = Vec::with_capacity(abbrev.attributes().len());
        let mut high_pc_is_length = false;
        for spec in abbrev.attributes() {
            let attr = entries
                .read_attribute(*spec)
                .map_err(|err| map_dwarf_error("reading attribute", err))?;
            if attr.name() == constants::DW_AT_high_pc {
                high_pc_is_length = !matches!(attr.value(), AttributeValue::Addr(_) | AttributeValue::DebugAddrIndex(_));
            }
            if let Some(value) = self.convert(attr.name(), attr.value())? {
                attrs.push((attr.name(), value));
            }
        }

        // DWARF 4+ may encode high_pc as a length from low_pc
        if high_pc_is_length {
            let low = attrs
                .iter()
                .find(|(at, _)| *at == constants::DW_AT_low_pc)
                .and_then(|(_, v)| v.as_int());
            if let (Some(low), Some((_, AttrValue::Int(high)))) =
                (low, attrs.iter_mut().find(|(at, _)| *at == constants::DW_AT_high_pc))
            {
                *high = high.wrapping_add(low);
            }
        }

        Ok(RawRecord::Entry {
            offset: at,
            tag: abbrev.tag(),
            has_children: abbrev.has_children(),
            attrs,
            next: DieOffset(entries.next_offset().0),
        })
    }

    fn address_size(&self) -> u8
    {
        self.unit.encoding().address_size
    }

    fn encoding(&self) -> gimli::Encoding
    {
        self.unit.encoding()
    }

    fn endian(&self) -> RunTimeEndian
    {
        self.dwarf.debug_info.reader().endian()
    }
}
