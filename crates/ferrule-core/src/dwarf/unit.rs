//! Compilation unit arena and lazy loader.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use gimli::{constants, DwAt, DwTag, RunTimeEndian};
use once_cell::unsync::OnceCell;
use tracing::debug;

use crate::dwarf::source::{AttrValue, DieOffset, EntrySource, RawRecord, Reference};
use crate::dwarf::Die;
use crate::error::{FerruleError, FerruleResult};
use crate::types::SourceLanguage;

/// Bound on specification/abstract-origin chains followed by attribute lookup
pub(crate) const MAX_TYPE_REF_DEPTH: usize = 32;

/// Handle of an entry inside its compilation unit's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DieId(u32);

impl DieId
{
    const fn index(self) -> usize
    {
        self.0 as usize
    }
}

/// Child list of an entry
///
/// Either fully materialized or a single byte range still to be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Children
{
    Loaded(Vec<DieId>),
    Deferred
    {
        start: DieOffset, end: DieOffset
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Entry
{
    pub(crate) offset: Option<DieOffset>,
    pub(crate) tag: DwTag,
    pub(crate) attrs: Vec<(DwAt, AttrValue)>,
    pub(crate) children: Children,
    pub(crate) parent: Option<DieId>,
    pub(crate) more_info: Option<DieId>,
    pub(crate) locations_added: bool,
}

/// One compilation unit: the owner of every entry decoded from it
///
/// Entries are created depth-first while decoding. Subtrees of subprograms,
/// structures, classes and unions are skipped on first read (using their
/// sibling reference) and decoded on demand, except in Fortran units where
/// nested subprograms must be visible up front.
///
/// All queries take `&self`; lazy expansion and reference memoization mutate
/// the arena through interior mutability. A unit is therefore not `Sync` and
/// must not be shared between threads without external locking.
///
/// ## Example
///
/// ```rust
/// use ferrule_core::dwarf::{CompUnit, UnitBuilder};
/// use ferrule_core::types::SourceLanguage;
/// use gimli::constants::*;
///
/// let mut builder = UnitBuilder::new(SourceLanguage::C, 8);
/// let root = builder.root();
/// let point = builder.add(root, DW_TAG_structure_type);
/// builder.set_name(point, "point");
/// builder.set_int(point, DW_AT_byte_size, 8);
///
/// let unit = CompUnit::new(builder.build()).unwrap();
/// assert!(unit.find_struct("point").unwrap().is_some());
/// ```
pub struct CompUnit
{
    source: Box<dyn EntrySource>,
    language: SourceLanguage,
    address_size: u8,
    endian: RunTimeEndian,
    entries: RefCell<Vec<Entry>>,
    offsets: RefCell<HashMap<DieOffset, DieId>>,
    /// Deferred child ranges keyed by start offset, with end and owner
    deferred: RefCell<BTreeMap<DieOffset, (DieOffset, DieId)>>,
    /// Entries waiting for the target of their specification/origin to load
    fixups: RefCell<HashMap<DieOffset, Vec<DieId>>>,
    root: DieId,
    struct_index: OnceCell<HashMap<String, DieId>>,
    /// Synthesized types keyed by their shape
    synthetic: RefCell<HashMap<String, DieId>>,
}

impl CompUnit
{
    /// Decode the unit's root and its directly visible entries
    ///
    /// ## Errors
    ///
    /// Returns [`FerruleError::MalformedDebugInfo`] if the root cannot be
    /// decoded or is not an entry.
    pub fn new(source: impl EntrySource + 'static) -> FerruleResult<Self>
    {
        let source: Box<dyn EntrySource> = Box::new(source);
        let root_offset = source.root_offset();
        let language = match source.read_entry(root_offset)? {
            RawRecord::Entry { attrs, .. } => attrs
                .iter()
                .find(|(at, _)| *at == constants::DW_AT_language)
                .and_then(|(_, v)| v.as_int())
                .and_then(|lang| u16::try_from(lang).ok())
                .map(|lang| SourceLanguage::from(gimli::DwLang(lang)))
                .unwrap_or_default(),
            RawRecord::Null { .. } => {
                return Err(FerruleError::MalformedDebugInfo("compilation unit has no root entry".to_string()));
            }
        };

        let mut unit = Self {
            address_size: source.address_size(),
            endian: source.endian(),
            source,
            language,
            entries: RefCell::new(Vec::new()),
            offsets: RefCell::new(HashMap::new()),
            deferred: RefCell::new(BTreeMap::new()),
            fixups: RefCell::new(HashMap::new()),
            root: DieId(0),
            struct_index: OnceCell::new(),
            synthetic: RefCell::new(HashMap::new()),
        };
        let (root, _) = unit.decode_at(root_offset, None, false)?;
        unit.root = root.ok_or_else(|| FerruleError::MalformedDebugInfo("compilation unit has no root entry".to_string()))?;
        debug!(
            language = %unit.language,
            entries = unit.entry_count(),
            deferred = unit.deferred_count(),
            "loaded compilation unit"
        );
        Ok(unit)
    }

    /// Source language recorded on the unit root
    #[must_use]
    pub fn language(&self) -> SourceLanguage
    {
        self.language
    }

    /// Size of a target address in bytes
    #[must_use]
    pub fn address_size(&self) -> u8
    {
        self.address_size
    }

    /// Byte order of the target
    #[must_use]
    pub fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }

    /// Encoding used for location expressions
    #[must_use]
    pub fn encoding(&self) -> gimli::Encoding
    {
        self.source.encoding()
    }

    /// Whether the unit uses 64-bit DWARF
    #[must_use]
    pub fn is_64bit(&self) -> bool
    {
        self.source.is_64bit()
    }

    /// The compile-unit entry
    #[must_use]
    pub fn root(&self) -> Die<'_>
    {
        Die::new(self, self.root)
    }

    /// Handle for an arena id
    #[must_use]
    pub fn die(&self, id: DieId) -> Die<'_>
    {
        Die::new(self, id)
    }

    /// Entry at a unit offset, decoding its enclosing subtree if needed
    ///
    /// ## Errors
    ///
    /// Propagates decoding failures of the enclosing subtree.
    pub fn die_at(&self, offset: DieOffset) -> FerruleResult<Option<Die<'_>>>
    {
        Ok(self.resolve(offset)?.map(|id| Die::new(self, id)))
    }

    /// Number of materialized entries (including synthesized ones)
    #[must_use]
    pub fn entry_count(&self) -> usize
    {
        self.entries.borrow().len()
    }

    /// Number of subtrees still waiting to be decoded
    #[must_use]
    pub fn deferred_count(&self) -> usize
    {
        self.deferred.borrow().len()
    }

    fn is_skippable(&self, tag: DwTag) -> bool
    {
        if self.language.loads_eagerly() {
            return false;
        }
        matches!(
            tag,
            constants::DW_TAG_subprogram
                | constants::DW_TAG_structure_type
                | constants::DW_TAG_class_type
                | constants::DW_TAG_union_type
        )
    }

    fn allocate(&self, entry: Entry) -> DieId
    {
        let mut entries = self.entries.borrow_mut();
        let id = DieId(u32::try_from(entries.len()).unwrap_or(u32::MAX));
        entries.push(entry);
        id
    }

    /// Decode the record at `at` and, unless deferred, its subtree
    ///
    /// Returns the new entry (or `None` for a null record) and the offset of
    /// the record after it.
    fn decode_at(&self, at: DieOffset, parent: Option<DieId>, read_all: bool) -> FerruleResult<(Option<DieId>, DieOffset)>
    {
        let (offset, tag, has_children, attrs, next) = match self.source.read_entry(at)? {
            RawRecord::Null { next } => return Ok((None, next)),
            RawRecord::Entry {
                offset,
                tag,
                has_children,
                attrs,
                next,
            } => (offset, tag, has_children, attrs, next),
        };

        let sibling = attrs.iter().find_map(|(at, v)| match (at, v) {
            (&constants::DW_AT_sibling, AttrValue::Ref(Reference::Pending(target))) => Some(*target),
            _ => None,
        });
        let origins: Vec<DieOffset> = attrs
            .iter()
            .filter_map(|(at, v)| match (at, v) {
                (&constants::DW_AT_specification | &constants::DW_AT_abstract_origin, AttrValue::Ref(Reference::Pending(target))) => {
                    Some(*target)
                }
                _ => None,
            })
            .collect();

        let id = self.allocate(Entry {
            offset: Some(offset),
            tag,
            attrs,
            children: Children::Loaded(Vec::new()),
            parent,
            more_info: None,
            locations_added: false,
        });
        self.offsets.borrow_mut().insert(offset, id);
        self.attach_more_info(id, offset, &origins);

        if !has_children {
            return Ok((Some(id), next));
        }

        if let Some(end) = sibling {
            if !read_all && self.is_skippable(tag) {
                self.entries.borrow_mut()[id.index()].children = Children::Deferred { start: next, end };
                self.deferred.borrow_mut().insert(next, (end, id));
                return Ok((Some(id), end));
            }
        }

        let (children, after) = self.decode_children(next, id, read_all)?;
        self.entries.borrow_mut()[id.index()].children = Children::Loaded(children);
        Ok((Some(id), after))
    }

    fn decode_children(&self, start: DieOffset, parent: DieId, read_all: bool) -> FerruleResult<(Vec<DieId>, DieOffset)>
    {
        let mut children = Vec::new();
        let mut cursor = start;
        loop {
            let (child, next) = self.decode_at(cursor, Some(parent), read_all)?;
            cursor = next;
            match child {
                Some(child) => children.push(child),
                None => break,
            }
        }
        Ok((children, cursor))
    }

    /// Link declarations and their out-of-line definitions
    ///
    /// A definition entry names its declaration through a specification or
    /// abstract-origin reference; the declaration gets a "more info" link back
    /// to the definition, now if it is loaded or once it is decoded.
    fn attach_more_info(&self, id: DieId, offset: DieOffset, origins: &[DieOffset])
    {
        for origin in origins {
            let loaded = self.offsets.borrow().get(origin).copied();
            match loaded {
                Some(target) => self.set_more_info(target, id),
                None => self.fixups.borrow_mut().entry(*origin).or_default().push(id),
            }
        }
        if let Some(waiting) = self.fixups.borrow_mut().remove(&offset) {
            if let Some(first) = waiting.first() {
                self.set_more_info(id, *first);
            }
        }
    }

    fn set_more_info(&self, target: DieId, info: DieId)
    {
        let mut entries = self.entries.borrow_mut();
        if entries[target.index()].more_info.is_none() {
            entries[target.index()].more_info = Some(info);
        }
    }

    /// Decode deferred children of `id`; a no-op once loaded
    ///
    /// ## Errors
    ///
    /// Propagates decoding failures.
    pub(crate) fn check_loaded(&self, id: DieId) -> FerruleResult<()>
    {
        let Children::Deferred { start, end } = self.entries.borrow()[id.index()].children.clone() else {
            return Ok(());
        };
        self.deferred.borrow_mut().remove(&start);
        let (children, _) = self.decode_children(start, id, true)?;
        debug!(%start, %end, children = children.len(), "expanded deferred subtree");
        self.entries.borrow_mut()[id.index()].children = Children::Loaded(children);
        Ok(())
    }

    /// Find the entry at `offset`, expanding deferred subtrees that cover it
    pub(crate) fn resolve(&self, offset: DieOffset) -> FerruleResult<Option<DieId>>
    {
        loop {
            if let Some(id) = self.offsets.borrow().get(&offset).copied() {
                return Ok(Some(id));
            }
            let owner = self
                .deferred
                .borrow()
                .range(..=offset)
                .next_back()
                .filter(|(_, (end, _))| offset < *end)
                .map(|(_, (_, owner))| *owner);
            match owner {
                Some(owner) => self.check_loaded(owner)?,
                None => {
                    debug!(%offset, "reference does not resolve to any entry");
                    return Ok(None);
                }
            }
        }
    }

    pub(crate) fn with_entry<T>(&self, id: DieId, f: impl FnOnce(&Entry) -> T) -> T
    {
        f(&self.entries.borrow()[id.index()])
    }

    pub(crate) fn own_attr(&self, id: DieId, at: DwAt) -> Option<AttrValue>
    {
        self.with_entry(id, |entry| entry.attrs.iter().find(|(a, _)| *a == at).map(|(_, v)| v.clone()))
    }

    /// Locate an attribute along the declaration chain
    ///
    /// Order: own attributes; with `full_search`, the abstract origin or
    /// specification (recursively); then the "more info" definition.
    fn find_attr_owner(&self, id: DieId, at: DwAt, full_search: bool, stop_here: bool, depth: usize) -> FerruleResult<Option<DieId>>
    {
        if self.own_attr(id, at).is_some() {
            return Ok(Some(id));
        }
        if !full_search || depth >= MAX_TYPE_REF_DEPTH {
            return Ok(None);
        }
        if !stop_here {
            let origin_attr = if self.own_attr(id, constants::DW_AT_abstract_origin).is_some() {
                Some(constants::DW_AT_abstract_origin)
            } else if self.own_attr(id, constants::DW_AT_specification).is_some() {
                Some(constants::DW_AT_specification)
            } else {
                None
            };
            if let Some(origin_attr) = origin_attr {
                return match self.follow(id, origin_attr)? {
                    Some(origin) => self.find_attr_owner(origin, at, true, false, depth + 1),
                    None => Ok(None),
                };
            }
        }
        match self.with_entry(id, |entry| entry.more_info) {
            Some(info) => self.find_attr_owner(info, at, true, true, depth + 1),
            None => Ok(None),
        }
    }

    /// Attribute value along the declaration chain
    pub(crate) fn attr(&self, id: DieId, at: DwAt, full_search: bool) -> FerruleResult<Option<AttrValue>>
    {
        Ok(self
            .find_attr_owner(id, at, full_search, false, 0)?
            .and_then(|owner| self.own_attr(owner, at)))
    }

    /// Follow a reference attribute of `id` itself, memoizing the result
    fn follow(&self, id: DieId, at: DwAt) -> FerruleResult<Option<DieId>>
    {
        match self.own_attr(id, at) {
            Some(AttrValue::Ref(Reference::Resolved(target))) => Ok(Some(target)),
            Some(AttrValue::Ref(Reference::Pending(offset))) => {
                let target = self.resolve(offset)?;
                if let Some(target) = target {
                    let mut entries = self.entries.borrow_mut();
                    if let Some((_, value)) = entries[id.index()].attrs.iter_mut().find(|(a, _)| *a == at) {
                        *value = AttrValue::Ref(Reference::Resolved(target));
                    }
                }
                Ok(target)
            }
            Some(_) => Err(FerruleError::MalformedDebugInfo(format!(
                "attribute {at} of entry {} is not a reference",
                self.describe(id)
            ))),
            None => Ok(None),
        }
    }

    /// Follow a reference attribute found along the declaration chain
    pub(crate) fn reference(&self, id: DieId, at: DwAt, full_search: bool) -> FerruleResult<Option<DieId>>
    {
        match self.find_attr_owner(id, at, full_search, false, 0)? {
            Some(owner) => self.follow(owner, at),
            None => Ok(None),
        }
    }

    /// Children of `id`, decoding them first if deferred
    pub(crate) fn children(&self, id: DieId) -> FerruleResult<Vec<DieId>>
    {
        self.check_loaded(id)?;
        Ok(self.with_entry(id, |entry| match &entry.children {
            Children::Loaded(children) => children.clone(),
            Children::Deferred { .. } => Vec::new(),
        }))
    }

    pub(crate) fn is_loaded(&self, id: DieId) -> bool
    {
        self.with_entry(id, |entry| matches!(entry.children, Children::Loaded(_)))
    }

    pub(crate) fn set_attr(&self, id: DieId, at: DwAt, value: AttrValue)
    {
        let mut entries = self.entries.borrow_mut();
        let attrs = &mut entries[id.index()].attrs;
        match attrs.iter_mut().find(|(a, _)| *a == at) {
            Some((_, existing)) => *existing = value,
            None => attrs.push((at, value)),
        }
    }

    /// Flip the one-shot "locations added" flag; true on the first call only
    pub(crate) fn mark_locations_added(&self, id: DieId) -> bool
    {
        let mut entries = self.entries.borrow_mut();
        let entry = &mut entries[id.index()];
        !std::mem::replace(&mut entry.locations_added, true)
    }

    /// Append an entry that has no encoded form
    ///
    /// Used for types synthesized by casts, intrinsics and container
    /// subscripts. The entry is parented for language lookups but is not listed
    /// among the parent's children, so it never shadows real symbols.
    pub fn add_synthetic(&self, parent: Option<DieId>, tag: DwTag, attrs: Vec<(DwAt, AttrValue)>) -> DieId
    {
        self.allocate(Entry {
            offset: None,
            tag,
            attrs,
            children: Children::Loaded(Vec::new()),
            parent: parent.or(Some(self.root)),
            more_info: None,
            locations_added: false,
        })
    }

    /// Append a synthetic child that is listed under its parent
    pub fn add_synthetic_child(&self, parent: DieId, tag: DwTag, attrs: Vec<(DwAt, AttrValue)>) -> DieId
    {
        let id = self.add_synthetic(Some(parent), tag, attrs);
        if let Children::Loaded(children) = &mut self.entries.borrow_mut()[parent.index()].children {
            children.push(id);
        }
        id
    }

    /// Synthesized entry for `key`, created by `make` on first use
    pub(crate) fn intern_synthetic(&self, key: String, make: impl FnOnce() -> DieId) -> DieId
    {
        if let Some(id) = self.synthetic.borrow().get(&key).copied() {
            return id;
        }
        let id = make();
        self.synthetic.borrow_mut().insert(key, id);
        id
    }

    fn describe(&self, id: DieId) -> String
    {
        self.with_entry(id, |entry| match entry.offset {
            Some(offset) => offset.to_string(),
            None => format!("#{}", id.0),
        })
    }

    /// Named structure, class or union defined in this unit
    ///
    /// Nested types are indexed by their qualified name (`outer::inner`,
    /// `ns::type`). Declarations without a definition are not indexed.
    ///
    /// ## Errors
    ///
    /// Building the index decodes every deferred type subtree and propagates
    /// decoding failures.
    pub fn find_struct(&self, name: &str) -> FerruleResult<Option<Die<'_>>>
    {
        let index = self.struct_index.get_or_try_init(|| {
            let mut index = HashMap::new();
            self.index_structs(self.root, "", &mut index)?;
            Ok::<_, FerruleError>(index)
        })?;
        let key = name.trim().trim_start_matches("::");
        Ok(index.get(key).map(|id| Die::new(self, *id)))
    }

    fn index_structs(&self, scope: DieId, prefix: &str, index: &mut HashMap<String, DieId>) -> FerruleResult<()>
    {
        for child in self.children(scope)? {
            let tag = self.with_entry(child, |entry| entry.tag);
            let is_type = matches!(
                tag,
                constants::DW_TAG_structure_type | constants::DW_TAG_class_type | constants::DW_TAG_union_type
            );
            if !is_type && tag != constants::DW_TAG_namespace {
                continue;
            }
            let Some(AttrValue::Str(name)) = self.own_attr(child, constants::DW_AT_name) else {
                continue;
            };
            let qualified = if prefix.is_empty() { name } else { format!("{prefix}::{name}") };
            if is_type && self.own_attr(child, constants::DW_AT_declaration).is_none() {
                index.entry(qualified.clone()).or_insert(child);
            }
            self.index_structs(child, &qualified, index)?;
        }
        Ok(())
    }
}
