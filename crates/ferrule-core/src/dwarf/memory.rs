//! In-memory compilation units.
//!
//! [`UnitBuilder`] assembles a tree of entries and lays it out the way a
//! compiler would: depth-first, children terminated by a null record, and
//! every entry with children carrying a sibling reference. The resulting
//! [`MemorySource`] feeds [`crate::dwarf::CompUnit`] through the same lazy
//! loading paths as a real `.debug_info` section.

use std::collections::BTreeMap;

use gimli::{constants, DwAt, DwTag, RunTimeEndian};

use crate::dwarf::source::{AttrValue, DieOffset, EntrySource, RawRecord, Reference};
use crate::error::{FerruleError, FerruleResult};
use crate::types::SourceLanguage;

/// Node handle inside a [`UnitBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum PendingAttr
{
    Value(AttrValue),
    Node(NodeId),
}

#[derive(Debug, Clone)]
struct Node
{
    tag: DwTag,
    attrs: Vec<(DwAt, PendingAttr)>,
    children: Vec<NodeId>,
}

/// Builder for a synthetic compilation unit
#[derive(Debug, Clone)]
pub struct UnitBuilder
{
    nodes: Vec<Node>,
    address_size: u8,
    endian: RunTimeEndian,
}

impl UnitBuilder
{
    /// Start a unit whose root records `language`
    #[must_use]
    pub fn new(language: SourceLanguage, address_size: u8) -> Self
    {
        let lang = gimli::DwLang::from(language);
        let root = Node {
            tag: constants::DW_TAG_compile_unit,
            attrs: vec![(constants::DW_AT_language, PendingAttr::Value(AttrValue::Int(i64::from(lang.0))))],
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            address_size,
            endian: RunTimeEndian::Little,
        }
    }

    /// Use big-endian target data
    #[must_use]
    pub fn big_endian(mut self) -> Self
    {
        self.endian = RunTimeEndian::Big;
        self
    }

    #[must_use]
    pub const fn root(&self) -> NodeId
    {
        NodeId(0)
    }

    /// Append a child entry
    pub fn add(&mut self, parent: NodeId, tag: DwTag) -> NodeId
    {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag,
            attrs: Vec::new(),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn put(&mut self, node: NodeId, at: DwAt, value: PendingAttr) -> &mut Self
    {
        let attrs = &mut self.nodes[node.0].attrs;
        match attrs.iter_mut().find(|(a, _)| *a == at) {
            Some((_, existing)) => *existing = value,
            None => attrs.push((at, value)),
        }
        self
    }

    pub fn set(&mut self, node: NodeId, at: DwAt, value: AttrValue) -> &mut Self
    {
        self.put(node, at, PendingAttr::Value(value))
    }

    pub fn set_name(&mut self, node: NodeId, name: &str) -> &mut Self
    {
        self.set(node, constants::DW_AT_name, AttrValue::Str(name.to_string()))
    }

    pub fn set_int(&mut self, node: NodeId, at: DwAt, value: i64) -> &mut Self
    {
        self.set(node, at, AttrValue::Int(value))
    }

    pub fn set_flag(&mut self, node: NodeId, at: DwAt) -> &mut Self
    {
        self.set(node, at, AttrValue::Int(1))
    }

    pub fn set_block(&mut self, node: NodeId, at: DwAt, bytes: &[u8]) -> &mut Self
    {
        self.set(node, at, AttrValue::block(bytes))
    }

    /// Reference another node of the same unit
    pub fn set_ref(&mut self, node: NodeId, at: DwAt, target: NodeId) -> &mut Self
    {
        self.put(node, at, PendingAttr::Node(target))
    }

    /// Lay the tree out and freeze it
    #[must_use]
    pub fn build(self) -> MemorySource
    {
        // first pass: offsets, one slot per record
        let mut offsets = vec![0usize; self.nodes.len()];
        let mut ends = vec![0usize; self.nodes.len()];
        let mut cursor = 1;
        self.assign(NodeId(0), &mut cursor, &mut offsets, &mut ends);

        let mut records = BTreeMap::new();
        self.emit(NodeId(0), true, &offsets, &ends, &mut records);
        MemorySource {
            records,
            root: DieOffset(offsets[0]),
            address_size: self.address_size,
            endian: self.endian,
        }
    }

    fn assign(&self, node: NodeId, cursor: &mut usize, offsets: &mut [usize], ends: &mut [usize])
    {
        offsets[node.0] = *cursor;
        *cursor += 1;
        let children = &self.nodes[node.0].children;
        if !children.is_empty() {
            for child in children {
                self.assign(*child, cursor, offsets, ends);
            }
            // null terminator
            *cursor += 1;
        }
        ends[node.0] = *cursor;
    }

    fn emit(&self, node: NodeId, is_root: bool, offsets: &[usize], ends: &[usize], records: &mut BTreeMap<usize, RawRecord>)
    {
        let data = &self.nodes[node.0];
        let has_children = !data.children.is_empty();
        let mut attrs: Vec<(DwAt, AttrValue)> = data
            .attrs
            .iter()
            .map(|(at, value)| {
                let value = match value {
                    PendingAttr::Value(v) => v.clone(),
                    PendingAttr::Node(target) => AttrValue::Ref(Reference::Pending(DieOffset(offsets[target.0]))),
                };
                (*at, value)
            })
            .collect();
        if has_children && !is_root {
            attrs.push((constants::DW_AT_sibling, AttrValue::Ref(Reference::Pending(DieOffset(ends[node.0])))));
        }
        let offset = offsets[node.0];
        records.insert(
            offset,
            RawRecord::Entry {
                offset: DieOffset(offset),
                tag: data.tag,
                has_children,
                attrs,
                next: DieOffset(offset + 1),
            },
        );
        if has_children {
            for child in &data.children {
                self.emit(*child, false, offsets, ends, records);
            }
            let null = ends[node.0] - 1;
            records.insert(null, RawRecord::Null { next: DieOffset(null + 1) });
        }
    }
}

/// Frozen in-memory unit
#[derive(Debug, Clone)]
pub struct MemorySource
{
    records: BTreeMap<usize, RawRecord>,
    root: DieOffset,
    address_size: u8,
    endian: RunTimeEndian,
}

impl MemorySource
{
    /// Number of records, null terminators included
    #[must_use]
    pub fn record_count(&self) -> usize
    {
        self.records.len()
    }
}

impl EntrySource for MemorySource
{
    fn root_offset(&self) -> DieOffset
    {
        self.root
    }

    fn read_entry(&self, at: DieOffset) -> FerruleResult<RawRecord>
    {
        self.records
            .get(&at.0)
            .cloned()
            .ok_or_else(|| FerruleError::MalformedDebugInfo(format!("no entry at offset {at}")))
    }

    fn address_size(&self) -> u8
    {
        self.address_size
    }

    fn encoding(&self) -> gimli::Encoding
    {
        gimli::Encoding {
            format: gimli::Format::Dwarf32,
            version: 4,
            address_size: self.address_size,
        }
    }

    fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_layout_adds_siblings_and_terminators()
    {
        let mut builder = UnitBuilder::new(SourceLanguage::C, 8);
        let root = builder.root();
        let s = builder.add(root, constants::DW_TAG_structure_type);
        builder.add(s, constants::DW_TAG_member);
        builder.add(root, constants::DW_TAG_base_type);
        let source = builder.build();

        // root, struct, member, null, base, null
        assert_eq!(source.record_count(), 6);
        let RawRecord::Entry { attrs, has_children, .. } = source.read_entry(DieOffset(2)).unwrap() else {
            panic!("expected the structure entry");
        };
        assert!(has_children);
        assert!(attrs
            .iter()
            .any(|(at, v)| *at == constants::DW_AT_sibling && *v == AttrValue::Ref(Reference::Pending(DieOffset(5)))));
        assert!(matches!(source.read_entry(DieOffset(4)).unwrap(), RawRecord::Null { .. }));
    }
}
