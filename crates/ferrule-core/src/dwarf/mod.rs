//! # Debug Information Entries
//!
//! The entry graph of one compilation unit, decoded lazily.
//!
//! [`CompUnit`] owns every entry in an arena and hands out [`Die`] handles
//! borrowed from it. Entries come from an [`EntrySource`]: gimli-parsed
//! sections in production ([`GimliUnitSource`]) or a [`UnitBuilder`] tree in
//! tests and synthesized units.
//!
//! ## Lazy loading
//!
//! Subtrees of subprograms and aggregate types are skipped on first decode and
//! expanded the first time their children are asked for, or when a reference
//! points inside them. Attribute references are memoized once followed.

mod die;
mod gimli_source;
mod memory;
mod source;
mod unit;

pub use die::Die;
pub use gimli_source::{GimliUnitSource, OwnedDwarf, OwnedReader};
pub use memory::{MemorySource, NodeId, UnitBuilder};
pub use source::{AttrValue, DieOffset, EntrySource, RawRecord, Reference};
pub use unit::{CompUnit, DieId};
pub(crate) use unit::MAX_TYPE_REF_DEPTH;

#[cfg(test)]
mod tests
{
    use gimli::constants::*;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::SourceLanguage;

    fn sample(language: SourceLanguage) -> (CompUnit, Vec<NodeId>)
    {
        let mut b = UnitBuilder::new(language, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));

        let decl = b.add(root, DW_TAG_structure_type);
        b.set_name(decl, "point").set_int(decl, DW_AT_byte_size, 8);
        let x = b.add(decl, DW_TAG_member);
        b.set_name(x, "x").set_ref(x, DW_AT_type, int);
        let method = b.add(decl, DW_TAG_subprogram);
        b.set_name(method, "norm").set_flag(method, DW_AT_declaration);

        let def = b.add(root, DW_TAG_subprogram);
        b.set_ref(def, DW_AT_specification, method).set_int(def, DW_AT_low_pc, 0x1000);
        let local = b.add(def, DW_TAG_variable);
        b.set_name(local, "len").set_ref(local, DW_AT_type, int);

        let var = b.add(root, DW_TAG_variable);
        b.set_name(var, "origin").set_ref(var, DW_AT_type, decl);
        let unit = CompUnit::new(b.build()).unwrap();
        (unit, vec![int, decl, x, method, def, local, var])
    }

    #[test]
    fn test_aggregates_are_deferred()
    {
        let (unit, _) = sample(SourceLanguage::C);
        let children = unit.root().children().unwrap();
        assert_eq!(children.len(), 4);
        assert!(!children[1].is_loaded());
        assert!(!children[2].is_loaded());
        assert_eq!(unit.deferred_count(), 2);
    }

    #[test]
    fn test_check_loaded_is_idempotent()
    {
        let (unit, _) = sample(SourceLanguage::C);
        let point = unit.root().children().unwrap()[1];
        point.check_loaded().unwrap();
        let first: Vec<_> = point.children().unwrap().iter().map(|d| d.id()).collect();
        let count = unit.entry_count();
        point.check_loaded().unwrap();
        let second: Vec<_> = point.children().unwrap().iter().map(|d| d.id()).collect();
        assert_eq!(first, second);
        assert_eq!(unit.entry_count(), count);
    }

    #[test]
    fn test_reference_into_deferred_subtree()
    {
        let (unit, _) = sample(SourceLanguage::C);
        let def = unit.root().children().unwrap()[2];
        let spec = def.reference(DW_AT_specification).unwrap().unwrap();
        assert_eq!(spec.tag(), DW_TAG_subprogram);
        assert_eq!(spec.name().unwrap(), "norm");
        assert!(unit.root().children().unwrap()[1].is_loaded());
    }

    #[test]
    fn test_definition_inherits_declaration_name()
    {
        let (unit, _) = sample(SourceLanguage::C);
        let def = unit.root().children().unwrap()[2];
        assert_eq!(def.name().unwrap(), "norm");
        assert_eq!(def.own_attr(DW_AT_name), None);
    }

    #[test]
    fn test_declaration_gets_more_info()
    {
        let (unit, _) = sample(SourceLanguage::C);
        let def = unit.root().children().unwrap()[2];
        let decl = def.reference(DW_AT_specification).unwrap().unwrap();
        assert_eq!(decl.more_info(), Some(def));
        assert_eq!(decl.attr_int(DW_AT_low_pc).unwrap(), Some(0x1000));
    }

    #[test]
    fn test_fortran_loads_eagerly()
    {
        let (unit, _) = sample(SourceLanguage::Fortran90);
        assert_eq!(unit.deferred_count(), 0);
        assert!(unit.root().children().unwrap().iter().all(|d| d.is_loaded()));
    }

    #[test]
    fn test_unresolved_reference_reads_as_absent()
    {
        let mut b = UnitBuilder::new(SourceLanguage::C, 8);
        let root = b.root();
        let var = b.add(root, DW_TAG_variable);
        b.set(var, DW_AT_type, AttrValue::Ref(Reference::Pending(DieOffset(999))));
        let unit = CompUnit::new(b.build()).unwrap();
        let var = unit.root().children().unwrap()[0];
        assert_eq!(var.type_die().unwrap(), None);
    }

    #[test]
    fn test_find_struct_and_synthetic_entries()
    {
        let (unit, _) = sample(SourceLanguage::C);
        let point = unit.find_struct("point").unwrap().unwrap();
        assert_eq!(point.tag(), DW_TAG_structure_type);
        assert!(unit.find_struct("missing").unwrap().is_none());

        let before = unit.root().children().unwrap().len();
        let ptr = unit.add_synthetic(None, DW_TAG_pointer_type, vec![(DW_AT_byte_size, AttrValue::Int(8))]);
        assert_eq!(unit.die(ptr).offset(), None);
        assert_eq!(unit.die(ptr).parent(), Some(unit.root()));
        assert_eq!(unit.root().children().unwrap().len(), before);
    }
}
