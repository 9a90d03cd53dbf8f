//! Compilation units decoded from DWARF sections produced by `gimli::write`

mod common;

use std::collections::HashMap;

use common::MemoryTarget;
use ferrule_core::prelude::*;
use gimli::write::{self, AttributeValue, DwarfUnit, EndianVec, Sections, UnitEntryId};
use gimli::{Encoding, LittleEndian, RunTimeEndian};
use pretty_assertions::assert_eq;

fn set_name(dwarf: &mut DwarfUnit, id: UnitEntryId, name: &str)
{
    dwarf
        .unit
        .get_mut(id)
        .set(gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
}

fn set_type(dwarf: &mut DwarfUnit, id: UnitEntryId, ty: UnitEntryId)
{
    dwarf.unit.get_mut(id).set(gimli::DW_AT_type, AttributeValue::UnitRef(ty));
}

fn set_address(dwarf: &mut DwarfUnit, id: UnitEntryId, addr: u64)
{
    let mut expr = write::Expression::new();
    expr.op_addr(write::Address::Constant(addr));
    dwarf.unit.get_mut(id).set(gimli::DW_AT_location, AttributeValue::Exprloc(expr));
}

/// `struct S { int a; int b[3]; } s; int count;` in a C99 unit
fn sections() -> HashMap<&'static str, Vec<u8>>
{
    let encoding = Encoding {
        format: gimli::Format::Dwarf32,
        version: 4,
        address_size: 8,
    };
    let mut dwarf = DwarfUnit::new(encoding);
    let root = dwarf.unit.root();
    dwarf
        .unit
        .get_mut(root)
        .set(gimli::DW_AT_language, AttributeValue::Language(gimli::DW_LANG_C99));
    set_name(&mut dwarf, root, "sample.c");

    let int = dwarf.unit.add(root, gimli::DW_TAG_base_type);
    set_name(&mut dwarf, int, "int");
    let entry = dwarf.unit.get_mut(int);
    entry.set(gimli::DW_AT_byte_size, AttributeValue::Udata(4));
    entry.set(gimli::DW_AT_encoding, AttributeValue::Encoding(gimli::DW_ATE_signed));

    let array = dwarf.unit.add(root, gimli::DW_TAG_array_type);
    set_type(&mut dwarf, array, int);
    let range = dwarf.unit.add(array, gimli::DW_TAG_subrange_type);
    dwarf
        .unit
        .get_mut(range)
        .set(gimli::DW_AT_upper_bound, AttributeValue::Udata(2));

    let s = dwarf.unit.add(root, gimli::DW_TAG_structure_type);
    set_name(&mut dwarf, s, "S");
    dwarf.unit.get_mut(s).set(gimli::DW_AT_byte_size, AttributeValue::Udata(16));
    for (name, ty, offset) in [("a", int, 0), ("b", array, 4)] {
        let member = dwarf.unit.add(s, gimli::DW_TAG_member);
        set_name(&mut dwarf, member, name);
        set_type(&mut dwarf, member, ty);
        dwarf
            .unit
            .get_mut(member)
            .set(gimli::DW_AT_data_member_location, AttributeValue::Udata(offset));
    }

    for (name, ty, addr) in [("s", s, 0x1000), ("count", int, 0x1010)] {
        let var = dwarf.unit.add(root, gimli::DW_TAG_variable);
        set_name(&mut dwarf, var, name);
        set_type(&mut dwarf, var, ty);
        set_address(&mut dwarf, var, addr);
    }

    let mut sections = Sections::new(EndianVec::new(LittleEndian));
    dwarf.write(&mut sections).unwrap();
    let mut map = HashMap::new();
    sections
        .for_each(|id, data| {
            map.insert(id.name(), data.slice().to_vec());
            Ok::<(), write::Error>(())
        })
        .unwrap();
    map
}

fn load_unit() -> CompUnit
{
    let map = sections();
    let dwarf = GimliUnitSource::load(RunTimeEndian::Little, |name| map.get(name).cloned()).unwrap();
    let mut units = GimliUnitSource::units(&dwarf).unwrap();
    assert_eq!(units.len(), 1);
    CompUnit::new(units.remove(0)).unwrap()
}

#[test]
fn test_unit_header_attributes()
{
    ferrule_utils::init_test_logging();
    let unit = load_unit();
    assert_eq!(unit.language(), SourceLanguage::C99);
    assert_eq!(unit.address_size(), 8);
    assert_eq!(unit.root().name().unwrap(), "sample.c");
}

#[test]
fn test_aggregate_children_load_on_demand()
{
    let unit = load_unit();
    assert!(unit.deferred_count() > 0);

    let s = unit.find_struct("S").unwrap().unwrap();
    let names: Vec<String> = s.children().unwrap().into_iter().map(|m| m.name().unwrap()).collect();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert!(s.is_loaded());

    let count = unit.entry_count();
    s.check_loaded().unwrap();
    s.check_loaded().unwrap();
    assert_eq!(unit.entry_count(), count);
}

#[test]
fn test_type_sizes_from_sections()
{
    let unit = load_unit();
    let s = Type::new(unit.find_struct("S").unwrap().unwrap());
    assert_eq!(s.kind(), TypeKind::Struct);
    assert_eq!(s.size().unwrap(), 16);

    let ctx = EvalContext::new(&unit);
    let expr = Expression::parse(&ctx, "s.b").unwrap();
    let ty = expr.static_type(&ctx).unwrap().unwrap();
    assert_eq!(ty.size().unwrap(), 12);
}

#[test]
fn test_variables_evaluate_through_location_expressions()
{
    let unit = load_unit();
    let mut target = MemoryTarget::new();
    for (i, v) in [5u32, 10, 20, 30].iter().enumerate() {
        target.poke_u32(0x1000 + 4 * i as u64, *v);
    }
    target.poke_u32(0x1010, 2);
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);

    let expr = Expression::parse(&ctx, "s.b[count] + s.a").unwrap();
    let result = expr.evaluate(&mut ctx).unwrap();
    assert_eq!(result.value, Value::Integer(35));

    let expr = Expression::parse(&ctx, "&s.b[1]").unwrap();
    let result = expr.evaluate(&mut ctx).unwrap();
    assert_eq!(result.value, Value::Integer(0x1008));
}
