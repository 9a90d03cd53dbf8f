//! End-to-end tests for parsing, evaluating and printing expressions

mod common;

use common::MemoryTarget;
use ferrule_core::dwarf::{CompUnit, UnitBuilder};
use ferrule_core::expr::{BinaryOp, Evaluated, Node, Subscript};
use ferrule_core::format::{format_integer, Format};
use ferrule_core::prelude::*;
use ferrule_core::variant::member::find_member;
use gimli::constants::*;
use pretty_assertions::assert_eq;

/// `struct S { int a; int b[3]; } a; union U { int i; float f; } u; int x;`
fn c_unit(language: SourceLanguage) -> CompUnit
{
    let mut b = UnitBuilder::new(language, 8);
    let root = b.root();
    let int = b.add(root, DW_TAG_base_type);
    b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
    b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
    let float = b.add(root, DW_TAG_base_type);
    b.set_name(float, "float").set_int(float, DW_AT_byte_size, 4);
    b.set_int(float, DW_AT_encoding, i64::from(DW_ATE_float.0));

    let arr = b.add(root, DW_TAG_array_type);
    b.set_ref(arr, DW_AT_type, int);
    let sub = b.add(arr, DW_TAG_subrange_type);
    b.set_int(sub, DW_AT_upper_bound, 2);

    let s = b.add(root, DW_TAG_structure_type);
    b.set_name(s, "S").set_int(s, DW_AT_byte_size, 16);
    let a = b.add(s, DW_TAG_member);
    b.set_name(a, "a").set_ref(a, DW_AT_type, int).set_int(a, DW_AT_data_member_location, 0);
    let m = b.add(s, DW_TAG_member);
    b.set_name(m, "b").set_ref(m, DW_AT_type, arr).set_int(m, DW_AT_data_member_location, 4);

    let u = b.add(root, DW_TAG_union_type);
    b.set_name(u, "U").set_int(u, DW_AT_byte_size, 4);
    let i = b.add(u, DW_TAG_member);
    b.set_name(i, "i").set_ref(i, DW_AT_type, int);
    let f = b.add(u, DW_TAG_member);
    b.set_name(f, "f").set_ref(f, DW_AT_type, float);

    for (name, ty, addr) in [("a", s, 0x1000), ("u", u, 0x1100), ("x", int, 0x1200)] {
        let var = b.add(root, DW_TAG_variable);
        b.set_name(var, name).set_ref(var, DW_AT_type, ty).set_int(var, DW_AT_location, addr);
    }
    CompUnit::new(b.build()).unwrap()
}

fn c_target() -> MemoryTarget
{
    let mut target = MemoryTarget::new();
    for (i, v) in [7u32, 10, 20, 30].iter().enumerate() {
        target.poke_u32(0x1000 + 4 * i as u64, *v);
    }
    target.poke_u32(0x1100, 1.5f32.to_bits());
    target.poke_u32(0x1200, 0x1f);
    target
}

fn evaluate<'a>(ctx: &mut EvalContext<'a>, text: &str) -> FerruleResult<Evaluated<'a>>
{
    let result = Expression::parse(ctx, text)?.evaluate(ctx);
    result
}

fn print(ctx: &mut EvalContext<'_>, text: &str) -> String
{
    let printed = Expression::parse(ctx, text).and_then(|expr| expr.print(ctx));
    printed.unwrap()
}

#[test]
fn test_member_subscript_plus_constant()
{
    ferrule_utils::init_test_logging();
    let unit = c_unit(SourceLanguage::C);
    let mut target = c_target();
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);

    let expr = Expression::parse(&ctx, "a.b[2] + 3").unwrap();
    let Node::Binary { op, left, right } = expr.root() else {
        panic!("expected a binary node, got {:?}", expr.root());
    };
    assert_eq!(*op, BinaryOp::Add);
    assert_eq!(**right, Node::IntConstant { value: 3, size: 4 });
    let Node::Array { array, subscripts } = &**left else {
        panic!("expected an array node, got {left:?}");
    };
    assert_eq!(subscripts, &vec![Subscript::Index(Node::IntConstant { value: 2, size: 4 })]);
    assert!(matches!(&**array, Node::Member { name, .. } if name == "b"));

    let result = expr.evaluate(&mut ctx).unwrap();
    assert_eq!(result.value, Value::Integer(33));
    assert_eq!(result.place, None);
}

#[test]
fn test_union_members_share_storage()
{
    let unit = c_unit(SourceLanguage::C);
    let mut target = c_target();
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);

    let f = evaluate(&mut ctx, "u.f").unwrap();
    assert_eq!(f.place, Some(Place::Memory(0x1100)));
    assert_eq!(f.value, Value::Real(1.5));
    let i = evaluate(&mut ctx, "u.i").unwrap();
    assert_eq!(i.place, Some(Place::Memory(0x1100)));
    assert_eq!(i.value, Value::Integer(i64::from(1.5f32.to_bits())));
}

#[test]
fn test_missing_member_is_an_error()
{
    let unit = c_unit(SourceLanguage::C);
    let mut target = c_target();
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);
    assert!(evaluate(&mut ctx, "a.c").is_err());
    assert!(evaluate(&mut ctx, "x.a").is_err());
}

#[test]
fn test_assignment_through_member_writes_memory()
{
    let unit = c_unit(SourceLanguage::C);
    let mut target = c_target();
    {
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let assigned = evaluate(&mut ctx, "a.b[1] = a.a * 2").unwrap();
        assert_eq!(assigned.value, Value::Integer(14));
        assert_eq!(assigned.place, Some(Place::Memory(0x1008)));
        assert_eq!(evaluate(&mut ctx, "a.b[1]").unwrap().value, Value::Integer(14));
    }
    assert_eq!(target.stack_pointer(), 0x8000);
}

#[test]
fn test_hex_format_with_size_letter()
{
    let unit = c_unit(SourceLanguage::C);
    let mut target = c_target();
    let format: Format = "/xh".parse().unwrap();

    let mut ctx = EvalContext::new(&unit).with_target(&mut target).with_format(format);
    assert_eq!(print(&mut ctx, "x"), "0x1f");
    drop(ctx);

    let mut ctx = EvalContext::new(&unit).with_target(&mut target).with_format(format.filled());
    assert_eq!(print(&mut ctx, "x"), "0x001f");

    assert_eq!(format_integer(&format, 0x1f, 2, false).unwrap(), "0x1f");
    assert_eq!(format_integer(&format.filled(), 0x1f, 2, false).unwrap(), "0x001f");
}

/// `struct Base { int x; }; struct Derived : Base { int y; } d;`
fn class_unit() -> CompUnit
{
    let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
    let root = b.root();
    let int = b.add(root, DW_TAG_base_type);
    b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
    b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));

    let base = b.add(root, DW_TAG_structure_type);
    b.set_name(base, "Base").set_int(base, DW_AT_byte_size, 4);
    let x = b.add(base, DW_TAG_member);
    b.set_name(x, "x").set_ref(x, DW_AT_type, int).set_int(x, DW_AT_data_member_location, 0);

    let derived = b.add(root, DW_TAG_structure_type);
    b.set_name(derived, "Derived").set_int(derived, DW_AT_byte_size, 8);
    let inherit = b.add(derived, DW_TAG_inheritance);
    b.set_ref(inherit, DW_AT_type, base).set_int(inherit, DW_AT_data_member_location, 0);
    let y = b.add(derived, DW_TAG_member);
    b.set_name(y, "y").set_ref(y, DW_AT_type, int).set_int(y, DW_AT_data_member_location, 4);

    let d = b.add(root, DW_TAG_variable);
    b.set_name(d, "d").set_ref(d, DW_AT_type, derived).set_int(d, DW_AT_location, 0x3000);
    CompUnit::new(b.build()).unwrap()
}

#[test]
fn test_qualified_base_member_lookup()
{
    let unit = class_unit();
    let derived = Type::new(unit.find_struct("Derived").unwrap().unwrap());

    let found = find_member(derived, "Base::x").unwrap().unwrap();
    assert_eq!(found.member.name().unwrap(), "x");
    assert_eq!(found.base_adjustment.map(Die::tag), Some(DW_TAG_inheritance));
    assert!(find_member(derived, "Base::z").unwrap().is_none());
}

#[test]
fn test_inherited_member_evaluates()
{
    let unit = class_unit();
    let mut target = MemoryTarget::new();
    target.poke_u32(0x3000, 11);
    target.poke_u32(0x3004, 22);
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);

    let x = evaluate(&mut ctx, "d.x").unwrap();
    assert_eq!(x.value, Value::Integer(11));
    assert_eq!(x.place, Some(Place::Memory(0x3000)));
    assert_eq!(evaluate(&mut ctx, "d.x + d.y").unwrap().value, Value::Integer(33));
}

/// `type point; integer :: x, y; end type; type(point) :: pt`
fn fortran_unit() -> CompUnit
{
    let mut b = UnitBuilder::new(SourceLanguage::Fortran90, 8);
    let root = b.root();
    let int = b.add(root, DW_TAG_base_type);
    b.set_name(int, "integer(kind=4)").set_int(int, DW_AT_byte_size, 4);
    b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
    let point = b.add(root, DW_TAG_structure_type);
    b.set_name(point, "point").set_int(point, DW_AT_byte_size, 8);
    for (name, offset) in [("x", 0), ("y", 4)] {
        let member = b.add(point, DW_TAG_member);
        b.set_name(member, name).set_ref(member, DW_AT_type, int);
        b.set_int(member, DW_AT_data_member_location, offset);
    }
    let pt = b.add(root, DW_TAG_variable);
    b.set_name(pt, "pt").set_ref(pt, DW_AT_type, point).set_int(pt, DW_AT_location, 0x4000);
    CompUnit::new(b.build()).unwrap()
}

#[test]
fn test_fortran_member_names_are_case_blind()
{
    let unit = fortran_unit();
    let point = Type::new(unit.find_struct("point").unwrap().unwrap());
    let upper = find_member(point, "FOO").unwrap();
    assert!(upper.is_none());
    let upper = find_member(point, "Y").unwrap().unwrap();
    let lower = find_member(point, "y").unwrap().unwrap();
    assert_eq!(upper.member, lower.member);

    let mut target = MemoryTarget::new();
    target.poke_u32(0x4000, 3);
    target.poke_u32(0x4004, 4);
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);
    assert_eq!(evaluate(&mut ctx, "PT%Y").unwrap().value, Value::Integer(4));
    assert_eq!(evaluate(&mut ctx, "pt%x * pt%y").unwrap().value, Value::Integer(12));
}

#[test]
fn test_c_member_names_are_case_sensitive()
{
    let unit = c_unit(SourceLanguage::C);
    let s = Type::new(unit.find_struct("S").unwrap().unwrap());
    assert!(find_member(s, "a").unwrap().is_some());
    assert!(find_member(s, "A").unwrap().is_none());
}

/// `std::vector<int> v, empty;`
fn vector_unit() -> CompUnit
{
    let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
    let root = b.root();
    let int = b.add(root, DW_TAG_base_type);
    b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
    b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
    let vector = b.add(root, DW_TAG_class_type);
    b.set_name(vector, "vector<int, std::allocator<int> >").set_int(vector, DW_AT_byte_size, 24);
    let value_type = b.add(vector, DW_TAG_typedef);
    b.set_name(value_type, "value_type").set_ref(value_type, DW_AT_type, int);
    for (name, addr) in [("v", 0x100), ("empty", 0x200)] {
        let var = b.add(root, DW_TAG_variable);
        b.set_name(var, name).set_ref(var, DW_AT_type, vector).set_int(var, DW_AT_location, addr);
    }
    CompUnit::new(b.build()).unwrap()
}

#[test]
fn test_vector_printing_and_subscripts()
{
    let unit = vector_unit();
    let mut target = MemoryTarget::new();
    target.poke_u64(0x100, 0x1000);
    target.poke_u64(0x108, 0x100c);
    target.poke_u64(0x110, 0x1010);
    for (i, v) in [1u32, 2, 3].iter().enumerate() {
        target.poke_u32(0x1000 + 4 * i as u64, *v);
    }
    target.poke_u64(0x200, 0x1000);
    target.poke_u64(0x208, 0x1000);
    target.poke_u64(0x210, 0x1010);
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);

    assert_eq!(print(&mut ctx, "v"), "{1, 2, 3}");
    assert_eq!(print(&mut ctx, "empty"), "{}");
    assert_eq!(evaluate(&mut ctx, "v[1]").unwrap().value, Value::Integer(2));
}

#[test]
fn test_evaluation_without_process()
{
    let unit = c_unit(SourceLanguage::C);
    let mut ctx = EvalContext::new(&unit);
    assert_eq!(evaluate(&mut ctx, "sizeof(a)").unwrap().value, Value::Integer(16));
    assert_eq!(evaluate(&mut ctx, "(2 + 3) * 4").unwrap().value, Value::Integer(20));
    let err = evaluate(&mut ctx, "a.a").unwrap_err();
    assert_eq!(err, FerruleError::NoProcess);
}

/// `integer :: a(3, 2)` holding 1..6 in memory order
fn fortran_matrix() -> (CompUnit, MemoryTarget)
{
    let mut b = UnitBuilder::new(SourceLanguage::Fortran90, 8);
    let root = b.root();
    let int = b.add(root, DW_TAG_base_type);
    b.set_name(int, "integer(kind=4)").set_int(int, DW_AT_byte_size, 4);
    b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
    let arr = b.add(root, DW_TAG_array_type);
    b.set_ref(arr, DW_AT_type, int);
    for upper in [3, 2] {
        let sub = b.add(arr, DW_TAG_subrange_type);
        b.set_int(sub, DW_AT_upper_bound, upper);
    }
    let a = b.add(root, DW_TAG_variable);
    b.set_name(a, "a").set_ref(a, DW_AT_type, arr).set_int(a, DW_AT_location, 0x5000);

    let mut target = MemoryTarget::new();
    for i in 0..6u32 {
        target.poke_u32(0x5000 + 4 * u64::from(i), i + 1);
    }
    (CompUnit::new(b.build()).unwrap(), target)
}

fn integers(values: &[i64]) -> Value
{
    Value::Vector(values.iter().map(|v| Value::Integer(*v)).collect())
}

#[test]
fn test_fortran_array_sections()
{
    let (unit, mut target) = fortran_matrix();
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);

    assert_eq!(evaluate(&mut ctx, "a(2, 2)").unwrap().value, Value::Integer(5));
    assert_eq!(evaluate(&mut ctx, "a(2, :)").unwrap().value, integers(&[2, 5]));
    assert_eq!(evaluate(&mut ctx, "a(:, 2)").unwrap().value, integers(&[4, 5, 6]));
    assert_eq!(evaluate(&mut ctx, "a(2:3, 1)").unwrap().value, integers(&[2, 3]));
    assert_eq!(evaluate(&mut ctx, "a(1:2, 1:2)").unwrap().value, integers(&[1, 2, 4, 5]));

    let empty = evaluate(&mut ctx, "a(2:1, 1)").unwrap();
    assert_eq!(empty.value, integers(&[]));
    assert_eq!(empty.ty, None);
}

#[test]
fn test_fortran_section_bounds_that_overflow_are_rejected()
{
    let (unit, mut target) = fortran_matrix();
    let mut ctx = EvalContext::new(&unit).with_target(&mut target);

    for text in [
        "a(-9223372036854775807:9223372036854775807, 1)",
        "a(1, -9223372036854775807:9223372036854775807)",
    ] {
        let err = evaluate(&mut ctx, text).unwrap_err();
        assert!(err.to_string().contains("too large"), "{text}: {err}");
    }
}
