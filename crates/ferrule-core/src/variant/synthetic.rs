//! Types created by casts, intrinsics and subscripts.
//!
//! Synthesized entries live in the unit arena without a byte offset. Each
//! distinct shape is created once and reused.

use gimli::{constants, DwAte, DwTag};

use crate::dwarf::{AttrValue, CompUnit, DieId, Reference};
use crate::variant::{Dimension, Type};

fn type_ref(target: Option<Type<'_>>) -> Vec<(gimli::DwAt, AttrValue)>
{
    target
        .map(|t| vec![(constants::DW_AT_type, AttrValue::Ref(Reference::Resolved(t.die().id())))])
        .unwrap_or_default()
}

fn key_of(target: Option<Type<'_>>) -> String
{
    target.map_or_else(|| "void".to_string(), |t| format!("{:?}", t.die().id()))
}

fn wrap<'u>(unit: &'u CompUnit, tag: DwTag, target: Option<Type<'u>>, extra: Vec<(gimli::DwAt, AttrValue)>) -> Type<'u>
{
    let key = format!("{}:{}", tag, key_of(target));
    let id = unit.intern_synthetic(key, || {
        let mut attrs = type_ref(target);
        attrs.extend(extra);
        unit.add_synthetic(None, tag, attrs)
    });
    Type::new(unit.die(id))
}

/// Base type with a name, encoding and size
#[must_use]
pub fn base_type<'u>(unit: &'u CompUnit, name: &str, encoding: DwAte, size: usize) -> Type<'u>
{
    let key = format!("base:{name}:{}:{size}", encoding.0);
    let id = unit.intern_synthetic(key, || {
        unit.add_synthetic(
            None,
            constants::DW_TAG_base_type,
            vec![
                (constants::DW_AT_name, AttrValue::Str(name.to_string())),
                (constants::DW_AT_encoding, AttrValue::Int(i64::from(encoding.0))),
                (constants::DW_AT_byte_size, AttrValue::Int(i64::try_from(size).unwrap_or(0))),
            ],
        )
    });
    Type::new(unit.die(id))
}

/// Pointer to `target` (`None` for `void *`)
#[must_use]
pub fn pointer_to<'u>(unit: &'u CompUnit, target: Option<Type<'u>>) -> Type<'u>
{
    let size = i64::from(unit.address_size());
    wrap(
        unit,
        constants::DW_TAG_pointer_type,
        target,
        vec![(constants::DW_AT_byte_size, AttrValue::Int(size))],
    )
}

#[must_use]
pub fn reference_to<'u>(unit: &'u CompUnit, target: Type<'u>) -> Type<'u>
{
    let size = i64::from(unit.address_size());
    wrap(
        unit,
        constants::DW_TAG_reference_type,
        Some(target),
        vec![(constants::DW_AT_byte_size, AttrValue::Int(size))],
    )
}

#[must_use]
pub fn const_of<'u>(unit: &'u CompUnit, target: Option<Type<'u>>) -> Type<'u>
{
    wrap(unit, constants::DW_TAG_const_type, target, Vec::new())
}

#[must_use]
pub fn volatile_of<'u>(unit: &'u CompUnit, target: Option<Type<'u>>) -> Type<'u>
{
    wrap(unit, constants::DW_TAG_volatile_type, target, Vec::new())
}

/// Array of `element` with the given dimensions
#[must_use]
pub fn array_of<'u>(unit: &'u CompUnit, element: Type<'u>, dims: &[Dimension]) -> Type<'u>
{
    let shape: Vec<String> = dims.iter().map(|d| format!("{}:{}", d.lower, d.upper)).collect();
    let key = format!("array:{:?}:{}", element.die().id(), shape.join(","));
    let id = unit.intern_synthetic(key, || {
        let array = unit.add_synthetic(None, constants::DW_TAG_array_type, type_ref(Some(element)));
        for dim in dims {
            unit.add_synthetic_child(
                array,
                constants::DW_TAG_subrange_type,
                vec![
                    (constants::DW_AT_lower_bound, AttrValue::Int(dim.lower)),
                    (constants::DW_AT_upper_bound, AttrValue::Int(dim.upper)),
                ],
            );
        }
        array
    });
    Type::new(unit.die(id))
}

/// Function type returning `result` and taking `params`
#[must_use]
pub fn subroutine<'u>(unit: &'u CompUnit, result: Option<Type<'u>>, params: &[Type<'u>]) -> Type<'u>
{
    let ids: Vec<String> = params.iter().map(|p| format!("{:?}", p.die().id())).collect();
    let key = format!("fn:{}:{}", key_of(result), ids.join(","));
    let id = unit.intern_synthetic(key, || {
        let function = unit.add_synthetic(None, constants::DW_TAG_subroutine_type, type_ref(result));
        for param in params {
            unit.add_synthetic_child(function, constants::DW_TAG_formal_parameter, type_ref(Some(*param)));
        }
        function
    });
    Type::new(unit.die(id))
}

/// Fortran `character(len=N)`
#[must_use]
pub fn string_type(unit: &CompUnit, len: usize) -> Type<'_>
{
    let key = format!("string:{len}");
    let id: DieId = unit.intern_synthetic(key, || {
        unit.add_synthetic(
            None,
            constants::DW_TAG_string_type,
            vec![(constants::DW_AT_byte_size, AttrValue::Int(i64::try_from(len).unwrap_or(0)))],
        )
    });
    Type::new(unit.die(id))
}

/// Default `int` of the unit's language
#[must_use]
pub fn int_type(unit: &CompUnit) -> Type<'_>
{
    if unit.language().is_fortran() {
        base_type(unit, "integer", constants::DW_ATE_signed, 4)
    } else {
        base_type(unit, "int", constants::DW_ATE_signed, 4)
    }
}

/// Default `double` of the unit's language
#[must_use]
pub fn real_type(unit: &CompUnit) -> Type<'_>
{
    if unit.language().is_fortran() {
        base_type(unit, "real(kind=8)", constants::DW_ATE_float, 8)
    } else {
        base_type(unit, "double", constants::DW_ATE_float, 8)
    }
}

/// Plain `char`
#[must_use]
pub fn char_type(unit: &CompUnit) -> Type<'_>
{
    if unit.language().is_fortran() {
        base_type(unit, "character", constants::DW_ATE_unsigned_char, 1)
    } else {
        base_type(unit, "char", constants::DW_ATE_signed_char, 1)
    }
}

/// Language boolean
#[must_use]
pub fn bool_type(unit: &CompUnit) -> Type<'_>
{
    if unit.language().is_fortran() {
        base_type(unit, "logical", constants::DW_ATE_boolean, 4)
    } else {
        base_type(unit, "bool", constants::DW_ATE_boolean, 1)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dwarf::UnitBuilder;
    use crate::types::SourceLanguage;
    use crate::variant::TypeKind;

    #[test]
    fn test_synthetic_types_are_interned()
    {
        let unit = CompUnit::new(UnitBuilder::new(SourceLanguage::C, 8).build()).unwrap();
        let int = int_type(&unit);
        let p1 = pointer_to(&unit, Some(int));
        let p2 = pointer_to(&unit, Some(int));
        assert_eq!(p1, p2);
        assert_eq!(p1.kind(), TypeKind::Pointer);
        assert_eq!(p1.size().unwrap(), 8);
        assert_eq!(p1.target().unwrap(), Some(int));
    }

    #[test]
    fn test_synthetic_array_size()
    {
        let unit = CompUnit::new(UnitBuilder::new(SourceLanguage::C, 8).build()).unwrap();
        let arr = array_of(&unit, int_type(&unit), &[Dimension { lower: 0, upper: 9 }]);
        assert_eq!(arr.size().unwrap(), 40);
    }
}
