//! Fortran intrinsic functions the debugger evaluates itself.

use std::fmt;

use crate::context::EvalContext;
use crate::error::{FerruleError, FerruleResult};
use crate::expr::eval::{long_type, static_type as node_type, truth_type, Evaluator, Operand};
use crate::expr::Node;
use crate::value::Value;
use crate::variant::{array, synthetic, Dimension, Type, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic
{
    /// Byte size of the argument's type
    Kind,
    /// Length of a character value
    Len,
    /// Element count of an array, optionally along one dimension
    Size,
    Lbound,
    Ubound,
    Allocated,
    Associated,
    /// Address of the argument as an integer
    Loc,
    /// Address of the argument as a pointer
    Addr,
}

impl Intrinsic
{
    /// Recognize an intrinsic name, in any case
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self>
    {
        let intrinsic = match name.to_ascii_uppercase().as_str() {
            "KIND" => Intrinsic::Kind,
            "LEN" => Intrinsic::Len,
            "SIZE" => Intrinsic::Size,
            "LBOUND" => Intrinsic::Lbound,
            "UBOUND" => Intrinsic::Ubound,
            "ALLOCATED" => Intrinsic::Allocated,
            "ASSOCIATED" => Intrinsic::Associated,
            "LOC" => Intrinsic::Loc,
            "ADDR" => Intrinsic::Addr,
            _ => return None,
        };
        Some(intrinsic)
    }

    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            Intrinsic::Kind => "KIND",
            Intrinsic::Len => "LEN",
            Intrinsic::Size => "SIZE",
            Intrinsic::Lbound => "LBOUND",
            Intrinsic::Ubound => "UBOUND",
            Intrinsic::Allocated => "ALLOCATED",
            Intrinsic::Associated => "ASSOCIATED",
            Intrinsic::Loc => "LOC",
            Intrinsic::Addr => "ADDR",
        }
    }

    /// Whether an optional dimension argument may follow the first
    #[must_use]
    pub const fn takes_dimension(self) -> bool
    {
        matches!(self, Intrinsic::Size | Intrinsic::Lbound | Intrinsic::Ubound)
    }
}

impl fmt::Display for Intrinsic
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

fn check_arguments(intrinsic: Intrinsic, count: usize) -> FerruleResult<()>
{
    if intrinsic.takes_dimension() {
        if !(1..=2).contains(&count) {
            return Err(FerruleError::eval(format!(
                "Incorrect number of arguments for intrinsic (expected 1 or 2, got {count})"
            )));
        }
    } else if count != 1 {
        return Err(FerruleError::eval(format!(
            "Incorrect number of arguments for intrinsic (expected 1, got {count})"
        )));
    }
    Ok(())
}

/// Dimensions of an array argument, if it is one
fn array_dimensions(ty: Option<Type<'_>>) -> FerruleResult<Option<Vec<Dimension>>>
{
    match ty {
        Some(ty) if ty.strip()?.kind() == TypeKind::Array => Ok(Some(array::dimensions(ty)?)),
        _ => Ok(None),
    }
}

/// The dimension selected by a 1-based `dim` argument
fn selected(ev: &mut Evaluator<'_, '_>, dims: &[Dimension], dim: &Node) -> FerruleResult<Dimension>
{
    let invalid = || FerruleError::eval("Invalid dimension number for size intrinsic");
    let Value::Integer(number) = ev.value_of(dim)? else {
        return Err(invalid());
    };
    usize::try_from(number)
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| dims.get(i))
        .copied()
        .ok_or_else(invalid)
}

#[allow(clippy::cast_possible_wrap)]
fn integer(value: usize) -> Value
{
    Value::Integer(value as i64)
}

/// Evaluate an intrinsic call
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn evaluate<'a>(ev: &mut Evaluator<'_, 'a>, intrinsic: Intrinsic, args: &[Node]) -> FerruleResult<Operand<'a>>
{
    check_arguments(intrinsic, args.len())?;
    let unit = ev.unit();
    let int = Some(synthetic::int_type(unit));
    let arg = ev.operand(&args[0])?;

    match intrinsic {
        Intrinsic::Kind | Intrinsic::Len => {
            let size = match (arg.ty, &arg.value) {
                (Some(ty), _) => ty.real_size(ev.ctx)?,
                (None, Some(Value::Str(text))) if intrinsic == Intrinsic::Len => text.len(),
                (None, Some(Value::Str(_))) => 1,
                (None, _) => return Err(FerruleError::eval(format!("{intrinsic} needs a typed argument"))),
            };
            Ok(Operand::constant(integer(size), int))
        }
        Intrinsic::Size => {
            let count = match (array_dimensions(arg.ty)?, args.get(1)) {
                (Some(dims), Some(dim)) => selected(ev, &dims, dim)?.count(),
                (Some(dims), None) => dims.iter().map(Dimension::count).product(),
                (None, Some(_)) => return Err(FerruleError::eval("Invalid dimension number for size intrinsic")),
                (None, None) => match arg.ty {
                    Some(ty) => ty.real_size(ev.ctx)?,
                    None => 1,
                },
            };
            Ok(Operand::constant(integer(count), int))
        }
        Intrinsic::Lbound | Intrinsic::Ubound => {
            let Some(dims) = array_dimensions(arg.ty)? else {
                return Err(FerruleError::eval(format!("{intrinsic} requires an array argument")));
            };
            let bound = |dim: &Dimension| {
                if intrinsic == Intrinsic::Lbound {
                    dim.lower
                } else {
                    dim.upper
                }
            };
            match args.get(1) {
                Some(dim) => {
                    let dim = selected(ev, &dims, dim)?;
                    Ok(Operand::constant(Value::Integer(bound(&dim)), int))
                }
                None => {
                    let bounds = dims.iter().map(|d| Value::Integer(bound(d))).collect();
                    Ok(Operand::constant(Value::Vector(bounds), None))
                }
            }
        }
        Intrinsic::Allocated | Intrinsic::Associated => {
            let set = match ev.load(&arg)? {
                Value::Integer(v) => v != 0,
                Value::Bool(b) => b,
                _ => false,
            };
            Ok(ev.truth(set))
        }
        Intrinsic::Loc | Intrinsic::Addr => {
            let Some(addr) = arg.address() else {
                return Err(FerruleError::NotAnLvalue(
                    "Attempt to take address of value not located in memory.".to_string(),
                ));
            };
            let ty = if intrinsic == Intrinsic::Loc {
                long_type(unit)
            } else {
                synthetic::pointer_to(unit, arg.ty)
            };
            Ok(Operand::constant(Value::Integer(addr as i64), Some(ty)))
        }
    }
}

/// Result type of an intrinsic call without evaluating it
pub(crate) fn static_type<'a>(ctx: &EvalContext<'a>, intrinsic: Intrinsic, args: &[Node]) -> FerruleResult<Option<Type<'a>>>
{
    let unit = ctx.unit();
    Ok(match intrinsic {
        Intrinsic::Kind | Intrinsic::Len | Intrinsic::Size => Some(synthetic::int_type(unit)),
        Intrinsic::Lbound | Intrinsic::Ubound if args.len() == 2 => Some(synthetic::int_type(unit)),
        Intrinsic::Lbound | Intrinsic::Ubound => None,
        Intrinsic::Allocated | Intrinsic::Associated => Some(truth_type(unit, ctx.language)),
        Intrinsic::Loc => Some(long_type(unit)),
        Intrinsic::Addr => {
            let arg = match args.first() {
                Some(arg) => node_type(ctx, arg)?,
                None => None,
            };
            Some(synthetic::pointer_to(unit, arg))
        }
    })
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::expr::Expression;
    use crate::test_support::SparseTarget;
    use crate::types::SourceLanguage;

    /// `integer :: a(3), m(2,3)`, `character(len=8) :: s`, `integer, pointer :: p`
    fn unit() -> CompUnit
    {
        let mut b = UnitBuilder::new(SourceLanguage::Fortran90, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "integer(kind=4)").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let vec = b.add(root, DW_TAG_array_type);
        b.set_ref(vec, DW_AT_type, int);
        let sub = b.add(vec, DW_TAG_subrange_type);
        b.set_int(sub, DW_AT_lower_bound, 1).set_int(sub, DW_AT_upper_bound, 3);
        let mat = b.add(root, DW_TAG_array_type);
        b.set_ref(mat, DW_AT_type, int);
        for upper in [2, 3] {
            let sub = b.add(mat, DW_TAG_subrange_type);
            b.set_int(sub, DW_AT_lower_bound, 1).set_int(sub, DW_AT_upper_bound, upper);
        }
        let text = b.add(root, DW_TAG_string_type);
        b.set_int(text, DW_AT_byte_size, 8);
        let ptr = b.add(root, DW_TAG_pointer_type);
        b.set_ref(ptr, DW_AT_type, int).set_int(ptr, DW_AT_byte_size, 8);
        for (name, ty, addr) in [("a", vec, 0x1000), ("m", mat, 0x1100), ("s", text, 0x1200), ("p", ptr, 0x1300)] {
            let var = b.add(root, DW_TAG_variable);
            b.set_name(var, name).set_ref(var, DW_AT_type, ty).set_int(var, DW_AT_location, addr);
        }
        CompUnit::new(b.build()).unwrap()
    }

    fn eval(text: &str) -> FerruleResult<Value>
    {
        let unit = unit();
        let mut target = SparseTarget::new();
        target.poke_u64(0x1300, 0);
        target.poke(0x1200, b"fortran ");
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let expr = Expression::parse(&ctx, text)?;
        let result = expr.evaluate(&mut ctx)?;
        Ok(result.value)
    }

    #[test]
    fn test_names()
    {
        assert_eq!(Intrinsic::from_name("ubound"), Some(Intrinsic::Ubound));
        assert_eq!(Intrinsic::from_name("Loc"), Some(Intrinsic::Loc));
        assert_eq!(Intrinsic::from_name("sqrt"), None);
        assert_eq!(Intrinsic::Associated.to_string(), "ASSOCIATED");
    }

    #[test]
    fn test_size_and_bounds()
    {
        assert_eq!(eval("size(a)").unwrap(), Value::Integer(3));
        assert_eq!(eval("SIZE(m)").unwrap(), Value::Integer(6));
        assert_eq!(eval("size(m, 2)").unwrap(), Value::Integer(3));
        assert_eq!(eval("lbound(m)").unwrap(), Value::Vector(vec![Value::Integer(1), Value::Integer(1)]));
        assert_eq!(eval("ubound(m, 1)").unwrap(), Value::Integer(2));

        let err = eval("size(m, 3)").unwrap_err();
        assert_eq!(err.to_string(), "Invalid dimension number for size intrinsic");
    }

    #[test]
    fn test_kind_len_and_addresses()
    {
        assert_eq!(eval("len(s)").unwrap(), Value::Integer(8));
        assert_eq!(eval("kind(a(1))").unwrap(), Value::Integer(4));
        assert_eq!(eval("loc(m)").unwrap(), Value::Integer(0x1100));
        assert_eq!(eval("addr(s)").unwrap(), Value::Integer(0x1200));
        assert_eq!(eval("associated(p)").unwrap(), Value::Bool(false));
        assert_eq!(eval("allocated(a)").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_argument_count()
    {
        let err = eval("kind(a, 2)").unwrap_err();
        assert_eq!(err.to_string(), "Incorrect number of arguments for intrinsic (expected 1, got 2)");
        let err = eval("size").unwrap_err();
        assert_eq!(err.to_string(), "SIZE is an intrinsic function and needs arguments");
    }
}
