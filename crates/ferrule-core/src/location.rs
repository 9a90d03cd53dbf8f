//! # Location Expressions
//!
//! Evaluation of `DW_AT_location`, `DW_AT_frame_base` and
//! `DW_AT_data_member_location` with gimli's expression evaluator.
//!
//! Memory and register requests are answered through the [`EvalContext`]
//! target; `DW_OP_fbreg` uses the context's frame base. Location lists are
//! not decoded by the loader, so only single expressions reach this module.

use gimli::{EndianSlice, EvaluationResult, Expression, Piece, RunTimeEndian};

use crate::context::{EvalContext, sign_extend};
use crate::dwarf::{AttrValue, Die};
use crate::error::{map_dwarf_error, FerruleError, FerruleResult};

/// Where a value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location
{
    /// In target memory
    Address(u64),
    /// In a register, by DWARF number
    Register(u16),
    /// Nowhere: the expression computes the value itself
    Value(i64),
    /// Optimized out
    Empty,
}

impl Location
{
    /// Address, if the value lives in memory
    #[must_use]
    pub const fn address(self) -> Option<u64>
    {
        match self {
            Location::Address(addr) => Some(addr),
            _ => None,
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn generic(value: gimli::Value) -> u64
{
    match value {
        gimli::Value::Generic(v) | gimli::Value::U64(v) => v,
        gimli::Value::I8(v) => v as u64,
        gimli::Value::U8(v) => u64::from(v),
        gimli::Value::I16(v) => v as u64,
        gimli::Value::U16(v) => u64::from(v),
        gimli::Value::I32(v) => v as u64,
        gimli::Value::U32(v) => u64::from(v),
        gimli::Value::I64(v) => v as u64,
        gimli::Value::F32(v) => v.to_bits().into(),
        gimli::Value::F64(v) => v.to_bits(),
    }
}

/// Evaluate a location expression
///
/// `initial` is pushed before evaluation; member locations use it for the
/// address of the enclosing object.
///
/// ## Errors
///
/// Fails on malformed expressions, on operations that need a frame base or
/// target that is not available, and on unsupported operations (TLS, entry
/// values, call frame CFA).
pub fn evaluate(ctx: &EvalContext<'_>, bytes: &[u8], initial: Option<u64>) -> FerruleResult<Location>
{
    let endian = ctx.endian();
    let expr = Expression(EndianSlice::new(bytes, endian));
    let mut eval = expr.evaluation(ctx.unit().encoding());
    if let Some(initial) = initial {
        eval.set_initial_value(initial);
    }
    let mut result = eval
        .evaluate()
        .map_err(|err| map_dwarf_error("evaluating location", err))?;
    loop {
        result = match result {
            EvaluationResult::Complete => break,
            EvaluationResult::RequiresMemory { address, size, .. } => {
                let raw = ctx.read_uint(address, usize::from(size))?;
                eval.resume_with_memory(gimli::Value::Generic(raw))
            }
            EvaluationResult::RequiresRegister { register, .. } => {
                let raw = ctx.read_register(register.0)?;
                eval.resume_with_register(gimli::Value::Generic(raw))
            }
            EvaluationResult::RequiresFrameBase => {
                let base = ctx
                    .frame_base
                    .ok_or_else(|| FerruleError::eval("No frame selected"))?;
                eval.resume_with_frame_base(base)
            }
            EvaluationResult::RequiresRelocatedAddress(addr) => eval.resume_with_relocated_address(addr),
            EvaluationResult::RequiresIndexedAddress { .. } => {
                return Err(FerruleError::NotSupported("Indexed addresses are not supported".to_string()));
            }
            other => {
                return Err(FerruleError::NotSupported(format!("Unsupported location operation: {other:?}")));
            }
        }
        .map_err(|err| map_dwarf_error("evaluating location", err))?;
    }

    let pieces: Vec<Piece<EndianSlice<'_, RunTimeEndian>>> = eval.result();
    let Some(piece) = pieces.first() else {
        return Ok(Location::Empty);
    };
    #[allow(clippy::cast_possible_wrap)]
    let location = match &piece.location {
        gimli::Location::Empty => Location::Empty,
        gimli::Location::Register { register } => Location::Register(register.0),
        gimli::Location::Address { address } => Location::Address(*address),
        gimli::Location::Value { value } => Location::Value(generic(*value) as i64),
        gimli::Location::Bytes { value } => {
            let size = value.len().min(8);
            let raw = crate::context::decode_uint(&value.slice()[..size], endian);
            Location::Value(sign_extend(raw, size))
        }
        gimli::Location::ImplicitPointer { .. } => {
            return Err(FerruleError::NotSupported("Implicit pointers are not supported".to_string()));
        }
    };
    Ok(location)
}

/// Location of a variable or parameter entry
///
/// A variable without a location attribute but with a constant value
/// evaluates to that value; without either it is optimized out.
///
/// ## Errors
///
/// See [`evaluate`].
#[allow(clippy::cast_sign_loss)]
pub fn variable_location(ctx: &EvalContext<'_>, die: Die<'_>) -> FerruleResult<Location>
{
    match die.attr(gimli::DW_AT_location)? {
        Some(AttrValue::Block(bytes)) => evaluate(ctx, &bytes, None),
        Some(AttrValue::Int(addr)) => Ok(Location::Address(addr as u64)),
        _ => match die.attr_int(gimli::DW_AT_const_value)? {
            Some(value) => Ok(Location::Value(value)),
            None => Ok(Location::Empty),
        },
    }
}

/// Byte offset of a member inside its object
///
/// Constant offsets are returned directly; expression offsets are evaluated
/// with `base` pushed. Members without a location (union members) are at 0.
///
/// ## Errors
///
/// See [`evaluate`].
#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
pub fn member_offset(ctx: &EvalContext<'_>, member: Die<'_>, base: u64) -> FerruleResult<u64>
{
    match member.attr(gimli::DW_AT_data_member_location)? {
        Some(AttrValue::Int(offset)) => Ok(offset as u64),
        Some(AttrValue::Block(bytes)) => match evaluate(ctx, &bytes, Some(base))? {
            Location::Address(addr) => Ok(addr.wrapping_sub(base)),
            Location::Value(v) => Ok((v as u64).wrapping_sub(base)),
            _ => Err(FerruleError::MalformedDebugInfo("member location is not an address".to_string())),
        },
        _ => Ok(0),
    }
}

/// Frame base of a subprogram, given its entry and the frame's registers
///
/// ## Errors
///
/// See [`evaluate`].
#[allow(clippy::cast_sign_loss)]
pub fn frame_base(ctx: &EvalContext<'_>, function: Die<'_>) -> FerruleResult<Option<u64>>
{
    let Some(AttrValue::Block(bytes)) = function.attr(gimli::DW_AT_frame_base)? else {
        return Ok(None);
    };
    match evaluate(ctx, &bytes, None)? {
        Location::Address(addr) => Ok(Some(addr)),
        Location::Register(reg) => Ok(Some(ctx.read_register(reg)?)),
        Location::Value(v) => Ok(Some(v as u64)),
        Location::Empty => Ok(None),
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::types::SourceLanguage;

    fn unit() -> CompUnit
    {
        CompUnit::new(UnitBuilder::new(SourceLanguage::C, 8).build()).unwrap()
    }

    #[test]
    fn test_static_address()
    {
        let unit = unit();
        let ctx = EvalContext::new(&unit);
        let mut bytes = vec![DW_OP_addr.0];
        bytes.extend_from_slice(&0x4010u64.to_le_bytes());
        assert_eq!(evaluate(&ctx, &bytes, None).unwrap(), Location::Address(0x4010));
    }

    #[test]
    fn test_frame_relative()
    {
        let unit = unit();
        let mut ctx = EvalContext::new(&unit);
        ctx.frame_base = Some(0x1000);
        // DW_OP_fbreg -8
        let bytes = [DW_OP_fbreg.0, 0x78];
        assert_eq!(evaluate(&ctx, &bytes, None).unwrap(), Location::Address(0xff8));
    }

    #[test]
    fn test_frame_relative_without_frame()
    {
        let unit = unit();
        let ctx = EvalContext::new(&unit);
        let bytes = [DW_OP_fbreg.0, 0x78];
        assert!(evaluate(&ctx, &bytes, None).is_err());
    }

    #[test]
    fn test_register_location()
    {
        let unit = unit();
        let ctx = EvalContext::new(&unit);
        let bytes = [DW_OP_reg3.0];
        assert_eq!(evaluate(&ctx, &bytes, None).unwrap(), Location::Register(3));
    }

    #[test]
    fn test_member_offset_expression()
    {
        let unit = unit();
        let ctx = EvalContext::new(&unit);
        let id = unit.add_synthetic(
            None,
            DW_TAG_member,
            vec![(DW_AT_data_member_location, AttrValue::block(&[DW_OP_plus_uconst.0, 12]))],
        );
        assert_eq!(member_offset(&ctx, unit.die(id), 0x2000).unwrap(), 12);
    }
}
