//! Typed loads and stores.
//!
//! Scalars load as [`Value::Integer`] or [`Value::Real`]. Aggregates
//! (structures, arrays, Fortran strings, complex numbers) load as the address
//! of their storage, or as [`Value::Register`] when they live in a register.

use crate::context::{sign_extend, EvalContext};
use crate::error::{FerruleError, FerruleResult};
use crate::types::RegisterId;
use crate::value::Value;
use crate::variant::Type;

/// Storage designated by an lvalue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place
{
    Memory(u64),
    /// DWARF register number
    Register(u16),
    /// Bit field: `bits` bits starting `shift` bits above the LSB of the
    /// `size`-byte word at `addr`
    Bits
    {
        addr: u64, size: usize, shift: u32, bits: u32
    },
}

impl Place
{
    #[must_use]
    pub const fn address(self) -> Option<u64>
    {
        match self {
            Place::Memory(addr) | Place::Bits { addr, .. } => Some(addr),
            Place::Register(_) => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn real_from_bits(raw: u64, size: usize) -> FerruleResult<f64>
{
    match size {
        4 => Ok(f64::from(f32::from_bits(raw as u32))),
        8 => Ok(f64::from_bits(raw)),
        _ => Err(FerruleError::NotSupported(format!("Cannot load a {size} byte real"))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn real_to_bits(value: f64, size: usize) -> FerruleResult<u64>
{
    match size {
        4 => Ok(u64::from((value as f32).to_bits())),
        8 => Ok(value.to_bits()),
        _ => Err(FerruleError::NotSupported(format!("Cannot store a {size} byte real"))),
    }
}

/// Mask of the low `bits` bits
const fn low_mask(bits: u32) -> u64
{
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Load a value of type `ty` from `place`
///
/// With [`EvalContext::address_only`] set, memory places load as their
/// address regardless of type.
///
/// ## Errors
///
/// Fails without an active target, on unreadable memory, and on sizes that
/// cannot be represented.
#[allow(clippy::cast_possible_wrap)]
pub fn load(ctx: &EvalContext<'_>, ty: Option<Type<'_>>, place: Place) -> FerruleResult<Value>
{
    let Some(ty) = ty else {
        return match place {
            Place::Memory(addr) => Ok(Value::Integer(addr as i64)),
            _ => Err(FerruleError::eval("Attempt to take contents of a non-pointer value.")),
        };
    };
    let caps = ty.capabilities()?;
    if ctx.address_only || caps.by_address() {
        return match place {
            Place::Memory(addr) | Place::Bits { addr, .. } => Ok(Value::Integer(addr as i64)),
            Place::Register(reg) if caps.by_address() => Ok(Value::Register(reg)),
            Place::Register(_) => Err(FerruleError::NotAnLvalue("Address requested for a value in a register".to_string())),
        };
    }
    let size = ty.real_size(ctx)?;
    match place {
        Place::Memory(addr) => {
            if caps.real {
                Ok(Value::Real(real_from_bits(ctx.read_uint(addr, size)?, size)?))
            } else {
                Ok(Value::Integer(ctx.read_value(addr, size, caps.signed)?))
            }
        }
        Place::Register(reg) => {
            let raw = ctx.read_register(reg)?;
            if caps.real {
                Ok(Value::Real(real_from_bits(raw, size)?))
            } else {
                let raw = raw & low_mask(u32::try_from(size * 8).unwrap_or(64));
                Ok(Value::Integer(if caps.signed { sign_extend(raw, size) } else { raw as i64 }))
            }
        }
        Place::Bits { addr, size, shift, bits } => {
            let word = ctx.read_uint(addr, size)?;
            let raw = (word >> shift) & low_mask(bits);
            let value = if caps.signed && bits > 0 && bits < 64 && (raw >> (bits - 1)) & 1 == 1 {
                (raw | !low_mask(bits)) as i64
            } else {
                raw as i64
            };
            Ok(Value::Integer(value))
        }
    }
}

/// Raw integer bits of a scalar value converted for storage in `ty`
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn scalar_bits(value: &Value, real: bool, size: usize) -> FerruleResult<u64>
{
    if real {
        return real_to_bits(value.to_real()?, size);
    }
    match value {
        Value::Real(r) => Ok(*r as i64 as u64),
        other => Ok(other.as_integer()? as u64),
    }
}

/// Store `value` into `place` as type `ty`
///
/// Scalars convert between integer and real as C assignment does.
/// Aggregates copy memory from the address held by `value`; arrays also
/// accept a vector of element values and character storage accepts strings.
///
/// ## Errors
///
/// Fails without an active target and on values that do not fit the type.
#[allow(clippy::cast_sign_loss)]
pub fn store(ctx: &mut EvalContext<'_>, ty: Type<'_>, place: Place, value: &Value) -> FerruleResult<()>
{
    let caps = ty.capabilities()?;
    let size = ty.real_size(ctx)?;

    if caps.by_address() {
        return store_aggregate(ctx, ty, place, value, size);
    }

    let bits = scalar_bits(value, caps.real, size)?;
    match place {
        Place::Memory(addr) => ctx.write_uint(addr, size, bits),
        Place::Register(reg) => ctx.write_register(reg, bits),
        Place::Bits { addr, size, shift, bits: width } => {
            let word = ctx.read_uint(addr, size)?;
            let mask = low_mask(width) << shift;
            let updated = (word & !mask) | ((bits << shift) & mask);
            ctx.write_uint(addr, size, updated)
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn store_aggregate(ctx: &mut EvalContext<'_>, ty: Type<'_>, place: Place, value: &Value, size: usize) -> FerruleResult<()>
{
    let stripped = ty.strip()?;
    match (place, value) {
        (Place::Memory(dest), Value::Integer(src)) => {
            let bytes = ctx.read_bytes(*src as u64, size)?;
            ctx.write_bytes(dest, &bytes)
        }
        (Place::Memory(dest), Value::Register(reg)) => {
            let contents = ctx.read_register(*reg)?;
            ctx.write_uint(dest, size.min(8), contents)
        }
        (Place::Register(reg), Value::Integer(src)) => {
            let contents = ctx.read_uint(*src as u64, size.min(8))?;
            ctx.write_register(reg, contents)
        }
        (Place::Register(reg), Value::Register(src)) => {
            let contents = ctx.read_register(*src)?;
            ctx.write_register(reg, contents)
        }
        (Place::Memory(dest), Value::Str(text)) => {
            let caps = stripped.capabilities()?;
            let mut bytes = text.as_bytes().to_vec();
            if caps.string {
                // Fortran character storage is blank padded
                bytes.resize(size, b' ');
            } else if bytes.len() < size {
                bytes.push(0);
            }
            bytes.truncate(size);
            ctx.write_bytes(dest, &bytes)
        }
        (Place::Memory(dest), Value::Vector(items)) if stripped.capabilities()?.array => {
            let element = stripped
                .target()?
                .ok_or_else(|| FerruleError::eval("Array has no element type"))?;
            let element_size = element.real_size(ctx)?;
            let capacity = if element_size == 0 { 0 } else { size / element_size };
            if items.len() != capacity {
                return Err(FerruleError::eval("Incorrect number of elements for setting the array value"));
            }
            for (index, item) in items.iter().enumerate() {
                store(ctx, element, Place::Memory(dest + (index * element_size) as u64), item)?;
            }
            Ok(())
        }
        (_, Value::Real(_) | Value::Bool(_)) if stripped.capabilities()?.complex => {
            let dest = place
                .address()
                .ok_or_else(|| FerruleError::NotSupported("Cannot assign a complex register".to_string()))?;
            let half = size / 2;
            let bits = real_to_bits(value.to_real()?, half)?;
            ctx.write_uint(dest, half, bits)?;
            ctx.write_uint(dest + half as u64, half, 0)
        }
        _ => Err(FerruleError::eval("Invalid type combination in assignment")),
    }
}

/// Copy a register-resident aggregate to scratch stack space
///
/// Returns the scratch address and the stack pointer to restore with
/// [`restore_stack`] once the value is no longer needed.
///
/// ## Errors
///
/// Fails without an active target.
pub fn spill_register(ctx: &mut EvalContext<'_>, reg: u16, size: usize) -> FerruleResult<(u64, u64)>
{
    let contents = ctx.read_register(reg)?;
    let arch = ctx.architecture();
    let target = ctx.target_mut()?;
    let old_sp = target.read_register(RegisterId::Sp)?;
    let scratch = arch.stack_space(target, size as u64)?;
    ctx.write_uint(scratch.value(), size.min(8), contents)?;
    Ok((scratch.value(), old_sp))
}

/// Put the stack pointer back after [`spill_register`]
///
/// ## Errors
///
/// Fails without an active target.
pub fn restore_stack(ctx: &mut EvalContext<'_>, old_sp: u64) -> FerruleResult<()>
{
    ctx.target_mut()?.write_register(RegisterId::Sp, old_sp)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_real_bits_roundtrip()
    {
        let bits = real_to_bits(1.5, 4).unwrap();
        assert_eq!(real_from_bits(bits, 4).unwrap(), 1.5);
        assert!(real_from_bits(0, 10).is_err());
    }

    #[test]
    fn test_low_mask()
    {
        assert_eq!(low_mask(3), 0b111);
        assert_eq!(low_mask(64), u64::MAX);
    }

    #[test]
    fn test_scalar_bits_converts_between_int_and_real()
    {
        assert_eq!(scalar_bits(&Value::Real(3.9), false, 4).unwrap(), 3);
        assert_eq!(scalar_bits(&Value::Integer(2), true, 8).unwrap(), 2.0f64.to_bits());
    }
}
