//! Value printing.
//!
//! [`print_value`] renders a value of a type in the context's language and
//! format. Aggregates arrive as the address of their storage (or a register
//! number) and are read from the target while printing.

use std::fmt::Write as _;

use gimli::constants;

use crate::containers;
use crate::context::EvalContext;
use crate::error::FerruleResult;
use crate::format::{escape_string, format_bool, format_char, format_g, format_integer, format_real, FormatCode};
use crate::types::{Address, SymbolLocation};
use crate::value::Value;
use crate::variant::access::{load, restore_stack, spill_register, Place};
use crate::variant::member::{add_locations, member_place};
use crate::variant::{array, declare, Type, TypeKind};

/// Integer view of a scalar value, truncating reals
#[allow(clippy::cast_possible_truncation)]
fn integer_of(value: &Value) -> FerruleResult<i64>
{
    Ok(match value {
        Value::Real(r) => *r as i64,
        Value::Bool(b) => i64::from(*b),
        other => other.as_integer()?,
    })
}

fn quote_char(ctx: &EvalContext<'_>) -> char
{
    if ctx.language.is_fortran() {
        '\''
    } else {
        '"'
    }
}

fn quoted(ctx: &EvalContext<'_>, bytes: &[u8]) -> String
{
    let quote = quote_char(ctx);
    format!("{quote}{}{quote}", escape_string(bytes, quote, &ctx.options))
}

fn padding(out: &mut String, indent: usize)
{
    out.push('\n');
    out.push_str(&" ".repeat(indent));
}

/// Render `value` as a value of `ty`
///
/// `None` prints the value by its own kind. `indent` is the column of the
/// enclosing line, used by pretty structure printing.
///
/// ## Errors
///
/// Aggregates and pointer targets need an active target; unreadable memory
/// inside a pointer target prints inline, elsewhere it fails the print.
#[allow(clippy::cast_sign_loss)]
pub fn print_value(ctx: &mut EvalContext<'_>, ty: Option<Type<'_>>, value: &Value, indent: usize) -> FerruleResult<String>
{
    let Some(ty) = ty else {
        return print_plain(ctx, value);
    };
    let stripped = ty.strip()?;
    match stripped.kind() {
        TypeKind::Base => print_base(ctx, stripped, value),
        TypeKind::Pointer | TypeKind::PointerToMember => print_pointer(ctx, stripped, value, indent),
        TypeKind::Reference => print_reference(ctx, stripped, value, indent),
        TypeKind::Struct | TypeKind::Class | TypeKind::Union => print_struct(ctx, stripped, value, indent),
        TypeKind::Enum => print_enum(ctx, stripped, value),
        TypeKind::Array => print_array_value(ctx, stripped, value, indent),
        TypeKind::String => print_string(ctx, stripped, value),
        TypeKind::Subroutine => print_address(ctx, integer_of(value)? as u64),
        _ => print_plain(ctx, value),
    }
}

/// Render a value that carries no type
///
/// ## Errors
///
/// Fails when the format code does not apply to the value.
pub fn print_plain(ctx: &EvalContext<'_>, value: &Value) -> FerruleResult<String>
{
    match value {
        Value::None => Ok(String::new()),
        Value::Integer(v) if ctx.format.is_native() => Ok(v.to_string()),
        Value::Integer(v) => format_integer(&ctx.format, *v, 8, true),
        Value::Real(r) => {
            let digits = if ctx.options.sig_digits == 0 { 16 } else { ctx.options.sig_digits };
            format_real(&ctx.format, *r, digits, true)
        }
        Value::Str(text) => Ok(quoted(ctx, text.as_bytes())),
        Value::Bool(b) => format_bool(&ctx.format, *b, ctx.language),
        Value::Register(number) => {
            let name = ctx.architecture().register_name(*number).map_or_else(|| format!("r{number}"), str::to_string);
            Ok(format!("${name}"))
        }
        Value::Vector(items) => {
            let parts = items.iter().map(|item| print_plain(ctx, item)).collect::<FerruleResult<Vec<_>>>()?;
            if ctx.language.is_fortran() {
                Ok(format!("(/ {} /)", parts.join(", ")))
            } else {
                Ok(format!("{{{}}}", parts.join(", ")))
            }
        }
    }
}

/// Symbol covering `addr`, for program text and data only
fn symbol_at(ctx: &EvalContext<'_>, addr: u64) -> Option<SymbolLocation>
{
    let target = ctx.symbols()?;
    let start = target.lookup_function("_start")?;
    let end = target.lookup_function("_end")?;
    if addr <= start.value() || addr >= end.value() {
        return None;
    }
    if target.find_section_at_addr(Address::new(addr)).as_deref() == Some(".rodata") {
        return None;
    }
    target.lookup_address(Address::new(addr))
}

/// Render an address, followed by `<symbol+offset>` when one covers it
///
/// ## Errors
///
/// Fails when the format code does not apply to addresses.
#[allow(clippy::cast_possible_wrap)]
pub fn print_address(ctx: &EvalContext<'_>, addr: u64) -> FerruleResult<String>
{
    let mut out = if ctx.format.is_native() {
        format!("0x{addr:x}")
    } else {
        format_integer(&ctx.format, addr as i64, ctx.address_size(), false)?
    };
    if let Some(symbol) = symbol_at(ctx, addr) {
        let _ = write!(out, " <{symbol}>");
    }
    Ok(out)
}

#[allow(clippy::cast_sign_loss)]
fn print_base(ctx: &mut EvalContext<'_>, ty: Type<'_>, value: &Value) -> FerruleResult<String>
{
    let caps = ty.capabilities()?;
    let size = ty.real_size(ctx)?;
    let encoding = ty.encoding()?.unwrap_or(constants::DW_ATE_signed);
    if caps.complex {
        return print_complex(ctx, value, size);
    }
    let fmt = ctx.format;
    match encoding {
        constants::DW_ATE_float => {
            let real = value.to_real()?;
            if ctx.language.is_fortran() {
                let digits = match ctx.options.sig_digits {
                    0 if ctx.options.truncate_aggregates => 4,
                    0 => size * 2,
                    n => n,
                };
                format_real(&fmt, real, digits, false)
            } else {
                format_real(&fmt, real, ctx.options.sig_digits.max(1), true)
            }
        }
        constants::DW_ATE_address => print_address(ctx, integer_of(value)? as u64),
        constants::DW_ATE_boolean => format_bool(&fmt, integer_of(value)? != 0, ctx.language),
        _ if caps.char && size == 1 => format_char(&fmt, integer_of(value)?, caps.signed),
        _ => format_integer(&fmt, integer_of(value)?, size, caps.signed),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn print_complex(ctx: &mut EvalContext<'_>, value: &Value, size: usize) -> FerruleResult<String>
{
    let addr = integer_of(value)? as u64;
    let half = size / 2;
    let read = |offset: u64| -> FerruleResult<f64> {
        let raw = ctx.read_uint(addr + offset, half)?;
        Ok(if half == 4 {
            f64::from(f32::from_bits(raw as u32))
        } else {
            f64::from_bits(raw)
        })
    };
    let re = read(0)?;
    let im = read(half as u64)?;
    Ok(format!("({},{})", format_g(re, 6), format_g(im, 6)))
}

/// Render what `addr` points at, as an element of `ty`
fn pointee(ctx: &mut EvalContext<'_>, ty: Option<Type<'_>>, addr: u64, indent: usize) -> FerruleResult<String>
{
    if !ctx.target()?.test_address(Address::new(addr)) {
        return Ok("<Bad address>".to_string());
    }
    match load(ctx, ty, Place::Memory(addr)) {
        Ok(value) => print_value(ctx, ty, &value, indent),
        Err(err) => Ok(format!("<{err}>")),
    }
}

fn points_to_char(target: Option<Type<'_>>) -> FerruleResult<bool>
{
    match target {
        Some(target) => {
            let caps = target.capabilities()?;
            Ok(caps.char && target.strip()?.size()? == 1)
        }
        None => Ok(false),
    }
}

#[allow(clippy::cast_sign_loss)]
fn print_pointer(ctx: &mut EvalContext<'_>, ty: Type<'_>, value: &Value, indent: usize) -> FerruleResult<String>
{
    let addr = integer_of(value)? as u64;
    let target = ty.target()?;

    if ctx.language.is_fortran() {
        if addr == 0 {
            return Ok("null".to_string());
        }
        let mut out = String::new();
        if ctx.options.show_address {
            out = print_address(ctx, addr)?;
        }
        if ctx.options.show_reference && ctx.is_active() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str("=> ");
            out.push_str(&pointee(ctx, target, addr, indent)?);
        }
        return Ok(out);
    }

    if addr == 0 && ctx.format.is_native() {
        return Ok("NULL".to_string());
    }
    let mut out = print_address(ctx, addr)?;
    if ctx.format.is_native() && ctx.is_active() && points_to_char(target)? && ctx.target()?.test_address(Address::new(addr)) {
        if let Ok(text) = ctx.read_string(addr) {
            out.push(' ');
            out.push_str(&quoted(ctx, text.as_bytes()));
        }
    }
    Ok(out)
}

#[allow(clippy::cast_sign_loss)]
fn print_reference(ctx: &mut EvalContext<'_>, ty: Type<'_>, value: &Value, indent: usize) -> FerruleResult<String>
{
    let addr = integer_of(value)? as u64;
    let mut out = String::new();
    if ctx.options.show_address {
        out = format!("@{}", print_address(ctx, addr)?);
    }
    if ctx.options.show_reference && ctx.is_active() {
        if !out.is_empty() {
            out.push_str(": ");
        }
        let target = ty.target()?;
        out.push_str(&pointee(ctx, target, addr, indent)?);
    }
    Ok(out)
}

fn print_enum(ctx: &EvalContext<'_>, ty: Type<'_>, value: &Value) -> FerruleResult<String>
{
    let number = integer_of(value)?;
    if ctx.format.is_native() || ctx.format.code == FormatCode::String {
        for child in ty.children()? {
            if child.tag() == constants::DW_TAG_enumerator && child.attr_int(constants::DW_AT_const_value)? == Some(number) {
                return child.name();
            }
        }
        return Ok(number.to_string());
    }
    format_integer(&ctx.format, number, ty.real_size(ctx)?, true)
}

/// Address of an aggregate value, spilling a register-resident one
///
/// Returns the address and the stack pointer to restore afterwards.
#[allow(clippy::cast_sign_loss)]
fn aggregate_address(ctx: &mut EvalContext<'_>, value: &Value, size: usize) -> FerruleResult<(u64, Option<u64>)>
{
    match value {
        Value::Register(reg) => {
            let (scratch, old_sp) = spill_register(ctx, *reg, size)?;
            Ok((scratch, Some(old_sp)))
        }
        other => Ok((integer_of(other)? as u64, None)),
    }
}

fn print_struct(ctx: &mut EvalContext<'_>, ty: Type<'_>, value: &Value, indent: usize) -> FerruleResult<String>
{
    ctx.target()?;
    let size = ty.size()?;
    let (addr, old_sp) = aggregate_address(ctx, value, size)?;
    let result = print_members(ctx, ty, addr, indent);
    if let Some(sp) = old_sp {
        restore_stack(ctx, sp)?;
    }
    result
}

fn print_members(ctx: &mut EvalContext<'_>, ty: Type<'_>, addr: u64, indent: usize) -> FerruleResult<String>
{
    let cplusplus = ty.language().is_cplusplus();
    if cplusplus {
        if let Some(text) = containers::print_container(ctx, ty, addr, indent)? {
            return Ok(text);
        }
    }
    if ty.kind() == TypeKind::Union {
        add_locations(ty)?;
    }

    let saved = ctx.options.show_reference;
    if cplusplus {
        ctx.options.show_reference = false;
    }
    let result = member_list(ctx, ty, addr, indent);
    ctx.options.show_reference = saved;
    result
}

fn member_list(ctx: &mut EvalContext<'_>, ty: Type<'_>, addr: u64, indent: usize) -> FerruleResult<String>
{
    let pretty = ctx.options.pretty;
    let fortran = ty.language().is_fortran();
    let inner = if pretty { indent + 2 } else { indent };
    let mut out = String::from("{");
    let mut first = true;

    for child in ty.children()? {
        let label = match child.tag() {
            constants::DW_TAG_member if !child.is_declaration() => child.name()?,
            constants::DW_TAG_inheritance if ty.language().is_cplusplus() => {
                declare::type_name(Type::of(child)?, ty.language())?
            }
            _ => continue,
        };
        if pretty {
            padding(&mut out, inner);
        } else if !first {
            out.push_str(", ");
        }
        first = false;
        if fortran || !label.is_empty() {
            let _ = write!(out, "{label} = ");
        }
        let member_ty = Type::of(child)?;
        let place = member_place(ctx, child, addr)?;
        let value = load(ctx, member_ty, place)?;
        out.push_str(&print_value(ctx, member_ty, &value, inner)?);
    }

    if pretty {
        padding(&mut out, indent);
    }
    out.push('}');
    Ok(out)
}

fn print_array_value(ctx: &mut EvalContext<'_>, ty: Type<'_>, value: &Value, indent: usize) -> FerruleResult<String>
{
    match value {
        Value::Str(text) => Ok(quoted(ctx, text.as_bytes())),
        Value::Vector(items) => {
            let element = ty.target()?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(print_value(ctx, element, item, indent + 2)?);
            }
            if ctx.language.is_fortran() {
                Ok(format!("({})", parts.join(", ")))
            } else {
                Ok(format!("{{{}}}", parts.join(", ")))
            }
        }
        other => {
            ctx.target()?;
            let size = ty.real_size(ctx)?;
            let (addr, old_sp) = aggregate_address(ctx, other, size)?;
            let result = array::print_array(ctx, ty, addr, indent);
            if let Some(sp) = old_sp {
                restore_stack(ctx, sp)?;
            }
            result
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn print_string(ctx: &mut EvalContext<'_>, ty: Type<'_>, value: &Value) -> FerruleResult<String>
{
    if let Value::Str(text) = value {
        return Ok(quoted(ctx, text.as_bytes()));
    }
    ctx.target()?;
    let addr = integer_of(value)? as u64;
    if addr == 0 {
        return Ok("<omitted>".to_string());
    }
    let len = ty.real_size(ctx)?;
    let bytes = ctx.read_bytes(addr, len)?;
    Ok(quoted(ctx, &bytes))
}
