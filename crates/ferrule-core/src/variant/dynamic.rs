//! Dynamic type of C++ objects.
//!
//! A polymorphic object carries a hidden `_vptr.<Class>` member pointing into
//! the vtable of its most-derived class. The symbol covering that pointer
//! names the class (`vtable for Derived`), which is then looked up among the
//! unit's structure types.

use gimli::constants;

use crate::context::EvalContext;
use crate::demangle::vtable_class;
use crate::error::FerruleResult;
use crate::location::member_offset;
use crate::types::Address;
use crate::variant::Type;

/// Vtable pointer of the object at `this`
///
/// Bases are searched in declaration order with `this` adjusted to each base.
///
/// ## Errors
///
/// Fails on unreadable memory and location evaluation errors.
pub fn virtual_table(ctx: &EvalContext<'_>, ty: Type<'_>, this: u64) -> FerruleResult<Option<u64>>
{
    let ty = ty.strip()?;
    let children = ty.children()?;
    for child in &children {
        if child.tag() == constants::DW_TAG_member && child.name()?.starts_with("_vptr") {
            let offset = member_offset(ctx, *child, this)?;
            let size = match Type::of(*child)? {
                Some(member) => member.real_size(ctx)?,
                None => ctx.address_size(),
            };
            return Ok(Some(ctx.read_uint(this.wrapping_add(offset), size)?));
        }
    }
    for child in &children {
        if child.tag() != constants::DW_TAG_inheritance {
            continue;
        }
        let Some(base) = Type::of(*child)? else {
            continue;
        };
        let adjusted = this.wrapping_add(member_offset(ctx, *child, this)?);
        if let Some(vtable) = virtual_table(ctx, base, adjusted)? {
            return Ok(Some(vtable));
        }
    }
    Ok(None)
}

fn resolve<'u>(ctx: &EvalContext<'_>, ty: Type<'u>, this: u64) -> FerruleResult<Option<Type<'u>>>
{
    let Some(vtable) = virtual_table(ctx, ty, this)? else {
        return Ok(None);
    };
    let Some(symbol) = ctx.symbols().and_then(|target| target.lookup_address(Address::new(vtable))) else {
        return Ok(None);
    };
    let Some(class) = vtable_class(&symbol.name) else {
        return Ok(None);
    };
    Ok(ty.unit().find_struct(&class)?.map(Type::new))
}

/// Most-derived type of the object at `this`, or `ty` itself
///
/// Only applies when the `object` print option is on. Any failure along the
/// way (no vtable member, unknown symbol, no matching type) yields `ty`.
#[must_use]
pub fn dynamic_type<'u>(ctx: &EvalContext<'_>, ty: Type<'u>, this: u64) -> Type<'u>
{
    if !ctx.options.object || this == 0 {
        return ty;
    }
    match resolve(ctx, ty, this) {
        Ok(Some(dynamic)) => dynamic,
        _ => ty,
    }
}
