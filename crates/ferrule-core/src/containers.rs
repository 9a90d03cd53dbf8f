//! # Container Introspection
//!
//! Recognises standard-library strings, vectors, maps and lists by type name
//! and prints their logical contents straight from target memory.
//!
//! Two compilers lay the templates out differently, so the element type is
//! found by trying each shape in turn:
//!
//! - the `value_type` (or `key_type`/`mapped_type`) typedefs declared inside
//!   the instantiation
//! - the base-class chain (`_Vector_base` → `_Vector_alloc_base` → `_M_start`,
//!   `_M_t` → `_Rb_tree_base` → `_Rb_tree_alloc_base` → `_M_header`, ...)
//!
//! A read failure while walking a container prints as `<message>` in place
//! of the contents instead of failing the enclosing print.

use gimli::constants;
use tracing::debug;

use crate::context::EvalContext;
use crate::dwarf::Die;
use crate::error::{FerruleError, FerruleResult};
use crate::format::escape_string;
use crate::types::Address;
use crate::value::Value;
use crate::variant::access::{load, Place};
use crate::variant::display::print_value;
use crate::variant::{synthetic, Type, TypeKind};

/// Layout families recognised by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind
{
    String,
    Vector,
    Map,
    List,
}

impl ContainerKind
{
    const ALL: [ContainerKind; 4] = [
        ContainerKind::String,
        ContainerKind::Vector,
        ContainerKind::Map,
        ContainerKind::List,
    ];

    /// Whether a type name looks like an instantiation of this family
    #[must_use]
    pub fn matches(self, name: &str) -> bool
    {
        match self {
            ContainerKind::String => {
                name.contains("string") || name.contains("basic_string<char,std::char_traits<char>,std::allocator<char> >")
            }
            ContainerKind::Vector => name.contains("vector<"),
            ContainerKind::Map => name.contains("map<"),
            ContainerKind::List => name.contains("list<"),
        }
    }

    /// Families suggested by a type name, in the order they are tried
    pub fn candidates(name: &str) -> impl Iterator<Item = ContainerKind> + '_
    {
        Self::ALL.into_iter().filter(move |kind| kind.matches(name))
    }

    fn enabled(self, ctx: &EvalContext<'_>) -> bool
    {
        match self {
            ContainerKind::String => ctx.options.stl_strings,
            ContainerKind::Vector => ctx.options.stl_vectors,
            ContainerKind::Map => ctx.options.stl_maps,
            ContainerKind::List => ctx.options.stl_lists,
        }
    }
}

/// Base class whose name starts with `prefix`
fn find_base<'u>(ty: Type<'u>, prefix: &str) -> FerruleResult<Option<Type<'u>>>
{
    for child in ty.strip()?.children()? {
        if child.tag() != constants::DW_TAG_inheritance {
            continue;
        }
        if let Some(base) = Type::of(child)? {
            let base = base.strip()?;
            if base.name()?.starts_with(prefix) {
                return Ok(Some(base));
            }
        }
    }
    Ok(None)
}

/// Data member called `name`
fn find_field<'u>(ty: Type<'u>, name: &str) -> FerruleResult<Option<Die<'u>>>
{
    for child in ty.strip()?.children()? {
        if child.tag() == constants::DW_TAG_member && child.name()? == name {
            return Ok(Some(child));
        }
    }
    Ok(None)
}

/// Target of the typedef called `name` declared inside `ty`
fn find_typedef<'u>(ty: Type<'u>, name: &str) -> FerruleResult<Option<Type<'u>>>
{
    for child in ty.strip()?.children()? {
        if child.tag() == constants::DW_TAG_typedef && child.name()? == name {
            return Type::of(child);
        }
    }
    Ok(None)
}

/// Type pointed to by the pointer member `field` of `ty`
fn pointee_of_field<'u>(ty: Type<'u>, field: &str) -> FerruleResult<Option<Type<'u>>>
{
    let Some(member) = find_field(ty, field)? else {
        return Ok(None);
    };
    match Type::of(member)? {
        Some(pointer) if pointer.strip()?.kind() == TypeKind::Pointer => pointer.strip()?.target(),
        _ => Ok(None),
    }
}

fn vector_element(ty: Type<'_>) -> FerruleResult<Option<Type<'_>>>
{
    if let Some(base) = find_base(ty, "_Vector_base")? {
        if let Some(alloc) = find_base(base, "_Vector_alloc_base")? {
            if let Some(element) = pointee_of_field(alloc, "_M_start")? {
                return Ok(Some(element));
            }
        }
    }
    find_typedef(ty, "value_type")
}

fn list_element(ty: Type<'_>) -> FerruleResult<Option<Type<'_>>>
{
    if let Some(element) = find_typedef(ty, "value_type")? {
        return Ok(Some(element));
    }
    let Some(base) = find_base(ty, "_List_base")? else {
        return Ok(None);
    };
    let Some(alloc) = find_base(base, "_List_alloc_base")? else {
        return Ok(None);
    };
    let Some(node) = pointee_of_field(alloc, "_M_node")? else {
        return Ok(None);
    };
    match find_field(node, "_M_data")? {
        Some(data) => Type::of(data),
        None => Ok(None),
    }
}

fn map_types(ty: Type<'_>) -> FerruleResult<Option<(Type<'_>, Type<'_>)>>
{
    if let (Some(key), Some(mapped)) = (find_typedef(ty, "key_type")?, find_typedef(ty, "mapped_type")?) {
        return Ok(Some((key, mapped)));
    }
    let Some(tree) = find_field(ty, "_M_t")? else {
        return Ok(None);
    };
    let Some(tree) = Type::of(tree)? else {
        return Ok(None);
    };
    let Some(base) = find_base(tree, "_Rb_tree_base")? else {
        return Ok(None);
    };
    let Some(alloc) = find_base(base, "_Rb_tree_alloc_base")? else {
        return Ok(None);
    };
    let Some(node) = pointee_of_field(alloc, "_M_header")? else {
        return Ok(None);
    };
    let Some(value) = find_field(node, "_M_value_field")? else {
        return Ok(None);
    };
    let Some(pair) = Type::of(value)? else {
        return Ok(None);
    };
    match (find_field(pair, "first")?, find_field(pair, "second")?) {
        (Some(first), Some(second)) => match (Type::of(first)?, Type::of(second)?) {
            (Some(key), Some(mapped)) => Ok(Some((key, mapped))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Print `ty` at `addr` as a recognised container
///
/// Returns `None` when the type is not a container or its layout is not
/// recognised, in which case the caller prints it as a plain structure.
///
/// ## Errors
///
/// Only decoding failures of the type itself; memory errors print inline.
pub fn print_container(ctx: &mut EvalContext<'_>, ty: Type<'_>, addr: u64, indent: usize) -> FerruleResult<Option<String>>
{
    let name = ty.name()?;
    for kind in ContainerKind::candidates(&name) {
        if !kind.enabled(ctx) {
            continue;
        }
        let printed = match kind {
            ContainerKind::String => {
                if find_field(ty, "_M_dataplus")?.is_none() {
                    None
                } else {
                    Some(inline(string_contents(ctx, addr)))
                }
            }
            ContainerKind::Vector => match vector_element(ty)? {
                Some(element) => Some(inline(vector_contents(ctx, element, addr, indent))),
                None => None,
            },
            ContainerKind::Map => match map_types(ty)? {
                Some((key, mapped)) => Some(inline(map_contents(ctx, key, mapped, addr, indent))),
                None => None,
            },
            ContainerKind::List => match list_element(ty)? {
                Some(element) => Some(inline(list_contents(ctx, element, addr, indent))),
                None => None,
            },
        };
        if printed.is_some() {
            return Ok(printed);
        }
        debug!(container = ?kind, type_name = %name, "container layout not recognised");
    }
    Ok(None)
}

fn inline(result: FerruleResult<String>) -> String
{
    result.unwrap_or_else(|err| format!("<{err}>"))
}

/// `base + delta` for addresses read from the target, which may be garbage
fn offset(base: u64, delta: u64) -> FerruleResult<u64>
{
    base.checked_add(delta)
        .ok_or_else(|| FerruleError::memory(base, "address arithmetic overflows"))
}

fn string_contents(ctx: &EvalContext<'_>, addr: u64) -> FerruleResult<String>
{
    let target = ctx.target()?;
    if !target.test_address(Address::new(addr)) {
        return Ok(format!("<Bad Address 0x{addr:x}>"));
    }
    let data = ctx.read_ptr(addr)?;
    if data == 0 {
        return Ok("<no data>".to_string());
    }
    if !target.test_address(Address::new(data)) {
        return Ok(format!("<Bad Address 0x{data:x}>"));
    }
    let text = ctx.read_string(data)?;
    Ok(format!("\"{}\"", escape_string(text.as_bytes(), '"', &ctx.options)))
}

fn element_text(ctx: &mut EvalContext<'_>, element: Type<'_>, addr: u64, indent: usize) -> FerruleResult<String>
{
    let value = load(ctx, Some(element), Place::Memory(addr))?;
    print_value(ctx, Some(element), &value, indent)
}

fn vector_contents(ctx: &mut EvalContext<'_>, element: Type<'_>, addr: u64, indent: usize) -> FerruleResult<String>
{
    let ptr = ctx.address_size() as u64;
    let start = ctx.read_ptr(addr)?;
    let finish = ctx.read_ptr(offset(addr, ptr)?)?;
    let end = ctx.read_ptr(offset(addr, ptr * 2)?)?;
    if end == 0 || finish < start {
        return Ok("{}".to_string());
    }
    let size = element.real_size(ctx)? as u64;
    if size == 0 {
        return Ok("{}".to_string());
    }
    let mut parts = Vec::new();
    let mut item = start;
    while item < finish {
        if parts.len() >= ctx.options.max_elements {
            parts.push("...".to_string());
            break;
        }
        parts.push(element_text(ctx, element, item, indent)?);
        item = offset(item, size)?;
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

/// Red-black tree node: colour, parent, left, right, then the value
struct MapWalker<'c, 'a, 'u>
{
    ctx: &'c mut EvalContext<'a>,
    key: Type<'u>,
    mapped: Type<'u>,
    remaining: u64,
    indent: usize,
    parts: Vec<String>,
}

impl MapWalker<'_, '_, '_>
{
    fn node(&mut self, node: u64, depth: usize) -> FerruleResult<()>
    {
        if node == 0 || self.remaining == 0 || depth > 64 {
            return Ok(());
        }
        let ptr = self.ctx.address_size() as u64;
        let left = self.ctx.read_ptr(offset(node, ptr * 2)?)?;
        let right = self.ctx.read_ptr(offset(node, ptr * 3)?)?;

        self.node(left, depth + 1)?;
        if self.remaining == 0 {
            return Ok(());
        }
        self.remaining -= 1;

        let key_addr = offset(node, ptr * 4)?;
        let mut mapped_addr = offset(key_addr, self.key.real_size(self.ctx)? as u64)?;
        let caps = self.mapped.capabilities()?;
        if caps.structure || caps.pointer {
            mapped_addr = offset(mapped_addr, ptr - 1)? & !(ptr - 1);
        }
        let key = element_text(self.ctx, self.key, key_addr, self.indent)?;
        let mapped = element_text(self.ctx, self.mapped, mapped_addr, self.indent)?;
        self.parts.push(format!("{key} = {mapped}"));

        if right != left {
            self.node(right, depth + 1)?;
        }
        Ok(())
    }
}

fn map_contents(ctx: &mut EvalContext<'_>, key: Type<'_>, mapped: Type<'_>, addr: u64, indent: usize) -> FerruleResult<String>
{
    let ptr = ctx.address_size() as u64;
    let header = ctx.read_ptr(addr)?;
    let count = ctx.read_uint(offset(addr, ptr)?, 4)?;
    if count == 0 {
        return Ok("{}".to_string());
    }
    let root = ctx.read_ptr(offset(header, ptr)?)?;
    let remaining = count.min(ctx.options.max_elements as u64);
    let mut walker = MapWalker {
        ctx,
        key,
        mapped,
        remaining,
        indent,
        parts: Vec::new(),
    };
    walker.node(root, 0)?;
    Ok(format!("{{{}}}", walker.parts.join(", ")))
}

fn list_contents(ctx: &mut EvalContext<'_>, element: Type<'_>, addr: u64, indent: usize) -> FerruleResult<String>
{
    let ptr = ctx.address_size() as u64;
    let sentinel = ctx.read_ptr(addr)?;
    let mut node = ctx.read_ptr(sentinel)?;
    let mut parts = Vec::new();
    while node != sentinel && node != 0 {
        if parts.len() >= ctx.options.max_elements {
            parts.push("...".to_string());
            break;
        }
        parts.push(element_text(ctx, element, offset(node, ptr * 2)?, indent)?);
        node = ctx.read_ptr(node)?;
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

/// Element `index` of a recognised string or vector
///
/// Returns the element's address and type, or `None` when `ty` is not a
/// subscriptable container.
///
/// ## Errors
///
/// Fails on unreadable memory.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
pub fn subscript<'u>(ctx: &EvalContext<'_>, ty: Type<'u>, addr: u64, index: i64) -> FerruleResult<Option<(u64, Type<'u>)>>
{
    let ty = ty.strip()?;
    if !ty.kind().is_aggregate() {
        return Ok(None);
    }
    let name = ty.name()?;
    if ContainerKind::String.matches(&name) && find_field(ty, "_M_dataplus")?.is_some() {
        let data = ctx.read_ptr(addr)?;
        let char_type = synthetic::base_type(ty.unit(), "char", constants::DW_ATE_signed_char, 1);
        return Ok(Some((data.wrapping_add(index as u64), char_type)));
    }
    if ContainerKind::Vector.matches(&name) {
        if let Some(element) = vector_element(ty)? {
            let start = ctx.read_ptr(addr)?;
            let size = element.real_size(ctx)? as i64;
            return Ok(Some((start.wrapping_add(index.wrapping_mul(size) as u64), element)));
        }
    }
    Ok(None)
}

/// Value of element `index`, loaded as [`subscript`] locates it
///
/// ## Errors
///
/// See [`subscript`].
pub fn subscript_value<'u>(ctx: &EvalContext<'_>, ty: Type<'u>, addr: u64, index: i64) -> FerruleResult<Option<(Value, Type<'u>)>>
{
    match subscript(ctx, ty, addr, index)? {
        Some((element_addr, element)) => Ok(Some((load(ctx, Some(element), Place::Memory(element_addr))?, element))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dwarf::{CompUnit, NodeId, UnitBuilder};
    use crate::test_support::SparseTarget;
    use crate::types::SourceLanguage;

    fn vector_unit() -> CompUnit
    {
        let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let vector: NodeId = b.add(root, DW_TAG_class_type);
        b.set_name(vector, "vector<int, std::allocator<int> >").set_int(vector, DW_AT_byte_size, 24);
        let value_type = b.add(vector, DW_TAG_typedef);
        b.set_name(value_type, "value_type").set_ref(value_type, DW_AT_type, int);
        CompUnit::new(b.build()).unwrap()
    }

    #[test]
    fn test_container_kind_by_name()
    {
        let kinds = |name: &str| ContainerKind::candidates(name).collect::<Vec<_>>();
        assert_eq!(kinds("std::vector<int>"), vec![ContainerKind::Vector]);
        assert_eq!(kinds("map<int, int>"), vec![ContainerKind::Map]);
        assert_eq!(kinds("std::list<double>"), vec![ContainerKind::List]);
        assert_eq!(kinds("vector<std::string>"), vec![ContainerKind::String, ContainerKind::Vector]);
        assert!(kinds("point").is_empty());
    }

    #[test]
    fn test_vector_prints_elements()
    {
        let unit = vector_unit();
        let vector = Type::new(unit.root().children().unwrap()[1]);
        let mut target = SparseTarget::new();
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

        assert_eq!(print_container(&mut ctx, vector, 0x100, 0).unwrap().as_deref(), Some("{1, 2, 3}"));
        assert_eq!(print_container(&mut ctx, vector, 0x200, 0).unwrap().as_deref(), Some("{}"));

        let (value, element) = subscript_value(&ctx, vector, 0x100, 2).unwrap().unwrap();
        assert_eq!(value, Value::Integer(3));
        assert_eq!(element.name().unwrap(), "int");
    }

    #[test]
    fn test_vector_read_failure_prints_inline()
    {
        let unit = vector_unit();
        let vector = Type::new(unit.root().children().unwrap()[1]);
        let mut target = SparseTarget::new();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let text = print_container(&mut ctx, vector, 0x100, 0).unwrap().unwrap();
        assert!(text.starts_with('<') && text.ends_with('>'));
    }

    #[test]
    fn test_disabled_container_prints_as_structure()
    {
        let unit = vector_unit();
        let vector = Type::new(unit.root().children().unwrap()[1]);
        let mut target = SparseTarget::new();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        ctx.options.stl_vectors = false;
        assert_eq!(print_container(&mut ctx, vector, 0x100, 0).unwrap(), None);
    }

    #[test]
    fn test_list_walks_to_sentinel()
    {
        let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let list = b.add(root, DW_TAG_class_type);
        b.set_name(list, "list<int>").set_int(list, DW_AT_byte_size, 8);
        let value_type = b.add(list, DW_TAG_typedef);
        b.set_name(value_type, "value_type").set_ref(value_type, DW_AT_type, int);
        let unit = CompUnit::new(b.build()).unwrap();
        let ty = Type::new(unit.root().children().unwrap()[1]);

        let mut target = SparseTarget::new();
        // object -> sentinel -> 0x2000 -> 0x3000 -> sentinel
        target.poke_u64(0x100, 0x1000);
        target.poke_u64(0x1000, 0x2000);
        target.poke_u64(0x2000, 0x3000);
        target.poke_u32(0x2010, 10);
        target.poke_u64(0x3000, 0x1000);
        target.poke_u32(0x3010, 20);
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        assert_eq!(print_container(&mut ctx, ty, 0x100, 0).unwrap().as_deref(), Some("{10, 20}"));
    }

    #[test]
    fn test_list_with_wrapped_pointer_prints_inline()
    {
        let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let list = b.add(root, DW_TAG_class_type);
        b.set_name(list, "list<int>").set_int(list, DW_AT_byte_size, 8);
        let value_type = b.add(list, DW_TAG_typedef);
        b.set_name(value_type, "value_type").set_ref(value_type, DW_AT_type, int);
        let unit = CompUnit::new(b.build()).unwrap();
        let ty = Type::new(unit.root().children().unwrap()[1]);

        let mut target = SparseTarget::new();
        target.poke_u64(0x100, 0x1000);
        target.poke_u64(0x1000, 0xffff_ffff_ffff_fff8);
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let text = print_container(&mut ctx, ty, 0x100, 0).unwrap().unwrap();
        assert!(text.starts_with('<') && text.ends_with('>'));
        assert!(text.contains("0xfffffffffffffff8"));
    }

    #[test]
    fn test_map_in_order()
    {
        let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let map = b.add(root, DW_TAG_class_type);
        b.set_name(map, "map<int, int>").set_int(map, DW_AT_byte_size, 16);
        let key = b.add(map, DW_TAG_typedef);
        b.set_name(key, "key_type").set_ref(key, DW_AT_type, int);
        let mapped = b.add(map, DW_TAG_typedef);
        b.set_name(mapped, "mapped_type").set_ref(mapped, DW_AT_type, int);
        let unit = CompUnit::new(b.build()).unwrap();
        let ty = Type::new(unit.root().children().unwrap()[1]);

        let mut target = SparseTarget::new();
        target.poke_u64(0x100, 0x1000);
        target.poke_u32(0x108, 2);
        // header parent is the root
        target.poke_u64(0x1008, 0x2000);
        // root: key 5, left child 0x3000
        target.poke_u64(0x2010, 0x3000);
        target.poke_u64(0x2018, 0);
        target.poke_u32(0x2020, 5);
        target.poke_u32(0x2024, 50);
        target.poke_u64(0x3010, 0);
        target.poke_u64(0x3018, 0);
        target.poke_u32(0x3020, 1);
        target.poke_u32(0x3024, 10);
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        assert_eq!(
            print_container(&mut ctx, ty, 0x100, 0).unwrap().as_deref(),
            Some("{1 = 10, 5 = 50}")
        );
    }

    #[test]
    fn test_string_subscript()
    {
        let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
        let root = b.root();
        let string = b.add(root, DW_TAG_class_type);
        b.set_name(string, "basic_string<char,std::char_traits<char>,std::allocator<char> >");
        b.set_int(string, DW_AT_byte_size, 8);
        let data = b.add(string, DW_TAG_member);
        b.set_name(data, "_M_dataplus").set_int(data, DW_AT_data_member_location, 0);
        let unit = CompUnit::new(b.build()).unwrap();
        let ty = Type::new(unit.root().children().unwrap()[0]);

        let mut target = SparseTarget::new();
        target.poke_u64(0x100, 0x2000);
        target.poke(0x2000, b"abc\0");
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        assert_eq!(print_container(&mut ctx, ty, 0x100, 0).unwrap().as_deref(), Some("\"abc\""));
        let (value, _) = subscript_value(&ctx, ty, 0x100, 1).unwrap().unwrap();
        assert_eq!(value, Value::Integer(i64::from(b'b')));
    }
}
