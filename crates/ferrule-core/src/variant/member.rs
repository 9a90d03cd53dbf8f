//! Member, symbol and scope resolution inside aggregates.
//!
//! A member found through a base class or an anonymous union lives at an
//! offset relative to that container rather than to the object itself. The
//! search reports the containers it passed through in
//! [`MemberResolution::path`] and the caller folds their offsets into the
//! address with [`MemberResolution::place`].

use gimli::constants;

use crate::context::EvalContext;
use crate::dwarf::{AttrValue, Die, MAX_TYPE_REF_DEPTH};
use crate::error::{FerruleError, FerruleResult};
use crate::location::{member_offset, variable_location, Location};
use crate::variant::{Place, Type, TypeKind};

/// Result of a successful member search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResolution<'u>
{
    /// The member, method or static member entry
    pub member: Die<'u>,
    /// First base class or anonymous member passed through, if any
    pub base_adjustment: Option<Die<'u>>,
    /// Every container entry passed through, outermost first
    pub path: Vec<Die<'u>>,
}

impl<'u> MemberResolution<'u>
{
    fn direct(member: Die<'u>) -> Self
    {
        Self {
            member,
            base_adjustment: None,
            path: Vec::new(),
        }
    }

    fn through(mut self, container: Die<'u>) -> Self
    {
        self.path.insert(0, container);
        self.base_adjustment = Some(container);
        self
    }

    /// Address of the innermost container given the object's address
    ///
    /// ## Errors
    ///
    /// Propagates location evaluation failures.
    pub fn container_address(&self, ctx: &EvalContext<'_>, object: u64) -> FerruleResult<u64>
    {
        let mut addr = object;
        for container in &self.path {
            addr = addr.wrapping_add(member_offset(ctx, *container, addr)?);
        }
        Ok(addr)
    }

    /// Storage of the member inside the object at `object`
    ///
    /// ## Errors
    ///
    /// See [`member_place`].
    pub fn place(&self, ctx: &EvalContext<'_>, object: u64) -> FerruleResult<Place>
    {
        let base = self.container_address(ctx, object)?;
        member_place(ctx, self.member, base)
    }
}

fn is_member_like(die: Die<'_>) -> bool
{
    matches!(
        die.tag(),
        constants::DW_TAG_member | constants::DW_TAG_subprogram | constants::DW_TAG_variable
    )
}

fn bases<'u>(children: &[Die<'u>]) -> Vec<Die<'u>>
{
    children
        .iter()
        .copied()
        .filter(|child| child.tag() == constants::DW_TAG_inheritance)
        .collect()
}

/// Aggregate type behind an anonymous member, if any
fn anonymous_aggregate(child: Die<'_>) -> FerruleResult<Option<Type<'_>>>
{
    if child.tag() != constants::DW_TAG_member || !child.name()?.is_empty() {
        return Ok(None);
    }
    match Type::of(child)? {
        Some(ty) => {
            let ty = ty.strip()?;
            Ok(ty.kind().is_aggregate().then_some(ty))
        }
        None => Ok(None),
    }
}

/// Type of an inheritance entry, looking through typedefs
fn base_type(inheritance: Die<'_>) -> FerruleResult<Option<Type<'_>>>
{
    match Type::of(inheritance)? {
        Some(ty) => Ok(Some(ty.strip()?)),
        None => Ok(None),
    }
}

/// Give every union member an explicit offset of zero, once per union
///
/// Encoders omit `DW_AT_data_member_location` on union members since they
/// all start at the beginning of the union.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn add_locations(ty: Type<'_>) -> FerruleResult<()>
{
    let ty = ty.strip()?;
    if ty.kind() != TypeKind::Union {
        return Ok(());
    }
    let unit = ty.unit();
    if !unit.mark_locations_added(ty.die().id()) {
        return Ok(());
    }
    for child in ty.children()? {
        if child.tag() == constants::DW_TAG_member && child.own_attr(constants::DW_AT_data_member_location).is_none() {
            unit.set_attr(child.id(), constants::DW_AT_data_member_location, AttrValue::Int(0));
        }
    }
    Ok(())
}

/// Find a data member or method by name
///
/// Direct children are searched first, then anonymous unions and
/// structures, then base classes in declaration order. `Base::name`
/// searches only the direct base called `Base`. Names compare
/// case-insensitively in case-blind languages.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn find_member<'u>(ty: Type<'u>, name: &str) -> FerruleResult<Option<MemberResolution<'u>>>
{
    let ty = ty.strip_references()?;
    if !ty.kind().is_aggregate() {
        return Ok(None);
    }
    search(ty, name, 0)
}

fn search<'u>(ty: Type<'u>, name: &str, depth: usize) -> FerruleResult<Option<MemberResolution<'u>>>
{
    if depth > MAX_TYPE_REF_DEPTH {
        return Ok(None);
    }
    add_locations(ty)?;
    let children = ty.children()?;
    for child in &children {
        if !is_member_like(*child) {
            continue;
        }
        if child.name_matches(name)? {
            return Ok(Some(MemberResolution::direct(*child)));
        }
        if let Some(inner) = anonymous_aggregate(*child)? {
            if let Some(found) = search(inner, name, depth + 1)? {
                return Ok(Some(found.through(*child)));
            }
        }
    }

    let bases = bases(&children);
    let language = ty.language();
    if let Some((prefix, suffix)) = name.split_once("::") {
        if ty.die().name_matches(prefix)? {
            return search(ty, suffix, depth + 1);
        }
        for base in &bases {
            let Some(base_ty) = base_type(*base)? else {
                continue;
            };
            if language.names_equal(&base_ty.name()?, prefix) {
                return Ok(search(base_ty, suffix, depth + 1)?.map(|found| found.through(*base)));
            }
        }
    }

    for base in &bases {
        let Some(base_ty) = base_type(*base)? else {
            continue;
        };
        if let Some(found) = search(base_ty, name, depth + 1)? {
            return Ok(Some(found.through(*base)));
        }
    }
    Ok(None)
}

/// Every member or method called `name` (overload candidates)
///
/// Base classes are searched only when the type itself has no match.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn find_members<'u>(ty: Type<'u>, name: &str) -> FerruleResult<Vec<MemberResolution<'u>>>
{
    let ty = ty.strip_references()?;
    let mut result = Vec::new();
    if ty.kind().is_aggregate() {
        collect_members(ty, name, 0, &mut result)?;
    }
    Ok(result)
}

fn collect_members<'u>(ty: Type<'u>, name: &str, depth: usize, result: &mut Vec<MemberResolution<'u>>) -> FerruleResult<()>
{
    if depth > MAX_TYPE_REF_DEPTH {
        return Ok(());
    }
    let children = ty.children()?;
    for child in &children {
        if !is_member_like(*child) {
            continue;
        }
        if child.name_matches(name)? {
            result.push(MemberResolution::direct(*child));
        } else if let Some(inner) = anonymous_aggregate(*child)? {
            let mut nested = Vec::new();
            collect_members(inner, name, depth + 1, &mut nested)?;
            result.extend(nested.into_iter().map(|found| found.through(*child)));
        }
    }
    if !result.is_empty() {
        return Ok(());
    }
    let (base_name, member) = match name.split_once("::") {
        Some((prefix, suffix)) => (Some(prefix), suffix),
        None => (None, name),
    };
    for base in bases(&children) {
        let Some(base_ty) = base_type(base)? else {
            continue;
        };
        if let Some(prefix) = base_name {
            if !ty.language().names_equal(&base_ty.name()?, prefix) {
                continue;
            }
        }
        let mut nested = Vec::new();
        collect_members(base_ty, member, depth + 1, &mut nested)?;
        result.extend(nested.into_iter().map(|found| found.through(base)));
    }
    Ok(())
}

/// Names visible in a class scope: members, methods, then enumerators of
/// nested enumerations, then base classes
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn find_symbol<'u>(ty: Type<'u>, name: &str) -> FerruleResult<Vec<Die<'u>>>
{
    let ty = ty.strip()?;
    let mut result = Vec::new();
    collect_symbols(ty, name, 0, &mut result)?;
    Ok(result)
}

fn collect_symbols<'u>(ty: Type<'u>, name: &str, depth: usize, result: &mut Vec<Die<'u>>) -> FerruleResult<()>
{
    if depth > MAX_TYPE_REF_DEPTH {
        return Ok(());
    }
    let children = ty.children()?;
    for child in &children {
        if is_member_like(*child) && child.name_matches(name)? {
            result.push(*child);
        }
    }
    if !result.is_empty() {
        return Ok(());
    }
    for child in &children {
        if child.tag() != constants::DW_TAG_enumeration_type {
            continue;
        }
        for enumerator in child.children()? {
            if enumerator.name_matches(name)? {
                result.push(enumerator);
                return Ok(());
            }
        }
    }
    for base in bases(&children) {
        if let Some(base_ty) = base_type(base)? {
            collect_symbols(base_ty, name, depth + 1, result)?;
            if !result.is_empty() {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Nested scope (type, function or namespace) called `name`
///
/// Searches `scope` and then its parents. When a class and a function share a
/// name (a class and its constructor) the class wins.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn find_scope<'u>(scope: Die<'u>, name: &str) -> FerruleResult<Option<Die<'u>>>
{
    let mut current = Some(scope);
    while let Some(scope) = current {
        let mut matches = Vec::new();
        for child in scope.children()? {
            let candidate = matches!(
                child.tag(),
                constants::DW_TAG_subprogram
                    | constants::DW_TAG_structure_type
                    | constants::DW_TAG_class_type
                    | constants::DW_TAG_union_type
                    | constants::DW_TAG_typedef
                    | constants::DW_TAG_namespace
                    | constants::DW_TAG_module
            );
            if candidate && child.name_matches(name)? {
                matches.push(child);
            }
        }
        let preferred = matches
            .iter()
            .copied()
            .find(|die| TypeKind::of(die.tag()).is_aggregate())
            .or_else(|| matches.first().copied());
        if preferred.is_some() {
            return Ok(preferred);
        }
        current = scope.parent();
    }
    Ok(None)
}

/// Storage of `member` inside an object whose container starts at `base`
///
/// Bit fields produce [`Place::Bits`]. Static members are located through
/// their out-of-line definition or, failing that, the symbol table.
///
/// ## Errors
///
/// Fails for members without a location and on evaluation failures.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn member_place(ctx: &EvalContext<'_>, member: Die<'_>, base: u64) -> FerruleResult<Place>
{
    if member.tag() != constants::DW_TAG_member || member.is_declaration() {
        return static_place(ctx, member);
    }
    let offset = member_offset(ctx, member, base)?;
    let addr = base.wrapping_add(offset);

    let Some(bits) = member.attr_int(constants::DW_AT_bit_size)? else {
        return Ok(Place::Memory(addr));
    };
    let storage = match member.attr_int(constants::DW_AT_byte_size)? {
        Some(size) => size as usize,
        None => Type::of(member)?.map_or(Ok(4), Type::size)?,
    };
    let width = (storage * 8) as u32;
    let bits = bits as u32;
    if let Some(bit_offset) = member.attr_int(constants::DW_AT_data_bit_offset)? {
        let bit_offset = bit_offset as u64;
        let unit_bits = u64::from(width.max(8));
        let word = addr + (bit_offset / unit_bits) * (unit_bits / 8);
        let within = (bit_offset % unit_bits) as u32;
        let shift = match ctx.endian() {
            gimli::RunTimeEndian::Little => within,
            gimli::RunTimeEndian::Big => width.saturating_sub(within + bits),
        };
        return Ok(Place::Bits {
            addr: word,
            size: storage,
            shift,
            bits,
        });
    }
    let from_msb = member.attr_int(constants::DW_AT_bit_offset)?.unwrap_or(0) as u32;
    Ok(Place::Bits {
        addr,
        size: storage,
        shift: width.saturating_sub(from_msb + bits),
        bits,
    })
}

#[allow(clippy::cast_sign_loss)]
fn static_place(ctx: &EvalContext<'_>, member: Die<'_>) -> FerruleResult<Place>
{
    let name = member.name()?;
    if member.tag() == constants::DW_TAG_subprogram {
        return Err(FerruleError::eval(format!("cannot evaluate non-static members: {name}")));
    }
    let definition = member.more_info().unwrap_or(member);
    match variable_location(ctx, definition)? {
        Location::Address(addr) => return Ok(Place::Memory(addr)),
        Location::Register(reg) => return Ok(Place::Register(reg)),
        _ => {}
    }
    if let Some(target) = ctx.symbols() {
        let symbol = member.symbol_name()?;
        if let Some(addr) = target.lookup_symbol(&symbol, member.language().is_case_blind()) {
            return Ok(Place::Memory(addr.value()));
        }
    }
    Err(FerruleError::eval(format!(
        "Unable to get value of member {name} - perhaps it is optimized out"
    )))
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::types::SourceLanguage;

    /// `struct Base { int x; }; struct Derived : Base { int y; union { int u; float f; }; };`
    fn classes(language: SourceLanguage) -> CompUnit
    {
        let mut b = UnitBuilder::new(language, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));

        let base = b.add(root, DW_TAG_structure_type);
        b.set_name(base, "Base").set_int(base, DW_AT_byte_size, 4);
        let x = b.add(base, DW_TAG_member);
        b.set_name(x, "x").set_ref(x, DW_AT_type, int).set_int(x, DW_AT_data_member_location, 0);

        let anon = b.add(root, DW_TAG_union_type);
        b.set_int(anon, DW_AT_byte_size, 4);
        let u = b.add(anon, DW_TAG_member);
        b.set_name(u, "u").set_ref(u, DW_AT_type, int);
        let f = b.add(anon, DW_TAG_member);
        b.set_name(f, "f").set_ref(f, DW_AT_type, int);

        let derived = b.add(root, DW_TAG_structure_type);
        b.set_name(derived, "Derived").set_int(derived, DW_AT_byte_size, 12);
        let inherit = b.add(derived, DW_TAG_inheritance);
        b.set_ref(inherit, DW_AT_type, base).set_int(inherit, DW_AT_data_member_location, 0);
        let y = b.add(derived, DW_TAG_member);
        b.set_name(y, "Y").set_ref(y, DW_AT_type, int).set_int(y, DW_AT_data_member_location, 4);
        let hole = b.add(derived, DW_TAG_member);
        b.set_ref(hole, DW_AT_type, anon).set_int(hole, DW_AT_data_member_location, 8);
        CompUnit::new(b.build()).unwrap()
    }

    fn derived(unit: &CompUnit) -> Type<'_>
    {
        Type::new(unit.find_struct("Derived").unwrap().unwrap())
    }

    #[test]
    fn test_qualified_base_member_signals_base()
    {
        let unit = classes(SourceLanguage::CPlusPlus);
        let found = find_member(derived(&unit), "Base::x").unwrap().unwrap();
        assert_eq!(found.member.name().unwrap(), "x");
        let adjust = found.base_adjustment.unwrap();
        assert_eq!(adjust.tag(), DW_TAG_inheritance);
    }

    #[test]
    fn test_missing_qualified_member_is_not_found()
    {
        let unit = classes(SourceLanguage::CPlusPlus);
        assert!(find_member(derived(&unit), "Base::z").unwrap().is_none());
    }

    #[test]
    fn test_unqualified_base_member()
    {
        let unit = classes(SourceLanguage::CPlusPlus);
        let found = find_member(derived(&unit), "x").unwrap().unwrap();
        assert_eq!(found.path.len(), 1);
    }

    #[test]
    fn test_case_blind_only_for_fortran()
    {
        let unit = classes(SourceLanguage::Fortran90);
        let upper = find_member(derived(&unit), "Y").unwrap().unwrap();
        let lower = find_member(derived(&unit), "y").unwrap().unwrap();
        assert_eq!(upper.member, lower.member);

        let unit = classes(SourceLanguage::C);
        assert!(find_member(derived(&unit), "Y").unwrap().is_some());
        assert!(find_member(derived(&unit), "y").unwrap().is_none());
    }

    #[test]
    fn test_anonymous_union_member_address()
    {
        let unit = classes(SourceLanguage::C);
        let ctx = EvalContext::new(&unit);
        let found = find_member(derived(&unit), "f").unwrap().unwrap();
        assert_eq!(found.base_adjustment.unwrap().tag(), DW_TAG_member);
        assert_eq!(found.place(&ctx, 0x100).unwrap(), Place::Memory(0x108));
    }

    #[test]
    fn test_union_offsets_are_zero()
    {
        let unit = classes(SourceLanguage::C);
        let ctx = EvalContext::new(&unit);
        let union = Type::new(unit.root().children().unwrap()[2]);
        assert_eq!(union.kind(), TypeKind::Union);
        for member in union.children().unwrap() {
            assert_eq!(member_offset(&ctx, member, 0x40).unwrap(), 0);
        }
        add_locations(union).unwrap();
        for member in union.children().unwrap() {
            assert_eq!(member.own_attr(DW_AT_data_member_location), Some(AttrValue::Int(0)));
            assert_eq!(member_offset(&ctx, member, 0x40).unwrap(), 0);
        }
    }

    #[test]
    fn test_bitfield_place()
    {
        let mut b = UnitBuilder::new(SourceLanguage::C, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        let flags = b.add(root, DW_TAG_member);
        b.set_name(flags, "flags").set_ref(flags, DW_AT_type, int);
        b.set_int(flags, DW_AT_bit_size, 3).set_int(flags, DW_AT_data_bit_offset, 37);
        let unit = CompUnit::new(b.build()).unwrap();
        let ctx = EvalContext::new(&unit);
        let member = unit.root().children().unwrap()[1];
        assert_eq!(
            member_place(&ctx, member, 0x10).unwrap(),
            Place::Bits {
                addr: 0x14,
                size: 4,
                shift: 5,
                bits: 3
            }
        );
    }
}
