//! # Type Variants
//!
//! Behaviour keyed on an entry's tag.
//!
//! Every type entry maps to exactly one [`TypeKind`]; a [`Type`] pairs the
//! entry with its kind so call sites match on the variant once instead of
//! re-checking tags. Qualifiers and typedefs are transparent to most
//! questions: [`Type::capabilities`] looks through them.
//!
//! Submodules:
//!
//! - [`member`]: member, symbol and scope resolution inside aggregates
//! - [`array`]: dimensions and element addressing
//! - [`declare`]: type declarations in each dialect
//! - [`display`]: value printing
//! - [`access`]: typed loads and stores
//! - [`dynamic`]: dynamic (vtable) type of class objects
//! - [`synthetic`]: types created by casts and intrinsics

use gimli::{constants, DwAte, DwTag};

use crate::context::EvalContext;
use crate::dwarf::{CompUnit, Die, MAX_TYPE_REF_DEPTH};
use crate::error::{FerruleError, FerruleResult};
use crate::types::SourceLanguage;

pub mod access;
pub mod array;
pub mod declare;
pub mod display;
pub mod dynamic;
pub mod member;
pub mod synthetic;

pub use access::Place;
pub use array::Dimension;
pub use member::MemberResolution;

/// Closed set of type behaviours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind
{
    Base,
    Pointer,
    Reference,
    Const,
    Volatile,
    Typedef,
    Struct,
    Class,
    Union,
    Enum,
    Array,
    Subroutine,
    Subrange,
    String,
    PointerToMember,
    Unspecified,
    /// Not a type entry (variables, members, scopes)
    Other,
}

impl TypeKind
{
    #[must_use]
    pub fn of(tag: DwTag) -> Self
    {
        match tag {
            constants::DW_TAG_base_type => TypeKind::Base,
            constants::DW_TAG_pointer_type => TypeKind::Pointer,
            constants::DW_TAG_reference_type | constants::DW_TAG_rvalue_reference_type => TypeKind::Reference,
            constants::DW_TAG_const_type => TypeKind::Const,
            constants::DW_TAG_volatile_type => TypeKind::Volatile,
            constants::DW_TAG_typedef => TypeKind::Typedef,
            constants::DW_TAG_structure_type => TypeKind::Struct,
            constants::DW_TAG_class_type => TypeKind::Class,
            constants::DW_TAG_union_type => TypeKind::Union,
            constants::DW_TAG_enumeration_type => TypeKind::Enum,
            constants::DW_TAG_array_type => TypeKind::Array,
            constants::DW_TAG_subroutine_type | constants::DW_TAG_subprogram => TypeKind::Subroutine,
            constants::DW_TAG_subrange_type => TypeKind::Subrange,
            constants::DW_TAG_string_type => TypeKind::String,
            constants::DW_TAG_ptr_to_member_type => TypeKind::PointerToMember,
            constants::DW_TAG_unspecified_type => TypeKind::Unspecified,
            _ => TypeKind::Other,
        }
    }

    /// Qualifier or alias that only forwards to its target
    #[must_use]
    pub const fn is_transparent(self) -> bool
    {
        matches!(self, TypeKind::Const | TypeKind::Volatile | TypeKind::Typedef)
    }

    /// Structure, class or union
    #[must_use]
    pub const fn is_aggregate(self) -> bool
    {
        matches!(self, TypeKind::Struct | TypeKind::Class | TypeKind::Union)
    }
}

/// What a type can do, computed once through qualifiers and typedefs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities
{
    pub pointer: bool,
    pub reference: bool,
    pub array: bool,
    /// Structure, class or union
    pub structure: bool,
    pub union: bool,
    pub enumeration: bool,
    pub real: bool,
    pub complex: bool,
    pub integral: bool,
    pub signed: bool,
    pub char: bool,
    pub boolean: bool,
    pub address: bool,
    /// Fortran character string
    pub string: bool,
    pub subroutine: bool,
}

impl Capabilities
{
    /// Values of this type are carried as their address
    #[must_use]
    pub const fn by_address(&self) -> bool
    {
        self.structure || self.array || self.string || self.complex
    }

    /// Single machine value (integer, real, pointer, enum)
    #[must_use]
    pub const fn is_scalar(&self) -> bool
    {
        !self.by_address() && !self.subroutine
    }
}

/// A type entry together with its variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type<'u>
{
    die: Die<'u>,
    kind: TypeKind,
}

impl<'u> Type<'u>
{
    #[must_use]
    pub fn new(die: Die<'u>) -> Self
    {
        Self {
            kind: TypeKind::of(die.tag()),
            die,
        }
    }

    /// Type named by an entry's `DW_AT_type`; `None` is `void`
    ///
    /// ## Errors
    ///
    /// Propagates reference resolution failures.
    pub fn of(die: Die<'u>) -> FerruleResult<Option<Self>>
    {
        Ok(die.type_die()?.map(Type::new))
    }

    #[must_use]
    pub const fn die(self) -> Die<'u>
    {
        self.die
    }

    #[must_use]
    pub const fn kind(self) -> TypeKind
    {
        self.kind
    }

    #[must_use]
    pub fn unit(self) -> &'u CompUnit
    {
        self.die.unit()
    }

    #[must_use]
    pub fn language(self) -> SourceLanguage
    {
        self.die.language()
    }

    pub fn name(self) -> FerruleResult<String>
    {
        self.die.name()
    }

    /// Target of a pointer, qualifier, typedef, array or function
    pub fn target(self) -> FerruleResult<Option<Type<'u>>>
    {
        Type::of(self.die)
    }

    /// Look through const, volatile and typedef
    ///
    /// `const void` and similar stop at the last entry that has no target.
    pub fn strip(self) -> FerruleResult<Type<'u>>
    {
        let mut current = self;
        for _ in 0..MAX_TYPE_REF_DEPTH {
            if !current.kind.is_transparent() {
                return Ok(current);
            }
            match current.target()? {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(FerruleError::MalformedDebugInfo("type chain is too deep".to_string()))
    }

    /// Look through qualifiers, typedefs and references
    pub fn strip_references(self) -> FerruleResult<Type<'u>>
    {
        let stripped = self.strip()?;
        if stripped.kind == TypeKind::Reference {
            if let Some(target) = stripped.target()? {
                return target.strip();
            }
        }
        Ok(stripped)
    }

    /// `DW_AT_encoding` of the underlying base type
    pub fn encoding(self) -> FerruleResult<Option<DwAte>>
    {
        let stripped = self.strip()?;
        if stripped.kind != TypeKind::Base {
            return Ok(None);
        }
        Ok(stripped
            .die
            .attr_int(constants::DW_AT_encoding)?
            .and_then(|e| u8::try_from(e).ok())
            .map(DwAte))
    }

    /// Capability set, looking through qualifiers and typedefs
    pub fn capabilities(self) -> FerruleResult<Capabilities>
    {
        let stripped = self.strip()?;
        let mut caps = Capabilities::default();
        match stripped.kind {
            TypeKind::Base => {
                let encoding = stripped.encoding()?.unwrap_or(constants::DW_ATE_signed);
                caps.real = matches!(encoding, constants::DW_ATE_float | constants::DW_ATE_complex_float);
                caps.complex = encoding == constants::DW_ATE_complex_float;
                caps.address = encoding == constants::DW_ATE_address;
                caps.boolean = encoding == constants::DW_ATE_boolean;
                caps.integral = !caps.real && !caps.address;
                caps.signed = caps.integral && matches!(encoding, constants::DW_ATE_signed | constants::DW_ATE_signed_char);
                let name = stripped.name()?;
                caps.char = matches!(encoding, constants::DW_ATE_signed_char | constants::DW_ATE_unsigned_char)
                    || matches!(name.as_str(), "char" | "unsigned char" | "signed char");
            }
            TypeKind::Pointer | TypeKind::PointerToMember => caps.pointer = true,
            TypeKind::Reference => caps.reference = true,
            TypeKind::Struct | TypeKind::Class => caps.structure = true,
            TypeKind::Union => {
                caps.structure = true;
                caps.union = true;
            }
            TypeKind::Enum => {
                caps.enumeration = true;
                caps.integral = true;
                caps.signed = true;
            }
            TypeKind::Array => caps.array = true,
            TypeKind::String => caps.string = true,
            TypeKind::Subroutine => caps.subroutine = true,
            _ => {}
        }
        Ok(caps)
    }

    /// Static byte size
    ///
    /// Pointers and references use the unit's address size; arrays multiply
    /// the element size by every dimension.
    pub fn size(self) -> FerruleResult<usize>
    {
        if let Some(size) = self.die.attr_int(constants::DW_AT_byte_size)? {
            return Ok(usize::try_from(size).unwrap_or(0));
        }
        let address_size = usize::from(self.unit().address_size());
        Ok(match self.kind {
            TypeKind::Pointer | TypeKind::Reference | TypeKind::PointerToMember | TypeKind::Subroutine => address_size,
            TypeKind::Const | TypeKind::Volatile | TypeKind::Typedef => match self.target()? {
                Some(target) => target.size()?,
                None => 0,
            },
            TypeKind::Array => {
                let element = match self.target()? {
                    Some(target) => target.size()?,
                    None => 0,
                };
                let count: usize = array::dimensions(self)?.iter().map(Dimension::count).product();
                element * count
            }
            TypeKind::String => usize::try_from(self.die.attr_int(constants::DW_AT_string_length)?.unwrap_or(0)).unwrap_or(0),
            _ => 0,
        })
    }

    /// Size as laid out on the running target
    ///
    /// Pointers follow the attached architecture rather than the encoded size.
    pub fn real_size(self, ctx: &EvalContext<'_>) -> FerruleResult<usize>
    {
        let stripped = self.strip()?;
        if matches!(stripped.kind, TypeKind::Pointer | TypeKind::Reference) && ctx.is_active() {
            return Ok(usize::from(ctx.architecture().pointer_size_bytes()));
        }
        stripped.size()
    }

    /// Children of the type entry
    pub fn children(self) -> FerruleResult<Vec<Die<'u>>>
    {
        self.die.children()
    }

    /// Structural type equality used by overload resolution
    ///
    /// Qualifiers and references are ignored; base types compare encoding
    /// and size; aggregates compare by name; pointers and arrays recurse.
    pub fn compatible(self, other: Type<'u>) -> FerruleResult<bool>
    {
        compatible(Some(self), Some(other), 0)
    }
}

fn compatible(a: Option<Type<'_>>, b: Option<Type<'_>>, depth: usize) -> FerruleResult<bool>
{
    if depth > MAX_TYPE_REF_DEPTH {
        return Ok(false);
    }
    let (a, b) = match (a, b) {
        (None, None) => return Ok(true),
        (Some(a), Some(b)) => (a.strip_references()?, b.strip_references()?),
        _ => return Ok(false),
    };
    if a == b {
        return Ok(true);
    }
    if a.kind != b.kind {
        return Ok(false);
    }
    match a.kind {
        TypeKind::Base => Ok(a.encoding()? == b.encoding()? && a.size()? == b.size()?),
        TypeKind::Pointer | TypeKind::Array => compatible(a.target()?, b.target()?, depth + 1),
        TypeKind::Struct | TypeKind::Class | TypeKind::Union | TypeKind::Enum => Ok(a.name()? == b.name()?),
        _ => Ok(true),
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::dwarf::UnitBuilder;

    fn unit() -> CompUnit
    {
        let mut b = UnitBuilder::new(SourceLanguage::C, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let dbl = b.add(root, DW_TAG_base_type);
        b.set_name(dbl, "double").set_int(dbl, DW_AT_byte_size, 8);
        b.set_int(dbl, DW_AT_encoding, i64::from(DW_ATE_float.0));
        let cint = b.add(root, DW_TAG_const_type);
        b.set_ref(cint, DW_AT_type, int);
        let td = b.add(root, DW_TAG_typedef);
        b.set_name(td, "myint").set_ref(td, DW_AT_type, cint);
        let ptr = b.add(root, DW_TAG_pointer_type);
        b.set_ref(ptr, DW_AT_type, td);
        let arr = b.add(root, DW_TAG_array_type);
        b.set_ref(arr, DW_AT_type, int);
        let sub = b.add(arr, DW_TAG_subrange_type);
        b.set_int(sub, DW_AT_upper_bound, 9);
        CompUnit::new(b.build()).unwrap()
    }

    fn nth(unit: &CompUnit, n: usize) -> Type<'_>
    {
        Type::new(unit.root().children().unwrap()[n])
    }

    #[test]
    fn test_strip_through_typedef_and_const()
    {
        let unit = unit();
        let td = nth(&unit, 3);
        assert_eq!(td.kind(), TypeKind::Typedef);
        let stripped = td.strip().unwrap();
        assert_eq!(stripped.kind(), TypeKind::Base);
        assert_eq!(stripped.name().unwrap(), "int");
        assert_eq!(td.size().unwrap(), 4);
    }

    #[test]
    fn test_capabilities()
    {
        let unit = unit();
        let int = nth(&unit, 0).capabilities().unwrap();
        assert!(int.integral && int.signed && !int.real);
        let dbl = nth(&unit, 1).capabilities().unwrap();
        assert!(dbl.real && !dbl.integral);
        let ptr = nth(&unit, 4).capabilities().unwrap();
        assert!(ptr.pointer && ptr.is_scalar());
        let arr = nth(&unit, 5).capabilities().unwrap();
        assert!(arr.array && arr.by_address());
    }

    #[test]
    fn test_sizes()
    {
        let unit = unit();
        assert_eq!(nth(&unit, 4).size().unwrap(), 8);
        assert_eq!(nth(&unit, 5).size().unwrap(), 40);
    }

    #[test]
    fn test_compatible_ignores_qualifiers()
    {
        let unit = unit();
        assert!(nth(&unit, 0).compatible(nth(&unit, 3)).unwrap());
        assert!(!nth(&unit, 0).compatible(nth(&unit, 1)).unwrap());
    }
}
