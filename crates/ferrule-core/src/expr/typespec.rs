//! Type names inside casts and `sizeof`.
//!
//! C type names are a base type followed by an abstract declarator:
//! `unsigned long`, `struct node *`, `int (*)[4]`, `char *(*)(int)`.
//! Fortran type names are `INTEGER(KIND=8)`, `CHARACTER*10`,
//! `REAL, DIMENSION(3), POINTER` and similar.

use gimli::{constants, DwTag};

use crate::dwarf::CompUnit;
use crate::error::{FerruleError, FerruleResult};
use crate::expr::parser::Parser;
use crate::expr::token::TokenKind;
use crate::lookup;
use crate::variant::{synthetic, Dimension, Type};

/// One step of an abstract declarator, applied inside out
#[derive(Debug, Clone, PartialEq)]
enum Declarator<'u>
{
    Pointer,
    Reference,
    Array(Dimension),
    Function(Vec<Type<'u>>),
}

/// Keywords seen while reading a C base type
#[derive(Debug, Default)]
struct BaseSpec<'u>
{
    base: Option<String>,
    signed: Option<bool>,
    short: bool,
    long: u8,
    named: Option<Type<'u>>,
    is_const: bool,
    is_volatile: bool,
}

impl<'u> BaseSpec<'u>
{
    fn is_empty(&self) -> bool
    {
        self.base.is_none() && self.signed.is_none() && !self.short && self.long == 0 && self.named.is_none()
    }

    fn resolve(self, unit: &'u CompUnit) -> FerruleResult<Option<Type<'u>>>
    {
        let ty = match (self.named, self.base.as_deref()) {
            (Some(named), _) => Some(named),
            (None, Some("void")) => None,
            (None, Some("float")) => Some(synthetic::base_type(unit, "float", constants::DW_ATE_float, 4)),
            (None, Some("double")) if self.long > 0 => {
                return Err(FerruleError::NotSupported("long double is not supported".to_string()));
            }
            (None, Some("double")) => Some(synthetic::real_type(unit)),
            (None, Some("bool" | "_Bool")) => Some(synthetic::base_type(unit, "bool", constants::DW_ATE_boolean, 1)),
            (None, Some("wchar_t")) => Some(synthetic::base_type(unit, "wchar_t", constants::DW_ATE_signed, 4)),
            (None, Some("char")) => Some(match self.signed {
                None => synthetic::char_type(unit),
                Some(true) => synthetic::base_type(unit, "signed char", constants::DW_ATE_signed_char, 1),
                Some(false) => synthetic::base_type(unit, "unsigned char", constants::DW_ATE_unsigned_char, 1),
            }),
            (None, Some("int") | None) => {
                if self.signed.is_none() && !self.short && self.long == 0 && self.base.is_none() {
                    return Err(FerruleError::syntax("Malformed type specification"));
                }
                Some(self.integer(unit))
            }
            (None, Some(_)) => return Err(FerruleError::syntax("Malformed type specification")),
        };
        let ty = if self.is_const { Some(synthetic::const_of(unit, ty)) } else { ty };
        Ok(if self.is_volatile { Some(synthetic::volatile_of(unit, ty)) } else { ty })
    }

    fn integer(&self, unit: &'u CompUnit) -> Type<'u>
    {
        let long_size = usize::from(unit.address_size());
        let (core, size) = match (self.short, self.long) {
            (true, _) => ("short", 2),
            (false, 0) => ("int", 4),
            (false, 1) => ("long", long_size),
            (false, _) => ("long long", 8),
        };
        let unsigned = self.signed == Some(false);
        let name = if unsigned { format!("unsigned {core}") } else { core.to_string() };
        let encoding = if unsigned { constants::DW_ATE_unsigned } else { constants::DW_ATE_signed };
        synthetic::base_type(unit, &name, encoding, size)
    }
}

fn aggregate_tag(keyword: &str) -> &'static [DwTag]
{
    match keyword {
        "struct" | "class" => &[constants::DW_TAG_structure_type, constants::DW_TAG_class_type],
        "union" => &[constants::DW_TAG_union_type],
        _ => &[constants::DW_TAG_enumeration_type],
    }
}

/// Intrinsic Fortran type families usable in casts and kind suffixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FortranBase
{
    Integer,
    Real,
    Complex,
    Logical,
    Character,
}

impl FortranBase
{
    fn from_keyword(word: &str) -> Option<Self>
    {
        match word.to_ascii_uppercase().as_str() {
            "INTEGER" => Some(FortranBase::Integer),
            "REAL" | "DOUBLE" => Some(FortranBase::Real),
            "COMPLEX" => Some(FortranBase::Complex),
            "LOGICAL" => Some(FortranBase::Logical),
            "CHARACTER" => Some(FortranBase::Character),
            _ => None,
        }
    }

    const fn keyword(self) -> &'static str
    {
        match self {
            FortranBase::Integer => "INTEGER",
            FortranBase::Real => "REAL",
            FortranBase::Complex => "COMPLEX",
            FortranBase::Logical => "LOGICAL",
            FortranBase::Character => "CHARACTER",
        }
    }
}

/// Whether `word` starts a Fortran type name
pub(crate) fn is_fortran_type_keyword(word: &str) -> bool
{
    FortranBase::from_keyword(word).is_some()
}

/// Type of a Fortran intrinsic family with the given kind
///
/// Default kinds are 4 for every family; `CHARACTER` takes its length.
///
/// ## Errors
///
/// Kinds the family does not have.
pub(crate) fn fortran_kind_type(unit: &CompUnit, base: FortranBase, kind: i64) -> FerruleResult<Type<'_>>
{
    let invalid = || FerruleError::eval(format!("Invalid KIND value {kind} in {} cast", base.keyword()));
    let size = usize::try_from(kind).map_err(|_| invalid())?;
    let ty = match base {
        FortranBase::Integer if matches!(size, 1 | 2 | 4 | 8) => {
            let name = if size == 4 { "integer".to_string() } else { format!("integer(kind={size})") };
            synthetic::base_type(unit, &name, constants::DW_ATE_signed, size)
        }
        FortranBase::Logical if matches!(size, 1 | 2 | 4 | 8) => {
            let name = if size == 4 { "logical".to_string() } else { format!("logical(kind={size})") };
            synthetic::base_type(unit, &name, constants::DW_ATE_boolean, size)
        }
        FortranBase::Real if size == 4 => synthetic::base_type(unit, "real", constants::DW_ATE_float, 4),
        FortranBase::Real if size == 8 => synthetic::real_type(unit),
        FortranBase::Complex if matches!(size, 4 | 8) => {
            let name = if size == 4 { "complex".to_string() } else { format!("complex(kind={size})") };
            synthetic::base_type(unit, &name, constants::DW_ATE_complex_float, size * 2)
        }
        FortranBase::Character if size == 1 => synthetic::char_type(unit),
        FortranBase::Character if size > 1 => synthetic::string_type(unit, size),
        FortranBase::Real | FortranBase::Complex if size == 16 => {
            return Err(FerruleError::NotSupported("Quad precision reals are not supported".to_string()));
        }
        _ => return Err(invalid()),
    };
    Ok(ty)
}

impl<'a> Parser<'_, 'a>
{
    /// A complete C type name
    pub(crate) fn type_name(&mut self) -> FerruleResult<Option<Type<'a>>>
    {
        let base = self.base_type()?;
        let declarators = self.abstract_declarator()?;
        self.apply(base, declarators)
    }

    fn base_type(&mut self) -> FerruleResult<Option<Type<'a>>>
    {
        let mut spec = BaseSpec::default();
        loop {
            let TokenKind::Ident(word) = self.peek().clone() else {
                break;
            };
            match word.as_str() {
                "const" => spec.is_const = true,
                "volatile" => spec.is_volatile = true,
                "signed" => spec.signed = Some(true),
                "unsigned" => spec.signed = Some(false),
                "short" => spec.short = true,
                "long" => spec.long += 1,
                "char" | "int" | "float" | "double" | "void" | "bool" | "_Bool" | "wchar_t"
                    if spec.base.is_none() && spec.named.is_none() =>
                {
                    spec.base = Some(word);
                }
                "struct" | "class" | "union" | "enum" if spec.is_empty() => {
                    self.advance();
                    let tag = self.name("Need a structure tag")?;
                    spec.named = Some(self.tagged(&word, &tag)?);
                    continue;
                }
                _ if spec.is_empty() => match self.named_type_at(0) {
                    Some((die, used)) => {
                        self.pos += used;
                        spec.named = Some(Type::new(die));
                        continue;
                    }
                    None => break,
                },
                _ => break,
            }
            self.advance();
        }
        if spec.is_empty() && !spec.is_const && !spec.is_volatile {
            return Err(FerruleError::syntax("Malformed type specification"));
        }
        spec.resolve(self.ctx.unit())
    }

    /// `struct tag`, `union tag` or `enum tag`
    fn tagged(&self, keyword: &str, tag: &str) -> FerruleResult<Type<'a>>
    {
        let tags = aggregate_tag(keyword);
        let found = lookup::lookup_symbol(self.ctx, tag)?;
        if let Some(die) = found.iter().find(|die| tags.contains(&die.tag())) {
            return Ok(Type::new(*die));
        }
        if matches!(keyword, "struct" | "class") {
            if let Some(die) = self.ctx.unit().find_struct(tag)? {
                return Ok(Type::new(die));
            }
        }
        Err(FerruleError::eval(format!("No {keyword} type named {tag}.")))
    }

    /// Declarator steps in application order, innermost first
    fn abstract_declarator(&mut self) -> FerruleResult<Vec<Declarator<'a>>>
    {
        let mut pointers = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Star => pointers.push(Declarator::Pointer),
                TokenKind::Amp => pointers.push(Declarator::Reference),
                TokenKind::Ident(word) if word == "const" || word == "volatile" => {}
                _ => break,
            }
            self.advance();
        }

        let mut inner = Vec::new();
        let nested = *self.peek() == TokenKind::LParen
            && matches!(self.peek_at(1), TokenKind::Star | TokenKind::Amp | TokenKind::LParen);
        if nested {
            self.advance();
            inner = self.abstract_declarator()?;
            self.expect(&TokenKind::RParen, "Malformed type specification")?;
        }

        let mut suffixes = Vec::new();
        loop {
            if self.eat(&TokenKind::LBracket) {
                suffixes.push(Declarator::Array(self.array_dimension()?));
            } else if *self.peek() == TokenKind::LParen && !nested_start(self.peek_at(1)) {
                self.advance();
                suffixes.push(Declarator::Function(self.parameter_types()?));
            } else {
                break;
            }
        }

        suffixes.reverse();
        pointers.extend(suffixes);
        pointers.extend(inner);
        Ok(pointers)
    }

    fn array_dimension(&mut self) -> FerruleResult<Dimension>
    {
        let count = match self.advance() {
            TokenKind::RBracket => return Ok(Dimension { lower: 0, upper: -1 }),
            TokenKind::Int(count) if count >= 0 => count,
            _ => return Err(FerruleError::syntax("Invalid array dimension")),
        };
        self.expect(&TokenKind::RBracket, "Invalid array dimension")?;
        Ok(Dimension {
            lower: 0,
            upper: count - 1,
        })
    }

    fn parameter_types(&mut self) -> FerruleResult<Vec<Type<'a>>>
    {
        let mut params = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            if let Some(param) = self.type_name()? {
                params.push(param);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "Malformed type specification")?;
        Ok(params)
    }

    fn apply(&self, base: Option<Type<'a>>, declarators: Vec<Declarator<'a>>) -> FerruleResult<Option<Type<'a>>>
    {
        let unit = self.ctx.unit();
        let mut ty = base;
        for declarator in declarators {
            ty = Some(match declarator {
                Declarator::Pointer => synthetic::pointer_to(unit, ty),
                Declarator::Reference => {
                    let target = ty.ok_or_else(|| FerruleError::syntax("Cannot declare a reference to void"))?;
                    synthetic::reference_to(unit, target)
                }
                Declarator::Array(dim) => {
                    let element = ty.ok_or_else(|| FerruleError::syntax("Invalid array dimension"))?;
                    synthetic::array_of(unit, element, &[dim])
                }
                Declarator::Function(params) => synthetic::subroutine(unit, ty, &params),
            });
        }
        Ok(ty)
    }

    /// A Fortran type name: keyword, kind or length, then attributes
    pub(crate) fn fortran_type(&mut self) -> FerruleResult<Option<Type<'a>>>
    {
        let word = self.name("Malformed type specification")?;
        let base = FortranBase::from_keyword(&word).ok_or_else(|| FerruleError::syntax("Malformed type specification"))?;
        let unit = self.ctx.unit();

        let mut kind = match base {
            FortranBase::Character => 1,
            _ => 4,
        };
        if word.eq_ignore_ascii_case("DOUBLE") {
            let precision = self.name("Malformed type specification")?;
            if !precision.eq_ignore_ascii_case("PRECISION") {
                return Err(FerruleError::syntax("Malformed type specification"));
            }
            kind = 8;
        } else if self.eat(&TokenKind::Star) {
            kind = self.kind_value()?;
        } else if self.eat(&TokenKind::LParen) {
            if let TokenKind::Ident(selector) = self.peek().clone() {
                if !(selector.eq_ignore_ascii_case("KIND") || selector.eq_ignore_ascii_case("LEN")) {
                    return Err(FerruleError::syntax("Malformed type specification"));
                }
                self.advance();
                self.expect(&TokenKind::Assign, "Malformed type specification")?;
            }
            kind = self.kind_value()?;
            self.expect(&TokenKind::RParen, "Malformed type specification")?;
        }
        let mut ty = fortran_kind_type(unit, base, kind)?;

        while self.eat(&TokenKind::Comma) {
            let attribute = self.name("Malformed type specification")?;
            match attribute.to_ascii_uppercase().as_str() {
                "DIMENSION" => {
                    self.expect(&TokenKind::LParen, "Malformed type specification")?;
                    let dims = self.fortran_dimensions()?;
                    ty = synthetic::array_of(unit, ty, &dims);
                }
                "POINTER" => ty = synthetic::pointer_to(unit, Some(ty)),
                _ => return Err(FerruleError::syntax(format!("Unknown type attribute {attribute}"))),
            }
        }
        Ok(Some(ty))
    }

    fn kind_value(&mut self) -> FerruleResult<i64>
    {
        match self.advance() {
            TokenKind::Int(value) => Ok(value),
            _ => Err(FerruleError::syntax("Malformed type specification")),
        }
    }

    /// `(n)`, `(lo:hi)` and `(:)` bounds, after the opening parenthesis
    fn fortran_dimensions(&mut self) -> FerruleResult<Vec<Dimension>>
    {
        let mut dims = Vec::new();
        loop {
            let dim = if self.eat(&TokenKind::Colon) {
                // deferred shape
                Dimension { lower: 1, upper: 0 }
            } else {
                let first = self.signed_int()?;
                if self.eat(&TokenKind::Colon) {
                    Dimension {
                        lower: first,
                        upper: self.signed_int()?,
                    }
                } else {
                    Dimension { lower: 1, upper: first }
                }
            };
            dims.push(dim);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "Invalid array dimension")?;
        Ok(dims)
    }

    fn signed_int(&mut self) -> FerruleResult<i64>
    {
        let negative = self.eat(&TokenKind::Minus);
        match self.advance() {
            TokenKind::Int(value) if negative => Ok(-value),
            TokenKind::Int(value) => Ok(value),
            _ => Err(FerruleError::syntax("Invalid array dimension")),
        }
    }

    /// Whether the tokens after `(` begin a Fortran cast
    pub(crate) fn starts_fortran_type(&self, ahead: usize) -> bool
    {
        let TokenKind::Ident(word) = self.peek_at(ahead) else {
            return false;
        };
        is_fortran_type_keyword(word)
            && matches!(
                self.peek_at(ahead + 1),
                TokenKind::RParen | TokenKind::LParen | TokenKind::Star | TokenKind::Comma | TokenKind::Ident(_)
            )
    }
}

/// `(` that opens a nested declarator rather than a parameter list
fn nested_start(next: &TokenKind) -> bool
{
    matches!(next, TokenKind::Star | TokenKind::Amp)
}
