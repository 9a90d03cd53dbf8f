//! Parser state and name resolution shared by both grammars.
//!
//! The grammar methods live in [`c_parser`](super::c_parser),
//! [`fortran_parser`](super::fortran_parser) and
//! [`typespec`](super::typespec) as further `impl Parser` blocks.

use gimli::constants;

use crate::context::EvalContext;
use crate::dwarf::{Die, DieId};
use crate::error::{FerruleError, FerruleResult};
use crate::expr::token::{tokenize, Token, TokenKind};
use crate::expr::{BinaryOp, Intrinsic, Node, UnaryOp};
use crate::lookup;
use crate::variant::{member, Type, TypeKind};

pub(crate) type ParseResult = FerruleResult<Node>;

/// Entries that name a type rather than an object
pub(crate) fn is_type_die(die: Die<'_>) -> bool
{
    matches!(
        die.tag(),
        constants::DW_TAG_base_type
            | constants::DW_TAG_typedef
            | constants::DW_TAG_structure_type
            | constants::DW_TAG_class_type
            | constants::DW_TAG_union_type
            | constants::DW_TAG_enumeration_type
    )
}

/// Node for the entries a lookup returned, innermost first
///
/// Several functions become an overload set; otherwise objects win over
/// type names sharing the spelling.
fn symbol_node(found: &[Die<'_>]) -> Option<Node>
{
    let functions: Vec<DieId> = found
        .iter()
        .filter(|die| die.tag() == constants::DW_TAG_subprogram)
        .map(|die| die.id())
        .collect();
    if functions.len() > 1 {
        return Some(Node::IdentifierSet(functions));
    }
    found
        .iter()
        .find(|die| !is_type_die(**die))
        .or_else(|| found.first())
        .map(|die| Node::Identifier(die.id()))
}

/// Recursive-descent parser over a token vector
pub(crate) struct Parser<'c, 'a>
{
    pub(crate) ctx: &'c EvalContext<'a>,
    tokens: Vec<Token>,
    pub(crate) pos: usize,
    pub(crate) fortran: bool,
    text: String,
}

impl<'c, 'a> Parser<'c, 'a>
{
    pub(crate) fn new(ctx: &'c EvalContext<'a>, text: &str) -> FerruleResult<Self>
    {
        let fortran = ctx.language.is_fortran();
        let tokens = tokenize(text, fortran, ctx.architecture())?;
        Ok(Self {
            ctx,
            tokens,
            pos: 0,
            fortran,
            text: text.to_string(),
        })
    }

    fn expression(&mut self) -> ParseResult
    {
        if self.fortran {
            self.fortran_expression()
        } else {
            self.c_expression()
        }
    }

    /// Parse the whole input
    pub(crate) fn parse_all(mut self) -> FerruleResult<(Node, usize)>
    {
        if self.at_end() {
            return Err(FerruleError::syntax("Empty expression"));
        }
        let node = self.expression()?;
        if !self.at_end() {
            let rest = self.text.get(self.offset()..).unwrap_or_default();
            return Err(FerruleError::syntax(format!("A syntax error in expression, near `{rest}'.")));
        }
        Ok((node, self.text.len()))
    }

    /// Parse as much of the input as forms an expression
    pub(crate) fn parse_prefix(mut self) -> FerruleResult<(Node, usize)>
    {
        if self.at_end() {
            return Err(FerruleError::syntax("Empty expression"));
        }
        let node = self.expression()?;
        Ok((node, self.offset()))
    }

    pub(crate) fn peek(&self) -> &TokenKind
    {
        self.peek_at(0)
    }

    /// Token `ahead` positions past the current one; the final `Eof` repeats
    pub(crate) fn peek_at(&self, ahead: usize) -> &TokenKind
    {
        let index = (self.pos + ahead).min(self.tokens.len().saturating_sub(1));
        self.tokens.get(index).map_or(&TokenKind::Eof, |t| &t.kind)
    }

    pub(crate) fn advance(&mut self) -> TokenKind
    {
        let kind = self.peek().clone();
        if kind != TokenKind::Eof {
            self.pos += 1;
        }
        kind
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool
    {
        if self.peek() == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, message: &str) -> FerruleResult<()>
    {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(FerruleError::syntax(message))
        }
    }

    /// Consume an identifier or fail with `message`
    pub(crate) fn name(&mut self, message: &str) -> FerruleResult<String>
    {
        match self.advance() {
            TokenKind::Ident(name) => Ok(name),
            _ => Err(FerruleError::syntax(message)),
        }
    }

    pub(crate) fn at_end(&self) -> bool
    {
        *self.peek() == TokenKind::Eof
    }

    /// Byte offset of the current token
    pub(crate) fn offset(&self) -> usize
    {
        self.tokens.get(self.pos).map_or(self.text.len(), |t| t.offset)
    }

    /// Left-associative chain of one precedence level
    pub(crate) fn binary_chain(&mut self, next: fn(&mut Self) -> ParseResult, operator: fn(&TokenKind) -> Option<BinaryOp>) -> ParseResult
    {
        let mut left = next(self)?;
        while let Some(op) = operator(self.peek()) {
            self.advance();
            let right = next(self)?;
            left = Node::binary(op, left, right);
        }
        Ok(left)
    }

    /// Resolve an identifier that was just consumed, including `name@line`
    pub(crate) fn identifier(&mut self, name: &str) -> ParseResult
    {
        if !self.eat(&TokenKind::At) {
            return self.resolve(name);
        }
        let TokenKind::Int(line) = self.advance() else {
            return Err(FerruleError::syntax("Expected @line for lexical scoping operator"));
        };
        let pc = u64::try_from(line)
            .ok()
            .and_then(|line| self.ctx.symbols().and_then(|t| t.lookup_line(line)))
            .ok_or_else(|| FerruleError::eval(format!("No code generated for line {line}")))?;
        let found = lookup::lookup_symbol_at(self.ctx, name, Some(pc.value()))?;
        symbol_node(&found).ok_or_else(|| FerruleError::SymbolNotFound(name.to_string()))
    }

    /// Resolve `name` from the selected frame
    ///
    /// Falls back to members of `this` in C++, Fortran intrinsics and finally
    /// the target's symbol table.
    pub(crate) fn resolve(&self, name: &str) -> ParseResult
    {
        let found = lookup::lookup_symbol(self.ctx, name)?;
        if let Some(node) = symbol_node(&found) {
            return Ok(node);
        }
        if self.ctx.language.is_cplusplus() {
            if let Some(node) = self.this_member(name)? {
                return Ok(node);
            }
        }
        if self.fortran {
            if let Some(intrinsic) = Intrinsic::from_name(name) {
                return Ok(Node::Intrinsic(intrinsic));
            }
        }
        if let Some(addr) = self.minimal_symbol(name) {
            #[allow(clippy::cast_possible_wrap)]
            let value = addr as i64;
            return Ok(Node::IntConstant {
                value,
                size: self.ctx.address_size(),
            });
        }
        Err(FerruleError::SymbolNotFound(name.to_string()))
    }

    /// `name` as a member of the class `this` points to
    fn this_member(&self, name: &str) -> FerruleResult<Option<Node>>
    {
        let Some(this) = lookup::lookup_symbol(self.ctx, "this")?.first().copied() else {
            return Ok(None);
        };
        let Some(pointer) = Type::of(this)? else {
            return Err(FerruleError::eval("Cannot find 'this' variable."));
        };
        let Some(class) = pointer.strip()?.target()? else {
            return Ok(None);
        };
        if member::find_symbol(class, name)?.is_empty() {
            return Ok(None);
        }
        Ok(Some(Node::Member {
            object: Box::new(Node::unary(UnaryOp::Deref, Node::Identifier(this.id()))),
            name: name.to_string(),
        }))
    }

    /// Address from the object's symbol table
    fn minimal_symbol(&self, name: &str) -> Option<u64>
    {
        let target = self.ctx.symbols()?;
        let case_blind = self.ctx.language.is_case_blind();
        target
            .lookup_symbol(name, case_blind)
            .or_else(|| {
                // Fortran compilers append an underscore to external names
                self.fortran
                    .then(|| format!("{}_", name.to_ascii_lowercase()))
                    .and_then(|mangled| target.lookup_symbol(&mangled, case_blind))
            })
            .map(|addr| addr.value())
    }

    /// `::name`, searched among the unit's globals only
    pub(crate) fn global(&self, name: &str) -> ParseResult
    {
        let found = lookup::lookup_in(self.ctx.unit().root(), name, None)?;
        symbol_node(&found).ok_or_else(|| FerruleError::SymbolNotFound(name.to_string()))
    }

    /// `A::B::name`
    pub(crate) fn qualified(&self, segments: &[String]) -> ParseResult
    {
        let Some(scope) = self.scope_of(segments)? else {
            let name = segments.last().map_or("", String::as_str);
            return self.resolve(name);
        };
        let (last, scopes) = segments
            .split_last()
            .ok_or_else(|| FerruleError::syntax("Malformed scope operator"))?;
        let mut found = if TypeKind::of(scope.tag()).is_aggregate() {
            member::find_symbol(Type::new(scope), last)?
        } else {
            lookup::lookup_in(scope, last, self.ctx.pc)?
        };
        if found.is_empty() {
            found = nested_types(scope, last)?;
        }
        symbol_node(&found).ok_or_else(|| FerruleError::eval(format!("No symbol \"{last}\" in context {}::", scopes.join("::"))))
    }

    /// Scope named by all but the last segment; `None` for a single segment
    pub(crate) fn scope_of(&self, segments: &[String]) -> FerruleResult<Option<Die<'a>>>
    {
        let Some((_, scopes)) = segments.split_last() else {
            return Ok(None);
        };
        let mut scope: Option<Die<'a>> = None;
        for name in scopes {
            let next = match scope {
                None => lookup::lookup_scope(self.ctx, name)?,
                Some(outer) => member::find_scope(outer, name)?,
            };
            scope = Some(next.ok_or_else(|| FerruleError::SymbolNotFound(name.clone()))?);
        }
        Ok(scope)
    }

    /// `"file"::name`, restricted to the unit compiled from `file`
    pub(crate) fn file_scoped(&self, file: &str, name: &str) -> ParseResult
    {
        let root = self.ctx.unit().root();
        let unit_name = root.name()?;
        let base = unit_name.rsplit('/').next().unwrap_or(&unit_name);
        if file.is_empty() || !(unit_name == file || base == file || unit_name.ends_with(file)) {
            return Err(FerruleError::eval(format!("Unable to find file {file} in scoping operation")));
        }
        let found = lookup::lookup_in(root, name, None)?;
        symbol_node(&found).ok_or_else(|| FerruleError::SymbolNotFound(name.to_string()))
    }

    /// Segments of a `A::B::c` chain starting at the current token
    ///
    /// Returns the segments and the number of tokens they span without
    /// consuming anything.
    pub(crate) fn scoped_name_at(&self, ahead: usize) -> Option<(Vec<String>, usize)>
    {
        let TokenKind::Ident(first) = self.peek_at(ahead) else {
            return None;
        };
        let mut segments = vec![first.clone()];
        let mut used = 1;
        while *self.peek_at(ahead + used) == TokenKind::ColonColon {
            let TokenKind::Ident(next) = self.peek_at(ahead + used + 1) else {
                break;
            };
            segments.push(next.clone());
            used += 2;
        }
        Some((segments, used))
    }

    /// Type entry named by the (possibly qualified) identifier `ahead`
    /// tokens past the current one, with the tokens it spans
    pub(crate) fn named_type_at(&self, ahead: usize) -> Option<(Die<'a>, usize)>
    {
        let (segments, used) = self.scoped_name_at(ahead)?;
        let die = if segments.len() == 1 {
            lookup::lookup_symbol(self.ctx, &segments[0]).ok()?.first().copied()?
        } else {
            let scope = self.scope_of(&segments).ok()??;
            let last = segments.last()?;
            nested_types(scope, last).ok()?.first().copied()?
        };
        let usable = matches!(die.tag(), constants::DW_TAG_typedef | constants::DW_TAG_base_type)
            || (self.ctx.language.is_cplusplus() && is_type_die(die));
        usable.then_some((die, used))
    }
}

/// Types declared directly inside `scope` called `name`
fn nested_types<'u>(scope: Die<'u>, name: &str) -> FerruleResult<Vec<Die<'u>>>
{
    let mut found = Vec::new();
    for child in scope.children()? {
        if is_type_die(child) && child.name_matches(name)? {
            found.push(child);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::test_support::SparseTarget;
    use crate::types::SourceLanguage;

    /// `namespace ns { int counter; }  struct S { static int total; };  int f(int); int f(double);`
    fn unit(language: SourceLanguage) -> CompUnit
    {
        let mut b = UnitBuilder::new(language, 8);
        let root = b.root();
        b.set_name(root, "/src/prog.cc");
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        let ns = b.add(root, DW_TAG_namespace);
        b.set_name(ns, "ns");
        let counter = b.add(ns, DW_TAG_variable);
        b.set_name(counter, "counter").set_ref(counter, DW_AT_type, int);
        let s = b.add(root, DW_TAG_structure_type);
        b.set_name(s, "S").set_int(s, DW_AT_byte_size, 4);
        let total = b.add(s, DW_TAG_member);
        b.set_name(total, "total").set_ref(total, DW_AT_type, int).set_flag(total, DW_AT_declaration);
        for _ in 0..2 {
            let f = b.add(root, DW_TAG_subprogram);
            b.set_name(f, "f");
        }
        let td = b.add(root, DW_TAG_typedef);
        b.set_name(td, "myint").set_ref(td, DW_AT_type, int);
        CompUnit::new(b.build()).unwrap()
    }

    #[test]
    fn test_overloads_become_identifier_set()
    {
        let unit = unit(SourceLanguage::CPlusPlus);
        let ctx = EvalContext::new(&unit);
        let parser = Parser::new(&ctx, "f").unwrap();
        assert!(matches!(parser.resolve("f").unwrap(), Node::IdentifierSet(ids) if ids.len() == 2));
    }

    #[test]
    fn test_qualified_names()
    {
        let unit = unit(SourceLanguage::CPlusPlus);
        let ctx = EvalContext::new(&unit);
        let parser = Parser::new(&ctx, "").unwrap();
        let node = parser.qualified(&["ns".to_string(), "counter".to_string()]).unwrap();
        let Node::Identifier(id) = node else { panic!("expected identifier") };
        assert_eq!(unit.die(id).name().unwrap(), "counter");

        let node = parser.qualified(&["S".to_string(), "total".to_string()]).unwrap();
        let Node::Identifier(id) = node else { panic!("expected identifier") };
        assert_eq!(unit.die(id).tag(), DW_TAG_member);

        let err = parser.qualified(&["S".to_string(), "nope".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "No symbol \"nope\" in context S::");
    }

    #[test]
    fn test_unknown_name_falls_back_to_symbol_table()
    {
        let unit = unit(SourceLanguage::C);
        let mut target = SparseTarget::new();
        target.symbol("environ", 0x6000, 8);
        let ctx = EvalContext::new(&unit).with_target(&mut target);
        let parser = Parser::new(&ctx, "").unwrap();
        assert_eq!(parser.resolve("environ").unwrap(), Node::IntConstant { value: 0x6000, size: 8 });
        assert!(matches!(parser.resolve("missing"), Err(FerruleError::SymbolNotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_file_scope()
    {
        let unit = unit(SourceLanguage::C);
        let ctx = EvalContext::new(&unit);
        let parser = Parser::new(&ctx, "").unwrap();
        assert!(parser.file_scoped("prog.cc", "f").is_ok());
        let err = parser.file_scoped("other.c", "f").unwrap_err();
        assert_eq!(err.to_string(), "Unable to find file other.c in scoping operation");
    }

    #[test]
    fn test_typedef_is_a_type_name()
    {
        let unit = unit(SourceLanguage::C);
        let ctx = EvalContext::new(&unit);
        let parser = Parser::new(&ctx, "myint S").unwrap();
        assert!(parser.named_type_at(0).is_some());
        // struct tags need the keyword in C
        assert!(parser.named_type_at(1).is_none());
    }
}
