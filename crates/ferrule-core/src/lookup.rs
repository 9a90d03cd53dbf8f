//! # Symbol Lookup
//!
//! Resolves a name the way the program sees it from the selected frame.
//!
//! Starting at the frame's function the search visits, in order:
//!
//! 1. enumerators of enumerations declared in the scope
//! 2. lexical blocks containing the pc
//! 3. the scope's own variables, parameters, types and nested functions
//! 4. the specification or abstract origin of the function
//! 5. common blocks included by the function (Fortran)
//! 6. the entry completing a declaration
//! 7. the containing class of a member function
//! 8. every lexical block regardless of pc
//! 9. the enclosing scope, ending with the unit's globals
//!
//! A function reached through a specification does not search its own
//! parent: the declaration's parent is the right scope.

use gimli::constants;

use crate::context::EvalContext;
use crate::dwarf::{Die, DieId, MAX_TYPE_REF_DEPTH};
use crate::error::FerruleResult;
use crate::variant::member;
use crate::variant::Type;

/// Scope-chain search for one name
struct ScopeSearch<'n>
{
    name: &'n str,
    pc: Option<u64>,
}

fn is_symbol_tag(tag: gimli::DwTag) -> bool
{
    matches!(
        tag,
        constants::DW_TAG_variable
            | constants::DW_TAG_formal_parameter
            | constants::DW_TAG_structure_type
            | constants::DW_TAG_class_type
            | constants::DW_TAG_union_type
            | constants::DW_TAG_typedef
            | constants::DW_TAG_enumeration_type
            | constants::DW_TAG_subprogram
    )
}

/// Fortran common block names carry one or two trailing underscores
fn common_name_matches(die: Die<'_>, name: &str) -> FerruleResult<bool>
{
    let raw = die.name()?;
    let trimmed = raw.trim_end_matches('_');
    Ok(raw.eq_ignore_ascii_case(name) || (!trimmed.is_empty() && trimmed.eq_ignore_ascii_case(name)))
}

fn block_contains(block: Die<'_>, pc: u64) -> FerruleResult<bool>
{
    let low = block.attr_int(constants::DW_AT_low_pc)?;
    let high = block.attr_int(constants::DW_AT_high_pc)?;
    #[allow(clippy::cast_sign_loss)]
    let contains = match (low, high) {
        (Some(low), Some(high)) => pc >= low as u64 && pc < high as u64,
        _ => false,
    };
    Ok(contains)
}

impl<'n> ScopeSearch<'n>
{
    fn scope<'u>(&self, scope: Die<'u>, caller: Option<DieId>, depth: usize, result: &mut Vec<Die<'u>>) -> FerruleResult<()>
    {
        if depth > MAX_TYPE_REF_DEPTH * 4 {
            return Ok(());
        }
        match scope.tag() {
            constants::DW_TAG_subprogram => self.subprogram(scope, caller, depth, result),
            constants::DW_TAG_lexical_block => self.block(scope, self.pc, result),
            constants::DW_TAG_common_block => self.common_block(scope, result),
            constants::DW_TAG_compile_unit | constants::DW_TAG_namespace | constants::DW_TAG_module => {
                self.unit_scope(scope, result)?;
                if result.is_empty() && scope.tag() != constants::DW_TAG_compile_unit {
                    if let Some(parent) = scope.parent() {
                        self.scope(parent, Some(scope.id()), depth + 1, result)?;
                    }
                }
                Ok(())
            }
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type | constants::DW_TAG_union_type => {
                result.extend(member::find_symbol(Type::new(scope), self.name)?);
                if result.is_empty() {
                    if let Some(parent) = scope.parent() {
                        self.scope(parent, Some(scope.id()), depth + 1, result)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Enumerators of the enumerations among `children`
    fn enumerators<'u>(&self, children: &[Die<'u>], result: &mut Vec<Die<'u>>) -> FerruleResult<bool>
    {
        for child in children {
            if child.tag() != constants::DW_TAG_enumeration_type {
                continue;
            }
            for enumerator in child.children()? {
                if enumerator.name_matches(self.name)? {
                    result.push(enumerator);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// First own symbol called `name`
    fn own<'u>(&self, children: &[Die<'u>], result: &mut Vec<Die<'u>>) -> FerruleResult<bool>
    {
        for child in children {
            if is_symbol_tag(child.tag()) && child.name_matches(self.name)? {
                result.push(*child);
                return Ok(true);
            }
            if child.tag() == constants::DW_TAG_common_block && common_name_matches(*child, self.name)? {
                result.push(*child);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn block<'u>(&self, block: Die<'u>, pc: Option<u64>, result: &mut Vec<Die<'u>>) -> FerruleResult<()>
    {
        let children = block.children()?;
        if self.enumerators(&children, result)? {
            return Ok(());
        }
        for child in &children {
            if child.tag() != constants::DW_TAG_lexical_block {
                continue;
            }
            let visible = match pc {
                None => true,
                Some(pc) => block_contains(*child, pc)?,
            };
            if visible {
                self.block(*child, pc, result)?;
                if !result.is_empty() {
                    return Ok(());
                }
            }
        }
        self.own(&children, result)?;
        Ok(())
    }

    fn common_block<'u>(&self, block: Die<'u>, result: &mut Vec<Die<'u>>) -> FerruleResult<()>
    {
        for child in block.children()? {
            if is_symbol_tag(child.tag()) && child.name_matches(self.name)? {
                result.push(child);
                return Ok(());
            }
        }
        Ok(())
    }

    fn unit_scope<'u>(&self, unit: Die<'u>, result: &mut Vec<Die<'u>>) -> FerruleResult<()>
    {
        let children = unit.children()?;
        if self.enumerators(&children, result)? {
            return Ok(());
        }
        for child in children {
            if is_symbol_tag(child.tag()) && child.tag() != constants::DW_TAG_formal_parameter && child.name_matches(self.name)? {
                result.push(child);
            }
        }
        Ok(())
    }

    fn subprogram<'u>(&self, function: Die<'u>, caller: Option<DieId>, depth: usize, result: &mut Vec<Die<'u>>) -> FerruleResult<()>
    {
        let children = function.children()?;
        if self.enumerators(&children, result)? {
            return Ok(());
        }

        let blocks: Vec<Die<'u>> = children
            .iter()
            .copied()
            .filter(|child| child.tag() == constants::DW_TAG_lexical_block)
            .collect();
        if let Some(pc) = self.pc {
            for block in &blocks {
                if block_contains(*block, pc)? {
                    self.block(*block, Some(pc), result)?;
                    if !result.is_empty() {
                        return Ok(());
                    }
                }
            }
        }

        if self.own(&children, result)? {
            return Ok(());
        }

        let more_info = function.more_info();
        let mut has_specification = false;
        if more_info.is_none() {
            for at in [constants::DW_AT_specification, constants::DW_AT_abstract_origin] {
                if let Some(spec) = function.reference(at)? {
                    has_specification = true;
                    if Some(spec.id()) != caller {
                        self.scope(spec, Some(function.id()), depth + 1, result)?;
                        if !result.is_empty() {
                            return Ok(());
                        }
                    }
                }
            }
        }

        for child in &children {
            if child.tag() != constants::DW_TAG_common_inclusion {
                continue;
            }
            if let Some(common) = child.reference(constants::DW_AT_common_reference)? {
                self.common_block(common, result)?;
                if !result.is_empty() {
                    return Ok(());
                }
            }
        }

        if let Some(info) = more_info {
            if Some(info.id()) != caller {
                self.scope(info, Some(function.id()), depth + 1, result)?;
                if !result.is_empty() {
                    return Ok(());
                }
            }
        }

        if let Some(class) = function.reference(constants::DW_AT_containing_type)? {
            if Some(class.id()) != caller {
                result.extend(member::find_symbol(Type::new(class), self.name)?);
                if !result.is_empty() {
                    return Ok(());
                }
            }
        }

        // compilers sometimes put locals in the wrong block
        for block in &blocks {
            self.block(*block, None, result)?;
            if !result.is_empty() {
                return Ok(());
            }
        }

        if !has_specification {
            if let Some(parent) = function.parent() {
                if Some(parent.id()) != caller {
                    self.scope(parent, Some(function.id()), depth + 1, result)?;
                }
            }
        }
        Ok(())
    }
}

/// Entries called `name` visible from the selected frame
///
/// Without a frame only the unit's globals are searched. Several results
/// come back for overloaded global functions.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn lookup_symbol<'a>(ctx: &EvalContext<'a>, name: &str) -> FerruleResult<Vec<Die<'a>>>
{
    lookup_symbol_at(ctx, name, ctx.pc)
}

/// [`lookup_symbol`] with blocks selected by `pc` instead of the frame's pc
///
/// Used for `name@line`, where the line's address picks the lexical block.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn lookup_symbol_at<'a>(ctx: &EvalContext<'a>, name: &str, pc: Option<u64>) -> FerruleResult<Vec<Die<'a>>>
{
    let start = ctx.function().unwrap_or_else(|| ctx.unit().root());
    lookup_in(start, name, pc)
}

/// Entries called `name` visible from inside `scope`
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn lookup_in<'u>(scope: Die<'u>, name: &str, pc: Option<u64>) -> FerruleResult<Vec<Die<'u>>>
{
    let search = ScopeSearch { name, pc };
    let mut result = Vec::new();
    search.scope(scope, None, 0, &mut result)?;
    Ok(result)
}

/// Named scope (class, namespace, function) visible from the selected frame
///
/// Classes win over functions of the same name.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn lookup_scope<'a>(ctx: &EvalContext<'a>, name: &str) -> FerruleResult<Option<Die<'a>>>
{
    let start = ctx.function().unwrap_or_else(|| ctx.unit().root());
    member::find_scope(start, name)
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::types::SourceLanguage;

    struct Program
    {
        unit: CompUnit,
    }

    /// `int g; enum { RED }; struct point; void f(int x) { int y; { int z; } }`
    fn program(language: SourceLanguage) -> Program
    {
        let mut b = UnitBuilder::new(language, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        let global = b.add(root, DW_TAG_variable);
        b.set_name(global, "g").set_ref(global, DW_AT_type, int);
        let colors = b.add(root, DW_TAG_enumeration_type);
        let red = b.add(colors, DW_TAG_enumerator);
        b.set_name(red, "RED").set_int(red, DW_AT_const_value, 0);
        let point = b.add(root, DW_TAG_structure_type);
        b.set_name(point, "point");
        let f = b.add(root, DW_TAG_subprogram);
        b.set_name(f, "f").set_int(f, DW_AT_low_pc, 0x1000).set_int(f, DW_AT_high_pc, 0x1100);
        let x = b.add(f, DW_TAG_formal_parameter);
        b.set_name(x, "x").set_ref(x, DW_AT_type, int);
        let y = b.add(f, DW_TAG_variable);
        b.set_name(y, "y").set_ref(y, DW_AT_type, int);
        let block = b.add(f, DW_TAG_lexical_block);
        b.set_int(block, DW_AT_low_pc, 0x1040).set_int(block, DW_AT_high_pc, 0x1080);
        let z = b.add(block, DW_TAG_variable);
        b.set_name(z, "z").set_ref(z, DW_AT_type, int);
        let shadow = b.add(block, DW_TAG_variable);
        b.set_name(shadow, "y").set_ref(shadow, DW_AT_type, int).set_int(shadow, DW_AT_decl_line, 9);
        Program {
            unit: CompUnit::new(b.build()).unwrap(),
        }
    }

    fn function(unit: &CompUnit) -> DieId
    {
        unit.root().children().unwrap()[4].id()
    }

    #[test]
    fn test_lookup_walks_scope_chain()
    {
        let p = program(SourceLanguage::C);
        let ctx = EvalContext::new(&p.unit).with_frame(Some(function(&p.unit)), None, Some(0x1010));
        assert_eq!(lookup_symbol(&ctx, "x").unwrap()[0].tag(), DW_TAG_formal_parameter);
        assert_eq!(lookup_symbol(&ctx, "g").unwrap()[0].tag(), DW_TAG_variable);
        assert_eq!(lookup_symbol(&ctx, "RED").unwrap()[0].tag(), DW_TAG_enumerator);
        assert!(lookup_symbol(&ctx, "nothing").unwrap().is_empty());
        // outside the block, z is still found by the all-blocks fallback
        assert_eq!(lookup_symbol(&ctx, "z").unwrap().len(), 1);
    }

    #[test]
    fn test_inner_block_shadows_outer()
    {
        let p = program(SourceLanguage::C);
        let ctx = EvalContext::new(&p.unit).with_frame(Some(function(&p.unit)), None, Some(0x1050));
        let y = lookup_symbol(&ctx, "y").unwrap()[0];
        assert_eq!(y.attr_int(DW_AT_decl_line).unwrap(), Some(9));

        let ctx = EvalContext::new(&p.unit).with_frame(Some(function(&p.unit)), None, Some(0x1010));
        let y = lookup_symbol(&ctx, "y").unwrap()[0];
        assert_eq!(y.attr_int(DW_AT_decl_line).unwrap(), None);
    }

    #[test]
    fn test_lookup_without_frame_sees_globals_only()
    {
        let p = program(SourceLanguage::C);
        let ctx = EvalContext::new(&p.unit);
        assert_eq!(lookup_symbol(&ctx, "g").unwrap().len(), 1);
        assert!(lookup_symbol(&ctx, "x").unwrap().is_empty());
    }

    #[test]
    fn test_case_blind_lookup()
    {
        let p = program(SourceLanguage::Fortran90);
        let ctx = EvalContext::new(&p.unit).with_frame(Some(function(&p.unit)), None, Some(0x1010));
        assert_eq!(lookup_symbol(&ctx, "X").unwrap().len(), 1);

        let p = program(SourceLanguage::C);
        let ctx = EvalContext::new(&p.unit).with_frame(Some(function(&p.unit)), None, Some(0x1010));
        assert!(lookup_symbol(&ctx, "X").unwrap().is_empty());
    }

    #[test]
    fn test_lookup_scope_prefers_types()
    {
        let p = program(SourceLanguage::C);
        let ctx = EvalContext::new(&p.unit).with_frame(Some(function(&p.unit)), None, None);
        assert_eq!(lookup_scope(&ctx, "point").unwrap().unwrap().tag(), DW_TAG_structure_type);
        assert_eq!(lookup_scope(&ctx, "f").unwrap().unwrap().tag(), DW_TAG_subprogram);
    }
}
