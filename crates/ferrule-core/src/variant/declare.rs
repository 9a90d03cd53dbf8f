//! Declarations in each source dialect.
//!
//! C and C++ declarations are built from a stack of the entries on the way
//! from the declared name to its innermost type, so that pointers, arrays and
//! function types nest the way the language spells them (`int (*p)[4]`).
//! Fortran declarations are attribute lists (`real(kind=8), dimension(3)`).

use gimli::constants;

use crate::context::EvalContext;
use crate::dwarf::{AttrValue, Die, MAX_TYPE_REF_DEPTH};
use crate::error::FerruleResult;
use crate::format::simplify_type_name;
use crate::types::SourceLanguage;
use crate::variant::array::dimensions;
use crate::variant::{Dimension, Type, TypeKind};

/// Text of a type as used in casts and messages (`char *`, `integer(kind=4)`)
///
/// `None` is `void`.
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn type_name(ty: Option<Type<'_>>, language: SourceLanguage) -> FerruleResult<String>
{
    let Some(ty) = ty else {
        return Ok("void".to_string());
    };
    let declarer = Declarer {
        language,
        show_contents: false,
    };
    if language.is_fortran() {
        return declarer.fortran_type(ty, 1);
    }
    Ok(declarer.c_declaration(ty.die())?.trim_end().to_string())
}

/// Full declaration of a type, members included when the options ask for
/// contents
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn type_declaration(ctx: &EvalContext<'_>, ty: Type<'_>) -> FerruleResult<String>
{
    declaration(ctx, ty.die())
}

/// Declaration of any entry: variable, member, parameter, type, function or
/// common block
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn declaration(ctx: &EvalContext<'_>, die: Die<'_>) -> FerruleResult<String>
{
    let declarer = Declarer {
        language: ctx.language,
        show_contents: ctx.options.show_contents,
    };
    declarer.entry(die, 0, 0)
}

fn pad(indent: usize) -> String
{
    " ".repeat(indent)
}

struct Declarer
{
    language: SourceLanguage,
    show_contents: bool,
}

impl Declarer
{
    fn is_c(&self) -> bool
    {
        !self.language.is_fortran()
    }

    fn name_or_id(&self, die: Die<'_>) -> FerruleResult<String>
    {
        let name = die.name()?;
        if name.is_empty() {
            return Ok(if self.show_contents { String::new() } else { "{...}".to_string() });
        }
        Ok(simplify_type_name(&name))
    }

    fn entry(&self, die: Die<'_>, indent: usize, level: usize) -> FerruleResult<String>
    {
        die.check_loaded()?;
        match die.tag() {
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type | constants::DW_TAG_union_type => {
                self.aggregate(Type::new(die), indent, level)
            }
            constants::DW_TAG_enumeration_type => self.enumeration(die, indent),
            constants::DW_TAG_member | constants::DW_TAG_variable | constants::DW_TAG_formal_parameter => {
                self.variable(die, indent, level)
            }
            constants::DW_TAG_subprogram => self.subprogram(die, indent, level),
            constants::DW_TAG_common_block => self.common_block(die, indent),
            constants::DW_TAG_inheritance => self.inheritance(die),
            constants::DW_TAG_enumerator => {
                let value = die.attr_int(constants::DW_AT_const_value)?.unwrap_or(0);
                Ok(format!("{}{} = {value}", pad(indent), die.name()?))
            }
            constants::DW_TAG_typedef if self.is_c() => {
                let target = Type::of(die)?;
                Ok(format!("{}typedef {} {}", pad(indent), type_name(target, self.language)?, die.name()?))
            }
            _ if self.language.is_fortran() => Ok(format!("{}{}", pad(indent), self.fortran_type(Type::new(die), level)?)),
            _ => Ok(format!("{}{}", pad(indent), self.c_declaration(die)?.trim_end())),
        }
    }

    // C family

    /// Entries from the declared name inward, with pointers moved outside
    /// the qualifiers that apply to them
    fn build_stack<'u>(&self, start: Die<'u>) -> FerruleResult<Vec<Die<'u>>>
    {
        let mut stack = Vec::new();
        let mut pending_const = None;
        let mut pending_volatile = None;
        let mut current = Some(start);
        while let Some(die) = current {
            if stack.len() > MAX_TYPE_REF_DEPTH {
                break;
            }
            match die.tag() {
                constants::DW_TAG_const_type => pending_const = Some(die),
                constants::DW_TAG_volatile_type => pending_volatile = Some(die),
                tag => {
                    let pointer = tag == constants::DW_TAG_pointer_type;
                    if !pointer {
                        stack.push(die);
                    }
                    stack.extend(pending_volatile.take());
                    stack.extend(pending_const.take());
                    if pointer {
                        stack.push(die);
                    }
                    // a named type ends the declaration
                    if matches!(tag, constants::DW_TAG_typedef | constants::DW_TAG_enumeration_type)
                        || TypeKind::of(tag).is_aggregate()
                    {
                        break;
                    }
                }
            }
            current = die.type_die()?;
        }
        stack.extend(pending_volatile);
        stack.extend(pending_const);
        Ok(stack)
    }

    fn c_declaration(&self, die: Die<'_>) -> FerruleResult<String>
    {
        let stack = self.build_stack(die)?;
        let mut out = String::new();
        self.c_type(&stack, stack.len().checked_sub(1), &mut out)?;
        Ok(out)
    }

    fn space_before(next: Die<'_>) -> FerruleResult<bool>
    {
        Ok(match next.tag() {
            constants::DW_TAG_pointer_type
            | constants::DW_TAG_reference_type
            | constants::DW_TAG_rvalue_reference_type
            | constants::DW_TAG_subroutine_type
            | constants::DW_TAG_array_type
            | constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type => true,
            _ => !next.name()?.is_empty(),
        })
    }

    fn c_type(&self, stack: &[Die<'_>], index: Option<usize>, out: &mut String) -> FerruleResult<()>
    {
        let Some(i) = index else {
            return Ok(());
        };
        let die = stack[i];
        let below = i.checked_sub(1);
        let innermost = die.tag() != constants::DW_TAG_typedef && die.type_die()?.is_none();
        let space = |out: &mut String| -> FerruleResult<()> {
            if let Some(next) = below {
                if Self::space_before(stack[next])? {
                    out.push(' ');
                }
            }
            Ok(())
        };
        match die.tag() {
            constants::DW_TAG_const_type | constants::DW_TAG_volatile_type => {
                out.push_str(if die.tag() == constants::DW_TAG_const_type { "const" } else { "volatile" });
                if innermost {
                    out.push_str(" void");
                }
                space(out)?;
                self.c_type(stack, below, out)?;
            }
            constants::DW_TAG_pointer_type => {
                if innermost {
                    out.push_str("void ");
                }
                out.push('*');
                if let Some(next) = below {
                    let next_tag = stack[next].tag();
                    let named_value = matches!(
                        next_tag,
                        constants::DW_TAG_variable | constants::DW_TAG_member | constants::DW_TAG_formal_parameter
                    );
                    if next_tag != constants::DW_TAG_pointer_type && !named_value && Self::space_before(stack[next])? {
                        out.push(' ');
                    }
                }
                self.c_type(stack, below, out)?;
            }
            constants::DW_TAG_reference_type | constants::DW_TAG_rvalue_reference_type => {
                out.push('&');
                self.c_type(stack, below, out)?;
            }
            constants::DW_TAG_subroutine_type => {
                if innermost {
                    out.push_str("void ");
                }
                self.c_wrapped(stack, below, out)?;
                out.push('(');
                let mut first = true;
                for param in die.children()? {
                    if param.tag() != constants::DW_TAG_formal_parameter {
                        continue;
                    }
                    if !first {
                        out.push_str(", ");
                    }
                    out.push_str(self.c_declaration(param)?.trim_end());
                    first = false;
                }
                out.push(')');
            }
            constants::DW_TAG_array_type => {
                self.c_wrapped(stack, below, out)?;
                for child in die.children()? {
                    if child.tag() != constants::DW_TAG_subrange_type {
                        continue;
                    }
                    match child.attr(constants::DW_AT_upper_bound)? {
                        Some(AttrValue::Int(upper)) => out.push_str(&format!("[{}]", upper + 1)),
                        _ => match child.attr_int(constants::DW_AT_count)? {
                            Some(count) => out.push_str(&format!("[{count}]")),
                            None => out.push_str("[]"),
                        },
                    }
                }
            }
            constants::DW_TAG_base_type | constants::DW_TAG_unspecified_type | constants::DW_TAG_typedef => {
                out.push_str(&simplify_type_name(&die.name()?));
                space(out)?;
                self.c_type(stack, below, out)?;
            }
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type => {
                if !self.language.is_cplusplus() {
                    out.push_str("struct ");
                }
                out.push_str(&self.tag_name(die)?);
                space(out)?;
                self.c_type(stack, below, out)?;
            }
            constants::DW_TAG_union_type => {
                out.push_str("union ");
                out.push_str(&self.tag_name(die)?);
                space(out)?;
                self.c_type(stack, below, out)?;
            }
            constants::DW_TAG_enumeration_type => {
                if !self.language.is_cplusplus() {
                    out.push_str("enum ");
                }
                out.push_str(&self.tag_name(die)?);
                space(out)?;
                self.c_type(stack, below, out)?;
            }
            _ => {
                self.c_type(stack, below, out)?;
                out.push_str(&die.name()?);
            }
        }
        Ok(())
    }

    fn tag_name(&self, die: Die<'_>) -> FerruleResult<String>
    {
        let name = die.name()?;
        Ok(if name.is_empty() { "{...}".to_string() } else { simplify_type_name(&name) })
    }

    /// Declarator below an array or function, parenthesized after a pointer
    fn c_wrapped(&self, stack: &[Die<'_>], below: Option<usize>, out: &mut String) -> FerruleResult<()>
    {
        let Some(next) = below else {
            return Ok(());
        };
        let tag = stack[next].tag();
        if matches!(
            tag,
            constants::DW_TAG_pointer_type | constants::DW_TAG_reference_type | constants::DW_TAG_rvalue_reference_type
        ) {
            out.push('(');
            self.c_type(stack, below, out)?;
            out.push(')');
        } else {
            self.c_type(stack, below, out)?;
        }
        Ok(())
    }

    fn aggregate(&self, ty: Type<'_>, indent: usize, level: usize) -> FerruleResult<String>
    {
        if self.language.is_fortran() {
            return self.fortran_derived(ty, indent, level);
        }
        let die = ty.die();
        let keyword = match ty.kind() {
            TypeKind::Union => "union",
            _ if self.language.is_cplusplus() => "class",
            _ => "struct",
        };
        let mut out = pad(indent);
        if self.language.is_cplusplus() && !self.show_contents {
            out.push_str(&self.name_or_id(die)?);
            return Ok(out);
        }
        out.push_str(keyword);
        let name = self.name_or_id(die)?;
        if !name.is_empty() {
            out.push(' ');
            out.push_str(&name);
        }
        if !self.show_contents {
            return Ok(out);
        }
        let children = die.children()?;
        if self.language.is_cplusplus() {
            let mut first = true;
            for base in children.iter().filter(|c| c.tag() == constants::DW_TAG_inheritance) {
                out.push_str(if first { " : " } else { ", " });
                out.push_str(&self.inheritance(*base)?);
                first = false;
            }
        }
        out.push_str(" {\n");
        let mut access = None;
        for child in children {
            if self.language.is_cplusplus() {
                if !child.is_printable()? || child.is_artificial() {
                    continue;
                }
                let child_access = child
                    .attr_int(constants::DW_AT_accessibility)?
                    .unwrap_or(i64::from(constants::DW_ACCESS_public.0));
                if access != Some(child_access) {
                    let banner = match u8::try_from(child_access).map(gimli::DwAccess) {
                        Ok(constants::DW_ACCESS_protected) => "protected:",
                        Ok(constants::DW_ACCESS_private) => "private:",
                        _ => "public:",
                    };
                    out.push_str(&format!("{}{banner}\n", pad(indent + 2)));
                    access = Some(child_access);
                }
            } else if child.tag() == constants::DW_TAG_inheritance {
                continue;
            }
            out.push_str(&self.entry(child, indent + 4, level + 1)?);
            out.push_str(";\n");
        }
        out.push_str(&pad(indent));
        out.push('}');
        Ok(out)
    }

    fn enumeration(&self, die: Die<'_>, indent: usize) -> FerruleResult<String>
    {
        if self.language.is_fortran() {
            return Ok(format!("{}{}", pad(indent), self.fortran_type(Type::new(die), 1)?));
        }
        let mut out = format!("{}enum", pad(indent));
        let name = self.name_or_id(die)?;
        if !name.is_empty() {
            out.push(' ');
            out.push_str(&name);
        }
        if !self.show_contents {
            return Ok(out);
        }
        out.push_str(" {\n");
        let mut items = Vec::new();
        for child in die.children()? {
            if child.tag() != constants::DW_TAG_enumerator {
                continue;
            }
            match child.attr_int(constants::DW_AT_const_value)? {
                Some(value) => items.push(format!("{} = {value}", child.name()?)),
                None => items.push(child.name()?),
            }
        }
        out.push_str(&pad(indent + 4));
        out.push_str(&items.join(", "));
        out.push('\n');
        out.push_str(&pad(indent));
        out.push('}');
        Ok(out)
    }

    fn inheritance(&self, die: Die<'_>) -> FerruleResult<String>
    {
        let access = match die
            .attr_int(constants::DW_AT_accessibility)?
            .and_then(|a| u8::try_from(a).ok())
            .map(gimli::DwAccess)
        {
            Some(constants::DW_ACCESS_protected) => "protected ",
            Some(constants::DW_ACCESS_private) => "private ",
            _ => "public ",
        };
        let virtuality = die.attr_int(constants::DW_AT_virtuality)?.unwrap_or(0);
        let base = Type::of(die)?.map(Type::name).transpose()?.unwrap_or_default();
        Ok(format!(
            "{access}{}{}",
            if virtuality != 0 { "virtual " } else { "" },
            simplify_type_name(&base)
        ))
    }

    fn variable(&self, die: Die<'_>, indent: usize, level: usize) -> FerruleResult<String>
    {
        let mut out = pad(indent);
        if self.language.is_fortran() {
            let ty = Type::of(die)?;
            let type_text = match ty {
                Some(ty) => self.fortran_type(ty, level + 1)?,
                None => "<unknown>".to_string(),
            };
            let separator = if self.language == SourceLanguage::Fortran77 { " " } else { " :: " };
            out.push_str(&format!("{type_text}{separator}{}", die.name()?));
            return Ok(out);
        }
        let in_class = die.tag() == constants::DW_TAG_variable
            && die.parent().is_some_and(|p| TypeKind::of(p.tag()).is_aggregate());
        if in_class || (die.tag() == constants::DW_TAG_member && die.is_declaration()) {
            out.push_str("static ");
        }
        out.push_str(self.c_declaration(die)?.trim_end());
        Ok(out)
    }

    fn subprogram(&self, die: Die<'_>, indent: usize, level: usize) -> FerruleResult<String>
    {
        let mut out = pad(indent);
        let name = die.name()?;
        let params: Vec<Die<'_>> = die
            .children()?
            .into_iter()
            .filter(|c| c.tag() == constants::DW_TAG_formal_parameter && !c.is_artificial())
            .collect();

        if self.language.is_fortran() {
            let bare = name.trim_end_matches('_');
            let result = die
                .children()?
                .into_iter()
                .find(|c| c.tag() == constants::DW_TAG_variable && c.name_matches(bare).unwrap_or(false));
            match result {
                Some(result) => {
                    if let Some(ty) = Type::of(result)? {
                        out.push_str(&self.fortran_type(ty, level)?);
                    }
                    out.push_str(" function ");
                }
                None => out.push_str("subroutine "),
            }
            out.push_str(&name);
            let names: Vec<String> = params.iter().map(|p| p.name()).collect::<FerruleResult<_>>()?;
            out.push_str(&format!("({})\n", names.join(", ")));
            for param in params {
                let line = self
                    .variable(param, indent + 4, level)
                    .unwrap_or_else(|_| format!("{}<unknown> :: {}", pad(indent + 4), param.name().unwrap_or_default()));
                out.push_str(&line);
                out.push('\n');
            }
            return Ok(out);
        }

        let parent_name = match die.parent() {
            Some(parent) if TypeKind::of(parent.tag()).is_aggregate() => parent.name()?,
            _ => String::new(),
        };
        let virtuality = die.attr_int(constants::DW_AT_virtuality)?.unwrap_or(0);
        if virtuality != 0 {
            out.push_str("virtual ");
        }
        match Type::of(die)? {
            Some(result) => {
                out.push_str(self.c_declaration(result.die())?.trim_end());
                out.push(' ');
            }
            None if !name.starts_with('~') && name != parent_name => out.push_str("void "),
            None => {}
        }
        out.push_str(&name);
        out.push('(');
        let mut first = true;
        for param in params {
            if !first {
                out.push_str(", ");
            }
            out.push_str(self.c_declaration(param)?.trim_end());
            first = false;
        }
        out.push(')');
        if virtuality == i64::from(constants::DW_VIRTUALITY_pure_virtual.0) {
            out.push_str(" = 0");
        }
        Ok(out)
    }

    fn common_block(&self, die: Die<'_>, indent: usize) -> FerruleResult<String>
    {
        let mut out = format!("{}common/{}/ ", pad(indent), die.name()?);
        if self.show_contents {
            let mut lines = Vec::new();
            for child in die.children()? {
                lines.push(self.entry(child, indent + 4, 0)?);
            }
            out.push_str(&lines.join("\n"));
        }
        Ok(out)
    }

    // Fortran family

    fn fortran_type(&self, ty: Type<'_>, level: usize) -> FerruleResult<String>
    {
        let f77 = self.language == SourceLanguage::Fortran77;
        let ty = ty.strip()?;
        Ok(match ty.kind() {
            TypeKind::Base => {
                let size = ty.size()?;
                let encoding = ty.encoding()?.unwrap_or(constants::DW_ATE_signed);
                let word = match encoding {
                    constants::DW_ATE_address => "unknown",
                    constants::DW_ATE_boolean => "logical",
                    constants::DW_ATE_complex_float => "complex",
                    constants::DW_ATE_float => "real",
                    constants::DW_ATE_signed_char | constants::DW_ATE_unsigned_char => "character",
                    _ => "integer",
                };
                match (f77, word) {
                    (true, _) => format!("{word}*{size}"),
                    (false, "character") => format!("character(len={size})"),
                    (false, _) => format!("{word}(kind={size})"),
                }
            }
            TypeKind::String => {
                let len = ty.size()?;
                if f77 {
                    format!("character*{len}")
                } else {
                    format!("character(len={len})")
                }
            }
            TypeKind::Array => {
                let element = match ty.target()? {
                    Some(element) => self.fortran_type(element, level + 1)?,
                    None => "<unknown>".to_string(),
                };
                let dims = fortran_dims(&dimensions(ty)?);
                if f77 {
                    format!("{element} ({dims})")
                } else {
                    format!("{element}, dimension({dims})")
                }
            }
            TypeKind::Pointer | TypeKind::Reference => {
                let target = match ty.target()? {
                    Some(target) => self.fortran_type(target, level + 1)?,
                    None => "<unknown>".to_string(),
                };
                if ty.kind() == TypeKind::Pointer {
                    format!("{target}, pointer")
                } else {
                    target
                }
            }
            TypeKind::Struct | TypeKind::Class | TypeKind::Union => format!("type ({})", self.tag_name(ty.die())?),
            _ => simplify_type_name(&ty.name()?),
        })
    }

    fn fortran_derived(&self, ty: Type<'_>, indent: usize, level: usize) -> FerruleResult<String>
    {
        let name = self.tag_name(ty.die())?;
        if !self.show_contents || level > 0 {
            return Ok(format!("{}type ({name})", pad(indent)));
        }
        let mut out = format!("{}type {name}\n", pad(indent));
        for child in ty.children()? {
            if child.tag() == constants::DW_TAG_member {
                out.push_str(&self.variable(child, indent + 4, level + 1)?);
                out.push('\n');
            }
        }
        out.push_str(&format!("{}end type {name}", pad(indent)));
        Ok(out)
    }
}

/// `3, 0:4, :` style bound list
fn fortran_dims(dims: &[Dimension]) -> String
{
    dims.iter()
        .map(|dim| {
            if dim.lower == 1 {
                dim.upper.to_string()
            } else if dim.upper < dim.lower {
                ":".to_string()
            } else {
                format!("{}:{}", dim.lower, dim.upper)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
