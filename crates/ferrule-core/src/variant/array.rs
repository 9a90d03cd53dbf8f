//! Array dimensions, element addressing and printing.
//!
//! C arrays are row-major with zero lower bounds; Fortran arrays are
//! column-major and default to a lower bound of one. Dimension bounds come
//! from the array's subrange children.

use gimli::constants;

use crate::context::EvalContext;
use crate::dwarf::AttrValue;
use crate::error::{FerruleError, FerruleResult};
use crate::format::escape_string;
use crate::value::Value;
use crate::variant::access::{load, Place};
use crate::variant::display::print_value;
use crate::variant::{synthetic, Type, TypeKind};

/// Bounds of one dimension, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension
{
    pub lower: i64,
    pub upper: i64,
}

impl Dimension
{
    /// Number of elements (0 for unbounded or empty dimensions)
    #[must_use]
    pub fn count(&self) -> usize
    {
        self.upper
            .checked_sub(self.lower)
            .and_then(|span| span.checked_add(1))
            .and_then(|count| usize::try_from(count).ok())
            .unwrap_or(0)
    }

    #[must_use]
    pub const fn contains(&self, index: i64) -> bool
    {
        index >= self.lower && index <= self.upper
    }
}

/// Dimensions of an array type, outermost first as declared
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn dimensions(ty: Type<'_>) -> FerruleResult<Vec<Dimension>>
{
    let array = ty.strip()?;
    if array.kind() != TypeKind::Array {
        return Ok(Vec::new());
    }
    let default_lower = if ty.language().is_fortran() { 1 } else { 0 };
    let mut dims = Vec::new();
    for child in array.children()? {
        if child.tag() != constants::DW_TAG_subrange_type {
            continue;
        }
        let lower = match child.attr(constants::DW_AT_lower_bound)? {
            Some(AttrValue::Int(v)) => v,
            _ => default_lower,
        };
        let upper = match (child.attr(constants::DW_AT_upper_bound)?, child.attr_int(constants::DW_AT_count)?) {
            (Some(AttrValue::Int(v)), _) => v,
            (_, Some(count)) => lower + count - 1,
            // flexible or runtime-sized
            _ => lower - 1,
        };
        dims.push(Dimension { lower, upper });
    }
    Ok(dims)
}

/// Whether the first dimension varies fastest
///
/// ## Errors
///
/// Propagates decoding failures.
pub fn is_column_major(ty: Type<'_>) -> FerruleResult<bool>
{
    let array = ty.strip()?;
    match array.die().attr_int(constants::DW_AT_ordering)? {
        Some(order) => Ok(order == i64::from(constants::DW_ORD_col_major.0)),
        None => Ok(ty.language().is_fortran()),
    }
}

/// Element type and byte stride of each dimension
fn layout<'u>(ty: Type<'u>, ctx: &EvalContext<'_>) -> FerruleResult<(Type<'u>, Vec<Dimension>, Vec<u64>)>
{
    let array = ty.strip()?;
    let element = array
        .target()?
        .ok_or_else(|| FerruleError::MalformedDebugInfo("array without element type".to_string()))?;
    let dims = dimensions(array)?;
    let element_size = element.real_size(ctx)? as u64;
    let mut strides = vec![element_size; dims.len()];
    if is_column_major(array)? {
        for i in 1..dims.len() {
            strides[i] = strides[i - 1] * dims[i - 1].count() as u64;
        }
    } else {
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1].count() as u64;
        }
    }
    Ok((element, dims, strides))
}

/// Address and type of `base[indices...]`
///
/// Fewer indices than dimensions yields a sub-array whose type keeps the
/// remaining dimensions.
///
/// ## Errors
///
/// Fails when more indices than dimensions are given.
#[allow(clippy::cast_sign_loss)]
pub fn element<'u>(ctx: &EvalContext<'_>, ty: Type<'u>, base: u64, indices: &[i64]) -> FerruleResult<(u64, Type<'u>)>
{
    let (element, dims, strides) = layout(ty, ctx)?;
    if indices.len() > dims.len() {
        return Err(FerruleError::eval(format!(
            "Too many subscripts for an array of {} dimensions",
            dims.len()
        )));
    }
    let mut addr = base;
    for (i, index) in indices.iter().enumerate() {
        let offset = (index - dims[i].lower).wrapping_mul(strides[i] as i64);
        addr = addr.wrapping_add(offset as u64);
    }
    if indices.len() == dims.len() {
        return Ok((addr, element));
    }
    let rest = &dims[indices.len()..];
    let sub = synthetic::array_of(ty.unit(), element, rest);
    Ok((addr, sub))
}

/// Values of `base[lo..=hi]` along the first dimension
///
/// Used for Fortran range subscripts; the result is a vector value.
///
/// ## Errors
///
/// Fails on unreadable memory.
#[allow(clippy::cast_sign_loss)]
pub fn slice(ctx: &EvalContext<'_>, ty: Type<'_>, base: u64, lo: i64, hi: i64) -> FerruleResult<Value>
{
    let mut values = Vec::new();
    for index in lo..=hi {
        let (addr, element) = element(ctx, ty, base, &[index])?;
        values.push(load(ctx, Some(element), Place::Memory(addr))?);
    }
    Ok(Value::Vector(values))
}

struct ArrayPrinter<'c, 'a, 'u>
{
    ctx: &'c mut EvalContext<'a>,
    element: Type<'u>,
    dims: Vec<Dimension>,
    strides: Vec<u64>,
    fortran: bool,
    remaining: usize,
    pretty: bool,
}

impl ArrayPrinter<'_, '_, '_>
{
    fn open(&self) -> char
    {
        if self.fortran {
            '('
        } else {
            '{'
        }
    }

    fn close(&self) -> char
    {
        if self.fortran {
            ')'
        } else {
            '}'
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn dimension(&mut self, out: &mut String, addr: u64, dim: usize, indent: usize) -> FerruleResult<()>
    {
        let last = dim + 1 == self.dims.len();
        let caps = self.element.capabilities()?;
        if last && caps.char {
            let count = self.dims[dim].count();
            let bytes = self.ctx.read_bytes(addr, count)?;
            out.push('"');
            out.push_str(&escape_string(&bytes, '"', &self.ctx.options));
            out.push('"');
            return Ok(());
        }

        out.push(self.open());
        let mut first = true;
        let mut previous: Option<Value> = None;
        let mut repeats = 0usize;
        let threshold = self.ctx.options.repeats;

        for i in 0..self.dims[dim].count() {
            let item = addr + i as u64 * self.strides[dim];
            if !last {
                if !first {
                    out.push_str(", ");
                }
                if self.pretty {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent + 4));
                }
                self.dimension(out, item, dim + 1, indent + 4)?;
                first = false;
                if self.remaining == 0 {
                    break;
                }
                continue;
            }

            let value = match load(self.ctx, Some(self.element), Place::Memory(item)) {
                Ok(value) => value,
                Err(err) => {
                    out.push_str(&format!("<{err}>"));
                    out.push(self.close());
                    return Ok(());
                }
            };
            if previous.as_ref() == Some(&value) {
                repeats += 1;
                continue;
            }
            self.flush(out, previous.as_ref(), &mut repeats, threshold, &mut first, indent)?;
            if self.remaining == 0 {
                out.push_str("...");
                previous = None;
                break;
            }
            self.remaining -= 1;
            if !first {
                out.push_str(", ");
            }
            let text = print_value(self.ctx, Some(self.element), &value, indent + 2)?;
            out.push_str(&text);
            first = false;
            previous = Some(value);
        }
        self.flush(out, previous.as_ref(), &mut repeats, threshold, &mut first, indent)?;
        if self.pretty && !last {
            out.push('\n');
            out.push_str(&" ".repeat(indent));
        }
        out.push(self.close());
        Ok(())
    }

    fn flush(
        &mut self,
        out: &mut String,
        previous: Option<&Value>,
        repeats: &mut usize,
        threshold: usize,
        first: &mut bool,
        indent: usize,
    ) -> FerruleResult<()>
    {
        let Some(previous) = previous else {
            return Ok(());
        };
        if *repeats == 0 {
            return Ok(());
        }
        if threshold > 0 && *repeats >= threshold {
            out.push_str(&format!(" <repeats {} times>", *repeats + 1));
        } else {
            for _ in 0..*repeats {
                if !*first {
                    out.push_str(", ");
                }
                let text = print_value(self.ctx, Some(self.element), previous, indent + 2)?;
                out.push_str(&text);
                *first = false;
            }
        }
        *repeats = 0;
        Ok(())
    }
}

/// Render the contents of an array stored at `addr`
///
/// Runs of equal elements longer than the repeat threshold collapse to
/// `<repeats N times>`; character arrays print as strings. An element that
/// cannot be read ends the dimension with the error in angle brackets.
///
/// ## Errors
///
/// Requires an active target.
pub fn print_array(ctx: &mut EvalContext<'_>, ty: Type<'_>, addr: u64, indent: usize) -> FerruleResult<String>
{
    ctx.target()?;
    if addr == 0 {
        return Ok("<omitted>".to_string());
    }
    let (element, mut dims, mut strides) = layout(ty, ctx)?;
    let fortran = ctx.language.is_fortran();
    if is_column_major(ty)? {
        // print the slowest-varying dimension outermost
        dims.reverse();
        strides.reverse();
    }
    if dims.is_empty() {
        return Ok(if fortran { "()" } else { "{}" }.to_string());
    }
    let remaining = if ctx.options.truncate_aggregates { 5 } else { ctx.options.max_elements };
    let pretty = ctx.options.pretty && ctx.options.pretty_arrays;
    let mut printer = ArrayPrinter {
        ctx,
        element,
        dims,
        strides,
        fortran,
        remaining,
        pretty,
    };
    let mut out = String::new();
    printer.dimension(&mut out, addr, 0, indent)?;
    Ok(out)
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::types::SourceLanguage;

    fn matrix(language: SourceLanguage) -> CompUnit
    {
        let mut b = UnitBuilder::new(language, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let arr = b.add(root, DW_TAG_array_type);
        b.set_ref(arr, DW_AT_type, int);
        let rows = b.add(arr, DW_TAG_subrange_type);
        b.set_int(rows, DW_AT_upper_bound, if language.is_fortran() { 2 } else { 1 });
        let cols = b.add(arr, DW_TAG_subrange_type);
        b.set_int(cols, DW_AT_upper_bound, if language.is_fortran() { 3 } else { 2 });
        CompUnit::new(b.build()).unwrap()
    }

    #[test]
    fn test_dimensions_default_lower_bound()
    {
        let unit = matrix(SourceLanguage::C);
        let arr = Type::new(unit.root().children().unwrap()[1]);
        assert_eq!(dimensions(arr).unwrap(), vec![Dimension { lower: 0, upper: 1 }, Dimension { lower: 0, upper: 2 }]);

        let unit = matrix(SourceLanguage::Fortran90);
        let arr = Type::new(unit.root().children().unwrap()[1]);
        assert_eq!(dimensions(arr).unwrap()[0], Dimension { lower: 1, upper: 2 });
    }

    #[test]
    fn test_dimension_count_saturates_to_empty()
    {
        assert_eq!(Dimension { lower: 1, upper: 3 }.count(), 3);
        assert_eq!(Dimension { lower: 2, upper: 1 }.count(), 0);
        assert_eq!(Dimension { lower: i64::MIN, upper: i64::MAX }.count(), 0);
    }

    #[test]
    fn test_row_major_element()
    {
        let unit = matrix(SourceLanguage::C);
        let ctx = EvalContext::new(&unit);
        let arr = Type::new(unit.root().children().unwrap()[1]);
        let (addr, ty) = element(&ctx, arr, 0x1000, &[1, 2]).unwrap();
        assert_eq!(addr, 0x1000 + (3 + 2) * 4);
        assert_eq!(ty.kind(), TypeKind::Base);
    }

    #[test]
    fn test_column_major_element()
    {
        let unit = matrix(SourceLanguage::Fortran90);
        let ctx = EvalContext::new(&unit);
        let arr = Type::new(unit.root().children().unwrap()[1]);
        // a(2, 3): (2-1) + (3-1)*2 elements
        let (addr, _) = element(&ctx, arr, 0x1000, &[2, 3]).unwrap();
        assert_eq!(addr, 0x1000 + 5 * 4);
    }

    #[test]
    fn test_partial_subscript_yields_subarray()
    {
        let unit = matrix(SourceLanguage::C);
        let ctx = EvalContext::new(&unit);
        let arr = Type::new(unit.root().children().unwrap()[1]);
        let (addr, sub) = element(&ctx, arr, 0x1000, &[1]).unwrap();
        assert_eq!(addr, 0x1000 + 12);
        assert_eq!(sub.kind(), TypeKind::Array);
        assert_eq!(dimensions(sub).unwrap(), vec![Dimension { lower: 0, upper: 2 }]);
    }
}
