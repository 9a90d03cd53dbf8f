//! Calling functions in the target.
//!
//! The callee is chosen among every function the call could name: overloads
//! of a global, methods of a class (with `this` bound), a function pointer,
//! or a C++ `operator()`. Arguments are marshalled to raw words and handed
//! to [`Target::call_function`](crate::target::Target::call_function); the
//! raw result is read back according to the declared return type.

use gimli::constants;
use tracing::{debug, trace};

use crate::context::EvalContext;
use crate::dwarf::{AttrValue, Die};
use crate::error::{FerruleError, FerruleResult};
use crate::expr::eval::{is_aggregate, is_plain_c, referent, static_type, Evaluator, Operand};
use crate::expr::Node;
use crate::format::truncate_to_size;
use crate::location::{self, Location};
use crate::lookup;
use crate::types::Address;
use crate::value::Value;
use crate::variant::access::Place;
use crate::variant::{declare, dynamic, member, Type, TypeKind};

/// One function a call may resolve to
#[derive(Debug, Clone, Copy)]
struct Callee<'a>
{
    /// Subprogram, or the subroutine type of a function pointer
    die: Die<'a>,
    /// Entry point when already known from a function value
    address: Option<u64>,
    /// Object a method is called on
    this: Option<u64>,
}

impl<'a> Callee<'a>
{
    fn function(die: Die<'a>) -> Self
    {
        Self {
            die,
            address: None,
            this: None,
        }
    }
}

/// Declared parameter types, and whether more arguments may follow
fn parameters(die: Die<'_>) -> FerruleResult<(Vec<Type<'_>>, bool)>
{
    let mut params = Vec::new();
    let mut variadic = false;
    for child in die.children()? {
        match child.tag() {
            constants::DW_TAG_formal_parameter if !child.is_artificial() => {
                if let Some(ty) = Type::of(child)? {
                    params.push(ty);
                }
            }
            constants::DW_TAG_unspecified_parameters => variadic = true,
            _ => {}
        }
    }
    Ok((params, variadic))
}

fn arity_fits(count: usize, params: &[Type<'_>], variadic: bool) -> bool
{
    count == params.len() || (variadic && count > params.len())
}

/// Whether an argument matches a parameter without conversion
fn exact(arg: &Operand<'_>, param: Type<'_>) -> FerruleResult<bool>
{
    match arg.ty {
        Some(ty) => ty.compatible(param),
        None if matches!(arg.value, Some(Value::Str(_))) => {
            let stripped = param.strip()?;
            match stripped.target()? {
                Some(element) if stripped.kind() == TypeKind::Pointer => Ok(element.capabilities()?.char),
                _ => Ok(false),
            }
        }
        None => Ok(false),
    }
}

fn callee_name(die: Die<'_>) -> String
{
    die.name().unwrap_or_else(|_| "function".to_string())
}

/// Pick the callee for `args`
///
/// A candidate whose parameters all match exactly wins; failing that the
/// first candidate taking that many arguments is used.
fn select<'a>(ev: &mut Evaluator<'_, 'a>, callees: Vec<Callee<'a>>, args: &[Operand<'a>]) -> FerruleResult<Callee<'a>>
{
    if let [only] = callees.as_slice() {
        let (params, variadic) = parameters(only.die)?;
        if args.len() < params.len() {
            return Err(FerruleError::eval("Too few arguments in function call."));
        }
        if !arity_fits(args.len(), &params, variadic) {
            return Err(FerruleError::eval("Too many arguments in function call."));
        }
        return Ok(*only);
    }

    let mut fallback = None;
    for callee in &callees {
        let (params, variadic) = parameters(callee.die)?;
        if !arity_fits(args.len(), &params, variadic) {
            continue;
        }
        let mut all_exact = true;
        for (arg, param) in args.iter().zip(&params) {
            if !exact(arg, *param)? {
                all_exact = false;
                break;
            }
        }
        if all_exact {
            return Ok(*callee);
        }
        fallback.get_or_insert(*callee);
    }
    if let Some(callee) = fallback {
        return Ok(callee);
    }

    let name = callees.first().map(|c| callee_name(c.die)).unwrap_or_default();
    for callee in &callees {
        let text = declare::declaration(ev.ctx, callee.die)?;
        ev.ctx.emit(&format!("{text}\n"));
    }
    Err(FerruleError::eval(format!("No matching function for call to {name}")))
}

/// Entry point of a virtual method, read from the object's vtable
#[allow(clippy::cast_sign_loss)]
fn virtual_address(ctx: &EvalContext<'_>, method: Die<'_>, this: u64) -> FerruleResult<Option<u64>>
{
    let slot = match method.attr(constants::DW_AT_vtable_elem_location)? {
        Some(AttrValue::Int(index)) => index as u64,
        Some(AttrValue::Block(bytes)) => match location::evaluate(ctx, &bytes, None)? {
            Location::Address(index) => index,
            Location::Value(index) => index as u64,
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };
    let Some(class) = method.parent() else {
        return Ok(None);
    };
    let Some(vtable) = dynamic::virtual_table(ctx, Type::new(class), this)? else {
        return Ok(None);
    };
    let size = ctx.address_size();
    Ok(Some(ctx.read_uint(vtable.wrapping_add(slot * size as u64), size)?))
}

/// Raw word passed for one argument
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn marshal<'a>(ev: &mut Evaluator<'_, 'a>, arg: &Operand<'a>, param: Option<Type<'a>>) -> FerruleResult<u64>
{
    if ev.language().is_fortran() {
        return by_reference(ev, arg, param);
    }
    let by_value_struct = || FerruleError::NotSupported("Passing structures by value is not supported".to_string());
    if let Some(param) = param {
        let stripped = param.strip()?;
        if stripped.kind() == TypeKind::Reference {
            return by_reference(ev, arg, stripped.target()?);
        }
        if stripped.kind().is_aggregate() {
            return Err(by_value_struct());
        }
    } else if is_aggregate(arg.ty)? {
        return Err(by_value_struct());
    }

    let value = ev.load(arg)?;
    if let Value::Str(text) = &value {
        return ev.push_string(text);
    }
    let value = match param {
        Some(param) => {
            let converted = ev.convert(Operand::constant(value, arg.ty), param)?;
            ev.load(&converted)?
        }
        None => value,
    };
    let single = match param {
        Some(param) => param.real_size(ev.ctx)? == 4,
        None => false,
    };
    Ok(match value {
        Value::Real(r) if single => u64::from((r as f32).to_bits()),
        Value::Real(r) => r.to_bits(),
        other => other.as_integer()? as u64,
    })
}

/// Address of the argument, copying it to scratch space when it has none
#[allow(clippy::cast_possible_wrap)]
fn by_reference<'a>(ev: &mut Evaluator<'_, 'a>, arg: &Operand<'a>, ty: Option<Type<'a>>) -> FerruleResult<u64>
{
    if let Some(addr) = arg.address() {
        return Ok(addr);
    }
    if let Some(Value::Str(text)) = &arg.value {
        return ev.push_string(text);
    }
    let Some(ty) = ty.or(arg.ty) else {
        return Err(FerruleError::eval("Cannot pass a value of unknown type by reference"));
    };
    let size = ty.real_size(ev.ctx)?;
    let addr = ev.scratch(size)?;
    ev.store(&Operand::stored(Place::Memory(addr), Some(ty)), arg)?;
    Ok(addr)
}

/// Interpret the raw result of a call
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn returned<'a>(ev: &Evaluator<'_, 'a>, ty: Option<Type<'a>>, raw: u64) -> FerruleResult<Operand<'a>>
{
    let Some(ty) = ty else {
        return Ok(Operand::constant(Value::None, None));
    };
    let stripped = ty.strip()?;
    if stripped.kind() == TypeKind::Reference {
        return ev.located(stripped.target()?, Place::Memory(raw));
    }
    let caps = stripped.capabilities()?;
    let size = stripped.real_size(ev.ctx)?;
    let value = if caps.real && size == 4 {
        Value::Real(f64::from(f32::from_bits(raw as u32)))
    } else if caps.real {
        Value::Real(f64::from_bits(raw))
    } else if caps.boolean {
        let set = truncate_to_size(raw as i64, size, false) != 0;
        if is_plain_c(ev.language()) {
            Value::Integer(i64::from(set))
        } else {
            Value::Bool(set)
        }
    } else {
        Value::Integer(truncate_to_size(raw as i64, size, caps.signed))
    };
    Ok(Operand::constant(value, Some(ty)))
}

fn invoke<'a>(ev: &mut Evaluator<'_, 'a>, callees: Vec<Callee<'a>>, args: &[Operand<'a>]) -> FerruleResult<Operand<'a>>
{
    let callee = select(ev, callees, args)?;
    let name = callee_name(callee.die);
    let (params, _) = parameters(callee.die)?;
    let result_ty = Type::of(callee.die)?;
    if is_aggregate(result_ty)? {
        return Err(FerruleError::NotSupported(
            "Calling functions that return structures by value is not supported".to_string(),
        ));
    }

    let address = match (callee.address, callee.this) {
        (Some(addr), _) => Some(addr),
        (None, Some(this)) => match virtual_address(ev.ctx, callee.die, this)? {
            Some(addr) => Some(addr),
            None => ev.function_address(callee.die)?,
        },
        (None, None) => ev.function_address(callee.die)?,
    };
    let address = address.ok_or_else(|| {
        FerruleError::eval("Cannot call this function - it may have been optimized out or inlined")
    })?;

    let mut raw = Vec::with_capacity(args.len() + 1);
    if let Some(this) = callee.this {
        raw.push(this);
    }
    for (i, arg) in args.iter().enumerate() {
        raw.push(marshal(ev, arg, params.get(i).copied())?);
    }

    debug!(function = %name, address, args = raw.len(), "calling function in target");
    let result = ev.ctx.target_mut()?.call_function(Address::new(address), &raw)?;
    trace!(function = %name, result, "function returned");
    returned(ev, result_ty, result)
}

fn is_subprogram(die: &Die<'_>) -> bool
{
    die.tag() == constants::DW_TAG_subprogram
}

/// Methods called `name` on `object`, with `this` adjusted to each one's class
fn methods<'a>(ev: &Evaluator<'_, 'a>, object: &Operand<'a>, name: &str) -> FerruleResult<Vec<Callee<'a>>>
{
    let Some(ty) = object.ty.map(Type::strip).transpose()?.filter(|t| t.kind().is_aggregate()) else {
        return Ok(Vec::new());
    };
    let found: Vec<_> = member::find_members(ty, name)?
        .into_iter()
        .filter(|res| is_subprogram(&res.member))
        .collect();
    if found.is_empty() {
        return Ok(Vec::new());
    }
    let Some(addr) = object.address() else {
        return Err(FerruleError::NotSupported(
            "Cannot call a method on a value not located in memory".to_string(),
        ));
    };
    found
        .iter()
        .map(|res| {
            Ok(Callee {
                die: res.member,
                address: None,
                this: Some(res.container_address(ev.ctx, addr)?),
            })
        })
        .collect()
}

/// Every function the callee expression may name
#[allow(clippy::cast_sign_loss)]
fn callees<'a>(ev: &mut Evaluator<'_, 'a>, function: &Node) -> FerruleResult<Vec<Callee<'a>>>
{
    let unit = ev.unit();
    match function {
        Node::Identifier(id) if is_subprogram(&unit.die(*id)) => return Ok(vec![Callee::function(unit.die(*id))]),
        Node::IdentifierSet(ids) => {
            let functions: Vec<_> = ids
                .iter()
                .map(|id| unit.die(*id))
                .filter(is_subprogram)
                .map(Callee::function)
                .collect();
            if !functions.is_empty() {
                return Ok(functions);
            }
        }
        Node::Member { object, name } => {
            let object = ev.operand(object)?;
            let found = methods(ev, &object, name)?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        _ => {}
    }

    let invalid = || FerruleError::eval("Invalid data type for function to be called.");
    let value = ev.loaded_operand(function)?;
    let Some(ty) = value.ty else {
        return Err(invalid());
    };
    let stripped = ty.strip()?;
    match stripped.kind() {
        TypeKind::Subroutine => Ok(vec![Callee {
            die: stripped.die(),
            address: Some(ev.address_value(&value)?),
            this: None,
        }]),
        TypeKind::Pointer => match stripped.target()?.map(Type::strip).transpose()? {
            Some(target) if target.kind() == TypeKind::Subroutine => Ok(vec![Callee {
                die: target.die(),
                address: Some(ev.address_value(&value)?),
                this: None,
            }]),
            _ => Err(invalid()),
        },
        kind if kind.is_aggregate() && ev.language().is_cplusplus() => {
            let found = methods(ev, &value, "operator()")?;
            if found.is_empty() {
                return Err(invalid());
            }
            Ok(found)
        }
        _ => Err(invalid()),
    }
}

/// Evaluate `function(args...)`
pub(crate) fn call<'a>(ev: &mut Evaluator<'_, 'a>, function: &Node, args: &[Node]) -> FerruleResult<Operand<'a>>
{
    let callees = callees(ev, function)?;
    let args = args
        .iter()
        .map(|arg| ev.loaded_operand(arg))
        .collect::<FerruleResult<Vec<_>>>()?;
    invoke(ev, callees, &args)
}

/// Call the C++ overload of `name` for `object`, if one exists
///
/// Member operators take `object` as `this`; free operators take it as the
/// first argument.
pub(crate) fn overloaded_operator<'a>(ev: &mut Evaluator<'_, 'a>, name: &str, object: &Operand<'a>, args: &[Operand<'a>]) -> FerruleResult<Option<Operand<'a>>>
{
    let found = methods(ev, object, name)?;
    if !found.is_empty() {
        return invoke(ev, found, args).map(Some);
    }
    let free: Vec<_> = lookup::lookup_symbol(ev.ctx, name)?
        .into_iter()
        .filter(is_subprogram)
        .map(Callee::function)
        .collect();
    if free.is_empty() {
        return Ok(None);
    }
    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(object.clone());
    all.extend_from_slice(args);
    invoke(ev, free, &all).map(Some)
}

/// Declared result type of calling `function`
pub(crate) fn return_type<'a>(ctx: &EvalContext<'a>, function: &Node) -> FerruleResult<Option<Type<'a>>>
{
    let Some(ty) = static_type(ctx, function)? else {
        return Ok(None);
    };
    let mut ty = ty.strip()?;
    if ty.kind() == TypeKind::Pointer {
        match ty.target()? {
            Some(target) => ty = target.strip()?,
            None => return Ok(None),
        }
    }
    match ty.kind() {
        TypeKind::Subroutine => ty.target()?.map(referent).transpose(),
        kind if kind.is_aggregate() => {
            let method = member::find_symbol(ty, "operator()")?.into_iter().find(is_subprogram);
            match method {
                Some(method) => Type::of(method)?.map(referent).transpose(),
                None => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;
    use pretty_assertions::assert_eq;

    use crate::context::EvalContext;
    use crate::dwarf::{CompUnit, UnitBuilder};
    use crate::error::FerruleError;
    use crate::expr::Expression;
    use crate::test_support::SparseTarget;
    use crate::types::{RegisterId, SourceLanguage};
    use crate::value::Value;

    /// `int add(int, int)`, `f(int)`, `f(double)`, `void reset(void)`,
    /// `int length(const char *)`, and `struct pair make(void)`
    fn unit() -> CompUnit
    {
        let mut b = UnitBuilder::new(SourceLanguage::CPlusPlus, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let dbl = b.add(root, DW_TAG_base_type);
        b.set_name(dbl, "double").set_int(dbl, DW_AT_byte_size, 8);
        b.set_int(dbl, DW_AT_encoding, i64::from(DW_ATE_float.0));
        let chr = b.add(root, DW_TAG_base_type);
        b.set_name(chr, "char").set_int(chr, DW_AT_byte_size, 1);
        b.set_int(chr, DW_AT_encoding, i64::from(DW_ATE_signed_char.0));
        let cstr = b.add(root, DW_TAG_pointer_type);
        b.set_ref(cstr, DW_AT_type, chr).set_int(cstr, DW_AT_byte_size, 8);
        let pair = b.add(root, DW_TAG_structure_type);
        b.set_name(pair, "pair").set_int(pair, DW_AT_byte_size, 8);

        let add = b.add(root, DW_TAG_subprogram);
        b.set_name(add, "add").set_ref(add, DW_AT_type, int).set_int(add, DW_AT_low_pc, 0x400);
        for name in ["a", "b"] {
            let param = b.add(add, DW_TAG_formal_parameter);
            b.set_name(param, name).set_ref(param, DW_AT_type, int);
        }
        for (ty, pc) in [(int, 0x500), (dbl, 0x600)] {
            let f = b.add(root, DW_TAG_subprogram);
            b.set_name(f, "f").set_ref(f, DW_AT_type, int).set_int(f, DW_AT_low_pc, pc);
            let param = b.add(f, DW_TAG_formal_parameter);
            b.set_ref(param, DW_AT_type, ty);
        }
        let reset = b.add(root, DW_TAG_subprogram);
        b.set_name(reset, "reset").set_int(reset, DW_AT_low_pc, 0x700);
        let length = b.add(root, DW_TAG_subprogram);
        b.set_name(length, "length").set_ref(length, DW_AT_type, int).set_int(length, DW_AT_low_pc, 0x800);
        let param = b.add(length, DW_TAG_formal_parameter);
        b.set_ref(param, DW_AT_type, cstr);
        let make = b.add(root, DW_TAG_subprogram);
        b.set_name(make, "make").set_ref(make, DW_AT_type, pair).set_int(make, DW_AT_low_pc, 0x900);
        CompUnit::new(b.build()).unwrap()
    }

    #[test]
    fn test_call_passes_arguments_and_reads_result()
    {
        let unit = unit();
        let mut target = SparseTarget::new();
        target.call_result = 5;
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let result = Expression::parse(&ctx, "add(2, 3)").unwrap().evaluate(&mut ctx).unwrap();
        assert_eq!(result.value, Value::Integer(5));
        assert_eq!(result.ty.unwrap().name().unwrap(), "int");
        drop(ctx);
        assert_eq!(target.calls, vec![(0x400, vec![2, 3])]);
    }

    #[test]
    fn test_overload_prefers_exact_parameter_types()
    {
        let unit = unit();
        let mut target = SparseTarget::new();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        Expression::parse(&ctx, "f(1.5)").unwrap().evaluate(&mut ctx).unwrap();
        Expression::parse(&ctx, "f(2)").unwrap().evaluate(&mut ctx).unwrap();
        drop(ctx);
        assert_eq!(target.calls[0], (0x600, vec![1.5f64.to_bits()]));
        assert_eq!(target.calls[1], (0x500, vec![2]));
    }

    #[test]
    fn test_argument_count_is_checked()
    {
        let unit = unit();
        let mut target = SparseTarget::new();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let err = Expression::parse(&ctx, "add(1)").unwrap().evaluate(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "Too few arguments in function call.");
        let err = Expression::parse(&ctx, "add(1, 2, 3)").unwrap().evaluate(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "Too many arguments in function call.");
        drop(ctx);
        assert!(target.calls.is_empty());
    }

    #[test]
    fn test_void_result_and_string_argument()
    {
        let unit = unit();
        let mut target = SparseTarget::new();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let result = Expression::parse(&ctx, "reset()").unwrap().evaluate(&mut ctx).unwrap();
        assert_eq!(result.value, Value::None);
        assert_eq!(result.ty, None);

        Expression::parse(&ctx, "length(\"abc\")").unwrap().evaluate(&mut ctx).unwrap();
        drop(ctx);
        let (function, args) = &target.calls[1];
        assert_eq!(*function, 0x800);
        assert_eq!(target.peek_u32(args[0]) & 0x00ff_ffff, u32::from_le_bytes(*b"abc\0"));
        assert_eq!(target.registers[&RegisterId::Sp], 0x8000);
    }

    #[test]
    fn test_struct_results_are_rejected()
    {
        let unit = unit();
        let mut target = SparseTarget::new();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        let err = Expression::parse(&ctx, "make()").unwrap().evaluate(&mut ctx).unwrap_err();
        assert!(matches!(err, FerruleError::NotSupported(_)));
    }

    #[test]
    fn test_return_type_is_static()
    {
        let unit = unit();
        let ctx = EvalContext::new(&unit);
        let expr = Expression::parse(&ctx, "add(1, 2)").unwrap();
        assert_eq!(expr.type_name(&ctx).unwrap(), "int");
    }
}
