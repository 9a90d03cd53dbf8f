//! Tree-walking evaluation.
//!
//! Every node evaluates to an [`Operand`]: its static type, the storage it
//! designates when it is an lvalue, and its value once loaded. Loading is
//! deferred so assignment, `&` and member access work on the storage without
//! reading it first.
//!
//! String arguments, string casts and derived-type constructors need target
//! memory. It is reserved below the stack pointer and the stack pointer is put
//! back when the top-level evaluation finishes.

use gimli::constants;
use tracing::trace;

use crate::containers;
use crate::context::EvalContext;
use crate::dwarf::{CompUnit, Die, DieId};
use crate::error::{FerruleError, FerruleResult};
use crate::expr::parser::is_type_die;
use crate::expr::typespec::{fortran_kind_type, FortranBase};
use crate::expr::{call, intrinsic, BinaryOp, Node, Subscript, UnaryOp};
use crate::format::truncate_to_size;
use crate::location::{variable_location, Location};
use crate::types::{Address, RegisterId, SourceLanguage};
use crate::value::Value;
use crate::variant::access::{self, Place};
use crate::variant::{array, dynamic, member, synthetic, Dimension, Type, TypeKind};

/// Most elements an array section may gather
pub(crate) const MAX_SLICE_ELEMENTS: usize = 1 << 20;

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated<'a>
{
    pub value: Value,
    /// Static type; `None` for untyped results (strings, vectors, `void`)
    pub ty: Option<Type<'a>>,
    /// Storage of the result when it is an lvalue
    pub place: Option<Place>,
}

/// What an lvalue designates
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Storage
{
    Place(Place),
    /// `$pc`, `$sp` and `$fp`, which have no fixed DWARF number
    Register(RegisterId),
    /// Debugger convenience variable, without its `$`
    Variable(String),
}

/// Partially evaluated node
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Operand<'u>
{
    pub(crate) ty: Option<Type<'u>>,
    pub(crate) storage: Option<Storage>,
    pub(crate) value: Option<Value>,
}

impl<'u> Operand<'u>
{
    pub(crate) fn constant(value: Value, ty: Option<Type<'u>>) -> Self
    {
        Self {
            ty,
            storage: None,
            value: Some(value),
        }
    }

    pub(crate) fn stored(place: Place, ty: Option<Type<'u>>) -> Self
    {
        Self {
            ty,
            storage: Some(Storage::Place(place)),
            value: None,
        }
    }

    /// Address of the operand's storage, when it lives in memory
    pub(crate) fn address(&self) -> Option<u64>
    {
        match self.storage {
            Some(Storage::Place(Place::Memory(addr))) => Some(addr),
            _ => None,
        }
    }

    fn place(&self) -> Option<Place>
    {
        match self.storage {
            Some(Storage::Place(place)) => Some(place),
            _ => None,
        }
    }
}

/// Evaluate `node` to a value, restoring the stack pointer afterwards
pub(crate) fn evaluate<'a>(ctx: &mut EvalContext<'a>, node: &Node) -> FerruleResult<Evaluated<'a>>
{
    let mut ev = Evaluator::new(ctx);
    let result = ev.operand(node).and_then(|operand| {
        let value = ev.load(&operand)?;
        Ok(Evaluated {
            value,
            ty: operand.ty,
            place: operand.place(),
        })
    });
    let released = ev.release();
    let result = result?;
    released?;
    Ok(result)
}

pub(crate) struct Evaluator<'e, 'a>
{
    pub(crate) ctx: &'e mut EvalContext<'a>,
    /// Stack pointer before the first scratch allocation
    saved_sp: Option<u64>,
}

impl<'e, 'a> Evaluator<'e, 'a>
{
    pub(crate) fn new(ctx: &'e mut EvalContext<'a>) -> Self
    {
        Self { ctx, saved_sp: None }
    }

    pub(crate) fn unit(&self) -> &'a CompUnit
    {
        self.ctx.unit()
    }

    pub(crate) fn language(&self) -> SourceLanguage
    {
        self.ctx.language
    }

    /// Reserve `size` bytes of target stack for the rest of the evaluation
    pub(crate) fn scratch(&mut self, size: usize) -> FerruleResult<u64>
    {
        let arch = self.ctx.architecture();
        let target = self.ctx.target_mut()?;
        if self.saved_sp.is_none() {
            self.saved_sp = Some(target.read_register(RegisterId::Sp)?);
        }
        let addr = arch.stack_space(target, size as u64)?.value();
        trace!(size, address = addr, "reserved scratch stack space");
        Ok(addr)
    }

    /// Copy `text` with a terminating NUL to scratch space
    pub(crate) fn push_string(&mut self, text: &str) -> FerruleResult<u64>
    {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let addr = self.scratch(bytes.len())?;
        self.ctx.write_bytes(addr, &bytes)?;
        Ok(addr)
    }

    fn release(&mut self) -> FerruleResult<()>
    {
        match self.saved_sp.take() {
            Some(sp) => self.ctx.target_mut()?.write_register(RegisterId::Sp, sp),
            None => Ok(()),
        }
    }

    /// Evaluate `node` without loading it
    pub(crate) fn operand(&mut self, node: &Node) -> FerruleResult<Operand<'a>>
    {
        let unit = self.unit();
        match node {
            Node::IntConstant { value, size } => Ok(Operand::constant(Value::Integer(*value), Some(integer_type(unit, *size)))),
            Node::RealConstant { value, size } => Ok(Operand::constant(Value::Real(*value), Some(real_of_size(unit, *size)))),
            Node::CharConstant(byte) => Ok(Operand::constant(Value::Integer(i64::from(*byte)), Some(synthetic::char_type(unit)))),
            Node::StringConstant(text) => Ok(Operand::constant(Value::Str(text.clone()), None)),
            Node::LogicalConstant(value) => Ok(Operand::constant(Value::Bool(*value), Some(synthetic::bool_type(unit)))),
            Node::Identifier(id) => self.identifier(unit.die(*id)),
            Node::IdentifierSet(ids) => match ids.first() {
                Some(id) => self.identifier(unit.die(*id)),
                None => Err(FerruleError::eval("Empty overload set")),
            },
            Node::Intrinsic(intrinsic) => Err(FerruleError::eval(format!(
                "{} is an intrinsic function and needs arguments",
                intrinsic.name()
            ))),
            Node::Register { id, .. } => {
                let storage = match id {
                    RegisterId::Dwarf(number) => Storage::Place(Place::Register(*number)),
                    other => Storage::Register(*other),
                };
                Ok(Operand {
                    ty: Some(long_type(unit)),
                    storage: Some(storage),
                    value: None,
                })
            }
            Node::DebuggerVariable(name) => Ok(Operand {
                ty: None,
                storage: Some(Storage::Variable(name.strip_prefix('$').unwrap_or(name).to_string())),
                value: None,
            }),
            Node::Unary { op, operand } => self.unary(*op, operand),
            Node::Binary { op, left, right } => self.binary(*op, left, right),
            Node::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let branch = if self.value_of(condition)?.truthy()? { then } else { otherwise };
                self.operand(branch)
            }
            Node::Assign { op, target, value } => self.assign(*op, target, value),
            Node::Member { object, name } => self.member_access(object, name),
            Node::Array { array, subscripts } => self.subscript(array, subscripts),
            Node::Call { function, args } => call::call(self, function, args),
            Node::IntrinsicCall { intrinsic, args } => intrinsic::evaluate(self, *intrinsic, args),
            Node::Cast { ty, operand } => {
                let source = self.operand(operand)?;
                match ty {
                    Some(id) => self.convert(source, Type::new(unit.die(*id))),
                    None => {
                        self.load(&source)?;
                        Ok(Operand::constant(Value::None, None))
                    }
                }
            }
            Node::KindCast { operand, kind } => self.kind_cast(operand, kind),
            Node::SizeofType(ty) => {
                let size = match ty {
                    Some(id) => Type::new(unit.die(*id)).real_size(self.ctx)?,
                    None => 1,
                };
                Ok(size_operand(unit, size))
            }
            Node::SizeofExpr(inner) => {
                let size = match inner.as_ref() {
                    Node::StringConstant(text) => text.len() + 1,
                    other => match static_type(self.ctx, other)? {
                        Some(ty) => ty.real_size(self.ctx)?,
                        None => return Err(FerruleError::eval("Cannot take sizeof of void")),
                    },
                };
                Ok(size_operand(unit, size))
            }
            Node::Vector(items) => {
                let values = items.iter().map(|item| self.value_of(item)).collect::<FerruleResult<Vec<_>>>()?;
                Ok(Operand::constant(Value::Vector(values), None))
            }
            Node::Constructor { ty, values } => self.construct(*ty, values),
        }
    }

    /// Evaluate and load `node`
    pub(crate) fn value_of(&mut self, node: &Node) -> FerruleResult<Value>
    {
        let operand = self.operand(node)?;
        self.load(&operand)
    }

    /// Evaluate `node` and attach its loaded value
    pub(crate) fn loaded_operand(&mut self, node: &Node) -> FerruleResult<Operand<'a>>
    {
        let operand = self.operand(node)?;
        self.loaded(operand)
    }

    pub(crate) fn loaded(&self, mut operand: Operand<'a>) -> FerruleResult<Operand<'a>>
    {
        if operand.value.is_none() {
            operand.value = Some(self.load(&operand)?);
        }
        Ok(operand)
    }

    /// Value of an operand, reading its storage if needed
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn load(&self, operand: &Operand<'a>) -> FerruleResult<Value>
    {
        if let Some(value) = &operand.value {
            return Ok(value.clone());
        }
        match &operand.storage {
            Some(Storage::Place(place)) => access::load(self.ctx, operand.ty, *place),
            Some(Storage::Register(id)) => Ok(Value::Integer(self.ctx.target()?.read_register(*id)? as i64)),
            Some(Storage::Variable(key)) => match self.ctx.symbols().and_then(|target| target.debugger_variable(key)) {
                Some(value) => Ok(value),
                None if key.trim_start_matches('$').chars().all(|c| c.is_ascii_digit()) => {
                    Err(FerruleError::eval(format!("History has not yet reached ${key}.")))
                }
                None => Ok(Value::None),
            },
            None => Ok(Value::None),
        }
    }

    /// Loaded value of an address-valued operand
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn address_value(&self, operand: &Operand<'a>) -> FerruleResult<u64>
    {
        Ok(self.load(operand)?.as_integer()? as u64)
    }

    /// Operand for storage of type `ty`
    ///
    /// References are followed to their referent and class objects take
    /// their dynamic type.
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn located(&self, ty: Option<Type<'a>>, place: Place) -> FerruleResult<Operand<'a>>
    {
        let Some(declared) = ty else {
            return Ok(Operand::stored(place, None));
        };
        let stripped = declared.strip()?;
        if stripped.kind() == TypeKind::Reference {
            let referent = stripped.target()?;
            let addr = access::load(self.ctx, Some(stripped), place)?.as_integer()? as u64;
            return self.located(referent, Place::Memory(addr));
        }
        if stripped.kind().is_aggregate() {
            if let Place::Memory(addr) = place {
                return Ok(Operand::stored(place, Some(dynamic::dynamic_type(self.ctx, declared, addr))));
            }
        }
        Ok(Operand::stored(place, Some(declared)))
    }

    /// Entry address of a subprogram
    pub(crate) fn function_address(&self, die: Die<'a>) -> FerruleResult<Option<u64>>
    {
        if let Some(pc) = die.more_info().unwrap_or(die).attr_int(constants::DW_AT_low_pc)? {
            return Ok(Some(u64::try_from(pc).unwrap_or_default()));
        }
        let Some(target) = self.ctx.symbols() else {
            return Ok(None);
        };
        let name = die.symbol_name()?;
        let case_blind = self.ctx.language.is_case_blind();
        Ok(target
            .lookup_function(&name)
            .or_else(|| target.lookup_symbol(&name, case_blind))
            .map(Address::value))
    }

    fn symbol_address(&self, die: Die<'a>) -> FerruleResult<Option<u64>>
    {
        let Some(target) = self.ctx.symbols() else {
            return Ok(None);
        };
        let name = die.symbol_name()?;
        Ok(target
            .lookup_symbol(&name, self.ctx.language.is_case_blind())
            .map(Address::value))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn identifier(&self, die: Die<'a>) -> FerruleResult<Operand<'a>>
    {
        match die.tag() {
            constants::DW_TAG_enumerator => {
                let value = die.attr_int(constants::DW_AT_const_value)?.unwrap_or(0);
                Ok(Operand::constant(Value::Integer(value), die.parent().map(Type::new)))
            }
            constants::DW_TAG_subprogram => {
                let addr = self
                    .function_address(die)?
                    .ok_or_else(|| FerruleError::eval("Cannot evaluate function -- may be inlined"))?;
                Ok(Operand::constant(Value::Integer(addr as i64), Some(Type::new(die))))
            }
            _ if is_type_die(die) => Err(FerruleError::eval("Attempt to use a type name as an expression")),
            constants::DW_TAG_member if !die.is_declaration() => Err(FerruleError::eval(format!(
                "Cannot reference non-static field \"{}\"",
                die.name()?
            ))),
            constants::DW_TAG_member => {
                let place = member::member_place(self.ctx, die, 0)?;
                self.located(Type::of(die)?, place)
            }
            _ => self.variable(die),
        }
    }

    fn variable(&self, die: Die<'a>) -> FerruleResult<Operand<'a>>
    {
        let definition = die.more_info().unwrap_or(die);
        let ty = match Type::of(definition)? {
            Some(ty) => Some(ty),
            None => Type::of(die)?,
        };
        let place = match variable_location(self.ctx, definition)? {
            Location::Address(addr) => Place::Memory(addr),
            Location::Register(reg) => Place::Register(reg),
            Location::Value(value) => return Ok(Operand::constant(Value::Integer(value), ty)),
            Location::Empty => match self.symbol_address(die)? {
                Some(addr) => Place::Memory(addr),
                None => {
                    return Err(FerruleError::eval(format!("Value of {} has been optimized out", die.name()?)));
                }
            },
        };
        self.located(ty, place)
    }

    /// Boolean result in the language's truth representation
    pub(crate) fn truth(&self, value: bool) -> Operand<'a>
    {
        let unit = self.unit();
        let ty = truth_type(unit, self.language());
        if is_plain_c(self.language()) {
            Operand::constant(Value::Integer(i64::from(value)), Some(ty))
        } else {
            Operand::constant(Value::Bool(value), Some(ty))
        }
    }

    /// Attach `ty` to an arithmetic result, wrapping integers to its width
    fn typed(&self, value: Value, ty: Option<Type<'a>>) -> FerruleResult<Operand<'a>>
    {
        let Some(ty) = ty else {
            return Ok(Operand::constant(value, None));
        };
        let caps = ty.capabilities()?;
        match value {
            Value::Integer(v) if caps.integral || caps.pointer => {
                let size = ty.real_size(self.ctx)?;
                Ok(Operand::constant(Value::Integer(truncate_to_size(v, size, caps.signed)), Some(ty)))
            }
            Value::Real(r) if !caps.real => Ok(Operand::constant(Value::Real(r), Some(synthetic::real_type(self.unit())))),
            other => Ok(Operand::constant(other, Some(ty))),
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Node) -> FerruleResult<Operand<'a>>
    {
        let inner = self.operand(operand)?;
        match op {
            UnaryOp::Deref => self.deref(inner),
            UnaryOp::AddressOf => self.address_of(inner),
            UnaryOp::Not => {
                let truth = self.load(&inner)?.truthy()?;
                Ok(self.truth(!truth))
            }
            UnaryOp::Plus => {
                let value = self.load(&inner)?;
                let ty = promote(self.unit(), inner.ty, None)?;
                self.typed(value, ty)
            }
            UnaryOp::Neg => {
                let value = self.load(&inner)?.neg()?;
                let ty = promote(self.unit(), inner.ty, None)?;
                self.typed(value, ty)
            }
            UnaryOp::BitNot => {
                let value = self.load(&inner)?;
                if matches!(value, Value::Real(_)) {
                    return Err(FerruleError::eval("Illegal type for ~ operator"));
                }
                let ty = promote(self.unit(), inner.ty, None)?;
                self.typed(value.bit_not()?, ty)
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => self.increment(op, inner),
        }
    }

    /// `*operand`
    pub(crate) fn deref(&self, operand: Operand<'a>) -> FerruleResult<Operand<'a>>
    {
        let non_pointer = || FerruleError::eval("Attempt to take contents of a non-pointer value.");
        let Some(ty) = operand.ty else {
            return Err(non_pointer());
        };
        let ty = ty.strip()?;
        match ty.kind() {
            TypeKind::Pointer => {
                let Some(target) = ty.target()? else {
                    return Err(non_pointer());
                };
                let addr = self.address_value(&operand)?;
                if target.strip()?.kind() == TypeKind::Subroutine {
                    #[allow(clippy::cast_possible_wrap)]
                    let value = Value::Integer(addr as i64);
                    return Ok(Operand::constant(value, Some(target)));
                }
                self.located(Some(target), Place::Memory(addr))
            }
            TypeKind::Array => {
                let element = ty.target()?;
                let addr = self.address_value(&operand)?;
                self.located(element, Place::Memory(addr))
            }
            TypeKind::Subroutine => Ok(operand),
            _ if ty.capabilities()?.integral => {
                let addr = self.address_value(&operand)?;
                Ok(Operand::stored(Place::Memory(addr), Some(long_type(self.unit()))))
            }
            _ => Err(non_pointer()),
        }
    }

    /// `&operand`
    #[allow(clippy::cast_possible_wrap)]
    fn address_of(&self, operand: Operand<'a>) -> FerruleResult<Operand<'a>>
    {
        let unit = self.unit();
        if let Some(ty) = operand.ty {
            if ty.strip()?.kind() == TypeKind::Subroutine && operand.storage.is_none() {
                let value = self.load(&operand)?;
                return Ok(Operand::constant(value, Some(synthetic::pointer_to(unit, Some(ty)))));
            }
        }
        match operand.address() {
            Some(addr) => Ok(Operand::constant(
                Value::Integer(addr as i64),
                Some(synthetic::pointer_to(unit, operand.ty)),
            )),
            None => Err(FerruleError::NotAnLvalue(
                "Attempt to take address of value not located in memory.".to_string(),
            )),
        }
    }

    fn increment(&mut self, op: UnaryOp, target: Operand<'a>) -> FerruleResult<Operand<'a>>
    {
        let old = self.loaded(target.clone())?;
        let step = if matches!(op, UnaryOp::PreInc | UnaryOp::PostInc) {
            BinaryOp::Add
        } else {
            BinaryOp::Sub
        };
        let one = Operand::constant(Value::Integer(1), Some(synthetic::int_type(self.unit())));
        let updated = self.combine(step, &old, &one)?;
        self.store(&target, &updated)?;
        match op {
            UnaryOp::PreInc | UnaryOp::PreDec => Ok(target),
            _ => Ok(Operand::constant(old.value.unwrap_or_default(), old.ty)),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> FerruleResult<Operand<'a>>
    {
        match op {
            BinaryOp::LogAnd | BinaryOp::LogOr => {
                let first = self.value_of(left)?.truthy()?;
                // short circuit
                if first == (op == BinaryOp::LogOr) {
                    return Ok(self.truth(first));
                }
                let second = self.value_of(right)?.truthy()?;
                return Ok(self.truth(second));
            }
            BinaryOp::Comma => {
                self.value_of(left)?;
                return self.operand(right);
            }
            _ => {}
        }
        let lhs = self.operand(left)?;
        let rhs = self.operand(right)?;
        if self.language().is_cplusplus() && (is_aggregate(lhs.ty)? || is_aggregate(rhs.ty)?) {
            if let Some(name) = op.overload_name() {
                let rhs = self.loaded(rhs.clone())?;
                if let Some(result) = call::overloaded_operator(self, &name, &lhs, &[rhs])? {
                    return Ok(result);
                }
            }
        }
        let lhs = self.loaded(lhs)?;
        let rhs = self.loaded(rhs)?;
        self.combine(op, &lhs, &rhs)
    }

    /// Apply a binary operator to two loaded operands
    pub(crate) fn combine(&mut self, op: BinaryOp, lhs: &Operand<'a>, rhs: &Operand<'a>) -> FerruleResult<Operand<'a>>
    {
        let unit = self.unit();
        let lval = lhs.value.clone().unwrap_or_default();
        let rval = rhs.value.clone().unwrap_or_default();

        if let Some(result) = self.pointer_arithmetic(op, lhs, rhs, &lval, &rval)? {
            return Ok(result);
        }
        if op.is_comparison() && (self.is_text(lhs)? || self.is_text(rhs)?) {
            let (mut left, mut right) = (self.string_of(lhs)?, self.string_of(rhs)?);
            if self.language().is_fortran() {
                // blank padding is insignificant
                left.truncate(left.trim_end_matches(' ').len());
                right.truncate(right.trim_end_matches(' ').len());
            }
            let result = compare(op, &Value::Str(left), &Value::Str(right))?;
            return Ok(self.truth(result));
        }

        match op {
            BinaryOp::Equiv | BinaryOp::Nequiv => {
                let same = lval.truthy()? == rval.truthy()?;
                Ok(self.truth(same == (op == BinaryOp::Equiv)))
            }
            BinaryOp::Concat => {
                let text = self.string_of(lhs)? + &self.string_of(rhs)?;
                Ok(Operand::constant(Value::Str(text), None))
            }
            BinaryOp::Power => {
                let ty = promote(unit, lhs.ty, rhs.ty)?;
                self.typed(power(&lval, &rval)?, ty)
            }
            op if op.is_comparison() => {
                let result = compare(op, &lval, &rval)?;
                Ok(self.truth(result))
            }
            _ => {
                if op.needs_integers() && (matches!(lval, Value::Real(_)) || matches!(rval, Value::Real(_))) {
                    return Err(FerruleError::eval(format!("Illegal type for {} operator", op.symbol())));
                }
                let value = match op {
                    BinaryOp::Add => lval.add(&rval)?,
                    BinaryOp::Sub => lval.sub(&rval)?,
                    BinaryOp::Mul => lval.mul(&rval)?,
                    BinaryOp::Div => lval.div(&rval)?,
                    BinaryOp::Rem => lval.rem(&rval)?,
                    BinaryOp::Shl => lval.shl(&rval)?,
                    BinaryOp::Shr => lval.shr(&rval)?,
                    BinaryOp::BitAnd => lval.bit_and(&rval)?,
                    BinaryOp::BitOr => lval.bit_or(&rval)?,
                    BinaryOp::BitXor => lval.bit_xor(&rval)?,
                    other => {
                        return Err(FerruleError::eval(format!("Illegal use of {} operator", other.symbol())));
                    }
                };
                let ty = promote(unit, lhs.ty, rhs.ty)?;
                self.typed(value, ty)
            }
        }
    }

    /// `ptr + n`, `n + ptr`, `ptr - n` and `ptr - ptr`, scaled by the element size
    #[allow(clippy::cast_possible_wrap)]
    fn pointer_arithmetic(&self, op: BinaryOp, lhs: &Operand<'a>, rhs: &Operand<'a>, lval: &Value, rval: &Value) -> FerruleResult<Option<Operand<'a>>>
    {
        if !matches!(op, BinaryOp::Add | BinaryOp::Sub) {
            return Ok(None);
        }
        let unit = self.unit();
        let (left, right) = (pointee(unit, lhs.ty)?, pointee(unit, rhs.ty)?);
        if self.language().is_fortran() && (left.is_some() || right.is_some()) {
            return Err(FerruleError::NotSupported("Array arithmetic is not supported".to_string()));
        }
        let result = match (left, right) {
            (Some((_, element)), Some(_)) if op == BinaryOp::Sub => {
                let size = element_size(self.ctx, element)? as i64;
                let diff = lval.as_integer()?.wrapping_sub(rval.as_integer()?) / size;
                Operand::constant(Value::Integer(diff), Some(long_type(unit)))
            }
            (Some((pointer, element)), None) if rval.is_integral() => {
                let step = rval.as_integer()?.wrapping_mul(element_size(self.ctx, element)? as i64);
                let base = lval.as_integer()?;
                let value = if op == BinaryOp::Add {
                    base.wrapping_add(step)
                } else {
                    base.wrapping_sub(step)
                };
                Operand::constant(Value::Integer(value), Some(pointer))
            }
            (None, Some((pointer, element))) if op == BinaryOp::Add && lval.is_integral() => {
                let step = lval.as_integer()?.wrapping_mul(element_size(self.ctx, element)? as i64);
                Operand::constant(Value::Integer(rval.as_integer()?.wrapping_add(step)), Some(pointer))
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    /// Whether an operand takes part in comparisons as a character string
    fn is_text(&self, operand: &Operand<'a>) -> FerruleResult<bool>
    {
        if matches!(operand.value, Some(Value::Str(_))) {
            return Ok(true);
        }
        let Some(ty) = operand.ty else {
            return Ok(false);
        };
        let caps = ty.capabilities()?;
        Ok(caps.string || (caps.char && self.language().is_fortran()))
    }

    /// Contents of a string-like operand
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub(crate) fn string_of(&self, operand: &Operand<'a>) -> FerruleResult<String>
    {
        let not_text = || FerruleError::eval("Operand is not a character string");
        let value = self.load(operand)?;
        if let Value::Str(text) = value {
            return Ok(text);
        }
        let Some(ty) = operand.ty else {
            return Err(not_text());
        };
        let ty = ty.strip()?;
        let caps = ty.capabilities()?;
        let raw = value.as_integer()?;
        if caps.char {
            return Ok(char::from(raw as u8).to_string());
        }
        if caps.string {
            let bytes = self.ctx.read_bytes(raw as u64, ty.size()?)?;
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        let element_is_char = match ty.target()? {
            Some(element) => element.capabilities()?.char,
            None => false,
        };
        if element_is_char && caps.array {
            let bytes = self.ctx.read_bytes(raw as u64, ty.size()?)?;
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            return Ok(String::from_utf8_lossy(&bytes[..end]).into_owned());
        }
        if element_is_char && caps.pointer {
            return self.ctx.read_string(raw as u64);
        }
        Err(not_text())
    }

    fn assign(&mut self, op: Option<BinaryOp>, target: &Node, value: &Node) -> FerruleResult<Operand<'a>>
    {
        let source = self.loaded_operand(value)?;
        let destination = self.operand(target)?;
        let update = match op {
            None => source,
            Some(op) => {
                let current = self.loaded(destination.clone())?;
                self.combine(op, &current, &source)?
            }
        };
        self.store(&destination, &update)?;
        let ty = match destination.storage {
            Some(Storage::Variable(_)) => update.ty,
            _ => destination.ty,
        };
        Ok(Operand {
            ty,
            storage: destination.storage,
            value: None,
        })
    }

    /// Write `source` into the storage of `destination`
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn store(&mut self, destination: &Operand<'a>, source: &Operand<'a>) -> FerruleResult<()>
    {
        let not_lvalue = || FerruleError::NotAnLvalue("Left operand of assignment is not an lvalue.".to_string());
        let value = self.load(source)?;
        match &destination.storage {
            Some(Storage::Place(place)) => {
                let ty = destination.ty.ok_or_else(not_lvalue)?;
                let value = self.coerce(ty, source, value)?;
                access::store(self.ctx, ty, *place, &value)
            }
            Some(Storage::Register(id)) => {
                let bits = match value {
                    Value::Real(r) => r.to_bits(),
                    other => other.as_integer()? as u64,
                };
                self.ctx.target_mut()?.write_register(*id, bits)
            }
            Some(Storage::Variable(key)) => self.ctx.target_mut()?.set_debugger_variable(key, value),
            None => Err(not_lvalue()),
        }
    }

    /// Adjust a value about to be stored into `ty`
    #[allow(clippy::cast_possible_wrap)]
    fn coerce(&mut self, ty: Type<'a>, source: &Operand<'a>, value: Value) -> FerruleResult<Value>
    {
        let caps = ty.capabilities()?;
        if caps.pointer {
            if let Value::Str(text) = &value {
                return Ok(Value::Integer(self.push_string(text)? as i64));
            }
        }
        if (caps.string || caps.array) && !matches!(value, Value::Str(_)) && self.is_text(source)? {
            return Ok(Value::Str(self.string_of(source)?));
        }
        Ok(value)
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn member_access(&mut self, object: &Node, name: &str) -> FerruleResult<Operand<'a>>
    {
        let not_structure = || FerruleError::eval("Attempt to extract a component of a value that is not a structure.");
        let mut object = self.operand(object)?;
        if self.language().is_fortran() && kind_of(object.ty)? == Some(TypeKind::Pointer) {
            object = self.deref(object)?;
        }
        let Some(ty) = object.ty.map(Type::strip).transpose()?.filter(|t| t.kind().is_aggregate()) else {
            return Err(not_structure());
        };
        member::add_locations(ty)?;
        let Some(found) = member::find_member(ty, name)? else {
            return Err(FerruleError::eval(format!("There is no member named {name}.")));
        };
        if found.member.tag() == constants::DW_TAG_subprogram {
            let addr = self
                .function_address(found.member)?
                .ok_or_else(|| FerruleError::eval("Cannot evaluate function -- may be inlined"))?;
            return Ok(Operand::constant(Value::Integer(addr as i64), Some(Type::new(found.member))));
        }
        let member_ty = Type::of(found.member)?;
        match self.load(&object)? {
            Value::Integer(addr) => {
                let place = found.place(self.ctx, addr as u64)?;
                self.located(member_ty, place)
            }
            Value::Register(reg) => {
                // read-only: the register copy is discarded afterwards
                let size = ty.real_size(self.ctx)?;
                let (scratch, old_sp) = access::spill_register(self.ctx, reg, size)?;
                let loaded = found
                    .place(self.ctx, scratch)
                    .and_then(|place| access::load(self.ctx, member_ty, place));
                access::restore_stack(self.ctx, old_sp)?;
                Ok(Operand::constant(loaded?, member_ty))
            }
            _ => Err(not_structure()),
        }
    }

    fn index(&mut self, node: &Node) -> FerruleResult<i64>
    {
        let value = self.value_of(node)?;
        match value {
            Value::Integer(_) | Value::Bool(_) => Ok(value.as_integer()?),
            _ => Err(FerruleError::eval("Array subscript is not an integer")),
        }
    }

    fn bound(&mut self, node: Option<&Node>, default: i64) -> FerruleResult<i64>
    {
        match node {
            Some(node) => self.index(node),
            None => Ok(default),
        }
    }

    fn subscript(&mut self, array: &Node, subscripts: &[Subscript]) -> FerruleResult<Operand<'a>>
    {
        let fortran = self.language().is_fortran();
        let mut current = self.operand(array)?;
        let mut rest = subscripts;
        while let Some(first) = rest.first() {
            let Some(ty) = current.ty.map(Type::strip).transpose()? else {
                current = self.vector_element(&current, first)?;
                rest = &rest[1..];
                continue;
            };
            let caps = ty.capabilities()?;
            match ty.kind() {
                TypeKind::Array => {
                    let dims = array::dimensions(ty)?;
                    if dims.is_empty() {
                        return Err(FerruleError::MalformedDebugInfo("array type without dimensions".to_string()));
                    }
                    let (slots, tail) = rest.split_at(rest.len().min(dims.len()));
                    current = self.array_element(ty, &current, &dims, slots)?;
                    rest = tail;
                }
                TypeKind::String => {
                    current = self.substring(ty, &current, rest)?;
                    rest = &[];
                }
                TypeKind::Base if caps.char && fortran => {
                    current = self.substring(ty, &current, rest)?;
                    rest = &[];
                }
                TypeKind::Pointer if fortran => current = self.deref(current)?,
                TypeKind::Pointer => {
                    current = self.pointer_element(ty, &current, first)?;
                    rest = &rest[1..];
                }
                kind if kind.is_aggregate() => {
                    current = self.container_element(ty, current, first)?;
                    rest = &rest[1..];
                }
                _ => return Err(FerruleError::eval("Cannot subscript scalar variables")),
            }
        }
        Ok(current)
    }

    fn array_element(&mut self, ty: Type<'a>, current: &Operand<'a>, dims: &[Dimension], slots: &[Subscript]) -> FerruleResult<Operand<'a>>
    {
        let base = self.address_value(current)?;
        if slots.iter().all(|slot| matches!(slot, Subscript::Index(_))) {
            let mut indices = Vec::with_capacity(slots.len());
            for (slot, dim) in slots.iter().zip(dims) {
                let Subscript::Index(node) = slot else {
                    continue;
                };
                let index = self.index(node)?;
                if self.language().is_fortran() && dim.count() > 0 && !dim.contains(index) {
                    return Err(FerruleError::eval("no such vector element"));
                }
                indices.push(index);
            }
            let (addr, element) = array::element(self.ctx, ty, base, &indices)?;
            return self.located(Some(element), Place::Memory(addr));
        }

        let mut ranges = Vec::with_capacity(slots.len());
        for (slot, dim) in slots.iter().zip(dims) {
            let range = match slot {
                Subscript::Index(node) => {
                    let index = self.index(node)?;
                    (index, index)
                }
                Subscript::Range { lower, upper } => (self.bound(lower.as_ref(), dim.lower)?, self.bound(upper.as_ref(), dim.upper)?),
            };
            ranges.push(range);
        }
        if dims.len() == 1 {
            let (lo, hi) = ranges[0];
            check_section_size(section_length(lo, hi)?)?;
            return Ok(Operand::constant(array::slice(self.ctx, ty, base, lo, hi)?, None));
        }
        let mut total = 1usize;
        for (lo, hi) in &ranges {
            total = total.saturating_mul(section_length(*lo, *hi)?);
        }
        check_section_size(total)?;
        let mut values = Vec::with_capacity(total);
        if total > 0 {
            let order: Vec<usize> = if array::is_column_major(ty)? {
                (0..ranges.len()).collect()
            } else {
                (0..ranges.len()).rev().collect()
            };
            let mut position: Vec<i64> = ranges.iter().map(|(lo, _)| *lo).collect();
            loop {
                let (addr, element) = array::element(self.ctx, ty, base, &position)?;
                values.push(access::load(self.ctx, Some(element), Place::Memory(addr))?);
                let mut finished = true;
                for &d in &order {
                    if position[d] < ranges[d].1 {
                        position[d] += 1;
                        finished = false;
                        break;
                    }
                    position[d] = ranges[d].0;
                }
                if finished {
                    break;
                }
            }
        }
        Ok(Operand::constant(Value::Vector(values), None))
    }

    /// Character or substring of a Fortran string
    #[allow(clippy::cast_sign_loss)]
    fn substring(&mut self, ty: Type<'a>, current: &Operand<'a>, slots: &[Subscript]) -> FerruleResult<Operand<'a>>
    {
        if slots.len() > 1 {
            return Err(FerruleError::eval("Too many dimensions for string subscript operation"));
        }
        let unit = self.unit();
        let len = i64::try_from(ty.size()?).unwrap_or(0);
        let base = self.address_value(current)?;
        let check = |index: i64| {
            if (1..=len).contains(&index) {
                Ok(())
            } else {
                Err(FerruleError::eval(format!("Illegal array index: {index}")))
            }
        };
        match &slots[0] {
            Subscript::Index(node) => {
                let index = self.index(node)?;
                check(index)?;
                Ok(Operand::stored(Place::Memory(base.wrapping_add((index - 1) as u64)), Some(synthetic::char_type(unit))))
            }
            Subscript::Range { lower, upper } => {
                let lo = self.bound(lower.as_ref(), 1)?;
                let hi = self.bound(upper.as_ref(), len)?;
                if hi < lo {
                    return Ok(Operand::constant(Value::Str(String::new()), None));
                }
                check(lo)?;
                check(hi)?;
                let piece = synthetic::string_type(unit, (hi - lo + 1) as usize);
                Ok(Operand::stored(Place::Memory(base.wrapping_add((lo - 1) as u64)), Some(piece)))
            }
        }
    }

    /// `p[i]`, or `p[lo:hi]` gathered into a vector
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn pointer_element(&mut self, ty: Type<'a>, current: &Operand<'a>, slot: &Subscript) -> FerruleResult<Operand<'a>>
    {
        let Some(element) = ty.target()? else {
            return Err(FerruleError::eval("Cannot subscript a void type"));
        };
        let base = self.address_value(current)?;
        let size = element.real_size(self.ctx)? as i64;
        let at = |index: i64| base.wrapping_add(index.wrapping_mul(size) as u64);
        match slot {
            Subscript::Index(node) => {
                let index = self.index(node)?;
                self.located(Some(element), Place::Memory(at(index)))
            }
            Subscript::Range {
                lower: Some(lower),
                upper: Some(upper),
            } => {
                let (lo, hi) = (self.index(lower)?, self.index(upper)?);
                check_section_size(section_length(lo, hi)?)?;
                let values = (lo..=hi)
                    .map(|index| access::load(self.ctx, Some(element), Place::Memory(at(index))))
                    .collect::<FerruleResult<Vec<_>>>()?;
                Ok(Operand::constant(Value::Vector(values), None))
            }
            Subscript::Range { .. } => Err(FerruleError::eval("A range over a pointer needs both bounds")),
        }
    }

    /// Element of a recognised container, or a call to `operator[]`
    #[allow(clippy::cast_sign_loss)]
    fn container_element(&mut self, ty: Type<'a>, current: Operand<'a>, slot: &Subscript) -> FerruleResult<Operand<'a>>
    {
        let Subscript::Index(node) = slot else {
            return Err(FerruleError::eval("Cannot take a range of a structure"));
        };
        let index = self.loaded_operand(node)?;
        if let (Some(addr), Some(Value::Integer(i))) = (current.address(), &index.value) {
            if let Some((element_addr, element)) = containers::subscript(self.ctx, ty, addr, *i)? {
                return self.located(Some(element), Place::Memory(element_addr));
            }
        }
        if self.language().is_cplusplus() {
            if let Some(result) = call::overloaded_operator(self, "operator[]", &current, &[index])? {
                return Ok(result);
            }
        }
        Err(FerruleError::eval("Cannot subscript this struct - no operator[] defined"))
    }

    fn vector_element(&mut self, current: &Operand<'a>, slot: &Subscript) -> FerruleResult<Operand<'a>>
    {
        let items = match self.load(current)? {
            Value::Vector(items) => items,
            Value::None => return Err(FerruleError::eval("Cannot subscript a void type")),
            _ => return Err(FerruleError::eval("Cannot subscript scalar variables")),
        };
        let Subscript::Index(node) = slot else {
            return Err(FerruleError::eval("Cannot take a range of a vector value"));
        };
        let index = self.index(node)?;
        let item = usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i))
            .ok_or_else(|| FerruleError::eval(format!("Illegal array index: {index}")))?;
        Ok(Operand::constant(item.clone(), None))
    }

    /// Convert `source` to `target` as an explicit cast does
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub(crate) fn convert(&mut self, source: Operand<'a>, target: Type<'a>) -> FerruleResult<Operand<'a>>
    {
        let invalid = || FerruleError::eval("Invalid cast.");
        let caps = target.capabilities()?;
        if caps.by_address() {
            if let Some(addr) = source.address() {
                return Ok(Operand::stored(Place::Memory(addr), Some(target)));
            }
            return match self.load(&source)? {
                Value::Str(text) if caps.string || caps.array => {
                    let size = target.real_size(self.ctx)?;
                    let addr = self.scratch(size)?;
                    let mut bytes = text.into_bytes();
                    bytes.resize(size, if caps.string { b' ' } else { 0 });
                    self.ctx.write_bytes(addr, &bytes)?;
                    Ok(Operand::stored(Place::Memory(addr), Some(target)))
                }
                _ => Err(invalid()),
            };
        }

        let value = match self.load(&source)? {
            Value::Str(text) if caps.pointer => Value::Integer(self.push_string(&text)? as i64),
            Value::Str(_) | Value::Vector(_) | Value::None | Value::Register(_) => return Err(invalid()),
            other => other,
        };
        let converted = if caps.real {
            Value::Real(value.to_real()?)
        } else if caps.boolean && !is_plain_c(self.language()) {
            Value::Bool(value.truthy()?)
        } else if caps.boolean {
            Value::Integer(i64::from(value.truthy()?))
        } else {
            let raw = match value {
                Value::Real(r) => r as i64,
                other => other.as_integer()?,
            };
            Value::Integer(truncate_to_size(raw, target.real_size(self.ctx)?, caps.signed))
        };
        Ok(Operand::constant(converted, Some(target)))
    }

    /// Fortran `value_kind`
    fn kind_cast(&mut self, operand: &Node, kind: &Node) -> FerruleResult<Operand<'a>>
    {
        let Value::Integer(kind) = self.value_of(kind)? else {
            return Err(FerruleError::eval("Must use integer when doing KIND cast"));
        };
        let source = self.loaded_operand(operand)?;
        let Some(base) = kind_base(source.ty, source.value.as_ref())? else {
            return Ok(source);
        };
        let target = fortran_kind_type(self.unit(), base, kind)?;
        self.convert(source, target)
    }

    /// Fortran derived-type constructor, built in scratch space
    fn construct(&mut self, id: DieId, values: &[Node]) -> FerruleResult<Operand<'a>>
    {
        let ty = Type::new(self.unit().die(id));
        let members: Vec<Die<'a>> = ty
            .strip()?
            .children()?
            .into_iter()
            .filter(|child| child.tag() == constants::DW_TAG_member && !child.is_declaration())
            .collect();
        if values.len() > members.len() {
            return Err(FerruleError::eval("Too many values for type constructor"));
        }
        if values.len() < members.len() {
            return Err(FerruleError::eval("Insufficient values for type constructor"));
        }
        let sources = values
            .iter()
            .map(|node| self.loaded_operand(node))
            .collect::<FerruleResult<Vec<_>>>()?;

        let size = ty.real_size(self.ctx)?;
        let addr = self.scratch(size)?;
        self.ctx.write_bytes(addr, &vec![0; size])?;
        for (component, source) in members.iter().zip(&sources) {
            let Some(component_ty) = Type::of(*component)? else {
                continue;
            };
            let place = member::member_place(self.ctx, *component, addr)?;
            self.store(&Operand::stored(place, Some(component_ty)), source)?;
        }
        Ok(Operand::stored(Place::Memory(addr), Some(ty)))
    }
}

/// Elements in the inclusive range `lo..=hi`; empty when `hi < lo`
fn section_length(lo: i64, hi: i64) -> FerruleResult<usize>
{
    if hi < lo {
        return Ok(0);
    }
    hi.checked_sub(lo)
        .and_then(|span| span.checked_add(1))
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| FerruleError::eval(format!("Array section {lo}:{hi} is too large")))
}

fn check_section_size(count: usize) -> FerruleResult<()>
{
    if count > MAX_SLICE_ELEMENTS {
        return Err(FerruleError::eval(format!("Array section of {count} elements is too large")));
    }
    Ok(())
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> FerruleResult<bool>
{
    let result = match op {
        BinaryOp::Eq => left.equals(right)?,
        BinaryOp::Ne => left.not_equals(right)?,
        BinaryOp::Lt => left.lt(right)?,
        BinaryOp::Le => left.le(right)?,
        BinaryOp::Gt => left.gt(right)?,
        BinaryOp::Ge => left.ge(right)?,
        other => return Err(FerruleError::eval(format!("{} is not a comparison", other.symbol()))),
    };
    Ok(result.as_bool()?)
}

/// `base ** exponent`
///
/// Integer powers with a negative exponent follow integer division: only
/// bases of 1 and -1 give a non-zero result.
#[allow(clippy::cast_precision_loss)]
fn power(base: &Value, exponent: &Value) -> FerruleResult<Value>
{
    if base.is_integral() && exponent.is_integral() {
        let (b, e) = (base.as_integer()?, exponent.as_integer()?);
        if e < 0 {
            return match b {
                0 => Err(FerruleError::eval("Division by zero")),
                1 => Ok(Value::Integer(1)),
                -1 => Ok(Value::Integer(if e % 2 == 0 { 1 } else { -1 })),
                _ => Ok(Value::Integer(0)),
            };
        }
        return Ok(Value::Integer(b.wrapping_pow(u32::try_from(e).unwrap_or(u32::MAX))));
    }
    let b = base.to_real()?;
    let result = match exponent {
        Value::Integer(e) => match i32::try_from(*e) {
            Ok(e) => b.powi(e),
            Err(_) => b.powf(*e as f64),
        },
        other => b.powf(other.to_real()?),
    };
    Ok(Value::Real(result))
}

pub(crate) fn is_plain_c(language: SourceLanguage) -> bool
{
    !language.is_fortran() && !language.is_cplusplus()
}

pub(crate) fn is_aggregate(ty: Option<Type<'_>>) -> FerruleResult<bool>
{
    Ok(kind_of(ty)?.is_some_and(TypeKind::is_aggregate))
}

fn kind_of(ty: Option<Type<'_>>) -> FerruleResult<Option<TypeKind>>
{
    Ok(ty.map(Type::strip).transpose()?.map(Type::kind))
}

/// Referent of a reference type, or the type itself
pub(crate) fn referent(ty: Type<'_>) -> FerruleResult<Type<'_>>
{
    let stripped = ty.strip()?;
    if stripped.kind() == TypeKind::Reference {
        if let Some(target) = stripped.target()? {
            return Ok(target);
        }
    }
    Ok(ty)
}

/// Pointer type and element type of a pointer or (decayed) array
fn pointee<'u>(unit: &'u CompUnit, ty: Option<Type<'u>>) -> FerruleResult<Option<(Type<'u>, Option<Type<'u>>)>>
{
    let Some(ty) = ty else {
        return Ok(None);
    };
    let stripped = ty.strip()?;
    Ok(match stripped.kind() {
        TypeKind::Pointer => Some((ty, stripped.target()?)),
        TypeKind::Array => {
            let element = stripped.target()?;
            Some((synthetic::pointer_to(unit, element), element))
        }
        _ => None,
    })
}

/// Stride of pointer arithmetic; `void` and empty types step by one byte
fn element_size(ctx: &EvalContext<'_>, element: Option<Type<'_>>) -> FerruleResult<usize>
{
    match element {
        Some(ty) => Ok(ty.real_size(ctx)?.max(1)),
        None => Ok(1),
    }
}

fn integer_type(unit: &CompUnit, size: usize) -> Type<'_>
{
    if size <= 4 {
        return synthetic::int_type(unit);
    }
    let name = if unit.language().is_fortran() { "integer(kind=8)" } else { "long" };
    synthetic::base_type(unit, name, constants::DW_ATE_signed, 8)
}

fn real_of_size(unit: &CompUnit, size: usize) -> Type<'_>
{
    if size >= 8 {
        return synthetic::real_type(unit);
    }
    let name = if unit.language().is_fortran() { "real" } else { "float" };
    synthetic::base_type(unit, name, constants::DW_ATE_float, 4)
}

/// Signed integer of the address size
pub(crate) fn long_type(unit: &CompUnit) -> Type<'_>
{
    let size = usize::from(unit.address_size());
    if unit.language().is_fortran() {
        synthetic::base_type(unit, &format!("integer(kind={size})"), constants::DW_ATE_signed, size)
    } else {
        synthetic::base_type(unit, "long", constants::DW_ATE_signed, size)
    }
}

/// Type of `sizeof` results
pub(crate) fn size_type(unit: &CompUnit) -> Type<'_>
{
    synthetic::base_type(unit, "unsigned long", constants::DW_ATE_unsigned, usize::from(unit.address_size()))
}

#[allow(clippy::cast_possible_wrap)]
fn size_operand(unit: &CompUnit, size: usize) -> Operand<'_>
{
    Operand::constant(Value::Integer(size as i64), Some(size_type(unit)))
}

/// Type of comparison and logical results
pub(crate) fn truth_type(unit: &CompUnit, language: SourceLanguage) -> Type<'_>
{
    if is_plain_c(language) {
        synthetic::int_type(unit)
    } else {
        synthetic::bool_type(unit)
    }
}

/// Result type of an arithmetic operator
///
/// Reals win over integers and wider types over narrower ones; at equal
/// width an unsigned type wins. Anything narrower than `int`, and booleans,
/// characters and enumerations, promote to `int`.
pub(crate) fn promote<'u>(unit: &'u CompUnit, left: Option<Type<'u>>, right: Option<Type<'u>>) -> FerruleResult<Option<Type<'u>>>
{
    let mut best: Option<(Type<'u>, (bool, usize, bool))> = None;
    for ty in [left, right].into_iter().flatten() {
        let caps = ty.capabilities()?;
        if !(caps.integral || caps.real) {
            continue;
        }
        let size = ty.size()?;
        let small = caps.boolean || caps.char || caps.enumeration || size < 4;
        let candidate = if !caps.real && small {
            (synthetic::int_type(unit), (false, 4, false))
        } else {
            (ty, (caps.real, size, !caps.signed))
        };
        match best {
            Some((_, rank)) if rank >= candidate.1 => {}
            _ => best = Some(candidate),
        }
    }
    Ok(best.map(|(ty, _)| ty))
}

/// Fortran type family a kind cast of this operand selects; `None` keeps
/// character values unchanged
fn kind_base(ty: Option<Type<'_>>, value: Option<&Value>) -> FerruleResult<Option<FortranBase>>
{
    match value {
        Some(Value::Real(_)) => return Ok(Some(FortranBase::Real)),
        Some(Value::Bool(_)) => return Ok(Some(FortranBase::Logical)),
        Some(Value::Str(_)) => return Ok(None),
        _ => {}
    }
    if let Some(ty) = ty {
        let caps = ty.capabilities()?;
        if caps.complex {
            return Ok(Some(FortranBase::Complex));
        }
        if caps.real {
            return Ok(Some(FortranBase::Real));
        }
        if caps.boolean {
            return Ok(Some(FortranBase::Logical));
        }
        if caps.string || caps.char {
            return Ok(None);
        }
    }
    Ok(Some(FortranBase::Integer))
}

/// Type of `node` without evaluating it
///
/// `None` when the node is untyped (strings, vectors, debugger variables) or
/// its type depends on runtime values.
pub(crate) fn static_type<'a>(ctx: &EvalContext<'a>, node: &Node) -> FerruleResult<Option<Type<'a>>>
{
    let unit = ctx.unit();
    let ty = match node {
        Node::IntConstant { size, .. } => Some(integer_type(unit, *size)),
        Node::RealConstant { size, .. } => Some(real_of_size(unit, *size)),
        Node::CharConstant(_) => Some(synthetic::char_type(unit)),
        Node::LogicalConstant(_) => Some(synthetic::bool_type(unit)),
        Node::StringConstant(_) | Node::Intrinsic(_) | Node::DebuggerVariable(_) | Node::Vector(_) => None,
        Node::Identifier(id) => identifier_type(unit.die(*id))?,
        Node::IdentifierSet(ids) => ids.first().map(|id| Type::new(unit.die(*id))),
        Node::Register { .. } => Some(long_type(unit)),
        Node::Unary { op, operand } => {
            let inner = static_type(ctx, operand)?;
            match op {
                UnaryOp::Not => Some(truth_type(unit, ctx.language)),
                UnaryOp::AddressOf => Some(synthetic::pointer_to(unit, inner)),
                UnaryOp::Deref => deref_type(unit, inner)?,
                UnaryOp::Neg | UnaryOp::Plus | UnaryOp::BitNot => promote(unit, inner, None)?,
                UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => inner,
            }
        }
        Node::Binary { op, left, right } => binary_type(ctx, *op, left, right)?,
        Node::Conditional { then, .. } => static_type(ctx, then)?,
        Node::Assign { target, .. } => static_type(ctx, target)?,
        Node::Member { object, name } => member_type(ctx, object, name)?,
        Node::Array { array, subscripts } => subscript_type(ctx, array, subscripts)?,
        Node::Call { function, .. } => call::return_type(ctx, function)?,
        Node::IntrinsicCall { intrinsic, args } => intrinsic::static_type(ctx, *intrinsic, args)?,
        Node::Cast { ty, .. } => ty.map(|id| Type::new(unit.die(id))),
        Node::KindCast { operand, kind } => kind_cast_type(ctx, operand, kind)?,
        Node::SizeofType(_) | Node::SizeofExpr(_) => Some(size_type(unit)),
        Node::Constructor { ty, .. } => Some(Type::new(unit.die(*ty))),
    };
    Ok(ty)
}

fn identifier_type(die: Die<'_>) -> FerruleResult<Option<Type<'_>>>
{
    match die.tag() {
        constants::DW_TAG_enumerator => Ok(die.parent().map(Type::new)),
        constants::DW_TAG_subprogram => Ok(Some(Type::new(die))),
        _ if is_type_die(die) => Ok(Some(Type::new(die))),
        _ => {
            let definition = die.more_info().unwrap_or(die);
            let declared = match Type::of(definition)? {
                Some(ty) => Some(ty),
                None => Type::of(die)?,
            };
            declared.map(referent).transpose()
        }
    }
}

fn deref_type<'u>(unit: &'u CompUnit, ty: Option<Type<'u>>) -> FerruleResult<Option<Type<'u>>>
{
    let Some(ty) = ty else {
        return Ok(None);
    };
    let stripped = ty.strip()?;
    Ok(match stripped.kind() {
        TypeKind::Pointer | TypeKind::Array => stripped.target()?.map(referent).transpose()?,
        TypeKind::Subroutine => Some(ty),
        _ if stripped.capabilities()?.integral => Some(long_type(unit)),
        _ => None,
    })
}

fn binary_type<'a>(ctx: &EvalContext<'a>, op: BinaryOp, left: &Node, right: &Node) -> FerruleResult<Option<Type<'a>>>
{
    let unit = ctx.unit();
    if op.is_comparison() || matches!(op, BinaryOp::LogAnd | BinaryOp::LogOr | BinaryOp::Equiv | BinaryOp::Nequiv) {
        return Ok(Some(truth_type(unit, ctx.language)));
    }
    match op {
        BinaryOp::Comma => return static_type(ctx, right),
        BinaryOp::Concat => return Ok(None),
        _ => {}
    }
    let (l, r) = (static_type(ctx, left)?, static_type(ctx, right)?);
    if matches!(op, BinaryOp::Add | BinaryOp::Sub) && !ctx.language.is_fortran() {
        match (pointee(unit, l)?, pointee(unit, r)?) {
            (Some(_), Some(_)) if op == BinaryOp::Sub => return Ok(Some(long_type(unit))),
            (Some((pointer, _)), None) => return Ok(Some(pointer)),
            (None, Some((pointer, _))) if op == BinaryOp::Add => return Ok(Some(pointer)),
            _ => {}
        }
    }
    promote(unit, l, r)
}

fn member_type<'a>(ctx: &EvalContext<'a>, object: &Node, name: &str) -> FerruleResult<Option<Type<'a>>>
{
    let Some(ty) = static_type(ctx, object)? else {
        return Ok(None);
    };
    let mut ty = ty.strip()?;
    if ty.kind() == TypeKind::Pointer && ctx.language.is_fortran() {
        match ty.target()? {
            Some(target) => ty = target.strip()?,
            None => return Ok(None),
        }
    }
    if !ty.kind().is_aggregate() {
        return Ok(None);
    }
    match member::find_member(ty, name)? {
        Some(found) if found.member.tag() == constants::DW_TAG_subprogram => Ok(Some(Type::new(found.member))),
        Some(found) => Type::of(found.member)?.map(referent).transpose(),
        None => Ok(None),
    }
}

fn subscript_type<'a>(ctx: &EvalContext<'a>, array: &Node, subscripts: &[Subscript]) -> FerruleResult<Option<Type<'a>>>
{
    let unit = ctx.unit();
    let fortran = ctx.language.is_fortran();
    let mut current = static_type(ctx, array)?;
    let mut rest = subscripts;
    while let (Some(ty), Some(first)) = (current, rest.first()) {
        let stripped = ty.strip()?;
        match stripped.kind() {
            TypeKind::Array => {
                let dims = array::dimensions(stripped)?;
                let take = rest.len().min(dims.len().max(1));
                if rest[..take].iter().any(|slot| matches!(slot, Subscript::Range { .. })) {
                    return Ok(None);
                }
                let Some(element) = stripped.target()? else {
                    return Ok(None);
                };
                current = Some(if take < dims.len() {
                    synthetic::array_of(unit, element, &dims[take..])
                } else {
                    element
                });
                rest = &rest[take..];
            }
            TypeKind::String => return Ok(Some(substring_type(unit, stripped, first)?)),
            TypeKind::Base if fortran && stripped.capabilities()?.char => return Ok(Some(substring_type(unit, stripped, first)?)),
            TypeKind::Pointer if fortran => current = stripped.target()?,
            TypeKind::Pointer => {
                current = stripped.target()?.map(referent).transpose()?;
                rest = &rest[1..];
            }
            kind if kind.is_aggregate() => {
                let method = member::find_symbol(stripped, "operator[]")?
                    .into_iter()
                    .find(|die| die.tag() == constants::DW_TAG_subprogram);
                current = match method {
                    Some(method) => Type::of(method)?.map(referent).transpose()?,
                    None => None,
                };
                rest = &rest[1..];
            }
            _ => return Ok(None),
        }
    }
    Ok(current)
}

/// Type of `s(i)` or `s(lo:hi)` when the bounds are constants
fn substring_type<'u>(unit: &'u CompUnit, ty: Type<'u>, slot: &Subscript) -> FerruleResult<Type<'u>>
{
    let Subscript::Range { lower, upper } = slot else {
        return Ok(synthetic::char_type(unit));
    };
    let len = i64::try_from(ty.size()?).unwrap_or(0);
    let constant = |node: Option<&Node>, default: i64| match node {
        None => Some(default),
        Some(Node::IntConstant { value, .. }) => Some(*value),
        Some(_) => None,
    };
    match (constant(lower.as_ref(), 1), constant(upper.as_ref(), len)) {
        (Some(lo), Some(hi)) => match section_length(lo, hi) {
            Ok(count) if count > 0 => Ok(synthetic::string_type(unit, count)),
            _ => Ok(ty),
        },
        _ => Ok(ty),
    }
}

fn kind_cast_type<'a>(ctx: &EvalContext<'a>, operand: &Node, kind: &Node) -> FerruleResult<Option<Type<'a>>>
{
    let Node::IntConstant { value: kind, .. } = kind else {
        return Ok(None);
    };
    if matches!(operand, Node::StringConstant(_)) {
        return Ok(None);
    }
    let operand_ty = static_type(ctx, operand)?;
    match kind_base(operand_ty, None)? {
        Some(base) => Ok(Some(fortran_kind_type(ctx.unit(), base, *kind)?)),
        None => Ok(operand_ty),
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dwarf::UnitBuilder;
    use crate::expr::Expression;
    use crate::test_support::SparseTarget;

    /// `int x; int *p; struct S { int a; int b[3]; } s;` at fixed addresses
    fn c_unit(language: SourceLanguage) -> CompUnit
    {
        let mut b = UnitBuilder::new(language, 8);
        let root = b.root();
        let int = b.add(root, DW_TAG_base_type);
        b.set_name(int, "int").set_int(int, DW_AT_byte_size, 4);
        b.set_int(int, DW_AT_encoding, i64::from(DW_ATE_signed.0));
        let chr = b.add(root, DW_TAG_base_type);
        b.set_name(chr, "char").set_int(chr, DW_AT_byte_size, 1);
        b.set_int(chr, DW_AT_encoding, i64::from(DW_ATE_signed_char.0));
        let ptr = b.add(root, DW_TAG_pointer_type);
        b.set_ref(ptr, DW_AT_type, int).set_int(ptr, DW_AT_byte_size, 8);
        let arr = b.add(root, DW_TAG_array_type);
        b.set_ref(arr, DW_AT_type, int);
        let sub = b.add(arr, DW_TAG_subrange_type);
        b.set_int(sub, DW_AT_upper_bound, 2);
        let s = b.add(root, DW_TAG_structure_type);
        b.set_name(s, "S").set_int(s, DW_AT_byte_size, 16);
        let a = b.add(s, DW_TAG_member);
        b.set_name(a, "a").set_ref(a, DW_AT_type, int).set_int(a, DW_AT_data_member_location, 0);
        let m = b.add(s, DW_TAG_member);
        b.set_name(m, "b").set_ref(m, DW_AT_type, arr).set_int(m, DW_AT_data_member_location, 4);
        for (name, ty, addr) in [("x", int, 0x1000), ("p", ptr, 0x1008), ("s", s, 0x1100), ("c", chr, 0x1010)] {
            let var = b.add(root, DW_TAG_variable);
            b.set_name(var, name).set_ref(var, DW_AT_type, ty).set_int(var, DW_AT_location, addr);
        }
        CompUnit::new(b.build()).unwrap()
    }

    fn target() -> SparseTarget
    {
        let mut target = SparseTarget::new();
        target.poke_u32(0x1000, 5);
        target.poke_u64(0x1008, 0x2000);
        target.poke_u32(0x2000, 10);
        target.poke_u32(0x2004, 20);
        for (i, v) in [1u32, 2, 3, 4].iter().enumerate() {
            target.poke_u32(0x1100 + 4 * i as u64, *v);
        }
        target.poke(0x1010, b"A");
        target
    }

    fn run<'a>(ctx: &mut EvalContext<'a>, text: &str) -> FerruleResult<Evaluated<'a>>
    {
        Expression::parse(ctx, text)?.evaluate(ctx)
    }

    fn value(ctx: &mut EvalContext<'_>, text: &str) -> Value
    {
        run(ctx, text).unwrap().value
    }

    #[test]
    fn test_constant_arithmetic()
    {
        let unit = c_unit(SourceLanguage::C);
        let mut ctx = EvalContext::new(&unit);
        assert_eq!(value(&mut ctx, "7 / 2"), Value::Integer(3));
        assert_eq!(value(&mut ctx, "7 / 2.0"), Value::Real(3.5));
        assert_eq!(value(&mut ctx, "1 << 4 | 1"), Value::Integer(17));
        assert_eq!(value(&mut ctx, "2147483647 + 1"), Value::Integer(-2_147_483_648));
        assert_eq!(value(&mut ctx, "(1, 2)"), Value::Integer(2));
        assert_eq!(value(&mut ctx, "0 ? 10 : 20"), Value::Integer(20));

        let err = run(&mut ctx, "1.5 % 2").unwrap_err();
        assert_eq!(err.to_string(), "Illegal type for % operator");
        assert!(run(&mut ctx, "1 / 0").is_err());
    }

    #[test]
    fn test_truth_values_follow_the_language()
    {
        let unit = c_unit(SourceLanguage::C);
        let mut ctx = EvalContext::new(&unit);
        let result = run(&mut ctx, "1 < 2").unwrap();
        assert_eq!(result.value, Value::Integer(1));
        assert_eq!(result.ty.unwrap().name().unwrap(), "int");
        assert_eq!(value(&mut ctx, "!5"), Value::Integer(0));
        assert_eq!(value(&mut ctx, "0 && 1 / 0"), Value::Integer(0));

        let unit = c_unit(SourceLanguage::CPlusPlus);
        let mut ctx = EvalContext::new(&unit);
        let result = run(&mut ctx, "1 < 2").unwrap();
        assert_eq!(result.value, Value::Bool(true));
        assert_eq!(result.ty.unwrap().name().unwrap(), "bool");
    }

    #[test]
    fn test_variables_and_assignment()
    {
        let unit = c_unit(SourceLanguage::C);
        let mut target = target();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        assert_eq!(value(&mut ctx, "x * 2"), Value::Integer(10));
        let assigned = run(&mut ctx, "x = 7").unwrap();
        assert_eq!(assigned.value, Value::Integer(7));
        assert_eq!(assigned.place, Some(Place::Memory(0x1000)));
        assert_eq!(value(&mut ctx, "x += 3"), Value::Integer(10));
        assert_eq!(value(&mut ctx, "x++"), Value::Integer(10));
        assert_eq!(value(&mut ctx, "--x"), Value::Integer(10));
        assert_eq!(value(&mut ctx, "c"), Value::Integer(65));

        let err = run(&mut ctx, "3 = x").unwrap_err();
        assert!(matches!(err, FerruleError::NotAnLvalue(_)));
        drop(ctx);
        assert_eq!(target.peek_u32(0x1000), 10);
    }

    #[test]
    fn test_pointers()
    {
        let unit = c_unit(SourceLanguage::C);
        let mut target = target();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        assert_eq!(value(&mut ctx, "*p"), Value::Integer(10));
        assert_eq!(value(&mut ctx, "p[1]"), Value::Integer(20));
        assert_eq!(value(&mut ctx, "*(p + 1)"), Value::Integer(20));
        assert_eq!(value(&mut ctx, "(p + 1) - p"), Value::Integer(1));
        assert_eq!(value(&mut ctx, "&x"), Value::Integer(0x1000));
        assert_eq!(value(&mut ctx, "*&x"), Value::Integer(5));
        assert_eq!(value(&mut ctx, "s.b[1]"), Value::Integer(3));
        assert_eq!(value(&mut ctx, "*s.b"), Value::Integer(2));
        assert_eq!(value(&mut ctx, "p[0:1]"), Value::Vector(vec![Value::Integer(10), Value::Integer(20)]));

        let err = run(&mut ctx, "&3").unwrap_err();
        assert_eq!(err.to_string(), "Attempt to take address of value not located in memory.");
        let err = run(&mut ctx, "s.zz").unwrap_err();
        assert_eq!(err.to_string(), "There is no member named zz.");
        let err = run(&mut ctx, "x.a").unwrap_err();
        assert_eq!(err.to_string(), "Attempt to extract a component of a value that is not a structure.");
    }

    #[test]
    fn test_casts_and_sizeof()
    {
        let unit = c_unit(SourceLanguage::C);
        let mut target = target();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        assert_eq!(value(&mut ctx, "(char) 321"), Value::Integer(65));
        assert_eq!(value(&mut ctx, "(double) 3"), Value::Real(3.0));
        assert_eq!(value(&mut ctx, "(int) 2.9"), Value::Integer(2));
        assert_eq!(value(&mut ctx, "sizeof(int)"), Value::Integer(4));
        assert_eq!(value(&mut ctx, "sizeof s"), Value::Integer(16));
        assert_eq!(value(&mut ctx, "sizeof(void)"), Value::Integer(1));
        assert_eq!(value(&mut ctx, "sizeof \"abc\""), Value::Integer(4));
        assert_eq!(value(&mut ctx, "(void) x"), Value::None);

        let literal = run(&mut ctx, "(char *) \"hi\"").unwrap();
        let Value::Integer(addr) = literal.value else {
            panic!("expected an address");
        };
        assert!(addr < 0x8000);
        drop(ctx);
        assert_eq!(target.registers[&RegisterId::Sp], 0x8000);
    }

    #[test]
    fn test_debugger_variables()
    {
        let unit = c_unit(SourceLanguage::C);
        let mut target = target();
        let mut ctx = EvalContext::new(&unit).with_target(&mut target);
        assert_eq!(value(&mut ctx, "$unset"), Value::None);
        let err = run(&mut ctx, "$1").unwrap_err();
        assert_eq!(err.to_string(), "History has not yet reached $1.");
        assert_eq!(value(&mut ctx, "$count = 3"), Value::Integer(3));
        assert_eq!(value(&mut ctx, "$count + 1"), Value::Integer(4));
    }

    #[test]
    fn test_static_types()
    {
        let unit = c_unit(SourceLanguage::C);
        let ctx = EvalContext::new(&unit);
        let name = |text: &str| Expression::parse(&ctx, text).unwrap().type_name(&ctx).unwrap();
        assert_eq!(name("x + 1"), "int");
        assert_eq!(name("x + 1.0"), "double");
        assert_eq!(name("&x"), "int *");
        assert_eq!(name("s.b[0]"), "int");
        assert_eq!(name("p + 1"), "int *");
        assert_eq!(name("sizeof x"), "unsigned long");
    }

    #[test]
    fn test_integer_powers()
    {
        let pow = |b: i64, e: i64| power(&Value::Integer(b), &Value::Integer(e)).unwrap();
        assert_eq!(pow(2, 10), Value::Integer(1024));
        assert_eq!(pow(2, -1), Value::Integer(0));
        assert_eq!(pow(-1, -3), Value::Integer(-1));
        assert_eq!(pow(1, -5), Value::Integer(1));
        assert!(power(&Value::Integer(0), &Value::Integer(-1)).is_err());
        assert_eq!(power(&Value::Real(2.0), &Value::Integer(3)).unwrap(), Value::Real(8.0));
    }

    #[test]
    fn test_promotion()
    {
        let unit = c_unit(SourceLanguage::C);
        let chr = synthetic::char_type(&unit);
        let uint = synthetic::base_type(&unit, "unsigned int", DW_ATE_unsigned, 4);
        let int = synthetic::int_type(&unit);
        assert_eq!(promote(&unit, Some(chr), None).unwrap(), Some(int));
        assert_eq!(promote(&unit, Some(int), Some(uint)).unwrap(), Some(uint));
        assert_eq!(promote(&unit, None, None).unwrap(), None);
    }
}
