//! # Runtime Values
//!
//! [`Value`] is the result of evaluating any expression node. The expression
//! language is untyped at the source level, so a value is a small tagged union
//! whose operators decide at runtime what an operation means.
//!
//! Conversions out of a value are explicit and fallible: asking an integer for
//! its string contents is a [`ConversionError`], never a reinterpretation of
//! the wrong payload.
//!
//! ## Operators
//!
//! - integer and boolean operands mix freely (booleans count as 0 or 1)
//! - integer and real operands promote to real
//! - `+` on two strings concatenates; comparisons work on strings
//! - vectors take part in no arithmetic
//! - any other pairing is `Invalid type combination`
//!
//! ## Example
//!
//! ```rust
//! use ferrule_core::value::Value;
//!
//! let sum = Value::Integer(2).add(&Value::Real(0.5)).unwrap();
//! assert_eq!(sum, Value::Real(2.5));
//! assert_eq!(Value::Integer(3).lt(&Value::Integer(4)).unwrap(), Value::Bool(true));
//! ```

use std::fmt;

use thiserror::Error;

use crate::error::{FerruleError, FerruleResult};

/// Tagged runtime value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value
{
    /// No value (void calls, failed lookups)
    #[default]
    None,
    /// 64-bit integer; also used for addresses
    Integer(i64),
    /// Double-precision real
    Real(f64),
    /// Character string
    Str(String),
    /// Boolean
    Bool(bool),
    /// Reference to a register, by DWARF number, holding the real value
    Register(u16),
    /// Ordered sequence of values (array slices, `{...}` literals)
    Vector(Vec<Value>),
}

/// A value was asked for a representation its tag does not carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cannot convert {found} value to {expected}")]
pub struct ConversionError
{
    /// Representation that was requested
    pub expected: &'static str,
    /// Tag the value actually holds
    pub found: &'static str,
}

impl Value
{
    /// Name of the value's tag, used in diagnostics
    #[must_use]
    pub const fn kind(&self) -> &'static str
    {
        match self {
            Value::None => "none",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Register(_) => "register",
            Value::Vector(_) => "vector",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ConversionError
    {
        ConversionError {
            expected,
            found: self.kind(),
        }
    }

    /// Integer payload; booleans convert to 0 or 1
    ///
    /// ## Errors
    ///
    /// Returns [`ConversionError`] for every other tag.
    pub fn as_integer(&self) -> Result<i64, ConversionError>
    {
        match self {
            Value::Integer(v) => Ok(*v),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Real payload
    ///
    /// ## Errors
    ///
    /// Returns [`ConversionError`] unless the value is a real.
    pub fn as_real(&self) -> Result<f64, ConversionError>
    {
        match self {
            Value::Real(v) => Ok(*v),
            other => Err(other.mismatch("real")),
        }
    }

    /// String payload
    ///
    /// ## Errors
    ///
    /// Returns [`ConversionError`] unless the value is a string.
    pub fn as_str(&self) -> Result<&str, ConversionError>
    {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// Boolean payload; integers convert by testing against zero
    ///
    /// ## Errors
    ///
    /// Returns [`ConversionError`] for every other tag.
    pub fn as_bool(&self) -> Result<bool, ConversionError>
    {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Integer(v) => Ok(*v != 0),
            other => Err(other.mismatch("boolean")),
        }
    }

    /// Vector payload
    ///
    /// ## Errors
    ///
    /// Returns [`ConversionError`] unless the value is a vector.
    pub fn as_vector(&self) -> Result<&[Value], ConversionError>
    {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(other.mismatch("vector")),
        }
    }

    /// Numeric payload widened to a real (integers and booleans promote)
    ///
    /// ## Errors
    ///
    /// Returns [`ConversionError`] for non-numeric tags.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_real(&self) -> Result<f64, ConversionError>
    {
        match self {
            Value::Real(v) => Ok(*v),
            Value::Integer(v) => Ok(*v as f64),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            other => Err(other.mismatch("real")),
        }
    }

    /// Whether the value is an integer or boolean
    #[must_use]
    pub const fn is_integral(&self) -> bool
    {
        matches!(self, Value::Integer(_) | Value::Bool(_))
    }

    /// Truth value used by `!`, `&&`, `||` and `?:`
    ///
    /// ## Errors
    ///
    /// Strings, vectors and registers have no truth value.
    pub fn truthy(&self) -> FerruleResult<bool>
    {
        match self {
            Value::Integer(v) => Ok(*v != 0),
            Value::Bool(b) => Ok(*b),
            Value::Real(r) => Ok(*r != 0.0),
            Value::Vector(_) => Err(FerruleError::eval("Invalid vector operation")),
            _ => Err(FerruleError::eval("Invalid string operation")),
        }
    }

    /// `+`
    ///
    /// ## Errors
    ///
    /// See the module documentation for the accepted operand pairs.
    pub fn add(&self, rhs: &Value) -> FerruleResult<Value>
    {
        if let (Value::Str(a), Value::Str(b)) = (self, rhs) {
            return Ok(Value::Str(format!("{a}{b}")));
        }
        arith(self, rhs, i64::wrapping_add, |a, b| a + b)
    }

    /// `-`
    ///
    /// ## Errors
    ///
    /// See the module documentation for the accepted operand pairs.
    pub fn sub(&self, rhs: &Value) -> FerruleResult<Value>
    {
        arith(self, rhs, i64::wrapping_sub, |a, b| a - b)
    }

    /// `*`
    ///
    /// ## Errors
    ///
    /// See the module documentation for the accepted operand pairs.
    pub fn mul(&self, rhs: &Value) -> FerruleResult<Value>
    {
        arith(self, rhs, i64::wrapping_mul, |a, b| a * b)
    }

    /// `/`
    ///
    /// ## Errors
    ///
    /// Integer division by zero is an error; real division follows IEEE.
    pub fn div(&self, rhs: &Value) -> FerruleResult<Value>
    {
        if self.is_integral() && rhs.is_integral() && rhs.as_integer()? == 0 {
            return Err(FerruleError::eval("Division by zero"));
        }
        arith(self, rhs, i64::wrapping_div, |a, b| a / b)
    }

    /// `%`
    ///
    /// ## Errors
    ///
    /// Only defined for integers; zero divisors are an error.
    pub fn rem(&self, rhs: &Value) -> FerruleResult<Value>
    {
        check_types(self, rhs)?;
        match (self, rhs) {
            (l, r) if l.is_integral() && r.is_integral() => {
                let divisor = r.as_integer()?;
                if divisor == 0 {
                    return Err(FerruleError::eval("Division by zero"));
                }
                Ok(Value::Integer(l.as_integer()?.wrapping_rem(divisor)))
            }
            (Value::Real(_), _) | (_, Value::Real(_)) => Err(FerruleError::eval("Invalid floating point operation")),
            _ => Err(invalid_operation(self)),
        }
    }

    /// `<`
    ///
    /// ## Errors
    ///
    /// Vectors cannot be compared.
    pub fn lt(&self, rhs: &Value) -> FerruleResult<Value>
    {
        compare(self, rhs, |o| o == std::cmp::Ordering::Less)
    }

    /// `>`
    ///
    /// ## Errors
    ///
    /// Vectors cannot be compared.
    pub fn gt(&self, rhs: &Value) -> FerruleResult<Value>
    {
        compare(self, rhs, |o| o == std::cmp::Ordering::Greater)
    }

    /// `<=`
    ///
    /// ## Errors
    ///
    /// Vectors cannot be compared.
    pub fn le(&self, rhs: &Value) -> FerruleResult<Value>
    {
        compare(self, rhs, |o| o != std::cmp::Ordering::Greater)
    }

    /// `>=`
    ///
    /// ## Errors
    ///
    /// Vectors cannot be compared.
    pub fn ge(&self, rhs: &Value) -> FerruleResult<Value>
    {
        compare(self, rhs, |o| o != std::cmp::Ordering::Less)
    }

    /// `==`
    ///
    /// ## Errors
    ///
    /// Vectors cannot be compared.
    pub fn equals(&self, rhs: &Value) -> FerruleResult<Value>
    {
        compare(self, rhs, |o| o == std::cmp::Ordering::Equal)
    }

    /// `!=`
    ///
    /// ## Errors
    ///
    /// Vectors cannot be compared.
    pub fn not_equals(&self, rhs: &Value) -> FerruleResult<Value>
    {
        compare(self, rhs, |o| o != std::cmp::Ordering::Equal)
    }

    /// `<<`
    ///
    /// ## Errors
    ///
    /// Both operands must be integral.
    pub fn shl(&self, rhs: &Value) -> FerruleResult<Value>
    {
        let (a, b) = integer_pair(self, rhs, "Invalid shift types")?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Value::Integer(a.wrapping_shl(b as u32)))
    }

    /// `>>` (arithmetic)
    ///
    /// ## Errors
    ///
    /// Both operands must be integral.
    pub fn shr(&self, rhs: &Value) -> FerruleResult<Value>
    {
        let (a, b) = integer_pair(self, rhs, "Invalid shift types")?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Value::Integer(a.wrapping_shr(b as u32)))
    }

    /// `&`
    ///
    /// ## Errors
    ///
    /// Both operands must be integral.
    pub fn bit_and(&self, rhs: &Value) -> FerruleResult<Value>
    {
        let (a, b) = integer_pair(self, rhs, "Invalid bit operation types")?;
        Ok(Value::Integer(a & b))
    }

    /// `|`
    ///
    /// ## Errors
    ///
    /// Both operands must be integral.
    pub fn bit_or(&self, rhs: &Value) -> FerruleResult<Value>
    {
        let (a, b) = integer_pair(self, rhs, "Invalid bit operation types")?;
        Ok(Value::Integer(a | b))
    }

    /// `^`
    ///
    /// ## Errors
    ///
    /// Both operands must be integral.
    pub fn bit_xor(&self, rhs: &Value) -> FerruleResult<Value>
    {
        let (a, b) = integer_pair(self, rhs, "Invalid bit operation types")?;
        Ok(Value::Integer(a ^ b))
    }

    /// Unary `-`
    ///
    /// ## Errors
    ///
    /// Only numbers can be negated.
    pub fn neg(&self) -> FerruleResult<Value>
    {
        match self {
            Value::Integer(_) | Value::Bool(_) => Ok(Value::Integer(self.as_integer()?.wrapping_neg())),
            Value::Real(r) => Ok(Value::Real(-r)),
            other => Err(invalid_operation(other)),
        }
    }

    /// Unary `~`
    ///
    /// ## Errors
    ///
    /// Only integers can be complemented.
    pub fn bit_not(&self) -> FerruleResult<Value>
    {
        match self {
            Value::Integer(_) | Value::Bool(_) => Ok(Value::Integer(!self.as_integer()?)),
            Value::Real(_) => Err(FerruleError::eval("Invalid floating point operation")),
            other => Err(invalid_operation(other)),
        }
    }

    /// Unary `!`
    ///
    /// ## Errors
    ///
    /// Strings and vectors have no truth value.
    pub fn logical_not(&self) -> FerruleResult<Value>
    {
        Ok(Value::Bool(!self.truthy()?))
    }
}

fn invalid_operation(value: &Value) -> FerruleError
{
    match value {
        Value::Vector(_) => FerruleError::eval("Invalid vector operation"),
        _ => FerruleError::eval("Invalid string operation"),
    }
}

fn check_types(lhs: &Value, rhs: &Value) -> FerruleResult<()>
{
    let numeric = |v: &Value| matches!(v, Value::Integer(_) | Value::Bool(_) | Value::Real(_));
    if (numeric(lhs) && numeric(rhs)) || std::mem::discriminant(lhs) == std::mem::discriminant(rhs) {
        Ok(())
    } else {
        Err(FerruleError::eval("Invalid type combination"))
    }
}

fn integer_pair(lhs: &Value, rhs: &Value, message: &str) -> FerruleResult<(i64, i64)>
{
    if !lhs.is_integral() || !rhs.is_integral() {
        return Err(FerruleError::eval(message));
    }
    Ok((lhs.as_integer()?, rhs.as_integer()?))
}

fn arith(lhs: &Value, rhs: &Value, int_op: fn(i64, i64) -> i64, real_op: fn(f64, f64) -> f64) -> FerruleResult<Value>
{
    check_types(lhs, rhs)?;
    if lhs.is_integral() && rhs.is_integral() {
        return Ok(Value::Integer(int_op(lhs.as_integer()?, rhs.as_integer()?)));
    }
    if matches!(lhs, Value::Real(_)) || matches!(rhs, Value::Real(_)) {
        return Ok(Value::Real(real_op(lhs.to_real()?, rhs.to_real()?)));
    }
    Err(invalid_operation(lhs))
}

fn compare(lhs: &Value, rhs: &Value, accept: fn(std::cmp::Ordering) -> bool) -> FerruleResult<Value>
{
    check_types(lhs, rhs)?;
    let ordering = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        (l, r) if l.is_integral() && r.is_integral() => l.as_integer()?.cmp(&r.as_integer()?),
        (Value::Vector(_), _) => return Err(FerruleError::eval("Invalid vector operation")),
        (Value::Register(a), Value::Register(b)) => a.cmp(b),
        (Value::None, Value::None) => std::cmp::Ordering::Equal,
        // NaN compares unordered; every predicate except != is false
        (l, r) => match l.to_real()?.partial_cmp(&r.to_real()?) {
            Some(ordering) => ordering,
            None => return Ok(Value::Bool(!accept(std::cmp::Ordering::Equal) && !accept(std::cmp::Ordering::Less))),
        },
    };
    Ok(Value::Bool(accept(ordering)))
}

impl From<i64> for Value
{
    fn from(v: i64) -> Self
    {
        Value::Integer(v)
    }
}

impl From<u64> for Value
{
    #[allow(clippy::cast_possible_wrap)]
    fn from(v: u64) -> Self
    {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value
{
    fn from(v: f64) -> Self
    {
        Value::Real(v)
    }
}

impl From<bool> for Value
{
    fn from(v: bool) -> Self
    {
        Value::Bool(v)
    }
}

impl From<String> for Value
{
    fn from(v: String) -> Self
    {
        Value::Str(v)
    }
}

impl From<&str> for Value
{
    fn from(v: &str) -> Self
    {
        Value::Str(v.to_string())
    }
}

impl From<Vec<Value>> for Value
{
    fn from(v: Vec<Value>) -> Self
    {
        Value::Vector(v)
    }
}

impl fmt::Display for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Value::None => write!(f, "none"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Bool(true) => write!(f, "on"),
            Value::Bool(false) => write!(f, "off"),
            Value::Register(r) => write!(f, "$r{r}"),
            Value::Vector(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_integer_real_promotion()
    {
        assert_eq!(Value::Integer(1).add(&Value::Real(1.5)).unwrap(), Value::Real(2.5));
        assert_eq!(Value::Real(3.0).mul(&Value::Integer(2)).unwrap(), Value::Real(6.0));
        assert_eq!(Value::Integer(7).div(&Value::Integer(2)).unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_bool_mixes_with_integer()
    {
        assert_eq!(Value::Bool(true).add(&Value::Integer(4)).unwrap(), Value::Integer(5));
        assert_eq!(Value::Integer(1).equals(&Value::Bool(true)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_string_concatenation_and_comparison()
    {
        let joined = Value::from("foo").add(&Value::from("bar")).unwrap();
        assert_eq!(joined, Value::from("foobar"));
        assert_eq!(Value::from("a").lt(&Value::from("b")).unwrap(), Value::Bool(true));
        assert!(Value::from("a").sub(&Value::from("b")).is_err());
    }

    #[test]
    fn test_invalid_type_combination()
    {
        let err = Value::Integer(1).add(&Value::from("x")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid type combination");
    }

    #[test]
    fn test_vector_arithmetic_is_rejected()
    {
        let v = Value::Vector(vec![Value::Integer(1)]);
        let err = v.add(&v).unwrap_err();
        assert_eq!(err.to_string(), "Invalid vector operation");
    }

    #[test]
    fn test_division_by_zero()
    {
        assert!(Value::Integer(1).div(&Value::Integer(0)).is_err());
        assert!(Value::Integer(1).rem(&Value::Integer(0)).is_err());
        assert_eq!(Value::Real(1.0).div(&Value::Real(0.0)).unwrap(), Value::Real(f64::INFINITY));
    }

    #[test]
    fn test_remainder_rejects_reals()
    {
        let err = Value::Real(1.0).rem(&Value::Real(2.0)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid floating point operation");
    }

    #[test]
    fn test_out_of_tag_conversions_fail()
    {
        assert_eq!(
            Value::Real(1.0).as_integer(),
            Err(ConversionError {
                expected: "integer",
                found: "real"
            })
        );
        assert!(Value::Integer(1).as_str().is_err());
        assert!(Value::None.as_bool().is_err());
        assert!(Value::Integer(1).as_real().is_err());
        assert_eq!(Value::Integer(1).to_real().unwrap(), 1.0);
    }

    #[test]
    fn test_shifts_and_bits()
    {
        assert_eq!(Value::Integer(1).shl(&Value::Integer(4)).unwrap(), Value::Integer(16));
        assert_eq!(Value::Integer(-16).shr(&Value::Integer(2)).unwrap(), Value::Integer(-4));
        assert_eq!(Value::Integer(6).bit_and(&Value::Integer(3)).unwrap(), Value::Integer(2));
        assert!(Value::Real(1.0).bit_or(&Value::Integer(1)).is_err());
    }

    #[test]
    fn test_display()
    {
        assert_eq!(Value::None.to_string(), "none");
        assert_eq!(Value::Bool(true).to_string(), "on");
        assert_eq!(
            Value::Vector(vec![Value::Integer(1), Value::from("a")]).to_string(),
            "{1, \"a\"}"
        );
    }

    proptest! {
        #[test]
        fn test_integer_round_trip(n in any::<i64>())
        {
            let value = Value::from(n);
            let native = value.as_integer().unwrap();
            prop_assert_eq!(Value::from(native), Value::Integer(n));
        }

        #[test]
        fn test_comparisons_agree_with_native(a in any::<i64>(), b in any::<i64>())
        {
            let (va, vb) = (Value::Integer(a), Value::Integer(b));
            prop_assert_eq!(va.lt(&vb).unwrap(), Value::Bool(a < b));
            prop_assert_eq!(va.ge(&vb).unwrap(), Value::Bool(a >= b));
            prop_assert_eq!(va.equals(&vb).unwrap(), Value::Bool(a == b));
        }
    }
}
