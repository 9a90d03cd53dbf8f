//! Tests for error handling

use ferrule_core::error::{FerruleError, FerruleResult};
use ferrule_core::value::Value;

#[test]
fn test_memory_error_display()
{
    let error = FerruleError::memory(0x1000, "unmapped");
    let message = format!("{error}");
    assert!(message.contains("0x1000"));
    assert!(message.contains("unmapped"));
}

#[test]
fn test_symbol_not_found_display()
{
    let error = FerruleError::SymbolNotFound("foo".to_string());
    assert_eq!(error.to_string(), "No symbol \"foo\" in current context.");
}

#[test]
fn test_user_messages_are_passed_through()
{
    assert_eq!(FerruleError::eval("Division by zero").to_string(), "Division by zero");
    assert_eq!(FerruleError::syntax("A syntax error in expression").to_string(), "A syntax error in expression");
    assert_eq!(
        FerruleError::NotAnLvalue("Left operand of assignment is not an lvalue.".to_string()).to_string(),
        "Left operand of assignment is not an lvalue."
    );
}

#[test]
fn test_no_process_display()
{
    let message = FerruleError::NoProcess.to_string();
    assert!(message.contains("process"));
}

#[test]
fn test_conversion_error_converts()
{
    let error: FerruleError = Value::Str("abc".to_string()).as_integer().unwrap_err().into();
    assert!(matches!(error, FerruleError::Conversion(_)));
    assert_eq!(error.to_string(), "Cannot convert string value to integer");
}

#[test]
fn test_result_type()
{
    fn check(ok: bool) -> FerruleResult<u32>
    {
        if ok { Ok(42) } else { Err(FerruleError::NoProcess) }
    }

    assert_eq!(check(true).unwrap(), 42);
    assert_eq!(check(false).unwrap_err(), FerruleError::NoProcess);
}
