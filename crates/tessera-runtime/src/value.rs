//! Runtime value representation
//!
//! A [`Value`] is a 16-byte `#[repr(C)]` pair of a type tag and a 64-bit
//! payload. Native code reads and writes registers through this layout
//! directly, so the tag constants and field offsets are part of the
//! runtime ABI.

use std::fmt;
use std::mem::{offset_of, size_of};

use thiserror::Error;

use crate::bytecode::OpCode;

pub const TAG_NIL: u64 = 0;
pub const TAG_BOOLEAN: u64 = 1;
pub const TAG_INTEGER: u64 = 2;
pub const TAG_NUMBER: u64 = 3;
pub const TAG_FUNCTION: u64 = 4;

/// Size of one register slot in bytes
pub const VALUE_SIZE: usize = size_of::<Value>();
pub const VALUE_TAG_OFFSET: usize = offset_of!(Value, tag);
pub const VALUE_BITS_OFFSET: usize = offset_of!(Value, bits);

/// Index into a [`State`](crate::vm::State)'s function registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub u32);

/// Tagged runtime value
///
/// Equality is bitwise: two floats compare equal when their bit patterns
/// match, so NaN payloads and the sign of zero are observable. Language
/// level equality lives in the VM's arithmetic module.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    tag: u64,
    bits: u64,
}

/// Borrowed view of a value for matching
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Function(FunctionHandle),
}

impl Value {
    pub const NIL: Value = Value::from_raw(TAG_NIL, 0);
    pub const TRUE: Value = Value::from_raw(TAG_BOOLEAN, 1);
    pub const FALSE: Value = Value::from_raw(TAG_BOOLEAN, 0);

    pub const fn from_raw(tag: u64, bits: u64) -> Self {
        Value { tag, bits }
    }

    pub const fn boolean(b: bool) -> Self {
        Value::from_raw(TAG_BOOLEAN, b as u64)
    }

    pub const fn integer(i: i64) -> Self {
        Value::from_raw(TAG_INTEGER, i as u64)
    }

    pub fn number(n: f64) -> Self {
        Value::from_raw(TAG_NUMBER, n.to_bits())
    }

    pub const fn function(handle: FunctionHandle) -> Self {
        Value::from_raw(TAG_FUNCTION, handle.0 as u64)
    }

    pub const fn tag(self) -> u64 {
        self.tag
    }

    pub const fn bits(self) -> u64 {
        self.bits
    }

    /// Payload reinterpreted as an integer, whatever the tag
    pub const fn raw_int(self) -> i64 {
        self.bits as i64
    }

    /// Payload reinterpreted as a float, whatever the tag
    pub fn raw_float(self) -> f64 {
        f64::from_bits(self.bits)
    }

    pub fn kind(self) -> ValueKind {
        match self.tag {
            TAG_BOOLEAN => ValueKind::Boolean(self.bits != 0),
            TAG_INTEGER => ValueKind::Integer(self.raw_int()),
            TAG_NUMBER => ValueKind::Number(self.raw_float()),
            TAG_FUNCTION => ValueKind::Function(FunctionHandle(self.bits as u32)),
            _ => ValueKind::Nil,
        }
    }

    pub const fn is_nil(self) -> bool {
        self.tag == TAG_NIL
    }

    pub const fn is_integer(self) -> bool {
        self.tag == TAG_INTEGER
    }

    pub const fn is_float(self) -> bool {
        self.tag == TAG_NUMBER
    }

    pub const fn is_number(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// `nil` and `false` are falsy; everything else is truthy
    pub const fn is_falsy(self) -> bool {
        self.tag == TAG_NIL || (self.tag == TAG_BOOLEAN && self.bits == 0)
    }

    pub const fn is_truthy(self) -> bool {
        !self.is_falsy()
    }

    pub fn as_integer(self) -> Option<i64> {
        self.is_integer().then(|| self.raw_int())
    }

    pub fn as_float(self) -> Option<f64> {
        self.is_float().then(|| self.raw_float())
    }

    pub fn as_bool(self) -> Option<bool> {
        (self.tag == TAG_BOOLEAN).then_some(self.bits != 0)
    }

    pub fn as_function(self) -> Option<FunctionHandle> {
        (self.tag == TAG_FUNCTION).then_some(FunctionHandle(self.bits as u32))
    }

    /// Numeric value as a float, converting integers
    pub fn to_number(self) -> Option<f64> {
        match self.kind() {
            ValueKind::Integer(i) => Some(i as f64),
            ValueKind::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Numeric value as an integer when it has an exact integer representation
    pub fn to_integer(self) -> Option<i64> {
        match self.kind() {
            ValueKind::Integer(i) => Some(i),
            ValueKind::Number(n) => float_to_integer(n),
            _ => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self.kind() {
            ValueKind::Nil => "nil",
            ValueKind::Boolean(_) => "boolean",
            ValueKind::Integer(_) | ValueKind::Number(_) => "number",
            ValueKind::Function(_) => "function",
        }
    }
}

/// Exact float to integer conversion; `None` for fractions and out-of-range values
pub fn float_to_integer(n: f64) -> Option<i64> {
    // -2^63 is exact; 2^63 is the first value past i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if n.fract() == 0.0 && n >= -LIMIT && n < LIMIT {
        Some(n as i64)
    } else {
        None
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NIL
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Nil => write!(f, "nil"),
            ValueKind::Boolean(b) => write!(f, "{}", b),
            ValueKind::Integer(i) => write!(f, "{}", i),
            ValueKind::Number(n) => {
                // Floats keep a fractional part so they read differently from integers
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            ValueKind::Function(handle) => write!(f, "<function {}>", handle.0),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Number(n) => write!(f, "Number({:?}, {:#018x})", n, self.bits),
            ValueKind::Integer(i) => write!(f, "Integer({})", i),
            _ => write!(f, "{}", self),
        }
    }
}

/// Runtime errors
///
/// Raised by the interpreter, the runtime entry points called from native
/// code, and host functions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    /// Arithmetic on a non-number
    #[error("attempt to perform arithmetic on a {type_name} value")]
    ArithmeticOnNonNumber { type_name: &'static str },

    /// Bitwise operand without an integer representation
    #[error("number has no integer representation")]
    NoIntegerRepresentation,

    /// Integer division or modulo by zero
    #[error("attempt to perform 'n{op}0'")]
    IntegerDivideByZero { op: &'static str },

    /// Ordering comparison between incompatible values
    #[error("attempt to compare {lhs} with {rhs}")]
    InvalidComparison {
        lhs: &'static str,
        rhs: &'static str,
    },

    /// Non-numeric numeric-for control value
    #[error("'for' {what} must be a number")]
    ForLoopNotNumber { what: &'static str },

    /// Call target is not a function
    #[error("attempt to call a {type_name} value")]
    CallNonFunction { type_name: &'static str },

    /// Function value refers to no registered function
    #[error("invalid function handle {0}")]
    InvalidFunction(u32),

    /// Call depth or stack size limit exceeded
    #[error("stack overflow")]
    StackOverflow,

    /// Opcode the interpreter does not execute
    #[error("unsupported opcode {op} at pc {pc}")]
    UnsupportedOpcode { op: OpCode, pc: usize },

    /// Word that does not decode to a valid instruction
    #[error("malformed instruction at pc {pc}")]
    MalformedInstruction { pc: usize },

    /// Execution requested without an active frame
    #[error("no active call frame")]
    NoActiveFrame,

    /// Native code reported a fault without recording an error
    #[error("native code failed with status {status}")]
    NativeFault { status: i32 },

    /// Error raised by a host function
    #[error("{0}")]
    Host(String),

    /// Host function panicked
    #[error("host function '{function}' panicked: {message}")]
    HostPanic { function: String, message: String },

    /// Runtime entry point panicked while native code was running
    #[error("runtime panicked: {0}")]
    Panic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(VALUE_SIZE, 16);
        assert_eq!(VALUE_TAG_OFFSET, 0);
        assert_eq!(VALUE_BITS_OFFSET, 8);
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::NIL.is_falsy());
        assert!(Value::FALSE.is_falsy());
        assert!(Value::TRUE.is_truthy());
        assert!(Value::integer(0).is_truthy());
        assert!(Value::number(0.0).is_truthy());
    }

    #[test]
    fn test_bitwise_equality() {
        assert_ne!(Value::number(0.0), Value::number(-0.0));
        assert_eq!(Value::number(f64::NAN), Value::number(f64::NAN));
        assert_ne!(Value::integer(1), Value::number(1.0));
    }

    #[test]
    fn test_float_to_integer() {
        assert_eq!(float_to_integer(3.0), Some(3));
        assert_eq!(float_to_integer(3.5), None);
        assert_eq!(float_to_integer(-9_223_372_036_854_775_808.0), Some(i64::MIN));
        assert_eq!(float_to_integer(9_223_372_036_854_775_808.0), None);
        assert_eq!(float_to_integer(f64::NAN), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::integer(42).to_string(), "42");
        assert_eq!(Value::number(2.0).to_string(), "2.0");
        assert_eq!(Value::number(0.5).to_string(), "0.5");
        assert_eq!(Value::NIL.to_string(), "nil");
    }
}
