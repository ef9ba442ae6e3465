//! Dynamically typed arithmetic, comparison and numeric-for semantics
//!
//! Shared by the interpreter and by the runtime entry points that native
//! code calls for generic operations, so both execution paths compute
//! identical results.

use crate::bytecode::{ArithOp, ArithSpec, CompareOp, CompareSpec, NumKind, OpCode};
use crate::value::{float_to_integer, RuntimeError, Value, ValueKind};

/// Generic binary and unary operators, numbered for the native ABI
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Mod = 3,
    Pow = 4,
    Div = 5,
    IDiv = 6,
    BAnd = 7,
    BOr = 8,
    BXor = 9,
    Shl = 10,
    Shr = 11,
    Unm = 12,
    BNot = 13,
}

impl Operator {
    pub fn from_opcode(op: OpCode) -> Option<Self> {
        let operator = match op {
            OpCode::Add => Operator::Add,
            OpCode::Sub => Operator::Sub,
            OpCode::Mul => Operator::Mul,
            OpCode::Mod => Operator::Mod,
            OpCode::Pow => Operator::Pow,
            OpCode::Div => Operator::Div,
            OpCode::IDiv => Operator::IDiv,
            OpCode::BAnd => Operator::BAnd,
            OpCode::BOr => Operator::BOr,
            OpCode::BXor => Operator::BXor,
            OpCode::Shl => Operator::Shl,
            OpCode::Shr => Operator::Shr,
            OpCode::Unm => Operator::Unm,
            OpCode::BNot => Operator::BNot,
            _ => return None,
        };
        Some(operator)
    }

    pub const fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        const ALL: [Operator; 14] = [
            Operator::Add,
            Operator::Sub,
            Operator::Mul,
            Operator::Mod,
            Operator::Pow,
            Operator::Div,
            Operator::IDiv,
            Operator::BAnd,
            Operator::BOr,
            Operator::BXor,
            Operator::Shl,
            Operator::Shr,
            Operator::Unm,
            Operator::BNot,
        ];
        usize::try_from(code).ok().and_then(|i| ALL.get(i).copied())
    }

    pub const fn is_unary(self) -> bool {
        matches!(self, Operator::Unm | Operator::BNot)
    }
}

/// Numeric ABI code for a comparison operator
pub const fn compare_code(op: CompareOp) -> i32 {
    op as i32
}

pub fn compare_from_code(code: i32) -> Option<CompareOp> {
    match code {
        0 => Some(CompareOp::Eq),
        1 => Some(CompareOp::Lt),
        2 => Some(CompareOp::Le),
        _ => None,
    }
}

fn numeric_operand(v: Value) -> Result<f64, RuntimeError> {
    v.to_number().ok_or(RuntimeError::ArithmeticOnNonNumber {
        type_name: v.type_name(),
    })
}

fn integer_operand(v: Value) -> Result<i64, RuntimeError> {
    match v.kind() {
        ValueKind::Integer(i) => Ok(i),
        ValueKind::Number(n) => float_to_integer(n).ok_or(RuntimeError::NoIntegerRepresentation),
        _ => Err(RuntimeError::ArithmeticOnNonNumber {
            type_name: v.type_name(),
        }),
    }
}

/// Floored integer division; `rhs` must not be zero
fn int_floor_div(lhs: i64, rhs: i64) -> i64 {
    if rhs == -1 {
        return lhs.wrapping_neg();
    }
    let q = lhs / rhs;
    if (lhs ^ rhs) < 0 && lhs % rhs != 0 {
        q - 1
    } else {
        q
    }
}

/// Floored integer modulo; `rhs` must not be zero
fn int_floor_mod(lhs: i64, rhs: i64) -> i64 {
    if rhs == -1 {
        return 0;
    }
    let r = lhs % rhs;
    if r != 0 && (r ^ rhs) < 0 {
        r + rhs
    } else {
        r
    }
}

fn float_floor_mod(lhs: f64, rhs: f64) -> f64 {
    let m = lhs % rhs;
    if m * rhs < 0.0 {
        m + rhs
    } else {
        m
    }
}

fn shift_left(x: i64, y: i64) -> i64 {
    if y <= -64 || y >= 64 {
        0
    } else if y >= 0 {
        ((x as u64) << y) as i64
    } else {
        ((x as u64) >> -y) as i64
    }
}

/// Apply a generic operator
///
/// Unary operators ignore `rhs`.
pub fn arith(op: Operator, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    match op {
        Operator::Add | Operator::Sub | Operator::Mul => {
            if let (Some(a), Some(b)) = (lhs.as_integer(), rhs.as_integer()) {
                let r = match op {
                    Operator::Add => a.wrapping_add(b),
                    Operator::Sub => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                };
                return Ok(Value::integer(r));
            }
            let (a, b) = (numeric_operand(lhs)?, numeric_operand(rhs)?);
            let r = match op {
                Operator::Add => a + b,
                Operator::Sub => a - b,
                _ => a * b,
            };
            Ok(Value::number(r))
        }
        Operator::Div => Ok(Value::number(numeric_operand(lhs)? / numeric_operand(rhs)?)),
        Operator::Pow => Ok(Value::number(
            numeric_operand(lhs)?.powf(numeric_operand(rhs)?),
        )),
        Operator::IDiv | Operator::Mod => {
            if let (Some(a), Some(b)) = (lhs.as_integer(), rhs.as_integer()) {
                let symbol = if op == Operator::IDiv { "//" } else { "%" };
                if b == 0 {
                    return Err(RuntimeError::IntegerDivideByZero { op: symbol });
                }
                let r = if op == Operator::IDiv {
                    int_floor_div(a, b)
                } else {
                    int_floor_mod(a, b)
                };
                return Ok(Value::integer(r));
            }
            let (a, b) = (numeric_operand(lhs)?, numeric_operand(rhs)?);
            let r = if op == Operator::IDiv {
                (a / b).floor()
            } else {
                float_floor_mod(a, b)
            };
            Ok(Value::number(r))
        }
        Operator::BAnd | Operator::BOr | Operator::BXor | Operator::Shl | Operator::Shr => {
            let (a, b) = (integer_operand(lhs)?, integer_operand(rhs)?);
            let r = match op {
                Operator::BAnd => a & b,
                Operator::BOr => a | b,
                Operator::BXor => a ^ b,
                Operator::Shl => shift_left(a, b),
                _ => shift_left(a, b.wrapping_neg()),
            };
            Ok(Value::integer(r))
        }
        Operator::Unm => match lhs.kind() {
            ValueKind::Integer(i) => Ok(Value::integer(i.wrapping_neg())),
            ValueKind::Number(n) => Ok(Value::number(-n)),
            _ => Err(RuntimeError::ArithmeticOnNonNumber {
                type_name: lhs.type_name(),
            }),
        },
        Operator::BNot => Ok(Value::integer(!integer_operand(lhs)?)),
    }
}

/// Language-level equality
pub fn values_equal(lhs: Value, rhs: Value) -> bool {
    match (lhs.kind(), rhs.kind()) {
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a == b,
        (ValueKind::Number(a), ValueKind::Number(b)) => a == b,
        (ValueKind::Integer(a), ValueKind::Number(b))
        | (ValueKind::Number(b), ValueKind::Integer(a)) => float_to_integer(b) == Some(a),
        (ValueKind::Nil, ValueKind::Nil) => true,
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a == b,
        (ValueKind::Function(a), ValueKind::Function(b)) => a == b,
        _ => false,
    }
}

/// Evaluate a generic comparison
pub fn compare(op: CompareOp, lhs: Value, rhs: Value) -> Result<bool, RuntimeError> {
    if op == CompareOp::Eq {
        return Ok(values_equal(lhs, rhs));
    }
    let less_equal = op == CompareOp::Le;
    match (lhs.kind(), rhs.kind()) {
        (ValueKind::Integer(a), ValueKind::Integer(b)) => Ok(if less_equal { a <= b } else { a < b }),
        _ if lhs.is_number() && rhs.is_number() => {
            let (a, b) = (numeric_operand(lhs)?, numeric_operand(rhs)?);
            Ok(if less_equal { a <= b } else { a < b })
        }
        _ => Err(RuntimeError::InvalidComparison {
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }),
    }
}

fn spec_int(v: Value, kind: NumKind) -> i64 {
    match kind {
        NumKind::Int => v.raw_int(),
        NumKind::Float => v.raw_float() as i64,
    }
}

fn spec_float(v: Value, kind: NumKind) -> f64 {
    match kind {
        NumKind::Int => v.raw_int() as f64,
        NumKind::Float => v.raw_float(),
    }
}

/// Evaluate a type-specialized arithmetic instruction
///
/// Operands are trusted to have the kinds the opcode names; their payloads
/// are read without checking tags.
pub fn arith_specialized(spec: ArithSpec, lhs: Value, rhs: Value) -> Value {
    debug_assert!(
        lhs.is_number() && rhs.is_number(),
        "specialized arithmetic on non-numbers"
    );
    match spec.result_kind() {
        NumKind::Int => {
            let (a, b) = (spec_int(lhs, spec.lhs), spec_int(rhs, spec.rhs));
            Value::integer(match spec.op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                // result_kind never reports Int for division
                ArithOp::Div => a.wrapping_div(b),
            })
        }
        NumKind::Float => {
            let (a, b) = (spec_float(lhs, spec.lhs), spec_float(rhs, spec.rhs));
            Value::number(match spec.op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            })
        }
    }
}

/// Evaluate a type-specialized comparison
pub fn compare_specialized(spec: CompareSpec, lhs: Value, rhs: Value) -> bool {
    match spec.kind {
        NumKind::Int => {
            let (a, b) = (lhs.raw_int(), rhs.raw_int());
            match spec.op {
                CompareOp::Eq => a == b,
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
            }
        }
        NumKind::Float => {
            let (a, b) = (lhs.raw_float(), rhs.raw_float());
            match spec.op {
                CompareOp::Eq => a == b,
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
            }
        }
    }
}

/// Clip a for-loop limit to an integer
///
/// Returns the limit and whether the loop must not run at all. When the
/// loop is skipped the returned limit already fails the first test for a
/// loop counter starting at zero.
fn for_limit(limit: Value, step: i64) -> Result<(i64, bool), RuntimeError> {
    if let Some(i) = limit.as_integer() {
        return Ok((i, false));
    }
    let n = limit.to_number().ok_or(RuntimeError::ForLoopNotNumber { what: "limit" })?;
    if n.is_nan() {
        return Ok((if step < 0 { i64::MAX } else { i64::MIN }, true));
    }
    let clipped = if step < 0 { n.ceil() } else { n.floor() };
    if let Some(i) = float_to_integer(clipped) {
        return Ok((i, false));
    }
    if n > 0.0 {
        Ok((i64::MAX, step < 0))
    } else {
        Ok((i64::MIN, step > 0))
    }
}

/// Prepare a numeric for loop over `regs[0..3]` (init, limit, step)
pub fn for_prep(regs: &mut [Value]) -> Result<(), RuntimeError> {
    let (init, limit, step) = (regs[0], regs[1], regs[2]);
    if let (Some(i), Some(s)) = (init.as_integer(), step.as_integer()) {
        if limit.is_number() {
            let (ilimit, skip) = for_limit(limit, s)?;
            let start = if skip { 0 } else { i };
            regs[1] = Value::integer(ilimit);
            regs[0] = Value::integer(start.wrapping_sub(s));
            return Ok(());
        }
    }
    let flimit = limit
        .to_number()
        .ok_or(RuntimeError::ForLoopNotNumber { what: "limit" })?;
    let fstep = step
        .to_number()
        .ok_or(RuntimeError::ForLoopNotNumber { what: "step" })?;
    let finit = init
        .to_number()
        .ok_or(RuntimeError::ForLoopNotNumber { what: "initial value" })?;
    regs[1] = Value::number(flimit);
    regs[2] = Value::number(fstep);
    regs[0] = Value::number(finit - fstep);
    Ok(())
}

/// Advance a numeric for loop over `regs[0..4]`
///
/// Returns whether the loop continues; on continue the new index is copied
/// to the visible loop variable `regs[3]`.
pub fn for_loop(regs: &mut [Value]) -> bool {
    if regs[0].is_integer() {
        let step = regs[2].raw_int();
        let limit = regs[1].raw_int();
        let idx = regs[0].raw_int().wrapping_add(step);
        let continues = if step > 0 { idx <= limit } else { limit <= idx };
        if continues {
            regs[0] = Value::integer(idx);
            regs[3] = Value::integer(idx);
        }
        continues
    } else {
        let step = regs[2].raw_float();
        let limit = regs[1].raw_float();
        let idx = regs[0].raw_float() + step;
        let continues = if step > 0.0 { idx <= limit } else { limit <= idx };
        if continues {
            regs[0] = Value::number(idx);
            regs[3] = Value::number(idx);
        }
        continues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn int(i: i64) -> Value {
        Value::integer(i)
    }

    fn num(n: f64) -> Value {
        Value::number(n)
    }

    #[rstest]
    #[case(Operator::Add, int(2), int(3), int(5))]
    #[case(Operator::Add, int(i64::MAX), int(1), int(i64::MIN))]
    #[case(Operator::Sub, int(2), num(0.5), num(1.5))]
    #[case(Operator::Mul, num(2.0), num(4.0), num(8.0))]
    #[case(Operator::Div, int(7), int(2), num(3.5))]
    #[case(Operator::IDiv, int(7), int(-2), int(-4))]
    #[case(Operator::IDiv, num(7.0), num(2.0), num(3.0))]
    #[case(Operator::Mod, int(-7), int(3), int(2))]
    #[case(Operator::Mod, num(-7.0), num(3.0), num(2.0))]
    #[case(Operator::Pow, int(2), int(10), num(1024.0))]
    #[case(Operator::BAnd, int(6), int(3), int(2))]
    #[case(Operator::BOr, num(4.0), int(1), int(5))]
    #[case(Operator::Shl, int(1), int(4), int(16))]
    #[case(Operator::Shr, int(-1), int(60), int(15))]
    #[case(Operator::Shl, int(1), int(64), int(0))]
    #[case(Operator::Unm, int(5), Value::NIL, int(-5))]
    #[case(Operator::BNot, int(0), Value::NIL, int(-1))]
    fn test_arith(#[case] op: Operator, #[case] a: Value, #[case] b: Value, #[case] expected: Value) {
        assert_eq!(arith(op, a, b), Ok(expected));
    }

    #[test]
    fn test_arith_errors() {
        assert_eq!(
            arith(Operator::Add, Value::NIL, int(1)),
            Err(RuntimeError::ArithmeticOnNonNumber { type_name: "nil" })
        );
        assert_eq!(
            arith(Operator::Mod, int(1), int(0)),
            Err(RuntimeError::IntegerDivideByZero { op: "%" })
        );
        assert_eq!(
            arith(Operator::BAnd, num(1.5), int(1)),
            Err(RuntimeError::NoIntegerRepresentation)
        );
    }

    #[test]
    fn test_int_min_div_minus_one() {
        assert_eq!(arith(Operator::IDiv, int(i64::MIN), int(-1)), Ok(int(i64::MIN)));
        assert_eq!(arith(Operator::Mod, int(i64::MIN), int(-1)), Ok(int(0)));
    }

    #[test]
    fn test_equality_across_kinds() {
        assert!(values_equal(int(1), num(1.0)));
        assert!(!values_equal(int(1), num(1.5)));
        assert!(!values_equal(num(f64::NAN), num(f64::NAN)));
        assert!(!values_equal(Value::NIL, Value::FALSE));
    }

    #[test]
    fn test_ordering() {
        assert_eq!(compare(CompareOp::Lt, int(1), num(1.5)), Ok(true));
        assert_eq!(compare(CompareOp::Le, int(2), int(2)), Ok(true));
        assert!(compare(CompareOp::Lt, Value::TRUE, int(1)).is_err());
    }

    #[test]
    fn test_operator_codes_roundtrip() {
        for code in 0..14 {
            let op = Operator::from_code(code).expect("valid code");
            assert_eq!(op.code(), code);
        }
        assert_eq!(Operator::from_code(14), None);
        assert_eq!(Operator::from_code(-1), None);
    }

    fn run_loop(init: Value, limit: Value, step: Value) -> Vec<Value> {
        let mut regs = [init, limit, step, Value::NIL];
        for_prep(&mut regs).expect("numeric loop");
        let mut seen = Vec::new();
        while for_loop(&mut regs) {
            seen.push(regs[3]);
            assert!(seen.len() < 100, "runaway loop");
        }
        seen
    }

    #[test]
    fn test_integer_loop() {
        assert_eq!(run_loop(int(1), int(3), int(1)), vec![int(1), int(2), int(3)]);
        assert_eq!(run_loop(int(3), int(1), int(-1)), vec![int(3), int(2), int(1)]);
        assert_eq!(run_loop(int(1), int(0), int(1)), vec![]);
    }

    #[test]
    fn test_float_limit_is_floored_for_integer_loop() {
        assert_eq!(run_loop(int(1), num(2.5), int(1)), vec![int(1), int(2)]);
    }

    #[test]
    fn test_float_loop() {
        assert_eq!(
            run_loop(num(0.0), num(1.0), num(0.5)),
            vec![num(0.0), num(0.5), num(1.0)]
        );
    }

    #[test]
    fn test_huge_limits() {
        assert_eq!(run_loop(int(1), num(-1e300), int(1)), vec![]);
        assert_eq!(run_loop(int(1), num(1e300), int(-1)), vec![]);
        assert_eq!(run_loop(int(1), num(f64::NAN), int(1)), vec![]);
    }
}
