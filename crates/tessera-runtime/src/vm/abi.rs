//! Entry points called from native code
//!
//! Every function takes the raw state pointer the native function was
//! entered with. Register and constant operands are passed as they appear
//! in the instruction. A negative return value means the call failed and
//! the error is stored in the state; native code must return that status
//! to its caller immediately.

use std::panic::{self, AssertUnwindSafe};

use super::arith::{self, compare_from_code, Operator};
use super::{panic_message, State};
use crate::value::RuntimeError;

/// Status of a successful runtime call
pub const STATUS_OK: i32 = 0;

/// Status of a failed runtime call
pub const STATUS_FAULT: i32 = -1;

/// What [`State::precall`] did with a call
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
    /// A script frame was pushed and must be interpreted
    NeedsInterpretation = 0,
    /// A host function ran; with fixed results the caller must set
    /// `top` to the recorded top
    HostCallCompleted = 1,
    /// A script function ran as native code and has returned
    CompiledCallCompleted = 2,
}

impl DispatchOutcome {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DispatchOutcome::NeedsInterpretation),
            1 => Some(DispatchOutcome::HostCallCompleted),
            2 => Some(DispatchOutcome::CompiledCallCompleted),
            _ => None,
        }
    }
}

/// Run `f` on the state behind `state`, turning errors into a fault status
///
/// A panic in `f` must not unwind into native frames, so it is caught and
/// raised as [`RuntimeError::Panic`].
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
unsafe fn with_state(
    state: *mut State,
    f: impl FnOnce(&mut State) -> Result<i32, RuntimeError>,
) -> i32 {
    // SAFETY: native code only runs while `State::run_native` has lent out
    // the state, so no other reference to it is live
    let state = unsafe { &mut *state };
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *state)));
    let status = match result {
        Ok(Ok(status)) => status,
        Ok(Err(error)) => state.raise(error),
        Err(payload) => state.raise(RuntimeError::Panic(panic_message(payload.as_ref()))),
    };
    state.sync_stack_ptr();
    status
}

/// Dispatch the call whose function value is in register `a`
///
/// `top` must already delimit the arguments. Returns a
/// [`DispatchOutcome`] code.
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
pub unsafe extern "C" fn tessera_precall(
    state: *mut State,
    a: i32,
    nresults: i32,
    allow_compile: i32,
) -> i32 {
    unsafe {
        with_state(state, |state| {
            let func = state.base + a as usize;
            let outcome = state.precall(func, nresults, allow_compile != 0)?;
            Ok(outcome.code())
        })
    }
}

/// Interpret the frame pushed by the last `tessera_precall`
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
pub unsafe extern "C" fn tessera_interpret(state: *mut State) -> i32 {
    unsafe {
        with_state(state, |state| {
            state.interpret()?;
            Ok(STATUS_OK)
        })
    }
}

/// Return from the running frame with `RETURN A B` semantics
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
pub unsafe extern "C" fn tessera_return(state: *mut State, a: i32, b: i32) -> i32 {
    unsafe {
        with_state(state, |state| {
            let first = state.base + a as usize;
            let count = if b != 0 {
                (b - 1) as usize
            } else {
                state.top.saturating_sub(first)
            };
            state.poscall(first, count)?;
            Ok(STATUS_OK)
        })
    }
}

/// `R(A) := RK(B) op RK(C)` for a generic operator code
///
/// Unary operators read register `b` and ignore `c`.
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
pub unsafe extern "C" fn tessera_arith(state: *mut State, op: i32, a: i32, b: i32, c: i32) -> i32 {
    unsafe {
        with_state(state, |state| {
            let op = Operator::from_code(op).ok_or(RuntimeError::NativeFault { status: op })?;
            let (lhs, rhs) = if op.is_unary() {
                (state.stack[state.base + b as usize], crate::value::Value::NIL)
            } else {
                (state.rk(b as u32)?, state.rk(c as u32)?)
            };
            let result = arith::arith(op, lhs, rhs)?;
            let dst = state.base + a as usize;
            state.stack[dst] = result;
            Ok(STATUS_OK)
        })
    }
}

/// Evaluate `RK(B) op RK(C)` for a comparison code; returns 0 or 1
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
pub unsafe extern "C" fn tessera_compare(state: *mut State, op: i32, b: i32, c: i32) -> i32 {
    unsafe {
        with_state(state, |state| {
            let op = compare_from_code(op).ok_or(RuntimeError::NativeFault { status: op })?;
            let holds = arith::compare(op, state.rk(b as u32)?, state.rk(c as u32)?)?;
            Ok(holds as i32)
        })
    }
}

/// Prepare the numeric for loop controlled by registers `a..a+3`
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
pub unsafe extern "C" fn tessera_forprep(state: *mut State, a: i32) -> i32 {
    unsafe {
        with_state(state, |state| {
            let first = state.base + a as usize;
            arith::for_prep(&mut state.stack[first..first + 3])?;
            Ok(STATUS_OK)
        })
    }
}

/// Advance the numeric for loop controlled by registers `a..a+4`;
/// returns 1 to continue and 0 to exit
///
/// # Safety
///
/// `state` must be the pointer a native function was entered with.
pub unsafe extern "C" fn tessera_forloop(state: *mut State, a: i32) -> i32 {
    unsafe {
        with_state(state, |state| {
            let first = state.base + a as usize;
            Ok(arith::for_loop(&mut state.stack[first..first + 4]) as i32)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::OpCode;
    use crate::proto::ProtoBuilder;
    use crate::value::Value;

    #[test]
    fn test_outcome_codes() {
        for outcome in [
            DispatchOutcome::NeedsInterpretation,
            DispatchOutcome::HostCallCompleted,
            DispatchOutcome::CompiledCallCompleted,
        ] {
            assert_eq!(DispatchOutcome::from_code(outcome.code()), Some(outcome));
        }
        assert_eq!(DispatchOutcome::from_code(STATUS_FAULT), None);
    }

    #[test]
    fn test_fault_is_recorded() {
        let mut b = ProtoBuilder::new("f").with_max_stack(3);
        b.emit_abc(OpCode::Return, 0, 1, 0);
        let mut state = State::new();
        let f = state.register_script(b.build());
        state.push(f).unwrap();
        state.precall(0, 0, false).unwrap();

        let status = unsafe { tessera_arith(&mut state, Operator::Add.code(), 0, 1, 2) };
        assert_eq!(status, STATUS_FAULT);
        assert_eq!(
            state.take_fault(status),
            RuntimeError::ArithmeticOnNonNumber { type_name: "nil" }
        );
    }

    #[test]
    fn test_host_panic_becomes_fault() {
        let mut b = ProtoBuilder::new("f").with_max_stack(3);
        b.emit_abc(OpCode::Return, 0, 1, 0);
        let mut state = State::new();
        let host = state.register_host("boom", |_| panic!("host boom"));
        let f = state.register_script(b.build());
        state.push(f).unwrap();
        state.precall(0, 0, false).unwrap();
        let base = state.base();
        state.stack[base] = host;
        state.top = base + 1;

        let status = unsafe { tessera_precall(&mut state, 0, 1, 0) };
        assert_eq!(status, STATUS_FAULT);
        assert_eq!(
            state.take_fault(status),
            RuntimeError::HostPanic {
                function: "boom".to_string(),
                message: "host boom".to_string(),
            }
        );
    }

    #[test]
    fn test_entry_point_panic_is_caught() {
        let mut state = State::new();
        let status = unsafe { with_state(&mut state, |_| panic!("index out of range")) };
        assert_eq!(status, STATUS_FAULT);
        assert_eq!(
            state.take_fault(status),
            RuntimeError::Panic("index out of range".to_string())
        );
    }

    #[test]
    fn test_arith_writes_destination() {
        let mut b = ProtoBuilder::new("f").with_max_stack(3);
        b.emit_abc(OpCode::Return, 0, 1, 0);
        let mut state = State::new();
        let f = state.register_script(b.build());
        state.push(f).unwrap();
        state.precall(0, 0, false).unwrap();
        let base = state.base();
        state.stack[base + 1] = Value::integer(40);
        state.stack[base + 2] = Value::integer(2);

        let status = unsafe { tessera_arith(&mut state, Operator::Add.code(), 0, 1, 2) };
        assert_eq!(status, STATUS_OK);
        assert_eq!(state.slot(base), Value::integer(42));
    }
}
