//! Reference interpreter
//!
//! Executes the frame on top of the call stack, following script-to-script
//! calls in the same loop, until that frame returns. Native code reaches
//! this loop through `tessera_interpret` when it calls a function that has
//! no native translation.

use tracing::trace;

use super::arith::{self, Operator};
use super::{DispatchOutcome, State};
use crate::bytecode::{CompareOp, ExtInstruction, Instruction, OpCode, Source};
use crate::proto::Proto;
use crate::value::{RuntimeError, Value};

/// Value of a specialized operand
fn operand(
    state: &State,
    proto: &Proto,
    source: Source,
    index: u16,
    pc: usize,
) -> Result<Value, RuntimeError> {
    match source {
        Source::Reg => Ok(state.stack[state.base + index as usize]),
        Source::Const => proto
            .constant(index as usize)
            .ok_or(RuntimeError::MalformedInstruction { pc }),
    }
}

/// Target of the jump that follows a test instruction at `pc - 1`
fn next_jump(code: &[Instruction], pc: usize) -> Result<usize, RuntimeError> {
    let jump = *code.get(pc).ok_or(RuntimeError::MalformedInstruction { pc })?;
    if jump.opcode() != Some(OpCode::Jmp) {
        return Err(RuntimeError::MalformedInstruction { pc });
    }
    jump_target(pc + 1, jump.sbx(), code.len())
}

fn jump_target(next: usize, sbx: i32, len: usize) -> Result<usize, RuntimeError> {
    let target = next as isize + sbx as isize;
    if target < 0 || target as usize > len {
        return Err(RuntimeError::MalformedInstruction { pc: next - 1 });
    }
    Ok(target as usize)
}

pub(crate) fn execute(state: &mut State) -> Result<(), RuntimeError> {
    let entry_depth = state.frames.len();
    if entry_depth == 0 {
        return Err(RuntimeError::NoActiveFrame);
    }

    'frame: loop {
        let frame = state.current_frame()?;
        let proto = frame.proto.clone();
        let mut pc = frame.pc;
        let code = proto.code();
        trace!(function = proto.name(), pc, "interpreting frame");

        loop {
            let word = *code.get(pc).ok_or(RuntimeError::MalformedInstruction { pc })?;
            let op = word.opcode().ok_or(RuntimeError::MalformedInstruction { pc })?;
            let base = state.base;
            let ins_pc = pc;

            if op.is_extended() {
                let tail = *code
                    .get(pc + 1)
                    .ok_or(RuntimeError::MalformedInstruction { pc })?;
                let ext = ExtInstruction::decode(word, tail)
                    .ok_or(RuntimeError::MalformedInstruction { pc })?;
                pc += 2;
                let a = base + ext.a as usize;
                match ext.op {
                    OpCode::UnmF => {
                        let v = state.stack[base + ext.b as usize];
                        state.stack[a] = Value::number(-v.raw_float());
                    }
                    OpCode::UnmI => {
                        let v = state.stack[base + ext.b as usize];
                        state.stack[a] = Value::integer(v.raw_int().wrapping_neg());
                    }
                    OpCode::Arith(spec) => {
                        let lhs = operand(state, &proto, spec.lhs_src, ext.b, ins_pc)?;
                        let rhs = operand(state, &proto, spec.rhs_src, ext.c, ins_pc)?;
                        state.stack[a] = arith::arith_specialized(spec, lhs, rhs);
                    }
                    OpCode::Compare(spec) => {
                        let lhs = operand(state, &proto, spec.lhs_src, ext.b, ins_pc)?;
                        let rhs = operand(state, &proto, spec.rhs_src, ext.c, ins_pc)?;
                        if arith::compare_specialized(spec, lhs, rhs) != (ext.a != 0) {
                            pc += 1;
                        } else {
                            pc = next_jump(code, pc)?;
                        }
                    }
                    other => return Err(RuntimeError::UnsupportedOpcode { op: other, pc: ins_pc }),
                }
                continue;
            }

            pc += 1;
            let a = word.a() as usize;
            let b = word.b();
            let c = word.c();
            let ra = base + a;
            match op {
                OpCode::Move => {
                    state.stack[ra] = state.stack[base + b as usize];
                }
                OpCode::LoadK => {
                    state.stack[ra] = proto
                        .constant(word.bx() as usize)
                        .ok_or(RuntimeError::MalformedInstruction { pc: ins_pc })?;
                }
                OpCode::LoadKx => {
                    let extra = *code
                        .get(pc)
                        .filter(|w| w.opcode() == Some(OpCode::ExtraArg))
                        .ok_or(RuntimeError::MalformedInstruction { pc: ins_pc })?;
                    pc += 1;
                    state.stack[ra] = proto
                        .constant(extra.ax() as usize)
                        .ok_or(RuntimeError::MalformedInstruction { pc: ins_pc })?;
                }
                OpCode::LoadBool => {
                    state.stack[ra] = Value::boolean(b != 0);
                    if c != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    for slot in &mut state.stack[ra..=ra + b as usize] {
                        *slot = Value::NIL;
                    }
                }
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Mod
                | OpCode::Pow
                | OpCode::Div
                | OpCode::IDiv
                | OpCode::BAnd
                | OpCode::BOr
                | OpCode::BXor
                | OpCode::Shl
                | OpCode::Shr => {
                    let operator = Operator::from_opcode(op)
                        .ok_or(RuntimeError::UnsupportedOpcode { op, pc: ins_pc })?;
                    let result = arith::arith(operator, state.rk(b)?, state.rk(c)?)?;
                    state.stack[ra] = result;
                }
                OpCode::Unm | OpCode::BNot => {
                    let operator = Operator::from_opcode(op)
                        .ok_or(RuntimeError::UnsupportedOpcode { op, pc: ins_pc })?;
                    let result = arith::arith(operator, state.stack[base + b as usize], Value::NIL)?;
                    state.stack[ra] = result;
                }
                OpCode::Not => {
                    state.stack[ra] = Value::boolean(state.stack[base + b as usize].is_falsy());
                }
                OpCode::Jmp => {
                    pc = jump_target(pc, word.sbx(), code.len())?;
                }
                OpCode::Eq | OpCode::Lt | OpCode::Le => {
                    let compare_op = match op {
                        OpCode::Eq => CompareOp::Eq,
                        OpCode::Lt => CompareOp::Lt,
                        _ => CompareOp::Le,
                    };
                    let holds = arith::compare(compare_op, state.rk(b)?, state.rk(c)?)?;
                    if holds != (a != 0) {
                        pc += 1;
                    } else {
                        pc = next_jump(code, pc)?;
                    }
                }
                OpCode::Test => {
                    if state.stack[ra].is_truthy() != (c != 0) {
                        pc += 1;
                    } else {
                        pc = next_jump(code, pc)?;
                    }
                }
                OpCode::TestSet => {
                    let rb = state.stack[base + b as usize];
                    if rb.is_truthy() != (c != 0) {
                        pc += 1;
                    } else {
                        state.stack[ra] = rb;
                        pc = next_jump(code, pc)?;
                    }
                }
                OpCode::Call => {
                    let nresults = c as i32 - 1;
                    if b != 0 {
                        state.top = ra + b as usize;
                    }
                    state.current_frame_mut()?.pc = pc;
                    match state.precall(ra, nresults, true)? {
                        DispatchOutcome::HostCallCompleted => {
                            if nresults >= 0 {
                                state.top = state.ci_top;
                            }
                        }
                        DispatchOutcome::CompiledCallCompleted => {}
                        DispatchOutcome::NeedsInterpretation => continue 'frame,
                    }
                }
                OpCode::TailCall => {
                    // Executed as a call for all results followed by a return of them
                    if b != 0 {
                        state.top = ra + b as usize;
                    }
                    state.current_frame_mut()?.pc = pc;
                    if state.precall(ra, super::MULTRET, true)?
                        == DispatchOutcome::NeedsInterpretation
                    {
                        execute(state)?;
                    }
                    let count = state.top.saturating_sub(ra);
                    state.poscall(ra, count)?;
                    if state.frames.len() < entry_depth {
                        return Ok(());
                    }
                    continue 'frame;
                }
                OpCode::Return => {
                    let count = if b != 0 {
                        b as usize - 1
                    } else {
                        state.top.saturating_sub(ra)
                    };
                    state.poscall(ra, count)?;
                    if state.frames.len() < entry_depth {
                        return Ok(());
                    }
                    continue 'frame;
                }
                OpCode::ForPrep => {
                    arith::for_prep(&mut state.stack[ra..ra + 3])?;
                    pc = jump_target(pc, word.sbx(), code.len())?;
                }
                OpCode::ForLoop => {
                    if arith::for_loop(&mut state.stack[ra..ra + 4]) {
                        pc = jump_target(pc, word.sbx(), code.len())?;
                    }
                }
                OpCode::GetUpval
                | OpCode::GetTabUp
                | OpCode::GetTable
                | OpCode::SetTabUp
                | OpCode::SetUpval
                | OpCode::SetTable
                | OpCode::NewTable
                | OpCode::SelfLookup
                | OpCode::Len
                | OpCode::Concat
                | OpCode::TForCall
                | OpCode::TForLoop
                | OpCode::SetList
                | OpCode::Closure
                | OpCode::VarArg
                | OpCode::ExtraArg
                | OpCode::Ext
                | OpCode::UnmF
                | OpCode::UnmI
                | OpCode::Arith(_)
                | OpCode::Compare(_)
                | OpCode::ArrayGet(_)
                | OpCode::ArraySet(_) => {
                    return Err(RuntimeError::UnsupportedOpcode { op, pc: ins_pc });
                }
            }
        }
    }
}
