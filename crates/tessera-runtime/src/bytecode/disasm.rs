//! Bytecode disassembler
//!
//! Renders a prototype as a human-readable listing for debugging and for
//! the native compiler's trace output.
//!
//! # Format
//! ```text
//! function <sum> (params=2, stack=4)
//! === Constants ===
//! 0: 1
//!
//! === Instructions ===
//! 0000  ADD        2 0 1
//! 0001  LTIIRK     1 2 K0
//! 0003  JMP        0 2       ; to 6
//! ```

use std::fmt;

use super::decode::{decode_at, Decoded};
use super::extension::Source;
use super::instruction::{rk, Fields};
use super::metadata::OpArgMode;
use super::opcode::OpCode;
use crate::proto::Proto;

/// Disassemble a prototype
pub fn disassemble(proto: &Proto) -> String {
    Listing(proto).to_string()
}

/// Format one decoded instruction without a trailing newline
pub fn format_instruction(ins: &Decoded) -> String {
    let operands = format_operands(ins);
    let line = format!("{:04}  {:<10} {}", ins.pc, ins.op.to_string(), operands);
    match ins.jump_target() {
        Some(target) => format!("{:<30}; to {}", line, target),
        None => line.trim_end().to_string(),
    }
}

struct Listing<'a>(&'a Proto);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = self.0;
        writeln!(
            f,
            "function <{}> (params={}, stack={})",
            proto.name(),
            proto.num_params(),
            proto.max_stack()
        )?;

        if !proto.constants().is_empty() {
            writeln!(f, "=== Constants ===")?;
            for (idx, constant) in proto.constants().iter().enumerate() {
                writeln!(f, "{}: {}", idx, constant)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "=== Instructions ===")?;
        let code = proto.code();
        let mut pc = 0;
        while pc < code.len() {
            match decode_at(code, pc) {
                Ok(ins) => {
                    writeln!(f, "{}", format_instruction(&ins))?;
                    pc = ins.next_pc();
                }
                Err(err) => {
                    writeln!(f, "{:04}  <{}>", pc, err)?;
                    pc += 1;
                }
            }
        }
        Ok(())
    }
}

fn rk_operand(mode: OpArgMode, value: u32) -> Option<String> {
    match mode {
        OpArgMode::N => None,
        OpArgMode::K if rk::is_constant(value) => Some(format!("K{}", rk::index(value))),
        _ => Some(value.to_string()),
    }
}

fn sourced(source: Source, value: u32) -> String {
    match source {
        Source::Const => format!("K{}", value),
        Source::Reg => value.to_string(),
    }
}

fn format_operands(ins: &Decoded) -> String {
    let op = ins.op;
    match ins.fields {
        Fields::Abc { a, b, c } => {
            let (b, c) = match op {
                OpCode::Arith(spec) => (sourced(spec.lhs_src, b), sourced(spec.rhs_src, c)),
                OpCode::Compare(spec) => (sourced(spec.lhs_src, b), sourced(spec.rhs_src, c)),
                OpCode::ArrayGet(spec) => (b.to_string(), sourced(spec.index_src, c)),
                OpCode::ArraySet(spec) => {
                    (sourced(spec.index_src, b), sourced(spec.value_src, c))
                }
                _ => {
                    let parts: Vec<String> = [
                        Some(a.to_string()),
                        rk_operand(op.b_mode(), b),
                        rk_operand(op.c_mode(), c),
                    ]
                    .into_iter()
                    .flatten()
                    .collect();
                    return parts.join(" ");
                }
            };
            format!("{} {} {}", a, b, c)
        }
        Fields::Abx { a, bx } => match op {
            OpCode::LoadK => format!("{} K{}", a, bx),
            OpCode::LoadKx => a.to_string(),
            _ => format!("{} {}", a, bx),
        },
        Fields::AsBx { a, sbx } => format!("{} {}", a, sbx),
        Fields::Ax { ax } => ax.to_string(),
    }
}
