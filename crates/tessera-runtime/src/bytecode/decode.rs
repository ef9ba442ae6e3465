//! Instruction stream decoding
//!
//! Walks a code array once, resolving wide instructions, so consumers
//! (the disassembler, the native compiler) can work with whole
//! instructions and their program counters.

use thiserror::Error;

use super::extension::{subop, ExtInstruction};
use super::instruction::{Fields, Instruction};
use super::opcode::{OpCode, EXT_INDEX};

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Index of the first word
    pub pc: usize,
    /// Words occupied: 1 for primary, 2 for wide
    pub width: usize,
    pub op: OpCode,
    pub fields: Fields,
}

impl Decoded {
    /// Program counter of the following instruction
    pub fn next_pc(&self) -> usize {
        self.pc + self.width
    }

    /// Target of a jump-format instruction: `pc + 1 + sBx`
    pub fn jump_target(&self) -> Option<isize> {
        match self.fields {
            Fields::AsBx { sbx, .. } => Some(self.next_pc() as isize + sbx as isize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode field {raw} at pc {pc}")]
    UnknownOpcode { pc: usize, raw: u32 },

    #[error("unknown extension sub-opcode {raw} at pc {pc}")]
    UnknownExtension { pc: usize, raw: u16 },

    #[error("wide instruction at pc {pc} is missing its second word")]
    TruncatedWide { pc: usize },

    #[error("pc {pc} is past the end of the code")]
    OutOfBounds { pc: usize },
}

/// Decode the instruction starting at `pc`
pub fn decode_at(code: &[Instruction], pc: usize) -> Result<Decoded, DecodeError> {
    let word = *code.get(pc).ok_or(DecodeError::OutOfBounds { pc })?;
    if word.op_field() == EXT_INDEX as u32 {
        let tail = *code.get(pc + 1).ok_or(DecodeError::TruncatedWide { pc })?;
        let ext = ExtInstruction::decode(word, tail).ok_or(DecodeError::UnknownExtension {
            pc,
            raw: subop(word),
        })?;
        return Ok(Decoded {
            pc,
            width: 2,
            op: ext.op,
            fields: Fields::Abc {
                a: ext.a as u32,
                b: ext.b as u32,
                c: ext.c as u32,
            },
        });
    }
    let op = word.opcode().ok_or(DecodeError::UnknownOpcode {
        pc,
        raw: word.op_field(),
    })?;
    Ok(Decoded {
        pc,
        width: 1,
        op,
        fields: word.decode(op.format()),
    })
}

/// Decode a whole code array
pub fn decode_stream(code: &[Instruction]) -> Result<Vec<Decoded>, DecodeError> {
    let mut decoded = Vec::with_capacity(code.len());
    let mut pc = 0;
    while pc < code.len() {
        let ins = decode_at(code, pc)?;
        pc = ins.next_pc();
        decoded.push(ins);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::extension::ExtInstruction;

    #[test]
    fn test_mixed_stream() {
        let [head, tail] = ExtInstruction::new(OpCode::UnmF, 3, 1, 0).encode();
        let code = vec![
            Instruction::abc(OpCode::Move, 1, 0, 0),
            head,
            tail,
            Instruction::asbx(OpCode::Jmp, 0, -4),
            Instruction::abc(OpCode::Return, 3, 2, 0),
        ];
        let decoded = decode_stream(&code).expect("valid stream");
        let pcs: Vec<usize> = decoded.iter().map(|d| d.pc).collect();
        assert_eq!(pcs, vec![0, 1, 3, 4]);
        assert_eq!(decoded[1].op, OpCode::UnmF);
        assert_eq!(decoded[1].width, 2);
        assert_eq!(decoded[2].jump_target(), Some(0));
    }

    #[test]
    fn test_truncated_wide() {
        let [head, _] = ExtInstruction::new(OpCode::UnmI, 0, 0, 0).encode();
        assert_eq!(
            decode_stream(&[head]),
            Err(DecodeError::TruncatedWide { pc: 0 })
        );
    }

    #[test]
    fn test_pc_past_end() {
        let code = [Instruction::abc(OpCode::Return, 0, 1, 0)];
        assert_eq!(decode_at(&code, 1), Err(DecodeError::OutOfBounds { pc: 1 }));
        assert_eq!(decode_at(&[], 0), Err(DecodeError::OutOfBounds { pc: 0 }));
    }

    #[test]
    fn test_unknown_opcode_field() {
        assert_eq!(
            decode_stream(&[Instruction::from_raw(63)]),
            Err(DecodeError::UnknownOpcode { pc: 0, raw: 63 })
        );
    }
}
