//! Type-specialized extension opcodes and the wide instruction layout
//!
//! When static analysis proves the numeric kinds of an operation's
//! operands, the front end may replace a generic arithmetic or comparison
//! opcode with a specialized one that skips dynamic type dispatch.
//! Specialized opcodes are addressed through the `Ext` marker and always
//! occupy two words:
//!
//! ```text
//! word 0:  | A (16) | sub-opcode (10) | marker (6) |
//! word 1:  | C (16) | B (16)                       |
//! ```
//!
//! The sub-opcode carries the opcode's full index, so decoding a wide
//! instruction never depends on context.

use super::instruction::{mask, Instruction, POS_OP, SIZE_OP};
use super::opcode::{OpCode, EXT_INDEX, NUM_OPCODES};

pub const SIZE_SUBOP: u32 = 10;
pub const POS_SUBOP: u32 = POS_OP + SIZE_OP;
pub const SIZE_WIDE_A: u32 = 16;
pub const POS_WIDE_A: u32 = POS_SUBOP + SIZE_SUBOP;
pub const SIZE_WIDE_B: u32 = 16;
pub const POS_WIDE_B: u32 = 0;
pub const SIZE_WIDE_C: u32 = 16;
pub const POS_WIDE_C: u32 = POS_WIDE_B + SIZE_WIDE_B;

/// Largest operand value in the wide layout
pub const MAXARG_WIDE: u32 = (1 << SIZE_WIDE_A) - 1;

const _: () = assert!(NUM_OPCODES <= 1 << SIZE_SUBOP);

/// Statically known numeric kind of an operand
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumKind {
    Float = 0,
    Int = 1,
}

/// Where a specialized operand is read from
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Constant table entry
    Const = 0,
    /// Register of the current frame
    Reg = 1,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq = 0,
    Lt = 1,
    Le = 2,
}

/// Element kind of a specialized array access
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Slice = 0,
    Int = 1,
    Float = 2,
    Generic = 3,
}

impl NumKind {
    const fn from_bit(bit: u16) -> Self {
        if bit & 1 == 0 {
            NumKind::Float
        } else {
            NumKind::Int
        }
    }
}

impl Source {
    const fn from_bit(bit: u16) -> Self {
        if bit & 1 == 0 {
            Source::Const
        } else {
            Source::Reg
        }
    }
}

impl ArithOp {
    const fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => ArithOp::Add,
            1 => ArithOp::Sub,
            2 => ArithOp::Mul,
            _ => ArithOp::Div,
        }
    }

    /// The dynamically typed opcode this operator specializes
    pub const fn generic(self) -> OpCode {
        match self {
            ArithOp::Add => OpCode::Add,
            ArithOp::Sub => OpCode::Sub,
            ArithOp::Mul => OpCode::Mul,
            ArithOp::Div => OpCode::Div,
        }
    }
}

impl CompareOp {
    const fn from_bits(bits: u16) -> Self {
        match bits {
            0 => CompareOp::Eq,
            1 => CompareOp::Lt,
            _ => CompareOp::Le,
        }
    }

    /// The dynamically typed opcode this operator specializes
    pub const fn generic(self) -> OpCode {
        match self {
            CompareOp::Eq => OpCode::Eq,
            CompareOp::Lt => OpCode::Lt,
            CompareOp::Le => OpCode::Le,
        }
    }
}

impl ArrayKind {
    const fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => ArrayKind::Slice,
            1 => ArrayKind::Int,
            2 => ArrayKind::Float,
            _ => ArrayKind::Generic,
        }
    }
}

/// Specialized binary arithmetic: one operator, two operand kinds, two sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArithSpec {
    pub op: ArithOp,
    pub lhs: NumKind,
    pub rhs: NumKind,
    pub lhs_src: Source,
    pub rhs_src: Source,
}

impl ArithSpec {
    /// Kind of the value written to R(A)
    ///
    /// Division always produces a float; the other operators produce an
    /// integer only when both operands are integers.
    pub const fn result_kind(&self) -> NumKind {
        match (self.op, self.lhs, self.rhs) {
            (ArithOp::Div, _, _) => NumKind::Float,
            (_, NumKind::Int, NumKind::Int) => NumKind::Int,
            _ => NumKind::Float,
        }
    }

    pub(crate) const fn offset(self) -> u16 {
        let pair = (self.lhs as u16) * 2 + self.rhs as u16;
        let src = (self.lhs_src as u16) * 2 + self.rhs_src as u16;
        (self.op as u16) * 16 + pair * 4 + src
    }

    pub(crate) const fn from_offset(offset: u16) -> Self {
        ArithSpec {
            op: ArithOp::from_bits(offset / 16),
            lhs: NumKind::from_bit(offset >> 3),
            rhs: NumKind::from_bit(offset >> 2),
            lhs_src: Source::from_bit(offset >> 1),
            rhs_src: Source::from_bit(offset),
        }
    }
}

/// Specialized comparison; both operands share one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompareSpec {
    pub op: CompareOp,
    pub kind: NumKind,
    pub lhs_src: Source,
    pub rhs_src: Source,
}

impl CompareSpec {
    pub(crate) const fn offset(self) -> u16 {
        let src = (self.lhs_src as u16) * 2 + self.rhs_src as u16;
        (self.op as u16) * 8 + (self.kind as u16) * 4 + src
    }

    pub(crate) const fn from_offset(offset: u16) -> Self {
        CompareSpec {
            op: CompareOp::from_bits(offset / 8),
            kind: NumKind::from_bit(offset >> 2),
            lhs_src: Source::from_bit(offset >> 1),
            rhs_src: Source::from_bit(offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayGetSpec {
    pub kind: ArrayKind,
    pub index_src: Source,
}

impl ArrayGetSpec {
    pub(crate) const fn offset(self) -> u16 {
        (self.kind as u16) * 2 + self.index_src as u16
    }

    pub(crate) const fn from_offset(offset: u16) -> Self {
        ArrayGetSpec {
            kind: ArrayKind::from_bits(offset / 2),
            index_src: Source::from_bit(offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArraySetSpec {
    pub kind: ArrayKind,
    pub index_src: Source,
    pub value_src: Source,
}

impl ArraySetSpec {
    pub(crate) const fn offset(self) -> u16 {
        (self.kind as u16) * 4 + (self.index_src as u16) * 2 + self.value_src as u16
    }

    pub(crate) const fn from_offset(offset: u16) -> Self {
        ArraySetSpec {
            kind: ArrayKind::from_bits(offset / 4),
            index_src: Source::from_bit(offset >> 1),
            value_src: Source::from_bit(offset),
        }
    }
}

/// Pick the specialized arithmetic opcode for the given operand facts
///
/// Every combination of kinds has a specialization, mixed ones included.
pub const fn specialize_arith(
    op: ArithOp,
    lhs: NumKind,
    rhs: NumKind,
    lhs_src: Source,
    rhs_src: Source,
) -> OpCode {
    OpCode::Arith(ArithSpec {
        op,
        lhs,
        rhs,
        lhs_src,
        rhs_src,
    })
}

/// Pick the specialized comparison opcode for the given operand facts
///
/// Comparisons are only specialized when both operands have the same kind.
/// Mixed integer/float comparisons return `None`; the caller keeps the
/// generic opcode (see [`CompareOp::generic`]).
pub const fn specialize_compare(
    op: CompareOp,
    lhs: NumKind,
    rhs: NumKind,
    lhs_src: Source,
    rhs_src: Source,
) -> Option<OpCode> {
    if lhs as u8 != rhs as u8 {
        return None;
    }
    Some(OpCode::Compare(CompareSpec {
        op,
        kind: lhs,
        lhs_src,
        rhs_src,
    }))
}

/// A decoded wide instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtInstruction {
    pub op: OpCode,
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

impl ExtInstruction {
    pub fn new(op: OpCode, a: u16, b: u16, c: u16) -> Self {
        debug_assert!(op.is_extended(), "{op} has no wide encoding");
        ExtInstruction { op, a, b, c }
    }

    /// Produce the two words of this instruction
    pub fn encode(&self) -> [Instruction; 2] {
        let head = (EXT_INDEX as u32) << POS_OP
            | ((self.op.index() as u32) << POS_SUBOP) & mask(SIZE_SUBOP, POS_SUBOP)
            | (self.a as u32) << POS_WIDE_A;
        let tail = (self.b as u32) << POS_WIDE_B | (self.c as u32) << POS_WIDE_C;
        [Instruction::from_raw(head), Instruction::from_raw(tail)]
    }

    /// Decode a wide instruction from its two words
    ///
    /// Returns `None` when `head` is not a marker word or its sub-opcode is
    /// not an extension opcode.
    pub fn decode(head: Instruction, tail: Instruction) -> Option<Self> {
        if head.op_field() != EXT_INDEX as u32 {
            return None;
        }
        let op = OpCode::from_index(subop(head))?;
        if !op.is_extended() {
            return None;
        }
        let raw = head.raw();
        let tail = tail.raw();
        Some(ExtInstruction {
            op,
            a: ((raw & mask(SIZE_WIDE_A, POS_WIDE_A)) >> POS_WIDE_A) as u16,
            b: ((tail & mask(SIZE_WIDE_B, POS_WIDE_B)) >> POS_WIDE_B) as u16,
            c: ((tail & mask(SIZE_WIDE_C, POS_WIDE_C)) >> POS_WIDE_C) as u16,
        })
    }
}

/// Sub-opcode field of a marker word
pub fn subop(head: Instruction) -> u16 {
    ((head.raw() & mask(SIZE_SUBOP, POS_SUBOP)) >> POS_SUBOP) as u16
}
