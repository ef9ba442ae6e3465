//! Primary 32-bit instruction encoding
//!
//! ```text
//!  31        23        14        6      0
//!  |    B    |    C    |    A    |  OP  |   iABC
//!  |        Bx         |    A    |  OP  |   iABx / iAsBx
//!  |             Ax              |  OP  |   iAx
//! ```
//!
//! sBx is stored with an excess-K bias where K = MAXARG_BX >> 1. B and C
//! operands in RK positions use their top bit to select the constant table.

use std::fmt;

use thiserror::Error;

use super::opcode::OpCode;

pub const SIZE_OP: u32 = 6;
pub const SIZE_A: u32 = 8;
pub const SIZE_B: u32 = 9;
pub const SIZE_C: u32 = 9;
pub const SIZE_BX: u32 = SIZE_B + SIZE_C;
pub const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C;

pub const POS_OP: u32 = 0;
pub const POS_A: u32 = POS_OP + SIZE_OP;
pub const POS_C: u32 = POS_A + SIZE_A;
pub const POS_B: u32 = POS_C + SIZE_C;
pub const POS_BX: u32 = POS_C;
pub const POS_AX: u32 = POS_A;

pub const MAXARG_A: u32 = (1 << SIZE_A) - 1;
pub const MAXARG_B: u32 = (1 << SIZE_B) - 1;
pub const MAXARG_C: u32 = (1 << SIZE_C) - 1;
pub const MAXARG_BX: u32 = (1 << SIZE_BX) - 1;
pub const MAXARG_AX: u32 = (1 << SIZE_AX) - 1;
pub const MAXARG_SBX: i32 = (MAXARG_BX >> 1) as i32;

/// "No register" sentinel for the A field
pub const NO_REG: u32 = MAXARG_A;

/// `n` one bits starting at bit `p`
pub const fn mask(n: u32, p: u32) -> u32 {
    (!((!0u32) << n)) << p
}

/// Constant/register tagging for B and C operands
pub mod rk {
    use super::SIZE_B;

    /// Set on an RK operand that refers to the constant table
    pub const BITRK: u32 = 1 << (SIZE_B - 1);
    /// Largest constant index an RK operand can address
    pub const MAXINDEXRK: u32 = BITRK - 1;

    pub const fn is_constant(x: u32) -> bool {
        x & BITRK != 0
    }

    pub const fn index(x: u32) -> u32 {
        x & !BITRK
    }

    pub const fn as_constant(k: u32) -> u32 {
        k | BITRK
    }
}

/// Physical operand layout of a primary instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpFormat {
    Abc,
    Abx,
    AsBx,
    Ax,
}

/// Decoded operand fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fields {
    Abc { a: u32, b: u32, c: u32 },
    Abx { a: u32, bx: u32 },
    AsBx { a: u32, sbx: i32 },
    Ax { ax: u32 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("operand {field} = {value} is outside 0..={max}")]
    FieldOutOfRange {
        field: &'static str,
        value: i64,
        max: i64,
    },

    #[error("sBx = {value} is outside {min}..={max}")]
    JumpOutOfRange { value: i64, min: i64, max: i64 },

    #[error("opcode {0} has no single-word encoding")]
    NotPrimary(OpCode),
}

fn check_field(field: &'static str, value: u32, max: u32) -> Result<(), CodecError> {
    if value > max {
        return Err(CodecError::FieldOutOfRange {
            field,
            value: value as i64,
            max: max as i64,
        });
    }
    Ok(())
}

impl Fields {
    pub const fn format(&self) -> OpFormat {
        match self {
            Fields::Abc { .. } => OpFormat::Abc,
            Fields::Abx { .. } => OpFormat::Abx,
            Fields::AsBx { .. } => OpFormat::AsBx,
            Fields::Ax { .. } => OpFormat::Ax,
        }
    }

    /// Verify every field fits its width
    pub fn check(&self) -> Result<(), CodecError> {
        match *self {
            Fields::Abc { a, b, c } => {
                check_field("A", a, MAXARG_A)?;
                check_field("B", b, MAXARG_B)?;
                check_field("C", c, MAXARG_C)
            }
            Fields::Abx { a, bx } => {
                check_field("A", a, MAXARG_A)?;
                check_field("Bx", bx, MAXARG_BX)
            }
            Fields::AsBx { a, sbx } => {
                check_field("A", a, MAXARG_A)?;
                let min = -MAXARG_SBX;
                let max = MAXARG_BX as i32 - MAXARG_SBX;
                if sbx < min || sbx > max {
                    return Err(CodecError::JumpOutOfRange {
                        value: sbx as i64,
                        min: min as i64,
                        max: max as i64,
                    });
                }
                Ok(())
            }
            Fields::Ax { ax } => check_field("Ax", ax, MAXARG_AX),
        }
    }
}

/// One 32-bit instruction word
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Instruction(u32);

impl Instruction {
    pub const fn from_raw(raw: u32) -> Self {
        Instruction(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Pack an opcode and its fields
    ///
    /// Field widths are a caller precondition: they are checked in debug
    /// builds and masked otherwise. Use [`Instruction::try_encode`] for
    /// untrusted input.
    pub fn encode(op: OpCode, fields: Fields) -> Self {
        debug_assert!(op.is_primary(), "{op} has no single-word encoding");
        debug_assert!(fields.check().is_ok(), "{op}: {:?}", fields.check());
        let raw = match fields {
            Fields::Abc { a, b, c } => {
                (a << POS_A) & mask(SIZE_A, POS_A)
                    | (b << POS_B) & mask(SIZE_B, POS_B)
                    | (c << POS_C) & mask(SIZE_C, POS_C)
            }
            Fields::Abx { a, bx } => {
                (a << POS_A) & mask(SIZE_A, POS_A) | (bx << POS_BX) & mask(SIZE_BX, POS_BX)
            }
            Fields::AsBx { a, sbx } => {
                let bx = (sbx + MAXARG_SBX) as u32;
                (a << POS_A) & mask(SIZE_A, POS_A) | (bx << POS_BX) & mask(SIZE_BX, POS_BX)
            }
            Fields::Ax { ax } => (ax << POS_AX) & mask(SIZE_AX, POS_AX),
        };
        Instruction(raw | (op.index() as u32) << POS_OP)
    }

    /// Checked variant of [`Instruction::encode`]
    pub fn try_encode(op: OpCode, fields: Fields) -> Result<Self, CodecError> {
        if !op.is_primary() {
            return Err(CodecError::NotPrimary(op));
        }
        fields.check()?;
        Ok(Self::encode(op, fields))
    }

    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        Self::encode(op, Fields::Abc { a, b, c })
    }

    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        Self::encode(op, Fields::Abx { a, bx })
    }

    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::encode(op, Fields::AsBx { a, sbx })
    }

    pub fn iax(op: OpCode, ax: u32) -> Self {
        Self::encode(op, Fields::Ax { ax })
    }

    /// Unpack the fields of this word according to `format`
    pub const fn decode(self, format: OpFormat) -> Fields {
        match format {
            OpFormat::Abc => Fields::Abc {
                a: self.a(),
                b: self.b(),
                c: self.c(),
            },
            OpFormat::Abx => Fields::Abx {
                a: self.a(),
                bx: self.bx(),
            },
            OpFormat::AsBx => Fields::AsBx {
                a: self.a(),
                sbx: self.sbx(),
            },
            OpFormat::Ax => Fields::Ax { ax: self.ax() },
        }
    }

    /// Raw 6-bit OP field
    pub const fn op_field(self) -> u32 {
        (self.0 & mask(SIZE_OP, POS_OP)) >> POS_OP
    }

    /// Opcode of the instruction starting at this word
    ///
    /// For a marker word this is the extension opcode named by its
    /// sub-opcode field. `None` means the word does not start a valid
    /// instruction.
    pub fn opcode(self) -> Option<OpCode> {
        let field = self.op_field() as u16;
        if field == OpCode::Ext.index() {
            let op = OpCode::from_index(super::extension::subop(self))?;
            return op.is_extended().then_some(op);
        }
        OpCode::from_index(field).filter(|op| op.is_primary())
    }

    pub const fn a(self) -> u32 {
        (self.0 & mask(SIZE_A, POS_A)) >> POS_A
    }

    pub const fn b(self) -> u32 {
        (self.0 & mask(SIZE_B, POS_B)) >> POS_B
    }

    pub const fn c(self) -> u32 {
        (self.0 & mask(SIZE_C, POS_C)) >> POS_C
    }

    pub const fn bx(self) -> u32 {
        (self.0 & mask(SIZE_BX, POS_BX)) >> POS_BX
    }

    pub const fn sbx(self) -> i32 {
        self.bx() as i32 - MAXARG_SBX
    }

    pub const fn ax(self) -> u32 {
        (self.0 & mask(SIZE_AX, POS_AX)) >> POS_AX
    }

    fn set_field(&mut self, value: u32, size: u32, pos: u32) {
        self.0 = (self.0 & !mask(size, pos)) | ((value << pos) & mask(size, pos));
    }

    pub fn set_a(&mut self, a: u32) {
        debug_assert!(a <= MAXARG_A);
        self.set_field(a, SIZE_A, POS_A);
    }

    pub fn set_b(&mut self, b: u32) {
        debug_assert!(b <= MAXARG_B);
        self.set_field(b, SIZE_B, POS_B);
    }

    pub fn set_c(&mut self, c: u32) {
        debug_assert!(c <= MAXARG_C);
        self.set_field(c, SIZE_C, POS_C);
    }

    pub fn set_bx(&mut self, bx: u32) {
        debug_assert!(bx <= MAXARG_BX);
        self.set_field(bx, SIZE_BX, POS_BX);
    }

    pub fn set_sbx(&mut self, sbx: i32) {
        self.set_bx((sbx + MAXARG_SBX) as u32);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction({:#010x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(POS_A, 6);
        assert_eq!(POS_C, 14);
        assert_eq!(POS_B, 23);
        assert_eq!(POS_BX, 14);
        assert_eq!(MAXARG_BX, 262_143);
        assert_eq!(MAXARG_SBX, 131_071);
        assert_eq!(rk::BITRK, 256);
        assert_eq!(rk::MAXINDEXRK, 255);
        assert_eq!(NO_REG, 255);
    }

    #[test]
    fn test_abc_bit_positions() {
        let ins = Instruction::abc(OpCode::Call, 2, 3, 2);
        assert_eq!(ins.raw(), 36 | 2 << 6 | 2 << 14 | 3 << 23);
        assert_eq!(ins.opcode(), Some(OpCode::Call));
        assert_eq!((ins.a(), ins.b(), ins.c()), (2, 3, 2));
    }

    #[test]
    fn test_sbx_bias() {
        let back = Instruction::asbx(OpCode::Jmp, 0, -1);
        assert_eq!(back.bx(), MAXARG_SBX as u32 - 1);
        assert_eq!(back.sbx(), -1);
        let zero = Instruction::asbx(OpCode::Jmp, 0, 0);
        assert_eq!(zero.bx(), MAXARG_SBX as u32);
    }

    #[test]
    fn test_setters_preserve_other_fields() {
        let mut ins = Instruction::abc(OpCode::Add, 1, 2, 3);
        ins.set_b(rk::as_constant(7));
        assert_eq!(ins.a(), 1);
        assert_eq!(ins.c(), 3);
        assert!(rk::is_constant(ins.b()));
        assert_eq!(rk::index(ins.b()), 7);

        let mut jmp = Instruction::asbx(OpCode::Jmp, 0, 0);
        jmp.set_sbx(-42);
        assert_eq!(jmp.sbx(), -42);
        assert_eq!(jmp.opcode(), Some(OpCode::Jmp));
    }

    #[test]
    fn test_ax_constructor_and_getter() {
        let extra = Instruction::iax(OpCode::ExtraArg, MAXARG_AX);
        assert_eq!(extra.opcode(), Some(OpCode::ExtraArg));
        assert_eq!(extra.ax(), MAXARG_AX);
        assert_eq!(extra.raw() >> 6, MAXARG_AX);
        assert_eq!(extra.decode(OpFormat::Ax), Fields::Ax { ax: MAXARG_AX });
    }

    #[test]
    fn test_check_rejects_wide_fields() {
        assert!(matches!(
            Fields::Abc { a: 256, b: 0, c: 0 }.check(),
            Err(CodecError::FieldOutOfRange { field: "A", .. })
        ));
        assert!(matches!(
            Fields::AsBx { a: 0, sbx: MAXARG_SBX + 2 }.check(),
            Err(CodecError::JumpOutOfRange { .. })
        ));
        assert!(Fields::Ax { ax: MAXARG_AX }.check().is_ok());
    }

    #[test]
    fn test_try_encode_rejects_extension_opcodes() {
        assert_eq!(
            Instruction::try_encode(OpCode::UnmF, Fields::Abc { a: 0, b: 0, c: 0 }),
            Err(CodecError::NotPrimary(OpCode::UnmF))
        );
    }

    #[test]
    fn test_unassigned_primary_field_is_not_an_opcode() {
        // OP values 48..=63 are extension indices; they only exist as sub-opcodes
        assert_eq!(Instruction::from_raw(50).opcode(), None);
    }
}
