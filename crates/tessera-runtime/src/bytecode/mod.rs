//! Register machine instruction set
//!
//! Primary instructions are single 32-bit words in the classic
//! iABC/iABx/iAsBx/iAx formats. Type-specialized extension opcodes use a
//! two-word wide layout announced by the `Ext` marker in the OP field.

mod decode;
mod disasm;
mod extension;
mod instruction;
mod metadata;
mod opcode;

pub use decode::{decode_at, decode_stream, DecodeError, Decoded};
pub use disasm::{disassemble, format_instruction};
pub use extension::{
    specialize_arith, specialize_compare, subop, ArithOp, ArithSpec, ArrayGetSpec, ArrayKind,
    ArraySetSpec, CompareOp, CompareSpec, ExtInstruction, NumKind, Source, MAXARG_WIDE,
    POS_SUBOP, POS_WIDE_A, POS_WIDE_B, POS_WIDE_C, SIZE_SUBOP, SIZE_WIDE_A, SIZE_WIDE_B,
    SIZE_WIDE_C,
};
pub use instruction::{
    mask, rk, CodecError, Fields, Instruction, OpFormat, MAXARG_A, MAXARG_AX, MAXARG_B,
    MAXARG_BX, MAXARG_C, MAXARG_SBX, NO_REG, POS_A, POS_AX, POS_B, POS_BX, POS_C, POS_OP,
    SIZE_A, SIZE_AX, SIZE_B, SIZE_BX, SIZE_C, SIZE_OP,
};
pub use metadata::{
    is_documented_test, verify_table, MetadataError, OpArgMode, OpInfo, NUM_TEST_OPCODES,
    OP_INFO,
};
pub use opcode::{OpCode, EXT_INDEX, NUM_OPCODES, NUM_PRIMARY_OPCODES};
