//! Tessera Runtime - register VM core
//!
//! This library provides the pieces shared by the interpreter and the
//! native compiler:
//! - The instruction set: primary 32-bit encoding, type-specialized
//!   extension opcodes in a wide layout, and per-opcode metadata
//! - Values, function prototypes and the one-shot native code slot
//! - The VM state, call dispatch and the reference interpreter
//! - The entry points native code calls back into

/// Tessera runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bytecode;
pub mod proto;
pub mod value;
pub mod vm;

pub use bytecode::{Instruction, OpCode};
pub use proto::{
    CompileFailure, InstallOutcome, NativeCode, NativeCompiler, NativeEntry, Proto, ProtoBuilder,
    ProtoId,
};
pub use value::{FunctionHandle, RuntimeError, Value, ValueKind};
pub use vm::{DispatchOutcome, State, MULTRET};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
