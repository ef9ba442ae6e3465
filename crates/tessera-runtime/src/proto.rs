//! Function prototypes
//!
//! A [`Proto`] is the immutable compiled form of one function: its code,
//! constants and frame size. It also owns the slot for the function's
//! native translation, which is written at most once. Concurrent
//! compilations of the same prototype race to [`Proto::install`]; the first
//! writer wins and every later result is discarded, so all callers observe
//! one installed entry point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::bytecode::{ExtInstruction, Instruction, OpCode};
use crate::value::Value;
use crate::vm::State;

static NEXT_PROTO_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique prototype identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoId(u64);

impl ProtoId {
    fn next() -> Self {
        ProtoId(NEXT_PROTO_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProtoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry point of a natively compiled function
///
/// Called with the frame already pushed; returns a non-negative status on
/// success and a negative one after recording a fault in the state.
pub type NativeEntry = unsafe extern "C" fn(*mut State) -> i32;

/// Handle to installed native code
#[derive(Debug, Clone, Copy)]
pub struct NativeCode {
    entry: NativeEntry,
}

impl NativeCode {
    /// # Safety
    ///
    /// `entry` must stay callable for the rest of the process and follow the
    /// native calling convention of this runtime: it runs the frame on top
    /// of the state's call stack and finishes it through the runtime's
    /// return entry point.
    pub unsafe fn from_entry(entry: NativeEntry) -> Self {
        NativeCode { entry }
    }

    pub fn entry(&self) -> NativeEntry {
        self.entry
    }

    pub fn address(&self) -> usize {
        self.entry as usize
    }
}

/// Whether an install call won the race for a prototype's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// Another translation was installed first; the offered one was dropped
    Discarded,
}

#[derive(Debug)]
pub struct Proto {
    id: ProtoId,
    name: String,
    code: Vec<Instruction>,
    constants: Vec<Value>,
    num_params: u8,
    max_stack: u16,
    native: OnceLock<NativeCode>,
    uncompilable: AtomicBool,
}

impl Proto {
    pub fn new(
        name: impl Into<String>,
        code: Vec<Instruction>,
        constants: Vec<Value>,
        num_params: u8,
        max_stack: u16,
    ) -> Self {
        Proto {
            id: ProtoId::next(),
            name: name.into(),
            code,
            constants,
            num_params,
            max_stack: max_stack.max(num_params as u16),
            native: OnceLock::new(),
            uncompilable: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ProtoId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Raw instruction words, the persisted form of the code
    pub fn words(&self) -> impl ExactSizeIterator<Item = u32> + '_ {
        self.code.iter().map(|ins| ins.raw())
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn constant(&self, index: usize) -> Option<Value> {
        self.constants.get(index).copied()
    }

    pub fn num_params(&self) -> u8 {
        self.num_params
    }

    /// Registers needed by one activation
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    /// Installed native code, if any
    pub fn native(&self) -> Option<&NativeCode> {
        self.native.get()
    }

    /// Offer a native translation for this prototype
    ///
    /// Returns the code that is installed after the call together with
    /// whether the offered code is the one that got installed.
    pub fn install(&self, code: NativeCode) -> (&NativeCode, InstallOutcome) {
        let mut outcome = InstallOutcome::Discarded;
        let installed = self.native.get_or_init(|| {
            outcome = InstallOutcome::Installed;
            code
        });
        (installed, outcome)
    }

    /// Whether native compilation already failed for this prototype
    pub fn is_uncompilable(&self) -> bool {
        self.uncompilable.load(Ordering::Acquire)
    }

    pub fn mark_uncompilable(&self) {
        self.uncompilable.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("native compilation of '{function}' failed: {reason}")]
pub struct CompileFailure {
    pub function: String,
    pub reason: String,
}

/// Native compilation service used by call dispatch
///
/// The runtime asks [`NativeCompiler::should_compile`] every time it is
/// about to enter an uncompiled prototype with compilation permitted, and
/// calls [`NativeCompiler::compile`] when the answer is yes. Implementations
/// must be callable from several threads at once.
pub trait NativeCompiler: Send + Sync {
    fn should_compile(&self, proto: &Proto) -> bool;

    fn compile(&self, proto: &Proto) -> Result<NativeCode, CompileFailure>;
}

/// Incremental prototype assembler
///
/// Stands in for a front end in tests, benches and embedders that build
/// code by hand.
#[derive(Debug, Clone)]
pub struct ProtoBuilder {
    name: String,
    code: Vec<Instruction>,
    constants: Vec<Value>,
    num_params: u8,
    max_stack: u16,
}

impl ProtoBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ProtoBuilder {
            name: name.into(),
            code: Vec::new(),
            constants: Vec::new(),
            num_params: 0,
            max_stack: 2,
        }
    }

    pub fn with_params(mut self, num_params: u8) -> Self {
        self.num_params = num_params;
        self
    }

    pub fn with_max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    /// Add a constant, reusing a bitwise-identical entry, and return its index
    pub fn constant(&mut self, value: Value) -> u32 {
        if let Some(index) = self.constants.iter().position(|k| *k == value) {
            return index as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Program counter of the next emitted word
    pub fn current_pc(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, ins: Instruction) -> usize {
        self.code.push(ins);
        self.code.len() - 1
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.emit(Instruction::abc(op, a, b, c))
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.emit(Instruction::abx(op, a, bx))
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.emit(Instruction::asbx(op, a, sbx))
    }

    pub fn emit_ax(&mut self, op: OpCode, ax: u32) -> usize {
        self.emit(Instruction::iax(op, ax))
    }

    /// Emit a wide extension instruction; returns the pc of its first word
    pub fn emit_ext(&mut self, op: OpCode, a: u16, b: u16, c: u16) -> usize {
        let pc = self.code.len();
        self.code
            .extend_from_slice(&ExtInstruction::new(op, a, b, c).encode());
        pc
    }

    /// Emit `JMP` with an unresolved offset
    pub fn emit_jump(&mut self) -> usize {
        self.emit_asbx(OpCode::Jmp, 0, 0)
    }

    /// Point the jump-format instruction at `jump_pc` to `target`
    pub fn patch_jump_to(&mut self, jump_pc: usize, target: usize) {
        let offset = target as i64 - (jump_pc as i64 + 1);
        self.code[jump_pc].set_sbx(offset as i32);
    }

    /// Point the jump-format instruction at `jump_pc` to the next emitted word
    pub fn patch_jump(&mut self, jump_pc: usize) {
        self.patch_jump_to(jump_pc, self.code.len());
    }

    pub fn build(self) -> Arc<Proto> {
        Arc::new(Proto::new(
            self.name,
            self.code,
            self.constants,
            self.num_params,
            self.max_stack,
        ))
    }
}
