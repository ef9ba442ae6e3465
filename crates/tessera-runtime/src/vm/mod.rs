//! Register virtual machine state and call dispatch
//!
//! A [`State`] owns one value stack, the frames of the script functions
//! currently executing on it, and the registry of callable functions.
//!
//! Every call, from the interpreter and from native code alike, goes
//! through [`State::precall`]. It runs host functions to completion, runs
//! script functions that have (or can get) native code, and otherwise
//! leaves a fresh frame for the interpreter. Its [`DispatchOutcome`] tells
//! the caller which of the three happened, because only a completed host
//! call leaves the value stack cursor where the caller must re-align it.

pub mod abi;
mod arith;
mod frame;
mod interpreter;

pub use abi::DispatchOutcome;
pub use arith::{
    arith, arith_specialized, compare, compare_code, compare_from_code, compare_specialized,
    for_loop, for_prep, values_equal, Operator,
};
pub use frame::CallFrame;

use std::any::Any;
use std::fmt;
use std::mem::offset_of;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::proto::{InstallOutcome, NativeCode, NativeCompiler, Proto};
use crate::value::{FunctionHandle, RuntimeError, Value, ValueKind};

/// Request every result of a call
pub const MULTRET: i32 = -1;

/// Maximum nesting of script frames
pub const MAX_CALL_DEPTH: usize = 200;

/// Maximum number of stack slots
pub const MAX_STACK_SLOTS: usize = 1 << 20;

const BASIC_STACK_SIZE: usize = 64;

pub const STATE_TOP_OFFSET: i32 = offset_of!(State, top) as i32;
pub const STATE_BASE_OFFSET: i32 = offset_of!(State, base) as i32;
pub const STATE_CI_TOP_OFFSET: i32 = offset_of!(State, ci_top) as i32;
pub const STATE_STACK_OFFSET: i32 = offset_of!(State, stack_ptr) as i32;

/// Host function signature
pub type HostFn = dyn Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> + Send + Sync;

/// An entry in the function registry
#[derive(Clone)]
pub enum Callable {
    /// Function implemented by the embedder
    Host { name: String, function: Arc<HostFn> },
    /// Bytecode function
    Script(Arc<Proto>),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Host { name, .. } => write!(f, "Host({})", name),
            Callable::Script(proto) => write!(f, "Script({})", proto.name()),
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Execution state of one thread of the VM
///
/// The first four fields are read and written by native code at the
/// `STATE_*_OFFSET` offsets. All cursors are absolute slot indices into the
/// value stack; `stack_ptr` caches the stack's base address and is refreshed
/// whenever the stack is reallocated or native code is entered.
#[repr(C)]
pub struct State {
    /// Value stack cursor: one past the last live slot
    top: usize,
    /// Register window start of the running frame
    base: usize,
    /// Recorded top of the running frame
    ci_top: usize,
    stack_ptr: *mut Value,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    functions: Vec<Callable>,
    compiler: Option<Arc<dyn NativeCompiler>>,
    fault: Option<RuntimeError>,
}

impl State {
    pub fn new() -> Self {
        let mut stack = vec![Value::NIL; BASIC_STACK_SIZE];
        let stack_ptr = stack.as_mut_ptr();
        State {
            top: 0,
            base: 0,
            ci_top: 0,
            stack_ptr,
            stack,
            frames: Vec::new(),
            functions: Vec::new(),
            compiler: None,
            fault: None,
        }
    }

    /// Create a state that compiles script functions on demand
    pub fn with_compiler(compiler: Arc<dyn NativeCompiler>) -> Self {
        let mut state = State::new();
        state.compiler = Some(compiler);
        state
    }

    pub fn set_compiler(&mut self, compiler: Option<Arc<dyn NativeCompiler>>) {
        self.compiler = compiler;
    }

    // ===== Function registry =====

    /// Register a host function and return a value that calls it
    pub fn register_host<F>(&mut self, name: impl Into<String>, function: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> + Send + Sync + 'static,
    {
        self.register(Callable::Host {
            name: name.into(),
            function: Arc::new(function),
        })
    }

    /// Register a script function and return a value that calls it
    pub fn register_script(&mut self, proto: Arc<Proto>) -> Value {
        self.register(Callable::Script(proto))
    }

    fn register(&mut self, callable: Callable) -> Value {
        let handle = FunctionHandle(self.functions.len() as u32);
        self.functions.push(callable);
        Value::function(handle)
    }

    pub fn callable(&self, value: Value) -> Result<&Callable, RuntimeError> {
        match value.kind() {
            ValueKind::Function(handle) => self
                .functions
                .get(handle.0 as usize)
                .ok_or(RuntimeError::InvalidFunction(handle.0)),
            _ => Err(RuntimeError::CallNonFunction {
                type_name: value.type_name(),
            }),
        }
    }

    // ===== Stack access =====

    pub fn top(&self) -> usize {
        self.top
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn ci_top(&self) -> usize {
        self.ci_top
    }

    /// Number of active script frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn slot(&self, index: usize) -> Value {
        self.stack.get(index).copied().unwrap_or(Value::NIL)
    }

    /// Values in `[from, top)`
    pub fn slots_from(&self, from: usize) -> &[Value] {
        &self.stack[from.min(self.top)..self.top]
    }

    /// Push a value at the cursor
    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.ensure_stack(self.top + 1)?;
        self.stack[self.top] = value;
        self.top += 1;
        Ok(())
    }

    /// Move the cursor, growing the stack as needed
    pub fn set_top(&mut self, top: usize) -> Result<(), RuntimeError> {
        self.ensure_stack(top)?;
        self.top = top;
        Ok(())
    }

    fn ensure_stack(&mut self, needed: usize) -> Result<(), RuntimeError> {
        if needed <= self.stack.len() {
            return Ok(());
        }
        if needed > MAX_STACK_SLOTS {
            return Err(RuntimeError::StackOverflow);
        }
        let new_len = needed.max(self.stack.len() * 2).min(MAX_STACK_SLOTS);
        self.stack.resize(new_len, Value::NIL);
        self.sync_stack_ptr();
        trace!(slots = new_len, "grew value stack");
        Ok(())
    }

    pub(crate) fn sync_stack_ptr(&mut self) {
        self.stack_ptr = self.stack.as_mut_ptr();
    }

    fn current_frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::NoActiveFrame)
    }

    fn current_frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)
    }

    /// Resolve an RK operand of the running frame
    pub(crate) fn rk(&self, operand: u32) -> Result<Value, RuntimeError> {
        use crate::bytecode::rk;
        if rk::is_constant(operand) {
            let frame = self.current_frame()?;
            frame
                .proto
                .constant(rk::index(operand) as usize)
                .ok_or(RuntimeError::MalformedInstruction { pc: frame.pc })
        } else {
            Ok(self.stack[self.base + operand as usize])
        }
    }

    // ===== Faults =====

    /// Record a fault for native code and return the fault status
    pub(crate) fn raise(&mut self, error: RuntimeError) -> i32 {
        self.fault = Some(error);
        abi::STATUS_FAULT
    }

    fn take_fault(&mut self, status: i32) -> RuntimeError {
        self.fault
            .take()
            .unwrap_or(RuntimeError::NativeFault { status })
    }

    // ===== Calls =====

    /// Dispatch a call to the function value at stack slot `func`
    ///
    /// Arguments occupy `[func + 1, top)`. `nresults` is the number of
    /// results the caller wants, or [`MULTRET`] for all of them.
    ///
    /// - A host function runs to completion. Its results start at `func`
    ///   and `top` is left one past the last of them; with a fixed result
    ///   count the results are padded with nil and the recorded top is set
    ///   to `func + nresults`, which the caller must copy back into `top`.
    /// - A script function gets a new frame. If it has native code, or
    ///   `allow_compile` is set and the compiler agrees to compile it, the
    ///   native code runs to completion and results are already in place.
    ///   Otherwise the frame is left for the interpreter.
    pub fn precall(
        &mut self,
        func: usize,
        nresults: i32,
        allow_compile: bool,
    ) -> Result<DispatchOutcome, RuntimeError> {
        let callable = self.callable(self.slot(func))?.clone();
        match callable {
            Callable::Host { name, function } => {
                let args = &self.stack[func + 1..self.top.max(func + 1)];
                let results = panic::catch_unwind(AssertUnwindSafe(|| function(args)))
                    .map_err(|payload| RuntimeError::HostPanic {
                        function: name.clone(),
                        message: panic_message(payload.as_ref()),
                    })??;
                let count = results.len();
                let wanted = usize::try_from(nresults).ok();
                self.ensure_stack(func + count.max(wanted.unwrap_or(0)))?;
                self.stack[func..func + count].copy_from_slice(&results);
                self.top = func + count;
                if let Some(wanted) = wanted {
                    for slot in &mut self.stack[func + count.min(wanted)..func + wanted] {
                        *slot = Value::NIL;
                    }
                    self.ci_top = func + wanted;
                }
                trace!(function = %name, results = count, "host call completed");
                Ok(DispatchOutcome::HostCallCompleted)
            }
            Callable::Script(proto) => {
                self.push_frame(func, nresults, &proto)?;
                if let Some(code) = proto.native().copied() {
                    trace!(function = proto.name(), "entering native code");
                    self.run_native(code)?;
                    return Ok(DispatchOutcome::CompiledCallCompleted);
                }
                if allow_compile {
                    if let Some(code) = self.compile(&proto) {
                        self.run_native(code)?;
                        return Ok(DispatchOutcome::CompiledCallCompleted);
                    }
                }
                trace!(function = proto.name(), "needs interpretation");
                Ok(DispatchOutcome::NeedsInterpretation)
            }
        }
    }

    fn push_frame(&mut self, func: usize, nresults: i32, proto: &Arc<Proto>) -> Result<(), RuntimeError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }
        let base = func + 1;
        let nargs = self.top.saturating_sub(base);
        let frame_top = base + proto.max_stack() as usize;
        self.ensure_stack(frame_top)?;
        // Missing parameters and all other registers start as nil
        let first_free = base + nargs.min(proto.num_params() as usize);
        for slot in &mut self.stack[first_free..frame_top] {
            *slot = Value::NIL;
        }
        self.frames.push(CallFrame {
            proto: Arc::clone(proto),
            func,
            nresults,
            pc: 0,
            saved_base: self.base,
            saved_ci_top: self.ci_top,
        });
        self.base = base;
        self.ci_top = frame_top;
        self.top = frame_top;
        Ok(())
    }

    fn compile(&self, proto: &Proto) -> Option<NativeCode> {
        let compiler = self.compiler.as_ref()?;
        if proto.is_uncompilable() || !compiler.should_compile(proto) {
            return None;
        }
        match compiler.compile(proto) {
            Ok(code) => {
                let (installed, outcome) = proto.install(code);
                if outcome == InstallOutcome::Discarded {
                    debug!(
                        function = proto.name(),
                        "lost install race, using the installed translation"
                    );
                }
                Some(*installed)
            }
            Err(failure) => {
                proto.mark_uncompilable();
                warn!(%failure, "falling back to interpretation");
                None
            }
        }
    }

    fn run_native(&mut self, code: NativeCode) -> Result<(), RuntimeError> {
        self.sync_stack_ptr();
        // SAFETY: NativeCode is only constructed for entry points that follow
        // the runtime's native calling convention
        let status = unsafe { (code.entry())(self as *mut State) };
        if status < 0 {
            return Err(self.take_fault(status));
        }
        Ok(())
    }

    /// Finish the running frame with `count` results starting at slot `first`
    ///
    /// Results move down to the frame's function slot. A fixed result
    /// count is padded with nil; `top` ends one past the last result.
    pub(crate) fn poscall(&mut self, first: usize, count: usize) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or(RuntimeError::NoActiveFrame)?;
        let res = frame.func;
        let wanted = usize::try_from(frame.nresults).unwrap_or(count);
        self.ensure_stack(res + wanted)?;
        for i in 0..wanted {
            self.stack[res + i] = if i < count {
                self.stack[first + i]
            } else {
                Value::NIL
            };
        }
        self.top = res + wanted;
        self.base = frame.saved_base;
        self.ci_top = frame.saved_ci_top;
        Ok(())
    }

    /// Interpret the frame on top of the call stack until it returns
    pub fn interpret(&mut self) -> Result<(), RuntimeError> {
        interpreter::execute(self)
    }

    /// Call a function value with `args`
    ///
    /// Returns exactly `nresults` values, or every result for [`MULTRET`].
    /// On error all frames pushed by this call are discarded.
    pub fn call(
        &mut self,
        function: Value,
        args: &[Value],
        nresults: i32,
    ) -> Result<Vec<Value>, RuntimeError> {
        let depth = self.frames.len();
        let (saved_base, saved_ci_top) = (self.base, self.ci_top);
        let func = self.top;

        let outcome = self.call_at(func, function, args, nresults);
        let results = outcome.map(|()| self.stack[func..self.top].to_vec());

        if let Err(error) = &results {
            debug!(%error, depth = self.frames.len().saturating_sub(depth), "unwinding after error");
            self.frames.truncate(depth);
        }
        self.top = func;
        self.base = saved_base;
        self.ci_top = saved_ci_top;
        results
    }

    fn call_at(
        &mut self,
        func: usize,
        function: Value,
        args: &[Value],
        nresults: i32,
    ) -> Result<(), RuntimeError> {
        self.ensure_stack(func + 1 + args.len())?;
        self.stack[func] = function;
        self.stack[func + 1..func + 1 + args.len()].copy_from_slice(args);
        self.top = func + 1 + args.len();
        match self.precall(func, nresults, true)? {
            DispatchOutcome::NeedsInterpretation => self.interpret()?,
            DispatchOutcome::HostCallCompleted if nresults >= 0 => self.top = self.ci_top,
            _ => {}
        }
        Ok(())
    }
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("top", &self.top)
            .field("base", &self.base)
            .field("ci_top", &self.ci_top)
            .field("stack_len", &self.stack.len())
            .field("frames", &self.frames.len())
            .field("functions", &self.functions)
            .field("compiler", &self.compiler.is_some())
            .finish()
    }
}
