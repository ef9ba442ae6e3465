//! Tessera JIT Compilation Engine
//!
//! Compiles Tessera prototypes to native code with Cranelift. The engine
//! plugs into the runtime as its [`NativeCompiler`]: once a prototype has
//! been entered `compilation_threshold` times, the next call compiles it
//! and installs the result, and every later call runs native code.
//!
//! ## Native subset
//!
//! Lowered inline: `MOVE`, `LOADK`, `LOADBOOL`, `LOADNIL`, `NOT`, `JMP`,
//! `TEST`, `TESTSET` and every type-specialized arithmetic, comparison and
//! negation opcode.
//!
//! Through runtime entry points: `CALL`, `TAILCALL`, `RETURN`, generic
//! arithmetic and bitwise operators, `EQ`, `LT`, `LE`, `FORPREP`,
//! `FORLOOP`.
//!
//! Anything else abandons the compile and the prototype stays interpreted.

pub mod backend;
mod codegen;
pub mod config;
pub mod hotspot;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cranelift_codegen::isa::OwnedTargetIsa;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use tessera_runtime::bytecode::DecodeError;
use tessera_runtime::{CompileFailure, NativeCode, NativeCompiler, OpCode, Proto};

pub use backend::NativeBackend;
pub use config::{ConfigError, JitConfig};
pub use hotspot::HotspotTracker;

/// JIT compilation errors
#[derive(Debug, Error)]
pub enum JitError {
    #[error("compilation failed: {0}")]
    CompilationFailed(String),

    #[error("unsupported opcode {opcode} at pc {pc}")]
    UnsupportedOpcode { opcode: OpCode, pc: usize },

    #[error("function too large ({words} words, limit: {limit})")]
    FunctionTooLarge { words: usize, limit: usize },

    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<DecodeError> for JitError {
    fn from(e: DecodeError) -> Self {
        JitError::InvalidBytecode(e.to_string())
    }
}

/// Result type for JIT operations
pub type JitResult<T> = Result<T, JitError>;

/// The main JIT engine: hotspot tracking, compilation and installation
///
/// Safe to share between threads. Each compilation gets its own Cranelift
/// module, so compilations of different (or the same) prototypes may run
/// concurrently; the prototype's install slot decides which result is used.
pub struct JitEngine {
    config: JitConfig,
    isa: OwnedTargetIsa,
    tracker: Mutex<HotspotTracker>,
    enabled: AtomicBool,
    /// Successful compilations
    compilations: AtomicU64,
    /// Compilations abandoned for interpretation
    failures: AtomicU64,
}

impl JitEngine {
    /// Create a new JIT engine with the given configuration
    pub fn new(config: JitConfig) -> JitResult<Self> {
        config.validate()?;
        let isa = backend::build_isa(config.cranelift_opt_level(), config.verify_ir)?;
        Ok(Self {
            tracker: Mutex::new(HotspotTracker::new(config.compilation_threshold)),
            enabled: AtomicBool::new(config.enabled),
            isa,
            config,
            compilations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Compile a prototype without installing it
    pub fn compile_function(&self, proto: &Proto) -> JitResult<NativeCode> {
        let words = proto.code().len();
        debug!(function = proto.name(), id = %proto.id(), words, "compiling");
        let result = if words > self.config.max_function_words {
            Err(JitError::FunctionTooLarge {
                words,
                limit: self.config.max_function_words,
            })
        } else {
            NativeBackend::with_isa(self.isa.clone()).and_then(|mut backend| backend.compile(proto))
        };
        match &result {
            Ok(code) => {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                debug!(function = proto.name(), address = code.address(), "compiled");
            }
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(function = proto.name(), %error, "compilation abandoned");
            }
        }
        result
    }

    /// Compile a prototype and install the result
    ///
    /// Returns the installed code, which is another thread's translation if
    /// that one was installed first.
    pub fn compile_now(&self, proto: &Proto) -> JitResult<NativeCode> {
        let code = self.compile_function(proto)?;
        let (installed, _) = proto.install(code);
        self.tracker.lock().mark_compiled(proto.id());
        Ok(*installed)
    }

    /// Whether JIT is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable JIT compilation
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable JIT compilation (installed code keeps running)
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Get statistics about the JIT engine
    pub fn stats(&self) -> JitStats {
        let tracker = self.tracker.lock();
        JitStats {
            compilations: self.compilations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            tracked_functions: tracker.tracked_count(),
            compiled_functions: tracker.compiled_count(),
        }
    }

    /// Reset counters and call tracking
    pub fn reset(&self) {
        self.tracker.lock().reset();
        self.compilations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }

    /// Get the compilation threshold
    pub fn threshold(&self) -> u64 {
        self.tracker.lock().threshold()
    }
}

impl NativeCompiler for JitEngine {
    fn should_compile(&self, proto: &Proto) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut tracker = self.tracker.lock();
        tracker.record_call(proto.id());
        tracker.is_hot(proto.id())
    }

    fn compile(&self, proto: &Proto) -> Result<NativeCode, CompileFailure> {
        let result = self.compile_function(proto);
        // Failed prototypes are not retried either
        self.tracker.lock().mark_compiled(proto.id());
        result.map_err(|e| CompileFailure {
            function: proto.name().to_string(),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for JitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitEngine")
            .field("config", &self.config)
            .field("isa", &self.isa.name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics from the JIT engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitStats {
    /// Total JIT compilations performed
    pub compilations: u64,
    /// Compilations that fell back to interpretation
    pub failures: u64,
    /// Number of prototypes being tracked
    pub tracked_functions: usize,
    /// Number of prototypes compiled or given up on
    pub compiled_functions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_runtime::ProtoBuilder;

    fn unit() -> std::sync::Arc<Proto> {
        let mut b = ProtoBuilder::new("unit");
        b.emit_abc(OpCode::Return, 0, 1, 0);
        b.build()
    }

    #[test]
    fn test_threshold_gates_compilation() {
        let config = JitConfig {
            compilation_threshold: 3,
            ..JitConfig::for_testing()
        };
        let engine = JitEngine::new(config).unwrap();
        let proto = unit();
        assert!(!engine.should_compile(&proto));
        assert!(!engine.should_compile(&proto));
        assert!(engine.should_compile(&proto));
        assert_eq!(engine.threshold(), 3);
    }

    #[test]
    fn test_disabled_engine_declines() {
        let engine = JitEngine::new(JitConfig::for_testing()).unwrap();
        engine.disable();
        assert!(!engine.should_compile(&unit()));
        engine.enable();
        assert!(engine.is_enabled());
        assert!(engine.should_compile(&unit()));
    }

    #[test]
    fn test_compile_now_installs() {
        let engine = JitEngine::new(JitConfig::for_testing()).unwrap();
        let proto = unit();
        let code = engine.compile_now(&proto).unwrap();
        assert_eq!(proto.native().map(NativeCode::address), Some(code.address()));
        let stats = engine.stats();
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.compiled_functions, 1);

        engine.reset();
        assert_eq!(engine.stats().compilations, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = JitConfig {
            opt_level: 7,
            ..JitConfig::for_testing()
        };
        assert!(matches!(JitEngine::new(config), Err(JitError::Config(_))));
    }

    #[test]
    fn test_too_large() {
        let config = JitConfig {
            max_function_words: 1,
            ..JitConfig::for_testing()
        };
        let engine = JitEngine::new(config).unwrap();
        let mut b = ProtoBuilder::new("big");
        b.emit_abc(OpCode::LoadNil, 0, 0, 0);
        b.emit_abc(OpCode::Return, 0, 1, 0);
        let proto = b.build();
        assert!(matches!(
            engine.compile_function(&proto),
            Err(JitError::FunctionTooLarge { words: 2, limit: 1 })
        ));
        assert_eq!(engine.stats().failures, 1);
    }
}
