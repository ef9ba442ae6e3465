//! Native code generation backend
//!
//! Wraps a Cranelift `JITModule` with the runtime entry points registered
//! as imports. Compiled code is never freed: a `JITModule` leaks its code
//! memory on drop, which keeps every installed entry point valid for the
//! rest of the process.

use cranelift_codegen::ir::{types, AbiParam, Signature};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use tracing::trace;

use tessera_runtime::vm::abi;
use tessera_runtime::{NativeCode, NativeEntry, Proto};

use crate::codegen;
use crate::config::opt_level_name;
use crate::{JitError, JitResult};

/// Build the host ISA with the given optimization level
pub fn build_isa(opt_level: &str, verify: bool) -> JitResult<OwnedTargetIsa> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", opt_level)
        .map_err(|e| JitError::CompilationFailed(format!("failed to set opt_level: {}", e)))?;
    flag_builder
        .set("enable_verifier", if verify { "true" } else { "false" })
        .map_err(|e| {
            JitError::CompilationFailed(format!("failed to set enable_verifier: {}", e))
        })?;
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| JitError::CompilationFailed(format!("failed to set libcall mode: {}", e)))?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| JitError::CompilationFailed(format!("failed to set is_pic: {}", e)))?;

    let isa_builder = cranelift_native::builder().map_err(|e| {
        JitError::CompilationFailed(format!("failed to create ISA builder: {}", e))
    })?;
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| JitError::CompilationFailed(format!("failed to create ISA: {}", e)))
}

/// Runtime entry points declared in a module
#[derive(Debug, Clone, Copy)]
pub(crate) struct RuntimeImports {
    pub precall: FuncId,
    pub interpret: FuncId,
    pub ret: FuncId,
    pub arith: FuncId,
    pub compare: FuncId,
    pub forprep: FuncId,
    pub forloop: FuncId,
}

fn register_runtime_symbols(builder: &mut JITBuilder) {
    builder.symbol("tessera_precall", abi::tessera_precall as *const u8);
    builder.symbol("tessera_interpret", abi::tessera_interpret as *const u8);
    builder.symbol("tessera_return", abi::tessera_return as *const u8);
    builder.symbol("tessera_arith", abi::tessera_arith as *const u8);
    builder.symbol("tessera_compare", abi::tessera_compare as *const u8);
    builder.symbol("tessera_forprep", abi::tessera_forprep as *const u8);
    builder.symbol("tessera_forloop", abi::tessera_forloop as *const u8);
}

impl RuntimeImports {
    fn declare(module: &mut JITModule) -> JitResult<Self> {
        // Every entry point takes the state pointer then i32 operands
        let mut declare = |name: &str, int_params: usize| -> JitResult<FuncId> {
            let mut sig = module.make_signature();
            sig.params
                .push(AbiParam::new(module.target_config().pointer_type()));
            for _ in 0..int_params {
                sig.params.push(AbiParam::new(types::I32));
            }
            sig.returns.push(AbiParam::new(types::I32));
            module
                .declare_function(name, Linkage::Import, &sig)
                .map_err(|e| {
                    JitError::CompilationFailed(format!("failed to declare {}: {}", name, e))
                })
        };
        Ok(Self {
            precall: declare("tessera_precall", 3)?,
            interpret: declare("tessera_interpret", 0)?,
            ret: declare("tessera_return", 2)?,
            arith: declare("tessera_arith", 4)?,
            compare: declare("tessera_compare", 3)?,
            forprep: declare("tessera_forprep", 1)?,
            forloop: declare("tessera_forloop", 1)?,
        })
    }
}

/// Compiles prototypes to native functions
pub struct NativeBackend {
    module: JITModule,
    imports: RuntimeImports,
    ctx: Context,
    compiled: usize,
}

impl NativeBackend {
    /// Create a backend for the host with the given optimization level
    pub fn new(opt_level: u8) -> JitResult<Self> {
        Self::with_isa(build_isa(opt_level_name(opt_level), true)?)
    }

    pub fn with_isa(isa: OwnedTargetIsa) -> JitResult<Self> {
        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        register_runtime_symbols(&mut builder);
        let mut module = JITModule::new(builder);
        let imports = RuntimeImports::declare(&mut module)?;
        let ctx = module.make_context();
        Ok(Self {
            module,
            imports,
            ctx,
            compiled: 0,
        })
    }

    /// `fn(*mut State) -> i32`
    fn entry_signature(&self) -> Signature {
        let mut sig = self.module.make_signature();
        sig.params
            .push(AbiParam::new(self.module.target_config().pointer_type()));
        sig.returns.push(AbiParam::new(types::I32));
        sig
    }

    /// Compile one prototype to native code
    pub fn compile(&mut self, proto: &Proto) -> JitResult<NativeCode> {
        let sig = self.entry_signature();
        self.ctx.func.signature = sig.clone();

        let mut builder_ctx = FunctionBuilderContext::new();
        let lowered = codegen::lower(
            &mut self.module,
            &self.imports,
            &mut self.ctx.func,
            &mut builder_ctx,
            proto,
        );
        if let Err(e) = lowered {
            self.module.clear_context(&mut self.ctx);
            return Err(e);
        }
        trace!(function = proto.name(), ir = %self.ctx.func.display(), "lowered");

        let name = format!("tessera_fn_{}_{}", proto.id(), self.compiled);
        let defined = self
            .module
            .declare_function(&name, Linkage::Local, &sig)
            .and_then(|id| self.module.define_function(id, &mut self.ctx).map(|()| id));
        self.module.clear_context(&mut self.ctx);
        let func_id = defined.map_err(|e| {
            JitError::CompilationFailed(format!("failed to define {}: {}", name, e))
        })?;

        self.module.finalize_definitions().map_err(|e| {
            JitError::CompilationFailed(format!("failed to finalize definitions: {}", e))
        })?;
        let code_ptr = self.module.get_finalized_function(func_id);
        self.compiled += 1;

        // SAFETY: the function was built with the `fn(*mut State) -> i32`
        // signature in the host calling convention
        let entry = unsafe { std::mem::transmute::<*const u8, NativeEntry>(code_ptr) };
        // SAFETY: lowered code finishes its frame through `tessera_return`
        // and the module never frees its code memory
        Ok(unsafe { NativeCode::from_entry(entry) })
    }

    /// Number of functions compiled by this backend
    pub fn compiled_count(&self) -> usize {
        self.compiled
    }

    /// Name of the target architecture
    pub fn target_arch(&self) -> String {
        self.module.isa().triple().architecture.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_runtime::{OpCode, ProtoBuilder};

    #[test]
    fn test_backend_creation() {
        let backend = NativeBackend::new(0).unwrap();
        assert_eq!(backend.compiled_count(), 0);
        assert!(!backend.target_arch().is_empty());
    }

    #[test]
    fn test_compile_return() {
        let mut b = ProtoBuilder::new("unit");
        b.emit_abc(OpCode::Return, 0, 1, 0);
        let proto = b.build();
        let mut backend = NativeBackend::new(1).unwrap();
        let code = backend.compile(&proto).unwrap();
        assert_ne!(code.address(), 0);
        assert_eq!(backend.compiled_count(), 1);
    }

    #[test]
    fn test_backend_recovers_after_failure() {
        let mut bad = ProtoBuilder::new("bad");
        bad.emit_abc(OpCode::NewTable, 0, 0, 0);
        bad.emit_abc(OpCode::Return, 0, 1, 0);
        let mut good = ProtoBuilder::new("good");
        good.emit_abc(OpCode::Return, 0, 1, 0);

        let mut backend = NativeBackend::new(0).unwrap();
        assert!(matches!(
            backend.compile(&bad.build()),
            Err(JitError::UnsupportedOpcode {
                opcode: OpCode::NewTable,
                pc: 0
            })
        ));
        assert!(backend.compile(&good.build()).is_ok());
        assert_eq!(backend.compiled_count(), 1);
    }
}
