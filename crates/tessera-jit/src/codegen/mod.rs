//! Bytecode-to-IR lowering
//!
//! Registers stay in the VM's value stack: every access goes through the
//! state's stack pointer and window base, both reloaded at each use since
//! any runtime call may grow the stack. Basic blocks start at branch
//! targets and after every instruction that ends a block. Control never
//! leaves the function except through `RETURN`/`TAILCALL` or a fault.

mod call;

use std::collections::{BTreeSet, HashMap};

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::immediates::Ieee64;
use cranelift_codegen::ir::{
    types, Block, FuncRef, Function, InstBuilder, MemFlags, Type, Value as IrValue,
};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::Module;

use tessera_runtime::bytecode::{
    decode_stream, ArithOp, ArithSpec, CompareOp, CompareSpec, Decoded, Fields, NumKind, Source,
};
use tessera_runtime::value::{
    TAG_BOOLEAN, TAG_INTEGER, TAG_NIL, TAG_NUMBER, VALUE_BITS_OFFSET, VALUE_SIZE,
    VALUE_TAG_OFFSET,
};
use tessera_runtime::vm::{compare_code, Operator, STATE_BASE_OFFSET, STATE_STACK_OFFSET};
use tessera_runtime::{OpCode, Proto, Value};

use crate::backend::RuntimeImports;
use crate::{JitError, JitResult};

/// Runtime entry points referenced from the function being built
struct Helpers {
    precall: FuncRef,
    interpret: FuncRef,
    ret: FuncRef,
    arith: FuncRef,
    compare: FuncRef,
    forprep: FuncRef,
    forloop: FuncRef,
}

impl Helpers {
    fn declare(module: &mut JITModule, imports: &RuntimeImports, func: &mut Function) -> Self {
        Self {
            precall: module.declare_func_in_func(imports.precall, func),
            interpret: module.declare_func_in_func(imports.interpret, func),
            ret: module.declare_func_in_func(imports.ret, func),
            arith: module.declare_func_in_func(imports.arith, func),
            compare: module.declare_func_in_func(imports.compare, func),
            forprep: module.declare_func_in_func(imports.forprep, func),
            forloop: module.declare_func_in_func(imports.forloop, func),
        }
    }
}

/// Lower `proto` into `func`, whose signature is `fn(*mut State) -> i32`
pub(crate) fn lower(
    module: &mut JITModule,
    imports: &RuntimeImports,
    func: &mut Function,
    builder_ctx: &mut FunctionBuilderContext,
    proto: &Proto,
) -> JitResult<()> {
    let code = decode_stream(proto.code())?;
    let leaders = block_starts(&code)?;
    let ptr = module.target_config().pointer_type();
    let helpers = Helpers::declare(module, imports, func);

    let mut builder = FunctionBuilder::new(func, builder_ctx);
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    let state = builder.block_params(entry)[0];
    let blocks = leaders
        .iter()
        .map(|&pc| (pc, builder.create_block()))
        .collect();

    let mut lowering = Lowering {
        builder,
        proto,
        helpers,
        blocks,
        state,
        ptr,
    };
    lowering.lower_body(&code)?;
    lowering.builder.seal_all_blocks();
    lowering.builder.finalize();
    Ok(())
}

/// Branch targets of `ins` besides falling through, and whether it ends
/// its block
fn branch_targets(ins: &Decoded) -> JitResult<(Vec<isize>, bool)> {
    let next = ins.next_pc() as isize;
    let jump = || {
        ins.jump_target()
            .ok_or_else(|| malformed(ins, "jump without an sBx field"))
    };
    Ok(match ins.op {
        OpCode::Jmp | OpCode::ForPrep => (vec![jump()?], true),
        OpCode::ForLoop => (vec![jump()?, next], true),
        OpCode::Eq
        | OpCode::Lt
        | OpCode::Le
        | OpCode::Test
        | OpCode::TestSet
        | OpCode::Compare(_) => (vec![next, next + 1], true),
        OpCode::LoadBool => match ins.fields {
            Fields::Abc { c, .. } if c != 0 => (vec![next + 1], true),
            _ => (Vec::new(), false),
        },
        OpCode::Return | OpCode::TailCall => (Vec::new(), true),
        _ => (Vec::new(), false),
    })
}

/// Program counters that start a basic block
fn block_starts(code: &[Decoded]) -> JitResult<BTreeSet<usize>> {
    if code.is_empty() {
        return Err(JitError::InvalidBytecode("empty function".to_string()));
    }
    let starts: BTreeSet<usize> = code.iter().map(|ins| ins.pc).collect();
    let mut leaders = BTreeSet::from([0]);

    for (i, ins) in code.iter().enumerate() {
        let (targets, ends_block) = branch_targets(ins)?;
        for target in targets {
            let valid = usize::try_from(target)
                .ok()
                .filter(|pc| starts.contains(pc));
            let Some(pc) = valid else {
                return Err(malformed(
                    ins,
                    &format!("branch target {} is not an instruction", target),
                ));
            };
            leaders.insert(pc);
        }
        if ins.op.is_test() && code.get(i + 1).map(|next| next.op) != Some(OpCode::Jmp) {
            return Err(malformed(ins, "test is not followed by a jump"));
        }
        if ends_block && i + 1 < code.len() {
            leaders.insert(ins.next_pc());
        }
        if !ends_block && i + 1 == code.len() {
            return Err(malformed(ins, "control falls off the end of the function"));
        }
    }
    Ok(leaders)
}

fn malformed(ins: &Decoded, what: &str) -> JitError {
    JitError::InvalidBytecode(format!("{} at pc {}: {}", ins.op, ins.pc, what))
}

fn abc(ins: &Decoded) -> JitResult<(u32, u32, u32)> {
    match ins.fields {
        Fields::Abc { a, b, c } => Ok((a, b, c)),
        _ => Err(malformed(ins, "expected A, B, C operands")),
    }
}

/// `A` of a jump-format instruction
fn asbx_a(ins: &Decoded) -> JitResult<u32> {
    match ins.fields {
        Fields::AsBx { a, .. } => Ok(a),
        _ => Err(malformed(ins, "expected A, sBx operands")),
    }
}

fn abx(ins: &Decoded) -> JitResult<(u32, u32)> {
    match ins.fields {
        Fields::Abx { a, bx } => Ok((a, bx)),
        _ => Err(malformed(ins, "expected A, Bx operands")),
    }
}

/// Byte offset of a field of register `r` from the register window
fn slot_offset(r: u32, field: usize) -> i32 {
    (r as usize * VALUE_SIZE + field) as i32
}

/// Zero-extended immediate for an `i32` operand
fn imm32(value: i32) -> i64 {
    i64::from(value as u32)
}

struct Lowering<'a> {
    builder: FunctionBuilder<'a>,
    proto: &'a Proto,
    helpers: Helpers,
    blocks: HashMap<usize, Block>,
    /// The `*mut State` parameter
    state: IrValue,
    ptr: Type,
}

impl<'a> Lowering<'a> {
    fn lower_body(&mut self, code: &[Decoded]) -> JitResult<()> {
        let first = self.block_at(0)?;
        self.builder.ins().jump(first, &[]);
        let mut terminated = true;

        for ins in code {
            if let Some(&block) = self.blocks.get(&ins.pc) {
                if !terminated {
                    self.builder.ins().jump(block, &[]);
                }
                self.builder.switch_to_block(block);
            }
            terminated = self.lower_instruction(ins)?;
        }
        Ok(())
    }

    fn block_at(&self, pc: usize) -> JitResult<Block> {
        self.blocks
            .get(&pc)
            .copied()
            .ok_or_else(|| JitError::InvalidBytecode(format!("no block starts at pc {}", pc)))
    }

    fn jump_block(&self, ins: &Decoded) -> JitResult<Block> {
        let target = ins
            .jump_target()
            .and_then(|t| usize::try_from(t).ok())
            .ok_or_else(|| malformed(ins, "invalid jump target"))?;
        self.block_at(target)
    }

    fn unsupported(ins: &Decoded) -> JitResult<bool> {
        Err(JitError::UnsupportedOpcode {
            opcode: ins.op,
            pc: ins.pc,
        })
    }

    /// Emit one instruction; returns whether it ended the current block
    fn lower_instruction(&mut self, ins: &Decoded) -> JitResult<bool> {
        match ins.op {
            // ===== Loads and moves =====
            OpCode::Move => {
                let (a, b, _) = abc(ins)?;
                self.copy_register(a, b);
                Ok(false)
            }
            OpCode::LoadK => {
                let (a, bx) = abx(ins)?;
                let k = self.constant(bx, ins)?;
                self.store_constant(a, k);
                Ok(false)
            }
            OpCode::LoadBool => {
                let (a, b, c) = abc(ins)?;
                self.store_constant(a, Value::boolean(b != 0));
                if c != 0 {
                    let skip = self.block_at(ins.next_pc() + 1)?;
                    self.builder.ins().jump(skip, &[]);
                    return Ok(true);
                }
                Ok(false)
            }
            OpCode::LoadNil => {
                let (a, b, _) = abc(ins)?;
                for r in a..=a + b {
                    self.store_constant(r, Value::NIL);
                }
                Ok(false)
            }
            OpCode::LoadKx | OpCode::ExtraArg => Self::unsupported(ins),

            // ===== Upvalues, tables and closures =====
            OpCode::GetUpval
            | OpCode::GetTabUp
            | OpCode::GetTable
            | OpCode::SetTabUp
            | OpCode::SetUpval
            | OpCode::SetTable
            | OpCode::NewTable
            | OpCode::SelfLookup
            | OpCode::Len
            | OpCode::Concat
            | OpCode::SetList
            | OpCode::Closure
            | OpCode::VarArg => Self::unsupported(ins),

            // ===== Generic arithmetic through the runtime =====
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::Unm
            | OpCode::BNot => {
                let (a, b, c) = abc(ins)?;
                let op = Operator::from_opcode(ins.op)
                    .ok_or_else(|| malformed(ins, "no runtime operator"))?;
                let c = if op.is_unary() { 0 } else { c };
                let helper = self.helpers.arith;
                let status = self.call_runtime(
                    helper,
                    &[op.code(), a as i32, b as i32, c as i32],
                );
                self.exit_on_fault(status);
                Ok(false)
            }
            OpCode::Not => {
                let (a, b, _) = abc(ins)?;
                let falsy = self.falsy(b);
                let bits = self.builder.ins().uextend(types::I64, falsy);
                self.store_bits(a, TAG_BOOLEAN, bits);
                Ok(false)
            }

            // ===== Control flow =====
            OpCode::Jmp => {
                let target = self.jump_block(ins)?;
                self.builder.ins().jump(target, &[]);
                Ok(true)
            }
            OpCode::Eq | OpCode::Lt | OpCode::Le => {
                let (a, b, c) = abc(ins)?;
                let op = match ins.op {
                    OpCode::Eq => CompareOp::Eq,
                    OpCode::Lt => CompareOp::Lt,
                    _ => CompareOp::Le,
                };
                let helper = self.helpers.compare;
                let status = self.call_runtime(helper, &[compare_code(op), b as i32, c as i32]);
                self.exit_on_fault(status);
                let holds = self.builder.ins().icmp_imm(IntCC::NotEqual, status, 0);
                self.branch_test(ins, holds, a != 0)?;
                Ok(true)
            }
            OpCode::Test => {
                let (a, _, c) = abc(ins)?;
                let truthy = self.truthy(a);
                self.branch_test(ins, truthy, c != 0)?;
                Ok(true)
            }
            OpCode::TestSet => {
                let (a, b, c) = abc(ins)?;
                let truthy = self.truthy(b);
                let set = self.builder.create_block();
                let jmp = self.block_at(ins.next_pc())?;
                let skip = self.block_at(ins.next_pc() + 1)?;
                if c != 0 {
                    self.builder.ins().brif(truthy, set, &[], skip, &[]);
                } else {
                    self.builder.ins().brif(truthy, skip, &[], set, &[]);
                }
                self.builder.switch_to_block(set);
                self.copy_register(a, b);
                self.builder.ins().jump(jmp, &[]);
                Ok(true)
            }
            OpCode::Call => {
                let (a, b, c) = abc(ins)?;
                self.lower_call(a, b, c);
                Ok(false)
            }
            OpCode::TailCall => {
                let (a, b, _) = abc(ins)?;
                self.lower_call(a, b, 0);
                self.lower_return(a, 0);
                Ok(true)
            }
            OpCode::Return => {
                let (a, b, _) = abc(ins)?;
                self.lower_return(a, b);
                Ok(true)
            }
            OpCode::ForPrep => {
                let a = asbx_a(ins)?;
                let helper = self.helpers.forprep;
                let status = self.call_runtime(helper, &[a as i32]);
                self.exit_on_fault(status);
                let target = self.jump_block(ins)?;
                self.builder.ins().jump(target, &[]);
                Ok(true)
            }
            OpCode::ForLoop => {
                let a = asbx_a(ins)?;
                let helper = self.helpers.forloop;
                let continues = self.call_runtime(helper, &[a as i32]);
                self.exit_on_fault(continues);
                let body = self.jump_block(ins)?;
                let exit = self.block_at(ins.next_pc())?;
                self.builder.ins().brif(continues, body, &[], exit, &[]);
                Ok(true)
            }
            OpCode::TForCall | OpCode::TForLoop => Self::unsupported(ins),

            // ===== Type-specialized extensions =====
            OpCode::Ext => Err(malformed(ins, "bare extension marker")),
            OpCode::UnmF => {
                let (a, b, _) = abc(ins)?;
                let v = self.load_float(b);
                let negated = self.builder.ins().fneg(v);
                self.store_bits(a, TAG_NUMBER, negated);
                Ok(false)
            }
            OpCode::UnmI => {
                let (a, b, _) = abc(ins)?;
                let v = self.load_int(b);
                let negated = self.builder.ins().ineg(v);
                self.store_bits(a, TAG_INTEGER, negated);
                Ok(false)
            }
            OpCode::Arith(spec) => {
                let (a, b, c) = abc(ins)?;
                self.lower_arith(ins, spec, a, b, c)?;
                Ok(false)
            }
            OpCode::Compare(spec) => {
                let (a, b, c) = abc(ins)?;
                let holds = self.lower_compare(ins, spec, b, c)?;
                self.branch_test(ins, holds, a != 0)?;
                Ok(true)
            }
            OpCode::ArrayGet(_) | OpCode::ArraySet(_) => Self::unsupported(ins),
        }
    }

    // ===== Specialized arithmetic =====

    fn lower_arith(
        &mut self,
        ins: &Decoded,
        spec: ArithSpec,
        a: u32,
        b: u32,
        c: u32,
    ) -> JitResult<()> {
        match spec.result_kind() {
            NumKind::Int => {
                let lhs = self.int_operand(ins, spec.lhs_src, b)?;
                let rhs = self.int_operand(ins, spec.rhs_src, c)?;
                let result = match spec.op {
                    ArithOp::Add => self.builder.ins().iadd(lhs, rhs),
                    ArithOp::Sub => self.builder.ins().isub(lhs, rhs),
                    ArithOp::Mul => self.builder.ins().imul(lhs, rhs),
                    ArithOp::Div => return Err(malformed(ins, "integer-valued division")),
                };
                self.store_bits(a, TAG_INTEGER, result);
            }
            NumKind::Float => {
                let lhs = self.float_operand(ins, spec.lhs_src, spec.lhs, b)?;
                let rhs = self.float_operand(ins, spec.rhs_src, spec.rhs, c)?;
                let result = match spec.op {
                    ArithOp::Add => self.builder.ins().fadd(lhs, rhs),
                    ArithOp::Sub => self.builder.ins().fsub(lhs, rhs),
                    ArithOp::Mul => self.builder.ins().fmul(lhs, rhs),
                    ArithOp::Div => self.builder.ins().fdiv(lhs, rhs),
                };
                self.store_bits(a, TAG_NUMBER, result);
            }
        }
        Ok(())
    }

    fn lower_compare(
        &mut self,
        ins: &Decoded,
        spec: CompareSpec,
        b: u32,
        c: u32,
    ) -> JitResult<IrValue> {
        Ok(match spec.kind {
            NumKind::Int => {
                let lhs = self.int_operand(ins, spec.lhs_src, b)?;
                let rhs = self.int_operand(ins, spec.rhs_src, c)?;
                let cc = match spec.op {
                    CompareOp::Eq => IntCC::Equal,
                    CompareOp::Lt => IntCC::SignedLessThan,
                    CompareOp::Le => IntCC::SignedLessThanOrEqual,
                };
                self.builder.ins().icmp(cc, lhs, rhs)
            }
            NumKind::Float => {
                let lhs = self.float_operand(ins, spec.lhs_src, NumKind::Float, b)?;
                let rhs = self.float_operand(ins, spec.rhs_src, NumKind::Float, c)?;
                let cc = match spec.op {
                    CompareOp::Eq => FloatCC::Equal,
                    CompareOp::Lt => FloatCC::LessThan,
                    CompareOp::Le => FloatCC::LessThanOrEqual,
                };
                self.builder.ins().fcmp(cc, lhs, rhs)
            }
        })
    }

    fn int_operand(&mut self, ins: &Decoded, src: Source, index: u32) -> JitResult<IrValue> {
        Ok(match src {
            Source::Reg => self.load_int(index),
            Source::Const => {
                let k = self.constant(index, ins)?;
                self.builder.ins().iconst(types::I64, k.bits() as i64)
            }
        })
    }

    /// Operand as a float; integer operands are converted
    fn float_operand(
        &mut self,
        ins: &Decoded,
        src: Source,
        kind: NumKind,
        index: u32,
    ) -> JitResult<IrValue> {
        Ok(match (kind, src) {
            (NumKind::Int, _) => {
                let i = self.int_operand(ins, src, index)?;
                self.builder.ins().fcvt_from_sint(types::F64, i)
            }
            (NumKind::Float, Source::Reg) => self.load_float(index),
            (NumKind::Float, Source::Const) => {
                let k = self.constant(index, ins)?;
                self.builder.ins().f64const(Ieee64::with_bits(k.bits()))
            }
        })
    }

    // ===== Branching =====

    /// End a test instruction: go to the following `JMP` when `cond` equals
    /// `when`, otherwise skip it
    fn branch_test(&mut self, ins: &Decoded, cond: IrValue, when: bool) -> JitResult<()> {
        let jmp = self.block_at(ins.next_pc())?;
        let skip = self.block_at(ins.next_pc() + 1)?;
        if when {
            self.builder.ins().brif(cond, jmp, &[], skip, &[]);
        } else {
            self.builder.ins().brif(cond, skip, &[], jmp, &[]);
        }
        Ok(())
    }

    /// Return `status` from the function if it reports a fault
    fn exit_on_fault(&mut self, status: IrValue) {
        let fault = self
            .builder
            .ins()
            .icmp_imm(IntCC::SignedLessThan, status, 0);
        let exit = self.builder.create_block();
        let cont = self.builder.create_block();
        self.builder.ins().brif(fault, exit, &[], cont, &[]);
        self.builder.switch_to_block(exit);
        self.builder.ins().return_(&[status]);
        self.builder.switch_to_block(cont);
    }

    fn lower_return(&mut self, a: u32, b: u32) {
        let helper = self.helpers.ret;
        let status = self.call_runtime(helper, &[a as i32, b as i32]);
        self.builder.ins().return_(&[status]);
    }

    /// Call a runtime entry point with the state and `i32` operands
    fn call_runtime(&mut self, func: FuncRef, args: &[i32]) -> IrValue {
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(self.state);
        for &arg in args {
            values.push(self.builder.ins().iconst(types::I32, imm32(arg)));
        }
        let inst = self.builder.ins().call(func, &values);
        self.builder.inst_results(inst)[0]
    }

    // ===== Register access =====

    fn constant(&self, index: u32, ins: &Decoded) -> JitResult<Value> {
        self.proto
            .constant(index as usize)
            .ok_or_else(|| malformed(ins, &format!("constant {} out of range", index)))
    }

    fn state_field(&mut self, offset: i32) -> IrValue {
        self.builder
            .ins()
            .load(self.ptr, MemFlags::trusted(), self.state, offset)
    }

    /// Address of register 0 of the running frame
    fn registers(&mut self) -> IrValue {
        let stack = self.state_field(STATE_STACK_OFFSET);
        let base = self.state_field(STATE_BASE_OFFSET);
        let offset = self.builder.ins().imul_imm(base, VALUE_SIZE as i64);
        self.builder.ins().iadd(stack, offset)
    }

    fn load_field(&mut self, ty: Type, r: u32, field: usize) -> IrValue {
        let regs = self.registers();
        self.builder
            .ins()
            .load(ty, MemFlags::trusted(), regs, slot_offset(r, field))
    }

    fn load_int(&mut self, r: u32) -> IrValue {
        self.load_field(types::I64, r, VALUE_BITS_OFFSET)
    }

    fn load_float(&mut self, r: u32) -> IrValue {
        self.load_field(types::F64, r, VALUE_BITS_OFFSET)
    }

    /// Store a value with a known tag; `bits` may be `i64` or `f64`
    fn store_bits(&mut self, r: u32, tag: u64, bits: IrValue) {
        let tag = self.builder.ins().iconst(types::I64, tag as i64);
        self.store_tagged(r, tag, bits);
    }

    fn store_tagged(&mut self, r: u32, tag: IrValue, bits: IrValue) {
        let regs = self.registers();
        let flags = MemFlags::trusted();
        self.builder
            .ins()
            .store(flags, tag, regs, slot_offset(r, VALUE_TAG_OFFSET));
        self.builder
            .ins()
            .store(flags, bits, regs, slot_offset(r, VALUE_BITS_OFFSET));
    }

    fn store_constant(&mut self, r: u32, value: Value) {
        let bits = self.builder.ins().iconst(types::I64, value.bits() as i64);
        self.store_bits(r, value.tag(), bits);
    }

    fn copy_register(&mut self, dst: u32, src: u32) {
        let tag = self.load_field(types::I64, src, VALUE_TAG_OFFSET);
        let bits = self.load_int(src);
        self.store_tagged(dst, tag, bits);
    }

    /// `nil` or `false`, as an `i8` flag
    fn falsy(&mut self, r: u32) -> IrValue {
        let tag = self.load_field(types::I64, r, VALUE_TAG_OFFSET);
        let bits = self.load_int(r);
        let is_nil = self.builder.ins().icmp_imm(IntCC::Equal, tag, TAG_NIL as i64);
        let is_bool = self
            .builder
            .ins()
            .icmp_imm(IntCC::Equal, tag, TAG_BOOLEAN as i64);
        let is_zero = self.builder.ins().icmp_imm(IntCC::Equal, bits, 0);
        let is_false = self.builder.ins().band(is_bool, is_zero);
        self.builder.ins().bor(is_nil, is_false)
    }

    fn truthy(&mut self, r: u32) -> IrValue {
        let falsy = self.falsy(r);
        self.builder.ins().icmp_imm(IntCC::Equal, falsy, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_runtime::bytecode::rk;
    use tessera_runtime::ProtoBuilder;

    fn leaders(proto: &Proto) -> JitResult<Vec<usize>> {
        let code = decode_stream(proto.code())?;
        Ok(block_starts(&code)?.into_iter().collect())
    }

    #[test]
    fn test_leaders_of_conditional() {
        let mut b = ProtoBuilder::new("f").with_params(2);
        b.emit_abc(OpCode::Lt, 1, 0, 1);
        let jmp = b.emit_jump();
        b.emit_abc(OpCode::Move, 0, 1, 0);
        b.patch_jump(jmp);
        b.emit_abc(OpCode::Return, 0, 2, 0);
        assert_eq!(leaders(&b.build()).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_leaders_of_loop() {
        let mut b = ProtoBuilder::new("loop").with_max_stack(5);
        let prep = b.emit_asbx(OpCode::ForPrep, 0, 0);
        let body = b.emit_abc(OpCode::Add, 4, 4, rk::as_constant(0));
        let back = b.emit_asbx(OpCode::ForLoop, 0, 0);
        b.patch_jump_to(prep, back);
        b.patch_jump_to(back, body);
        b.emit_abc(OpCode::Return, 4, 2, 0);
        assert_eq!(leaders(&b.build()).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_test_without_jump_is_rejected() {
        let mut b = ProtoBuilder::new("f");
        b.emit_abc(OpCode::Test, 0, 0, 0);
        b.emit_abc(OpCode::Return, 0, 1, 0);
        assert!(matches!(leaders(&b.build()), Err(JitError::InvalidBytecode(_))));
    }

    #[test]
    fn test_falling_off_the_end_is_rejected() {
        let mut b = ProtoBuilder::new("f");
        b.emit_abc(OpCode::Move, 0, 1, 0);
        assert!(matches!(leaders(&b.build()), Err(JitError::InvalidBytecode(_))));
    }

    #[test]
    fn test_jump_into_wide_instruction_is_rejected() {
        let mut b = ProtoBuilder::new("f");
        let jmp = b.emit_jump();
        b.emit_ext(OpCode::UnmI, 0, 0, 0);
        b.emit_abc(OpCode::Return, 0, 1, 0);
        b.patch_jump_to(jmp, 2);
        assert!(matches!(leaders(&b.build()), Err(JitError::InvalidBytecode(_))));
    }
}
