//! `CALL` lowering
//!
//! Every call goes through the runtime's `precall`, which reports which of
//! three things happened. Only an interpreted callee needs more work here,
//! and only a completed host call with a fixed result count leaves the
//! value stack cursor where it must be re-aligned.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{InstBuilder, MemFlags};

use tessera_runtime::vm::{STATE_BASE_OFFSET, STATE_CI_TOP_OFFSET, STATE_TOP_OFFSET};
use tessera_runtime::DispatchOutcome;

use super::Lowering;

impl Lowering<'_> {
    /// `R(A), ..., R(A+C-2) := R(A)(R(A+1), ..., R(A+B-1))`
    ///
    /// `B = 0` takes the arguments up to the current cursor; `C = 0` keeps
    /// every result and leaves the cursor after the last one.
    pub(super) fn lower_call(&mut self, a: u32, b: u32, c: u32) {
        if b != 0 {
            let base = self.state_field(STATE_BASE_OFFSET);
            let top = self.builder.ins().iadd_imm(base, i64::from(a + b));
            self.builder
                .ins()
                .store(MemFlags::trusted(), top, self.state, STATE_TOP_OFFSET);
        }

        let precall = self.helpers.precall;
        let outcome = self.call_runtime(precall, &[a as i32, c as i32 - 1, 1]);
        self.exit_on_fault(outcome);

        let interpret_block = self.builder.create_block();
        let dispatched = self.builder.create_block();
        let done = self.builder.create_block();

        let needs_interpretation = self.builder.ins().icmp_imm(
            IntCC::Equal,
            outcome,
            i64::from(DispatchOutcome::NeedsInterpretation.code()),
        );
        self.builder
            .ins()
            .brif(needs_interpretation, interpret_block, &[], dispatched, &[]);

        self.builder.switch_to_block(interpret_block);
        let interpret = self.helpers.interpret;
        let status = self.call_runtime(interpret, &[]);
        self.exit_on_fault(status);
        self.builder.ins().jump(done, &[]);

        self.builder.switch_to_block(dispatched);
        if c != 0 {
            let realign = self.builder.create_block();
            let host_completed = self.builder.ins().icmp_imm(
                IntCC::Equal,
                outcome,
                i64::from(DispatchOutcome::HostCallCompleted.code()),
            );
            self.builder
                .ins()
                .brif(host_completed, realign, &[], done, &[]);

            self.builder.switch_to_block(realign);
            let ci_top = self.state_field(STATE_CI_TOP_OFFSET);
            self.builder
                .ins()
                .store(MemFlags::trusted(), ci_top, self.state, STATE_TOP_OFFSET);
        }
        self.builder.ins().jump(done, &[]);

        self.builder.switch_to_block(done);
    }
}
