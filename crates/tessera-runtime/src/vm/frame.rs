//! Call frame bookkeeping

use std::sync::Arc;

use crate::proto::Proto;

/// Activation record of a script function
///
/// ## Stack Layout
///
/// ```text
/// [ ... caller registers ... ][ callee ][ arg1 ][ arg2 ][ ... ]
///                              ^ func    ^ base = func + 1
/// ```
///
/// Register N of the frame is at `stack[base + N]`. On return, results are
/// moved down to start at `func`.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Prototype being executed
    pub proto: Arc<Proto>,
    /// Stack slot of the called function value
    pub func: usize,
    /// Results the caller expects, or -1 for all of them
    pub nresults: i32,
    /// Next instruction to execute when the frame is interpreted
    pub pc: usize,
    /// Caller's register window start, restored on return
    pub saved_base: usize,
    /// Caller's recorded top, restored on return
    pub saved_ci_top: usize,
}

impl CallFrame {
    /// Register window start of this frame
    pub fn base(&self) -> usize {
        self.func + 1
    }
}
