//! Per-opcode metadata
//!
//! One [`OpInfo`] entry per opcode, indexed by [`OpCode::index`]. The table
//! is built at compile time and checked for completeness by
//! [`verify_table`], which also runs as a compile-time assertion.

use thiserror::Error;

use super::instruction::OpFormat;
use super::opcode::{OpCode, NUM_OPCODES};

/// How an instruction uses its B or C operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpArgMode {
    /// Not used
    N,
    /// Used as a plain value
    U,
    /// Register or jump offset
    R,
    /// Constant or register (RK)
    K,
}

/// Static description of one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub opcode: OpCode,
    /// Logical format; extension opcodes report `Abc` and are physically wide
    pub format: OpFormat,
    pub b_mode: OpArgMode,
    pub c_mode: OpArgMode,
    /// Whether the instruction writes R(A)
    pub sets_a: bool,
    /// Whether the next instruction is a jump consumed as part of this one
    pub is_test: bool,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("no opcode is assigned to index {0}")]
    Gap(u16),

    #[error("table entry {index} describes opcode index {found}")]
    Misplaced { index: u16, found: u16 },

    #[error("is-test flag of {0} disagrees with the documented test set")]
    TestFlag(OpCode),

    #[error("table flags {found} test opcodes, expected {expected}")]
    TestCount { expected: usize, found: usize },
}

const fn info(
    opcode: OpCode,
    is_test: bool,
    sets_a: bool,
    b_mode: OpArgMode,
    c_mode: OpArgMode,
    format: OpFormat,
) -> OpInfo {
    OpInfo {
        opcode,
        format,
        b_mode,
        c_mode,
        sets_a,
        is_test,
    }
}

const fn describe(op: OpCode) -> OpInfo {
    use OpArgMode::{K, N, R, U};
    use OpFormat::{Abc, Abx, AsBx, Ax};

    match op {
        OpCode::Move => info(op, false, true, R, N, Abc),
        OpCode::LoadK => info(op, false, true, K, N, Abx),
        OpCode::LoadKx => info(op, false, true, N, N, Abx),
        OpCode::LoadBool => info(op, false, true, U, U, Abc),
        OpCode::LoadNil => info(op, false, true, U, N, Abc),
        OpCode::GetUpval => info(op, false, true, U, N, Abc),
        OpCode::GetTabUp => info(op, false, true, U, K, Abc),
        OpCode::GetTable => info(op, false, true, R, K, Abc),
        OpCode::SetTabUp => info(op, false, false, K, K, Abc),
        OpCode::SetUpval => info(op, false, false, U, N, Abc),
        OpCode::SetTable => info(op, false, false, K, K, Abc),
        OpCode::NewTable => info(op, false, true, U, U, Abc),
        OpCode::SelfLookup => info(op, false, true, R, K, Abc),
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
        | OpCode::Shr => info(op, false, true, K, K, Abc),
        OpCode::Unm | OpCode::BNot | OpCode::Not | OpCode::Len => {
            info(op, false, true, R, N, Abc)
        }
        OpCode::Concat => info(op, false, true, R, R, Abc),
        OpCode::Jmp => info(op, false, false, R, N, AsBx),
        OpCode::Eq | OpCode::Lt | OpCode::Le => info(op, true, false, K, K, Abc),
        OpCode::Test => info(op, true, false, N, U, Abc),
        OpCode::TestSet => info(op, true, true, R, U, Abc),
        OpCode::Call | OpCode::TailCall => info(op, false, true, U, U, Abc),
        OpCode::Return => info(op, false, false, U, N, Abc),
        OpCode::ForLoop | OpCode::ForPrep => info(op, false, true, R, N, AsBx),
        OpCode::TForCall => info(op, false, false, N, U, Abc),
        OpCode::TForLoop => info(op, false, true, R, N, AsBx),
        OpCode::SetList => info(op, false, false, U, U, Abc),
        OpCode::Closure => info(op, false, true, U, N, Abx),
        OpCode::VarArg => info(op, false, true, U, N, Abc),
        OpCode::ExtraArg => info(op, false, false, U, U, Ax),
        OpCode::Ext => info(op, false, false, N, N, Abc),
        OpCode::UnmF | OpCode::UnmI => info(op, false, true, R, N, Abc),
        OpCode::Arith(_) => info(op, false, true, K, K, Abc),
        OpCode::Compare(_) => info(op, true, false, K, K, Abc),
        OpCode::ArrayGet(_) => info(op, false, true, R, K, Abc),
        OpCode::ArraySet(_) => info(op, false, false, K, K, Abc),
    }
}

const fn build_table() -> [OpInfo; NUM_OPCODES] {
    // Slots that no opcode claims keep the placeholder and fail verification
    let placeholder = describe(OpCode::Move);
    let mut table = [placeholder; NUM_OPCODES];
    let mut index = 0;
    while index < NUM_OPCODES {
        if let Some(op) = OpCode::from_index(index as u16) {
            table[index] = describe(op);
        }
        index += 1;
    }
    table
}

/// Metadata for every opcode, indexed by opcode index
pub static OP_INFO: [OpInfo; NUM_OPCODES] = build_table();

/// Number of test opcodes: five primary plus the 24 specialized comparisons
pub const NUM_TEST_OPCODES: usize = 29;

/// Whether `op` belongs to the documented test set
///
/// A test instruction is always followed by a `Jmp`; the pair executes as
/// one conditional branch.
pub const fn is_documented_test(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Test
            | OpCode::TestSet
            | OpCode::Compare(_)
    )
}

/// Check that the table covers every opcode exactly once, in order, and
/// that its is-test flags match the documented test set
pub const fn verify_table() -> Result<(), MetadataError> {
    verify_entries(&build_table(), NUM_TEST_OPCODES)
}

const fn verify_entries(
    table: &[OpInfo; NUM_OPCODES],
    expected_tests: usize,
) -> Result<(), MetadataError> {
    let mut index = 0;
    let mut tests = 0;
    while index < NUM_OPCODES {
        let Some(op) = OpCode::from_index(index as u16) else {
            return Err(MetadataError::Gap(index as u16));
        };
        let entry = table[index];
        if entry.opcode.index() != index as u16 {
            return Err(MetadataError::Misplaced {
                index: index as u16,
                found: entry.opcode.index(),
            });
        }
        if entry.is_test != is_documented_test(op) {
            return Err(MetadataError::TestFlag(op));
        }
        if entry.is_test {
            tests += 1;
        }
        index += 1;
    }
    if tests != expected_tests {
        return Err(MetadataError::TestCount {
            expected: expected_tests,
            found: tests,
        });
    }
    Ok(())
}

const _: () = assert!(verify_table().is_ok(), "opcode metadata table is inconsistent");

impl OpCode {
    pub fn info(self) -> &'static OpInfo {
        &OP_INFO[self.index() as usize]
    }

    pub fn format(self) -> OpFormat {
        self.info().format
    }

    pub fn b_mode(self) -> OpArgMode {
        self.info().b_mode
    }

    pub fn c_mode(self) -> OpArgMode {
        self.info().c_mode
    }

    pub fn sets_a(self) -> bool {
        self.info().sets_a
    }

    pub fn is_test(self) -> bool {
        self.info().is_test
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::extension::{CompareOp, NumKind, Source};
    use rstest::rstest;

    #[test]
    fn test_table_verifies() {
        assert_eq!(verify_table(), Ok(()));
    }

    #[test]
    fn test_wrong_test_count_is_reported() {
        assert_eq!(
            verify_entries(&OP_INFO, NUM_TEST_OPCODES - 1),
            Err(MetadataError::TestCount {
                expected: NUM_TEST_OPCODES - 1,
                found: NUM_TEST_OPCODES,
            })
        );
    }

    #[test]
    fn test_bad_entries_are_reported() {
        let mut swapped = OP_INFO;
        swapped.swap(0, 1);
        assert_eq!(
            verify_entries(&swapped, NUM_TEST_OPCODES),
            Err(MetadataError::Misplaced { index: 0, found: 1 })
        );

        let mut flipped = OP_INFO;
        flipped[OpCode::Eq.index() as usize].is_test = false;
        assert_eq!(
            verify_entries(&flipped, NUM_TEST_OPCODES),
            Err(MetadataError::TestFlag(OpCode::Eq))
        );
    }

    #[test]
    fn test_entries_in_index_order() {
        for (index, entry) in OP_INFO.iter().enumerate() {
            assert_eq!(entry.opcode.index() as usize, index);
        }
    }

    #[test]
    fn test_test_set_is_exact() {
        let flagged: Vec<OpCode> = OpCode::all().filter(|op| op.is_test()).collect();
        assert_eq!(flagged.len(), NUM_TEST_OPCODES);
        for op in [
            OpCode::Eq,
            OpCode::Lt,
            OpCode::Le,
            OpCode::Test,
            OpCode::TestSet,
        ] {
            assert!(flagged.contains(&op), "{op}");
        }
        assert!(flagged
            .iter()
            .all(|op| op.is_primary() || matches!(op, OpCode::Compare(_))));
    }

    #[rstest]
    #[case(OpCode::Move, OpFormat::Abc, OpArgMode::R, OpArgMode::N, true)]
    #[case(OpCode::LoadK, OpFormat::Abx, OpArgMode::K, OpArgMode::N, true)]
    #[case(OpCode::Jmp, OpFormat::AsBx, OpArgMode::R, OpArgMode::N, false)]
    #[case(OpCode::Call, OpFormat::Abc, OpArgMode::U, OpArgMode::U, true)]
    #[case(OpCode::Return, OpFormat::Abc, OpArgMode::U, OpArgMode::N, false)]
    #[case(OpCode::ExtraArg, OpFormat::Ax, OpArgMode::U, OpArgMode::U, false)]
    #[case(OpCode::SetTable, OpFormat::Abc, OpArgMode::K, OpArgMode::K, false)]
    fn test_reference_entries(
        #[case] op: OpCode,
        #[case] format: OpFormat,
        #[case] b_mode: OpArgMode,
        #[case] c_mode: OpArgMode,
        #[case] sets_a: bool,
    ) {
        let entry = op.info();
        assert_eq!(entry.format, format);
        assert_eq!(entry.b_mode, b_mode);
        assert_eq!(entry.c_mode, c_mode);
        assert_eq!(entry.sets_a, sets_a);
    }

    #[test]
    fn test_specialized_compare_is_test() {
        let op = crate::bytecode::extension::specialize_compare(
            CompareOp::Le,
            NumKind::Float,
            NumKind::Float,
            Source::Reg,
            Source::Reg,
        )
        .expect("homogeneous");
        assert!(op.is_test());
        assert!(!op.sets_a());
    }
}
