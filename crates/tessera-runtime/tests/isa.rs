//! Instruction codec, extension opcodes and metadata

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use tessera_runtime::bytecode::{
    decode_stream, rk, specialize_arith, specialize_compare, verify_table, ArithOp, CompareOp,
    ExtInstruction, Fields, Instruction, NumKind, OpCode, OpFormat, Source, MAXARG_A, MAXARG_AX,
    MAXARG_B, MAXARG_BX, MAXARG_C, MAXARG_SBX, NUM_OPCODES,
};

// ============================================================================
// Strategies
// ============================================================================

fn primary_opcode() -> impl Strategy<Value = OpCode> {
    (0..47u16).prop_map(|i| OpCode::from_index(i).expect("primary index"))
}

fn extended_opcode() -> impl Strategy<Value = OpCode> {
    (48..NUM_OPCODES as u16).prop_map(|i| OpCode::from_index(i).expect("extension index"))
}

fn fields_for(format: OpFormat) -> BoxedStrategy<Fields> {
    match format {
        OpFormat::Abc => (0..=MAXARG_A, 0..=MAXARG_B, 0..=MAXARG_C)
            .prop_map(|(a, b, c)| Fields::Abc { a, b, c })
            .boxed(),
        OpFormat::Abx => (0..=MAXARG_A, 0..=MAXARG_BX)
            .prop_map(|(a, bx)| Fields::Abx { a, bx })
            .boxed(),
        OpFormat::AsBx => (0..=MAXARG_A, -MAXARG_SBX..=(MAXARG_BX as i32 - MAXARG_SBX))
            .prop_map(|(a, sbx)| Fields::AsBx { a, sbx })
            .boxed(),
        OpFormat::Ax => (0..=MAXARG_AX).prop_map(|ax| Fields::Ax { ax }).boxed(),
    }
}

fn primary_instruction() -> impl Strategy<Value = (OpCode, Fields)> {
    primary_opcode().prop_flat_map(|op| fields_for(op.format()).prop_map(move |f| (op, f)))
}

// ============================================================================
// Codec properties
// ============================================================================

proptest! {
    #[test]
    fn primary_encode_decode_identity((op, fields) in primary_instruction()) {
        let ins = Instruction::encode(op, fields);
        prop_assert_eq!(ins.opcode(), Some(op));
        prop_assert_eq!(ins.decode(op.format()), fields);
    }

    #[test]
    fn sbx_roundtrip(sbx in -MAXARG_SBX..=(MAXARG_BX as i32 - MAXARG_SBX)) {
        let ins = Instruction::asbx(OpCode::Jmp, 0, sbx);
        prop_assert_eq!(ins.sbx(), sbx);
        prop_assert_eq!(ins.bx() as i32, sbx + MAXARG_SBX);
    }

    #[test]
    fn rk_tagging(k in 0..=rk::MAXINDEXRK, r in 0..rk::BITRK) {
        let tagged = rk::as_constant(k);
        prop_assert!(rk::is_constant(tagged));
        prop_assert_eq!(rk::index(tagged), k);
        prop_assert!(!rk::is_constant(r));
    }

    #[test]
    fn wide_encode_decode_identity(
        op in extended_opcode(),
        a in any::<u16>(),
        b in any::<u16>(),
        c in any::<u16>()
    ) {
        let ext = ExtInstruction::new(op, a, b, c);
        let [head, tail] = ext.encode();
        prop_assert_eq!(head.opcode(), Some(op));
        prop_assert_eq!(ExtInstruction::decode(head, tail), Some(ext));
    }
}

#[test]
fn test_stream_with_every_opcode_decodes_in_order() {
    let mut code = Vec::new();
    let mut expected = Vec::new();
    for op in OpCode::all() {
        if op.is_primary() {
            let fields = match op.format() {
                OpFormat::Abc => Fields::Abc { a: 1, b: 2, c: 3 },
                OpFormat::Abx => Fields::Abx { a: 1, bx: 2 },
                OpFormat::AsBx => Fields::AsBx { a: 1, sbx: -2 },
                OpFormat::Ax => Fields::Ax { ax: 2 },
            };
            expected.push((code.len(), op));
            code.push(Instruction::encode(op, fields));
        } else if op.is_extended() {
            expected.push((code.len(), op));
            code.extend_from_slice(&ExtInstruction::new(op, 1, 2, 3).encode());
        }
    }
    let decoded: Vec<(usize, OpCode)> = decode_stream(&code)
        .expect("valid stream")
        .iter()
        .map(|d| (d.pc, d.op))
        .collect();
    assert_eq!(decoded, expected);
}

// ============================================================================
// Specialization
// ============================================================================

#[rstest]
#[case(CompareOp::Eq)]
#[case(CompareOp::Lt)]
#[case(CompareOp::Le)]
fn test_comparison_asymmetry(#[case] op: CompareOp) {
    for (lhs_src, rhs_src) in [
        (Source::Reg, Source::Reg),
        (Source::Reg, Source::Const),
        (Source::Const, Source::Reg),
        (Source::Const, Source::Const),
    ] {
        assert!(specialize_compare(op, NumKind::Int, NumKind::Float, lhs_src, rhs_src).is_none());
        assert!(specialize_compare(op, NumKind::Float, NumKind::Int, lhs_src, rhs_src).is_none());
        assert!(specialize_compare(op, NumKind::Int, NumKind::Int, lhs_src, rhs_src).is_some());
    }
    assert_eq!(op.generic().to_string(), format!("{:?}", op).to_uppercase());
}

#[test]
fn test_every_arith_combination_is_distinct() {
    let mut seen = std::collections::HashSet::new();
    for op in [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Div] {
        for lhs in [NumKind::Float, NumKind::Int] {
            for rhs in [NumKind::Float, NumKind::Int] {
                for lhs_src in [Source::Const, Source::Reg] {
                    for rhs_src in [Source::Const, Source::Reg] {
                        let opcode = specialize_arith(op, lhs, rhs, lhs_src, rhs_src);
                        assert!((50..114).contains(&opcode.index()), "{opcode}");
                        assert!(seen.insert(opcode.index()));
                    }
                }
            }
        }
    }
    assert_eq!(seen.len(), 64);
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn test_metadata_table_is_complete() {
    assert_eq!(verify_table(), Ok(()));
    for op in OpCode::all() {
        assert_eq!(op.info().opcode, op);
    }
}

#[test]
fn test_extension_opcodes_report_abc() {
    for op in OpCode::all().filter(|op| op.is_extended()) {
        assert_eq!(op.format(), OpFormat::Abc, "{op}");
        assert_eq!(op.width(), 2);
    }
}
