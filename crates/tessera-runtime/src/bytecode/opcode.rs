//! Opcode enumeration
//!
//! The 6-bit OP field holds 48 primary opcodes. Index 47 (`Ext`) is a marker:
//! every opcode after it is a type-specialized extension that only exists in
//! the wide two-word layout, where a 10-bit sub-opcode field carries its full
//! index. Indices are dense over `0..NUM_OPCODES`.

use std::fmt;

use super::extension::{
    ArithOp, ArithSpec, ArrayGetSpec, ArrayKind, ArraySetSpec, CompareOp, CompareSpec, NumKind,
    Source,
};

/// Total number of opcodes, primary and extended
pub const NUM_OPCODES: usize = 162;

/// Number of opcodes addressable by the 6-bit OP field, marker included
pub const NUM_PRIMARY_OPCODES: usize = 48;

/// Index of the extension marker
pub const EXT_INDEX: u16 = 47;

pub(crate) const UNMF_INDEX: u16 = 48;
pub(crate) const UNMI_INDEX: u16 = 49;
pub(crate) const ARITH_BASE: u16 = 50;
pub(crate) const COMPARE_BASE: u16 = ARITH_BASE + 64;
pub(crate) const ARRAY_GET_BASE: u16 = COMPARE_BASE + 24;
pub(crate) const ARRAY_SET_BASE: u16 = ARRAY_GET_BASE + 8;

/// Register machine opcode
///
/// Operand notation in the variant docs: `R(x)` is register `x` of the
/// current frame, `K(x)` is constant `x`, and `RK(x)` is a constant when
/// `x` carries the constant tag bit and a register otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ===== Loads and moves =====
    /// R(A) := R(B)
    Move,
    /// R(A) := K(Bx)
    LoadK,
    /// R(A) := K(extra arg)
    LoadKx,
    /// R(A) := (Bool)B; if (C) pc++
    LoadBool,
    /// R(A), R(A+1), ..., R(A+B) := nil
    LoadNil,

    // ===== Upvalues and tables =====
    /// R(A) := UpValue[B]
    GetUpval,
    /// R(A) := UpValue[B][RK(C)]
    GetTabUp,
    /// R(A) := R(B)[RK(C)]
    GetTable,
    /// UpValue[A][RK(B)] := RK(C)
    SetTabUp,
    /// UpValue[B] := R(A)
    SetUpval,
    /// R(A)[RK(B)] := RK(C)
    SetTable,
    /// R(A) := {} (size = B,C)
    NewTable,
    /// R(A+1) := R(B); R(A) := R(B)[RK(C)]
    SelfLookup,

    // ===== Arithmetic and bitwise =====
    /// R(A) := RK(B) + RK(C)
    Add,
    /// R(A) := RK(B) - RK(C)
    Sub,
    /// R(A) := RK(B) * RK(C)
    Mul,
    /// R(A) := RK(B) % RK(C)
    Mod,
    /// R(A) := RK(B) ^ RK(C)
    Pow,
    /// R(A) := RK(B) / RK(C)
    Div,
    /// R(A) := RK(B) // RK(C)
    IDiv,
    /// R(A) := RK(B) & RK(C)
    BAnd,
    /// R(A) := RK(B) | RK(C)
    BOr,
    /// R(A) := RK(B) ~ RK(C)
    BXor,
    /// R(A) := RK(B) << RK(C)
    Shl,
    /// R(A) := RK(B) >> RK(C)
    Shr,
    /// R(A) := -R(B)
    Unm,
    /// R(A) := ~R(B)
    BNot,
    /// R(A) := not R(B)
    Not,
    /// R(A) := length of R(B)
    Len,
    /// R(A) := R(B).. ... ..R(C)
    Concat,

    // ===== Control flow =====
    /// pc += sBx; if (A) close all upvalues >= R(A - 1)
    Jmp,
    /// if ((RK(B) == RK(C)) ~= A) then pc++
    Eq,
    /// if ((RK(B) < RK(C)) ~= A) then pc++
    Lt,
    /// if ((RK(B) <= RK(C)) ~= A) then pc++
    Le,
    /// if not (R(A) <=> C) then pc++
    Test,
    /// if (R(B) <=> C) then R(A) := R(B) else pc++
    TestSet,
    /// R(A), ..., R(A+C-2) := R(A)(R(A+1), ..., R(A+B-1))
    Call,
    /// return R(A)(R(A+1), ..., R(A+B-1))
    TailCall,
    /// return R(A), ..., R(A+B-2)
    Return,
    /// R(A) += R(A+2); if R(A) <?= R(A+1) then { pc += sBx; R(A+3) = R(A) }
    ForLoop,
    /// R(A) -= R(A+2); pc += sBx
    ForPrep,
    /// R(A+3), ..., R(A+2+C) := R(A)(R(A+1), R(A+2))
    TForCall,
    /// if R(A+1) ~= nil then { R(A) = R(A+1); pc += sBx }
    TForLoop,
    /// R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    SetList,
    /// R(A) := closure(KPROTO[Bx])
    Closure,
    /// R(A), R(A+1), ..., R(A+B-2) = vararg
    VarArg,
    /// extra (larger) argument for previous opcode
    ExtraArg,

    // ===== Extensions =====
    /// Marker: this word and the next form one wide instruction
    Ext,
    /// R(A) := -R(B), operand known to be a float
    UnmF,
    /// R(A) := -R(B), operand known to be an integer
    UnmI,
    /// R(A) := B op C with statically known operand kinds
    Arith(ArithSpec),
    /// Homogeneous numeric comparison, followed by a jump like `Eq`
    Compare(CompareSpec),
    /// R(A) := R(B)[C] on an array of known element kind
    ArrayGet(ArrayGetSpec),
    /// R(A)[B] := C on an array of known element kind
    ArraySet(ArraySetSpec),
}

/// Primary opcodes in index order
const PRIMARY: [OpCode; NUM_PRIMARY_OPCODES] = [
    OpCode::Move,
    OpCode::LoadK,
    OpCode::LoadKx,
    OpCode::LoadBool,
    OpCode::LoadNil,
    OpCode::GetUpval,
    OpCode::GetTabUp,
    OpCode::GetTable,
    OpCode::SetTabUp,
    OpCode::SetUpval,
    OpCode::SetTable,
    OpCode::NewTable,
    OpCode::SelfLookup,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Mod,
    OpCode::Pow,
    OpCode::Div,
    OpCode::IDiv,
    OpCode::BAnd,
    OpCode::BOr,
    OpCode::BXor,
    OpCode::Shl,
    OpCode::Shr,
    OpCode::Unm,
    OpCode::BNot,
    OpCode::Not,
    OpCode::Len,
    OpCode::Concat,
    OpCode::Jmp,
    OpCode::Eq,
    OpCode::Lt,
    OpCode::Le,
    OpCode::Test,
    OpCode::TestSet,
    OpCode::Call,
    OpCode::TailCall,
    OpCode::Return,
    OpCode::ForLoop,
    OpCode::ForPrep,
    OpCode::TForCall,
    OpCode::TForLoop,
    OpCode::SetList,
    OpCode::Closure,
    OpCode::VarArg,
    OpCode::ExtraArg,
    OpCode::Ext,
];

impl OpCode {
    /// Dense index of this opcode in `0..NUM_OPCODES`
    pub const fn index(self) -> u16 {
        match self {
            OpCode::Move => 0,
            OpCode::LoadK => 1,
            OpCode::LoadKx => 2,
            OpCode::LoadBool => 3,
            OpCode::LoadNil => 4,
            OpCode::GetUpval => 5,
            OpCode::GetTabUp => 6,
            OpCode::GetTable => 7,
            OpCode::SetTabUp => 8,
            OpCode::SetUpval => 9,
            OpCode::SetTable => 10,
            OpCode::NewTable => 11,
            OpCode::SelfLookup => 12,
            OpCode::Add => 13,
            OpCode::Sub => 14,
            OpCode::Mul => 15,
            OpCode::Mod => 16,
            OpCode::Pow => 17,
            OpCode::Div => 18,
            OpCode::IDiv => 19,
            OpCode::BAnd => 20,
            OpCode::BOr => 21,
            OpCode::BXor => 22,
            OpCode::Shl => 23,
            OpCode::Shr => 24,
            OpCode::Unm => 25,
            OpCode::BNot => 26,
            OpCode::Not => 27,
            OpCode::Len => 28,
            OpCode::Concat => 29,
            OpCode::Jmp => 30,
            OpCode::Eq => 31,
            OpCode::Lt => 32,
            OpCode::Le => 33,
            OpCode::Test => 34,
            OpCode::TestSet => 35,
            OpCode::Call => 36,
            OpCode::TailCall => 37,
            OpCode::Return => 38,
            OpCode::ForLoop => 39,
            OpCode::ForPrep => 40,
            OpCode::TForCall => 41,
            OpCode::TForLoop => 42,
            OpCode::SetList => 43,
            OpCode::Closure => 44,
            OpCode::VarArg => 45,
            OpCode::ExtraArg => 46,
            OpCode::Ext => EXT_INDEX,
            OpCode::UnmF => UNMF_INDEX,
            OpCode::UnmI => UNMI_INDEX,
            OpCode::Arith(spec) => ARITH_BASE + spec.offset(),
            OpCode::Compare(spec) => COMPARE_BASE + spec.offset(),
            OpCode::ArrayGet(spec) => ARRAY_GET_BASE + spec.offset(),
            OpCode::ArraySet(spec) => ARRAY_SET_BASE + spec.offset(),
        }
    }

    /// Inverse of [`OpCode::index`]
    pub const fn from_index(index: u16) -> Option<OpCode> {
        if (index as usize) < NUM_PRIMARY_OPCODES {
            return Some(PRIMARY[index as usize]);
        }
        let op = match index {
            UNMF_INDEX => OpCode::UnmF,
            UNMI_INDEX => OpCode::UnmI,
            i if i < COMPARE_BASE => OpCode::Arith(ArithSpec::from_offset(i - ARITH_BASE)),
            i if i < ARRAY_GET_BASE => {
                OpCode::Compare(CompareSpec::from_offset(i - COMPARE_BASE))
            }
            i if i < ARRAY_SET_BASE => {
                OpCode::ArrayGet(ArrayGetSpec::from_offset(i - ARRAY_GET_BASE))
            }
            i if (i as usize) < NUM_OPCODES => {
                OpCode::ArraySet(ArraySetSpec::from_offset(i - ARRAY_SET_BASE))
            }
            _ => return None,
        };
        Some(op)
    }

    /// Whether this opcode fits the single-word layout
    pub const fn is_primary(self) -> bool {
        self.index() < EXT_INDEX
    }

    /// Whether this opcode is encoded in the wide layout
    pub const fn is_extended(self) -> bool {
        self.index() > EXT_INDEX
    }

    /// Number of instruction words this opcode occupies
    pub const fn width(self) -> usize {
        if self.is_extended() {
            2
        } else {
            1
        }
    }

    /// Iterate over every opcode in index order
    pub fn all() -> impl Iterator<Item = OpCode> {
        (0..NUM_OPCODES as u16).filter_map(OpCode::from_index)
    }

    /// Mnemonic for the primary opcodes and the two unary extensions
    const fn fixed_name(self) -> Option<&'static str> {
        let name = match self {
            OpCode::Move => "MOVE",
            OpCode::LoadK => "LOADK",
            OpCode::LoadKx => "LOADKX",
            OpCode::LoadBool => "LOADBOOL",
            OpCode::LoadNil => "LOADNIL",
            OpCode::GetUpval => "GETUPVAL",
            OpCode::GetTabUp => "GETTABUP",
            OpCode::GetTable => "GETTABLE",
            OpCode::SetTabUp => "SETTABUP",
            OpCode::SetUpval => "SETUPVAL",
            OpCode::SetTable => "SETTABLE",
            OpCode::NewTable => "NEWTABLE",
            OpCode::SelfLookup => "SELF",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Mod => "MOD",
            OpCode::Pow => "POW",
            OpCode::Div => "DIV",
            OpCode::IDiv => "IDIV",
            OpCode::BAnd => "BAND",
            OpCode::BOr => "BOR",
            OpCode::BXor => "BXOR",
            OpCode::Shl => "SHL",
            OpCode::Shr => "SHR",
            OpCode::Unm => "UNM",
            OpCode::BNot => "BNOT",
            OpCode::Not => "NOT",
            OpCode::Len => "LEN",
            OpCode::Concat => "CONCAT",
            OpCode::Jmp => "JMP",
            OpCode::Eq => "EQ",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Test => "TEST",
            OpCode::TestSet => "TESTSET",
            OpCode::Call => "CALL",
            OpCode::TailCall => "TAILCALL",
            OpCode::Return => "RETURN",
            OpCode::ForLoop => "FORLOOP",
            OpCode::ForPrep => "FORPREP",
            OpCode::TForCall => "TFORCALL",
            OpCode::TForLoop => "TFORLOOP",
            OpCode::SetList => "SETLIST",
            OpCode::Closure => "CLOSURE",
            OpCode::VarArg => "VARARG",
            OpCode::ExtraArg => "EXTRAARG",
            OpCode::Ext => "EXT",
            OpCode::UnmF => "UNMF",
            OpCode::UnmI => "UNMI",
            OpCode::Arith(_)
            | OpCode::Compare(_)
            | OpCode::ArrayGet(_)
            | OpCode::ArraySet(_) => return None,
        };
        Some(name)
    }
}

fn kind_letter(kind: NumKind) -> char {
    match kind {
        NumKind::Float => 'F',
        NumKind::Int => 'I',
    }
}

fn source_letter(source: Source) -> char {
    match source {
        Source::Const => 'K',
        Source::Reg => 'R',
    }
}

fn array_letter(kind: ArrayKind) -> char {
    match kind {
        ArrayKind::Slice => 'S',
        ArrayKind::Int => 'I',
        ArrayKind::Float => 'F',
        ArrayKind::Generic => 'L',
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.fixed_name() {
            return f.write_str(name);
        }
        match *self {
            OpCode::Arith(spec) => {
                let op = match spec.op {
                    ArithOp::Add => "ADD",
                    ArithOp::Sub => "SUB",
                    ArithOp::Mul => "MUL",
                    ArithOp::Div => "DIV",
                };
                write!(
                    f,
                    "{op}{}{}{}{}",
                    kind_letter(spec.lhs),
                    kind_letter(spec.rhs),
                    source_letter(spec.lhs_src),
                    source_letter(spec.rhs_src)
                )
            }
            OpCode::Compare(spec) => {
                let op = match spec.op {
                    CompareOp::Eq => "EQ",
                    CompareOp::Lt => "LT",
                    CompareOp::Le => "LE",
                };
                let kind = kind_letter(spec.kind);
                write!(
                    f,
                    "{op}{kind}{kind}{}{}",
                    source_letter(spec.lhs_src),
                    source_letter(spec.rhs_src)
                )
            }
            OpCode::ArrayGet(spec) => write!(
                f,
                "ARRAYGET_{}I{}",
                array_letter(spec.kind),
                source_letter(spec.index_src)
            ),
            OpCode::ArraySet(spec) => write!(
                f,
                "ARRAYSET_I{}{}{}",
                array_letter(spec.kind),
                source_letter(spec.index_src),
                source_letter(spec.value_src)
            ),
            _ => unreachable!("fixed-name opcodes are handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_index_maps_back() {
        for index in 0..NUM_OPCODES as u16 {
            let op = OpCode::from_index(index).expect("dense index space");
            assert_eq!(op.index(), index, "{op}");
        }
        assert_eq!(OpCode::from_index(NUM_OPCODES as u16), None);
        assert_eq!(OpCode::all().count(), NUM_OPCODES);
    }

    #[test]
    fn test_primary_order_matches_reference_numbering() {
        assert_eq!(OpCode::Move.index(), 0);
        assert_eq!(OpCode::Jmp.index(), 30);
        assert_eq!(OpCode::Call.index(), 36);
        assert_eq!(OpCode::Return.index(), 38);
        assert_eq!(OpCode::ExtraArg.index(), 46);
        assert_eq!(OpCode::Ext.index(), 47);
    }

    #[test]
    fn test_family_boundaries() {
        assert_eq!(ARITH_BASE, 50);
        assert_eq!(COMPARE_BASE, 114);
        assert_eq!(ARRAY_GET_BASE, 138);
        assert_eq!(ARRAY_SET_BASE, 146);
        assert_eq!(ARRAY_SET_BASE as usize + 16, NUM_OPCODES);
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<String> = OpCode::all().map(|op| op.to_string()).collect();
        assert_eq!(names.len(), NUM_OPCODES);
    }

    #[test]
    fn test_composed_names() {
        let add = OpCode::Arith(ArithSpec {
            op: ArithOp::Add,
            lhs: NumKind::Float,
            rhs: NumKind::Float,
            lhs_src: Source::Const,
            rhs_src: Source::Reg,
        });
        assert_eq!(add.to_string(), "ADDFFKR");
        let lt = OpCode::Compare(CompareSpec {
            op: CompareOp::Lt,
            kind: NumKind::Int,
            lhs_src: Source::Reg,
            rhs_src: Source::Reg,
        });
        assert_eq!(lt.to_string(), "LTIIRR");
        assert_eq!(OpCode::SelfLookup.to_string(), "SELF");
    }

    #[test]
    fn test_primary_and_extended_partition() {
        for op in OpCode::all() {
            let index = op.index();
            assert_eq!(op.is_primary(), index < EXT_INDEX);
            assert_eq!(op.is_extended(), index > EXT_INDEX);
        }
        assert!(!OpCode::Ext.is_primary());
        assert!(!OpCode::Ext.is_extended());
    }
}
