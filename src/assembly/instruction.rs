//! Instructions and their operands.
//!
//! Decoded instructions never carry raw branch offsets or metadata tokens: branch
//! targets name the target instruction by [`InstrId`], and token operands hold
//! graph handles. Offsets are only meaningful for instructions that came from an
//! image and are recomputed on every encode.

use std::fmt;

use widestring::U16String;

use crate::{
    assembly::{OpCode, OperandType},
    metadata::{signatures::MethodSig, token::Token},
    model::{FieldHandle, MethodHandle, TypeHandle},
};

/// Identity of an instruction within one method body.
///
/// Ids are handed out by [`crate::assembly::MethodBody`] and stay stable when
/// instructions are inserted or replaced around them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// The raw id value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL#{}", self.0)
    }
}

/// The operand of `ldtoken`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberToken {
    /// A type handle
    Type(TypeHandle),
    /// A method handle
    Method(MethodHandle),
    /// A field handle
    Field(FieldHandle),
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// `ldc.i4.s`
    I8(i8),
    /// `unaligned.` and `no.`
    U8(u8),
    /// `ldc.i4`
    I32(i32),
    /// `ldc.i8`
    I64(i64),
    /// `ldc.r4`
    F32(f32),
    /// `ldc.r8`
    F64(f64),
    /// Argument or local index, for both the short and the long forms
    Var(u16),
    /// Branch target
    Target(InstrId),
    /// Jump table
    Switch(Vec<InstrId>),
    /// `ldstr`
    String(U16String),
    /// Type operand
    Type(TypeHandle),
    /// Method operand
    Method(MethodHandle),
    /// Field operand
    Field(FieldHandle),
    /// `ldtoken`
    Token(MemberToken),
    /// `calli` call site signature
    Signature(Box<MethodSig>),
    /// A token that could not be resolved while reading in tolerant mode.
    ///
    /// Encoding a body that still contains one fails.
    Unresolved(Token),
}

impl Operand {
    /// Whether this operand is a valid value for the given operand encoding.
    #[must_use]
    pub fn matches(&self, op_type: OperandType) -> bool {
        matches!(
            (op_type, self),
            (OperandType::None, Operand::None)
                | (OperandType::Int8, Operand::I8(_))
                | (OperandType::UInt8, Operand::U8(_))
                | (OperandType::Int32, Operand::I32(_))
                | (OperandType::Int64, Operand::I64(_))
                | (OperandType::Float32, Operand::F32(_))
                | (OperandType::Float64, Operand::F64(_))
                | (OperandType::Var8 | OperandType::Var16, Operand::Var(_))
                | (OperandType::Target8 | OperandType::Target32, Operand::Target(_))
                | (OperandType::Switch, Operand::Switch(_))
                | (OperandType::String, Operand::String(_))
                | (OperandType::Type, Operand::Type(_))
                | (OperandType::Method, Operand::Method(_))
                | (OperandType::Field, Operand::Field(_))
                | (OperandType::Token, Operand::Token(_))
                | (OperandType::Signature, Operand::Signature(_))
        ) || (op_type.is_token() && matches!(self, Operand::Unresolved(_)))
    }

    /// The instructions this operand refers to.
    #[must_use]
    pub fn targets(&self) -> Vec<InstrId> {
        match self {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Stable identity within the body
    pub id: InstrId,
    /// Byte offset from the start of the code, as last read or written
    pub offset: u32,
    /// The opcode
    pub opcode: OpCode,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Encoded size of the instruction with its current opcode.
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match (&self.operand, self.opcode.operand_type()) {
            (Operand::Switch(targets), OperandType::Switch) => 4 + 4 * targets.len(),
            (_, op_type) => op_type.size(),
        };
        self.opcode.size() + operand
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::I8(value) => write!(f, " {value}"),
            Operand::U8(value) => write!(f, " {value}"),
            Operand::I32(value) => write!(f, " {value}"),
            Operand::I64(value) => write!(f, " {value}"),
            Operand::F32(value) => write!(f, " {value}"),
            Operand::F64(value) => write!(f, " {value}"),
            Operand::Var(index) => write!(f, " {index}"),
            Operand::Target(target) => write!(f, " {target:?}"),
            Operand::Switch(targets) => write!(f, " {targets:?}"),
            Operand::String(value) => write!(f, " \"{}\"", value.to_string_lossy()),
            Operand::Type(handle) => write!(f, " {handle:?}"),
            Operand::Method(handle) => write!(f, " {handle:?}"),
            Operand::Field(handle) => write!(f, " {handle:?}"),
            Operand::Token(member) => write!(f, " {member:?}"),
            Operand::Signature(sig) => write!(f, " {sig:?}"),
            Operand::Unresolved(token) => write!(f, " <unresolved {token}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TypeId;

    fn instruction(opcode: OpCode, operand: Operand) -> Instruction {
        Instruction {
            id: InstrId(0),
            offset: 0,
            opcode,
            operand,
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(instruction(OpCode::RET, Operand::None).size(), 1);
        assert_eq!(instruction(OpCode::LDC_I4_S, Operand::I8(-1)).size(), 2);
        assert_eq!(instruction(OpCode::LDLOC, Operand::Var(300)).size(), 4);
        assert_eq!(instruction(OpCode::LDC_R8, Operand::F64(1.5)).size(), 9);
        assert_eq!(
            instruction(OpCode::BR_S, Operand::Target(InstrId(1))).size(),
            2
        );
        assert_eq!(
            instruction(OpCode::SWITCH, Operand::Switch(vec![InstrId(1), InstrId(2)])).size(),
            13
        );
    }

    #[test]
    fn operand_matching() {
        assert!(Operand::Var(1).matches(OperandType::Var8));
        assert!(Operand::Var(1).matches(OperandType::Var16));
        assert!(!Operand::I32(1).matches(OperandType::Int8));
        assert!(Operand::Unresolved(Token(0x0A00_0001)).matches(OperandType::Method));
        assert!(!Operand::Unresolved(Token(0x0A00_0001)).matches(OperandType::Int32));
        assert!(Operand::Type(TypeHandle::Def(TypeId::new(0))).matches(OperandType::Type));
    }

    #[test]
    fn display() {
        let mut ldstr = instruction(OpCode::LDSTR, Operand::String(U16String::from_str("hi")));
        ldstr.offset = 0x10;
        assert_eq!(ldstr.to_string(), "IL_0010: ldstr \"hi\"");
        assert_eq!(
            instruction(OpCode::BR, Operand::Target(InstrId(3))).to_string(),
            "IL_0000: br IL#3"
        );
    }
}
