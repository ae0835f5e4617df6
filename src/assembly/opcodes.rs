//! The CIL opcode table.
//!
//! Every opcode of ECMA-335 Partition III is listed once in [`define_opcodes!`],
//! which produces both the named [`OpCode`] constants and the two lookup tables
//! indexed by opcode byte: [`INSTRUCTIONS`] for single-byte opcodes and
//! [`INSTRUCTIONS_FE`] for the ones behind the `0xFE` prefix. Unassigned slots hold
//! an entry with an empty mnemonic.

use std::fmt;

/// How the operand of an instruction is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit immediate (`unaligned.`, `no.`)
    UInt8,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// 8-bit argument or local index
    Var8,
    /// 16-bit argument or local index
    Var16,
    /// 8-bit relative branch target
    Target8,
    /// 32-bit relative branch target
    Target32,
    /// Jump table
    Switch,
    /// User string token
    String,
    /// Method token
    Method,
    /// Field token
    Field,
    /// Type token
    Type,
    /// Type, method or field token (`ldtoken`)
    Token,
    /// `StandAloneSig` token (`calli`)
    Signature,
}

impl OperandType {
    /// Encoded size in bytes; switch tables report the size of their count only.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            OperandType::None => 0,
            OperandType::Int8 | OperandType::UInt8 | OperandType::Var8 | OperandType::Target8 => 1,
            OperandType::Var16 => 2,
            OperandType::Int64 | OperandType::Float64 => 8,
            _ => 4,
        }
    }

    /// Whether the operand is a metadata token.
    #[must_use]
    pub const fn is_token(self) -> bool {
        matches!(
            self,
            OperandType::String
                | OperandType::Method
                | OperandType::Field
                | OperandType::Type
                | OperandType::Token
                | OperandType::Signature
        )
    }
}

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Jump table with fall-through
    Switch,
    /// Calls and falls through
    Call,
    /// Leaves the method
    Return,
    /// Raises an exception
    Throw,
    /// Leaves a protected region
    Leave,
    /// Ends a finally, fault or filter handler
    EndFinally,
    /// Modifies the following instruction
    Prefix,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CilInstruction {
    /// Mnemonic, empty for unassigned opcodes
    pub instr: &'static str,
    /// Operand encoding
    pub op_type: OperandType,
    /// Control flow behavior
    pub flow: FlowType,
}

const RESERVED: CilInstruction = CilInstruction {
    instr: "",
    op_type: OperandType::None,
    flow: FlowType::Sequential,
};

/// A CIL opcode: the byte value, or `0xFE00 | byte` for two-byte opcodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpCode(u16);

macro_rules! define_opcodes {
    ($($konst:ident = $code:literal, $name:literal, $operand:ident, $flow:ident;)*) => {
        #[allow(missing_docs)]
        impl OpCode {
            $(pub const $konst: OpCode = OpCode($code);)*
        }

        const OPCODE_LIST: &[(u16, CilInstruction)] = &[
            $(
                (
                    $code,
                    CilInstruction {
                        instr: $name,
                        op_type: OperandType::$operand,
                        flow: FlowType::$flow,
                    },
                ),
            )*
        ];
    };
}

define_opcodes! {
    NOP = 0x00, "nop", None, Sequential;
    BREAK = 0x01, "break", None, Sequential;
    LDARG_0 = 0x02, "ldarg.0", None, Sequential;
    LDARG_1 = 0x03, "ldarg.1", None, Sequential;
    LDARG_2 = 0x04, "ldarg.2", None, Sequential;
    LDARG_3 = 0x05, "ldarg.3", None, Sequential;
    LDLOC_0 = 0x06, "ldloc.0", None, Sequential;
    LDLOC_1 = 0x07, "ldloc.1", None, Sequential;
    LDLOC_2 = 0x08, "ldloc.2", None, Sequential;
    LDLOC_3 = 0x09, "ldloc.3", None, Sequential;
    STLOC_0 = 0x0A, "stloc.0", None, Sequential;
    STLOC_1 = 0x0B, "stloc.1", None, Sequential;
    STLOC_2 = 0x0C, "stloc.2", None, Sequential;
    STLOC_3 = 0x0D, "stloc.3", None, Sequential;
    LDARG_S = 0x0E, "ldarg.s", Var8, Sequential;
    LDARGA_S = 0x0F, "ldarga.s", Var8, Sequential;
    STARG_S = 0x10, "starg.s", Var8, Sequential;
    LDLOC_S = 0x11, "ldloc.s", Var8, Sequential;
    LDLOCA_S = 0x12, "ldloca.s", Var8, Sequential;
    STLOC_S = 0x13, "stloc.s", Var8, Sequential;
    LDNULL = 0x14, "ldnull", None, Sequential;
    LDC_I4_M1 = 0x15, "ldc.i4.m1", None, Sequential;
    LDC_I4_0 = 0x16, "ldc.i4.0", None, Sequential;
    LDC_I4_1 = 0x17, "ldc.i4.1", None, Sequential;
    LDC_I4_2 = 0x18, "ldc.i4.2", None, Sequential;
    LDC_I4_3 = 0x19, "ldc.i4.3", None, Sequential;
    LDC_I4_4 = 0x1A, "ldc.i4.4", None, Sequential;
    LDC_I4_5 = 0x1B, "ldc.i4.5", None, Sequential;
    LDC_I4_6 = 0x1C, "ldc.i4.6", None, Sequential;
    LDC_I4_7 = 0x1D, "ldc.i4.7", None, Sequential;
    LDC_I4_8 = 0x1E, "ldc.i4.8", None, Sequential;
    LDC_I4_S = 0x1F, "ldc.i4.s", Int8, Sequential;
    LDC_I4 = 0x20, "ldc.i4", Int32, Sequential;
    LDC_I8 = 0x21, "ldc.i8", Int64, Sequential;
    LDC_R4 = 0x22, "ldc.r4", Float32, Sequential;
    LDC_R8 = 0x23, "ldc.r8", Float64, Sequential;
    DUP = 0x25, "dup", None, Sequential;
    POP = 0x26, "pop", None, Sequential;
    JMP = 0x27, "jmp", Method, Call;
    CALL = 0x28, "call", Method, Call;
    CALLI = 0x29, "calli", Signature, Call;
    RET = 0x2A, "ret", None, Return;
    BR_S = 0x2B, "br.s", Target8, UnconditionalBranch;
    BRFALSE_S = 0x2C, "brfalse.s", Target8, ConditionalBranch;
    BRTRUE_S = 0x2D, "brtrue.s", Target8, ConditionalBranch;
    BEQ_S = 0x2E, "beq.s", Target8, ConditionalBranch;
    BGE_S = 0x2F, "bge.s", Target8, ConditionalBranch;
    BGT_S = 0x30, "bgt.s", Target8, ConditionalBranch;
    BLE_S = 0x31, "ble.s", Target8, ConditionalBranch;
    BLT_S = 0x32, "blt.s", Target8, ConditionalBranch;
    BNE_UN_S = 0x33, "bne.un.s", Target8, ConditionalBranch;
    BGE_UN_S = 0x34, "bge.un.s", Target8, ConditionalBranch;
    BGT_UN_S = 0x35, "bgt.un.s", Target8, ConditionalBranch;
    BLE_UN_S = 0x36, "ble.un.s", Target8, ConditionalBranch;
    BLT_UN_S = 0x37, "blt.un.s", Target8, ConditionalBranch;
    BR = 0x38, "br", Target32, UnconditionalBranch;
    BRFALSE = 0x39, "brfalse", Target32, ConditionalBranch;
    BRTRUE = 0x3A, "brtrue", Target32, ConditionalBranch;
    BEQ = 0x3B, "beq", Target32, ConditionalBranch;
    BGE = 0x3C, "bge", Target32, ConditionalBranch;
    BGT = 0x3D, "bgt", Target32, ConditionalBranch;
    BLE = 0x3E, "ble", Target32, ConditionalBranch;
    BLT = 0x3F, "blt", Target32, ConditionalBranch;
    BNE_UN = 0x40, "bne.un", Target32, ConditionalBranch;
    BGE_UN = 0x41, "bge.un", Target32, ConditionalBranch;
    BGT_UN = 0x42, "bgt.un", Target32, ConditionalBranch;
    BLE_UN = 0x43, "ble.un", Target32, ConditionalBranch;
    BLT_UN = 0x44, "blt.un", Target32, ConditionalBranch;
    SWITCH = 0x45, "switch", Switch, Switch;
    LDIND_I1 = 0x46, "ldind.i1", None, Sequential;
    LDIND_U1 = 0x47, "ldind.u1", None, Sequential;
    LDIND_I2 = 0x48, "ldind.i2", None, Sequential;
    LDIND_U2 = 0x49, "ldind.u2", None, Sequential;
    LDIND_I4 = 0x4A, "ldind.i4", None, Sequential;
    LDIND_U4 = 0x4B, "ldind.u4", None, Sequential;
    LDIND_I8 = 0x4C, "ldind.i8", None, Sequential;
    LDIND_I = 0x4D, "ldind.i", None, Sequential;
    LDIND_R4 = 0x4E, "ldind.r4", None, Sequential;
    LDIND_R8 = 0x4F, "ldind.r8", None, Sequential;
    LDIND_REF = 0x50, "ldind.ref", None, Sequential;
    STIND_REF = 0x51, "stind.ref", None, Sequential;
    STIND_I1 = 0x52, "stind.i1", None, Sequential;
    STIND_I2 = 0x53, "stind.i2", None, Sequential;
    STIND_I4 = 0x54, "stind.i4", None, Sequential;
    STIND_I8 = 0x55, "stind.i8", None, Sequential;
    STIND_R4 = 0x56, "stind.r4", None, Sequential;
    STIND_R8 = 0x57, "stind.r8", None, Sequential;
    ADD = 0x58, "add", None, Sequential;
    SUB = 0x59, "sub", None, Sequential;
    MUL = 0x5A, "mul", None, Sequential;
    DIV = 0x5B, "div", None, Sequential;
    DIV_UN = 0x5C, "div.un", None, Sequential;
    REM = 0x5D, "rem", None, Sequential;
    REM_UN = 0x5E, "rem.un", None, Sequential;
    AND = 0x5F, "and", None, Sequential;
    OR = 0x60, "or", None, Sequential;
    XOR = 0x61, "xor", None, Sequential;
    SHL = 0x62, "shl", None, Sequential;
    SHR = 0x63, "shr", None, Sequential;
    SHR_UN = 0x64, "shr.un", None, Sequential;
    NEG = 0x65, "neg", None, Sequential;
    NOT = 0x66, "not", None, Sequential;
    CONV_I1 = 0x67, "conv.i1", None, Sequential;
    CONV_I2 = 0x68, "conv.i2", None, Sequential;
    CONV_I4 = 0x69, "conv.i4", None, Sequential;
    CONV_I8 = 0x6A, "conv.i8", None, Sequential;
    CONV_R4 = 0x6B, "conv.r4", None, Sequential;
    CONV_R8 = 0x6C, "conv.r8", None, Sequential;
    CONV_U4 = 0x6D, "conv.u4", None, Sequential;
    CONV_U8 = 0x6E, "conv.u8", None, Sequential;
    CALLVIRT = 0x6F, "callvirt", Method, Call;
    CPOBJ = 0x70, "cpobj", Type, Sequential;
    LDOBJ = 0x71, "ldobj", Type, Sequential;
    LDSTR = 0x72, "ldstr", String, Sequential;
    NEWOBJ = 0x73, "newobj", Method, Call;
    CASTCLASS = 0x74, "castclass", Type, Sequential;
    ISINST = 0x75, "isinst", Type, Sequential;
    CONV_R_UN = 0x76, "conv.r.un", None, Sequential;
    UNBOX = 0x79, "unbox", Type, Sequential;
    THROW = 0x7A, "throw", None, Throw;
    LDFLD = 0x7B, "ldfld", Field, Sequential;
    LDFLDA = 0x7C, "ldflda", Field, Sequential;
    STFLD = 0x7D, "stfld", Field, Sequential;
    LDSFLD = 0x7E, "ldsfld", Field, Sequential;
    LDSFLDA = 0x7F, "ldsflda", Field, Sequential;
    STSFLD = 0x80, "stsfld", Field, Sequential;
    STOBJ = 0x81, "stobj", Type, Sequential;
    CONV_OVF_I1_UN = 0x82, "conv.ovf.i1.un", None, Sequential;
    CONV_OVF_I2_UN = 0x83, "conv.ovf.i2.un", None, Sequential;
    CONV_OVF_I4_UN = 0x84, "conv.ovf.i4.un", None, Sequential;
    CONV_OVF_I8_UN = 0x85, "conv.ovf.i8.un", None, Sequential;
    CONV_OVF_U1_UN = 0x86, "conv.ovf.u1.un", None, Sequential;
    CONV_OVF_U2_UN = 0x87, "conv.ovf.u2.un", None, Sequential;
    CONV_OVF_U4_UN = 0x88, "conv.ovf.u4.un", None, Sequential;
    CONV_OVF_U8_UN = 0x89, "conv.ovf.u8.un", None, Sequential;
    CONV_OVF_I_UN = 0x8A, "conv.ovf.i.un", None, Sequential;
    CONV_OVF_U_UN = 0x8B, "conv.ovf.u.un", None, Sequential;
    BOX = 0x8C, "box", Type, Sequential;
    NEWARR = 0x8D, "newarr", Type, Sequential;
    LDLEN = 0x8E, "ldlen", None, Sequential;
    LDELEMA = 0x8F, "ldelema", Type, Sequential;
    LDELEM_I1 = 0x90, "ldelem.i1", None, Sequential;
    LDELEM_U1 = 0x91, "ldelem.u1", None, Sequential;
    LDELEM_I2 = 0x92, "ldelem.i2", None, Sequential;
    LDELEM_U2 = 0x93, "ldelem.u2", None, Sequential;
    LDELEM_I4 = 0x94, "ldelem.i4", None, Sequential;
    LDELEM_U4 = 0x95, "ldelem.u4", None, Sequential;
    LDELEM_I8 = 0x96, "ldelem.i8", None, Sequential;
    LDELEM_I = 0x97, "ldelem.i", None, Sequential;
    LDELEM_R4 = 0x98, "ldelem.r4", None, Sequential;
    LDELEM_R8 = 0x99, "ldelem.r8", None, Sequential;
    LDELEM_REF = 0x9A, "ldelem.ref", None, Sequential;
    STELEM_I = 0x9B, "stelem.i", None, Sequential;
    STELEM_I1 = 0x9C, "stelem.i1", None, Sequential;
    STELEM_I2 = 0x9D, "stelem.i2", None, Sequential;
    STELEM_I4 = 0x9E, "stelem.i4", None, Sequential;
    STELEM_I8 = 0x9F, "stelem.i8", None, Sequential;
    STELEM_R4 = 0xA0, "stelem.r4", None, Sequential;
    STELEM_R8 = 0xA1, "stelem.r8", None, Sequential;
    STELEM_REF = 0xA2, "stelem.ref", None, Sequential;
    LDELEM = 0xA3, "ldelem", Type, Sequential;
    STELEM = 0xA4, "stelem", Type, Sequential;
    UNBOX_ANY = 0xA5, "unbox.any", Type, Sequential;
    CONV_OVF_I1 = 0xB3, "conv.ovf.i1", None, Sequential;
    CONV_OVF_U1 = 0xB4, "conv.ovf.u1", None, Sequential;
    CONV_OVF_I2 = 0xB5, "conv.ovf.i2", None, Sequential;
    CONV_OVF_U2 = 0xB6, "conv.ovf.u2", None, Sequential;
    CONV_OVF_I4 = 0xB7, "conv.ovf.i4", None, Sequential;
    CONV_OVF_U4 = 0xB8, "conv.ovf.u4", None, Sequential;
    CONV_OVF_I8 = 0xB9, "conv.ovf.i8", None, Sequential;
    CONV_OVF_U8 = 0xBA, "conv.ovf.u8", None, Sequential;
    REFANYVAL = 0xC2, "refanyval", Type, Sequential;
    CKFINITE = 0xC3, "ckfinite", None, Sequential;
    MKREFANY = 0xC6, "mkrefany", Type, Sequential;
    LDTOKEN = 0xD0, "ldtoken", Token, Sequential;
    CONV_U2 = 0xD1, "conv.u2", None, Sequential;
    CONV_U1 = 0xD2, "conv.u1", None, Sequential;
    CONV_I = 0xD3, "conv.i", None, Sequential;
    CONV_OVF_I = 0xD4, "conv.ovf.i", None, Sequential;
    CONV_OVF_U = 0xD5, "conv.ovf.u", None, Sequential;
    ADD_OVF = 0xD6, "add.ovf", None, Sequential;
    ADD_OVF_UN = 0xD7, "add.ovf.un", None, Sequential;
    MUL_OVF = 0xD8, "mul.ovf", None, Sequential;
    MUL_OVF_UN = 0xD9, "mul.ovf.un", None, Sequential;
    SUB_OVF = 0xDA, "sub.ovf", None, Sequential;
    SUB_OVF_UN = 0xDB, "sub.ovf.un", None, Sequential;
    ENDFINALLY = 0xDC, "endfinally", None, EndFinally;
    LEAVE = 0xDD, "leave", Target32, Leave;
    LEAVE_S = 0xDE, "leave.s", Target8, Leave;
    STIND_I = 0xDF, "stind.i", None, Sequential;
    CONV_U = 0xE0, "conv.u", None, Sequential;
    ARGLIST = 0xFE00, "arglist", None, Sequential;
    CEQ = 0xFE01, "ceq", None, Sequential;
    CGT = 0xFE02, "cgt", None, Sequential;
    CGT_UN = 0xFE03, "cgt.un", None, Sequential;
    CLT = 0xFE04, "clt", None, Sequential;
    CLT_UN = 0xFE05, "clt.un", None, Sequential;
    LDFTN = 0xFE06, "ldftn", Method, Sequential;
    LDVIRTFTN = 0xFE07, "ldvirtftn", Method, Sequential;
    LDARG = 0xFE09, "ldarg", Var16, Sequential;
    LDARGA = 0xFE0A, "ldarga", Var16, Sequential;
    STARG = 0xFE0B, "starg", Var16, Sequential;
    LDLOC = 0xFE0C, "ldloc", Var16, Sequential;
    LDLOCA = 0xFE0D, "ldloca", Var16, Sequential;
    STLOC = 0xFE0E, "stloc", Var16, Sequential;
    LOCALLOC = 0xFE0F, "localloc", None, Sequential;
    ENDFILTER = 0xFE11, "endfilter", None, EndFinally;
    UNALIGNED = 0xFE12, "unaligned.", UInt8, Prefix;
    VOLATILE = 0xFE13, "volatile.", None, Prefix;
    TAIL = 0xFE14, "tail.", None, Prefix;
    INITOBJ = 0xFE15, "initobj", Type, Sequential;
    CONSTRAINED = 0xFE16, "constrained.", Type, Prefix;
    CPBLK = 0xFE17, "cpblk", None, Sequential;
    INITBLK = 0xFE18, "initblk", None, Sequential;
    NO = 0xFE19, "no.", UInt8, Prefix;
    RETHROW = 0xFE1A, "rethrow", None, Throw;
    SIZEOF = 0xFE1C, "sizeof", Type, Sequential;
    REFANYTYPE = 0xFE1D, "refanytype", None, Sequential;
    READONLY = 0xFE1E, "readonly.", None, Prefix;
}

const fn build_table<const N: usize>(prefix: u16) -> [CilInstruction; N] {
    let mut table = [RESERVED; N];
    let mut i = 0;
    while i < OPCODE_LIST.len() {
        let (code, instruction) = OPCODE_LIST[i];
        if code >> 8 == prefix {
            table[(code & 0xFF) as usize] = instruction;
        }
        i += 1;
    }
    table
}

/// Single-byte opcodes, indexed by opcode byte
pub static INSTRUCTIONS: [CilInstruction; 256] = build_table::<256>(0x00);
/// Two-byte opcodes, indexed by the byte following `0xFE`
pub static INSTRUCTIONS_FE: [CilInstruction; 32] = build_table::<32>(0xFE);

impl OpCode {
    /// The opcode with this single-byte value, if assigned.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        if INSTRUCTIONS[byte as usize].instr.is_empty() {
            None
        } else {
            Some(OpCode(u16::from(byte)))
        }
    }

    /// The opcode `0xFE <byte>`, if assigned.
    #[must_use]
    pub fn from_fe_byte(byte: u8) -> Option<OpCode> {
        match INSTRUCTIONS_FE.get(byte as usize) {
            Some(entry) if !entry.instr.is_empty() => Some(OpCode(0xFE00 | u16::from(byte))),
            _ => None,
        }
    }

    /// The raw value, `0xFExx` for two-byte opcodes.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Table entry of this opcode.
    #[must_use]
    pub fn info(self) -> &'static CilInstruction {
        #[allow(clippy::cast_possible_truncation)]
        let index = (self.0 & 0xFF) as usize;
        let entry = if self.is_two_byte() {
            INSTRUCTIONS_FE.get(index)
        } else {
            INSTRUCTIONS.get(index)
        };
        entry.unwrap_or(&RESERVED)
    }

    /// Mnemonic, as used by ILDasm.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.info().instr
    }

    /// Operand encoding.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        self.info().op_type
    }

    /// Control flow behavior.
    #[must_use]
    pub fn flow(self) -> FlowType {
        self.info().flow
    }

    /// Whether the opcode is `0xFE`-prefixed.
    #[must_use]
    pub const fn is_two_byte(self) -> bool {
        self.0 >> 8 == 0xFE
    }

    /// Encoded size of the opcode itself.
    #[must_use]
    pub const fn size(self) -> usize {
        if self.is_two_byte() {
            2
        } else {
            1
        }
    }

    /// Append the opcode bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(self, buffer: &mut Vec<u8>) {
        if self.is_two_byte() {
            buffer.push(0xFE);
        }
        buffer.push(self.0 as u8);
    }

    /// The 32-bit form of a short branch or the 16-bit form of a short variable
    /// access; `None` for everything else.
    #[must_use]
    pub fn long_form(self) -> Option<OpCode> {
        match self.0 {
            0x2B..=0x37 => Some(OpCode(self.0 + 0x0D)),
            0xDE => Some(OpCode::LEAVE),
            0x0E => Some(OpCode::LDARG),
            0x0F => Some(OpCode::LDARGA),
            0x10 => Some(OpCode::STARG),
            0x11 => Some(OpCode::LDLOC),
            0x12 => Some(OpCode::LDLOCA),
            0x13 => Some(OpCode::STLOC),
            _ => None,
        }
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpCode({:#06x} {})", self.0, self.name())
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_populated() {
        assert_eq!(INSTRUCTIONS[0x2A].instr, "ret");
        assert_eq!(INSTRUCTIONS[0x72].op_type, OperandType::String);
        assert!(INSTRUCTIONS[0x24].instr.is_empty());
        assert!(INSTRUCTIONS[0xFE].instr.is_empty());
        assert_eq!(INSTRUCTIONS_FE[0x01].instr, "ceq");
        assert_eq!(INSTRUCTIONS_FE[0x1E].instr, "readonly.");
        assert!(INSTRUCTIONS_FE[0x08].instr.is_empty());

        let assigned = INSTRUCTIONS
            .iter()
            .chain(INSTRUCTIONS_FE.iter())
            .filter(|entry| !entry.instr.is_empty())
            .count();
        assert_eq!(assigned, OPCODE_LIST.len());
    }

    #[test]
    fn opcode_lookup() {
        assert_eq!(OpCode::from_byte(0x28), Some(OpCode::CALL));
        assert_eq!(OpCode::from_byte(0x24), None);
        assert_eq!(OpCode::from_fe_byte(0x0C), Some(OpCode::LDLOC));
        assert_eq!(OpCode::from_fe_byte(0x40), None);

        assert_eq!(OpCode::CEQ.size(), 2);
        assert_eq!(OpCode::NOP.size(), 1);
        assert_eq!(OpCode::SWITCH.flow(), FlowType::Switch);
        assert_eq!(OpCode::LDTOKEN.operand_type(), OperandType::Token);
        assert_eq!(format!("{}", OpCode::LDC_I4_S), "ldc.i4.s");
    }

    #[test]
    fn long_forms() {
        assert_eq!(OpCode::BR_S.long_form(), Some(OpCode::BR));
        assert_eq!(OpCode::BLT_UN_S.long_form(), Some(OpCode::BLT_UN));
        assert_eq!(OpCode::LEAVE_S.long_form(), Some(OpCode::LEAVE));
        assert_eq!(OpCode::LDLOC_S.long_form(), Some(OpCode::LDLOC));
        assert_eq!(OpCode::STARG_S.long_form(), Some(OpCode::STARG));
        assert_eq!(OpCode::BR.long_form(), None);
        assert_eq!(OpCode::RET.long_form(), None);

        for opcode in (0x2B..=0x37).filter_map(OpCode::from_byte) {
            let long = opcode.long_form().unwrap();
            assert_eq!(long.operand_type(), OperandType::Target32);
            assert_eq!(opcode.name(), format!("{}.s", long.name()));
        }
    }

    #[test]
    fn write_opcodes() {
        let mut buffer = Vec::new();
        OpCode::LDLOC.write(&mut buffer);
        OpCode::RET.write(&mut buffer);
        assert_eq!(buffer, [0xFE, 0x0C, 0x2A]);
    }
}
