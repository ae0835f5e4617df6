//! CIL instruction decoding.
//!
//! Decoding runs in two passes over the code of a [`RawMethodBody`]. The first pass
//! splits the byte stream into instructions, resolves token operands through an
//! [`OperandResolver`], and remembers the absolute offset every branch points to.
//! Once all instruction boundaries are known, the second pass turns those offsets
//! into [`InstrId`]s. A branch or handler boundary that does not land on an
//! instruction start is a decode error.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::assembly::{decode_instructions, NoOperands, OpCode, Operand};
//!
//! // br.s +1; nop; ret
//! let code = [0x2B, 0x01, 0x00, 0x2A];
//! let instructions = decode_instructions(&code, &mut NoOperands, false)?;
//! assert_eq!(instructions.len(), 3);
//! assert_eq!(instructions[0].opcode, OpCode::BR_S);
//! assert_eq!(instructions[0].operand, Operand::Target(instructions[2].id));
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::collections::HashMap;

use log::warn;
use widestring::U16String;

use crate::{
    assembly::{
        ExceptionHandler, HandlerKind, InstrId, Instruction, MemberToken, MethodBody, OpCode,
        Operand, OperandType,
    },
    file::parser::Parser,
    metadata::{
        method::{ExceptionClause, ExceptionHandlerFlags, RawMethodBody},
        signatures::{MethodSig, TypeSig},
        token::Token,
    },
    model::{FieldHandle, MethodHandle, TypeHandle},
    Result,
};

/// Turns the metadata tokens found in a method body into graph handles.
pub trait OperandResolver {
    /// The `#US` string behind an `ldstr` token.
    ///
    /// # Errors
    /// Returns an error if the token does not name a user string.
    fn user_string(&mut self, token: Token) -> Result<U16String>;

    /// A `TypeDef`, `TypeRef` or `TypeSpec` token.
    ///
    /// # Errors
    /// Returns an error if the token does not name a type.
    fn type_handle(&mut self, token: Token) -> Result<TypeHandle>;

    /// A `MethodDef`, `MemberRef` or `MethodSpec` token.
    ///
    /// # Errors
    /// Returns an error if the token does not name a method.
    fn method(&mut self, token: Token) -> Result<MethodHandle>;

    /// A `Field` or `MemberRef` token.
    ///
    /// # Errors
    /// Returns an error if the token does not name a field.
    fn field(&mut self, token: Token) -> Result<FieldHandle>;

    /// The operand of `ldtoken`, which may name a type, a method or a field.
    ///
    /// # Errors
    /// Returns an error if the token names none of them.
    fn member(&mut self, token: Token) -> Result<MemberToken>;

    /// The `StandAloneSig` behind a `calli` token.
    ///
    /// # Errors
    /// Returns an error if the token or its signature is invalid.
    fn signature(&mut self, token: Token) -> Result<MethodSig>;

    /// The local variable types behind the `StandAloneSig` token of a body header.
    ///
    /// # Errors
    /// Returns an error if the token or its signature is invalid.
    fn locals(&mut self, token: Token) -> Result<Vec<TypeSig>>;
}

/// A resolver for code without token operands; every lookup fails.
pub struct NoOperands;

impl OperandResolver for NoOperands {
    fn user_string(&mut self, token: Token) -> Result<U16String> {
        Err(crate::Error::InvalidToken(token))
    }

    fn type_handle(&mut self, token: Token) -> Result<TypeHandle> {
        Err(crate::Error::InvalidToken(token))
    }

    fn method(&mut self, token: Token) -> Result<MethodHandle> {
        Err(crate::Error::InvalidToken(token))
    }

    fn field(&mut self, token: Token) -> Result<FieldHandle> {
        Err(crate::Error::InvalidToken(token))
    }

    fn member(&mut self, token: Token) -> Result<MemberToken> {
        Err(crate::Error::InvalidToken(token))
    }

    fn signature(&mut self, token: Token) -> Result<MethodSig> {
        Err(crate::Error::InvalidToken(token))
    }

    fn locals(&mut self, token: Token) -> Result<Vec<TypeSig>> {
        Err(crate::Error::InvalidToken(token))
    }
}

/// Branch targets recorded by the first pass, as absolute code offsets.
enum PendingTargets {
    None,
    Single(i64),
    Switch(Vec<i64>),
}

/// Decode a complete method body: instructions, locals and exception handlers.
///
/// With `tolerant` set, token operands that fail to resolve become
/// [`Operand::Unresolved`] and a warning is logged; otherwise the failure is
/// returned. Broken branch targets and handler boundaries always fail.
///
/// # Errors
/// Returns [`crate::Error::Decode`] for inconsistent control flow, and the
/// resolver's error for unresolvable locals, catch types or (when not tolerant)
/// operands.
pub fn decode_body(
    raw: &RawMethodBody,
    resolver: &mut dyn OperandResolver,
    tolerant: bool,
) -> Result<MethodBody> {
    let instructions = decode_instructions(raw.code, resolver, tolerant)?;

    let locals = if raw.header.local_var_sig_token == 0 {
        Vec::new()
    } else {
        resolver.locals(Token(raw.header.local_var_sig_token))?
    };

    let by_offset: HashMap<u32, InstrId> = instructions
        .iter()
        .map(|instruction| (instruction.offset, instruction.id))
        .collect();
    #[allow(clippy::cast_possible_truncation)]
    let code_size = raw.code.len() as u32;

    let exception_handlers = raw
        .exception_clauses
        .iter()
        .map(|clause| decode_handler(clause, &by_offset, code_size, resolver))
        .collect::<Result<Vec<_>>>()?;

    Ok(MethodBody::from_parts(
        instructions,
        locals,
        exception_handlers,
        raw.header.max_stack,
        raw.header.init_locals,
    ))
}

fn decode_handler(
    clause: &ExceptionClause,
    by_offset: &HashMap<u32, InstrId>,
    code_size: u32,
    resolver: &mut dyn OperandResolver,
) -> Result<ExceptionHandler> {
    let start = |offset: u32| {
        by_offset.get(&offset).copied().ok_or_else(|| {
            decode_error!(
                "exception handler",
                "region start 0x{:04x} is not an instruction boundary",
                offset
            )
        })
    };
    let end = |offset: u64| {
        if offset == u64::from(code_size) {
            return Ok(None);
        }
        u32::try_from(offset)
            .ok()
            .and_then(|offset| by_offset.get(&offset).copied())
            .map(Some)
            .ok_or_else(|| {
                decode_error!(
                    "exception handler",
                    "region end 0x{:04x} is not an instruction boundary",
                    offset
                )
            })
    };

    let kind = if clause.flags.contains(ExceptionHandlerFlags::FILTER) {
        HandlerKind::Filter
    } else if clause.flags.contains(ExceptionHandlerFlags::FINALLY) {
        HandlerKind::Finally
    } else if clause.flags.contains(ExceptionHandlerFlags::FAULT) {
        HandlerKind::Fault
    } else {
        HandlerKind::Catch
    };

    let (catch_type, filter_start) = match kind {
        HandlerKind::Catch => (
            Some(resolver.type_handle(Token(clause.class_token_or_filter))?),
            None,
        ),
        HandlerKind::Filter => (None, Some(start(clause.class_token_or_filter)?)),
        HandlerKind::Finally | HandlerKind::Fault => (None, None),
    };

    Ok(ExceptionHandler {
        kind,
        try_start: start(clause.try_offset)?,
        try_end: end(u64::from(clause.try_offset) + u64::from(clause.try_length))?,
        handler_start: start(clause.handler_offset)?,
        handler_end: end(u64::from(clause.handler_offset) + u64::from(clause.handler_length))?,
        filter_start,
        catch_type,
    })
}

/// Decode an instruction stream.
///
/// Instructions get ids `0..n` in code order and their offsets from the start of
/// `code`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unassigned opcodes,
/// [`crate::Error::OutOfBounds`] for truncated operands and
/// [`crate::Error::Decode`] for branches into the middle of an instruction.
pub fn decode_instructions(
    code: &[u8],
    resolver: &mut dyn OperandResolver,
    tolerant: bool,
) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    let mut pending = Vec::new();

    while parser.has_more_data() {
        #[allow(clippy::cast_possible_truncation)]
        let offset = parser.pos() as u32;
        let opcode = read_opcode(&mut parser)?;
        let (operand, targets) = read_operand(&mut parser, opcode, resolver, tolerant)?;

        #[allow(clippy::cast_possible_truncation)]
        let id = InstrId(instructions.len() as u32);
        instructions.push(Instruction {
            id,
            offset,
            opcode,
            operand,
        });
        pending.push(targets);
    }

    let by_offset: HashMap<i64, InstrId> = instructions
        .iter()
        .map(|instruction| (i64::from(instruction.offset), instruction.id))
        .collect();
    let lookup = |instruction: &Instruction, target: i64| {
        by_offset.get(&target).copied().ok_or_else(|| {
            decode_error!(
                "method body",
                "{} at IL_{:04x} targets 0x{:x}, which is not an instruction boundary",
                instruction.opcode,
                instruction.offset,
                target
            )
        })
    };

    for (instruction, targets) in instructions.iter_mut().zip(pending) {
        match targets {
            PendingTargets::None => {}
            PendingTargets::Single(target) => {
                instruction.operand = Operand::Target(lookup(instruction, target)?);
            }
            PendingTargets::Switch(targets) => {
                let ids = targets
                    .into_iter()
                    .map(|target| lookup(instruction, target))
                    .collect::<Result<Vec<_>>>()?;
                instruction.operand = Operand::Switch(ids);
            }
        }
    }

    Ok(instructions)
}

fn read_opcode(parser: &mut Parser) -> Result<OpCode> {
    let first_byte = parser.read_le::<u8>()?;
    if first_byte == 0xFE {
        let second_byte = parser.read_le::<u8>()?;
        OpCode::from_fe_byte(second_byte)
            .ok_or_else(|| malformed_error!("Invalid opcode: FE {:02X}", second_byte))
    } else {
        OpCode::from_byte(first_byte)
            .ok_or_else(|| malformed_error!("Invalid opcode: {:02X}", first_byte))
    }
}

fn read_operand(
    parser: &mut Parser,
    opcode: OpCode,
    resolver: &mut dyn OperandResolver,
    tolerant: bool,
) -> Result<(Operand, PendingTargets)> {
    let operand = match opcode.operand_type() {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::I8(parser.read_le::<i8>()?),
        OperandType::UInt8 => Operand::U8(parser.read_le::<u8>()?),
        OperandType::Int32 => Operand::I32(parser.read_le::<i32>()?),
        OperandType::Int64 => Operand::I64(parser.read_le::<i64>()?),
        OperandType::Float32 => Operand::F32(parser.read_le::<f32>()?),
        OperandType::Float64 => Operand::F64(parser.read_le::<f64>()?),
        OperandType::Var8 => Operand::Var(u16::from(parser.read_le::<u8>()?)),
        OperandType::Var16 => Operand::Var(parser.read_le::<u16>()?),
        OperandType::Target8 => {
            let displacement = i64::from(parser.read_le::<i8>()?);
            let target = parser.pos() as i64 + displacement;
            return Ok((Operand::None, PendingTargets::Single(target)));
        }
        OperandType::Target32 => {
            let displacement = i64::from(parser.read_le::<i32>()?);
            let target = parser.pos() as i64 + displacement;
            return Ok((Operand::None, PendingTargets::Single(target)));
        }
        OperandType::Switch => {
            let count = parser.read_le::<u32>()? as usize;
            if count > parser.remaining() / 4 {
                return Err(out_of_bounds_error!());
            }
            let mut displacements = Vec::with_capacity(count);
            for _ in 0..count {
                displacements.push(i64::from(parser.read_le::<i32>()?));
            }
            let base = parser.pos() as i64;
            let targets = displacements.into_iter().map(|d| base + d).collect();
            return Ok((Operand::None, PendingTargets::Switch(targets)));
        }
        op_type => {
            let token = Token(parser.read_le::<u32>()?);
            let resolved = match op_type {
                OperandType::String => resolver.user_string(token).map(Operand::String),
                OperandType::Type => resolver.type_handle(token).map(Operand::Type),
                OperandType::Method => resolver.method(token).map(Operand::Method),
                OperandType::Field => resolver.field(token).map(Operand::Field),
                OperandType::Token => resolver.member(token).map(Operand::Token),
                _ => resolver
                    .signature(token)
                    .map(|sig| Operand::Signature(Box::new(sig))),
            };
            match resolved {
                Ok(operand) => operand,
                Err(error) if tolerant => {
                    warn!(
                        "{} at IL_{:04x}: keeping unresolved token {} ({})",
                        opcode,
                        parser.pos() - 4 - opcode.size(),
                        token,
                        error
                    );
                    Operand::Unresolved(token)
                }
                Err(error) => return Err(error),
            }
        }
    };

    Ok((operand, PendingTargets::None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::method::BodyHeader,
        model::{MemberRefId, MethodId, TypeRefId},
    };

    /// Resolves everything from a fixed row layout, and fails for table 0x0A row 0x99.
    struct FixedResolver;

    impl OperandResolver for FixedResolver {
        fn user_string(&mut self, token: Token) -> Result<U16String> {
            Ok(U16String::from_str(&format!("s{}", token.row())))
        }

        fn type_handle(&mut self, token: Token) -> Result<TypeHandle> {
            Ok(TypeHandle::Ref(TypeRefId::new(token.row() as usize - 1)))
        }

        fn method(&mut self, token: Token) -> Result<MethodHandle> {
            match token.table() {
                0x06 => Ok(MethodHandle::Def(MethodId::new(token.row() as usize - 1))),
                0x0A if token.row() != 0x99 => {
                    Ok(MethodHandle::Ref(MemberRefId::new(token.row() as usize - 1)))
                }
                _ => Err(crate::Error::InvalidToken(token)),
            }
        }

        fn field(&mut self, token: Token) -> Result<FieldHandle> {
            Err(crate::Error::InvalidToken(token))
        }

        fn member(&mut self, token: Token) -> Result<MemberToken> {
            self.type_handle(token).map(MemberToken::Type)
        }

        fn signature(&mut self, token: Token) -> Result<MethodSig> {
            Err(crate::Error::InvalidToken(token))
        }

        fn locals(&mut self, _token: Token) -> Result<Vec<TypeSig>> {
            Ok(vec![TypeSig::I4, TypeSig::String])
        }
    }

    #[test]
    fn decode_simple_stream() {
        // ldstr 0x70000001; call 0x0A000002; ret
        let code = [
            0x72, 0x01, 0x00, 0x00, 0x70, 0x28, 0x02, 0x00, 0x00, 0x0A, 0x2A,
        ];
        let instructions = decode_instructions(&code, &mut FixedResolver, false).unwrap();
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0].operand, Operand::String(U16String::from_str("s1")));
        assert_eq!(
            instructions[1].operand,
            Operand::Method(MethodHandle::Ref(MemberRefId::new(1)))
        );
        assert_eq!(instructions[1].offset, 5);
        assert_eq!(instructions[2].opcode, OpCode::RET);
        assert_eq!(instructions[2].offset, 10);
    }

    #[test]
    fn decode_branches_and_switch() {
        // 0: switch (2) +1 +2      -> targets 14 and 15
        // 13: nop, 14: nop, 15: br.s -3 -> 14
        // 17: ret
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x2B, 0xFD, 0x2A,
        ];
        let instructions = decode_instructions(&code, &mut NoOperands, false).unwrap();
        assert_eq!(instructions.len(), 5);
        assert_eq!(instructions[1].offset, 13);
        assert_eq!(
            instructions[0].operand,
            Operand::Switch(vec![instructions[2].id, instructions[3].id])
        );
        assert_eq!(instructions[3].operand, Operand::Target(instructions[2].id));
    }

    #[test]
    fn decode_two_byte_opcodes() {
        // ldloc 0x0102; ceq
        let code = [0xFE, 0x0C, 0x02, 0x01, 0xFE, 0x01];
        let instructions = decode_instructions(&code, &mut NoOperands, false).unwrap();
        assert_eq!(instructions[0].opcode, OpCode::LDLOC);
        assert_eq!(instructions[0].operand, Operand::Var(0x0102));
        assert_eq!(instructions[1].opcode, OpCode::CEQ);
        assert_eq!(instructions[1].offset, 4);
    }

    #[test]
    fn dangling_branch_is_an_error() {
        // br.s +1 lands inside ldc.i4
        let code = [0x2B, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let error = decode_instructions(&code, &mut NoOperands, false).unwrap_err();
        assert!(matches!(error, crate::Error::Decode { .. }));

        // branch past the end
        let code = [0x2B, 0x05, 0x2A];
        assert!(decode_instructions(&code, &mut NoOperands, false).is_err());
    }

    #[test]
    fn invalid_opcodes() {
        assert!(decode_instructions(&[0x24], &mut NoOperands, false).is_err());
        assert!(decode_instructions(&[0xFE, 0x08], &mut NoOperands, false).is_err());
        assert!(decode_instructions(&[0x20, 0x00], &mut NoOperands, false).is_err());
        assert!(decode_instructions(&[0x45, 0xFF, 0xFF, 0xFF, 0x0F], &mut NoOperands, false).is_err());
    }

    #[test]
    fn tolerant_mode_keeps_unresolved_tokens() {
        // call 0x0A000099; ret
        let code = [0x28, 0x99, 0x00, 0x00, 0x0A, 0x2A];
        assert!(decode_instructions(&code, &mut FixedResolver, false).is_err());

        let instructions = decode_instructions(&code, &mut FixedResolver, true).unwrap();
        assert_eq!(instructions[0].operand, Operand::Unresolved(Token(0x0A00_0099)));
    }

    #[test]
    fn decode_body_with_handlers() {
        // 0: nop; 1: leave.s +3 (-> 6); 3: pop; 4: leave.s 0 (-> 6); 6: ret
        let code = [0x00, 0xDE, 0x03, 0x26, 0xDE, 0x00, 0x2A];
        let raw = RawMethodBody {
            header: BodyHeader {
                max_stack: 2,
                local_var_sig_token: 0x1100_0001,
                init_locals: true,
            },
            is_fat: true,
            code: &code,
            exception_clauses: vec![
                ExceptionClause {
                    flags: ExceptionHandlerFlags::EXCEPTION,
                    try_offset: 0,
                    try_length: 3,
                    handler_offset: 3,
                    handler_length: 3,
                    class_token_or_filter: 0x0100_0005,
                },
                ExceptionClause {
                    flags: ExceptionHandlerFlags::FINALLY,
                    try_offset: 0,
                    try_length: 6,
                    handler_offset: 6,
                    handler_length: 1,
                    class_token_or_filter: 0,
                },
            ],
            size: 0,
        };

        let body = decode_body(&raw, &mut FixedResolver, false).unwrap();
        assert_eq!(body.max_stack, 2);
        assert!(body.init_locals);
        assert_eq!(body.locals, vec![TypeSig::I4, TypeSig::String]);

        let ids: Vec<_> = body.instructions.iter().map(|i| i.id).collect();
        let catch = &body.exception_handlers[0];
        assert_eq!(catch.kind, HandlerKind::Catch);
        assert_eq!(catch.try_start, ids[0]);
        assert_eq!(catch.try_end, Some(ids[2]));
        assert_eq!(catch.handler_end, Some(ids[4]));
        assert_eq!(catch.catch_type, Some(TypeHandle::Ref(TypeRefId::new(4))));

        let finally = &body.exception_handlers[1];
        assert_eq!(finally.kind, HandlerKind::Finally);
        assert_eq!(finally.handler_start, ids[4]);
        assert_eq!(finally.handler_end, None);
        body.validate().unwrap();
    }

    #[test]
    fn handler_boundary_inside_instruction() {
        let code = [0x20, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let raw = RawMethodBody {
            header: BodyHeader::default(),
            is_fat: true,
            code: &code,
            exception_clauses: vec![ExceptionClause {
                flags: ExceptionHandlerFlags::FINALLY,
                try_offset: 0,
                try_length: 2,
                handler_offset: 5,
                handler_length: 1,
                class_token_or_filter: 0,
            }],
            size: 0,
        };
        assert!(matches!(
            decode_body(&raw, &mut NoOperands, false),
            Err(crate::Error::Decode { .. })
        ));
    }
}
