//! CIL instruction encoding.
//!
//! Encoding first lays the body out: instruction sizes give offsets, and every
//! short branch whose displacement no longer fits into a signed byte is promoted
//! to its 32-bit form. Promotion grows the code, which can push other short
//! branches out of range, so the layout repeats until nothing changes. Short
//! variable forms whose index exceeds 255 are promoted up front. Long forms are
//! never shortened, so a body that was decoded and not edited encodes to the same
//! bytes.
//!
//! Token operands are turned into tokens through an [`OperandEmitter`], which the
//! writer implements on top of its table builders.

use std::collections::HashMap;

use widestring::U16String;

use crate::{
    assembly::{
        HandlerKind, InstrId, Instruction, MemberToken, MethodBody, OpCode, Operand, OperandType,
    },
    file::io::write_le,
    metadata::{
        method::{write_method_body, BodyHeader, ExceptionClause, ExceptionHandlerFlags},
        signatures::{MethodSig, TypeSig},
        token::Token,
    },
    model::{FieldHandle, MethodHandle, TypeHandle},
    Result,
};

/// Assigns metadata tokens to the operands of a method body.
pub trait OperandEmitter {
    /// Token of a `#US` entry holding `value`.
    ///
    /// # Errors
    /// Returns an error if the string cannot be stored.
    fn user_string(&mut self, value: &U16String) -> Result<Token>;

    /// `TypeDef`, `TypeRef` or `TypeSpec` token of a type.
    ///
    /// # Errors
    /// Returns an error if the handle does not name an emitted type.
    fn type_token(&mut self, handle: &TypeHandle) -> Result<Token>;

    /// `MethodDef`, `MemberRef` or `MethodSpec` token of a method.
    ///
    /// # Errors
    /// Returns an error if the handle does not name an emitted method.
    fn method_token(&mut self, handle: &MethodHandle) -> Result<Token>;

    /// `Field` or `MemberRef` token of a field.
    ///
    /// # Errors
    /// Returns an error if the handle does not name an emitted field.
    fn field_token(&mut self, handle: &FieldHandle) -> Result<Token>;

    /// `StandAloneSig` token of a `calli` call site signature.
    ///
    /// # Errors
    /// Returns an error if the signature cannot be encoded.
    fn signature_token(&mut self, sig: &MethodSig) -> Result<Token>;

    /// `StandAloneSig` token of a local variable signature.
    ///
    /// # Errors
    /// Returns an error if the signature cannot be encoded.
    fn locals_token(&mut self, locals: &[TypeSig]) -> Result<Token>;
}

/// A body ready to be written: header values, code bytes and exception clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    /// Header values
    pub header: BodyHeader,
    /// Instruction stream
    pub code: Vec<u8>,
    /// Exception clauses, in handler order
    pub clauses: Vec<ExceptionClause>,
}

impl EncodedBody {
    /// Append the framed body to `buffer`; see [`write_method_body`].
    pub fn write(&self, buffer: &mut Vec<u8>) {
        write_method_body(&self.header, &self.code, &self.clauses, buffer);
    }
}

fn encoded_size(opcode: OpCode, operand: &Operand) -> usize {
    let operand_size = match (opcode.operand_type(), operand) {
        (OperandType::Switch, Operand::Switch(targets)) => 4 + 4 * targets.len(),
        (op_type, _) => op_type.size(),
    };
    opcode.size() + operand_size
}

/// Compute final opcodes and offsets for `instructions`, plus the code size.
pub(crate) fn layout(instructions: &[Instruction]) -> Result<(Vec<OpCode>, Vec<u32>, u32)> {
    let index: HashMap<InstrId, usize> = instructions
        .iter()
        .enumerate()
        .map(|(position, instruction)| (instruction.id, position))
        .collect();

    let mut opcodes: Vec<OpCode> = instructions
        .iter()
        .map(|instruction| match (&instruction.operand, instruction.opcode.long_form()) {
            (Operand::Var(value), Some(long)) if *value > 0xFF => long,
            _ => instruction.opcode,
        })
        .collect();

    loop {
        let mut offsets = Vec::with_capacity(instructions.len());
        let mut offset = 0_usize;
        for (instruction, opcode) in instructions.iter().zip(&opcodes) {
            offsets.push(offset);
            offset += encoded_size(*opcode, &instruction.operand);
        }
        let code_size = u32::try_from(offset)
            .map_err(|_| encode_error!("method body", "code size {} exceeds 4 GiB", offset))?;

        let mut changed = false;
        for (position, instruction) in instructions.iter().enumerate() {
            if opcodes[position].operand_type() != OperandType::Target8 {
                continue;
            }
            let Operand::Target(target) = &instruction.operand else {
                continue;
            };
            let Some(&target) = index.get(target) else {
                return Err(encode_error!(
                    "method body",
                    "{} branches to missing {:?}",
                    instruction.opcode,
                    target
                ));
            };
            let next = offsets[position] + encoded_size(opcodes[position], &instruction.operand);
            let displacement = offsets[target] as i64 - next as i64;
            if i8::try_from(displacement).is_err() {
                if let Some(long) = opcodes[position].long_form() {
                    opcodes[position] = long;
                    changed = true;
                }
            }
        }

        if !changed {
            #[allow(clippy::cast_possible_truncation)]
            let offsets = offsets.into_iter().map(|offset| offset as u32).collect();
            return Ok((opcodes, offsets, code_size));
        }
    }
}

/// Encode a method body.
///
/// # Errors
/// Returns [`crate::Error::Encode`] for operands that do not match their opcode,
/// unresolved tokens, branches to missing instructions and malformed handlers,
/// and passes through errors from `emitter`.
pub fn encode_body(body: &MethodBody, emitter: &mut dyn OperandEmitter) -> Result<EncodedBody> {
    let (opcodes, offsets, code_size) = layout(&body.instructions)?;
    let offset_of: HashMap<InstrId, u32> = body
        .instructions
        .iter()
        .zip(&offsets)
        .map(|(instruction, offset)| (instruction.id, *offset))
        .collect();

    let mut code = Vec::with_capacity(code_size as usize);
    for (instruction, opcode) in body.instructions.iter().zip(&opcodes) {
        let end = code.len() + encoded_size(*opcode, &instruction.operand);
        opcode.write(&mut code);
        write_operand(instruction, *opcode, end, &offset_of, emitter, &mut code)?;
    }

    let clauses = body
        .exception_handlers
        .iter()
        .enumerate()
        .map(|(index, handler)| {
            let start = |id: InstrId| {
                offset_of.get(&id).copied().ok_or_else(|| {
                    encode_error!("exception handler", "{} names missing {:?}", index, id)
                })
            };
            let end = |id: Option<InstrId>| id.map_or(Ok(code_size), start);

            let try_offset = start(handler.try_start)?;
            let try_end = end(handler.try_end)?;
            let handler_offset = start(handler.handler_start)?;
            let handler_end = end(handler.handler_end)?;
            if try_end <= try_offset || handler_end <= handler_offset {
                return Err(encode_error!(
                    "exception handler",
                    "{} has an empty or inverted region",
                    index
                ));
            }

            let (flags, class_token_or_filter) = match handler.kind {
                HandlerKind::Catch => {
                    let Some(catch_type) = &handler.catch_type else {
                        return Err(encode_error!(
                            "exception handler",
                            "{} is a catch without a type",
                            index
                        ));
                    };
                    (
                        ExceptionHandlerFlags::EXCEPTION,
                        emitter.type_token(catch_type)?.value(),
                    )
                }
                HandlerKind::Filter => {
                    let Some(filter_start) = handler.filter_start else {
                        return Err(encode_error!(
                            "exception handler",
                            "{} is a filter without filter code",
                            index
                        ));
                    };
                    (ExceptionHandlerFlags::FILTER, start(filter_start)?)
                }
                HandlerKind::Finally => (ExceptionHandlerFlags::FINALLY, 0),
                HandlerKind::Fault => (ExceptionHandlerFlags::FAULT, 0),
            };

            Ok(ExceptionClause {
                flags,
                try_offset,
                try_length: try_end - try_offset,
                handler_offset,
                handler_length: handler_end - handler_offset,
                class_token_or_filter,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let local_var_sig_token = if body.locals.is_empty() {
        0
    } else {
        emitter.locals_token(&body.locals)?.value()
    };

    Ok(EncodedBody {
        header: BodyHeader {
            max_stack: body.max_stack,
            local_var_sig_token,
            init_locals: body.init_locals,
        },
        code,
        clauses,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn write_operand(
    instruction: &Instruction,
    opcode: OpCode,
    end: usize,
    offset_of: &HashMap<InstrId, u32>,
    emitter: &mut dyn OperandEmitter,
    code: &mut Vec<u8>,
) -> Result<()> {
    let mismatch = || {
        encode_error!(
            "instruction",
            "IL_{:04x} {} cannot carry {:?}",
            instruction.offset,
            opcode,
            instruction.operand
        )
    };
    let displacement = |target: &InstrId| -> Result<i64> {
        offset_of
            .get(target)
            .map(|offset| i64::from(*offset) - end as i64)
            .ok_or_else(|| {
                encode_error!("instruction", "{} branches to missing {:?}", opcode, target)
            })
    };

    if let Operand::Unresolved(token) = &instruction.operand {
        return Err(encode_error!(
            "instruction",
            "IL_{:04x} {} still references unresolved token {}",
            instruction.offset,
            opcode,
            token
        ));
    }

    match (opcode.operand_type(), &instruction.operand) {
        (OperandType::None, Operand::None) => {}
        (OperandType::Int8, Operand::I8(value)) => write_le(code, *value),
        (OperandType::UInt8, Operand::U8(value)) => write_le(code, *value),
        (OperandType::Int32, Operand::I32(value)) => write_le(code, *value),
        (OperandType::Int64, Operand::I64(value)) => write_le(code, *value),
        (OperandType::Float32, Operand::F32(value)) => write_le(code, *value),
        (OperandType::Float64, Operand::F64(value)) => write_le(code, *value),
        (OperandType::Var8, Operand::Var(value)) => write_le(code, *value as u8),
        (OperandType::Var16, Operand::Var(value)) => write_le(code, *value),
        (OperandType::Target8, Operand::Target(target)) => {
            let displacement = i8::try_from(displacement(target)?).map_err(|_| mismatch())?;
            write_le(code, displacement);
        }
        (OperandType::Target32, Operand::Target(target)) => {
            let displacement = i32::try_from(displacement(target)?).map_err(|_| mismatch())?;
            write_le(code, displacement);
        }
        (OperandType::Switch, Operand::Switch(targets)) => {
            write_le(code, targets.len() as u32);
            for target in targets {
                let displacement =
                    i32::try_from(displacement(target)?).map_err(|_| mismatch())?;
                write_le(code, displacement);
            }
        }
        (OperandType::String, Operand::String(value)) => {
            write_le(code, emitter.user_string(value)?.value());
        }
        (OperandType::Type, Operand::Type(handle)) => {
            write_le(code, emitter.type_token(handle)?.value());
        }
        (OperandType::Method, Operand::Method(handle)) => {
            write_le(code, emitter.method_token(handle)?.value());
        }
        (OperandType::Field, Operand::Field(handle)) => {
            write_le(code, emitter.field_token(handle)?.value());
        }
        (OperandType::Token, Operand::Token(member)) => {
            let token = match member {
                MemberToken::Type(handle) => emitter.type_token(handle)?,
                MemberToken::Method(handle) => emitter.method_token(handle)?,
                MemberToken::Field(handle) => emitter.field_token(handle)?,
            };
            write_le(code, token.value());
        }
        (OperandType::Signature, Operand::Signature(sig)) => {
            write_le(code, emitter.signature_token(sig)?.value());
        }
        _ => return Err(mismatch()),
    }

    Ok(())
}
