//! Decoded method bodies.
//!
//! A [`MethodBody`] owns its instruction list, the local variable types and the
//! exception handlers. Handlers and branches refer to instructions by [`InstrId`],
//! so instructions can be inserted or replaced without touching offsets; the
//! encoder recomputes the layout on every write.

use std::collections::HashSet;

use crate::{
    assembly::{InstrId, Instruction, OpCode, Operand},
    metadata::signatures::TypeSig,
    model::TypeHandle,
    Error, Result,
};

/// The kind of an exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Typed catch block
    Catch,
    /// Catch block guarded by filter code
    Filter,
    /// Runs on every exit from the protected region
    Finally,
    /// Runs only when the protected region exits through an exception
    Fault,
}

/// A protected region together with its handler.
///
/// An end of `None` means the region extends to the end of the body.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Handler kind
    pub kind: HandlerKind,
    /// First protected instruction
    pub try_start: InstrId,
    /// First instruction after the protected region
    pub try_end: Option<InstrId>,
    /// First handler instruction
    pub handler_start: InstrId,
    /// First instruction after the handler
    pub handler_end: Option<InstrId>,
    /// First instruction of the filter, for [`HandlerKind::Filter`]
    pub filter_start: Option<InstrId>,
    /// Caught type, for [`HandlerKind::Catch`]
    pub catch_type: Option<TypeHandle>,
}

/// The instructions, locals and exception handlers of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Instructions in code order
    pub instructions: Vec<Instruction>,
    /// Local variable types
    pub locals: Vec<TypeSig>,
    /// Exception handlers, inner regions first
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    next_id: u32,
}

impl Default for MethodBody {
    fn default() -> Self {
        MethodBody::new()
    }
}

impl MethodBody {
    /// An empty body with a stack depth of 8 and initialized locals.
    #[must_use]
    pub fn new() -> MethodBody {
        MethodBody {
            instructions: Vec::new(),
            locals: Vec::new(),
            exception_handlers: Vec::new(),
            max_stack: 8,
            init_locals: true,
            next_id: 0,
        }
    }

    pub(crate) fn from_parts(
        instructions: Vec<Instruction>,
        locals: Vec<TypeSig>,
        exception_handlers: Vec<ExceptionHandler>,
        max_stack: u16,
        init_locals: bool,
    ) -> MethodBody {
        let next_id = instructions
            .iter()
            .map(|instruction| instruction.id.0 + 1)
            .max()
            .unwrap_or(0);
        MethodBody {
            instructions,
            locals,
            exception_handlers,
            max_stack,
            init_locals,
            next_id,
        }
    }

    /// Create an instruction with a fresh id without adding it to the body.
    ///
    /// Use this for instructions that go through [`MethodBody::insert_before`] or
    /// [`crate::assembly::replace_instructions`].
    pub fn create(&mut self, opcode: OpCode, operand: Operand) -> Instruction {
        let id = InstrId(self.next_id);
        self.next_id += 1;
        Instruction {
            id,
            offset: 0,
            opcode,
            operand,
        }
    }

    /// Append an instruction and return its id.
    pub fn push(&mut self, opcode: OpCode, operand: Operand) -> InstrId {
        let instruction = self.create(opcode, operand);
        let id = instruction.id;
        self.instructions.push(instruction);
        id
    }

    /// Insert `instruction` in front of the instruction `before`.
    ///
    /// Branches and handlers that name `before` keep naming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::GraphError`] if `before` is not part of this body.
    pub fn insert_before(&mut self, before: InstrId, instruction: Instruction) -> Result<()> {
        let Some(position) = self.position(before) else {
            return Err(Error::GraphError(format!(
                "cannot insert before {before:?}: not an instruction of this body"
            )));
        };
        self.observe(instruction.id);
        self.instructions.insert(position, instruction);
        Ok(())
    }

    /// Index of an instruction in [`MethodBody::instructions`].
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.instructions
            .iter()
            .position(|instruction| instruction.id == id)
    }

    /// Look up an instruction by id.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions
            .iter()
            .find(|instruction| instruction.id == id)
    }

    /// Look up an instruction by id for modification.
    pub fn get_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.instructions
            .iter_mut()
            .find(|instruction| instruction.id == id)
    }

    /// Recompute instruction offsets, promoting short forms that no longer fit.
    ///
    /// # Errors
    /// Returns [`crate::Error::Encode`] if a branch names a missing instruction.
    pub fn layout(&mut self) -> Result<u32> {
        let (opcodes, offsets, code_size) = crate::assembly::encoder::layout(&self.instructions)?;
        for ((instruction, opcode), offset) in self
            .instructions
            .iter_mut()
            .zip(opcodes)
            .zip(offsets)
        {
            instruction.opcode = opcode;
            instruction.offset = offset;
        }
        Ok(code_size)
    }

    pub(crate) fn observe(&mut self, id: InstrId) {
        if id.0 >= self.next_id {
            self.next_id = id.0 + 1;
        }
    }

    /// Check that the body can be encoded.
    ///
    /// Ids must be unique, every opcode must be assigned and carry a matching
    /// operand, no operand may still be unresolved, every branch and handler
    /// boundary must name an instruction of this body, and each handler must carry
    /// the extra data its kind needs.
    ///
    /// # Errors
    /// Returns [`crate::Error::GraphError`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::with_capacity(self.instructions.len());
        for instruction in &self.instructions {
            if !ids.insert(instruction.id) {
                return Err(Error::GraphError(format!(
                    "duplicate instruction id {:?}",
                    instruction.id
                )));
            }
        }

        for instruction in &self.instructions {
            if instruction.opcode.name().is_empty() {
                return Err(Error::GraphError(format!(
                    "{:?} uses unassigned opcode {:#06x}",
                    instruction.id,
                    instruction.opcode.value()
                )));
            }
            if let Operand::Unresolved(token) = instruction.operand {
                return Err(Error::GraphError(format!(
                    "{:?} ({}) references unresolved token {}",
                    instruction.id, instruction.opcode, token
                )));
            }
            if !instruction.operand.matches(instruction.opcode.operand_type()) {
                return Err(Error::GraphError(format!(
                    "{:?} ({}) carries operand {:?}",
                    instruction.id, instruction.opcode, instruction.operand
                )));
            }
            for target in instruction.operand.targets() {
                if !ids.contains(&target) {
                    return Err(Error::GraphError(format!(
                        "{:?} ({}) branches to missing {:?}",
                        instruction.id, instruction.opcode, target
                    )));
                }
            }
        }

        for (index, handler) in self.exception_handlers.iter().enumerate() {
            let boundaries = [
                Some(handler.try_start),
                handler.try_end,
                Some(handler.handler_start),
                handler.handler_end,
                handler.filter_start,
            ];
            if let Some(missing) = boundaries
                .into_iter()
                .flatten()
                .find(|id| !ids.contains(id))
            {
                return Err(Error::GraphError(format!(
                    "exception handler {index} names missing {missing:?}"
                )));
            }

            let well_formed = match handler.kind {
                HandlerKind::Catch => handler.catch_type.is_some() && handler.filter_start.is_none(),
                HandlerKind::Filter => handler.filter_start.is_some() && handler.catch_type.is_none(),
                HandlerKind::Finally | HandlerKind::Fault => {
                    handler.catch_type.is_none() && handler.filter_start.is_none()
                }
            };
            if !well_formed {
                return Err(Error::GraphError(format!(
                    "exception handler {index} of kind {:?} has inconsistent catch type or filter",
                    handler.kind
                )));
            }

            for (start, end) in [
                (handler.try_start, handler.try_end),
                (handler.handler_start, handler.handler_end),
            ] {
                let start = self.position(start);
                let end = end.and_then(|end| self.position(end));
                if let (Some(start), Some(end)) = (start, end) {
                    if end <= start {
                        return Err(Error::GraphError(format!(
                            "exception handler {index} has an empty or inverted region"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::Token, model::TypeRefId};

    fn try_catch_body() -> (MethodBody, InstrId, InstrId, InstrId) {
        let mut body = MethodBody::new();
        let start = body.push(OpCode::NOP, Operand::None);
        let exit = body.create(OpCode::RET, Operand::None);
        let exit_id = exit.id;
        body.push(OpCode::LEAVE_S, Operand::Target(exit_id));
        let handler = body.push(OpCode::POP, Operand::None);
        body.push(OpCode::LEAVE_S, Operand::Target(exit_id));
        body.instructions.push(exit);
        body.exception_handlers.push(ExceptionHandler {
            kind: HandlerKind::Catch,
            try_start: start,
            try_end: Some(handler),
            handler_start: handler,
            handler_end: Some(exit_id),
            filter_start: None,
            catch_type: Some(TypeHandle::Ref(TypeRefId::new(0))),
        });
        (body, start, handler, exit_id)
    }

    #[test]
    fn push_and_create_hand_out_fresh_ids() {
        let mut body = MethodBody::new();
        let first = body.push(OpCode::NOP, Operand::None);
        let detached = body.create(OpCode::RET, Operand::None);
        let second = body.push(OpCode::RET, Operand::None);
        assert_ne!(first, detached.id);
        assert_ne!(detached.id, second);
        assert_eq!(body.instructions.len(), 2);
    }

    #[test]
    fn insert_before() {
        let mut body = MethodBody::new();
        let ret = body.push(OpCode::RET, Operand::None);
        let nop = body.create(OpCode::NOP, Operand::None);
        let nop_id = nop.id;
        body.insert_before(ret, nop).unwrap();
        assert_eq!(body.position(nop_id), Some(0));
        assert_eq!(body.position(ret), Some(1));

        let orphan = body.create(OpCode::NOP, Operand::None);
        assert!(body.insert_before(InstrId(999), orphan).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_body() {
        let (body, ..) = try_catch_body();
        body.validate().unwrap();
    }

    #[test]
    fn validate_rejects_broken_bodies() {
        let (mut body, ..) = try_catch_body();
        body.instructions[1].operand = Operand::Target(InstrId(99));
        assert!(body.validate().is_err());

        let (mut body, ..) = try_catch_body();
        body.instructions[0].operand = Operand::I32(1);
        assert!(body.validate().is_err());

        let (mut body, ..) = try_catch_body();
        body.exception_handlers[0].catch_type = None;
        assert!(body.validate().is_err());

        let (mut body, start, ..) = try_catch_body();
        body.exception_handlers[0].try_end = Some(start);
        assert!(body.validate().is_err());

        let (mut body, ..) = try_catch_body();
        body.instructions[0] = Instruction {
            id: body.instructions[0].id,
            offset: 0,
            opcode: OpCode::CALL,
            operand: Operand::Unresolved(Token(0x0A00_0001)),
        };
        assert!(body.validate().is_err());

        let (mut body, ..) = try_catch_body();
        let duplicate = body.instructions[0].clone();
        body.instructions.push(duplicate);
        assert!(body.validate().is_err());
    }

    #[test]
    fn layout_promotes_far_branches() {
        let mut body = MethodBody::new();
        let end = body.create(OpCode::RET, Operand::None);
        body.push(OpCode::BR_S, Operand::Target(end.id));
        for _ in 0..200 {
            body.push(OpCode::NOP, Operand::None);
        }
        body.instructions.push(end);

        let size = body.layout().unwrap();
        assert_eq!(body.instructions[0].opcode, OpCode::BR);
        assert_eq!(body.instructions[1].offset, 5);
        assert_eq!(size, 5 + 200 + 1);
    }
}
