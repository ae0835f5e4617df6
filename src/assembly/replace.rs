//! Instruction replacement.
//!
//! Rewriting tools swap instructions for new ones and expect everything that
//! pointed at the old instruction to follow: branches, switch tables and the
//! boundaries of exception handlers.

use std::collections::HashMap;

use crate::assembly::{InstrId, Instruction, MethodBody, Operand};

/// Replace instructions in place and redirect every reference to them.
///
/// Each instruction whose id is a key of `replacements` is swapped for the mapped
/// instruction, which keeps the old offset. Afterwards every branch target,
/// switch entry and handler boundary that named a replaced id names its
/// replacement instead; this also covers targets inside the new instructions
/// themselves. Ids not in the map are left alone.
///
/// New instructions should come from [`MethodBody::create`] so their ids are
/// fresh; [`MethodBody::validate`] reports collisions.
///
/// # Examples
///
/// ```rust
/// use std::collections::HashMap;
/// use cilweave::assembly::{replace_instructions, MethodBody, OpCode, Operand};
///
/// let mut body = MethodBody::new();
/// let nop = body.push(OpCode::NOP, Operand::None);
/// body.push(OpCode::BR_S, Operand::Target(nop));
///
/// let ret = body.create(OpCode::RET, Operand::None);
/// let ret_id = ret.id;
/// replace_instructions(&mut body, &HashMap::from([(nop, ret)]));
///
/// assert_eq!(body.instructions[0].id, ret_id);
/// assert_eq!(body.instructions[1].operand, Operand::Target(ret_id));
/// ```
pub fn replace_instructions(body: &mut MethodBody, replacements: &HashMap<InstrId, Instruction>) {
    if replacements.is_empty() {
        return;
    }

    for instruction in &mut body.instructions {
        if let Some(replacement) = replacements.get(&instruction.id) {
            let offset = instruction.offset;
            *instruction = replacement.clone();
            instruction.offset = offset;
        }
    }
    for replacement in replacements.values() {
        body.observe(replacement.id);
    }

    let redirect = |id: &mut InstrId| {
        if let Some(replacement) = replacements.get(id) {
            *id = replacement.id;
        }
    };

    for instruction in &mut body.instructions {
        match &mut instruction.operand {
            Operand::Target(target) => redirect(target),
            Operand::Switch(targets) => targets.iter_mut().for_each(redirect),
            _ => {}
        }
    }

    for handler in &mut body.exception_handlers {
        redirect(&mut handler.try_start);
        redirect(&mut handler.handler_start);
        for id in [
            &mut handler.try_end,
            &mut handler.handler_end,
            &mut handler.filter_start,
        ]
        .into_iter()
        .flatten()
        {
            redirect(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{ExceptionHandler, HandlerKind, OpCode},
        model::{MemberRefId, MethodHandle},
    };

    #[test]
    fn replacement_redirects_branches_and_handlers() {
        let mut body = MethodBody::new();
        let try_start = body.push(OpCode::NOP, Operand::None);
        let exit = body.create(OpCode::RET, Operand::None);
        let leave = body.push(OpCode::LEAVE_S, Operand::Target(exit.id));
        let handler = body.push(OpCode::ENDFINALLY, Operand::None);
        let exit_id = exit.id;
        body.instructions.push(exit);
        body.exception_handlers.push(ExceptionHandler {
            kind: HandlerKind::Finally,
            try_start,
            try_end: Some(handler),
            handler_start: handler,
            handler_end: Some(exit_id),
            filter_start: None,
            catch_type: None,
        });
        body.layout().unwrap();

        let new_start = body.create(
            OpCode::CALL,
            Operand::Method(MethodHandle::Ref(MemberRefId::new(0))),
        );
        let new_exit = body.create(OpCode::RET, Operand::None);
        let (new_start_id, new_exit_id) = (new_start.id, new_exit.id);
        let replacements = HashMap::from([(try_start, new_start), (exit_id, new_exit)]);
        replace_instructions(&mut body, &replacements);

        assert_eq!(body.instructions[0].id, new_start_id);
        assert_eq!(body.instructions[0].offset, 0);
        assert_eq!(body.instructions[3].id, new_exit_id);
        assert_eq!(body.instructions[3].offset, 4);
        assert_eq!(
            body.get(leave).unwrap().operand,
            Operand::Target(new_exit_id)
        );

        let handler_entry = &body.exception_handlers[0];
        assert_eq!(handler_entry.try_start, new_start_id);
        assert_eq!(handler_entry.try_end, Some(handler));
        assert_eq!(handler_entry.handler_end, Some(new_exit_id));
        body.validate().unwrap();
    }

    #[test]
    fn replacement_targets_are_redirected_too() {
        let mut body = MethodBody::new();
        let first = body.push(OpCode::NOP, Operand::None);
        let second = body.push(OpCode::NOP, Operand::None);

        // The new instruction branches to `second`, which is itself replaced.
        let branch = body.create(OpCode::BR_S, Operand::Target(second));
        let ret = body.create(OpCode::RET, Operand::None);
        let ret_id = ret.id;
        let replacements = HashMap::from([(first, branch), (second, ret)]);
        replace_instructions(&mut body, &replacements);

        assert_eq!(body.instructions[0].operand, Operand::Target(ret_id));
        body.validate().unwrap();
    }

    #[test]
    fn switch_entries_are_redirected() {
        let mut body = MethodBody::new();
        let a = body.create(OpCode::NOP, Operand::None);
        let a_id = a.id;
        body.push(OpCode::SWITCH, Operand::Switch(vec![a_id, a_id]));
        body.instructions.push(a);

        let b = body.create(OpCode::RET, Operand::None);
        let b_id = b.id;
        replace_instructions(&mut body, &HashMap::from([(a_id, b)]));
        assert_eq!(body.instructions[0].operand, Operand::Switch(vec![b_id, b_id]));
    }

    #[test]
    fn empty_map_is_a_no_op() {
        let mut body = MethodBody::new();
        body.push(OpCode::RET, Operand::None);
        let before = body.clone();
        replace_instructions(&mut body, &HashMap::new());
        assert_eq!(body, before);
    }
}
