//! CIL bytecode: opcodes, instruction decoding and encoding, and instruction
//! replacement.
//!
//! Method bodies are kept in a symbolic form. Branches and exception handler
//! boundaries name instructions by [`InstrId`] rather than by byte offset, and
//! token operands hold graph handles rather than tokens. This makes editing a body
//! safe: nothing has to be re-based when instructions are inserted, and the
//! encoder picks the final instruction forms.
//!
//! # Key Components
//!
//! - [`OpCode`] and the [`INSTRUCTIONS`] / [`INSTRUCTIONS_FE`] tables
//! - [`MethodBody`], [`Instruction`] and [`ExceptionHandler`]
//! - [`decode_body`] and [`encode_body`]
//! - [`replace_instructions`]
//!
//! # Examples
//!
//! ```rust
//! use cilweave::assembly::{MethodBody, OpCode, Operand};
//!
//! let mut body = MethodBody::new();
//! let end = body.create(OpCode::RET, Operand::None);
//! body.push(OpCode::LDC_I4_1, Operand::None);
//! body.push(OpCode::BRTRUE_S, Operand::Target(end.id));
//! body.push(OpCode::NOP, Operand::None);
//! body.instructions.push(end);
//!
//! body.validate()?;
//! assert_eq!(body.layout()?, 5);
//! # Ok::<(), cilweave::Error>(())
//! ```

mod body;
mod decoder;
mod encoder;
mod instruction;
mod opcodes;
mod replace;

pub use body::{ExceptionHandler, HandlerKind, MethodBody};
pub use decoder::{decode_body, decode_instructions, NoOperands, OperandResolver};
pub use encoder::{encode_body, EncodedBody, OperandEmitter};
pub use instruction::{InstrId, Instruction, MemberToken, Operand};
pub use opcodes::{CilInstruction, FlowType, OpCode, OperandType, INSTRUCTIONS, INSTRUCTIONS_FE};
pub use replace::replace_instructions;
