//! # reilflow-core
//!
//! Core abstractions for REIL analysis. This crate defines the types the
//! analyses consume: sized operands, classified instructions, basic blocks,
//! block-level graphs with typed edges, and a parser for REIL listings.

pub mod block;
pub mod error;
pub mod graph;
pub mod instruction;
pub mod operand;
pub mod parser;

pub use block::{BlockId, ReilBlock};
pub use error::Error;
pub use graph::{EdgeType, ReilEdge, ReilFunction, ReilGraph};
pub use instruction::{ReilInstruction, ReilOpcode, IS_CALL_KEY, REIL_ADDRESS_SCALE};
pub use operand::{is_temporary_register, OperandKind, OperandSize, ReilOperand};
pub use parser::{parse_edge, parse_instruction, parse_listing, ParseError, ParseResult, ReilGraphBuilder};
