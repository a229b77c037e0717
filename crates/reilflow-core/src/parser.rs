//! REIL listing parser.
//!
//! Reads the compact textual form REIL code is usually printed in:
//!
//! ```text
//! 0000000000000300: bisz [DWORD eax, EMPTY , BYTE ZF]
//! 0000000000000400: jcc [BYTE ZF, EMPTY , DWORD 4096] {isCall=true}
//! 300 [JUMP_UNCONDITIONAL]-> 400
//! ```
//!
//! Instruction lines carry a hexadecimal REIL address, a mnemonic, exactly
//! three operands and optional `{key=value}` metadata. Edge lines connect
//! blocks, naming each block by the REIL address of its first instruction.

use thiserror::Error;

use crate::graph::{EdgeType, ReilGraph};
use crate::operand::{OperandSize, ReilOperand};
use crate::{BlockId, ReilBlock, ReilInstruction};

/// Errors that can occur during parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid operand size: {0}")]
    InvalidSize(String),

    #[error("Invalid edge type: {0}")]
    InvalidEdgeType(String),

    #[error("Malformed instruction `{line}`: {message}")]
    MalformedInstruction { line: String, message: String },

    #[error("Malformed edge: {0}")]
    MalformedEdge(String),

    #[error("No block starts at address {0:#x}")]
    UnknownBlock(u64),

    #[error(transparent)]
    Graph(#[from] crate::Error),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

fn malformed(line: &str, message: &str) -> ParseError {
    ParseError::MalformedInstruction {
        line: line.to_string(),
        message: message.to_string(),
    }
}

fn parse_hex(text: &str) -> ParseResult<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidAddress(trimmed.to_string()))
}

fn parse_operand(line: &str, text: &str) -> ParseResult<ReilOperand> {
    let text = text.trim();
    let (size_text, value) = match text.split_once(char::is_whitespace) {
        Some((size, value)) => (size, value.trim()),
        None => (text, ""),
    };
    let size: OperandSize = size_text
        .parse()
        .map_err(|_| ParseError::InvalidSize(size_text.to_string()))?;

    match (size, value.is_empty()) {
        (OperandSize::Empty, true) => Ok(ReilOperand::empty()),
        (OperandSize::Empty, false) => Err(malformed(line, "EMPTY operand with a value")),
        (_, true) => Err(malformed(line, "sized operand without a value")),
        (_, false) => Ok(ReilOperand::new(size, value)),
    }
}

/// Parses a single instruction line.
pub fn parse_instruction(line: &str) -> ParseResult<ReilInstruction> {
    let line = line.trim();
    let (address, rest) = line
        .split_once(':')
        .ok_or_else(|| malformed(line, "missing ':' after address"))?;
    let address = parse_hex(address)?;

    let open = rest
        .find('[')
        .ok_or_else(|| malformed(line, "missing operand list"))?;
    let mnemonic = rest[..open].trim();
    if mnemonic.is_empty() || mnemonic.contains(char::is_whitespace) {
        return Err(malformed(line, "invalid mnemonic"));
    }
    let close = rest[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| malformed(line, "unterminated operand list"))?;

    let parts: Vec<&str> = rest[open + 1..close].split(',').collect();
    if parts.len() != 3 {
        return Err(malformed(line, "expected three operands"));
    }
    let mut instruction = ReilInstruction::new(
        address,
        mnemonic,
        parse_operand(line, parts[0])?,
        parse_operand(line, parts[1])?,
        parse_operand(line, parts[2])?,
    );

    let tail = rest[close + 1..].trim();
    if !tail.is_empty() {
        let body = tail
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .ok_or_else(|| malformed(line, "trailing text after operands"))?;
        for entry in body.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| malformed(line, "metadata entry without '='"))?;
            instruction
                .metadata
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok(instruction)
}

/// A parsed edge line: source block address, edge type, target block address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeLine {
    pub source: u64,
    pub kind: EdgeType,
    pub target: u64,
}

/// Parses an edge line such as `100 [JUMP_UNCONDITIONAL]-> 300`.
pub fn parse_edge(line: &str) -> ParseResult<EdgeLine> {
    let line = line.trim();
    let err = || ParseError::MalformedEdge(line.to_string());
    let open = line.find('[').ok_or_else(err)?;
    let arrow = line.find("]->").ok_or_else(err)?;
    if arrow < open {
        return Err(err());
    }
    let kind_text = line[open + 1..arrow].trim();
    let kind = kind_text
        .parse()
        .map_err(|_| ParseError::InvalidEdgeType(kind_text.to_string()))?;
    Ok(EdgeLine {
        source: parse_hex(&line[..open])?,
        kind,
        target: parse_hex(&line[arrow + 3..])?,
    })
}

/// Incremental construction of a [`ReilGraph`] from listing text.
///
/// Blocks receive sequential ids in the order they are added.
#[derive(Debug, Default)]
pub struct ReilGraphBuilder {
    blocks: Vec<Vec<ReilInstruction>>,
    edges: Vec<EdgeLine>,
}

impl ReilGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block from its instruction lines.
    pub fn block(mut self, lines: &[&str]) -> ParseResult<Self> {
        let instructions = lines
            .iter()
            .map(|l| parse_instruction(l))
            .collect::<ParseResult<Vec<_>>>()?;
        self.blocks.push(instructions);
        Ok(self)
    }

    /// Adds an edge from its listing line.
    pub fn edge(mut self, line: &str) -> ParseResult<Self> {
        self.edges.push(parse_edge(line)?);
        Ok(self)
    }

    /// Builds the graph, resolving edge endpoints to blocks.
    pub fn build(self) -> ParseResult<ReilGraph> {
        let mut graph = ReilGraph::new();
        for (i, instructions) in self.blocks.into_iter().enumerate() {
            graph.add_block(ReilBlock::new(BlockId::new(i as u32), instructions))?;
        }
        for edge in self.edges {
            let resolve = |address: u64| {
                graph
                    .block_starting_at(address)
                    .map(|b| b.id)
                    .ok_or(ParseError::UnknownBlock(address))
            };
            let source = resolve(edge.source)?;
            let target = resolve(edge.target)?;
            graph.add_edge(source, target, edge.kind)?;
        }
        Ok(graph)
    }
}

/// Parses a whole listing.
///
/// Blank lines separate blocks; lines containing `->` are edges, and lines
/// starting with `#` are comments.
pub fn parse_listing(text: &str) -> ParseResult<ReilGraph> {
    let mut builder = ReilGraphBuilder::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() || line.contains("->") {
            if !current.is_empty() {
                builder = builder.block(&current)?;
                current.clear();
            }
            if !line.is_empty() {
                builder = builder.edge(line)?;
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        builder = builder.block(&current)?;
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::OperandKind;
    use crate::ReilOpcode;

    // --- Instruction Tests ---

    #[test]
    fn test_parse_instruction() {
        let inst = parse_instruction("000000010025C500: str [DWORD edi, EMPTY , DWORD edi]").unwrap();
        assert_eq!(inst.address, 0x10025C500);
        assert_eq!(inst.opcode, ReilOpcode::Str);
        assert!(inst.second().is_empty());
        assert_eq!(inst.third().value, "edi");
        assert_eq!(inst.third().size, OperandSize::Dword);
    }

    #[test]
    fn test_parse_literals_and_subaddresses() {
        let inst = parse_instruction("805: bsh [QWORD t4, BYTE -32, DWORD t5]").unwrap();
        assert_eq!(inst.second().kind, OperandKind::IntegerLiteral);
        assert_eq!(inst.second().literal_value(), Some(0xE0));

        let jump = parse_instruction("802: jcc [BYTE t1, EMPTY , DWORD 8.9]").unwrap();
        assert_eq!(jump.third().kind, OperandKind::SubAddress);
    }

    #[test]
    fn test_parse_metadata() {
        let inst =
            parse_instruction("100: jcc [BYTE 1, EMPTY , DWORD 4096] {isCall=true, note=x}").unwrap();
        assert!(inst.is_function_call());
        assert_eq!(inst.metadata.get("note").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_display_round_trip() {
        let text = "0000000000000300: bisz [DWORD eax, EMPTY , BYTE ZF]";
        assert_eq!(parse_instruction(text).unwrap().to_string(), text);
    }

    #[test]
    fn test_parse_instruction_errors() {
        assert!(matches!(
            parse_instruction("zz: nop [EMPTY , EMPTY , EMPTY ]"),
            Err(ParseError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_instruction("100: add [DWORD eax, DWORD ebx]"),
            Err(ParseError::MalformedInstruction { .. })
        ));
        assert!(matches!(
            parse_instruction("100: add [HUGE eax, DWORD ebx, DWORD ecx]"),
            Err(ParseError::InvalidSize(_))
        ));
        assert!(matches!(
            parse_instruction("100 add [DWORD eax, DWORD ebx, DWORD ecx]"),
            Err(ParseError::MalformedInstruction { .. })
        ));
        assert!(matches!(
            parse_instruction("100: add [DWORD eax, DWORD, DWORD ecx]"),
            Err(ParseError::MalformedInstruction { .. })
        ));
    }

    // --- Edge Tests ---

    #[test]
    fn test_parse_edge() {
        let edge = parse_edge("100 [JUMP_CONDITIONAL_TRUE]-> 300").unwrap();
        assert_eq!(edge.source, 0x100);
        assert_eq!(edge.target, 0x300);
        assert_eq!(edge.kind, EdgeType::JumpConditionalTrue);

        assert!(matches!(
            parse_edge("100 [SIDEWAYS]-> 300"),
            Err(ParseError::InvalidEdgeType(_))
        ));
        assert!(matches!(parse_edge("100 -> 300"), Err(ParseError::MalformedEdge(_))));
    }

    // --- Graph Tests ---

    #[test]
    fn test_builder() {
        let graph = ReilGraphBuilder::new()
            .block(&["100: nop [EMPTY , EMPTY , EMPTY ]"])
            .unwrap()
            .block(&["200: nop [EMPTY , EMPTY , EMPTY ]"])
            .unwrap()
            .edge("100 [JUMP_UNCONDITIONAL]-> 200")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(graph.num_blocks(), 2);
        assert_eq!(graph.successors(BlockId(0)), vec![BlockId(1)]);
    }

    #[test]
    fn test_builder_unknown_block() {
        let result = ReilGraphBuilder::new()
            .block(&["100: nop [EMPTY , EMPTY , EMPTY ]"])
            .unwrap()
            .edge("100 [JUMP_UNCONDITIONAL]-> 200")
            .unwrap()
            .build();
        assert_eq!(result.unwrap_err(), ParseError::UnknownBlock(0x200));
    }

    #[test]
    fn test_parse_listing() {
        let listing = "
            # two blocks
            100: add [DWORD eax, DWORD 1, DWORD t0]
            101: str [DWORD t0, EMPTY , DWORD eax]

            200: jcc [DWORD eax, EMPTY , DWORD 1]
            100 [JUMP_UNCONDITIONAL]-> 200
            200 [JUMP_UNCONDITIONAL_LOOP]-> 100
        ";
        let graph = parse_listing(listing).unwrap();
        assert_eq!(graph.num_blocks(), 2);
        assert_eq!(graph.num_instructions(), 3);
        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.predecessors(BlockId(0)), vec![BlockId(1)]);
    }
}
