//! REIL instruction representation.

use crate::operand::{OperandSize, ReilOperand};
use std::collections::BTreeMap;
use std::fmt;

/// Multiplier between a native address and the REIL addresses it expands to.
pub const REIL_ADDRESS_SCALE: u64 = 0x100;

/// Metadata key marking a jump as a function call.
pub const IS_CALL_KEY: &str = "isCall";

/// REIL opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReilOpcode {
    Add,
    And,
    Bisz,
    Bsh,
    Div,
    Jcc,
    Ldm,
    Mod,
    Mul,
    Nop,
    Or,
    Stm,
    Str,
    Sub,
    Undef,
    /// The explicit `unkn` instruction.
    Unknown,
    Xor,
    /// A mnemonic the IR does not classify.
    Other,
}

impl ReilOpcode {
    /// Every opcode, in declaration order.
    pub const ALL: [ReilOpcode; 18] = [
        Self::Add,
        Self::And,
        Self::Bisz,
        Self::Bsh,
        Self::Div,
        Self::Jcc,
        Self::Ldm,
        Self::Mod,
        Self::Mul,
        Self::Nop,
        Self::Or,
        Self::Stm,
        Self::Str,
        Self::Sub,
        Self::Undef,
        Self::Unknown,
        Self::Xor,
        Self::Other,
    ];

    /// Number of opcodes, for table sizing.
    pub const COUNT: usize = Self::ALL.len();

    /// Classifies a mnemonic. Unrecognized mnemonics map to `Other`.
    pub fn from_mnemonic(mnemonic: &str) -> Self {
        match mnemonic.to_ascii_lowercase().as_str() {
            "add" => Self::Add,
            "and" => Self::And,
            "bisz" => Self::Bisz,
            "bsh" => Self::Bsh,
            "div" => Self::Div,
            "jcc" => Self::Jcc,
            "ldm" => Self::Ldm,
            "mod" => Self::Mod,
            "mul" => Self::Mul,
            "nop" => Self::Nop,
            "or" => Self::Or,
            "stm" => Self::Stm,
            "str" => Self::Str,
            "sub" => Self::Sub,
            "undef" => Self::Undef,
            "unkn" => Self::Unknown,
            "xor" => Self::Xor,
            _ => Self::Other,
        }
    }

    /// Returns the canonical mnemonic, or `None` for `Other`.
    pub fn mnemonic(self) -> Option<&'static str> {
        Some(match self {
            Self::Add => "add",
            Self::And => "and",
            Self::Bisz => "bisz",
            Self::Bsh => "bsh",
            Self::Div => "div",
            Self::Jcc => "jcc",
            Self::Ldm => "ldm",
            Self::Mod => "mod",
            Self::Mul => "mul",
            Self::Nop => "nop",
            Self::Or => "or",
            Self::Stm => "stm",
            Self::Str => "str",
            Self::Sub => "sub",
            Self::Undef => "undef",
            Self::Unknown => "unkn",
            Self::Xor => "xor",
            Self::Other => return None,
        })
    }

    /// Position of this opcode in [`ReilOpcode::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn uses_first_operand(self) -> bool {
        !matches!(self, Self::Nop | Self::Undef | Self::Unknown)
    }

    pub fn uses_second_operand(self) -> bool {
        !matches!(
            self,
            Self::Nop
                | Self::Bisz
                | Self::Str
                | Self::Stm
                | Self::Ldm
                | Self::Jcc
                | Self::Undef
                | Self::Unknown
        )
    }

    /// True if the third operand is a destination register.
    pub fn writes_third_operand(self) -> bool {
        !matches!(self, Self::Stm | Self::Jcc | Self::Nop | Self::Unknown)
    }

    /// True if the third operand is read (store address, jump target).
    pub fn reads_third_operand(self) -> bool {
        matches!(self, Self::Stm | Self::Jcc)
    }
}

/// A REIL instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReilInstruction {
    /// REIL address: native address * 0x100 + sub-index.
    pub address: u64,
    /// Mnemonic as it appeared in the input.
    pub mnemonic: String,
    /// Classified opcode.
    pub opcode: ReilOpcode,
    /// First, second and third operand.
    pub operands: [ReilOperand; 3],
    /// Free-form key/value metadata (e.g. `isCall`).
    pub metadata: BTreeMap<String, String>,
}

impl ReilInstruction {
    /// Creates a new instruction, classifying the mnemonic.
    pub fn new(
        address: u64,
        mnemonic: impl Into<String>,
        first: ReilOperand,
        second: ReilOperand,
        third: ReilOperand,
    ) -> Self {
        let mnemonic = mnemonic.into();
        Self {
            address,
            opcode: ReilOpcode::from_mnemonic(&mnemonic),
            mnemonic,
            operands: [first, second, third],
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a three-operand instruction `op3 = op1 <opcode> op2`.
    pub fn ternary(
        address: u64,
        opcode: ReilOpcode,
        first: ReilOperand,
        second: ReilOperand,
        third: ReilOperand,
    ) -> Self {
        Self::from_opcode(address, opcode, [first, second, third])
    }

    /// Creates a two-operand instruction `op3 = <opcode> op1`.
    pub fn binary(address: u64, opcode: ReilOpcode, first: ReilOperand, third: ReilOperand) -> Self {
        Self::from_opcode(address, opcode, [first, ReilOperand::empty(), third])
    }

    /// Creates a conditional jump.
    pub fn jcc(address: u64, condition: ReilOperand, target: ReilOperand) -> Self {
        Self::binary(address, ReilOpcode::Jcc, condition, target)
    }

    /// Creates a no-op.
    pub fn nop(address: u64) -> Self {
        Self::from_opcode(
            address,
            ReilOpcode::Nop,
            [ReilOperand::empty(), ReilOperand::empty(), ReilOperand::empty()],
        )
    }

    /// Creates an `undef` of the given register.
    pub fn undef(address: u64, size: OperandSize, register: &str) -> Self {
        Self::from_opcode(
            address,
            ReilOpcode::Undef,
            [
                ReilOperand::empty(),
                ReilOperand::empty(),
                ReilOperand::register(size, register),
            ],
        )
    }

    /// Creates an `unkn` instruction.
    pub fn unknown(address: u64) -> Self {
        Self::from_opcode(
            address,
            ReilOpcode::Unknown,
            [ReilOperand::empty(), ReilOperand::empty(), ReilOperand::empty()],
        )
    }

    fn from_opcode(address: u64, opcode: ReilOpcode, operands: [ReilOperand; 3]) -> Self {
        Self {
            address,
            mnemonic: opcode.mnemonic().unwrap_or("???").to_string(),
            opcode,
            operands,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Marks this instruction as a function call.
    pub fn as_call(self) -> Self {
        self.with_metadata(IS_CALL_KEY, "true")
    }

    pub fn first(&self) -> &ReilOperand {
        &self.operands[0]
    }

    pub fn second(&self) -> &ReilOperand {
        &self.operands[1]
    }

    pub fn third(&self) -> &ReilOperand {
        &self.operands[2]
    }

    /// Address of the native instruction this REIL instruction belongs to.
    pub fn native_address(&self) -> u64 {
        self.address / REIL_ADDRESS_SCALE
    }

    /// Position within the native instruction's translation.
    pub fn sub_index(&self) -> u64 {
        self.address % REIL_ADDRESS_SCALE
    }

    /// Returns true if this is a jump flagged as a function call.
    pub fn is_function_call(&self) -> bool {
        self.opcode == ReilOpcode::Jcc
            && self
                .metadata
                .get(IS_CALL_KEY)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn is_conditional_jump(&self) -> bool {
        self.opcode == ReilOpcode::Jcc
    }

    /// The register written by this instruction, if any.
    pub fn defined_register(&self) -> Option<&str> {
        if self.opcode.writes_third_operand() {
            self.third().register_name()
        } else {
            None
        }
    }

    /// Registers read by this instruction, with their operand index.
    pub fn used_registers(&self) -> Vec<(usize, &str)> {
        let mut used = Vec::new();
        if self.opcode.uses_first_operand() {
            if let Some(name) = self.first().register_name() {
                used.push((0, name));
            }
        }
        if self.opcode.uses_second_operand() {
            if let Some(name) = self.second().register_name() {
                used.push((1, name));
            }
        }
        if self.opcode.reads_third_operand() {
            if let Some(name) = self.third().register_name() {
                used.push((2, name));
            }
        }
        used
    }
}

impl fmt::Display for ReilInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016X}: {} [{}, {}, {}]",
            self.address, self.mnemonic, self.operands[0], self.operands[1], self.operands[2]
        )?;
        if !self.metadata.is_empty() {
            let entries: Vec<String> = self
                .metadata
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " {{{}}}", entries.join(", "))?;
        }
        Ok(())
    }
}
