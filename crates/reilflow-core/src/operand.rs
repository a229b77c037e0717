//! REIL operand representation.

use std::fmt;
use std::str::FromStr;

/// Width of a REIL operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandSize {
    /// No operand.
    Empty,
    /// 8 bits.
    Byte,
    /// 16 bits.
    Word,
    /// 32 bits.
    Dword,
    /// 64 bits.
    Qword,
    /// 128 bits.
    Oword,
}

impl OperandSize {
    /// Returns the width in bits.
    pub fn bit_size(self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Byte => 8,
            Self::Word => 16,
            Self::Dword => 32,
            Self::Qword => 64,
            Self::Oword => 128,
        }
    }

    /// Returns the all-ones value for this width.
    pub fn mask(self) -> Option<u128> {
        match self {
            Self::Empty => None,
            Self::Oword => Some(u128::MAX),
            other => Some((1u128 << other.bit_size()) - 1),
        }
    }

    /// Returns the listing keyword for this size.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
            Self::Dword => "DWORD",
            Self::Qword => "QWORD",
            Self::Oword => "OWORD",
        }
    }
}

impl fmt::Display for OperandSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperandSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMPTY" => Ok(Self::Empty),
            "BYTE" => Ok(Self::Byte),
            "WORD" => Ok(Self::Word),
            "DWORD" => Ok(Self::Dword),
            "QWORD" => Ok(Self::Qword),
            "OWORD" => Ok(Self::Oword),
            _ => Err(s.to_string()),
        }
    }
}

/// What an operand value denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandKind {
    /// Unused operand slot.
    Empty,
    /// Integer constant.
    IntegerLiteral,
    /// Native register or REIL temporary.
    Register,
    /// REIL sub-address (`native.sub`), used as a jump target.
    SubAddress,
}

impl OperandKind {
    /// Classifies a textual operand value.
    pub fn classify(value: &str) -> Self {
        if value.is_empty() {
            return Self::Empty;
        }
        let digits = value.strip_prefix('-').unwrap_or(value);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return Self::IntegerLiteral;
        }
        if let Some((native, sub)) = value.split_once('.') {
            let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
            if numeric(native) && numeric(sub) {
                return Self::SubAddress;
            }
        }
        Self::Register
    }
}

/// Returns true if a register name denotes a REIL temporary.
///
/// Temporaries are scoped to the native instruction that produced them.
pub fn is_temporary_register(name: &str) -> bool {
    name.starts_with('t')
}

/// A single REIL operand: a sized value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReilOperand {
    /// Operand width.
    pub size: OperandSize,
    /// Textual value (register name, literal, or sub-address).
    pub value: String,
    /// Classification of `value`.
    pub kind: OperandKind,
}

impl ReilOperand {
    /// Creates an operand, classifying the value.
    pub fn new(size: OperandSize, value: impl Into<String>) -> Self {
        let value = value.into();
        let kind = if size == OperandSize::Empty {
            OperandKind::Empty
        } else {
            OperandKind::classify(&value)
        };
        Self { size, value, kind }
    }

    /// Creates an unused operand slot.
    pub fn empty() -> Self {
        Self {
            size: OperandSize::Empty,
            value: String::new(),
            kind: OperandKind::Empty,
        }
    }

    /// Creates a register operand.
    pub fn register(size: OperandSize, name: impl Into<String>) -> Self {
        Self {
            size,
            value: name.into(),
            kind: OperandKind::Register,
        }
    }

    /// Creates an integer literal operand.
    pub fn literal(size: OperandSize, value: i128) -> Self {
        Self {
            size,
            value: value.to_string(),
            kind: OperandKind::IntegerLiteral,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == OperandKind::Empty
    }

    pub fn is_register(&self) -> bool {
        self.kind == OperandKind::Register
    }

    pub fn is_literal(&self) -> bool {
        self.kind == OperandKind::IntegerLiteral
    }

    /// Returns true if this is a register operand naming a temporary.
    pub fn is_temporary(&self) -> bool {
        self.is_register() && is_temporary_register(&self.value)
    }

    /// Returns the register name if this is a register operand.
    pub fn register_name(&self) -> Option<&str> {
        self.is_register().then_some(self.value.as_str())
    }

    /// Returns the literal value truncated to the operand width.
    ///
    /// Negative literals are returned in two's complement.
    pub fn literal_value(&self) -> Option<u128> {
        let raw = self.written_literal()?;
        Some(match self.size.mask() {
            Some(mask) => raw & mask,
            None => raw,
        })
    }

    /// The literal as written, before truncation to the operand width.
    fn written_literal(&self) -> Option<u128> {
        if !self.is_literal() {
            return None;
        }
        match self.value.strip_prefix('-') {
            Some(magnitude) => Some(magnitude.parse::<u128>().ok()?.wrapping_neg()),
            None => self.value.parse::<u128>().ok(),
        }
    }

    /// Returns true if this is a literal written as zero.
    ///
    /// Out-of-width literals such as `BYTE 256` are not zero even though
    /// they truncate to it.
    pub fn is_zero_literal(&self) -> bool {
        self.written_literal() == Some(0)
    }

    /// Returns true if this is a literal with every bit of `size` set.
    pub fn is_all_ones_for(&self, size: OperandSize) -> bool {
        match (self.literal_value(), size.mask()) {
            (Some(value), Some(mask)) => value == mask,
            _ => false,
        }
    }
}

impl fmt::Display for ReilOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "EMPTY ")
        } else {
            write!(f, "{} {}", self.size, self.value)
        }
    }
}
