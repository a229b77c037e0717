//! Transfer functions and per-opcode dispatch.

use reilflow_core::{ReilInstruction, ReilOpcode};
use tracing::warn;

/// Result of applying a transfer function to one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation<E> {
    /// State after the instruction.
    pub primary: E,
    /// Alternative state for instructions that split control flow.
    ///
    /// The solver only propagates `primary`.
    pub secondary: Option<E>,
}

impl<E> Transformation<E> {
    pub fn new(primary: E) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: E) -> Self {
        self.secondary = Some(secondary);
        self
    }
}

/// Computes the state of a node from its instruction and inputs.
pub trait TransformationProvider<E> {
    /// `current` is the node's state from the previous sweep and `incoming`
    /// the combination of its influencing states.
    fn transform(&self, instruction: &ReilInstruction, current: &E, incoming: &E) -> Transformation<E>;
}

/// Transfer function for a single instruction.
pub type TransferFn<C, E> = fn(&C, &ReilInstruction, &E) -> Transformation<E>;

/// Opcode-family handlers of a per-instruction analysis.
///
/// Arithmetic and logic opcodes share `ternary`; single-source opcodes
/// share `binary`. The remaining handlers cover opcodes whose semantics do
/// not fit either family.
pub trait InstructionTransfer<E> {
    /// `op3 = op1 <op> op2`.
    fn ternary(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E>;

    /// `op3 = <op> op1`.
    fn binary(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E>;

    fn jcc(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E>;

    fn nop(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E>;

    /// Memory store.
    fn stm(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E>;

    fn undef(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E> {
        self.ternary(instruction, state)
    }

    /// The explicit `unkn` instruction.
    fn unknown(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E> {
        self.ternary(instruction, state)
    }

    /// Mnemonics the IR does not classify.
    fn unclassified(&self, instruction: &ReilInstruction, state: &E) -> Transformation<E> {
        self.ternary(instruction, state)
    }
}

/// Opcode to handler table.
pub struct DispatchTable<C, E> {
    handlers: [TransferFn<C, E>; ReilOpcode::COUNT],
}

impl<C, E> Clone for DispatchTable<C, E> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers,
        }
    }
}

impl<C, E> std::fmt::Debug for DispatchTable<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("handlers", &ReilOpcode::COUNT)
            .finish()
    }
}

impl<C: InstructionTransfer<E>, E> DispatchTable<C, E> {
    /// Creates a table routing every opcode to its family default.
    pub fn with_defaults() -> Self {
        let mut handlers =
            [<C as InstructionTransfer<E>>::ternary as TransferFn<C, E>; ReilOpcode::COUNT];
        for opcode in ReilOpcode::ALL {
            handlers[opcode.index()] = Self::family_default(opcode);
        }
        Self { handlers }
    }

    fn family_default(opcode: ReilOpcode) -> TransferFn<C, E> {
        match opcode {
            ReilOpcode::Add
            | ReilOpcode::And
            | ReilOpcode::Bsh
            | ReilOpcode::Div
            | ReilOpcode::Mod
            | ReilOpcode::Mul
            | ReilOpcode::Or
            | ReilOpcode::Sub
            | ReilOpcode::Xor => <C as InstructionTransfer<E>>::ternary,
            ReilOpcode::Bisz | ReilOpcode::Ldm | ReilOpcode::Str => <C as InstructionTransfer<E>>::binary,
            ReilOpcode::Jcc => <C as InstructionTransfer<E>>::jcc,
            ReilOpcode::Nop => <C as InstructionTransfer<E>>::nop,
            ReilOpcode::Stm => <C as InstructionTransfer<E>>::stm,
            ReilOpcode::Undef => <C as InstructionTransfer<E>>::undef,
            ReilOpcode::Unknown => <C as InstructionTransfer<E>>::unknown,
            ReilOpcode::Other => <C as InstructionTransfer<E>>::unclassified,
        }
    }
}

impl<C, E> DispatchTable<C, E> {
    /// Replaces the handler of one opcode.
    pub fn with_override(mut self, opcode: ReilOpcode, handler: TransferFn<C, E>) -> Self {
        self.handlers[opcode.index()] = handler;
        self
    }

    pub fn handler(&self, opcode: ReilOpcode) -> TransferFn<C, E> {
        self.handlers[opcode.index()]
    }
}

/// A [`TransformationProvider`] that dispatches on the opcode.
///
/// Handlers receive the combined incoming state; the node's previous state
/// is ignored.
#[derive(Debug, Clone)]
pub struct PerInstructionProvider<C, E> {
    transfer: C,
    table: DispatchTable<C, E>,
}

impl<C: InstructionTransfer<E>, E> PerInstructionProvider<C, E> {
    /// Creates a provider using the family defaults.
    pub fn new(transfer: C) -> Self {
        Self::with_table(transfer, DispatchTable::with_defaults())
    }
}

impl<C, E> PerInstructionProvider<C, E> {
    pub fn with_table(transfer: C, table: DispatchTable<C, E>) -> Self {
        Self { transfer, table }
    }

    pub fn transfer(&self) -> &C {
        &self.transfer
    }
}

impl<C, E> TransformationProvider<E> for PerInstructionProvider<C, E> {
    fn transform(&self, instruction: &ReilInstruction, _current: &E, incoming: &E) -> Transformation<E> {
        if instruction.opcode == ReilOpcode::Other {
            warn!(
                address = instruction.address,
                mnemonic = %instruction.mnemonic,
                "unclassified mnemonic, using the default handler"
            );
        }
        (self.table.handler(instruction.opcode))(&self.transfer, instruction, incoming)
    }
}
