//! Taint transfer functions for every REIL opcode.
//!
//! Ordinary instructions move taint between their source registers and
//! their destination:
//! - Backward: a tainted destination is untainted and marked read, and its
//!   source registers become tainted.
//! - Forward: the destination becomes tainted if any source register is
//!   tainted, and is untainted otherwise.
//!
//! Literals never carry taint. Several opcodes get special treatment:
//! - `and`/`mul` with a literal zero, `or` with an all-ones literal, and
//!   `sub`/`xor` of an operand with itself produce a constant and untaint
//!   the destination.
//! - `ldm` untaints its destination, since memory is not tracked.
//! - `stm` only records a read of a tainted source register.
//! - `undef` untaints its destination; `unkn` and `nop` change nothing.
//! - `jcc` clears registers at calls when configured to.

use std::collections::BTreeSet;

use reilflow_core::{ReilInstruction, ReilOpcode};

use super::element::RegisterSetLatticeElement;
use super::options::RegisterTrackingOptions;
use crate::mono::{
    AnalysisDirection, DispatchTable, InstructionTransfer, PerInstructionProvider, Transformation,
    TransformationProvider,
};

type Element = RegisterSetLatticeElement;

/// Per-opcode taint semantics.
#[derive(Debug, Clone)]
pub struct RegisterTrackingTransfer {
    options: RegisterTrackingOptions,
}

impl RegisterTrackingTransfer {
    pub fn new(options: RegisterTrackingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RegisterTrackingOptions {
        &self.options
    }

    fn transform_normal(&self, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
        match self.options.direction {
            AnalysisDirection::Up => transform_normal_backward(instruction, state),
            AnalysisDirection::Down => transform_normal_forward(instruction, state),
        }
    }
}

/// Source registers of an instruction's first two operands.
fn input_registers(instruction: &ReilInstruction) -> BTreeSet<&str> {
    instruction.operands[..2]
        .iter()
        .filter_map(|op| op.register_name())
        .collect()
}

fn transform_normal_backward(instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
    let mut output = state.step();
    let Some(out) = instruction.third().register_name() else {
        return Transformation::new(output);
    };
    if state.is_tainted(out) {
        let inputs = input_registers(instruction);
        output.untaint(out);
        if !inputs.is_empty() {
            output.add_read(out);
            output.taint_all(inputs);
        }
    }
    Transformation::new(output)
}

fn transform_normal_forward(instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
    let mut output = state.step();
    let Some(out) = instruction.third().register_name() else {
        return Transformation::new(output);
    };
    let tainted_inputs: Vec<&str> = input_registers(instruction)
        .into_iter()
        .filter(|r| state.is_tainted(r))
        .collect();
    if tainted_inputs.is_empty() {
        output.untaint(out);
    } else {
        for register in tainted_inputs {
            output.add_read(register);
        }
        output.taint(out);
    }
    Transformation::new(output)
}

/// Untaints the destination of an instruction whose result is constant.
fn untaint_destination(instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
    let mut output = state.step();
    output.untaint(&instruction.third().value);
    Transformation::new(output)
}

fn transform_and(transfer: &RegisterTrackingTransfer, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
    if instruction.first().is_zero_literal() || instruction.second().is_zero_literal() {
        return untaint_destination(instruction, state);
    }
    transfer.transform_normal(instruction, state)
}

fn transform_mul(transfer: &RegisterTrackingTransfer, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
    transform_and(transfer, instruction, state)
}

fn transform_or(transfer: &RegisterTrackingTransfer, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
    let size = instruction.third().size;
    let same_width = instruction.first().size == size && instruction.second().size == size;
    if same_width
        && (instruction.first().is_all_ones_for(size) || instruction.second().is_all_ones_for(size))
    {
        return untaint_destination(instruction, state);
    }
    transfer.transform_normal(instruction, state)
}

/// `sub` and `xor` of an operand with itself.
fn transform_self_cancelling(
    transfer: &RegisterTrackingTransfer,
    instruction: &ReilInstruction,
    state: &Element,
) -> Transformation<Element> {
    if instruction
        .first()
        .value
        .eq_ignore_ascii_case(&instruction.second().value)
    {
        return untaint_destination(instruction, state);
    }
    transfer.transform_normal(instruction, state)
}

fn transform_ldm(_: &RegisterTrackingTransfer, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
    untaint_destination(instruction, state)
}

impl InstructionTransfer<Element> for RegisterTrackingTransfer {
    fn ternary(&self, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
        self.transform_normal(instruction, state)
    }

    fn binary(&self, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
        self.transform_normal(instruction, state)
    }

    fn jcc(&self, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
        let mut output = state.step();
        if instruction.is_function_call() {
            output.untaint_all(self.options.registers_cleared_by_call(state.tainted_registers()));
        }
        if self.options.track_only_condition_variables {
            if let Some(condition) = instruction.first().register_name() {
                if state.is_tainted(condition) {
                    output.add_read(condition);
                }
            }
        }
        Transformation::new(output)
    }

    fn nop(&self, _: &ReilInstruction, state: &Element) -> Transformation<Element> {
        Transformation::new(state.step())
    }

    fn stm(&self, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
        let mut output = state.step();
        if let Some(source) = instruction.first().register_name() {
            if state.is_tainted(source) {
                output.add_read(source);
            }
        }
        Transformation::new(output)
    }

    fn undef(&self, instruction: &ReilInstruction, state: &Element) -> Transformation<Element> {
        untaint_destination(instruction, state)
    }

    fn unknown(&self, _: &ReilInstruction, state: &Element) -> Transformation<Element> {
        Transformation::new(state.step())
    }
}

/// Transformation provider of register tracking.
///
/// Optionally joins a seed element into the input of the instruction at
/// one REIL address; this is how a tracking run is started. Pending changes
/// of the node's current state are kept while its taint is unchanged.
#[derive(Debug, Clone)]
pub struct RegisterTrackingTransformationProvider {
    dispatch: PerInstructionProvider<RegisterTrackingTransfer, Element>,
    seed: Option<(u64, Element)>,
}

impl RegisterTrackingTransformationProvider {
    pub fn new(options: RegisterTrackingOptions) -> Self {
        let table = DispatchTable::<RegisterTrackingTransfer, Element>::with_defaults()
            .with_override(ReilOpcode::And, transform_and)
            .with_override(ReilOpcode::Mul, transform_mul)
            .with_override(ReilOpcode::Or, transform_or)
            .with_override(ReilOpcode::Sub, transform_self_cancelling)
            .with_override(ReilOpcode::Xor, transform_self_cancelling)
            .with_override(ReilOpcode::Ldm, transform_ldm);
        Self {
            dispatch: PerInstructionProvider::with_table(RegisterTrackingTransfer::new(options), table),
            seed: None,
        }
    }

    /// Joins `seed` into the input of the instruction at `address`.
    pub fn with_seed(mut self, address: u64, seed: Element) -> Self {
        self.seed = Some((address, seed));
        self
    }

    pub fn options(&self) -> &RegisterTrackingOptions {
        self.dispatch.transfer().options()
    }
}

impl TransformationProvider<Element> for RegisterTrackingTransformationProvider {
    fn transform(&self, instruction: &ReilInstruction, current: &Element, incoming: &Element) -> Transformation<Element> {
        let mut transformation = match &self.seed {
            Some((address, seed)) if *address == instruction.address => {
                let mut seeded = incoming.clone();
                seeded.union_with(seed);
                self.dispatch.transform(instruction, current, &seeded)
            }
            _ => self.dispatch.transform(instruction, current, incoming),
        };
        transformation.primary.retain_pending_of(current);
        transformation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reilflow_core::parse_instruction;
    use crate::mono::lattice::LatticeElement;

    fn set(registers: &[&str]) -> BTreeSet<String> {
        registers.iter().map(|r| r.to_string()).collect()
    }

    fn provider(direction: AnalysisDirection) -> RegisterTrackingTransformationProvider {
        RegisterTrackingTransformationProvider::new(RegisterTrackingOptions::new(direction))
    }

    /// Applies one instruction and publishes the step.
    fn apply(provider: &RegisterTrackingTransformationProvider, line: &str, tainted: &[&str]) -> Element {
        let instruction = parse_instruction(line).unwrap();
        let input = RegisterSetLatticeElement::with_tainted(tainted.iter().copied());
        let mut output = provider
            .transform(&instruction, &Element::new(), &input)
            .primary;
        output.on_instruction_exit();
        output
    }

    // --- Ordinary Transfer Tests ---

    #[test]
    fn test_backward_add() {
        let out = apply(
            &provider(AnalysisDirection::Up),
            "100: add [DWORD ebx, DWORD eax, DWORD ecx]",
            &["ecx"],
        );
        assert_eq!(out.tainted_registers(), &set(&["eax", "ebx"]));
        assert_eq!(out.newly_tainted_registers(), &set(&["eax", "ebx"]));
        assert_eq!(out.untainted_registers(), &set(&["ecx"]));
        assert_eq!(out.read_registers(), &set(&["ecx"]));
    }

    #[test]
    fn test_backward_untainted_destination_is_ignored() {
        let out = apply(
            &provider(AnalysisDirection::Up),
            "100: add [DWORD ebx, DWORD eax, DWORD ecx]",
            &["edx"],
        );
        assert_eq!(out.tainted_registers(), &set(&["edx"]));
        assert!(out.newly_tainted_registers().is_empty());
    }

    #[test]
    fn test_backward_literal_source() {
        let out = apply(
            &provider(AnalysisDirection::Up),
            "100: str [DWORD 5, EMPTY , DWORD ecx]",
            &["ecx"],
        );
        assert!(out.tainted_registers().is_empty());
        assert_eq!(out.untainted_registers(), &set(&["ecx"]));
        assert!(out.read_registers().is_empty());
    }

    #[test]
    fn test_forward_add() {
        let out = apply(
            &provider(AnalysisDirection::Down),
            "100: add [DWORD ebx, DWORD eax, DWORD ecx]",
            &["eax"],
        );
        assert_eq!(out.tainted_registers(), &set(&["eax", "ecx"]));
        assert_eq!(out.newly_tainted_registers(), &set(&["ecx"]));
        assert_eq!(out.read_registers(), &set(&["eax"]));
    }

    #[test]
    fn test_forward_clean_sources_untaint() {
        let out = apply(
            &provider(AnalysisDirection::Down),
            "100: add [DWORD ebx, DWORD 4, DWORD ecx]",
            &["ecx"],
        );
        assert!(out.tainted_registers().is_empty());
        assert_eq!(out.untainted_registers(), &set(&["ecx"]));
    }

    #[test]
    fn test_unclassified_mnemonic_uses_ternary_semantics() {
        let out = apply(
            &provider(AnalysisDirection::Down),
            "100: rol [DWORD eax, DWORD 3, DWORD ecx]",
            &["eax"],
        );
        assert_eq!(out.tainted_registers(), &set(&["eax", "ecx"]));
    }

    // --- Memory Tests ---

    #[test]
    fn test_ldm_untaints_destination() {
        for direction in [AnalysisDirection::Up, AnalysisDirection::Down] {
            let out = apply(&provider(direction), "100: ldm [DWORD t1, EMPTY , DWORD eax]", &["eax", "t1"]);
            assert_eq!(out.untainted_registers(), &set(&["eax"]));
            assert!(!out.is_tainted("eax"));
        }
    }

    #[test]
    fn test_stm_reads_tainted_source() {
        let out = apply(
            &provider(AnalysisDirection::Down),
            "100: stm [DWORD eax, EMPTY , DWORD esp]",
            &["eax"],
        );
        assert_eq!(out.read_registers(), &set(&["eax"]));
        assert_eq!(out.tainted_registers(), &set(&["eax"]));
        assert!(out.newly_tainted_registers().is_empty());
    }

    // --- Other Opcode Tests ---

    #[test]
    fn test_undef_and_unknown() {
        let up = provider(AnalysisDirection::Up);
        let out = apply(&up, "100: undef [EMPTY , EMPTY , BYTE CF]", &["CF", "eax"]);
        assert_eq!(out.tainted_registers(), &set(&["eax"]));

        let out = apply(&up, "100: unkn [EMPTY , EMPTY , EMPTY ]", &["CF", "eax"]);
        assert_eq!(out.tainted_registers(), &set(&["CF", "eax"]));

        let out = apply(&up, "100: nop [EMPTY , EMPTY , EMPTY ]", &["eax"]);
        assert_eq!(out.tainted_registers(), &set(&["eax"]));
        assert!(out.untainted_registers().is_empty());
    }

    #[test]
    fn test_jcc_condition_variables() {
        let options = RegisterTrackingOptions::new(AnalysisDirection::Up).with_track_only_condition_variables(true);
        let provider = RegisterTrackingTransformationProvider::new(options);
        let out = apply(&provider, "100: jcc [BYTE ZF, EMPTY , DWORD 4096]", &["ZF"]);
        assert_eq!(out.read_registers(), &set(&["ZF"]));
        assert_eq!(out.tainted_registers(), &set(&["ZF"]));
        assert!(out.newly_tainted_registers().is_empty());

        let plain = apply(
            &RegisterTrackingTransformationProvider::new(RegisterTrackingOptions::new(AnalysisDirection::Up)),
            "100: jcc [BYTE ZF, EMPTY , DWORD 4096]",
            &["ZF"],
        );
        assert!(plain.read_registers().is_empty());
    }

    #[test]
    fn test_seed_joins_incoming() {
        let provider = provider(AnalysisDirection::Down).with_seed(0x100, RegisterSetLatticeElement::seeded("eax"));
        let add = parse_instruction("100: add [DWORD eax, DWORD 1, DWORD ebx]").unwrap();
        let other = parse_instruction("200: add [DWORD eax, DWORD 1, DWORD ebx]").unwrap();
        let bottom = Element::new();

        let seeded = provider.transform(&add, &bottom, &bottom).primary;
        assert_eq!(seeded.tainted_registers(), &set(&["eax", "ebx"]));

        let unseeded = provider.transform(&other, &bottom, &bottom).primary;
        assert!(unseeded.tainted_registers().is_empty());
    }
}
