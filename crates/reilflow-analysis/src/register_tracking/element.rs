//! Register taint lattice.

use std::collections::BTreeSet;
use std::fmt;

use reilflow_core::is_temporary_register;

use crate::mono::{InfluencingState, Lattice, LatticeElement};

/// Per-step register changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct RegisterChanges {
    newly_tainted: BTreeSet<String>,
    untainted: BTreeSet<String>,
    read: BTreeSet<String>,
    updated: BTreeSet<String>,
}

impl RegisterChanges {
    fn union_with(&mut self, other: &RegisterChanges) {
        self.newly_tainted.extend(other.newly_tainted.iter().cloned());
        self.untainted.extend(other.untainted.iter().cloned());
        self.read.extend(other.read.iter().cloned());
        self.updated.extend(other.updated.iter().cloned());
    }

    fn drop_temporaries(&mut self) {
        for set in [
            &mut self.newly_tainted,
            &mut self.untainted,
            &mut self.read,
            &mut self.updated,
        ] {
            set.retain(|r| !is_temporary_register(r));
        }
    }
}

/// Lattice element of register tracking.
///
/// `tainted` is the current belief. The changes made while evaluating the
/// REIL instructions of one native instruction accumulate in a pending
/// record; [`LatticeElement::on_instruction_exit`] publishes that record as
/// the observable newly-tainted, untainted, read and updated sets, drops
/// REIL temporaries, and starts a fresh pending record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterSetLatticeElement {
    tainted: BTreeSet<String>,
    pending: RegisterChanges,
    observed: RegisterChanges,
}

impl RegisterSetLatticeElement {
    /// Creates the bottom element.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an element with one register tainted and newly tainted.
    pub fn seeded(register: &str) -> Self {
        let mut element = Self::new();
        element.taint(register);
        element
    }

    /// Creates an element from a set of tainted registers.
    pub fn with_tainted<I, S>(registers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tainted: registers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Copy used as the starting point of a transfer function.
    ///
    /// Keeps the tainted set and the pending changes; observations made at
    /// an earlier instruction exit are not carried over.
    pub fn step(&self) -> Self {
        Self {
            tainted: self.tainted.clone(),
            pending: self.pending.clone(),
            observed: RegisterChanges::default(),
        }
    }

    pub fn is_tainted(&self, register: &str) -> bool {
        self.tainted.contains(register)
    }

    /// Returns true if any of the registers is tainted.
    pub fn is_any_tainted<'r>(&self, registers: impl IntoIterator<Item = &'r str>) -> bool {
        registers.into_iter().any(|r| self.is_tainted(r))
    }

    /// Taints a register.
    ///
    /// A register that is already tainted, or was untainted earlier in the
    /// same step, counts as updated; otherwise as newly tainted.
    pub fn taint(&mut self, register: &str) {
        if self.is_tainted(register) || self.pending.untainted.contains(register) {
            self.pending.updated.insert(register.to_string());
        } else {
            self.pending.newly_tainted.insert(register.to_string());
        }
        self.tainted.insert(register.to_string());
        self.pending.untainted.remove(register);
    }

    pub fn taint_all<'r>(&mut self, registers: impl IntoIterator<Item = &'r str>) {
        for register in registers {
            self.taint(register);
        }
    }

    /// Untaints a register. Registers that are not tainted are left alone.
    pub fn untaint(&mut self, register: &str) {
        if self.tainted.remove(register) {
            self.pending.untainted.insert(register.to_string());
        }
    }

    pub fn untaint_all<'r>(&mut self, registers: impl IntoIterator<Item = &'r str>) {
        for register in registers {
            self.untaint(register);
        }
    }

    /// Records that a tainted register was read.
    pub fn add_read(&mut self, register: &str) {
        self.pending.read.insert(register.to_string());
    }

    /// Adds every register of `other` to this element.
    pub fn union_with(&mut self, other: &RegisterSetLatticeElement) {
        self.tainted.extend(other.tainted.iter().cloned());
        self.pending.union_with(&other.pending);
        self.observed.union_with(&other.observed);
    }

    /// Keeps the pending changes of the node's previous state.
    ///
    /// Applies only while the tainted set is unchanged. Once a node's taint
    /// has settled its pending record can only grow, so changes circulating
    /// through a loop inside one native instruction reach a fixpoint.
    pub fn retain_pending_of(&mut self, previous: &RegisterSetLatticeElement) {
        if self.tainted == previous.tainted {
            self.pending.union_with(&previous.pending);
        }
    }

    /// Subset test over the tainted registers only.
    pub fn is_smaller_equal(&self, other: &RegisterSetLatticeElement) -> bool {
        self.tainted.is_subset(&other.tainted)
    }

    pub fn tainted_registers(&self) -> &BTreeSet<String> {
        &self.tainted
    }

    pub fn newly_tainted_registers(&self) -> &BTreeSet<String> {
        &self.observed.newly_tainted
    }

    pub fn untainted_registers(&self) -> &BTreeSet<String> {
        &self.observed.untainted
    }

    pub fn read_registers(&self) -> &BTreeSet<String> {
        &self.observed.read
    }

    pub fn updated_registers(&self) -> &BTreeSet<String> {
        &self.observed.updated
    }
}

impl LatticeElement for RegisterSetLatticeElement {
    fn less_than(&self, other: &Self) -> bool {
        self.tainted.len() < other.tainted.len() && self.tainted.is_subset(&other.tainted)
    }

    fn on_instruction_exit(&mut self) {
        self.tainted.retain(|r| !is_temporary_register(r));
        self.pending.drop_temporaries();
        self.observed = std::mem::take(&mut self.pending);
    }
}

impl fmt::Display for RegisterSetLatticeElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(", ");
        writeln!(f, "Tainted registers: [{}]", list(&self.tainted))?;
        writeln!(f, "Newly tainted registers: [{}]", list(&self.observed.newly_tainted))?;
        writeln!(f, "Untainted registers: [{}]", list(&self.observed.untainted))?;
        writeln!(f, "Read registers: [{}]", list(&self.observed.read))?;
        write!(f, "Updated registers: [{}]", list(&self.observed.updated))
    }
}

/// Join of [`RegisterSetLatticeElement`]s.
///
/// States that reach a node over an instruction-exit edge are published
/// with [`LatticeElement::on_instruction_exit`] before being joined.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterSetLattice;

impl Lattice for RegisterSetLattice {
    type Element = RegisterSetLatticeElement;

    fn join(&self, elements: &[&RegisterSetLatticeElement]) -> RegisterSetLatticeElement {
        let mut joined = RegisterSetLatticeElement::new();
        for element in elements {
            joined.union_with(element);
        }
        joined
    }

    fn combine(&self, states: &[InfluencingState<'_, RegisterSetLatticeElement>]) -> RegisterSetLatticeElement {
        let mut joined = RegisterSetLatticeElement::new();
        for state in states {
            if state.edge.is_instruction_exit() {
                let mut exited = state.element.clone();
                exited.on_instruction_exit();
                joined.union_with(&exited);
            } else {
                joined.union_with(state.element);
            }
        }
        joined
    }
}
