//! Register tracking entry point.

use std::collections::BTreeMap;

use reilflow_core::{ReilFunction, ReilGraph};
use thiserror::Error;
use tracing::debug;

use super::element::{RegisterSetLattice, RegisterSetLatticeElement};
use super::options::RegisterTrackingOptions;
use super::provider::RegisterTrackingTransformationProvider;
use crate::mono::{
    AnalysisDirection, GraphWalker, InstructionGraph, MonoError, MonotoneSolver, StatePosition, StateVector,
};
use crate::operand_graph::OperandGraph;

/// Errors of a tracking run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    /// No REIL instruction was translated from the start address.
    #[error("no instruction at native address {0:#x}")]
    StartInstructionNotFound(u64),

    #[error("register name is empty")]
    EmptyRegister,

    #[error(transparent)]
    Solver(#[from] MonoError),
}

/// An operand that defines a register.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperandSite {
    /// REIL address of the defining instruction.
    pub address: u64,
    pub operand_index: usize,
    pub register: String,
}

/// Outcome of a tracking run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterTrackingResult {
    start_address: u64,
    start_reil_address: u64,
    register: String,
    direction: AnalysisDirection,
    report: BTreeMap<u64, RegisterSetLatticeElement>,
    reil_states: BTreeMap<u64, RegisterSetLatticeElement>,
    seed_definitions: Vec<OperandSite>,
    sweeps: usize,
}

impl RegisterTrackingResult {
    /// Native address the run started from.
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// REIL address the seed was applied at.
    pub fn start_reil_address(&self) -> u64 {
        self.start_reil_address
    }

    pub fn register(&self) -> &str {
        &self.register
    }

    pub fn direction(&self) -> AnalysisDirection {
        self.direction
    }

    /// Per native address state.
    pub fn report(&self) -> &BTreeMap<u64, RegisterSetLatticeElement> {
        &self.report
    }

    /// State of one native instruction.
    pub fn state_at(&self, native_address: u64) -> Option<&RegisterSetLatticeElement> {
        self.report.get(&native_address)
    }

    /// Raw solver states keyed by REIL address.
    pub fn states_by_reil_address(&self) -> &BTreeMap<u64, RegisterSetLatticeElement> {
        &self.reil_states
    }

    /// Definitions of the tracked register that reach the start instruction.
    pub fn seed_definitions(&self) -> &[OperandSite] {
        &self.seed_definitions
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps
    }
}

/// Tracks how a register flows through a function.
pub struct RegisterTracker;

impl RegisterTracker {
    /// Tracks `register` starting at the native instruction `start_address`.
    pub fn track(
        function: &ReilFunction,
        start_address: u64,
        register: &str,
        options: &RegisterTrackingOptions,
    ) -> Result<RegisterTrackingResult, TrackingError> {
        debug!(function = %function.name, "tracking register in function");
        Self::track_graph(&function.graph, start_address, register, options)
    }

    /// Tracks `register` over a bare REIL graph.
    pub fn track_graph(
        graph: &ReilGraph,
        start_address: u64,
        register: &str,
        options: &RegisterTrackingOptions,
    ) -> Result<RegisterTrackingResult, TrackingError> {
        if register.is_empty() {
            return Err(TrackingError::EmptyRegister);
        }

        let instruction_graph = InstructionGraph::from_reil_graph(graph);
        let candidates = instruction_graph.nodes_for_native(start_address);
        let start_node = match options.direction {
            AnalysisDirection::Down => candidates.first(),
            AnalysisDirection::Up => candidates.last(),
        }
        .copied()
        .ok_or(TrackingError::StartInstructionNotFound(start_address))?;
        let start_reil_address = instruction_graph.instruction(start_node)?.address;

        debug!(
            start_address,
            start_reil_address,
            register,
            direction = ?options.direction,
            "starting register tracking"
        );

        let walker = GraphWalker::for_direction(options.direction);
        let lattice = RegisterSetLattice;
        let provider = RegisterTrackingTransformationProvider::new(options.clone())
            .with_seed(start_reil_address, RegisterSetLatticeElement::seeded(register));
        let initial_state = StateVector::from_fn(&instruction_graph, |_| RegisterSetLatticeElement::new());

        let result = MonotoneSolver::new(&instruction_graph, &lattice, initial_state, &provider, walker)?.solve()?;

        let position = if options.track_incoming {
            StatePosition::Incoming
        } else {
            StatePosition::Outgoing
        };
        let report = result.generate_address_to_state_mapping(&instruction_graph, &lattice, walker, position)?;

        let operands = OperandGraph::build(graph);
        let seed_definitions = operands
            .reaching_definitions(start_reil_address, register)?
            .into_iter()
            .map(|node| OperandSite {
                address: node.address(),
                operand_index: node.index(),
                register: node.value().to_string(),
            })
            .collect();

        debug!(
            sweeps = result.sweeps(),
            instructions = report.len(),
            "register tracking finished"
        );

        Ok(RegisterTrackingResult {
            start_address,
            start_reil_address,
            register: register.to_string(),
            direction: options.direction,
            reil_states: result.states_by_reil_address(&instruction_graph),
            sweeps: result.sweeps(),
            report,
            seed_definitions,
        })
    }
}
