//! Monotone dataflow framework.
//!
//! This module provides:
//! - An instruction-level graph built from REIL block graphs
//! - Up and down graph walkers
//! - Lattice and transfer-function abstractions
//! - Per-opcode dispatch with opcode-family defaults
//! - A worklist fixpoint solver with an optional observer
//!
//! Analyses plug in a [`Lattice`] and a [`TransformationProvider`]; the
//! [`GraphWalker`] alone decides whether they run forward or backward.

pub mod error;
pub mod instruction_graph;
pub mod lattice;
pub mod solver;
pub mod state_vector;
pub mod transform;
pub mod walker;

pub use error::{MonoError, MonoResult};
pub use instruction_graph::{EdgeId, InstructionGraph, InstructionGraphEdge, InstructionGraphNode, NodeId};
pub use lattice::{InfluencingState, Lattice, LatticeElement};
pub use solver::{MonoSolverResult, MonotoneSolver, SolverObserver, StatePosition};
pub use state_vector::StateVector;
pub use transform::{
    DispatchTable, InstructionTransfer, PerInstructionProvider, TransferFn, Transformation,
    TransformationProvider,
};
pub use walker::{AnalysisDirection, GraphWalker, Influence};
