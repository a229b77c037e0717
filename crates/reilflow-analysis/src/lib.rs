//! # reilflow-analysis
//!
//! Dataflow analyses over REIL graphs.
//!
//! - [`mono`]: a generic monotone framework with direction-agnostic solving
//! - [`register_tracking`]: register taint tracking built on it
//! - [`operand_graph`]: def-use links between instruction operands
//!
//! ```
//! use reilflow_analysis::register_tracking::{RegisterTracker, RegisterTrackingOptions};
//! use reilflow_analysis::mono::AnalysisDirection;
//! use reilflow_core::parse_listing;
//!
//! let graph = parse_listing(
//!     "
//!     100: add [DWORD ebx, DWORD eax, DWORD ecx]
//!     200: str [DWORD ecx, EMPTY , DWORD edx]
//!     ",
//! )
//! .unwrap();
//! let options = RegisterTrackingOptions::new(AnalysisDirection::Down);
//! let result = RegisterTracker::track_graph(&graph, 1, "eax", &options).unwrap();
//! assert!(result.state_at(2).unwrap().is_tainted("edx"));
//! ```

pub mod mono;
pub mod operand_graph;
pub mod register_tracking;

pub use mono::{
    AnalysisDirection, GraphWalker, InstructionGraph, Lattice, LatticeElement, MonoError, MonoResult,
    MonoSolverResult, MonotoneSolver, StateVector, TransformationProvider,
};
pub use operand_graph::{OperandGraph, OperandGraphEdge, OperandGraphNode};
pub use register_tracking::{
    RegisterSetLattice, RegisterSetLatticeElement, RegisterTracker, RegisterTrackingOptions,
    RegisterTrackingResult, TrackingError,
};
