//! Register taint tracking.
//!
//! Determines which registers influence (Up) or are influenced by (Down) a
//! register at a start instruction. Built on the monotone framework in
//! [`crate::mono`]: a set lattice over register names, per-opcode transfer
//! functions, and a tracker that seeds, solves and reports per native
//! instruction.

pub mod element;
pub mod options;
pub mod provider;
pub mod tracker;

pub use element::{RegisterSetLattice, RegisterSetLatticeElement};
pub use options::RegisterTrackingOptions;
pub use provider::{RegisterTrackingTransfer, RegisterTrackingTransformationProvider};
pub use tracker::{OperandSite, RegisterTracker, RegisterTrackingResult, TrackingError};
