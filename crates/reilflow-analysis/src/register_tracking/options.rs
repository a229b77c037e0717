//! Register tracking configuration.

use std::collections::BTreeSet;

use crate::mono::AnalysisDirection;

/// Options of a register tracking run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegisterTrackingOptions {
    /// Untaint every tainted register at a call.
    pub clear_registers_on_calls: bool,
    /// Registers untainted at a call. When non-empty, only these are cleared.
    pub registers_to_clear_on_calls: BTreeSet<String>,
    /// At a conditional jump, only the condition register takes part.
    pub track_only_condition_variables: bool,
    /// Report the state entering each native instruction instead of the
    /// state leaving it.
    pub track_incoming: bool,
    /// Direction of the analysis.
    pub direction: AnalysisDirection,
}

impl RegisterTrackingOptions {
    /// Creates default options for a direction.
    pub fn new(direction: AnalysisDirection) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    pub fn with_clear_registers_on_calls(mut self, clear: bool) -> Self {
        self.clear_registers_on_calls = clear;
        self
    }

    pub fn with_registers_to_clear_on_calls<I, S>(mut self, registers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registers_to_clear_on_calls = registers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_track_only_condition_variables(mut self, only: bool) -> Self {
        self.track_only_condition_variables = only;
        self
    }

    pub fn with_track_incoming(mut self, incoming: bool) -> Self {
        self.track_incoming = incoming;
        self
    }

    pub fn with_direction(mut self, direction: AnalysisDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Returns true if calls untaint registers at all.
    pub fn clears_on_calls(&self) -> bool {
        self.clear_registers_on_calls || !self.registers_to_clear_on_calls.is_empty()
    }

    /// Registers a call untaints, given the tainted registers before it.
    pub fn registers_cleared_by_call<'a>(&'a self, tainted: &'a BTreeSet<String>) -> Vec<&'a str> {
        if !self.registers_to_clear_on_calls.is_empty() {
            self.registers_to_clear_on_calls.iter().map(String::as_str).collect()
        } else if self.clear_registers_on_calls {
            tainted.iter().map(String::as_str).collect()
        } else {
            Vec::new()
        }
    }
}
