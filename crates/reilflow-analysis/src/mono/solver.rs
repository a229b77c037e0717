//! Monotone fixpoint solver.
//!
//! The solver keeps one live [`StateVector`] and a set of dirty nodes,
//! initially every node. Each sweep evaluates the dirty nodes against the
//! state left by the previous sweep:
//!
//! 1. combine the states of the node's influencing nodes,
//! 2. run the transfer function on the node's instruction,
//! 3. fail if the result is strictly below the node's previous state,
//! 4. mark the influenced nodes dirty if the state changed.
//!
//! The sweep's results replace the corresponding live entries in one step.
//! Iteration stops once a sweep changes nothing. A node counts as changed
//! when its element differs from the previous one by `PartialEq`, so every
//! part of an element that takes part in equality has to settle. Termination
//! relies on that and on the lattice having no infinite ascending chains; no
//! iteration cap is applied.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use super::error::{MonoError, MonoResult};
use super::instruction_graph::{InstructionGraph, NodeId};
use super::lattice::{InfluencingState, Lattice, LatticeElement};
use super::state_vector::StateVector;
use super::transform::TransformationProvider;
use super::walker::GraphWalker;

/// Observation hooks, called synchronously while solving.
pub trait SolverObserver<E> {
    /// Called after a node has been evaluated.
    fn on_node_updated(&mut self, _node: NodeId, _influences: &[InfluencingState<'_, E>], _transformed: &E) {}

    /// Called after each sweep with the updated live state.
    fn on_sweep_finished(&mut self, _state: &StateVector<E>) {}
}

/// Outcome of evaluating one node.
struct Evaluation<E> {
    node: NodeId,
    transformed: E,
    changed: bool,
}

/// Fixpoint engine over an [`InstructionGraph`].
pub struct MonotoneSolver<'s, 'g, L: Lattice, P> {
    graph: &'s InstructionGraph<'g>,
    lattice: &'s L,
    provider: &'s P,
    walker: GraphWalker,
    state: StateVector<L::Element>,
}

impl<'s, 'g, L, P> MonotoneSolver<'s, 'g, L, P>
where
    L: Lattice,
    P: TransformationProvider<L::Element>,
{
    /// Creates a solver.
    ///
    /// The initial state vector must hold exactly one element per graph node.
    pub fn new(
        graph: &'s InstructionGraph<'g>,
        lattice: &'s L,
        initial_state: StateVector<L::Element>,
        provider: &'s P,
        walker: GraphWalker,
    ) -> MonoResult<Self> {
        if initial_state.len() != graph.num_nodes() {
            return Err(MonoError::StateVectorSizeMismatch {
                states: initial_state.len(),
                nodes: graph.num_nodes(),
            });
        }
        if let Some(missing) = graph.node_ids().find(|&id| !initial_state.contains(id)) {
            return Err(MonoError::MissingState(missing));
        }

        Ok(Self {
            graph,
            lattice,
            provider,
            walker,
            state: initial_state,
        })
    }

    /// Iterates to a fixpoint.
    pub fn solve(self) -> MonoResult<MonoSolverResult<L::Element>> {
        self.run(None)
    }

    /// Iterates to a fixpoint, reporting progress to an observer.
    pub fn solve_with_observer(
        self,
        observer: &mut dyn SolverObserver<L::Element>,
    ) -> MonoResult<MonoSolverResult<L::Element>> {
        self.run(Some(observer))
    }

    fn run(
        mut self,
        mut observer: Option<&mut dyn SolverObserver<L::Element>>,
    ) -> MonoResult<MonoSolverResult<L::Element>> {
        debug!(
            nodes = self.graph.num_nodes(),
            walker = ?self.walker,
            "starting monotone solver"
        );

        let mut dirty: BTreeSet<NodeId> = self.graph.node_ids().collect();
        let mut sweeps = 0usize;

        while !dirty.is_empty() {
            sweeps += 1;
            trace!(sweep = sweeps, dirty = dirty.len(), "sweep");

            let mut evaluations = Vec::with_capacity(dirty.len());
            for &node in &dirty {
                evaluations.push(self.evaluate(node, observer.as_deref_mut())?);
            }

            dirty = self.apply(evaluations)?;
            if let Some(obs) = observer.as_deref_mut() {
                obs.on_sweep_finished(&self.state);
            }
        }

        debug!(sweeps, "monotone solver reached a fixpoint");
        Ok(MonoSolverResult {
            state: self.state,
            sweeps,
        })
    }

    /// Evaluates one node against the live state.
    fn evaluate(
        &self,
        node: NodeId,
        observer: Option<&mut (dyn SolverObserver<L::Element> + '_)>,
    ) -> MonoResult<Evaluation<L::Element>> {
        let influences = self.walker.influencing(self.graph, node)?;
        let mut states = Vec::with_capacity(influences.len());
        for influence in &influences {
            states.push(InfluencingState {
                node: influence.node,
                edge: self.graph.edge(influence.edge)?,
                element: self
                    .state
                    .get(influence.node)
                    .ok_or(MonoError::MissingState(influence.node))?,
            });
        }

        let combined = self.lattice.combine(&states);
        let instruction = self.graph.instruction(node)?;
        let current = self.state.get(node).ok_or(MonoError::MissingState(node))?;
        let transformed = self
            .provider
            .transform(instruction, current, &combined)
            .primary;

        if transformed.less_than(current) {
            return Err(MonoError::NonMonotoneTransformation {
                node,
                address: instruction.address,
            });
        }

        if let Some(obs) = observer {
            obs.on_node_updated(node, &states, &transformed);
        }

        let changed = transformed != *current;
        Ok(Evaluation {
            node,
            transformed,
            changed,
        })
    }

    /// Writes a sweep's results into the live state and returns the next
    /// dirty set.
    fn apply(&mut self, evaluations: Vec<Evaluation<L::Element>>) -> MonoResult<BTreeSet<NodeId>> {
        let mut next_dirty = BTreeSet::new();
        let mut new_state = StateVector::with_capacity(evaluations.len());

        for evaluation in evaluations {
            if evaluation.changed {
                trace!(node = %evaluation.node, "state changed");
                for influenced in self.walker.influenced(self.graph, evaluation.node)? {
                    next_dirty.insert(influenced.node);
                }
            }
            new_state.set(evaluation.node, evaluation.transformed);
        }

        self.state.merge(new_state);
        Ok(next_dirty)
    }
}

#[cfg(feature = "parallel")]
impl<'s, 'g, L, P> MonotoneSolver<'s, 'g, L, P>
where
    L: Lattice + Sync,
    L::Element: Send + Sync,
    P: TransformationProvider<L::Element> + Sync,
{
    /// Iterates to a fixpoint, evaluating the nodes of each sweep in parallel.
    ///
    /// Produces the same result as [`MonotoneSolver::solve`].
    pub fn solve_parallel(mut self) -> MonoResult<MonoSolverResult<L::Element>> {
        use rayon::prelude::*;

        debug!(nodes = self.graph.num_nodes(), "starting parallel monotone solver");

        let mut dirty: BTreeSet<NodeId> = self.graph.node_ids().collect();
        let mut sweeps = 0usize;

        while !dirty.is_empty() {
            sweeps += 1;
            let nodes: Vec<NodeId> = dirty.iter().copied().collect();
            let evaluations = nodes
                .par_iter()
                .map(|&node| self.evaluate(node, None))
                .collect::<MonoResult<Vec<_>>>()?;
            dirty = self.apply(evaluations)?;
        }

        debug!(sweeps, "parallel monotone solver reached a fixpoint");
        Ok(MonoSolverResult {
            state: self.state,
            sweeps,
        })
    }
}

/// Where in a native instruction the address mapping samples states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePosition {
    /// The state flowing into the instruction, in walk direction.
    Incoming,
    /// The state leaving the instruction, in walk direction.
    Outgoing,
}

/// Final state of a solver run.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoSolverResult<E> {
    state: StateVector<E>,
    sweeps: usize,
}

impl<E: LatticeElement> MonoSolverResult<E> {
    /// The final state vector.
    pub fn state(&self) -> &StateVector<E> {
        &self.state
    }

    pub fn into_state(self) -> StateVector<E> {
        self.state
    }

    /// The final element of a node.
    pub fn element(&self, node: NodeId) -> Option<&E> {
        self.state.get(node)
    }

    /// Number of sweeps until the fixpoint.
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// Final elements keyed by REIL address.
    pub fn states_by_reil_address(&self, graph: &InstructionGraph<'_>) -> BTreeMap<u64, E> {
        self.state
            .iter()
            .filter_map(|(node, element)| {
                graph
                    .instruction(node)
                    .ok()
                    .map(|inst| (inst.address, element.clone()))
            })
            .collect()
    }

    /// Folds the node states of every native instruction into one element.
    ///
    /// For [`StatePosition::Outgoing`] the states of the nodes through which
    /// the walk leaves the instruction are joined and passed through
    /// [`LatticeElement::on_instruction_exit`]. For
    /// [`StatePosition::Incoming`] the states entering the instruction over
    /// instruction-exit edges are combined; an instruction without such
    /// edges gets the bottom element.
    pub fn generate_address_to_state_mapping<L>(
        &self,
        graph: &InstructionGraph<'_>,
        lattice: &L,
        walker: GraphWalker,
        position: StatePosition,
    ) -> MonoResult<BTreeMap<u64, E>>
    where
        L: Lattice<Element = E>,
    {
        let mut mapping = BTreeMap::new();
        for native in graph.native_addresses() {
            let element = match position {
                StatePosition::Outgoing => self.outgoing_state(graph, lattice, walker, native)?,
                StatePosition::Incoming => self.incoming_state(graph, lattice, walker, native)?,
            };
            mapping.insert(native, element);
        }
        Ok(mapping)
    }

    fn outgoing_state<L: Lattice<Element = E>>(
        &self,
        graph: &InstructionGraph<'_>,
        lattice: &L,
        walker: GraphWalker,
        native: u64,
    ) -> MonoResult<E> {
        let mut exits = Vec::new();
        for node in graph.nodes_for_native(native) {
            let influenced = walker.influenced(graph, node)?;
            let mut leaves = influenced.is_empty();
            for influence in &influenced {
                leaves |= graph.edge(influence.edge)?.is_instruction_exit();
            }
            if leaves {
                exits.push(self.state.get(node).ok_or(MonoError::MissingState(node))?);
            }
        }
        let mut element = lattice.join(&exits);
        element.on_instruction_exit();
        Ok(element)
    }

    fn incoming_state<L: Lattice<Element = E>>(
        &self,
        graph: &InstructionGraph<'_>,
        lattice: &L,
        walker: GraphWalker,
        native: u64,
    ) -> MonoResult<E> {
        let mut states = Vec::new();
        for node in graph.nodes_for_native(native) {
            for influence in walker.influencing(graph, node)? {
                let edge = graph.edge(influence.edge)?;
                if edge.is_instruction_exit() {
                    states.push(InfluencingState {
                        node: influence.node,
                        edge,
                        element: self
                            .state
                            .get(influence.node)
                            .ok_or(MonoError::MissingState(influence.node))?,
                    });
                }
            }
        }
        Ok(lattice.combine(&states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mono::Transformation;
    use reilflow_core::{parse_listing, EdgeType, ReilGraph, ReilInstruction};

    /// Bit-set lattice: union join, subset order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct Bits(u32);

    impl LatticeElement for Bits {
        fn less_than(&self, other: &Self) -> bool {
            self.0 != other.0 && self.0 & other.0 == self.0
        }
    }

    struct Union;

    impl Lattice for Union {
        type Element = Bits;

        fn join(&self, elements: &[&Bits]) -> Bits {
            Bits(elements.iter().fold(0, |acc, e| acc | e.0))
        }
    }

    /// Each instruction sets the bit of its native address.
    struct SetOwnBit;

    impl TransformationProvider<Bits> for SetOwnBit {
        fn transform(&self, inst: &ReilInstruction, _current: &Bits, incoming: &Bits) -> Transformation<Bits> {
            Transformation::new(Bits(incoming.0 | 1 << inst.native_address()))
        }
    }

    /// Returns an element strictly below the node's current one.
    struct Shrinking;

    impl TransformationProvider<Bits> for Shrinking {
        fn transform(&self, _: &ReilInstruction, current: &Bits, _: &Bits) -> Transformation<Bits> {
            Transformation::new(Bits(current.0 & 0b100))
        }
    }

    #[derive(Default)]
    struct Recording {
        updates: usize,
        sweeps: usize,
    }

    impl SolverObserver<Bits> for Recording {
        fn on_node_updated(&mut self, _: NodeId, _: &[InfluencingState<'_, Bits>], _: &Bits) {
            self.updates += 1;
        }

        fn on_sweep_finished(&mut self, _: &StateVector<Bits>) {
            self.sweeps += 1;
        }
    }

    fn looping_graph() -> ReilGraph {
        parse_listing(
            "
            100: nop [EMPTY , EMPTY , EMPTY ]

            200: nop [EMPTY , EMPTY , EMPTY ]

            300: nop [EMPTY , EMPTY , EMPTY ]
            100 [JUMP_UNCONDITIONAL]-> 200
            200 [JUMP_UNCONDITIONAL]-> 300
            300 [JUMP_UNCONDITIONAL_LOOP]-> 200
            ",
        )
        .unwrap()
    }

    fn bottom(graph: &InstructionGraph<'_>) -> StateVector<Bits> {
        StateVector::from_fn(graph, |_| Bits::default())
    }

    // --- Precondition Tests ---

    #[test]
    fn test_rejects_size_mismatch() {
        let reil = looping_graph();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let mut state = StateVector::new();
        state.set(NodeId(0), Bits(0));
        let err = MonotoneSolver::new(&graph, &Union, state, &SetOwnBit, GraphWalker::Down)
            .err()
            .unwrap();
        assert_eq!(err, MonoError::StateVectorSizeMismatch { states: 1, nodes: 3 });
    }

    #[test]
    fn test_rejects_missing_state() {
        let reil = looping_graph();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let state: StateVector<Bits> = [(NodeId(0), Bits(0)), (NodeId(1), Bits(0)), (NodeId(7), Bits(0))]
            .into_iter()
            .collect();
        let err = MonotoneSolver::new(&graph, &Union, state, &SetOwnBit, GraphWalker::Down)
            .err()
            .unwrap();
        assert_eq!(err, MonoError::MissingState(NodeId(2)));
    }

    // --- Fixpoint Tests ---

    #[test]
    fn test_forward_fixpoint_with_loop() {
        let reil = looping_graph();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let result = MonotoneSolver::new(&graph, &Union, bottom(&graph), &SetOwnBit, GraphWalker::Down)
            .unwrap()
            .solve()
            .unwrap();

        let at = |address| *result.element(graph.node_at(address).unwrap()).unwrap();
        assert_eq!(at(0x100), Bits(0b0010));
        assert_eq!(at(0x200), Bits(0b1110));
        assert_eq!(at(0x300), Bits(0b1110));
    }

    #[test]
    fn test_backward_fixpoint() {
        let reil = looping_graph();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let result = MonotoneSolver::new(&graph, &Union, bottom(&graph), &SetOwnBit, GraphWalker::Up)
            .unwrap()
            .solve()
            .unwrap();

        let at = |address| *result.element(graph.node_at(address).unwrap()).unwrap();
        assert_eq!(at(0x300), Bits(0b1100));
        assert_eq!(at(0x200), Bits(0b1100));
        assert_eq!(at(0x100), Bits(0b1110));
    }

    #[test]
    fn test_non_monotone_transformation_aborts() {
        let reil = looping_graph();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let state = StateVector::from_fn(&graph, |_| Bits(0b110));
        let err = MonotoneSolver::new(&graph, &Union, state, &Shrinking, GraphWalker::Down)
            .unwrap()
            .solve()
            .unwrap_err();
        assert!(matches!(err, MonoError::NonMonotoneTransformation { .. }));
    }

    #[test]
    fn test_solving_twice_is_identical() {
        let reil = looping_graph();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let run = || {
            MonotoneSolver::new(&graph, &Union, bottom(&graph), &SetOwnBit, GraphWalker::Down)
                .unwrap()
                .solve()
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_observer_sees_every_update() {
        let reil = looping_graph();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let mut recording = Recording::default();
        let result = MonotoneSolver::new(&graph, &Union, bottom(&graph), &SetOwnBit, GraphWalker::Down)
            .unwrap()
            .solve_with_observer(&mut recording)
            .unwrap();
        assert_eq!(recording.sweeps, result.sweeps());
        assert!(recording.updates >= graph.num_nodes());
    }

    #[test]
    fn test_isolated_nodes_see_bottom() {
        let a = ReilInstruction::nop(0x100);
        let b = ReilInstruction::nop(0x300);
        let mut graph = InstructionGraph::new();
        let na = graph.add_node(&a);
        let nb = graph.add_node(&b);
        graph.add_edge(na, nb, EdgeType::JumpConditionalTrue).unwrap();
        let result = MonotoneSolver::new(&graph, &Union, bottom(&graph), &SetOwnBit, GraphWalker::Down)
            .unwrap()
            .solve()
            .unwrap();
        assert_eq!(result.element(na), Some(&Bits(0b0010)));
        assert_eq!(result.element(nb), Some(&Bits(0b1010)));
    }

    // --- Address Mapping Tests ---

    #[test]
    fn test_address_mapping() {
        let reil = parse_listing(
            "
            100: nop [EMPTY , EMPTY , EMPTY ]
            101: nop [EMPTY , EMPTY , EMPTY ]
            200: nop [EMPTY , EMPTY , EMPTY ]
            ",
        )
        .unwrap();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let result = MonotoneSolver::new(&graph, &Union, bottom(&graph), &SetOwnBit, GraphWalker::Down)
            .unwrap()
            .solve()
            .unwrap();

        let outgoing = result
            .generate_address_to_state_mapping(&graph, &Union, GraphWalker::Down, StatePosition::Outgoing)
            .unwrap();
        assert_eq!(outgoing.get(&1), Some(&Bits(0b010)));
        assert_eq!(outgoing.get(&2), Some(&Bits(0b110)));

        let incoming = result
            .generate_address_to_state_mapping(&graph, &Union, GraphWalker::Down, StatePosition::Incoming)
            .unwrap();
        assert_eq!(incoming.get(&1), Some(&Bits(0)));
        assert_eq!(incoming.get(&2), Some(&Bits(0b010)));

        assert_eq!(result.states_by_reil_address(&graph).len(), 3);
    }
}
