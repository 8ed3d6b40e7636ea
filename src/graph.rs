use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::semantic::{ResolvedType, SemanticModel, SymbolId, SymbolKind};
use crate::syntax::{Location, SyntaxId};

/// Capacity of edges the max-flow solver must never cut.
pub const INFINITE_CAPACITY: u32 = u32::MAX;

/// Stable index of a node in the type system arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(pub(crate) u32);

/// Stable index of an edge in the type system arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EdgeId(pub(crate) u32);

/// Inference state of one nullability position.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NullType {
    /// Value-typed or non-applicable; never labelled by inference.
    Oblivious,
    Nullable,
    NonNull,
    /// Undecided; resolved by the label propagator.
    Infer,
}

/// One inferrable nullability position in the flow graph.
#[derive(Clone, Debug)]
pub struct NullabilityNode {
    pub null_type: NullType,
    /// Union-find back-pointer; `None` for class representatives.
    pub(crate) replaced_with: Option<NodeId>,
    pub(crate) incoming: SmallVec<[EdgeId; 2]>,
    pub(crate) outgoing: SmallVec<[EdgeId; 2]>,
    pub location: Option<Location>,
    pub name: String,
}

impl NullabilityNode {
    fn new(null_type: NullType, location: Option<Location>, name: String) -> Self {
        Self {
            null_type,
            replaced_with: None,
            incoming: SmallVec::new(),
            outgoing: SmallVec::new(),
            location,
            name,
        }
    }

    pub fn incoming_edges(&self) -> &[EdgeId] {
        &self.incoming
    }

    pub fn outgoing_edges(&self) -> &[EdgeId] {
        &self.outgoing
    }
}

/// Directed flow constraint: if the source can be null, the target must
/// tolerate null.
#[derive(Clone, Debug)]
pub struct NullabilityEdge {
    pub source: NodeId,
    pub target: NodeId,
    /// Original capacity; `INFINITE_CAPACITY` for uncuttable edges.
    pub capacity: u32,
    /// Flow assigned by the max-flow solver.
    pub flow: u32,
    /// The user asserted a non-null context here; nonzero flow is a warning.
    pub is_error: bool,
    pub label: String,
    pub location: Option<Location>,
}

impl NullabilityEdge {
    pub(crate) fn new(
        source: NodeId,
        target: NodeId,
        capacity: u32,
        label: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            capacity,
            flow: 0,
            is_error: false,
            label: label.into(),
            location: None,
        }
    }

    pub(crate) fn error(mut self) -> Self {
        self.is_error = true;
        self
    }

    pub(crate) fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Remaining capacity after the solver ran.
    pub fn residual(&self) -> u32 {
        if self.capacity == INFINITE_CAPACITY {
            INFINITE_CAPACITY
        } else {
            self.capacity - self.flow
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.residual() == 0
    }
}

/// A resolved type paired with the nullability node of each reference layer.
///
/// The node applies to the outermost layer; `args` mirror the host type's
/// generic arguments (or the array element).
#[derive(Clone, Debug)]
pub struct TypeWithNode {
    pub ty: ResolvedType,
    pub node: NodeId,
    pub args: Vec<TypeWithNode>,
}

impl TypeWithNode {
    pub fn oblivious(ty: ResolvedType) -> Self {
        Self {
            ty,
            node: OBLIVIOUS,
            args: Vec::new(),
        }
    }

    /// Replace type-parameter layers with the caller-supplied arguments.
    /// Layers without a mapping are returned unchanged.
    pub fn substitute(&self, subst: &BTreeMap<(String, usize), TypeWithNode>) -> TypeWithNode {
        if let ResolvedType::TypeParam { owner, index, .. } = &self.ty {
            if let Some(arg) = subst.get(&(owner.clone(), *index)) {
                return arg.clone();
            }
        }
        TypeWithNode {
            ty: self.ty.clone(),
            node: self.node,
            args: self.args.iter().map(|a| a.substitute(subst)).collect(),
        }
    }
}

/// The three nodes every type system starts with.
pub(crate) const OBLIVIOUS: NodeId = NodeId(0);
pub(crate) const NULLABLE_SINK: NodeId = NodeId(1);
pub(crate) const NON_NULL_SINK: NodeId = NodeId(2);
const RESERVED: u32 = 3;

/// Owns all nullability nodes and edges, the two sinks, the per-unit
/// syntax-to-node mappings and the symbol type memoisation.
#[derive(Debug)]
pub struct TypeSystem {
    nodes: Vec<NullabilityNode>,
    edges: Vec<NullabilityEdge>,
    input_positions: Vec<NodeId>,
    symbol_types: BTreeMap<SymbolId, TypeWithNode>,
    mappings: Vec<BTreeMap<SyntaxId, NodeId>>,
    explicit_nullable: Vec<Vec<NodeId>>,
}

impl TypeSystem {
    pub fn new(unit_count: usize) -> Self {
        let nodes = vec![
            NullabilityNode::new(NullType::Oblivious, None, "<oblivious>".to_string()),
            NullabilityNode::new(NullType::Nullable, None, "<nullable>".to_string()),
            NullabilityNode::new(NullType::NonNull, None, "<nonnull>".to_string()),
        ];
        Self {
            nodes,
            edges: Vec::new(),
            input_positions: Vec::new(),
            symbol_types: BTreeMap::new(),
            mappings: vec![BTreeMap::new(); unit_count],
            explicit_nullable: vec![Vec::new(); unit_count],
        }
    }

    pub fn oblivious_node(&self) -> NodeId {
        OBLIVIOUS
    }

    pub fn nullable_sink(&self) -> NodeId {
        NULLABLE_SINK
    }

    pub fn non_null_sink(&self) -> NodeId {
        NON_NULL_SINK
    }

    pub fn node(&self, id: NodeId) -> &NullabilityNode {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut NullabilityNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn edge(&self, id: EdgeId) -> &NullabilityEdge {
        &self.edges[id.0 as usize]
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> &mut NullabilityEdge {
        &mut self.edges[id.0 as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = (NodeId, &NullabilityNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index as u32), node))
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &NullabilityEdge> {
        self.edges.iter()
    }

    /// Parameter nodes and other caller-controlled positions, eligible for
    /// the nullable-biased tie-break.
    pub fn nodes_in_input_positions(&self) -> &[NodeId] {
        &self.input_positions
    }

    /// The node a type syntax was mapped to by the node builder.
    pub fn node_for_syntax(&self, unit: usize, syntax: SyntaxId) -> Option<NodeId> {
        self.mappings.get(unit)?.get(&syntax).copied()
    }

    pub fn syntax_mapping(&self, unit: usize) -> &BTreeMap<SyntaxId, NodeId> {
        &self.mappings[unit]
    }

    pub(crate) fn explicit_nullable(&self, unit: usize) -> &[NodeId] {
        &self.explicit_nullable[unit]
    }

    /// Memoised composite type of a declared symbol. Identical on every call
    /// for the same symbol, which is what stitches units together.
    pub fn symbol_type(&self, symbol: SymbolId) -> Option<&TypeWithNode> {
        self.symbol_types.get(&symbol)
    }

    /// Publish one unit's node-builder output. Local ids are rebased onto the
    /// global arena; called in unit order so ids are deterministic.
    pub fn merge_nodes(&mut self, built: Builder) {
        let offset = self.nodes.len() as u32;
        let rebase = |id: NodeId| {
            if id.0 < RESERVED {
                id
            } else {
                NodeId(id.0 - RESERVED + offset)
            }
        };
        let unit = built.unit;
        self.nodes.extend(built.nodes);
        self.mappings[unit] = built
            .mapping
            .into_iter()
            .map(|(syntax, node)| (syntax, rebase(node)))
            .collect();
        self.explicit_nullable[unit] = built.explicit_nullable.into_iter().map(rebase).collect();
        self.input_positions
            .extend(built.input_positions.into_iter().map(rebase));
        for (symbol, ty) in built.symbol_types {
            self.symbol_types.insert(symbol, rebase_type(ty, &rebase));
        }
    }

    /// Give every referenced symbol that no unit registered (builtin members,
    /// externals) a synthesized type. Runs after all units merged, so the
    /// store is immutable during edge building. Symbols nothing refers to get
    /// no nodes at all.
    pub fn synthesize_external_symbols(&mut self, model: &SemanticModel) {
        let referenced = model
            .symbol_of_syntax
            .values()
            .copied()
            .collect::<std::collections::BTreeSet<SymbolId>>();
        let missing = referenced
            .iter()
            .map(|&id| model.symbol(id))
            .filter(|info| info.kind != SymbolKind::Class)
            .filter(|info| !self.symbol_types.contains_key(&info.id))
            .map(|info| (info.id, info.declared_type.clone(), info.name.clone()))
            .collect::<Vec<_>>();
        for (symbol, ty, name) in missing {
            let twn = self.fresh_type(&ty, &name, model);
            self.symbol_types.insert(symbol, twn);
        }
    }

    fn fresh_type(&mut self, ty: &ResolvedType, name: &str, model: &SemanticModel) -> TypeWithNode {
        let node = if model.can_be_made_nullable(ty) {
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(NullabilityNode::new(
                NullType::Infer,
                None,
                format!("external {name}"),
            ));
            id
        } else {
            OBLIVIOUS
        };
        let args = ty
            .args()
            .iter()
            .map(|arg| self.fresh_type(arg, name, model))
            .collect();
        TypeWithNode {
            ty: ty.clone(),
            node,
            args,
        }
    }

    /// Publish one unit's edge-builder output.
    pub fn merge_edges(&mut self, pending: PendingEdges) {
        for edge in pending.edges {
            self.attach_edge(edge);
        }
        for (a, b) in pending.unifications {
            self.union(a, b);
        }
    }

    fn attach_edge(&mut self, edge: NullabilityEdge) {
        debug_assert!(edge.source != OBLIVIOUS && edge.target != OBLIVIOUS);
        let id = EdgeId(self.edges.len() as u32);
        self.nodes[edge.source.0 as usize].outgoing.push(id);
        self.nodes[edge.target.0 as usize].incoming.push(id);
        self.edges.push(edge);
    }

    fn union(&mut self, a: NodeId, b: NodeId) {
        let ra = self.representative(a);
        let rb = self.representative(b);
        if ra != rb {
            self.nodes[ra.0 as usize].replaced_with = Some(rb);
        }
    }

    /// Union-find representative; the chain is short and read-only after the
    /// builder passes, so no path compression.
    pub fn representative(&self, mut id: NodeId) -> NodeId {
        while let Some(next) = self.nodes[id.0 as usize].replaced_with {
            id = next;
        }
        id
    }

    /// Whether `to` is reachable from `from` along edges that can carry flow.
    /// Debug and test helper.
    pub fn path_exists(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = std::collections::VecDeque::new();
        seen[from.0 as usize] = true;
        queue.push_back(from);
        while let Some(node) = queue.pop_front() {
            if node == to {
                return true;
            }
            for &edge_id in &self.nodes[node.0 as usize].outgoing {
                let edge = &self.edges[edge_id.0 as usize];
                if edge.capacity == 0 {
                    continue;
                }
                if !seen[edge.target.0 as usize] {
                    seen[edge.target.0 as usize] = true;
                    queue.push_back(edge.target);
                }
            }
        }
        false
    }
}

fn rebase_type(ty: TypeWithNode, rebase: &impl Fn(NodeId) -> NodeId) -> TypeWithNode {
    TypeWithNode {
        ty: ty.ty,
        node: rebase(ty.node),
        args: ty
            .args
            .into_iter()
            .map(|arg| rebase_type(arg, rebase))
            .collect(),
    }
}

/// Unit-local accumulator for the node-builder pass. Nodes get provisional
/// ids that `TypeSystem::merge_nodes` rebases, keeping lock contention
/// proportional to the number of units rather than the number of nodes.
#[derive(Debug)]
pub struct Builder {
    unit: usize,
    nodes: Vec<NullabilityNode>,
    mapping: BTreeMap<SyntaxId, NodeId>,
    symbol_types: Vec<(SymbolId, TypeWithNode)>,
    input_positions: Vec<NodeId>,
    explicit_nullable: Vec<NodeId>,
}

impl Builder {
    pub fn new(unit: usize) -> Self {
        Self {
            unit,
            nodes: Vec::new(),
            mapping: BTreeMap::new(),
            symbol_types: Vec::new(),
            input_positions: Vec::new(),
            explicit_nullable: Vec::new(),
        }
    }

    pub fn oblivious(&self) -> NodeId {
        OBLIVIOUS
    }

    pub fn new_node(&mut self, location: Option<Location>, name: impl Into<String>) -> NodeId {
        let id = NodeId(RESERVED + self.nodes.len() as u32);
        self.nodes
            .push(NullabilityNode::new(NullType::Infer, location, name.into()));
        id
    }

    pub fn map_syntax(&mut self, syntax: SyntaxId, node: NodeId) {
        self.mapping.insert(syntax, node);
    }

    pub fn mapped(&self, syntax: SyntaxId) -> Option<NodeId> {
        self.mapping.get(&syntax).copied()
    }

    pub fn register_symbol(&mut self, symbol: SymbolId, ty: TypeWithNode) {
        self.symbol_types.push((symbol, ty));
    }

    pub fn mark_input_position(&mut self, node: NodeId) {
        self.input_positions.push(node);
    }

    /// Record a user-written `?`; the pre-labeling edge is emitted when this
    /// unit's edge pass runs.
    pub fn mark_explicit_nullable(&mut self, node: NodeId) {
        self.explicit_nullable.push(node);
    }
}

/// Unit-local accumulator for the edge-builder pass.
#[derive(Debug, Default)]
pub struct PendingEdges {
    edges: Vec<NullabilityEdge>,
    unifications: Vec<(NodeId, NodeId)>,
}

impl PendingEdges {
    /// Register an edge. Edges touching the oblivious node or looping onto a
    /// single node carry no information and are dropped.
    pub fn push(&mut self, edge: NullabilityEdge) {
        if edge.source == OBLIVIOUS || edge.target == OBLIVIOUS || edge.source == edge.target {
            return;
        }
        self.edges.push(edge);
    }

    /// Force two nodes to share a label: union-find merge plus two
    /// infinite-capacity edges the solver cannot separate.
    pub fn unify(&mut self, a: NodeId, b: NodeId, label: &str) {
        if a == OBLIVIOUS || b == OBLIVIOUS || a == b {
            return;
        }
        self.push(NullabilityEdge::new(a, b, INFINITE_CAPACITY, label));
        self.push(NullabilityEdge::new(b, a, INFINITE_CAPACITY, label));
        self.unifications.push((a, b));
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.unifications.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_rebases_unit_local_ids_after_the_reserved_range() {
        let mut ts = TypeSystem::new(2);
        let mut first = Builder::new(0);
        let a = first.new_node(None, "a");
        first.map_syntax(SyntaxId(7), a);
        ts.merge_nodes(first);

        let mut second = Builder::new(1);
        let b = second.new_node(None, "b");
        assert_eq!(b, NodeId(RESERVED));
        second.map_syntax(SyntaxId(9), b);
        second.mark_input_position(b);
        ts.merge_nodes(second);

        assert_eq!(ts.node_for_syntax(0, SyntaxId(7)), Some(NodeId(3)));
        assert_eq!(ts.node_for_syntax(1, SyntaxId(9)), Some(NodeId(4)));
        assert_eq!(ts.nodes_in_input_positions(), &[NodeId(4)]);
        assert_eq!(ts.node(NodeId(4)).name, "b");
    }

    #[test]
    fn oblivious_and_self_edges_are_dropped() {
        let mut ts = TypeSystem::new(1);
        let mut builder = Builder::new(0);
        let a = builder.new_node(None, "a");
        ts.merge_nodes(builder);

        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(OBLIVIOUS, a, 1, "dropped"));
        pending.push(NullabilityEdge::new(a, a, 1, "dropped"));
        pending.push(NullabilityEdge::new(NULLABLE_SINK, a, 1, "kept"));
        ts.merge_edges(pending);

        assert_eq!(ts.edge_count(), 1);
        assert_eq!(ts.node(a).incoming_edges().len(), 1);
        assert_eq!(ts.node(NULLABLE_SINK).outgoing_edges().len(), 1);
    }

    #[test]
    fn unify_links_classes_and_adds_uncuttable_edges() {
        let mut ts = TypeSystem::new(1);
        let mut builder = Builder::new(0);
        let a = builder.new_node(None, "a");
        let b = builder.new_node(None, "b");
        let c = builder.new_node(None, "c");
        ts.merge_nodes(builder);

        let mut pending = PendingEdges::default();
        pending.unify(a, b, "override");
        pending.unify(b, c, "override");
        ts.merge_edges(pending);

        assert_eq!(ts.representative(a), ts.representative(c));
        assert_eq!(ts.edge_count(), 4);
        assert!(ts.all_edges().all(|e| e.capacity == INFINITE_CAPACITY));
    }

    #[test]
    fn path_exists_ignores_zero_capacity_edges() {
        let mut ts = TypeSystem::new(1);
        let mut builder = Builder::new(0);
        let a = builder.new_node(None, "a");
        let b = builder.new_node(None, "b");
        ts.merge_nodes(builder);

        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(a, b, 0, "protected"));
        ts.merge_edges(pending);
        assert!(!ts.path_exists(a, b));

        let mut pending = PendingEdges::default();
        pending.push(NullabilityEdge::new(a, b, 1, "assignment"));
        ts.merge_edges(pending);
        assert!(ts.path_exists(a, b));
    }
}
