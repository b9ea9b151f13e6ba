//! Relational projection of predicate trees.
//!
//! A tree is stored as one generic row per node (`id`, `parent_id`) plus exactly one variant row
//! per node: a logical-operation row or an atom row, keyed by the same node id.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use kpi_types::{
    AtomNode, Comparator, KpiNode, LogicalOperator, MAX_TREE_DEPTH, NodeId, ParameterId,
    ParameterRef, ReferenceValue, ValueDomain,
};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRow {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalOperationRow {
    pub node_id: NodeId,
    pub operator: LogicalOperator,
}

/// Atom variant row. Exactly one of the value columns is set, matching the comparator's domain.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomRow {
    pub node_id: NodeId,
    pub parameter_id: ParameterId,
    /// Resolved through the parameter table; not a column of the atom table itself.
    pub parameter_name: String,
    pub comparator: Comparator,
    pub string_value: Option<String>,
    pub bool_value: Option<bool>,
    pub num_value: Option<f64>,
}

impl AtomRow {
    pub fn from_atom(node_id: NodeId, atom: &AtomNode) -> Self {
        let (string_value, bool_value, num_value) = match atom.reference() {
            ReferenceValue::String(value) => (Some(value.clone()), None, None),
            ReferenceValue::Boolean(value) => (None, Some(*value), None),
            ReferenceValue::Number(value) => (None, None, Some(*value)),
        };
        Self {
            node_id,
            parameter_id: atom.parameter().id,
            parameter_name: atom.parameter().name.clone(),
            comparator: atom.comparator(),
            string_value,
            bool_value,
            num_value,
        }
    }

    pub fn to_atom(&self) -> StoreResult<AtomNode> {
        let reference = match (
            self.comparator.domain(),
            &self.string_value,
            self.bool_value,
            self.num_value,
        ) {
            (ValueDomain::String, Some(value), None, None) => ReferenceValue::String(value.clone()),
            (ValueDomain::Boolean, None, Some(value), None) => ReferenceValue::Boolean(value),
            (ValueDomain::Number, None, None, Some(value)) => ReferenceValue::Number(value),
            _ => {
                return Err(corrupt(
                    self.node_id,
                    "atom value columns do not match its comparator",
                ));
            }
        };
        let parameter = ParameterRef::new(self.parameter_id, self.parameter_name.clone());
        AtomNode::new(parameter, self.comparator, reference)
            .map_err(|_| corrupt(self.node_id, "atom row fails validation"))
    }
}

/// The three row sets of one tree, in depth-first pre-order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatTree {
    pub nodes: Vec<NodeRow>,
    pub logical: Vec<LogicalOperationRow>,
    pub atoms: Vec<AtomRow>,
}

impl FlatTree {
    pub fn root_id(&self) -> Option<NodeId> {
        self.nodes.first().map(|row| row.id)
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes.iter().map(|row| row.id).collect()
    }
}

/// Flattens `root`, asking `next_id` for one fresh id per node in pre-order.
///
/// Generic rows come out parent-first, so inserting them in order satisfies the self-referencing
/// parent key.
pub fn flatten(root: &KpiNode, mut next_id: impl FnMut() -> NodeId) -> FlatTree {
    let mut flat = FlatTree::default();
    let mut stack: Vec<(&KpiNode, Option<NodeId>)> = vec![(root, None)];
    while let Some((node, parent_id)) = stack.pop() {
        let id = next_id();
        flat.nodes.push(NodeRow { id, parent_id });
        match node {
            KpiNode::LogicalOperation(op) => {
                flat.logical.push(LogicalOperationRow {
                    node_id: id,
                    operator: op.operator,
                });
                stack.extend(op.children.iter().rev().map(|child| (child, Some(id))));
            }
            KpiNode::Atom(atom) => flat.atoms.push(AtomRow::from_atom(id, atom)),
        }
    }
    flat
}

/// Parent to children index, children kept in the order they appear in `nodes`.
pub fn children_index(nodes: &[NodeRow]) -> HashMap<NodeId, Vec<NodeId>> {
    let mut index: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(nodes.len());
    for row in nodes {
        if let Some(parent) = row.parent_id {
            index.entry(parent).or_default().push(row.id);
        }
    }
    index
}

/// Materializes the tree rooted at `root_id` from its row sets.
///
/// Rows of other trees may be present and are ignored. A node without a variant row, with two
/// variant rows, an atom with children or a path longer than [`MAX_TREE_DEPTH`] is a
/// [`StoreError::CorruptTree`].
pub fn reconstruct(
    root_id: NodeId,
    nodes: &[NodeRow],
    logical: &[LogicalOperationRow],
    atoms: &[AtomRow],
) -> StoreResult<KpiNode> {
    let children = children_index(nodes);
    let known: HashSet<NodeId> = nodes.iter().map(|row| row.id).collect();
    let logical: HashMap<NodeId, LogicalOperator> = logical
        .iter()
        .map(|row| (row.node_id, row.operator))
        .collect();
    let atoms: HashMap<NodeId, &AtomRow> = atoms.iter().map(|row| (row.node_id, row)).collect();

    let rows = TreeRows {
        children: &children,
        known: &known,
        logical: &logical,
        atoms: &atoms,
    };
    let mut visited = HashSet::new();
    rows.materialize(root_id, 1, &mut visited).inspect_err(|err| {
        tracing::error!(root_id, error = %err, "stored KPI tree is corrupt");
    })
}

struct TreeRows<'a> {
    children: &'a HashMap<NodeId, Vec<NodeId>>,
    known: &'a HashSet<NodeId>,
    logical: &'a HashMap<NodeId, LogicalOperator>,
    atoms: &'a HashMap<NodeId, &'a AtomRow>,
}

impl TreeRows<'_> {
    fn materialize(
        &self,
        id: NodeId,
        depth: usize,
        visited: &mut HashSet<NodeId>,
    ) -> StoreResult<KpiNode> {
        if depth > MAX_TREE_DEPTH {
            return Err(corrupt(id, "tree exceeds the maximum depth"));
        }
        if !self.known.contains(&id) {
            return Err(corrupt(id, "node has no generic row"));
        }
        if !visited.insert(id) {
            return Err(corrupt(id, "node is its own ancestor"));
        }
        let children = self.children.get(&id).map(Vec::as_slice).unwrap_or_default();
        match (self.logical.get(&id), self.atoms.get(&id)) {
            (Some(operator), None) => {
                let mut decoded = Vec::with_capacity(children.len());
                for child in children {
                    decoded.push(self.materialize(*child, depth + 1, visited)?);
                }
                Ok(KpiNode::logical(*operator, decoded))
            }
            (None, Some(atom)) => {
                if !children.is_empty() {
                    return Err(corrupt(id, "atom node has children"));
                }
                atom.to_atom().map(KpiNode::Atom)
            }
            (Some(_), Some(_)) => Err(corrupt(id, "node has both variant rows")),
            (None, None) => Err(corrupt(id, "node has no variant row")),
        }
    }
}

/// Ids reachable from `root_id` following parent to child edges, in breadth-first order.
///
/// Deleting in reverse order removes children before their parents.
pub fn reachable_from(root_id: NodeId, nodes: &[NodeRow]) -> Vec<NodeId> {
    if !nodes.iter().any(|row| row.id == root_id) {
        return Vec::new();
    }
    let children = children_index(nodes);
    let mut seen = HashSet::from([root_id]);
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root_id]);
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for child in children.get(&id).into_iter().flatten() {
            if seen.insert(*child) {
                queue.push_back(*child);
            }
        }
    }
    order
}

pub(crate) fn corrupt(node: NodeId, reason: &'static str) -> StoreError {
    StoreError::CorruptTree { node, reason }
}
