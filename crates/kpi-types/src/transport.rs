//! Transport format (TF) for moving KPI definitions between processes, plus the JSON message
//! payloads exchanged over the broker.
//!
//! A TF definition is a flat adjacency list: every node carries a string id and the id of its
//! parent (`null` for the root). Node ids are generated per encoding and carry no meaning beyond
//! one message.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

use crate::validate::ValidationError;
use crate::{
    AtomNode, Comparator, DefinitionId, InstanceSelectionMode, KpiDefinition, KpiNode,
    LogicalOperator, MAX_TREE_DEPTH, ParameterId, ParameterRef, ReferenceValue, SdTypeId,
    SdTypeRef, ValueDomain,
};

/// Fan-out message refreshing every processing unit's registry: TF definitions grouped by SD
/// type specification.
pub type KpiConfigurationUpdate = IndexMap<String, Vec<KpiDefinitionTf>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KpiNodeTfType {
    #[serde(rename = "string-eq-atom")]
    StringEqAtom,
    #[serde(rename = "boolean-eq-atom")]
    BooleanEqAtom,
    #[serde(rename = "numeric-eq-atom")]
    NumericEqAtom,
    #[serde(rename = "numeric-gt-atom")]
    NumericGtAtom,
    #[serde(rename = "numeric-geq-atom")]
    NumericGeqAtom,
    #[serde(rename = "numeric-lt-atom")]
    NumericLtAtom,
    #[serde(rename = "numeric-leq-atom")]
    NumericLeqAtom,
    #[serde(rename = "logical-operation")]
    LogicalOperation,
}

impl KpiNodeTfType {
    fn from_comparator(comparator: Comparator) -> Self {
        match comparator {
            Comparator::StringEq => KpiNodeTfType::StringEqAtom,
            Comparator::BooleanEq => KpiNodeTfType::BooleanEqAtom,
            Comparator::NumericEq => KpiNodeTfType::NumericEqAtom,
            Comparator::NumericGt => KpiNodeTfType::NumericGtAtom,
            Comparator::NumericGeq => KpiNodeTfType::NumericGeqAtom,
            Comparator::NumericLt => KpiNodeTfType::NumericLtAtom,
            Comparator::NumericLeq => KpiNodeTfType::NumericLeqAtom,
        }
    }

    /// Comparator of an atom node type; `None` for logical operation nodes.
    pub fn comparator(self) -> Option<Comparator> {
        match self {
            KpiNodeTfType::StringEqAtom => Some(Comparator::StringEq),
            KpiNodeTfType::BooleanEqAtom => Some(Comparator::BooleanEq),
            KpiNodeTfType::NumericEqAtom => Some(Comparator::NumericEq),
            KpiNodeTfType::NumericGtAtom => Some(Comparator::NumericGt),
            KpiNodeTfType::NumericGeqAtom => Some(Comparator::NumericGeq),
            KpiNodeTfType::NumericLtAtom => Some(Comparator::NumericLt),
            KpiNodeTfType::NumericLeqAtom => Some(Comparator::NumericLeq),
            KpiNodeTfType::LogicalOperation => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiLogicalOperationTfType {
    And,
    Or,
    Nor,
}

impl From<LogicalOperator> for KpiLogicalOperationTfType {
    fn from(operator: LogicalOperator) -> Self {
        match operator {
            LogicalOperator::And => KpiLogicalOperationTfType::And,
            LogicalOperator::Or => KpiLogicalOperationTfType::Or,
            LogicalOperator::Nor => KpiLogicalOperationTfType::Nor,
        }
    }
}

impl From<KpiLogicalOperationTfType> for LogicalOperator {
    fn from(operation: KpiLogicalOperationTfType) -> Self {
        match operation {
            KpiLogicalOperationTfType::And => LogicalOperator::And,
            KpiLogicalOperationTfType::Or => LogicalOperator::Or,
            KpiLogicalOperationTfType::Nor => LogicalOperator::Nor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiNodeTf {
    pub id: String,
    #[serde(default)]
    pub parent_node_id: Option<String>,
    pub node_type: KpiNodeTfType,
    #[serde(default)]
    pub sd_parameter_specification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sd_parameter_id: Option<ParameterId>,
    #[serde(default)]
    pub string_reference_value: Option<String>,
    #[serde(default)]
    pub boolean_reference_value: Option<bool>,
    #[serde(default)]
    pub numeric_reference_value: Option<f64>,
    #[serde(default)]
    pub logical_operation_type: Option<KpiLogicalOperationTfType>,
}

impl KpiNodeTf {
    fn empty(id: String, parent_node_id: Option<String>, node_type: KpiNodeTfType) -> Self {
        Self {
            id,
            parent_node_id,
            node_type,
            sd_parameter_specification: None,
            sd_parameter_id: None,
            string_reference_value: None,
            boolean_reference_value: None,
            numeric_reference_value: None,
            logical_operation_type: None,
        }
    }
}

/// TF definition. `id` and `nodes` form the tree; the remaining fields let a processing unit
/// decide which instances the definition applies to and default to "all instances".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiDefinitionTf {
    pub id: DefinitionId,
    pub nodes: Vec<KpiNodeTf>,
    #[serde(default, rename = "sdTypeID", skip_serializing_if = "Option::is_none")]
    pub sd_type_id: Option<SdTypeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_identifier: Option<String>,
    #[serde(default, rename = "sdInstanceMode")]
    pub instance_mode: InstanceSelectionMode,
    #[serde(default, rename = "selectedSDInstanceUIDs")]
    pub selected_instance_uids: BTreeSet<String>,
}

/// Parameter snapshot of one SD instance that should be checked against the KPI definitions of
/// its SD type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentCheckRequest {
    pub timestamp: f64,
    #[serde(rename = "sdInstanceUID")]
    pub instance_uid: String,
    #[serde(rename = "sdTypeSpecification")]
    pub sd_type_specification: String,
    #[serde(default)]
    pub parameters: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FulfillmentCheckResult {
    #[serde(rename = "sdInstanceUID")]
    pub instance_uid: String,
    #[serde(rename = "kpiDefinitionID")]
    pub definition_id: DefinitionId,
    pub fulfilled: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("definition has no id and cannot be transported")]
    MissingDefinitionId,
    #[error("definition contains no root node")]
    NoRoot,
    #[error("definition has several root nodes ('{first}', '{second}')")]
    MultipleRoots { first: String, second: String },
    #[error("node id '{0}' appears more than once")]
    DuplicateNodeId(String),
    #[error("node '{node}' references unknown parent '{parent}'")]
    UnknownParent { node: String, parent: String },
    #[error("node '{node}' has parent '{parent}' which is not a logical operation node")]
    ParentNotLogicalOperation { node: String, parent: String },
    #[error("node '{node}' is not reachable from the root")]
    Unreachable { node: String },
    #[error("node '{node}' lies deeper than the limit of {max} levels")]
    TreeTooDeep { node: String, max: usize },
    #[error("logical operation node '{node}' is missing its operation type")]
    MissingLogicalOperationType { node: String },
    #[error("atom node '{node}' is missing its SD parameter specification")]
    MissingParameterSpecification { node: String },
    #[error("atom node '{node}' of type {node_type:?} is missing its reference value")]
    MissingReferenceValue {
        node: String,
        node_type: KpiNodeTfType,
    },
    #[error("invalid atom node '{node}': {source}")]
    InvalidAtom {
        node: String,
        #[source]
        source: ValidationError,
    },
    #[error("definition {definition_id}: {source}")]
    InDefinition {
        definition_id: DefinitionId,
        #[source]
        source: Box<TransportError>,
    },
}

/// Flattens a persisted definition into its TF. Node ids are fresh UUIDs.
pub fn encode_definition(definition: &KpiDefinition) -> Result<KpiDefinitionTf, TransportError> {
    let id = definition.id.ok_or(TransportError::MissingDefinitionId)?;
    let mut nodes = Vec::with_capacity(definition.root.node_count());
    encode_node(&definition.root, &mut nodes);
    Ok(KpiDefinitionTf {
        id,
        nodes,
        sd_type_id: Some(definition.sd_type.id),
        user_identifier: Some(definition.user_identifier.clone()),
        instance_mode: definition.instance_mode,
        selected_instance_uids: definition.selected_instance_uids.clone(),
    })
}

fn encode_node(root: &KpiNode, out: &mut Vec<KpiNodeTf>) {
    let mut stack: Vec<(&KpiNode, Option<String>)> = vec![(root, None)];
    while let Some((node, parent_node_id)) = stack.pop() {
        let id = Uuid::new_v4().to_string();
        match node {
            KpiNode::LogicalOperation(op) => {
                let mut tf =
                    KpiNodeTf::empty(id.clone(), parent_node_id, KpiNodeTfType::LogicalOperation);
                tf.logical_operation_type = Some(op.operator.into());
                out.push(tf);
                stack.extend(op.children.iter().rev().map(|child| (child, Some(id.clone()))));
            }
            KpiNode::Atom(atom) => {
                let mut tf = KpiNodeTf::empty(
                    id,
                    parent_node_id,
                    KpiNodeTfType::from_comparator(atom.comparator()),
                );
                tf.sd_parameter_specification = Some(atom.parameter().name.clone());
                tf.sd_parameter_id = Some(atom.parameter().id);
                match atom.reference() {
                    ReferenceValue::String(value) => tf.string_reference_value = Some(value.clone()),
                    ReferenceValue::Boolean(value) => tf.boolean_reference_value = Some(*value),
                    ReferenceValue::Number(value) => tf.numeric_reference_value = Some(*value),
                }
                out.push(tf);
            }
        }
    }
}

/// Rebuilds a definition from its TF. Children keep the order in which they appear in `nodes`.
///
/// Parameter and SD type ids absent from the TF decode as `0`; processing units only use
/// parameter names.
pub fn decode_definition(
    sd_type_specification: &str,
    tf: &KpiDefinitionTf,
) -> Result<KpiDefinition, TransportError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(tf.nodes.len());
    for (position, node) in tf.nodes.iter().enumerate() {
        if index.insert(node.id.as_str(), position).is_some() {
            return Err(TransportError::DuplicateNodeId(node.id.clone()));
        }
    }

    let mut root = None;
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    for (position, node) in tf.nodes.iter().enumerate() {
        match node.parent_node_id.as_deref() {
            None => {
                if let Some(first) = root {
                    let first: &KpiNodeTf = &tf.nodes[first];
                    return Err(TransportError::MultipleRoots {
                        first: first.id.clone(),
                        second: node.id.clone(),
                    });
                }
                root = Some(position);
            }
            Some(parent) => {
                let parent_position =
                    *index
                        .get(parent)
                        .ok_or_else(|| TransportError::UnknownParent {
                            node: node.id.clone(),
                            parent: parent.to_owned(),
                        })?;
                if tf.nodes[parent_position].node_type != KpiNodeTfType::LogicalOperation {
                    return Err(TransportError::ParentNotLogicalOperation {
                        node: node.id.clone(),
                        parent: parent.to_owned(),
                    });
                }
                children.entry(parent).or_default().push(position);
            }
        }
    }
    let root = root.ok_or(TransportError::NoRoot)?;

    let mut visited = vec![false; tf.nodes.len()];
    let root_node = decode_node(&tf.nodes, root, 1, &children, &mut visited)?;
    if let Some(position) = visited.iter().position(|seen| !seen) {
        return Err(TransportError::Unreachable {
            node: tf.nodes[position].id.clone(),
        });
    }

    Ok(KpiDefinition {
        id: Some(tf.id),
        sd_type: SdTypeRef::new(tf.sd_type_id.unwrap_or_default(), sd_type_specification),
        user_identifier: tf.user_identifier.clone().unwrap_or_default(),
        root: root_node,
        instance_mode: tf.instance_mode,
        selected_instance_uids: tf.selected_instance_uids.clone(),
    })
}

fn decode_node(
    nodes: &[KpiNodeTf],
    position: usize,
    depth: usize,
    children: &HashMap<&str, Vec<usize>>,
    visited: &mut [bool],
) -> Result<KpiNode, TransportError> {
    let node = &nodes[position];
    if depth > MAX_TREE_DEPTH {
        return Err(TransportError::TreeTooDeep {
            node: node.id.clone(),
            max: MAX_TREE_DEPTH,
        });
    }
    visited[position] = true;
    let Some(comparator) = node.node_type.comparator() else {
        let operator = node.logical_operation_type.ok_or_else(|| {
            TransportError::MissingLogicalOperationType {
                node: node.id.clone(),
            }
        })?;
        let mut decoded = Vec::new();
        for &child in children.get(node.id.as_str()).into_iter().flatten() {
            decoded.push(decode_node(nodes, child, depth + 1, children, visited)?);
        }
        return Ok(KpiNode::logical(operator.into(), decoded));
    };

    let name = node.sd_parameter_specification.clone().ok_or_else(|| {
        TransportError::MissingParameterSpecification {
            node: node.id.clone(),
        }
    })?;
    let reference = match comparator.domain() {
        ValueDomain::String => node
            .string_reference_value
            .clone()
            .map(ReferenceValue::String),
        ValueDomain::Boolean => node.boolean_reference_value.map(ReferenceValue::Boolean),
        ValueDomain::Number => node.numeric_reference_value.map(ReferenceValue::Number),
    }
    .ok_or_else(|| TransportError::MissingReferenceValue {
        node: node.id.clone(),
        node_type: node.node_type,
    })?;
    let parameter = ParameterRef::new(node.sd_parameter_id.unwrap_or_default(), name);
    AtomNode::new(parameter, comparator, reference)
        .map(KpiNode::Atom)
        .map_err(|source| TransportError::InvalidAtom {
            node: node.id.clone(),
            source,
        })
}

/// Groups persisted definitions by SD type specification, preserving their order.
pub fn build_configuration_update(
    definitions: &[KpiDefinition],
) -> Result<KpiConfigurationUpdate, TransportError> {
    let mut update = KpiConfigurationUpdate::new();
    for definition in definitions {
        let tf = encode_definition(definition)?;
        update
            .entry(definition.sd_type.specification.clone())
            .or_default()
            .push(tf);
    }
    Ok(update)
}

/// Decodes a whole configuration update; fails without partial output if any definition is
/// malformed.
pub fn decode_configuration_update(
    update: &KpiConfigurationUpdate,
) -> Result<IndexMap<String, Vec<KpiDefinition>>, TransportError> {
    let mut decoded = IndexMap::with_capacity(update.len());
    for (sd_type_specification, definitions) in update {
        let mut group = Vec::with_capacity(definitions.len());
        for tf in definitions {
            let definition = decode_definition(sd_type_specification, tf).map_err(|source| {
                TransportError::InDefinition {
                    definition_id: tf.id,
                    source: Box::new(source),
                }
            })?;
            group.push(definition);
        }
        decoded.insert(sd_type_specification.clone(), group);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_definition() -> KpiDefinition {
        let root = KpiNode::and(vec![
            KpiNode::atom(ParameterRef::new(1, "temp"), Comparator::NumericGeq, 20.0).unwrap(),
            KpiNode::atom(ParameterRef::new(1, "temp"), Comparator::NumericLeq, 24.0).unwrap(),
            KpiNode::nor(vec![
                KpiNode::atom(ParameterRef::new(2, "source"), Comparator::StringEq, "WS_out")
                    .unwrap(),
            ]),
        ]);
        KpiDefinition::new(SdTypeRef::new(7, "shelly1pro"), "alice", root)
            .with_id(11)
            .with_selected_instances(["sd-1"])
    }

    fn node(id: &str, parent: Option<&str>, node_type: KpiNodeTfType) -> KpiNodeTf {
        KpiNodeTf::empty(id.into(), parent.map(str::to_owned), node_type)
    }

    fn and_node(id: &str, parent: Option<&str>) -> KpiNodeTf {
        let mut tf = node(id, parent, KpiNodeTfType::LogicalOperation);
        tf.logical_operation_type = Some(KpiLogicalOperationTfType::And);
        tf
    }

    fn bool_atom(id: &str, parent: Option<&str>) -> KpiNodeTf {
        let mut tf = node(id, parent, KpiNodeTfType::BooleanEqAtom);
        tf.sd_parameter_specification = Some("on".into());
        tf.boolean_reference_value = Some(true);
        tf
    }

    fn tf_with(nodes: Vec<KpiNodeTf>) -> KpiDefinitionTf {
        KpiDefinitionTf {
            id: 3,
            nodes,
            sd_type_id: None,
            user_identifier: None,
            instance_mode: InstanceSelectionMode::All,
            selected_instance_uids: BTreeSet::new(),
        }
    }

    #[test]
    fn encode_then_decode_preserves_definition() {
        let definition = sample_definition();
        let tf = encode_definition(&definition).unwrap();
        assert_eq!(tf.nodes.len(), 5);
        assert_eq!(tf.nodes[0].parent_node_id, None);
        assert_eq!(tf.nodes[0].node_type, KpiNodeTfType::LogicalOperation);

        let decoded = decode_definition("shelly1pro", &tf).unwrap();
        assert_eq!(decoded, definition);
    }

    #[test]
    fn encode_requires_persisted_id() {
        let mut definition = sample_definition();
        definition.id = None;
        assert_eq!(
            encode_definition(&definition).unwrap_err(),
            TransportError::MissingDefinitionId
        );
    }

    #[test]
    fn wire_names_match_message_format() {
        let tf = encode_definition(&sample_definition()).unwrap();
        let value = serde_json::to_value(&tf).unwrap();
        assert_eq!(value["nodes"][0]["nodeType"], json!("logical-operation"));
        assert_eq!(value["nodes"][0]["logicalOperationType"], json!("and"));
        assert_eq!(value["nodes"][1]["nodeType"], json!("numeric-geq-atom"));
        assert_eq!(value["nodes"][1]["sdParameterSpecification"], json!("temp"));
        assert_eq!(value["sdInstanceMode"], json!("selected"));
        assert_eq!(value["selectedSDInstanceUIDs"], json!(["sd-1"]));
    }

    #[test]
    fn decodes_minimal_message_with_defaults() {
        let raw = json!({
            "id": 4,
            "nodes": [
                { "id": "b", "parentNodeId": "a", "nodeType": "string-eq-atom",
                  "sdParameterSpecification": "country", "stringReferenceValue": "Czechia",
                  "booleanReferenceValue": null, "numericReferenceValue": null,
                  "logicalOperationType": null },
                { "id": "a", "parentNodeId": null, "nodeType": "logical-operation",
                  "sdParameterSpecification": null, "stringReferenceValue": null,
                  "booleanReferenceValue": null, "numericReferenceValue": null,
                  "logicalOperationType": "nor" }
            ]
        });
        let tf: KpiDefinitionTf = serde_json::from_value(raw).unwrap();
        let definition = decode_definition("weather-station", &tf).unwrap();
        assert_eq!(definition.instance_mode, InstanceSelectionMode::All);
        assert_eq!(definition.sd_type.specification, "weather-station");
        let KpiNode::LogicalOperation(op) = &definition.root else {
            panic!("expected logical root");
        };
        assert_eq!(op.operator, LogicalOperator::Nor);
        assert_eq!(op.children.len(), 1);
    }

    #[test]
    fn rejects_malformed_trees() {
        let atom_parent = tf_with(vec![bool_atom("x", Some("y")), and_node("y", Some("x"))]);
        assert!(matches!(
            decode_definition("t", &atom_parent),
            Err(TransportError::ParentNotLogicalOperation { .. })
        ));

        let two_roots = tf_with(vec![and_node("a", None), and_node("b", None)]);
        assert!(matches!(
            decode_definition("t", &two_roots),
            Err(TransportError::MultipleRoots { .. })
        ));

        let empty = tf_with(vec![]);
        assert_eq!(decode_definition("t", &empty), Err(TransportError::NoRoot));

        let dangling = tf_with(vec![and_node("a", None), bool_atom("b", Some("zz"))]);
        assert!(matches!(
            decode_definition("t", &dangling),
            Err(TransportError::UnknownParent { .. })
        ));

        let cycle = tf_with(vec![
            and_node("a", None),
            and_node("b", Some("c")),
            and_node("c", Some("b")),
        ]);
        assert_eq!(
            decode_definition("t", &cycle),
            Err(TransportError::Unreachable { node: "b".into() })
        );

        let duplicate = tf_with(vec![and_node("a", None), bool_atom("a", Some("a"))]);
        assert_eq!(
            decode_definition("t", &duplicate),
            Err(TransportError::DuplicateNodeId("a".into()))
        );
    }

    #[test]
    fn rejects_incomplete_nodes() {
        let mut no_value = bool_atom("b", Some("a"));
        no_value.boolean_reference_value = None;
        no_value.numeric_reference_value = Some(1.0);
        assert!(matches!(
            decode_definition("t", &tf_with(vec![and_node("a", None), no_value])),
            Err(TransportError::MissingReferenceValue { .. })
        ));

        let mut no_operator = and_node("a", None);
        no_operator.logical_operation_type = None;
        assert!(matches!(
            decode_definition("t", &tf_with(vec![no_operator])),
            Err(TransportError::MissingLogicalOperationType { .. })
        ));

        let mut no_parameter = bool_atom("b", Some("a"));
        no_parameter.sd_parameter_specification = None;
        assert!(matches!(
            decode_definition("t", &tf_with(vec![and_node("a", None), no_parameter])),
            Err(TransportError::MissingParameterSpecification { .. })
        ));
    }

    #[test]
    fn configuration_update_groups_by_sd_type() {
        let first = sample_definition();
        let second = KpiDefinition::new(
            SdTypeRef::new(8, "weather-station"),
            "bob",
            KpiNode::or(vec![]),
        )
        .with_id(12);
        let third = sample_definition().with_id(13);

        let update = build_configuration_update(&[first, second, third]).unwrap();
        assert_eq!(
            update.keys().collect::<Vec<_>>(),
            vec!["shelly1pro", "weather-station"]
        );
        let ids: Vec<_> = update["shelly1pro"].iter().map(|tf| tf.id).collect();
        assert_eq!(ids, vec![11, 13]);

        let decoded = decode_configuration_update(&update).unwrap();
        assert_eq!(decoded["weather-station"][0].user_identifier, "bob");
    }

    #[test]
    fn configuration_update_reports_failing_definition() {
        let mut update = KpiConfigurationUpdate::new();
        update.insert("t".into(), vec![tf_with(vec![])]);
        assert_eq!(
            decode_configuration_update(&update).unwrap_err(),
            TransportError::InDefinition {
                definition_id: 3,
                source: Box::new(TransportError::NoRoot),
            }
        );
    }

    /// `depth` nested AND nodes around one atom, listed leaf first.
    fn chain_tf(depth: usize) -> KpiDefinitionTf {
        let mut nodes = vec![bool_atom("leaf", Some(&format!("n{depth}")))];
        for level in (0..depth).rev() {
            let parent = (level > 0).then(|| format!("n{level}"));
            nodes.push(and_node(&format!("n{}", level + 1), parent.as_deref()));
        }
        tf_with(nodes)
    }

    #[test]
    fn decodes_chain_at_the_depth_limit() {
        let decoded = decode_definition("t", &chain_tf(MAX_TREE_DEPTH - 1)).unwrap();
        assert_eq!(decoded.root.depth(), MAX_TREE_DEPTH);
    }

    #[test]
    fn rejects_chain_beyond_the_depth_limit() {
        for depth in [MAX_TREE_DEPTH, 2_000, 50_000] {
            assert!(matches!(
                decode_definition("t", &chain_tf(depth)),
                Err(TransportError::TreeTooDeep { max: MAX_TREE_DEPTH, .. })
            ));
        }
    }

    #[test]
    fn encodes_deepest_accepted_tree() {
        let definition = decode_definition("t", &chain_tf(MAX_TREE_DEPTH - 1))
            .unwrap()
            .with_id(3);
        let tf = encode_definition(&definition).unwrap();
        assert_eq!(tf.nodes.len(), MAX_TREE_DEPTH);
        assert_eq!(tf.nodes[0].parent_node_id, None);
        assert_eq!(
            decode_definition("t", &tf).unwrap().root,
            definition.root
        );
    }
}
