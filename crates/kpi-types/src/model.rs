use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validate::ValidationError;

pub type DefinitionId = u32;
pub type NodeId = u32;
pub type ParameterId = u32;
pub type SdTypeId = u32;
pub type SdInstanceId = u32;

/// Deepest tree accepted from clients, transport messages and storage. The root has depth 1.
pub const MAX_TREE_DEPTH: usize = 256;

/// Combinator applied by a logical operation node to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    Nor,
}

impl LogicalOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
            LogicalOperator::Nor => "NOR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AND" => Some(LogicalOperator::And),
            "OR" => Some(LogicalOperator::Or),
            "NOR" => Some(LogicalOperator::Nor),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value domain a comparator (or an SD parameter) operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueDomain {
    String,
    Boolean,
    Number,
}

impl ValueDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueDomain::String => "string",
            ValueDomain::Boolean => "boolean",
            ValueDomain::Number => "number",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ValueDomain::String),
            "boolean" => Some(ValueDomain::Boolean),
            "number" => Some(ValueDomain::Number),
            _ => None,
        }
    }
}

impl fmt::Display for ValueDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison performed by an atom node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    StringEq,
    BooleanEq,
    NumericEq,
    NumericGt,
    NumericGeq,
    NumericLt,
    NumericLeq,
}

impl Comparator {
    pub const ALL: [Comparator; 7] = [
        Comparator::StringEq,
        Comparator::BooleanEq,
        Comparator::NumericEq,
        Comparator::NumericGt,
        Comparator::NumericGeq,
        Comparator::NumericLt,
        Comparator::NumericLeq,
    ];

    /// Domain the reference value (and the runtime parameter) must belong to.
    pub fn domain(self) -> ValueDomain {
        match self {
            Comparator::StringEq => ValueDomain::String,
            Comparator::BooleanEq => ValueDomain::Boolean,
            Comparator::NumericEq
            | Comparator::NumericGt
            | Comparator::NumericGeq
            | Comparator::NumericLt
            | Comparator::NumericLeq => ValueDomain::Number,
        }
    }

    /// Name used for the `type` discriminator column of the atom table.
    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::StringEq => "string_eq_atom",
            Comparator::BooleanEq => "boolean_eq_atom",
            Comparator::NumericEq => "numeric_eq_atom",
            Comparator::NumericGt => "numeric_gt_atom",
            Comparator::NumericGeq => "numeric_geq_atom",
            Comparator::NumericLt => "numeric_lt_atom",
            Comparator::NumericLeq => "numeric_leq_atom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Comparator::ALL
            .into_iter()
            .find(|comparator| comparator.as_str() == name)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference value an atom compares the runtime parameter against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl ReferenceValue {
    pub fn domain(&self) -> ValueDomain {
        match self {
            ReferenceValue::Boolean(_) => ValueDomain::Boolean,
            ReferenceValue::Number(_) => ValueDomain::Number,
            ReferenceValue::String(_) => ValueDomain::String,
        }
    }
}

impl From<bool> for ReferenceValue {
    fn from(value: bool) -> Self {
        ReferenceValue::Boolean(value)
    }
}

impl From<f64> for ReferenceValue {
    fn from(value: f64) -> Self {
        ReferenceValue::Number(value)
    }
}

impl From<String> for ReferenceValue {
    fn from(value: String) -> Self {
        ReferenceValue::String(value)
    }
}

impl From<&str> for ReferenceValue {
    fn from(value: &str) -> Self {
        ReferenceValue::String(value.to_owned())
    }
}

/// Reference to an SD parameter: its relational id and its name in telemetry snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterRef {
    pub id: ParameterId,
    pub name: String,
}

impl ParameterRef {
    pub fn new(id: ParameterId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Leaf predicate comparing one telemetry parameter with a reference value.
///
/// The reference value always matches the comparator's domain; construction goes through
/// [`AtomNode::new`] (deserialization included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AtomNodeFields")]
pub struct AtomNode {
    parameter: ParameterRef,
    comparator: Comparator,
    reference: ReferenceValue,
}

#[derive(Deserialize)]
struct AtomNodeFields {
    #[serde(default)]
    parameter: Option<ParameterRef>,
    comparator: Comparator,
    #[serde(default)]
    reference: Option<ReferenceValue>,
}

impl TryFrom<AtomNodeFields> for AtomNode {
    type Error = ValidationError;

    fn try_from(fields: AtomNodeFields) -> Result<Self, Self::Error> {
        AtomNode::from_parts(fields.parameter, fields.comparator, fields.reference)
    }
}

impl AtomNode {
    pub fn new(
        parameter: ParameterRef,
        comparator: Comparator,
        reference: impl Into<ReferenceValue>,
    ) -> Result<Self, ValidationError> {
        let reference = reference.into();
        if parameter.name.is_empty() {
            return Err(ValidationError::EmptyParameterName);
        }
        if reference.domain() != comparator.domain() {
            return Err(ValidationError::ReferenceTypeMismatch {
                comparator,
                expected: comparator.domain(),
                actual: reference.domain(),
            });
        }
        if let ReferenceValue::Number(number) = reference {
            if !number.is_finite() {
                return Err(ValidationError::NonFiniteReference {
                    parameter: parameter.name,
                });
            }
        }
        Ok(Self {
            parameter,
            comparator,
            reference,
        })
    }

    /// Builds an atom from possibly-absent parts, reporting the first missing one.
    pub fn from_parts(
        parameter: Option<ParameterRef>,
        comparator: Comparator,
        reference: Option<ReferenceValue>,
    ) -> Result<Self, ValidationError> {
        let parameter = parameter.ok_or(ValidationError::MissingField { field: "parameter" })?;
        let reference = reference.ok_or(ValidationError::MissingField {
            field: "reference value",
        })?;
        AtomNode::new(parameter, comparator, reference)
    }

    pub fn parameter(&self) -> &ParameterRef {
        &self.parameter
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    pub fn reference(&self) -> &ReferenceValue {
        &self.reference
    }
}

/// Internal node combining the fulfillment of its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalOperationNode {
    pub operator: LogicalOperator,
    #[serde(default)]
    pub children: Vec<KpiNode>,
}

/// Node of a KPI predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KpiNode {
    LogicalOperation(LogicalOperationNode),
    Atom(AtomNode),
}

impl KpiNode {
    pub fn logical(operator: LogicalOperator, children: Vec<KpiNode>) -> Self {
        KpiNode::LogicalOperation(LogicalOperationNode { operator, children })
    }

    pub fn and(children: Vec<KpiNode>) -> Self {
        Self::logical(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<KpiNode>) -> Self {
        Self::logical(LogicalOperator::Or, children)
    }

    pub fn nor(children: Vec<KpiNode>) -> Self {
        Self::logical(LogicalOperator::Nor, children)
    }

    pub fn atom(
        parameter: ParameterRef,
        comparator: Comparator,
        reference: impl Into<ReferenceValue>,
    ) -> Result<Self, ValidationError> {
        AtomNode::new(parameter, comparator, reference).map(KpiNode::Atom)
    }

    /// Nodes of the tree in depth-first pre-order.
    pub fn preorder(&self) -> Vec<&KpiNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            if let KpiNode::LogicalOperation(op) = node {
                stack.extend(op.children.iter().rev());
            }
        }
        out
    }

    pub fn atoms(&self) -> impl Iterator<Item = &AtomNode> {
        self.preorder().into_iter().filter_map(|node| match node {
            KpiNode::Atom(atom) => Some(atom),
            KpiNode::LogicalOperation(_) => None,
        })
    }

    pub fn node_count(&self) -> usize {
        self.preorder().len()
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let KpiNode::LogicalOperation(op) = node {
                stack.extend(op.children.iter().map(|child| (child, depth + 1)));
            }
        }
        deepest
    }
}

impl From<AtomNode> for KpiNode {
    fn from(atom: AtomNode) -> Self {
        KpiNode::Atom(atom)
    }
}

/// Whether a definition applies to every instance of its SD type or to a selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSelectionMode {
    #[default]
    All,
    Selected,
}

impl InstanceSelectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceSelectionMode::All => "all",
            InstanceSelectionMode::Selected => "selected",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "all" => Some(InstanceSelectionMode::All),
            "selected" => Some(InstanceSelectionMode::Selected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SdTypeRef {
    pub id: SdTypeId,
    pub specification: String,
}

impl SdTypeRef {
    pub fn new(id: SdTypeId, specification: impl Into<String>) -> Self {
        Self {
            id,
            specification: specification.into(),
        }
    }
}

/// A KPI definition: one predicate tree bound to an SD type. The definition owns its tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DefinitionId>,
    pub sd_type: SdTypeRef,
    pub user_identifier: String,
    pub root: KpiNode,
    #[serde(default, rename = "sdInstanceMode")]
    pub instance_mode: InstanceSelectionMode,
    #[serde(default, rename = "selectedSDInstanceUIDs")]
    pub selected_instance_uids: BTreeSet<String>,
}

impl KpiDefinition {
    pub fn new(sd_type: SdTypeRef, user_identifier: impl Into<String>, root: KpiNode) -> Self {
        Self {
            id: None,
            sd_type,
            user_identifier: user_identifier.into(),
            root,
            instance_mode: InstanceSelectionMode::All,
            selected_instance_uids: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: DefinitionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Restricts the definition to the given instance UIDs.
    pub fn with_selected_instances<I, S>(mut self, uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_mode = InstanceSelectionMode::Selected;
        self.selected_instance_uids = uids.into_iter().map(Into::into).collect();
        self
    }

    pub fn applies_to(&self, instance_uid: &str) -> bool {
        match self.instance_mode {
            InstanceSelectionMode::All => true,
            InstanceSelectionMode::Selected => self.selected_instance_uids.contains(instance_uid),
        }
    }
}

/// Latest fulfillment of a definition by an SD instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentResult {
    pub definition_id: DefinitionId,
    pub instance_id: SdInstanceId,
    pub fulfilled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdParameter {
    pub id: ParameterId,
    pub name: String,
    pub domain: ValueDomain,
}

/// Registered class of smart device with the parameters its telemetry carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdType {
    pub id: SdTypeId,
    pub denotation: String,
    pub parameters: Vec<SdParameter>,
}

impl SdType {
    pub fn parameter(&self, id: ParameterId) -> Option<&SdParameter> {
        self.parameters.iter().find(|parameter| parameter.id == id)
    }

    pub fn to_ref(&self) -> SdTypeRef {
        SdTypeRef::new(self.id, self.denotation.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdInstance {
    pub id: SdInstanceId,
    pub uid: String,
    pub sd_type_id: SdTypeId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp() -> ParameterRef {
        ParameterRef::new(1, "temp")
    }

    #[test]
    fn atom_rejects_reference_of_wrong_domain() {
        let err = AtomNode::new(temp(), Comparator::NumericGt, "warm").unwrap_err();
        assert_eq!(
            err,
            ValidationError::ReferenceTypeMismatch {
                comparator: Comparator::NumericGt,
                expected: ValueDomain::Number,
                actual: ValueDomain::String,
            }
        );
    }

    #[test]
    fn atom_rejects_missing_parts_and_bad_numbers() {
        assert_eq!(
            AtomNode::from_parts(None, Comparator::BooleanEq, Some(true.into())).unwrap_err(),
            ValidationError::MissingField { field: "parameter" }
        );
        assert_eq!(
            AtomNode::from_parts(Some(temp()), Comparator::NumericEq, None).unwrap_err(),
            ValidationError::MissingField {
                field: "reference value"
            }
        );
        assert!(matches!(
            AtomNode::new(temp(), Comparator::NumericLt, f64::NAN),
            Err(ValidationError::NonFiniteReference { .. })
        ));
        assert_eq!(
            AtomNode::new(ParameterRef::new(1, ""), Comparator::StringEq, "x").unwrap_err(),
            ValidationError::EmptyParameterName
        );
    }

    #[test]
    fn deserializing_atom_runs_validation() {
        let bad = json!({
            "kind": "atom",
            "parameter": { "id": 1, "name": "temp" },
            "comparator": "numeric_geq",
            "reference": true
        });
        assert!(serde_json::from_value::<KpiNode>(bad).is_err());

        let good = json!({
            "kind": "logical_operation",
            "operator": "AND",
            "children": [{
                "kind": "atom",
                "parameter": { "id": 1, "name": "temp" },
                "comparator": "numeric_geq",
                "reference": 20.0
            }]
        });
        let node: KpiNode = serde_json::from_value(good).unwrap();
        assert_eq!(node.node_count(), 2);
        assert_eq!(node.atoms().count(), 1);
    }

    #[test]
    fn preorder_keeps_child_order() {
        let tree = KpiNode::and(vec![
            KpiNode::atom(temp(), Comparator::NumericGeq, 20.0).unwrap(),
            KpiNode::or(vec![
                KpiNode::atom(ParameterRef::new(2, "source"), Comparator::StringEq, "WS_in")
                    .unwrap(),
            ]),
            KpiNode::atom(ParameterRef::new(3, "on"), Comparator::BooleanEq, true).unwrap(),
        ]);
        let names: Vec<_> = tree
            .atoms()
            .map(|atom| atom.parameter().name.as_str())
            .collect();
        assert_eq!(names, vec!["temp", "source", "on"]);
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn selection_mode_filters_instances() {
        let root = KpiNode::and(vec![]);
        let all = KpiDefinition::new(SdTypeRef::new(1, "shelly1pro"), "alice", root);
        assert!(all.applies_to("any-uid"));

        let selected = all.with_selected_instances(["a", "b"]);
        assert!(selected.applies_to("a"));
        assert!(!selected.applies_to("c"));
    }

    #[test]
    fn comparator_names_round_trip() {
        for comparator in Comparator::ALL {
            assert_eq!(Comparator::from_name(comparator.as_str()), Some(comparator));
        }
        assert_eq!(Comparator::from_name("numeric_between_atom"), None);
    }
}
