use thiserror::Error;

use crate::{Comparator, KpiDefinition, MAX_TREE_DEPTH, ValueDomain};

/// Malformed input tree or definition, rejected before persistence.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("atom node is missing its {field}")]
    MissingField { field: &'static str },
    #[error("atom parameter name must not be empty")]
    EmptyParameterName,
    #[error("comparator {comparator} expects a {expected} reference value, got {actual}")]
    ReferenceTypeMismatch {
        comparator: Comparator,
        expected: ValueDomain,
        actual: ValueDomain,
    },
    #[error("reference value for parameter '{parameter}' must be finite")]
    NonFiniteReference { parameter: String },
    #[error("definition user identifier must not be empty")]
    EmptyUserIdentifier,
    #[error("definition SD type specification must not be empty")]
    EmptySdTypeSpecification,
    #[error("selected instance UID must not be empty")]
    EmptyInstanceUid,
    #[error("tree is {depth} levels deep, the limit is {max}")]
    TreeTooDeep { depth: usize, max: usize },
}

/// Checks the definition-level fields. Atom nodes validate themselves on construction.
pub fn validate_definition(definition: &KpiDefinition) -> Result<(), ValidationError> {
    if definition.user_identifier.trim().is_empty() {
        return Err(ValidationError::EmptyUserIdentifier);
    }
    if definition.sd_type.specification.trim().is_empty() {
        return Err(ValidationError::EmptySdTypeSpecification);
    }
    if definition
        .selected_instance_uids
        .iter()
        .any(|uid| uid.is_empty())
    {
        return Err(ValidationError::EmptyInstanceUid);
    }
    let depth = definition.root.depth();
    if depth > MAX_TREE_DEPTH {
        return Err(ValidationError::TreeTooDeep {
            depth,
            max: MAX_TREE_DEPTH,
        });
    }
    Ok(())
}
