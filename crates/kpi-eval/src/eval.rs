use kpi_types::{
    AtomNode, Comparator, KpiDefinition, KpiNode, LogicalOperator, ReferenceValue, ValueDomain,
};
use thiserror::Error;

use crate::value::{ParameterMap, Value};

pub type EvalResult<T = bool> = Result<T, EvalError>;

/// Evaluation-time failure of one definition. Recoverable: the caller skips the definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("parameter '{parameter}' is missing from the snapshot")]
    MissingParameter { parameter: String },
    #[error("parameter '{parameter}': expected {expected}, got {actual}")]
    TypeMismatch {
        parameter: String,
        expected: ValueDomain,
        actual: &'static str,
    },
}

/// Evaluates a predicate tree against one parameter snapshot.
///
/// Logical nodes short-circuit left to right: `AND` stops at the first false child, `OR` at the
/// first true child, `NOR` at the first true child. Errors of children that are never reached
/// are not reported. The walk keeps its own stack, so tree depth is bounded by memory only.
pub fn evaluate(node: &KpiNode, parameters: &ParameterMap) -> EvalResult {
    let mut frames: Vec<Frame<'_>> = Vec::new();
    let mut step = Step::Enter(node);
    loop {
        step = match step {
            Step::Enter(KpiNode::Atom(atom)) => Step::Return(eval_atom(atom, parameters)?),
            Step::Enter(KpiNode::LogicalOperation(op)) => {
                let mut children = op.children.iter();
                match children.next() {
                    Some(first) => {
                        frames.push(Frame {
                            operator: op.operator,
                            children,
                        });
                        Step::Enter(first)
                    }
                    None => Step::Return(exhausted(op.operator)),
                }
            }
            Step::Return(value) => {
                let Some(frame) = frames.last_mut() else {
                    return Ok(value);
                };
                let next = if value == stops_on(frame.operator) {
                    None
                } else {
                    frame.children.next()
                };
                match next {
                    Some(child) => Step::Enter(child),
                    None => {
                        let operator = frame.operator;
                        frames.pop();
                        if value == stops_on(operator) {
                            Step::Return(!exhausted(operator))
                        } else {
                            Step::Return(exhausted(operator))
                        }
                    }
                }
            }
        };
    }
}

enum Step<'a> {
    Enter(&'a KpiNode),
    Return(bool),
}

/// A logical node whose remaining children are still to be evaluated.
struct Frame<'a> {
    operator: LogicalOperator,
    children: std::slice::Iter<'a, KpiNode>,
}

/// Child value that decides a logical node without looking at its remaining children.
fn stops_on(operator: LogicalOperator) -> bool {
    match operator {
        LogicalOperator::And => false,
        LogicalOperator::Or | LogicalOperator::Nor => true,
    }
}

/// Value of a logical node none of whose children short-circuited it; the short-circuited
/// value is the negation.
fn exhausted(operator: LogicalOperator) -> bool {
    match operator {
        LogicalOperator::And | LogicalOperator::Nor => true,
        LogicalOperator::Or => false,
    }
}

/// Fulfillment of a whole definition.
pub fn evaluate_definition(definition: &KpiDefinition, parameters: &ParameterMap) -> EvalResult {
    evaluate(&definition.root, parameters)
}

fn eval_atom(atom: &AtomNode, parameters: &ParameterMap) -> EvalResult {
    let name = &atom.parameter().name;
    let value = parameters
        .get(name)
        .ok_or_else(|| EvalError::MissingParameter {
            parameter: name.clone(),
        })?;
    match (atom.reference(), value) {
        (ReferenceValue::String(expected), Value::Text(actual)) => Ok(actual == expected),
        (ReferenceValue::Boolean(expected), Value::Bool(actual)) => Ok(actual == expected),
        (ReferenceValue::Number(expected), Value::Number(actual)) => {
            Ok(compare_numbers(atom.comparator(), *actual, *expected))
        }
        _ => Err(EvalError::TypeMismatch {
            parameter: name.clone(),
            expected: atom.comparator().domain(),
            actual: value.kind(),
        }),
    }
}

fn compare_numbers(comparator: Comparator, actual: f64, reference: f64) -> bool {
    match comparator {
        Comparator::NumericEq => actual == reference,
        Comparator::NumericGt => actual > reference,
        Comparator::NumericGeq => actual >= reference,
        Comparator::NumericLt => actual < reference,
        Comparator::NumericLeq => actual <= reference,
        // Atom construction pairs non-numeric comparators with non-numeric references.
        Comparator::StringEq | Comparator::BooleanEq => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpi_types::ParameterRef;

    fn params(entries: &[(&str, Value)]) -> ParameterMap {
        entries
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect()
    }

    fn num(name: &str, comparator: Comparator, reference: f64) -> KpiNode {
        KpiNode::atom(ParameterRef::new(1, name), comparator, reference).unwrap()
    }

    fn text(name: &str, reference: &str) -> KpiNode {
        KpiNode::atom(ParameterRef::new(2, name), Comparator::StringEq, reference).unwrap()
    }

    fn flag(name: &str, reference: bool) -> KpiNode {
        KpiNode::atom(ParameterRef::new(3, name), Comparator::BooleanEq, reference).unwrap()
    }

    #[test]
    fn empty_logical_nodes_are_vacuous() {
        let empty = ParameterMap::new();
        assert_eq!(evaluate(&KpiNode::and(vec![]), &empty), Ok(true));
        assert_eq!(evaluate(&KpiNode::or(vec![]), &empty), Ok(false));
        assert_eq!(evaluate(&KpiNode::nor(vec![]), &empty), Ok(true));
    }

    #[test]
    fn nor_is_and_of_negations() {
        let snapshot = params(&[("a", true.into()), ("b", false.into())]);
        let cases = [
            vec![flag("a", true), flag("b", true)],
            vec![flag("a", false), flag("b", true)],
            vec![flag("a", false), flag("b", false)],
            vec![flag("a", true), flag("b", false)],
        ];
        for children in cases {
            let negated: Vec<bool> = children
                .iter()
                .map(|child| !evaluate(child, &snapshot).unwrap())
                .collect();
            let expected = negated.iter().all(|value| *value);
            assert_eq!(evaluate(&KpiNode::nor(children), &snapshot), Ok(expected));
        }
    }

    #[test]
    fn temperature_range_and_source() {
        let tree = KpiNode::and(vec![
            num("temp", Comparator::NumericGeq, 20.0),
            num("temp", Comparator::NumericLeq, 24.0),
            text("source", "WS_in"),
        ]);
        let inside = params(&[("temp", 22.0.into()), ("source", "WS_in".into())]);
        let outside = params(&[("temp", 25.0.into()), ("source", "WS_in".into())]);
        assert_eq!(evaluate(&tree, &inside), Ok(true));
        assert_eq!(evaluate(&tree, &outside), Ok(false));
    }

    #[test]
    fn nor_country_check() {
        let tree = KpiNode::nor(vec![text("country", "Czechia")]);
        assert_eq!(
            evaluate(&tree, &params(&[("country", "Germany".into())])),
            Ok(true)
        );
        assert_eq!(
            evaluate(&tree, &params(&[("country", "Czechia".into())])),
            Ok(false)
        );
    }

    #[test]
    fn numeric_comparators() {
        let snapshot = params(&[("x", 5.0.into())]);
        let check = |comparator, reference| {
            evaluate(&num("x", comparator, reference), &snapshot).unwrap()
        };
        assert!(check(Comparator::NumericEq, 5.0));
        assert!(!check(Comparator::NumericGt, 5.0));
        assert!(check(Comparator::NumericGeq, 5.0));
        assert!(check(Comparator::NumericLt, 6.0));
        assert!(!check(Comparator::NumericLeq, 4.5));
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let tree = KpiNode::and(vec![num("temp", Comparator::NumericGt, 1.0)]);
        assert_eq!(
            evaluate(&tree, &ParameterMap::new()),
            Err(EvalError::MissingParameter {
                parameter: "temp".into()
            })
        );
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let tree = text("source", "WS_in");
        assert_eq!(
            evaluate(&tree, &params(&[("source", 3.0.into())])),
            Err(EvalError::TypeMismatch {
                parameter: "source".into(),
                expected: ValueDomain::String,
                actual: "number",
            })
        );
    }

    #[test]
    fn short_circuit_skips_unreachable_errors() {
        let snapshot = params(&[("on", false.into())]);
        let tree = KpiNode::and(vec![flag("on", true), num("missing", Comparator::NumericEq, 0.0)]);
        assert_eq!(evaluate(&tree, &snapshot), Ok(false));

        let tree = KpiNode::or(vec![flag("on", false), num("missing", Comparator::NumericEq, 0.0)]);
        assert_eq!(evaluate(&tree, &snapshot), Ok(true));
    }

    /// Takes a tree apart without recursing through its nested drops.
    fn dismantle(node: KpiNode) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if let KpiNode::LogicalOperation(mut op) = node {
                stack.append(&mut op.children);
            }
        }
    }

    #[test]
    fn deep_chains_evaluate_on_a_small_stack() {
        let worker = std::thread::Builder::new()
            .stack_size(128 * 1024)
            .spawn(|| {
                let mut tree = num("temp", Comparator::NumericGeq, 20.0);
                for level in 0..100_000 {
                    tree = if level % 2 == 0 {
                        KpiNode::and(vec![flag("on", true), tree])
                    } else {
                        KpiNode::or(vec![flag("on", false), tree])
                    };
                }
                let warm = params(&[("temp", 22.0.into()), ("on", true.into())]);
                let cold = params(&[("temp", 3.0.into()), ("on", true.into())]);
                let outcome = (evaluate(&tree, &warm), evaluate(&tree, &cold));
                dismantle(tree);
                outcome
            })
            .unwrap();
        assert_eq!(worker.join().unwrap(), (Ok(true), Ok(false)));
    }
}
