//! Shared fixtures for the store integration tests.

#![allow(dead_code)]

use kpi_types::{Comparator, KpiDefinition, KpiNode, ParameterRef, SdInstance, SdType, ValueDomain};
use kpi_store::{KpiStore, NewSdParameter, NewSdType};

pub struct Fixture {
    pub sd_type: SdType,
    pub instances: Vec<SdInstance>,
}

/// Registers a `shelly1pro` SD type (temp, source, on) with two instances.
pub fn seed(store: &impl KpiStore) -> Fixture {
    let sd_type = store
        .register_sd_type(&NewSdType {
            denotation: "shelly1pro".into(),
            parameters: vec![
                NewSdParameter {
                    name: "temp".into(),
                    domain: ValueDomain::Number,
                },
                NewSdParameter {
                    name: "source".into(),
                    domain: ValueDomain::String,
                },
                NewSdParameter {
                    name: "on".into(),
                    domain: ValueDomain::Boolean,
                },
            ],
        })
        .unwrap();
    let instances = ["shelly-a", "shelly-b"]
        .into_iter()
        .map(|uid| store.register_sd_instance(uid, sd_type.id).unwrap())
        .collect();
    Fixture { sd_type, instances }
}

pub fn param(sd_type: &SdType, name: &str) -> ParameterRef {
    let parameter = sd_type
        .parameters
        .iter()
        .find(|parameter| parameter.name == name)
        .unwrap();
    ParameterRef::new(parameter.id, name)
}

/// `AND(temp >= 20, temp <= 24, source == "WS_in")`
pub fn comfort_tree(sd_type: &SdType) -> KpiNode {
    KpiNode::and(vec![
        KpiNode::atom(param(sd_type, "temp"), Comparator::NumericGeq, 20.0).unwrap(),
        KpiNode::atom(param(sd_type, "temp"), Comparator::NumericLeq, 24.0).unwrap(),
        KpiNode::atom(param(sd_type, "source"), Comparator::StringEq, "WS_in").unwrap(),
    ])
}

/// `NOR(on == true, OR())`
pub fn relay_tree(sd_type: &SdType) -> KpiNode {
    KpiNode::nor(vec![
        KpiNode::atom(param(sd_type, "on"), Comparator::BooleanEq, true).unwrap(),
        KpiNode::or(vec![]),
    ])
}

pub fn definition(sd_type: &SdType, root: KpiNode) -> KpiDefinition {
    KpiDefinition::new(sd_type.to_ref(), "alice", root)
}
