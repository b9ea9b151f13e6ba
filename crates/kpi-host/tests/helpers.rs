//! Shared fixtures for the host integration tests.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use kpi_host::{HostError, HostResult, ResultPublisher};
use kpi_store::{KpiStore, NewSdParameter, NewSdType};
use kpi_types::{
    Comparator, FulfillmentCheckRequest, FulfillmentCheckResult, KpiDefinition, KpiNode,
    ParameterRef, SdType, SdTypeRef, ValueDomain,
};
use serde_json::Value as JsonValue;

/// Collects every published result.
#[derive(Default)]
pub struct RecordingPublisher {
    results: Mutex<Vec<FulfillmentCheckResult>>,
}

impl RecordingPublisher {
    pub fn results(&self) -> Vec<FulfillmentCheckResult> {
        let mut results = self.results.lock().unwrap().clone();
        results.sort_by_key(|result| (result.definition_id, result.instance_uid.clone()));
        results
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, result: FulfillmentCheckResult) -> HostResult<()> {
        self.results.lock().unwrap().push(result);
        Ok(())
    }
}

/// Publisher whose broker connection is gone.
pub struct ClosedPublisher;

#[async_trait]
impl ResultPublisher for ClosedPublisher {
    async fn publish(&self, _result: FulfillmentCheckResult) -> HostResult<()> {
        Err(HostError::ChannelClosed("result"))
    }
}

/// Publisher whose broker never acknowledges.
pub struct StalledPublisher;

#[async_trait]
impl ResultPublisher for StalledPublisher {
    async fn publish(&self, _result: FulfillmentCheckResult) -> HostResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// `AND` of `atoms` copies of `temp >= 20`; slow enough to overrun a millisecond budget.
pub fn wide_tree(atoms: usize) -> KpiNode {
    let atom = KpiNode::atom(ParameterRef::new(1, "temp"), Comparator::NumericGeq, 20.0).unwrap();
    KpiNode::and(vec![atom; atoms])
}

pub fn request(instance_uid: &str, sd_type: &str, parameters: JsonValue) -> FulfillmentCheckRequest {
    let JsonValue::Object(parameters) = parameters else {
        panic!("parameters must be a JSON object");
    };
    FulfillmentCheckRequest {
        timestamp: 1_700_000_000.0,
        instance_uid: instance_uid.into(),
        sd_type_specification: sd_type.into(),
        parameters,
    }
}

/// `AND(temp >= 20, temp <= 24, source == "WS_in")` with parameter ids 1 and 2.
pub fn comfort_tree() -> KpiNode {
    comfort_tree_with(1, 2)
}

pub fn comfort_tree_with(temp_id: u32, source_id: u32) -> KpiNode {
    KpiNode::and(vec![
        KpiNode::atom(ParameterRef::new(temp_id, "temp"), Comparator::NumericGeq, 20.0).unwrap(),
        KpiNode::atom(ParameterRef::new(temp_id, "temp"), Comparator::NumericLeq, 24.0).unwrap(),
        KpiNode::atom(ParameterRef::new(source_id, "source"), Comparator::StringEq, "WS_in")
            .unwrap(),
    ])
}

/// `NOR(country == "Czechia")`
pub fn country_tree(country_id: u32) -> KpiNode {
    KpiNode::nor(vec![
        KpiNode::atom(ParameterRef::new(country_id, "country"), Comparator::StringEq, "Czechia")
            .unwrap(),
    ])
}

pub fn definition(id: u32, sd_type: &str, root: KpiNode) -> KpiDefinition {
    KpiDefinition::new(SdTypeRef::new(1, sd_type), "alice", root).with_id(id)
}

/// Registers `weather-station` (temp, source, country) and instances `ws-1`, `ws-2`.
pub fn seed_weather_station(store: &impl KpiStore) -> SdType {
    let sd_type = store
        .register_sd_type(&NewSdType {
            denotation: "weather-station".into(),
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
                    name: "country".into(),
                    domain: ValueDomain::String,
                },
            ],
        })
        .unwrap();
    for uid in ["ws-1", "ws-2"] {
        store.register_sd_instance(uid, sd_type.id).unwrap();
    }
    sd_type
}

pub fn parameter_id(sd_type: &SdType, name: &str) -> u32 {
    sd_type
        .parameters
        .iter()
        .find(|parameter| parameter.name == name)
        .map(|parameter| parameter.id)
        .unwrap()
}
