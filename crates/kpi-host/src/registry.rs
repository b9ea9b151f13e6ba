//! Process-wide cache of the KPI definitions a processing unit evaluates, grouped by SD type
//! specification. Replaced wholesale on every configuration update.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use kpi_types::transport::decode_configuration_update;
use kpi_types::{KpiConfigurationUpdate, KpiDefinition, TransportError};

/// One immutable generation of the registry.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    by_sd_type: IndexMap<String, Vec<Arc<KpiDefinition>>>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Definitions registered for an SD type; empty when the type is unknown.
    pub fn definitions_for(&self, sd_type_specification: &str) -> &[Arc<KpiDefinition>] {
        self.by_sd_type
            .get(sd_type_specification)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn sd_types(&self) -> impl Iterator<Item = &str> {
        self.by_sd_type.keys().map(String::as_str)
    }

    pub fn definition_count(&self) -> usize {
        self.by_sd_type.values().map(Vec::len).sum()
    }
}

/// Readers clone the current snapshot pointer; writers swap in a new one. Neither holds the lock
/// longer than that.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        // The guarded value is only ever replaced whole, so a poisoned lock still holds a
        // consistent snapshot.
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    /// Decodes a configuration update and installs it as the next generation.
    ///
    /// A malformed update leaves the current generation in place.
    pub fn apply_update(&self, update: &KpiConfigurationUpdate) -> Result<u64, TransportError> {
        let decoded = decode_configuration_update(update)?;
        Ok(self.replace(decoded))
    }

    /// Installs `definitions` as the next generation and returns its number.
    pub fn replace(&self, definitions: IndexMap<String, Vec<KpiDefinition>>) -> u64 {
        let by_sd_type: IndexMap<_, _> = definitions
            .into_iter()
            .map(|(sd_type, group)| (sd_type, group.into_iter().map(Arc::new).collect()))
            .collect();
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = RegistrySnapshot {
            generation: guard.generation + 1,
            by_sd_type,
        };
        let generation = snapshot.generation;
        let definitions = snapshot.definition_count();
        *guard = Arc::new(snapshot);
        drop(guard);
        tracing::info!(generation, definitions, "KPI definition registry replaced");
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpi_types::transport::build_configuration_update;
    use kpi_types::{Comparator, KpiNode, ParameterRef, SdTypeRef};

    fn definition(id: u32, sd_type: &str) -> KpiDefinition {
        let root = KpiNode::and(vec![
            KpiNode::atom(ParameterRef::new(1, "temp"), Comparator::NumericGt, 20.0).unwrap(),
        ]);
        KpiDefinition::new(SdTypeRef::new(1, sd_type), "alice", root).with_id(id)
    }

    #[test]
    fn starts_empty() {
        let registry = DefinitionRegistry::new();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.definitions_for("shelly1pro").is_empty());
    }

    #[test]
    fn update_replaces_whole_mapping() {
        let registry = DefinitionRegistry::new();
        let first = build_configuration_update(&[
            definition(1, "shelly1pro"),
            definition(2, "weather-station"),
        ])
        .unwrap();
        assert_eq!(registry.apply_update(&first).unwrap(), 1);
        let before = registry.snapshot();

        let second = build_configuration_update(&[definition(3, "shelly1pro")]).unwrap();
        assert_eq!(registry.apply_update(&second).unwrap(), 2);
        let after = registry.snapshot();

        assert_eq!(before.definition_count(), 2);
        assert_eq!(before.definitions_for("shelly1pro")[0].id, Some(1));
        assert_eq!(after.definitions_for("shelly1pro")[0].id, Some(3));
        assert!(after.definitions_for("weather-station").is_empty());
    }

    #[test]
    fn malformed_update_keeps_previous_generation() {
        let registry = DefinitionRegistry::new();
        let good = build_configuration_update(&[definition(1, "shelly1pro")]).unwrap();
        registry.apply_update(&good).unwrap();

        let mut bad = good.clone();
        if let Some(group) = bad.get_mut("shelly1pro") {
            group[0].nodes.clear();
        }
        assert!(registry.apply_update(&bad).is_err());
        assert_eq!(registry.generation(), 1);
        assert_eq!(registry.snapshot().definition_count(), 1);
    }
}
