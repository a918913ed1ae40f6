//! Static catalog of governance flag definitions.
//!
//! Definitions are loaded once at construction and immutable afterwards.
//! Validation rejects duplicate names, workflow dependencies that do not
//! name a registered component flag, and emergency `affects` sets that
//! reference unregistered names.

use govcore_common::{FlagDefinition, FlagTier, GovError};
use std::collections::HashMap;

/// Name of the break-glass flag that forces every read to `false` and
/// refuses every ordinary mutation while active.
pub const EMERGENCY_DISABLE_ALL: &str = "emergency_disable_all";

/// Workflow flag gating the movement/ledger pairing policy.
pub const MOVEMENT_LEDGER_PAIRING: &str = "movement_ledger_pairing";

/// Immutable flag catalog, keyed by tier and name.
pub struct FlagRegistry {
    components: HashMap<String, FlagDefinition>,
    workflows: HashMap<String, FlagDefinition>,
    emergencies: HashMap<String, FlagDefinition>,
}

impl FlagRegistry {
    /// Build a registry from explicit definitions.
    pub fn new(definitions: Vec<FlagDefinition>) -> Result<Self, GovError> {
        let mut registry = Self {
            components: HashMap::new(),
            workflows: HashMap::new(),
            emergencies: HashMap::new(),
        };

        for def in definitions {
            let map = registry.tier_map_mut(def.tier);
            if map.contains_key(&def.name) {
                return Err(GovError::InvalidCatalog(format!(
                    "duplicate {} flag '{}'",
                    def.tier, def.name
                )));
            }
            map.insert(def.name.clone(), def);
        }

        registry.validate_references()?;
        Ok(registry)
    }

    /// Build a registry from the built-in catalog plus extra definitions.
    pub fn with_builtin(extra: Vec<FlagDefinition>) -> Result<Self, GovError> {
        let mut definitions = builtin_definitions();
        definitions.extend(extra);
        Self::new(definitions)
    }

    /// Look up a definition by tier and name.
    pub fn get(&self, tier: FlagTier, name: &str) -> Option<&FlagDefinition> {
        self.tier_map(tier).get(name)
    }

    /// Whether a flag is registered in the given tier.
    pub fn contains(&self, tier: FlagTier, name: &str) -> bool {
        self.tier_map(tier).contains_key(name)
    }

    /// All definitions in a tier, in unspecified order.
    pub fn definitions(&self, tier: FlagTier) -> impl Iterator<Item = &FlagDefinition> {
        self.tier_map(tier).values()
    }

    fn tier_map(&self, tier: FlagTier) -> &HashMap<String, FlagDefinition> {
        match tier {
            FlagTier::Component => &self.components,
            FlagTier::Workflow => &self.workflows,
            FlagTier::Emergency => &self.emergencies,
        }
    }

    fn tier_map_mut(&mut self, tier: FlagTier) -> &mut HashMap<String, FlagDefinition> {
        match tier {
            FlagTier::Component => &mut self.components,
            FlagTier::Workflow => &mut self.workflows,
            FlagTier::Emergency => &mut self.emergencies,
        }
    }

    fn validate_references(&self) -> Result<(), GovError> {
        for def in self.workflows.values() {
            for dep in &def.dependencies {
                if !self.components.contains_key(dep) {
                    return Err(GovError::InvalidCatalog(format!(
                        "workflow '{}' depends on unregistered component '{}'",
                        def.name, dep
                    )));
                }
            }
            for component in &def.affects_components {
                if !self.components.contains_key(component) {
                    return Err(GovError::InvalidCatalog(format!(
                        "workflow '{}' names unregistered component '{}' for rollback",
                        def.name, component
                    )));
                }
            }
        }
        for def in self.components.values() {
            for workflow in &def.affected_workflows {
                if !self.workflows.contains_key(workflow) {
                    return Err(GovError::InvalidCatalog(format!(
                        "component '{}' affects unregistered workflow '{}'",
                        def.name, workflow
                    )));
                }
            }
        }
        for def in self.emergencies.values() {
            for component in &def.affects_components {
                if !self.components.contains_key(component) {
                    return Err(GovError::InvalidCatalog(format!(
                        "emergency '{}' affects unregistered component '{}'",
                        def.name, component
                    )));
                }
            }
            for workflow in &def.affects_workflows {
                if !self.workflows.contains_key(workflow) {
                    return Err(GovError::InvalidCatalog(format!(
                        "emergency '{}' affects unregistered workflow '{}'",
                        def.name, workflow
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Built-in flag catalog for the governance core.
pub fn builtin_definitions() -> Vec<FlagDefinition> {
    let mut gateway = FlagDefinition::new("gateway_enforcement", FlagTier::Component, true);
    gateway.critical = true;
    gateway.affected_workflows = ["fee_to_ledger", "movement_ledger_pairing"]
        .into_iter()
        .map(String::from)
        .collect();
    gateway.description = "Routes all financial postings through the ledger gateway".to_string();

    let mut stock_validation = FlagDefinition::new("stock_validation", FlagTier::Component, true);
    stock_validation.critical = true;
    stock_validation.description = "Strict validation of stock movement requests".to_string();

    let mut audit_pipeline = FlagDefinition::new("audit_pipeline", FlagTier::Component, true);
    audit_pipeline.description = "Structured audit trail for mutating operations".to_string();

    let mut fee_to_ledger = FlagDefinition::new("fee_to_ledger", FlagTier::Workflow, false);
    fee_to_ledger.dependencies = ["gateway_enforcement"].into_iter().map(String::from).collect();
    fee_to_ledger.description = "Post service fees straight to the ledger".to_string();

    let mut movement_pairing =
        FlagDefinition::new(MOVEMENT_LEDGER_PAIRING, FlagTier::Workflow, true);
    movement_pairing.critical = true;
    movement_pairing.dependencies = ["gateway_enforcement"]
        .into_iter()
        .map(String::from)
        .collect();
    movement_pairing.affects_components = ["gateway_enforcement"]
        .into_iter()
        .map(String::from)
        .collect();
    movement_pairing.description =
        "Pair every stock movement with a balanced ledger entry".to_string();

    let mut disable_all = FlagDefinition::new(EMERGENCY_DISABLE_ALL, FlagTier::Emergency, false);
    disable_all.critical = true;
    disable_all.description = "Break-glass: force every enforcement read to false".to_string();

    let mut disable_ledger =
        FlagDefinition::new("emergency_disable_ledger", FlagTier::Emergency, false);
    disable_ledger.critical = true;
    disable_ledger.affects_components =
        ["gateway_enforcement"].into_iter().map(String::from).collect();
    disable_ledger.affects_workflows = ["fee_to_ledger", "movement_ledger_pairing"]
        .into_iter()
        .map(String::from)
        .collect();
    disable_ledger.description =
        "Break-glass: suspend ledger-coupled enforcement only".to_string();

    vec![
        gateway,
        stock_validation,
        audit_pipeline,
        fee_to_ledger,
        movement_pairing,
        disable_all,
        disable_ledger,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let registry = FlagRegistry::with_builtin(vec![]).unwrap();
        assert!(registry.contains(FlagTier::Component, "gateway_enforcement"));
        assert!(registry.contains(FlagTier::Workflow, "movement_ledger_pairing"));
        assert!(registry.contains(FlagTier::Emergency, EMERGENCY_DISABLE_ALL));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let defs = vec![
            FlagDefinition::new("x", FlagTier::Component, false),
            FlagDefinition::new("x", FlagTier::Component, true),
        ];
        assert!(matches!(
            FlagRegistry::new(defs),
            Err(GovError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_same_name_in_different_tiers_allowed() {
        let defs = vec![
            FlagDefinition::new("x", FlagTier::Component, false),
            FlagDefinition::new("x", FlagTier::Workflow, false),
        ];
        assert!(FlagRegistry::new(defs).is_ok());
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let mut wf = FlagDefinition::new("wf", FlagTier::Workflow, false);
        wf.dependencies = ["missing"].into_iter().map(String::from).collect();
        assert!(matches!(
            FlagRegistry::new(vec![wf]),
            Err(GovError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_dangling_workflow_rollback_component_rejected() {
        let mut wf = FlagDefinition::new("wf", FlagTier::Workflow, false);
        wf.affects_components = ["missing"].into_iter().map(String::from).collect();
        assert!(matches!(
            FlagRegistry::new(vec![wf]),
            Err(GovError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_dangling_affected_workflow_rejected() {
        let mut component = FlagDefinition::new("c", FlagTier::Component, false);
        component.affected_workflows = ["missing"].into_iter().map(String::from).collect();
        assert!(matches!(
            FlagRegistry::new(vec![component]),
            Err(GovError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_emergency_affects_are_checked_per_tier() {
        let mut emergency = FlagDefinition::new("e", FlagTier::Emergency, false);
        emergency.affects_workflows = ["not_a_workflow"].into_iter().map(String::from).collect();
        assert!(matches!(
            FlagRegistry::new(vec![emergency]),
            Err(GovError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_lookup_is_tier_scoped() {
        let registry = FlagRegistry::with_builtin(vec![]).unwrap();
        assert!(registry.get(FlagTier::Workflow, "gateway_enforcement").is_none());
        assert!(registry.get(FlagTier::Component, "gateway_enforcement").is_some());
    }
}
