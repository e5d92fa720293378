//! Stage registry: the ordered catalog of known stages.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::models::{DefinitionError, EffectiveConfig, PipelineDefinition, StageDefinition};

/// Errors raised while computing a job's stage sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Enabled stage '{stage}' depends on disabled stage '{dependency}'")]
    DependencyViolation { stage: String, dependency: String },

    #[error("Stage '{0}' is not registered")]
    UnknownStage(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone)]
struct RegisteredStage {
    order: u32,
    depends_on: BTreeSet<String>,
}

/// Known stages with their declared order and dependencies.
///
/// Built once from the validated base definition. Dependencies always come
/// from the registry, so a resolved configuration cannot relax them.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: BTreeMap<String, RegisteredStage>,
}

impl StageRegistry {
    /// Build a registry from a base definition, validating it first.
    pub fn new(definition: &PipelineDefinition) -> Result<Self, DefinitionError> {
        definition.validate()?;
        let stages = definition
            .stages
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    RegisteredStage {
                        order: s.order,
                        depends_on: s.depends_on.clone(),
                    },
                )
            })
            .collect();
        Ok(Self { stages })
    }

    /// Registered stage names sorted by order.
    pub fn stage_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, u32)> = self
            .stages
            .iter()
            .map(|(name, s)| (name.as_str(), s.order))
            .collect();
        names.sort_by_key(|&(_, order)| order);
        names.into_iter().map(|(name, _)| name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Declared dependencies of a stage.
    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.stages.get(name).map(|s| &s.depends_on)
    }

    /// The stages a job will run: enabled only, sorted by `order`.
    ///
    /// Fails with `DependencyViolation` when an enabled stage depends on a
    /// stage that is disabled in `effective`.
    pub fn ordered_stages(&self, effective: &EffectiveConfig) -> RegistryResult<Vec<StageDefinition>> {
        let mut enabled = Vec::new();
        for stage in effective.stages() {
            if !self.contains(&stage.name) {
                return Err(RegistryError::UnknownStage(stage.name.clone()));
            }
            if stage.enabled {
                enabled.push(stage);
            }
        }

        for stage in &enabled {
            let declared = self.dependencies(&stage.name).into_iter().flatten();
            for dependency in declared {
                if !effective.is_enabled(dependency) {
                    return Err(RegistryError::DependencyViolation {
                        stage: stage.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let mut ordered: Vec<StageDefinition> = enabled.into_iter().cloned().collect();
        ordered.sort_by_key(|s| s.order);
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{standard_definition, standard_variants, StageOverride, Variant, VariantRegistry};
    use crate::resolver::ConfigResolver;

    fn names(stages: &[StageDefinition]) -> Vec<&str> {
        stages.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn base_sequence_skips_disabled_stages() {
        let base = standard_definition();
        let registry = StageRegistry::new(&base).unwrap();
        let effective = ConfigResolver::default().resolve(&base, None).unwrap();

        let ordered = registry.ordered_stages(&effective).unwrap();
        assert_eq!(
            names(&ordered),
            vec!["validation", "extraction", "analysis", "transcoding", "thumbnail", "distribution"]
        );
    }

    #[test]
    fn premium_enables_enhancement() {
        let base = standard_definition();
        let registry = StageRegistry::new(&base).unwrap();
        let effective = ConfigResolver::new(standard_variants())
            .resolve(&base, Some("premium"))
            .unwrap();

        let ordered = registry.ordered_stages(&effective).unwrap();
        assert!(names(&ordered).contains(&"enhancement"));
        assert!(ordered.windows(2).all(|w| w[0].order < w[1].order));
    }

    #[test]
    fn sequence_is_sorted_by_order() {
        let base = PipelineDefinition::new(vec![
            StageDefinition::new("late", 9),
            StageDefinition::new("early", 1),
        ]);
        let registry = StageRegistry::new(&base).unwrap();
        let effective = ConfigResolver::default().resolve(&base, None).unwrap();
        assert_eq!(names(&registry.ordered_stages(&effective).unwrap()), vec!["early", "late"]);
    }

    #[test]
    fn disabled_dependency_is_a_violation() {
        let base = standard_definition();
        let registry = StageRegistry::new(&base).unwrap();
        let variants = VariantRegistry::new().with_variant(
            "no-thumbs",
            Variant::default().with_override("thumbnail", StageOverride::enabled(false)),
        );
        let effective = ConfigResolver::new(variants)
            .resolve(&base, Some("no-thumbs"))
            .unwrap();

        let err = registry.ordered_stages(&effective).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DependencyViolation {
                stage: "distribution".to_string(),
                dependency: "thumbnail".to_string(),
            }
        );
    }

    #[test]
    fn stage_names_follow_order() {
        let registry = StageRegistry::new(&standard_definition()).unwrap();
        assert_eq!(registry.stage_names().first(), Some(&"validation"));
        assert_eq!(registry.stage_names().last(), Some(&"distribution"));
    }
}
