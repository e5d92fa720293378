//! Stage and pipeline definitions.
//!
//! A `PipelineDefinition` is the base description of the processing
//! workflow. It is validated once on load and never mutated afterwards;
//! per-job changes go through the resolver and produce an
//! `EffectiveConfig` instead.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Option name → value mapping for a single stage.
///
/// Values are semantically typed per stage (resolution ladders,
/// thresholds, format lists) but stored untyped so that variants can
/// override them generically.
pub type StageConfiguration = Map<String, Value>;

/// Errors raised while validating a pipeline definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Stage '{0}' is defined more than once")]
    DuplicateStage(String),

    #[error("Stages '{first}' and '{second}' share order {order}")]
    DuplicateOrder {
        order: u32,
        first: String,
        second: String,
    },

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Stage '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Stage '{stage}' (order {stage_order}) depends on '{dependency}' (order {dependency_order}), which does not run before it")]
    OrderConflict {
        stage: String,
        stage_order: u32,
        dependency: String,
        dependency_order: u32,
    },
}

/// One discrete transformation step of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage key (e.g. `validation`, `transcoding`).
    pub name: String,

    /// Position in the default sequence.
    pub order: u32,

    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Whether the stage runs. In a base definition this is the
    /// enabled-by-default flag; variants may flip it.
    #[serde(default = "default_true", alias = "enabled_by_default")]
    pub enabled: bool,

    /// Stage options handed to the external compute function.
    #[serde(default)]
    pub configuration: StageConfiguration,

    /// Stages that must have succeeded before this one runs.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

fn default_true() -> bool {
    true
}

impl StageDefinition {
    /// Create an enabled stage with an empty configuration.
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
            description: String::new(),
            enabled: true,
            configuration: StageConfiguration::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Set the description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the enabled flag (builder pattern).
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the configuration from a JSON object. Non-object values are ignored.
    pub fn with_configuration(mut self, configuration: Value) -> Self {
        if let Value::Object(map) = configuration {
            self.configuration = map;
        }
        self
    }

    /// Add a dependency (builder pattern).
    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.insert(stage.into());
        self
    }

    /// Look up a configuration option.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.configuration.get(key)
    }
}

/// Lifecycle points at which hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    BeforeProcessing,
    AfterValidation,
    AfterAnalysis,
    AfterTranscoding,
    AfterCompletion,
}

impl HookPoint {
    /// All hook points in lifecycle order.
    pub const ALL: [HookPoint; 5] = [
        HookPoint::BeforeProcessing,
        HookPoint::AfterValidation,
        HookPoint::AfterAnalysis,
        HookPoint::AfterTranscoding,
        HookPoint::AfterCompletion,
    ];

    /// The hook that fires after the named stage succeeds, if any.
    pub fn after_stage(stage: &str) -> Option<HookPoint> {
        match stage {
            "validation" => Some(HookPoint::AfterValidation),
            "analysis" => Some(HookPoint::AfterAnalysis),
            "transcoding" => Some(HookPoint::AfterTranscoding),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::BeforeProcessing => "before-processing",
            HookPoint::AfterValidation => "after-validation",
            HookPoint::AfterAnalysis => "after-analysis",
            HookPoint::AfterTranscoding => "after-transcoding",
            HookPoint::AfterCompletion => "after-completion",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook name → optional external handler reference.
///
/// Handler references name observers registered with the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_processing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_validation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_transcoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_completion: Option<String>,
}

impl HookRefs {
    /// Handler reference for a hook point.
    pub fn get(&self, point: HookPoint) -> Option<&str> {
        let slot = match point {
            HookPoint::BeforeProcessing => &self.before_processing,
            HookPoint::AfterValidation => &self.after_validation,
            HookPoint::AfterAnalysis => &self.after_analysis,
            HookPoint::AfterTranscoding => &self.after_transcoding,
            HookPoint::AfterCompletion => &self.after_completion,
        };
        slot.as_deref()
    }

    /// Set the handler reference for a hook point.
    pub fn set(&mut self, point: HookPoint, handler: impl Into<String>) {
        let handler = Some(handler.into());
        match point {
            HookPoint::BeforeProcessing => self.before_processing = handler,
            HookPoint::AfterValidation => self.after_validation = handler,
            HookPoint::AfterAnalysis => self.after_analysis = handler,
            HookPoint::AfterTranscoding => self.after_transcoding = handler,
            HookPoint::AfterCompletion => self.after_completion = handler,
        }
    }

    /// Iterate over the hook points that reference a handler.
    pub fn iter(&self) -> impl Iterator<Item = (HookPoint, &str)> + '_ {
        HookPoint::ALL
            .into_iter()
            .filter_map(move |point| self.get(point).map(|handler| (point, handler)))
    }
}

/// Base description of the processing workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Definition version string.
    #[serde(default = "default_version")]
    pub version: String,

    /// Stages in declaration order.
    pub stages: Vec<StageDefinition>,

    /// Lifecycle hook handler references.
    #[serde(default)]
    pub hooks: HookRefs,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PipelineDefinition {
    /// Create a definition from stages with no hook references.
    pub fn new(stages: Vec<StageDefinition>) -> Self {
        Self {
            version: default_version(),
            stages,
            hooks: HookRefs::default(),
        }
    }

    /// Set a hook handler reference (builder pattern).
    pub fn with_hook(mut self, point: HookPoint, handler: impl Into<String>) -> Self {
        self.hooks.set(point, handler);
        self
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Stage names in declaration order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Check the structural invariants of the definition.
    ///
    /// Names and orders are unique, every dependency names another known
    /// stage, and every dependency has a strictly lower order than its
    /// dependent. The last rule makes `order` a total order consistent
    /// with `depends_on`, which also rules out cycles.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut orders: HashMap<&str, u32> = HashMap::with_capacity(self.stages.len());
        let mut by_order: HashMap<u32, &str> = HashMap::with_capacity(self.stages.len());

        for stage in &self.stages {
            if orders.insert(&stage.name, stage.order).is_some() {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()));
            }
            if let Some(first) = by_order.insert(stage.order, &stage.name) {
                return Err(DefinitionError::DuplicateOrder {
                    order: stage.order,
                    first: first.to_string(),
                    second: stage.name.clone(),
                });
            }
        }

        for stage in &self.stages {
            for dependency in &stage.depends_on {
                if dependency == &stage.name {
                    return Err(DefinitionError::SelfDependency(stage.name.clone()));
                }
                let Some(&dependency_order) = orders.get(dependency.as_str()) else {
                    return Err(DefinitionError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                if dependency_order >= stage.order {
                    return Err(DefinitionError::OrderConflict {
                        stage: stage.name.clone(),
                        stage_order: stage.order,
                        dependency: dependency.clone(),
                        dependency_order,
                    });
                }
            }
        }

        Ok(())
    }
}
