use std::collections::HashMap;
use std::sync::Arc;

use super::steps::{
    AggregateStep, CalculateStep, CustomCodeStep, DeduplicateStep, DropColumnsStep, FillMissingStep,
    FilterStep, JoinStep, MapValuesStep, MaskStep, RenameStep, SelectColumnsStep, SortStep, Step,
    TypeCastStep,
};
use crate::config::EngineSettings;
use crate::error::{EtlError, Result};

/// Builds a step from its JSON config
pub type StepFactory = Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn Step>> + Send + Sync>;

/// Maps step-type tags to factories. The executor only ever talks to this, so new
/// step kinds plug in through [`StepRegistry::register`].
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

macro_rules! builtin {
    ($registry:ident, $tag:literal, $step:ty) => {
        $registry.register($tag, |config: &serde_json::Value| {
            Ok(Box::new(<$step>::from_config(config)?) as Box<dyn Step>)
        });
    };
}

impl StepRegistry {
    /// A registry with nothing in it
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in step except `custom_code`
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtin!(registry, "filter", FilterStep);
        builtin!(registry, "deduplicate", DeduplicateStep);
        builtin!(registry, "map_values", MapValuesStep);
        builtin!(registry, "join", JoinStep);
        builtin!(registry, "calculate", CalculateStep);
        builtin!(registry, "fill_missing", FillMissingStep);
        builtin!(registry, "mask", MaskStep);
        builtin!(registry, "rename", RenameStep);
        builtin!(registry, "type_cast", TypeCastStep);
        builtin!(registry, "aggregate", AggregateStep);
        builtin!(registry, "sort", SortStep);
        builtin!(registry, "drop_columns", DropColumnsStep);
        builtin!(registry, "select_columns", SelectColumnsStep);
        registry
    }

    /// Opt in to the expression-program step
    pub fn with_custom_code(self) -> Self {
        let mut registry = self;
        builtin!(registry, "custom_code", CustomCodeStep);
        registry
    }

    pub fn for_settings(settings: &EngineSettings) -> Self {
        let registry = Self::builtin();
        if settings.allow_custom_code {
            registry.with_custom_code()
        } else {
            registry
        }
    }

    pub fn register<F>(&mut self, step_type: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Step>> + Send + Sync + 'static,
    {
        self.factories.insert(step_type.into(), Arc::new(factory));
    }

    pub fn resolve(&self, step_type: &str) -> Result<StepFactory> {
        self.factories
            .get(step_type)
            .cloned()
            .ok_or_else(|| EtlError::config(format!("Unknown step type: {step_type}")))
    }

    /// Resolve and construct in one go
    pub fn build(&self, step_type: &str, config: &serde_json::Value) -> Result<Box<dyn Step>> {
        let factory = self.resolve(step_type)?;
        factory(config)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}
