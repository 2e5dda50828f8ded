// Pipeline execution: definitions, the step registry, the executor and its hooks

pub mod definition;
pub mod executor;
pub mod hooks;
pub mod registry;
pub mod result;
pub mod steps;

pub use definition::{ConnectorRef, PipelineDefinition, SourcePlan, StepDefinition, TargetPlan};
pub use executor::{Phase, PipelineExecutor, RunOptions};
pub use hooks::{
    AssetCataloger, BiSyncResult, BiSyncer, CatalogAction, CatalogEntry, CatalogRequest,
    LineageUpdate, LineageUpdater, PostProcessors,
};
pub use registry::{StepFactory, StepRegistry};
pub use result::{ExecutionResult, ExecutionStatus, HookOutcome, StepMetric};
pub use steps::{Step, StepContext};
