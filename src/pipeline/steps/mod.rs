//! Built-in transformation steps.
//!
//! Every step is built once from its JSON config by a registry factory, then
//! consumes the previous step's buffer and returns a new one. Config problems
//! surface at build time as configuration errors; anything that goes wrong while
//! processing becomes a step execution error once the executor tags it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::buffer::Buffer;
use crate::connector::ConnectorProvider;
use crate::error::{EtlError, Result};

pub mod aggregate;
pub mod calculate;
pub mod columns;
pub mod custom_code;
pub mod deduplicate;
pub mod fill_missing;
pub mod filter;
pub mod join;
pub mod map_values;
pub mod mask;
pub mod rename;
pub mod sort;
pub mod type_cast;

pub use aggregate::AggregateStep;
pub use calculate::CalculateStep;
pub use columns::{DropColumnsStep, SelectColumnsStep};
pub use custom_code::CustomCodeStep;
pub use deduplicate::DeduplicateStep;
pub use fill_missing::FillMissingStep;
pub use filter::FilterStep;
pub use join::JoinStep;
pub use map_values::MapValuesStep;
pub use mask::MaskStep;
pub use rename::RenameStep;
pub use sort::SortStep;
pub use type_cast::TypeCastStep;

/// What a step may reach beyond its input buffer
pub struct StepContext<'a> {
    pub connectors: &'a dyn ConnectorProvider,
    /// Cap on rows read from a join's secondary source
    pub join_row_limit: Option<usize>,
}

/// One configured transformation
#[async_trait]
pub trait Step: Send + Sync {
    /// Registry tag this step was built from
    fn step_type(&self) -> &'static str;

    async fn process(&self, buffer: Buffer, ctx: &StepContext<'_>) -> Result<Buffer>;
}

/// Deserialize a step config; a missing config counts as an empty object
pub(crate) fn parse_config<C: DeserializeOwned>(
    step_type: &str,
    config: &serde_json::Value,
) -> Result<C> {
    let value = if config.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| EtlError::config(format!("invalid {step_type} config: {e}")))
}

/// A column list given either as one name or as an array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}
