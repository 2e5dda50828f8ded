pub mod buffer;
pub mod catalog;
pub mod config;
pub mod connector;
pub mod error;
pub mod expr;
pub mod logging;
pub mod metrics;
pub mod pipeline;

pub use buffer::{Buffer, Column, DataType, Value};
pub use error::{ErrorKind, EtlError, Result};
pub use pipeline::{ExecutionResult, PipelineDefinition, PipelineExecutor, RunOptions};
