use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::connector::{qualified_name, FileFormat, FileSpec, IfExists, ReadSpec, WriteSpec};
use crate::error::{EtlError, Result};

/// A declarative pipeline: where rows come from, how they are transformed and
/// where they go. Never mutated while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub name: String,
    pub source_type: String,
    #[serde(default)]
    pub source_config: serde_json::Value,
    pub target_type: String,
    #[serde(default)]
    pub target_config: serde_json::Value,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub step_type: String,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn enabled() -> bool {
    true
}

/// Step ids arrive as strings or bare integers depending on who wrote the file
fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(i) => i.to_string(),
    })
}

impl StepDefinition {
    pub fn new(
        id: impl Into<String>,
        step_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type: step_type.into(),
            config,
            order: 0,
            is_enabled: true,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    /// Name for logs and errors; falls back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Which connector a source or target resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorRef {
    Source(String),
    Warehouse,
    Files,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourcePlan {
    pub connector: ConnectorRef,
    pub read: ReadSpec,
}

impl SourcePlan {
    /// Qualified table name when reading a table, for lineage
    pub fn table_name(&self) -> Option<String> {
        match &self.read {
            ReadSpec::Table { table_name, schema } => {
                Some(qualified_name(schema.as_deref(), table_name))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetPlan {
    pub connector: ConnectorRef,
    pub write: WriteSpec,
    pub sync_to_bi: bool,
}

impl TargetPlan {
    /// `(table, schema)` when writing a table
    pub fn table(&self) -> Option<(&str, Option<&str>)> {
        match &self.write {
            WriteSpec::Table {
                table_name, schema, ..
            } => Some((table_name.as_str(), schema.as_deref())),
            WriteSpec::File { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableSourceConfig {
    source_id: String,
    table_name: String,
    #[serde(default)]
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuerySourceConfig {
    source_id: String,
    query: String,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    file_path: PathBuf,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    delimiter: Option<char>,
    #[serde(default)]
    if_exists: Option<IfExists>,
}

#[derive(Debug, Deserialize)]
struct TableTargetConfig {
    table_name: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    if_exists: IfExists,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    sync_to_bi: bool,
}

fn parse<C: serde::de::DeserializeOwned>(what: &str, config: &serde_json::Value) -> Result<C> {
    serde_json::from_value(config.clone())
        .map_err(|e| EtlError::config(format!("invalid {what} config: {e}")))
}

impl FileConfig {
    fn spec(&self) -> Result<FileSpec> {
        let format = match &self.format {
            Some(name) => FileFormat::parse(name)?,
            None => FileFormat::from_path(&self.file_path)?,
        };
        let mut spec = FileSpec::new(self.file_path.clone(), format);
        if let Some(delimiter) = self.delimiter {
            spec.delimiter = u8::try_from(delimiter).map_err(|_| {
                EtlError::config(format!("delimiter '{delimiter}' is not a single byte"))
            })?;
        } else if self
            .file_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"))
        {
            spec.delimiter = b'\t';
        }
        Ok(spec)
    }
}

impl PipelineDefinition {
    /// Load a definition from a `.json` or `.toml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            EtlError::config(format!("cannot read pipeline '{}': {e}", path.display()))
        })?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Ok(toml::from_str(&text)?)
        } else {
            serde_json::from_str(&text).map_err(|e| {
                EtlError::config(format!("invalid pipeline '{}': {e}", path.display()))
            })
        }
    }

    /// Enabled steps, stably sorted by `order`
    pub fn execution_plan(&self) -> Vec<&StepDefinition> {
        let mut plan: Vec<&StepDefinition> = self.steps.iter().filter(|s| s.is_enabled).collect();
        plan.sort_by_key(|s| s.order);
        plan
    }

    pub fn source(&self) -> Result<SourcePlan> {
        match self.source_type.as_str() {
            "table" => {
                let c: TableSourceConfig = parse("table source", &self.source_config)?;
                Ok(SourcePlan {
                    connector: ConnectorRef::Source(c.source_id),
                    read: ReadSpec::Table {
                        table_name: c.table_name,
                        schema: c.schema,
                    },
                })
            }
            "query" => {
                let c: QuerySourceConfig = parse("query source", &self.source_config)?;
                Ok(SourcePlan {
                    connector: ConnectorRef::Source(c.source_id),
                    read: ReadSpec::Query(c.query),
                })
            }
            "file" => {
                let c: FileConfig = parse("file source", &self.source_config)?;
                Ok(SourcePlan {
                    connector: ConnectorRef::Files,
                    read: ReadSpec::File(c.spec()?),
                })
            }
            other => Err(EtlError::config(format!("Unknown source type: {other}"))),
        }
    }

    pub fn target(&self) -> Result<TargetPlan> {
        match self.target_type.as_str() {
            "table" => {
                let c: TableTargetConfig = parse("table target", &self.target_config)?;
                Ok(TargetPlan {
                    connector: c.source_id.map_or(ConnectorRef::Warehouse, ConnectorRef::Source),
                    write: WriteSpec::Table {
                        table_name: c.table_name,
                        schema: c.schema,
                        if_exists: c.if_exists,
                    },
                    sync_to_bi: c.sync_to_bi,
                })
            }
            "file" => {
                let c: FileConfig = parse("file target", &self.target_config)?;
                let sync_to_bi = self
                    .target_config
                    .get("sync_to_bi")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                Ok(TargetPlan {
                    connector: ConnectorRef::Files,
                    write: WriteSpec::File {
                        file: c.spec()?,
                        if_exists: c.if_exists.unwrap_or(IfExists::Replace),
                    },
                    sync_to_bi,
                })
            }
            other => Err(EtlError::config(format!("Unknown target type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn definition(source_type: &str, source_config: serde_json::Value) -> PipelineDefinition {
        PipelineDefinition {
            name: "orders".into(),
            source_type: source_type.into(),
            source_config,
            target_type: "table".into(),
            target_config: json!({"table_name": "orders_clean"}),
            steps: vec![],
        }
    }

    #[test]
    fn test_execution_plan_is_stable_and_skips_disabled() {
        let mut def = definition("table", json!({}));
        def.steps = vec![
            StepDefinition::new("a", "filter", json!({})).with_order(2),
            StepDefinition::new("b", "rename", json!({})).with_order(1),
            StepDefinition::new("c", "sort", json!({})).with_order(1).disabled(),
            StepDefinition::new("d", "mask", json!({})).with_order(1),
            StepDefinition::new("e", "sort", json!({})).with_order(-5),
        ];
        let ids: Vec<&str> = def.execution_plan().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["e", "b", "d", "a"]);
    }

    #[test]
    fn test_source_plans() {
        let plan = definition(
            "table",
            json!({"source_id": "crm", "table_name": "orders", "schema": "sales"}),
        )
        .source()
        .unwrap();
        assert_eq!(plan.connector, ConnectorRef::Source("crm".into()));
        assert_eq!(plan.table_name().as_deref(), Some("sales.orders"));

        let plan = definition("file", json!({"file_path": "data/in.tsv"})).source().unwrap();
        match plan.read {
            ReadSpec::File(spec) => {
                assert_eq!(spec.format, FileFormat::Csv);
                assert_eq!(spec.delimiter, b'\t');
            }
            other => panic!("unexpected read spec {other:?}"),
        }
    }

    #[test]
    fn test_unknown_source_type_is_configuration() {
        let err = definition("ftp", json!({})).source().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("Unknown source type"));
    }

    #[test]
    fn test_target_defaults() {
        let def = definition("table", json!({}));
        let plan = def.target().unwrap();
        assert_eq!(plan.connector, ConnectorRef::Warehouse);
        assert!(matches!(
            plan.write,
            WriteSpec::Table {
                if_exists: IfExists::Append,
                ..
            }
        ));

        let mut def = definition("table", json!({}));
        def.target_type = "file".into();
        def.target_config = json!({"file_path": "out.json"});
        let plan = def.target().unwrap();
        assert!(matches!(
            plan.write,
            WriteSpec::File {
                if_exists: IfExists::Replace,
                ..
            }
        ));
    }

    #[test]
    fn test_load_toml_with_numeric_ids() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
name = "daily"
source_type = "query"
target_type = "file"

[source_config]
source_id = "crm"
query = "select * from orders"

[target_config]
file_path = "out.csv"

[[steps]]
id = 7
step_type = "filter"
order = 1

[steps.config]
conditions = [{{ column = "status", operator = "eq", value = "open" }}]
"#
        )
        .unwrap();
        let def = PipelineDefinition::load(file.path()).unwrap();
        assert_eq!(def.name, "daily");
        assert_eq!(def.steps[0].id, "7");
        assert!(def.steps[0].is_enabled);
        assert_eq!(def.steps[0].config["conditions"][0]["operator"], "eq");
    }
}
