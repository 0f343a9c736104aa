//! Data model for authored pipeline definitions.
//!
//! A definition file is a YAML document with a top-level `pipeline` key
//! describing the workflow (name, version, schedule, ordered steps) and an
//! optional `resources` key for platform-level settings. `parse` decodes
//! the document and enforces the structural invariants the generator
//! relies on: step names are unique and every `depends_on` entry names an
//! existing step. Cycle detection is deliberately not performed.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::errors::DefinitionError;

/// Top-level document in a definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionFile {
    pub pipeline: PipelineDefinition,
    #[serde(default)]
    pub resources: Option<Resources>,
}

/// Core pipeline metadata plus the ordered step sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub expression: String,
}

/// A discrete stage of the pipeline (ingestion, transformation, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<DataRef>,
    #[serde(default)]
    pub outputs: Vec<DataRef>,
    #[serde(default)]
    pub config: Option<serde_yaml::Value>,
    #[serde(default)]
    pub transformation_query: Option<String>,
    #[serde(default)]
    pub notifications: Option<Notifications>,
}

/// How a step addresses input or output data. Which addressing fields are
/// populated depends on the kind (`type` in the YAML): a postgres ref
/// carries host/database/table, an object-store ref carries a path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataRef {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub on_success: Vec<NotificationTarget>,
    #[serde(default)]
    pub on_failure: Vec<NotificationTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationTarget {
    pub method: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub compute_cluster: Option<String>,
    #[serde(default)]
    pub storage_location: Option<String>,
}

/// Parse and validate a definition file from raw bytes.
pub fn parse(source: &[u8]) -> Result<DefinitionFile, DefinitionError> {
    let file: DefinitionFile = serde_yaml::from_slice(source)?;
    file.pipeline.validate()?;
    Ok(file)
}

impl PipelineDefinition {
    /// Structural validation: unique step names, dependencies resolve.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(DefinitionError::DuplicateStep {
                    name: step.name.clone(),
                });
            }
        }
        for step in &self.steps {
            for dependency in &step.depends_on {
                if !names.contains(dependency.as_str()) {
                    return Err(DefinitionError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
