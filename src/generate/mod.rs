//! Pure pipeline-definition to Airflow-DAG transformation.
//!
//! Template resources are embedded at compile time and selected by the
//! definition's declared version (`dag_template.py.tmpl.<version>`).
//! Parameter derivation and rendering perform no I/O, so the generator is
//! safe to call from anywhere, including the `generate` CLI subcommand.

use std::path::PathBuf;

use rust_embed::RustEmbed;

use crate::definition::{DataRef, PipelineDefinition, Step};
use crate::errors::GenerateError;

#[derive(RustEmbed)]
#[folder = "templates/"]
struct Templates;

const TEMPLATE_BASE: &str = "dag_template.py.tmpl";

/// Rendered schedule value when a definition carries no schedule.
pub const UNSCHEDULED: &str = "None";

/// Task identifier used when a definition declares no steps.
pub const DEFAULT_TASK_NAME: &str = "default_task";

/// Source systems whose addressing fields flow into the template, matched
/// case-insensitively as substrings of a DataRef kind.
const POSTGRES: &str = "postgres";
const SNOWFLAKE: &str = "snowflake";

/// A rendered orchestration file, ready to be written into the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub path: PathBuf,
    pub content: Vec<u8>,
}

/// Parameters substituted into a DAG template. Unmatched source systems
/// render as empty strings rather than failing generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParams {
    pub pipeline_name: String,
    pub pipeline_description: String,
    pub schedule_interval: String,
    pub task_name: String,
    pub postgres_host: String,
    pub postgres_database: String,
    pub postgres_table: String,
    pub snowflake_table: String,
}

impl TemplateParams {
    pub fn derive(def: &PipelineDefinition) -> Self {
        let postgres = find_data_ref(&def.steps, POSTGRES);
        let snowflake = find_data_ref(&def.steps, SNOWFLAKE);

        Self {
            pipeline_name: def.name.clone(),
            pipeline_description: def.description.clone(),
            schedule_interval: schedule_interval(def),
            task_name: def
                .steps
                .first()
                .map(|step| step.name.clone())
                .unwrap_or_else(|| DEFAULT_TASK_NAME.to_string()),
            postgres_host: field(postgres, |r| r.host.as_deref()),
            postgres_database: field(postgres, |r| r.database.as_deref()),
            postgres_table: field(postgres, |r| r.table_name.as_deref()),
            snowflake_table: field(snowflake, |r| r.table_name.as_deref()),
        }
    }

    fn substitutions(&self) -> [(&'static str, &str); 8] {
        [
            ("pipeline_name", &self.pipeline_name),
            ("pipeline_description", &self.pipeline_description),
            ("schedule_interval", &self.schedule_interval),
            ("task_name", &self.task_name),
            ("postgres_host", &self.postgres_host),
            ("postgres_database", &self.postgres_database),
            ("postgres_table", &self.postgres_table),
            ("snowflake_table", &self.snowflake_table),
        ]
    }
}

/// The cron/interval expression quoted for the template, or the
/// unscheduled sentinel when the definition has no usable schedule.
fn schedule_interval(def: &PipelineDefinition) -> String {
    match &def.schedule {
        Some(schedule) if !schedule.expression.is_empty() => {
            format!("\"{}\"", schedule.expression)
        }
        _ => UNSCHEDULED.to_string(),
    }
}

/// First DataRef whose kind matches `system`, scanning steps in order and
/// each step's inputs before its outputs.
fn find_data_ref<'a>(steps: &'a [Step], system: &str) -> Option<&'a DataRef> {
    steps
        .iter()
        .flat_map(|step| step.inputs.iter().chain(step.outputs.iter()))
        .find(|data_ref| data_ref.kind.to_lowercase().contains(system))
}

fn field<'a>(data_ref: Option<&'a DataRef>, get: impl Fn(&'a DataRef) -> Option<&'a str>) -> String {
    data_ref.and_then(get).unwrap_or_default().to_string()
}

/// Stateless generator; one instance is shared by the orchestrator and the
/// CLI subcommands.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagGenerator;

impl DagGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render `def` into an artifact targeting `path`.
    pub fn generate(
        &self,
        def: &PipelineDefinition,
        path: PathBuf,
    ) -> Result<GeneratedArtifact, GenerateError> {
        let content = self.render(def)?;
        Ok(GeneratedArtifact {
            path,
            content: content.into_bytes(),
        })
    }

    /// Render `def` against the template matching its declared version.
    pub fn render(&self, def: &PipelineDefinition) -> Result<String, GenerateError> {
        let template_name = format!("{TEMPLATE_BASE}.{}", def.version);
        let resource =
            Templates::get(&template_name).ok_or_else(|| GenerateError::TemplateNotFound {
                version: def.version.clone(),
            })?;
        let source = std::str::from_utf8(&resource.data).map_err(|_| {
            GenerateError::TemplateEncoding {
                template: template_name.clone(),
            }
        })?;
        render_template(&template_name, source, &TemplateParams::derive(def))
    }
}

/// Pure text substitution of `{{ name }}` placeholders. Rendering fails if
/// any placeholder survives substitution; partial output is never emitted.
fn render_template(
    template_name: &str,
    source: &str,
    params: &TemplateParams,
) -> Result<String, GenerateError> {
    let mut rendered = source.to_string();
    for (key, value) in params.substitutions() {
        rendered = rendered.replace(&format!("{{{{ {key} }}}}"), value);
    }

    let leftover = find_placeholders(&rendered);
    if leftover.is_empty() {
        Ok(rendered)
    } else {
        Err(GenerateError::UnresolvedPlaceholders {
            template: template_name.to_string(),
            placeholders: leftover,
        })
    }
}

/// Collect `{{ ... }}` occurrences remaining in `text`. An opening marker
/// without a closing one counts as a malformed placeholder.
fn find_placeholders(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                found.push(after[..end].trim().to_string());
                rest = &after[end + 2..];
            }
            None => {
                found.push(after.trim().to_string());
                break;
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::parse;

    fn definition(yaml: &str) -> PipelineDefinition {
        parse(yaml.as_bytes()).unwrap().pipeline
    }

    const POSTGRES_PIPELINE: &str = r#"
pipeline:
  name: orders_sync
  version: "1.0"
  description: Syncs orders into the warehouse
  schedule:
    type: cron
    expression: "0 * * * *"
  steps:
    - name: extract_orders
      type: ingestion
      inputs:
        - { name: orders, type: postgres, host: h, database: d, table_name: t }
      outputs:
        - { name: loaded, type: snowflake, table_name: analytics.orders }
"#;

    #[test]
    fn derives_postgres_and_snowflake_parameters() {
        let params = TemplateParams::derive(&definition(POSTGRES_PIPELINE));
        assert_eq!(params.postgres_host, "h");
        assert_eq!(params.postgres_database, "d");
        assert_eq!(params.postgres_table, "t");
        assert_eq!(params.snowflake_table, "analytics.orders");
        assert_eq!(params.task_name, "extract_orders");
    }

    #[test]
    fn schedule_expression_is_quoted() {
        let params = TemplateParams::derive(&definition(POSTGRES_PIPELINE));
        assert_eq!(params.schedule_interval, "\"0 * * * *\"");
    }

    #[test]
    fn missing_schedule_renders_unscheduled_sentinel() {
        let def = definition("pipeline:\n  name: p\n  version: \"1.0\"\n");
        let params = TemplateParams::derive(&def);
        assert_eq!(params.schedule_interval, UNSCHEDULED);
    }

    #[test]
    fn empty_schedule_expression_counts_as_unscheduled() {
        let def = definition(
            "pipeline:\n  name: p\n  version: \"1.0\"\n  schedule:\n    type: cron\n",
        );
        assert_eq!(TemplateParams::derive(&def).schedule_interval, UNSCHEDULED);
    }

    #[test]
    fn no_steps_falls_back_to_default_task_name() {
        let def = definition("pipeline:\n  name: p\n  version: \"1.0\"\n");
        assert_eq!(TemplateParams::derive(&def).task_name, DEFAULT_TASK_NAME);
    }

    #[test]
    fn unmatched_systems_yield_empty_strings() {
        let yaml = r#"
pipeline:
  name: files_only
  version: "1.0"
  steps:
    - name: copy
      type: transfer
      inputs:
        - { name: src, type: s3, path: s3://in/ }
"#;
        let params = TemplateParams::derive(&definition(yaml));
        assert_eq!(params.postgres_host, "");
        assert_eq!(params.snowflake_table, "");
    }

    #[test]
    fn kind_match_is_case_insensitive_and_substring() {
        let yaml = r#"
pipeline:
  name: mixed_case
  version: "1.0"
  steps:
    - name: pull
      type: ingestion
      inputs:
        - { name: src, type: PostgresOperational, host: pg.internal }
"#;
        let params = TemplateParams::derive(&definition(yaml));
        assert_eq!(params.postgres_host, "pg.internal");
    }

    #[test]
    fn scan_order_is_step_then_inputs_then_outputs() {
        let yaml = r#"
pipeline:
  name: order
  version: "1.0"
  steps:
    - name: first
      type: t
      outputs:
        - { name: a, type: postgres, host: from-first-output }
    - name: second
      type: t
      inputs:
        - { name: b, type: postgres, host: from-second-input }
"#;
        let params = TemplateParams::derive(&definition(yaml));
        assert_eq!(params.postgres_host, "from-first-output");
    }

    #[test]
    fn renders_known_version_with_parameters_inlined() {
        let rendered = DagGenerator::new()
            .render(&definition(POSTGRES_PIPELINE))
            .unwrap();
        assert!(rendered.contains("dag_id=\"orders_sync\""));
        assert!(rendered.contains("POSTGRES_HOST = \"h\""));
        assert!(rendered.contains("POSTGRES_DATABASE = \"d\""));
        assert!(rendered.contains("POSTGRES_TABLE = \"t\""));
        assert!(rendered.contains("task_id=\"extract_orders\""));
        assert!(rendered.contains("schedule_interval=\"0 * * * *\""));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn unknown_version_is_template_not_found() {
        let mut def = definition(POSTGRES_PIPELINE);
        def.version = "9.9".to_string();
        let err = DagGenerator::new().render(&def).unwrap_err();
        assert!(matches!(err, GenerateError::TemplateNotFound { version } if version == "9.9"));
    }

    #[test]
    fn generate_carries_the_target_path() {
        let artifact = DagGenerator::new()
            .generate(
                &definition(POSTGRES_PIPELINE),
                PathBuf::from("airflow-dags/orders_sync.py"),
            )
            .unwrap();
        assert_eq!(artifact.path, PathBuf::from("airflow-dags/orders_sync.py"));
        assert!(!artifact.content.is_empty());
    }

    #[test]
    fn unresolved_placeholder_fails_rendering() {
        let err = render_template(
            "test.tmpl",
            "hello {{ unknown_key }}",
            &TemplateParams::default(),
        )
        .unwrap_err();
        match err {
            GenerateError::UnresolvedPlaceholders { placeholders, .. } => {
                assert_eq!(placeholders, vec!["unknown_key".to_string()]);
            }
            other => panic!("expected UnresolvedPlaceholders, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_placeholder_fails_rendering() {
        let err = render_template("test.tmpl", "broken {{ tail", &TemplateParams::default())
            .unwrap_err();
        assert!(matches!(err, GenerateError::UnresolvedPlaceholders { .. }));
    }

    #[test]
    fn plain_braces_are_not_placeholders() {
        let params = TemplateParams {
            pipeline_name: "p".into(),
            ..TemplateParams::default()
        };
        let rendered =
            render_template("test.tmpl", "conn = {\"name\": \"{{ pipeline_name }}\"}", &params)
                .unwrap();
        assert_eq!(rendered, "conn = {\"name\": \"p\"}");
    }
}
