//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and `WorkflowDefinition`, validates structural
//! constraints (names, unique IDs, limits), and discovers workflow files on
//! disk. Dependency references and cycles are checked by the graph builder
//! at execution time, not here.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use stepgraph_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a workflow definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumerics, hyphens, underscores
/// - At least one step exists
/// - Step IDs are non-empty and unique
/// - Step names and actions are non-empty
/// - `max_concurrency >= 1` and timeouts `> 0` if set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WorkflowError::ValidationError(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric, '-' and '_' allowed)",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &def.steps {
        if step.id.is_empty() {
            return Err(WorkflowError::ValidationError(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID '{}'",
                step.id
            )));
        }
        if step.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' has an empty name",
                step.id
            )));
        }
        if step.action.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' has an empty action",
                step.id
            )));
        }
        if step.timeout.is_some_and(|t| t.is_zero()) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' timeout must be greater than zero",
                step.id
            )));
        }
    }

    if def.max_concurrency == Some(0) {
        return Err(WorkflowError::ValidationError(
            "max_concurrency must be at least 1".to_string(),
        ));
    }
    if def.timeout.is_some_and(|t| t.is_zero()) {
        return Err(WorkflowError::ValidationError(
            "workflow timeout must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Load and validate a workflow from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Recursively find and load all `.yaml`/`.yml` workflows under `dir`.
///
/// Files that fail to parse are skipped with a warning. Results are sorted
/// by path. A missing directory yields an empty list.
pub fn discover_workflows(dir: &Path) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !dir.exists() {
        return Ok(results);
    }
    discover_recursive(dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }
        match load_workflow_file(&path) {
            Ok(def) => results.push((path, def)),
            Err(error) => {
                tracing::warn!(?path, %error, "skipping unparseable workflow file");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
