//! Definition Loader
//!
//! Resolves action references and workflow files into parsed definitions.
//! Two loaders are provided:
//!
//! - [`PackLoader`]: reads YAML from a packs directory laid out as
//!   `{packs}/{pack}/actions/{name}.yaml`, with workflow entry points
//!   relative to the pack's `actions/` directory
//! - [`StaticLoader`]: in-memory definitions, registered up front

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use crate::error::{EngineError, EngineResult};

use super::model::{split_action_ref, ActionDefinition, WorkflowDefinition};

/// Source of action and workflow definitions.
pub trait DefinitionLoader: Send + Sync {
    /// Resolves a `pack.name` reference to its action metadata.
    fn load_action(&self, action_ref: &str) -> EngineResult<ActionDefinition>;

    /// Loads a workflow definition file from a pack.
    fn load(&self, pack: &str, file: &str) -> EngineResult<WorkflowDefinition>;
}

/// Parses a workflow definition from YAML text.
pub fn parse_workflow(yaml: &str) -> EngineResult<WorkflowDefinition> {
    let workflow: WorkflowDefinition = serde_yaml::from_str(yaml)?;
    debug!("Parsed workflow with {} tasks", workflow.tasks.len());
    Ok(workflow)
}

/// Loads a workflow definition from a YAML file.
///
/// The workflow name defaults to the file stem when the file omits it.
pub fn load_workflow(path: impl AsRef<Path>) -> EngineResult<WorkflowDefinition> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = read_definition(path)?;
    let mut workflow = parse_workflow(&yaml_content)?;

    if workflow.name.is_empty() {
        workflow.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow")
            .to_string();
    }

    Ok(workflow)
}

fn read_definition(path: &Path) -> EngineResult<String> {
    if !path.is_file() {
        return Err(EngineError::DefinitionNotFound(path.display().to_string()));
    }
    Ok(fs::read_to_string(path)?)
}

/// Loads definitions from a packs directory on disk.
#[derive(Debug, Clone)]
pub struct PackLoader {
    packs_path: PathBuf,
}

impl PackLoader {
    pub fn new(packs_path: impl Into<PathBuf>) -> Self {
        Self {
            packs_path: packs_path.into(),
        }
    }

    fn actions_dir(&self, pack: &str) -> PathBuf {
        self.packs_path.join(pack).join("actions")
    }
}

impl DefinitionLoader for PackLoader {
    fn load_action(&self, action_ref: &str) -> EngineResult<ActionDefinition> {
        let (pack, name) = split_action_ref(action_ref)
            .ok_or_else(|| EngineError::BadRequest(format!("Invalid action reference '{}'", action_ref)))?;
        if !is_plain_segment(pack) || !is_plain_segment(name) {
            return Err(EngineError::BadRequest(format!(
                "Action reference '{}' must name a pack and an action inside the packs directory",
                action_ref
            )));
        }

        let path = self.actions_dir(pack).join(format!("{}.yaml", name));
        let content = read_definition(&path)
            .map_err(|_| EngineError::DefinitionNotFound(format!("action '{}'", action_ref)))?;

        let mut action: ActionDefinition = serde_yaml::from_str(&content)?;
        if action.pack.is_empty() {
            action.pack = pack.to_string();
        }
        if action.pack != pack || action.name != name {
            return Err(EngineError::DefinitionNotFound(format!(
                "action '{}' (file declares '{}')",
                action_ref,
                action.reference()
            )));
        }

        debug!("Loaded action '{}' ({})", action_ref, action.runner_type);
        Ok(action)
    }

    fn load(&self, pack: &str, file: &str) -> EngineResult<WorkflowDefinition> {
        let relative = Path::new(file);
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if relative.is_absolute() || escapes {
            return Err(EngineError::BadRequest(format!(
                "Workflow path '{}' must stay inside pack '{}'",
                file, pack
            )));
        }

        load_workflow(self.actions_dir(pack).join(relative))
    }
}

/// True if `segment` names exactly one entry inside its parent directory.
fn is_plain_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// In-memory definition source.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    actions: HashMap<String, ActionDefinition>,
    workflows: HashMap<(String, String), WorkflowDefinition>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action under its `pack.name` reference.
    pub fn with_action(mut self, action: ActionDefinition) -> Self {
        self.actions.insert(action.reference(), action);
        self
    }

    /// Registers a workflow file for a pack.
    pub fn with_workflow(
        mut self,
        pack: impl Into<String>,
        file: impl Into<String>,
        workflow: WorkflowDefinition,
    ) -> Self {
        self.workflows.insert((pack.into(), file.into()), workflow);
        self
    }
}

impl DefinitionLoader for StaticLoader {
    fn load_action(&self, action_ref: &str) -> EngineResult<ActionDefinition> {
        self.actions
            .get(action_ref)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionNotFound(format!("action '{}'", action_ref)))
    }

    fn load(&self, pack: &str, file: &str) -> EngineResult<WorkflowDefinition> {
        self.workflows
            .get(&(pack.to_string(), file.to_string()))
            .cloned()
            .ok_or_else(|| {
                EngineError::DefinitionNotFound(format!("workflow '{}' in pack '{}'", file, pack))
            })
    }
}
