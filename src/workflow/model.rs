//! Definition Data Model
//!
//! Action metadata and workflow definitions as handed over by the
//! definition loader.
//!
//! # Example YAML Format
//!
//! ```yaml
//! # packs/wolfpack/actions/sequential.yaml
//! name: sequential
//! pack: wolfpack
//! runner_type: orquesta
//! entry_point: workflows/sequential.yaml
//!
//! # packs/wolfpack/actions/workflows/sequential.yaml
//! input:
//!   who:
//!     type: string
//!     default: Stanley
//! tasks:
//!   - id: task1
//!     action: core.echo
//!     next: task2
//!   - id: task2
//!     action: core.echo
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Runner type that marks an action as a workflow.
pub const WORKFLOW_RUNNER: &str = "orquesta";

/// Runner used when an action file does not name one.
pub const DEFAULT_RUNNER: &str = "local-shell-cmd";

/// JSON type a declared parameter accepts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    /// Returns true if `value` has this JSON type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a single input parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    #[serde(rename = "type", default = "default_parameter_type")]
    pub kind: ParameterType,

    #[serde(default)]
    pub required: bool,

    /// Value used when the caller omits the parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_parameter_type() -> ParameterType {
    ParameterType::String
}

impl ParameterSpec {
    pub fn new(kind: ParameterType) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Declared inputs keyed by parameter name.
pub type InputSchema = BTreeMap<String, ParameterSpec>;

/// Registered action metadata.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionDefinition {
    pub name: String,

    #[serde(default)]
    pub pack: String,

    #[serde(default = "default_runner")]
    pub runner_type: String,

    /// Workflow file, relative to the pack's `actions/` directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,

    #[serde(default)]
    pub parameters: InputSchema,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_runner() -> String {
    DEFAULT_RUNNER.to_string()
}

fn default_enabled() -> bool {
    true
}

impl ActionDefinition {
    /// Creates an enabled action with no parameters.
    ///
    /// # Example
    ///
    /// ```
    /// use orchestra::workflow::ActionDefinition;
    ///
    /// let action = ActionDefinition::new("wolfpack", "sequential", "orquesta")
    ///     .with_entry_point("workflows/sequential.yaml");
    /// assert_eq!(action.reference(), "wolfpack.sequential");
    /// assert!(action.is_workflow());
    /// ```
    pub fn new(
        pack: impl Into<String>,
        name: impl Into<String>,
        runner_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            pack: pack.into().trim().to_string(),
            runner_type: runner_type.into().trim().to_string(),
            entry_point: None,
            parameters: InputSchema::new(),
            enabled: true,
            description: None,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns the `pack.name` reference used to request the action.
    pub fn reference(&self) -> String {
        format!("{}.{}", self.pack, self.name)
    }

    /// Returns the RBAC resource uid (`action:pack:name`).
    pub fn uid(&self) -> String {
        format!("action:{}:{}", self.pack, self.name)
    }

    pub fn is_workflow(&self) -> bool {
        self.runner_type == WORKFLOW_RUNNER
    }
}

/// Splits a `pack.name` action reference.
pub fn split_action_ref(action_ref: &str) -> Option<(&str, &str)> {
    let (pack, name) = action_ref.trim().split_once('.')?;
    if pack.is_empty() || name.is_empty() {
        return None;
    }
    Some((pack, name))
}

/// A task node declared in a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    pub id: String,

    /// Action reference the task runs
    pub action: String,

    /// Tasks that follow this one
    #[serde(deserialize_with = "single_or_vec", default)]
    pub next: Vec<String>,
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            action: action.into().trim().to_string(),
            next: Vec::new(),
        }
    }

    /// Adds a transition to another task.
    pub fn then(mut self, task_id: impl Into<String>) -> Self {
        self.next.push(task_id.into());
        self
    }
}

/// Directed transition between two tasks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,

    pub to: String,

    /// Marks a back edge that closes an intentional loop
    #[serde(rename = "loop", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_loop: bool,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            is_loop: false,
        }
    }

    pub fn looping(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            is_loop: true,
            ..Self::new(from, to)
        }
    }
}

/// Parsed workflow definition: input schema, task nodes and transitions.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub input: InputSchema,

    /// Tasks in declaration order
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,

    /// Transitions declared outside the task list (loops, joins)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a task to the workflow.
    pub fn add_task(&mut self, task: TaskDefinition) -> Result<(), String> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(format!("Task '{}' already exists", task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Declares an input parameter.
    pub fn with_input(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.input.insert(name.into(), spec);
        self
    }

    /// Adds a task, builder style. Duplicates are ignored by the compiler's
    /// validator, which reports them instead.
    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Gets a task by ID.
    pub fn get_task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Returns every transition: task `next` lists first, then explicit edges.
    /// Duplicate transitions are collapsed, keeping the first occurrence.
    pub fn all_edges(&self) -> Vec<Edge> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut edges = Vec::new();

        let declared = self
            .tasks
            .iter()
            .flat_map(|t| t.next.iter().map(move |n| Edge::new(t.id.clone(), n.clone())))
            .chain(self.edges.iter().cloned());

        for edge in declared {
            if seen.insert((edge.from.clone(), edge.to.clone())) {
                edges.push(edge);
            }
        }

        edges
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_reference_and_uid() {
        let action = ActionDefinition::new("wolfpack", "action-1", DEFAULT_RUNNER);
        assert_eq!(action.reference(), "wolfpack.action-1");
        assert_eq!(action.uid(), "action:wolfpack:action-1");
        assert!(!action.is_workflow());
    }

    #[test]
    fn test_split_action_ref() {
        assert_eq!(split_action_ref("wolfpack.action-1"), Some(("wolfpack", "action-1")));
        assert_eq!(split_action_ref("core.local.cmd"), Some(("core", "local.cmd")));
        assert_eq!(split_action_ref("nopack"), None);
        assert_eq!(split_action_ref(".name"), None);
    }

    #[test]
    fn test_parameter_type_accepts() {
        assert!(ParameterType::String.accepts(&json!("x")));
        assert!(!ParameterType::String.accepts(&json!(1)));
        assert!(ParameterType::Integer.accepts(&json!(3)));
        assert!(!ParameterType::Integer.accepts(&json!(3.5)));
        assert!(ParameterType::Number.accepts(&json!(3.5)));
        assert!(ParameterType::Object.accepts(&json!({"a": 1})));
    }

    #[test]
    fn test_action_yaml_defaults() {
        let yaml = "name: echo\npack: core\n";
        let action: ActionDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(action.runner_type, DEFAULT_RUNNER);
        assert!(action.enabled);
        assert!(action.parameters.is_empty());
    }

    #[test]
    fn test_task_next_single_or_list() {
        let yaml = r#"
tasks:
  - id: a
    action: core.echo
    next: b
  - id: b
    action: core.echo
    next: [c, d]
  - id: c
    action: core.echo
  - id: d
    action: core.echo
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.get_task("a").unwrap().next, vec!["b"]);
        assert_eq!(def.get_task("b").unwrap().next, vec!["c", "d"]);
        assert!(def.get_task("c").unwrap().next.is_empty());
    }

    #[test]
    fn test_loop_edge_yaml() {
        let yaml = r#"
tasks:
  - id: a
    action: core.echo
edges:
  - from: a
    to: a
    loop: true
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.edges[0].is_loop);
    }

    #[test]
    fn test_add_task_duplicate() {
        let mut def = WorkflowDefinition::new("wf");
        assert!(def.add_task(TaskDefinition::new("a", "core.echo")).is_ok());
        assert!(def.add_task(TaskDefinition::new("a", "core.echo")).is_err());
        assert_eq!(def.len(), 1);
    }

    #[test]
    fn test_all_edges_dedups_and_orders() {
        let def = WorkflowDefinition::new("wf")
            .with_task(TaskDefinition::new("a", "core.echo").then("b").then("b"))
            .with_task(TaskDefinition::new("b", "core.echo"))
            .with_edge(Edge::new("a", "b"))
            .with_edge(Edge::looping("b", "a"));

        let edges = def.all_edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0], Edge::new("a", "b"));
        assert!(edges[1].is_loop);
    }

    #[test]
    fn test_parameter_spec_builders() {
        let spec = ParameterSpec::new(ParameterType::String)
            .required()
            .with_default(json!("Stanley"));
        assert!(spec.required);
        assert_eq!(spec.default, Some(json!("Stanley")));
    }
}
