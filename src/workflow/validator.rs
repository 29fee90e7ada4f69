//! Definition Validation
//!
//! Structural checks run before a workflow definition is compiled:
//! - Workflow is not empty
//! - Task ids are present and unique
//! - Every task names an action
//! - Every transition references declared tasks

use std::collections::HashSet;

use log::{debug, info};
use thiserror::Error;

use super::model::WorkflowDefinition;

/// Reasons a workflow definition cannot be compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Workflow has no tasks")]
    EmptyWorkflow,

    #[error("Duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    #[error("Task has empty or whitespace-only ID")]
    EmptyTaskId,

    #[error("Task '{0}' has no action specified")]
    EmptyAction(String),

    #[error("Transition '{from}' -> '{to}' references undeclared task '{missing}'")]
    UndeclaredNode {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Workflow contains a cycle through {0:?} that is not tagged as a loop")]
    Cycle(Vec<String>),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<DefinitionError>),
}

fn join_errors(errors: &[DefinitionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validates a definition's structure, returning every problem found.
pub fn validate_definition(definition: &WorkflowDefinition) -> Vec<DefinitionError> {
    let mut errors = Vec::new();

    if definition.tasks.is_empty() {
        errors.push(DefinitionError::EmptyWorkflow);
        return errors;
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for task in &definition.tasks {
        if task.id.trim().is_empty() {
            errors.push(DefinitionError::EmptyTaskId);
            continue;
        }

        if !seen_ids.insert(task.id.as_str()) {
            errors.push(DefinitionError::DuplicateTaskId(task.id.clone()));
        }

        if task.action.trim().is_empty() {
            errors.push(DefinitionError::EmptyAction(task.id.clone()));
        }

        if task.next.is_empty() {
            debug!("Task '{}' is a leaf task", task.id);
        }
    }

    for edge in definition.all_edges() {
        for end in [&edge.from, &edge.to] {
            if !seen_ids.contains(end.as_str()) {
                errors.push(DefinitionError::UndeclaredNode {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: end.clone(),
                });
                break;
            }
        }
    }

    if errors.is_empty() {
        info!(
            "Workflow '{}' validated: {} tasks",
            definition.name,
            definition.tasks.len()
        );
    }

    errors
}

/// Collapses a list of problems into a single error.
pub fn into_single(mut errors: Vec<DefinitionError>) -> Option<DefinitionError> {
    match errors.len() {
        0 => None,
        1 => errors.pop(),
        _ => Some(DefinitionError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Edge, TaskDefinition};

    #[test]
    fn test_valid_definition() {
        let def = WorkflowDefinition::new("wf")
            .with_task(TaskDefinition::new("a", "core.echo").then("b"))
            .with_task(TaskDefinition::new("b", "core.echo"));

        assert!(validate_definition(&def).is_empty());
    }

    #[test]
    fn test_empty_definition() {
        let def = WorkflowDefinition::new("wf");
        assert_eq!(validate_definition(&def), vec![DefinitionError::EmptyWorkflow]);
    }

    #[test]
    fn test_duplicate_ids() {
        let def = WorkflowDefinition::new("wf")
            .with_task(TaskDefinition::new("a", "core.echo"))
            .with_task(TaskDefinition::new("a", "core.echo"));

        let errors = validate_definition(&def);
        assert!(errors.contains(&DefinitionError::DuplicateTaskId("a".to_string())));
    }

    #[test]
    fn test_empty_action() {
        let def = WorkflowDefinition::new("wf").with_task(TaskDefinition::new("a", " "));
        let errors = validate_definition(&def);
        assert!(errors.iter().any(|e| matches!(e, DefinitionError::EmptyAction(_))));
    }

    #[test]
    fn test_undeclared_reference() {
        let def = WorkflowDefinition::new("wf")
            .with_task(TaskDefinition::new("a", "core.echo").then("ghost"));

        let errors = validate_definition(&def);
        assert_eq!(
            errors,
            vec![DefinitionError::UndeclaredNode {
                from: "a".to_string(),
                to: "ghost".to_string(),
                missing: "ghost".to_string(),
            }]
        );
    }

    #[test]
    fn test_undeclared_edge_source() {
        let def = WorkflowDefinition::new("wf")
            .with_task(TaskDefinition::new("a", "core.echo"))
            .with_edge(Edge::new("ghost", "a"));

        let errors = validate_definition(&def);
        assert!(matches!(
            &errors[0],
            DefinitionError::UndeclaredNode { missing, .. } if missing == "ghost"
        ));
    }

    #[test]
    fn test_into_single() {
        assert!(into_single(Vec::new()).is_none());
        assert_eq!(
            into_single(vec![DefinitionError::EmptyWorkflow]),
            Some(DefinitionError::EmptyWorkflow)
        );
        let multiple = into_single(vec![
            DefinitionError::EmptyTaskId,
            DefinitionError::EmptyWorkflow,
        ])
        .unwrap();
        assert!(multiple.to_string().contains("; "));
    }
}
