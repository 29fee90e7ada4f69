//! End-to-end scenarios through the public API: packs and RBAC definitions
//! on disk, requests, listings under isolation, and concurrent task updates.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use serde_json::{json, Map, Value};
use tempfile::{tempdir, TempDir};

use orchestra::execution::{
    ExecutionService, ExecutionStatus, ListRequest, LocalRunner, NullPublisher,
};
use orchestra::rbac::RbacSnapshot;
use orchestra::workflow::{PackLoader, TaskResult};
use orchestra::{EngineConfig, EngineError};

const SEQUENTIAL_ACTION: &str = r#"
name: sequential
pack: wolfpack
runner_type: orquesta
entry_point: workflows/sequential.yaml
"#;

const SEQUENTIAL_WORKFLOW: &str = r#"
input:
  who:
    type: string
    default: Stanley
tasks:
  - id: task1
    action: core.echo
    next: task2
  - id: task2
    action: core.echo
    next: task3
  - id: task3
    action: core.echo
"#;

const FANOUT_ACTION: &str = r#"
name: fanout
pack: wolfpack
runner_type: orquesta
entry_point: workflows/fanout.yaml
"#;

const FANOUT_WORKFLOW: &str = r#"
tasks:
  - id: init
    action: core.echo
    next: [a, b, c, d, e, f]
  - {id: a, action: core.echo}
  - {id: b, action: core.echo}
  - {id: c, action: core.echo}
  - {id: d, action: core.echo}
  - {id: e, action: core.echo}
  - {id: f, action: core.echo}
"#;

const ROLES: &[(&str, &str)] = &[
    ("role_1.yaml", "name: role_1\n"),
    ("role_2.yaml", "name: role_2\n"),
    ("role_3.yaml", "name: role_3\n"),
    (
        "wolfpack_executor.yaml",
        r#"
name: wolfpack_executor
permission_grants:
  - resource_uid: pack:wolfpack
    permission_types: [action_execute, execution_stop]
  - permission_types: [execution_list, execution_view]
"#,
    ),
];

const ASSIGNMENTS: &[(&str, &str)] = &[
    ("admin.yaml", "username: admin\nroles: [admin]\n"),
    ("observer.yaml", "username: observer\nroles: [observer]\n"),
    (
        "multiple_roles.yaml",
        "username: multiple_roles\nroles: [admin, role_1, role_2, role_3]\n",
    ),
    ("user_two.yaml", "username: user_two\nroles: [wolfpack_executor]\n"),
    ("user_three.yaml", "username: user_three\nroles: [wolfpack_executor]\n"),
];

fn write_all(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (name, content) in files {
        fs::write(dir.join(name), content).unwrap();
    }
}

/// Lays out a packs directory and an RBAC directory under one temp root.
fn fixture() -> TempDir {
    let root = tempdir().unwrap();

    let actions = root.path().join("packs").join("wolfpack").join("actions");
    write_all(
        &actions,
        &[("sequential.yaml", SEQUENTIAL_ACTION), ("fanout.yaml", FANOUT_ACTION)],
    );
    write_all(
        &actions.join("workflows"),
        &[
            ("sequential.yaml", SEQUENTIAL_WORKFLOW),
            ("fanout.yaml", FANOUT_WORKFLOW),
        ],
    );

    let rbac = root.path().join("rbac");
    write_all(&rbac.join("roles"), ROLES);
    write_all(&rbac.join("assignments"), ASSIGNMENTS);

    root
}

fn service(root: &Path, isolation: bool) -> ExecutionService {
    let mut config = EngineConfig::default();
    config.packs_path = root.join("packs");
    config.rbac.permission_isolation = isolation;

    let snapshot = RbacSnapshot::load_from_dir(root.join("rbac")).unwrap();
    ExecutionService::new(
        config.clone(),
        Arc::new(PackLoader::new(config.packs_path)),
        snapshot,
        Arc::new(NullPublisher),
    )
    .unwrap()
}

#[test]
fn test_request_sequential_workflow() {
    let root = fixture();
    let service = service(root.path(), false);

    let (execution, workflow) = service
        .request("stanley", "wolfpack.sequential", Map::new())
        .unwrap();
    let workflow = workflow.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(workflow.status, ExecutionStatus::Requested);
    assert!(workflow.revision > 0);
    assert_eq!(
        execution.context.workflow_execution.as_deref(),
        Some(workflow.id.as_str())
    );

    let value = serde_json::to_value(&workflow).unwrap();
    assert!(value["graph"]["nodes"].is_array());
    assert!(value["graph"]["adjacency"].is_object());
    assert_eq!(value["flow"], json!({"tasks": {}, "sequence": []}));
    assert_eq!(value["input"], json!({"who": "Stanley"}));
    assert!(workflow.graph.is_consistent());
}

#[test]
fn test_rbac_roles_stamped_on_execution() {
    let root = fixture();
    let service = service(root.path(), false);

    let (execution, _) = service
        .request("multiple_roles", "wolfpack.sequential", Map::new())
        .unwrap();

    let rbac = execution.context.rbac.unwrap();
    assert_eq!(rbac.user, "multiple_roles");
    assert_eq!(rbac.roles, vec!["admin", "role_1", "role_2", "role_3"]);
}

#[test]
fn test_unbounded_listing_requires_list_all() {
    let root = fixture();
    let service = service(root.path(), false);
    service
        .request("stanley", "wolfpack.sequential", Map::new())
        .unwrap();

    let denied = service.list_executions("observer", ListRequest::new().with_limit(-1));
    assert!(matches!(denied, Err(EngineError::Forbidden { .. })));

    let page = service
        .list_executions("observer", ListRequest::new().with_limit(100))
        .unwrap();
    assert_eq!(page.len(), 1);

    let all = service
        .list_executions("admin", ListRequest::new().with_limit(-1))
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn test_isolation_scopes_listings() {
    let root = fixture();
    let service = service(root.path(), true);

    let (existing, _) = service
        .request("stanley", "wolfpack.sequential", Map::new())
        .unwrap();

    let mut created = Vec::new();
    for user in ["user_two", "user_two", "user_three", "user_three"] {
        let (execution, _) = service
            .request(user, "wolfpack.sequential", Map::new())
            .unwrap();
        created.push(execution.id);
    }

    let mut newest_first: Vec<String> = created.iter().rev().cloned().collect();
    newest_first.push(existing.id.clone());

    for privileged in ["admin", "stanley"] {
        let listed: Vec<String> = service
            .list_executions(privileged, ListRequest::new())
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(listed, newest_first, "listing as {}", privileged);
    }

    for (user, own) in [("user_two", &created[0..2]), ("user_three", &created[2..4])] {
        let listed = service.list_executions(user, ListRequest::new()).unwrap();
        assert_eq!(listed.len(), 2, "listing as {}", user);
        assert!(listed.iter().all(|e| e.context.user == user));
        assert_eq!(listed[0].id, own[1]);
        assert_eq!(listed[1].id, own[0]);
    }

    assert!(matches!(
        service.get_execution("user_two", &created[2]),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn test_concurrent_task_updates_serialize() {
    let root = fixture();
    let service = service(root.path(), false);

    let (_, workflow) = service
        .request("stanley", "wolfpack.fanout", Map::new())
        .unwrap();
    let workflow = workflow.unwrap();
    service.state_machine().start(&workflow.id).unwrap();

    let tracker = service.tracker();
    tracker.record_task_start(&workflow.id, "init").unwrap();
    tracker
        .record_task_complete(&workflow.id, "init", TaskResult::succeeded(Value::Null))
        .unwrap();

    let handles: Vec<_> = ["a", "b", "c", "d", "e", "f"]
        .into_iter()
        .map(|task| {
            let tracker = tracker.clone();
            let id = workflow.id.clone();
            thread::spawn(move || {
                tracker.record_task_start(&id, task)?;
                tracker.record_task_complete(&id, task, TaskResult::succeeded(json!(task)))
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let updated = service
        .get_workflow_execution("stanley", &workflow.id)
        .unwrap();
    // insert, start, 2 for init, 2 per fan-out task
    assert_eq!(updated.revision, 1 + 1 + 2 + 12);
    assert_eq!(updated.flow.sequence.len(), 7);
    assert!(updated.flow.is_consistent());
}

#[test]
fn test_terminal_execution_rejects_late_updates() {
    let root = fixture();
    let service = service(root.path(), false);

    let (execution, workflow) = service
        .request("user_two", "wolfpack.sequential", Map::new())
        .unwrap();
    let workflow = workflow.unwrap();
    service.state_machine().start(&workflow.id).unwrap();
    service.tracker().record_task_start(&workflow.id, "task1").unwrap();

    let canceled = service.cancel("user_two", &execution.id).unwrap();
    assert_eq!(canceled.status, ExecutionStatus::Canceled);

    let late = service.tracker().record_task_complete(
        &workflow.id,
        "task1",
        TaskResult::succeeded(Value::Null),
    );
    assert!(matches!(
        late,
        Err(EngineError::InvalidStateTransition { .. })
    ));

    let after = service
        .get_workflow_execution("user_two", &workflow.id)
        .unwrap();
    assert_eq!(after.status, ExecutionStatus::Canceled);
    assert!(after.flow.sequence.is_empty());
    assert!(service.state_machine().resume(&workflow.id).is_err());
}

#[test]
fn test_simulated_run_completes_parent() {
    let root = fixture();
    let service = service(root.path(), false);

    let (execution, workflow) = service
        .request("admin", "wolfpack.fanout", Map::new())
        .unwrap();
    let finished = LocalRunner::for_service(&service)
        .with_max_parallel(3)
        .run(&workflow.unwrap())
        .unwrap();

    assert_eq!(finished.status, ExecutionStatus::Succeeded);
    assert_eq!(finished.flow.sequence.first().map(String::as_str), Some("init"));
    assert_eq!(finished.flow.sequence.len(), 7);

    let parent = service.get_execution("admin", &execution.id).unwrap();
    assert_eq!(parent.status, ExecutionStatus::Succeeded);
    assert!(parent.end_timestamp.is_some());
}

#[test]
fn test_permission_checks_do_not_leak_between_users() {
    let root = fixture();
    let service = service(root.path(), false);

    let results: Vec<(&str, bool)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = &service;
                let user = if i % 2 == 0 { "admin" } else { "observer" };
                scope.spawn(move || {
                    let allowed = service
                        .list_executions(user, ListRequest::new().with_limit(-1))
                        .is_ok();
                    (user, allowed)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (user, allowed) in results {
        assert_eq!(allowed, user == "admin", "user {}", user);
    }
}
