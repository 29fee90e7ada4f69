//! Execution Request Service
//!
//! Entry point for callers: requests actions, reads and lists executions,
//! and cancels them. Authorization runs before anything is read for the
//! caller or written on their behalf.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use log::{error, info, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::rbac::visibility::can_see;
use crate::rbac::{
    scope_query, AccessResolver, Decision, ExecutionQuery, PermissionType, RbacSnapshot,
    ResourceRef, ResourceType,
};
use crate::workflow::{compile, validate_input, ActionDefinition, DefinitionLoader};

use super::events::{EventPublisher, RecordKind};
use super::machine::StateMachine;
use super::record::{ActionExecution, ExecutionContext, RbacContext, WorkflowExecution};
use super::status::ExecutionStatus;
use super::store::{Limit, MemoryStore, QueryFilter, RecordStore, SortOrder};
use super::tracker::FlowTracker;

/// Parameters of a listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// `None` for the default page, `-1` for every record
    pub limit: Option<i64>,
    pub filter: QueryFilter,
    pub order: SortOrder,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// Execution request service.
pub struct ExecutionService {
    config: EngineConfig,
    loader: Arc<dyn DefinitionLoader>,
    resolver: RwLock<AccessResolver>,
    workflows: Arc<dyn RecordStore<WorkflowExecution>>,
    actions: Arc<dyn RecordStore<ActionExecution>>,
    publisher: Arc<dyn EventPublisher>,
    machine: StateMachine,
    tracker: FlowTracker,
}

impl ExecutionService {
    /// Creates a service backed by in-memory stores.
    pub fn new(
        config: EngineConfig,
        loader: Arc<dyn DefinitionLoader>,
        snapshot: RbacSnapshot,
        publisher: Arc<dyn EventPublisher>,
    ) -> EngineResult<Self> {
        Self::with_stores(
            config,
            loader,
            snapshot,
            publisher,
            Arc::new(MemoryStore::<WorkflowExecution>::new()),
            Arc::new(MemoryStore::<ActionExecution>::new()),
        )
    }

    /// Creates a service on caller-provided stores.
    pub fn with_stores(
        config: EngineConfig,
        loader: Arc<dyn DefinitionLoader>,
        snapshot: RbacSnapshot,
        publisher: Arc<dyn EventPublisher>,
        workflows: Arc<dyn RecordStore<WorkflowExecution>>,
        actions: Arc<dyn RecordStore<ActionExecution>>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let attempts = config.store.max_write_attempts;
        let resolver = AccessResolver::new(
            Arc::new(snapshot),
            config.rbac.default_role.clone(),
            config.rbac.system_user.clone(),
        );
        let machine = StateMachine::new(
            Arc::clone(&workflows),
            Arc::clone(&actions),
            Arc::clone(&publisher),
            attempts,
        );
        let tracker = FlowTracker::new(Arc::clone(&workflows), attempts);

        Ok(Self {
            config,
            loader,
            resolver: RwLock::new(resolver),
            workflows,
            actions,
            publisher,
            machine,
            tracker,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn tracker(&self) -> &FlowTracker {
        &self.tracker
    }

    /// Swaps in a new RBAC snapshot. Checks already running finish on the
    /// snapshot they started with.
    pub fn reload_rbac(&self, snapshot: RbacSnapshot) -> EngineResult<()> {
        let mut resolver = self
            .resolver
            .write()
            .map_err(|_| EngineError::Store("resolver lock poisoned".to_string()))?;
        *resolver = AccessResolver::new(
            Arc::new(snapshot),
            self.config.rbac.default_role.clone(),
            self.config.rbac.system_user.clone(),
        );
        info!("RBAC snapshot reloaded");
        Ok(())
    }

    /// Returns the resolver for the current snapshot.
    pub fn resolver(&self) -> EngineResult<AccessResolver> {
        self.resolver
            .read()
            .map(|r| AccessResolver::clone(&r))
            .map_err(|_| EngineError::Store("resolver lock poisoned".to_string()))
    }

    /// Requests an action on behalf of `user`.
    ///
    /// For workflow actions both records are created: the parent action
    /// execution (already running) and the workflow execution (requested,
    /// waiting for the scheduler). Plain actions get only the parent record.
    pub fn request(
        &self,
        user: &str,
        action_ref: &str,
        input: Map<String, Value>,
    ) -> EngineResult<(ActionExecution, Option<WorkflowExecution>)> {
        let action = self.loader.load_action(action_ref)?;
        if !action.enabled {
            return Err(EngineError::ActionDisabled(action.reference()));
        }

        let decision = self.authorize(user, PermissionType::ActionExecute, &ResourceRef::action(&action))?;
        let rbac = decision.map(|d| RbacContext {
            user: user.to_string(),
            roles: d.roles,
        });

        if !action.is_workflow() {
            let execution = self.request_action(user, &action, input, rbac)?;
            return Ok((execution, None));
        }

        let entry_point = action.entry_point.as_deref().ok_or_else(|| {
            EngineError::DefinitionNotFound(format!(
                "entry point of workflow action '{}'",
                action.reference()
            ))
        })?;
        let definition = self.loader.load(&action.pack, entry_point)?;

        let mut schema = action.parameters.clone();
        schema.extend(definition.input.clone());
        let input = validate_input(&schema, &input).map_err(EngineError::InputValidation)?;
        let graph = compile(&definition)?;

        let execution_id = Uuid::new_v4().to_string();
        let workflow_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let context = ExecutionContext {
            pack: action.pack.clone(),
            user: user.to_string(),
            rbac,
            workflow_execution: Some(workflow_id.clone()),
        };

        let workflow = self.workflows.insert(WorkflowExecution {
            id: workflow_id,
            revision: 0,
            action_execution: execution_id.clone(),
            status: ExecutionStatus::Requested,
            graph,
            flow: Default::default(),
            input: input.clone(),
            context: context.clone(),
            start_timestamp: now,
            end_timestamp: None,
        })?;

        let inserted = self.actions.insert(ActionExecution {
            id: execution_id,
            revision: 0,
            action: action.reference(),
            status: workflow.status.parent_view(),
            context,
            parameters: input,
            result: Value::Null,
            start_timestamp: now,
            end_timestamp: None,
        });
        let execution = match inserted {
            Ok(execution) => execution,
            Err(e) => {
                // Nothing was published yet; drop the workflow execution too
                if let Err(rollback) = self.workflows.remove(&workflow.id) {
                    error!(
                        "Could not roll back workflow execution {}: {}",
                        workflow.id, rollback
                    );
                }
                return Err(e);
            }
        };

        self.publisher
            .publish_create(RecordKind::WorkflowExecution, &workflow);
        self.publisher
            .publish_create(RecordKind::ActionExecution, &execution);

        info!(
            "User '{}' requested {} -> execution {} / workflow execution {} ({} tasks)",
            user,
            execution.action,
            execution.id,
            workflow.id,
            workflow.graph.len()
        );
        Ok((execution, Some(workflow)))
    }

    fn request_action(
        &self,
        user: &str,
        action: &ActionDefinition,
        input: Map<String, Value>,
        rbac: Option<RbacContext>,
    ) -> EngineResult<ActionExecution> {
        let parameters = validate_input(&action.parameters, &input).map_err(EngineError::InputValidation)?;

        let execution = self.actions.insert(ActionExecution {
            id: Uuid::new_v4().to_string(),
            revision: 0,
            action: action.reference(),
            status: ExecutionStatus::Requested,
            context: ExecutionContext {
                pack: action.pack.clone(),
                user: user.to_string(),
                rbac,
                workflow_execution: None,
            },
            parameters,
            result: Value::Null,
            start_timestamp: Utc::now(),
            end_timestamp: None,
        })?;

        self.publisher
            .publish_create(RecordKind::ActionExecution, &execution);
        info!("User '{}' requested {} -> execution {}", user, execution.action, execution.id);
        Ok(execution)
    }

    /// Reads one action execution.
    ///
    /// Executions hidden by isolation read as not found.
    pub fn get_execution(&self, user: &str, id: &str) -> EngineResult<ActionExecution> {
        let execution = self
            .actions
            .get(id)?
            .ok_or_else(|| not_found("execution", id))?;

        if !self.config.rbac.enabled {
            return Ok(execution);
        }

        let privileged = self.is_privileged(user)?;
        if !can_see(user, &execution.context.user, privileged, self.config.rbac.permission_isolation) {
            return Err(not_found("execution", id));
        }

        self.authorize(user, PermissionType::ExecutionView, &ResourceRef::execution(&execution))?;
        Ok(execution)
    }

    /// Reads a workflow execution, subject to the same checks as its parent.
    pub fn get_workflow_execution(&self, user: &str, id: &str) -> EngineResult<WorkflowExecution> {
        let workflow = self
            .workflows
            .get(id)?
            .ok_or_else(|| not_found("workflow execution", id))?;

        self.get_execution(user, &workflow.action_execution)
            .map_err(|e| match e {
                EngineError::NotFound(_) => not_found("workflow execution", id),
                other => other,
            })?;
        Ok(workflow)
    }

    /// Returns the workflow execution behind an action execution, if any.
    pub fn workflow_for(&self, user: &str, execution_id: &str) -> EngineResult<Option<WorkflowExecution>> {
        let execution = self.get_execution(user, execution_id)?;
        match execution.context.workflow_execution {
            Some(workflow_id) => Ok(self.workflows.get(&workflow_id)?),
            None => Ok(None),
        }
    }

    /// Lists action executions visible to `user`.
    ///
    /// `limit = -1` asks for every record and needs the unscoped
    /// `execution_list_all` permission even when bounded pages are allowed.
    pub fn list_executions(&self, user: &str, request: ListRequest) -> EngineResult<Vec<ActionExecution>> {
        let limit = self.parse_limit(request.limit)?;
        let executions = ResourceRef::of_type(ResourceType::Execution);

        self.authorize(user, PermissionType::ExecutionList, &executions)?;
        if limit == Limit::Unbounded {
            self.authorize(user, PermissionType::ExecutionListAll, &executions)?;
        }

        let base = ExecutionQuery::new(limit)
            .with_filter(request.filter)
            .with_order(request.order);
        let scoped = scope_query(
            user,
            base,
            self.is_privileged(user)?,
            self.config.rbac.permission_isolation,
        );

        match scoped.query() {
            Some(query) => self.actions.query(&query.filter, query.limit, query.order),
            None => Ok(Vec::new()),
        }
    }

    /// Cancels an execution the caller can see and may stop.
    pub fn cancel(&self, user: &str, id: &str) -> EngineResult<ActionExecution> {
        let execution = self.get_execution(user, id)?;
        self.authorize(user, PermissionType::ExecutionStop, &ResourceRef::execution(&execution))?;

        match &execution.context.workflow_execution {
            Some(workflow_id) => {
                self.machine.cancel(workflow_id)?;
                self.actions
                    .get(id)?
                    .ok_or_else(|| not_found("execution", id))
            }
            None => self.machine.transition_action(id, ExecutionStatus::Canceled),
        }
    }

    fn parse_limit(&self, limit: Option<i64>) -> EngineResult<Limit> {
        let max = self.config.api.max_limit;
        match limit {
            None => Ok(Limit::Bounded(self.config.api.default_limit)),
            Some(-1) => Ok(Limit::Unbounded),
            Some(n) if n < 1 => Err(EngineError::BadRequest(format!(
                "Limit, \"{}\" specified, must be a positive number or -1",
                n
            ))),
            Some(n) if n as u64 > max as u64 => Err(EngineError::BadRequest(format!(
                "Limit, \"{}\" specified, maximum value is \"{}\"",
                n, max
            ))),
            Some(n) => Ok(Limit::Bounded(n as usize)),
        }
    }

    /// Runs a permission check. Returns `None` when RBAC is disabled.
    fn authorize(
        &self,
        user: &str,
        permission: PermissionType,
        resource: &ResourceRef,
    ) -> EngineResult<Option<Decision>> {
        if !self.config.rbac.enabled {
            return Ok(None);
        }

        let decision = self.resolver()?.resolve(user, permission, resource);
        if !decision.allow {
            warn!("Denied '{}' {} on {}", user, permission, resource);
            return Err(EngineError::forbidden(user, permission, resource.to_string()));
        }
        Ok(Some(decision))
    }

    /// True if the caller sees every user's executions.
    fn is_privileged(&self, user: &str) -> EngineResult<bool> {
        if !self.config.rbac.enabled {
            return Ok(true);
        }
        let decision = self.resolver()?.resolve(
            user,
            PermissionType::ExecutionListAll,
            &ResourceRef::of_type(ResourceType::Execution),
        );
        Ok(decision.allow)
    }
}

fn not_found(kind: &str, id: &str) -> EngineError {
    EngineError::NotFound(format!("{} '{}'", kind, id))
}
