//! RBAC Data Types
//!
//! Roles, assignments and permission grants, plus the resource reference the
//! resolver matches grants against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::execution::record::ActionExecution;
use crate::workflow::model::split_action_ref;
use crate::workflow::ActionDefinition;

/// Kind of resource a permission applies to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Pack,
    Action,
    Execution,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pack => "pack",
            Self::Action => "action",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single permission.
///
/// `*_all` values imply every permission on the same resource type.
/// `execution_list_all` is the elevated listing permission: unbounded pages
/// and visibility of every user's executions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    PackView,
    PackList,
    PackAll,
    ActionView,
    ActionList,
    ActionExecute,
    ActionAll,
    ExecutionView,
    ExecutionList,
    ExecutionListAll,
    ExecutionStop,
    ExecutionAll,
}

impl PermissionType {
    pub const ALL: [PermissionType; 12] = [
        Self::PackView,
        Self::PackList,
        Self::PackAll,
        Self::ActionView,
        Self::ActionList,
        Self::ActionExecute,
        Self::ActionAll,
        Self::ExecutionView,
        Self::ExecutionList,
        Self::ExecutionListAll,
        Self::ExecutionStop,
        Self::ExecutionAll,
    ];

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::PackView | Self::PackList | Self::PackAll => ResourceType::Pack,
            Self::ActionView | Self::ActionList | Self::ActionExecute | Self::ActionAll => {
                ResourceType::Action
            }
            Self::ExecutionView
            | Self::ExecutionList
            | Self::ExecutionListAll
            | Self::ExecutionStop
            | Self::ExecutionAll => ResourceType::Execution,
        }
    }

    /// Returns the `*_all` permission for a resource type.
    pub fn all_for(resource_type: ResourceType) -> PermissionType {
        match resource_type {
            ResourceType::Pack => Self::PackAll,
            ResourceType::Action => Self::ActionAll,
            ResourceType::Execution => Self::ExecutionAll,
        }
    }

    /// Returns true if holding `self` grants `other`.
    pub fn implies(&self, other: PermissionType) -> bool {
        *self == other
            || (*self == Self::all_for(self.resource_type())
                && self.resource_type() == other.resource_type())
    }

    pub fn is_view_or_list(&self) -> bool {
        matches!(
            self,
            Self::PackView
                | Self::PackList
                | Self::ActionView
                | Self::ActionList
                | Self::ExecutionView
                | Self::ExecutionList
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PackView => "pack_view",
            Self::PackList => "pack_list",
            Self::PackAll => "pack_all",
            Self::ActionView => "action_view",
            Self::ActionList => "action_list",
            Self::ActionExecute => "action_execute",
            Self::ActionAll => "action_all",
            Self::ExecutionView => "execution_view",
            Self::ExecutionList => "execution_list",
            Self::ExecutionListAll => "execution_list_all",
            Self::ExecutionStop => "execution_stop",
            Self::ExecutionAll => "execution_all",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown permission type: {}", s))
    }
}

/// What a grant covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantScope<'a> {
    /// Every resource
    Global,
    /// Every resource of one type
    ResourceType(ResourceType),
    /// One resource and everything under it
    ResourceInstance(&'a str),
}

/// Permissions granted on a resource, a resource type, or everything.
///
/// A grant with no uid is a wildcard; with no uid and no type it applies
/// globally.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    #[serde(default)]
    pub resource_uid: Option<String>,

    #[serde(default)]
    pub resource_type: Option<ResourceType>,

    pub permission_types: Vec<PermissionType>,
}

impl PermissionGrant {
    /// Grant on every resource.
    pub fn global(permissions: impl IntoIterator<Item = PermissionType>) -> Self {
        Self {
            resource_uid: None,
            resource_type: None,
            permission_types: permissions.into_iter().collect(),
        }
    }

    /// Grant on every resource of a type.
    pub fn on_type(
        resource_type: ResourceType,
        permissions: impl IntoIterator<Item = PermissionType>,
    ) -> Self {
        Self {
            resource_uid: None,
            resource_type: Some(resource_type),
            permission_types: permissions.into_iter().collect(),
        }
    }

    /// Grant on one resource uid such as `pack:wolfpack`.
    pub fn on_resource(
        uid: impl Into<String>,
        permissions: impl IntoIterator<Item = PermissionType>,
    ) -> Self {
        Self {
            resource_uid: Some(uid.into()),
            resource_type: None,
            permission_types: permissions.into_iter().collect(),
        }
    }

    pub fn scope(&self) -> GrantScope<'_> {
        match (&self.resource_uid, self.resource_type) {
            (Some(uid), _) => GrantScope::ResourceInstance(uid),
            (None, Some(resource_type)) => GrantScope::ResourceType(resource_type),
            (None, None) => GrantScope::Global,
        }
    }

    /// Returns true if this grant gives `permission` on `resource`.
    pub fn allows(&self, permission: PermissionType, resource: &ResourceRef) -> bool {
        let covers_resource = match self.scope() {
            GrantScope::Global => true,
            GrantScope::ResourceType(t) => t == resource.resource_type,
            GrantScope::ResourceInstance(uid) => resource.is_or_descends_from(uid),
        };

        covers_resource && self.permission_types.iter().any(|p| p.implies(permission))
    }
}

/// A named set of grants.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Role {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, rename = "permission_grants")]
    pub grants: Vec<PermissionGrant>,

    /// System roles allow everything and cannot be redefined
    #[serde(default)]
    pub system: bool,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            grants: Vec::new(),
            system: false,
        }
    }

    pub fn with_grant(mut self, grant: PermissionGrant) -> Self {
        self.grants.push(grant);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn system(mut self) -> Self {
        self.system = true;
        self
    }
}

/// Binds a user to a role.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub user: String,
    pub role: String,

    /// Where the assignment came from (file path or `api`)
    pub source: String,
}

/// The resource a permission check is made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub resource_type: ResourceType,

    /// `None` for type-level checks such as listing
    pub uid: Option<String>,

    /// Uids of enclosing resources, innermost first
    pub ancestors: Vec<String>,
}

impl ResourceRef {
    /// Type-level reference with no specific resource.
    pub fn of_type(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            uid: None,
            ancestors: Vec::new(),
        }
    }

    pub fn pack(pack: &str) -> Self {
        Self {
            resource_type: ResourceType::Pack,
            uid: Some(pack_uid(pack)),
            ancestors: Vec::new(),
        }
    }

    pub fn action(action: &ActionDefinition) -> Self {
        Self {
            resource_type: ResourceType::Action,
            uid: Some(action.uid()),
            ancestors: vec![pack_uid(&action.pack)],
        }
    }

    /// Reference to an execution, nested under its action and pack.
    pub fn execution(execution: &ActionExecution) -> Self {
        let ancestors = match split_action_ref(&execution.action) {
            Some((pack, name)) => vec![format!("action:{}:{}", pack, name), pack_uid(pack)],
            None => Vec::new(),
        };

        Self {
            resource_type: ResourceType::Execution,
            uid: Some(execution.uid()),
            ancestors,
        }
    }

    pub fn is_or_descends_from(&self, uid: &str) -> bool {
        self.uid.as_deref() == Some(uid) || self.ancestors.iter().any(|a| a == uid)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uid {
            Some(uid) => f.write_str(uid),
            None => f.write_str(self.resource_type.as_str()),
        }
    }
}

fn pack_uid(pack: &str) -> String {
    format!("pack:{}", pack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_names() {
        for permission in PermissionType::ALL {
            let json = serde_json::to_string(&permission).unwrap();
            assert_eq!(json, format!("\"{}\"", permission));
            assert_eq!(permission.as_str().parse::<PermissionType>(), Ok(permission));
        }
    }

    #[test]
    fn test_all_implies_same_type_only() {
        assert!(PermissionType::ExecutionAll.implies(PermissionType::ExecutionListAll));
        assert!(PermissionType::ExecutionAll.implies(PermissionType::ExecutionStop));
        assert!(!PermissionType::ExecutionAll.implies(PermissionType::ActionExecute));
        assert!(!PermissionType::ExecutionList.implies(PermissionType::ExecutionListAll));
        assert!(!PermissionType::ExecutionListAll.implies(PermissionType::ExecutionView));
    }

    #[test]
    fn test_grant_scope() {
        let global = PermissionGrant::global([PermissionType::ExecutionList]);
        assert_eq!(global.scope(), GrantScope::Global);

        let typed = PermissionGrant::on_type(ResourceType::Execution, [PermissionType::ExecutionList]);
        assert_eq!(typed.scope(), GrantScope::ResourceType(ResourceType::Execution));

        let instance = PermissionGrant::on_resource("pack:wolfpack", [PermissionType::ActionExecute]);
        assert_eq!(instance.scope(), GrantScope::ResourceInstance("pack:wolfpack"));
    }

    #[test]
    fn test_pack_grant_covers_actions_in_pack() {
        let grant = PermissionGrant::on_resource("pack:wolfpack", [PermissionType::ActionExecute]);
        let inside = ActionDefinition::new("wolfpack", "action-1", "local-shell-cmd");
        let outside = ActionDefinition::new("core", "local", "local-shell-cmd");

        assert!(grant.allows(PermissionType::ActionExecute, &ResourceRef::action(&inside)));
        assert!(!grant.allows(PermissionType::ActionExecute, &ResourceRef::action(&outside)));
        assert!(!grant.allows(PermissionType::ActionView, &ResourceRef::action(&inside)));
    }

    #[test]
    fn test_instance_grant_does_not_cover_type_level_checks() {
        let grant = PermissionGrant::on_resource("pack:wolfpack", [PermissionType::ExecutionAll]);
        assert!(!grant.allows(
            PermissionType::ExecutionList,
            &ResourceRef::of_type(ResourceType::Execution)
        ));
    }

    #[test]
    fn test_type_grant_matches_only_its_type() {
        let grant = PermissionGrant::on_type(ResourceType::Action, [PermissionType::ActionAll]);
        let action = ActionDefinition::new("wolfpack", "action-1", "local-shell-cmd");
        assert!(grant.allows(PermissionType::ActionView, &ResourceRef::action(&action)));
        assert!(!grant.allows(PermissionType::PackView, &ResourceRef::pack("wolfpack")));
    }

    #[test]
    fn test_grant_yaml() {
        let yaml = r#"
resource_uid: pack:wolfpack
permission_types:
  - action_execute
  - action_view
"#;
        let grant: PermissionGrant = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(grant.resource_uid.as_deref(), Some("pack:wolfpack"));
        assert_eq!(grant.permission_types.len(), 2);
    }
}
