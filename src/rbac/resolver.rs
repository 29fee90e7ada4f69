//! Access-Control Resolver
//!
//! Answers "may this user do this to that resource" against one
//! [`RbacSnapshot`]. Each call reads the snapshot it was built with, so a
//! resolution never sees a half-applied reload and two users' checks never
//! influence each other.

use std::sync::Arc;

use log::debug;

use super::snapshot::{RbacSnapshot, SYSTEM_ADMIN_ROLE};
use super::types::{PermissionType, ResourceRef};

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,

    /// Sorted names of every role the user holds, regardless of `allow`
    pub roles: Vec<String>,
}

/// Resolves permissions for users against a snapshot.
#[derive(Debug, Clone)]
pub struct AccessResolver {
    snapshot: Arc<RbacSnapshot>,
    default_role: String,
    system_user: String,
}

impl AccessResolver {
    pub fn new(
        snapshot: Arc<RbacSnapshot>,
        default_role: impl Into<String>,
        system_user: impl Into<String>,
    ) -> Self {
        Self {
            snapshot,
            default_role: default_role.into(),
            system_user: system_user.into(),
        }
    }

    pub fn snapshot(&self) -> &RbacSnapshot {
        &self.snapshot
    }

    /// Returns the sorted, de-duplicated role names for a user.
    ///
    /// Users with no assignment get the default role. The system user always
    /// holds `system_admin` on top of anything assigned.
    pub fn roles_for(&self, user: &str) -> Vec<String> {
        let mut roles: Vec<String> = self
            .snapshot
            .assignments_for(user)
            .map(|a| a.role.clone())
            .collect();

        if user == self.system_user {
            roles.push(SYSTEM_ADMIN_ROLE.to_string());
        }
        if roles.is_empty() && self.snapshot.role(&self.default_role).is_some() {
            roles.push(self.default_role.clone());
        }

        roles.sort();
        roles.dedup();
        roles
    }

    /// Returns true if any of the user's roles is a system role.
    pub fn is_system(&self, user: &str) -> bool {
        self.roles_for(user)
            .iter()
            .filter_map(|name| self.snapshot.role(name))
            .any(|role| role.system)
    }

    /// Checks one permission on one resource.
    pub fn resolve(&self, user: &str, permission: PermissionType, resource: &ResourceRef) -> Decision {
        let roles = self.roles_for(user);

        let allow = roles
            .iter()
            .filter_map(|name| self.snapshot.role(name))
            .any(|role| role.system || role.grants.iter().any(|g| g.allows(permission, resource)));

        debug!(
            "RBAC: user '{}' {} '{}' on '{}' (roles: {:?})",
            user,
            if allow { "granted" } else { "denied" },
            permission,
            resource,
            roles
        );

        Decision { allow, roles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::snapshot::{ADMIN_ROLE, OBSERVER_ROLE};
    use crate::rbac::types::{PermissionGrant, ResourceType, Role};
    use crate::workflow::ActionDefinition;

    fn snapshot() -> RbacSnapshot {
        RbacSnapshot::new()
            .with_role(Role::new("role_1"))
            .unwrap()
            .with_role(Role::new("role_2"))
            .unwrap()
            .with_role(Role::new("role_3"))
            .unwrap()
            .with_role(
                Role::new("role_4")
                    .with_grant(PermissionGrant::on_resource(
                        "pack:wolfpack",
                        [PermissionType::ActionExecute],
                    ))
                    .with_grant(PermissionGrant::global([PermissionType::ExecutionList])),
            )
            .unwrap()
            .with_assignment("admin", &[ADMIN_ROLE])
            .unwrap()
            .with_assignment("observer", &[OBSERVER_ROLE])
            .unwrap()
            .with_assignment("multiple_roles", &[ADMIN_ROLE, "role_1", "role_2", "role_3"])
            .unwrap()
            .with_assignment("user_four", &["role_4"])
            .unwrap()
    }

    fn resolver() -> AccessResolver {
        AccessResolver::new(Arc::new(snapshot()), OBSERVER_ROLE, "stanley")
    }

    #[test]
    fn test_roles_are_sorted_and_complete() {
        let resolver = resolver();
        assert_eq!(
            resolver.roles_for("multiple_roles"),
            vec!["admin", "role_1", "role_2", "role_3"]
        );
    }

    #[test]
    fn test_default_role_for_unassigned_user() {
        assert_eq!(resolver().roles_for("nobody"), vec![OBSERVER_ROLE]);
    }

    #[test]
    fn test_system_user_is_system_admin() {
        let resolver = resolver();
        assert_eq!(resolver.roles_for("stanley"), vec![SYSTEM_ADMIN_ROLE]);
        assert!(resolver.is_system("stanley"));
        assert!(!resolver.is_system("observer"));
    }

    #[test]
    fn test_roles_reported_when_denied() {
        let decision = resolver().resolve(
            "observer",
            PermissionType::ExecutionListAll,
            &ResourceRef::of_type(ResourceType::Execution),
        );
        assert!(!decision.allow);
        assert_eq!(decision.roles, vec![OBSERVER_ROLE]);
    }

    #[test]
    fn test_admin_always_allowed() {
        let decision = resolver().resolve(
            "admin",
            PermissionType::ExecutionListAll,
            &ResourceRef::of_type(ResourceType::Execution),
        );
        assert!(decision.allow);
    }

    #[test]
    fn test_pack_scoped_execute() {
        let resolver = resolver();
        let wolf = ActionDefinition::new("wolfpack", "action-1", "local-shell-cmd");
        let core = ActionDefinition::new("core", "local", "local-shell-cmd");

        assert!(resolver
            .resolve("user_four", PermissionType::ActionExecute, &ResourceRef::action(&wolf))
            .allow);
        assert!(!resolver
            .resolve("user_four", PermissionType::ActionExecute, &ResourceRef::action(&core))
            .allow);
        assert!(!resolver
            .resolve("observer", PermissionType::ActionExecute, &ResourceRef::action(&wolf))
            .allow);
    }

    #[test]
    fn test_bounded_list_does_not_grant_list_all() {
        let resolver = resolver();
        let executions = ResourceRef::of_type(ResourceType::Execution);
        assert!(resolver
            .resolve("user_four", PermissionType::ExecutionList, &executions)
            .allow);
        assert!(!resolver
            .resolve("user_four", PermissionType::ExecutionListAll, &executions)
            .allow);
    }

    #[test]
    fn test_no_cross_talk_between_users() {
        let resolver = resolver();
        let executions = ResourceRef::of_type(ResourceType::Execution);

        let admin = resolver.resolve("admin", PermissionType::ExecutionListAll, &executions);
        let observer = resolver.resolve("observer", PermissionType::ExecutionListAll, &executions);
        let admin_again = resolver.resolve("admin", PermissionType::ExecutionListAll, &executions);

        assert!(admin.allow);
        assert!(!observer.allow);
        assert_eq!(admin, admin_again);
    }

    #[test]
    fn test_unrelated_grants_do_not_change_decisions() {
        let wolf = ActionDefinition::new("wolfpack", "action-1", "local-shell-cmd");
        let checks = [
            (PermissionType::ActionExecute, ResourceRef::action(&wolf)),
            (PermissionType::ExecutionListAll, ResourceRef::of_type(ResourceType::Execution)),
            (PermissionType::ExecutionStop, ResourceRef::of_type(ResourceType::Execution)),
        ];
        let decide = |snapshot: RbacSnapshot| -> Vec<Decision> {
            let resolver = AccessResolver::new(Arc::new(snapshot), OBSERVER_ROLE, "stanley");
            checks
                .iter()
                .map(|(permission, resource)| resolver.resolve("user_four", *permission, resource))
                .collect()
        };

        let before = decide(snapshot());
        assert_eq!(
            before.iter().map(|d| d.allow).collect::<Vec<_>>(),
            vec![true, false, false]
        );

        // Broad grant on a role user_four does not hold
        let unheld = snapshot()
            .with_role(Role::new("role_1").with_grant(PermissionGrant::global(PermissionType::ALL)))
            .unwrap();
        assert_eq!(decide(unheld), before);

        // Grant on a held role that covers none of the checked resources
        let held = snapshot()
            .with_role(
                Role::new("role_4")
                    .with_grant(PermissionGrant::on_resource(
                        "pack:wolfpack",
                        [PermissionType::ActionExecute],
                    ))
                    .with_grant(PermissionGrant::global([PermissionType::ExecutionList]))
                    .with_grant(PermissionGrant::on_resource(
                        "pack:core",
                        [PermissionType::ExecutionListAll, PermissionType::ExecutionStop],
                    )),
            )
            .unwrap();
        assert_eq!(decide(held), before);
    }
}
