//! RBAC Snapshot
//!
//! An immutable view of roles and assignments. Snapshots are built up
//! front (from code or from a directory of YAML files) and swapped whole;
//! nothing mutates a snapshot that a resolver is reading.
//!
//! Directory layout:
//!
//! ```text
//! rbac/
//!   roles/*.yaml         # one role per file
//!   assignments/*.yaml   # {username, roles: [...]} per file
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

use super::types::{PermissionGrant, PermissionType, Role, RoleAssignment};

pub const SYSTEM_ADMIN_ROLE: &str = "system_admin";
pub const ADMIN_ROLE: &str = "admin";
pub const OBSERVER_ROLE: &str = "observer";

/// Roles every snapshot starts with.
static BUILTIN_ROLES: Lazy<Vec<Role>> = Lazy::new(|| {
    let view_and_list = PermissionType::ALL
        .into_iter()
        .filter(PermissionType::is_view_or_list);

    vec![
        Role::new(SYSTEM_ADMIN_ROLE)
            .with_description("Full access, including role management")
            .system(),
        Role::new(ADMIN_ROLE)
            .with_description("Full access to every resource")
            .system(),
        Role::new(OBSERVER_ROLE)
            .with_description("Read-only access to every resource")
            .with_grant(PermissionGrant::global(view_and_list)),
    ]
});

/// On-disk assignment file.
#[derive(Deserialize, Debug)]
struct AssignmentFile {
    username: String,

    #[serde(default)]
    roles: Vec<String>,
}

/// Roles and assignments the resolver reads from.
#[derive(Debug, Clone)]
pub struct RbacSnapshot {
    roles: BTreeMap<String, Role>,
    assignments: Vec<RoleAssignment>,
}

impl Default for RbacSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl RbacSnapshot {
    /// Creates a snapshot holding only the built-in roles.
    pub fn new() -> Self {
        let roles = BUILTIN_ROLES
            .iter()
            .map(|role| (role.name.clone(), role.clone()))
            .collect();

        Self {
            roles,
            assignments: Vec::new(),
        }
    }

    /// Adds a custom role.
    ///
    /// # Errors
    ///
    /// Fails if the name belongs to a system role.
    pub fn add_role(&mut self, role: Role) -> EngineResult<()> {
        if self.roles.get(&role.name).is_some_and(|r| r.system) {
            return Err(EngineError::Config(format!(
                "Role '{}' is a system role and cannot be redefined",
                role.name
            )));
        }
        if role.system {
            return Err(EngineError::Config(format!(
                "Role '{}' cannot be declared as a system role",
                role.name
            )));
        }

        debug!("Registered role '{}' with {} grants", role.name, role.grants.len());
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Assigns an existing role to a user.
    pub fn assign(
        &mut self,
        user: impl Into<String>,
        role: impl Into<String>,
        source: impl Into<String>,
    ) -> EngineResult<()> {
        let assignment = RoleAssignment {
            user: user.into(),
            role: role.into(),
            source: source.into(),
        };

        if !self.roles.contains_key(&assignment.role) {
            return Err(EngineError::Config(format!(
                "Assignment for '{}' references unknown role '{}'",
                assignment.user, assignment.role
            )));
        }
        if self
            .assignments
            .iter()
            .any(|a| a.user == assignment.user && a.role == assignment.role)
        {
            return Ok(());
        }

        self.assignments.push(assignment);
        Ok(())
    }

    /// Builder form of [`RbacSnapshot::add_role`].
    pub fn with_role(mut self, role: Role) -> EngineResult<Self> {
        self.add_role(role)?;
        Ok(self)
    }

    /// Builder form of [`RbacSnapshot::assign`] for assignments made in code.
    pub fn with_assignment(mut self, user: &str, roles: &[&str]) -> EngineResult<Self> {
        for role in roles {
            self.assign(user, *role, "api")?;
        }
        Ok(self)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn assignments_for<'a>(&'a self, user: &'a str) -> impl Iterator<Item = &'a RoleAssignment> {
        self.assignments.iter().filter(move |a| a.user == user)
    }

    /// Loads custom roles and assignments from an RBAC directory.
    ///
    /// Missing `roles/` or `assignments/` subdirectories are treated as empty.
    pub fn load_from_dir(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        info!("Loading RBAC definitions from: {}", path.display());

        let mut snapshot = Self::new();

        for file in yaml_files(&path.join("roles"))? {
            let role: Role = serde_yaml::from_str(&fs::read_to_string(&file)?)?;
            snapshot.add_role(role)?;
        }

        for file in yaml_files(&path.join("assignments"))? {
            let parsed: AssignmentFile = serde_yaml::from_str(&fs::read_to_string(&file)?)?;
            let source = file
                .strip_prefix(path)
                .unwrap_or(file.as_path())
                .to_string_lossy()
                .replace('\\', "/");

            if parsed.roles.is_empty() {
                warn!("Assignment file '{}' grants no roles", source);
            }
            for role in &parsed.roles {
                snapshot.assign(&parsed.username, role, &source)?;
            }
        }

        info!(
            "Loaded {} roles and {} assignments",
            snapshot.roles.len(),
            snapshot.assignments.len()
        );
        Ok(snapshot)
    }
}

/// Lists `*.yaml` / `*.yml` files in a directory in name order.
fn yaml_files(dir: &Path) -> EngineResult<Vec<std::path::PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if path.is_file() && is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::types::ResourceType;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_roles() {
        let snapshot = RbacSnapshot::new();
        assert!(snapshot.role(SYSTEM_ADMIN_ROLE).unwrap().system);
        assert!(snapshot.role(ADMIN_ROLE).unwrap().system);

        let observer = snapshot.role(OBSERVER_ROLE).unwrap();
        assert!(!observer.system);
        let granted = &observer.grants[0].permission_types;
        assert!(granted.contains(&PermissionType::ExecutionList));
        assert!(!granted.contains(&PermissionType::ExecutionListAll));
        assert!(!granted.contains(&PermissionType::ActionExecute));
    }

    #[test]
    fn test_system_roles_cannot_be_redefined() {
        let mut snapshot = RbacSnapshot::new();
        assert!(snapshot.add_role(Role::new(ADMIN_ROLE)).is_err());
        assert!(snapshot.add_role(Role::new("ops").system()).is_err());
    }

    #[test]
    fn test_assign_unknown_role() {
        let mut snapshot = RbacSnapshot::new();
        assert!(matches!(
            snapshot.assign("alice", "ghost", "api"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_assignment_ignored() {
        let snapshot = RbacSnapshot::new()
            .with_assignment("alice", &[OBSERVER_ROLE, OBSERVER_ROLE])
            .unwrap();
        assert_eq!(snapshot.assignments_for("alice").count(), 1);
        assert_eq!(snapshot.assignments_for("bob").count(), 0);
    }

    #[test]
    fn test_load_from_dir() {
        let temp_dir = tempdir().unwrap();
        let roles = temp_dir.path().join("roles");
        let assignments = temp_dir.path().join("assignments");
        fs::create_dir_all(&roles).unwrap();
        fs::create_dir_all(&assignments).unwrap();

        fs::write(
            roles.join("role_4.yaml"),
            r#"
name: role_4
description: Execute wolfpack actions and list executions
permission_grants:
  - resource_uid: pack:wolfpack
    permission_types: [action_execute]
  - resource_type: execution
    permission_types: [execution_list]
"#,
        )
        .unwrap();
        fs::write(
            assignments.join("user_four.yaml"),
            "username: user_four\nroles: [role_4, observer]\n",
        )
        .unwrap();
        fs::write(assignments.join("README.md"), "ignored").unwrap();

        let snapshot = RbacSnapshot::load_from_dir(temp_dir.path()).unwrap();

        let role = snapshot.role("role_4").unwrap();
        assert_eq!(role.grants.len(), 2);
        assert_eq!(role.grants[1].resource_type, Some(ResourceType::Execution));

        let assigned: Vec<_> = snapshot.assignments_for("user_four").collect();
        assert_eq!(assigned.len(), 2);
        assert_eq!(assigned[0].source, "assignments/user_four.yaml");
    }

    #[test]
    fn test_load_from_missing_dir() {
        let temp_dir = tempdir().unwrap();
        let snapshot = RbacSnapshot::load_from_dir(temp_dir.path().join("absent")).unwrap();
        assert_eq!(snapshot.roles().count(), 3);
    }

    #[test]
    fn test_load_rejects_unknown_role_in_assignment() {
        let temp_dir = tempdir().unwrap();
        let assignments = temp_dir.path().join("assignments");
        fs::create_dir_all(&assignments).unwrap();
        fs::write(assignments.join("x.yaml"), "username: x\nroles: [nope]\n").unwrap();

        assert!(RbacSnapshot::load_from_dir(temp_dir.path()).is_err());
    }
}
