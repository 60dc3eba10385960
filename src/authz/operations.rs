use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::permission::Permission;
use crate::errors::AuthzError;

/// What a protected operation requires.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationPolicy {
    pub permission: Permission,
    /// Also audit successful checks.
    #[serde(default)]
    pub audit_on_allow: bool,
}

/// Declarative table: operation id -> required permission.
///
/// Operation ids are whatever the caller dispatches on; the axum middleware
/// uses `"METHOD /matched/path"`, e.g. `"DELETE /projects/:project_id/issues/:issue_id"`.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationPolicy>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(mut self, operation: impl Into<String>, permission: Permission) -> Self {
        self.operations.insert(
            operation.into(),
            OperationPolicy {
                permission,
                audit_on_allow: false,
            },
        );
        self
    }

    /// Like [`declare`](Self::declare) but also audits allowed calls.
    pub fn declare_sensitive(mut self, operation: impl Into<String>, permission: Permission) -> Self {
        self.operations.insert(
            operation.into(),
            OperationPolicy {
                permission,
                audit_on_allow: true,
            },
        );
        self
    }

    pub fn policy(&self, operation: &str) -> Option<&OperationPolicy> {
        self.operations.get(operation)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Parses `{"GET /projects/:project_id": {"permission": "projects:view"}, ...}`.
    pub fn from_json_str(raw: &str) -> Result<Self, AuthzError> {
        let operations: HashMap<String, OperationPolicy> =
            serde_json::from_str(raw).map_err(|e| AuthzError::config(format!("operation table: {e}")))?;
        Ok(Self { operations })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AuthzError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AuthzError::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Operation table for the project-management API.
    pub fn platform_defaults() -> Result<Self, AuthzError> {
        let table = [
            ("POST /projects", "projects:create", false),
            ("GET /projects/:project_id", "projects:view", false),
            ("PUT /projects/:project_id", "projects:update", false),
            ("DELETE /projects/:project_id", "projects:delete", true),
            ("GET /projects/:project_id/members", "members:view", false),
            ("POST /projects/:project_id/members", "members:create", true),
            ("DELETE /projects/:project_id/members/:member_id", "members:delete", true),
            ("GET /projects/:project_id/issues", "issues:view", false),
            ("POST /projects/:project_id/issues", "issues:create", false),
            ("PUT /projects/:project_id/issues/:issue_id", "issues:update", false),
            ("DELETE /projects/:project_id/issues/:issue_id", "issues:delete", false),
            ("GET /projects/:project_id/issues/:issue_id/comments", "comments:view", false),
            ("POST /projects/:project_id/issues/:issue_id/comments", "comments:create", false),
            ("PUT /projects/:project_id/comments/:comment_id", "comments:update", false),
            ("DELETE /projects/:project_id/comments/:comment_id", "comments:delete", false),
            ("GET /projects/:project_id/sprints", "sprints:view", false),
            ("POST /projects/:project_id/sprints", "sprints:create", false),
            ("GET /projects/:project_id/backlog", "backlog:view", false),
            ("PUT /projects/:project_id/backlog", "backlog:update", false),
            ("POST /projects/:project_id/attachments", "attachments:create", false),
            ("POST /projects/:project_id/issues/:issue_id/watchers", "watchers:create", false),
            ("GET /users/me/notification-preferences", "notifications:view", false),
            ("PUT /users/me/notification-preferences", "notifications:update", false),
        ];

        let mut operations = HashMap::with_capacity(table.len());
        for (operation, permission, audit_on_allow) in table {
            let permission = Permission::parse(permission).map_err(|e| AuthzError::config(e.to_string()))?;
            operations.insert(
                operation.to_string(),
                OperationPolicy {
                    permission,
                    audit_on_allow,
                },
            );
        }
        Ok(Self { operations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_table_parses_permissions() {
        let raw = r#"{
            "DELETE /projects/:project_id": {"permission": "Projects:Delete", "audit_on_allow": true},
            "GET /projects/:project_id": {"permission": "projects:read"}
        }"#;
        let registry = OperationRegistry::from_json_str(raw).unwrap();
        let delete = registry.policy("DELETE /projects/:project_id").unwrap();
        assert_eq!(delete.permission.to_string(), "projects:delete");
        assert!(delete.audit_on_allow);
        assert_eq!(
            registry.policy("GET /projects/:project_id").unwrap().permission.to_string(),
            "projects:view"
        );
    }

    #[test]
    fn json_table_rejects_bad_permission() {
        assert!(OperationRegistry::from_json_str(r#"{"GET /x": {"permission": "x"}}"#).is_err());
    }

    #[test]
    fn platform_defaults_are_valid() {
        let registry = OperationRegistry::platform_defaults().unwrap();
        assert!(registry.policy("PUT /projects/:project_id/comments/:comment_id").is_some());
        assert!(registry.policy("GET /unknown").is_none());
    }
}
