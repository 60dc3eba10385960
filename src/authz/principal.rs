use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Principal represents the authenticated user for one request.
///
/// Supplied by the authentication layer and trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    #[serde(default)]
    pub is_super_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub email: String,
}

impl Principal {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            is_super_admin: false,
            organization_id: None,
            email: email.into(),
        }
    }

    pub fn super_admin(mut self) -> Self {
        self.is_super_admin = true;
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Project,
    Organization,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Project => "project",
            ScopeKind::Organization => "organization",
        }
    }
}

/// The tenant/project boundary a role assignment applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub id: Uuid,
}

impl Scope {
    pub fn project(id: Uuid) -> Self {
        Self { kind: ScopeKind::Project, id }
    }

    pub fn organization(id: Uuid) -> Self {
        Self { kind: ScopeKind::Organization, id }
    }

    /// Role cache key: `{scope}:{resourceId}:{principalId}`.
    pub fn cache_key(&self, principal_id: Uuid) -> String {
        format!("{}:{}:{}", self.kind.as_str(), self.id, principal_id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_layout() {
        let scope_id = Uuid::new_v4();
        let principal_id = Uuid::new_v4();
        assert_eq!(
            Scope::project(scope_id).cache_key(principal_id),
            format!("project:{scope_id}:{principal_id}")
        );
    }
}
