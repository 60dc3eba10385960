use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::StoreError;

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    /// Name of the hardcoded role this record replaces, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_enum_name: Option<String>,
    /// `None` for global/system roles.
    pub organization_id: Option<String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            legacy_enum_name: None,
            organization_id: None,
        }
    }

    pub fn with_legacy_name(mut self, legacy: impl Into<String>) -> Self {
        self.legacy_enum_name = Some(legacy.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn is_global(&self) -> bool {
        self.organization_id.is_none()
    }
}

impl TryFrom<&SqliteRow> for Role {
    type Error = StoreError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let id: String = row.try_get("id")?;
        Ok(Role {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("role id {id}: {e}")))?,
            name: row.try_get("name")?,
            legacy_enum_name: row.try_get("legacy_enum_name")?,
            organization_id: row.try_get("organization_id")?,
        })
    }
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// A `(principal, scope) -> role` assignment as stored. Older rows carry only
/// the legacy role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub role_id: Option<Uuid>,
    pub role_name: Option<String>,
}

impl MembershipRecord {
    pub fn with_role_id(role_id: Uuid) -> Self {
        Self {
            role_id: Some(role_id),
            role_name: None,
        }
    }

    pub fn legacy(role_name: impl Into<String>) -> Self {
        Self {
            role_id: None,
            role_name: Some(role_name.into()),
        }
    }
}

impl TryFrom<&SqliteRow> for MembershipRecord {
    type Error = StoreError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let role_id: Option<String> = row.try_get("role_id")?;
        let role_id = role_id
            .map(|raw| Uuid::parse_str(&raw).map_err(|e| StoreError::Corrupt(format!("membership role_id {raw}: {e}"))))
            .transpose()?;
        Ok(MembershipRecord {
            role_id,
            role_name: row.try_get("role_name")?,
        })
    }
}

// =============================================================================
// RESOLVED ROLE
// =============================================================================

/// A principal's effective role in one scope, as produced by the resolver.
///
/// `role_id` is `None` when the role only exists in the static table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<Uuid>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_name: Option<String>,
}

impl RoleDescriptor {
    pub fn stored(role_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            role_id: Some(role_id),
            name: name.into(),
            legacy_name: None,
        }
    }

    pub fn from_role(role: &Role) -> Self {
        Self {
            role_id: Some(role.id),
            name: role.name.clone(),
            legacy_name: role.legacy_enum_name.clone(),
        }
    }

    pub fn static_only(name: impl Into<String>) -> Self {
        Self {
            role_id: None,
            name: name.into(),
            legacy_name: None,
        }
    }
}

// =============================================================================
// AUDIT
// =============================================================================

/// One append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub actor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_ip: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub action_type: String,
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    pub fn new(action_type: impl Into<String>, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tenant_id: None,
            actor_id: None,
            actor_ip: None,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action_type: action_type.into(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_actor(mut self, actor_id: Uuid, tenant_id: Option<String>) -> Self {
        self.actor_id = Some(actor_id);
        self.tenant_id = tenant_id;
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.actor_ip = ip;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
