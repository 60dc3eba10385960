//! Role → permission lookup over two sources.
//!
//! The store-backed table is authoritative for any role that has rows in it.
//! The static table only answers for roles with no dynamic entry, which covers
//! memberships still pointing at a hardcoded role name.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use super::cache::Cache;
use super::permission::PermissionSet;
use super::store::{guarded, RoleStore};
use crate::errors::AuthzError;
use crate::models::rbac::RoleDescriptor;

/// Well-known static role names
pub mod roles {
    pub const LEAD: &str = "Lead";
    pub const MEMBER: &str = "Member";
    pub const VIEWER: &str = "Viewer";
    /// Retired names that carry Member's permissions.
    pub const DEVELOPER: &str = "Developer";
    pub const CONTRIBUTOR: &str = "Contributor";
}

#[derive(Debug, Deserialize)]
struct StaticRoleFile {
    roles: HashMap<String, Vec<String>>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

/// Immutable role-name → permission table for hardcoded roles.
///
/// Built once at start-up and injected; lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleTable {
    /// lowercased name -> (canonical name, permissions)
    roles: HashMap<String, (String, PermissionSet)>,
    /// lowercased alias -> lowercased target
    aliases: HashMap<String, String>,
}

impl StaticRoleTable {
    pub fn builder() -> StaticRoleTableBuilder {
        StaticRoleTableBuilder::default()
    }

    /// The historical Lead / Member / Viewer matrix.
    pub fn builtin() -> Self {
        Self::builder()
            .role(
                roles::LEAD,
                [
                    "projects:view",
                    "projects:update",
                    "issues:manage",
                    "comments:manage",
                    "members:manage",
                    "sprints:manage",
                    "attachments:manage",
                    "backlog:manage",
                    "watchers:manage",
                ],
            )
            .role(
                roles::MEMBER,
                [
                    "projects:view",
                    "members:view",
                    "issues:view",
                    "issues:create",
                    "issues:update",
                    "comments:view",
                    "comments:create",
                    "comments:update",
                    "comments:delete",
                    "sprints:view",
                    "attachments:view",
                    "attachments:create",
                    "backlog:view",
                    "backlog:update",
                    "watchers:view",
                    "watchers:create",
                    "watchers:delete",
                ],
            )
            .role(
                roles::VIEWER,
                [
                    "projects:view",
                    "members:view",
                    "issues:view",
                    "comments:view",
                    "sprints:view",
                    "attachments:view",
                    "backlog:view",
                    "watchers:view",
                ],
            )
            .alias(roles::DEVELOPER, roles::MEMBER)
            .alias(roles::CONTRIBUTOR, roles::MEMBER)
            .build()
    }

    /// Parses `{"roles": {"Name": ["res:act", ...]}, "aliases": {"Old": "Name"}}`.
    pub fn from_json_str(raw: &str) -> Result<Self, AuthzError> {
        let file: StaticRoleFile =
            serde_json::from_str(raw).map_err(|e| AuthzError::config(format!("static role table: {e}")))?;
        let mut builder = Self::builder();
        for (name, perms) in file.roles {
            builder = builder.role(&name, perms);
        }
        for (alias, target) in file.aliases {
            builder = builder.alias(&alias, &target);
        }
        let table = builder.build();
        if let Some(dangling) = table.aliases.iter().find(|(_, target)| !table.roles.contains_key(*target)) {
            return Err(AuthzError::config(format!(
                "static role alias '{}' points at unknown role '{}'",
                dangling.0, dangling.1
            )));
        }
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AuthzError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AuthzError::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    fn entry(&self, name: &str) -> Option<&(String, PermissionSet)> {
        let key = name.trim().to_ascii_lowercase();
        let key = self.aliases.get(&key).unwrap_or(&key);
        self.roles.get(key)
    }

    /// Canonical role name for `name` after alias resolution.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.entry(name).map(|(canonical, _)| canonical.as_str())
    }

    pub fn permissions_for(&self, name: &str) -> Option<&PermissionSet> {
        self.entry(name).map(|(_, perms)| perms)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Canonical role names with their permission sets (aliases excluded).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PermissionSet)> {
        self.roles.values().map(|(name, perms)| (name.as_str(), perms))
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(alias, target)| (alias.as_str(), target.as_str()))
    }
}

#[derive(Debug, Default)]
pub struct StaticRoleTableBuilder {
    table: StaticRoleTable,
}

impl StaticRoleTableBuilder {
    pub fn role<I, S>(mut self, name: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.table.roles.insert(
            name.trim().to_ascii_lowercase(),
            (name.trim().to_string(), PermissionSet::from_strings(permissions)),
        );
        self
    }

    pub fn alias(mut self, alias: &str, target: &str) -> Self {
        self.table
            .aliases
            .insert(alias.trim().to_ascii_lowercase(), target.trim().to_ascii_lowercase());
        self
    }

    pub fn build(self) -> StaticRoleTable {
        self.table
    }
}

/// Which table answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionSource {
    Dynamic,
    Static,
    /// Neither table knows the role; it grants nothing.
    Unknown,
}

impl PermissionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionSource::Dynamic => "dynamic",
            PermissionSource::Static => "static",
            PermissionSource::Unknown => "unknown",
        }
    }
}

pub struct PermissionCatalog {
    static_table: Arc<StaticRoleTable>,
    roles: Arc<dyn RoleStore>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    store_timeout: Duration,
}

impl PermissionCatalog {
    pub fn new(
        static_table: Arc<StaticRoleTable>,
        roles: Arc<dyn RoleStore>,
        cache: Arc<dyn Cache>,
        ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            static_table,
            roles,
            cache,
            ttl,
            store_timeout,
        }
    }

    pub fn static_table(&self) -> &StaticRoleTable {
        &self.static_table
    }

    pub async fn get_permissions(&self, role: &RoleDescriptor) -> Result<PermissionSet, AuthzError> {
        self.lookup(role).await.map(|(perms, _)| perms)
    }

    /// Permissions for `role` and the table that supplied them.
    ///
    /// A role with a store record is authoritative even when it has no
    /// permission rows left; the static table only answers for roles that
    /// were never migrated.
    pub async fn lookup(&self, role: &RoleDescriptor) -> Result<(PermissionSet, PermissionSource), AuthzError> {
        if let Some(role_id) = role.role_id {
            let dynamic = self.dynamic_permissions(role_id).await?;
            if dynamic.is_empty() && guarded(self.store_timeout, self.roles.get_role(role_id)).await?.is_none() {
                tracing::warn!(%role_id, role = %role.name, "membership references a missing role record");
                return Ok((PermissionSet::new(), PermissionSource::Unknown));
            }
            return Ok((dynamic, PermissionSource::Dynamic));
        }

        let static_perms = role
            .legacy_name
            .as_deref()
            .and_then(|legacy| self.static_table.permissions_for(legacy))
            .or_else(|| self.static_table.permissions_for(&role.name));

        match static_perms {
            Some(perms) => Ok((perms.clone(), PermissionSource::Static)),
            None => {
                tracing::debug!(role = %role.name, "role has no dynamic or static permissions");
                Ok((PermissionSet::new(), PermissionSource::Unknown))
            }
        }
    }

    /// Store-backed permissions, cached by role id.
    async fn dynamic_permissions(&self, role_id: Uuid) -> Result<PermissionSet, AuthzError> {
        let key = format!("role_permissions:{role_id}");

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(cached) => return Ok(PermissionSet::from_strings(cached)),
                Err(err) => tracing::warn!(%role_id, error = %err, "discarding unreadable permission cache entry"),
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(%role_id, error = %err, "permission cache read failed, falling back to store"),
        }

        let rows = guarded(self.store_timeout, self.roles.get_permissions(role_id)).await?;

        match serde_json::to_string(&rows) {
            Ok(raw) => {
                if let Err(err) = self.cache.set(&key, raw, self.ttl).await {
                    tracing::warn!(%role_id, error = %err, "permission cache write failed");
                }
            }
            Err(err) => tracing::warn!(%role_id, error = %err, "failed to encode permissions for cache"),
        }

        Ok(PermissionSet::from_strings(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::cache::InMemoryCache;
    use crate::authz::permission::Permission;
    use crate::authz::store::InMemoryRoleStore;
    use crate::models::rbac::Role;

    fn catalog(store: Arc<InMemoryRoleStore>) -> PermissionCatalog {
        PermissionCatalog::new(
            Arc::new(StaticRoleTable::builtin()),
            store,
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(300),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn retired_names_alias_member() {
        let table = StaticRoleTable::builtin();
        assert_eq!(table.permissions_for("Developer"), table.permissions_for("Member"));
        assert_eq!(table.permissions_for("contributor"), table.permissions_for("MEMBER"));
        assert_eq!(table.canonical_name("developer"), Some("Member"));
        assert!(!table.contains("Owner"));
    }

    #[test]
    fn json_table_rejects_dangling_alias() {
        let raw = r#"{"roles": {"Lead": ["issues:manage"]}, "aliases": {"Boss": "Chief"}}"#;
        assert!(StaticRoleTable::from_json_str(raw).is_err());
    }

    #[tokio::test]
    async fn dynamic_entry_overrides_static() {
        let store = Arc::new(InMemoryRoleStore::new());
        let role = Role::new("Member").with_legacy_name("MEMBER");
        store.insert_role(role.clone(), ["issues:view"]);
        let catalog = catalog(store);

        let (perms, source) = catalog.lookup(&RoleDescriptor::from_role(&role)).await.unwrap();
        assert_eq!(source, PermissionSource::Dynamic);
        assert_eq!(perms.to_strings(), vec!["issues:view"]);
        assert!(!perms.allows(&Permission::parse("comments:update").unwrap()));
    }

    #[tokio::test]
    async fn static_used_for_unmigrated_roles() {
        let catalog = catalog(Arc::new(InMemoryRoleStore::new()));
        let (perms, source) = catalog.lookup(&RoleDescriptor::static_only("Member")).await.unwrap();
        assert_eq!(source, PermissionSource::Static);
        assert!(perms.allows(&Permission::parse("comments:update").unwrap()));
    }

    #[tokio::test]
    async fn stored_role_without_permissions_grants_nothing() {
        let store = Arc::new(InMemoryRoleStore::new());
        let lead = Role::new("Lead").with_legacy_name("Lead");
        store.insert_role(lead.clone(), Vec::<String>::new());
        let catalog = catalog(store);

        let (perms, source) = catalog.lookup(&RoleDescriptor::from_role(&lead)).await.unwrap();
        assert_eq!(source, PermissionSource::Dynamic);
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn dangling_role_id_grants_nothing() {
        let catalog = catalog(Arc::new(InMemoryRoleStore::new()));
        let (perms, source) = catalog
            .lookup(&RoleDescriptor::stored(Uuid::new_v4(), "Lead"))
            .await
            .unwrap();
        assert_eq!(source, PermissionSource::Unknown);
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn unknown_role_grants_nothing() {
        let catalog = catalog(Arc::new(InMemoryRoleStore::new()));
        let (perms, source) = catalog
            .lookup(&RoleDescriptor::static_only("Auditor"))
            .await
            .unwrap();
        assert_eq!(source, PermissionSource::Unknown);
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn dynamic_permissions_are_cached() {
        let store = Arc::new(InMemoryRoleStore::new());
        let role = Role::new("Reporter");
        store.insert_role(role.clone(), ["issues:create"]);
        let catalog = catalog(store.clone());
        let descriptor = RoleDescriptor::from_role(&role);

        catalog.get_permissions(&descriptor).await.unwrap();
        catalog.get_permissions(&descriptor).await.unwrap();
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn store_outage_is_an_error_not_an_empty_set() {
        let store = Arc::new(InMemoryRoleStore::new());
        store.set_unavailable(true);
        let catalog = catalog(store);
        let err = catalog
            .get_permissions(&RoleDescriptor::stored(Uuid::new_v4(), "Member"))
            .await
            .unwrap_err();
        assert!(err.deny_reason().is_outage());
    }
}
