use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::cache::Cache;
use super::catalog::StaticRoleTable;
use super::principal::Scope;
use super::store::{guarded, MembershipStore, RoleStore};
use crate::errors::AuthzError;
use crate::models::rbac::{MembershipRecord, RoleDescriptor};

/// Resolves a principal's role in a scope, cache-aside over the membership store.
pub struct RoleResolver {
    memberships: Arc<dyn MembershipStore>,
    roles: Arc<dyn RoleStore>,
    static_table: Arc<StaticRoleTable>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    store_timeout: Duration,
}

impl RoleResolver {
    pub fn new(
        memberships: Arc<dyn MembershipStore>,
        roles: Arc<dyn RoleStore>,
        static_table: Arc<StaticRoleTable>,
        cache: Arc<dyn Cache>,
        ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            memberships,
            roles,
            static_table,
            cache,
            ttl,
            store_timeout,
        }
    }

    /// `Ok(None)` means the principal is not a member of `scope`.
    ///
    /// Store failures and timeouts come back as `Err`, never as `None`.
    pub async fn resolve(&self, principal_id: Uuid, scope: &Scope) -> Result<Option<RoleDescriptor>, AuthzError> {
        let key = scope.cache_key(principal_id);

        if let Some(hit) = self.cached(&key).await {
            tracing::debug!(%principal_id, %scope, role = %hit.name, "role cache hit");
            return Ok(Some(hit));
        }

        let record = guarded(self.store_timeout, self.memberships.get_role(scope.id, principal_id)).await?;
        let Some(record) = record else {
            return Ok(None);
        };

        let role = self.bridge(record).await?;
        self.remember(&key, &role).await;
        Ok(Some(role))
    }

    async fn cached(&self, key: &str) -> Option<RoleDescriptor> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(role) => Some(role),
                Err(err) => {
                    tracing::warn!(key, error = %err, "discarding unreadable role cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "role cache read failed, falling back to store");
                None
            }
        }
    }

    async fn remember(&self, key: &str, role: &RoleDescriptor) {
        let raw = match serde_json::to_string(role) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode role for cache");
                return;
            }
        };
        match self.cache.set(key, raw, self.ttl).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(key, "role cache refused write"),
            Err(err) => tracing::warn!(key, error = %err, "role cache write failed"),
        }
    }

    /// Turns a membership row into a role: direct id first, then the legacy
    /// name bridge in the role store, then the static table.
    async fn bridge(&self, record: MembershipRecord) -> Result<RoleDescriptor, AuthzError> {
        if let Some(role_id) = record.role_id {
            let name = match record.role_name {
                Some(name) => name,
                None => guarded(self.store_timeout, self.roles.get_role(role_id))
                    .await?
                    .map(|role| role.name)
                    .unwrap_or_else(|| role_id.to_string()),
            };
            return Ok(RoleDescriptor::stored(role_id, name));
        }

        let Some(legacy) = record.role_name else {
            tracing::warn!("membership row carries neither role id nor role name");
            return Err(AuthzError::RoleUnresolvable(String::new()));
        };

        if let Some(role) = guarded(self.store_timeout, self.roles.get_role_by_legacy_name(&legacy)).await? {
            tracing::debug!(legacy = %legacy, role_id = %role.id, "legacy role bridged to role record");
            let mut descriptor = RoleDescriptor::from_role(&role);
            descriptor.legacy_name.get_or_insert(legacy);
            return Ok(descriptor);
        }

        match self.static_table.canonical_name(&legacy) {
            Some(canonical) => {
                // Retired aliases follow their canonical role once it has been migrated.
                if !canonical.eq_ignore_ascii_case(legacy.trim()) {
                    if let Some(role) =
                        guarded(self.store_timeout, self.roles.get_role_by_legacy_name(canonical)).await?
                    {
                        tracing::debug!(legacy = %legacy, canonical, role_id = %role.id, "retired role bridged through its canonical name");
                        return Ok(RoleDescriptor::from_role(&role));
                    }
                }
                Ok(RoleDescriptor::static_only(canonical))
            }
            None => {
                tracing::warn!(legacy = %legacy, "legacy role has no role record or static entry; migration incomplete");
                Err(AuthzError::RoleUnresolvable(legacy))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::cache::InMemoryCache;
    use crate::authz::store::{InMemoryMembershipStore, InMemoryRoleStore};
    use crate::errors::DenyReason;
    use crate::models::rbac::Role;

    struct Fixture {
        memberships: Arc<InMemoryMembershipStore>,
        roles: Arc<InMemoryRoleStore>,
        resolver: RoleResolver,
    }

    fn fixture() -> Fixture {
        let memberships = Arc::new(InMemoryMembershipStore::new());
        let roles = Arc::new(InMemoryRoleStore::new());
        let resolver = RoleResolver::new(
            memberships.clone(),
            roles.clone(),
            Arc::new(StaticRoleTable::builtin()),
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(300),
            Duration::from_millis(200),
        );
        Fixture {
            memberships,
            roles,
            resolver,
        }
    }

    #[tokio::test]
    async fn non_member_resolves_to_none() {
        let fx = fixture();
        let scope = Scope::project(Uuid::new_v4());
        assert_eq!(fx.resolver.resolve(Uuid::new_v4(), &scope).await.unwrap(), None);
    }

    #[tokio::test]
    async fn direct_role_id_wins() {
        let fx = fixture();
        let role = Role::new("Maintainer");
        fx.roles.insert_role(role.clone(), ["issues:manage"]);
        let (scope, user) = (Scope::project(Uuid::new_v4()), Uuid::new_v4());
        fx.memberships.assign(scope.id, user, MembershipRecord::with_role_id(role.id));

        let resolved = fx.resolver.resolve(user, &scope).await.unwrap().unwrap();
        assert_eq!(resolved.role_id, Some(role.id));
        assert_eq!(resolved.name, "Maintainer");
    }

    #[tokio::test]
    async fn legacy_name_bridges_through_role_store() {
        let fx = fixture();
        let role = Role::new("Project Lead").with_legacy_name("LEAD");
        fx.roles.insert_role(role.clone(), ["issues:manage"]);
        let (scope, user) = (Scope::project(Uuid::new_v4()), Uuid::new_v4());
        fx.memberships.assign(scope.id, user, MembershipRecord::legacy("Lead"));

        let resolved = fx.resolver.resolve(user, &scope).await.unwrap().unwrap();
        assert_eq!(resolved.role_id, Some(role.id));
    }

    #[tokio::test]
    async fn legacy_name_falls_back_to_static_table() {
        let fx = fixture();
        let (scope, user) = (Scope::project(Uuid::new_v4()), Uuid::new_v4());
        fx.memberships.assign(scope.id, user, MembershipRecord::legacy("contributor"));

        let resolved = fx.resolver.resolve(user, &scope).await.unwrap().unwrap();
        assert_eq!(resolved, RoleDescriptor::static_only("Member"));
    }

    #[tokio::test]
    async fn retired_name_bridges_to_migrated_canonical_role() {
        let fx = fixture();
        let member = Role::new("Member").with_legacy_name("Member");
        fx.roles.insert_role(member.clone(), ["issues:view"]);
        let (scope, user) = (Scope::project(Uuid::new_v4()), Uuid::new_v4());
        fx.memberships.assign(scope.id, user, MembershipRecord::legacy("Developer"));

        let resolved = fx.resolver.resolve(user, &scope).await.unwrap().unwrap();
        assert_eq!(resolved.role_id, Some(member.id));
        assert_eq!(resolved.name, "Member");
    }

    #[tokio::test]
    async fn unknown_legacy_name_is_unresolvable() {
        let fx = fixture();
        let (scope, user) = (Scope::project(Uuid::new_v4()), Uuid::new_v4());
        fx.memberships.assign(scope.id, user, MembershipRecord::legacy("Owner"));

        let err = fx.resolver.resolve(user, &scope).await.unwrap_err();
        assert_eq!(err.deny_reason(), DenyReason::RoleUnresolvable);
    }

    #[tokio::test]
    async fn outage_is_an_error_not_a_non_member() {
        let fx = fixture();
        fx.memberships.set_unavailable(true);
        let err = fx
            .resolver
            .resolve(Uuid::new_v4(), &Scope::project(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.deny_reason(), DenyReason::InfrastructureFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let fx = fixture();
        fx.memberships.set_latency(Some(Duration::from_secs(5)));
        let err = fx
            .resolver
            .resolve(Uuid::new_v4(), &Scope::project(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Store(crate::errors::StoreError::Timeout(200))));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_skips_store_until_ttl_expires() {
        let fx = fixture();
        let (scope, user) = (Scope::project(Uuid::new_v4()), Uuid::new_v4());
        fx.memberships.assign(scope.id, user, MembershipRecord::legacy("Viewer"));

        fx.resolver.resolve(user, &scope).await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        fx.resolver.resolve(user, &scope).await.unwrap();
        assert_eq!(fx.memberships.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        fx.resolver.resolve(user, &scope).await.unwrap();
        assert_eq!(fx.memberships.calls(), 2);
    }
}
