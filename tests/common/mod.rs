#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use s_curve_authz::authz::{
    AbilityFactory, EnforcementPoint, EnforcementSettings, InMemoryCache, InMemoryMembershipStore, InMemoryRoleStore,
    OperationRegistry, PermissionCatalog, Principal, RoleResolver, StaticRoleTable,
};
use s_curve_authz::events::{AuditSink, MemoryAuditSink};

pub const ROLE_TTL: Duration = Duration::from_secs(300);

pub struct Harness {
    pub engine: EnforcementPoint,
    pub memberships: Arc<InMemoryMembershipStore>,
    pub roles: Arc<InMemoryRoleStore>,
    pub audit: Arc<MemoryAuditSink>,
}

pub fn harness() -> Harness {
    let registry = OperationRegistry::platform_defaults().expect("platform operation table");
    let audit = Arc::new(MemoryAuditSink::new());
    harness_with(registry, audit.clone(), audit)
}

/// Builds an engine over in-memory stores. `audit` is what the engine writes
/// to; `recorded` is what tests inspect (usually the same sink).
pub fn harness_with(registry: OperationRegistry, audit: Arc<dyn AuditSink>, recorded: Arc<MemoryAuditSink>) -> Harness {
    let memberships = Arc::new(InMemoryMembershipStore::new());
    let roles = Arc::new(InMemoryRoleStore::new());
    let static_table = Arc::new(StaticRoleTable::builtin());
    let cache = Arc::new(InMemoryCache::new());

    let resolver = Arc::new(RoleResolver::new(
        memberships.clone(),
        roles.clone(),
        static_table.clone(),
        cache.clone(),
        ROLE_TTL,
        Duration::from_millis(250),
    ));
    let catalog = Arc::new(PermissionCatalog::new(
        static_table,
        roles.clone(),
        cache,
        ROLE_TTL,
        Duration::from_millis(250),
    ));
    let abilities = Arc::new(AbilityFactory::new(catalog.clone()));

    let engine = EnforcementPoint::new(
        Arc::new(registry),
        resolver,
        catalog,
        abilities,
        audit,
        EnforcementSettings::default(),
    );

    Harness {
        engine,
        memberships,
        roles,
        audit: recorded,
    }
}

pub fn user() -> Principal {
    let id = Uuid::new_v4();
    Principal::new(id, format!("{id}@example.com"))
}
