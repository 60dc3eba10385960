//! Store seams: membership and role/permission lookups.
//!
//! The SQLite implementations live in `crate::db::stores`; the in-memory ones
//! here back tests and embedded deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::rbac::{MembershipRecord, Role};

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Role assignment of `principal_id` in `scope_id`, or `None` when the
    /// principal is not a member.
    async fn get_role(&self, scope_id: Uuid, principal_id: Uuid) -> Result<Option<MembershipRecord>, StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Permission strings stored for a role. Empty when the role has no rows.
    async fn get_permissions(&self, role_id: Uuid) -> Result<Vec<String>, StoreError>;

    async fn get_role_by_legacy_name(&self, name: &str) -> Result<Option<Role>, StoreError>;

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError>;
}

/// Shared knobs for the in-memory stores: call counting, simulated outages and latency.
#[derive(Debug, Default)]
struct Faults {
    calls: AtomicUsize,
    unavailable: AtomicBool,
    latency: RwLock<Option<Duration>>,
}

impl Faults {
    async fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency.read().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.write() {
            *slot = latency;
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryMembershipStore {
    rows: RwLock<HashMap<(Uuid, Uuid), MembershipRecord>>,
    faults: Faults,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a role, replacing any previous one for the same pair.
    pub fn assign(&self, scope_id: Uuid, principal_id: Uuid, record: MembershipRecord) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert((scope_id, principal_id), record);
        }
    }

    pub fn revoke(&self, scope_id: Uuid, principal_id: Uuid) {
        if let Ok(mut rows) = self.rows.write() {
            rows.remove(&(scope_id, principal_id));
        }
    }

    pub fn calls(&self) -> usize {
        self.faults.calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.set_latency(latency);
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn get_role(&self, scope_id: Uuid, principal_id: Uuid) -> Result<Option<MembershipRecord>, StoreError> {
        self.faults.enter().await?;
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(&(scope_id, principal_id)).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    roles: RwLock<HashMap<Uuid, Role>>,
    permissions: RwLock<HashMap<Uuid, Vec<String>>>,
    faults: Faults,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_role<I, S>(&self, role: Role, permissions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let perms: Vec<String> = permissions.into_iter().map(Into::into).collect();
        if let Ok(mut table) = self.permissions.write() {
            table.insert(role.id, perms);
        }
        if let Ok(mut roles) = self.roles.write() {
            roles.insert(role.id, role);
        }
    }

    pub fn calls(&self) -> usize {
        self.faults.calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn get_permissions(&self, role_id: Uuid) -> Result<Vec<String>, StoreError> {
        self.faults.enter().await?;
        let table = self.permissions.read().map_err(|_| poisoned())?;
        Ok(table.get(&role_id).cloned().unwrap_or_default())
    }

    async fn get_role_by_legacy_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        self.faults.enter().await?;
        let roles = self.roles.read().map_err(|_| poisoned())?;
        let mut matches: Vec<&Role> = roles
            .values()
            .filter(|role| {
                role.legacy_enum_name
                    .as_deref()
                    .is_some_and(|legacy| legacy.eq_ignore_ascii_case(name))
            })
            .collect();
        // global roles win over organization-specific ones
        matches.sort_by_key(|role| !role.is_global());
        Ok(matches.first().map(|role| (*role).clone()))
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        self.faults.enter().await?;
        let roles = self.roles.read().map_err(|_| poisoned())?;
        Ok(roles.get(&role_id).cloned())
    }
}

/// Runs a store call under a deadline; an elapsed deadline is an outage.
pub(crate) async fn guarded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_millis() as u64)),
    }
}
