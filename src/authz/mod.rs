//! Authorization module - Policy Decision Point and Middleware
//!
//! This module implements the project-scoped authorization engine with support for:
//! - Cache-aside role resolution with legacy role-name bridging
//! - Static (hardcoded) and store-backed role permission tables
//! - Instance-level conditions (own comments, own user record)
//! - Super admin bypass
//! - Configurable enforcement modes (advisory/strict)

pub mod ability;
pub mod cache;
pub mod catalog;
pub mod enforcer;
pub mod middleware;
pub mod operations;
pub mod permission;
pub mod principal;
pub mod resolver;
pub mod store;

pub use ability::{Ability, AbilityFactory, Resource, Subject, SubjectType};
pub use cache::{Cache, InMemoryCache};
pub use catalog::{PermissionCatalog, PermissionSource, StaticRoleTable};
pub use enforcer::{AllowReason, Decision, EnforcementPoint, EnforcementRequest, EnforcementSettings};
pub use middleware::{enforce_permissions, AuthzState};
pub use operations::{OperationPolicy, OperationRegistry};
pub use permission::{Action, Permission, PermissionSet};
pub use principal::{Principal, Scope, ScopeKind};
pub use resolver::RoleResolver;
pub use store::{InMemoryMembershipStore, InMemoryRoleStore, MembershipStore, RoleStore};

/// Authorization enforcement mode for the middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzMode {
    /// Log denials but allow requests (migration shadow mode)
    Advisory,
    /// Enforce 403 on denied requests (production mode)
    Strict,
}

impl AuthzMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "advisory" => Some(AuthzMode::Advisory),
            "strict" | "" => Some(AuthzMode::Strict),
            _ => None,
        }
    }
}
