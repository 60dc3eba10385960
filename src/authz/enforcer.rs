use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::ability::{AbilityFactory, Subject, SubjectType};
use super::catalog::PermissionCatalog;
use super::operations::OperationRegistry;
use super::permission::Permission;
use super::principal::{Principal, Scope};
use super::resolver::RoleResolver;
use crate::errors::{AuthzError, DenyReason};
use crate::events::{AuditRecord, AuditSink};

/// Why a request was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// The operation declares no required permission.
    NotProtected,
    SuperAdmin,
    GlobalPermission,
    OrganizationMember,
    Granted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Deny(reason) => Some(*reason),
            Decision::Allow(_) => None,
        }
    }
}

/// Everything the enforcement point looks at for one call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnforcementRequest {
    pub operation: String,
    #[serde(default)]
    pub principal: Option<Principal>,
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub actor_ip: Option<String>,
}

impl EnforcementRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Scope id from path parameters, then body, then query string.
    pub fn scope_id(&self, keys: &[String]) -> Option<Uuid> {
        let from_path = keys.iter().find_map(|k| self.path_params.get(k).cloned());
        let from_body = || {
            let body = self.body.as_ref()?.as_object()?;
            keys.iter()
                .find_map(|k| body.get(k).and_then(Value::as_str).map(str::to_string))
        };
        let from_query = || keys.iter().find_map(|k| self.query.get(k).cloned());

        let raw = from_path.or_else(from_body).or_else(from_query)?;
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::debug!(raw = %raw, "ignoring malformed scope id");
                None
            }
        }
    }
}

/// Permission sets with special handling at the enforcement point.
#[derive(Debug, Clone)]
pub struct EnforcementSettings {
    /// Allowed for every authenticated principal, no scope needed.
    pub global_permissions: HashSet<Permission>,
    /// Create a new scope; require organization membership instead of a role.
    pub scope_creation_permissions: HashSet<Permission>,
    /// Names the scope id may appear under.
    pub scope_keys: Vec<String>,
}

impl Default for EnforcementSettings {
    fn default() -> Self {
        let parse = |raw: &[&str]| raw.iter().filter_map(|p| Permission::parse(p).ok()).collect();
        Self {
            global_permissions: parse(&["notifications:view", "notifications:update"]),
            scope_creation_permissions: parse(&["projects:create"]),
            scope_keys: vec!["project_id".to_string(), "projectId".to_string()],
        }
    }
}

/// The policy decision point every protected operation passes through.
pub struct EnforcementPoint {
    operations: Arc<OperationRegistry>,
    resolver: Arc<RoleResolver>,
    catalog: Arc<PermissionCatalog>,
    abilities: Arc<AbilityFactory>,
    audit: Arc<dyn AuditSink>,
    settings: EnforcementSettings,
}

struct Denial<'a> {
    reason: DenyReason,
    operation: &'a str,
    principal: Option<&'a Principal>,
    permission: &'a Permission,
    scope: Option<Scope>,
    actor_ip: Option<&'a str>,
    extra: Value,
}

impl EnforcementPoint {
    pub fn new(
        operations: Arc<OperationRegistry>,
        resolver: Arc<RoleResolver>,
        catalog: Arc<PermissionCatalog>,
        abilities: Arc<AbilityFactory>,
        audit: Arc<dyn AuditSink>,
        settings: EnforcementSettings,
    ) -> Self {
        Self {
            operations,
            resolver,
            catalog,
            abilities,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &EnforcementSettings {
        &self.settings
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub async fn enforce(&self, request: &EnforcementRequest) -> Decision {
        let Some(policy) = self.operations.policy(&request.operation) else {
            return Decision::Allow(AllowReason::NotProtected);
        };
        let permission = &policy.permission;
        let operation = request.operation.as_str();
        let actor_ip = request.actor_ip.as_deref();

        let Some(principal) = request.principal.as_ref() else {
            tracing::info!(operation, permission = %permission, "anonymous access attempt");
            self.emit(
                AuditRecord::new("authz.anonymous_access_attempt", permission.resource(), "-")
                    .with_ip(request.actor_ip.clone())
                    .with_metadata(json!({
                        "operation": operation,
                        "permission": permission.to_string(),
                        "reason": DenyReason::Unauthenticated.as_str(),
                    })),
            );
            return Decision::Deny(DenyReason::Unauthenticated);
        };

        if principal.is_super_admin {
            tracing::debug!(principal_id = %principal.id, permission = %permission, "super_admin bypass");
            return self.allowed(AllowReason::SuperAdmin, policy.audit_on_allow, operation, principal, permission, None, actor_ip);
        }

        if self.settings.global_permissions.contains(permission) {
            return self.allowed(AllowReason::GlobalPermission, policy.audit_on_allow, operation, principal, permission, None, actor_ip);
        }

        if self.settings.scope_creation_permissions.contains(permission) {
            if principal.organization_id.is_some() {
                return self.allowed(AllowReason::OrganizationMember, policy.audit_on_allow, operation, principal, permission, None, actor_ip);
            }
            return self.deny(Denial {
                reason: DenyReason::MissingScopeContext,
                operation,
                principal: Some(principal),
                permission,
                scope: None,
                actor_ip,
                extra: json!({ "detail": "scope creation requires organization membership" }),
            });
        }

        let Some(scope_id) = request.scope_id(&self.settings.scope_keys) else {
            return self.deny(Denial {
                reason: DenyReason::MissingScopeContext,
                operation,
                principal: Some(principal),
                permission,
                scope: None,
                actor_ip,
                extra: json!({ "detail": "no scope context" }),
            });
        };
        let scope = Scope::project(scope_id);

        let role = match self.resolver.resolve(principal.id, &scope).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                return self.deny(Denial {
                    reason: DenyReason::NotAMember,
                    operation,
                    principal: Some(principal),
                    permission,
                    scope: Some(scope),
                    actor_ip,
                    extra: json!({ "detail": "not a member" }),
                })
            }
            Err(err) => return self.deny_error(err, operation, principal, permission, Some(scope), actor_ip),
        };

        let (granted, source) = match self.catalog.lookup(&role).await {
            Ok(found) => found,
            Err(err) => return self.deny_error(err, operation, principal, permission, Some(scope), actor_ip),
        };

        if !granted.allows(permission) {
            return self.deny(Denial {
                reason: DenyReason::InsufficientPermission,
                operation,
                principal: Some(principal),
                permission,
                scope: Some(scope),
                actor_ip,
                extra: json!({
                    "role": role.name,
                    "role_id": role.role_id,
                    "permission_source": source.as_str(),
                    "granted_permissions": granted.to_strings(),
                }),
            });
        }

        self.allowed(AllowReason::Granted, policy.audit_on_allow, operation, principal, permission, Some(scope), actor_ip)
    }

    /// Checks `permission` against a concrete instance, applying conditional
    /// grants such as "own comments only".
    pub async fn authorize_instance(
        &self,
        principal: &Principal,
        scope: &Scope,
        permission: &Permission,
        instance: &dyn Subject,
    ) -> Decision {
        let operation = "instance_check";
        if principal.is_super_admin {
            return Decision::Allow(AllowReason::SuperAdmin);
        }

        // Non-members still hold the baseline grants on their own user record.
        let role = match self.resolver.resolve(principal.id, scope).await {
            Ok(role) => role,
            Err(err) => return self.deny_error(err, operation, principal, permission, Some(*scope), None),
        };

        let ability = match self.abilities.build_ability(principal, role.as_ref()).await {
            Ok(ability) => ability,
            Err(err) => return self.deny_error(err, operation, principal, permission, Some(*scope), None),
        };

        let subject = SubjectType::from_resource(permission.resource());
        if ability.can(permission.action(), &subject, Some(instance)) {
            return Decision::Allow(AllowReason::Granted);
        }

        let Some(role) = role else {
            return self.deny(Denial {
                reason: DenyReason::NotAMember,
                operation,
                principal: Some(principal),
                permission,
                scope: Some(*scope),
                actor_ip: None,
                extra: json!({ "detail": "not a member" }),
            });
        };

        self.deny(Denial {
            reason: DenyReason::InsufficientPermission,
            operation,
            principal: Some(principal),
            permission,
            scope: Some(*scope),
            actor_ip: None,
            extra: json!({
                "role": role.name,
                "subject_type": instance.subject_type().to_string(),
                "detail": "no grant matches this instance",
            }),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn allowed(
        &self,
        reason: AllowReason,
        audit: bool,
        operation: &str,
        principal: &Principal,
        permission: &Permission,
        scope: Option<Scope>,
        actor_ip: Option<&str>,
    ) -> Decision {
        if audit {
            self.emit(
                AuditRecord::new("authz.allowed", permission.resource(), resource_id(scope))
                    .with_actor(principal.id, principal.organization_id.clone())
                    .with_ip(actor_ip.map(str::to_string))
                    .with_metadata(json!({
                        "operation": operation,
                        "permission": permission.to_string(),
                        "reason": reason,
                    })),
            );
        }
        Decision::Allow(reason)
    }

    fn deny_error(
        &self,
        err: AuthzError,
        operation: &str,
        principal: &Principal,
        permission: &Permission,
        scope: Option<Scope>,
        actor_ip: Option<&str>,
    ) -> Decision {
        let reason = err.deny_reason();
        if reason.is_outage() {
            tracing::error!(
                principal_id = %principal.id,
                permission = %permission,
                scope = ?scope.map(|s| s.to_string()),
                error = %err,
                "authorization backend failure, failing closed"
            );
        }
        self.deny(Denial {
            reason,
            operation,
            principal: Some(principal),
            permission,
            scope,
            actor_ip,
            extra: json!({ "error": err.to_string() }),
        })
    }

    fn deny(&self, denial: Denial<'_>) -> Decision {
        if !denial.reason.is_outage() {
            tracing::info!(
                principal_id = ?denial.principal.map(|p| p.id),
                operation = denial.operation,
                permission = %denial.permission,
                reason = %denial.reason,
                "permission denied"
            );
        }

        let mut metadata = json!({
            "operation": denial.operation,
            "permission": denial.permission.to_string(),
            "reason": denial.reason.as_str(),
            "scope": denial.scope.map(|s| s.to_string()),
        });
        if let (Some(target), Value::Object(extra)) = (metadata.as_object_mut(), denial.extra) {
            target.extend(extra);
        }

        let mut record = AuditRecord::new(
            format!("authz.denied.{}", denial.reason),
            denial.permission.resource(),
            resource_id(denial.scope),
        )
        .with_ip(denial.actor_ip.map(str::to_string))
        .with_metadata(metadata);
        if let Some(principal) = denial.principal {
            record = record.with_actor(principal.id, principal.organization_id.clone());
        }
        self.emit(record);

        Decision::Deny(denial.reason)
    }

    /// Fire and forget - audit failures never change the decision.
    fn emit(&self, record: AuditRecord) {
        let event_id = record.event_id;
        if let Err(err) = self.audit.record(record) {
            tracing::warn!(%event_id, error = %err, "audit record not delivered");
        }
    }
}

fn resource_id(scope: Option<Scope>) -> String {
    scope.map(|s| s.id.to_string()).unwrap_or_else(|| "-".to_string())
}
