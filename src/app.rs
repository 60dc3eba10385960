use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{
    AbilityFactory, Cache, EnforcementPoint, EnforcementSettings, InMemoryCache, MembershipStore, OperationRegistry,
    PermissionCatalog, RoleResolver, RoleStore, StaticRoleTable,
};
use crate::config::AuthzConfig;
use crate::db::{SqliteMembershipStore, SqliteRoleStore};
use crate::errors::{AppError, AuthzError};
use crate::events::{start_audit_listener, AuditSink, ChannelAuditSink, SqliteAuditWriter};
use crate::routes::{decide, health};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub engine: Arc<EnforcementPoint>,
}

impl AppState {
    pub fn new(pool: SqlitePool, engine: EnforcementPoint) -> Self {
        Self {
            pool,
            engine: Arc::new(engine),
        }
    }
}

/// Wires resolver, catalog and ability factory over the given stores.
pub fn build_engine(
    config: &AuthzConfig,
    memberships: Arc<dyn MembershipStore>,
    roles: Arc<dyn RoleStore>,
    cache: Arc<dyn Cache>,
    audit: Arc<dyn AuditSink>,
) -> Result<EnforcementPoint, AuthzError> {
    let static_table = Arc::new(match &config.static_roles_path {
        Some(path) => StaticRoleTable::from_path(path)?,
        None => StaticRoleTable::builtin(),
    });
    let operations = Arc::new(match &config.operations_path {
        Some(path) => OperationRegistry::from_path(path)?,
        None => OperationRegistry::platform_defaults()?,
    });

    let resolver = Arc::new(RoleResolver::new(
        memberships,
        roles.clone(),
        static_table.clone(),
        cache.clone(),
        config.role_cache_ttl,
        config.store_timeout,
    ));
    let catalog = Arc::new(PermissionCatalog::new(
        static_table,
        roles,
        cache,
        config.permission_cache_ttl,
        config.store_timeout,
    ));
    let abilities = Arc::new(AbilityFactory::new(catalog.clone()));

    tracing::info!(operations = operations.len(), "authorization engine ready");

    Ok(EnforcementPoint::new(
        operations,
        resolver,
        catalog,
        abilities,
        audit,
        EnforcementSettings::default(),
    ))
}

pub async fn create_app(pool: SqlitePool, config: AuthzConfig) -> Result<Router, AppError> {
    let (audit, rx) = ChannelAuditSink::channel(config.audit_buffer);
    tokio::spawn(start_audit_listener(rx, Arc::new(SqliteAuditWriter::new(pool.clone()))));

    let cache = Arc::new(InMemoryCache::new());
    cache.spawn_purger(config.role_cache_ttl.min(config.permission_cache_ttl));

    let engine = build_engine(
        &config,
        Arc::new(SqliteMembershipStore::new(pool.clone())),
        Arc::new(SqliteRoleStore::new(pool.clone())),
        cache,
        Arc::new(audit),
    )?;
    let state = AppState::new(pool, engine);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let authz_routes = Router::new()
        .route("/decide", post(decide::decide))
        .route("/decide-instance", post(decide::decide_instance));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/authz", authz_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
