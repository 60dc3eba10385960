use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use s_curve_authz::authz::{
    InMemoryCache, MembershipStore, PermissionCatalog, PermissionSource, RoleResolver, RoleStore, Scope,
    StaticRoleTable,
};
use s_curve_authz::db::{self, SqliteMembershipStore, SqliteRoleStore};
use s_curve_authz::events::{AuditRecord, AuditWriter, SqliteAuditWriter};
use s_curve_authz::models::rbac::{MembershipRecord, Role};

async fn pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("authz.db").display());
    let pool = db::init(&url).await?;
    Ok((dir, pool))
}

#[tokio::test]
async fn membership_round_trip_and_single_role_per_pair() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let roles = SqliteRoleStore::new(pool.clone());
    let memberships = SqliteMembershipStore::new(pool.clone());

    let role = Role::new("Maintainer");
    roles.save_role(&role, &["issues:manage".to_string()]).await?;

    let (scope, principal) = (Uuid::new_v4(), Uuid::new_v4());
    assert_eq!(memberships.get_role(scope, principal).await?, None);

    memberships.assign(scope, principal, &MembershipRecord::legacy("Viewer")).await?;
    memberships.assign(scope, principal, &MembershipRecord::with_role_id(role.id)).await?;

    let record = memberships.get_role(scope, principal).await?.expect("membership");
    assert_eq!(record.role_id, Some(role.id));
    assert_eq!(record.role_name, None);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memberships").fetch_one(&pool).await?;
    assert_eq!(count, 1);

    assert!(memberships.revoke(scope, principal).await?);
    assert_eq!(memberships.get_role(scope, principal).await?, None);
    Ok(())
}

#[tokio::test]
async fn legacy_bridge_prefers_global_roles() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let roles = SqliteRoleStore::new(pool);

    let scoped = Role::new("Acme Lead").with_legacy_name("Lead").with_organization("acme");
    let global = Role::new("Lead").with_legacy_name("LEAD");
    roles.save_role(&scoped, &[]).await?;
    roles.save_role(&global, &["issues:manage".to_string()]).await?;

    let found = roles.get_role_by_legacy_name("lead").await?.expect("bridged role");
    assert_eq!(found.id, global.id);
    assert!(roles.get_role_by_legacy_name("Owner").await?.is_none());
    assert_eq!(roles.get_permissions(global.id).await?, vec!["issues:manage"]);
    Ok(())
}

#[tokio::test]
async fn imported_static_roles_take_over_from_the_static_table() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let roles = Arc::new(SqliteRoleStore::new(pool.clone()));
    let memberships = Arc::new(SqliteMembershipStore::new(pool));
    let table = Arc::new(StaticRoleTable::builtin());

    assert_eq!(roles.import_static_roles(&table).await?, 3);
    assert_eq!(roles.import_static_roles(&table).await?, 0);

    let cache = Arc::new(InMemoryCache::new());
    let resolver = RoleResolver::new(
        memberships.clone(),
        roles.clone(),
        table.clone(),
        cache.clone(),
        Duration::from_secs(300),
        Duration::from_secs(2),
    );
    let catalog = PermissionCatalog::new(table.clone(), roles.clone(), cache, Duration::from_secs(300), Duration::from_secs(2));

    let (scope, principal) = (Scope::project(Uuid::new_v4()), Uuid::new_v4());
    memberships.assign(scope.id, principal, &MembershipRecord::legacy("Member")).await?;

    let role = resolver.resolve(principal, &scope).await?.expect("member role");
    assert!(role.role_id.is_some());

    let (permissions, source) = catalog.lookup(&role).await?;
    assert_eq!(source, PermissionSource::Dynamic);
    assert_eq!(&permissions, table.permissions_for("Member").expect("static member"));
    Ok(())
}

#[tokio::test]
async fn audit_log_is_hash_chained_and_append_only() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let writer = SqliteAuditWriter::new(pool.clone());

    for n in 0..3 {
        let record = AuditRecord::new("authz.denied.not_a_member", "issues", format!("scope-{n}"))
            .with_actor(Uuid::new_v4(), Some("acme".to_string()))
            .with_metadata(serde_json::json!({ "reason": "not_a_member" }));
        writer.write(&record).await?;
    }

    assert_eq!(writer.verify_chain().await?, Ok(3));

    let severities: Vec<String> = sqlx::query_scalar("SELECT severity FROM audit_log").fetch_all(&pool).await?;
    assert!(severities.iter().all(|s| s == "important"));

    let tamper = sqlx::query("UPDATE audit_log SET resource_id = 'forged'").execute(&pool).await;
    assert!(tamper.is_err(), "audit rows must be immutable");
    let delete = sqlx::query("DELETE FROM audit_log").execute(&pool).await;
    assert!(delete.is_err(), "audit rows must not be deleted");
    Ok(())
}

#[tokio::test]
async fn malformed_audit_rows_are_reported_not_panicked_on() -> Result<()> {
    let (_dir, pool) = pool().await?;
    let writer = SqliteAuditWriter::new(pool.clone());
    writer
        .write(&AuditRecord::new("authz.denied.not_a_member", "issues", "scope-0"))
        .await?;

    sqlx::query(
        r#"
        INSERT INTO audit_log (id, occurred_at, resource_type, resource_id, action_type, metadata, severity, payload, prev_hash, hash)
        VALUES ('forged', '2025-01-01T00:00:00Z', 'issues', 'x', 'authz.denied.not_a_member', '{}', 'important', '{}', NULL, X'00')
        "#,
    )
    .execute(&pool)
    .await?;

    let verdict = writer.verify_chain().await;
    assert!(!matches!(verdict, Ok(Ok(_))), "tampered chain must not verify: {verdict:?}");
    Ok(())
}
