use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::authz::catalog::StaticRoleTable;
use crate::authz::store::{MembershipStore, RoleStore};
use crate::errors::StoreError;
use crate::models::rbac::{MembershipRecord, Role};

#[derive(Debug, Clone)]
pub struct SqliteMembershipStore {
    pool: SqlitePool,
}

impl SqliteMembershipStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upserts the single role a principal holds in a scope.
    pub async fn assign(&self, scope_id: Uuid, principal_id: Uuid, record: &MembershipRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO memberships (scope_id, principal_id, role_id, role_name)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (scope_id, principal_id) DO UPDATE SET role_id = excluded.role_id, role_name = excluded.role_name
            "#,
        )
        .bind(scope_id.to_string())
        .bind(principal_id.to_string())
        .bind(record.role_id.map(|id| id.to_string()))
        .bind(&record.role_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke(&self, scope_id: Uuid, principal_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM memberships WHERE scope_id = ? AND principal_id = ?")
            .bind(scope_id.to_string())
            .bind(principal_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MembershipStore for SqliteMembershipStore {
    async fn get_role(&self, scope_id: Uuid, principal_id: Uuid) -> Result<Option<MembershipRecord>, StoreError> {
        let row = sqlx::query("SELECT role_id, role_name FROM memberships WHERE scope_id = ? AND principal_id = ?")
            .bind(scope_id.to_string())
            .bind(principal_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(MembershipRecord::try_from).transpose()
    }
}

#[derive(Debug, Clone)]
pub struct SqliteRoleStore {
    pool: SqlitePool,
}

impl SqliteRoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a role and replaces its permission rows.
    pub async fn save_role(&self, role: &Role, permissions: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO roles (id, name, legacy_enum_name, organization_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET name = excluded.name, legacy_enum_name = excluded.legacy_enum_name, organization_id = excluded.organization_id
            "#,
        )
        .bind(role.id.to_string())
        .bind(&role.name)
        .bind(&role.legacy_enum_name)
        .bind(&role.organization_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
            .bind(role.id.to_string())
            .execute(&mut *tx)
            .await?;

        for permission in permissions {
            sqlx::query("INSERT OR IGNORE INTO role_permissions (role_id, permission) VALUES (?, ?)")
                .bind(role.id.to_string())
                .bind(permission.trim().to_ascii_lowercase())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Copies every static role into the store as a global role carrying its
    /// legacy name. Roles that already have a record are skipped. Returns the
    /// number of roles created.
    pub async fn import_static_roles(&self, table: &StaticRoleTable) -> Result<usize, StoreError> {
        let mut created = 0;
        for (name, permissions) in table.iter() {
            if self.get_role_by_legacy_name(name).await?.is_some() {
                tracing::info!(role = name, "static role already migrated, skipping");
                continue;
            }
            let role = Role::new(name).with_legacy_name(name);
            self.save_role(&role, &permissions.to_strings()).await?;
            tracing::info!(role = name, role_id = %role.id, "imported static role");
            created += 1;
        }
        Ok(created)
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT id, name, legacy_enum_name, organization_id FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Role::try_from).collect()
    }
}

#[async_trait]
impl RoleStore for SqliteRoleStore {
    async fn get_permissions(&self, role_id: Uuid) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT permission FROM role_permissions WHERE role_id = ? ORDER BY permission")
            .bind(role_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("permission").map_err(StoreError::from))
            .collect()
    }

    async fn get_role_by_legacy_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        // global roles win over organization-specific ones
        let row = sqlx::query(
            r#"
            SELECT id, name, legacy_enum_name, organization_id
            FROM roles
            WHERE lower(legacy_enum_name) = lower(?)
            ORDER BY organization_id IS NOT NULL, created_at
            LIMIT 1
            "#,
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Role::try_from).transpose()
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT id, name, legacy_enum_name, organization_id FROM roles WHERE id = ?")
            .bind(role_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Role::try_from).transpose()
    }
}
