use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use s_curve_authz::authz::{RoleStore, StaticRoleTable};
use s_curve_authz::db::{SqliteMembershipStore, SqliteRoleStore};
use s_curve_authz::events::SqliteAuditWriter;
use s_curve_authz::models::rbac::MembershipRecord;

#[derive(Parser, Debug)]
#[command(author, version, about = "s-curve authorization operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Copy the static role table into the role store
    ImportStaticRoles {
        /// JSON role table; the built-in table is used when omitted
        #[arg(long)]
        path: Option<String>,
    },
    /// List stored roles and their permissions
    ListRoles,
    /// Assign a role to a principal in a scope
    AssignRole {
        scope_id: Uuid,
        principal_id: Uuid,
        #[arg(long, conflicts_with = "legacy_name", required_unless_present = "legacy_name")]
        role_id: Option<Uuid>,
        #[arg(long)]
        legacy_name: Option<String>,
    },
    /// Recompute the audit log hash chain
    VerifyAudit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::ImportStaticRoles { path } => {
            let table = match path {
                Some(path) => StaticRoleTable::from_path(path)?,
                None => StaticRoleTable::builtin(),
            };
            let created = SqliteRoleStore::new(pool).import_static_roles(&table).await?;
            println!("Imported {} static role(s)", created);
        }
        Commands::ListRoles => {
            let store = SqliteRoleStore::new(pool);
            println!("{:<38} {:<20} {:<12} {}", "Id", "Name", "Legacy", "Permissions");
            for role in store.list_roles().await? {
                let permissions = store.get_permissions(role.id).await?;
                println!(
                    "{:<38} {:<20} {:<12} {}",
                    role.id,
                    role.name,
                    role.legacy_enum_name.as_deref().unwrap_or("-"),
                    permissions.join(",")
                );
            }
        }
        Commands::AssignRole {
            scope_id,
            principal_id,
            role_id,
            legacy_name,
        } => {
            let record = match (role_id, legacy_name) {
                (Some(role_id), _) => MembershipRecord::with_role_id(role_id),
                (None, Some(name)) => MembershipRecord::legacy(name),
                (None, None) => anyhow::bail!("either --role-id or --legacy-name is required"),
            };
            SqliteMembershipStore::new(pool).assign(scope_id, principal_id, &record).await?;
            println!("Assigned role to {} in {} (visible within the role cache TTL)", principal_id, scope_id);
        }
        Commands::VerifyAudit => match SqliteAuditWriter::new(pool).verify_chain().await? {
            Ok(count) => println!("Audit chain intact ({} record(s))", count),
            Err(id) => anyhow::bail!("audit chain broken at record {}", id),
        },
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        println!("{:<8} {:<20} {}", status, migration.version, if desc.is_empty() { "unknown" } else { desc });
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when running from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
