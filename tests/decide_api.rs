use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use s_curve_authz::config::AuthzConfig;
use s_curve_authz::create_app;
use s_curve_authz::db::SqliteMembershipStore;
use s_curve_authz::models::rbac::MembershipRecord;

async fn setup() -> Result<(TempDir, SqlitePool, Router)> {
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let app = create_app(pool.clone(), AuthzConfig::default()).await?;
    Ok((dir, pool, app))
}

async fn post_json(app: &Router, uri: &str, payload: Value) -> Result<(StatusCode, Value)> {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok((status, serde_json::from_slice(&body_bytes)?))
}

fn principal(id: Uuid) -> Value {
    json!({ "id": id, "email": format!("{id}@example.com") })
}

#[tokio::test]
async fn health_endpoint_works() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    let req = Request::builder().uri("/api/health").body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let v: Value = serde_json::from_slice(&body_bytes)?;
    assert_eq!(v["status"], "ok");
    assert_eq!(v["db_ok"], true);
    assert!(v["operations"].as_u64().unwrap_or(0) > 0);
    Ok(())
}

#[tokio::test]
async fn decide_follows_stored_memberships() -> Result<()> {
    let (_dir, pool, app) = setup().await?;
    let memberships = SqliteMembershipStore::new(pool);

    let (project, viewer) = (Uuid::new_v4(), Uuid::new_v4());
    memberships.assign(project, viewer, &MembershipRecord::legacy("Viewer")).await?;

    let (status, v) = post_json(
        &app,
        "/authz/decide",
        json!({
            "operation": "GET /projects/:project_id/issues",
            "principal": principal(viewer),
            "path_params": { "project_id": project },
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v, json!({ "decision": "allow" }));

    let (_, v) = post_json(
        &app,
        "/authz/decide",
        json!({
            "operation": "DELETE /projects/:project_id/issues/:issue_id",
            "principal": principal(viewer),
            "path_params": { "project_id": project, "issue_id": Uuid::new_v4() },
        }),
    )
    .await?;
    assert_eq!(v, json!({ "decision": "deny" }));

    let (_, v) = post_json(
        &app,
        "/authz/decide",
        json!({
            "operation": "GET /projects/:project_id/issues",
            "path_params": { "project_id": project },
        }),
    )
    .await?;
    assert_eq!(v, json!({ "decision": "deny" }));
    Ok(())
}

#[tokio::test]
async fn decide_rejects_blank_operation() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;
    let (status, v) = post_json(&app, "/authz/decide", json!({ "operation": "  " })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "bad_request");
    Ok(())
}

#[tokio::test]
async fn decide_instance_checks_comment_authorship() -> Result<()> {
    let (_dir, pool, app) = setup().await?;
    let memberships = SqliteMembershipStore::new(pool);

    let (project, member, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    memberships.assign(project, member, &MembershipRecord::legacy("Member")).await?;

    let check = |author: Uuid| {
        json!({
            "principal": principal(member),
            "scope_id": project,
            "permission": "comments:update",
            "instance": {
                "subject_type": "comment",
                "attributes": { "id": Uuid::new_v4().to_string(), "authorId": author.to_string() },
            },
        })
    };

    let (status, v) = post_json(&app, "/authz/decide-instance", check(member)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v, json!({ "decision": "allow" }));

    let (_, v) = post_json(&app, "/authz/decide-instance", check(other)).await?;
    assert_eq!(v, json!({ "decision": "deny" }));
    Ok(())
}
