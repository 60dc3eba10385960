//! axum middleware running the enforcement point before a handler.
//!
//! Install with `Router::route_layer` so the matched route is known:
//!
//! ```ignore
//! let router = Router::new()
//!     .route("/projects/:project_id/issues/:issue_id", delete(delete_issue))
//!     .route_layer(axum::middleware::from_fn_with_state(authz, enforce_permissions));
//! ```
//!
//! The principal is read from the request extensions, where the
//! authentication layer put it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, MatchedPath, Query, RawPathParams, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use super::enforcer::{EnforcementPoint, EnforcementRequest};
use super::principal::Principal;
use super::AuthzMode;
use crate::config::AuthzConfig;
use crate::errors::AppError;

#[derive(Clone)]
pub struct AuthzState {
    pub engine: Arc<EnforcementPoint>,
    pub mode: AuthzMode,
    pub body_limit: usize,
}

impl AuthzState {
    pub fn from_config(engine: Arc<EnforcementPoint>, config: &AuthzConfig) -> Self {
        Self {
            engine,
            mode: config.mode,
            body_limit: config.body_limit,
        }
    }
}

pub async fn enforce_permissions(State(state): State<AuthzState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let Some(matched) = parts.extensions.get::<MatchedPath>().map(|m| m.as_str().to_string()) else {
        return next.run(Request::from_parts(parts, body)).await;
    };
    let operation = format!("{} {}", parts.method, matched);
    if state.engine.operations().policy(&operation).is_none() {
        return next.run(Request::from_parts(parts, body)).await;
    }

    let path_params: HashMap<String, String> = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        Err(_) => HashMap::new(),
    };
    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();

    let scope_keys = &state.engine.settings().scope_keys;
    let needs_body = !scope_keys.iter().any(|k| path_params.contains_key(k)) && is_json(&parts.headers);

    let (body, json_body) = if needs_body {
        let bytes = match axum::body::to_bytes(body, state.body_limit).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(error = %err, "failed to buffer request body for scope extraction");
                return AppError::bad_request("request body too large or unreadable").into_response();
            }
        };
        let json_body = serde_json::from_slice::<Value>(&bytes).ok();
        (Body::from(bytes), json_body)
    } else {
        (body, None)
    };

    let request = EnforcementRequest {
        operation,
        principal: parts.extensions.get::<Principal>().cloned(),
        path_params,
        body: json_body,
        query,
        actor_ip: client_ip(&parts.headers),
    };

    let decision = state.engine.enforce(&request).await;
    if decision.is_allowed() {
        return next.run(Request::from_parts(parts, body)).await;
    }

    match state.mode {
        AuthzMode::Advisory => {
            tracing::warn!(
                operation = %request.operation,
                reason = ?decision.deny_reason(),
                "advisory mode: denial not enforced"
            );
            next.run(Request::from_parts(parts, body)).await
        }
        AuthzMode::Strict => AppError::Forbidden.into_response(),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Client address from proxy headers, if any.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
}
