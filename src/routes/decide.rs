//! Decision endpoint for services that cannot embed the engine.
//!
//! Callers are trusted gateways that have already authenticated the principal.
//! The response says allow or deny and nothing else; reasons go to the audit
//! trail and logs.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{EnforcementRequest, Permission, Principal, Resource, Scope};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub decision: Verdict,
}

impl DecisionResponse {
    fn from_allowed(allowed: bool) -> Self {
        Self {
            decision: if allowed { Verdict::Allow } else { Verdict::Deny },
        }
    }
}

pub async fn decide(
    State(state): State<AppState>,
    Json(request): Json<EnforcementRequest>,
) -> AppResult<Json<DecisionResponse>> {
    if request.operation.trim().is_empty() {
        return Err(AppError::bad_request("operation must not be empty"));
    }
    let decision = state.engine.enforce(&request).await;
    Ok(Json(DecisionResponse::from_allowed(decision.is_allowed())))
}

#[derive(Debug, Deserialize)]
pub struct InstanceCheckRequest {
    pub principal: Principal,
    pub scope_id: Uuid,
    pub permission: Permission,
    pub instance: Resource,
}

pub async fn decide_instance(
    State(state): State<AppState>,
    Json(request): Json<InstanceCheckRequest>,
) -> AppResult<Json<DecisionResponse>> {
    let decision = state
        .engine
        .authorize_instance(
            &request.principal,
            &Scope::project(request.scope_id),
            &request.permission,
            &request.instance,
        )
        .await;
    Ok(Json(DecisionResponse::from_allowed(decision.is_allowed())))
}
