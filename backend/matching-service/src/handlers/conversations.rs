use actix_web::{web, HttpResponse};

use super::{parse_actor_path, ActorId};
use crate::domain::{AllowReason, GateDecision};
use crate::error::ServiceResult;
use crate::state::AppState;

/// Admission check for opening a conversation. May consume a free slot.
pub async fn gate(
    state: web::Data<AppState>,
    actor: ActorId,
    target_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let target_id = parse_actor_path(&target_id)?;
    let decision = state.gate.can_open_conversation(actor.0, target_id).await?;

    let first_admission = match decision {
        GateDecision::Allow(AllowReason::FreeQuota { first_admission }) => Some(first_admission),
        _ => None,
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "allowed": decision.is_allowed(),
        "reason": decision.reason(),
        "first_admission": first_admission,
        "message": decision.user_message(),
    })))
}

pub async fn quota(state: web::Data<AppState>, actor: ActorId) -> ServiceResult<HttpResponse> {
    let status = state.gate.quota_status(actor.0).await?;
    Ok(HttpResponse::Ok().json(status))
}

pub async fn block(
    state: web::Data<AppState>,
    actor: ActorId,
    blocked_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let blocked_id = parse_actor_path(&blocked_id)?;
    let created = state.blocks.block(actor.0, blocked_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "blocked": true, "created": created })))
}

pub async fn unblock(
    state: web::Data<AppState>,
    actor: ActorId,
    blocked_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let blocked_id = parse_actor_path(&blocked_id)?;
    let removed = state.blocks.unblock(actor.0, blocked_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "blocked": false, "removed": removed })))
}
