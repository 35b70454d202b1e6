use actix_web::{web, HttpResponse};

use super::{parse_actor_path, ActorId};
use crate::error::{ServiceError, ServiceResult};
use crate::services::{DiscoveryResult, DiscoveryTier};
use crate::state::AppState;

/// Strict → relaxed → wide, first non-empty tier wins
pub async fn discover_tiered(
    state: web::Data<AppState>,
    actor: ActorId,
) -> ServiceResult<HttpResponse> {
    let result = state.discovery.discover_tiered(actor.0).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// A single tier, without fallback
pub async fn discover_tier(
    state: web::Data<AppState>,
    actor: ActorId,
    tier: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let tier: DiscoveryTier = tier.parse().map_err(ServiceError::InvalidInput)?;
    let policy = state
        .discovery
        .ladder()
        .get(tier)
        .cloned()
        .ok_or_else(|| ServiceError::NotFound(format!("Tier {} is not configured", tier.as_str())))?;

    let candidates = state.discovery.discover(actor.0, &policy).await?;
    Ok(HttpResponse::Ok().json(DiscoveryResult {
        tier: (!candidates.is_empty()).then_some(tier),
        candidates,
    }))
}

/// Only the boolean is exposed; the reason could reveal moderation state
pub async fn visibility(
    state: web::Data<AppState>,
    actor: ActorId,
    candidate_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let candidate_id = parse_actor_path(&candidate_id)?;
    let visible = state.visibility.is_visible(actor.0, candidate_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "visible": visible })))
}
