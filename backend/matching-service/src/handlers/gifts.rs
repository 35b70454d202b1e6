use actix_web::{web, HttpResponse};
use serde::Deserialize;

use super::{parse_actor_path, ActorId, OutcomeResponse};
use crate::domain::Currency;
use crate::error::ServiceResult;
use crate::state::AppState;

pub async fn send_like(
    state: web::Data<AppState>,
    actor: ActorId,
    receiver_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let receiver_id = parse_actor_path(&receiver_id)?;
    let outcome = state.gifts.send_like(actor.0, receiver_id).await?;
    Ok(OutcomeResponse::new(outcome, outcome.user_message()))
}

pub async fn send_spark(
    state: web::Data<AppState>,
    actor: ActorId,
    receiver_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let receiver_id = parse_actor_path(&receiver_id)?;
    let outcome = state.gifts.send_spark(actor.0, receiver_id).await?;
    Ok(OutcomeResponse::new(outcome, outcome.user_message()))
}

pub async fn withdraw_spark(
    state: web::Data<AppState>,
    actor: ActorId,
    receiver_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let receiver_id = parse_actor_path(&receiver_id)?;
    let outcome = state.gifts.withdraw_spark(actor.0, receiver_id).await?;
    Ok(OutcomeResponse::new(outcome, outcome.user_message()))
}

pub async fn offer_echo(
    state: web::Data<AppState>,
    actor: ActorId,
    receiver_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let receiver_id = parse_actor_path(&receiver_id)?;
    let outcome = state.gifts.offer_echo(actor.0, receiver_id).await?;
    Ok(OutcomeResponse::new(outcome, outcome.user_message()))
}

/// `{id}` is the actor who made the original offer
pub async fn return_echo(
    state: web::Data<AppState>,
    actor: ActorId,
    offerer_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let offerer_id = parse_actor_path(&offerer_id)?;
    let outcome = state.gifts.return_echo(actor.0, offerer_id).await?;
    Ok(OutcomeResponse::new(outcome, outcome.user_message()))
}

pub async fn decline_echo(
    state: web::Data<AppState>,
    actor: ActorId,
    offerer_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let offerer_id = parse_actor_path(&offerer_id)?;
    let outcome = state.gifts.decline_echo(actor.0, offerer_id).await?;
    Ok(OutcomeResponse::new(outcome, outcome.user_message()))
}

pub async fn gift_status(
    state: web::Data<AppState>,
    actor: ActorId,
    other_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let other_id = parse_actor_path(&other_id)?;
    let status = state.gifts.gift_status(actor.0, other_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": status,
        "mutual_spark": status.mutual_spark(),
    })))
}

pub async fn stock(state: web::Data<AppState>, actor: ActorId) -> ServiceResult<HttpResponse> {
    let (spark, echo) = tokio::try_join!(
        state.gifts.stock_balance(actor.0, Currency::Spark),
        state.gifts.stock_balance(actor.0, Currency::Echo),
    )?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "spark": { "periodic": spark.periodic, "purchased": spark.purchased, "balance": spark.balance() },
        "echo": { "periodic": echo.periodic, "purchased": echo.purchased, "balance": echo.balance() },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReceivedSparksQuery {
    #[serde(default = "default_received_limit")]
    pub limit: i64,
}

fn default_received_limit() -> i64 {
    50
}

pub async fn received_sparks(
    state: web::Data<AppState>,
    actor: ActorId,
    query: web::Query<ReceivedSparksQuery>,
) -> ServiceResult<HttpResponse> {
    let sparks = state.gifts.received_sparks(actor.0, query.limit).await?;
    Ok(HttpResponse::Ok().json(sparks))
}

pub async fn pending_echoes(
    state: web::Data<AppState>,
    actor: ActorId,
) -> ServiceResult<HttpResponse> {
    let echoes = state.gifts.pending_echoes(actor.0).await?;
    Ok(HttpResponse::Ok().json(echoes))
}
