/// HTTP adapter for matching-service
///
/// Identity comes from the gateway as the `x-user-id` header; handlers
/// never read ambient session state. Routes under `/internal` take no user
/// identity and require `x-internal-api-key` instead.
use actix_web::{dev::Payload, web, FromRequest, HttpRequest, HttpResponse};
use serde::Serialize;
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::state::AppState;
use tracing::warn;

pub mod conversations;
pub mod discovery;
pub mod gifts;
pub mod internal;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// Authenticated actor making the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorId(pub Uuid);

impl FromRequest for ActorId {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_actor_id(req).map(ActorId))
    }
}

fn extract_actor_id(req: &HttpRequest) -> ServiceResult<Uuid> {
    let header_value = req
        .headers()
        .get(USER_ID_HEADER)
        .ok_or_else(|| ServiceError::Unauthorized("Missing x-user-id header".into()))?;

    let value = header_value
        .to_str()
        .map_err(|_| ServiceError::Unauthorized("Invalid x-user-id header".into()))?;

    Uuid::parse_str(value)
        .map_err(|_| ServiceError::Unauthorized("Invalid x-user-id header value".into()))
}

/// Collaborator service presenting the shared internal key.
///
/// Fails closed: with no key configured every internal call is refused.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

impl FromRequest for InternalCaller {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(verify_internal_key(req).map(|_| InternalCaller))
    }
}

fn verify_internal_key(req: &HttpRequest) -> ServiceResult<()> {
    let Some(expected_key) = req
        .app_data::<web::Data<AppState>>()
        .and_then(|state| state.internal_api_key.clone())
    else {
        warn!("Internal API key not configured - blocking all internal requests");
        return Err(ServiceError::Internal(
            "Internal API key not configured".to_string(),
        ));
    };

    let provided_key = req
        .headers()
        .get(INTERNAL_API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided_key != &*expected_key {
        warn!(
            path = %req.path(),
            "Unauthorized internal API request - invalid API key"
        );
        return Err(ServiceError::Unauthorized("Invalid internal API key".into()));
    }
    Ok(())
}

pub(crate) fn parse_actor_path(raw: &str) -> ServiceResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ServiceError::InvalidInput("Invalid actor ID".to_string()))
}

/// Body for every business outcome: always 200, the caller branches on
/// `outcome`
#[derive(Debug, Serialize)]
pub struct OutcomeResponse<T: Serialize> {
    pub outcome: T,
    pub message: &'static str,
}

impl<T: Serialize> OutcomeResponse<T> {
    pub fn new(outcome: T, message: &'static str) -> HttpResponse {
        HttpResponse::Ok().json(Self { outcome, message })
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "matching-service",
    }))
}

async fn metrics_endpoint() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_endpoint))
        .service(
            web::scope("/api/v1")
                .route("/discover", web::get().to(discovery::discover_tiered))
                .route("/discover/{tier}", web::get().to(discovery::discover_tier))
                .route("/visibility/{id}", web::get().to(discovery::visibility))
                .route("/likes/{id}", web::post().to(gifts::send_like))
                .route("/sparks/received", web::get().to(gifts::received_sparks))
                .service(
                    web::resource("/sparks/{id}")
                        .route(web::post().to(gifts::send_spark))
                        .route(web::delete().to(gifts::withdraw_spark)),
                )
                .route("/echoes/pending", web::get().to(gifts::pending_echoes))
                .route("/echoes/{id}", web::post().to(gifts::offer_echo))
                .route("/echoes/{id}/return", web::post().to(gifts::return_echo))
                .route("/echoes/{id}/decline", web::post().to(gifts::decline_echo))
                .route("/gifts/{id}", web::get().to(gifts::gift_status))
                .route("/stock", web::get().to(gifts::stock))
                .service(
                    web::resource("/blocks/{id}")
                        .route(web::post().to(conversations::block))
                        .route(web::delete().to(conversations::unblock)),
                )
                .route(
                    "/conversations/{id}/gate",
                    web::post().to(conversations::gate),
                )
                .route("/quota", web::get().to(conversations::quota)),
        )
        .service(
            web::scope("/internal")
                .route("/stock/credit", web::post().to(internal::credit_stock)),
        );
}
