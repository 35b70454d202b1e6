use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Currency, StockComponent};
use crate::error::ServiceResult;
use crate::handlers::InternalCaller;
use crate::state::AppState;

/// Replenishment call from the subscription/purchase collaborators
#[derive(Debug, Deserialize)]
pub struct CreditStockRequest {
    pub actor_id: Uuid,
    pub currency: Currency,
    pub component: StockComponent,
    pub amount: i64,
}

pub async fn credit_stock(
    _caller: InternalCaller,
    state: web::Data<AppState>,
    body: web::Json<CreditStockRequest>,
) -> ServiceResult<HttpResponse> {
    let req = body.into_inner();
    let stock = match req.component {
        StockComponent::Periodic => {
            state
                .gifts
                .credit_periodic_stock(req.actor_id, req.currency, req.amount)
                .await?
        }
        StockComponent::Purchased => {
            state
                .gifts
                .credit_purchased_stock(req.actor_id, req.currency, req.amount)
                .await?
        }
    };
    Ok(HttpResponse::Ok().json(stock))
}
