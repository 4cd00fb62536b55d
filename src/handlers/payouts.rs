use crate::error::AppError;
use crate::services::{BulkPayoutSummary, PayoutItem, PayoutReceipt};
use crate::AppState;
use axum::{extract::State, Json};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub wallet_id: Uuid,
    pub amount: BigDecimal,
    pub actor_id: Uuid,
    pub reference: Option<String>,
}

pub async fn create_payout(
    State(state): State<AppState>,
    Json(request): Json<PayoutRequest>,
) -> Result<Json<PayoutReceipt>, AppError> {
    let receipt = state
        .payouts
        .process_payout(
            request.wallet_id,
            &request.amount,
            request.actor_id,
            request.reference.as_deref(),
        )
        .await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
pub struct BulkPayoutRequest {
    pub items: Vec<PayoutItem>,
    pub actor_id: Uuid,
    pub batch_reference: String,
}

pub async fn bulk_payout(
    State(state): State<AppState>,
    Json(request): Json<BulkPayoutRequest>,
) -> Result<Json<BulkPayoutSummary>, AppError> {
    let summary = state
        .payouts
        .process_bulk_payout(request.items, request.actor_id, &request.batch_reference)
        .await;
    Ok(Json(summary))
}
