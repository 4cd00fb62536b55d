//! Payment gateway callback endpoint. The body is HMAC-signed and schema
//! validated before anything touches the state machine; the actual
//! payment result is re-fetched from the gateway, never trusted from the
//! callback itself.

use crate::db::queries;
use crate::error::AppError;
use crate::services::PaymentConfirmation;
use crate::validation::{schemas, signature};
use crate::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;

const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub success: bool,
    pub order_code: String,
    pub status: String,
}

pub async fn gateway_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, AppError> {
    let provided_signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing gateway signature header".to_string()))?;

    if !signature::verify(&state.webhook_secret, &body, provided_signature) {
        return Err(AppError::Forbidden(
            "gateway signature verification failed".to_string(),
        ));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed callback body: {e}")))?;
    schemas::validate_gateway_callback(&payload)
        .map_err(|errors| AppError::Validation(errors.join("; ")))?;

    // Schema guarantees both fields are present strings.
    let token = payload["token"].as_str().unwrap_or_default().to_string();
    let order_code = payload["conversation_id"].as_str().unwrap_or_default();

    let appointment = queries::get_appointment_by_order_code(&state.db, order_code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no appointment for order {order_code}")))?;

    let confirmed = state
        .booking
        .confirm_payment(appointment.id, PaymentConfirmation::GatewayCallback { token })
        .await?;

    Ok(Json(CallbackResponse {
        success: true,
        order_code: confirmed.order_code,
        status: confirmed.status,
    }))
}
