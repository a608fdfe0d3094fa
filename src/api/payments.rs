use super::{json_body, parse_gateway, AppState, Caller};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::types::{PaymentDetails, PaymentKind, PaymentStatus};
use crate::services::payment_orchestrator::{ProcessOutcome, ProcessRequest};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
    /// USD; defaults to the verification fee.
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    pub currency: String,
    pub gateway: String,
    #[serde(default)]
    pub details: PaymentDetails,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub local_amount: BigDecimal,
    pub currency: String,
    pub provider_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl From<ProcessOutcome> for PaymentResponse {
    fn from(outcome: ProcessOutcome) -> Self {
        Self {
            payment_id: outcome.payment_id,
            status: outcome.status,
            local_amount: outcome.local_amount,
            currency: outcome.local_currency,
            provider_tx_id: outcome.provider_tx_id,
            redirect_url: outcome.redirect_url,
        }
    }
}

/// POST /payments/process
///
/// Standalone collections only. Investment and withdrawal payments carry
/// share reservations and claims, so they go through `/invest` and
/// `/withdraw`.
pub async fn process(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<ProcessBody>, JsonRejection>,
) -> Result<Json<PaymentResponse>, AppError> {
    let body = json_body(&caller, payload)?;
    let gateway = parse_gateway(&body.gateway).map_err(|e| caller.error(e))?;

    let kind = match body.kind.as_deref() {
        None => PaymentKind::Verification,
        Some(raw) => PaymentKind::parse(raw).ok_or_else(|| {
            caller.error(AppError::invalid_field("type", format!("unknown payment type {}", raw)))
        })?,
    };
    if kind != PaymentKind::Verification {
        return Err(caller.error(AppError::invalid_field(
            "type",
            format!("{} payments use their dedicated endpoint", kind.as_str()),
        )));
    }

    let outcome = state
        .orchestrator
        .process(ProcessRequest {
            payment_id: None,
            kind,
            user_id: caller.user_id,
            amount_usd: body
                .amount
                .unwrap_or_else(|| state.verification_fee_usd.clone()),
            currency: body.currency,
            gateway,
            details: body.details,
            plan_id: None,
            shares: None,
            share_window: None,
            investment_id: None,
        })
        .await
        .map_err(|e| caller.error(e))?;

    Ok(Json(outcome.into()))
}

/// POST /payments/{payment_id}/capture
pub async fn capture(
    State(state): State<AppState>,
    caller: Caller,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = state
        .orchestrator
        .ledger()
        .find_by_id(payment_id)
        .await
        .map_err(|e| caller.error(e))?
        .ok_or_else(|| caller.error(AppError::not_found("Payment", payment_id)))?;
    if payment.user_id != caller.user_id {
        return Err(caller.error(AppError::new(AppErrorKind::Domain(DomainError::Forbidden {
            entity: "Payment".to_string(),
            id: payment_id.to_string(),
        }))));
    }

    let outcome = state
        .orchestrator
        .capture(payment_id)
        .await
        .map_err(|e| caller.error(e))?;
    Ok(Json(outcome.into()))
}
