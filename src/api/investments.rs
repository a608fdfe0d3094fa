use super::{json_body, parse_gateway, AppState, Caller};
use crate::error::{AppError, ErrorCode};
use crate::payments::types::{PaymentDetails, PaymentStatus};
use crate::services::investment_lifecycle::{InvestRequest, RefundState, WithdrawRequest};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestBody {
    pub plan_id: Uuid,
    pub shares: i32,
    pub gateway: String,
    pub currency: String,
    #[serde(default)]
    pub details: PaymentDetails,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestResponse {
    pub investment_id: Uuid,
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub amount_usd: BigDecimal,
    pub local_amount: BigDecimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// POST /invest
pub async fn invest(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<InvestBody>, JsonRejection>,
) -> Result<Json<InvestResponse>, AppError> {
    let body = json_body(&caller, payload)?;
    let gateway = parse_gateway(&body.gateway).map_err(|e| caller.error(e))?;

    let receipt = state
        .lifecycle
        .invest(InvestRequest {
            user_id: caller.user_id,
            plan_id: body.plan_id,
            shares: body.shares,
            gateway,
            currency: body.currency,
            details: body.details,
        })
        .await
        .map_err(|e| caller.error(e))?;

    info!(
        user_id = %caller.user_id,
        investment_id = %receipt.investment_id,
        payment_id = %receipt.payment.payment_id,
        status = %receipt.payment.status,
        "investment requested"
    );
    Ok(Json(InvestResponse {
        investment_id: receipt.investment_id,
        payment_id: receipt.payment.payment_id,
        status: receipt.payment.status,
        amount_usd: receipt.amount_usd,
        local_amount: receipt.payment.local_amount,
        currency: receipt.payment.local_currency,
        redirect_url: receipt.payment.redirect_url,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub investment_id: Uuid,
    pub refund: BigDecimal,
    pub penalty: BigDecimal,
    pub refund_state: RefundState,
    pub refund_payment_id: Option<Uuid>,
    pub refund_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_message: Option<String>,
}

/// POST /cancel/{investment_id}
pub async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    Path(investment_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let receipt = state
        .lifecycle
        .cancel(caller.user_id, investment_id)
        .await
        .map_err(|e| caller.error(e))?;

    Ok(Json(CancelResponse {
        investment_id: receipt.investment_id,
        refund: receipt.refund,
        penalty: receipt.penalty,
        refund_state: receipt.refund_state,
        refund_payment_id: receipt.refund_payment.as_ref().map(|p| p.payment_id),
        refund_status: receipt.refund_payment.as_ref().map(|p| p.status),
        refund_error_code: receipt.refund_error_code,
        refund_message: receipt.refund_message,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawBody {
    pub investment_id: Uuid,
    pub gateway: String,
    pub currency: String,
    #[serde(default)]
    pub details: PaymentDetails,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub investment_id: Uuid,
    /// USD principal plus profit.
    pub amount: BigDecimal,
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub local_amount: BigDecimal,
    pub currency: String,
}

/// POST /withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<WithdrawBody>, JsonRejection>,
) -> Result<Json<WithdrawResponse>, AppError> {
    let body = json_body(&caller, payload)?;
    let gateway = parse_gateway(&body.gateway).map_err(|e| caller.error(e))?;

    let receipt = state
        .lifecycle
        .withdraw(WithdrawRequest {
            user_id: caller.user_id,
            investment_id: body.investment_id,
            gateway,
            currency: body.currency,
            details: body.details,
        })
        .await
        .map_err(|e| caller.error(e))?;

    Ok(Json(WithdrawResponse {
        investment_id: receipt.investment_id,
        amount: receipt.amount,
        payment_id: receipt.payment.payment_id,
        status: receipt.payment.status,
        local_amount: receipt.payment.local_amount,
        currency: receipt.payment.local_currency,
    }))
}
