//! Internal HTTP surface. Authentication happens upstream; the caller's
//! identity arrives in the `x-user-id` header.

pub mod investments;
pub mod payments;
pub mod webhooks;

use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::types::GatewayName;
use crate::services::investment_lifecycle::InvestmentLifecycleManager;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub lifecycle: Arc<InvestmentLifecycleManager>,
    pub reconciler: Arc<WebhookProcessor>,
    /// Charged when a verification payment does not name an amount.
    pub verification_fee_usd: BigDecimal,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invest", post(investments::invest))
        .route("/cancel/{investment_id}", post(investments::cancel))
        .route("/withdraw", post(investments::withdraw))
        .route("/payments/process", post(payments::process))
        .route("/payments/{payment_id}/capture", post(payments::capture))
        .route(
            "/payments/callback/{gateway}",
            post(webhooks::handle_callback),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// GET /health
pub async fn health() -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Authenticated caller plus the request id used to tag errors.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub request_id: Option<String>,
}

impl Caller {
    pub fn error(&self, err: impl Into<AppError>) -> AppError {
        tag(err.into(), self.request_id.as_deref())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = get_request_id_from_headers(&parts.headers);
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tag(
                    AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                        field: USER_ID_HEADER.to_string(),
                    })),
                    request_id.as_deref(),
                )
            })?;
        let user_id = Uuid::parse_str(raw.trim()).map_err(|_| {
            tag(
                AppError::invalid_field(USER_ID_HEADER, "must be a UUID"),
                request_id.as_deref(),
            )
        })?;
        Ok(Self {
            user_id,
            request_id,
        })
    }
}

pub(crate) fn tag(err: AppError, request_id: Option<&str>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

/// Unwraps a JSON body, turning a malformed one into a validation error.
pub(crate) fn json_body<T>(caller: &Caller, payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| caller.error(AppError::invalid_field("body", rejection.body_text())))
}

pub(crate) fn parse_gateway(raw: &str) -> Result<GatewayName, AppError> {
    GatewayName::from_str(raw).map_err(AppError::from)
}
