mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{dec, Harness, HarnessBuilder, ScriptedGateway, GOOD_SIGNATURE, SIGNATURE_HEADER};
use fundrail_backend::api::{router, USER_ID_HEADER};
use fundrail_backend::database::models::InvestmentStatus;
use fundrail_backend::database::repository::{InvestmentStore, PlanStore};
use fundrail_backend::payments::provider::PaymentGateway;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn app(h: &Harness) -> Router {
    router(h.engine.app_state())
}

fn post(uri: &str, user: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn decimal(value: &Value) -> bigdecimal::BigDecimal {
    match value {
        Value::String(s) => dec(s),
        other => dec(&other.to_string()),
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let response = app(&h)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn verification_payment_defaults_to_the_fee() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let (status, body) = send(
        app(&h),
        post(
            "/payments/process",
            Some(Uuid::new_v4()),
            json!({ "currency": "NGN", "gateway": "sandbox" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["currency"], "NGN");
    assert_eq!(decimal(&body["localAmount"]), dec("3000"));
}

#[tokio::test]
async fn process_rejects_other_payment_types() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let (status, body) = send(
        app(&h),
        post(
            "/payments/process",
            Some(Uuid::new_v4()),
            json!({ "currency": "USD", "gateway": "sandbox", "type": "withdrawal", "amount": "50" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert!(h.payments.all().await.is_empty());
}

#[tokio::test]
async fn missing_caller_is_rejected() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let (status, body) = send(
        app(&h),
        post("/payments/process", None, json!({ "currency": "USD", "gateway": "sandbox" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_gateway_is_a_validation_error() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let (status, _) = send(
        app(&h),
        post(
            "/payments/process",
            Some(Uuid::new_v4()),
            json!({ "currency": "USD", "gateway": "venmo" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invest_cancel_round_trip() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let plan = h.seed_plan(30, "15", 100, 0).await;
    let user = Uuid::new_v4();

    let (status, body) = send(
        app(&h),
        post(
            "/invest",
            Some(user),
            json!({ "planId": plan.id, "shares": 10, "gateway": "sandbox", "currency": "USD" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(decimal(&body["amountUsd"]), dec("100"));
    let investment_id: Uuid = serde_json::from_value(body["investmentId"].clone()).unwrap();

    let (status, body) = send(
        app(&h),
        post(&format!("/cancel/{}", investment_id), Some(Uuid::new_v4()), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");

    let (status, body) = send(
        app(&h),
        post(&format!("/cancel/{}", investment_id), Some(user), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["refund"]), dec("90"));
    assert_eq!(decimal(&body["penalty"]), dec("10"));
    assert_eq!(body["refundStatus"], "success");
    assert_eq!(body["refundState"], "completed");
    assert!(body.get("refundErrorCode").is_none());

    let investment = h.investments.find_by_id(investment_id).await.unwrap().unwrap();
    assert_eq!(investment.status, InvestmentStatus::Cancelled);

    let (status, body) = send(
        app(&h),
        post(&format!("/cancel/{}", investment_id), Some(user), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INVALID_STATE");
}

#[tokio::test]
async fn daily_limit_maps_to_conflict() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let plan = h.seed_plan(30, "15", 100, 95).await;

    let (status, body) = send(
        app(&h),
        post(
            "/invest",
            Some(Uuid::new_v4()),
            json!({ "planId": plan.id, "shares": 8, "gateway": "sandbox", "currency": "USD" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DAILY_LIMIT_EXCEEDED");
    assert_eq!(body["retryable"], false);

    let plan = h.plans.find_by_id(plan.id).await.unwrap().unwrap();
    assert_eq!(plan.daily_sold, 95);
}

#[tokio::test]
async fn withdraw_before_maturity_is_a_conflict() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let plan = h.seed_plan(30, "15", 100, 0).await;
    let user = Uuid::new_v4();
    let (_, body) = send(
        app(&h),
        post(
            "/invest",
            Some(user),
            json!({ "planId": plan.id, "shares": 3, "gateway": "sandbox", "currency": "USD" }),
        ),
    )
    .await;

    let (status, _) = send(
        app(&h),
        post(
            "/withdraw",
            Some(user),
            json!({ "investmentId": body["investmentId"], "gateway": "sandbox", "currency": "USD" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn callback_endpoint_settles_and_acknowledges_replays() {
    let gateway = ScriptedGateway::redirect();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();
    let user = Uuid::new_v4();

    let (_, body) = send(
        app(&h),
        post(
            "/payments/process",
            Some(user),
            json!({ "currency": "NGN", "gateway": "paystack" }),
        ),
    )
    .await;
    assert_eq!(body["status"], "pending");
    assert!(body["redirectUrl"].is_string());
    let tx_id = body["providerTxId"].as_str().unwrap().to_string();

    let callback = |signature: &str| {
        Request::builder()
            .method("POST")
            .uri("/payments/callback/paystack")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(json!({ "tx": tx_id, "status": "success" }).to_string()))
            .unwrap()
    };

    let (status, body) = send(app(&h), callback("forged")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_SIGNATURE");

    let (status, body) = send(app(&h), callback(GOOD_SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["result"], "applied");

    let (status, body) = send(app(&h), callback(GOOD_SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["result"], "already_terminal");
}

#[tokio::test]
async fn capture_is_limited_to_the_payer() {
    let gateway = ScriptedGateway::redirect();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();
    let user = Uuid::new_v4();

    let (_, body) = send(
        app(&h),
        post(
            "/payments/process",
            Some(user),
            json!({ "currency": "USD", "gateway": gateway.name().as_str() }),
        ),
    )
    .await;
    let payment_id = body["paymentId"].as_str().unwrap().to_string();

    let (status, _) = send(
        app(&h),
        post(&format!("/payments/{}/capture", payment_id), Some(Uuid::new_v4()), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    gateway.queue_status(fundrail_backend::payments::types::ProviderOutcome::Succeeded);
    let (status, body) = send(
        app(&h),
        post(&format!("/payments/{}/capture", payment_id), Some(user), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, _) = send(
        app(&h),
        post(&format!("/payments/{}/capture", Uuid::new_v4()), Some(user), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_id_is_echoed_in_errors() {
    let h = HarnessBuilder::new().gateway(ScriptedGateway::synchronous()).build();
    let request = Request::builder()
        .method("POST")
        .uri(format!("/cancel/{}", Uuid::new_v4()))
        .header(USER_ID_HEADER, Uuid::new_v4().to_string())
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["request_id"], "req-42");
}
