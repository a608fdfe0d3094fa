mod common;

use common::{dec, HarnessBuilder, ScriptedGateway};
use fundrail_backend::database::repository::PaymentLedger;
use fundrail_backend::payments::error::PaymentError;
use fundrail_backend::payments::provider::PaymentGateway;
use fundrail_backend::payments::types::{
    PaymentDetails, PaymentKind, PaymentStatus, ProviderOutcome, RawCallback,
};
use fundrail_backend::services::notification::NotificationType;
use fundrail_backend::services::payment_orchestrator::{
    OrchestratorError, ProcessRequest, RefundOrder,
};
use fundrail_backend::services::webhook_processor::{ReconcileResult, WebhookProcessorError};
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn verification(gateway: fundrail_backend::payments::types::GatewayName, currency: &str) -> ProcessRequest {
    ProcessRequest {
        payment_id: None,
        kind: PaymentKind::Verification,
        user_id: Uuid::new_v4(),
        amount_usd: dec("2"),
        currency: currency.to_string(),
        gateway,
        details: PaymentDetails::default(),
        plan_id: None,
        shares: None,
        share_window: None,
        investment_id: None,
    }
}

#[tokio::test]
async fn synchronous_collection_settles_in_local_currency() {
    let gateway = ScriptedGateway::synchronous();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let outcome = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "NGN"))
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.local_amount, dec("3000"));
    assert_eq!(outcome.local_currency, "NGN");
    assert_eq!(
        outcome.provider_tx_id.as_deref(),
        Some(gateway.tx_id(outcome.payment_id).as_str())
    );

    let stored = h.payments.find_by_id(outcome.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Success);
    assert_eq!(stored.amount_usd, dec("2"));
    assert_eq!(h.notifier.count(outcome.payment_id, NotificationType::PaymentInitiated), 1);
    assert_eq!(h.notifier.count(outcome.payment_id, NotificationType::PaymentSucceeded), 1);
}

#[tokio::test]
async fn callback_replay_changes_status_once() {
    let gateway = ScriptedGateway::redirect();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let outcome = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "NGN"))
        .await
        .unwrap();
    assert_eq!(outcome.status, PaymentStatus::Pending);
    assert!(outcome.redirect_url.is_some());

    let tx_id = gateway.tx_id(outcome.payment_id);
    let first = h
        .engine
        .reconciler
        .reconcile(gateway.name(), gateway.callback(&tx_id, "success"))
        .await
        .unwrap();
    assert!(matches!(first, ReconcileResult::Applied { payment_id, .. } if payment_id == outcome.payment_id));

    // A late failure for the same transaction must not flip the status.
    for status in ["success", "failed"] {
        let replay = h
            .engine
            .reconciler
            .reconcile(gateway.name(), gateway.callback(&tx_id, status))
            .await
            .unwrap();
        assert!(matches!(replay, ReconcileResult::AlreadyTerminal { .. }));
    }

    let stored = h.payments.find_by_id(outcome.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Success);
    assert!(stored.reconciled_at.is_some());
    assert_eq!(h.notifier.count(outcome.payment_id, NotificationType::PaymentSucceeded), 1);
    assert_eq!(h.notifier.count(outcome.payment_id, NotificationType::PaymentFailed), 0);
}

#[tokio::test]
async fn concurrent_callbacks_have_one_winner() {
    let gateway = ScriptedGateway::redirect();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();
    let outcome = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "KES"))
        .await
        .unwrap();
    let tx_id = gateway.tx_id(outcome.payment_id);

    let mut tasks = Vec::new();
    for i in 0..10 {
        let reconciler = h.engine.reconciler.clone();
        let callback = gateway.callback(&tx_id, if i % 2 == 0 { "success" } else { "failed" });
        let name = gateway.name();
        tasks.push(tokio::spawn(async move { reconciler.reconcile(name, callback).await }));
    }

    let mut applied = 0;
    for task in tasks {
        if let ReconcileResult::Applied { .. } = task.await.unwrap().unwrap() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    let terminal_notifications = h.notifier.count(outcome.payment_id, NotificationType::PaymentSucceeded)
        + h.notifier.count(outcome.payment_id, NotificationType::PaymentFailed);
    assert_eq!(terminal_notifications, 1);
}

#[tokio::test]
async fn unverified_callback_is_rejected_without_touching_the_ledger() {
    let gateway = ScriptedGateway::redirect();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();
    let outcome = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "NGN"))
        .await
        .unwrap();

    let forged = RawCallback::new(
        serde_json::json!({ "tx": gateway.tx_id(outcome.payment_id), "status": "success" })
            .to_string()
            .into_bytes(),
    )
    .with_header(common::SIGNATURE_HEADER, "forged");
    let err = h
        .engine
        .reconciler
        .reconcile(gateway.name(), forged)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookProcessorError::Rejected { .. }));

    let stored = h.payments.find_by_id(outcome.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn signed_callback_cannot_settle_another_payment() {
    let gateway = ScriptedGateway::poll();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();
    let first = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "KES"))
        .await
        .unwrap();
    let second = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "KES"))
        .await
        .unwrap();

    // A URL signed for the first payment, replayed with the second one's id.
    let crossed = gateway.signed_callback(
        first.payment_id,
        &gateway.tx_id(second.payment_id),
        "success",
    );
    let err = h
        .engine
        .reconciler
        .reconcile(gateway.name(), crossed)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookProcessorError::Rejected { .. }));
    for id in [first.payment_id, second.payment_id] {
        let stored = h.payments.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    let matching = gateway.signed_callback(
        second.payment_id,
        &gateway.tx_id(second.payment_id),
        "success",
    );
    let applied = h
        .engine
        .reconciler
        .reconcile(gateway.name(), matching)
        .await
        .unwrap();
    assert!(matches!(applied, ReconcileResult::Applied { payment_id, .. } if payment_id == second.payment_id));
}

#[tokio::test]
async fn unknown_and_non_final_callbacks_change_nothing() {
    let gateway = ScriptedGateway::redirect();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();
    let outcome = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "NGN"))
        .await
        .unwrap();

    let unmatched = h
        .engine
        .reconciler
        .reconcile(gateway.name(), gateway.callback("tx_nobody", "success"))
        .await
        .unwrap();
    assert_eq!(unmatched, ReconcileResult::Unmatched { provider_tx_id: "tx_nobody".to_string() });

    let ignored = h
        .engine
        .reconciler
        .reconcile(
            gateway.name(),
            gateway.callback(&gateway.tx_id(outcome.payment_id), "processing"),
        )
        .await
        .unwrap();
    assert!(matches!(ignored, ReconcileResult::Ignored { .. }));

    let stored = h.payments.find_by_id(outcome.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn authorized_payment_is_captured_immediately() {
    let gateway = ScriptedGateway::authorize_capture();
    gateway.queue_status(ProviderOutcome::Succeeded);
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let outcome = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "USD"))
        .await
        .unwrap();
    assert!(outcome.success());
    assert_eq!(outcome.local_amount, dec("2"));

    // Capturing a settled payment reports the settled state.
    let again = h.engine.orchestrator.capture(outcome.payment_id).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Success);
    assert_eq!(h.notifier.count(outcome.payment_id, NotificationType::PaymentSucceeded), 1);
}

#[tokio::test]
async fn declined_authorization_fails_the_payment() {
    let gateway = ScriptedGateway::authorize_capture();
    gateway.queue_status(ProviderOutcome::failed("card declined"));
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let err = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "USD"))
        .await
        .unwrap_err();
    let OrchestratorError::Declined { payment_id, reason } = err else {
        panic!("expected a decline, got {err:?}");
    };
    assert_eq!(reason, "card declined");

    let stored = h.payments.find_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("card declined"));
}

#[tokio::test]
async fn rejected_initiate_fails_the_payment() {
    let gateway = ScriptedGateway::synchronous();
    gateway.answer_initiate(ProviderOutcome::failed("insufficient funds"));
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let err = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "NGN"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Declined { .. }));

    let payments = h.payments.all().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(h.notifier.count(payments[0].id, NotificationType::PaymentFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_gateway_errors_are_retried_then_fail() {
    let gateway = ScriptedGateway::synchronous();
    gateway.fail_initiate(PaymentError::NetworkError {
        message: "connection reset".to_string(),
    });
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let err = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "NGN"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Payment(PaymentError::NetworkError { .. })));
    assert_eq!(gateway.initiated.load(Ordering::SeqCst), 2);

    let payments = h.payments.all().await;
    assert_eq!(payments[0].status, PaymentStatus::Failed);
}

#[tokio::test]
async fn validation_errors_are_not_retried() {
    let gateway = ScriptedGateway::synchronous();
    gateway.fail_initiate(PaymentError::validation("phone number required", "phone"));
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let err = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "NGN"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Payment(PaymentError::ValidationError { .. })));
    assert_eq!(gateway.initiated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_gateway_and_unknown_rate_create_no_ledger_rows() {
    let gateway = ScriptedGateway::synchronous();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let disabled = h
        .engine
        .orchestrator
        .process(verification(fundrail_backend::payments::types::GatewayName::Wave, "XOF"))
        .await;
    assert!(disabled.is_err());

    let no_rate = h
        .engine
        .orchestrator
        .process(verification(gateway.name(), "GHS"))
        .await;
    assert!(matches!(no_rate, Err(OrchestratorError::ExchangeRate(_))));

    let mut zero = verification(gateway.name(), "NGN");
    zero.amount_usd = dec("0");
    assert!(h.engine.orchestrator.process(zero).await.is_err());

    assert!(h.payments.all().await.is_empty());
    assert_eq!(gateway.initiated.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refunds_follow_the_original_quote() {
    let gateway = ScriptedGateway::synchronous();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();

    let mut request = verification(gateway.name(), "NGN");
    request.amount_usd = dec("100");
    let original = h.engine.orchestrator.process(request).await.unwrap();
    assert_eq!(original.local_amount, dec("150000"));

    let refund = h
        .engine
        .orchestrator
        .refund(RefundOrder {
            payment_id: None,
            original_payment_id: original.payment_id,
            amount_usd: dec("40"),
            reason: Some("goodwill".to_string()),
            investment_id: None,
        })
        .await
        .unwrap();
    assert!(refund.success());
    assert_eq!(refund.local_amount, dec("60000"));

    let sent = gateway.refunds.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].original_tx_id, gateway.tx_id(original.payment_id));

    let stored = h.payments.find_by_id(refund.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.kind, PaymentKind::Refund);
    assert_eq!(stored.original_payment_id, Some(original.payment_id));

    let too_much = h
        .engine
        .orchestrator
        .refund(RefundOrder {
            payment_id: None,
            original_payment_id: original.payment_id,
            amount_usd: dec("100.01"),
            reason: None,
            investment_id: None,
        })
        .await;
    assert!(matches!(too_much, Err(OrchestratorError::RefundExceedsOriginal { .. })));
}

#[tokio::test]
async fn refund_kind_cannot_be_processed_directly() {
    let gateway = ScriptedGateway::synchronous();
    let h = HarnessBuilder::new().gateway(gateway.clone()).build();
    let mut request = verification(gateway.name(), "USD");
    request.kind = PaymentKind::Refund;
    let err = h.engine.orchestrator.process(request).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnsupportedKind(PaymentKind::Refund)));
}
