use crate::database::models::PaymentRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationType {
    PaymentInitiated,
    PaymentSucceeded,
    PaymentFailed,
    PaymentTimedOut,
}

/// Best-effort user notification channel (email/SMS). Failures never
/// affect the ledger.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payment: &PaymentRecord, notification_type: NotificationType, message: &str);
}

/// Writes notifications to the structured log.
#[derive(Debug, Default)]
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, payment: &PaymentRecord, notification_type: NotificationType, message: &str) {
        match notification_type {
            NotificationType::PaymentInitiated => {
                info!(
                    payment_id = %payment.id,
                    user_id = %payment.user_id,
                    kind = payment.kind.as_str(),
                    amount = %payment.local_amount,
                    currency = %payment.local_currency,
                    "NOTIFICATION: payment initiated - {}", message
                );
            }
            NotificationType::PaymentSucceeded => {
                info!(
                    payment_id = %payment.id,
                    user_id = %payment.user_id,
                    kind = payment.kind.as_str(),
                    amount = %payment.local_amount,
                    currency = %payment.local_currency,
                    "NOTIFICATION: payment succeeded - {}", message
                );
            }
            NotificationType::PaymentFailed => {
                error!(
                    payment_id = %payment.id,
                    user_id = %payment.user_id,
                    kind = payment.kind.as_str(),
                    "NOTIFICATION: payment failed - {}", message
                );
            }
            NotificationType::PaymentTimedOut => {
                warn!(
                    payment_id = %payment.id,
                    user_id = %payment.user_id,
                    kind = payment.kind.as_str(),
                    "NOTIFICATION: payment timed out - {}", message
                );
            }
        }
    }
}

/// Keeps every notification in memory. Used to assert on side effects.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, NotificationType)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Uuid, NotificationType)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self, payment_id: Uuid, notification_type: NotificationType) -> usize {
        self.sent()
            .iter()
            .filter(|(id, t)| *id == payment_id && *t == notification_type)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, payment: &PaymentRecord, notification_type: NotificationType, _message: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((payment.id, notification_type));
        }
    }
}
