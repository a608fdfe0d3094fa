//! In-process stores used by tests and `SKIP_EXTERNALS=true` runs. Each
//! store serializes access behind one mutex, which makes every method
//! atomic in the same way the Postgres statements are.

use crate::database::error::DatabaseError;
use crate::database::models::{
    Investment, InvestmentStatus, NewInvestment, NewPayment, PaymentRecord, Plan, Referral,
    ReferralStatus,
};
use crate::database::repository::{
    DbResult, InvestmentStore, PaymentLedger, PlanStore, ReferralStore,
};
use crate::payments::types::{GatewayName, PaymentStatus};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryPaymentLedger {
    rows: Mutex<HashMap<Uuid, PaymentRecord>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<PaymentRecord> {
        let mut rows: Vec<_> = self.rows.lock().await.values().cloned().collect();
        rows.sort_by_key(|p| p.created_at);
        rows
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn insert(&self, payment: &NewPayment) -> DbResult<PaymentRecord> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&payment.id) {
            return Err(DatabaseError::unique_violation("payments_pkey"));
        }
        let now = Utc::now();
        let record = PaymentRecord {
            id: payment.id,
            user_id: payment.user_id,
            kind: payment.kind,
            status: PaymentStatus::Pending,
            gateway: payment.gateway,
            amount_usd: payment.amount_usd.clone(),
            local_amount: payment.local_amount.clone(),
            local_currency: payment.local_currency.clone(),
            provider_tx_id: None,
            provider_details: payment.provider_details.clone(),
            plan_id: payment.plan_id,
            shares: payment.shares,
            share_window: payment.share_window,
            investment_id: payment.investment_id,
            original_payment_id: payment.original_payment_id,
            failure_reason: None,
            reconciled_at: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentRecord>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn find_by_provider_tx_id(
        &self,
        gateway: GatewayName,
        provider_tx_id: &str,
    ) -> DbResult<Option<PaymentRecord>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|p| p.gateway == gateway && p.provider_tx_id.as_deref() == Some(provider_tx_id))
            .cloned())
    }

    async fn assign_provider_tx_id(&self, id: Uuid, provider_tx_id: &str) -> DbResult<()> {
        let mut rows = self.rows.lock().await;
        let taken = rows
            .values()
            .any(|p| p.id != id && p.provider_tx_id.as_deref() == Some(provider_tx_id));
        if taken {
            return Err(DatabaseError::unique_violation("payments_provider_tx_id_key"));
        }
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        match row.provider_tx_id.as_deref() {
            None => {
                row.provider_tx_id = Some(provider_tx_id.to_string());
                row.updated_at = Utc::now();
                Ok(())
            }
            Some(existing) if existing == provider_tx_id => Ok(()),
            Some(_) => Err(DatabaseError::unique_violation(
                "payments_provider_tx_id_immutable",
            )),
        }
    }

    async fn mark_terminal(
        &self,
        id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<&str>,
        provider_data: Option<JsonValue>,
    ) -> DbResult<Option<PaymentRecord>> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        if row.status != PaymentStatus::Pending || !status.is_terminal() {
            return Ok(None);
        }
        row.status = status;
        row.failure_reason = failure_reason.map(str::to_string);
        if let Some(data) = provider_data {
            merge_json(&mut row.provider_details, data);
        }
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn record_reconciliation(&self, id: Uuid, payload: JsonValue) -> DbResult<bool> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        if !row.status.is_terminal() || row.reconciled_at.is_some() {
            return Ok(false);
        }
        merge_json(
            &mut row.provider_details,
            serde_json::json!({ "reconciliation": payload }),
        );
        let now = Utc::now();
        row.reconciled_at = Some(now);
        row.updated_at = now;
        Ok(true)
    }

    async fn list_pending_tracked(
        &self,
        gateways: &[GatewayName],
        limit: i64,
    ) -> DbResult<Vec<PaymentRecord>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|p| {
                p.status == PaymentStatus::Pending
                    && p.provider_tx_id.is_some()
                    && gateways.contains(&p.gateway)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

fn merge_json(target: &mut JsonValue, patch: JsonValue) {
    match (target.as_object_mut(), patch) {
        (Some(existing), JsonValue::Object(extra)) => {
            for (k, v) in extra {
                existing.insert(k, v);
            }
        }
        (_, patch) => *target = patch,
    }
}

#[derive(Default)]
pub struct InMemoryInvestmentStore {
    rows: Mutex<HashMap<Uuid, Investment>>,
}

impl InMemoryInvestmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Investment> {
        let mut rows: Vec<_> = self.rows.lock().await.values().cloned().collect();
        rows.sort_by_key(|i| i.created_at);
        rows
    }

    fn build(investment: &NewInvestment) -> Investment {
        let now = Utc::now();
        Investment {
            id: investment.id,
            user_id: investment.user_id,
            plan_id: investment.plan_id,
            shares: investment.shares,
            amount: investment.amount.clone(),
            profit_percent: investment.profit_percent.clone(),
            start_date: investment.start_date,
            end_date: investment.end_date,
            status: InvestmentStatus::Active,
            refund_amount: None,
            payment_id: investment.payment_id,
            auto_reinvested: false,
            reinvested_from: investment.reinvested_from,
            withdrawal_payment_id: None,
            refund_payment_id: None,
            refund_attempts: 0,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl InvestmentStore for InMemoryInvestmentStore {
    async fn insert_if_absent(&self, investment: &NewInvestment) -> DbResult<(Investment, bool)> {
        let mut rows = self.rows.lock().await;
        if let Some(existing) = rows.get(&investment.id) {
            return Ok((existing.clone(), false));
        }
        let row = Self::build(investment);
        rows.insert(row.id, row.clone());
        Ok((row, true))
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Investment>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: InvestmentStatus,
        to: InvestmentStatus,
        refund_amount: Option<BigDecimal>,
    ) -> DbResult<Option<Investment>> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.status != from || row.withdrawal_payment_id.is_some() {
            return Ok(None);
        }
        row.status = to;
        if refund_amount.is_some() {
            row.refund_amount = refund_amount;
        }
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn claim_withdrawal(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.status != InvestmentStatus::Matured
            || row.withdrawal_payment_id.is_some()
            || row.auto_reinvested
        {
            return Ok(None);
        }
        row.withdrawal_payment_id = Some(payment_id);
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn release_withdrawal(&self, id: Uuid, payment_id: Uuid) -> DbResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row)
                if row.status == InvestmentStatus::Matured
                    && row.withdrawal_payment_id == Some(payment_id) =>
            {
                row.withdrawal_payment_id = None;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_withdrawal(
        &self,
        id: Uuid,
        payment_id: Uuid,
    ) -> DbResult<Option<Investment>> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row)
                if row.status == InvestmentStatus::Matured
                    && row.withdrawal_payment_id == Some(payment_id) =>
            {
                row.status = InvestmentStatus::Withdrawn;
                row.updated_at = Utc::now();
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mature_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Investment>> {
        let mut rows = self.rows.lock().await;
        let mut due: Vec<&mut Investment> = rows
            .values_mut()
            .filter(|i| i.status == InvestmentStatus::Active && i.end_date < now)
            .collect();
        due.sort_by_key(|i| i.end_date);
        let mut matured = Vec::new();
        for row in due.into_iter().take(limit.max(0) as usize) {
            row.status = InvestmentStatus::Matured;
            row.updated_at = Utc::now();
            matured.push(row.clone());
        }
        Ok(matured)
    }

    async fn list_reinvest_due(
        &self,
        ended_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Investment>> {
        let mut due: Vec<_> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|i| {
                i.status == InvestmentStatus::Matured
                    && !i.auto_reinvested
                    && i.withdrawal_payment_id.is_none()
                    && i.end_date < ended_before
            })
            .cloned()
            .collect();
        due.sort_by_key(|i| i.end_date);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn reinvest(
        &self,
        original_id: Uuid,
        clone: &NewInvestment,
    ) -> DbResult<Option<Investment>> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&original_id) {
            Some(original)
                if original.status == InvestmentStatus::Matured
                    && !original.auto_reinvested
                    && original.withdrawal_payment_id.is_none() =>
            {
                original.auto_reinvested = true;
                original.updated_at = Utc::now();
            }
            _ => return Ok(None),
        }
        if rows.contains_key(&clone.id) {
            return Err(DatabaseError::unique_violation("investments_pkey"));
        }
        let row = Self::build(clone);
        rows.insert(row.id, row.clone());
        Ok(Some(row))
    }

    async fn claim_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row) if row.refund_owed() => {
                row.refund_payment_id = Some(payment_id);
                row.refund_attempts += 1;
                row.updated_at = Utc::now();
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row)
                if row.refund_payment_id == Some(payment_id) && row.refunded_at.is_none() =>
            {
                row.refund_payment_id = None;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row)
                if row.refund_payment_id == Some(payment_id) && row.refunded_at.is_none() =>
            {
                let now = Utc::now();
                row.refunded_at = Some(now);
                row.updated_at = now;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_refunds_owed(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> DbResult<Vec<Investment>> {
        let mut owed: Vec<_> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|i| i.refund_owed() && i.refund_attempts < max_attempts)
            .cloned()
            .collect();
        owed.sort_by_key(|i| i.updated_at);
        owed.truncate(limit.max(0) as usize);
        Ok(owed)
    }
}

#[derive(Default)]
pub struct InMemoryPlanStore {
    rows: Mutex<HashMap<Uuid, Plan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn insert(&self, plan: &Plan) -> DbResult<Plan> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&plan.id) {
            return Err(DatabaseError::unique_violation("plans_pkey"));
        }
        rows.insert(plan.id, plan.clone());
        Ok(plan.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Plan>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn reserve_shares(&self, id: Uuid, shares: i32) -> DbResult<Option<i64>> {
        let mut rows = self.rows.lock().await;
        let plan = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Plan", id))?;
        if plan.daily_sold + shares > plan.daily_limit {
            return Ok(None);
        }
        plan.daily_sold += shares;
        plan.updated_at = Utc::now();
        Ok(Some(plan.sales_window))
    }

    async fn release_shares(&self, id: Uuid, shares: i32, window: i64) -> DbResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(plan) if plan.sales_window == window => {
                plan.daily_sold = (plan.daily_sold - shares).max(0);
                plan.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_daily_sold(&self) -> DbResult<u64> {
        let mut rows = self.rows.lock().await;
        let mut reset = 0;
        for plan in rows.values_mut().filter(|p| p.daily_sold != 0) {
            plan.daily_sold = 0;
            plan.sales_window += 1;
            plan.updated_at = Utc::now();
            reset += 1;
        }
        Ok(reset)
    }

    async fn update_terms(
        &self,
        id: Uuid,
        duration_days: i32,
        profit_percent: BigDecimal,
    ) -> DbResult<Option<Plan>> {
        let mut rows = self.rows.lock().await;
        Ok(rows.get_mut(&id).map(|plan| {
            plan.duration_days = duration_days;
            plan.profit_percent = profit_percent;
            plan.updated_at = Utc::now();
            plan.clone()
        }))
    }
}

#[derive(Default)]
struct ReferralState {
    referrals: HashMap<Uuid, Referral>,
    balances: HashMap<Uuid, BigDecimal>,
}

#[derive(Default)]
pub struct InMemoryReferralStore {
    state: Mutex<ReferralState>,
}

impl InMemoryReferralStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferralStore for InMemoryReferralStore {
    async fn insert(&self, referral: &Referral) -> DbResult<Referral> {
        let mut state = self.state.lock().await;
        if state.referrals.contains_key(&referral.referred_id) {
            return Err(DatabaseError::unique_violation("referrals_referred_id_key"));
        }
        state
            .referrals
            .insert(referral.referred_id, referral.clone());
        Ok(referral.clone())
    }

    async fn find_by_referred(&self, referred_id: Uuid) -> DbResult<Option<Referral>> {
        Ok(self.state.lock().await.referrals.get(&referred_id).cloned())
    }

    async fn claim_first_investment_bonus(
        &self,
        referred_id: Uuid,
        bonus: BigDecimal,
    ) -> DbResult<Option<Referral>> {
        let mut state = self.state.lock().await;
        let claimed = match state.referrals.get_mut(&referred_id) {
            Some(referral) if !referral.first_investment => {
                referral.first_investment = true;
                referral.status = ReferralStatus::Paid;
                referral.bonus_amount = Some(bonus.clone());
                referral.updated_at = Utc::now();
                referral.clone()
            }
            _ => return Ok(None),
        };
        let balance = state
            .balances
            .entry(claimed.referrer_id)
            .or_insert_with(BigDecimal::zero);
        *balance += bonus;
        Ok(Some(claimed))
    }

    async fn balance(&self, user_id: Uuid) -> DbResult<BigDecimal> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(BigDecimal::zero))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentKind;
    use std::sync::Arc;

    fn plan(limit: i32, sold: i32) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Gold".to_string(),
            duration_days: 30,
            profit_percent: BigDecimal::from(10),
            min_shares: 1,
            max_shares: 50,
            daily_limit: limit,
            daily_sold: sold,
            sales_window: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn new_payment() -> NewPayment {
        NewPayment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: PaymentKind::Investment,
            gateway: GatewayName::Sandbox,
            amount_usd: BigDecimal::from(100),
            local_amount: BigDecimal::from(100),
            local_currency: "USD".to_string(),
            provider_details: serde_json::json!({}),
            plan_id: None,
            shares: None,
            share_window: None,
            investment_id: None,
            original_payment_id: None,
        }
    }

    #[tokio::test]
    async fn concurrent_reservations_never_overshoot() {
        let store = Arc::new(InMemoryPlanStore::new());
        let p = store.insert(&plan(100, 90)).await.unwrap();

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.reserve_shares(p.id, 8).await.unwrap() }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.reserve_shares(p.id, 8).await.unwrap() }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|window| window.is_some()).count(), 1);
        assert_eq!(store.find_by_id(p.id).await.unwrap().unwrap().daily_sold, 98);
    }

    #[tokio::test]
    async fn releases_from_a_previous_window_are_dropped() {
        let store = InMemoryPlanStore::new();
        let p = store.insert(&plan(100, 0)).await.unwrap();

        let yesterday = store.reserve_shares(p.id, 60).await.unwrap().unwrap();
        assert_eq!(store.reset_daily_sold().await.unwrap(), 1);
        let today = store.reserve_shares(p.id, 100).await.unwrap().unwrap();
        assert_ne!(yesterday, today);

        assert!(!store.release_shares(p.id, 60, yesterday).await.unwrap());
        assert_eq!(store.find_by_id(p.id).await.unwrap().unwrap().daily_sold, 100);
        assert!(store.reserve_shares(p.id, 1).await.unwrap().is_none());

        assert!(store.release_shares(p.id, 40, today).await.unwrap());
        assert_eq!(store.find_by_id(p.id).await.unwrap().unwrap().daily_sold, 60);
    }

    #[tokio::test]
    async fn terminal_status_is_written_once() {
        let ledger = InMemoryPaymentLedger::new();
        let payment = ledger.insert(&new_payment()).await.unwrap();

        let first = ledger
            .mark_terminal(payment.id, PaymentStatus::Success, None, None)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = ledger
            .mark_terminal(payment.id, PaymentStatus::Failed, Some("late"), None)
            .await
            .unwrap();
        assert!(second.is_none());
        let stored = ledger.find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert!(stored.failure_reason.is_none());
    }

    #[tokio::test]
    async fn provider_tx_id_is_unique_and_immutable() {
        let ledger = InMemoryPaymentLedger::new();
        let a = ledger.insert(&new_payment()).await.unwrap();
        let b = ledger.insert(&new_payment()).await.unwrap();

        ledger.assign_provider_tx_id(a.id, "tx-1").await.unwrap();
        ledger.assign_provider_tx_id(a.id, "tx-1").await.unwrap();
        assert!(ledger.assign_provider_tx_id(a.id, "tx-2").await.is_err());
        assert!(ledger.assign_provider_tx_id(b.id, "tx-1").await.is_err());
    }

    #[tokio::test]
    async fn reconciliation_is_recorded_once_after_terminal() {
        let ledger = InMemoryPaymentLedger::new();
        let payment = ledger.insert(&new_payment()).await.unwrap();
        assert!(!ledger
            .record_reconciliation(payment.id, serde_json::json!({"n": 0}))
            .await
            .unwrap());

        ledger
            .mark_terminal(payment.id, PaymentStatus::Success, None, None)
            .await
            .unwrap();
        assert!(ledger
            .record_reconciliation(payment.id, serde_json::json!({"n": 1}))
            .await
            .unwrap());
        assert!(!ledger
            .record_reconciliation(payment.id, serde_json::json!({"n": 2}))
            .await
            .unwrap());
        let stored = ledger.find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.provider_details["reconciliation"]["n"], 1);
    }

    #[tokio::test]
    async fn referral_bonus_claimed_once() {
        let store = InMemoryReferralStore::new();
        let referrer = Uuid::new_v4();
        let referred = Uuid::new_v4();
        store
            .insert(&Referral {
                id: Uuid::new_v4(),
                referrer_id: referrer,
                referred_id: referred,
                bonus_amount: None,
                currency: "USD".to_string(),
                status: ReferralStatus::Pending,
                first_investment: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store
            .claim_first_investment_bonus(referred, BigDecimal::from(5))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .claim_first_investment_bonus(referred, BigDecimal::from(5))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.balance(referrer).await.unwrap(), BigDecimal::from(5));
    }
}
