use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::account::{Account, AccountRepository, PlanStatus};
use crate::clock::Clock;
use crate::ledger::{
    reset_usage_for_period, AccountLocks, CreditLedger, CreditPack, LedgerPolicy,
};
use crate::plan::Membership;

use super::ports::{
    BillingError, BillingEvent, BillingReconciler, EventDisposition, ProcessedEventRepository,
    TryBegin,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    CheckoutSessionCompleted,
    InvoicePaymentSucceeded,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    Unknown,
}

impl EventKind {
    fn parse(kind: &str) -> Self {
        match kind {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "subscription.created" => Self::SubscriptionCreated,
            "subscription.updated" => Self::SubscriptionUpdated,
            "subscription.canceled" => Self::SubscriptionCanceled,
            _ => Self::Unknown,
        }
    }
}

/// The event's business object: `data.object` in the provider envelope.
fn event_object(payload: &Value) -> Result<&Value, BillingError> {
    payload
        .get("data")
        .and_then(|d| d.get("object"))
        .ok_or_else(|| BillingError::MalformedEvent("missing data.object".to_string()))
}

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(|v| v.as_str())
}

fn metadata_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object
        .get("metadata")
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
}

fn epoch_field(object: &Value, key: &str) -> Option<DateTime<Utc>> {
    object
        .get(key)
        .and_then(|v| v.as_i64())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

pub struct BillingReconcilerImpl {
    account_repo: Arc<dyn AccountRepository>,
    event_repo: Arc<dyn ProcessedEventRepository>,
    ledger: Arc<dyn CreditLedger>,
    policy: LedgerPolicy,
    clock: Arc<dyn Clock>,
    locks: Arc<AccountLocks>,
    min_retention_days: i64,
}

impl BillingReconcilerImpl {
    pub fn new(
        account_repo: Arc<dyn AccountRepository>,
        event_repo: Arc<dyn ProcessedEventRepository>,
        ledger: Arc<dyn CreditLedger>,
        policy: LedgerPolicy,
        clock: Arc<dyn Clock>,
        locks: Arc<AccountLocks>,
        min_retention_days: i64,
    ) -> Self {
        Self {
            account_repo,
            event_repo,
            ledger,
            policy,
            clock,
            locks,
            min_retention_days,
        }
    }

    /// Resolve the account an event belongs to: explicit account id in the
    /// payload metadata (set at checkout creation) first, then the billing
    /// refs stored on the account.
    async fn resolve_account(&self, object: &Value) -> Result<Account, BillingError> {
        let account_id = metadata_field(object, "account_id")
            .or_else(|| str_field(object, "client_reference_id"));
        if let Some(raw) = account_id {
            if let Ok(id) = raw.parse() {
                if let Some(account) = self.account_repo.get_account(id).await? {
                    return Ok(account);
                }
            }
            return Err(BillingError::AccountNotFound(format!(
                "no account with id {}",
                raw
            )));
        }

        let subscription_ref = str_field(object, "subscription").or_else(|| {
            // Subscription events carry the subscription id as the object id.
            str_field(object, "id").filter(|id| id.starts_with("sub_"))
        });
        if let Some(sub_ref) = subscription_ref {
            if let Some(account) = self
                .account_repo
                .find_by_billing_subscription_ref(sub_ref)
                .await?
            {
                return Ok(account);
            }
        }

        if let Some(customer_ref) = str_field(object, "customer") {
            if let Some(account) = self
                .account_repo
                .find_by_billing_customer_ref(customer_ref)
                .await?
            {
                return Ok(account);
            }
        }

        Err(BillingError::AccountNotFound(
            "event carries no resolvable account reference".to_string(),
        ))
    }

    async fn save(&self, account: &Account) -> Result<(), BillingError> {
        let saved = self
            .account_repo
            .save_entitlement(account.id, &account.entitlement)
            .await?;
        if !saved {
            return Err(BillingError::StorageConflict);
        }
        Ok(())
    }

    async fn apply_checkout_completed(&self, object: &Value) -> Result<(), BillingError> {
        match str_field(object, "mode") {
            Some("subscription") => self.apply_subscription_checkout(object).await,
            Some("payment") => self.apply_add_on_purchase(object).await,
            other => Err(BillingError::MalformedEvent(format!(
                "unsupported checkout mode: {:?}",
                other
            ))),
        }
    }

    async fn apply_subscription_checkout(&self, object: &Value) -> Result<(), BillingError> {
        let plan_key = metadata_field(object, "plan").ok_or_else(|| {
            BillingError::MalformedEvent("subscription checkout without metadata.plan".to_string())
        })?;
        let mut account = self.resolve_account(object).await?;

        let _guard = self.locks.acquire(account.id).await;
        // Reload under the lock so the overwrite starts from current state.
        account = self
            .account_repo
            .get_account(account.id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account.id.to_string()))?;

        let state = &mut account.entitlement;
        state.membership = Membership::from_plan_key(plan_key);
        state.plan_key = Some(plan_key.to_string());
        state.plan_status = PlanStatus::Active;
        state.cancel_at = None;
        if let Some(customer) = str_field(object, "customer") {
            state.billing_customer_ref = Some(customer.to_string());
        }
        if let Some(subscription) = str_field(object, "subscription") {
            state.billing_subscription_ref = Some(subscription.to_string());
        }
        if let (Some(start), Some(end)) = (
            epoch_field(object, "current_period_start"),
            epoch_field(object, "current_period_end"),
        ) {
            reset_usage_for_period(state, &self.policy, start, end);
        }

        tracing::info!(
            "Subscription checkout applied: account_id={}, membership={}",
            account.id,
            account.entitlement.membership
        );
        self.save(&account).await
    }

    async fn apply_add_on_purchase(&self, object: &Value) -> Result<(), BillingError> {
        let pack_key = metadata_field(object, "pack").ok_or_else(|| {
            BillingError::MalformedEvent("add-on purchase without metadata.pack".to_string())
        })?;
        let pack = CreditPack::from_key(pack_key).ok_or_else(|| {
            BillingError::MalformedEvent(format!("unknown credit pack: {}", pack_key))
        })?;
        let quantity: u32 = metadata_field(object, "quantity")
            .unwrap_or("1")
            .parse()
            .map_err(|_| {
                BillingError::MalformedEvent("non-numeric add-on quantity".to_string())
            })?;

        let account = self.resolve_account(object).await?;
        // The ledger takes the account lock itself; the additive grant is
        // made at-most-once by the event-id guard, not by the ledger.
        let balance = self.ledger.add_credits(account.id, pack, quantity).await?;
        tracing::info!(
            "Add-on purchase applied: account_id={}, pack={:?}, quantity={}, balance={}",
            account.id,
            pack,
            quantity,
            balance
        );
        Ok(())
    }

    async fn apply_invoice_payment_succeeded(&self, object: &Value) -> Result<(), BillingError> {
        let period_start = epoch_field(object, "period_start").ok_or_else(|| {
            BillingError::MalformedEvent("invoice without period_start".to_string())
        })?;
        let period_end = epoch_field(object, "period_end").ok_or_else(|| {
            BillingError::MalformedEvent("invoice without period_end".to_string())
        })?;

        let mut account = self.resolve_account(object).await?;
        let _guard = self.locks.acquire(account.id).await;
        account = self
            .account_repo
            .get_account(account.id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account.id.to_string()))?;

        let state = &mut account.entitlement;
        state.plan_status = PlanStatus::Active;
        // Authoritative rollover; a no-op when the lazy path already reset
        // for this period.
        reset_usage_for_period(state, &self.policy, period_start, period_end);

        tracing::info!(
            "Invoice payment applied: account_id={}, period_end={}",
            account.id,
            period_end
        );
        self.save(&account).await
    }

    async fn apply_subscription_update(&self, object: &Value) -> Result<(), BillingError> {
        let mut account = self.resolve_account(object).await?;
        let _guard = self.locks.acquire(account.id).await;
        account = self
            .account_repo
            .get_account(account.id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account.id.to_string()))?;

        let state = &mut account.entitlement;
        if let Some(id) = str_field(object, "id") {
            state.billing_subscription_ref = Some(id.to_string());
        }
        if let Some(customer) = str_field(object, "customer") {
            state.billing_customer_ref = Some(customer.to_string());
        }
        if let Some(plan_key) = metadata_field(object, "plan") {
            state.membership = Membership::from_plan_key(plan_key);
            state.plan_key = Some(plan_key.to_string());
        }
        if let Some(status) = str_field(object, "status").and_then(PlanStatus::from_provider) {
            state.plan_status = status;
        }
        match object.get("cancel_at_period_end").and_then(|v| v.as_bool()) {
            Some(true) => {
                state.cancel_at = epoch_field(object, "cancel_at").or(state.current_period_end);
            }
            Some(false) => state.cancel_at = None,
            None => {}
        }
        if let (Some(start), Some(end)) = (
            epoch_field(object, "current_period_start"),
            epoch_field(object, "current_period_end"),
        ) {
            reset_usage_for_period(state, &self.policy, start, end);
        }

        tracing::info!(
            "Subscription update applied: account_id={}, status={}, cancel_at={:?}",
            account.id,
            account.entitlement.plan_status,
            account.entitlement.cancel_at
        );
        self.save(&account).await
    }

    async fn apply_subscription_canceled(&self, object: &Value) -> Result<(), BillingError> {
        let mut account = self.resolve_account(object).await?;
        let _guard = self.locks.acquire(account.id).await;
        account = self
            .account_repo
            .get_account(account.id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account.id.to_string()))?;

        let state = &mut account.entitlement;
        state.membership = Membership::Free;
        state.plan_status = PlanStatus::Canceled;
        state.plan_key = None;
        state.billing_subscription_ref = None;
        state.current_period_start = None;
        state.current_period_end = None;
        state.cancel_at = None;

        tracing::info!("Subscription canceled: account_id={}", account.id);
        self.save(&account).await
    }

    async fn apply(&self, event: &BillingEvent) -> Result<EventDisposition, BillingError> {
        match EventKind::parse(&event.kind) {
            EventKind::Unknown => {
                tracing::warn!(
                    "Ignoring unknown billing event kind: event_id={}, kind={}",
                    event.event_id,
                    event.kind
                );
                Ok(EventDisposition::Ignored)
            }
            EventKind::CheckoutSessionCompleted => {
                self.apply_checkout_completed(event_object(&event.payload)?)
                    .await?;
                Ok(EventDisposition::Applied)
            }
            EventKind::InvoicePaymentSucceeded => {
                self.apply_invoice_payment_succeeded(event_object(&event.payload)?)
                    .await?;
                Ok(EventDisposition::Applied)
            }
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
                self.apply_subscription_update(event_object(&event.payload)?)
                    .await?;
                Ok(EventDisposition::Applied)
            }
            EventKind::SubscriptionCanceled => {
                self.apply_subscription_canceled(event_object(&event.payload)?)
                    .await?;
                Ok(EventDisposition::Applied)
            }
        }
    }
}

#[async_trait]
impl BillingReconciler for BillingReconcilerImpl {
    async fn process_event(&self, event: BillingEvent) -> Result<EventDisposition, BillingError> {
        tracing::info!(
            "Processing billing event: event_id={}, kind={}",
            event.event_id,
            event.kind
        );

        // Record-then-apply: the event id commits before the transition runs,
        // converting the provider's at-least-once delivery into at-most-once
        // local application.
        match self.event_repo.try_begin(&event.event_id, self.clock.now_utc()).await? {
            TryBegin::AlreadyProcessed => {
                tracing::info!(
                    "Duplicate billing event skipped: event_id={}, kind={}",
                    event.event_id,
                    event.kind
                );
                return Ok(EventDisposition::AlreadyProcessed);
            }
            TryBegin::FirstSeen => {}
        }

        let result = self.apply(&event).await;
        if let Err(ref err) = result {
            // The event id is already recorded; a redelivery will short-circuit.
            // The provider's reconciliation/backfill query is the compensating
            // control for the lost effect.
            tracing::error!(
                "Billing event failed after idempotency record: event_id={}, kind={}, error={}",
                event.event_id,
                event.kind,
                err
            );
        }
        result
    }

    async fn prune_processed_events(&self, older_than_days: i64) -> Result<u64, BillingError> {
        if older_than_days < self.min_retention_days {
            return Err(BillingError::RetentionTooShort {
                requested: older_than_days,
                minimum: self.min_retention_days,
            });
        }
        let cutoff = self.clock.now_utc() - Duration::days(older_than_days);
        let pruned = self.event_repo.prune_older_than(cutoff).await?;
        tracing::info!(
            "Pruned processed billing events: older_than_days={}, pruned={}",
            older_than_days,
            pruned
        );
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ConsumeOutcome, CreditLedgerImpl, LedgerError};
    use crate::plan::PlanCatalog;
    use crate::testing::{
        seed_account, InMemoryAccountRepository, InMemoryProcessedEventRepository, ManualClock,
    };
    use crate::AccountId;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    struct Harness {
        accounts: Arc<InMemoryAccountRepository>,
        events: Arc<InMemoryProcessedEventRepository>,
        ledger: Arc<CreditLedgerImpl>,
        reconciler: BillingReconcilerImpl,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let accounts = Arc::new(InMemoryAccountRepository::default());
        let events = Arc::new(InMemoryProcessedEventRepository::default());
        let clock = Arc::new(ManualClock::at(t0()));
        let locks = Arc::new(AccountLocks::new());
        let policy = LedgerPolicy::default();
        let ledger = Arc::new(CreditLedgerImpl::new(
            accounts.clone(),
            Arc::new(PlanCatalog::default()),
            policy.clone(),
            clock.clone(),
            locks.clone(),
        ));
        let reconciler = BillingReconcilerImpl::new(
            accounts.clone(),
            events.clone(),
            ledger.clone(),
            policy,
            clock.clone(),
            locks,
            30,
        );
        Harness {
            accounts,
            events,
            ledger,
            reconciler,
            clock,
        }
    }

    fn checkout_subscription_event(event_id: &str, account_id: AccountId, plan: &str) -> BillingEvent {
        BillingEvent {
            event_id: event_id.to_string(),
            kind: "checkout.session.completed".to_string(),
            payload: json!({
                "id": event_id,
                "type": "checkout.session.completed",
                "data": { "object": {
                    "mode": "subscription",
                    "customer": "cus_123",
                    "subscription": "sub_123",
                    "metadata": { "account_id": account_id.to_string(), "plan": plan },
                    "current_period_start": t0().timestamp(),
                    "current_period_end": (t0() + Duration::days(30)).timestamp(),
                }}
            }),
        }
    }

    fn add_on_event(event_id: &str, account_id: AccountId, pack: &str, quantity: &str) -> BillingEvent {
        BillingEvent {
            event_id: event_id.to_string(),
            kind: "checkout.session.completed".to_string(),
            payload: json!({
                "data": { "object": {
                    "mode": "payment",
                    "customer": "cus_123",
                    "metadata": {
                        "account_id": account_id.to_string(),
                        "pack": pack,
                        "quantity": quantity,
                    },
                }}
            }),
        }
    }

    #[tokio::test]
    async fn test_checkout_subscription_sets_membership_and_period() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Free, t0()).await;

        let disposition = h
            .reconciler
            .process_event(checkout_subscription_event("evt_1", account_id, "premium"))
            .await
            .unwrap();
        assert_eq!(disposition, EventDisposition::Applied);

        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.entitlement.membership, Membership::Premium);
        assert_eq!(account.entitlement.plan_status, PlanStatus::Active);
        assert_eq!(
            account.entitlement.billing_subscription_ref.as_deref(),
            Some("sub_123")
        );
        assert_eq!(
            account.entitlement.current_period_end,
            Some(t0() + Duration::days(30))
        );
    }

    #[tokio::test]
    async fn test_unknown_plan_key_degrades_to_free() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Free, t0()).await;

        h.reconciler
            .process_event(checkout_subscription_event("evt_1", account_id, "mega_tier"))
            .await
            .unwrap();

        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.entitlement.membership, Membership::Free);
        assert_eq!(account.entitlement.plan_key.as_deref(), Some("mega_tier"));
    }

    #[tokio::test]
    async fn test_add_on_purchase_credits_once_per_event_id() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Pro, t0()).await;

        let event = add_on_event("evt_pack", account_id, "ten_pack", "2");
        let first = h.reconciler.process_event(event.clone()).await.unwrap();
        assert_eq!(first, EventDisposition::Applied);

        // At-least-once delivery: the provider redelivers the same event id.
        let replay = h.reconciler.process_event(event).await.unwrap();
        assert_eq!(replay, EventDisposition::AlreadyProcessed);

        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.entitlement.add_on_balance, 20);
    }

    #[tokio::test]
    async fn test_add_on_purchase_for_free_plan_rejected() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Free, t0()).await;

        let err = h
            .reconciler
            .process_event(add_on_event("evt_pack", account_id, "single", "1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::Ledger(LedgerError::PlanNotEligible(Membership::Free))
        ));
    }

    #[tokio::test]
    async fn test_invoice_advances_period_and_resets_once() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Pro, t0()).await;

        h.reconciler
            .process_event(checkout_subscription_event("evt_1", account_id, "pro"))
            .await
            .unwrap();

        // Use some quota, then cross the period boundary so the lazy
        // rollover fires before the invoice arrives.
        h.ledger.try_consume(account_id).await.unwrap();
        h.ledger.try_consume(account_id).await.unwrap();
        h.clock.advance(Duration::days(30) + Duration::hours(2));
        assert!(matches!(
            h.ledger.try_consume(account_id).await.unwrap(),
            ConsumeOutcome::Allowed { .. }
        ));
        // Lazy rollover has reset and consumed one unit in the new period.
        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.entitlement.period_usage, 1);
        // Credits purchased after the lazy rollover must survive the invoice.
        h.ledger
            .add_credits(account_id, CreditPack::FivePack, 1)
            .await
            .unwrap();

        let new_start = t0() + Duration::days(30);
        let new_end = t0() + Duration::days(60);
        h.reconciler
            .process_event(BillingEvent {
                event_id: "evt_invoice".to_string(),
                kind: "invoice.payment_succeeded".to_string(),
                payload: json!({
                    "data": { "object": {
                        "customer": "cus_123",
                        "subscription": "sub_123",
                        "period_start": new_start.timestamp(),
                        "period_end": new_end.timestamp(),
                    }}
                }),
            })
            .await
            .unwrap();

        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        // No double reset: in-period usage and purchased credits intact.
        assert_eq!(account.entitlement.period_usage, 1);
        assert_eq!(account.entitlement.add_on_balance, 5);
        assert_eq!(account.entitlement.current_period_end, Some(new_end));
        assert_eq!(account.entitlement.plan_status, PlanStatus::Active);
    }

    #[tokio::test]
    async fn test_invoice_resets_usage_without_prior_lazy_rollover() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Pro, t0()).await;

        h.reconciler
            .process_event(checkout_subscription_event("evt_1", account_id, "pro"))
            .await
            .unwrap();
        h.ledger.try_consume(account_id).await.unwrap();

        let new_start = t0() + Duration::days(30);
        let new_end = t0() + Duration::days(60);
        h.reconciler
            .process_event(BillingEvent {
                event_id: "evt_invoice".to_string(),
                kind: "invoice.payment_succeeded".to_string(),
                payload: json!({
                    "data": { "object": {
                        "subscription": "sub_123",
                        "period_start": new_start.timestamp(),
                        "period_end": new_end.timestamp(),
                    }}
                }),
            })
            .await
            .unwrap();

        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.entitlement.period_usage, 0);
        assert_eq!(account.entitlement.current_period_start, Some(new_start));
    }

    #[tokio::test]
    async fn test_subscription_updated_sets_cancel_at() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Pro, t0()).await;
        h.reconciler
            .process_event(checkout_subscription_event("evt_1", account_id, "pro"))
            .await
            .unwrap();

        h.reconciler
            .process_event(BillingEvent {
                event_id: "evt_2".to_string(),
                kind: "subscription.updated".to_string(),
                payload: json!({
                    "data": { "object": {
                        "id": "sub_123",
                        "status": "active",
                        "cancel_at_period_end": true,
                    }}
                }),
            })
            .await
            .unwrap();

        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        // Membership stays active until the period ends.
        assert_eq!(account.entitlement.membership, Membership::Pro);
        assert_eq!(
            account.entitlement.cancel_at,
            account.entitlement.current_period_end
        );

        // Resuming clears the mark.
        h.reconciler
            .process_event(BillingEvent {
                event_id: "evt_3".to_string(),
                kind: "subscription.updated".to_string(),
                payload: json!({
                    "data": { "object": {
                        "id": "sub_123",
                        "status": "active",
                        "cancel_at_period_end": false,
                    }}
                }),
            })
            .await
            .unwrap();
        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.entitlement.cancel_at, None);
    }

    #[tokio::test]
    async fn test_subscription_canceled_downgrades_to_free() {
        let h = harness();
        let account_id = seed_account(&h.accounts, Membership::Pro, t0()).await;
        h.reconciler
            .process_event(checkout_subscription_event("evt_1", account_id, "pro"))
            .await
            .unwrap();

        h.reconciler
            .process_event(BillingEvent {
                event_id: "evt_2".to_string(),
                kind: "subscription.canceled".to_string(),
                payload: json!({
                    "data": { "object": { "id": "sub_123" } }
                }),
            })
            .await
            .unwrap();

        let account = h.accounts.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.entitlement.membership, Membership::Free);
        assert_eq!(account.entitlement.plan_status, PlanStatus::Canceled);
        assert_eq!(account.entitlement.billing_subscription_ref, None);
        assert_eq!(account.entitlement.current_period_end, None);
        // Customer ref survives for future checkouts.
        assert_eq!(
            account.entitlement.billing_customer_ref.as_deref(),
            Some("cus_123")
        );
    }

    #[tokio::test]
    async fn test_unknown_kind_ignored_but_recorded() {
        let h = harness();
        let event = BillingEvent {
            event_id: "evt_x".to_string(),
            kind: "customer.updated".to_string(),
            payload: json!({}),
        };

        assert_eq!(
            h.reconciler.process_event(event.clone()).await.unwrap(),
            EventDisposition::Ignored
        );
        assert_eq!(
            h.reconciler.process_event(event).await.unwrap(),
            EventDisposition::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn test_malformed_event_rejected() {
        let h = harness();
        let err = h
            .reconciler
            .process_event(BillingEvent {
                event_id: "evt_bad".to_string(),
                kind: "invoice.payment_succeeded".to_string(),
                payload: json!({ "data": {} }),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::MalformedEvent(_)));
    }

    #[tokio::test]
    async fn test_prune_enforces_retention_floor() {
        let h = harness();
        let err = h.reconciler.prune_processed_events(7).await.unwrap_err();
        assert!(matches!(
            err,
            BillingError::RetentionTooShort {
                requested: 7,
                minimum: 30
            }
        ));
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_events() {
        let h = harness();
        h.events.try_begin("evt_old", t0()).await.unwrap();
        h.clock.advance(Duration::days(100));
        h.events
            .try_begin("evt_recent", h.clock.now_utc())
            .await
            .unwrap();

        let pruned = h.reconciler.prune_processed_events(90).await.unwrap();
        assert_eq!(pruned, 1);

        // The recent event is still deduplicated.
        assert_eq!(
            h.events
                .try_begin("evt_recent", h.clock.now_utc())
                .await
                .unwrap(),
            TryBegin::AlreadyProcessed
        );
        // The pruned one would be treated as new if redelivered this late;
        // retention must exceed the provider's redelivery window.
        assert_eq!(
            h.events.try_begin("evt_old", h.clock.now_utc()).await.unwrap(),
            TryBegin::FirstSeen
        );
    }
}
