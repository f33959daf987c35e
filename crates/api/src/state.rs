use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub account_service: Arc<dyn services::account::AccountService>,
    pub ledger: Arc<dyn services::ledger::CreditLedger>,
    pub story_service: Arc<dyn services::story::StoryService>,
    pub billing_reconciler: Arc<dyn services::billing::BillingReconciler>,
    pub session_repository: Arc<dyn services::account::SessionRepository>,
    /// Webhook secret, signature tolerance and internal-route token.
    pub billing_config: config::BillingConfig,
}
