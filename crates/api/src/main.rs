use api::{create_router, ApiDoc, AppState};
use database::repositories::{
    PostgresAccountRepository, PostgresProcessedEventRepository, PostgresSessionRepository,
    PostgresStoryRepository,
};
use services::account::{hasher::Argon2PasswordHasher, AccountServiceImpl};
use services::billing::BillingReconcilerImpl;
use services::clock::SystemClock;
use services::ledger::{AccountLocks, CreditLedgerImpl, LedgerPolicy};
use services::plan::PlanCatalog;
use services::story::{OpenAiStoryGenerator, StoryServiceImpl};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
        eprintln!("Continuing with environment variables...");
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api=debug,services=debug,database=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting API server...");

    // Load configuration from environment
    let config = config::Config::from_env();

    tracing::info!(
        "Database: {}:{}/{}",
        config.database.host,
        config.database.port,
        config.database.database
    );
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);

    // Create database and run migrations
    tracing::info!("Connecting to database...");
    let db = database::Database::from_config(&config.database).await?;

    tracing::info!("Running migrations...");
    db.run_migrations().await?;

    // Repositories
    let account_repo = Arc::new(PostgresAccountRepository::new(db.pool().clone()));
    let session_repo = Arc::new(PostgresSessionRepository::new(db.pool().clone()));
    let story_repo = Arc::new(PostgresStoryRepository::new(db.pool().clone()));
    let event_repo = Arc::new(PostgresProcessedEventRepository::new(db.pool().clone()));

    // Services
    tracing::info!("Initializing services...");
    let clock = Arc::new(SystemClock);
    let catalog = Arc::new(PlanCatalog::from_config(&config.plans));
    let policy = LedgerPolicy::from_config(&config.plans);
    let locks = Arc::new(AccountLocks::new());

    let ledger = Arc::new(CreditLedgerImpl::new(
        account_repo.clone(),
        catalog,
        policy.clone(),
        clock.clone(),
        locks.clone(),
    ));

    let billing_reconciler = Arc::new(BillingReconcilerImpl::new(
        account_repo.clone(),
        event_repo,
        ledger.clone(),
        policy,
        clock.clone(),
        locks,
        config.billing.min_retention_days,
    ));

    let account_service = Arc::new(AccountServiceImpl::new(
        account_repo,
        session_repo.clone(),
        Arc::new(Argon2PasswordHasher),
        clock,
    ));

    let generator = Arc::new(OpenAiStoryGenerator::new(&config.generator));
    let story_service = Arc::new(StoryServiceImpl::new(
        ledger.clone(),
        generator,
        story_repo,
    ));

    // Create application state
    let app_state = AppState {
        account_service,
        ledger,
        story_service,
        billing_reconciler,
        session_repository: session_repo,
        billing_config: config.billing.clone(),
    };

    // Create router
    let app = create_router(app_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
