pub mod account_repository;
pub mod processed_event_repository;
pub mod session_repository;
pub mod story_repository;

pub use account_repository::PostgresAccountRepository;
pub use processed_event_repository::PostgresProcessedEventRepository;
pub use session_repository::PostgresSessionRepository;
pub use story_repository::PostgresStoryRepository;
