pub mod error;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiErrorResponse};
pub use middleware::{auth_middleware, AuthState, AuthenticatedAccount};
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
