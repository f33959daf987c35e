pub mod hasher;
pub mod ports;
pub mod service;

pub use ports::{
    Account, AccountError, AccountRepository, AccountService, EntitlementState, NewAccount,
    NewSession, PasswordHasher, PlanStatus, Session, SessionRepository,
};
pub use service::{hash_session_token, AccountServiceImpl};
