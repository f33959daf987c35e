pub mod ports;
pub mod service;

pub use ports::{
    BillingError, BillingEvent, BillingReconciler, EventDisposition, ProcessedEventRepository,
    TryBegin,
};
pub use service::BillingReconcilerImpl;
