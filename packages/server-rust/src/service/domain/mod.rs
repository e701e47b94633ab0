//! Example domain services registered by the demo host.
//!
//! Each service is a cloneable struct holding its dependencies and
//! implementing [`OperationHandler`](crate::service::handler::OperationHandler)
//! once per request DTO it handles.

pub mod customer;

pub use customer::{register_customer_service, CustomerService};
