//! Request handlers for API endpoints
//!
//! Handlers pull the caller's clinic out of the principal, call the matching
//! service and wrap the result in the success envelope.

pub mod accounts;
pub mod admin;
pub mod appointments;
pub mod clinic;
pub mod doctors;
pub mod metrics;
pub mod patients;
pub mod public;
pub mod queue;
pub mod webhooks;
