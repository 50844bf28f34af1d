//! Route tables, grouped by the middleware they sit behind

pub mod admin;
pub mod metrics;
pub mod public;
pub mod staff;
