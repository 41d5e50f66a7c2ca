//! billing-service: recurring subscription billing engine.
//!
//! Determines which subscriptions are due each day, records each charge in an
//! append-only ledger, and notifies user-configured webhook endpoints.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
