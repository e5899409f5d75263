//! HTTP API endpoints.

pub mod transactions;
