//! Common types module for the decodify service.
//!
//! This module defines the domain types shared by every decodify crate:
//! chain identifiers, transaction and receipt shapes, tracked accounts,
//! decoded events, API envelopes and the configuration validation framework.

/// Tracked accounts, RPC nodes and external service credentials.
pub mod account;
/// API envelopes and the HTTP error type.
pub mod api;
/// Supported chain identifiers.
pub mod chain;
/// Decoded event types produced by chain decoders.
pub mod events;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacting wrapper for API keys.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Transaction, receipt and log types.
pub mod transaction;
/// Hex and formatting helpers.
pub mod utils;
/// Configuration validation types.
pub mod validation;

pub use account::*;
pub use api::*;
pub use chain::*;
pub use events::*;
pub use registry::*;
pub use secret_string::SecretString;
pub use storage::*;
pub use transaction::*;
pub use utils::{parse_address, truncate_id, without_0x_prefix};
pub use validation::*;

pub use alloy_primitives::{Address, Bytes, B256, U256};
