//! Transaction endpoints.
//!
//! Path and query parameters are validated here; every validation failure
//! of a request is reported together as one 422 response.

use axum::{
	extract::{
		rejection::{PathRejection, QueryRejection},
		Path, Query, State,
	},
	response::Json,
};
use decodify_core::CoreError;
use decodify_types::{
	parse_address, Address, ApiError, ChainId, DataEnvelope, DecodedEvent, TransactionHash,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct DecodeQuery {
	pub related_addresses: Option<String>,
}

/// Unwraps the raw path segments, reporting extractor failures as
/// validation errors.
fn path_segments(
	path: Result<Path<(String, String)>, PathRejection>,
) -> Result<(String, String), ApiError> {
	path.map(|Path(segments)| segments).map_err(|rejection| {
		ApiError::Validation(vec![format!("path: {}", rejection.body_text())])
	})
}

fn query_params(
	query: Result<Query<DecodeQuery>, QueryRejection>,
) -> Result<DecodeQuery, ApiError> {
	query.map(|Query(query)| query).map_err(|rejection| {
		ApiError::Validation(vec![format!("query: {}", rejection.body_text())])
	})
}

/// Parses the `{tx_hash}/{chain}` path segments.
pub fn validate_path(tx_hash: &str, chain: &str) -> Result<(TransactionHash, ChainId), ApiError> {
	let hash = tx_hash.parse::<TransactionHash>();
	let chain = chain.parse::<ChainId>();
	match (hash, chain) {
		(Ok(hash), Ok(chain)) => Ok((hash, chain)),
		(hash, chain) => {
			let mut errors = Vec::new();
			if let Err(e) = hash {
				errors.push(format!("tx_hash: {}", e));
			}
			if let Err(e) = chain {
				errors.push(format!("chain: {}", e));
			}
			Err(ApiError::Validation(errors))
		},
	}
}

/// Parses a comma separated address list.
///
/// The parameter is optional: missing or empty decodes with no related
/// addresses, so only configured accounts are seen as tracked.
pub fn validate_related_addresses(
	raw: Option<&str>,
	max: usize,
) -> Result<Vec<Address>, ApiError> {
	let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
		return Ok(Vec::new());
	};

	let mut addresses = Vec::new();
	let mut errors = Vec::new();
	let items: Vec<&str> = raw.split(',').map(str::trim).collect();
	if items.len() > max {
		errors.push(format!(
			"related_addresses: at most {} addresses are allowed, got {}",
			max,
			items.len()
		));
	}
	for (index, item) in items.iter().enumerate() {
		match parse_address(item) {
			Ok(address) => addresses.push(address),
			Err(e) => errors.push(format!("related_addresses[{}]: {}", index, e)),
		}
	}

	if errors.is_empty() {
		Ok(addresses)
	} else {
		Err(ApiError::Validation(errors))
	}
}

/// Maps orchestrator failures to API errors. Internal details are logged
/// and replaced by an opaque message.
pub fn api_error(error: CoreError) -> ApiError {
	match error {
		CoreError::UnsupportedChain(_) => ApiError::BadRequest(error.to_string()),
		CoreError::TransactionNotFound(_) => ApiError::NotFound(error.to_string()),
		error if error.is_fetch_failure() => {
			tracing::warn!(error = %error, "Remote data source failed");
			ApiError::ServiceUnavailable(error.to_string())
		},
		error => {
			tracing::error!(error = %error, "Request failed");
			ApiError::Internal
		},
	}
}

fn deadline(state: &AppState) -> Instant {
	Instant::now() + Duration::from_secs(state.api.timeout_seconds)
}

/// Handles GET /transactions/{tx_hash}/{chain}/addresses.
pub async fn get_addresses(
	State(state): State<AppState>,
	path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<DataEnvelope<Vec<String>>>, ApiError> {
	let (tx_hash, chain) = path_segments(path)?;
	let (tx_hash, chain) = validate_path(&tx_hash, &chain)?;

	let addresses = state
		.decodify
		.resolve_participants(chain, &tx_hash, Some(deadline(&state)))
		.await
		.map_err(api_error)?;

	Ok(Json(DataEnvelope {
		data: addresses
			.iter()
			.map(|address| address.to_checksum(None))
			.collect(),
	}))
}

/// Handles GET /transactions/{tx_hash}/{chain}/decode.
pub async fn decode_transaction(
	State(state): State<AppState>,
	path: Result<Path<(String, String)>, PathRejection>,
	query: Result<Query<DecodeQuery>, QueryRejection>,
) -> Result<Json<DataEnvelope<Vec<DecodedEvent>>>, ApiError> {
	let path = path_segments(path).and_then(|(tx_hash, chain)| validate_path(&tx_hash, &chain));
	let related = query_params(query).and_then(|query| {
		validate_related_addresses(
			query.related_addresses.as_deref(),
			state.api.max_related_addresses,
		)
	});
	let ((tx_hash, chain), related) = match (path, related) {
		(Ok(path), Ok(related)) => (path, related),
		(path, related) => {
			let mut errors = Vec::new();
			for result in [path.err(), related.err()].into_iter().flatten() {
				errors.extend(result.messages());
			}
			return Err(ApiError::Validation(errors));
		},
	};

	let events = state
		.decodify
		.decode(chain, &tx_hash, &related, Some(deadline(&state)))
		.await
		.map_err(api_error)?;

	Ok(Json(DataEnvelope { data: events }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use decodify_inquirer::InquirerError;
	use decodify_storage::StorageError;
	use decodify_types::B256;

	const HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";
	const A: &str = "0x742d35Cc6634C0532925a3b8D42F3D4C38A5F7F1";
	const B: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

	#[test]
	fn test_path_errors_are_collected() {
		assert!(validate_path(HASH, "optimism").is_ok());
		assert!(validate_path(HASH, "10").is_ok());

		let error = validate_path("0x12", "gnosis").unwrap_err();
		let messages = error.messages();
		assert_eq!(messages.len(), 2);
		assert!(messages[0].starts_with("tx_hash"));
		assert!(messages[1].starts_with("chain"));
	}

	#[test]
	fn test_related_addresses() {
		assert!(validate_related_addresses(None, 2).unwrap().is_empty());
		assert!(validate_related_addresses(Some(""), 2).unwrap().is_empty());
		assert_eq!(
			validate_related_addresses(Some(&format!("{},{}", A, B)), 2)
				.unwrap()
				.len(),
			2
		);
		assert!(validate_related_addresses(Some(&format!("{},{},{}", A, B, A)), 2).is_err());
		assert!(validate_related_addresses(Some("0xnothex"), 2).is_err());
		assert!(validate_related_addresses(Some(&format!("{},", A)), 2).is_err());
	}

	#[test]
	fn test_error_mapping() {
		let hash = TransactionHash(B256::ZERO);
		assert_eq!(
			api_error(CoreError::UnsupportedChain(ChainId::PolygonPos)).status_code(),
			axum::http::StatusCode::BAD_REQUEST
		);
		assert_eq!(
			api_error(CoreError::TransactionNotFound(hash)).status_code(),
			axum::http::StatusCode::NOT_FOUND
		);
		assert_eq!(
			api_error(CoreError::Fetch(InquirerError::Timeout)).status_code(),
			axum::http::StatusCode::SERVICE_UNAVAILABLE
		);

		let internal = api_error(CoreError::Storage(StorageError::Backend("disk on fire".into())));
		assert_eq!(
			internal.messages(),
			vec![decodify_types::INTERNAL_ERROR_MESSAGE.to_string()]
		);
	}
}
