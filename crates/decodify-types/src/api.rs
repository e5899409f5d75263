//! HTTP API envelopes and error type.
//!
//! Successful responses are wrapped as `{"data": ...}`, failures as
//! `{"errors": [...]}`.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message returned for any internal failure, so internals never leak.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
	pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
	pub errors: Vec<String>,
}

/// Greeting returned by `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeResponse {
	pub message: String,
}

/// Errors surfaced by HTTP handlers, each mapped to one status code.
#[derive(Debug)]
pub enum ApiError {
	/// 422: a path or query parameter failed validation.
	Validation(Vec<String>),
	/// 400: a well-formed request the service cannot serve.
	BadRequest(String),
	/// 404
	NotFound(String),
	/// 503: a remote data source failed.
	ServiceUnavailable(String),
	/// 500: details are logged by the caller, never returned.
	Internal,
}

impl ApiError {
	pub fn status_code(&self) -> StatusCode {
		match self {
			ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
			ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ApiError::NotFound(_) => StatusCode::NOT_FOUND,
			ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn messages(&self) -> Vec<String> {
		match self {
			ApiError::Validation(messages) => messages.clone(),
			ApiError::BadRequest(message)
			| ApiError::NotFound(message)
			| ApiError::ServiceUnavailable(message) => vec![message.clone()],
			ApiError::Internal => vec![INTERNAL_ERROR_MESSAGE.to_string()],
		}
	}
}

impl fmt::Display for ApiError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.status_code(), self.messages().join("; "))
	}
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		let body = ErrorEnvelope {
			errors: self.messages(),
		};
		(status, Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_mapping() {
		assert_eq!(
			ApiError::Validation(vec!["bad".into()]).status_code(),
			StatusCode::UNPROCESSABLE_ENTITY
		);
		assert_eq!(
			ApiError::BadRequest("x".into()).status_code(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			ApiError::ServiceUnavailable("x".into()).status_code(),
			StatusCode::SERVICE_UNAVAILABLE
		);
	}

	#[test]
	fn test_internal_error_is_opaque() {
		assert_eq!(
			ApiError::Internal.messages(),
			vec![INTERNAL_ERROR_MESSAGE.to_string()]
		);
	}
}
