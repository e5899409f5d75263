//! In-process cache for successful GET responses.
//!
//! Entries are keyed by path and query string and expire after a fixed
//! TTL. Error responses are never cached. Expired entries are swept
//! periodically and the number of live entries is capped.

use axum::{
	body::{Body, Bytes},
	extract::{Request, State},
	http::{header, HeaderValue, Method, StatusCode},
	middleware::Next,
	response::{IntoResponse, Response},
};
use dashmap::DashMap;
use decodify_types::ApiError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Largest response body that is buffered for caching.
const MAX_CACHED_BODY: usize = 4 * 1024 * 1024;
const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone)]
struct CachedResponse {
	body: Bytes,
	expires_at: Instant,
}

/// Response cache shared by the transaction routes.
#[derive(Debug, Clone)]
pub struct ResponseCache {
	entries: Arc<DashMap<String, CachedResponse>>,
	ttl: Duration,
	max_entries: usize,
}

impl ResponseCache {
	/// A zero `ttl` disables caching.
	pub fn new(ttl: Duration) -> Self {
		Self {
			entries: Arc::new(DashMap::new()),
			ttl,
			max_entries: DEFAULT_MAX_ENTRIES,
		}
	}

	pub fn with_max_entries(mut self, max_entries: usize) -> Self {
		self.max_entries = max_entries;
		self
	}

	pub fn is_enabled(&self) -> bool {
		!self.ttl.is_zero()
	}

	fn get(&self, key: &str) -> Option<Bytes> {
		let now = Instant::now();
		let body = self.entries.get(key).and_then(|entry| {
			(entry.expires_at > now).then(|| entry.body.clone())
		});
		if body.is_none() {
			self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
		}
		body
	}

	fn insert(&self, key: String, body: Bytes) {
		if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
			self.purge_expired();
			if self.entries.len() >= self.max_entries {
				tracing::debug!(key = %key, "Response cache full, not caching");
				return;
			}
		}
		self.entries.insert(
			key,
			CachedResponse {
				body,
				expires_at: Instant::now() + self.ttl,
			},
		);
	}

	/// Drops every expired entry and returns how many were dropped.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let before = self.entries.len();
		self.entries.retain(|_, entry| entry.expires_at > now);
		before.saturating_sub(self.entries.len())
	}

	/// Spawns the periodic sweep of expired entries, once per TTL.
	pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
		if !self.is_enabled() {
			return None;
		}
		let cache = self.clone();
		Some(tokio::spawn(async move {
			let mut interval = tokio::time::interval(cache.ttl);
			interval.tick().await;
			loop {
				interval.tick().await;
				let removed = cache.purge_expired();
				if removed > 0 {
					tracing::debug!(removed, "Swept expired cached responses");
				}
			}
		}))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

fn json_response(body: Bytes) -> Response {
	(
		StatusCode::OK,
		[(
			header::CONTENT_TYPE,
			HeaderValue::from_static("application/json"),
		)],
		body,
	)
		.into_response()
}

/// Middleware serving cached bodies and recording fresh 200 responses.
pub async fn cache_responses(
	State(cache): State<ResponseCache>,
	request: Request,
	next: Next,
) -> Response {
	if !cache.is_enabled() || request.method() != Method::GET {
		return next.run(request).await;
	}

	let key = request
		.uri()
		.path_and_query()
		.map(|pq| pq.as_str().to_string())
		.unwrap_or_else(|| request.uri().path().to_string());

	if let Some(body) = cache.get(&key) {
		tracing::debug!(key = %key, "Serving cached response");
		return json_response(body);
	}

	let response = next.run(request).await;
	if response.status() != StatusCode::OK {
		return response;
	}

	let (parts, body) = response.into_parts();
	match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
		Ok(bytes) => {
			cache.insert(key, bytes.clone());
			Response::from_parts(parts, Body::from(bytes))
		},
		Err(e) => {
			tracing::error!(error = %e, "Failed to buffer response body");
			ApiError::Internal.into_response()
		},
	}
}
