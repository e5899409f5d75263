//! Scoped account registrar.
//!
//! Decoding needs some addresses to count as tracked for the duration of one
//! request. Registrations are reference counted per `(chain, address)` so
//! that concurrent scopes over the same address do not remove each other's
//! record, and records pinned by configuration are never touched.

use crate::CoreError;
use decodify_storage::{StorageError, StorageService};
use decodify_types::{Address, ChainId, StorageKey, TrackedAccount};
use std::future::Future;
use std::sync::Arc;

/// What registering one address did to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
	/// No record existed; one was created with a single hold.
	Inserted,
	/// Another scope already held the record; its hold count went up.
	Shared,
	/// The address is pinned; nothing was written for it.
	AlreadyTracked,
}

impl RegistrationOutcome {
	pub fn already_present(&self) -> bool {
		!matches!(self, RegistrationOutcome::Inserted)
	}

	fn holds(&self) -> bool {
		!matches!(self, RegistrationOutcome::AlreadyTracked)
	}
}

#[derive(Clone)]
pub struct AccountRegistrar {
	storage: Arc<StorageService>,
}

fn dedup(addresses: &[Address]) -> Vec<Address> {
	let mut unique = Vec::with_capacity(addresses.len());
	for address in addresses {
		if !unique.contains(address) {
			unique.push(*address);
		}
	}
	unique
}

fn storage_ids(chain: ChainId, addresses: &[Address]) -> Vec<String> {
	addresses
		.iter()
		.map(|address| TrackedAccount::storage_id(chain, address))
		.collect()
}

impl AccountRegistrar {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn is_tracked(&self, chain: ChainId, address: &Address) -> Result<bool, StorageError> {
		self.storage
			.exists(
				StorageKey::Accounts,
				&TrackedAccount::storage_id(chain, address),
			)
			.await
	}

	/// Marks `addresses` as permanently tracked.
	pub async fn pin(&self, chain: ChainId, addresses: &[Address]) -> Result<(), StorageError> {
		let addresses = dedup(addresses);
		if addresses.is_empty() {
			return Ok(());
		}
		let ids = storage_ids(chain, &addresses);
		self.storage
			.transact(StorageKey::Accounts, &ids, |current: Vec<Option<TrackedAccount>>| {
				let next = current
					.into_iter()
					.zip(&addresses)
					.map(|(record, address)| {
						let mut account = record.unwrap_or(TrackedAccount {
							chain,
							address: *address,
							pinned: false,
							scoped_holds: 0,
						});
						account.pinned = true;
						Some(account)
					})
					.collect();
				Ok((next, ()))
			})
			.await?;
		tracing::info!(chain = %chain, accounts = addresses.len(), "Pinned tracked accounts");
		Ok(())
	}

	/// Registers `addresses` in one atomic write and returns the scope that
	/// must release them.
	pub async fn register(
		&self,
		chain: ChainId,
		addresses: &[Address],
	) -> Result<RegistrationScope, CoreError> {
		let addresses = dedup(addresses);
		if addresses.is_empty() {
			return Ok(RegistrationScope::new(self.clone(), chain, Vec::new()));
		}

		let ids = storage_ids(chain, &addresses);
		let outcomes = self
			.storage
			.transact(StorageKey::Accounts, &ids, |current: Vec<Option<TrackedAccount>>| {
				let mut next = Vec::with_capacity(current.len());
				let mut outcomes = Vec::with_capacity(current.len());
				for (record, address) in current.into_iter().zip(&addresses) {
					match record {
						None => {
							next.push(Some(TrackedAccount {
								chain,
								address: *address,
								pinned: false,
								scoped_holds: 1,
							}));
							outcomes.push((*address, RegistrationOutcome::Inserted));
						},
						Some(account) if account.pinned => {
							next.push(Some(account));
							outcomes.push((*address, RegistrationOutcome::AlreadyTracked));
						},
						Some(mut account) => {
							account.scoped_holds = account.scoped_holds.saturating_add(1);
							next.push(Some(account));
							outcomes.push((*address, RegistrationOutcome::Shared));
						},
					}
				}
				Ok((next, outcomes))
			})
			.await
			.map_err(CoreError::Registration)?;

		tracing::debug!(chain = %chain, accounts = outcomes.len(), "Registered scoped accounts");
		Ok(RegistrationScope::new(self.clone(), chain, outcomes))
	}

	/// Runs `body` with `addresses` registered, releasing them afterwards
	/// whatever `body` returns.
	pub async fn with_accounts<T, F, Fut>(
		&self,
		chain: ChainId,
		addresses: &[Address],
		body: F,
	) -> Result<T, CoreError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, CoreError>>,
	{
		let scope = self.register(chain, addresses).await?;
		let result = body().await;
		scope.release().await;
		result
	}

	/// Drops one hold on each address, deleting records left without holds.
	async fn release(&self, chain: ChainId, addresses: &[Address]) -> Result<(), StorageError> {
		let ids = storage_ids(chain, addresses);
		self.storage
			.transact(StorageKey::Accounts, &ids, |current: Vec<Option<TrackedAccount>>| {
				let next = current
					.into_iter()
					.map(|record| {
						record.and_then(|mut account| {
							account.scoped_holds = account.scoped_holds.saturating_sub(1);
							(account.pinned || account.scoped_holds > 0).then_some(account)
						})
					})
					.collect();
				Ok((next, ()))
			})
			.await
	}
}

/// Registrations made by one [`AccountRegistrar::register`] call.
///
/// Call [`release`](Self::release) when done. A scope dropped without
/// releasing (for example when the request future is cancelled) schedules
/// the release on the current runtime.
pub struct RegistrationScope {
	registrar: AccountRegistrar,
	chain: ChainId,
	outcomes: Vec<(Address, RegistrationOutcome)>,
	released: bool,
}

impl RegistrationScope {
	fn new(
		registrar: AccountRegistrar,
		chain: ChainId,
		outcomes: Vec<(Address, RegistrationOutcome)>,
	) -> Self {
		Self {
			registrar,
			chain,
			outcomes,
			released: false,
		}
	}

	pub fn outcomes(&self) -> &[(Address, RegistrationOutcome)] {
		&self.outcomes
	}

	fn held(&self) -> Vec<Address> {
		self.outcomes
			.iter()
			.filter(|(_, outcome)| outcome.holds())
			.map(|(address, _)| *address)
			.collect()
	}

	/// Releases the holds of this scope. Failures are logged.
	pub async fn release(mut self) {
		let held = self.held();
		if !held.is_empty() {
			if let Err(e) = self.registrar.release(self.chain, &held).await {
				tracing::warn!(chain = %self.chain, accounts = held.len(), error = %e, "Failed to release scoped accounts");
			}
		}
		self.released = true;
	}
}

impl Drop for RegistrationScope {
	fn drop(&mut self) {
		if self.released {
			return;
		}
		let held = self.held();
		if held.is_empty() {
			return;
		}

		let registrar = self.registrar.clone();
		let chain = self.chain;
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move {
					if let Err(e) = registrar.release(chain, &held).await {
						tracing::warn!(chain = %chain, error = %e, "Failed to release abandoned scoped accounts");
					}
				});
			},
			Err(_) => {
				tracing::error!(chain = %chain, accounts = held.len(), "Scoped accounts left registered, no runtime to release them");
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use decodify_storage::implementations::memory::MemoryStorage;
	use std::time::Duration;

	const CHAIN: ChainId = ChainId::Ethereum;

	fn registrar() -> AccountRegistrar {
		AccountRegistrar::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	async fn holds(registrar: &AccountRegistrar, address: &Address) -> Option<u32> {
		registrar
			.storage
			.find::<TrackedAccount>(
				StorageKey::Accounts,
				&TrackedAccount::storage_id(CHAIN, address),
			)
			.await
			.unwrap()
			.map(|account| account.scoped_holds)
	}

	#[tokio::test]
	async fn test_failed_registration_tracks_nothing() {
		use decodify_storage::{implementations::file::FileStorage, TtlConfig};

		let dir = tempfile::TempDir::new().unwrap();
		let registrar = AccountRegistrar::new(Arc::new(StorageService::new(Box::new(
			FileStorage::new(dir.path().to_path_buf(), TtlConfig::default()),
		))));
		let a = Address::repeat_byte(0x0a);
		let b = Address::repeat_byte(0x0b);

		// Block the write of `b` so the batch fails after `a` was prepared.
		let key = StorageKey::Accounts.key(&TrackedAccount::storage_id(CHAIN, &b));
		std::fs::create_dir(dir.path().join(format!("{}.staged", key.replace(':', "_")))).unwrap();

		let result = registrar.register(CHAIN, &[a, b]).await;
		assert!(matches!(result, Err(CoreError::Registration(_))));
		assert_eq!(holds(&registrar, &a).await, None);
		assert_eq!(holds(&registrar, &b).await, None);
	}

	#[tokio::test]
	async fn test_register_then_release_leaves_nothing() {
		let registrar = registrar();
		let a = Address::repeat_byte(0x0a);
		let b = Address::repeat_byte(0x0b);

		let scope = registrar.register(CHAIN, &[a, b, a]).await.unwrap();
		assert_eq!(
			scope.outcomes(),
			&[
				(a, RegistrationOutcome::Inserted),
				(b, RegistrationOutcome::Inserted)
			]
		);
		assert!(registrar.is_tracked(CHAIN, &a).await.unwrap());

		scope.release().await;
		assert!(!registrar.is_tracked(CHAIN, &a).await.unwrap());
		assert!(!registrar.is_tracked(CHAIN, &b).await.unwrap());
	}

	#[tokio::test]
	async fn test_overlapping_scopes_share_the_record() {
		let registrar = registrar();
		let a = Address::repeat_byte(0x0a);

		let first = registrar.register(CHAIN, &[a]).await.unwrap();
		let second = registrar.register(CHAIN, &[a]).await.unwrap();
		assert_eq!(second.outcomes()[0].1, RegistrationOutcome::Shared);
		assert!(second.outcomes()[0].1.already_present());
		assert_eq!(holds(&registrar, &a).await, Some(2));

		first.release().await;
		assert_eq!(holds(&registrar, &a).await, Some(1));
		second.release().await;
		assert_eq!(holds(&registrar, &a).await, None);
	}

	#[tokio::test]
	async fn test_pinned_accounts_survive_scopes() {
		let registrar = registrar();
		let pinned = Address::repeat_byte(0x0f);
		let other = Address::repeat_byte(0x0e);
		registrar.pin(CHAIN, &[pinned]).await.unwrap();

		let result: Result<(), CoreError> = registrar
			.with_accounts(CHAIN, &[pinned, other], || async {
				Err(CoreError::UnsupportedChain(CHAIN))
			})
			.await;
		assert!(result.is_err());

		assert!(registrar.is_tracked(CHAIN, &pinned).await.unwrap());
		assert!(!registrar.is_tracked(CHAIN, &other).await.unwrap());
	}

	#[tokio::test]
	async fn test_dropped_scope_is_released() {
		let registrar = registrar();
		let a = Address::repeat_byte(0x0a);

		let scope = registrar.register(CHAIN, &[a]).await.unwrap();
		drop(scope);

		let mut released = false;
		for _ in 0..50 {
			tokio::time::sleep(Duration::from_millis(2)).await;
			if !registrar.is_tracked(CHAIN, &a).await.unwrap() {
				released = true;
				break;
			}
		}
		assert!(released);
	}
}
