//! Registration trait for pluggable implementations.

/// Ties an implementation to the name it is selected by in configuration.
///
/// For example `memory` under `[storage.implementations.memory]`, or
/// `etherscan` under `[chains.ethereum.inquirer.implementations.etherscan]`.
/// Each interface crate defines its own `Factory` function type.
pub trait ImplementationRegistry {
	/// Configuration name of the implementation.
	const NAME: &'static str;

	/// Factory function type of the owning interface.
	type Factory;

	fn factory() -> Self::Factory;
}
