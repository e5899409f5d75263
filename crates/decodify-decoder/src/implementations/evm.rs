//! Generic EVM rule set.
//!
//! Understands the gas fee, plain value transfers, ERC-20 and ERC-721
//! `Transfer`, ERC-20 `Approval` and the wrapped native token's
//! `Deposit`/`Withdrawal`. Anything protocol specific is left undecoded.

use crate::{DecodeError, DecoderFactory, DecoderInterface, DecoderRegistry};
use alloy_primitives::{address, utils::format_units, Log as PrimitiveLog, LogData};
use alloy_sol_types::{sol, SolEvent};
use decodify_types::{
	parse_address, Address, Asset, ChainId, ConfigSchema, DecodedEvent, EventSubtype, EventType,
	Field, FieldType, ImplementationRegistry, RawTransaction, ReceiptLog, Schema,
	TransactionReceipt, ValidationError, U256,
};
use std::collections::BTreeSet;

sol! {
	event Transfer(address indexed from, address indexed to, uint256 value);
	event Approval(address indexed owner, address indexed spender, uint256 value);
	event Deposit(address indexed dst, uint256 wad);
	event Withdrawal(address indexed src, uint256 wad);
}

// Same signature as the ERC-20 event; told apart by the indexed token id.
mod erc721 {
	alloy_sol_types::sol! {
		event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
	}
}

/// Canonical wrapper of each chain's native asset.
fn default_wrapped_native(chain: ChainId) -> Address {
	match chain {
		ChainId::Ethereum => address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
		ChainId::Optimism => address!("4200000000000000000000000000000000000006"),
		ChainId::PolygonPos => address!("0d500b1d8e8ef31e21c99d1db9a6444d3adf1270"),
	}
}

/// An event before its position is known.
struct Draft {
	event_type: EventType,
	event_subtype: EventSubtype,
	asset: Asset,
	amount: U256,
	location_label: Option<Address>,
	counterparty: Option<Address>,
	address: Option<Address>,
	notes: String,
	extra_data: Option<serde_json::Value>,
}

impl Draft {
	fn finish(self, transaction: &RawTransaction, sequence_index: u32) -> DecodedEvent {
		DecodedEvent {
			tx_hash: transaction.hash,
			chain: transaction.chain,
			sequence_index,
			event_type: self.event_type,
			event_subtype: self.event_subtype,
			asset: self.asset,
			amount: self.amount,
			location_label: self.location_label,
			counterparty: self.counterparty,
			address: self.address,
			notes: self.notes,
			extra_data: self.extra_data,
		}
	}
}

/// Event type, location label and counterparty of a `from` → `to` movement.
fn direction(
	tracked: &BTreeSet<Address>,
	from: Address,
	to: Option<Address>,
) -> (EventType, Option<Address>, Option<Address>) {
	let from_tracked = tracked.contains(&from);
	let to_tracked = to.is_some_and(|to| tracked.contains(&to));
	match (from_tracked, to_tracked) {
		(true, true) => (EventType::Transfer, Some(from), to),
		(true, false) => (EventType::Spend, Some(from), to),
		(false, true) => (EventType::Receive, to, Some(from)),
		(false, false) => (EventType::Informational, None, to),
	}
}

fn movement_notes(
	event_type: EventType,
	amount: &str,
	asset: &Asset,
	from: Address,
	to: Option<Address>,
) -> String {
	let to = to.map_or_else(|| "a new contract".to_string(), |to| to.to_checksum(None));
	match event_type {
		EventType::Spend => format!("Send {} {} to {}", amount, asset, to),
		EventType::Receive => format!("Receive {} {} from {}", amount, asset, from),
		_ => format!("Transfer {} {} from {} to {}", amount, asset, from, to),
	}
}

fn ether(amount: U256) -> String {
	format_units(amount, 18).unwrap_or_else(|_| amount.to_string())
}

fn malformed(log: &ReceiptLog, reason: impl Into<String>) -> DecodeError {
	DecodeError::MalformedLog {
		log_index: log.log_index,
		reason: reason.into(),
	}
}

fn decode_event<E: SolEvent>(log: &ReceiptLog, data_words: usize) -> Result<E, DecodeError> {
	if log.data.len() != data_words * 32 {
		return Err(malformed(
			log,
			format!(
				"{} expects {} data bytes, got {}",
				E::SIGNATURE,
				data_words * 32,
				log.data.len()
			),
		));
	}
	let primitive = PrimitiveLog {
		address: log.address,
		data: LogData::new_unchecked(log.topics.clone(), log.data.clone()),
	};
	E::decode_log(&primitive, true)
		.map(|decoded| decoded.data)
		.map_err(|e| malformed(log, e.to_string()))
}

pub struct EvmDecoder {
	chain: ChainId,
	wrapped_native: Address,
}

impl EvmDecoder {
	pub fn new(chain: ChainId, wrapped_native: Option<Address>) -> Self {
		Self {
			chain,
			wrapped_native: wrapped_native.unwrap_or_else(|| default_wrapped_native(chain)),
		}
	}

	fn gas_fee(&self, transaction: &RawTransaction, receipt: &TransactionReceipt) -> Draft {
		let fee = receipt.fee();
		Draft {
			event_type: EventType::Spend,
			event_subtype: EventSubtype::Fee,
			asset: Asset::native(self.chain),
			amount: fee,
			location_label: Some(transaction.from),
			counterparty: None,
			address: None,
			notes: format!("Burn {} {} for gas", ether(fee), self.chain.native_symbol()),
			extra_data: None,
		}
	}

	fn native_transfer(
		&self,
		transaction: &RawTransaction,
		receipt: &TransactionReceipt,
		tracked: &BTreeSet<Address>,
	) -> Draft {
		let to = transaction.to.or(receipt.contract_address);
		let (event_type, location_label, counterparty) = direction(tracked, transaction.from, to);
		let asset = Asset::native(self.chain);
		Draft {
			notes: movement_notes(event_type, &ether(transaction.value), &asset, transaction.from, to),
			event_type,
			event_subtype: EventSubtype::None,
			asset,
			amount: transaction.value,
			location_label,
			counterparty,
			address: None,
			extra_data: None,
		}
	}

	fn decode_log(
		&self,
		log: &ReceiptLog,
		tracked: &BTreeSet<Address>,
	) -> Result<Option<Draft>, DecodeError> {
		let Some(topic0) = log.topics.first() else {
			return Ok(None);
		};

		if *topic0 == Transfer::SIGNATURE_HASH {
			return match log.topics.len() {
				3 => {
					let event: Transfer = decode_event(log, 1)?;
					Ok(Some(self.token_transfer(
						log,
						tracked,
						event.from,
						event.to,
						event.value,
						None,
					)))
				},
				4 => {
					let event: erc721::Transfer = decode_event(log, 0)?;
					Ok(Some(self.token_transfer(
						log,
						tracked,
						event.from,
						event.to,
						U256::from(1u8),
						Some(event.tokenId),
					)))
				},
				n => Err(malformed(log, format!("Transfer with {} topics", n))),
			};
		}

		if *topic0 == Approval::SIGNATURE_HASH {
			// ERC-721 approvals index the token id and carry no amount.
			if log.topics.len() != 3 {
				return Ok(None);
			}
			let event: Approval = decode_event(log, 1)?;
			let asset = Asset::Erc20 {
				address: log.address,
			};
			return Ok(Some(Draft {
				notes: format!(
					"Set {} spending approval of {} by {} to {}",
					asset, event.spender, event.owner, event.value
				),
				event_type: EventType::Informational,
				event_subtype: EventSubtype::Approve,
				asset,
				amount: event.value,
				location_label: tracked.contains(&event.owner).then_some(event.owner),
				counterparty: Some(event.spender),
				address: Some(log.address),
				extra_data: None,
			}));
		}

		if log.address != self.wrapped_native {
			return Ok(None);
		}

		if *topic0 == Deposit::SIGNATURE_HASH {
			let event: Deposit = decode_event(log, 1)?;
			return Ok(Some(self.wrapping(log, tracked, event.dst, event.wad, true)));
		}
		if *topic0 == Withdrawal::SIGNATURE_HASH {
			let event: Withdrawal = decode_event(log, 1)?;
			return Ok(Some(self.wrapping(log, tracked, event.src, event.wad, false)));
		}

		Ok(None)
	}

	fn token_transfer(
		&self,
		log: &ReceiptLog,
		tracked: &BTreeSet<Address>,
		from: Address,
		to: Address,
		amount: U256,
		token_id: Option<U256>,
	) -> Draft {
		let asset = match token_id {
			Some(token_id) => Asset::Erc721 {
				address: log.address,
				token_id,
			},
			None => Asset::Erc20 {
				address: log.address,
			},
		};
		let (event_type, location_label, counterparty) = direction(tracked, from, Some(to));
		Draft {
			notes: movement_notes(event_type, &amount.to_string(), &asset, from, Some(to)),
			event_type,
			event_subtype: EventSubtype::None,
			asset,
			amount,
			location_label,
			counterparty,
			address: Some(log.address),
			extra_data: None,
		}
	}

	fn wrapping(
		&self,
		log: &ReceiptLog,
		tracked: &BTreeSet<Address>,
		account: Address,
		amount: U256,
		deposit: bool,
	) -> Draft {
		let symbol = self.chain.native_symbol();
		let (event_type, event_subtype, notes) = if deposit {
			(
				EventType::Deposit,
				EventSubtype::DepositAsset,
				format!("Wrap {} {} in W{}", ether(amount), symbol, symbol),
			)
		} else {
			(
				EventType::Withdrawal,
				EventSubtype::RemoveAsset,
				format!("Unwrap {} W{}", ether(amount), symbol),
			)
		};
		Draft {
			event_type,
			event_subtype,
			asset: Asset::Erc20 {
				address: log.address,
			},
			amount,
			location_label: tracked.contains(&account).then_some(account),
			counterparty: Some(log.address),
			address: Some(log.address),
			notes,
			extra_data: None,
		}
	}
}

/// Address held in an indexed topic, if the topic is a padded address.
fn topic_address(topic: &alloy_primitives::B256) -> Option<Address> {
	topic.0[..12]
		.iter()
		.all(|b| *b == 0)
		.then(|| Address::from_slice(&topic.0[12..]))
}

impl DecoderInterface for EvmDecoder {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EvmDecoderSchema)
	}

	fn involved_addresses(&self, receipt: &TransactionReceipt) -> Vec<Address> {
		let mut addresses = Vec::new();
		for log in &receipt.logs {
			let Some(topic0) = log.topics.first() else {
				continue;
			};
			let known = *topic0 == Transfer::SIGNATURE_HASH
				|| *topic0 == Approval::SIGNATURE_HASH
				|| (log.address == self.wrapped_native
					&& (*topic0 == Deposit::SIGNATURE_HASH || *topic0 == Withdrawal::SIGNATURE_HASH));
			if known {
				addresses.extend(log.topics.iter().skip(1).take(2).filter_map(topic_address));
			}
		}
		addresses
	}

	fn decode(
		&self,
		transaction: &RawTransaction,
		receipt: &TransactionReceipt,
		tracked: &BTreeSet<Address>,
	) -> Result<Vec<DecodedEvent>, DecodeError> {
		let mut drafts = Vec::new();

		if tracked.contains(&transaction.from) {
			drafts.push(self.gas_fee(transaction, receipt));
		}

		// Nothing else happened on chain.
		if !receipt.success {
			return Ok(finish(transaction, drafts));
		}

		if !transaction.value.is_zero() {
			drafts.push(self.native_transfer(transaction, receipt, tracked));
		}

		let mut logs: Vec<&ReceiptLog> = receipt.logs.iter().collect();
		logs.sort_by_key(|log| log.log_index);
		for log in logs {
			if let Some(draft) = self.decode_log(log, tracked)? {
				drafts.push(draft);
			}
		}

		Ok(finish(transaction, drafts))
	}
}

fn finish(transaction: &RawTransaction, drafts: Vec<Draft>) -> Vec<DecodedEvent> {
	drafts
		.into_iter()
		.enumerate()
		.map(|(index, draft)| draft.finish(transaction, index as u32))
		.collect()
}

pub struct EvmDecoderSchema;

impl ConfigSchema for EvmDecoderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("wrapped_native_token", FieldType::String).with_validator(
				|value| match value.as_str() {
					Some(s) => parse_address(s).map(|_| ()),
					None => Err("expected a string".to_string()),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Creates the generic EVM decoder.
///
/// Configuration:
/// - `wrapped_native_token`: wrapper contract whose deposits and withdrawals
///   are decoded (default: the chain's canonical wrapper)
pub fn create_decoder(
	config: &toml::Value,
	chain: ChainId,
) -> Result<Box<dyn DecoderInterface>, DecodeError> {
	EvmDecoderSchema
		.validate(config)
		.map_err(|e| DecodeError::Configuration(e.to_string()))?;

	let wrapped = config
		.get("wrapped_native_token")
		.and_then(|v| v.as_str())
		.map(parse_address)
		.transpose()
		.map_err(DecodeError::Configuration)?;

	Ok(Box::new(EvmDecoder::new(chain, wrapped)))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm";
	type Factory = DecoderFactory;

	fn factory() -> Self::Factory {
		create_decoder
	}
}

impl DecoderRegistry for Registry {}
