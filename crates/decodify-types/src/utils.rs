//! Hex helpers shared across crates.

use crate::Address;

/// Shortens an id for log output: first 8 characters followed by `..`.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Strips a leading `0x` or `0X`.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

/// Parses a `0x`-prefixed, 40 hex character address.
///
/// Mixed case is accepted without enforcing the EIP-55 checksum.
pub fn parse_address(s: &str) -> Result<Address, String> {
	if !(s.starts_with("0x") || s.starts_with("0X")) {
		return Err(format!("Address '{}' must start with 0x", s));
	}
	let digits = without_0x_prefix(s);
	if digits.len() != 40 {
		return Err(format!(
			"Address '{}' must have 40 hex characters, got {}",
			s,
			digits.len()
		));
	}
	let mut bytes = [0u8; 20];
	hex::decode_to_slice(digits, &mut bytes)
		.map_err(|e| format!("Address '{}' is not valid hex: {}", s, e))?;
	Ok(Address::from(bytes))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_prefix_helpers() {
		assert_eq!(without_0x_prefix("0Xabcd"), "abcd");
		assert_eq!(truncate_id("0x1234567890"), "0x123456..");
	}

	#[test]
	fn test_parse_address() {
		let address = parse_address("0x742d35Cc6634C0532925a3b8D42F3D4C38A5F7F1").unwrap();
		assert_eq!(
			hex::encode(address),
			"742d35cc6634c0532925a3b8d42f3d4c38a5f7f1"
		);
		assert!(parse_address("742d35cc6634c0532925a3b8d42f3d4c38a5f7f1").is_err());
		assert!(parse_address("0x742d35").is_err());
		assert!(parse_address("0x742d35cc6634c0532925a3b8d42f3d4c38a5f7zz").is_err());
	}
}
