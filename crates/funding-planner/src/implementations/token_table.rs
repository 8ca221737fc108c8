//! Route resolver over the configured token tables.

use funding_types::{is_native, Address, ChainId};
use std::collections::BTreeMap;

use crate::routes::{RouteResolver, TokenInfo};

/// Per chain, the tokens known by symbol.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
	chains: BTreeMap<ChainId, BTreeMap<String, TokenInfo>>,
}

impl TokenTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, chain: ChainId, symbol: &str, address: Address, decimals: u8) {
		self.chains.entry(chain).or_default().insert(
			symbol.to_string(),
			TokenInfo {
				symbol: symbol.to_string(),
				address,
				decimals,
			},
		);
	}

	pub fn with_token(mut self, chain: ChainId, symbol: &str, address: Address, decimals: u8) -> Self {
		self.insert(chain, symbol, address, decimals);
		self
	}

	fn native(&self, chain: ChainId) -> Option<&TokenInfo> {
		self.chains
			.get(&chain)?
			.values()
			.find(|info| is_native(&info.address))
	}
}

impl RouteResolver for TokenTable {
	fn token(&self, chain: ChainId, token: &Address) -> Option<TokenInfo> {
		self.chains
			.get(&chain)?
			.values()
			.find(|info| info.address == *token)
			.cloned()
	}

	fn source_token(
		&self,
		source_chain: ChainId,
		destination_chain: ChainId,
		token: &Address,
	) -> Option<TokenInfo> {
		if is_native(token) {
			return self.native(source_chain).cloned();
		}
		let symbol = self.token(destination_chain, token)?.symbol;
		let source = self.chains.get(&source_chain)?.get(&symbol)?;
		// An ERC-20 never bridges from the source chain's native currency.
		(!is_native(&source.address)).then(|| source.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use funding_types::NATIVE_TOKEN;

	fn table() -> TokenTable {
		TokenTable::new()
			.with_token(ChainId::ETHEREUM, "ETH", NATIVE_TOKEN, 18)
			.with_token(ChainId::ETHEREUM, "OLAS", Address::repeat_byte(0x01), 18)
			.with_token(ChainId::GNOSIS, "XDAI", NATIVE_TOKEN, 18)
			.with_token(ChainId::GNOSIS, "OLAS", Address::repeat_byte(0x64), 18)
			.with_token(ChainId::GNOSIS, "USDC", Address::repeat_byte(0x65), 6)
	}

	#[test]
	fn test_native_maps_to_native() {
		let found = table()
			.source_token(ChainId::ETHEREUM, ChainId::GNOSIS, &NATIVE_TOKEN)
			.unwrap();
		assert_eq!(found.symbol, "ETH");
		assert_eq!(found.address, NATIVE_TOKEN);
	}

	#[test]
	fn test_erc20_matched_by_symbol() {
		let found = table()
			.source_token(ChainId::ETHEREUM, ChainId::GNOSIS, &Address::repeat_byte(0x64))
			.unwrap();
		assert_eq!(found.address, Address::repeat_byte(0x01));
		assert_eq!(found.decimals, 18);
	}

	#[test]
	fn test_unknown_tokens_do_not_resolve() {
		let table = table();
		// USDC has no Ethereum entry in this table.
		assert!(table
			.source_token(ChainId::ETHEREUM, ChainId::GNOSIS, &Address::repeat_byte(0x65))
			.is_none());
		assert!(table
			.source_token(ChainId::ETHEREUM, ChainId::GNOSIS, &Address::repeat_byte(0x99))
			.is_none());
		assert!(table
			.source_token(ChainId::OPTIMISM, ChainId::GNOSIS, &NATIVE_TOKEN)
			.is_none());
	}
}
