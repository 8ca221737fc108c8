//! Mapping destination tokens to their source-chain counterparts.

use funding_types::{Address, ChainId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
	pub symbol: String,
	pub address: Address,
	pub decimals: u8,
}

/// Static token knowledge used to route a bridge request.
pub trait RouteResolver: Send + Sync {
	/// Describes `token` on `chain`, if the chain's token table knows it.
	fn token(&self, chain: ChainId, token: &Address) -> Option<TokenInfo>;

	/// The token on `source_chain` that bridges into `token` on
	/// `destination_chain`. Native maps to native; anything else is matched
	/// by symbol.
	fn source_token(
		&self,
		source_chain: ChainId,
		destination_chain: ChainId,
		token: &Address,
	) -> Option<TokenInfo>;
}
