//! Bridge request planning.
//!
//! Turns a refill requirement into the smallest set of cross-chain transfers
//! that covers it. Every transfer starts from the master externally-owned
//! wallet on a fixed source chain; requests sharing a route are merged.

use funding_types::{
	Address, Amount, AmountError, BridgeDestination, BridgeRequest, BridgeSource, ChainId, Holder,
	RecipientPolicy, RefillRequirement, RouteKey, TokenTransfer, TransferSummary,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

pub mod routes;

pub mod implementations {
	pub mod token_table;
}

pub use implementations::token_table::TokenTable;
pub use routes::{RouteResolver, TokenInfo};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
	#[error("No source token on chain {source_chain} for token {token} on chain {chain}")]
	UnroutableToken {
		source_chain: ChainId,
		chain: ChainId,
		token: Address,
	},
	#[error("Merged amount overflows: {0}")]
	AmountOverflow(#[from] AmountError),
}

/// Wallets and routing choices of one agent.
#[derive(Debug, Clone)]
pub struct PlanContext {
	pub source_chain: ChainId,
	pub master_eoa: Address,
	pub master_safe: Option<Address>,
	pub recipient: RecipientPolicy,
}

impl PlanContext {
	/// A deficit of `holder` on `chain` is something a bridge can cover.
	pub fn covers(&self, chain: ChainId, holder: &Holder) -> bool {
		chain != self.source_chain && self.recognizes(holder)
	}

	/// Holders a bridge may fund: the externally-owned wallet, the custodial
	/// safe once known, and the safe placeholder before that.
	fn recognizes(&self, holder: &Holder) -> bool {
		match holder {
			Holder::SafePlaceholder => true,
			Holder::Wallet(address) => {
				*address == self.master_eoa || Some(*address) == self.master_safe
			}
		}
	}

	fn recipient_for(&self, holder: &Holder) -> Address {
		match self.recipient {
			RecipientPolicy::External => self.master_eoa,
			RecipientPolicy::Holder => holder.address().unwrap_or(self.master_eoa),
		}
	}
}

/// A deficit on the source chain itself. No bridge covers it, so the user
/// has to deposit it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectDeposit {
	pub chain: ChainId,
	pub holder: Holder,
	pub token: Address,
	pub amount: Amount,
}

/// Deficits of the agent's wallets on the source chain, which [`plan`]
/// leaves out.
pub fn direct_deposits(refill: &RefillRequirement, context: &PlanContext) -> Vec<DirectDeposit> {
	refill
		.iter()
		.filter(|(chain, holder, _, amount)| {
			*chain == context.source_chain && !amount.is_zero() && context.recognizes(holder)
		})
		.map(|(chain, holder, token, amount)| DirectDeposit {
			chain,
			holder: *holder,
			token: *token,
			amount,
		})
		.collect()
}

/// Plans the bridge requests covering `refill`.
///
/// Output order follows the refill map's ordering, so equal inputs give equal
/// plans. Deficits on the source chain itself cannot be bridged; see
/// [`direct_deposits`].
pub fn plan(
	refill: &RefillRequirement,
	routing: &dyn RouteResolver,
	context: &PlanContext,
) -> Result<Vec<BridgeRequest>, PlanError> {
	let mut requests: Vec<BridgeRequest> = Vec::new();
	let mut index: BTreeMap<RouteKey, usize> = BTreeMap::new();

	for (chain, holder, token, amount) in refill.iter() {
		if amount.is_zero() {
			continue;
		}
		if !context.recognizes(holder) {
			debug!(chain = %chain, holder = %holder, "Skipping deficit of unrecognized wallet");
			continue;
		}
		if chain == context.source_chain {
			debug!(chain = %chain, holder = %holder, "Skipping deficit on the source chain");
			continue;
		}

		let source = routing
			.source_token(context.source_chain, chain, token)
			.ok_or(PlanError::UnroutableToken {
				source_chain: context.source_chain,
				chain,
				token: *token,
			})?;

		let request = BridgeRequest {
			from: BridgeSource {
				chain: context.source_chain,
				address: context.master_eoa,
				token: source.address,
			},
			to: BridgeDestination {
				chain,
				address: context.recipient_for(holder),
				token: *token,
				amount,
			},
		};

		let key = request.route_key();
		match index.get(&key) {
			Some(&position) => {
				let existing = &mut requests[position].to.amount;
				*existing = existing.checked_add(amount)?;
			}
			None => {
				index.insert(key, requests.len());
				requests.push(request);
			}
		}
	}

	debug!(requests = requests.len(), "Planned bridge requests");
	Ok(requests)
}

/// Describes planned requests for display. Returns `None` for an empty plan.
///
/// Tokens missing from the resolver fall back to their address and 18
/// decimals rather than failing, since the summary is informational.
pub fn transfer_summary(
	requests: &[BridgeRequest],
	routing: &dyn RouteResolver,
	eta: Option<u64>,
) -> Option<TransferSummary> {
	let first = requests.first()?;
	let transfers = requests
		.iter()
		.map(|request| {
			let from = routing.token(request.from.chain, &request.from.token);
			let to = routing.token(request.to.chain, &request.to.token);
			let decimals = to.as_ref().map(|info| info.decimals).unwrap_or(18);
			TokenTransfer {
				from_symbol: symbol_or_address(from, &request.from.token),
				to_symbol: symbol_or_address(to, &request.to.token),
				amount: request.to.amount,
				decimals,
				display_amount: request.to.amount.format_units(decimals),
			}
		})
		.collect();

	Some(TransferSummary {
		from_chain: first.from.chain,
		to_chain: first.to.chain,
		transfers,
		eta,
	})
}

fn symbol_or_address(info: Option<TokenInfo>, token: &Address) -> String {
	info.map(|info| info.symbol)
		.unwrap_or_else(|| token.to_string())
}
