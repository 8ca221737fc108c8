//! Requirement aggregation.
//!
//! Turns one balance snapshot, an agent's targets and its credits into the
//! refill requirement (what is missing right now) and the total requirement
//! (the full target). Pure and deterministic: the same inputs always produce
//! the same maps, in the same order.

use funding_types::{
	is_native, Address, Amount, AmountError, BalanceSnapshot, ChainId, Credit, CreditKind, Holder,
	RequirementMap, Requirements, TargetConfig, WalletRef, WalletRole, WalletTarget, NATIVE_TOKEN,
};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregationError {
	/// Inputs are still loading or failed. Distinct from "nothing is missing".
	#[error("Data unavailable: {0}")]
	DataUnavailable(String),
	#[error(transparent)]
	Amount(#[from] AmountError),
}

type CreditKey = (ChainId, Holder, Address);

/// Sums credits of one kind per (chain, holder, token).
fn sum_credits(
	credits: &[Credit],
	kind: CreditKind,
) -> Result<BTreeMap<CreditKey, Amount>, AmountError> {
	let mut sums: BTreeMap<CreditKey, Amount> = BTreeMap::new();
	for credit in credits.iter().filter(|c| c.kind == kind) {
		let slot = sums
			.entry((credit.chain, credit.holder, credit.token))
			.or_insert(Amount::ZERO);
		*slot = slot.checked_add(credit.amount)?;
	}
	Ok(sums)
}

/// Per-token target of one wallet.
///
/// The custodial safe's native target is the larger of its stated native
/// requirement and the chain's monthly operating estimate, never their sum.
fn wallet_targets(
	wallet: &WalletTarget,
	monthly_estimate: Amount,
) -> Result<BTreeMap<Address, Amount>, AmountError> {
	let mut targets: BTreeMap<Address, Amount> = BTreeMap::new();
	let mut add = |token: Address, amount: Amount| -> Result<(), AmountError> {
		let slot = targets.entry(token).or_insert(Amount::ZERO);
		*slot = slot.checked_add(amount)?;
		Ok(())
	};

	let native = match wallet.role {
		WalletRole::MasterCustodial => wallet.native.max(monthly_estimate),
		WalletRole::MasterExternal | WalletRole::ServiceCustodial => wallet.native,
	};
	add(NATIVE_TOKEN, native)?;

	for deposit in [wallet.stake_deposit, wallet.bond].into_iter().flatten() {
		add(deposit.token, deposit.amount)?;
	}
	for (token, amount) in &wallet.minimums {
		add(*token, *amount)?;
	}

	targets.retain(|_, amount| !amount.is_zero());
	Ok(targets)
}

/// Computes refill and total requirements for one agent.
///
/// `None` for balances or targets means they are not loaded yet, which yields
/// [`AggregationError::DataUnavailable`]. So does a targeted wallet whose
/// balances the source failed to read. A safe that does not exist yet holds
/// nothing.
///
/// Reward credits lower a token's target, in-flight credits count as already
/// held. Neither can push a requirement below zero.
pub fn compute_requirements(
	balances: Option<&BalanceSnapshot>,
	targets: Option<&TargetConfig>,
	credits: &[Credit],
) -> Result<Requirements, AggregationError> {
	let balances = balances
		.ok_or_else(|| AggregationError::DataUnavailable("balances not loaded".to_string()))?;
	let targets = targets
		.ok_or_else(|| AggregationError::DataUnavailable("targets not loaded".to_string()))?;

	let rewards = sum_credits(credits, CreditKind::Rewards)?;
	let in_flight = sum_credits(credits, CreditKind::InFlight)?;

	let mut refill = RequirementMap::new();
	let mut total = RequirementMap::new();

	for wallet in &targets.wallets {
		let holder = wallet.holder();
		let wallet_ref = wallet.address.map(|address| WalletRef {
			chain: wallet.chain,
			address,
		});

		if let Some(reason) = wallet_ref.as_ref().and_then(|w| balances.failure(w)) {
			return Err(AggregationError::DataUnavailable(format!(
				"balances of {} unavailable: {}",
				holder, reason
			)));
		}

		for (token, target) in wallet_targets(wallet, targets.monthly_estimate(wallet.chain))? {
			let key = (wallet.chain, holder, token);
			let credited = |sums: &BTreeMap<CreditKey, Amount>| {
				sums.get(&key).copied().unwrap_or(Amount::ZERO)
			};

			let held = wallet_ref
				.as_ref()
				.map(|w| balances.balance(w, &token))
				.unwrap_or(Amount::ZERO);

			let needed = target
				.saturating_sub(credited(&rewards))
				.saturating_sub(held)
				.saturating_sub(credited(&in_flight));

			total.add(wallet.chain, holder, token, target)?;
			refill.add(wallet.chain, holder, token, needed)?;
		}
	}

	Ok(Requirements {
		refill,
		total,
		is_stale: balances.is_stale(),
	})
}

/// Native amount among the refill entries of `chain`, summed over holders.
pub fn native_refill(requirements: &Requirements, chain: ChainId) -> Amount {
	requirements
		.refill
		.iter()
		.filter(|(c, _, token, _)| *c == chain && is_native(token))
		.fold(Amount::ZERO, |acc, (_, _, _, amount)| {
			acc.checked_add(amount).unwrap_or(acc)
		})
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::address;
	use chrono::{TimeZone, Utc};
	use funding_types::TokenAmount;

	const EOA: Address = address!("0x1111111111111111111111111111111111111111");
	const SAFE: Address = address!("0x2222222222222222222222222222222222222222");
	const OLAS: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");

	fn snapshot() -> BalanceSnapshot {
		BalanceSnapshot::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
	}

	fn wallet(role: WalletRole, address: Option<Address>, native: u64) -> WalletTarget {
		WalletTarget {
			chain: ChainId::GNOSIS,
			role,
			address,
			native: Amount::from(native),
			stake_deposit: None,
			bond: None,
			minimums: BTreeMap::new(),
		}
	}

	fn targets(wallets: Vec<WalletTarget>, monthly: u64) -> TargetConfig {
		TargetConfig {
			wallets,
			monthly_operating_estimate: BTreeMap::from([(ChainId::GNOSIS, Amount::from(monthly))]),
		}
	}

	#[test]
	fn test_unknown_is_not_zero() {
		let config = targets(vec![], 0);
		assert!(matches!(
			compute_requirements(None, Some(&config), &[]),
			Err(AggregationError::DataUnavailable(_))
		));
		assert!(matches!(
			compute_requirements(Some(&snapshot()), None, &[]),
			Err(AggregationError::DataUnavailable(_))
		));

		let mut balances = snapshot();
		balances.record_failure(
			WalletRef {
				chain: ChainId::GNOSIS,
				address: EOA,
			},
			"rpc down",
		);
		let config = targets(vec![wallet(WalletRole::MasterExternal, Some(EOA), 5)], 0);
		assert!(matches!(
			compute_requirements(Some(&balances), Some(&config), &[]),
			Err(AggregationError::DataUnavailable(_))
		));
	}

	#[test]
	fn test_custodial_native_is_max_not_sum() {
		let config = targets(
			vec![
				wallet(WalletRole::MasterCustodial, None, 100),
				wallet(WalletRole::MasterExternal, Some(EOA), 5),
			],
			60,
		);
		let result = compute_requirements(Some(&snapshot()), Some(&config), &[]).unwrap();
		assert_eq!(
			result
				.refill
				.get(ChainId::GNOSIS, &Holder::SafePlaceholder, &NATIVE_TOKEN),
			Amount::from(100u64)
		);
		assert_eq!(
			result.refill.get(ChainId::GNOSIS, &Holder::Wallet(EOA), &NATIVE_TOKEN),
			Amount::from(5u64)
		);
		assert_eq!(native_refill(&result, ChainId::GNOSIS), Amount::from(105u64));

		// Estimate above the stated requirement wins.
		let config = targets(vec![wallet(WalletRole::MasterCustodial, None, 100)], 250);
		let result = compute_requirements(Some(&snapshot()), Some(&config), &[]).unwrap();
		assert_eq!(native_refill(&result, ChainId::GNOSIS), Amount::from(250u64));
	}

	#[test]
	fn test_balances_and_credits_floor_at_zero() {
		let mut safe = wallet(WalletRole::MasterCustodial, Some(SAFE), 0);
		safe.stake_deposit = Some(TokenAmount::new(OLAS, 40u64));
		safe.bond = Some(TokenAmount::new(OLAS, 10u64));
		let config = targets(vec![safe], 0);

		let mut balances = snapshot();
		let safe_ref = WalletRef {
			chain: ChainId::GNOSIS,
			address: SAFE,
		};
		balances.insert(safe_ref, OLAS, Amount::from(15u64));

		let credits = [
			Credit {
				chain: ChainId::GNOSIS,
				holder: Holder::Wallet(SAFE),
				token: OLAS,
				amount: Amount::from(20u64),
				kind: CreditKind::Rewards,
			},
			Credit {
				chain: ChainId::GNOSIS,
				holder: Holder::Wallet(SAFE),
				token: OLAS,
				amount: Amount::from(10u64),
				kind: CreditKind::InFlight,
			},
		];

		let result = compute_requirements(Some(&balances), Some(&config), &credits).unwrap();
		// 50 target - 20 rewards - 15 held - 10 in flight
		assert_eq!(
			result.refill.get(ChainId::GNOSIS, &Holder::Wallet(SAFE), &OLAS),
			Amount::from(5u64)
		);
		assert_eq!(
			result.total.get(ChainId::GNOSIS, &Holder::Wallet(SAFE), &OLAS),
			Amount::from(50u64)
		);

		// Credits larger than the target never go negative.
		let generous = [Credit {
			amount: Amount::from(1_000u64),
			..credits[0]
		}];
		let result = compute_requirements(Some(&balances), Some(&config), &generous).unwrap();
		assert!(result.refill.is_empty());
		assert!(result.allow_start());
		assert!(!result.is_refill_required());
	}

	#[test]
	fn test_zero_deficit_when_balances_meet_targets() {
		let config = targets(vec![wallet(WalletRole::MasterExternal, Some(EOA), 5)], 0);
		let mut balances = snapshot();
		balances.insert(
			WalletRef {
				chain: ChainId::GNOSIS,
				address: EOA,
			},
			NATIVE_TOKEN,
			Amount::from(9u64),
		);
		let result = compute_requirements(Some(&balances), Some(&config), &[]).unwrap();
		assert!(result.refill.is_empty());
		assert_eq!(
			result.total.get(ChainId::GNOSIS, &Holder::Wallet(EOA), &NATIVE_TOKEN),
			Amount::from(5u64)
		);
	}

	#[test]
	fn test_identical_inputs_give_identical_bytes() {
		let mut safe = wallet(WalletRole::MasterCustodial, None, 3);
		safe.minimums.insert(OLAS, Amount::from(8u64));
		safe.minimums.insert(Address::repeat_byte(0x01), Amount::from(2u64));
		let config = targets(vec![safe, wallet(WalletRole::MasterExternal, Some(EOA), 1)], 7);
		let mut balances = snapshot();
		balances.funding_cooldown = true;

		let first = compute_requirements(Some(&balances), Some(&config), &[]).unwrap();
		let second = compute_requirements(Some(&balances), Some(&config), &[]).unwrap();
		assert_eq!(
			serde_json::to_vec(&first).unwrap(),
			serde_json::to_vec(&second).unwrap()
		);
		assert!(first.is_stale);
	}

	#[test]
	fn test_refill_never_negative_over_a_grid() {
		for target in [0u64, 1, 10, 1_000] {
			for held in [0u64, 1, 10, 5_000] {
				for credit in [0u64, 3, 2_000] {
					let config = targets(
						vec![wallet(WalletRole::MasterExternal, Some(EOA), target)],
						0,
					);
					let mut balances = snapshot();
					balances.insert(
						WalletRef {
							chain: ChainId::GNOSIS,
							address: EOA,
						},
						NATIVE_TOKEN,
						Amount::from(held),
					);
					let credits = [Credit {
						chain: ChainId::GNOSIS,
						holder: Holder::Wallet(EOA),
						token: NATIVE_TOKEN,
						amount: Amount::from(credit),
						kind: CreditKind::InFlight,
					}];
					let result =
						compute_requirements(Some(&balances), Some(&config), &credits).unwrap();
					let expected = target.saturating_sub(held).saturating_sub(credit);
					assert_eq!(
						result.refill.get(ChainId::GNOSIS, &Holder::Wallet(EOA), &NATIVE_TOKEN),
						Amount::from(expected)
					);
					assert!(result.refill.iter().all(|(_, _, _, amount)| !amount.is_zero()));
				}
			}
		}
	}
}
