//! Pro-rata distribution engine.
//!
//! A pool of shares receives a proportional cut of newly arriving amounts
//! without iterating the share holders: each injection bumps a cumulative
//! per-share index, and a participant's entitlement is
//! `shares * (index - last_seen_index)`, realized lazily the next time the
//! participant is touched.
//!
//! The single-index [`RewardIndex`] is the reusable accumulator; the trove
//! ledger instantiates it twice per collateral token (a collateral index and
//! a debt index, bundled in [`RedistributionPool`]) and once more inside the
//! fee-sharing staking pool (see `collaborators::StakingPool`).
//!
//! Entitlements are floored to raw units. The dust stays in the pool's
//! pending trackers; the error per settlement is under one raw unit per
//! index, bounded and accepted rather than special-cased.

use crate::numeric::Stable;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cumulative per-share accumulator. Monotonically non-decreasing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardIndex(Decimal);

impl RewardIndex {
    /// Record an injection of `amount` to be shared across `total_shares`.
    /// `total_shares` is the collective stake at injection time and does not
    /// change on this call.
    pub fn deposit(&mut self, amount: Decimal, total_shares: Decimal) {
        debug_assert!(total_shares > Decimal::ZERO);
        self.0 += amount / total_shares;
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

/// Pure settlement step: entitlement owed to `shares` since `last_seen`,
/// and the refreshed snapshot.
pub fn settle(shares: Decimal, index: Decimal, last_seen: Decimal) -> (Decimal, Decimal) {
    ((index - last_seen) * shares, index)
}

/// A trove's last-seen distribution indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub collateral_index: Decimal,
    pub debt_index: Decimal,
}

/// Per-collateral-token loss redistribution pool: liquidated collateral and
/// debt waiting to be claimed by the surviving troves. Shares are the
/// troves' recorded collateral amounts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionPool {
    collateral_index: RewardIndex,
    debt_index: RewardIndex,
    /// Injected but not yet settled; what remains after every participant
    /// settles is rounding dust.
    pub pending_collateral: u128,
    pub pending_debt: Stable,
}

impl RedistributionPool {
    /// Inject a liquidated trove's collateral and debt, to be absorbed
    /// pro-rata by `total_shares` of surviving collateral.
    pub fn deposit(&mut self, collateral: u128, debt: Stable, total_shares: u128) {
        let shares = Decimal::from_u128(total_shares).expect("share total exceeds decimal range");
        self.collateral_index.deposit(
            Decimal::from_u128(collateral).expect("collateral exceeds decimal range"),
            shares,
        );
        self.debt_index.deposit(debt.to_decimal(), shares);
        self.pending_collateral += collateral;
        self.pending_debt += debt;
    }

    /// Entitlement of `shares` against `snapshot` without settling.
    pub fn entitlement(&self, shares: u128, snapshot: &RewardSnapshot) -> (u128, Stable) {
        let shares = Decimal::from_u128(shares).expect("shares exceed decimal range");
        let (collateral, _) = settle(shares, self.collateral_index.value(), snapshot.collateral_index);
        let (debt, _) = settle(shares, self.debt_index.value(), snapshot.debt_index);
        (
            collateral.trunc().to_u128().unwrap_or(0),
            Stable::from_decimal(debt),
        )
    }

    /// Settle `shares` against `snapshot`: returns the realized amounts and
    /// refreshes the snapshot. Must run before the participant's shares
    /// change.
    pub fn settle_into(&mut self, shares: u128, snapshot: &mut RewardSnapshot) -> (u128, Stable) {
        let (collateral, debt) = self.entitlement(shares, snapshot);
        snapshot.collateral_index = self.collateral_index.value();
        snapshot.debt_index = self.debt_index.value();
        self.pending_collateral = self.pending_collateral.saturating_sub(collateral);
        self.pending_debt = self.pending_debt.saturating_sub(debt);
        (collateral, debt)
    }

    /// Snapshot for a participant entering the pool now (entitled to nothing
    /// that was injected before).
    pub fn fresh_snapshot(&self) -> RewardSnapshot {
        RewardSnapshot {
            collateral_index: self.collateral_index.value(),
            debt_index: self.debt_index.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec as pvec;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn settle_is_pure_and_additive() {
        let (owed, seen) = settle(dec!(10), dec!(0.25), Decimal::ZERO);
        assert_eq!(owed, dec!(2.5));
        assert_eq!(seen, dec!(0.25));
        // settling twice from the refreshed snapshot yields nothing new
        let (owed2, _) = settle(dec!(10), dec!(0.25), seen);
        assert_eq!(owed2, Decimal::ZERO);
    }

    #[test]
    fn late_entrants_get_nothing_from_prior_deposits() {
        let mut pool = RedistributionPool::default();
        pool.deposit(1_000, Stable::new(500), 4_000);
        let snapshot = pool.fresh_snapshot();
        assert_eq!(pool.entitlement(1_000, &snapshot), (0, Stable::ZERO));
    }

    #[test]
    fn equal_shares_split_equally() {
        let mut pool = RedistributionPool::default();
        // four survivors with 10 units each absorb 10 collateral / 4 debt
        pool.deposit(10_000, Stable::new(4_000), 40_000);
        let mut snap = RewardSnapshot::default();
        let (collateral, debt) = pool.settle_into(10_000, &mut snap);
        assert_eq!(collateral, 2_500);
        assert_eq!(debt, Stable::new(1_000));
        // second settlement is a no-op
        assert_eq!(pool.settle_into(10_000, &mut snap), (0, Stable::ZERO));
    }

    proptest! {
        #[test]
        fn injections_are_conserved_modulo_dust(
            shares in pvec(1u128..1_000_000, 1..12),
            injections in pvec((1u128..1_000_000, 1u128..1_000_000), 1..8),
        ) {
            let total: u128 = shares.iter().sum();
            let mut pool = RedistributionPool::default();
            let mut snapshots = vec![RewardSnapshot::default(); shares.len()];
            let mut settled_collateral = 0u128;
            let mut settled_debt = Stable::ZERO;
            let mut injected_collateral = 0u128;
            let mut injected_debt = Stable::ZERO;

            for (i, (c, d)) in injections.iter().enumerate() {
                pool.deposit(*c, Stable::new(*d), total);
                injected_collateral += c;
                injected_debt += Stable::new(*d);
                // settle an arbitrary participant between injections
                let k = i % shares.len();
                let (sc, sd) = pool.settle_into(shares[k], &mut snapshots[k]);
                settled_collateral += sc;
                settled_debt += sd;
            }
            for (share, snap) in shares.iter().zip(snapshots.iter_mut()) {
                let (sc, sd) = pool.settle_into(*share, snap);
                settled_collateral += sc;
                settled_debt += sd;
            }

            // everything injected is either settled or bounded dust: each
            // settlement floors once per index, so the loss is under one raw
            // unit per settlement call
            let dust = (shares.len() + injections.len()) as u128;
            prop_assert!(settled_collateral <= injected_collateral);
            prop_assert!(injected_collateral - settled_collateral <= dust);
            prop_assert!(settled_debt <= injected_debt);
            prop_assert!(injected_debt.to_u128() - settled_debt.to_u128() <= dust);
            prop_assert_eq!(pool.pending_collateral, injected_collateral - settled_collateral);
            prop_assert_eq!(pool.pending_debt.to_u128(), injected_debt.to_u128() - settled_debt.to_u128());
        }
    }
}
