//! Global ledger state.
//!
//! One `State` value holds every trove, the per-token sorted registries and
//! redistribution pools, and the protocol base rate. Mutations flow through
//! the `event` module so the state stays rebuildable from its log.

use crate::distribution::RedistributionPool;
use crate::event::Event;
use crate::numeric::{collateral_value, Price, Ratio, Stable};
use crate::registry::SortedTroves;
use crate::trove::Trove;
use crate::{
    compute_collateral_ratio, AccountId, ProtocolError, Timestamp, TokenId, TroveId,
    BASE_RATE_MINUTE_DECAY, BORROW_FEE_CEILING, BORROW_FEE_FLOOR, LIQUIDATION_RESERVE, MIN_NANOS,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

// Like assert_eq, but returns an error instead of panicking.
macro_rules! ensure_eq {
    ($lhs:expr, $rhs:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if $lhs != $rhs {
            return Err(format!("{} ({:?}) != {} ({:?}): {}",
                               std::stringify!($lhs), $lhs,
                               std::stringify!($rhs), $rhs,
                               format!($msg $(,$args)*)));
        }
    }
}

macro_rules! ensure {
    ($cond:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if !$cond {
            return Err(format!("Condition {} is false: {}",
                               std::stringify!($cond),
                               format!($msg $(,$args)*)));
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitArg {
    /// May register and tune collateral token configs.
    pub admin: AccountId,
    /// Holds the minted liquidation reserves until they are burned on full
    /// repayment or paid out to a liquidator.
    pub protocol_account: AccountId,
    /// Stable account of the fee-recipient collaborator.
    pub fee_account: AccountId,
}

/// Per-collateral-token market parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralConfig {
    pub token: TokenId,
    /// Native decimal precision of the collateral token.
    pub decimals: u8,
    /// Below this ratio a trove can be liquidated.
    pub mcr: Ratio,
    /// Cap on the effective redemption fee ratio for this token.
    pub max_redemption_fee: Ratio,
}

/// Where a liquidated trove's collateral and net debt went.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationDestination {
    /// Consumed by the absorption reserve against its stable deposits.
    Absorbed,
    /// Injected into the community redistribution pool.
    Redistributed,
}

pub struct State {
    pub troves: BTreeMap<TroveId, Trove>,
    pub owner_to_troves: BTreeMap<AccountId, BTreeSet<TroveId>>,
    pub collateral_configs: BTreeMap<TokenId, CollateralConfig>,
    pub registries: BTreeMap<TokenId, SortedTroves>,
    pub redistribution: BTreeMap<TokenId, RedistributionPool>,
    /// Sum of recorded collateral over registry members, per token: the
    /// share total the distribution engine divides by.
    pub total_collateral: BTreeMap<TokenId, u128>,
    /// Decaying protocol base rate driving redemption and borrow fees.
    pub base_rate: Ratio,
    pub last_base_rate_update: Timestamp,
    pub next_trove_id: TroveId,
    pub admin: AccountId,
    pub protocol_account: AccountId,
    pub fee_account: AccountId,
    pub events: Vec<Event>,
}

impl From<InitArg> for State {
    fn from(args: InitArg) -> Self {
        Self {
            troves: BTreeMap::new(),
            owner_to_troves: BTreeMap::new(),
            collateral_configs: BTreeMap::new(),
            registries: BTreeMap::new(),
            redistribution: BTreeMap::new(),
            total_collateral: BTreeMap::new(),
            base_rate: Ratio::from(Decimal::ZERO),
            last_base_rate_update: 0,
            next_trove_id: 1,
            admin: args.admin,
            protocol_account: args.protocol_account,
            fee_account: args.fee_account,
            events: vec![Event::Init(args)],
        }
    }
}

impl State {
    pub fn config(&self, token: &TokenId) -> Result<&CollateralConfig, ProtocolError> {
        self.collateral_configs
            .get(token)
            .ok_or(ProtocolError::UnknownCollateralToken)
    }

    pub fn trove(&self, id: TroveId) -> Result<&Trove, ProtocolError> {
        self.troves.get(&id).ok_or(ProtocolError::UnknownTrove(id))
    }

    pub fn registry(&self, token: &TokenId) -> Result<&SortedTroves, ProtocolError> {
        self.registries
            .get(token)
            .ok_or(ProtocolError::UnknownCollateralToken)
    }

    pub fn increment_trove_id(&mut self) -> TroveId {
        let id = self.next_trove_id;
        self.next_trove_id += 1;
        id
    }

    fn is_member(&self, token: &TokenId, id: TroveId) -> bool {
        self.registries.get(token).map_or(false, |r| r.contains(id))
    }

    /// Recorded amounts plus any unsettled redistribution entitlement.
    /// A delisted trove has zero collateral and therefore zero shares, so
    /// no membership check is needed.
    pub fn effective_amounts(&self, trove: &Trove) -> (u128, Stable) {
        let Some(pool) = self.redistribution.get(&trove.collateral_token) else {
            return (trove.collateral, trove.debt);
        };
        let (dc, dd) = pool.entitlement(trove.collateral, &trove.reward_snapshot);
        (trove.collateral + dc, trove.debt + dd)
    }

    /// Price-invariant ordering key: collateral per unit of debt. An empty
    /// trove ranks weakest, a funded debt-free trove strongest.
    pub fn rank_key(&self, id: TroveId) -> Decimal {
        let Some(trove) = self.troves.get(&id) else {
            return Decimal::ZERO;
        };
        let (collateral, debt) = self.effective_amounts(trove);
        if debt == 0 {
            return if collateral == 0 { Decimal::ZERO } else { Decimal::MAX };
        }
        Decimal::from_u128(collateral).unwrap_or(Decimal::MAX) / debt.to_decimal()
    }

    /// Collateralization at `price`, on effective amounts.
    pub fn trove_collateral_ratio(&self, id: TroveId, price: Price) -> Result<Ratio, ProtocolError> {
        let trove = self.trove(id)?;
        let config = self.config(&trove.collateral_token)?;
        let (collateral, debt) = self.effective_amounts(trove);
        Ok(compute_collateral_ratio(
            collateral_value(collateral, price, config.decimals),
            debt,
        ))
    }

    pub fn total_debt_for(&self, token: &TokenId) -> Stable {
        match self.registries.get(token) {
            Some(registry) => registry
                .iter()
                .filter_map(|id| self.troves.get(&id))
                .map(|t| t.debt)
                .sum(),
            None => Stable::ZERO,
        }
    }

    pub fn total_collateral_for(&self, token: &TokenId) -> u128 {
        self.total_collateral.get(token).copied().unwrap_or(0)
    }

    /// Base rate after continuous decay up to `now`.
    pub fn decayed_base_rate(&self, now: Timestamp) -> Ratio {
        let elapsed_minutes = now.saturating_sub(self.last_base_rate_update) / MIN_NANOS;
        Ratio(self.base_rate.0 * BASE_RATE_MINUTE_DECAY.pow(elapsed_minutes).0)
    }

    /// One-time borrowing fee rate at `now`.
    pub fn borrowing_rate(&self, now: Timestamp) -> Ratio {
        (BORROW_FEE_FLOOR + self.decayed_base_rate(now)).min(BORROW_FEE_CEILING)
    }

    // --- state transitions (shared by live operations and event replay) ---

    /// Realize the trove's pending redistribution before its amounts are
    /// read or changed. A delisted trove holds zero shares, so this only
    /// refreshes its snapshot.
    pub(crate) fn settle_trove(&mut self, id: TroveId) {
        let Some(trove) = self.troves.get(&id) else {
            return;
        };
        let token = trove.collateral_token;
        let shares = trove.collateral;
        let mut snapshot = trove.reward_snapshot;
        let Some(pool) = self.redistribution.get_mut(&token) else {
            return;
        };
        let (dc, dd) = pool.settle_into(shares, &mut snapshot);
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        trove.reward_snapshot = snapshot;
        trove.collateral += dc;
        trove.debt += dd;
        if dc > 0 {
            *self.total_collateral.entry(token).or_insert(0) += dc;
        }
    }

    fn insert_trove_sorted(&mut self, token: TokenId, id: TroveId, hint: Option<TroveId>) {
        let mut registry = self.registries.remove(&token).unwrap_or_default();
        registry
            .insert(id, hint, |tid| self.rank_key(tid))
            .expect("bug: insert with validated hint failed");
        self.registries.insert(token, registry);
    }

    fn reinsert_trove_sorted(&mut self, token: TokenId, id: TroveId, hint: Option<TroveId>) {
        let mut registry = self.registries.remove(&token).unwrap_or_default();
        registry
            .reinsert(id, hint, |tid| self.rank_key(tid))
            .expect("bug: reinsert with validated hint failed");
        self.registries.insert(token, registry);
    }

    pub(crate) fn apply_add_collateral_token(&mut self, config: CollateralConfig) {
        let token = config.token;
        self.collateral_configs.insert(token, config);
        self.registries.entry(token).or_default();
        self.redistribution.entry(token).or_default();
        self.total_collateral.entry(token).or_insert(0);
    }

    pub(crate) fn apply_update_collateral_config(&mut self, config: CollateralConfig) {
        self.collateral_configs.insert(config.token, config);
    }

    pub(crate) fn apply_open_trove(&mut self, id: TroveId, token: TokenId, owner: AccountId) {
        let snapshot = self
            .redistribution
            .get(&token)
            .map(|p| p.fresh_snapshot())
            .unwrap_or_default();
        let trove = Trove {
            trove_id: id,
            collateral_token: token,
            owners: BTreeSet::from([owner]),
            collateral: 0,
            debt: Stable::ZERO,
            reserve_debt: Stable::ZERO,
            reward_snapshot: snapshot,
        };
        self.troves.insert(id, trove);
        self.owner_to_troves.entry(owner).or_default().insert(id);
        self.next_trove_id = self.next_trove_id.max(id + 1);
        self.insert_trove_sorted(token, id, None);
    }

    pub(crate) fn apply_increase_collateral(
        &mut self,
        id: TroveId,
        amount: u128,
        hint: Option<TroveId>,
    ) {
        self.settle_trove(id);
        let token = self.troves[&id].collateral_token;
        let member = self.is_member(&token, id);
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        trove.collateral += amount;
        if member {
            *self.total_collateral.entry(token).or_insert(0) += amount;
            self.reinsert_trove_sorted(token, id, hint);
        } else {
            // a liquidated trove rejoining the registry: count its full
            // balance again and forget injections from its absence
            let collateral = self.troves[&id].collateral;
            *self.total_collateral.entry(token).or_insert(0) += collateral;
            let fresh = self
                .redistribution
                .get(&token)
                .map(|p| p.fresh_snapshot())
                .unwrap_or_default();
            self.troves.get_mut(&id).expect("bug: trove vanished").reward_snapshot = fresh;
            self.insert_trove_sorted(token, id, hint);
        }
    }

    pub(crate) fn apply_decrease_collateral(
        &mut self,
        id: TroveId,
        amount: u128,
        hint: Option<TroveId>,
    ) {
        self.settle_trove(id);
        let token = self.troves[&id].collateral_token;
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        assert!(trove.collateral >= amount, "bug: withdrawing more than held");
        trove.collateral -= amount;
        let total = self.total_collateral.get_mut(&token).expect("bug: missing total");
        *total -= amount;
        self.reinsert_trove_sorted(token, id, hint);
    }

    pub(crate) fn apply_borrow(&mut self, id: TroveId, amount: Stable, fee: Stable, hint: Option<TroveId>) {
        self.settle_trove(id);
        let token = self.troves[&id].collateral_token;
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        trove.debt += amount + fee;
        if trove.reserve_debt == 0 {
            trove.debt += LIQUIDATION_RESERVE;
            trove.reserve_debt = LIQUIDATION_RESERVE;
        }
        self.reinsert_trove_sorted(token, id, hint);
    }

    pub(crate) fn apply_repay(&mut self, id: TroveId, amount: Stable, hint: Option<TroveId>) {
        self.settle_trove(id);
        let token = self.troves[&id].collateral_token;
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        let net_debt = trove.debt - trove.reserve_debt;
        assert!(amount <= net_debt, "bug: repay exceeds net debt");
        if amount == net_debt {
            // the posted reserve is burned together with the final repayment
            trove.debt = Stable::ZERO;
            trove.reserve_debt = Stable::ZERO;
        } else {
            trove.debt -= amount;
        }
        self.reinsert_trove_sorted(token, id, hint);
    }

    pub(crate) fn apply_liquidate(
        &mut self,
        id: TroveId,
        destination: LiquidationDestination,
    ) -> (u128, Stable) {
        self.settle_trove(id);
        let token = self.troves[&id].collateral_token;
        let collateral = self.troves[&id].collateral;
        let debt = self.troves[&id].debt;
        let net_debt = debt - self.troves[&id].reserve_debt;

        let registry = self.registries.get_mut(&token).expect("bug: missing registry");
        registry.remove(id).expect("bug: liquidating a delisted trove");
        let total = self.total_collateral.get_mut(&token).expect("bug: missing total");
        *total -= collateral;
        let remaining = *total;

        if destination == LiquidationDestination::Redistributed {
            self.redistribution
                .get_mut(&token)
                .expect("bug: missing pool")
                .deposit(collateral, net_debt, remaining);
        }

        let pool_snapshot = self
            .redistribution
            .get(&token)
            .map(|p| p.fresh_snapshot())
            .unwrap_or_default();
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        trove.collateral = 0;
        trove.debt = Stable::ZERO;
        trove.reserve_debt = Stable::ZERO;
        trove.reward_snapshot = pool_snapshot;
        (collateral, net_debt)
    }

    /// Walk the registry from the weak end applying `amount` of stable coin
    /// against redeemable debt at `price`. Returns the collateral released
    /// and the last trove redeemed against.
    pub(crate) fn apply_redeem(
        &mut self,
        token: TokenId,
        amount: Stable,
        price: Price,
    ) -> (u128, Option<TroveId>) {
        let decimals = self
            .collateral_configs
            .get(&token)
            .expect("bug: redeeming an unknown token")
            .decimals;
        // candidate order is fixed up front; every application moves the
        // trove toward the strong end, which must not affect the walk
        let candidates: Vec<TroveId> = self
            .registries
            .get(&token)
            .map(|r| r.iter().collect())
            .unwrap_or_default();

        let mut remaining = amount;
        let mut collateral_out_total = 0u128;
        let mut last_redeemed = None;

        for id in candidates {
            if remaining == 0 {
                break;
            }
            self.settle_trove(id);
            let trove = &self.troves[&id];
            if trove.debt <= trove.reserve_debt {
                continue;
            }
            let redeemable = trove.debt - trove.reserve_debt;
            let lot = remaining.min(redeemable);
            let collateral_out =
                crate::numeric::stable_to_collateral(lot, price, decimals).min(trove.collateral);

            let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
            trove.debt -= lot;
            trove.collateral -= collateral_out;
            *self
                .total_collateral
                .get_mut(&token)
                .expect("bug: missing total") -= collateral_out;
            self.reinsert_trove_sorted(token, id, None);

            remaining -= lot;
            collateral_out_total += collateral_out;
            last_redeemed = Some(id);
        }
        debug_assert!(remaining == 0, "bug: redemption plan exceeded capacity");
        (collateral_out_total, last_redeemed)
    }

    pub(crate) fn apply_set_base_rate(&mut self, rate: Ratio, now: Timestamp) {
        self.base_rate = rate;
        self.last_base_rate_update = now;
    }

    pub(crate) fn apply_add_owner(&mut self, id: TroveId, owner: AccountId) {
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        trove.owners.insert(owner);
        self.owner_to_troves.entry(owner).or_default().insert(id);
    }

    pub(crate) fn apply_remove_owner(&mut self, id: TroveId, owner: AccountId) {
        let trove = self.troves.get_mut(&id).expect("bug: trove vanished");
        trove.owners.remove(&owner);
        if let Some(ids) = self.owner_to_troves.get_mut(&owner) {
            ids.remove(&id);
            if ids.is_empty() {
                self.owner_to_troves.remove(&owner);
            }
        }
    }

    pub(crate) fn apply_transfer_ownership(&mut self, id: TroveId, new_owner: AccountId) {
        let previous: Vec<AccountId> = self.troves[&id].owners.iter().copied().collect();
        for owner in previous {
            self.apply_remove_owner(id, owner);
        }
        self.apply_add_owner(id, new_owner);
    }

    // --- diagnostics ---

    /// Structural equality on the replayable parts of the state (the event
    /// log itself is excluded).
    pub fn check_semantically_eq(&self, other: &Self) -> Result<(), String> {
        ensure_eq!(self.troves, other.troves, "troves do not match");
        ensure_eq!(
            self.owner_to_troves,
            other.owner_to_troves,
            "owner index does not match"
        );
        ensure_eq!(
            self.collateral_configs,
            other.collateral_configs,
            "collateral configs do not match"
        );
        ensure_eq!(self.registries, other.registries, "registries do not match");
        ensure_eq!(
            self.redistribution,
            other.redistribution,
            "redistribution pools do not match"
        );
        ensure_eq!(
            self.total_collateral,
            other.total_collateral,
            "collateral totals do not match"
        );
        ensure_eq!(self.base_rate, other.base_rate, "base rate does not match");
        ensure_eq!(
            self.next_trove_id,
            other.next_trove_id,
            "trove id counter does not match"
        );
        Ok(())
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        for (token, registry) in &self.registries {
            let mut previous: Option<Decimal> = None;
            let mut member_collateral = 0u128;
            for id in registry.iter() {
                let trove = match self.troves.get(&id) {
                    Some(t) => t,
                    None => return Err(format!("registry member {id} has no trove")),
                };
                ensure_eq!(
                    &trove.collateral_token,
                    token,
                    "trove {} registered under the wrong token",
                    id
                );
                let key = self.rank_key(id);
                if let Some(prev) = previous {
                    ensure!(
                        prev <= key,
                        "registry for {} is out of order at trove {}",
                        token,
                        id
                    );
                }
                previous = Some(key);
                member_collateral += trove.collateral;
            }
            ensure_eq!(
                member_collateral,
                self.total_collateral_for(token),
                "collateral total for {} is stale",
                token
            );
        }
        for (owner, ids) in &self.owner_to_troves {
            for id in ids {
                let trove = self
                    .troves
                    .get(id)
                    .ok_or_else(|| format!("owner index points at unknown trove {id}"))?;
                ensure!(
                    trove.owners.contains(owner),
                    "owner index lists {} for trove {} without the capability",
                    owner,
                    id
                );
            }
        }
        for trove in self.troves.values() {
            ensure!(
                trove.reserve_debt == 0 || trove.reserve_debt == LIQUIDATION_RESERVE,
                "trove {} holds a partial liquidation reserve",
                trove.trove_id
            );
            ensure!(
                trove.debt >= trove.reserve_debt,
                "trove {} owes less than its posted reserve",
                trove.trove_id
            );
        }
        Ok(())
    }
}

thread_local! {
    static __STATE: RefCell<Option<State>> = RefCell::default();
}

pub fn mutate_state<F, R>(f: F) -> R
where
    F: FnOnce(&mut State) -> R,
{
    __STATE.with(|s| f(s.borrow_mut().as_mut().expect("State not initialized!")))
}

/// Read (part of) the current state using `f`.
///
/// Panics if there is no state.
pub fn read_state<F, R>(f: F) -> R
where
    F: FnOnce(&State) -> R,
{
    __STATE.with(|s| f(s.borrow().as_ref().expect("State not initialized!")))
}

/// Replaces the current state.
pub fn replace_state(state: State) {
    __STATE.with(|s| {
        *s.borrow_mut() = Some(state);
    });
}
