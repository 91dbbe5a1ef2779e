//! External collaborator interfaces.
//!
//! The core consumes these through traits only: price discovery, the stable
//! coin's mint/burn capability, the redemption-fee recipient, and the
//! absorption reserve that can cancel liquidated debt against its deposits.
//! A reverting collaborator fails the calling operation; the core performs
//! no retry or fallback pricing.

use crate::distribution::RewardIndex;
use crate::numeric::{Price, Stable};
use crate::{AccountId, ProtocolError, Timestamp, TokenId};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Per-call transaction context. The caller identity and the instant the
/// transaction executes; the price is read at most once inside the call.
#[derive(Clone, Copy, Debug)]
pub struct TxContext {
    pub caller: AccountId,
    pub now: Timestamp,
}

pub trait PriceOracle {
    /// USD price of one whole token. An `Err` fails the calling operation.
    fn price(&self, token: TokenId) -> Result<Price, String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// The account has not approved the protocol to move its stable coin.
    NotApproved,
    InsufficientBalance { requested: Stable, available: Stable },
}

impl From<LedgerError> for ProtocolError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotApproved => ProtocolError::NotApproved,
            LedgerError::InsufficientBalance { requested, available } => {
                ProtocolError::InsufficientBalance { requested, available }
            }
        }
    }
}

/// The stable coin's delegated minter/burner capability.
pub trait StableLedger {
    fn total_supply(&self) -> Stable;
    fn balance_of(&self, account: AccountId) -> Stable;
    fn mint(&mut self, to: AccountId, amount: Stable) -> Result<(), LedgerError>;
    fn burn(&mut self, from: AccountId, amount: Stable) -> Result<(), LedgerError>;
    /// Burn from a third party; requires the owner's prior approval of the
    /// protocol account.
    fn burn_from(&mut self, owner: AccountId, amount: Stable) -> Result<(), LedgerError>;
    fn transfer(&mut self, from: AccountId, to: AccountId, amount: Stable)
        -> Result<(), LedgerError>;
}

/// Receives redemption and borrowing fees; internally shares them pro-rata
/// over its own participants.
pub trait FeeRecipient {
    fn receive_fee(&mut self, amount: Stable);
}

/// A reserve of stable-coin deposits that can cancel liquidated debt 1:1 in
/// exchange for the seized collateral. Absorption is all-or-nothing at the
/// reserve's current capacity.
pub trait AbsorptionReserve {
    fn can_absorb(&self, token: TokenId, debt: Stable) -> bool;
    fn absorb(&mut self, token: TokenId, collateral: u128, debt: Stable);
}

/// The collaborator bundle handed to every state-changing operation.
pub struct Collaborators<'a> {
    pub oracle: &'a dyn PriceOracle,
    pub stable: &'a mut dyn StableLedger,
    pub fee_recipient: &'a mut dyn FeeRecipient,
    pub reserve: &'a mut dyn AbsorptionReserve,
}

/// Reference fee-sharing pool: the single-index instantiation of the
/// distribution engine, crediting incoming fees pro-rata to whoever is
/// staked when the fee arrives. The core never learns staker identities;
/// this lives behind the [`FeeRecipient`] trait.
#[derive(Clone, Debug, Default)]
pub struct StakingPool {
    stakes: BTreeMap<AccountId, u128>,
    total_staked: u128,
    fee_index: RewardIndex,
    last_seen: BTreeMap<AccountId, Decimal>,
    claimable: BTreeMap<AccountId, Stable>,
    /// Fees that arrived while nobody was staked.
    pub unallocated: Stable,
}

impl StakingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_staked(&self) -> u128 {
        self.total_staked
    }

    pub fn stake(&mut self, who: AccountId, amount: u128) {
        self.settle(who);
        *self.stakes.entry(who).or_insert(0) += amount;
        self.total_staked += amount;
    }

    pub fn unstake(&mut self, who: AccountId, amount: u128) {
        self.settle(who);
        let stake = self.stakes.entry(who).or_insert(0);
        let amount = amount.min(*stake);
        *stake -= amount;
        self.total_staked -= amount;
    }

    /// Realize pending fees into the claimable balance. Must run before the
    /// participant's stake changes.
    pub fn settle(&mut self, who: AccountId) {
        let stake = self.stakes.get(&who).copied().unwrap_or(0);
        let seen = self.last_seen.entry(who).or_insert(Decimal::ZERO);
        let (owed, new_seen) = crate::distribution::settle(
            Decimal::from_u128(stake).expect("stake exceeds decimal range"),
            self.fee_index.value(),
            *seen,
        );
        *seen = new_seen;
        if owed > Decimal::ZERO {
            *self.claimable.entry(who).or_insert(Stable::ZERO) +=
                Stable::new(owed.trunc().to_u128().unwrap_or(0));
        }
    }

    pub fn claimable_fees(&self, who: AccountId) -> Stable {
        let stake = self.stakes.get(&who).copied().unwrap_or(0);
        let seen = self.last_seen.get(&who).copied().unwrap_or(Decimal::ZERO);
        let (owed, _) = crate::distribution::settle(
            Decimal::from_u128(stake).unwrap_or(Decimal::ZERO),
            self.fee_index.value(),
            seen,
        );
        self.claimable.get(&who).copied().unwrap_or(Stable::ZERO)
            + Stable::new(owed.trunc().to_u128().unwrap_or(0))
    }
}

impl FeeRecipient for StakingPool {
    fn receive_fee(&mut self, amount: Stable) {
        if self.total_staked == 0 {
            self.unallocated += amount;
            return;
        }
        self.fee_index.deposit(
            amount.to_decimal(),
            Decimal::from_u128(self.total_staked).expect("stake exceeds decimal range"),
        );
    }
}
