//! Append-only event log.
//!
//! Every state transition is recorded as an `Event` and applied through the
//! same `State::apply_*` functions the replay uses, so
//! `replay(log) == live state` holds at all times. Events carry the oracle
//! price and the liquidation routing decision; replay never consults a
//! collaborator.

use crate::numeric::{Price, Ratio, Stable};
use crate::state::{CollateralConfig, InitArg, LiquidationDestination, State};
use crate::{AccountId, Timestamp, TokenId, TroveId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[serde(rename = "init")]
    Init(InitArg),

    #[serde(rename = "add_collateral_token")]
    AddCollateralToken { config: CollateralConfig },

    #[serde(rename = "update_collateral_config")]
    UpdateCollateralConfig { config: CollateralConfig },

    #[serde(rename = "open_trove")]
    OpenTrove {
        trove_id: TroveId,
        token: TokenId,
        owner: AccountId,
    },

    #[serde(rename = "increase_collateral")]
    IncreaseCollateral {
        trove_id: TroveId,
        amount: u128,
        hint: Option<TroveId>,
    },

    #[serde(rename = "decrease_collateral")]
    DecreaseCollateral {
        trove_id: TroveId,
        to: AccountId,
        amount: u128,
        hint: Option<TroveId>,
    },

    #[serde(rename = "borrow")]
    Borrow {
        trove_id: TroveId,
        recipient: AccountId,
        amount: Stable,
        fee: Stable,
        hint: Option<TroveId>,
    },

    #[serde(rename = "repay")]
    Repay {
        trove_id: TroveId,
        /// Net amount burned from the caller, capped at `debt - reserve`.
        amount: Stable,
        hint: Option<TroveId>,
    },

    #[serde(rename = "liquidate")]
    Liquidate {
        trove_id: TroveId,
        token: TokenId,
        price: Price,
        destination: LiquidationDestination,
        collateral: u128,
        net_debt: Stable,
        liquidator: AccountId,
    },

    #[serde(rename = "redeem")]
    Redeem {
        token: TokenId,
        caller: AccountId,
        /// Net stable applied against trove debt (fee excluded).
        redeemed: Stable,
        fee: Stable,
        price: Price,
        base_rate_after: Ratio,
        timestamp: Timestamp,
        last_trove_redeemed: TroveId,
    },

    #[serde(rename = "owner_added")]
    OwnerAdded { trove_id: TroveId, owner: AccountId },

    #[serde(rename = "owner_removed")]
    OwnerRemoved { trove_id: TroveId, owner: AccountId },

    #[serde(rename = "ownership_transferred")]
    OwnershipTransferred {
        trove_id: TroveId,
        new_owner: AccountId,
    },
}

pub fn record_add_collateral_token(state: &mut State, config: CollateralConfig) {
    state.apply_add_collateral_token(config.clone());
    state.events.push(Event::AddCollateralToken { config });
}

pub fn record_update_collateral_config(state: &mut State, config: CollateralConfig) {
    state.apply_update_collateral_config(config.clone());
    state.events.push(Event::UpdateCollateralConfig { config });
}

pub fn record_open_trove(state: &mut State, trove_id: TroveId, token: TokenId, owner: AccountId) {
    state.apply_open_trove(trove_id, token, owner);
    state.events.push(Event::OpenTrove {
        trove_id,
        token,
        owner,
    });
}

pub fn record_increase_collateral(
    state: &mut State,
    trove_id: TroveId,
    amount: u128,
    hint: Option<TroveId>,
) {
    state.apply_increase_collateral(trove_id, amount, hint);
    state.events.push(Event::IncreaseCollateral {
        trove_id,
        amount,
        hint,
    });
}

pub fn record_decrease_collateral(
    state: &mut State,
    trove_id: TroveId,
    to: AccountId,
    amount: u128,
    hint: Option<TroveId>,
) {
    state.apply_decrease_collateral(trove_id, amount, hint);
    state.events.push(Event::DecreaseCollateral {
        trove_id,
        to,
        amount,
        hint,
    });
}

pub fn record_borrow(
    state: &mut State,
    trove_id: TroveId,
    recipient: AccountId,
    amount: Stable,
    fee: Stable,
    hint: Option<TroveId>,
) {
    state.apply_borrow(trove_id, amount, fee, hint);
    state.events.push(Event::Borrow {
        trove_id,
        recipient,
        amount,
        fee,
        hint,
    });
}

pub fn record_repay(state: &mut State, trove_id: TroveId, amount: Stable, hint: Option<TroveId>) {
    state.apply_repay(trove_id, amount, hint);
    state.events.push(Event::Repay {
        trove_id,
        amount,
        hint,
    });
}

pub fn record_liquidate(
    state: &mut State,
    trove_id: TroveId,
    price: Price,
    destination: LiquidationDestination,
    liquidator: AccountId,
) -> (u128, Stable) {
    let token = state.troves[&trove_id].collateral_token;
    let (collateral, net_debt) = state.apply_liquidate(trove_id, destination);
    state.events.push(Event::Liquidate {
        trove_id,
        token,
        price,
        destination,
        collateral,
        net_debt,
        liquidator,
    });
    (collateral, net_debt)
}

#[allow(clippy::too_many_arguments)]
pub fn record_redeem(
    state: &mut State,
    token: TokenId,
    caller: AccountId,
    redeemed: Stable,
    fee: Stable,
    price: Price,
    base_rate_after: Ratio,
    timestamp: Timestamp,
) -> (u128, Option<TroveId>) {
    let (collateral_out, last) = state.apply_redeem(token, redeemed, price);
    state.apply_set_base_rate(base_rate_after, timestamp);
    state.events.push(Event::Redeem {
        token,
        caller,
        redeemed,
        fee,
        price,
        base_rate_after,
        timestamp,
        last_trove_redeemed: last.expect("bug: redemption applied to no trove"),
    });
    (collateral_out, last)
}

pub fn record_add_owner(state: &mut State, trove_id: TroveId, owner: AccountId) {
    state.apply_add_owner(trove_id, owner);
    state.events.push(Event::OwnerAdded { trove_id, owner });
}

pub fn record_remove_owner(state: &mut State, trove_id: TroveId, owner: AccountId) {
    state.apply_remove_owner(trove_id, owner);
    state.events.push(Event::OwnerRemoved { trove_id, owner });
}

pub fn record_transfer_ownership(state: &mut State, trove_id: TroveId, new_owner: AccountId) {
    state.apply_transfer_ownership(trove_id, new_owner);
    state.events.push(Event::OwnershipTransferred {
        trove_id,
        new_owner,
    });
}

#[derive(Debug)]
pub enum ReplayLogError {
    /// There are no events in the event log.
    EmptyLog,
    /// The event log is inconsistent.
    InconsistentLog(String),
}

/// Rebuild the state from its event log.
pub fn replay(mut events: impl Iterator<Item = Event>) -> Result<State, ReplayLogError> {
    let mut state = match events.next() {
        Some(Event::Init(args)) => State::from(args),
        Some(evt) => {
            return Err(ReplayLogError::InconsistentLog(format!(
                "The first event is not Init: {:?}",
                evt
            )))
        }
        None => return Err(ReplayLogError::EmptyLog),
    };
    for event in events {
        match event {
            Event::Init(_) => {
                return Err(ReplayLogError::InconsistentLog(
                    "found a second Init event".to_string(),
                ))
            }
            Event::AddCollateralToken { config } => state.apply_add_collateral_token(config),
            Event::UpdateCollateralConfig { config } => {
                state.apply_update_collateral_config(config)
            }
            Event::OpenTrove {
                trove_id,
                token,
                owner,
            } => state.apply_open_trove(trove_id, token, owner),
            Event::IncreaseCollateral {
                trove_id,
                amount,
                hint,
            } => state.apply_increase_collateral(trove_id, amount, hint),
            Event::DecreaseCollateral {
                trove_id,
                amount,
                hint,
                to: _,
            } => state.apply_decrease_collateral(trove_id, amount, hint),
            Event::Borrow {
                trove_id,
                amount,
                fee,
                hint,
                recipient: _,
            } => state.apply_borrow(trove_id, amount, fee, hint),
            Event::Repay {
                trove_id,
                amount,
                hint,
            } => state.apply_repay(trove_id, amount, hint),
            Event::Liquidate {
                trove_id,
                destination,
                ..
            } => {
                state.apply_liquidate(trove_id, destination);
            }
            Event::Redeem {
                token,
                redeemed,
                price,
                base_rate_after,
                timestamp,
                ..
            } => {
                state.apply_redeem(token, redeemed, price);
                state.apply_set_base_rate(base_rate_after, timestamp);
            }
            Event::OwnerAdded { trove_id, owner } => state.apply_add_owner(trove_id, owner),
            Event::OwnerRemoved { trove_id, owner } => state.apply_remove_owner(trove_id, owner),
            Event::OwnershipTransferred {
                trove_id,
                new_owner,
            } => state.apply_transfer_ownership(trove_id, new_owner),
        }
    }
    Ok(state)
}
