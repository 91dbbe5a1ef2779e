//! Trove entity and its state machine.
//!
//! A trove moves Empty -> Funded -> Borrowed and back through repayment or
//! liquidation. Every operation settles the trove's pending redistribution
//! first, validates against effective amounts, performs the ledger side
//! effects, and finally records a single event that re-sorts the registry.

use crate::collaborators::{Collaborators, TxContext};
use crate::distribution::RewardSnapshot;
use crate::event::{
    record_add_collateral_token, record_add_owner, record_borrow, record_decrease_collateral,
    record_increase_collateral, record_open_trove, record_remove_owner, record_repay,
    record_transfer_ownership, record_update_collateral_config,
};
use crate::numeric::{collateral_value, Price, Stable};
use crate::state::{mutate_state, read_state, CollateralConfig};
use crate::{
    compute_collateral_ratio, AccountId, ProtocolError, TokenId, TroveId, LIQUIDATION_RESERVE,
    MIN_BORROW,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trove {
    pub trove_id: TroveId,
    pub collateral_token: TokenId,
    /// Revocable owner capabilities; never empty.
    pub owners: BTreeSet<AccountId>,
    /// Raw amount in the collateral token's native precision.
    pub collateral: u128,
    /// Outstanding debt at 18 decimals, posted reserve included.
    pub debt: Stable,
    /// Liquidation reserve booked into `debt` at the first borrow: zero or
    /// the full reserve, never a fraction. Debt received through
    /// redistribution carries no reserve of its own.
    pub reserve_debt: Stable,
    /// Distribution indices last applied to this trove.
    pub reward_snapshot: RewardSnapshot,
}

impl Trove {
    pub fn is_owner(&self, account: &AccountId) -> bool {
        self.owners.contains(account)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuccessWithFee {
    pub fee_paid: Stable,
}

/// Register a new collateral token market. Admin only.
pub fn add_collateral_token(ctx: &TxContext, config: CollateralConfig) -> Result<(), ProtocolError> {
    read_state(|s| {
        if ctx.caller != s.admin {
            return Err(ProtocolError::Unauthorized);
        }
        if s.collateral_configs.contains_key(&config.token) {
            return Err(ProtocolError::DuplicateInsert);
        }
        Ok(())
    })?;
    info!("[add_collateral_token] registering market for {}", config.token);
    mutate_state(|s| record_add_collateral_token(s, config));
    Ok(())
}

/// Tune an existing market. Admin only.
pub fn update_collateral_config(
    ctx: &TxContext,
    config: CollateralConfig,
) -> Result<(), ProtocolError> {
    read_state(|s| {
        if ctx.caller != s.admin {
            return Err(ProtocolError::Unauthorized);
        }
        s.config(&config.token).map(|_| ())
    })?;
    mutate_state(|s| record_update_collateral_config(s, config));
    Ok(())
}

/// Create an empty trove owned by the caller, inserted at the weak end of
/// the registry.
pub fn open_trove(ctx: &TxContext, token: TokenId) -> Result<TroveId, ProtocolError> {
    read_state(|s| s.config(&token).map(|_| ()))?;
    let trove_id = mutate_state(|s| {
        let trove_id = s.increment_trove_id();
        record_open_trove(s, trove_id, token, ctx.caller);
        trove_id
    });
    info!("[open_trove] opened trove {trove_id} for {}", ctx.caller);
    Ok(trove_id)
}

fn validate_hint(token: &TokenId, hint: Option<TroveId>) -> Result<(), ProtocolError> {
    match hint {
        None => Ok(()),
        Some(h) => read_state(|s| {
            if s.registry(token)?.contains(h) {
                Ok(())
            } else {
                Err(ProtocolError::InvalidReference)
            }
        }),
    }
}

/// Fund the trove. Open to anyone; re-registers a trove that liquidation
/// removed from the registry.
pub fn increase_collateral(
    ctx: &TxContext,
    trove_id: TroveId,
    amount: u128,
    hint: Option<TroveId>,
) -> Result<(), ProtocolError> {
    let token = read_state(|s| s.trove(trove_id).map(|t| t.collateral_token))?;
    if amount == 0 {
        return Err(ProtocolError::AmountTooLow { minimum: 1 });
    }
    validate_hint(&token, hint)?;
    mutate_state(|s| record_increase_collateral(s, trove_id, amount, hint));
    debug!(
        "[increase_collateral] trove {trove_id} funded with {amount} by {}",
        ctx.caller
    );
    Ok(())
}

/// Withdraw collateral to `to`. Owner only; keeps the trove above its MCR
/// while it has debt.
pub fn decrease_collateral(
    ctx: &TxContext,
    ext: &mut Collaborators<'_>,
    trove_id: TroveId,
    to: AccountId,
    amount: u128,
    hint: Option<TroveId>,
) -> Result<(), ProtocolError> {
    let (token, collateral, debt) = read_state(|s| {
        let trove = s.trove(trove_id)?;
        if !trove.is_owner(&ctx.caller) {
            return Err(ProtocolError::Unauthorized);
        }
        let (collateral, debt) = s.effective_amounts(trove);
        Ok((trove.collateral_token, collateral, debt))
    })?;
    if amount == 0 {
        return Err(ProtocolError::AmountTooLow { minimum: 1 });
    }
    if amount > collateral {
        return Err(ProtocolError::InsufficientCollateral {
            requested: amount,
            available: collateral,
        });
    }
    validate_hint(&token, hint)?;

    if debt > 0 {
        let price = price_of(ext, token)?;
        let (mcr, decimals) = read_state(|s| {
            let config = s.config(&token)?;
            Ok::<_, ProtocolError>((config.mcr, config.decimals))
        })?;
        let ratio = compute_collateral_ratio(
            collateral_value(collateral - amount, price, decimals),
            debt,
        );
        if ratio < mcr {
            return Err(ProtocolError::BelowMcr { ratio, mcr });
        }
    }

    mutate_state(|s| record_decrease_collateral(s, trove_id, to, amount, hint));
    info!("[decrease_collateral] trove {trove_id} sent {amount} to {to}");
    Ok(())
}

/// Mint stable coin against the trove's collateral. Owner only. The first
/// borrow also books the liquidation reserve into the debt.
pub fn borrow(
    ctx: &TxContext,
    ext: &mut Collaborators<'_>,
    trove_id: TroveId,
    recipient: AccountId,
    amount: Stable,
    hint: Option<TroveId>,
) -> Result<SuccessWithFee, ProtocolError> {
    let (token, collateral, debt, first_borrow) = read_state(|s| {
        let trove = s.trove(trove_id)?;
        if !trove.is_owner(&ctx.caller) {
            return Err(ProtocolError::Unauthorized);
        }
        let (collateral, debt) = s.effective_amounts(trove);
        Ok((
            trove.collateral_token,
            collateral,
            debt,
            trove.reserve_debt == 0,
        ))
    })?;
    if amount < MIN_BORROW {
        return Err(ProtocolError::BelowMinBorrow { minimum: MIN_BORROW });
    }
    validate_hint(&token, hint)?;

    let rate = read_state(|s| s.borrowing_rate(ctx.now));
    let fee = amount * rate;
    let mut new_debt = debt + amount + fee;
    if first_borrow {
        new_debt += LIQUIDATION_RESERVE;
    }

    let price = price_of(ext, token)?;
    let (mcr, decimals) = read_state(|s| {
        let config = s.config(&token)?;
        Ok::<_, ProtocolError>((config.mcr, config.decimals))
    })?;
    let ratio = compute_collateral_ratio(collateral_value(collateral, price, decimals), new_debt);
    if ratio < mcr {
        return Err(ProtocolError::BelowMcr { ratio, mcr });
    }

    ext.stable.mint(recipient, amount)?;
    if fee > 0 {
        let fee_account = read_state(|s| s.fee_account);
        ext.stable.mint(fee_account, fee)?;
        ext.fee_recipient.receive_fee(fee);
    }
    if first_borrow {
        let protocol_account = read_state(|s| s.protocol_account);
        ext.stable.mint(protocol_account, LIQUIDATION_RESERVE)?;
    }

    mutate_state(|s| record_borrow(s, trove_id, recipient, amount, fee, hint));
    info!(
        "[borrow] trove {trove_id} minted {amount} to {recipient}, fee {fee}, rate {rate}"
    );
    Ok(SuccessWithFee { fee_paid: fee })
}

/// Burn stable coin against the trove's debt, capped at the outstanding
/// amount. Callable by anyone who approved the protocol; paying off the net
/// debt also burns the liquidation reserve and empties the trove.
pub fn repay(
    ctx: &TxContext,
    ext: &mut Collaborators<'_>,
    trove_id: TroveId,
    amount: Stable,
    hint: Option<TroveId>,
) -> Result<Stable, ProtocolError> {
    let (token, debt, reserve_debt) = read_state(|s| -> Result<_, ProtocolError> {
        let trove = s.trove(trove_id)?;
        let (_, debt) = s.effective_amounts(trove);
        Ok((trove.collateral_token, debt, trove.reserve_debt))
    })?;
    if debt == 0 {
        return Err(ProtocolError::TemporarilyUnavailable(
            "trove has no outstanding debt".to_string(),
        ));
    }
    let net_debt = debt - reserve_debt;
    let burned = amount.min(net_debt);
    if burned == 0 {
        return Err(ProtocolError::AmountTooLow { minimum: 1 });
    }
    validate_hint(&token, hint)?;

    ext.stable.burn_from(ctx.caller, burned)?;
    if burned == net_debt && reserve_debt > 0 {
        let protocol_account = read_state(|s| s.protocol_account);
        ext.stable.burn(protocol_account, reserve_debt)?;
    }

    mutate_state(|s| record_repay(s, trove_id, burned, hint));
    info!("[repay] trove {trove_id} repaid {burned} by {}", ctx.caller);
    Ok(burned)
}

fn owner_gate(ctx: &TxContext, trove_id: TroveId) -> Result<(), ProtocolError> {
    read_state(|s| {
        let trove = s.trove(trove_id)?;
        if trove.is_owner(&ctx.caller) {
            Ok(())
        } else {
            Err(ProtocolError::Unauthorized)
        }
    })
}

/// Grant the owner capability to another account.
pub fn add_owner(ctx: &TxContext, trove_id: TroveId, owner: AccountId) -> Result<(), ProtocolError> {
    owner_gate(ctx, trove_id)?;
    mutate_state(|s| record_add_owner(s, trove_id, owner));
    Ok(())
}

/// Revoke an owner capability. A trove must retain at least one owner.
pub fn remove_owner(
    ctx: &TxContext,
    trove_id: TroveId,
    owner: AccountId,
) -> Result<(), ProtocolError> {
    owner_gate(ctx, trove_id)?;
    read_state(|s| {
        let trove = s.trove(trove_id)?;
        if !trove.owners.contains(&owner) {
            return Err(ProtocolError::InvalidReference);
        }
        if trove.owners.len() == 1 {
            // revoking the final capability would orphan the trove
            return Err(ProtocolError::Unauthorized);
        }
        Ok(())
    })?;
    mutate_state(|s| record_remove_owner(s, trove_id, owner));
    Ok(())
}

/// Hand the trove to a single new owner, clearing every other capability.
pub fn transfer_ownership(
    ctx: &TxContext,
    trove_id: TroveId,
    new_owner: AccountId,
) -> Result<(), ProtocolError> {
    owner_gate(ctx, trove_id)?;
    mutate_state(|s| record_transfer_ownership(s, trove_id, new_owner));
    info!("[transfer_ownership] trove {trove_id} handed to {new_owner}");
    Ok(())
}

pub(crate) fn price_of(ext: &Collaborators<'_>, token: TokenId) -> Result<Price, ProtocolError> {
    ext.oracle
        .price(token)
        .map_err(ProtocolError::TemporarilyUnavailable)
}
