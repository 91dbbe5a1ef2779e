//! Liquidation router.
//!
//! An undercollateralized trove is removed from the registry, the caller is
//! paid the liquidation reserve, and the remaining collateral and net debt
//! go to exactly one destination: the absorption reserve when it can cancel
//! the whole debt against its deposits, otherwise the community
//! redistribution pool. The choice is deterministic and never partial.

use crate::collaborators::{Collaborators, TxContext};
use crate::event::record_liquidate;
use crate::numeric::Stable;
use crate::state::{mutate_state, read_state, LiquidationDestination};
use crate::trove::price_of;
use crate::{ProtocolError, TroveId};
use log::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiquidationOutcome {
    pub destination: LiquidationDestination,
    pub collateral_seized: u128,
    pub net_debt: Stable,
}

/// Liquidate an undercollateralized trove. Open to anyone; the caller earns
/// the liquidation reserve.
pub fn liquidate(
    ctx: &TxContext,
    ext: &mut Collaborators<'_>,
    trove_id: TroveId,
) -> Result<LiquidationOutcome, ProtocolError> {
    let token = read_state(|s| s.trove(trove_id).map(|t| t.collateral_token))?;
    let price = price_of(ext, token)?;

    let (mcr, ratio, collateral, debt, reserve_debt, registry_size, remaining_shares) = read_state(|s| {
        let trove = s.trove(trove_id)?;
        let config = s.config(&token)?;
        let registry = s.registry(&token)?;
        if !registry.contains(trove_id) {
            // a liquidated trove is delisted until funded again; its ratio
            // is undefined, which is never "undercollateralized"
            return Err(ProtocolError::NotUndercollateralized {
                ratio: crate::numeric::Ratio::MAX,
                mcr: config.mcr,
            });
        }
        let (collateral, debt) = s.effective_amounts(trove);
        let ratio = s.trove_collateral_ratio(trove_id, price)?;
        // the total tracks recorded amounts; the trove's own entitlement is
        // settled into it before removal, so the survivors' share base is
        // the total minus this trove's recorded collateral
        let remaining = s.total_collateral_for(&token) - trove.collateral;
        Ok((
            config.mcr,
            ratio,
            collateral,
            debt,
            trove.reserve_debt,
            registry.len(),
            remaining,
        ))
    })?;

    // the sole remaining trove is protected no matter how weak it is
    if registry_size == 1 {
        return Err(ProtocolError::CannotLiquidateLastTrove);
    }
    if ratio >= mcr {
        return Err(ProtocolError::NotUndercollateralized { ratio, mcr });
    }

    let net_debt = debt - reserve_debt;
    let destination = if ext.reserve.can_absorb(token, net_debt) {
        LiquidationDestination::Absorbed
    } else {
        if remaining_shares == 0 {
            return Err(ProtocolError::TemporarilyUnavailable(
                "no surviving collateral to redistribute to".to_string(),
            ));
        }
        LiquidationDestination::Redistributed
    };

    // incentive for the caller, paid out of the reserve minted at borrow time
    if reserve_debt > 0 {
        let protocol_account = read_state(|s| s.protocol_account);
        ext.stable.transfer(protocol_account, ctx.caller, reserve_debt)?;
    }

    let (collateral_seized, net_debt) =
        mutate_state(|s| record_liquidate(s, trove_id, price, destination, ctx.caller));

    if destination == LiquidationDestination::Absorbed {
        ext.reserve.absorb(token, collateral_seized, net_debt);
    }

    info!(
        "[liquidate] trove {trove_id} at ratio {} (mcr {}): {collateral_seized} collateral, {net_debt} debt -> {destination:?}, liquidator {}",
        ratio.to_f64(),
        mcr.to_f64(),
        ctx.caller
    );
    debug_assert_eq!(collateral_seized, collateral);
    Ok(LiquidationOutcome {
        destination,
        collateral_seized,
        net_debt,
    })
}
