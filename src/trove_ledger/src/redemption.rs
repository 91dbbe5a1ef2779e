//! Redemption engine.
//!
//! Redemption swaps stable coin for collateral at the oracle price, walking
//! the registry from the weakest trove. The fee ratio is driven by the
//! protocol base rate, which every redemption bumps in proportion to the
//! redeemed share of the stable supply and which decays continuously with a
//! fixed half-life, plus a per-trove premium that shrinks as the trove's CR
//! rises above its MCR.
//!
//! The whole walk is planned read-only against one price before anything is
//! applied, so every failure leaves the ledger untouched.

use crate::collaborators::{Collaborators, TxContext};
use crate::event::record_redeem;
use crate::numeric::{Price, Ratio, Stable};
use crate::state::{mutate_state, read_state, State};
use crate::trove::price_of;
use crate::{
    ProtocolError, Timestamp, TokenId, TroveId, REDEMPTION_BETA, REDEMPTION_FEE_FLOOR,
    REDEMPTION_PREMIUM_CR_CAP, REDEMPTION_PREMIUM_SCALE, STALE_HINT_TOLERANCE,
};
use log::info;
use rust_decimal::Decimal;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionArg {
    pub token: TokenId,
    /// Gross stable budget, fees included.
    pub stable_amount: Stable,
    /// Upper bound on the effective fee ratio the caller accepts.
    pub max_fee_rate: Ratio,
    /// Live CR of the weakest redeemable trove, as seen by the caller.
    pub first_trove_cr_hint: Ratio,
    /// Walk boundary: the last trove the caller is willing to redeem from.
    pub last_trove_hint: Option<TroveId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedemptionOutcome {
    /// Net stable applied against trove debt.
    pub stable_redeemed: Stable,
    pub fee_paid: Stable,
    pub collateral_received: u128,
    pub last_trove_redeemed: TroveId,
}

/// Effective fee ratio for redeeming against a trove at collateralization
/// `cr`. The premium falls off quadratically as CR rises above MCR and the
/// whole ratio is capped per token.
pub fn redemption_fee_ratio(cr: Ratio, mcr: Ratio, decayed_base: Ratio, max_fee: Ratio) -> Ratio {
    let relative = (cr.0 / mcr.0).min(REDEMPTION_PREMIUM_CR_CAP.0);
    let premium = REDEMPTION_PREMIUM_SCALE.0 / (relative * relative);
    Ratio(REDEMPTION_FEE_FLOOR.0 + decayed_base.0 + premium)
        .max(REDEMPTION_FEE_FLOOR)
        .min(max_fee)
}

struct Plan {
    /// Troves redeemed against, weakest first. The apply walk recomputes
    /// the same per-trove amounts from `net_total`.
    troves: Vec<TroveId>,
    net_total: Stable,
    fee_total: Stable,
    collateral_out: u128,
}

fn plan_walk(
    s: &State,
    arg: &RedemptionArg,
    price: Price,
    now: Timestamp,
) -> Result<Plan, ProtocolError> {
    let config = s.config(&arg.token)?;
    let registry = s.registry(&arg.token)?;
    let decayed_base = s.decayed_base_rate(now);

    let mut troves = Vec::new();
    let mut remaining = arg.stable_amount;
    let mut net_total = Stable::ZERO;
    let mut fee_total = Stable::ZERO;
    let mut collateral_out = 0u128;
    let mut checked_first = false;

    for id in registry.iter() {
        if remaining == 0 {
            break;
        }
        let trove = s.trove(id)?;
        let (collateral, debt) = s.effective_amounts(trove);
        if debt <= trove.reserve_debt {
            // nothing redeemable here; empty troves sit at the weak end
            continue;
        }
        let reserve_debt = trove.reserve_debt;
        let cr = s.trove_collateral_ratio(id, price)?;
        if !checked_first {
            if cr < config.mcr {
                return Err(ProtocolError::Undercollateralized {
                    ratio: cr,
                    mcr: config.mcr,
                });
            }
            let drift = (cr.0 - arg.first_trove_cr_hint.0).abs();
            if drift > STALE_HINT_TOLERANCE.0 {
                return Err(ProtocolError::StaleHint {
                    hint: arg.first_trove_cr_hint,
                    actual: cr,
                });
            }
            checked_first = true;
        }

        let ratio = redemption_fee_ratio(cr, config.mcr, decayed_base, config.max_redemption_fee);
        if ratio.0 > arg.max_fee_rate.0 {
            return Err(ProtocolError::FeeExceedsMax {
                ratio,
                max: arg.max_fee_rate,
            });
        }

        // the fee is carved out of the gross budget: net = gross / (1 + r)
        let redeemable = debt - reserve_debt;
        let gross_capacity = Stable::from_decimal(
            redeemable.to_decimal() * (Decimal::ONE + ratio.0),
        );
        let gross = remaining.min(gross_capacity);
        let net = if gross == gross_capacity {
            redeemable
        } else {
            Stable::from_decimal(gross.to_decimal() / (Decimal::ONE + ratio.0))
        };
        if net == 0 {
            // the remaining budget no longer buys a single raw unit
            break;
        }
        let fee = gross - net;
        let out = crate::numeric::stable_to_collateral(net, price, config.decimals)
            .min(collateral);

        troves.push(id);
        net_total += net;
        fee_total += fee;
        collateral_out += out;
        remaining -= gross;

        if Some(id) == arg.last_trove_hint {
            break;
        }
    }

    if troves.is_empty() || net_total == 0 {
        return Err(ProtocolError::TemporarilyUnavailable(
            "no redeemable debt in the registry".to_string(),
        ));
    }
    Ok(Plan {
        troves,
        net_total,
        fee_total,
        collateral_out,
    })
}

/// Swap stable coin for collateral against the weakest troves.
pub fn redeem(
    ctx: &TxContext,
    ext: &mut Collaborators<'_>,
    arg: RedemptionArg,
) -> Result<RedemptionOutcome, ProtocolError> {
    let price = price_of(ext, arg.token)?;
    let plan = read_state(|s| plan_walk(s, &arg, price, ctx.now))?;
    let last = *plan.troves.last().expect("bug: empty plan");

    // base rate grows with the redeemed share of the circulating supply
    let supply = ext.stable.total_supply();
    let decayed = read_state(|s| s.decayed_base_rate(ctx.now));
    let increase = if supply > 0 {
        Ratio((plan.net_total / supply).0 * REDEMPTION_BETA.0)
    } else {
        Ratio(Decimal::ZERO)
    };
    let base_rate_after = Ratio((decayed.0 + increase.0).min(Decimal::ONE));

    // the caller pays gross; the fee share is re-minted to the fee recipient
    let gross = plan.net_total + plan.fee_total;
    ext.stable.burn_from(ctx.caller, gross)?;
    if plan.fee_total > 0 {
        let fee_account = read_state(|s| s.fee_account);
        ext.stable.mint(fee_account, plan.fee_total)?;
        ext.fee_recipient.receive_fee(plan.fee_total);
    }

    let (collateral_out, last_applied) = mutate_state(|s| {
        record_redeem(
            s,
            arg.token,
            ctx.caller,
            plan.net_total,
            plan.fee_total,
            price,
            base_rate_after,
            ctx.now,
        )
    });
    debug_assert_eq!(last_applied, Some(last));
    debug_assert_eq!(collateral_out, plan.collateral_out);

    info!(
        "[redeem] {} redeemed {} (fee {}) for {} collateral of {}, last trove {}",
        ctx.caller, plan.net_total, plan.fee_total, collateral_out, arg.token, last
    );
    Ok(RedemptionOutcome {
        stable_redeemed: plan.net_total,
        fee_paid: plan.fee_total,
        collateral_received: collateral_out,
        last_trove_redeemed: last,
    })
}
