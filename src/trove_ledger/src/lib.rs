//! Collateralized-debt-position ledger.
//!
//! Users lock a collateral token into a trove, mint stable coin against it,
//! and the ledger tracks solvency per token: a rank-ordered trove registry,
//! a liquidation router that sends seized collateral either to an absorption
//! reserve or pro-rata to the surviving troves, and a redemption engine that
//! walks the registry from the weakest trove swapping stable coin for
//! collateral under a decaying base-rate fee.
//!
//! The ledger is transactional: one public operation call is one atomic
//! state transition. An `Err` leaves the state untouched; there is no
//! internal concurrency, blocking, or retry.

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod collaborators;
pub mod distribution;
pub mod event;
pub mod liquidation;
pub mod numeric;
pub mod redemption;
pub mod registry;
pub mod state;
pub mod storage;
pub mod trove;

#[cfg(test)]
pub mod test_helpers;


use crate::numeric::{Ratio, Stable};

pub const SEC_NANOS: u64 = 1_000_000_000;
pub const MIN_NANOS: u64 = 60 * SEC_NANOS;

/// Nanoseconds since the epoch.
pub type Timestamp = u64;

/// Stable arena identifier of a trove.
pub type TroveId = u64;

/// Debt floor paid to whoever liquidates a trove, funded by the borrower at
/// loan origination. Indivisible: a trove owes it in full or not at all.
pub const LIQUIDATION_RESERVE: Stable = Stable::from_whole(1);

/// Smallest borrow the protocol accepts.
pub const MIN_BORROW: Stable = Stable::from_whole(1);

/// One-time borrowing fee at base rate zero.
pub const BORROW_FEE_FLOOR: Ratio = Ratio::new(dec!(0.005));
pub const BORROW_FEE_CEILING: Ratio = Ratio::new(dec!(0.05));

/// Redemption fee floor; the per-token config caps the ceiling.
pub const REDEMPTION_FEE_FLOOR: Ratio = Ratio::new(dec!(0.005));

/// Scale of the CR-relative redemption premium. Troves far above their MCR
/// attract a lower marginal fee; the premium falls off with (MCR/CR)^2.
pub const REDEMPTION_PREMIUM_SCALE: Ratio = Ratio::new(dec!(0.045));

/// CR/MCR above this contributes no further premium change.
pub const REDEMPTION_PREMIUM_CR_CAP: Ratio = Ratio::new(dec!(16));

/// Fraction of the redeemed supply share added to the base rate.
pub const REDEMPTION_BETA: Ratio = Ratio::new(dec!(0.5));

/// Per-minute base-rate decay factor (about a 12 hour half-life).
pub const BASE_RATE_MINUTE_DECAY: Ratio = Ratio::new(dec!(0.999037));

/// How closely a redemption's first-trove CR hint must match the live value.
pub const STALE_HINT_TOLERANCE: Ratio = Ratio::new(dec!(0.000000001));

/// An account on the stable-coin ledger (owners, fee recipients, callers).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountId([u8; 32]);

impl AccountId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Collateral tokens are identified by their ledger account.
pub type TokenId = AccountId;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("caller does not hold the owner capability")]
    Unauthorized,
    #[error("collateral ratio {ratio} would fall below the minimum {mcr}")]
    BelowMcr { ratio: Ratio, mcr: Ratio },
    #[error("borrow amount is below the protocol minimum of {minimum}")]
    BelowMinBorrow { minimum: Stable },
    #[error("trove is not undercollateralized ({ratio} >= {mcr})")]
    NotUndercollateralized { ratio: Ratio, mcr: Ratio },
    #[error("the last trove of a collateral token cannot be liquidated")]
    CannotLiquidateLastTrove,
    #[error("first trove hint {hint} no longer matches the live ratio {actual}")]
    StaleHint { hint: Ratio, actual: Ratio },
    #[error("weakest trove is undercollateralized ({ratio} < {mcr}) and must be liquidated first")]
    Undercollateralized { ratio: Ratio, mcr: Ratio },
    #[error("effective fee ratio {ratio} exceeds the caller maximum {max}")]
    FeeExceedsMax { ratio: Ratio, max: Ratio },
    #[error("stable coin is not approved for the protocol")]
    NotApproved,
    #[error("reference is neither a live registry member nor the sentinel")]
    InvalidReference,
    #[error("trove is already present in the registry")]
    DuplicateInsert,
    #[error("unknown trove {0}")]
    UnknownTrove(TroveId),
    #[error("unsupported collateral token")]
    UnknownCollateralToken,
    #[error("amount is below the minimum of {minimum}")]
    AmountTooLow { minimum: u128 },
    #[error("insufficient collateral: requested {requested}, available {available}")]
    InsufficientCollateral { requested: u128, available: u128 },
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Stable, available: Stable },
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
}

/// Collateral value per unit of debt; `Ratio::MAX` for a debt-free trove.
pub fn compute_collateral_ratio(collateral_value: Stable, debt: Stable) -> Ratio {
    if debt == 0 {
        return Ratio::MAX;
    }
    collateral_value / debt
}
