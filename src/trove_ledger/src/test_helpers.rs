//! In-memory collaborator doubles and state fixtures for the test suite.

use crate::collaborators::{
    AbsorptionReserve, Collaborators, LedgerError, PriceOracle, StableLedger, StakingPool,
    TxContext,
};
use crate::numeric::{Price, Ratio, Stable};
use crate::state::{replace_state, CollateralConfig, InitArg, State};
use crate::{AccountId, Timestamp, TokenId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};

pub fn acct(n: u8) -> AccountId {
    AccountId::from_bytes([n; 32])
}

pub const ADMIN: u8 = 0xA0;
pub const PROTOCOL: u8 = 0xA1;
pub const FEES: u8 = 0xA2;

pub fn ctx(caller: AccountId, now: Timestamp) -> TxContext {
    TxContext { caller, now }
}

pub fn init_arg() -> InitArg {
    InitArg {
        admin: acct(ADMIN),
        protocol_account: acct(PROTOCOL),
        fee_account: acct(FEES),
    }
}

/// Fresh protocol state with one registered 18-decimal collateral token at
/// 120% MCR. Returns the token id.
pub fn init_protocol() -> TokenId {
    replace_state(State::from(init_arg()));
    let token = acct(0xB0);
    register_token(token, 18);
    token
}

pub fn register_token(token: TokenId, decimals: u8) {
    crate::trove::add_collateral_token(
        &ctx(acct(ADMIN), 0),
        CollateralConfig {
            token,
            decimals,
            mcr: Ratio::new(dec!(1.2)),
            max_redemption_fee: Ratio::new(dec!(0.25)),
        },
    )
    .expect("registering the test token failed");
}

#[derive(Default)]
pub struct MockOracle {
    prices: BTreeMap<TokenId, Price>,
}

impl MockOracle {
    pub fn set_price(&mut self, token: TokenId, price: Decimal) {
        self.prices.insert(token, Price::new(price));
    }
}

impl PriceOracle for MockOracle {
    fn price(&self, token: TokenId) -> Result<Price, String> {
        self.prices
            .get(&token)
            .copied()
            .ok_or_else(|| "no price feed".to_string())
    }
}

#[derive(Default)]
pub struct MockLedger {
    pub balances: BTreeMap<AccountId, Stable>,
    /// Accounts that approved the protocol to move their stable coin.
    pub approvals: BTreeSet<AccountId>,
    total: Stable,
}

impl MockLedger {
    pub fn approve(&mut self, owner: AccountId) {
        self.approvals.insert(owner);
    }

    fn debit(&mut self, from: AccountId, amount: Stable) -> Result<(), LedgerError> {
        let balance = self.balances.entry(from).or_insert(Stable::ZERO);
        if *balance < amount {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }
}

impl StableLedger for MockLedger {
    fn total_supply(&self) -> Stable {
        self.total
    }

    fn balance_of(&self, account: AccountId) -> Stable {
        self.balances.get(&account).copied().unwrap_or(Stable::ZERO)
    }

    fn mint(&mut self, to: AccountId, amount: Stable) -> Result<(), LedgerError> {
        *self.balances.entry(to).or_insert(Stable::ZERO) += amount;
        self.total += amount;
        Ok(())
    }

    fn burn(&mut self, from: AccountId, amount: Stable) -> Result<(), LedgerError> {
        self.debit(from, amount)?;
        self.total -= amount;
        Ok(())
    }

    fn burn_from(&mut self, owner: AccountId, amount: Stable) -> Result<(), LedgerError> {
        if !self.approvals.contains(&owner) {
            return Err(LedgerError::NotApproved);
        }
        self.burn(owner, amount)
    }

    fn transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: Stable,
    ) -> Result<(), LedgerError> {
        self.debit(from, amount)?;
        *self.balances.entry(to).or_insert(Stable::ZERO) += amount;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockReserve {
    pub deposits: Stable,
    pub absorbed: Vec<(TokenId, u128, Stable)>,
}

impl AbsorptionReserve for MockReserve {
    fn can_absorb(&self, _token: TokenId, debt: Stable) -> bool {
        self.deposits >= debt
    }

    fn absorb(&mut self, token: TokenId, collateral: u128, debt: Stable) {
        assert!(self.deposits >= debt, "absorb past capacity");
        self.deposits -= debt;
        self.absorbed.push((token, collateral, debt));
    }
}

/// Collaborator bundle backed by the mocks above.
#[derive(Default)]
pub struct TestEnv {
    pub oracle: MockOracle,
    pub ledger: MockLedger,
    pub staking: StakingPool,
    pub reserve: MockReserve,
}

impl TestEnv {
    pub fn ext(&mut self) -> Collaborators<'_> {
        Collaborators {
            oracle: &self.oracle,
            stable: &mut self.ledger,
            fee_recipient: &mut self.staking,
            reserve: &mut self.reserve,
        }
    }
}
