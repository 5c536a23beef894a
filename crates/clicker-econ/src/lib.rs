#![deny(warnings)]

//! Economy engine for Tap Tycoon.
//!
//! This crate advances an [`EconomyState`] in response to the four game
//! events and provides the cost-curve helpers the presentation layer needs:
//! - Taps, purchases, elapsed-time ticks and bonus grants
//! - Exact decimal accrual of passive income, with optional fractional carry
//! - Cumulative pricing and "how many can I afford" queries

use clicker_core::{unit_cost, EconomyState, UnitPurchase};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Reasons a purchase is rejected. State is untouched in every case.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum Rejection {
    /// The id is not part of the catalog.
    #[error("unknown upgrade: {0}")]
    UnknownUpgrade(String),
    /// The balance does not cover the next unit.
    #[error("cannot afford {id}: costs {cost}, balance is {balance}")]
    Unaffordable { id: String, cost: u64, balance: u64 },
}

/// Details of an accepted purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub id: String,
    /// Price paid for the unit.
    pub cost: u64,
    /// Owned count after the purchase.
    pub owned_count: u32,
}

/// `Ok` is the accepted outcome, `Err` the rejected one.
pub type PurchaseOutcome = Result<Receipt, Rejection>;

/// Result of buying several units in a row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BulkReceipt {
    pub id: String,
    pub bought: u32,
    pub spent: u64,
    /// Rejection that ended the run early, if any.
    pub stopped_by: Option<Rejection>,
}

/// What happens to the sub-unit part of passive income.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum AccrualPolicy {
    /// Each tick credits `floor(rate * elapsed)`; the fraction is dropped.
    #[default]
    Truncate,
    /// The dropped fraction is kept and added to the next tick.
    CarryRemainder,
}

/// Price of the next `n` units when `owned` are already held, saturating.
///
/// Example:
/// assert_eq!(cumulative_cost(10, 0, 3), 10 + 11 + 13);
pub fn cumulative_cost(base_cost: u64, owned: u32, n: u32) -> u64 {
    (0..n)
        .map(|k| unit_cost(base_cost, owned.saturating_add(k)))
        .fold(0u64, u64::saturating_add)
}

/// Number of consecutive units `balance` can pay for.
///
/// Example:
/// assert_eq!(max_affordable(10, 0, 34), 3);
pub fn max_affordable(base_cost: u64, owned: u32, balance: u64) -> u32 {
    let mut remaining = balance;
    let mut count = 0u32;
    while let Some(next) = owned.checked_add(count) {
        let cost = unit_cost(base_cost, next);
        if cost == 0 || cost > remaining || count == u32::MAX {
            break;
        }
        remaining -= cost;
        count += 1;
    }
    count
}

/// Elapsed seconds from a float, clamping negative and non-finite input to 0.
pub fn seconds_from_f64(elapsed_seconds: f64) -> Decimal {
    if !elapsed_seconds.is_finite() || elapsed_seconds <= 0.0 {
        return Decimal::ZERO;
    }
    Decimal::from_f64(elapsed_seconds).unwrap_or(Decimal::MAX)
}

/// Exact elapsed seconds from a duration, at nanosecond resolution.
pub fn seconds_from_duration(elapsed: Duration) -> Decimal {
    Decimal::try_from_i128_with_scale(elapsed.as_nanos() as i128, 9).unwrap_or(Decimal::MAX)
}

/// Income produced at `rate` per second over `elapsed_seconds`, plus `carry`.
///
/// Returns the whole units to credit and the leftover fraction in `[0, 1)`.
/// Saturates at `u64::MAX` whole units.
///
/// Example:
/// let (whole, rest) = accrue(Decimal::new(25, 1), Decimal::ONE, Decimal::ZERO);
/// assert_eq!((whole, rest), (2, Decimal::new(5, 1)));
pub fn accrue(rate: Decimal, elapsed_seconds: Decimal, carry: Decimal) -> (u64, Decimal) {
    if rate <= Decimal::ZERO || elapsed_seconds <= Decimal::ZERO {
        return (0, carry);
    }
    let produced = match rate
        .checked_mul(elapsed_seconds)
        .and_then(|p| p.checked_add(carry))
    {
        Some(p) => p,
        None => return (u64::MAX, Decimal::ZERO),
    };
    let whole = produced.trunc();
    match whole.to_u64() {
        Some(units) => (units, produced - whole),
        None => (u64::MAX, Decimal::ZERO),
    }
}

/// A single event for the engine, as queued by a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Tap,
    Purchase(String),
    Tick(Duration),
    GrantBonus(u64),
}

/// What applying a [`Command`] did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Tapped { credited: u64 },
    Purchased(Receipt),
    Rejected(Rejection),
    Ticked { credited: u64 },
    BonusGranted { credited: u64 },
}

impl Outcome {
    /// Whether observable state moved, i.e. whether a save is warranted.
    pub fn changed(&self) -> bool {
        match self {
            Outcome::Tapped { .. } | Outcome::Purchased(_) => true,
            Outcome::Rejected(_) => false,
            Outcome::Ticked { credited } | Outcome::BonusGranted { credited } => *credited > 0,
        }
    }
}

/// Single owner of an [`EconomyState`]; every mutation goes through here.
#[derive(Clone, Debug, Default)]
pub struct Engine {
    state: EconomyState,
    policy: AccrualPolicy,
    carry: Decimal,
}

impl Engine {
    /// Engine over a fresh state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine resuming from an existing state.
    pub fn from_state(state: EconomyState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: AccrualPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current state, for rendering.
    pub fn state(&self) -> &EconomyState {
        &self.state
    }

    /// Income carried into the next tick (always zero under `Truncate`).
    pub fn pending_fraction(&self) -> Decimal {
        self.carry
    }

    /// Manual tap. Returns the amount credited.
    pub fn tap(&mut self) -> u64 {
        let credited = self.state.record_tap();
        trace!(credited, balance = self.state.balance(), "tap");
        credited
    }

    /// Buy one unit of `id` at its current price.
    ///
    /// Rejected purchases leave the state exactly as it was.
    pub fn purchase(&mut self, id: &str) -> PurchaseOutcome {
        let Some(index) = self.state.upgrades().iter().position(|u| u.id() == id) else {
            debug!(id, "purchase rejected: unknown upgrade");
            return Err(Rejection::UnknownUpgrade(id.to_string()));
        };
        let (cost, owned_count) = match self.state.buy_unit(index) {
            UnitPurchase::Bought { cost, owned_count } => (cost, owned_count),
            UnitPurchase::Unaffordable { cost } => {
                let balance = self.state.balance();
                debug!(id, cost, balance, "purchase rejected: unaffordable");
                return Err(Rejection::Unaffordable {
                    id: id.to_string(),
                    cost,
                    balance,
                });
            }
            UnitPurchase::OutOfRange => return Err(Rejection::UnknownUpgrade(id.to_string())),
        };
        debug!(
            id,
            cost,
            owned_count,
            rate = %self.state.aggregate_production_rate(),
            "purchase accepted"
        );
        Ok(Receipt {
            id: id.to_string(),
            cost,
            owned_count,
        })
    }

    /// Buy up to `n` units of `id`, stopping at the first rejection.
    pub fn purchase_many(&mut self, id: &str, n: u32) -> BulkReceipt {
        let mut receipt = BulkReceipt {
            id: id.to_string(),
            bought: 0,
            spent: 0,
            stopped_by: None,
        };
        for _ in 0..n {
            match self.purchase(id) {
                Ok(r) => {
                    receipt.bought += 1;
                    receipt.spent = receipt.spent.saturating_add(r.cost);
                }
                Err(rejection) => {
                    receipt.stopped_by = Some(rejection);
                    break;
                }
            }
        }
        receipt
    }

    /// Accrue passive income for `elapsed_seconds`. Returns the amount credited.
    ///
    /// Negative or non-finite input is treated as zero elapsed time.
    pub fn tick(&mut self, elapsed_seconds: f64) -> u64 {
        if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
            warn!(elapsed_seconds, "tick with invalid elapsed time clamped to 0");
        }
        self.tick_seconds(seconds_from_f64(elapsed_seconds))
    }

    /// Accrue passive income for an exact duration.
    pub fn tick_duration(&mut self, elapsed: Duration) -> u64 {
        self.tick_seconds(seconds_from_duration(elapsed))
    }

    fn tick_seconds(&mut self, elapsed: Decimal) -> u64 {
        let rate = self.state.aggregate_production_rate();
        let carry = match self.policy {
            AccrualPolicy::Truncate => Decimal::ZERO,
            AccrualPolicy::CarryRemainder => self.carry,
        };
        let (whole, rest) = accrue(rate, elapsed, carry);
        if self.policy == AccrualPolicy::CarryRemainder {
            self.carry = rest;
        }
        if whole == 0 {
            return 0;
        }
        let credited = self.state.credit(whole);
        trace!(%elapsed, %rate, credited, "tick");
        credited
    }

    /// Credit a one-off reward. Returns the amount applied.
    pub fn grant_bonus(&mut self, amount: u64) -> u64 {
        let credited = self.state.credit(amount);
        debug!(amount, credited, balance = self.state.balance(), "bonus granted");
        credited
    }

    /// Apply a queued command.
    pub fn apply(&mut self, command: Command) -> Outcome {
        match command {
            Command::Tap => Outcome::Tapped {
                credited: self.tap(),
            },
            Command::Purchase(id) => match self.purchase(&id) {
                Ok(receipt) => Outcome::Purchased(receipt),
                Err(rejection) => Outcome::Rejected(rejection),
            },
            Command::Tick(elapsed) => Outcome::Ticked {
                credited: self.tick_duration(elapsed),
            },
            Command::GrantBonus(amount) => Outcome::BonusGranted {
                credited: self.grant_bonus(amount),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clicker_core::{catalog, production_rate_of, validate_state};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn engine_with(counts: &[(&str, u32)], balance: u64) -> Engine {
        let owned: BTreeMap<String, u32> =
            counts.iter().map(|(id, n)| (id.to_string(), *n)).collect();
        Engine::from_state(EconomyState::restore(balance, 0, &owned))
    }

    #[test]
    fn tap_on_fresh_state() {
        let mut e = Engine::new();
        assert_eq!(e.tap(), 1);
        assert_eq!(e.state().balance(), 1);
        assert_eq!(e.state().total_taps(), 1);
    }

    #[test]
    fn buy_first_cursor() {
        let mut e = Engine::from_state(EconomyState::new().with_balance(10));
        let r = e.purchase("cursor").unwrap();
        assert_eq!(r.cost, 10);
        assert_eq!(r.owned_count, 1);
        assert_eq!(e.state().balance(), 0);
        assert_eq!(e.state().upgrade("cursor").unwrap().owned_count(), 1);
        assert_eq!(e.state().aggregate_production_rate(), Decimal::new(1, 1));
    }

    #[test]
    fn unaffordable_purchase_is_a_noop() {
        let mut e = Engine::from_state(EconomyState::new().with_balance(5));
        let before = e.state().clone();
        let err = e.purchase("cursor").unwrap_err();
        assert_eq!(
            err,
            Rejection::Unaffordable {
                id: "cursor".into(),
                cost: 10,
                balance: 5
            }
        );
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn unknown_upgrade_is_rejected() {
        let mut e = Engine::from_state(EconomyState::new().with_balance(1_000));
        let before = e.state().clone();
        assert_eq!(
            e.purchase("castle"),
            Err(Rejection::UnknownUpgrade("castle".into()))
        );
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn tick_at_rate_ten() {
        let mut e = engine_with(&[("grandma", 10)], 0);
        assert_eq!(e.state().aggregate_production_rate(), Decimal::new(10, 0));
        assert_eq!(e.tick(1.0), 10);
        assert_eq!(e.state().balance(), 10);
    }

    #[test]
    fn zero_and_invalid_ticks_are_noops() {
        let mut e = engine_with(&[("farm", 3)], 7);
        let before = e.state().clone();
        assert_eq!(e.tick(0.0), 0);
        assert_eq!(e.tick(-5.0), 0);
        assert_eq!(e.tick(f64::NAN), 0);
        assert_eq!(e.tick(f64::INFINITY), 0);
        assert_eq!(e.tick(f64::NEG_INFINITY), 0);
        assert_eq!(e.tick_duration(Duration::ZERO), 0);
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn bonus_credits_balance() {
        let mut e = Engine::new();
        assert_eq!(e.grant_bonus(500), 500);
        assert_eq!(e.state().balance(), 500);
    }

    #[test]
    fn truncation_drops_small_ticks() {
        let mut e = engine_with(&[("cursor", 1)], 0);
        for _ in 0..1_000 {
            e.tick_duration(Duration::from_millis(100));
        }
        assert_eq!(e.state().balance(), 0);
    }

    #[test]
    fn carry_matches_one_large_tick() {
        let mut small = engine_with(&[("cursor", 1)], 0).with_policy(AccrualPolicy::CarryRemainder);
        for _ in 0..1_000 {
            small.tick_duration(Duration::from_millis(100));
        }
        let mut large = engine_with(&[("cursor", 1)], 0);
        large.tick_duration(Duration::from_secs(100));
        assert_eq!(small.state().balance(), 10);
        assert_eq!(large.state().balance(), 10);
        assert_eq!(small.pending_fraction(), Decimal::ZERO);
    }

    #[test]
    fn purchase_many_stops_at_first_rejection() {
        let mut e = Engine::from_state(EconomyState::new().with_balance(34));
        let bulk = e.purchase_many("cursor", 10);
        assert_eq!(bulk.bought, 3);
        assert_eq!(bulk.spent, 34);
        assert!(matches!(
            bulk.stopped_by,
            Some(Rejection::Unaffordable { cost: 15, .. })
        ));
    }

    #[test]
    fn max_affordable_counts_consecutive_units() {
        assert_eq!(max_affordable(10, 0, 9), 0);
        assert_eq!(max_affordable(10, 0, 10), 1);
        assert_eq!(max_affordable(10, 0, 34), 3);
        assert_eq!(max_affordable(10, 2, 13), 1);
    }

    #[test]
    fn accrue_splits_whole_and_fraction() {
        let (whole, rest) = accrue(Decimal::new(25, 1), Decimal::ONE, Decimal::ZERO);
        assert_eq!(whole, 2);
        assert_eq!(rest, Decimal::new(5, 1));
        let (whole, rest) = accrue(Decimal::new(25, 1), Decimal::ONE, rest);
        assert_eq!(whole, 3);
        assert_eq!(rest, Decimal::ZERO);
        assert_eq!(accrue(Decimal::MAX, Decimal::MAX, Decimal::ZERO), (u64::MAX, Decimal::ZERO));
    }

    #[test]
    fn apply_reports_changes() {
        let mut e = Engine::new();
        assert!(e.apply(Command::Tap).changed());
        assert!(!e.apply(Command::Tick(Duration::from_secs(5))).changed());
        assert!(!e.apply(Command::Purchase("cursor".into())).changed());
        assert!(e.apply(Command::GrantBonus(20)).changed());
        let out = e.apply(Command::Purchase("cursor".into()));
        assert!(matches!(out, Outcome::Purchased(Receipt { cost: 10, .. })));
        assert!(e.apply(Command::Tick(Duration::from_secs(10))).changed());
        assert_eq!(e.state().balance(), 1 + 20 - 10 + 1);
    }

    proptest! {
        #[test]
        fn buying_n_units_costs_the_cumulative_sum(i in 0usize..10, n in 0u32..60) {
            let def = &catalog()[i];
            let expected: u64 = (0..n).map(|k| unit_cost(def.base_cost, k)).sum();
            prop_assert_eq!(cumulative_cost(def.base_cost, 0, n), expected);
            let mut e = Engine::from_state(EconomyState::new().with_balance(expected));
            let bulk = e.purchase_many(def.id, n);
            prop_assert_eq!(bulk.bought, n);
            prop_assert_eq!(bulk.spent, expected);
            prop_assert!(bulk.stopped_by.is_none());
            prop_assert_eq!(e.state().balance(), 0);
            prop_assert_eq!(e.state().upgrade(def.id).unwrap().owned_count(), n);
        }

        #[test]
        fn rate_matches_recomputed_sum(picks in proptest::collection::vec(0usize..10, 0..60)) {
            let mut e = Engine::from_state(EconomyState::new().with_balance(u64::MAX / 2));
            for i in picks {
                let id = catalog()[i].id;
                let before = e.state().balance();
                match e.purchase(id) {
                    Ok(r) => prop_assert_eq!(e.state().balance(), before - r.cost),
                    Err(_) => prop_assert_eq!(e.state().balance(), before),
                }
                prop_assert_eq!(
                    e.state().aggregate_production_rate(),
                    production_rate_of(e.state().upgrades())
                );
            }
            prop_assert!(validate_state(e.state()).is_ok());
        }

        #[test]
        fn purchase_never_overdraws(balance in 0u64..200_000, i in 0usize..10) {
            let mut e = Engine::from_state(EconomyState::new().with_balance(balance));
            let id = catalog()[i].id;
            let cost = e.state().upgrade(id).unwrap().current_cost();
            let result = e.purchase(id);
            prop_assert_eq!(result.is_ok(), balance >= cost);
            if result.is_err() {
                prop_assert_eq!(e.state().balance(), balance);
            }
        }

        #[test]
        fn split_ticks_within_one_unit(
            counts in proptest::collection::vec(0u32..50, 10),
            t1 in 0u64..100_000,
            t2 in 0u64..100_000,
        ) {
            let owned: Vec<(&str, u32)> = catalog().iter().map(|d| d.id).zip(counts).collect();
            let mut split = engine_with(&owned, 0);
            split.tick_duration(Duration::from_millis(t1));
            split.tick_duration(Duration::from_millis(t2));
            let mut joined = engine_with(&owned, 0);
            joined.tick_duration(Duration::from_millis(t1 + t2));
            let a = split.state().balance();
            let b = joined.state().balance();
            prop_assert!(a <= b && b - a <= 1);
        }
    }
}
