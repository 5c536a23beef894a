#![deny(warnings)]

//! Core domain models and invariants for Tap Tycoon.
//!
//! This crate defines the static upgrade catalog and the economy state the
//! engine mutates, with validation helpers that guard the model invariants.
//! State is only changed through a handful of primitives that keep the cached
//! production rate in sync with ownership.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Ratio between the prices of two consecutive units of the same upgrade.
pub const COST_GROWTH: f64 = 1.15;

/// Currency credited per manual tap.
pub const DEFAULT_PER_TAP_YIELD: u64 = 1;

/// Characters with a structural meaning in the legacy save format.
pub const RESERVED_ID_CHARS: &[char] = &[':', ';', '='];

/// Immutable definition of a purchasable upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct UpgradeDefinition {
    /// Stable identifier, also used as the persistence key.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Display description.
    pub description: &'static str,
    /// Price of the first unit (> 0).
    pub base_cost: u64,
    /// Currency per second produced by each owned unit (>= 0).
    pub base_production_rate: Decimal,
}

const fn rate(units: u32, scale: u32) -> Decimal {
    Decimal::from_parts(units, 0, 0, false, scale)
}

static CATALOG: [UpgradeDefinition; 10] = [
    UpgradeDefinition {
        id: "cursor",
        name: "Auto Tapper",
        description: "Taps automatically",
        base_cost: 10,
        base_production_rate: rate(1, 1),
    },
    UpgradeDefinition {
        id: "grandma",
        name: "Grandma",
        description: "A nice grandma to tap for you",
        base_cost: 100,
        base_production_rate: rate(1, 0),
    },
    UpgradeDefinition {
        id: "farm",
        name: "Farm",
        description: "Grows coins naturally",
        base_cost: 1_100,
        base_production_rate: rate(8, 0),
    },
    UpgradeDefinition {
        id: "mine",
        name: "Mine",
        description: "Extracts precious coins",
        base_cost: 12_000,
        base_production_rate: rate(47, 0),
    },
    UpgradeDefinition {
        id: "factory",
        name: "Factory",
        description: "Mass produces coins",
        base_cost: 130_000,
        base_production_rate: rate(260, 0),
    },
    UpgradeDefinition {
        id: "bank",
        name: "Bank",
        description: "Generates coin interest",
        base_cost: 1_400_000,
        base_production_rate: rate(1_400, 0),
    },
    UpgradeDefinition {
        id: "temple",
        name: "Temple",
        description: "Summons coin spirits",
        base_cost: 20_000_000,
        base_production_rate: rate(7_800, 0),
    },
    UpgradeDefinition {
        id: "wizard",
        name: "Wizard Tower",
        description: "Creates coins with magic",
        base_cost: 330_000_000,
        base_production_rate: rate(44_000, 0),
    },
    UpgradeDefinition {
        id: "spaceship",
        name: "Spaceship",
        description: "Mines asteroids for coins",
        base_cost: 5_100_000_000,
        base_production_rate: rate(260_000, 0),
    },
    UpgradeDefinition {
        id: "portal",
        name: "Portal",
        description: "Brings coins from other dimensions",
        base_cost: 75_000_000_000,
        base_production_rate: rate(1_600_000, 0),
    },
];

/// The fixed upgrade catalog in declaration (and display) order.
pub fn catalog() -> &'static [UpgradeDefinition] {
    &CATALOG
}

/// Resolve an upgrade id to its catalog index and definition.
pub fn find_upgrade(id: &str) -> Option<(usize, &'static UpgradeDefinition)> {
    CATALOG.iter().enumerate().find(|(_, d)| d.id == id)
}

/// Price of the next unit when `owned` units are already held.
///
/// `trunc(base_cost * 1.15^owned)` evaluated in double precision, which keeps
/// prices identical to existing saves. Saturates at `u64::MAX`.
pub fn unit_cost(base_cost: u64, owned: u32) -> u64 {
    let cost = base_cost as f64 * COST_GROWTH.powf(f64::from(owned));
    // float -> int casts truncate toward zero and saturate
    cost as u64
}

/// Mutable per-upgrade state, index-aligned with the catalog.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpgradeState {
    /// Catalog entry this state belongs to.
    pub definition: &'static UpgradeDefinition,
    owned_count: u32,
}

impl UpgradeState {
    /// State for a definition with nothing owned.
    pub fn new(definition: &'static UpgradeDefinition) -> Self {
        Self {
            definition,
            owned_count: 0,
        }
    }

    pub fn id(&self) -> &'static str {
        self.definition.id
    }

    /// Number of units purchased so far.
    pub fn owned_count(&self) -> u32 {
        self.owned_count
    }

    /// Price of the next unit. Always recomputed, never stored.
    pub fn current_cost(&self) -> u64 {
        unit_cost(self.definition.base_cost, self.owned_count)
    }

    /// Currency per second produced by all owned units.
    pub fn total_production_rate(&self) -> Decimal {
        self.definition.base_production_rate * Decimal::from(self.owned_count)
    }
}

/// Sum of the per-upgrade production rates.
pub fn production_rate_of(upgrades: &[UpgradeState]) -> Decimal {
    upgrades.iter().map(UpgradeState::total_production_rate).sum()
}

/// Result of [`EconomyState::buy_unit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitPurchase {
    Bought { cost: u64, owned_count: u32 },
    Unaffordable { cost: u64 },
    OutOfRange,
}

/// Aggregate root of the game economy.
///
/// Fields are private: every mutation goes through a primitive that keeps
/// `aggregate_production_rate` equal to the sum over `upgrades`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EconomyState {
    balance: u64,
    total_taps: u64,
    per_tap_yield: u64,
    aggregate_production_rate: Decimal,
    upgrades: Vec<UpgradeState>,
}

impl Default for EconomyState {
    fn default() -> Self {
        Self::new()
    }
}

impl EconomyState {
    /// Fresh state: zero balance, nothing owned.
    pub fn new() -> Self {
        Self {
            balance: 0,
            total_taps: 0,
            per_tap_yield: DEFAULT_PER_TAP_YIELD,
            aggregate_production_rate: Decimal::ZERO,
            upgrades: CATALOG.iter().map(UpgradeState::new).collect(),
        }
    }

    /// Rebuild state from persisted values.
    ///
    /// Ids not in the catalog are ignored; catalog ids missing from
    /// `owned_counts` start at zero.
    pub fn restore(balance: u64, total_taps: u64, owned_counts: &BTreeMap<String, u32>) -> Self {
        let mut state = Self::new();
        state.balance = balance;
        state.total_taps = total_taps;
        for (id, &count) in owned_counts {
            match state.upgrades.iter_mut().find(|u| u.id() == id.as_str()) {
                Some(u) => u.owned_count = count,
                None => debug!(id = %id, count, "ignoring retired upgrade id"),
            }
        }
        state.recompute_production_rate();
        state
    }

    /// Builder used by hosts and tests to seed a balance.
    pub fn with_balance(mut self, balance: u64) -> Self {
        self.balance = balance;
        self
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn total_taps(&self) -> u64 {
        self.total_taps
    }

    pub fn per_tap_yield(&self) -> u64 {
        self.per_tap_yield
    }

    /// Currency per second across all owned upgrades.
    pub fn aggregate_production_rate(&self) -> Decimal {
        self.aggregate_production_rate
    }

    /// Upgrade states in catalog order.
    pub fn upgrades(&self) -> &[UpgradeState] {
        &self.upgrades
    }

    pub fn upgrade(&self, id: &str) -> Option<&UpgradeState> {
        self.upgrades.iter().find(|u| u.id() == id)
    }

    /// Owned counts keyed by upgrade id, the persisted view of `upgrades`.
    pub fn owned_counts(&self) -> BTreeMap<String, u32> {
        self.upgrades
            .iter()
            .map(|u| (u.id().to_string(), u.owned_count))
            .collect()
    }

    /// Add currency, saturating at `u64::MAX`. Returns the amount applied.
    ///
    /// Engine primitive; hosts mutate through `clicker_econ::Engine`.
    #[doc(hidden)]
    pub fn credit(&mut self, amount: u64) -> u64 {
        let before = self.balance;
        self.balance = self.balance.saturating_add(amount);
        self.balance - before
    }

    /// Count one manual tap and credit its yield. Returns the amount applied.
    #[doc(hidden)]
    pub fn record_tap(&mut self) -> u64 {
        self.total_taps = self.total_taps.saturating_add(1);
        self.credit(self.per_tap_yield)
    }

    /// Pay the current price of the upgrade at catalog `index` and add one
    /// unit. Nothing changes unless the result is [`UnitPurchase::Bought`].
    #[doc(hidden)]
    pub fn buy_unit(&mut self, index: usize) -> UnitPurchase {
        let Some(upgrade) = self.upgrades.get_mut(index) else {
            return UnitPurchase::OutOfRange;
        };
        let cost = upgrade.current_cost();
        let Some(rest) = self.balance.checked_sub(cost) else {
            return UnitPurchase::Unaffordable { cost };
        };
        self.balance = rest;
        upgrade.owned_count = upgrade.owned_count.saturating_add(1);
        let owned_count = upgrade.owned_count;
        self.recompute_production_rate();
        UnitPurchase::Bought { cost, owned_count }
    }

    fn recompute_production_rate(&mut self) {
        self.aggregate_production_rate = production_rate_of(&self.upgrades);
    }
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Upgrade ids must be non-empty.
    #[error("upgrade id must not be empty")]
    EmptyId,
    /// Upgrade ids must be unique.
    #[error("duplicate upgrade id: {0}")]
    DuplicateId(String),
    /// Upgrade ids must not contain save-format delimiters or whitespace.
    #[error("upgrade id {0:?} contains a reserved character")]
    ReservedCharacter(String),
    /// Base cost must be strictly positive.
    #[error("base cost of {0} must be > 0")]
    NonPositiveCost(String),
    /// Production rate must be non-negative.
    #[error("production rate of {0} must be >= 0")]
    NegativeRate(String),
    /// State does not hold one upgrade per catalog entry.
    #[error("expected {expected} upgrades, found {found}")]
    UpgradeCountMismatch { expected: usize, found: usize },
    /// Upgrade at `index` does not match the catalog entry at that index.
    #[error("upgrade at index {index} is {found}, catalog has {expected}")]
    CatalogMisaligned {
        index: usize,
        expected: String,
        found: String,
    },
    /// Cached aggregate rate differs from the recomputed sum.
    #[error("stale production rate: cached {cached}, recomputed {recomputed}")]
    StaleProductionRate {
        cached: Decimal,
        recomputed: Decimal,
    },
}

/// True when `id` can be written into the legacy delimited format as is.
pub fn is_portable_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| RESERVED_ID_CHARS.contains(&c) || c.is_whitespace())
}

/// Validate a catalog: unique portable ids, positive costs, non-negative rates.
pub fn validate_catalog(defs: &[UpgradeDefinition]) -> Result<(), ValidationError> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for d in defs {
        if d.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if !is_portable_id(d.id) {
            return Err(ValidationError::ReservedCharacter(d.id.to_string()));
        }
        if !seen.insert(d.id) {
            return Err(ValidationError::DuplicateId(d.id.to_string()));
        }
        if d.base_cost == 0 {
            return Err(ValidationError::NonPositiveCost(d.id.to_string()));
        }
        if d.base_production_rate.is_sign_negative() && !d.base_production_rate.is_zero() {
            return Err(ValidationError::NegativeRate(d.id.to_string()));
        }
    }
    Ok(())
}

/// Validate that a state is aligned with the catalog and its rate is fresh.
pub fn validate_state(state: &EconomyState) -> Result<(), ValidationError> {
    if state.upgrades.len() != CATALOG.len() {
        return Err(ValidationError::UpgradeCountMismatch {
            expected: CATALOG.len(),
            found: state.upgrades.len(),
        });
    }
    for (index, (u, d)) in state.upgrades.iter().zip(CATALOG.iter()).enumerate() {
        if u.id() != d.id {
            return Err(ValidationError::CatalogMisaligned {
                index,
                expected: d.id.to_string(),
                found: u.id().to_string(),
            });
        }
    }
    let recomputed = production_rate_of(&state.upgrades);
    if recomputed != state.aggregate_production_rate {
        return Err(ValidationError::StaleProductionRate {
            cached: state.aggregate_production_rate,
            recomputed,
        });
    }
    Ok(())
}

/// Abbreviate a currency amount for display: `1.50K`, `2.00M`, `3.25B`, `1.00T`.
///
/// Values below one thousand are printed as plain integers.
pub fn format_amount(amount: u64) -> String {
    const SUFFIXES: [(u64, &str); 4] = [
        (1_000_000_000_000, "T"),
        (1_000_000_000, "B"),
        (1_000_000, "M"),
        (1_000, "K"),
    ];
    for (scale, suffix) in SUFFIXES {
        if amount >= scale {
            return format!("{:.2}{}", amount as f64 / scale as f64, suffix);
        }
    }
    amount.to_string()
}

/// Display a production rate the same way, truncated to whole currency.
pub fn format_rate(rate: Decimal) -> String {
    format_amount(rate.trunc().to_u64().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn catalog_matches_canonical_table() {
        let expected: [(&str, u64, Decimal); 10] = [
            ("cursor", 10, Decimal::new(1, 1)),
            ("grandma", 100, Decimal::new(1, 0)),
            ("farm", 1_100, Decimal::new(8, 0)),
            ("mine", 12_000, Decimal::new(47, 0)),
            ("factory", 130_000, Decimal::new(260, 0)),
            ("bank", 1_400_000, Decimal::new(1_400, 0)),
            ("temple", 20_000_000, Decimal::new(7_800, 0)),
            ("wizard", 330_000_000, Decimal::new(44_000, 0)),
            ("spaceship", 5_100_000_000, Decimal::new(260_000, 0)),
            ("portal", 75_000_000_000, Decimal::new(1_600_000, 0)),
        ];
        assert_eq!(catalog().len(), expected.len());
        for (d, (id, cost, rate)) in catalog().iter().zip(expected) {
            assert_eq!(d.id, id);
            assert_eq!(d.base_cost, cost);
            assert_eq!(d.base_production_rate, rate);
        }
        validate_catalog(catalog()).unwrap();
    }

    #[test]
    fn catalog_validation_rejects_bad_entries() {
        let good = catalog()[0];
        let dup = [good, good];
        assert_eq!(
            validate_catalog(&dup),
            Err(ValidationError::DuplicateId("cursor".to_string()))
        );
        let delimited = [UpgradeDefinition {
            id: "bad:id",
            ..good
        }];
        assert_eq!(
            validate_catalog(&delimited),
            Err(ValidationError::ReservedCharacter("bad:id".to_string()))
        );
        let free = [UpgradeDefinition {
            base_cost: 0,
            ..good
        }];
        assert_eq!(
            validate_catalog(&free),
            Err(ValidationError::NonPositiveCost("cursor".to_string()))
        );
        let draining = [UpgradeDefinition {
            base_production_rate: Decimal::new(-1, 0),
            ..good
        }];
        assert_eq!(
            validate_catalog(&draining),
            Err(ValidationError::NegativeRate("cursor".to_string()))
        );
    }

    #[test]
    fn find_upgrade_returns_catalog_index() {
        let (index, def) = find_upgrade("farm").unwrap();
        assert_eq!(index, 2);
        assert_eq!(def.base_cost, 1_100);
        assert!(find_upgrade("castle").is_none());
    }

    #[test]
    fn cursor_price_sequence() {
        let prices: Vec<u64> = (0..6).map(|n| unit_cost(10, n)).collect();
        assert_eq!(prices, vec![10, 11, 13, 15, 17, 20]);
    }

    #[test]
    fn unit_cost_saturates() {
        assert_eq!(unit_cost(75_000_000_000, 1_000), u64::MAX);
    }

    #[test]
    fn fresh_state_is_empty_and_valid() {
        let s = EconomyState::new();
        assert_eq!(s.balance(), 0);
        assert_eq!(s.total_taps(), 0);
        assert_eq!(s.per_tap_yield(), 1);
        assert_eq!(s.aggregate_production_rate(), Decimal::ZERO);
        assert_eq!(s.upgrades().len(), catalog().len());
        assert!(s.upgrades().iter().all(|u| u.owned_count() == 0));
        validate_state(&s).unwrap();
    }

    #[test]
    fn restore_ignores_unknown_and_defaults_missing() {
        let mut counts = BTreeMap::new();
        counts.insert("grandma".to_string(), 3);
        counts.insert("time_machine".to_string(), 7);
        let s = EconomyState::restore(1_234, 9, &counts);
        assert_eq!(s.balance(), 1_234);
        assert_eq!(s.total_taps(), 9);
        assert_eq!(s.upgrade("grandma").unwrap().owned_count(), 3);
        assert_eq!(s.upgrade("cursor").unwrap().owned_count(), 0);
        assert!(s.upgrade("time_machine").is_none());
        assert_eq!(s.aggregate_production_rate(), Decimal::new(3, 0));
        validate_state(&s).unwrap();
    }

    #[test]
    fn primitives_keep_rate_fresh() {
        let mut s = EconomyState::new().with_balance(25);
        assert_eq!(s.buy_unit(0), UnitPurchase::Bought { cost: 10, owned_count: 1 });
        assert_eq!(s.buy_unit(0), UnitPurchase::Bought { cost: 11, owned_count: 2 });
        let before = s.clone();
        assert_eq!(s.buy_unit(0), UnitPurchase::Unaffordable { cost: 13 });
        assert_eq!(s.buy_unit(99), UnitPurchase::OutOfRange);
        assert_eq!(s, before);
        assert_eq!(s.balance(), 4);
        assert_eq!(s.aggregate_production_rate(), Decimal::new(2, 1));
        validate_state(&s).unwrap();
    }

    #[test]
    fn credit_saturates() {
        let mut s = EconomyState::new().with_balance(u64::MAX - 1);
        assert_eq!(s.credit(10), 1);
        assert_eq!(s.balance(), u64::MAX);
    }

    #[test]
    fn state_serializes_for_rendering() {
        let s = EconomyState::new().with_balance(42);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["balance"], 42);
        assert_eq!(v["upgrades"][0]["definition"]["id"], "cursor");
    }

    #[test]
    fn formats_amounts_with_suffixes() {
        assert_eq!(format_amount(0), "0");
        assert_eq!(format_amount(999), "999");
        assert_eq!(format_amount(1_000), "1.00K");
        assert_eq!(format_amount(1_500_000), "1.50M");
        assert_eq!(format_amount(2_000_000_000), "2.00B");
        assert_eq!(format_amount(3_250_000_000_000), "3.25T");
        assert_eq!(format_rate(Decimal::new(12_345, 1)), "1.23K");
        assert_eq!(format_rate(Decimal::new(3, 1)), "0");
    }

    proptest! {
        #[test]
        fn cost_strictly_increasing(index in 0usize..10, owned in 0u32..100) {
            let base = catalog()[index].base_cost;
            prop_assert!(unit_cost(base, owned + 1) > unit_cost(base, owned));
        }

        #[test]
        fn first_unit_costs_base(index in 0usize..10) {
            let d = &catalog()[index];
            prop_assert_eq!(unit_cost(d.base_cost, 0), d.base_cost);
        }
    }
}
