//! Liquidation accounting.
//!
//! Decides whether a trove can be liquidated in the current mode and splits its debt and
//! collateral between the stability pool offset, redistribution to the remaining troves,
//! the liquidator's gas compensation and (for capped liquidations) the owner's surplus.
//! A batch sums the per-trove values into [`LiquidationTotals`] and applies them once.

use crate::errors::TroveError;
use crate::math::*;
use crate::shared_structs::*;
use scrypto::prelude::*;

/// How a trove is liquidated, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationKind {
    Ineligible,
    /// Offset against the stability pool as far as it reaches, redistribute the rest.
    Standard,
    /// Recovery mode with ICR <= 100%: everything is redistributed.
    PureRedistribution,
    /// Recovery mode with MCR <= ICR < TCR: the pool absorbs the whole debt for collateral worth
    /// MCR * debt, the remainder is left to the owner.
    Capped,
}

pub fn classify(
    icr: Decimal,
    tcr: Decimal,
    recovery_mode: bool,
    debt: Decimal,
    stability_pool_remaining: Decimal,
    parameters: &ProtocolParameters,
) -> LiquidationKind {
    if debt == Decimal::ZERO {
        return LiquidationKind::Ineligible;
    }
    if !recovery_mode {
        return if icr < parameters.mcr {
            LiquidationKind::Standard
        } else {
            LiquidationKind::Ineligible
        };
    }
    if parameters.recovery_mode_immunity && icr > tcr {
        return LiquidationKind::Ineligible;
    }
    if icr <= Decimal::ONE {
        LiquidationKind::PureRedistribution
    } else if icr < parameters.mcr {
        LiquidationKind::Standard
    } else if parameters.recovery_mode_capped_liquidation
        && icr < tcr
        && debt <= stability_pool_remaining
    {
        LiquidationKind::Capped
    } else {
        LiquidationKind::Ineligible
    }
}

/// Outcome of liquidating one trove.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationValues {
    pub kind: LiquidationKind,
    pub entire_debt: Decimal,
    pub entire_collaterals: IndexMap<ResourceAddress, Decimal>,
    pub coll_gas_compensation: IndexMap<ResourceAddress, Decimal>,
    pub debt_gas_compensation: Decimal,
    pub debt_to_offset: Decimal,
    pub coll_to_send_to_sp: IndexMap<ResourceAddress, Decimal>,
    pub debt_to_redistribute: IndexMap<ResourceAddress, Decimal>,
    pub coll_to_redistribute: IndexMap<ResourceAddress, Decimal>,
    pub coll_surplus: IndexMap<ResourceAddress, Decimal>,
}

impl LiquidationValues {
    fn empty(kind: LiquidationKind, debt: Decimal, collaterals: &IndexMap<ResourceAddress, Decimal>) -> Self {
        Self {
            kind,
            entire_debt: debt,
            entire_collaterals: collaterals.clone(),
            coll_gas_compensation: IndexMap::default(),
            debt_gas_compensation: Decimal::ZERO,
            debt_to_offset: Decimal::ZERO,
            coll_to_send_to_sp: IndexMap::default(),
            debt_to_redistribute: IndexMap::default(),
            coll_to_redistribute: IndexMap::default(),
            coll_surplus: IndexMap::default(),
        }
    }

    pub fn total_debt_to_redistribute(&self) -> Decimal {
        sum(&self.debt_to_redistribute)
    }
}

/// Computes the liquidation split for a trove whose pending rewards have already been folded in.
pub fn liquidation_values(
    kind: LiquidationKind,
    collaterals: &IndexMap<ResourceAddress, Decimal>,
    debt: Decimal,
    icr: Decimal,
    stability_pool_remaining: Decimal,
    prices: &PriceTable,
    parameters: &ProtocolParameters,
) -> LiquidationValues {
    let mut values = LiquidationValues::empty(kind, debt, collaterals);
    if kind == LiquidationKind::Ineligible {
        return values;
    }
    values.debt_gas_compensation = parameters.gas_compensation_debt.min(debt);

    if kind == LiquidationKind::Capped {
        for (collateral, amount) in collaterals.iter() {
            let to_offset = *amount * parameters.mcr / icr;
            let gas = to_offset * parameters.liquidation_gas_compensation;
            add_to(&mut values.coll_gas_compensation, *collateral, gas);
            add_to(&mut values.coll_to_send_to_sp, *collateral, to_offset - gas);
            add_to(&mut values.coll_surplus, *collateral, *amount - to_offset);
        }
        values.debt_to_offset = debt;
        return values;
    }

    let debt_to_offset = if kind == LiquidationKind::Standard {
        debt.min(stability_pool_remaining.max(Decimal::ZERO))
    } else {
        Decimal::ZERO
    };
    let offset_fraction = debt_to_offset / debt;

    for (collateral, amount) in collaterals.iter() {
        let gas = *amount * parameters.liquidation_gas_compensation;
        let to_liquidate = *amount - gas;
        let to_sp = to_liquidate * offset_fraction;
        add_to(&mut values.coll_gas_compensation, *collateral, gas);
        add_to(&mut values.coll_to_send_to_sp, *collateral, to_sp);
        add_to(&mut values.coll_to_redistribute, *collateral, to_liquidate - to_sp);
    }

    values.debt_to_offset = debt_to_offset;
    values.debt_to_redistribute = split_debt_by_value(debt - debt_to_offset, collaterals, prices);
    values
}

/// Splits `debt` across the kinds of `collaterals` by each kind's share of the risk-weighted value.
/// Falls back to an equal split when no kind has a usable price. The last kind absorbs rounding.
pub fn split_debt_by_value(
    debt: Decimal,
    collaterals: &IndexMap<ResourceAddress, Decimal>,
    prices: &PriceTable,
) -> IndexMap<ResourceAddress, Decimal> {
    let mut split: IndexMap<ResourceAddress, Decimal> = IndexMap::default();
    if debt <= Decimal::ZERO {
        return split;
    }

    let held: Vec<(ResourceAddress, Decimal)> = collaterals
        .iter()
        .filter(|(_, amount)| **amount > Decimal::ZERO)
        .map(|(kind, amount)| (*kind, kind_value(kind, *amount, prices)))
        .collect();
    if held.is_empty() {
        return split;
    }

    let total_value = held.iter().fold(Decimal::ZERO, |acc, (_, value)| acc + *value);
    let weighted: Vec<(ResourceAddress, Decimal)> = if total_value > Decimal::ZERO {
        held.into_iter().filter(|(_, value)| *value > Decimal::ZERO).collect()
    } else {
        held.into_iter().map(|(kind, _)| (kind, Decimal::ONE)).collect()
    };
    let weight_total = weighted.iter().fold(Decimal::ZERO, |acc, (_, value)| acc + *value);

    let mut assigned = Decimal::ZERO;
    let last = weighted.len() - 1;
    for (index, (kind, weight)) in weighted.iter().enumerate() {
        let share = if index == last {
            debt - assigned
        } else {
            debt * *weight / weight_total
        };
        assigned += share;
        split.insert(*kind, share);
    }
    split
}

/// Aggregated values of a batch of liquidations.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationTotals {
    pub troves_liquidated: u64,
    pub liquidated_debt: Decimal,
    pub liquidated_collaterals: IndexMap<ResourceAddress, Decimal>,
    pub coll_gas_compensation: IndexMap<ResourceAddress, Decimal>,
    pub debt_gas_compensation: Decimal,
    pub debt_to_offset: Decimal,
    pub coll_to_send_to_sp: IndexMap<ResourceAddress, Decimal>,
    pub debt_to_redistribute: IndexMap<ResourceAddress, Decimal>,
    pub coll_to_redistribute: IndexMap<ResourceAddress, Decimal>,
    pub coll_surplus: IndexMap<ResourceAddress, Decimal>,
}

impl LiquidationTotals {
    pub fn new() -> Self {
        Self {
            troves_liquidated: 0,
            liquidated_debt: Decimal::ZERO,
            liquidated_collaterals: IndexMap::default(),
            coll_gas_compensation: IndexMap::default(),
            debt_gas_compensation: Decimal::ZERO,
            debt_to_offset: Decimal::ZERO,
            coll_to_send_to_sp: IndexMap::default(),
            debt_to_redistribute: IndexMap::default(),
            coll_to_redistribute: IndexMap::default(),
            coll_surplus: IndexMap::default(),
        }
    }

    pub fn add(&mut self, values: &LiquidationValues) {
        self.troves_liquidated += 1;
        self.liquidated_debt += values.entire_debt;
        self.debt_gas_compensation += values.debt_gas_compensation;
        self.debt_to_offset += values.debt_to_offset;
        merge(&mut self.liquidated_collaterals, &values.entire_collaterals);
        merge(&mut self.coll_gas_compensation, &values.coll_gas_compensation);
        merge(&mut self.coll_to_send_to_sp, &values.coll_to_send_to_sp);
        merge(&mut self.debt_to_redistribute, &values.debt_to_redistribute);
        merge(&mut self.coll_to_redistribute, &values.coll_to_redistribute);
        merge(&mut self.coll_surplus, &values.coll_surplus);
    }

    /// Every kind that receives a redistribution in this batch.
    pub fn redistributed_kinds(&self) -> Vec<ResourceAddress> {
        let mut kinds: Vec<ResourceAddress> = vec![];
        for (kind, amount) in self.coll_to_redistribute.iter().chain(self.debt_to_redistribute.iter()) {
            if *amount > Decimal::ZERO && !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }
}

/// System-wide collateral and debt tracked in memory while a batch runs, so recovery mode can be
/// re-evaluated after every liquidated trove.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemTotals {
    pub collaterals: IndexMap<ResourceAddress, Decimal>,
    pub debt: Decimal,
}

impl SystemTotals {
    pub fn tcr(&self, prices: &PriceTable) -> Decimal {
        compute_icr(&self.collaterals, self.debt, prices)
    }

    /// Offset debt and collateral leave the system. Redistributed amounts stay in it.
    pub fn apply(&mut self, values: &LiquidationValues) {
        self.debt = (self.debt - values.debt_to_offset).max(Decimal::ZERO);
        for (kind, amount) in values.coll_to_send_to_sp.iter() {
            subtract_from(&mut self.collaterals, *kind, *amount);
        }
        for (kind, amount) in values.coll_gas_compensation.iter() {
            subtract_from(&mut self.collaterals, *kind, *amount);
        }
        for (kind, amount) in values.coll_surplus.iter() {
            subtract_from(&mut self.collaterals, *kind, *amount);
        }
    }
}

/// Per-unit-stake accumulator increments for one kind, with the rounding error carried forward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedistributionStep {
    pub l_coll_increment: Decimal,
    pub l_debt_increment: Decimal,
    pub coll_error: Decimal,
    pub debt_error: Decimal,
}

pub fn redistribution_step(
    collateral: Decimal,
    debt: Decimal,
    total_stakes: Decimal,
    last_coll_error: Decimal,
    last_debt_error: Decimal,
) -> Result<RedistributionStep, TroveError> {
    if collateral == Decimal::ZERO && debt == Decimal::ZERO {
        return Ok(RedistributionStep {
            l_coll_increment: Decimal::ZERO,
            l_debt_increment: Decimal::ZERO,
            coll_error: last_coll_error,
            debt_error: last_debt_error,
        });
    }
    if total_stakes <= Decimal::ZERO {
        return Err(TroveError::CannotRedistribute);
    }

    let coll_numerator = collateral + last_coll_error;
    let debt_numerator = debt + last_debt_error;
    let l_coll_increment = coll_numerator / total_stakes;
    let l_debt_increment = debt_numerator / total_stakes;

    Ok(RedistributionStep {
        l_coll_increment,
        l_debt_increment,
        coll_error: (coll_numerator - l_coll_increment * total_stakes).max(Decimal::ZERO),
        debt_error: (debt_numerator - l_debt_increment * total_stakes).max(Decimal::ZERO),
    })
}

pub fn sum(map: &IndexMap<ResourceAddress, Decimal>) -> Decimal {
    map.values().fold(Decimal::ZERO, |acc, amount| acc + *amount)
}

pub fn merge(into: &mut IndexMap<ResourceAddress, Decimal>, from: &IndexMap<ResourceAddress, Decimal>) {
    for (kind, amount) in from.iter() {
        add_to(into, *kind, *amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OTHER: ResourceAddress = ACCOUNT_OWNER_BADGE;

    fn table(entries: &[(ResourceAddress, Decimal)]) -> PriceTable {
        entries
            .iter()
            .map(|(kind, price)| {
                (
                    *kind,
                    PriceInfo {
                        price: *price,
                        safety_ratio: Decimal::ONE,
                    },
                )
            })
            .collect()
    }

    fn colls(entries: &[(ResourceAddress, Decimal)]) -> IndexMap<ResourceAddress, Decimal> {
        entries.iter().cloned().collect()
    }

    fn get(map: &IndexMap<ResourceAddress, Decimal>, kind: ResourceAddress) -> Decimal {
        map.get(&kind).copied().unwrap_or(Decimal::ZERO)
    }

    #[test]
    fn normal_mode_eligibility() {
        let parameters = ProtocolParameters::default();
        assert_eq!(
            classify(dec!("1.09"), dec!(2), false, dec!(100), Decimal::ZERO, &parameters),
            LiquidationKind::Standard
        );
        assert_eq!(
            classify(dec!("1.1"), dec!(2), false, dec!(100), Decimal::ZERO, &parameters),
            LiquidationKind::Ineligible
        );
    }

    #[test]
    fn recovery_mode_immunity_and_capping() {
        let parameters = ProtocolParameters::default();
        // ICR above TCR is immune even below MCR
        assert_eq!(
            classify(dec!("1.05"), dec!("1.02"), true, dec!(100), dec!(1000), &parameters),
            LiquidationKind::Ineligible
        );
        assert_eq!(
            classify(dec!("0.9"), dec!("1.2"), true, dec!(100), dec!(1000), &parameters),
            LiquidationKind::PureRedistribution
        );
        assert_eq!(
            classify(dec!("1.05"), dec!("1.2"), true, dec!(100), dec!(1000), &parameters),
            LiquidationKind::Standard
        );
        assert_eq!(
            classify(dec!("1.2"), dec!("1.3"), true, dec!(100), dec!(1000), &parameters),
            LiquidationKind::Capped
        );
        // the pool cannot cover the whole debt
        assert_eq!(
            classify(dec!("1.2"), dec!("1.3"), true, dec!(100), dec!(99), &parameters),
            LiquidationKind::Ineligible
        );
    }

    #[test]
    fn immunity_can_be_switched_off() {
        let parameters = ProtocolParameters {
            recovery_mode_immunity: false,
            ..ProtocolParameters::default()
        };
        assert_eq!(
            classify(dec!("1.05"), dec!("1.02"), true, dec!(100), dec!(1000), &parameters),
            LiquidationKind::Standard
        );
    }

    #[test]
    fn pure_redistribution_of_hundred_percent_trove() {
        // price 100, debt 100, one unit of collateral: ICR 100%
        let parameters = ProtocolParameters::default();
        let prices = table(&[(XRD, dec!(100))]);
        let trove = colls(&[(XRD, Decimal::ONE)]);
        let icr = compute_icr(&trove, dec!(100), &prices);
        let kind = classify(icr, dec!(2), false, dec!(100), Decimal::ZERO, &parameters);
        assert_eq!(kind, LiquidationKind::Standard);

        let values = liquidation_values(kind, &trove, dec!(100), icr, Decimal::ZERO, &prices, &parameters);
        assert_eq!(get(&values.coll_gas_compensation, XRD), dec!("0.005"));
        assert_eq!(get(&values.coll_to_redistribute, XRD), dec!("0.995"));
        assert_eq!(get(&values.coll_to_send_to_sp, XRD), Decimal::ZERO);
        assert_eq!(values.debt_to_offset, Decimal::ZERO);
        assert_eq!(values.total_debt_to_redistribute(), dec!(100));
        assert_eq!(values.debt_gas_compensation, dec!(10));
    }

    #[test]
    fn offset_then_redistribute_remainder() {
        let parameters = ProtocolParameters::default();
        let prices = table(&[(XRD, dec!(100))]);
        let trove = colls(&[(XRD, Decimal::ONE)]);
        let values = liquidation_values(
            LiquidationKind::Standard,
            &trove,
            dec!(100),
            Decimal::ONE,
            dec!(40),
            &prices,
            &parameters,
        );
        assert_eq!(values.debt_to_offset, dec!(40));
        assert_eq!(get(&values.coll_to_send_to_sp, XRD), dec!("0.398"));
        assert_eq!(get(&values.coll_to_redistribute, XRD), dec!("0.597"));
        assert_eq!(values.total_debt_to_redistribute(), dec!(60));
    }

    #[test]
    fn capped_liquidation_leaves_surplus() {
        let parameters = ProtocolParameters::default();
        let prices = table(&[(XRD, dec!(1))]);
        let trove = colls(&[(XRD, dec!(120))]);
        let values = liquidation_values(
            LiquidationKind::Capped,
            &trove,
            dec!(100),
            dec!("1.2"),
            dec!(1000),
            &prices,
            &parameters,
        );
        assert_eq!(values.debt_to_offset, dec!(100));
        assert_eq!(get(&values.coll_gas_compensation, XRD), dec!("0.55"));
        assert_eq!(get(&values.coll_to_send_to_sp, XRD), dec!("109.45"));
        assert_eq!(get(&values.coll_surplus, XRD), dec!(10));
        assert!(values.debt_to_redistribute.is_empty());
    }

    #[test]
    fn debt_split_follows_weighted_value() {
        let prices = table(&[(XRD, dec!(1)), (OTHER, dec!(3))]);
        let trove = colls(&[(XRD, dec!(100)), (OTHER, dec!(100))]);
        let split = split_debt_by_value(dec!(100), &trove, &prices);
        assert_eq!(get(&split, XRD), dec!(25));
        assert_eq!(get(&split, OTHER), dec!(75));
    }

    #[test]
    fn debt_split_without_prices_is_equal() {
        let prices = table(&[]);
        let trove = colls(&[(XRD, dec!(5)), (OTHER, dec!(1))]);
        let split = split_debt_by_value(dec!(10), &trove, &prices);
        assert_eq!(get(&split, XRD), dec!(5));
        assert_eq!(get(&split, OTHER), dec!(5));
    }

    #[test]
    fn redistribution_carries_error_forward() {
        let step = redistribution_step(Decimal::ONE, dec!(10), dec!(3), Decimal::ZERO, Decimal::ZERO).unwrap();
        assert_eq!(step.l_coll_increment, dec!("0.333333333333333333"));
        assert_eq!(step.coll_error, dec!("0.000000000000000001"));

        let next = redistribution_step(Decimal::ONE, dec!(10), dec!(3), step.coll_error, step.debt_error).unwrap();
        assert!(next.l_coll_increment >= step.l_coll_increment);
    }

    #[test]
    fn redistribution_needs_stake() {
        assert_eq!(
            redistribution_step(Decimal::ONE, dec!(10), Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            Err(TroveError::CannotRedistribute)
        );
        assert!(redistribution_step(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO).is_ok());
    }

    #[test]
    fn pure_redistribution_only_moves_tcr_by_gas_fraction() {
        let parameters = ProtocolParameters::default();
        let prices = table(&[(XRD, dec!(100))]);
        let trove = colls(&[(XRD, Decimal::ONE)]);
        let mut system = SystemTotals {
            collaterals: colls(&[(XRD, dec!(10))]),
            debt: dec!(500),
        };
        let values = liquidation_values(
            LiquidationKind::Standard,
            &trove,
            dec!(100),
            Decimal::ONE,
            Decimal::ZERO,
            &prices,
            &parameters,
        );
        system.apply(&values);
        assert_eq!(system.debt, dec!(500));
        assert_eq!(system.tcr(&prices), dec!("9.995") * dec!(100) / dec!(500));
    }

    #[test]
    fn offset_does_not_decrease_tcr() {
        let parameters = ProtocolParameters::default();
        let prices = table(&[(XRD, dec!(100))]);
        let trove = colls(&[(XRD, Decimal::ONE)]);
        let mut system = SystemTotals {
            collaterals: colls(&[(XRD, dec!(10))]),
            debt: dec!(500),
        };
        let before = system.tcr(&prices);
        let values = liquidation_values(
            LiquidationKind::Standard,
            &trove,
            dec!(100),
            Decimal::ONE,
            dec!(1000),
            &prices,
            &parameters,
        );
        system.apply(&values);
        assert!(system.tcr(&prices) >= before);
    }

    #[test]
    fn totals_aggregate_batches() {
        let parameters = ProtocolParameters::default();
        let prices = table(&[(XRD, dec!(100))]);
        let trove = colls(&[(XRD, Decimal::ONE)]);
        let values = liquidation_values(
            LiquidationKind::Standard,
            &trove,
            dec!(100),
            Decimal::ONE,
            Decimal::ZERO,
            &prices,
            &parameters,
        );
        let mut totals = LiquidationTotals::new();
        totals.add(&values);
        totals.add(&values);
        assert_eq!(totals.troves_liquidated, 2);
        assert_eq!(totals.liquidated_debt, dec!(200));
        assert_eq!(get(&totals.coll_to_redistribute, XRD), dec!("1.99"));
        assert_eq!(totals.redistributed_kinds(), vec![XRD]);
    }
}
