//! Collateralization ratios, stake bookkeeping and the redemption fee model.
//!
//! Everything here is pure: callers pass in the price table, the parameters and the current time,
//! so the same functions back both the blueprint and the read-only hint helpers.

use crate::errors::TroveError;
use crate::shared_structs::*;
use scrypto::prelude::*;
use scrypto_math::*;

pub const SECONDS_IN_ONE_MINUTE: i64 = 60;

/// Upper bound on the minutes fed into the base rate decay (roughly 1000 years).
pub const MAX_DECAY_MINUTES: i64 = 525_600_000;

/// Risk-weighted value of a set of collaterals: the sum of `amount * price * safety_ratio`.
/// Returns `None` when a held kind has no usable price or safety ratio.
pub fn risk_weighted_value(
    collaterals: &IndexMap<ResourceAddress, Decimal>,
    prices: &PriceTable,
) -> Option<Decimal> {
    let mut value = Decimal::ZERO;
    for (kind, amount) in collaterals.iter() {
        if *amount == Decimal::ZERO {
            continue;
        }
        let info = prices.get(kind).copied().unwrap_or(PriceInfo::ZERO);
        if info.price <= Decimal::ZERO || info.safety_ratio <= Decimal::ZERO {
            return None;
        }
        value += *amount * info.price * info.safety_ratio;
    }
    Some(value)
}

/// Risk-weighted value of a single kind, zero if unpriced.
pub fn kind_value(kind: &ResourceAddress, amount: Decimal, prices: &PriceTable) -> Decimal {
    let info = prices.get(kind).copied().unwrap_or(PriceInfo::ZERO);
    amount * info.price * info.safety_ratio
}

/// Oracle face value of a set of collaterals: the sum of `amount * price`, safety ratios ignored.
pub fn face_value(collaterals: &IndexMap<ResourceAddress, Decimal>, prices: &PriceTable) -> Decimal {
    collaterals
        .iter()
        .map(|(kind, amount)| {
            *amount * prices.get(kind).copied().unwrap_or(PriceInfo::ZERO).price
        })
        .fold(Decimal::ZERO, |acc, value| acc + value)
}

/// Collateralization ratio of a trove (or of the whole system for the TCR).
///
/// * `debt == 0` gives `Decimal::MAX`.
/// * Any held kind priced at zero gives zero.
pub fn compute_icr(
    collaterals: &IndexMap<ResourceAddress, Decimal>,
    debt: Decimal,
    prices: &PriceTable,
) -> Decimal {
    if debt <= Decimal::ZERO {
        return Decimal::MAX;
    }
    match risk_weighted_value(collaterals, prices) {
        Some(value) => value / debt,
        None => Decimal::ZERO,
    }
}

/// Nominal collateral ratio: summed collateral amounts per unit of debt, no prices involved.
/// Keys the sorted index. `debt == 0` gives `Decimal::MAX`.
pub fn compute_nominal_cr(collaterals: &IndexMap<ResourceAddress, Decimal>, debt: Decimal) -> Decimal {
    if debt <= Decimal::ZERO {
        return Decimal::MAX;
    }
    collaterals
        .values()
        .fold(Decimal::ZERO, |acc, amount| acc + *amount)
        / debt
}

pub fn is_recovery_mode(tcr: Decimal, ccr: Decimal) -> bool {
    tcr < ccr
}

/// Collateral a trove is owed from redistributions since its snapshot.
pub fn pending_collateral_reward(stake: Decimal, l_coll: Decimal, snapshot: &RewardSnapshot) -> Decimal {
    if stake == Decimal::ZERO || l_coll <= snapshot.l_coll {
        return Decimal::ZERO;
    }
    stake * (l_coll - snapshot.l_coll)
}

/// Debt a trove owes from redistributions since its snapshot.
pub fn pending_debt_reward(stake: Decimal, l_debt: Decimal, snapshot: &RewardSnapshot) -> Decimal {
    if stake == Decimal::ZERO || l_debt <= snapshot.l_debt {
        return Decimal::ZERO;
    }
    stake * (l_debt - snapshot.l_debt)
}

/// Stake for `collateral` of one kind, scaled to the last liquidation epoch so that new stakes
/// keep a proportional claim next to stakes that already absorbed redistributions.
pub fn compute_new_stake(
    collateral: Decimal,
    total_stakes_snapshot: Decimal,
    total_collateral_snapshot: Decimal,
) -> Decimal {
    if total_collateral_snapshot == Decimal::ZERO {
        collateral
    } else {
        collateral * total_stakes_snapshot / total_collateral_snapshot
    }
}

/// Per-minute decay factor giving the configured half-life: `0.5^(1 / half_life_minutes)`.
pub fn minute_decay_factor(half_life_minutes: Decimal) -> Decimal {
    if half_life_minutes <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    dec!("0.5")
        .pow(Decimal::ONE / half_life_minutes)
        .unwrap_or(Decimal::ZERO)
        .min(Decimal::ONE)
}

/// Global redemption/borrowing fee state.
#[derive(ScryptoSbor, PartialEq, Clone, Copy, Debug)]
pub struct FeeState {
    pub base_rate: Decimal,
    /// Seconds since the unix epoch.
    pub last_fee_operation_time: i64,
}

impl FeeState {
    pub fn new(now: i64) -> Self {
        Self {
            base_rate: Decimal::ZERO,
            last_fee_operation_time: now,
        }
    }

    pub fn minutes_passed(&self, now: i64) -> i64 {
        ((now - self.last_fee_operation_time).max(0) / SECONDS_IN_ONE_MINUTE).min(MAX_DECAY_MINUTES)
    }

    pub fn decayed_base_rate(&self, now: i64, parameters: &ProtocolParameters) -> Decimal {
        let minutes = self.minutes_passed(now);
        if minutes == 0 || self.base_rate == Decimal::ZERO {
            return self.base_rate;
        }
        let decay = minute_decay_factor(parameters.base_rate_half_life_minutes)
            .checked_powi(minutes)
            .unwrap_or(Decimal::ZERO);
        self.base_rate * decay
    }

    /// Decays the base rate, then bumps it by the redeemed fraction of the supply.
    /// Returns the new base rate, capped at 100%.
    pub fn update_from_redemption(
        &mut self,
        redeemed: Decimal,
        total_supply: Decimal,
        now: i64,
        parameters: &ProtocolParameters,
    ) -> Decimal {
        let decayed = self.decayed_base_rate(now, parameters);
        let redeemed_fraction = if total_supply > Decimal::ZERO {
            redeemed / total_supply
        } else {
            Decimal::ONE
        };
        let new_base_rate = (decayed + redeemed_fraction * parameters.redemption_spike_k).min(Decimal::ONE);
        self.base_rate = new_base_rate;
        self.update_last_fee_operation_time(now, parameters);
        new_base_rate
    }

    /// Borrowing never raises the base rate, it only applies the decay.
    pub fn decay_from_borrowing(&mut self, now: i64, parameters: &ProtocolParameters) -> Decimal {
        let decayed = self.decayed_base_rate(now, parameters);
        self.base_rate = decayed;
        self.update_last_fee_operation_time(now, parameters);
        decayed
    }

    /// Moves `last_fee_operation_time` to `now`, at most once per fee operation interval.
    pub fn update_last_fee_operation_time(&mut self, now: i64, parameters: &ProtocolParameters) -> bool {
        let interval = parameters.fee_operation_interval_minutes.max(0) * SECONDS_IN_ONE_MINUTE;
        if now - self.last_fee_operation_time >= interval {
            self.last_fee_operation_time = now;
            true
        } else {
            false
        }
    }
}

pub fn redemption_rate(base_rate: Decimal, parameters: &ProtocolParameters) -> Decimal {
    (parameters.redemption_fee_floor + base_rate).min(Decimal::ONE)
}

pub fn borrowing_rate(base_rate: Decimal, parameters: &ProtocolParameters) -> Decimal {
    (parameters.redemption_fee_floor + base_rate).min(parameters.max_borrowing_fee)
}

/// Bounds the caller's fee cap. Borrowing in recovery mode carries no fee, so only the upper bound
/// applies there.
pub fn check_max_fee_percentage(
    max_fee_percentage: Decimal,
    parameters: &ProtocolParameters,
    recovery_mode: bool,
) -> Result<(), TroveError> {
    let lower = if recovery_mode {
        Decimal::ZERO
    } else {
        parameters.redemption_fee_floor
    };
    if max_fee_percentage < lower || max_fee_percentage > Decimal::ONE {
        return Err(TroveError::MaxFeeOutOfBounds);
    }
    Ok(())
}

pub fn check_fee_within_max(fee_rate: Decimal, max_fee_percentage: Decimal) -> Result<(), TroveError> {
    if fee_rate > max_fee_percentage {
        return Err(TroveError::FeeExceedsMax);
    }
    Ok(())
}

/// Splits the redemption fee over the drawn collateral, kind by kind.
pub fn redemption_fees(
    fee_rate: Decimal,
    drawn: &IndexMap<ResourceAddress, Decimal>,
) -> Result<IndexMap<ResourceAddress, Decimal>, TroveError> {
    if fee_rate >= Decimal::ONE && drawn.values().any(|amount| *amount > Decimal::ZERO) {
        return Err(TroveError::FeeExceedsCollateralDrawn);
    }
    Ok(drawn
        .iter()
        .map(|(kind, amount)| (*kind, *amount * fee_rate))
        .collect())
}

/// Adds `amount` of `kind` to a collateral map.
pub fn add_to(map: &mut IndexMap<ResourceAddress, Decimal>, kind: ResourceAddress, amount: Decimal) {
    if amount == Decimal::ZERO {
        return;
    }
    match map.get_mut(&kind) {
        Some(existing) => *existing += amount,
        None => {
            map.insert(kind, amount);
        }
    }
}

/// Subtracts `amount` of `kind` from a collateral map, clamping at zero.
pub fn subtract_from(map: &mut IndexMap<ResourceAddress, Decimal>, kind: ResourceAddress, amount: Decimal) {
    if let Some(existing) = map.get_mut(&kind) {
        *existing = (*existing - amount).max(Decimal::ZERO);
    }
}
