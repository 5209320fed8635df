//! Redemption accounting for a single trove.
//!
//! A redeemer swaps stable for collateral at oracle face value. The lot taken from a trove never
//! touches its gas compensation reserve: a trove whose debt falls exactly to the reserve is fully
//! redeemed, and a partial redemption that would leave the net debt under the minimum is cancelled.

use crate::math::*;
use crate::shared_structs::*;
use scrypto::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// The trove's whole net debt was redeemed, the trove closes and leftovers become surplus.
    Full,
    /// Part of the net debt was redeemed, the trove stays open.
    Partial,
    /// The partial lot would leave the trove under the minimum net debt. Nothing was taken.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleRedemption {
    pub outcome: RedemptionOutcome,
    /// Stable debt cancelled by this redemption.
    pub debt_lot: Decimal,
    /// Collateral handed to the redeemer (before fees), per kind.
    pub drawn: IndexMap<ResourceAddress, Decimal>,
    pub new_debt: Decimal,
    /// Collateral left in the trove. On a full redemption this is the owner's surplus.
    pub remaining_collaterals: IndexMap<ResourceAddress, Decimal>,
}

impl SingleRedemption {
    fn cancelled(collaterals: &IndexMap<ResourceAddress, Decimal>, debt: Decimal) -> Self {
        Self {
            outcome: RedemptionOutcome::Cancelled,
            debt_lot: Decimal::ZERO,
            drawn: IndexMap::default(),
            new_debt: debt,
            remaining_collaterals: collaterals.clone(),
        }
    }
}

/// Redeems up to `remaining` stable against a trove whose pending rewards are already folded in.
pub fn redeem_from_trove(
    collaterals: &IndexMap<ResourceAddress, Decimal>,
    debt: Decimal,
    remaining: Decimal,
    prices: &PriceTable,
    parameters: &ProtocolParameters,
) -> SingleRedemption {
    let net_debt = (debt - parameters.gas_compensation_debt).max(Decimal::ZERO);
    let debt_lot = remaining.min(net_debt);
    let value = face_value(collaterals, prices);

    if debt_lot <= Decimal::ZERO || value <= Decimal::ZERO {
        return SingleRedemption::cancelled(collaterals, debt);
    }

    let new_debt = debt - debt_lot;
    let outcome = if new_debt == parameters.gas_compensation_debt {
        RedemptionOutcome::Full
    } else if new_debt - parameters.gas_compensation_debt < parameters.min_net_debt {
        return SingleRedemption::cancelled(collaterals, debt);
    } else {
        RedemptionOutcome::Partial
    };

    let mut drawn: IndexMap<ResourceAddress, Decimal> = IndexMap::default();
    let mut remaining_collaterals: IndexMap<ResourceAddress, Decimal> = IndexMap::default();
    for (kind, amount) in collaterals.iter() {
        let taken = (*amount * debt_lot / value).min(*amount);
        add_to(&mut drawn, *kind, taken);
        remaining_collaterals.insert(*kind, *amount - taken);
    }

    SingleRedemption {
        outcome,
        debt_lot,
        drawn,
        new_debt,
        remaining_collaterals,
    }
}

/// The lot a redemption walk would take from a trove, for off-ledger hint computation.
/// Returns the lot and whether it closes the trove.
pub fn hint_lot(debt: Decimal, remaining: Decimal, parameters: &ProtocolParameters) -> (Decimal, bool) {
    let net_debt = (debt - parameters.gas_compensation_debt).max(Decimal::ZERO);
    if remaining >= net_debt {
        (net_debt, true)
    } else {
        (
            remaining
                .min(net_debt - parameters.min_net_debt)
                .max(Decimal::ZERO),
            false,
        )
    }
}
