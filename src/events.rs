//! Defines events emitted by the trove engine components.

use scrypto::prelude::*;
use crate::shared_structs::*;

/// The operation that caused a trove update.
#[derive(ScryptoSbor, PartialEq, Clone, Copy, Debug)]
pub enum TroveOperation {
    OpenTrove,
    AdjustTrove,
    CloseTrove,
    ApplyPendingRewards,
    LiquidateInNormalMode,
    LiquidateInRecoveryMode,
    RedeemCollateral,
}

/// Event emitted when a trove is opened.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventNewTrove {
    /// The `NonFungibleLocalId` of the receipt identifying the trove.
    pub trove_id: NonFungibleLocalId,
    /// The slot the trove occupies in the owners array.
    pub array_index: u64,
}

/// Event emitted when a trove's collateral, debt or stake changes.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventUpdateTrove {
    pub trove_id: NonFungibleLocalId,
    pub collaterals: Vec<(ResourceAddress, Decimal)>,
    pub debt: Decimal,
    pub stakes: Vec<(ResourceAddress, Decimal)>,
    pub operation: TroveOperation,
}

/// Event emitted for every trove closed by liquidation.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidateTrove {
    pub trove_id: NonFungibleLocalId,
    /// Debt of the trove at liquidation, pending rewards included.
    pub debt: Decimal,
    pub collaterals: Vec<(ResourceAddress, Decimal)>,
    pub operation: TroveOperation,
}

/// Event emitted once per (batch) liquidation call with the aggregated amounts.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidation {
    pub troves_liquidated: u64,
    pub liquidated_debt: Decimal,
    pub liquidated_collaterals: Vec<(ResourceAddress, Decimal)>,
    /// Debt absorbed by the stability pool.
    pub debt_offset: Decimal,
    /// Debt spread over the remaining troves.
    pub debt_redistributed: Decimal,
    pub coll_gas_compensation: Vec<(ResourceAddress, Decimal)>,
    pub debt_gas_compensation: Decimal,
}

/// Event emitted when the redistribution accumulators of a collateral kind move.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedistribution {
    pub collateral: ResourceAddress,
    pub l_coll: Decimal,
    pub l_debt: Decimal,
}

/// Event emitted when a new stake epoch starts for a collateral kind.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventSystemSnapshots {
    pub collateral: ResourceAddress,
    pub total_stakes_snapshot: Decimal,
    pub total_collateral_snapshot: Decimal,
}

/// Event emitted when the total stake of a collateral kind changes.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventTotalStakesUpdated {
    pub collateral: ResourceAddress,
    pub total_stakes: Decimal,
}

/// Event emitted once per redemption call.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedemption {
    /// Stable amount the redeemer asked to redeem.
    pub attempted_amount: Decimal,
    /// Stable amount actually burned.
    pub actual_amount: Decimal,
    /// Collateral drawn from troves, fees included.
    pub collaterals_drawn: Vec<(ResourceAddress, Decimal)>,
    /// Collateral sent to the fee pool.
    pub fees: Vec<(ResourceAddress, Decimal)>,
    pub troves_redeemed: u64,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventBaseRateUpdated {
    pub base_rate: Decimal,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLastFeeOpTimeUpdated {
    pub last_fee_operation_time: i64,
}

/// Event emitted when a borrowing fee is charged.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventBorrowingFeePaid {
    pub trove_id: NonFungibleLocalId,
    pub fee: Decimal,
}

/// Event emitted when collateral becomes claimable by the owner of a closed trove.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventCollSurplusCredited {
    pub trove_id: NonFungibleLocalId,
    pub collaterals: Vec<(ResourceAddress, Decimal)>,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventCollSurplusClaimed {
    pub trove_id: NonFungibleLocalId,
    pub collaterals: Vec<(ResourceAddress, Decimal)>,
}

/// Event emitted when a new collateral kind is registered.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventAddCollateral {
    pub address: ResourceAddress,
}

/// Event emitted when a collateral kind is (de)activated for new deposits.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventChangeCollateral {
    pub address: ResourceAddress,
    pub accepted: bool,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventParametersChanged {
    pub parameters: ProtocolParameters,
}

/// Event emitted when stable is deposited into the stability pool
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct StabilityPoolDepositEvent {
    /// The amount of stable deposited
    pub stable_amount: Decimal,
    /// The amount of pool units received
    pub pool_units_minted: Decimal,
}

/// Event emitted when a depositor leaves the stability pool
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct StabilityPoolWithdrawalEvent {
    /// The amount of pool units burned
    pub pool_units_burned: Decimal,
    /// The amount of stable received
    pub stable_received: Decimal,
    /// The collateral gains received
    pub collaterals_received: Vec<(ResourceAddress, Decimal)>,
}

/// Event emitted when the stability pool absorbs liquidated debt
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct StabilityPoolOffsetEvent {
    pub debt_absorbed: Decimal,
    pub collaterals_received: Vec<(ResourceAddress, Decimal)>,
}

/// Event emitted when fees reach the fee pool
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct FeePoolDepositEvent {
    pub fees: Vec<(ResourceAddress, Decimal)>,
}

/// Event emitted when the owner takes fees out of the fee pool
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct FeePoolWithdrawalEvent {
    pub resource: ResourceAddress,
    pub amount: Decimal,
}
