//! # Trove Engine shared structs
//! Structs used by the trove manager, the pure accounting modules and the test harness.

use scrypto::prelude::*;

/// Lifecycle of a trove record. Closed records keep their slot but are zeroed.
#[derive(ScryptoSbor, PartialEq, Eq, Clone, Copy, Debug)]
pub enum TroveStatus {
    NonExistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

/// Accumulator values recorded for one collateral kind at a trove's last touch.
#[derive(ScryptoSbor, PartialEq, Clone, Copy, Debug)]
pub struct RewardSnapshot {
    pub l_coll: Decimal,
    pub l_debt: Decimal,
}

impl RewardSnapshot {
    pub fn zero() -> Self {
        Self {
            l_coll: Decimal::ZERO,
            l_debt: Decimal::ZERO,
        }
    }
}

/// A trove's raw ledger record. Pending redistribution rewards are not included until the trove
/// is touched.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct Trove {
    pub status: TroveStatus,
    /// Collateral amounts per kind, in deposit order. Kinds are unique.
    pub collaterals: IndexMap<ResourceAddress, Decimal>,
    /// Stable debt, including the gas compensation reserve.
    pub debt: Decimal,
    /// Reward-distribution weight per kind.
    pub stakes: IndexMap<ResourceAddress, Decimal>,
    pub reward_snapshots: IndexMap<ResourceAddress, RewardSnapshot>,
    /// Slot in the owners array.
    pub array_index: u64,
}

impl Trove {
    pub fn stake(&self, kind: &ResourceAddress) -> Decimal {
        self.stakes.get(kind).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn collateral(&self, kind: &ResourceAddress) -> Decimal {
        self.collaterals.get(kind).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Data of the receipt NFT handed to a trove's owner. The NFT's local id is the trove key.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug)]
pub struct TroveReceipt {
    /// Image of the NFT
    #[mutable]
    pub key_image_url: Url,
    /// Moment the trove was opened.
    pub opened_at: Instant,
}

/// Oracle reading for one collateral kind.
#[derive(ScryptoSbor, PartialEq, Clone, Copy, Debug)]
pub struct PriceInfo {
    /// Stable-denominated price of one unit of collateral.
    pub price: Decimal,
    /// Risk weight applied to the collateral's value in collateralization ratios.
    pub safety_ratio: Decimal,
}

impl PriceInfo {
    pub const ZERO: PriceInfo = PriceInfo {
        price: Decimal::ZERO,
        safety_ratio: Decimal::ZERO,
    };
}

/// Prices for every registered kind, read once per operation.
pub type PriceTable = IndexMap<ResourceAddress, PriceInfo>;

/// Configurable protocol parameters.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct ProtocolParameters {
    pub mcr: Decimal,
    pub ccr: Decimal,
    /// Fraction of a liquidated trove's collateral paid to the liquidator.
    pub liquidation_gas_compensation: Decimal,
    /// Stable reserved per trove and paid to the liquidator.
    pub gas_compensation_debt: Decimal,
    pub min_net_debt: Decimal,
    pub redemption_fee_floor: Decimal,
    pub max_borrowing_fee: Decimal,
    /// Base rate increase per unit of redeemed supply fraction.
    pub redemption_spike_k: Decimal,
    pub base_rate_half_life_minutes: Decimal,
    pub fee_operation_interval_minutes: i64,
    /// In recovery mode, troves with an ICR above the TCR cannot be liquidated.
    pub recovery_mode_immunity: bool,
    /// In recovery mode, troves with MCR <= ICR < TCR are liquidated with collateral capped at MCR * debt.
    pub recovery_mode_capped_liquidation: bool,
    pub stop_liquidations: bool,
    pub stop_redemptions: bool,
    pub stop_openings: bool,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            mcr: dec!("1.1"),
            ccr: dec!("1.5"),
            liquidation_gas_compensation: dec!("0.005"),
            gas_compensation_debt: dec!(10),
            min_net_debt: dec!(90),
            redemption_fee_floor: dec!("0.005"),
            max_borrowing_fee: dec!("0.05"),
            redemption_spike_k: dec!("0.5"),
            base_rate_half_life_minutes: dec!(720),
            fee_operation_interval_minutes: 1,
            recovery_mode_immunity: true,
            recovery_mode_capped_liquidation: true,
            stop_liquidations: false,
            stop_redemptions: false,
            stop_openings: false,
        }
    }
}

/// A summarized view of a trove, including pending rewards.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct TroveInfoReturn {
    pub trove_id: NonFungibleLocalId,
    pub status: TroveStatus,
    /// Collateral including pending redistribution rewards.
    pub collaterals: Vec<(ResourceAddress, Decimal)>,
    /// Debt including pending redistributed debt.
    pub debt: Decimal,
    pub pending_collaterals: Vec<(ResourceAddress, Decimal)>,
    pub pending_debt: Decimal,
    pub stakes: Vec<(ResourceAddress, Decimal)>,
    pub icr: Decimal,
    pub array_index: u64,
}

/// A summarized view of a collateral kind's state.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct CollateralInfoReturn {
    pub resource_address: ResourceAddress,
    pub accepted: bool,
    /// Collateral backing active troves.
    pub active_amount: Decimal,
    /// Redistributed collateral not yet pulled into troves.
    pub default_amount: Decimal,
    /// Collateral claimable by owners of closed troves.
    pub surplus_amount: Decimal,
    pub l_coll: Decimal,
    pub l_debt: Decimal,
    pub total_stakes: Decimal,
    pub total_stakes_snapshot: Decimal,
    pub total_collateral_snapshot: Decimal,
    pub price: Decimal,
    pub safety_ratio: Decimal,
}

/// A summarized view of the whole system.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct SystemInfoReturn {
    pub active_debt: Decimal,
    pub default_debt: Decimal,
    pub total_collaterals: Vec<(ResourceAddress, Decimal)>,
    pub tcr: Decimal,
    pub recovery_mode: bool,
    pub base_rate: Decimal,
    pub last_fee_operation_time: i64,
    pub trove_owners_count: u64,
    pub sorted_troves_size: u64,
    pub circulating_stable: Decimal,
    pub gas_reserve: Decimal,
}

/// State of the stability pool.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct StabilityPoolInfoReturn {
    pub stable_amount: Decimal,
    pub pool_unit_supply: Decimal,
    pub collaterals: Vec<(ResourceAddress, Decimal)>,
}
