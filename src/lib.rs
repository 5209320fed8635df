//! # Trove Engine Crate
//!
//! This crate contains the Scrypto blueprints of a multi-collateral trove engine: borrowers lock one or
//! more collateral kinds in troves and mint a stable against them. Undercollateralized troves are
//! liquidated against a stability pool, with any rest redistributed to the remaining troves, and stable
//! holders can redeem stable for collateral at face value.
//!
//! ## Modules
//!
//! - `trove_manager`: Defines the main `TroveManager` component, which keeps the trove ledger, the sorted
//!   trove list, the per-kind collateral pools and redistribution accumulators, and runs liquidations,
//!   redemptions and borrower operations.
//! - `stability_pool`: Implements the `StabilityPool` component, which absorbs liquidated debt in exchange
//!   for the liquidated collateral, shared among pool unit holders.
//! - `fee_pool`: Implements the `FeePool` component, holding borrowing and redemption fees.
//! - `sorted_troves`: The ICR-ordered index of active troves.
//! - `liquidation`, `redemption`, `math`: Pure accounting used by the `TroveManager`.
//! - `events`: Defines the events emitted by the components.
//! - `errors`: Failure reasons shared by all modules.
//! - `shared_structs`: Contains data structures shared across multiple components, such as `Trove`,
//!   `ProtocolParameters` and the info structs returned by getters.

pub mod errors;
pub mod events;
pub mod fee_pool;
pub mod liquidation;
pub mod math;
pub mod redemption;
pub mod shared_structs;
pub mod sorted_troves;
pub mod stability_pool;
pub mod trove_manager;
