//! # Stability Pool Blueprint
//!
//! Holds stable deposited by users and absorbs the debt of liquidated troves. In return for the
//! burned stable the pool receives the liquidated collateral, which is shared pro rata among the
//! holders of pool units.
//!
//! Pool units are priced against the pool's full value: the stable balance plus the oracle face
//! value of the collateral held. A depositor joining after a liquidation buys into the collateral
//! at that price instead of diluting earlier depositors. Withdrawals pay out the pool unit's share
//! of every vault.

use crate::errors::*;
use crate::events::*;
use crate::math::face_value;
use crate::shared_structs::*;
use scrypto::prelude::*;

#[blueprint]
#[types(ResourceAddress, Vault)]
#[events(
    StabilityPoolDepositEvent,
    StabilityPoolWithdrawalEvent,
    StabilityPoolOffsetEvent,
)]
mod stability_pool {
    enable_method_auth! {
        methods {
            deposit => PUBLIC;
            withdraw => PUBLIC;
            get_stable_balance => PUBLIC;
            get_pool_info => PUBLIC;
            get_pool_unit_address => PUBLIC;
            offset => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
        }
    }

    struct StabilityPool {
        /// Stable available to absorb liquidated debt.
        stable_vault: FungibleVault,
        /// Pool units represent a share of the stable vault and of every collateral vault.
        pool_unit_manager: ResourceManager,
        /// Collateral received from offsets, keyed by collateral kind.
        collateral_vaults: KeyValueStore<ResourceAddress, Vault>,
        /// Every collateral kind a vault exists for.
        collaterals: Vec<ResourceAddress>,
        oracle: Global<AnyComponent>,
        /// Oracle method returning `(kind, price, safety_ratio)` for a list of kinds.
        oracle_method_name: String,
    }

    impl StabilityPool {
        /// Instantiates the StabilityPool.
        ///
        /// # Arguments
        /// * `stable_address`: The stable resource the pool accepts.
        /// * `controller_badge_address`: Resource of the badge that owns the component. Only the
        ///   owner can offset debt.
        /// * `oracle_address`, `oracle_method_name`: Price source used to value the collateral held.
        pub fn instantiate(
            stable_address: ResourceAddress,
            controller_badge_address: ResourceAddress,
            oracle_address: ComponentAddress,
            oracle_method_name: String,
        ) -> Global<StabilityPool> {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(StabilityPool::blueprint_id());

            let pool_unit_manager: ResourceManager = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require_amount(dec!("0.75"), controller_badge_address)),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "Stability Pool Unit", updatable;
                    "symbol" => "spUNIT", updatable;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .burn_roles(burn_roles!(
                burner => rule!(require(global_caller(component_address)));
                burner_updater => rule!(deny_all);
            ))
            .create_with_no_initial_supply()
            .into();

            Self {
                stable_vault: FungibleVault::new(stable_address),
                pool_unit_manager,
                collateral_vaults: KeyValueStore::new_with_registered_type(),
                collaterals: vec![],
                oracle: Global::from(oracle_address),
                oracle_method_name,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Trove Engine Stability Pool".to_string(), updatable;
                    "description" => "Absorbs the debt of liquidated troves.".to_string(), updatable;
                }
            })
            .globalize()
        }

        /// Deposits stable into the pool in exchange for pool units.
        ///
        /// The first deposit mints pool units 1:1. Later deposits mint
        /// `amount * unit_supply / pool_value`, with the pool valued by [`Self::pool_value`].
        ///
        /// # Panics
        /// * If the bucket does not hold the stable resource or is empty.
        /// * If pool units are outstanding but the pool holds nothing of value.
        pub fn deposit(&mut self, stable: Bucket) -> Bucket {
            assert!(
                stable.resource_address() == self.stable_vault.resource_address(),
                "{}",
                TroveError::InvalidPayment
            );
            let amount = stable.amount();
            assert!(amount > Decimal::ZERO, "{}", TroveError::AmountMustBeNonZero);

            let unit_supply = self.unit_supply();

            let units_to_mint = if unit_supply == Decimal::ZERO {
                amount
            } else {
                let pool_value = self.pool_value();
                assert!(
                    pool_value > Decimal::ZERO,
                    "{}",
                    TroveError::StabilityPoolDepleted
                );
                amount * unit_supply / pool_value
            };

            self.stable_vault.put(stable.as_fungible());
            let pool_units = self.pool_unit_manager.mint(units_to_mint);

            Runtime::emit_event(StabilityPoolDepositEvent {
                stable_amount: amount,
                pool_units_minted: units_to_mint,
            });

            pool_units
        }

        /// Burns pool units and pays out their share of the stable and every collateral vault.
        ///
        /// # Returns
        /// * `(Bucket, Vec<Bucket>)`: The stable share and one bucket per collateral kind held.
        pub fn withdraw(&mut self, pool_units: Bucket) -> (Bucket, Vec<Bucket>) {
            assert!(
                pool_units.resource_address() == self.pool_unit_manager.address(),
                "{}",
                TroveError::InvalidPayment
            );
            let units = pool_units.amount();
            assert!(units > Decimal::ZERO, "{}", TroveError::AmountMustBeNonZero);

            let fraction = units / self.unit_supply();
            pool_units.burn();

            let stable_amount = self.stable_vault.amount() * fraction;
            let stable: Bucket = self
                .stable_vault
                .take_advanced(stable_amount, WithdrawStrategy::Rounded(RoundingMode::ToZero))
                .into();

            let mut collateral_buckets: Vec<Bucket> = vec![];
            let mut collaterals_received: Vec<(ResourceAddress, Decimal)> = vec![];
            for collateral in self.collaterals.iter() {
                let mut vault = self.collateral_vaults.get_mut(collateral).unwrap();
                let amount = vault.amount() * fraction;
                if amount == Decimal::ZERO {
                    continue;
                }
                let bucket = vault.take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero));
                collaterals_received.push((*collateral, bucket.amount()));
                collateral_buckets.push(bucket);
            }

            Runtime::emit_event(StabilityPoolWithdrawalEvent {
                pool_units_burned: units,
                stable_received: stable.amount(),
                collaterals_received,
            });

            (stable, collateral_buckets)
        }

        /// Absorbs liquidated debt: takes `debt` stable out of the pool and keeps the collateral.
        ///
        /// # Returns
        /// * `Bucket`: The stable that must be burned against the debt.
        ///
        /// # Panics
        /// * If the pool holds less stable than `debt`.
        pub fn offset(&mut self, debt: Decimal, collaterals: Vec<Bucket>) -> Bucket {
            assert!(
                debt <= self.stable_vault.amount(),
                "{}",
                TroveError::StabilityPoolDepleted
            );

            let mut collaterals_received: Vec<(ResourceAddress, Decimal)> = vec![];
            for bucket in collaterals {
                let collateral = bucket.resource_address();
                collaterals_received.push((collateral, bucket.amount()));

                if self.collateral_vaults.get(&collateral).is_none() {
                    self.collateral_vaults.insert(collateral, Vault::new(collateral));
                    self.collaterals.push(collateral);
                }
                self.collateral_vaults.get_mut(&collateral).unwrap().put(bucket);
            }

            Runtime::emit_event(StabilityPoolOffsetEvent {
                debt_absorbed: debt,
                collaterals_received,
            });

            self.stable_vault.take(debt).into()
        }

        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, oracle_method_name: String) {
            self.oracle = Global::from(oracle_address);
            self.oracle_method_name = oracle_method_name;
        }

        pub fn get_stable_balance(&self) -> Decimal {
            self.stable_vault.amount()
        }

        pub fn get_pool_unit_address(&self) -> ResourceAddress {
            self.pool_unit_manager.address()
        }

        pub fn get_pool_info(&self) -> StabilityPoolInfoReturn {
            StabilityPoolInfoReturn {
                stable_amount: self.stable_vault.amount(),
                pool_unit_supply: self.unit_supply(),
                collaterals: self
                    .collaterals
                    .iter()
                    .map(|collateral| {
                        (
                            *collateral,
                            self.collateral_vaults.get(collateral).unwrap().amount(),
                        )
                    })
                    .collect(),
            }
        }

        /// Stable balance plus the face value of every collateral vault. Unpriced kinds count as zero.
        fn pool_value(&self) -> Decimal {
            let held: IndexMap<ResourceAddress, Decimal> = self
                .collaterals
                .iter()
                .map(|collateral| {
                    (
                        *collateral,
                        self.collateral_vaults.get(collateral).unwrap().amount(),
                    )
                })
                .filter(|(_, amount)| *amount > Decimal::ZERO)
                .collect();
            if held.is_empty() {
                return self.stable_vault.amount();
            }

            let readings: Vec<(ResourceAddress, Decimal, Decimal)> = self.oracle.call_raw(
                &self.oracle_method_name,
                scrypto_args!(held.keys().cloned().collect::<Vec<ResourceAddress>>()),
            );
            let prices: PriceTable = readings
                .into_iter()
                .map(|(collateral, price, safety_ratio)| (collateral, PriceInfo { price, safety_ratio }))
                .collect();

            self.stable_vault.amount() + face_value(&held, &prices)
        }

        fn unit_supply(&self) -> Decimal {
            self.pool_unit_manager.total_supply().unwrap_or(Decimal::ZERO)
        }
    }
}
