//! # Trove Manager Blueprint
//!
//! The `TroveManager` component keeps the ledger of troves: collateralized debt positions that can
//! hold several collateral kinds against one stable debt. It owns the stable resource and the trove
//! receipt NFTs, and mirrors the protocol's collateral pools with one set of vaults per kind:
//!
//! - **Active**: collateral backing active troves.
//! - **Default**: redistributed collateral that troves have not pulled in yet.
//! - **Surplus**: collateral owed to owners of troves closed by redemption or capped liquidation.
//!
//! ## Functionality
//! - **Liquidations:** single and batch liquidation of troves under the MCR (or, in recovery mode,
//!   under the TCR). Debt is offset against the `StabilityPool` as far as it reaches, the rest is
//!   redistributed to the remaining troves pro rata to their stake, per collateral kind.
//! - **Redemptions:** stable is swapped for collateral at face value, walking troves from the lowest
//!   ICR upwards. A decaying base rate sets the fee, which goes to the `FeePool`.
//! - **Borrower operations:** open, adjust and close troves, claim collateral surplus.
//!
//! Prices and safety ratios are read from the oracle once per operation.

use crate::errors::*;
use crate::events::*;
use crate::fee_pool::fee_pool::FeePool;
use crate::liquidation::*;
use crate::math::*;
use crate::redemption::*;
use crate::shared_structs::*;
use crate::sorted_troves::SortedTroves;
use crate::stability_pool::stability_pool::StabilityPool;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

#[blueprint]
#[types(ResourceAddress, CollateralInfo, Decimal, AvlTree<Decimal, Vec<NonFungibleLocalId>>, Vec<NonFungibleLocalId>, NonFungibleLocalId, u64, Trove, TroveReceipt, CollSurplus)]
#[events(
    EventNewTrove,
    EventUpdateTrove,
    EventLiquidateTrove,
    EventLiquidation,
    EventRedistribution,
    EventSystemSnapshots,
    EventTotalStakesUpdated,
    EventRedemption,
    EventBaseRateUpdated,
    EventLastFeeOpTimeUpdated,
    EventBorrowingFeePaid,
    EventCollSurplusCredited,
    EventCollSurplusClaimed,
    EventAddCollateral,
    EventChangeCollateral,
    EventParametersChanged,
)]
mod trove_manager {
    enable_method_auth! {
        methods {
            open_trove => PUBLIC;
            add_collateral => PUBLIC;
            withdraw_collateral => PUBLIC;
            borrow_stable => PUBLIC;
            repay_stable => PUBLIC;
            close_trove => PUBLIC;
            claim_coll_surplus => PUBLIC;
            liquidate => PUBLIC;
            batch_liquidate => PUBLIC;
            redeem => PUBLIC;
            get_trove_info => PUBLIC;
            get_entire_debt_and_coll => PUBLIC;
            get_icr => PUBLIC;
            get_tcr => PUBLIC;
            check_recovery_mode => PUBLIC;
            get_trove_status => PUBLIC;
            get_trove_stake => PUBLIC;
            get_trove_debt => PUBLIC;
            get_trove_owners => PUBLIC;
            get_trove_owners_count => PUBLIC;
            get_sorted_troves => PUBLIC;
            sorted_troves_contains => PUBLIC;
            find_insert_position => PUBLIC;
            get_collateral_infos => PUBLIC;
            get_system_info => PUBLIC;
            get_redemption_rate => PUBLIC;
            get_borrowing_rate => PUBLIC;
            get_redemption_hints => PUBLIC;
            get_coll_surplus => PUBLIC;
            get_stable_address => PUBLIC;
            get_receipt_address => PUBLIC;
            get_parameters => PUBLIC;
            new_collateral => restrict_to: [OWNER];
            edit_collateral => restrict_to: [OWNER];
            set_parameters => restrict_to: [OWNER];
            set_stops => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
        }
    }

    struct TroveManager {
        /// Controller badges authorizing calls to the stability pool and the fee pool.
        badge_vault: FungibleVault,
        stable_manager: ResourceManager,
        /// Manager of the trove receipt NFTs. A receipt's local id is the trove key.
        receipt_manager: ResourceManager,
        oracle: Global<AnyComponent>,
        /// Oracle method returning `(kind, price, safety_ratio)` for a list of kinds.
        oracle_method_name: String,
        stability_pool: Global<StabilityPool>,
        fee_pool: Global<FeePool>,
        /// Ledger state per collateral kind, vaults included.
        collaterals: KeyValueStore<ResourceAddress, CollateralInfo>,
        /// Registered collateral kinds, in registration order.
        collateral_list: Vec<ResourceAddress>,
        troves: KeyValueStore<NonFungibleLocalId, Trove>,
        /// Dense array of active troves, indexed by `Trove::array_index`.
        trove_owners: KeyValueStore<u64, NonFungibleLocalId>,
        trove_owners_count: u64,
        sorted_troves: SortedTroves,
        /// Collateral claimable by owners of closed troves.
        coll_surplus: KeyValueStore<NonFungibleLocalId, CollSurplus>,
        /// Stable minted per trove to pay liquidators.
        gas_reserve: FungibleVault,
        /// Debt recorded on troves.
        active_debt: Decimal,
        /// Redistributed debt not yet pulled into troves.
        default_debt: Decimal,
        circulating_stable: Decimal,
        fee_state: FeeState,
        parameters: ProtocolParameters,
        trove_counter: u64,
    }

    impl TroveManager {
        /// Instantiates the TroveManager together with its StabilityPool and FeePool.
        ///
        /// # Arguments
        /// * `oracle_address`: Component providing prices and safety ratios.
        /// * `oracle_method_name`: Method called on the oracle with the list of registered kinds.
        ///
        /// # Returns
        /// * The TroveManager, the StabilityPool and FeePool addresses, and admin controller badges.
        pub fn instantiate(
            oracle_address: ComponentAddress,
            oracle_method_name: String,
        ) -> (Global<TroveManager>, ComponentAddress, ComponentAddress, Bucket) {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(TroveManager::blueprint_id());

            let mut controller_badge: Bucket = ResourceBuilder::new_fungible(OwnerRole::Fixed(rule!(
                require(global_caller(component_address))
            )))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "controller badge trove engine", locked;
                    "symbol" => "troveCTRL", locked;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .mint_initial_supply(10)
            .into();

            let badge_address = controller_badge.resource_address();

            let stable_manager: ResourceManager = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(badge_address)),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "Trove Stable", updatable;
                    "symbol" => "TSD", updatable;
                    "tags" => vec!["stablecoin", "defi"], updatable;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address))
                || require_amount(
                    dec!("0.75"),
                    badge_address
                ));
                minter_updater => rule!(require_amount(
                    dec!("0.75"),
                    badge_address
                ));
            ))
            .burn_roles(burn_roles!(
                burner => rule!(require(global_caller(component_address))
                || require_amount(
                    dec!("0.75"),
                    badge_address
                ));
                burner_updater => rule!(require_amount(
                    dec!("0.75"),
                    badge_address
                ));
            ))
            .create_with_no_initial_supply()
            .into();

            let receipt_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<TroveReceipt>(OwnerRole::Fixed(rule!(
                    require_amount(dec!("0.75"), badge_address)
                )))
                .metadata(metadata!(
                    init {
                        "name" => "Trove Receipt", locked;
                        "symbol" => "TROVE", locked;
                        "description" => "A receipt for your trove.", locked;
                    }
                ))
                .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                    non_fungible_data_updater => rule!(require(global_caller(component_address))
                        || require_amount(
                            dec!("0.75"),
                            badge_address
                        ));
                    non_fungible_data_updater_updater => rule!(require_amount(
                        dec!("0.75"),
                        badge_address
                    ));
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address))
                    || require_amount(
                        dec!("0.75"),
                        badge_address
                    ));
                    minter_updater => rule!(require_amount(
                        dec!("0.75"),
                        badge_address
                    ));
                ))
                .create_with_no_initial_supply()
                .into();

            let stability_pool = StabilityPool::instantiate(
                stable_manager.address(),
                badge_address,
                oracle_address,
                oracle_method_name.clone(),
            );
            let fee_pool = FeePool::instantiate(badge_address);
            let admin_badge = controller_badge.take(5);

            let component = Self {
                badge_vault: FungibleVault::with_bucket(controller_badge.as_fungible()),
                stable_manager,
                receipt_manager,
                oracle: Global::from(oracle_address),
                oracle_method_name,
                stability_pool,
                fee_pool,
                collaterals: KeyValueStore::new_with_registered_type(),
                collateral_list: vec![],
                troves: KeyValueStore::new_with_registered_type(),
                trove_owners: KeyValueStore::new_with_registered_type(),
                trove_owners_count: 0,
                sorted_troves: SortedTroves::new(KeyValueStore::new_with_registered_type()),
                coll_surplus: KeyValueStore::new_with_registered_type(),
                gas_reserve: FungibleVault::new(stable_manager.address()),
                active_debt: Decimal::ZERO,
                default_debt: Decimal::ZERO,
                circulating_stable: Decimal::ZERO,
                fee_state: FeeState::new(now()),
                parameters: ProtocolParameters::default(),
                trove_counter: 0,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Trove Manager".to_string(), updatable;
                    "description" => "Liquidation and redemption engine for multi-collateral troves.".to_string(), updatable;
                }
            })
            .globalize();

            (component, stability_pool.address(), fee_pool.address(), admin_badge)
        }

        // ------------------------------------------------------------------
        // Borrower operations
        // ------------------------------------------------------------------

        /// Opens a trove.
        ///
        /// The composite debt is `stable_amount + borrowing fee + gas compensation`. The gas
        /// compensation is kept in the reserve, the fee goes to the fee pool.
        ///
        /// # Arguments
        /// * `collaterals`: One bucket per collateral kind, kinds unique and accepted.
        /// * `stable_amount`: Stable received by the borrower.
        /// * `max_fee_percentage`: Highest borrowing fee rate the borrower accepts.
        /// * `upper_hint`, `lower_hint`: Expected neighbours in the sorted list.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The borrowed stable and the trove receipt.
        pub fn open_trove(
            &mut self,
            collaterals: Vec<Bucket>,
            stable_amount: Decimal,
            max_fee_percentage: Decimal,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) -> (Bucket, Bucket) {
            assert!(!self.parameters.stop_openings, "{}", TroveError::OperationStopped);

            let prices = self.get_prices();
            let recovery_mode = self.recovery_mode(&prices);
            check_max_fee_percentage(max_fee_percentage, &self.parameters, recovery_mode).or_abort();
            let deposits = self.collect_deposits(&collaterals);

            self.trove_counter += 1;
            let trove_id = NonFungibleLocalId::integer(self.trove_counter);

            let fee = if recovery_mode {
                Decimal::ZERO
            } else {
                self.trigger_borrowing_fee(&trove_id, stable_amount, max_fee_percentage)
            };
            let net_debt = stable_amount + fee;
            assert!(
                net_debt >= self.parameters.min_net_debt,
                "{}",
                TroveError::NetDebtBelowMinimum
            );
            let composite_debt = net_debt + self.parameters.gas_compensation_debt;

            let icr = compute_icr(&deposits, composite_debt, &prices);
            if recovery_mode {
                assert!(icr >= self.parameters.ccr, "{}", TroveError::IcrBelowCcr);
            } else {
                assert!(icr >= self.parameters.mcr, "{}", TroveError::IcrBelowMcr);
            }

            self.deposit_collaterals(collaterals);
            let mut trove = Trove {
                status: TroveStatus::Active,
                collaterals: deposits,
                debt: composite_debt,
                stakes: IndexMap::default(),
                reward_snapshots: IndexMap::default(),
                array_index: 0,
            };
            self.update_reward_snapshots(&mut trove);
            self.update_stakes(&mut trove);
            trove.array_index = self.add_trove_owner(trove_id.clone());
            self.insert_sorted(
                trove_id.clone(),
                compute_nominal_cr(&trove.collaterals, trove.debt),
                upper_hint,
                lower_hint,
            );
            self.troves.insert(trove_id.clone(), trove.clone());
            self.active_debt += composite_debt;

            let mut stable = self.mint_stable(composite_debt);
            self.gas_reserve
                .put(stable.take(self.parameters.gas_compensation_debt).as_fungible());
            if fee > Decimal::ZERO {
                let fee_bucket = stable.take(fee);
                self.deposit_fees(vec![fee_bucket]);
            }

            if !recovery_mode {
                assert!(
                    self.tcr(&prices) >= self.parameters.ccr,
                    "{}",
                    TroveError::TcrBelowCcr
                );
            }

            let receipt = self.receipt_manager.mint_non_fungible(
                &trove_id,
                TroveReceipt {
                    key_image_url: Url::of("https://trove.engine/receipt.png"),
                    opened_at: Clock::current_time_rounded_to_seconds(),
                },
            );

            Runtime::emit_event(EventNewTrove {
                trove_id: trove_id.clone(),
                array_index: trove.array_index,
            });
            self.emit_trove_update(&trove_id, &trove, TroveOperation::OpenTrove);

            (stable, receipt)
        }

        /// Adds collateral to a trove.
        pub fn add_collateral(
            &mut self,
            receipt_proof: NonFungibleProof,
            collaterals: Vec<Bucket>,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) {
            let trove_id = self.check_receipt(receipt_proof);
            let mut trove = self.active_trove(&trove_id);
            let prices = self.get_prices();
            let recovery_mode = self.recovery_mode(&prices);
            let deposits = self.collect_deposits(&collaterals);

            self.touch(&trove_id, &mut trove);
            let old_icr = compute_icr(&trove.collaterals, trove.debt, &prices);

            self.deposit_collaterals(collaterals);
            merge(&mut trove.collaterals, &deposits);

            self.finish_adjustment(
                &trove_id,
                trove,
                Adjustment {
                    old_icr,
                    recovery_mode,
                    is_coll_withdrawal: false,
                    is_debt_increase: false,
                },
                &prices,
                upper_hint,
                lower_hint,
            );
        }

        /// Withdraws collateral of one kind from a trove. Not allowed in recovery mode.
        pub fn withdraw_collateral(
            &mut self,
            receipt_proof: NonFungibleProof,
            collateral: ResourceAddress,
            amount: Decimal,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) -> Bucket {
            let trove_id = self.check_receipt(receipt_proof);
            let mut trove = self.active_trove(&trove_id);
            let prices = self.get_prices();
            let recovery_mode = self.recovery_mode(&prices);
            assert!(
                !recovery_mode,
                "{}",
                TroveError::CollateralWithdrawalInRecoveryMode
            );
            assert!(amount > Decimal::ZERO, "{}", TroveError::AmountMustBeNonZero);

            self.touch(&trove_id, &mut trove);
            let old_icr = compute_icr(&trove.collaterals, trove.debt, &prices);

            assert!(
                trove.collateral(&collateral) >= amount,
                "{}",
                TroveError::InsufficientBalance
            );
            subtract_from(&mut trove.collaterals, collateral, amount);
            let withdrawn = self.take_active(&collateral, amount);

            self.finish_adjustment(
                &trove_id,
                trove,
                Adjustment {
                    old_icr,
                    recovery_mode,
                    is_coll_withdrawal: true,
                    is_debt_increase: false,
                },
                &prices,
                upper_hint,
                lower_hint,
            );

            withdrawn
        }

        /// Mints more stable against a trove. A borrowing fee is added to the debt in normal mode.
        pub fn borrow_stable(
            &mut self,
            receipt_proof: NonFungibleProof,
            amount: Decimal,
            max_fee_percentage: Decimal,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) -> Bucket {
            let trove_id = self.check_receipt(receipt_proof);
            let mut trove = self.active_trove(&trove_id);
            let prices = self.get_prices();
            let recovery_mode = self.recovery_mode(&prices);
            check_max_fee_percentage(max_fee_percentage, &self.parameters, recovery_mode).or_abort();
            assert!(amount > Decimal::ZERO, "{}", TroveError::AmountMustBeNonZero);

            self.touch(&trove_id, &mut trove);
            let old_icr = compute_icr(&trove.collaterals, trove.debt, &prices);

            let fee = if recovery_mode {
                Decimal::ZERO
            } else {
                self.trigger_borrowing_fee(&trove_id, amount, max_fee_percentage)
            };
            trove.debt += amount + fee;
            self.active_debt += amount + fee;

            let mut stable = self.mint_stable(amount + fee);
            if fee > Decimal::ZERO {
                let fee_bucket = stable.take(fee);
                self.deposit_fees(vec![fee_bucket]);
            }

            self.finish_adjustment(
                &trove_id,
                trove,
                Adjustment {
                    old_icr,
                    recovery_mode,
                    is_coll_withdrawal: false,
                    is_debt_increase: true,
                },
                &prices,
                upper_hint,
                lower_hint,
            );

            stable
        }

        /// Repays part of a trove's debt. The net debt left must stay above the minimum.
        pub fn repay_stable(
            &mut self,
            receipt_proof: NonFungibleProof,
            payment: Bucket,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) {
            let trove_id = self.check_receipt(receipt_proof);
            let mut trove = self.active_trove(&trove_id);
            assert!(
                payment.resource_address() == self.stable_manager.address(),
                "{}",
                TroveError::InvalidPayment
            );
            let amount = payment.amount();
            assert!(amount > Decimal::ZERO, "{}", TroveError::AmountMustBeNonZero);

            let prices = self.get_prices();
            let recovery_mode = self.recovery_mode(&prices);

            self.touch(&trove_id, &mut trove);
            let old_icr = compute_icr(&trove.collaterals, trove.debt, &prices);

            let net_debt = trove.debt - self.parameters.gas_compensation_debt;
            assert!(amount <= net_debt, "{}", TroveError::RepaymentExceedsDebt);
            assert!(
                net_debt - amount >= self.parameters.min_net_debt,
                "{}",
                TroveError::NetDebtBelowMinimum
            );

            trove.debt -= amount;
            self.active_debt -= amount;
            self.burn_stable(payment);

            self.finish_adjustment(
                &trove_id,
                trove,
                Adjustment {
                    old_icr,
                    recovery_mode,
                    is_coll_withdrawal: false,
                    is_debt_increase: false,
                },
                &prices,
                upper_hint,
                lower_hint,
            );
        }

        /// Closes a trove: repays its net debt, burns its gas compensation and returns all collateral.
        ///
        /// # Returns
        /// * `(Vec<Bucket>, Bucket)`: The collateral, and whatever stable was paid in excess.
        ///
        /// # Panics
        /// * In recovery mode, if it is the last trove, or if the TCR would drop under the CCR.
        pub fn close_trove(
            &mut self,
            receipt_proof: NonFungibleProof,
            mut payment: Bucket,
        ) -> (Vec<Bucket>, Bucket) {
            let trove_id = self.check_receipt(receipt_proof);
            let mut trove = self.active_trove(&trove_id);
            let prices = self.get_prices();
            assert!(
                !self.recovery_mode(&prices),
                "{}",
                TroveError::RecoveryModeForbidden
            );
            assert!(
                payment.resource_address() == self.stable_manager.address(),
                "{}",
                TroveError::InvalidPayment
            );

            self.touch(&trove_id, &mut trove);

            let repayment = trove.debt - self.parameters.gas_compensation_debt;
            assert!(
                payment.amount() >= repayment,
                "{}",
                TroveError::InsufficientBalance
            );
            let repaid = payment.take(repayment);
            self.burn_stable(repaid);
            let gas_compensation: Bucket = self
                .gas_reserve
                .take(self.parameters.gas_compensation_debt)
                .into();
            self.burn_stable(gas_compensation);
            self.active_debt -= trove.debt;

            let collaterals = trove.collaterals.clone();
            let buckets: Vec<Bucket> = collaterals
                .iter()
                .filter(|(_, amount)| **amount > Decimal::ZERO)
                .map(|(collateral, amount)| self.take_active(collateral, *amount))
                .collect();

            self.close_trove_record(&trove_id, &mut trove, TroveStatus::ClosedByOwner);
            assert!(
                self.tcr(&prices) >= self.parameters.ccr,
                "{}",
                TroveError::TcrBelowCcr
            );
            self.emit_trove_update(&trove_id, &trove, TroveOperation::CloseTrove);

            (buckets, payment)
        }

        /// Claims the collateral surplus left by a redemption or capped liquidation. Works once.
        pub fn claim_coll_surplus(&mut self, receipt_proof: NonFungibleProof) -> Vec<Bucket> {
            let trove_id = self.check_receipt(receipt_proof);
            let claim = self
                .coll_surplus
                .remove(&trove_id)
                .unwrap_or_else(|| panic!("{}", TroveError::NoCollSurplus));

            let mut buckets: Vec<Bucket> = vec![];
            for (collateral, amount) in claim.collaterals.iter() {
                let mut info = self.collaterals.get_mut(collateral).unwrap();
                let available = (*amount).min(info.surplus_vault.amount());
                buckets.push(
                    info.surplus_vault
                        .take_advanced(available, WithdrawStrategy::Rounded(RoundingMode::ToZero)),
                );
            }

            Runtime::emit_event(EventCollSurplusClaimed {
                trove_id,
                collaterals: to_vec(&claim.collaterals),
            });

            buckets
        }

        // ------------------------------------------------------------------
        // Liquidations
        // ------------------------------------------------------------------

        /// Liquidates a single trove.
        ///
        /// # Returns
        /// * `(Vec<Bucket>, Bucket)`: Collateral and stable gas compensation for the liquidator.
        ///
        /// # Panics
        /// * If the trove is not active or cannot be liquidated.
        pub fn liquidate(&mut self, trove_id: NonFungibleLocalId) -> (Vec<Bucket>, Bucket) {
            assert!(
                self.trove_or_empty(&trove_id).status == TroveStatus::Active,
                "{}",
                TroveError::TroveMustExist
            );
            self.batch_liquidate(vec![trove_id])
        }

        /// Liquidates every eligible trove of the list. Ineligible or closed troves are skipped.
        ///
        /// Recovery mode is re-evaluated after each trove against running system totals. Offsets
        /// and redistributions of the whole batch are applied once at the end.
        ///
        /// # Panics
        /// * If no trove of the list could be liquidated.
        pub fn batch_liquidate(&mut self, trove_ids: Vec<NonFungibleLocalId>) -> (Vec<Bucket>, Bucket) {
            assert!(!self.parameters.stop_liquidations, "{}", TroveError::OperationStopped);
            assert!(!trove_ids.is_empty(), "{}", TroveError::NothingToLiquidate);

            let prices = self.get_prices();
            let mut system = SystemTotals {
                collaterals: self.system_collaterals(),
                debt: self.active_debt + self.default_debt,
            };
            let mut stability_pool_remaining = self.stability_pool.get_stable_balance();
            let mut totals = LiquidationTotals::new();

            for trove_id in trove_ids {
                let mut trove = self.trove_or_empty(&trove_id);
                if trove.status != TroveStatus::Active {
                    debug!("Skipping trove {}: not active", trove_id);
                    continue;
                }

                let (collaterals, debt) = self.entire_debt_and_coll(&trove);
                let icr = compute_icr(&collaterals, debt, &prices);
                let tcr = system.tcr(&prices);
                let recovery_mode = is_recovery_mode(tcr, self.parameters.ccr);
                let kind = classify(
                    icr,
                    tcr,
                    recovery_mode,
                    debt,
                    stability_pool_remaining,
                    &self.parameters,
                );
                if kind == LiquidationKind::Ineligible {
                    debug!("Skipping trove {}: ICR {} is not liquidatable", trove_id, icr);
                    continue;
                }

                self.touch(&trove_id, &mut trove);
                let values = liquidation_values(
                    kind,
                    &trove.collaterals,
                    trove.debt,
                    icr,
                    stability_pool_remaining,
                    &prices,
                    &self.parameters,
                );
                stability_pool_remaining -= values.debt_to_offset;
                system.apply(&values);
                totals.add(&values);

                self.close_trove_record(&trove_id, &mut trove, TroveStatus::ClosedByLiquidation);
                self.credit_surplus(&trove_id, &values.coll_surplus);

                Runtime::emit_event(EventLiquidateTrove {
                    trove_id,
                    debt: values.entire_debt,
                    collaterals: to_vec(&values.entire_collaterals),
                    operation: if recovery_mode {
                        TroveOperation::LiquidateInRecoveryMode
                    } else {
                        TroveOperation::LiquidateInNormalMode
                    },
                });
            }

            assert!(totals.troves_liquidated > 0, "{}", TroveError::NothingToLiquidate);

            self.redistribute_debt_and_coll(&totals);
            self.offset_to_stability_pool(totals.debt_to_offset, &totals.coll_to_send_to_sp);

            let coll_gas_compensation: Vec<Bucket> = totals
                .coll_gas_compensation
                .iter()
                .map(|(collateral, amount)| self.take_active(collateral, *amount))
                .collect();
            let stable_gas_compensation: Bucket =
                self.gas_reserve.take(totals.debt_gas_compensation).into();

            self.update_system_snapshots();

            Runtime::emit_event(EventLiquidation {
                troves_liquidated: totals.troves_liquidated,
                liquidated_debt: totals.liquidated_debt,
                liquidated_collaterals: to_vec(&totals.liquidated_collaterals),
                debt_offset: totals.debt_to_offset,
                debt_redistributed: sum(&totals.debt_to_redistribute),
                coll_gas_compensation: to_vec(&totals.coll_gas_compensation),
                debt_gas_compensation: totals.debt_gas_compensation,
            });

            (coll_gas_compensation, stable_gas_compensation)
        }

        // ------------------------------------------------------------------
        // Redemptions
        // ------------------------------------------------------------------

        /// Redeems stable for collateral at face value, starting at the lowest-ICR trove at or
        /// above the MCR.
        ///
        /// # Arguments
        /// * `payment`: Stable to burn, at least `amount`.
        /// * `amount`: Stable the redeemer wants to redeem.
        /// * `max_fee_percentage`: Highest redemption fee rate the redeemer accepts.
        /// * `first_hint`: Expected first trove to redeem from. Ignored when not the lowest trove
        ///   at or above the MCR.
        /// * `upper_hint`, `lower_hint`: Expected neighbours of a partially redeemed trove.
        /// * `partial_hint_nicr`: Expected nominal ratio of a partially redeemed trove.
        /// * `max_iterations`: Maximum number of troves to visit, 0 for no limit.
        ///
        /// # Returns
        /// * `(Vec<Bucket>, Bucket)`: The collateral net of fees, and the unused stable.
        pub fn redeem(
            &mut self,
            mut payment: Bucket,
            amount: Decimal,
            max_fee_percentage: Decimal,
            first_hint: Option<NonFungibleLocalId>,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
            partial_hint_nicr: Decimal,
            max_iterations: u64,
        ) -> (Vec<Bucket>, Bucket) {
            assert!(!self.parameters.stop_redemptions, "{}", TroveError::OperationStopped);
            check_max_fee_percentage(max_fee_percentage, &self.parameters, false).or_abort();
            assert!(amount > Decimal::ZERO, "{}", TroveError::AmountMustBeNonZero);
            assert!(
                payment.resource_address() == self.stable_manager.address(),
                "{}",
                TroveError::InvalidPayment
            );
            assert!(
                payment.amount() >= amount,
                "{}",
                TroveError::InsufficientBalance
            );

            let prices = self.get_prices();
            assert!(
                self.tcr(&prices) >= self.parameters.mcr,
                "{}",
                TroveError::TcrBelowMcr
            );

            let total_supply_at_start = self.circulating_stable;
            let mut remaining = amount;
            let mut drawn: IndexMap<ResourceAddress, Decimal> = IndexMap::default();
            let mut troves_redeemed: u64 = 0;
            let mut iterations: u64 = 0;

            let mut current = if self.is_valid_first_redemption_hint(&first_hint, &prices) {
                first_hint
            } else {
                self.lowest_redeemable_trove(&prices)
            };

            while let Some(trove_id) = current {
                if remaining == Decimal::ZERO || (max_iterations > 0 && iterations >= max_iterations) {
                    break;
                }
                iterations += 1;

                let next = self.sorted_troves.next_higher(&trove_id);
                if self.current_icr(&trove_id, &prices) < self.parameters.mcr {
                    current = next;
                    continue;
                }

                let mut trove = self.trove_or_empty(&trove_id);
                self.touch(&trove_id, &mut trove);

                let single = redeem_from_trove(
                    &trove.collaterals,
                    trove.debt,
                    remaining,
                    &prices,
                    &self.parameters,
                );

                match single.outcome {
                    RedemptionOutcome::Cancelled => {
                        debug!(
                            "Redemption stopped at trove {}: it would be left under the minimum net debt",
                            trove_id
                        );
                        self.troves.insert(trove_id, trove);
                        break;
                    }
                    RedemptionOutcome::Full => {
                        let gas_compensation = single.new_debt;
                        let reserve: Bucket = self.gas_reserve.take(gas_compensation).into();
                        self.burn_stable(reserve);
                        self.active_debt -= single.debt_lot + gas_compensation;

                        self.credit_surplus(&trove_id, &single.remaining_collaterals);
                        self.close_trove_record(&trove_id, &mut trove, TroveStatus::ClosedByRedemption);
                    }
                    RedemptionOutcome::Partial => {
                        trove.collaterals = single.remaining_collaterals.clone();
                        trove.debt = single.new_debt;
                        self.active_debt -= single.debt_lot;
                        self.update_stakes(&mut trove);

                        let new_nicr = compute_nominal_cr(&trove.collaterals, trove.debt);
                        if new_nicr != partial_hint_nicr {
                            debug!(
                                "Partial redemption hint {} is stale, trove {} now has NICR {}",
                                partial_hint_nicr, trove_id, new_nicr
                            );
                        }
                        self.sorted_troves.remove(&trove_id);
                        self.insert_sorted(
                            trove_id.clone(),
                            new_nicr,
                            upper_hint.clone(),
                            lower_hint.clone(),
                        );
                        self.troves.insert(trove_id.clone(), trove.clone());
                    }
                }

                self.emit_trove_update(&trove_id, &trove, TroveOperation::RedeemCollateral);
                merge(&mut drawn, &single.drawn);
                remaining -= single.debt_lot;
                troves_redeemed += 1;
                current = next;
            }

            let total_lot = amount - remaining;
            assert!(total_lot > Decimal::ZERO, "{}", TroveError::UnableToRedeem);

            let previous_fee_operation_time = self.fee_state.last_fee_operation_time;
            let base_rate = self.fee_state.update_from_redemption(
                total_lot,
                total_supply_at_start,
                now(),
                &self.parameters,
            );
            self.emit_fee_state(previous_fee_operation_time);

            let fee_rate = redemption_rate(base_rate, &self.parameters);
            check_fee_within_max(fee_rate, max_fee_percentage).or_abort();
            let fees = redemption_fees(fee_rate, &drawn).or_abort();

            let mut collateral_buckets: Vec<Bucket> = vec![];
            let mut fee_buckets: Vec<Bucket> = vec![];
            for (collateral, amount) in drawn.iter() {
                let mut bucket = self.take_active(collateral, *amount);
                let fee = fees
                    .get(collateral)
                    .copied()
                    .unwrap_or(Decimal::ZERO)
                    .min(bucket.amount());
                fee_buckets.push(
                    bucket.take_advanced(fee, WithdrawStrategy::Rounded(RoundingMode::ToZero)),
                );
                collateral_buckets.push(bucket);
            }
            self.deposit_fees(fee_buckets);

            let redeemed = payment.take(total_lot);
            self.burn_stable(redeemed);

            Runtime::emit_event(EventRedemption {
                attempted_amount: amount,
                actual_amount: total_lot,
                collaterals_drawn: to_vec(&drawn),
                fees: to_vec(&fees),
                troves_redeemed,
            });

            (collateral_buckets, payment)
        }

        // ------------------------------------------------------------------
        // Getters
        // ------------------------------------------------------------------

        pub fn get_trove_info(&self, trove_ids: Vec<NonFungibleLocalId>) -> Vec<TroveInfoReturn> {
            let prices = self.get_prices();
            trove_ids
                .into_iter()
                .map(|trove_id| {
                    let trove = self.trove_or_empty(&trove_id);
                    let (pending_collaterals, pending_debt) = self.pending_rewards(&trove);
                    let (collaterals, debt) = self.entire_debt_and_coll(&trove);
                    TroveInfoReturn {
                        trove_id,
                        status: trove.status,
                        icr: if trove.status == TroveStatus::Active {
                            compute_icr(&collaterals, debt, &prices)
                        } else {
                            Decimal::ZERO
                        },
                        collaterals: to_vec(&collaterals),
                        debt,
                        pending_collaterals: to_vec(&pending_collaterals),
                        pending_debt,
                        stakes: to_vec(&trove.stakes),
                        array_index: trove.array_index,
                    }
                })
                .collect()
        }

        /// Returns `(debt, collaterals, pending_debt, pending_collaterals)`, pending rewards
        /// included in the first two values.
        pub fn get_entire_debt_and_coll(
            &self,
            trove_id: NonFungibleLocalId,
        ) -> (
            Decimal,
            Vec<(ResourceAddress, Decimal)>,
            Decimal,
            Vec<(ResourceAddress, Decimal)>,
        ) {
            let trove = self.trove_or_empty(&trove_id);
            let (pending_collaterals, pending_debt) = self.pending_rewards(&trove);
            let (collaterals, debt) = self.entire_debt_and_coll(&trove);
            (
                debt,
                to_vec(&collaterals),
                pending_debt,
                to_vec(&pending_collaterals),
            )
        }

        pub fn get_icr(&self, trove_id: NonFungibleLocalId) -> Decimal {
            let prices = self.get_prices();
            self.current_icr(&trove_id, &prices)
        }

        pub fn get_tcr(&self) -> Decimal {
            let prices = self.get_prices();
            self.tcr(&prices)
        }

        pub fn check_recovery_mode(&self) -> bool {
            let prices = self.get_prices();
            self.recovery_mode(&prices)
        }

        pub fn get_trove_status(&self, trove_id: NonFungibleLocalId) -> TroveStatus {
            self.trove_or_empty(&trove_id).status
        }

        pub fn get_trove_stake(&self, trove_id: NonFungibleLocalId, collateral: ResourceAddress) -> Decimal {
            self.trove_or_empty(&trove_id).stake(&collateral)
        }

        /// Recorded debt, without pending redistributions.
        pub fn get_trove_debt(&self, trove_id: NonFungibleLocalId) -> Decimal {
            self.trove_or_empty(&trove_id).debt
        }

        pub fn get_trove_owners(&self) -> Vec<NonFungibleLocalId> {
            (0..self.trove_owners_count)
                .map(|index| self.trove_owners.get(&index).unwrap().clone())
                .collect()
        }

        pub fn get_trove_owners_count(&self) -> u64 {
            self.trove_owners_count
        }

        /// Up to `limit` troves from the highest nominal ratio down, with the ratio they are sorted by.
        pub fn get_sorted_troves(&self, limit: u64) -> Vec<(NonFungibleLocalId, Decimal)> {
            self.sorted_troves.list_descending(limit)
        }

        pub fn sorted_troves_contains(&self, trove_id: NonFungibleLocalId) -> bool {
            self.sorted_troves.contains(&trove_id)
        }

        /// Neighbours in the sorted list for a trove with nominal ratio `nicr`.
        pub fn find_insert_position(
            &self,
            nicr: Decimal,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) -> (Option<NonFungibleLocalId>, Option<NonFungibleLocalId>) {
            self.sorted_troves.find_insert_position(nicr, upper_hint, lower_hint)
        }

        pub fn get_collateral_infos(&self) -> Vec<CollateralInfoReturn> {
            let prices = self.get_prices();
            self.collateral_list
                .iter()
                .map(|collateral| {
                    let info = self.collaterals.get(collateral).unwrap();
                    let price = prices.get(collateral).copied().unwrap_or(PriceInfo::ZERO);
                    CollateralInfoReturn {
                        resource_address: *collateral,
                        accepted: info.accepted,
                        active_amount: info.active_vault.amount(),
                        default_amount: info.default_vault.amount(),
                        surplus_amount: info.surplus_vault.amount(),
                        l_coll: info.l_coll,
                        l_debt: info.l_debt,
                        total_stakes: info.total_stakes,
                        total_stakes_snapshot: info.total_stakes_snapshot,
                        total_collateral_snapshot: info.total_collateral_snapshot,
                        price: price.price,
                        safety_ratio: price.safety_ratio,
                    }
                })
                .collect()
        }

        pub fn get_system_info(&self) -> SystemInfoReturn {
            let prices = self.get_prices();
            let tcr = self.tcr(&prices);
            SystemInfoReturn {
                active_debt: self.active_debt,
                default_debt: self.default_debt,
                total_collaterals: to_vec(&self.system_collaterals()),
                tcr,
                recovery_mode: is_recovery_mode(tcr, self.parameters.ccr),
                base_rate: self.fee_state.base_rate,
                last_fee_operation_time: self.fee_state.last_fee_operation_time,
                trove_owners_count: self.trove_owners_count,
                sorted_troves_size: self.sorted_troves.size(),
                circulating_stable: self.circulating_stable,
                gas_reserve: self.gas_reserve.amount(),
            }
        }

        /// Redemption fee rate if a negligible redemption happened now.
        pub fn get_redemption_rate(&self) -> Decimal {
            redemption_rate(
                self.fee_state.decayed_base_rate(now(), &self.parameters),
                &self.parameters,
            )
        }

        pub fn get_borrowing_rate(&self) -> Decimal {
            borrowing_rate(
                self.fee_state.decayed_base_rate(now(), &self.parameters),
                &self.parameters,
            )
        }

        /// Simulates a redemption walk without changing state.
        ///
        /// # Returns
        /// * `(first_hint, partial_hint_nicr, truncated_amount)`: The first trove to redeem from,
        ///   the nominal ratio the partially redeemed trove would end with (zero if none), and the largest
        ///   amount up to `amount` that can be redeemed without a cancelled partial redemption.
        pub fn get_redemption_hints(
            &self,
            amount: Decimal,
            max_iterations: u64,
        ) -> (Option<NonFungibleLocalId>, Decimal, Decimal) {
            let prices = self.get_prices();
            let first_hint = self.lowest_redeemable_trove(&prices);
            let mut partial_hint_nicr = Decimal::ZERO;
            let mut remaining = amount;
            let mut iterations: u64 = 0;
            let mut current = first_hint.clone();

            while let Some(trove_id) = current {
                if remaining == Decimal::ZERO || (max_iterations > 0 && iterations >= max_iterations) {
                    break;
                }
                iterations += 1;

                let next = self.sorted_troves.next_higher(&trove_id);
                let trove = self.trove_or_empty(&trove_id);
                let (collaterals, debt) = self.entire_debt_and_coll(&trove);
                if compute_icr(&collaterals, debt, &prices) < self.parameters.mcr {
                    current = next;
                    continue;
                }

                let (lot, full) = hint_lot(debt, remaining, &self.parameters);
                if full {
                    remaining -= lot;
                    current = next;
                    continue;
                }
                if lot > Decimal::ZERO {
                    let single = redeem_from_trove(&collaterals, debt, lot, &prices, &self.parameters);
                    if single.outcome == RedemptionOutcome::Partial {
                        partial_hint_nicr =
                            compute_nominal_cr(&single.remaining_collaterals, single.new_debt);
                        remaining -= lot;
                    }
                }
                break;
            }

            (first_hint, partial_hint_nicr, amount - remaining)
        }

        pub fn get_coll_surplus(&self, trove_id: NonFungibleLocalId) -> Vec<(ResourceAddress, Decimal)> {
            self.coll_surplus
                .get(&trove_id)
                .map(|claim| to_vec(&claim.collaterals))
                .unwrap_or_default()
        }

        pub fn get_stable_address(&self) -> ResourceAddress {
            self.stable_manager.address()
        }

        pub fn get_receipt_address(&self) -> ResourceAddress {
            self.receipt_manager.address()
        }

        pub fn get_parameters(&self) -> ProtocolParameters {
            self.parameters.clone()
        }

        // ------------------------------------------------------------------
        // Admin
        // ------------------------------------------------------------------

        /// Registers a new collateral kind. Kinds cannot be removed, only stop being accepted.
        pub fn new_collateral(&mut self, address: ResourceAddress) {
            assert!(
                self.collaterals.get(&address).is_none(),
                "Collateral already registered"
            );
            self.collaterals.insert(
                address,
                CollateralInfo {
                    resource_address: address,
                    accepted: true,
                    active_vault: Vault::new(address),
                    default_vault: Vault::new(address),
                    surplus_vault: Vault::new(address),
                    l_coll: Decimal::ZERO,
                    l_debt: Decimal::ZERO,
                    last_coll_error: Decimal::ZERO,
                    last_debt_error: Decimal::ZERO,
                    total_stakes: Decimal::ZERO,
                    total_stakes_snapshot: Decimal::ZERO,
                    total_collateral_snapshot: Decimal::ZERO,
                },
            );
            self.collateral_list.push(address);

            Runtime::emit_event(EventAddCollateral { address });
        }

        pub fn edit_collateral(&mut self, address: ResourceAddress, accepted: bool) {
            let mut info = self
                .collaterals
                .get_mut(&address)
                .unwrap_or_else(|| panic!("{}", TroveError::UnknownCollateral));
            info.accepted = accepted;

            Runtime::emit_event(EventChangeCollateral { address, accepted });
        }

        /// # Panics
        /// * If the MCR is under 100%, the CCR under the MCR, or a fee bound outside [0, 1].
        pub fn set_parameters(&mut self, parameters: ProtocolParameters) {
            assert!(parameters.mcr >= Decimal::ONE, "MCR must be at least 100%");
            assert!(parameters.ccr >= parameters.mcr, "CCR must be at least the MCR");
            assert!(
                parameters.redemption_fee_floor >= Decimal::ZERO
                    && parameters.redemption_fee_floor <= Decimal::ONE
                    && parameters.max_borrowing_fee >= parameters.redemption_fee_floor
                    && parameters.max_borrowing_fee <= Decimal::ONE,
                "Fee bounds must lie between 0 and 100%"
            );
            assert!(
                parameters.liquidation_gas_compensation >= Decimal::ZERO
                    && parameters.liquidation_gas_compensation < Decimal::ONE,
                "Gas compensation must lie between 0 and 100%"
            );
            assert!(
                parameters.base_rate_half_life_minutes > Decimal::ZERO,
                "Half-life must be positive"
            );

            self.parameters = parameters.clone();
            Runtime::emit_event(EventParametersChanged { parameters });
        }

        pub fn set_stops(&mut self, liquidations: bool, redemptions: bool, openings: bool) {
            self.parameters.stop_liquidations = liquidations;
            self.parameters.stop_redemptions = redemptions;
            self.parameters.stop_openings = openings;
            Runtime::emit_event(EventParametersChanged {
                parameters: self.parameters.clone(),
            });
        }

        /// Points this component and the stability pool at a new oracle.
        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, oracle_method_name: String) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool
                    .set_oracle(oracle_address, oracle_method_name.clone())
            });
            self.oracle = Global::from(oracle_address);
            self.oracle_method_name = oracle_method_name;
        }

        // ------------------------------------------------------------------
        // Helpers
        // ------------------------------------------------------------------

        fn get_prices(&self) -> PriceTable {
            let readings: Vec<(ResourceAddress, Decimal, Decimal)> = self.oracle.call_raw(
                &self.oracle_method_name,
                scrypto_args!(self.collateral_list.clone()),
            );
            readings
                .into_iter()
                .map(|(collateral, price, safety_ratio)| (collateral, PriceInfo { price, safety_ratio }))
                .collect()
        }

        fn check_receipt(&self, receipt_proof: NonFungibleProof) -> NonFungibleLocalId {
            let receipt_proof = receipt_proof.check_with_message(
                self.receipt_manager.address(),
                "Incorrect proof! Are you sure this trove is yours?",
            );
            receipt_proof.non_fungible::<TroveReceipt>().local_id().clone()
        }

        fn trove_or_empty(&self, trove_id: &NonFungibleLocalId) -> Trove {
            self.troves
                .get(trove_id)
                .map(|trove| trove.clone())
                .unwrap_or_else(empty_trove)
        }

        fn active_trove(&self, trove_id: &NonFungibleLocalId) -> Trove {
            let trove = self.trove_or_empty(trove_id);
            assert!(
                trove.status == TroveStatus::Active,
                "{}",
                TroveError::TroveNotActive
            );
            trove
        }

        /// Validates deposit buckets and sums them per kind.
        fn collect_deposits(&self, collaterals: &[Bucket]) -> IndexMap<ResourceAddress, Decimal> {
            let mut deposits: IndexMap<ResourceAddress, Decimal> = IndexMap::default();
            for bucket in collaterals {
                let collateral = bucket.resource_address();
                assert!(
                    !deposits.contains_key(&collateral),
                    "{}",
                    TroveError::DuplicateCollateral
                );
                let accepted = self
                    .collaterals
                    .get(&collateral)
                    .map(|info| info.accepted)
                    .unwrap_or_else(|| panic!("{}", TroveError::UnknownCollateral));
                assert!(accepted, "{}", TroveError::CollateralNotAccepted);
                assert!(
                    bucket.amount() > Decimal::ZERO,
                    "{}",
                    TroveError::AmountMustBeNonZero
                );
                deposits.insert(collateral, bucket.amount());
            }
            assert!(!deposits.is_empty(), "{}", TroveError::AmountMustBeNonZero);
            deposits
        }

        fn deposit_collaterals(&mut self, collaterals: Vec<Bucket>) {
            for bucket in collaterals {
                let collateral = bucket.resource_address();
                self.collaterals
                    .get_mut(&collateral)
                    .unwrap()
                    .active_vault
                    .put(bucket);
            }
        }

        fn take_active(&mut self, collateral: &ResourceAddress, amount: Decimal) -> Bucket {
            let mut info = self.collaterals.get_mut(collateral).unwrap();
            let available = amount.min(info.active_vault.amount());
            info.active_vault
                .take_advanced(available, WithdrawStrategy::Rounded(RoundingMode::ToZero))
        }

        /// Moves collateral between two of a kind's pools, returning the amount actually moved.
        fn move_collateral(
            &mut self,
            collateral: &ResourceAddress,
            amount: Decimal,
            from: CollateralPool,
            to: CollateralPool,
        ) -> Decimal {
            if amount <= Decimal::ZERO {
                return Decimal::ZERO;
            }
            let mut info = self.collaterals.get_mut(collateral).unwrap();
            let available = amount.min(info.vault(from).amount());
            let bucket = info
                .vault(from)
                .take_advanced(available, WithdrawStrategy::Rounded(RoundingMode::ToZero));
            let moved = bucket.amount();
            info.vault(to).put(bucket);
            moved
        }

        fn mint_stable(&mut self, amount: Decimal) -> Bucket {
            self.circulating_stable += amount;
            self.stable_manager.mint(amount)
        }

        fn burn_stable(&mut self, stable: Bucket) {
            self.circulating_stable -= stable.amount();
            stable.burn();
        }

        fn deposit_fees(&self, fees: Vec<Bucket>) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.fee_pool.deposit_fees(fees)
            });
        }

        fn system_collaterals(&self) -> IndexMap<ResourceAddress, Decimal> {
            self.collateral_list
                .iter()
                .map(|collateral| {
                    let info = self.collaterals.get(collateral).unwrap();
                    (
                        *collateral,
                        info.active_vault.amount() + info.default_vault.amount(),
                    )
                })
                .collect()
        }

        fn tcr(&self, prices: &PriceTable) -> Decimal {
            compute_icr(
                &self.system_collaterals(),
                self.active_debt + self.default_debt,
                prices,
            )
        }

        fn recovery_mode(&self, prices: &PriceTable) -> bool {
            is_recovery_mode(self.tcr(prices), self.parameters.ccr)
        }

        /// Redistribution rewards a trove has not pulled in yet.
        fn pending_rewards(&self, trove: &Trove) -> (IndexMap<ResourceAddress, Decimal>, Decimal) {
            let mut pending_collaterals: IndexMap<ResourceAddress, Decimal> = IndexMap::default();
            let mut pending_debt = Decimal::ZERO;
            if trove.status != TroveStatus::Active {
                return (pending_collaterals, pending_debt);
            }

            for (collateral, stake) in trove.stakes.iter() {
                let info = self.collaterals.get(collateral).unwrap();
                let snapshot = trove
                    .reward_snapshots
                    .get(collateral)
                    .copied()
                    .unwrap_or(RewardSnapshot::zero());
                add_to(
                    &mut pending_collaterals,
                    *collateral,
                    pending_collateral_reward(*stake, info.l_coll, &snapshot),
                );
                pending_debt += pending_debt_reward(*stake, info.l_debt, &snapshot);
            }
            (pending_collaterals, pending_debt)
        }

        fn entire_debt_and_coll(&self, trove: &Trove) -> (IndexMap<ResourceAddress, Decimal>, Decimal) {
            let (pending_collaterals, pending_debt) = self.pending_rewards(trove);
            let mut collaterals = trove.collaterals.clone();
            merge(&mut collaterals, &pending_collaterals);
            (collaterals, trove.debt + pending_debt)
        }

        fn current_icr(&self, trove_id: &NonFungibleLocalId, prices: &PriceTable) -> Decimal {
            let (collaterals, debt) = self.entire_debt_and_coll(&self.trove_or_empty(trove_id));
            compute_icr(&collaterals, debt, prices)
        }

        /// Pulls pending redistribution rewards into the trove and refreshes its snapshots.
        fn touch(&mut self, trove_id: &NonFungibleLocalId, trove: &mut Trove) {
            let (pending_collaterals, pending_debt) = self.pending_rewards(trove);
            let has_pending = pending_debt > Decimal::ZERO
                || pending_collaterals.values().any(|amount| *amount > Decimal::ZERO);

            for (collateral, amount) in pending_collaterals.iter() {
                let moved = self.move_collateral(
                    collateral,
                    *amount,
                    CollateralPool::Default,
                    CollateralPool::Active,
                );
                add_to(&mut trove.collaterals, *collateral, moved);
            }
            if pending_debt > Decimal::ZERO {
                trove.debt += pending_debt;
                self.default_debt = (self.default_debt - pending_debt).max(Decimal::ZERO);
                self.active_debt += pending_debt;
            }
            self.update_reward_snapshots(trove);

            if has_pending {
                self.emit_trove_update(trove_id, trove, TroveOperation::ApplyPendingRewards);
            }
        }

        fn update_reward_snapshots(&self, trove: &mut Trove) {
            let held: Vec<ResourceAddress> = trove.collaterals.keys().cloned().collect();
            for collateral in held {
                let info = self.collaterals.get(&collateral).unwrap();
                trove.reward_snapshots.insert(
                    collateral,
                    RewardSnapshot {
                        l_coll: info.l_coll,
                        l_debt: info.l_debt,
                    },
                );
            }
        }

        /// Recomputes the trove's stake for every kind it holds or held, dropping emptied kinds.
        fn update_stakes(&mut self, trove: &mut Trove) {
            let mut kinds: Vec<ResourceAddress> = trove.collaterals.keys().cloned().collect();
            for collateral in trove.stakes.keys() {
                if !kinds.contains(collateral) {
                    kinds.push(*collateral);
                }
            }

            for collateral in kinds {
                let amount = trove.collateral(&collateral);
                let old_stake = trove.stake(&collateral);
                let total_stakes = {
                    let mut info = self.collaterals.get_mut(&collateral).unwrap();
                    let new_stake = compute_new_stake(
                        amount,
                        info.total_stakes_snapshot,
                        info.total_collateral_snapshot,
                    );
                    info.total_stakes = info.total_stakes - old_stake + new_stake;
                    trove.stakes.insert(collateral, new_stake);
                    info.total_stakes
                };

                if amount == Decimal::ZERO {
                    trove.stakes.shift_remove(&collateral);
                    trove.collaterals.shift_remove(&collateral);
                    trove.reward_snapshots.shift_remove(&collateral);
                }

                Runtime::emit_event(EventTotalStakesUpdated {
                    collateral,
                    total_stakes,
                });
            }
        }

        fn remove_stakes(&mut self, trove: &mut Trove) {
            for (collateral, stake) in trove.stakes.iter() {
                let mut info = self.collaterals.get_mut(collateral).unwrap();
                info.total_stakes = (info.total_stakes - *stake).max(Decimal::ZERO);
                Runtime::emit_event(EventTotalStakesUpdated {
                    collateral: *collateral,
                    total_stakes: info.total_stakes,
                });
            }
            trove.stakes = IndexMap::default();
        }

        fn add_trove_owner(&mut self, trove_id: NonFungibleLocalId) -> u64 {
            let index = self.trove_owners_count;
            self.trove_owners.insert(index, trove_id);
            self.trove_owners_count += 1;
            index
        }

        /// Swap-and-pop removal from the owners array. The last trove takes the freed slot.
        fn remove_trove_owner(&mut self, trove_id: &NonFungibleLocalId, index: u64) {
            assert!(
                index < self.trove_owners_count
                    && self.trove_owners.get(&index).map(|owner| owner.clone()).as_ref() == Some(trove_id),
                "TroveManager: Owners array is out of sync"
            );

            let last_index = self.trove_owners_count - 1;
            if index != last_index {
                let moved_id = self.trove_owners.get(&last_index).unwrap().clone();
                self.trove_owners.insert(index, moved_id.clone());
                self.troves.get_mut(&moved_id).unwrap().array_index = index;
            }
            self.trove_owners.remove(&last_index);
            self.trove_owners_count -= 1;
        }

        /// Zeroes a trove and removes it from the owners array and the sorted list.
        fn close_trove_record(
            &mut self,
            trove_id: &NonFungibleLocalId,
            trove: &mut Trove,
            status: TroveStatus,
        ) {
            assert!(
                self.trove_owners_count > 1 && self.sorted_troves.size() > 1,
                "{}",
                TroveError::OnlyOneTroveInSystem
            );

            self.remove_stakes(trove);
            trove.status = status;
            trove.collaterals = IndexMap::default();
            trove.debt = Decimal::ZERO;
            trove.reward_snapshots = IndexMap::default();

            self.remove_trove_owner(trove_id, trove.array_index);
            self.sorted_troves.remove(trove_id);
            self.troves.insert(trove_id.clone(), trove.clone());
        }

        fn insert_sorted(
            &mut self,
            trove_id: NonFungibleLocalId,
            nicr: Decimal,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) {
            if !self
                .sorted_troves
                .valid_insert_position(nicr, &upper_hint, &lower_hint)
            {
                debug!("Insert hints for trove {} are stale, searching the tree", trove_id);
            }
            self.sorted_troves.insert(trove_id, nicr);
        }

        fn finish_adjustment(
            &mut self,
            trove_id: &NonFungibleLocalId,
            mut trove: Trove,
            adjustment: Adjustment,
            prices: &PriceTable,
            upper_hint: Option<NonFungibleLocalId>,
            lower_hint: Option<NonFungibleLocalId>,
        ) {
            self.update_reward_snapshots(&mut trove);
            self.update_stakes(&mut trove);

            let new_icr = compute_icr(&trove.collaterals, trove.debt, prices);
            if adjustment.recovery_mode {
                assert!(
                    !adjustment.is_coll_withdrawal,
                    "{}",
                    TroveError::CollateralWithdrawalInRecoveryMode
                );
                if adjustment.is_debt_increase {
                    assert!(new_icr >= self.parameters.ccr, "{}", TroveError::IcrBelowCcr);
                    assert!(
                        new_icr >= adjustment.old_icr,
                        "{}",
                        TroveError::IcrDecreaseInRecoveryMode
                    );
                }
            } else {
                assert!(new_icr >= self.parameters.mcr, "{}", TroveError::IcrBelowMcr);
                assert!(
                    self.tcr(prices) >= self.parameters.ccr,
                    "{}",
                    TroveError::TcrBelowCcr
                );
            }

            self.sorted_troves.remove(trove_id);
            self.insert_sorted(
                trove_id.clone(),
                compute_nominal_cr(&trove.collaterals, trove.debt),
                upper_hint,
                lower_hint,
            );
            self.troves.insert(trove_id.clone(), trove.clone());
            self.emit_trove_update(trove_id, &trove, TroveOperation::AdjustTrove);
        }

        /// Decays the base rate and returns the borrowing fee on `amount`.
        fn trigger_borrowing_fee(
            &mut self,
            trove_id: &NonFungibleLocalId,
            amount: Decimal,
            max_fee_percentage: Decimal,
        ) -> Decimal {
            let previous_fee_operation_time = self.fee_state.last_fee_operation_time;
            let base_rate = self.fee_state.decay_from_borrowing(now(), &self.parameters);
            self.emit_fee_state(previous_fee_operation_time);

            let fee_rate = borrowing_rate(base_rate, &self.parameters);
            check_fee_within_max(fee_rate, max_fee_percentage).or_abort();
            let fee = amount * fee_rate;

            Runtime::emit_event(EventBorrowingFeePaid {
                trove_id: trove_id.clone(),
                fee,
            });
            fee
        }

        fn credit_surplus(&mut self, trove_id: &NonFungibleLocalId, amounts: &IndexMap<ResourceAddress, Decimal>) {
            let mut credited: IndexMap<ResourceAddress, Decimal> = IndexMap::default();
            for (collateral, amount) in amounts.iter() {
                let moved = self.move_collateral(
                    collateral,
                    *amount,
                    CollateralPool::Active,
                    CollateralPool::Surplus,
                );
                add_to(&mut credited, *collateral, moved);
            }
            if credited.is_empty() {
                return;
            }

            let mut claim: IndexMap<ResourceAddress, Decimal> = self
                .coll_surplus
                .get(trove_id)
                .map(|existing| existing.collaterals.clone())
                .unwrap_or_default();
            merge(&mut claim, &credited);
            self.coll_surplus
                .insert(trove_id.clone(), CollSurplus { collaterals: claim });

            Runtime::emit_event(EventCollSurplusCredited {
                trove_id: trove_id.clone(),
                collaterals: to_vec(&credited),
            });
        }

        /// Spreads the batch's redistributed collateral and debt over the remaining stakes, moving
        /// the collateral to the default pool.
        fn redistribute_debt_and_coll(&mut self, totals: &LiquidationTotals) {
            for collateral in totals.redistributed_kinds() {
                let coll = totals
                    .coll_to_redistribute
                    .get(&collateral)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                let debt = totals
                    .debt_to_redistribute
                    .get(&collateral)
                    .copied()
                    .unwrap_or(Decimal::ZERO);

                {
                    let mut info = self.collaterals.get_mut(&collateral).unwrap();
                    let step = redistribution_step(
                        coll,
                        debt,
                        info.total_stakes,
                        info.last_coll_error,
                        info.last_debt_error,
                    )
                    .or_abort();
                    info.l_coll += step.l_coll_increment;
                    info.l_debt += step.l_debt_increment;
                    info.last_coll_error = step.coll_error;
                    info.last_debt_error = step.debt_error;

                    Runtime::emit_event(EventRedistribution {
                        collateral,
                        l_coll: info.l_coll,
                        l_debt: info.l_debt,
                    });
                }

                self.move_collateral(
                    &collateral,
                    coll,
                    CollateralPool::Active,
                    CollateralPool::Default,
                );
                self.active_debt -= debt;
                self.default_debt += debt;
            }
        }

        /// Sends offset collateral to the stability pool and burns the stable it gives back.
        fn offset_to_stability_pool(
            &mut self,
            debt: Decimal,
            collaterals: &IndexMap<ResourceAddress, Decimal>,
        ) {
            if debt == Decimal::ZERO {
                return;
            }
            let buckets: Vec<Bucket> = collaterals
                .iter()
                .filter(|(_, amount)| **amount > Decimal::ZERO)
                .map(|(collateral, amount)| self.take_active(collateral, *amount))
                .collect();

            let absorbed: Bucket = self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool.offset(debt, buckets)
            });

            self.active_debt -= debt;
            self.burn_stable(absorbed);
        }

        /// Starts a new stake epoch for every kind after a liquidation.
        fn update_system_snapshots(&mut self) {
            for collateral in self.collateral_list.clone() {
                let mut info = self.collaterals.get_mut(&collateral).unwrap();
                info.total_stakes_snapshot = info.total_stakes;
                info.total_collateral_snapshot =
                    info.active_vault.amount() + info.default_vault.amount();

                Runtime::emit_event(EventSystemSnapshots {
                    collateral,
                    total_stakes_snapshot: info.total_stakes_snapshot,
                    total_collateral_snapshot: info.total_collateral_snapshot,
                });
            }
        }

        /// Whether `hint` is the lowest trove at or above the MCR.
        fn is_valid_first_redemption_hint(
            &self,
            hint: &Option<NonFungibleLocalId>,
            prices: &PriceTable,
        ) -> bool {
            let hint = match hint {
                Some(hint) if self.sorted_troves.contains(hint) => hint,
                _ => return false,
            };
            if self.current_icr(hint, prices) < self.parameters.mcr {
                return false;
            }
            match self.sorted_troves.next_lower(hint) {
                None => true,
                Some(lower) => self.current_icr(&lower, prices) < self.parameters.mcr,
            }
        }

        fn lowest_redeemable_trove(&self, prices: &PriceTable) -> Option<NonFungibleLocalId> {
            let mut current = self.sorted_troves.last();
            while let Some(trove_id) = current.clone() {
                if self.current_icr(&trove_id, prices) >= self.parameters.mcr {
                    break;
                }
                current = self.sorted_troves.next_higher(&trove_id);
            }
            current
        }

        fn emit_fee_state(&self, previous_fee_operation_time: i64) {
            Runtime::emit_event(EventBaseRateUpdated {
                base_rate: self.fee_state.base_rate,
            });
            if self.fee_state.last_fee_operation_time != previous_fee_operation_time {
                Runtime::emit_event(EventLastFeeOpTimeUpdated {
                    last_fee_operation_time: self.fee_state.last_fee_operation_time,
                });
            }
        }

        fn emit_trove_update(&self, trove_id: &NonFungibleLocalId, trove: &Trove, operation: TroveOperation) {
            Runtime::emit_event(EventUpdateTrove {
                trove_id: trove_id.clone(),
                collaterals: to_vec(&trove.collaterals),
                debt: trove.debt,
                stakes: to_vec(&trove.stakes),
                operation,
            });
        }
    }
}

/// Ledger state of one collateral kind.
#[derive(ScryptoSbor)]
pub struct CollateralInfo {
    pub resource_address: ResourceAddress,
    /// Whether new deposits of this kind are accepted.
    pub accepted: bool,
    pub active_vault: Vault,
    pub default_vault: Vault,
    pub surplus_vault: Vault,
    /// Redistributed collateral per unit of stake, cumulative.
    pub l_coll: Decimal,
    /// Redistributed debt per unit of stake, cumulative.
    pub l_debt: Decimal,
    pub last_coll_error: Decimal,
    pub last_debt_error: Decimal,
    pub total_stakes: Decimal,
    pub total_stakes_snapshot: Decimal,
    pub total_collateral_snapshot: Decimal,
}

impl CollateralInfo {
    fn vault(&mut self, pool: CollateralPool) -> &mut Vault {
        match pool {
            CollateralPool::Active => &mut self.active_vault,
            CollateralPool::Default => &mut self.default_vault,
            CollateralPool::Surplus => &mut self.surplus_vault,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CollateralPool {
    Active,
    Default,
    Surplus,
}

/// Collateral claimable by the owner of a closed trove.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct CollSurplus {
    pub collaterals: IndexMap<ResourceAddress, Decimal>,
}

/// Rules an adjustment is checked against once applied.
pub struct Adjustment {
    pub old_icr: Decimal,
    pub recovery_mode: bool,
    pub is_coll_withdrawal: bool,
    pub is_debt_increase: bool,
}

fn now() -> i64 {
    Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch
}

fn empty_trove() -> Trove {
    Trove {
        status: TroveStatus::NonExistent,
        collaterals: IndexMap::default(),
        debt: Decimal::ZERO,
        stakes: IndexMap::default(),
        reward_snapshots: IndexMap::default(),
        array_index: 0,
    }
}

fn to_vec(map: &IndexMap<ResourceAddress, Decimal>) -> Vec<(ResourceAddress, Decimal)> {
    map.iter().map(|(kind, amount)| (*kind, *amount)).collect()
}
