//! # Fee Pool Blueprint
//!
//! Receives the fees the trove manager charges: collateral skimmed from redemptions and stable
//! minted as borrowing fees. Each resource gets its own vault on first deposit. Collected fees
//! stay put until the owner takes them out.

use crate::events::*;
use scrypto::prelude::*;

#[blueprint]
#[types(ResourceAddress, Vault)]
#[events(
    FeePoolDepositEvent,
    FeePoolWithdrawalEvent,
)]
mod fee_pool {
    enable_method_auth! {
        methods {
            get_fee_balances => PUBLIC;
            deposit_fees => restrict_to: [OWNER];
            take_fees => restrict_to: [OWNER];
        }
    }

    /// Collects the collateral fees charged on redemptions and the stable fees charged on borrowing.
    /// Only the owner (the controller badge) can move funds in or out.
    struct FeePool {
        /// Vaults holding collected fees, keyed by resource.
        vaults: KeyValueStore<ResourceAddress, Vault>,
        /// Every resource a vault exists for, in order of first deposit.
        resources: Vec<ResourceAddress>,
    }

    impl FeePool {
        /// Instantiates the FeePool.
        ///
        /// # Arguments
        /// * `controller_badge_address`: Resource of the badge that owns the component.
        ///
        /// # Returns
        /// * `Global<FeePool>`: A global reference to the new component.
        pub fn instantiate(controller_badge_address: ResourceAddress) -> Global<FeePool> {
            let (address_reservation, _component_address) =
                Runtime::allocate_component_address(FeePool::blueprint_id());

            Self {
                vaults: KeyValueStore::new_with_registered_type(),
                resources: vec![],
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Trove Engine Fee Pool".to_string(), updatable;
                    "description" => "Holds redemption and borrowing fees.".to_string(), updatable;
                }
            })
            .globalize()
        }

        /// Deposits fee buckets, creating a vault for every resource seen for the first time.
        pub fn deposit_fees(&mut self, fees: Vec<Bucket>) {
            let mut deposited: Vec<(ResourceAddress, Decimal)> = vec![];

            for bucket in fees {
                if bucket.amount() == Decimal::ZERO {
                    bucket.drop_empty();
                    continue;
                }
                let resource = bucket.resource_address();
                deposited.push((resource, bucket.amount()));

                if self.vaults.get(&resource).is_none() {
                    self.vaults.insert(resource, Vault::new(resource));
                    self.resources.push(resource);
                }
                self.vaults.get_mut(&resource).unwrap().put(bucket);
            }

            if !deposited.is_empty() {
                Runtime::emit_event(FeePoolDepositEvent { fees: deposited });
            }
        }

        /// Takes all collected fees of one resource.
        ///
        /// # Panics
        /// * If no fees of that resource were ever deposited.
        pub fn take_fees(&mut self, resource: ResourceAddress) -> Bucket {
            let bucket = self
                .vaults
                .get_mut(&resource)
                .expect("No fees collected for this resource")
                .take_all();

            Runtime::emit_event(FeePoolWithdrawalEvent {
                resource,
                amount: bucket.amount(),
            });

            bucket
        }

        pub fn get_fee_balances(&self) -> Vec<(ResourceAddress, Decimal)> {
            self.resources
                .iter()
                .map(|resource| (*resource, self.vaults.get(resource).unwrap().amount()))
                .collect()
        }
    }
}
