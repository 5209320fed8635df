//! # Dummy Oracle Blueprint
//! Component for testing the trove engine with settable prices and safety ratios.

use scrypto::prelude::*;

#[blueprint]
mod oracle {
    enable_method_auth! {
        methods {
            get_price_infos => PUBLIC;
            set_price => restrict_to: [OWNER];
            set_safety_ratio => restrict_to: [OWNER];
        }
    }

    struct Oracle {
        prices: HashMap<ResourceAddress, Decimal>,
        safety_ratios: HashMap<ResourceAddress, Decimal>,
    }

    impl Oracle {
        pub fn instantiate_oracle() -> Global<Oracle> {
            Self {
                prices: HashMap::new(),
                safety_ratios: HashMap::new(),
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::None)
            .metadata(metadata! {
                init {
                    "name" => "Trove Engine Dummy Oracle".to_string(), updatable;
                    "description" => "A dummy oracle used for testing the trove engine".to_string(), updatable;
                }
            })
            .globalize()
        }

        /// Returns `(collateral, price, safety_ratio)` per requested kind. Unknown kinds read as 0 and
        /// safety ratios default to 1.
        pub fn get_price_infos(
            &self,
            collaterals: Vec<ResourceAddress>,
        ) -> Vec<(ResourceAddress, Decimal, Decimal)> {
            collaterals
                .into_iter()
                .map(|collateral| {
                    let price = self.prices.get(&collateral).cloned().unwrap_or(Decimal::ZERO);
                    let safety_ratio = self
                        .safety_ratios
                        .get(&collateral)
                        .cloned()
                        .unwrap_or(Decimal::ONE);
                    (collateral, price, safety_ratio)
                })
                .collect()
        }

        pub fn set_price(&mut self, collateral: ResourceAddress, price: Decimal) {
            self.prices.insert(collateral, price);
        }

        pub fn set_safety_ratio(&mut self, collateral: ResourceAddress, safety_ratio: Decimal) {
            self.safety_ratios.insert(collateral, safety_ratio);
        }
    }
}
