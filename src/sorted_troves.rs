//! Sorted index of active troves.
//!
//! Troves are ordered by descending nominal collateral ratio (NICR): collateral amounts per unit of
//! debt, without prices, so keys inserted under different oracle prices stay comparable. The order
//! is kept in an AVL tree keyed by NICR; troves sharing a NICR keep their insertion order, the most
//! recently inserted one being the highest of its group. Positions are fully determined by the
//! tree, so caller hints are only validated, never required.

use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

#[derive(ScryptoSbor)]
pub struct SortedTroves {
    tree: AvlTree<Decimal, Vec<NonFungibleLocalId>>,
    keys: KeyValueStore<NonFungibleLocalId, Decimal>,
    size: u64,
}

impl SortedTroves {
    pub fn new(keys: KeyValueStore<NonFungibleLocalId, Decimal>) -> Self {
        Self {
            tree: AvlTree::new(),
            keys,
            size: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn contains(&self, id: &NonFungibleLocalId) -> bool {
        self.keys.get(id).is_some()
    }

    /// NICR the trove was inserted with.
    pub fn key_of(&self, id: &NonFungibleLocalId) -> Option<Decimal> {
        self.keys.get(id).map(|key| *key)
    }

    /// # Panics
    /// * If the trove is already present.
    pub fn insert(&mut self, id: NonFungibleLocalId, nicr: Decimal) {
        assert!(!self.contains(&id), "SortedTroves: List already contains the node");

        let mut ids: Vec<NonFungibleLocalId> = match self.tree.get_mut(&nicr) {
            Some(existing) => existing.to_vec(),
            None => vec![],
        };
        ids.push(id.clone());
        self.tree.insert(nicr, ids);
        self.keys.insert(id, nicr);
        self.size += 1;
    }

    /// # Panics
    /// * If the trove is not present.
    pub fn remove(&mut self, id: &NonFungibleLocalId) {
        let nicr = self
            .key_of(id)
            .expect("SortedTroves: List does not contain the id");

        let mut ids: Vec<NonFungibleLocalId> = self
            .tree
            .get_mut(&nicr)
            .expect("SortedTroves: Missing tree entry")
            .to_vec();
        ids.retain(|existing| existing != id);

        if ids.is_empty() {
            self.tree.remove(&nicr);
        } else {
            self.tree.insert(nicr, ids);
        }
        self.keys.remove(id);
        self.size -= 1;
    }

    /// Trove with the highest NICR.
    pub fn first(&self) -> Option<NonFungibleLocalId> {
        self.tree
            .range_back(Decimal::ZERO..Decimal::MAX)
            .next()
            .and_then(|(_, ids, _)| ids.last().cloned())
    }

    /// Trove with the lowest NICR.
    pub fn last(&self) -> Option<NonFungibleLocalId> {
        self.tree
            .range(Decimal::ZERO..)
            .next()
            .and_then(|(_, ids, _)| ids.first().cloned())
    }

    /// Neighbour towards the lower end of the list.
    pub fn next_lower(&self, id: &NonFungibleLocalId) -> Option<NonFungibleLocalId> {
        let nicr = self.key_of(id)?;
        let ids = self.ids_at(nicr);
        let position = ids.iter().position(|existing| existing == id)?;
        if position > 0 {
            return Some(ids[position - 1].clone());
        }
        self.highest_below(nicr)
    }

    /// Neighbour towards the higher end of the list.
    pub fn next_higher(&self, id: &NonFungibleLocalId) -> Option<NonFungibleLocalId> {
        let nicr = self.key_of(id)?;
        let ids = self.ids_at(nicr);
        let position = ids.iter().position(|existing| existing == id)?;
        if position + 1 < ids.len() {
            return Some(ids[position + 1].clone());
        }
        self.lowest_above(nicr)
    }

    /// Checks that inserting `nicr` between `upper` and `lower` keeps the list ordered.
    pub fn valid_insert_position(
        &self,
        nicr: Decimal,
        upper: &Option<NonFungibleLocalId>,
        lower: &Option<NonFungibleLocalId>,
    ) -> bool {
        match (upper, lower) {
            (None, None) => self.is_empty(),
            (None, Some(lower)) => {
                self.first().as_ref() == Some(lower)
                    && self.key_of(lower).map_or(false, |key| key <= nicr)
            }
            (Some(upper), None) => {
                self.last().as_ref() == Some(upper)
                    && self.key_of(upper).map_or(false, |key| key >= nicr)
            }
            (Some(upper), Some(lower)) => {
                self.next_lower(upper).as_ref() == Some(lower)
                    && self.key_of(upper).map_or(false, |key| key >= nicr)
                    && self.key_of(lower).map_or(false, |key| key <= nicr)
            }
        }
    }

    /// Returns `(upper, lower)` neighbours for a trove with the given NICR. Valid hints are returned
    /// as given, otherwise the position is looked up in the tree.
    pub fn find_insert_position(
        &self,
        nicr: Decimal,
        upper_hint: Option<NonFungibleLocalId>,
        lower_hint: Option<NonFungibleLocalId>,
    ) -> (Option<NonFungibleLocalId>, Option<NonFungibleLocalId>) {
        if self.valid_insert_position(nicr, &upper_hint, &lower_hint) {
            return (upper_hint, lower_hint);
        }

        let lower = match self.ids_at(nicr).last() {
            Some(id) => Some(id.clone()),
            None => self.highest_below(nicr),
        };
        (self.lowest_above(nicr), lower)
    }

    /// Up to `limit` troves from the highest NICR downwards, with the NICR they are sorted by.
    pub fn list_descending(&self, limit: u64) -> Vec<(NonFungibleLocalId, Decimal)> {
        let mut troves: Vec<(NonFungibleLocalId, Decimal)> = vec![];
        if limit == 0 {
            return troves;
        }
        for (nicr, ids, _next) in self.tree.range_back(Decimal::ZERO..Decimal::MAX) {
            for id in ids.iter().rev() {
                troves.push((id.clone(), nicr));
                if troves.len() as u64 >= limit {
                    return troves;
                }
            }
        }
        troves
    }

    fn ids_at(&self, nicr: Decimal) -> Vec<NonFungibleLocalId> {
        self.tree
            .range(nicr..)
            .next()
            .filter(|(key, _, _)| *key == nicr)
            .map(|(_, ids, _)| ids)
            .unwrap_or_default()
    }

    fn highest_below(&self, nicr: Decimal) -> Option<NonFungibleLocalId> {
        if nicr <= Decimal::ZERO {
            return None;
        }
        self.tree
            .range_back(Decimal::ZERO..nicr)
            .next()
            .and_then(|(_, ids, _)| ids.last().cloned())
    }

    fn lowest_above(&self, nicr: Decimal) -> Option<NonFungibleLocalId> {
        self.tree
            .range(nicr..)
            .find(|(key, _, _)| *key > nicr)
            .and_then(|(_, ids, _)| ids.first().cloned())
    }
}
