//! Addresses that only become decodable after a registering event was seen.

use alloy_primitives::Address;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass {
    /// Personal v1 tokens announced by `Signup`.
    CrcV1Token,
    /// ERC20 wrappers announced by `ERC20WrapperDeployed`.
    Erc20Wrapper,
    /// Safes created by the Safe proxy factory.
    SafeProxy,
    /// Gnosis Pay delay modules created by the module proxy factory.
    PayDelayModule,
}

/// Append-only, process-wide set of discovered contract addresses.
///
/// Shared by reference between decoder invocations. Inserts are add-if-absent so concurrent
/// inserts of the same address keep one entry.
#[derive(Debug, Default)]
pub struct DiscoveredAddresses {
    classes: RwLock<HashMap<AddressClass, HashSet<Address>>>,
}

impl DiscoveredAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the address was not known before.
    pub fn insert(&self, class: AddressClass, address: Address) -> bool {
        if self.contains(class, address) {
            return false;
        }
        self.classes
            .write()
            .entry(class)
            .or_default()
            .insert(address)
    }

    pub fn extend(&self, class: AddressClass, addresses: impl IntoIterator<Item = Address>) -> usize {
        let mut classes = self.classes.write();
        let set = classes.entry(class).or_default();
        addresses
            .into_iter()
            .filter(|address| set.insert(*address))
            .count()
    }

    pub fn contains(&self, class: AddressClass, address: Address) -> bool {
        self.classes
            .read()
            .get(&class)
            .is_some_and(|set| set.contains(&address))
    }

    #[cfg(test)]
    pub fn len(&self, class: AddressClass) -> usize {
        self.classes.read().get(&class).map_or(0, HashSet::len)
    }
}
