// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Startup-time registry of queue addresses.
//!
//! Every contract registered on a dispatcher claims the queue name it resolves
//! to. Two contracts claiming the same address, or a contract resolving to an
//! empty one, is a configuration error caught before any consumer starts.

use crate::errors::TopologyError;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct AddressRegistry {
    // address -> owner
    addresses: HashMap<String, String>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        AddressRegistry::default()
    }

    /// Claims `address` on behalf of `owner`.
    ///
    /// # Errors
    /// `TopologyError::DuplicateAddress` when the address is already taken and
    /// `TopologyError::InvalidContract` when it is blank.
    pub fn register(&mut self, address: &str, owner: &str) -> Result<(), TopologyError> {
        if address.trim().is_empty() {
            return Err(TopologyError::InvalidContract(format!(
                "`{owner}` resolves to a blank address"
            )));
        }

        if let Some(existing) = self.addresses.get(address) {
            return Err(TopologyError::DuplicateAddress {
                address: address.to_owned(),
                owner: existing.clone(),
            });
        }

        self.addresses.insert(address.to_owned(), owner.to_owned());
        Ok(())
    }

    /// Gives `address` up again, e.g. when its subscription never started.
    pub fn release(&mut self, address: &str) {
        self.addresses.remove(address);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
