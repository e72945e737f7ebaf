//! Fixed-capacity connection tables.
//!
//! Both tables refuse admissions beyond their configured capacity instead of
//! growing; capacity is an admission-control decision made at startup.

use std::collections::HashMap;

use pulsewire_core::{
    address::Address,
    error::{ErrorKind, Result},
};
use tracing::info;

use crate::connection::Connection;

/// Connection table keyed by remote address.
///
/// Used where peers are identified purely by where their datagrams come from.
#[derive(Debug)]
pub struct AddressTable {
    connections: HashMap<Address, Connection>,
    capacity: usize,
}

impl AddressTable {
    /// Creates an empty table admitting at most `capacity` peers.
    pub fn new(capacity: usize) -> Self {
        Self { connections: HashMap::with_capacity(capacity), capacity }
    }

    /// Admits a peer, failing with `CapacityExceeded` when full.
    pub fn admit(&mut self, connection: Connection) -> Result<()> {
        if self.connections.len() >= self.capacity
            && !self.connections.contains_key(&connection.address())
        {
            return Err(ErrorKind::CapacityExceeded);
        }
        self.connections.insert(connection.address(), connection);
        Ok(())
    }

    /// Looks up a peer's connection state.
    pub fn get(&self, address: &Address) -> Option<&Connection> {
        self.connections.get(address)
    }

    /// Looks up a peer's connection state mutably.
    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Connection> {
        self.connections.get_mut(address)
    }

    /// True when `address` has an admitted connection.
    pub fn contains(&self, address: &Address) -> bool {
        self.connections.contains_key(address)
    }

    /// Removes a peer; returns its state if it was present.
    pub fn remove(&mut self, address: &Address) -> Option<Connection> {
        self.connections.remove(address)
    }

    /// Number of admitted peers.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when no peers are admitted.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Iterates over all admitted connections mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }
}

/// Connection table of numbered slots.
///
/// The server hands each admitted peer the index of its slot; under the
/// routed header profile that index travels in every packet. Slot indices are
/// reused as soon as a slot frees up, so an index alone never proves identity;
/// lookups always cross-check the remote address.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<Connection>>,
    by_address: HashMap<Address, u16>,
}

impl SlotTable {
    /// Creates a table with `capacity` empty slots.
    pub fn new(capacity: u16) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            by_address: HashMap::with_capacity(capacity as usize),
        }
    }

    /// Admits a peer into the lowest free slot and returns its index.
    ///
    /// Fails with `CapacityExceeded` when every slot is occupied.
    pub fn admit(&mut self, connection: Connection) -> Result<u16> {
        let address = connection.address();
        if let Some(&index) = self.by_address.get(&address) {
            // Readmission replaces the slot's state wholesale.
            self.slots[index as usize] = Some(connection);
            return Ok(index);
        }
        let free = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(ErrorKind::CapacityExceeded)?;
        let index = free as u16;
        self.slots[free] = Some(connection);
        self.by_address.insert(address, index);
        info!(peer_index = index, %address, "peer admitted");
        Ok(index)
    }

    /// Frees a slot; returns the evicted connection if the slot was occupied.
    pub fn remove(&mut self, index: u16) -> Option<Connection> {
        let connection = self.slots.get_mut(index as usize)?.take()?;
        self.by_address.remove(&connection.address());
        info!(peer_index = index, address = %connection.address(), "peer removed");
        Some(connection)
    }

    /// Returns the slot index admitted for `address`, if any.
    pub fn index_of(&self, address: &Address) -> Option<u16> {
        self.by_address.get(address).copied()
    }

    /// Looks up a slot's connection state.
    pub fn get_mut(&mut self, index: u16) -> Option<&mut Connection> {
        self.slots.get_mut(index as usize)?.as_mut()
    }

    /// Number of occupied slots.
    pub fn active_count(&self) -> usize {
        self.by_address.len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Iterates over occupied slots mutably, with their indices.
    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = (u16, &mut Connection)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|conn| (i as u16, conn)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use pulsewire_core::config::Config;

    use super::*;

    fn connection(last_octet: u8) -> Connection {
        Connection::new(
            Address::from_octets(10, 0, 0, last_octet, 4000),
            &Config::default(),
            Instant::now(),
        )
    }

    #[test]
    fn slots_fill_lowest_first() {
        let mut table = SlotTable::new(4);
        assert_eq!(table.admit(connection(1)).unwrap(), 0);
        assert_eq!(table.admit(connection(2)).unwrap(), 1);
        assert_eq!(table.admit(connection(3)).unwrap(), 2);
        assert_eq!(table.active_count(), 3);
    }

    #[test]
    fn full_table_rejects_admission() {
        let mut table = SlotTable::new(2);
        table.admit(connection(1)).unwrap();
        table.admit(connection(2)).unwrap();
        assert!(matches!(table.admit(connection(3)), Err(ErrorKind::CapacityExceeded)));
        // The rejection left the table untouched.
        assert_eq!(table.active_count(), 2);
        assert_eq!(table.index_of(&connection(3).address()), None);
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut table = SlotTable::new(2);
        table.admit(connection(1)).unwrap();
        table.admit(connection(2)).unwrap();

        assert!(table.remove(0).is_some());
        assert_eq!(table.index_of(&connection(1).address()), None);
        assert_eq!(table.admit(connection(3)).unwrap(), 0);
    }

    #[test]
    fn readmission_resets_state_in_place() {
        let mut table = SlotTable::new(2);
        table.admit(connection(1)).unwrap();
        assert_eq!(table.admit(connection(1)).unwrap(), 0);
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn remove_empty_slot_is_noop() {
        let mut table = SlotTable::new(2);
        assert!(table.remove(1).is_none());
        assert!(table.remove(9).is_none());
    }

    #[test]
    fn address_table_lookup_follows_admission() {
        let mut table = AddressTable::new(2);
        let addr = connection(1).address();
        assert!(!table.contains(&addr));
        assert!(table.get(&addr).is_none());

        table.admit(connection(1)).unwrap();
        assert!(table.contains(&addr));
        assert!(table.get(&addr).is_some());
        assert_eq!(table.iter_mut().count(), 1);

        assert!(table.remove(&addr).is_some());
        assert!(table.is_empty());
        assert!(table.get_mut(&addr).is_none());
    }

    #[test]
    fn address_table_enforces_capacity() {
        let mut table = AddressTable::new(1);
        table.admit(connection(1)).unwrap();
        assert!(matches!(table.admit(connection(2)), Err(ErrorKind::CapacityExceeded)));
        // Re-admitting a known address is allowed at capacity.
        assert!(table.admit(connection(1)).is_ok());
        assert_eq!(table.len(), 1);
    }
}
