//! The DSME allocation counter table (`macDSMEACT`): one entry per
//! guaranteed time slot this device takes part in, together with the idle
//! counter driving expiration.

use crate::{
    consts::MAX_ACT_ENTRIES,
    pib::DsmeSuperframeGeometry,
    sab::SabSpecification,
    wire::{Direction, ShortAddress},
};

/// Lifecycle state of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ActState {
    /// The handshake completed; the slot is usable.
    Valid,
    /// Granted, but the closing notify has not been seen yet.
    Unconfirmed,
    /// The allocation failed or conflicts with a neighbor; it is waiting to
    /// be cleaned up by a deallocation.
    Invalid,
    /// A deallocation handshake for this slot is in progress.
    Deallocated,
    /// The entry is gone for all purposes and only awaits removal.
    Removed,
}

impl ActState {
    /// Terminal states are never left again by handshake outcomes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActState::Deallocated | ActState::Removed)
    }
}

/// A single allocation this device participates in. At most one entry exists
/// per (superframe, slot) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ActEntry {
    pub superframe_id: u8,
    pub slot_id: u8,
    pub channel: u8,
    /// `Tx` means this device transmits in the slot.
    pub direction: Direction,
    /// The one-hop neighbor on the other end of the slot.
    pub address: ShortAddress,
    pub state: ActState,
    /// Incremented once per multi-superframe, reset on TX/RX activity in the
    /// slot. Drives the expiration sweep.
    pub idle_counter: u16,
}

/// The allocation counter table, keyed on (superframe, slot).
#[doc(alias = "macDSMEACT")]
#[derive(Debug, Clone)]
pub struct AllocationCounterTable {
    num_channels: u8,
    entries: heapless::Vec<ActEntry, MAX_ACT_ENTRIES>,
}

impl AllocationCounterTable {
    pub fn new(geometry: &DsmeSuperframeGeometry) -> Self {
        Self {
            num_channels: geometry.num_channels,
            entries: heapless::Vec::new(),
        }
    }

    pub fn find(&self, superframe_id: u8, slot_id: u8) -> Option<&ActEntry> {
        self.entries
            .iter()
            .find(|e| e.superframe_id == superframe_id && e.slot_id == slot_id)
    }

    pub fn find_mut(&mut self, superframe_id: u8, slot_id: u8) -> Option<&mut ActEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.superframe_id == superframe_id && e.slot_id == slot_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a new entry. Refused when the key is already taken or the
    /// table is full.
    pub fn add(&mut self, entry: ActEntry) -> Result<(), ActEntry> {
        if self.find(entry.superframe_id, entry.slot_id).is_some() {
            warn!(
                "ACT entry for superframe {} slot {} already exists",
                entry.superframe_id, entry.slot_id
            );
            return Err(entry);
        }
        self.entries.push(entry)
    }

    /// Add one entry per set bit of the specification.
    pub fn add_allocations(
        &mut self,
        spec: &SabSpecification,
        direction: Direction,
        address: ShortAddress,
        state: ActState,
    ) {
        let num_channels = usize::from(self.num_channels);
        for bit in spec.sub_block.iter_set_bits() {
            let entry = ActEntry {
                superframe_id: spec.sub_block_index,
                slot_id: (bit / num_channels) as u8,
                channel: (bit % num_channels) as u8,
                direction,
                address,
                state,
                idle_counter: 0,
            };
            if self.add(entry).is_err() {
                error!(
                    "could not record allocation for superframe {} slot {}",
                    entry.superframe_id, entry.slot_id
                );
            }
        }
    }

    /// Move the entries matching the specification (slot and channel) into
    /// `state`. Entries in a terminal state are left untouched.
    pub fn set_state_for(&mut self, spec: &SabSpecification, state: ActState) {
        let num_channels = usize::from(self.num_channels);
        for bit in spec.sub_block.iter_set_bits() {
            let slot_id = (bit / num_channels) as u8;
            let channel = (bit % num_channels) as u8;
            if let Some(entry) = self.find_mut(spec.sub_block_index, slot_id) {
                if entry.channel != channel || entry.state.is_terminal() {
                    continue;
                }
                entry.state = state;
            }
        }
    }

    /// Drop the entries matching the specification (slot and channel).
    pub fn remove_allocations(&mut self, spec: &SabSpecification) {
        let num_channels = usize::from(self.num_channels);
        for bit in spec.sub_block.iter_set_bits() {
            let slot_id = (bit / num_channels) as u8;
            let channel = (bit % num_channels) as u8;
            let position = self.entries.iter().position(|e| {
                e.superframe_id == spec.sub_block_index
                    && e.slot_id == slot_id
                    && e.channel == channel
            });
            if let Some(position) = position {
                self.entries.swap_remove(position);
            }
        }
    }

    /// Called at every multi-superframe boundary.
    pub fn increment_idle_counters(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.idle_counter = entry.idle_counter.saturating_add(1);
        }
    }

    /// Called from the CFP data path whenever a frame is sent or received in
    /// the slot, and by the expiration sweep once it has reported a slot.
    pub fn reset_idle_counter(&mut self, superframe_id: u8, slot_id: u8) {
        if let Some(entry) = self.find_mut(superframe_id, slot_id) {
            entry.idle_counter = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pib::DsmeSuperframeGeometry;

    fn geometry() -> DsmeSuperframeGeometry {
        DsmeSuperframeGeometry {
            num_superframes_per_multi_superframe: 4,
            num_gtslots: 7,
            num_channels: 16,
            final_cap_slot: 8,
        }
    }

    fn entry(superframe_id: u8, slot_id: u8, channel: u8, state: ActState) -> ActEntry {
        ActEntry {
            superframe_id,
            slot_id,
            channel,
            direction: Direction::Tx,
            address: ShortAddress(0x0002),
            state,
            idle_counter: 0,
        }
    }

    #[test]
    fn at_most_one_entry_per_slot() {
        let mut act = AllocationCounterTable::new(&geometry());
        act.add(entry(1, 3, 5, ActState::Valid)).unwrap();
        assert!(act.add(entry(1, 3, 9, ActState::Valid)).is_err());
        assert_eq!(act.len(), 1);
    }

    #[test]
    fn add_allocations_maps_bits_to_slots_and_channels() {
        let mut act = AllocationCounterTable::new(&geometry());
        let mut spec = SabSpecification::new(2, geometry().sub_block_length_bytes());
        spec.sub_block.set(3 * 16 + 5, true);
        spec.sub_block.set(6 * 16 + 15, true);

        act.add_allocations(&spec, Direction::Rx, ShortAddress(0x0004), ActState::Unconfirmed);

        let first = act.find(2, 3).unwrap();
        assert_eq!(first.channel, 5);
        assert_eq!(first.direction, Direction::Rx);
        assert_eq!(first.state, ActState::Unconfirmed);
        let second = act.find(2, 6).unwrap();
        assert_eq!(second.channel, 15);
    }

    #[test]
    fn set_state_skips_other_channels_and_terminal_entries() {
        let geometry = geometry();
        let mut act = AllocationCounterTable::new(&geometry);
        act.add(entry(0, 1, 2, ActState::Unconfirmed)).unwrap();
        act.add(entry(0, 2, 7, ActState::Deallocated)).unwrap();

        // Wrong channel: no change
        act.set_state_for(&SabSpecification::for_slot(&geometry, 0, 1, 3), ActState::Valid);
        assert_eq!(act.find(0, 1).unwrap().state, ActState::Unconfirmed);

        // Matching channel
        act.set_state_for(&SabSpecification::for_slot(&geometry, 0, 1, 2), ActState::Valid);
        assert_eq!(act.find(0, 1).unwrap().state, ActState::Valid);

        // Terminal entries stay put
        act.set_state_for(&SabSpecification::for_slot(&geometry, 0, 2, 7), ActState::Valid);
        assert_eq!(act.find(0, 2).unwrap().state, ActState::Deallocated);
    }

    #[test]
    fn idle_counters_increment_and_reset() {
        let mut act = AllocationCounterTable::new(&geometry());
        act.add(entry(1, 3, 5, ActState::Valid)).unwrap();

        act.increment_idle_counters();
        act.increment_idle_counters();
        assert_eq!(act.find(1, 3).unwrap().idle_counter, 2);

        act.reset_idle_counter(1, 3);
        assert_eq!(act.find(1, 3).unwrap().idle_counter, 0);
    }

    #[test]
    fn remove_allocations_drops_matching_entries() {
        let geometry = geometry();
        let mut act = AllocationCounterTable::new(&geometry);
        act.add(entry(1, 3, 5, ActState::Valid)).unwrap();

        // Wrong channel leaves the entry in place
        act.remove_allocations(&SabSpecification::for_slot(&geometry, 1, 3, 4));
        assert!(act.find(1, 3).is_some());

        act.remove_allocations(&SabSpecification::for_slot(&geometry, 1, 3, 5));
        assert!(act.find(1, 3).is_none());
    }
}
