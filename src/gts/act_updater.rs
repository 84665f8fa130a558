//! The allocation counter table transitions driven by handshake outcomes.
//!
//! Every outcome of the three-way handshake maps to exactly one function
//! here, and nothing else writes the ACT on behalf of the handshake. All
//! functions are idempotent with respect to entries already in a terminal
//! state.
//!
//! Allocation entries move `Unconfirmed` → `Valid` only when the closing
//! notify was delivered (initiator) or received (responder); at that moment
//! the slot allocation bitmap is brought in line. Deallocation removes the
//! entries and clears the bitmap on the same notify edge.

use crate::{
    act::ActState,
    pib::MacPib,
    sab::SabSpecification,
    wire::{GtsManagement, ManagementType, ShortAddress},
};

/// A positive reply was queued for transmission (responder side).
pub(crate) fn approval_queued(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    address: ShortAddress,
) {
    match management.management_type {
        ManagementType::Allocation => {
            // The direction travels from the requester's point of view.
            pib.act.add_allocations(
                spec,
                management.direction.invert(),
                address,
                ActState::Unconfirmed,
            );
        }
        ManagementType::Deallocation => {
            pib.act.set_state_for(spec, ActState::Deallocated);
        }
        _ => {}
    }
}

/// The positive reply reached the requester; the entry stays unconfirmed
/// until the notify comes back around (responder side).
pub(crate) fn approval_delivered(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    _address: ShortAddress,
) {
    trace!("GTS approval delivered, awaiting notify");
}

/// A positive reply arrived for our own request (initiator side).
pub(crate) fn approval_received(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    address: ShortAddress,
) {
    if management.management_type == ManagementType::Allocation {
        pib.act
            .add_allocations(spec, management.direction, address, ActState::Unconfirmed);
    }
}

/// Our broadcast notify went out (initiator side).
pub(crate) fn notify_delivered(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    address: ShortAddress,
) {
    confirm_handshake(pib, spec, management, address);
}

/// The notify closing the handshake arrived (responder side).
pub(crate) fn notify_received(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    address: ShortAddress,
) {
    confirm_handshake(pib, spec, management, address);
}

fn confirm_handshake(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    address: ShortAddress,
) {
    match management.management_type {
        ManagementType::Allocation => {
            debug!("GTS allocation with {} confirmed", address);
            pib.act.set_state_for(spec, ActState::Valid);
            pib.sab.add_occupied(spec);
        }
        ManagementType::Deallocation => {
            debug!("GTS deallocation with {} confirmed", address);
            pib.act.remove_allocations(spec);
            pib.sab.remove_occupied(spec);
        }
        _ => {}
    }
}

/// A negative reply arrived for our own request; nothing was installed.
pub(crate) fn disapproved(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    address: ShortAddress,
) {
    debug!("GTS request denied by {}", address);
}

/// Our negative reply went out; there never was an entry.
pub(crate) fn disapproval_delivered(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    _address: ShortAddress,
) {
    trace!("GTS disapproval delivered");
}

/// The negative reply was never acknowledged; there never was an entry.
pub(crate) fn disapproval_no_ack(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    _address: ShortAddress,
) {
    trace!("GTS disapproval not acknowledged");
}

/// The negative reply never made it onto the air; there never was an entry.
pub(crate) fn disapproval_access_failure(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    _address: ShortAddress,
) {
    trace!("GTS disapproval failed channel access");
}

/// The positive reply never made it onto the air; roll the queued entries
/// back (responder side).
pub(crate) fn approval_access_failure(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    _address: ShortAddress,
) {
    back_out(pib, spec, management);
}

/// Our request was never acknowledged; no entry existed yet.
pub(crate) fn request_no_ack(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    _address: ShortAddress,
) {
    trace!("GTS request not acknowledged");
}

/// Our request never made it onto the air; no entry existed yet.
pub(crate) fn request_access_failure(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    _address: ShortAddress,
) {
    trace!("GTS request failed channel access");
}

/// The closing notify could not be sent (initiator side).
pub(crate) fn notify_access_failure(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    _address: ShortAddress,
) {
    back_out(pib, spec, management);
}

/// The closing notify never arrived (responder side).
pub(crate) fn notify_timeout(
    pib: &mut MacPib,
    spec: &SabSpecification,
    management: &GtsManagement,
    _address: ShortAddress,
) {
    back_out(pib, spec, management);
}

fn back_out(pib: &mut MacPib, spec: &SabSpecification, management: &GtsManagement) {
    match management.management_type {
        ManagementType::Allocation => {
            // The unconfirmed entries are marked invalid and left for the
            // expiration sweep to report.
            pib.act.set_state_for(spec, ActState::Invalid);
        }
        ManagementType::Deallocation => {
            // The entries stay deallocated; a repeated deallocation
            // handshake removes them for good.
            trace!("GTS deallocation handshake failed, entries stay deallocated");
        }
        _ => {}
    }
}

/// No reply ever arrived for our request; no entry existed yet.
pub(crate) fn response_timeout(
    _pib: &mut MacPib,
    _spec: &SabSpecification,
    _management: &GtsManagement,
    _address: ShortAddress,
) {
    trace!("GTS reply never arrived");
}

/// A peer announced that slots of ours collide with an existing allocation.
/// The conflicting entries are marked invalid so the expiration sweep
/// triggers their deallocation.
pub(crate) fn duplicate_allocation(pib: &mut MacPib, spec: &SabSpecification) {
    pib.act.set_state_for(spec, ActState::Invalid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        act::ActEntry,
        pib::DsmeSuperframeGeometry,
        wire::{Direction, GtsStatus, PanId, Priority},
    };

    fn test_pib() -> MacPib {
        MacPib::new(
            ShortAddress(0x0001),
            PanId(0x2345),
            DsmeSuperframeGeometry {
                num_superframes_per_multi_superframe: 4,
                num_gtslots: 7,
                num_channels: 16,
                final_cap_slot: 8,
            },
        )
    }

    fn management(management_type: ManagementType) -> GtsManagement {
        GtsManagement {
            management_type,
            direction: Direction::Tx,
            prioritized_channel_access: Priority::Low,
            status: GtsStatus::Success,
        }
    }

    #[test]
    fn responder_entries_use_the_inverted_direction() {
        let mut pib = test_pib();
        let spec = SabSpecification::for_slot(&pib.geometry, 1, 3, 5);

        approval_queued(
            &mut pib,
            &spec,
            &management(ManagementType::Allocation),
            ShortAddress(0x0002),
        );

        let entry = pib.act.find(1, 3).unwrap();
        assert_eq!(entry.state, ActState::Unconfirmed);
        assert_eq!(entry.direction, Direction::Rx);
        assert_eq!(entry.address, ShortAddress(0x0002));
    }

    #[test]
    fn notify_confirms_allocation_and_mirrors_the_sab() {
        let mut pib = test_pib();
        let spec = SabSpecification::for_slot(&pib.geometry, 1, 3, 5);
        let management = management(ManagementType::Allocation);

        approval_received(&mut pib, &spec, &management, ShortAddress(0x0002));
        assert_eq!(pib.act.find(1, 3).unwrap().state, ActState::Unconfirmed);
        assert!(!pib.sab.is_occupied(1, 3, 5));

        notify_delivered(&mut pib, &spec, &management, ShortAddress(0x0002));
        assert_eq!(pib.act.find(1, 3).unwrap().state, ActState::Valid);
        assert!(pib.sab.is_occupied(1, 3, 5));
    }

    #[test]
    fn confirmed_deallocation_removes_entry_and_sab_bit() {
        let mut pib = test_pib();
        let spec = SabSpecification::for_slot(&pib.geometry, 0, 4, 2);
        let allocation = management(ManagementType::Allocation);

        approval_received(&mut pib, &spec, &allocation, ShortAddress(0x0002));
        notify_delivered(&mut pib, &spec, &allocation, ShortAddress(0x0002));
        assert!(pib.sab.is_occupied(0, 4, 2));

        let deallocation = management(ManagementType::Deallocation);
        notify_delivered(&mut pib, &spec, &deallocation, ShortAddress(0x0002));
        assert!(pib.act.find(0, 4).is_none());
        assert!(!pib.sab.is_occupied(0, 4, 2));
    }

    #[test]
    fn failed_notify_invalidates_the_allocation() {
        let mut pib = test_pib();
        let spec = SabSpecification::for_slot(&pib.geometry, 1, 3, 5);
        let management = management(ManagementType::Allocation);

        approval_received(&mut pib, &spec, &management, ShortAddress(0x0002));
        notify_access_failure(&mut pib, &spec, &management, ShortAddress(0x0002));
        assert_eq!(pib.act.find(1, 3).unwrap().state, ActState::Invalid);
    }

    #[test]
    fn duplicate_announcement_invalidates_matching_channel_only() {
        let mut pib = test_pib();
        pib.act
            .add(ActEntry {
                superframe_id: 2,
                slot_id: 5,
                channel: 9,
                direction: Direction::Tx,
                address: ShortAddress(0x0002),
                state: ActState::Valid,
                idle_counter: 0,
            })
            .unwrap();

        let spec = SabSpecification::for_slot(&pib.geometry, 2, 5, 8);
        duplicate_allocation(&mut pib, &spec);
        assert_eq!(pib.act.find(2, 5).unwrap().state, ActState::Valid);

        let spec = SabSpecification::for_slot(&pib.geometry, 2, 5, 9);
        duplicate_allocation(&mut pib, &spec);
        assert_eq!(pib.act.find(2, 5).unwrap().state, ActState::Invalid);
    }
}
