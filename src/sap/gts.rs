use crate::{
    sab::SabSpecification,
    wire::{Direction, GtsManagement, GtsReplyNotifyCmd, GtsRequestCmd, GtsStatus, ManagementType, Priority, ShortAddress},
};

/// The MLME-DSME-GTS.request primitive allows a device to start the
/// negotiation of new DSME-GTSs with a one-hop neighbor, or to start the
/// deallocation of existing ones.
///
/// On receipt, the MLME performs the DSME-GTS allocation or deallocation
/// handshake described in 6.2.21.1, depending on the management type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsmeGtsRequest {
    /// The one-hop neighbor the handshake is directed at.
    pub device_address: ShortAddress,
    pub management: GtsManagement,
    pub request: GtsRequestCmd,
}

/// The MLME-DSME-GTS.response primitive answers a previously indicated
/// DSME-GTS request. A positive response is broadcast so that the one-hop
/// neighborhood learns about the new allocation; a negative response goes
/// back to the requester alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsmeGtsResponse {
    pub management: GtsManagement,
    pub reply: GtsReplyNotifyCmd,
}

/// The MLME-DSME-GTS.confirm primitive reports the outcome of a
/// previously issued DSME-GTS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsmeGtsConfirm {
    /// The neighbor the handshake was directed at.
    pub device_address: ShortAddress,
    pub management_type: ManagementType,
    pub direction: Direction,
    pub prioritized_channel_access: Priority,
    pub sab_spec: SabSpecification,
    pub status: GtsStatus,
}

/// The MLME-DSME-GTS.indication primitive reports an incoming DSME-GTS
/// request, an expired allocation, or a duplicate-allocation announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsmeGtsIndication {
    /// The neighbor the slots are shared with.
    pub device_address: ShortAddress,
    pub management_type: ManagementType,
    pub direction: Direction,
    pub prioritized_channel_access: Priority,
    pub num_slots: u8,
    pub preferred_superframe_id: u8,
    pub preferred_slot_id: u8,
    pub sab_spec: SabSpecification,
}
