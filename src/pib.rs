//! The slice of the MAC PIB the GTS management plane works against.

use crate::{
    act::AllocationCounterTable,
    consts::{MAX_CHANNELS, MAX_GTS_SLOTS, MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME},
    sab::SlotAllocationBitmap,
    wire::{PanId, ShortAddress},
};

/// The static layout of the multi-superframe, derived from the beacon
/// configuration at association time. Fixed for the lifetime of the PAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct DsmeSuperframeGeometry {
    /// The number of superframes forming one multi-superframe, `2^(MO - SO)`.
    pub num_superframes_per_multi_superframe: u8,
    /// The number of guaranteed time slots in the CFP of one superframe.
    pub num_gtslots: u8,
    /// The number of channels available for slot hopping.
    pub num_channels: u8,
    /// The last slot of the contention access period; the CFP starts one
    /// slot later.
    pub final_cap_slot: u8,
}

impl DsmeSuperframeGeometry {
    /// Number of octets of a SAB sub-block for this geometry.
    pub fn sub_block_length_bytes(&self) -> u8 {
        (u16::from(self.num_gtslots) * u16::from(self.num_channels)).div_ceil(8) as u8
    }

    /// True when the geometry fits the compiled-in container limits.
    pub fn fits_limits(&self) -> bool {
        usize::from(self.num_superframes_per_multi_superframe)
            <= MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME
            && usize::from(self.num_gtslots) <= MAX_GTS_SLOTS
            && usize::from(self.num_channels) <= MAX_CHANNELS
    }
}

/// The MAC PIB attributes consumed by the GTS manager, together with the two
/// shared slot bookkeeping structures it maintains.
#[derive(Debug, Clone)]
pub struct MacPib {
    /// The address that the device uses to communicate in the PAN.
    #[doc(alias = "macShortAddress")]
    pub short_address: ShortAddress,
    /// The identifier of the PAN on which the device is operating.
    #[doc(alias = "macPANId")]
    pub pan_id: PanId,
    /// The length of the active portion of the superframe as the exponent
    /// in `aBaseSuperframeDuration × 2^SO`.
    ///
    /// ## Range
    /// 0–14
    #[doc(alias = "macSuperframeOrder")]
    pub superframe_order: u8,
    /// The maximum time, in multiples of aBaseSuperframeDuration, a device
    /// shall wait for a response command frame to be available following a
    /// request command frame.
    ///
    /// ## Range
    /// 2-64
    #[doc(alias = "macResponseWaitTime")]
    pub response_wait_time: u8,
    /// The number of idle multi-superframes after which an allocated
    /// DSME-GTS expires and is reported for deallocation.
    #[doc(alias = "macDSMEGTSExpirationTime")]
    pub dsme_gts_expiration_time: u16,
    /// The multi-superframe layout.
    pub geometry: DsmeSuperframeGeometry,
    /// The slot allocation bitmap.
    #[doc(alias = "macDSMESAB")]
    pub sab: SlotAllocationBitmap,
    /// The allocation counter table.
    #[doc(alias = "macDSMEACT")]
    pub act: AllocationCounterTable,
}

impl MacPib {
    pub fn new(short_address: ShortAddress, pan_id: PanId, geometry: DsmeSuperframeGeometry) -> Self {
        assert!(geometry.fits_limits());
        Self {
            short_address,
            pan_id,
            superframe_order: 0,
            response_wait_time: 32,
            dsme_gts_expiration_time: 7,
            geometry,
            sab: SlotAllocationBitmap::new(&geometry),
            act: AllocationCounterTable::new(&geometry),
        }
    }
}
