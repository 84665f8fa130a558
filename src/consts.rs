//! The constants defined in tables 8-93 and 8-94, plus the DSME container
//! sizing limits used for the fixed-capacity data structures.

/// The number of symbols forming a superframe slot
/// when the superframe order is equal to zero.
#[doc(alias = "aBaseSlotDuration")]
pub const BASE_SLOT_DURATION: u32 = 60;

/// The number of symbols forming a superframe when
/// the superframe order is equal to zero.
#[doc(alias = "aBaseSuperframeDuration")]
pub const BASE_SUPERFRAME_DURATION: u32 = BASE_SLOT_DURATION * NUM_SUPERFRAME_SLOTS;

/// The number of slots contained in any superframe.
#[doc(alias = "aNumSuperframeSlots")]
pub const NUM_SUPERFRAME_SLOTS: u32 = 16;

/// The maximum PSDU size (in octets) the PHY shall be able to receive.
#[doc(alias = "aMaxPHYPacketSize")]
pub const MAX_PHY_PACKET_SIZE: usize = 127;

/// Upper bound on the number of superframes in a multi-superframe
/// (`2^(MO - SO)`) this implementation supports. Sizes the slot allocation
/// bitmap.
pub const MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME: usize = 16;

/// The number of guaranteed time slots in the CFP of a DSME superframe
/// without CAP reduction.
pub const MAX_GTS_SLOTS: usize = 7;

/// Upper bound on the number of channels a DSME sub-block spans.
pub const MAX_CHANNELS: usize = 16;

/// Number of bits in a DSME SAB sub-block at the maximum geometry, one per
/// (slot, channel) pair of a single superframe.
pub const SUB_BLOCK_LENGTH_BITS: usize = MAX_GTS_SLOTS * MAX_CHANNELS;

/// Number of octets backing a DSME SAB sub-block at the maximum geometry.
pub const SUB_BLOCK_LENGTH_BYTES: usize = SUB_BLOCK_LENGTH_BITS.div_ceil(8);

/// Capacity of the allocation counter table: every GTS of every superframe
/// in the multi-superframe could in principle involve this device.
pub const MAX_ACT_ENTRIES: usize = MAX_GTS_SLOTS * MAX_SUPERFRAMES_PER_MULTI_SUPERFRAME;

/// Default number of concurrently running GTS handshake state machines.
///
/// One handshake per peer can be in flight at a time; more instances allow
/// negotiating with several neighbors in parallel.
pub const GTS_STATE_MULTIPLICITY: usize = 2;
