//! Wire representations shared by the GTS command frames.

use byte::{ctx::LE, BytesExt, TryRead, TryWrite};

mod gts;

pub use gts::{
    Direction, GtsCommand, GtsCommandFrame, GtsManagement, GtsReplyNotifyCmd, GtsRequestCmd,
    GtsStatus, ManagementType, Priority,
};

/// A 16-bit short address as allocated during association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ShortAddress(pub u16);

impl ShortAddress {
    /// The broadcast short address.
    pub const BROADCAST: Self = ShortAddress(0xffff);
    /// The device is associated, but holds no short address. Also used as the
    /// "no partner" marker in the handshake bookkeeping.
    pub const NO_SHORT_ADDRESS: Self = ShortAddress(0xfffe);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl core::fmt::Display for ShortAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl TryRead<'_> for ShortAddress {
    fn try_read(bytes: &[u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        let raw = bytes.read_with::<u16>(offset, LE)?;
        Ok((ShortAddress(raw), *offset))
    }
}

impl TryWrite for ShortAddress {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        bytes.write_with(offset, self.0, LE)?;
        Ok(*offset)
    }
}

/// The identifier of the PAN the device operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct PanId(pub u16);

impl PanId {
    pub const fn broadcast() -> Self {
        PanId(0xffff)
    }
}

/// MAC frame types. GTS management traffic travels in command frames; the
/// other variants exist for the header of frames handed in by the MAC
/// dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum FrameType {
    Beacon,
    #[default]
    Data,
    Acknowledgement,
    MacCommand,
}

/// Command frame identifiers of the DSME GTS management commands,
/// as defined in Table 7-49.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandFrameId {
    DsmeGtsRequest = 0x12,
    DsmeGtsReply = 0x13,
    DsmeGtsNotify = 0x14,
}

impl TryFrom<u8> for CommandFrameId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x12 => Ok(Self::DsmeGtsRequest),
            0x13 => Ok(Self::DsmeGtsReply),
            0x14 => Ok(Self::DsmeGtsNotify),
            _ => Err(value),
        }
    }
}

impl From<CommandFrameId> for u8 {
    fn from(value: CommandFrameId) -> Self {
        value as u8
    }
}

/// The slice of the MAC header the GTS management plane reads and writes.
/// GTS commands always use short addressing with `AckRequest` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct MessageHeader {
    pub frame_type: FrameType,
    pub ack_request: bool,
    pub pan_id: PanId,
    pub src_addr: ShortAddress,
    pub dst_addr: ShortAddress,
}

impl MessageHeader {
    pub const fn new() -> Self {
        Self {
            frame_type: FrameType::Data,
            ack_request: false,
            pan_id: PanId::broadcast(),
            src_addr: ShortAddress::NO_SHORT_ADDRESS,
            dst_addr: ShortAddress::NO_SHORT_ADDRESS,
        }
    }
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self::new()
    }
}
