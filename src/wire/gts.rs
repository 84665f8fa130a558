//! The DSME GTS command frame contents: a management field followed by
//! either a request command or a reply/notify command.

use byte::{BytesExt, TryRead, TryWrite};

use super::{CommandFrameId, ShortAddress};
use crate::sab::SabSpecification;

/// What a GTS management command asks for, as defined in 7.5.11.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum ManagementType {
    Deallocation = 0x00,
    Allocation = 0x01,
    DuplicatedAllocationNotification = 0x02,
    Expiration = 0x03,
}

impl TryFrom<u8> for ManagementType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Deallocation),
            0x01 => Ok(Self::Allocation),
            0x02 => Ok(Self::DuplicatedAllocationNotification),
            0x03 => Ok(Self::Expiration),
            _ => Err(value),
        }
    }
}

/// Direction of the guaranteed time slots being negotiated, from the point
/// of view of the device issuing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    /// The same link seen from the other end.
    pub fn invert(self) -> Self {
        match self {
            Direction::Tx => Direction::Rx,
            Direction::Rx => Direction::Tx,
        }
    }
}

/// Prioritized channel access as requested for the slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Priority {
    Low,
    High,
}

/// Outcome of a GTS negotiation step, carried in replies and confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum GtsStatus {
    Success = 0x00,
    Denied = 0x01,
    NoAck = 0x02,
    NoData = 0x03,
    ChannelAccessFailure = 0x04,
    TransactionOverflow = 0x05,
}

impl GtsStatus {
    /// `NoData` doubles on the wire as "the destination was busy" when a
    /// responder rejects a request because all of its handshake slots are
    /// occupied. Use this alias when that meaning is intended.
    pub const PEER_BUSY: Self = GtsStatus::NoData;
}

impl TryFrom<u8> for GtsStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::Denied),
            0x02 => Ok(Self::NoAck),
            0x03 => Ok(Self::NoData),
            0x04 => Ok(Self::ChannelAccessFailure),
            0x05 => Ok(Self::TransactionOverflow),
            _ => Err(value),
        }
    }
}

const TYPE_MASK: u8 = 0b0000_0111;
const DIRECTION: u8 = 0b0000_1000;
const PRIORITY: u8 = 0b0001_0000;

/// The GTS management field present in every GTS command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct GtsManagement {
    pub management_type: ManagementType,
    pub direction: Direction,
    pub prioritized_channel_access: Priority,
    pub status: GtsStatus,
}

impl TryRead<'_> for GtsManagement {
    fn try_read(bytes: &[u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        let packed: u8 = bytes.read(offset)?;
        let management_type = ManagementType::try_from(packed & TYPE_MASK)
            .map_err(|_| byte::Error::BadInput {
                err: "invalid GTS management type",
            })?;
        let direction = if packed & DIRECTION == DIRECTION {
            Direction::Rx
        } else {
            Direction::Tx
        };
        let prioritized_channel_access = if packed & PRIORITY == PRIORITY {
            Priority::High
        } else {
            Priority::Low
        };
        let status_byte: u8 = bytes.read(offset)?;
        let status = GtsStatus::try_from(status_byte).map_err(|_| byte::Error::BadInput {
            err: "invalid GTS status",
        })?;
        Ok((
            Self {
                management_type,
                direction,
                prioritized_channel_access,
                status,
            },
            *offset,
        ))
    }
}

impl TryWrite for GtsManagement {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        let mut packed = self.management_type as u8;
        if self.direction == Direction::Rx {
            packed |= DIRECTION;
        }
        if self.prioritized_channel_access == Priority::High {
            packed |= PRIORITY;
        }
        bytes.write(offset, packed)?;
        bytes.write(offset, self.status as u8)?;
        Ok(*offset)
    }
}

/// The body of a DSME GTS request command, as defined in 7.5.11.1. A request
/// with the duplicated-allocation-notification management type reuses this
/// body to report the conflicting slots.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct GtsRequestCmd {
    pub num_slots: u8,
    pub preferred_superframe_id: u8,
    pub preferred_slot_id: u8,
    pub sab_spec: SabSpecification,
}

impl TryRead<'_> for GtsRequestCmd {
    fn try_read(bytes: &[u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        Ok((
            Self {
                num_slots: bytes.read(offset)?,
                preferred_superframe_id: bytes.read(offset)?,
                preferred_slot_id: bytes.read(offset)?,
                sab_spec: bytes.read(offset)?,
            },
            *offset,
        ))
    }
}

impl TryWrite for GtsRequestCmd {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        bytes.write(offset, self.num_slots)?;
        bytes.write(offset, self.preferred_superframe_id)?;
        bytes.write(offset, self.preferred_slot_id)?;
        bytes.write(offset, self.sab_spec)?;
        Ok(*offset)
    }
}

/// The body shared by the DSME GTS reply and notify commands, as defined in
/// 7.5.11.2 and 7.5.11.3.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct GtsReplyNotifyCmd {
    /// The device the handshake is about. Not necessarily the frame
    /// destination: positive replies and notifies go out as broadcasts.
    pub destination_address: ShortAddress,
    pub sab_spec: SabSpecification,
}

impl TryRead<'_> for GtsReplyNotifyCmd {
    fn try_read(bytes: &[u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        Ok((
            Self {
                destination_address: bytes.read(offset)?,
                sab_spec: bytes.read(offset)?,
            },
            *offset,
        ))
    }
}

impl TryWrite for GtsReplyNotifyCmd {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        bytes.write(offset, self.destination_address)?;
        bytes.write(offset, self.sab_spec)?;
        Ok(*offset)
    }
}

/// The command-specific part of a GTS command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum GtsCommand {
    Request(GtsRequestCmd),
    ReplyNotify(GtsReplyNotifyCmd),
}

impl GtsCommand {
    pub fn sab_spec(&self) -> &SabSpecification {
        match self {
            GtsCommand::Request(cmd) => &cmd.sab_spec,
            GtsCommand::ReplyNotify(cmd) => &cmd.sab_spec,
        }
    }
}

/// A full GTS command frame payload: command identifier, management field and
/// the command body selected by the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct GtsCommandFrame {
    pub command_id: CommandFrameId,
    pub management: GtsManagement,
    pub command: GtsCommand,
}

impl TryRead<'_> for GtsCommandFrame {
    fn try_read(bytes: &[u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        let id_byte: u8 = bytes.read(offset)?;
        let command_id = CommandFrameId::try_from(id_byte).map_err(|_| byte::Error::BadInput {
            err: "not a GTS command frame",
        })?;
        let management = bytes.read(offset)?;
        let command = match command_id {
            CommandFrameId::DsmeGtsRequest => GtsCommand::Request(bytes.read(offset)?),
            CommandFrameId::DsmeGtsReply | CommandFrameId::DsmeGtsNotify => {
                GtsCommand::ReplyNotify(bytes.read(offset)?)
            }
        };
        Ok((
            Self {
                command_id,
                management,
                command,
            },
            *offset,
        ))
    }
}

impl TryWrite for GtsCommandFrame {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        bytes.write(offset, u8::from(self.command_id))?;
        bytes.write(offset, self.management)?;
        match self.command {
            GtsCommand::Request(cmd) => bytes.write(offset, cmd)?,
            GtsCommand::ReplyNotify(cmd) => bytes.write(offset, cmd)?,
        }
        Ok(*offset)
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

    #[test]
    fn management_field_packs_type_direction_and_priority() {
        let management = GtsManagement {
            management_type: ManagementType::DuplicatedAllocationNotification,
            direction: Direction::Rx,
            prioritized_channel_access: Priority::High,
            status: GtsStatus::Denied,
        };

        let mut buffer = [0u8; 8];
        let mut len = 0usize;
        buffer.write(&mut len, management).unwrap();
        assert_eq!(len, 2);
        assert_eq!(buffer[0], 0b0001_1010);
        assert_eq!(buffer[1], 0x01);

        let mut len = 0usize;
        let decoded: GtsManagement = buffer.read(&mut len).unwrap();
        assert_eq!(decoded, management);
    }

    #[test]
    fn management_field_rejects_unknown_status() {
        let data = [0x01, 0x77];
        let result: byte::Result<(GtsManagement, usize)> = TryRead::try_read(&data, ());
        assert!(result.is_err());
    }

    #[test]
    fn request_frame_round_trips() {
        let frame = GtsCommandFrame {
            command_id: CommandFrameId::DsmeGtsRequest,
            management: GtsManagement {
                management_type: ManagementType::Allocation,
                direction: Direction::Tx,
                prioritized_channel_access: Priority::Low,
                status: GtsStatus::Success,
            },
            command: GtsCommand::Request(GtsRequestCmd {
                num_slots: 1,
                preferred_superframe_id: 1,
                preferred_slot_id: 3,
                sab_spec: SabSpecification::for_slot(&geometry(), 1, 3, 5),
            }),
        };

        let mut buffer = [0u8; 64];
        let mut len = 0usize;
        buffer.write(&mut len, frame.clone()).unwrap();
        assert_eq!(buffer[0], 0x12);

        let mut offset = 0usize;
        let decoded: GtsCommandFrame = buffer.read(&mut offset).unwrap();
        assert_eq!(offset, len);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn reply_frame_carries_destination_and_sab() {
        let frame = GtsCommandFrame {
            command_id: CommandFrameId::DsmeGtsReply,
            management: GtsManagement {
                management_type: ManagementType::Allocation,
                direction: Direction::Tx,
                prioritized_channel_access: Priority::Low,
                status: GtsStatus::Denied,
            },
            command: GtsCommand::ReplyNotify(GtsReplyNotifyCmd {
                destination_address: ShortAddress(0x1234),
                sab_spec: SabSpecification::for_slot(&geometry(), 0, 6, 15),
            }),
        };

        let mut buffer = [0u8; 64];
        let mut len = 0usize;
        buffer.write(&mut len, frame.clone()).unwrap();

        let mut offset = 0usize;
        let decoded: GtsCommandFrame = buffer.read(&mut offset).unwrap();
        let GtsCommand::ReplyNotify(cmd) = decoded.command else {
            panic!("wrong command body");
        };
        assert_eq!(cmd.destination_address, ShortAddress(0x1234));
        assert!(cmd.sab_spec.sub_block.get(6 * 16 + 15));
        assert_eq!(cmd.sab_spec.sub_block.count_set(), 1);
    }

    #[test]
    fn unknown_command_id_is_rejected() {
        let data = [0x42, 0x01, 0x00];
        let result: byte::Result<(GtsCommandFrame, usize)> = TryRead::try_read(&data, ());
        assert!(result.is_err());
    }
}
