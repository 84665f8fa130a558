//! Management of DSME guaranteed time slots.
//!
//! The manager negotiates slot reservations with one-hop neighbors through a
//! three-way handshake in the CAP: REQUEST → REPLY → NOTIFY. A small pool of
//! state machine instances multiplexes independent handshakes; everything
//! runs to completion inside the MAC callbacks, there is no internal timer
//! beyond counting superframes.
//!
//! Entry points:
//! - [`GtsManager::handle_mlme_request`] / [`GtsManager::handle_mlme_response`]
//!   for the upper layer,
//! - [`GtsManager::handle_gts_request`] / [`GtsManager::handle_gts_response`] /
//!   [`GtsManager::handle_gts_notify`] for received command frames,
//! - [`GtsManager::handle_slot_event`] once per slot from the scheduler,
//! - [`GtsManager::on_csma_sent`] from the CSMA-CA path on TX completion.

use crate::{
    consts::GTS_STATE_MULTIPLICITY,
    message::{DataStatus, DsmeMessage, MessageDispatcher, MessagePool},
    pib::MacPib,
    sab::SabSpecification,
    sap::{CommStatus, CommStatusIndication, DsmeGtsConfirm, DsmeGtsIndication, DsmeGtsRequest, DsmeGtsResponse, MlmeSap},
    wire::{
        CommandFrameId, Direction, FrameType, GtsCommand, GtsCommandFrame, GtsManagement,
        GtsRequestCmd, GtsStatus, ManagementType, MessageHeader, Priority, ShortAddress,
    },
};

pub(crate) mod act_updater;
mod fsm;

use fsm::{GtsEvent, GtsFsm};
pub use fsm::GtsState;

/// Everything the GTS manager needs from its surroundings: the message pool,
/// the CAP transmission queue and the upper layer.
pub trait GtsPlatform: MessagePool + MessageDispatcher + MlmeSap {}

impl<T: MessagePool + MessageDispatcher + MlmeSap> GtsPlatform for T {}

/// The DSME GTS handshake engine. `N` is the number of handshakes that can
/// be in flight concurrently.
pub struct GtsManager<const N: usize = GTS_STATE_MULTIPLICITY> {
    fsms: [GtsFsm; N],
}

impl<const N: usize> GtsManager<N> {
    pub fn new() -> Self {
        Self {
            fsms: core::array::from_fn(|_| GtsFsm::new()),
        }
    }

    /// True while any handshake instance is not idle.
    pub fn handshake_in_progress(&self) -> bool {
        self.fsms.iter().any(|fsm| fsm.state != GtsState::Idle)
    }

    /// MLME-DSME-GTS.request: start an allocation or deallocation handshake
    /// toward a one-hop neighbor.
    pub fn handle_mlme_request(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        request: DsmeGtsRequest,
    ) {
        match self.idle_fsm() {
            Some(fsm_id) => self.step(
                fsm_id,
                GtsEvent::MlmeRequestIssued {
                    device_addr: request.device_address,
                    management: request.management,
                    request: request.request,
                },
                pib,
                platform,
            ),
            None => {
                // All instances are occupied.
                platform.dsme_gts_confirm(DsmeGtsConfirm {
                    device_address: request.device_address,
                    management_type: request.management.management_type,
                    direction: request.management.direction,
                    prioritized_channel_access: request.management.prioritized_channel_access,
                    sab_spec: request.request.sab_spec,
                    status: GtsStatus::TransactionOverflow,
                });
            }
        }
    }

    /// MLME-DSME-GTS.response: answer a previously indicated request.
    pub fn handle_mlme_response(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        response: DsmeGtsResponse,
    ) {
        let device_addr = response.reply.destination_address;
        match self.idle_fsm() {
            Some(fsm_id) => self.step(
                fsm_id,
                GtsEvent::MlmeResponseIssued {
                    device_addr,
                    management: response.management,
                    reply: response.reply,
                },
                pib,
                platform,
            ),
            None => {
                self.send_immediate_negative_reply(pib, platform, response);
                platform.comm_status_indication(CommStatusIndication::status_only(
                    CommStatus::TransactionOverflow,
                ));
            }
        }
    }

    /// A DSME GTS request command frame arrived. Requests bypass the state
    /// machine: they go straight to the upper layer, which answers through
    /// [`Self::handle_mlme_response`]. Duplicate-allocation announcements
    /// additionally update the slot bookkeeping here.
    pub fn handle_gts_request(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        message: &DsmeMessage,
    ) {
        let Ok(frame) = message.decode_gts_frame() else {
            warn!("Dropping a malformed GTS request frame");
            return;
        };
        let GtsCommand::Request(request) = frame.command else {
            warn!("Dropping a GTS request frame without a request body");
            return;
        };

        if frame.management.management_type == ManagementType::DuplicatedAllocationNotification {
            // The slots are in use elsewhere in the neighborhood; record
            // them and get our own conflicting allocation retired.
            pib.sab.add_occupied(&request.sab_spec);
            act_updater::duplicate_allocation(pib, &request.sab_spec);
        }

        platform.dsme_gts_indication(DsmeGtsIndication {
            device_address: message.header.src_addr,
            management_type: frame.management.management_type,
            direction: frame.management.direction,
            prioritized_channel_access: frame.management.prioritized_channel_access,
            num_slots: request.num_slots,
            preferred_superframe_id: request.preferred_superframe_id,
            preferred_slot_id: request.preferred_slot_id,
            sab_spec: request.sab_spec,
        });
    }

    /// A DSME GTS reply command frame arrived, either answering our own
    /// request or overheard from the neighborhood.
    pub fn handle_gts_response(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        message: &DsmeMessage,
    ) {
        let Ok(frame) = message.decode_gts_frame() else {
            warn!("Dropping a malformed GTS reply frame");
            return;
        };
        let GtsCommand::ReplyNotify(reply) = frame.command else {
            warn!("Dropping a GTS reply frame without a reply body");
            return;
        };
        let src_addr = message.header.src_addr;

        if reply.destination_address == pib.short_address {
            let instance = self.fsms.iter().position(|fsm| {
                fsm.state == GtsState::WaitForResponse && fsm.response_partner_address == src_addr
            });
            let Some(fsm_id) = instance else {
                debug!("Dropping a GTS reply from {}: no handshake waiting for it", src_addr);
                return;
            };
            self.fsms[fsm_id].response_partner_address = ShortAddress::NO_SHORT_ADDRESS;
            self.step(
                fsm_id,
                GtsEvent::ResponseCmdForMe {
                    device_addr: src_addr,
                    management: frame.management,
                    reply,
                },
                pib,
                platform,
            );
        } else if frame.management.status == GtsStatus::Success {
            self.overheard_slot_update(pib, platform, &frame.management, reply.sab_spec, src_addr);
        } else {
            // Negative replies are unicast; a broadcast one is a protocol
            // violation of the sender.
            warn!("Dropping an overheard negative GTS reply from {}", src_addr);
        }
    }

    /// A DSME GTS notify command frame arrived, either closing our own
    /// handshake or overheard from the neighborhood.
    pub fn handle_gts_notify(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        message: &DsmeMessage,
    ) {
        let Ok(frame) = message.decode_gts_frame() else {
            warn!("Dropping a malformed GTS notify frame");
            return;
        };
        if !matches!(
            frame.management.management_type,
            ManagementType::Allocation | ManagementType::Deallocation
        ) {
            return;
        }
        let GtsCommand::ReplyNotify(reply) = frame.command else {
            warn!("Dropping a GTS notify frame without a notify body");
            return;
        };
        let src_addr = message.header.src_addr;

        if reply.destination_address == pib.short_address {
            let instance = self.fsms.iter().position(|fsm| {
                fsm.state == GtsState::WaitForNotify && fsm.notify_partner_address == src_addr
            });
            let Some(fsm_id) = instance else {
                debug!("Dropping a GTS notify from {}: no handshake waiting for it", src_addr);
                return;
            };
            self.fsms[fsm_id].notify_partner_address = ShortAddress::NO_SHORT_ADDRESS;
            self.step(
                fsm_id,
                GtsEvent::NotifyCmdForMe {
                    device_addr: src_addr,
                    header: message.header,
                    management: frame.management,
                    reply,
                },
                pib,
                platform,
            );
        } else {
            self.overheard_slot_update(pib, platform, &frame.management, reply.sab_spec, src_addr);
        }
    }

    /// A neighbor pair completed part of a handshake; keep the slot
    /// allocation bitmap in sync with what they agreed on.
    fn overheard_slot_update(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        management: &GtsManagement,
        mut sab_spec: SabSpecification,
        src_addr: ShortAddress,
    ) {
        match management.management_type {
            ManagementType::Allocation => {
                if !self.check_and_handle_duplicate_allocation(
                    &mut sab_spec,
                    src_addr,
                    false,
                    pib,
                    platform,
                ) {
                    pib.sab.add_occupied(&sab_spec);
                }
            }
            ManagementType::Deallocation => {
                pib.sab.remove_occupied(&sab_spec);
            }
            _ => {}
        }
    }

    /// Called once per slot by the scheduler. All work happens at the first
    /// CFP slot: timeout accounting, idle counters at the multi-superframe
    /// boundary, and one expiration sweep if an instance is free to run it.
    pub fn handle_slot_event(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        slot: u8,
        superframe: u8,
    ) {
        if slot != pib.geometry.final_cap_slot + 1 {
            return;
        }

        for fsm in self.fsms.iter_mut() {
            fsm.superframes_in_current_state = fsm.superframes_in_current_state.saturating_add(1);
        }

        if superframe == 0 {
            // A new multi-superframe started; activity in the slots resets
            // the counters elsewhere.
            pib.act.increment_idle_counters();
        }

        for fsm_id in 0..N {
            if matches!(
                self.fsms[fsm_id].state,
                GtsState::WaitForResponse | GtsState::WaitForNotify
            ) {
                self.step(fsm_id, GtsEvent::CfpStarted, pib, platform);
            }
        }

        if let Some(fsm_id) = self.idle_fsm() {
            self.step(fsm_id, GtsEvent::CfpStarted, pib, platform);
        }
    }

    /// CSMA-CA finished with one of our frames. The message comes back with
    /// its transmission status and is released here, after the owning
    /// instance (if any still exists) has seen the outcome.
    pub fn on_csma_sent(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        message: DsmeMessage,
        command_id: CommandFrameId,
        data_status: DataStatus,
        num_backoffs: u8,
    ) {
        match message.decode_gts_frame() {
            Ok(frame)
                if frame.management.management_type
                    == ManagementType::DuplicatedAllocationNotification =>
            {
                // Stateless notification; no instance tracks it.
                debug!("Duplicated-allocation notification sent");
            }
            Ok(frame) => {
                debug_assert_eq!(frame.command_id, command_id);
                let instance = self.fsms.iter().position(|fsm| {
                    fsm.state == GtsState::Sending && fsm.msg_in_flight == Some(message.handle())
                });
                match instance {
                    Some(fsm_id) => {
                        if data_status != DataStatus::Success {
                            debug!(
                                "GTS command transmission failed with {:?} after {} backoffs",
                                data_status, num_backoffs
                            );
                        }
                        self.fsms[fsm_id].msg_in_flight = None;
                        let device_addr = match &frame.command {
                            GtsCommand::Request(_) => message.header.dst_addr,
                            GtsCommand::ReplyNotify(cmd) => cmd.destination_address,
                        };
                        self.step(
                            fsm_id,
                            GtsEvent::SendComplete {
                                device_addr,
                                command_id,
                                data_status,
                                management: frame.management,
                                command: frame.command,
                            },
                            pib,
                            platform,
                        );
                    }
                    // The instance moved on, e.g. the frame arrived although
                    // its ack got lost and the reply was already handled.
                    None => debug!("Outdated message"),
                }
            }
            Err(_) => warn!("Completed transmission of an undecodable GTS frame"),
        }

        platform.release_message(message);
    }

    fn idle_fsm(&self) -> Option<usize> {
        self.fsms.iter().position(|fsm| fsm.state == GtsState::Idle)
    }

    /// Walk the set bits of the specification against the ACT. Conflicting
    /// bits are moved out of `sab_spec` into a duplicated-allocation
    /// notification toward `address`, so the caller is left with the clean
    /// remainder. With `all_channels` a slot conflicts regardless of the
    /// channel it was granted on.
    fn check_and_handle_duplicate_allocation(
        &mut self,
        sab_spec: &mut SabSpecification,
        address: ShortAddress,
        all_channels: bool,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
    ) -> bool {
        let num_channels = usize::from(pib.geometry.num_channels);
        let mut dup_spec =
            SabSpecification::new(sab_spec.sub_block_index, sab_spec.sub_block_length_bytes());
        let mut duplicate_found = false;

        for bit in 0..sab_spec.sub_block_length_bits() {
            if !sab_spec.sub_block.get(bit) {
                continue;
            }
            let slot_id = (bit / num_channels) as u8;
            let channel = (bit % num_channels) as u8;

            let conflict = pib
                .act
                .find(sab_spec.sub_block_index, slot_id)
                .is_some_and(|entry| all_channels || entry.channel == channel);
            if conflict {
                info!(
                    "Duplicate allocation of slot {} in superframe {} on channel {}",
                    slot_id, sab_spec.sub_block_index, channel
                );
                duplicate_found = true;
                dup_spec.sub_block.set(bit, true);
                // Cleared so the caller can reuse the spec for its notify.
                sab_spec.sub_block.set(bit, false);
            }
        }

        if duplicate_found {
            info!("Duplicate allocation detected, informing {}", address);
            let management = GtsManagement {
                management_type: ManagementType::DuplicatedAllocationNotification,
                direction: Direction::Tx,
                prioritized_channel_access: Priority::Low,
                status: GtsStatus::Success,
            };
            let request = GtsRequestCmd {
                num_slots: dup_spec.sub_block.count_set() as u8,
                preferred_superframe_id: 0,
                preferred_slot_id: 0,
                sab_spec: dup_spec,
            };
            // This request expects no reply and is not tracked by any
            // handshake instance.
            let Some(message) = platform.get_empty_message() else {
                debug!("Could not send the duplicated-allocation notification");
                return duplicate_found;
            };
            if let Err(message) = self.send_gts_command(
                None,
                message,
                &management,
                GtsCommand::Request(request),
                CommandFrameId::DsmeGtsRequest,
                address,
                pib,
                platform,
            ) {
                debug!("Could not send the duplicated-allocation notification");
                platform.release_message(message);
            }
        }

        duplicate_found
    }

    /// Serialize a GTS command into the message, stamp the header and hand
    /// it to the CAP queue. When `fsm_id` is given and the command belongs
    /// to a handshake, the instance records what is in flight so the later
    /// completion can be routed back.
    #[allow(clippy::too_many_arguments)]
    fn send_gts_command(
        &mut self,
        fsm_id: Option<usize>,
        mut message: DsmeMessage,
        management: &GtsManagement,
        command: GtsCommand,
        command_id: CommandFrameId,
        destination: ShortAddress,
        pib: &MacPib,
        platform: &mut impl GtsPlatform,
    ) -> Result<(), DsmeMessage> {
        let frame = GtsCommandFrame {
            command_id,
            management: *management,
            command,
        };
        if message.encode_gts_frame(frame).is_err() {
            error!("GTS command frame did not fit the message buffer");
            return Err(message);
        }

        message.header = MessageHeader {
            frame_type: FrameType::MacCommand,
            ack_request: true,
            pan_id: pib.pan_id,
            src_addr: pib.short_address,
            dst_addr: destination,
        };

        let tracked = fsm_id
            .filter(|_| management.management_type != ManagementType::DuplicatedAllocationNotification);
        if let Some(fsm_id) = tracked {
            self.fsms[fsm_id].cmd_to_send = command_id;
            self.fsms[fsm_id].msg_in_flight = Some(message.handle());
        }

        match platform.send_in_cap(message) {
            Ok(()) => Ok(()),
            Err(message) => {
                if let Some(fsm_id) = tracked {
                    self.fsms[fsm_id].msg_in_flight = None;
                }
                Err(message)
            }
        }
    }

    fn prepare_pending_confirm(
        &mut self,
        fsm_id: usize,
        device_addr: ShortAddress,
        management: &GtsManagement,
        sab_spec: SabSpecification,
    ) {
        let fsm = &mut self.fsms[fsm_id];
        fsm.pending_management = *management;
        fsm.pending_confirm = DsmeGtsConfirm {
            device_address: device_addr,
            management_type: management.management_type,
            direction: management.direction,
            prioritized_channel_access: management.prioritized_channel_access,
            sab_spec,
            status: GtsStatus::Success,
        };
    }

    /// All handshake instances are occupied: turn the response down right
    /// away with the peer-busy status, outside of any state machine.
    fn send_immediate_negative_reply(
        &mut self,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
        response: DsmeGtsResponse,
    ) {
        let destination = response.reply.destination_address;
        info!(
            "Sending a negative reply to the GTS request of {}: all handshake slots busy",
            destination
        );

        let mut management = response.management;
        management.status = GtsStatus::PEER_BUSY;

        let Some(message) = platform.get_empty_message() else {
            debug!("Could not send REPLY");
            return;
        };
        if let Err(message) = self.send_gts_command(
            None,
            message,
            &management,
            GtsCommand::ReplyNotify(response.reply),
            CommandFrameId::DsmeGtsReply,
            destination,
            pib,
            platform,
        ) {
            debug!("Could not send REPLY");
            platform.release_message(message);
        }
    }
}

impl<const N: usize> Default for GtsManager<N> {
    fn default() -> Self {
        Self::new()
    }
}
