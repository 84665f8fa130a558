//! The per-peer handshake state machine.
//!
//! Each instance walks Idle → Sending → WaitForResponse/WaitForNotify → Idle
//! as the three-way REQUEST → REPLY → NOTIFY exchange progresses. The state
//! is an explicit enum; events that cannot reach a state because of how the
//! dispatcher routes them are treated as unreachable.

use super::{act_updater, GtsManager, GtsPlatform};
use crate::{
    act::{ActEntry, ActState},
    message::DataStatus,
    pib::MacPib,
    sab::SabSpecification,
    sap::{CommStatus, CommStatusIndication, DsmeGtsConfirm, DsmeGtsIndication},
    wire::{
        CommandFrameId, Direction, GtsCommand, GtsManagement, GtsReplyNotifyCmd, GtsRequestCmd,
        GtsStatus, ManagementType, MessageHeader, Priority, ShortAddress,
    },
};
use crate::message::MessageHandle;

/// The state of one handshake instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum GtsState {
    /// Nothing in flight; the instance also performs the expiration sweep.
    Idle,
    /// A REQUEST, REPLY or NOTIFY sits in the CAP queue.
    Sending,
    /// A REQUEST went out; a REPLY is due within macResponseWaitTime.
    WaitForResponse,
    /// A positive REPLY went out; the closing NOTIFY is due.
    WaitForNotify,
}

/// The signals driving an instance.
#[derive(Debug, Clone)]
pub(crate) enum GtsEvent {
    MlmeRequestIssued {
        device_addr: ShortAddress,
        management: GtsManagement,
        request: GtsRequestCmd,
    },
    MlmeResponseIssued {
        device_addr: ShortAddress,
        management: GtsManagement,
        reply: GtsReplyNotifyCmd,
    },
    ResponseCmdForMe {
        device_addr: ShortAddress,
        management: GtsManagement,
        reply: GtsReplyNotifyCmd,
    },
    NotifyCmdForMe {
        device_addr: ShortAddress,
        header: MessageHeader,
        management: GtsManagement,
        reply: GtsReplyNotifyCmd,
    },
    SendComplete {
        device_addr: ShortAddress,
        command_id: CommandFrameId,
        data_status: DataStatus,
        management: GtsManagement,
        command: GtsCommand,
    },
    CfpStarted,
}

impl GtsEvent {
    fn name(&self) -> &'static str {
        match self {
            GtsEvent::MlmeRequestIssued { .. } => "MLME_REQUEST_ISSUED",
            GtsEvent::MlmeResponseIssued { .. } => "MLME_RESPONSE_ISSUED",
            GtsEvent::ResponseCmdForMe { .. } => "RESPONSE_CMD_FOR_ME",
            GtsEvent::NotifyCmdForMe { .. } => "NOTIFY_CMD_FOR_ME",
            GtsEvent::SendComplete { .. } => "SEND_COMPLETE",
            GtsEvent::CfpStarted => "CFP_STARTED",
        }
    }
}

/// Bookkeeping of one handshake instance.
#[derive(Debug, Clone)]
pub(crate) struct GtsFsm {
    pub state: GtsState,
    /// The management field of the handshake in flight.
    pub pending_management: GtsManagement,
    /// The confirm that will eventually go to the upper layer, prepared at
    /// dispatch time so failure paths can fill in just the status.
    pub pending_confirm: DsmeGtsConfirm,
    /// Who a REPLY is expected from while in WaitForResponse.
    pub response_partner_address: ShortAddress,
    /// Who a NOTIFY is expected from while in WaitForNotify.
    pub notify_partner_address: ShortAddress,
    /// The command sitting in the CAP queue while in Sending.
    pub cmd_to_send: CommandFrameId,
    /// The buffer sitting in the CAP queue while in Sending.
    pub msg_in_flight: Option<MessageHandle>,
    /// Superframes spent in the current state, driving the timeouts.
    pub superframes_in_current_state: u16,
}

impl GtsFsm {
    pub fn new() -> Self {
        let management = GtsManagement {
            management_type: ManagementType::Allocation,
            direction: Direction::Tx,
            prioritized_channel_access: Priority::Low,
            status: GtsStatus::Success,
        };
        Self {
            state: GtsState::Idle,
            pending_management: management,
            pending_confirm: DsmeGtsConfirm {
                device_address: ShortAddress::NO_SHORT_ADDRESS,
                management_type: management.management_type,
                direction: management.direction,
                prioritized_channel_access: management.prioritized_channel_access,
                sab_spec: SabSpecification::new(0, 0),
                status: GtsStatus::Success,
            },
            response_partner_address: ShortAddress::NO_SHORT_ADDRESS,
            notify_partner_address: ShortAddress::NO_SHORT_ADDRESS,
            cmd_to_send: CommandFrameId::DsmeGtsRequest,
            msg_in_flight: None,
            superframes_in_current_state: 0,
        }
    }

    pub fn transition(&mut self, new_state: GtsState) {
        debug!("GTS handshake {:?} -> {:?}", self.state, new_state);
        self.state = new_state;
        if matches!(new_state, GtsState::WaitForResponse | GtsState::WaitForNotify) {
            self.superframes_in_current_state = 0;
        }
    }

    /// macResponseWaitTime is counted in base superframe durations, the
    /// per-state counter in whole superframes of `2^SO` base durations each.
    pub fn timeout_elapsed(&self, pib: &MacPib) -> bool {
        u32::from(self.superframes_in_current_state) * (1u32 << pib.superframe_order)
            > u32::from(pib.response_wait_time)
    }
}

impl<const N: usize> GtsManager<N> {
    pub(crate) fn step(
        &mut self,
        fsm_id: usize,
        event: GtsEvent,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
    ) {
        debug!(
            "GTS event '{}' handled in {:?} [{}]",
            event.name(),
            self.fsms[fsm_id].state,
            fsm_id
        );

        match self.fsms[fsm_id].state {
            GtsState::Idle => self.step_idle(fsm_id, event, pib, platform),
            GtsState::Sending => self.step_sending(fsm_id, event, pib, platform),
            GtsState::WaitForResponse => self.step_wait_for_response(fsm_id, event, pib, platform),
            GtsState::WaitForNotify => self.step_wait_for_notify(fsm_id, event, pib, platform),
        }
    }

    fn step_idle(
        &mut self,
        fsm_id: usize,
        event: GtsEvent,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
    ) {
        match event {
            GtsEvent::MlmeRequestIssued {
                device_addr,
                management,
                request,
            } => {
                self.prepare_pending_confirm(
                    fsm_id,
                    device_addr,
                    &management,
                    request.sab_spec.clone(),
                );

                let Some(message) = platform.get_empty_message() else {
                    self.report_request_overflow(fsm_id, platform);
                    return;
                };

                match self.send_gts_command(
                    Some(fsm_id),
                    message,
                    &management,
                    GtsCommand::Request(request),
                    CommandFrameId::DsmeGtsRequest,
                    device_addr,
                    pib,
                    platform,
                ) {
                    Ok(()) => self.fsms[fsm_id].transition(GtsState::Sending),
                    Err(message) => {
                        platform.release_message(message);
                        self.report_request_overflow(fsm_id, platform);
                    }
                }
            }

            GtsEvent::MlmeResponseIssued {
                device_addr,
                management,
                reply,
            } => {
                self.prepare_pending_confirm(
                    fsm_id,
                    device_addr,
                    &management,
                    reply.sab_spec.clone(),
                );

                let destination = if management.status == GtsStatus::Success {
                    info!(
                        "Sending a positive reply to the GTS request of {}",
                        reply.destination_address
                    );
                    ShortAddress::BROADCAST
                } else {
                    info!(
                        "Sending a negative reply to the GTS request of {}",
                        reply.destination_address
                    );
                    reply.destination_address
                };

                let Some(message) = platform.get_empty_message() else {
                    debug!("Could not send REPLY");
                    platform.comm_status_indication(CommStatusIndication::status_only(
                        CommStatus::TransactionOverflow,
                    ));
                    return;
                };

                match self.send_gts_command(
                    Some(fsm_id),
                    message,
                    &management,
                    GtsCommand::ReplyNotify(reply.clone()),
                    CommandFrameId::DsmeGtsReply,
                    destination,
                    pib,
                    platform,
                ) {
                    Ok(()) => {
                        if management.status == GtsStatus::Success {
                            act_updater::approval_queued(pib, &reply.sab_spec, &management, device_addr);
                        }
                        self.fsms[fsm_id].transition(GtsState::Sending);
                    }
                    Err(message) => {
                        debug!("Could not send REPLY");
                        platform.release_message(message);
                        platform.comm_status_indication(CommStatusIndication::status_only(
                            CommStatus::TransactionOverflow,
                        ));
                    }
                }
            }

            GtsEvent::CfpStarted => self.expiration_sweep(pib, platform),

            GtsEvent::ResponseCmdForMe { .. }
            | GtsEvent::NotifyCmdForMe { .. }
            | GtsEvent::SendComplete { .. } => {
                unreachable!("illegal GTS signal while idle")
            }
        }
    }

    /// Scan the ACT for slots that should be handed to the upper layer for
    /// deallocation: failed allocations, dangling unconfirmed ones and slots
    /// that have been idle past macDSMEGTSExpirationTime. At most one slot is
    /// reported per CFP.
    fn expiration_sweep(&mut self, pib: &mut MacPib, platform: &mut impl GtsPlatform) {
        let handshake_pending = self.fsms.iter().any(|fsm| fsm.state != GtsState::Idle);

        let mut candidate: Option<(ActEntry, bool)> = None;
        for entry in pib.act.iter() {
            if entry.state.is_terminal() {
                continue;
            }

            trace!(
                "check slot {} in superframe {} on channel {} [{}, idle {}]",
                entry.slot_id,
                entry.superframe_id,
                entry.channel,
                entry.address,
                entry.idle_counter
            );

            if entry.state == ActState::Invalid {
                debug!("GTS deallocation due to an invalid allocation");
                candidate = Some((*entry, false));
                break;
            } else if entry.state == ActState::Unconfirmed {
                // An allocation still in flight somewhere may confirm this
                // entry; only clean it up once everything is quiet.
                if handshake_pending {
                    continue;
                }
                debug!("GTS deallocation due to an unconfirmed allocation");
                candidate = Some((*entry, false));
                break;
            } else if entry.idle_counter > pib.dsme_gts_expiration_time {
                debug!("GTS deallocation due to expiration");
                candidate = Some((*entry, true));
                break;
            }
        }

        let Some((entry, expired)) = candidate else {
            return;
        };

        if expired {
            pib.act.reset_idle_counter(entry.superframe_id, entry.slot_id);
        }

        let sab_spec = SabSpecification::for_slot(
            &pib.geometry,
            entry.superframe_id,
            entry.slot_id,
            entry.channel,
        );
        platform.dsme_gts_indication(DsmeGtsIndication {
            device_address: entry.address,
            management_type: ManagementType::Expiration,
            direction: entry.direction,
            prioritized_channel_access: Priority::Low,
            num_slots: 1,
            preferred_superframe_id: 0,
            preferred_slot_id: 0,
            sab_spec,
        });
    }

    fn step_sending(
        &mut self,
        fsm_id: usize,
        event: GtsEvent,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
    ) {
        let GtsEvent::SendComplete {
            device_addr,
            command_id,
            data_status,
            management,
            command,
        } = event
        else {
            unreachable!("illegal GTS signal while sending");
        };

        debug_assert_eq!(command_id, self.fsms[fsm_id].cmd_to_send);

        match command_id {
            CommandFrameId::DsmeGtsNotify => {
                act_updater::notify_delivered(pib, command.sab_spec(), &management, device_addr);
                self.fsms[fsm_id].transition(GtsState::Idle);
            }

            CommandFrameId::DsmeGtsRequest => match data_status {
                DataStatus::Success => {
                    self.fsms[fsm_id].response_partner_address = device_addr;
                    self.fsms[fsm_id].transition(GtsState::WaitForResponse);
                }
                DataStatus::NoAck => {
                    debug!("GTS request transmission failed: no ack");
                    act_updater::request_no_ack(pib, command.sab_spec(), &management, device_addr);
                    self.fsms[fsm_id].pending_confirm.status = GtsStatus::NoAck;
                    platform.dsme_gts_confirm(self.fsms[fsm_id].pending_confirm.clone());
                    self.fsms[fsm_id].transition(GtsState::Idle);
                }
                DataStatus::ChannelAccessFailure => {
                    debug!("GTS request transmission failed: channel access failure");
                    act_updater::request_access_failure(
                        pib,
                        command.sab_spec(),
                        &management,
                        device_addr,
                    );
                    self.fsms[fsm_id].pending_confirm.status = GtsStatus::ChannelAccessFailure;
                    platform.dsme_gts_confirm(self.fsms[fsm_id].pending_confirm.clone());
                    self.fsms[fsm_id].transition(GtsState::Idle);
                }
            },

            CommandFrameId::DsmeGtsReply => match data_status {
                DataStatus::Success => {
                    if management.status == GtsStatus::Success {
                        act_updater::approval_delivered(
                            pib,
                            command.sab_spec(),
                            &management,
                            device_addr,
                        );
                        self.fsms[fsm_id].notify_partner_address = device_addr;
                        self.fsms[fsm_id].transition(GtsState::WaitForNotify);
                    } else {
                        // No notify follows a disapproval.
                        act_updater::disapproval_delivered(
                            pib,
                            command.sab_spec(),
                            &management,
                            device_addr,
                        );
                        self.fsms[fsm_id].transition(GtsState::Idle);
                    }
                }
                DataStatus::NoAck => {
                    // Positive replies go out as broadcasts; an ack is only
                    // ever expected for a disapproval.
                    debug_assert!(management.status != GtsStatus::Success);
                    act_updater::disapproval_no_ack(pib, command.sab_spec(), &management, device_addr);
                    platform.comm_status_indication(CommStatusIndication::status_only(
                        CommStatus::NoAck,
                    ));
                    self.fsms[fsm_id].transition(GtsState::Idle);
                }
                DataStatus::ChannelAccessFailure => {
                    if management.status == GtsStatus::Success {
                        act_updater::approval_access_failure(
                            pib,
                            command.sab_spec(),
                            &management,
                            device_addr,
                        );
                    } else {
                        act_updater::disapproval_access_failure(
                            pib,
                            command.sab_spec(),
                            &management,
                            device_addr,
                        );
                    }
                    platform.comm_status_indication(CommStatusIndication::status_only(
                        CommStatus::ChannelAccessFailure,
                    ));
                    self.fsms[fsm_id].transition(GtsState::Idle);
                }
            },
        }
    }

    fn step_wait_for_response(
        &mut self,
        fsm_id: usize,
        event: GtsEvent,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
    ) {
        match event {
            GtsEvent::ResponseCmdForMe {
                device_addr,
                management,
                mut reply,
            } => {
                {
                    let pending = &self.fsms[fsm_id].pending_confirm;
                    if pending.device_address != device_addr {
                        info!(
                            "Wrong GTS reply handled: from {} instead of {}",
                            device_addr, pending.device_address
                        );
                        return;
                    }
                    if pending.management_type != management.management_type {
                        info!(
                            "Wrong GTS reply handled: type {:?} instead of {:?}",
                            management.management_type, pending.management_type
                        );
                        return;
                    }
                    if pending.direction != management.direction {
                        info!(
                            "Wrong GTS reply handled: direction {:?} instead of {:?}",
                            management.direction, pending.direction
                        );
                        return;
                    }
                }

                platform.dsme_gts_confirm(DsmeGtsConfirm {
                    device_address: device_addr,
                    management_type: management.management_type,
                    direction: management.direction,
                    prioritized_channel_access: management.prioritized_channel_access,
                    sab_spec: reply.sab_spec.clone(),
                    status: management.status,
                });

                match management.status {
                    GtsStatus::Success => {
                        let mut grant_usable = true;
                        if management.management_type == ManagementType::Allocation {
                            if self.check_and_handle_duplicate_allocation(
                                &mut reply.sab_spec,
                                device_addr,
                                true,
                                pib,
                                platform,
                            ) {
                                if !reply.sab_spec.sub_block.is_empty() {
                                    // Part of a multi-slot grant conflicted.
                                    // Refuse the remainder instead of
                                    // installing half a grant.
                                    warn!(
                                        "Partially conflicting GTS grant from {} refused",
                                        device_addr
                                    );
                                }
                                grant_usable = false;
                            } else {
                                act_updater::approval_received(
                                    pib,
                                    &reply.sab_spec,
                                    &management,
                                    device_addr,
                                );
                            }
                        }

                        if !grant_usable {
                            self.fsms[fsm_id].transition(GtsState::Idle);
                            return;
                        }

                        // The requesting node notifies its one-hop neighbors.
                        reply.destination_address = device_addr;
                        let Some(message) = platform.get_empty_message() else {
                            debug!("NOTIFY could not be sent");
                            act_updater::notify_access_failure(
                                pib,
                                &reply.sab_spec,
                                &management,
                                device_addr,
                            );
                            self.fsms[fsm_id].transition(GtsState::Idle);
                            return;
                        };
                        match self.send_gts_command(
                            Some(fsm_id),
                            message,
                            &management,
                            GtsCommand::ReplyNotify(reply.clone()),
                            CommandFrameId::DsmeGtsNotify,
                            ShortAddress::BROADCAST,
                            pib,
                            platform,
                        ) {
                            Ok(()) => self.fsms[fsm_id].transition(GtsState::Sending),
                            Err(message) => {
                                debug!("NOTIFY could not be sent");
                                act_updater::notify_access_failure(
                                    pib,
                                    &reply.sab_spec,
                                    &management,
                                    device_addr,
                                );
                                platform.release_message(message);
                                self.fsms[fsm_id].transition(GtsState::Idle);
                            }
                        }
                    }
                    // NoData is the wire spelling of "the destination was
                    // busy"; treated like a reply that never arrived.
                    GtsStatus::NoData => {
                        act_updater::response_timeout(pib, &reply.sab_spec, &management, device_addr);
                        self.fsms[fsm_id].transition(GtsState::Idle);
                    }
                    _ => {
                        debug_assert_eq!(management.status, GtsStatus::Denied);
                        act_updater::disapproved(pib, &reply.sab_spec, &management, device_addr);
                        self.fsms[fsm_id].transition(GtsState::Idle);
                    }
                }
            }

            GtsEvent::CfpStarted => {
                if self.fsms[fsm_id].timeout_elapsed(pib) {
                    debug!("GTS timeout for the reply");
                    let spec = self.fsms[fsm_id].pending_confirm.sab_spec.clone();
                    let management = self.fsms[fsm_id].pending_management;
                    let device_addr = self.fsms[fsm_id].pending_confirm.device_address;
                    act_updater::response_timeout(pib, &spec, &management, device_addr);

                    self.fsms[fsm_id].pending_confirm.status = GtsStatus::NoData;
                    platform.dsme_gts_confirm(self.fsms[fsm_id].pending_confirm.clone());
                    self.fsms[fsm_id].transition(GtsState::Idle);
                }
            }

            GtsEvent::MlmeRequestIssued { .. }
            | GtsEvent::MlmeResponseIssued { .. }
            | GtsEvent::NotifyCmdForMe { .. }
            | GtsEvent::SendComplete { .. } => {
                unreachable!("illegal GTS signal while waiting for a reply")
            }
        }
    }

    fn step_wait_for_notify(
        &mut self,
        fsm_id: usize,
        event: GtsEvent,
        pib: &mut MacPib,
        platform: &mut impl GtsPlatform,
    ) {
        match event {
            GtsEvent::NotifyCmdForMe {
                device_addr,
                header,
                management,
                reply,
            } => {
                act_updater::notify_received(pib, &reply.sab_spec, &management, device_addr);

                // The device named in the notify reports the receipt upward.
                platform.comm_status_indication(CommStatusIndication {
                    pan_id: Some(header.pan_id),
                    source: Some(header.src_addr),
                    destination: Some(header.dst_addr),
                    status: CommStatus::Success,
                });

                self.fsms[fsm_id].transition(GtsState::Idle);
            }

            GtsEvent::CfpStarted => {
                if self.fsms[fsm_id].timeout_elapsed(pib) {
                    debug!("GTS timeout for the notify");
                    let spec = self.fsms[fsm_id].pending_confirm.sab_spec.clone();
                    let management = self.fsms[fsm_id].pending_management;
                    let device_addr = self.fsms[fsm_id].pending_confirm.device_address;
                    act_updater::notify_timeout(pib, &spec, &management, device_addr);

                    platform.comm_status_indication(CommStatusIndication::status_only(
                        CommStatus::TransactionExpired,
                    ));
                    self.fsms[fsm_id].transition(GtsState::Idle);
                }
            }

            GtsEvent::MlmeRequestIssued { .. }
            | GtsEvent::MlmeResponseIssued { .. }
            | GtsEvent::ResponseCmdForMe { .. }
            | GtsEvent::SendComplete { .. } => {
                unreachable!("illegal GTS signal while waiting for a notify")
            }
        }
    }

    fn report_request_overflow(&mut self, fsm_id: usize, platform: &mut impl GtsPlatform) {
        debug!("TRANSACTION_OVERFLOW");
        self.fsms[fsm_id].pending_confirm.status = GtsStatus::TransactionOverflow;
        platform.dsme_gts_confirm(self.fsms[fsm_id].pending_confirm.clone());
    }
}
