//! The allocation handshake as seen from the granting device.

use dsme_wpan_rs::{
    act::ActState,
    message::DataStatus,
    pib::MacPib,
    sab::SabSpecification,
    sap::{CommStatus, DsmeGtsResponse},
    test_helpers::{cfp_tick, received_gts_frame, test_pib, RecordingPlatform},
    wire::{
        CommandFrameId, Direction, GtsCommand, GtsManagement, GtsReplyNotifyCmd, GtsStatus,
        ManagementType, Priority, ShortAddress,
    },
    GtsManager,
};

const REQUESTER: ShortAddress = ShortAddress(0x0002);

fn allocation() -> GtsManagement {
    GtsManagement {
        management_type: ManagementType::Allocation,
        direction: Direction::Tx,
        prioritized_channel_access: Priority::Low,
        status: GtsStatus::Success,
    }
}

fn response_for(pib: &MacPib, status: GtsStatus, superframe: u8, slot: u8, channel: u8) -> DsmeGtsResponse {
    let mut management = allocation();
    management.status = status;
    DsmeGtsResponse {
        management,
        reply: GtsReplyNotifyCmd {
            destination_address: REQUESTER,
            sab_spec: SabSpecification::for_slot(&pib.geometry, superframe, slot, channel),
        },
    }
}

fn notify_frame(pib: &MacPib, src: ShortAddress) -> dsme_wpan_rs::message::DsmeMessage {
    received_gts_frame(
        src,
        ShortAddress::BROADCAST,
        pib.pan_id,
        CommandFrameId::DsmeGtsNotify,
        allocation(),
        GtsCommand::ReplyNotify(GtsReplyNotifyCmd {
            destination_address: pib.short_address,
            sab_spec: SabSpecification::for_slot(&pib.geometry, 1, 3, 5),
        }),
    )
}

#[test_log::test]
fn granted_request_completes_when_the_notify_arrives() {
    let mut pib = test_pib();
    let mut platform = RecordingPlatform::new();
    let mut manager = GtsManager::<1>::new();

    let response = response_for(&pib, GtsStatus::Success, 1, 3, 5);
    manager.handle_mlme_response(&mut pib, &mut platform, response);

    // A positive reply is broadcast and the slot is reserved right away.
    assert_eq!(platform.sent_log.len(), 1);
    assert_eq!(platform.sent_log[0].command_id, CommandFrameId::DsmeGtsReply);
    assert!(platform.sent_log[0].destination.is_broadcast());
    let entry = pib.act.find(1, 3).unwrap();
    assert_eq!(entry.state, ActState::Unconfirmed);
    // The requester asked for a transmit slot, so this device receives.
    assert_eq!(entry.direction, Direction::Rx);
    assert_eq!(entry.address, REQUESTER);

    let message = platform.take_in_flight();
    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        message,
        CommandFrameId::DsmeGtsReply,
        DataStatus::Success,
        0,
    );
    assert!(manager.handshake_in_progress());

    let notify = notify_frame(&pib, REQUESTER);
    manager.handle_gts_notify(&mut pib, &mut platform, &notify);

    let entry = pib.act.find(1, 3).unwrap();
    assert_eq!(entry.state, ActState::Valid);
    assert!(pib.sab.is_occupied(1, 3, 5));
    assert!(!manager.handshake_in_progress());

    assert_eq!(platform.comm_status.len(), 1);
    assert_eq!(platform.comm_status[0].status, CommStatus::Success);
    assert_eq!(platform.comm_status[0].source, Some(REQUESTER));
    assert_eq!(platform.comm_status[0].pan_id, Some(pib.pan_id));
    assert_eq!(platform.live_messages(), 0);
}

#[test_log::test]
fn repeated_notify_after_idle_changes_nothing() {
    let mut pib = test_pib();
    let mut platform = RecordingPlatform::new();
    let mut manager = GtsManager::<1>::new();

    let response = response_for(&pib, GtsStatus::Success, 1, 3, 5);
    manager.handle_mlme_response(&mut pib, &mut platform, response);
    let message = platform.take_in_flight();
    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        message,
        CommandFrameId::DsmeGtsReply,
        DataStatus::Success,
        0,
    );
    let notify = notify_frame(&pib, REQUESTER);
    manager.handle_gts_notify(&mut pib, &mut platform, &notify);

    let entry_before = *pib.act.find(1, 3).unwrap();
    let comm_status_count = platform.comm_status.len();

    let notify = notify_frame(&pib, REQUESTER);
    manager.handle_gts_notify(&mut pib, &mut platform, &notify);

    assert_eq!(*pib.act.find(1, 3).unwrap(), entry_before);
    assert!(pib.sab.is_occupied(1, 3, 5));
    assert_eq!(platform.comm_status.len(), comm_status_count);
    assert!(!manager.handshake_in_progress());
}

#[test_log::test]
fn denied_request_answers_the_requester_directly() {
    let mut pib = test_pib();
    let mut platform = RecordingPlatform::new();
    let mut manager = GtsManager::<1>::new();

    let response = response_for(&pib, GtsStatus::Denied, 1, 3, 5);
    manager.handle_mlme_response(&mut pib, &mut platform, response);

    assert_eq!(platform.sent_log.len(), 1);
    assert_eq!(platform.sent_log[0].destination, REQUESTER);
    assert!(pib.act.find(1, 3).is_none());

    let message = platform.take_in_flight();
    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        message,
        CommandFrameId::DsmeGtsReply,
        DataStatus::Success,
        0,
    );

    assert!(!manager.handshake_in_progress());
    assert!(platform.comm_status.is_empty());
    assert_eq!(platform.live_messages(), 0);
}

#[test_log::test]
fn missing_notify_invalidates_the_grant() {
    let mut pib = test_pib();
    let mut platform = RecordingPlatform::new();
    let mut manager = GtsManager::<1>::new();

    let response = response_for(&pib, GtsStatus::Success, 1, 3, 5);
    manager.handle_mlme_response(&mut pib, &mut platform, response);
    let message = platform.take_in_flight();
    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        message,
        CommandFrameId::DsmeGtsReply,
        DataStatus::Success,
        0,
    );

    for _ in 0..16 {
        cfp_tick(&mut manager, &mut pib, &mut platform, 1);
    }

    assert_eq!(pib.act.find(1, 3).unwrap().state, ActState::Invalid);
    assert!(!manager.handshake_in_progress());
    assert_eq!(platform.comm_status.len(), 1);
    assert_eq!(platform.comm_status[0].status, CommStatus::TransactionExpired);
}

#[test_log::test]
fn reply_channel_access_failure_rolls_the_grant_back() {
    let mut pib = test_pib();
    let mut platform = RecordingPlatform::new();
    let mut manager = GtsManager::<1>::new();

    let response = response_for(&pib, GtsStatus::Success, 1, 3, 5);
    manager.handle_mlme_response(&mut pib, &mut platform, response);
    assert_eq!(pib.act.find(1, 3).unwrap().state, ActState::Unconfirmed);

    let message = platform.take_in_flight();
    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        message,
        CommandFrameId::DsmeGtsReply,
        DataStatus::ChannelAccessFailure,
        5,
    );

    assert_eq!(pib.act.find(1, 3).unwrap().state, ActState::Invalid);
    assert!(!manager.handshake_in_progress());
    assert_eq!(platform.comm_status.len(), 1);
    assert_eq!(
        platform.comm_status[0].status,
        CommStatus::ChannelAccessFailure
    );
}

#[test_log::test]
fn unacknowledged_denial_reports_no_ack() {
    let mut pib = test_pib();
    let mut platform = RecordingPlatform::new();
    let mut manager = GtsManager::<1>::new();

    let response = response_for(&pib, GtsStatus::Denied, 1, 3, 5);
    manager.handle_mlme_response(&mut pib, &mut platform, response);
    let message = platform.take_in_flight();
    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        message,
        CommandFrameId::DsmeGtsReply,
        DataStatus::NoAck,
        3,
    );

    assert!(!manager.handshake_in_progress());
    assert_eq!(platform.comm_status.len(), 1);
    assert_eq!(platform.comm_status[0].status, CommStatus::NoAck);
}

#[test_log::test]
fn busy_responder_turns_the_request_down_as_peer_busy() {
    let mut pib = test_pib();
    let mut platform = RecordingPlatform::new();
    let mut manager = GtsManager::<1>::new();

    // The only instance is working on another handshake.
    let response = response_for(&pib, GtsStatus::Success, 1, 3, 5);
    manager.handle_mlme_response(&mut pib, &mut platform, response);
    assert!(manager.handshake_in_progress());

    let mut second = response_for(&pib, GtsStatus::Success, 2, 4, 6);
    second.reply.destination_address = ShortAddress(0x0005);
    manager.handle_mlme_response(&mut pib, &mut platform, second);

    // An immediate negative reply goes straight out, with NoData standing
    // in for "the destination was busy".
    assert_eq!(platform.sent_log.len(), 2);
    let busy_reply = &platform.sent_log[1];
    assert_eq!(busy_reply.command_id, CommandFrameId::DsmeGtsReply);
    assert_eq!(busy_reply.destination, ShortAddress(0x0005));
    assert_eq!(busy_reply.management.status, GtsStatus::NoData);

    assert_eq!(platform.comm_status.len(), 1);
    assert_eq!(
        platform.comm_status[0].status,
        CommStatus::TransactionOverflow
    );
    // No slot was reserved for the turned-down request
    assert!(pib.act.find(2, 4).is_none());

    // Its completion belongs to no instance and is simply dropped.
    let first = platform.take_in_flight();
    let second = platform.take_in_flight();
    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        second,
        CommandFrameId::DsmeGtsReply,
        DataStatus::Success,
        0,
    );
    assert!(manager.handshake_in_progress());

    manager.on_csma_sent(
        &mut pib,
        &mut platform,
        first,
        CommandFrameId::DsmeGtsReply,
        DataStatus::Success,
        0,
    );
    assert_eq!(platform.live_messages(), 0);
}
