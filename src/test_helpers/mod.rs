//! Helpers for driving the GTS manager from host-side tests: a recording
//! platform standing in for the message pool, the CAP queue and the upper
//! layer, plus a few constructors for the common fixtures.

use crate::{
    message::{DsmeMessage, MessageDispatcher, MessageHandle, MessagePool},
    pib::{DsmeSuperframeGeometry, MacPib},
    sap::{CommStatusIndication, DsmeGtsConfirm, DsmeGtsIndication, MlmeSap},
    wire::{
        CommandFrameId, FrameType, GtsCommand, GtsCommandFrame, GtsManagement, MessageHeader,
        PanId, ShortAddress,
    },
    GtsManager,
};

/// A decoded copy of a frame that was handed to the CAP queue.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub destination: ShortAddress,
    pub command_id: CommandFrameId,
    pub management: GtsManagement,
    pub command: GtsCommand,
}

/// Implements the pool, the CAP queue and the MLME-SAP in one recording
/// object. Frames handed to the CAP queue stay in `in_flight` until the test
/// completes them with [`RecordingPlatform::take_in_flight`] and
/// `GtsManager::on_csma_sent`.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    next_handle: u32,
    issued: usize,
    released: usize,
    /// When false, `send_in_cap` refuses every submission.
    pub accept_sends: bool,
    pub in_flight: Vec<DsmeMessage>,
    pub sent_log: Vec<SentFrame>,
    pub confirms: Vec<DsmeGtsConfirm>,
    pub indications: Vec<DsmeGtsIndication>,
    pub comm_status: Vec<CommStatusIndication>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            accept_sends: true,
            ..Default::default()
        }
    }

    /// The oldest frame still sitting in the CAP queue.
    pub fn take_in_flight(&mut self) -> DsmeMessage {
        assert!(
            !self.in_flight.is_empty(),
            "no frame is waiting in the CAP queue"
        );
        self.in_flight.remove(0)
    }

    /// Pool buffers currently outside the pool, wherever they are.
    pub fn live_messages(&self) -> usize {
        self.issued - self.released
    }
}

impl MessagePool for RecordingPlatform {
    fn get_empty_message(&mut self) -> Option<DsmeMessage> {
        let handle = MessageHandle::new(self.next_handle);
        self.next_handle += 1;
        self.issued += 1;
        Some(DsmeMessage::new(handle))
    }

    fn release_message(&mut self, _message: DsmeMessage) {
        self.released += 1;
    }
}

impl MessageDispatcher for RecordingPlatform {
    fn send_in_cap(&mut self, message: DsmeMessage) -> Result<(), DsmeMessage> {
        if !self.accept_sends {
            return Err(message);
        }
        let frame = message
            .decode_gts_frame()
            .expect("only GTS command frames are sent in tests");
        self.sent_log.push(SentFrame {
            destination: message.header.dst_addr,
            command_id: frame.command_id,
            management: frame.management,
            command: frame.command,
        });
        self.in_flight.push(message);
        Ok(())
    }
}

impl MlmeSap for RecordingPlatform {
    fn dsme_gts_confirm(&mut self, confirm: DsmeGtsConfirm) {
        self.confirms.push(confirm);
    }

    fn dsme_gts_indication(&mut self, indication: DsmeGtsIndication) {
        self.indications.push(indication);
    }

    fn comm_status_indication(&mut self, indication: CommStatusIndication) {
        self.comm_status.push(indication);
    }
}

/// The geometry most tests run with: 4 superframes of 7 GTSs over 16
/// channels, CAP up to slot 8.
pub fn test_geometry() -> DsmeSuperframeGeometry {
    DsmeSuperframeGeometry {
        num_superframes_per_multi_superframe: 4,
        num_gtslots: 7,
        num_channels: 16,
        final_cap_slot: 8,
    }
}

/// A PIB for device `0x0001` with a response wait time of 15 base superframe
/// durations at superframe order 0.
pub fn test_pib() -> MacPib {
    let mut pib = MacPib::new(ShortAddress(0x0001), PanId(0x2345), test_geometry());
    pib.superframe_order = 0;
    pib.response_wait_time = 15;
    pib
}

/// Build a received GTS command frame as the MAC dispatcher would hand it in.
pub fn received_gts_frame(
    src_addr: ShortAddress,
    dst_addr: ShortAddress,
    pan_id: PanId,
    command_id: CommandFrameId,
    management: GtsManagement,
    command: GtsCommand,
) -> DsmeMessage {
    let mut message = DsmeMessage::new(MessageHandle::new(u32::MAX));
    message.header = MessageHeader {
        frame_type: FrameType::MacCommand,
        ack_request: true,
        pan_id,
        src_addr,
        dst_addr,
    };
    message
        .encode_gts_frame(GtsCommandFrame {
            command_id,
            management,
            command,
        })
        .expect("frame fits the buffer");
    message
}

/// Deliver the CFP-start tick of the given superframe.
pub fn cfp_tick<const N: usize>(
    manager: &mut GtsManager<N>,
    pib: &mut MacPib,
    platform: &mut RecordingPlatform,
    superframe: u8,
) {
    let slot = pib.geometry.final_cap_slot + 1;
    manager.handle_slot_event(pib, platform, slot, superframe);
}
