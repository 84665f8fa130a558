//! Message buffers and the downward interfaces toward the CSMA-CA send path.
//!
//! Buffers are borrowed from an external pool. Handing a message to
//! [`MessageDispatcher::send_in_cap`] transfers ownership to the CSMA path,
//! which gives it back through `GtsManager::on_csma_sent`; a refused
//! submission returns the buffer to the caller, which must release it.

use byte::{BytesExt, TryWrite};

use crate::{
    consts::MAX_PHY_PACKET_SIZE,
    wire::{GtsCommandFrame, MessageHeader},
};

/// Identity of a pool buffer, used to match CSMA completions to the
/// handshake instance that submitted the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct MessageHandle(u32);

impl MessageHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

/// A MAC frame under construction or under inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsmeMessage {
    handle: MessageHandle,
    pub header: MessageHeader,
    pub payload: heapless::Vec<u8, MAX_PHY_PACKET_SIZE>,
}

impl DsmeMessage {
    pub fn new(handle: MessageHandle) -> Self {
        Self {
            handle,
            header: MessageHeader::new(),
            payload: heapless::Vec::new(),
        }
    }

    pub fn handle(&self) -> MessageHandle {
        self.handle
    }

    /// Serialize a GTS command frame into the payload, replacing whatever
    /// was there.
    pub fn encode_gts_frame(&mut self, frame: GtsCommandFrame) -> Result<(), byte::Error> {
        self.payload.clear();
        unwrap!(self.payload.resize_default(MAX_PHY_PACKET_SIZE));
        let length = frame.try_write(&mut self.payload, ())?;
        self.payload.truncate(length);
        Ok(())
    }

    pub fn decode_gts_frame(&self) -> Result<GtsCommandFrame, byte::Error> {
        let mut offset = 0;
        self.payload.as_slice().read(&mut offset)
    }
}

/// Result of a CSMA-CA transmission attempt, reported by the MAC dispatcher
/// through `GtsManager::on_csma_sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DataStatus {
    Success,
    NoAck,
    ChannelAccessFailure,
}

/// The platform message pool.
pub trait MessagePool {
    /// Borrow an empty buffer. `None` when the pool is exhausted.
    fn get_empty_message(&mut self) -> Option<DsmeMessage>;
    /// Hand a buffer back to the pool.
    fn release_message(&mut self, message: DsmeMessage);
}

/// The CAP transmission queue of the MAC dispatcher.
pub trait MessageDispatcher {
    /// Enqueue a frame for CSMA-CA transmission during the CAP. On refusal
    /// the message is handed back so the caller can release it.
    fn send_in_cap(&mut self, message: DsmeMessage) -> Result<(), DsmeMessage>;
}
