use crate::wire::{PanId, ShortAddress};

/// Status codes reported through MLME-COMM-STATUS.indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum CommStatus {
    Success,
    NoAck,
    ChannelAccessFailure,
    TransactionOverflow,
    TransactionExpired,
}

/// The MLME-COMM-STATUS.indication primitive reports the fate of frames the
/// MLME sent on its own behalf: here, the receipt of a GTS notify addressed
/// to this device and the failure modes of GTS replies.
///
/// Addressing information is only available when a received frame triggered
/// the indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommStatusIndication {
    pub pan_id: Option<PanId>,
    pub source: Option<ShortAddress>,
    pub destination: Option<ShortAddress>,
    pub status: CommStatus,
}

impl CommStatusIndication {
    /// An indication without addressing, for locally detected conditions.
    pub fn status_only(status: CommStatus) -> Self {
        Self {
            pan_id: None,
            source: None,
            destination: None,
            status,
        }
    }
}
