//! The MLME-SAP surface of the GTS management plane: the DSME-GTS
//! request/confirm/indication primitives and the COMM-STATUS indication.

mod comm_status;
mod gts;

pub use comm_status::{CommStatus, CommStatusIndication};
pub use gts::{DsmeGtsConfirm, DsmeGtsIndication, DsmeGtsRequest, DsmeGtsResponse};

/// The next higher layer, as seen from the GTS manager. All notifications
/// run to completion inside the calling handler.
pub trait MlmeSap {
    /// MLME-DSME-GTS.confirm
    fn dsme_gts_confirm(&mut self, confirm: DsmeGtsConfirm);
    /// MLME-DSME-GTS.indication
    fn dsme_gts_indication(&mut self, indication: DsmeGtsIndication);
    /// MLME-COMM-STATUS.indication
    fn comm_status_indication(&mut self, indication: CommStatusIndication);
}
