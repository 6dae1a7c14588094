use tokio::sync::oneshot;

use crate::{
    error::AppError,
    kit_names::KitName,
    kit_sync::{EngineStatus, SyncReport},
};

#[derive(Debug)]
pub enum Command {
    SwitchKit {
        kit_number: u16,
        /// Falls back to the configured drum channel when omitted.
        channel: Option<u8>,
        resp: oneshot::Sender<Result<(), AppError>>,
    },
    /// Fetch one kit's name outside a full sync.
    GetName {
        kit_number: u16,
        resp: oneshot::Sender<Result<String, AppError>>,
    },
    SyncNames {
        /// Resolved with the final report once the session drains.
        resp: oneshot::Sender<Result<SyncReport, AppError>>,
    },
    CancelSync {
        resp: oneshot::Sender<Result<(), AppError>>,
    },
    Status {
        resp: oneshot::Sender<Result<EngineStatus, AppError>>,
    },
    ListNames {
        resp: oneshot::Sender<Result<Vec<KitName>, AppError>>,
    },
}
