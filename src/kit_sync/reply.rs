//! Single-slot pending-request registry.
//!
//! The wire protocol has no correlation IDs, so at most one SysEx
//! request may be outstanding; an inbound DT1 always belongs to the
//! current claim. The slot is the enforcement point: a second claim
//! while one is live fails with `Busy` instead of corrupting the match.

use std::fmt;

use tokio::{
    sync::{
        mpsc::{self, Receiver, Sender, channel},
        oneshot,
    },
    task::JoinHandle,
};

use crate::roland::sysex::SysExFrame;

type Result<T> = std::result::Result<T, ReplyError>;

/// Frames a single claim can buffer before delivery drops them; late
/// responses for earlier kits can pile up inside one wait window.
const CLAIM_BUFFER: usize = 4;

pub enum Operation {
    Claim {
        op_resp: oneshot::Sender<Result<mpsc::Receiver<SysExFrame>>>,
    },
    Deliver {
        frame: SysExFrame,
    },
    Release {
        op_resp: oneshot::Sender<Result<()>>,
    },
}

#[derive(Debug, Clone)]
pub enum ErrorType {
    Busy,
    NoPendingRequest,
}

#[derive(Debug, Clone)]
pub struct ReplyError {
    pub error_type: ErrorType,
}

impl ReplyError {
    pub fn new(error_type: ErrorType) -> Self {
        Self { error_type }
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.error_type)
    }
}

impl std::error::Error for ReplyError {}

pub fn start() -> (Sender<Operation>, JoinHandle<()>) {
    let (operation_tx, operation_rx) = channel(8);
    let handle = tokio::spawn(async move {
        let mut slot = ReplySlot::new();
        slot.handle_requests(operation_rx).await;
    });
    return (operation_tx, handle);
}

struct ReplySlot {
    pending: Option<mpsc::Sender<SysExFrame>>,
}

impl ReplySlot {
    pub fn new() -> Self {
        Self { pending: None }
    }

    pub async fn handle_requests(&mut self, mut operation_rx: Receiver<Operation>) {
        while let Some(request) = operation_rx.recv().await {
            match request {
                Operation::Claim { op_resp } => {
                    op_resp.send(self.claim()).ok();
                }
                Operation::Deliver { frame } => {
                    self.deliver(frame);
                }
                Operation::Release { op_resp } => {
                    let response = match self.pending.take() {
                        Some(_) => Ok(()),
                        None => Err(ReplyError::new(ErrorType::NoPendingRequest)),
                    };
                    op_resp.send(response).ok();
                }
            }
        }
    }

    fn claim(&mut self) -> Result<mpsc::Receiver<SysExFrame>> {
        if self.pending.is_some() {
            return Err(ReplyError::new(ErrorType::Busy));
        }
        let (frame_tx, frame_rx) = channel(CLAIM_BUFFER);
        self.pending = Some(frame_tx);
        return Ok(frame_rx);
    }

    fn deliver(&mut self, frame: SysExFrame) {
        match &self.pending {
            Some(frame_tx) => {
                if let Err(e) = frame_tx.try_send(frame) {
                    log::warn!("pending request cannot take the frame: {}", e);
                }
            }
            None => {
                log::debug!(
                    "unsolicited frame for address {} dropped",
                    hex::encode(frame.address)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roland::SysExCommand;
    use crate::roland::sysex::pad_kit_name;

    fn frame_for(address: [u8; 4]) -> SysExFrame {
        SysExFrame {
            command: SysExCommand::DataSet,
            address,
            payload: pad_kit_name("Rock Kit"),
        }
    }

    async fn claim(operation_tx: &Sender<Operation>) -> Result<mpsc::Receiver<SysExFrame>> {
        let (op_resp, op_rx) = oneshot::channel();
        operation_tx.send(Operation::Claim { op_resp }).await.unwrap();
        return op_rx.await.unwrap();
    }

    async fn release(operation_tx: &Sender<Operation>) -> Result<()> {
        let (op_resp, op_rx) = oneshot::channel();
        operation_tx.send(Operation::Release { op_resp }).await.unwrap();
        return op_rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_deliver_release() {
        let (operation_tx, _handle) = start();
        let mut frame_rx = claim(&operation_tx).await.unwrap();

        let sent = frame_for([0x04, 0x00, 0x00, 0x00]);
        operation_tx
            .send(Operation::Deliver { frame: sent })
            .await
            .unwrap();
        let frame = frame_rx.recv().await.unwrap();
        assert_eq!(frame.address, [0x04, 0x00, 0x00, 0x00]);

        release(&operation_tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_claim_is_busy() {
        let (operation_tx, _handle) = start();
        let _frame_rx = claim(&operation_tx).await.unwrap();

        let Err(e) = claim(&operation_tx).await else {
            panic!("second claim must fail");
        };
        assert!(matches!(e.error_type, ErrorType::Busy));

        // released slots can be claimed again
        release(&operation_tx).await.unwrap();
        claim(&operation_tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_without_claim() {
        let (operation_tx, _handle) = start();
        let Err(e) = release(&operation_tx).await else {
            panic!("release without a claim must fail");
        };
        assert!(matches!(e.error_type, ErrorType::NoPendingRequest));
    }

    #[tokio::test]
    async fn test_unsolicited_frame_dropped() {
        let (operation_tx, _handle) = start();
        operation_tx
            .send(Operation::Deliver {
                frame: frame_for([0x04, 0x01, 0x00, 0x00]),
            })
            .await
            .unwrap();

        // the slot still accepts a fresh claim afterwards
        claim(&operation_tx).await.unwrap();
    }
}
