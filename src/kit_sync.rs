//! Kit-name sync engine.
//!
//! Walks the module's kit table with one RQ1 request per kit and stores
//! every name that comes back. The transport is lossy; a kit that never
//! answers inside its wait window is recorded and the walk moves on.
//! Program changes stay usable the whole time because the engine task
//! never blocks on a session: the session runs as its own task and talks
//! back over a channel.

pub mod reply;

use std::time::Duration;

use tokio::{
    select,
    sync::{
        mpsc::{self, Receiver, Sender, channel},
        oneshot, watch,
    },
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};

use crate::{
    command::Command,
    error::{AppError, ErrorType},
    kit_names,
    kit_switch::KitSwitch,
    midi_port::{FrameAssembler, PortControl, PortStrategy},
    roland::{KIT_NAME_LENGTH, TOTAL_KITS, address, sysex, sysex::SysExFrame},
    settings::Settings,
};

/// How a sync session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every kit got its request; misses, if any, were per-kit timeouts.
    Completed,
    Cancelled,
    /// The transport died; the remaining kits were never requested.
    TransportLost,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub attempted: u16,
    pub matched: u16,
    pub missed: Vec<u16>,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    fn new() -> Self {
        Self {
            attempted: 0,
            matched: 0,
            missed: Vec::new(),
            outcome: SyncOutcome::Completed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub syncing: bool,
    pub progress: f32,
    pub last_kit: Option<u16>,
}

enum EngineEvent {
    /// Carries the requester's response channel so the engine marks
    /// itself idle before the caller can see the report; a follow-up
    /// sync issued right after the report must not hit `AlreadyRunning`.
    SyncFinished {
        report: SyncReport,
        resp: oneshot::Sender<Result<SyncReport, AppError>>,
    },
}

/// Spawns the engine loop and returns its command channel.
pub fn start(
    wire_tx: Sender<Vec<u8>>,
    reply_tx: Sender<reply::Operation>,
    names_tx: Sender<kit_names::Operation>,
    port_ctl_tx: Option<Sender<PortControl>>,
    settings: Settings,
) -> (Sender<Command>, JoinHandle<()>) {
    let (command_tx, mut command_rx) = channel(8);
    let (event_tx, mut event_rx) = channel(4);
    let mut engine = Engine {
        switcher: KitSwitch::new(wire_tx.clone()),
        wire_tx,
        reply_tx,
        names_tx,
        port_ctl_tx,
        settings,
        event_tx,
        syncing: false,
        cancel_tx: None,
        progress_rx: None,
    };
    let handle = tokio::spawn(async move {
        loop {
            select! {
                Some(command) = command_rx.recv() => engine.handle_command(command).await,
                Some(event) = event_rx.recv() => engine.handle_event(event),
                else => break,
            }
        }
    });
    return (command_tx, handle);
}

/// Spawns the inbound dispatch task: transport chunks in, validated DT1
/// frames out to the reply slot. Anything that fails a check is logged
/// and dropped here; parse failures never reach the session loop.
pub fn start_inbound(
    mut chunk_rx: Receiver<Vec<u8>>,
    reply_tx: Sender<reply::Operation>,
) -> JoinHandle<()> {
    return tokio::spawn(async move {
        let mut assembler = FrameAssembler::new();
        while let Some(chunk) = chunk_rx.recv().await {
            for raw in assembler.push(&chunk) {
                match sysex::parse_response(&raw) {
                    Ok(frame) => {
                        if reply_tx
                            .send(reply::Operation::Deliver { frame })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        log::debug!("discarding inbound frame: {}; data={}", e, hex::encode(&raw));
                    }
                }
            }
        }
        log::info!("inbound byte stream ended");
    });
}

struct Engine {
    wire_tx: Sender<Vec<u8>>,
    reply_tx: Sender<reply::Operation>,
    names_tx: Sender<kit_names::Operation>,
    port_ctl_tx: Option<Sender<PortControl>>,
    settings: Settings,
    switcher: KitSwitch,
    event_tx: Sender<EngineEvent>,
    syncing: bool,
    cancel_tx: Option<watch::Sender<bool>>,
    progress_rx: Option<watch::Receiver<f32>>,
}

impl Engine {
    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SwitchKit {
                kit_number,
                channel,
                resp,
            } => {
                let channel = channel.unwrap_or(self.settings.midi_channel);
                let result = self.switcher.switch_to(kit_number, channel).await;
                resp.send(result).ok();
            }
            Command::GetName { kit_number, resp } => {
                if self.syncing {
                    resp.send(Err(AppError::new(
                        ErrorType::AlreadyRunning,
                        "a sync session is active".to_string(),
                    )))
                    .ok();
                    return;
                }
                let session = self.make_session();
                tokio::spawn(async move {
                    resp.send(session.fetch_one_name(kit_number).await).ok();
                });
            }
            Command::SyncNames { resp } => self.start_sync(resp),
            Command::CancelSync { resp } => {
                let result = match &self.cancel_tx {
                    Some(cancel_tx) => {
                        log::info!("sync cancellation requested");
                        cancel_tx.send(true).ok();
                        Ok(())
                    }
                    None => Err(AppError::runtime("no sync in progress")),
                };
                resp.send(result).ok();
            }
            Command::Status { resp } => {
                let progress = match &self.progress_rx {
                    Some(progress_rx) => *progress_rx.borrow(),
                    None => 0.0,
                };
                let status = EngineStatus {
                    syncing: self.syncing,
                    progress,
                    last_kit: self.switcher.last_kit(),
                };
                resp.send(Ok(status)).ok();
            }
            Command::ListNames { resp } => {
                let names_tx = self.names_tx.clone();
                tokio::spawn(async move {
                    let (list_tx, list_rx) = oneshot::channel();
                    let operation = kit_names::Operation::List { resp: list_tx };
                    if names_tx.send(operation).await.is_err() {
                        resp.send(Err(AppError::runtime("name store is gone"))).ok();
                        return;
                    }
                    let result = match list_rx.await {
                        Ok(list) => Ok(list),
                        Err(_) => Err(AppError::runtime("name store is gone")),
                    };
                    resp.send(result).ok();
                });
            }
        }
    }

    fn make_session(&self) -> Session {
        return Session {
            wire_tx: self.wire_tx.clone(),
            reply_tx: self.reply_tx.clone(),
            names_tx: self.names_tx.clone(),
            port_ctl_tx: self.port_ctl_tx.clone(),
            settings: self.settings.clone(),
        };
    }

    fn start_sync(&mut self, resp: oneshot::Sender<Result<SyncReport, AppError>>) {
        if self.syncing {
            resp.send(Err(AppError::new(
                ErrorType::AlreadyRunning,
                "a sync session is active".to_string(),
            )))
            .ok();
            return;
        }
        if self.wire_tx.is_closed() {
            resp.send(Err(AppError::new(
                ErrorType::NotConnected,
                "transport is gone".to_string(),
            )))
            .ok();
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(0.0f32);
        self.syncing = true;
        self.cancel_tx = Some(cancel_tx);
        self.progress_rx = Some(progress_rx);

        let session = self.make_session();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let report = session.run(cancel_rx, progress_tx).await;
            event_tx
                .send(EngineEvent::SyncFinished { report, resp })
                .await
                .ok();
        });
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SyncFinished { report, resp } => {
                self.syncing = false;
                self.cancel_tx = None;
                log::info!(
                    "sync finished: {} of {} kits matched ({:?})",
                    report.matched,
                    report.attempted,
                    report.outcome
                );
                resp.send(Ok(report)).ok();
            }
        }
    }
}

enum WaitOutcome {
    Matched,
    NoResponse,
    Cancelled,
}

/// One sync run. Owns nothing shared with the engine beyond channels, so
/// cancelling or dropping it cannot leave the transport half-locked.
struct Session {
    wire_tx: Sender<Vec<u8>>,
    reply_tx: Sender<reply::Operation>,
    names_tx: Sender<kit_names::Operation>,
    port_ctl_tx: Option<Sender<PortControl>>,
    settings: Settings,
}

impl Session {
    async fn run(
        self,
        mut cancel_rx: watch::Receiver<bool>,
        progress_tx: watch::Sender<f32>,
    ) -> SyncReport {
        self.port_control(PortControl::OpenReceiver).await;
        let mut report = SyncReport::new();
        self.walk_kits(&mut report, &mut cancel_rx, &progress_tx).await;
        self.drain(&mut report).await;
        self.port_control(PortControl::CloseReceiver).await;
        return report;
    }

    async fn walk_kits(
        &self,
        report: &mut SyncReport,
        cancel_rx: &mut watch::Receiver<bool>,
        progress_tx: &watch::Sender<f32>,
    ) {
        let total = self.settings.total_kits.min(TOTAL_KITS);
        for kit_number in 1..=total {
            if *cancel_rx.borrow() {
                report.outcome = SyncOutcome::Cancelled;
                return;
            }

            let address = match address::kit_address(kit_number) {
                Ok(address) => address,
                Err(e) => {
                    log::error!("kit {} has no address: {}", kit_number, e);
                    report.attempted += 1;
                    report.missed.push(kit_number);
                    continue;
                }
            };
            let mut reply_rx = match self.claim_reply().await {
                Ok(reply_rx) => reply_rx,
                Err(e) => {
                    log::error!("reply slot unavailable for kit {}: {}", kit_number, e);
                    report.attempted += 1;
                    report.missed.push(kit_number);
                    continue;
                }
            };

            let request = sysex::build_request(address, KIT_NAME_LENGTH as u32);
            log::debug!("kit {} request: {}", kit_number, hex::encode(&request));
            if self.wire_tx.send(request).await.is_err() {
                log::warn!("transport died while requesting kit {}", kit_number);
                self.release_reply().await;
                report.attempted += 1;
                report.missed.push(kit_number);
                report.outcome = SyncOutcome::TransportLost;
                return;
            }

            let wait = self.wait_for_reply(kit_number, &mut reply_rx, cancel_rx).await;
            self.release_reply().await;
            report.attempted += 1;
            match wait {
                WaitOutcome::Matched => report.matched += 1,
                WaitOutcome::NoResponse => {
                    log::debug!("no response for kit {}", kit_number);
                    report.missed.push(kit_number);
                }
                WaitOutcome::Cancelled => {
                    report.missed.push(kit_number);
                    report.outcome = SyncOutcome::Cancelled;
                    return;
                }
            }
            progress_tx.send(kit_number as f32 / total as f32).ok();

            if self.settings.inter_kit_pause_ms > 0 {
                sleep(Duration::from_millis(self.settings.inter_kit_pause_ms)).await;
            }
        }
    }

    /// Waits for the current kit's response in short ticks so an outside
    /// cancellation is picked up mid-window. Responses addressed to an
    /// earlier kit are stored and the wait continues.
    async fn wait_for_reply(
        &self,
        kit_number: u16,
        reply_rx: &mut mpsc::Receiver<SysExFrame>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> WaitOutcome {
        let tick = Duration::from_millis(self.settings.response_tick_ms);
        for _ in 0..self.settings.response_ticks {
            if *cancel_rx.borrow() {
                return WaitOutcome::Cancelled;
            }
            match timeout(tick, reply_rx.recv()).await {
                Ok(Some(frame)) => {
                    if let Some(kit) = self.store_frame(&frame).await {
                        if kit == kit_number {
                            return WaitOutcome::Matched;
                        }
                        log::debug!("late response for kit {} while waiting on kit {}", kit, kit_number);
                    }
                }
                Ok(None) => {
                    log::error!("reply channel closed under an active claim");
                    return WaitOutcome::NoResponse;
                }
                Err(_) => {
                    // tick elapsed; loop to re-check cancellation
                }
            }
        }
        return WaitOutcome::NoResponse;
    }

    /// After the walk, keep listening one drain window for responses
    /// still in flight. A trailing response un-misses its kit.
    async fn drain(&self, report: &mut SyncReport) {
        if self.settings.drain_ms == 0 {
            return;
        }
        let mut reply_rx = match self.claim_reply().await {
            Ok(reply_rx) => reply_rx,
            Err(e) => {
                log::debug!("skipping drain: {}", e);
                return;
            }
        };
        let deadline = Instant::now() + Duration::from_millis(self.settings.drain_ms);
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match timeout(deadline - now, reply_rx.recv()).await {
                Ok(Some(frame)) => {
                    let Some(kit) = self.store_frame(&frame).await else {
                        continue;
                    };
                    if let Some(position) = report.missed.iter().position(|k| *k == kit) {
                        report.missed.remove(position);
                        report.matched += 1;
                        log::debug!("trailing response recovered kit {}", kit);
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
        self.release_reply().await;
    }

    /// Stores the name a frame carries and reports which kit the frame
    /// addressed. An unusable name (blank slot, garbled text) is logged
    /// and skipped; the kit still counts as having answered.
    async fn store_frame(&self, frame: &SysExFrame) -> Option<u16> {
        let kit_number = match address::kit_index(&frame.address) {
            Ok(kit_number) => kit_number,
            Err(e) => {
                log::debug!("discarding frame: {}", e);
                return None;
            }
        };
        match sysex::extract_kit_name(frame) {
            Ok((_, name)) => {
                let operation = kit_names::Operation::Store { kit_number, name };
                if self.names_tx.send(operation).await.is_err() {
                    log::error!("name store is gone");
                }
            }
            Err(e) => log::debug!("kit {} name unusable: {}", kit_number, e),
        }
        return Some(kit_number);
    }

    /// Fetches a single kit's name with the same claim/request/wait
    /// cycle the full sync uses per kit, so it respects the one
    /// outstanding request invariant: during a sync the claim reports
    /// the slot as taken.
    async fn fetch_one_name(&self, kit_number: u16) -> Result<String, AppError> {
        let kit_address = address::kit_address(kit_number)?;
        let mut reply_rx = self.claim_reply().await?;

        let request = sysex::build_request(kit_address, KIT_NAME_LENGTH as u32);
        if self.wire_tx.send(request).await.is_err() {
            self.release_reply().await;
            return Err(AppError::new(
                ErrorType::NotConnected,
                "transport is gone".to_string(),
            ));
        }

        let tick = Duration::from_millis(self.settings.response_tick_ms);
        for _ in 0..self.settings.response_ticks {
            match timeout(tick, reply_rx.recv()).await {
                Ok(Some(frame)) => match sysex::extract_kit_name(&frame) {
                    Ok((kit, name)) if kit == kit_number => {
                        let operation = kit_names::Operation::Store {
                            kit_number,
                            name: name.clone(),
                        };
                        self.names_tx.send(operation).await.ok();
                        self.release_reply().await;
                        return Ok(name);
                    }
                    Ok((kit, name)) => {
                        log::debug!("late response for kit {} stored along the way", kit);
                        let operation = kit_names::Operation::Store {
                            kit_number: kit,
                            name,
                        };
                        self.names_tx.send(operation).await.ok();
                    }
                    Err(e) => {
                        let ours =
                            matches!(address::kit_index(&frame.address), Ok(kit) if kit == kit_number);
                        if ours && e.error_type == ErrorType::EmptyName {
                            self.release_reply().await;
                            return Err(e);
                        }
                        log::debug!("discarding frame: {}", e);
                    }
                },
                Ok(None) => break,
                Err(_) => {
                    // tick elapsed, keep waiting
                }
            }
        }
        self.release_reply().await;
        return Err(AppError::timeout());
    }

    async fn claim_reply(&self) -> Result<mpsc::Receiver<SysExFrame>, AppError> {
        let (op_resp, op_rx) = oneshot::channel();
        let operation = reply::Operation::Claim { op_resp };
        if self.reply_tx.send(operation).await.is_err() {
            return Err(AppError::runtime("reply slot task is gone"));
        }
        return match op_rx.await {
            Ok(Ok(frame_rx)) => Ok(frame_rx),
            Ok(Err(e)) => match e.error_type {
                reply::ErrorType::Busy => Err(AppError::new(
                    ErrorType::AlreadyRunning,
                    "another request is in flight".to_string(),
                )),
                _ => Err(AppError::runtime(
                    format!("reply slot refused the claim: {}", e).as_str(),
                )),
            },
            Err(_) => Err(AppError::runtime("reply slot task is gone")),
        };
    }

    async fn release_reply(&self) {
        let (op_resp, op_rx) = oneshot::channel();
        let operation = reply::Operation::Release { op_resp };
        if self.reply_tx.send(operation).await.is_err() {
            return;
        }
        if let Ok(Err(e)) = op_rx.await {
            log::warn!("reply slot release: {}", e);
        }
    }

    async fn port_control(&self, control: PortControl) {
        if self.settings.port_strategy != PortStrategy::RebuildForSync {
            return;
        }
        if let Some(port_ctl_tx) = &self.port_ctl_tx {
            if port_ctl_tx.send(control).await.is_err() {
                log::warn!("port controller is gone");
            }
        }
    }
}
