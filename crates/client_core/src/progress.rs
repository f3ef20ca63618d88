//! Upload progress tracking: a push stream per ingestion session with a
//! time-bounded polling fallback.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use shared::{domain::SessionId, protocol::ProgressEvent};
use tokio::{
    sync::watch,
    time::{interval_at, sleep, sleep_until, timeout_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::ProgressSettings,
    error::{ClientError, ClientResult},
    store::{StatePatch, StateStore},
    transport::{ProgressSource, ReportApi, UploadAck, UploadFile},
};

/// Ceiling for progress shown while it is inferred by polling.
const DEGRADED_PROGRESS_CEILING: f64 = 95.0;
const DEGRADED_PROGRESS_STEP: f64 = 5.0;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Uploading,
    StreamConnecting,
    StreamActive,
    Degraded,
    Completed,
    Failed,
    Cancelled,
}

impl UploadPhase {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Uploading | Self::StreamConnecting | Self::StreamActive | Self::Degraded
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub phase: UploadPhase,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub status: String,
    pub session_id: Option<SessionId>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

impl UploadProgress {
    pub fn percent(&self) -> u8 {
        self.progress.clamp(0.0, 100.0).round() as u8
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self {
            phase: UploadPhase::Idle,
            progress: 0.0,
            status: "idle".to_string(),
            session_id: None,
            warning: None,
            error: None,
        }
    }
}

/// Parses one stream payload. Malformed payloads are rejected so the caller
/// can drop them without ending the stream.
pub fn parse_event(raw: &str) -> ClientResult<ProgressEvent> {
    let event: ProgressEvent = serde_json::from_str(raw)
        .map_err(|err| ClientError::StreamParse(err.to_string()))?;
    if !event.progress.is_finite() {
        return Err(ClientError::StreamParse(format!(
            "progress is not a finite number: {}",
            event.progress
        )));
    }
    Ok(event)
}

/// Transition table for one upload. Every method returns whether the input
/// was accepted in the current phase; rejected inputs leave the state as is.
#[derive(Debug, Clone, Default)]
pub struct UploadMachine {
    current: UploadProgress,
}

impl UploadMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> &UploadProgress {
        &self.current
    }

    pub fn phase(&self) -> UploadPhase {
        self.current.phase
    }

    pub fn submit(&mut self, filename: &str) -> bool {
        if !self.enter(&[UploadPhase::Idle], UploadPhase::Uploading) {
            return false;
        }
        self.current.status = format!("uploading {filename}");
        true
    }

    pub fn acknowledge(&mut self, ack: &UploadAck) -> bool {
        match ack {
            UploadAck::Accepted { session_id } => {
                if !self.enter(&[UploadPhase::Uploading], UploadPhase::StreamConnecting) {
                    return false;
                }
                self.current.session_id = Some(session_id.clone());
                self.current.status = "processing".to_string();
            }
            UploadAck::Processed { warning, .. } => {
                if !self.enter(&[UploadPhase::Uploading], UploadPhase::Completed) {
                    return false;
                }
                self.current.progress = 100.0;
                self.current.status = "tracking unavailable".to_string();
                self.current.warning = warning.clone();
            }
        }
        true
    }

    pub fn stream_opened(&mut self) -> bool {
        self.enter(&[UploadPhase::StreamConnecting], UploadPhase::StreamActive)
    }

    pub fn apply_event(&mut self, event: &ProgressEvent) -> bool {
        let next = if event.completed {
            UploadPhase::Completed
        } else {
            UploadPhase::StreamActive
        };
        if !self.enter(
            &[UploadPhase::StreamConnecting, UploadPhase::StreamActive],
            next,
        ) {
            return false;
        }
        let reported = event.progress.clamp(0.0, 100.0);
        self.current.progress = if event.completed {
            100.0
        } else {
            self.current.progress.max(reported)
        };
        if !event.status.trim().is_empty() {
            self.current.status = event.status.clone();
        }
        true
    }

    pub fn stream_lost(&mut self) -> bool {
        self.enter(
            &[UploadPhase::StreamConnecting, UploadPhase::StreamActive],
            UploadPhase::Degraded,
        )
    }

    /// Advances the displayed percentage while completion is only inferred.
    pub fn simulate_step(&mut self) -> bool {
        if self.current.phase != UploadPhase::Degraded {
            return false;
        }
        let next = (self.current.progress + DEGRADED_PROGRESS_STEP).min(DEGRADED_PROGRESS_CEILING);
        self.current.progress = self.current.progress.max(next);
        true
    }

    pub fn poll_succeeded(&mut self) -> bool {
        if !self.enter(&[UploadPhase::Degraded], UploadPhase::Completed) {
            return false;
        }
        self.current.progress = 100.0;
        self.current.status = "completed".to_string();
        true
    }

    pub fn time_out(&mut self, err: &ClientError) -> bool {
        if !self.enter(&[UploadPhase::Degraded], UploadPhase::Failed) {
            return false;
        }
        self.current.status = "failed".to_string();
        self.current.error = Some(err.to_string());
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.current.phase.is_active() {
            return false;
        }
        self.current.phase = UploadPhase::Failed;
        self.current.status = "failed".to_string();
        self.current.error = Some(message.into());
        true
    }

    pub fn cancel(&mut self) -> bool {
        if !self.current.phase.is_active() {
            return false;
        }
        self.current.phase = UploadPhase::Cancelled;
        self.current.status = "cancelled".to_string();
        true
    }

    fn enter(&mut self, from: &[UploadPhase], to: UploadPhase) -> bool {
        if !from.contains(&self.current.phase) {
            debug!(from = ?self.current.phase, to = ?to, "upload: rejected transition");
            return false;
        }
        self.current.phase = to;
        true
    }
}

enum StreamOutcome {
    Completed,
    Lost(ClientError),
    Cancelled,
}

enum PollOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

/// Resolves once cancellation is requested or the controlling side is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Drives one upload from submission to a terminal phase, publishing every
/// transition into the store.
pub struct ProgressMonitor {
    api: Arc<dyn ReportApi>,
    source: Arc<dyn ProgressSource>,
    store: Arc<StateStore>,
    settings: ProgressSettings,
}

impl ProgressMonitor {
    pub fn new(
        api: Arc<dyn ReportApi>,
        source: Arc<dyn ProgressSource>,
        store: Arc<StateStore>,
        settings: ProgressSettings,
    ) -> Self {
        Self {
            api,
            source,
            store,
            settings,
        }
    }

    pub async fn run(&self, file: UploadFile, mut cancel: watch::Receiver<bool>) -> UploadProgress {
        let mut machine = UploadMachine::new();
        machine.submit(&file.filename);
        self.publish(&machine);

        let filename = file.filename.clone();
        let ack = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return self.cancel(machine),
            ack = self.api.upload(file) => ack,
        };
        let ack = match ack {
            Ok(ack) => ack,
            Err(err) => {
                warn!(filename = %filename, "upload: ingestion call failed: {err}");
                machine.fail(err.to_string());
                self.publish(&machine);
                return machine.current;
            }
        };

        machine.acknowledge(&ack);
        self.publish(&machine);

        if let UploadAck::Accepted { session_id } = &ack {
            info!(filename = %filename, session_id = %session_id, "upload: tracking session");
            match self
                .follow_stream(&mut machine, session_id, &mut cancel)
                .await
            {
                StreamOutcome::Completed => {}
                StreamOutcome::Cancelled => return self.cancel(machine),
                StreamOutcome::Lost(err) => {
                    warn!(session_id = %session_id, "upload: stream degraded, polling: {err}");
                    machine.stream_lost();
                    self.publish(&machine);
                    match self.poll_until_ready(&mut machine, &mut cancel).await {
                        PollOutcome::Ready => {}
                        PollOutcome::TimedOut => return machine.current,
                        PollOutcome::Cancelled => return self.cancel(machine),
                    }
                }
            }
        } else {
            info!(filename = %filename, "upload: processed without a tracking session");
        }

        // Leave the final percentage on screen before the caller refreshes.
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {}
            _ = sleep(self.settings.settle_delay) => {}
        }
        machine.current
    }

    async fn follow_stream(
        &self,
        machine: &mut UploadMachine,
        session_id: &SessionId,
        cancel: &mut watch::Receiver<bool>,
    ) -> StreamOutcome {
        let opened = tokio::select! {
            biased;
            _ = cancelled(cancel) => return StreamOutcome::Cancelled,
            opened = self.source.open(session_id) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return StreamOutcome::Lost(err),
        };
        machine.stream_opened();
        self.publish(machine);

        loop {
            let item = tokio::select! {
                biased;
                _ = cancelled(cancel) => return StreamOutcome::Cancelled,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(raw)) => match parse_event(&raw) {
                    Ok(event) => {
                        if machine.apply_event(&event) {
                            self.publish(machine);
                        }
                        if machine.phase() == UploadPhase::Completed {
                            info!(session_id = %session_id, "upload: processing completed");
                            return StreamOutcome::Completed;
                        }
                    }
                    Err(err) => {
                        warn!(session_id = %session_id, "upload: dropping progress event: {err}");
                    }
                },
                Some(Err(err)) => return StreamOutcome::Lost(err),
                None => {
                    return StreamOutcome::Lost(ClientError::StreamConnectivity(
                        "stream closed before completion".to_string(),
                    ))
                }
            }
        }
    }

    async fn poll_until_ready(
        &self,
        machine: &mut UploadMachine,
        cancel: &mut watch::Receiver<bool>,
    ) -> PollOutcome {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let period = self.settings.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(cancel) => return PollOutcome::Cancelled,
                _ = sleep_until(deadline) => {
                    let err = ClientError::Timeout(self.settings.timeout);
                    warn!("upload: {err}");
                    machine.time_out(&err);
                    self.publish(machine);
                    return PollOutcome::TimedOut;
                }
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = cancelled(cancel) => return PollOutcome::Cancelled,
                polled = timeout_at(deadline, self.api.list_companies()) => polled,
            };
            match polled {
                Ok(Ok(companies)) if !companies.is_empty() => {
                    info!(
                        companies = companies.len(),
                        "upload: completion inferred by polling"
                    );
                    machine.poll_succeeded();
                    self.publish(machine);
                    return PollOutcome::Ready;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) if err.is_not_found() => {}
                Ok(Err(err)) => debug!("upload: poll failed: {err}"),
                Err(_) => continue,
            }
            if machine.simulate_step() {
                self.publish(machine);
            }
        }
    }

    fn cancel(&self, mut machine: UploadMachine) -> UploadProgress {
        if machine.cancel() {
            info!("upload: cancelled");
            self.publish(&machine);
        }
        machine.current
    }

    fn publish(&self, machine: &UploadMachine) {
        self.store
            .apply(StatePatch::new().upload(machine.progress().clone()));
    }
}

#[cfg(test)]
#[path = "tests/progress_tests.rs"]
mod tests;
