use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use shared::domain::{Company, CompanyId, FiscalYear, QaFinding, SearchResult};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    config::{ClientSettings, ProgressSettings},
    error::{ClientError, ClientResult},
    progress::{ProgressMonitor, UploadPhase, UploadProgress},
    store::{AppState, StatePatch, StateStore},
    transport::{
        validate_company_id, validate_query, HttpReportApi, ProgressSource, ReportApi, UploadFile,
    },
};

const COMPANIES_LOAD_FAILED: &str = "Failed to load companies";
const UPLOAD_INTERRUPTED: &str = "Upload tracking stopped unexpectedly";

#[async_trait]
pub trait DashboardHandle: Send + Sync {
    async fn load_companies(&self) -> ClientResult<()>;
    async fn select_company(&self, company: Company) -> ClientResult<()>;
    async fn select_year(&self, year: FiscalYear) -> ClientResult<()>;
    async fn upload_file(&self, file: UploadFile) -> ClientResult<UploadHandle>;
    async fn cancel_upload(&self);
    async fn search(
        &self,
        query: &str,
        company_id: Option<&CompanyId>,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<SearchResult>>;
    fn snapshot(&self) -> AppState;
    fn subscribe_state(&self) -> watch::Receiver<AppState>;
}

/// A running upload. Awaiting it yields the terminal progress record.
#[derive(Debug)]
pub struct UploadHandle {
    task: JoinHandle<UploadProgress>,
}

impl UploadHandle {
    pub async fn wait(self) -> UploadProgress {
        match self.task.await {
            Ok(progress) => progress,
            Err(err) => UploadProgress {
                phase: UploadPhase::Failed,
                status: "failed".to_string(),
                error: Some(format!("upload task ended unexpectedly: {err}")),
                ..UploadProgress::default()
            },
        }
    }
}

/// Owned by the coordinator only. Dropping it closes the cancel channel,
/// which the running upload treats as a cancellation.
struct ActiveUpload {
    cancel: watch::Sender<bool>,
}

/// Frees the upload slot when the upload task ends, including by panic or
/// abort. A task that never reached a terminal phase publishes a failure so
/// the store does not stay in an active upload phase.
struct UploadSlotGuard {
    coordinator: Weak<Coordinator>,
    store: Arc<StateStore>,
    finished: bool,
}

impl Drop for UploadSlotGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("upload: task ended before a terminal phase");
            let mut progress = self.store.snapshot().upload.unwrap_or_default();
            progress.phase = UploadPhase::Failed;
            progress.status = "failed".to_string();
            progress.error = Some(UPLOAD_INTERRUPTED.to_string());
            self.store
                .apply(StatePatch::new().upload(progress).error(UPLOAD_INTERRUPTED));
        }
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.upload_slot().take();
        }
    }
}

/// Sequences the fetches behind company/year selection and the upload
/// lifecycle, writing every outcome into the shared store.
pub struct Coordinator {
    api: Arc<dyn ReportApi>,
    source: Arc<dyn ProgressSource>,
    store: Arc<StateStore>,
    settings: ProgressSettings,
    upload: Mutex<Option<ActiveUpload>>,
}

impl Coordinator {
    pub fn new(
        api: Arc<dyn ReportApi>,
        source: Arc<dyn ProgressSource>,
        settings: ProgressSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            source,
            store: Arc::new(StateStore::new()),
            settings,
            upload: Mutex::new(None),
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Arc<Self>> {
        let http = Arc::new(HttpReportApi::from_settings(settings)?);
        Ok(Self::new(http.clone(), http, settings.progress.clone()))
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    async fn refresh_companies(&self) -> ClientResult<()> {
        let ticket = self.store.begin_fetch();
        match self.api.list_companies().await {
            Ok(companies) => {
                info!(count = companies.len(), "selection: companies loaded");
                ticket.commit(StatePatch::new().companies(companies).clear_error());
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                info!("selection: no companies available yet");
                ticket.commit(StatePatch::new().companies(Vec::new()).clear_error());
                Ok(())
            }
            Err(err) => {
                warn!("selection: failed to load companies: {err}");
                ticket.commit(StatePatch::new().error(COMPANIES_LOAD_FAILED));
                Err(err)
            }
        }
    }

    async fn choose_company(&self, company: Company) -> ClientResult<()> {
        if let Err(err) = validate_company_id(&company.id) {
            self.report(&err);
            return Err(err);
        }
        let current = self.store.snapshot();
        let already_selected = current
            .selected_company
            .as_ref()
            .is_some_and(|selected| selected.id == company.id);
        if already_selected && current.error.is_none() {
            debug!(company_id = %company.id, "selection: company already selected");
            return Ok(());
        }

        let reset = StatePatch::new()
            .select_company(company.clone())
            .clear_error();
        let ticket = self.store.begin_selection(reset);
        let (years, trends) = tokio::join!(
            self.api.list_years(&company.id),
            self.api.get_trends(&company.id)
        );
        let (years, trends) = match (years, trends) {
            (Ok(years), Ok(trends)) => (years, trends),
            (Err(err), _) | (_, Err(err)) => {
                warn!(company_id = %company.id, "selection: failed to load company data: {err}");
                let message = format!("Failed to load company data: {err}");
                ticket.commit(StatePatch::new().error(message));
                return Err(err);
            }
        };

        let latest = years.iter().copied().max();
        if !ticket.apply(StatePatch::new().company_data(years, trends)) {
            debug!(company_id = %company.id, "selection: discarding superseded company data");
            return Ok(());
        }
        let Some(year) = latest else {
            info!(company_id = %company.id, "selection: company has no reporting years");
            return Ok(());
        };
        // The company ticket stays open so loading does not flicker between steps.
        let result = self.load_year(&company, year).await;
        drop(ticket);
        result
    }

    async fn choose_year(&self, year: FiscalYear) -> ClientResult<()> {
        let current = self.store.snapshot();
        let Some(company) = current.selected_company else {
            debug!(year = %year, "selection: no company selected, ignoring year");
            return Ok(());
        };
        if !current.available_years.contains(&year) {
            let err = ClientError::validation(format!(
                "Year {year} is not available for {}",
                company.name
            ));
            self.report(&err);
            return Err(err);
        }
        self.load_year(&company, year).await
    }

    async fn load_year(&self, company: &Company, year: FiscalYear) -> ClientResult<()> {
        let reset = StatePatch::new().select_year(year).clear_error();
        let Some(ticket) = self.store.begin_selection_if(reset, |state| {
            state
                .selected_company
                .as_ref()
                .is_some_and(|selected| selected.id == company.id)
                && state.available_years.contains(&year)
        }) else {
            debug!(
                company_id = %company.id,
                year = %year,
                "selection: selection moved on, skipping year"
            );
            return Ok(());
        };

        let (financial, findings) = tokio::join!(
            self.api.get_financial_data(&company.id, year),
            self.findings_or_empty(&company.id, year)
        );
        match (financial, findings) {
            (Ok(financial), Ok(findings)) => {
                info!(
                    company_id = %company.id,
                    year = %year,
                    findings = findings.len(),
                    "selection: year data loaded"
                );
                if !ticket.commit(StatePatch::new().year_data(financial, findings)) {
                    debug!(
                        company_id = %company.id,
                        year = %year,
                        "selection: discarding superseded year data"
                    );
                }
                Ok(())
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(
                    company_id = %company.id,
                    year = %year,
                    "selection: failed to load financial data: {err}"
                );
                let message = format!("Failed to load financial data: {err}");
                ticket.commit(StatePatch::new().error(message));
                Err(err)
            }
        }
    }

    async fn findings_or_empty(
        &self,
        company_id: &CompanyId,
        year: FiscalYear,
    ) -> ClientResult<Vec<QaFinding>> {
        match self.api.get_qa_findings(company_id, Some(year)).await {
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    fn upload_slot(&self) -> MutexGuard<'_, Option<ActiveUpload>> {
        self.upload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_upload(&self) {
        if let Some(active) = self.upload_slot().as_ref() {
            info!("upload: cancellation requested");
            active.cancel.send_replace(true);
        }
    }

    /// Cancels any tracked upload. Selection requests need no teardown.
    pub async fn shutdown(&self) {
        self.stop_upload();
    }

    fn report(&self, err: &ClientError) {
        self.store.apply(StatePatch::new().error(err.to_string()));
    }
}

#[async_trait]
impl DashboardHandle for Arc<Coordinator> {
    async fn load_companies(&self) -> ClientResult<()> {
        self.refresh_companies().await
    }

    async fn select_company(&self, company: Company) -> ClientResult<()> {
        self.choose_company(company).await
    }

    async fn select_year(&self, year: FiscalYear) -> ClientResult<()> {
        self.choose_year(year).await
    }

    async fn upload_file(&self, file: UploadFile) -> ClientResult<UploadHandle> {
        if let Err(err) = file.validate() {
            self.report(&err);
            return Err(err);
        }
        let mut slot = self.upload_slot();
        if slot.is_some() {
            let err = ClientError::validation("An upload is already in progress");
            self.report(&err);
            return Err(err);
        }
        let (cancel, cancel_rx) = watch::channel(false);
        *slot = Some(ActiveUpload { cancel });
        drop(slot);

        info!(filename = %file.filename, bytes = file.bytes.len(), "upload: starting");
        self.store.apply(StatePatch::new().clear_error());
        let monitor = ProgressMonitor::new(
            Arc::clone(&self.api),
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.settings.clone(),
        );
        let guard = UploadSlotGuard {
            coordinator: Arc::downgrade(self),
            store: Arc::clone(&self.store),
            finished: false,
        };
        let task = tokio::spawn(track_upload(monitor, guard, file, cancel_rx));
        Ok(UploadHandle { task })
    }

    async fn cancel_upload(&self) {
        self.stop_upload();
    }

    async fn search(
        &self,
        query: &str,
        company_id: Option<&CompanyId>,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<SearchResult>> {
        if let Err(err) = validate_query(query) {
            self.report(&err);
            return Err(err);
        }
        let ticket = self.store.begin_fetch();
        match self.api.search(query, company_id, year).await {
            Ok(results) => {
                debug!(results = results.len(), "selection: search finished");
                ticket.commit(StatePatch::new().clear_error());
                Ok(results)
            }
            Err(err) => {
                warn!("selection: search failed: {err}");
                ticket.commit(StatePatch::new().error(err.to_string()));
                Err(err)
            }
        }
    }

    fn snapshot(&self) -> AppState {
        self.store.snapshot()
    }

    fn subscribe_state(&self) -> watch::Receiver<AppState> {
        self.store.subscribe()
    }
}

/// The task holds only a weak reference, so dropping the coordinator closes
/// the cancel channel and stops the upload.
async fn track_upload(
    monitor: ProgressMonitor,
    mut guard: UploadSlotGuard,
    file: UploadFile,
    cancel: watch::Receiver<bool>,
) -> UploadProgress {
    let outcome = monitor.run(file, cancel.clone()).await;
    guard.finished = true;
    let cancelled = *cancel.borrow() || cancel.has_changed().is_err();

    match outcome.phase {
        UploadPhase::Completed if !cancelled => {
            if let Some(coordinator) = guard.coordinator.upgrade() {
                if let Err(err) = coordinator.refresh_companies().await {
                    warn!("upload: refresh after ingestion failed: {err}");
                }
            }
            if let Some(warning) = &outcome.warning {
                guard.store.apply(StatePatch::new().error(warning.clone()));
            }
        }
        UploadPhase::Failed => {
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| "Upload failed".to_string());
            guard.store.apply(StatePatch::new().error(message));
        }
        _ => {}
    }
    outcome
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
