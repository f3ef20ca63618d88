//! Single shared application snapshot and the only place it is mutated.

use std::sync::{Mutex, MutexGuard, PoisonError};

use shared::domain::{Company, FinancialSnapshot, FiscalYear, QaFinding, TrendSeries};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::progress::UploadProgress;

pub type Generation = u64;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub is_data_loaded: bool,
    pub companies: Vec<Company>,
    pub selected_company: Option<Company>,
    pub available_years: Vec<FiscalYear>,
    pub selected_year: Option<FiscalYear>,
    pub financial_data: Option<FinancialSnapshot>,
    pub trends_data: Option<TrendSeries>,
    pub qa_findings: Vec<QaFinding>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub upload: Option<UploadProgress>,
}

impl AppState {
    /// Returns the first broken selection invariant, if any.
    pub fn consistency_violation(&self) -> Option<&'static str> {
        let Some(company) = &self.selected_company else {
            if !self.available_years.is_empty() || self.selected_year.is_some() {
                return Some("years present without a selected company");
            }
            if self.financial_data.is_some() || !self.qa_findings.is_empty() {
                return Some("year data present without a selected company");
            }
            return None;
        };
        if let Some(year) = self.selected_year {
            if !self.available_years.contains(&year) {
                return Some("selected year is not one of the available years");
            }
        } else if self.financial_data.is_some() || !self.qa_findings.is_empty() {
            return Some("year data present without a selected year");
        }
        let mismatched = self.qa_findings.iter().any(|finding| {
            finding.company_id != company.id || Some(finding.year) != self.selected_year
        });
        if mismatched {
            return Some("QA findings do not match the current selection");
        }
        None
    }
}

/// Partial update applied on top of the previous snapshot. Fields left unset
/// keep their current value.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    companies: Option<Vec<Company>>,
    selected_company: Option<Option<Company>>,
    available_years: Option<Vec<FiscalYear>>,
    selected_year: Option<Option<FiscalYear>>,
    financial_data: Option<Option<FinancialSnapshot>>,
    trends_data: Option<Option<TrendSeries>>,
    qa_findings: Option<Vec<QaFinding>>,
    error: Option<Option<String>>,
    upload: Option<UploadProgress>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn companies(mut self, companies: Vec<Company>) -> Self {
        self.companies = Some(companies);
        self
    }

    /// Selects `company` and clears everything derived from the previous one.
    pub fn select_company(mut self, company: Company) -> Self {
        self.selected_company = Some(Some(company));
        self.available_years = Some(Vec::new());
        self.trends_data = Some(None);
        self.select_year_reset(None)
    }

    pub fn company_data(mut self, years: Vec<FiscalYear>, trends: TrendSeries) -> Self {
        self.available_years = Some(years);
        self.trends_data = Some(Some(trends));
        self
    }

    /// Selects `year` and clears the data fetched for the previous year.
    pub fn select_year(self, year: FiscalYear) -> Self {
        self.select_year_reset(Some(year))
    }

    fn select_year_reset(mut self, year: Option<FiscalYear>) -> Self {
        self.selected_year = Some(year);
        self.financial_data = Some(None);
        self.qa_findings = Some(Vec::new());
        self
    }

    pub fn year_data(mut self, financial: FinancialSnapshot, findings: Vec<QaFinding>) -> Self {
        self.financial_data = Some(Some(financial));
        self.qa_findings = Some(findings);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn upload(mut self, progress: UploadProgress) -> Self {
        self.upload = Some(progress);
        self
    }

    fn apply_to(self, state: &mut AppState) {
        if let Some(companies) = self.companies {
            state.is_data_loaded = !companies.is_empty();
            state.companies = companies;
        }
        if let Some(company) = self.selected_company {
            state.selected_company = company;
        }
        if let Some(years) = self.available_years {
            state.available_years = years;
        }
        if let Some(year) = self.selected_year {
            state.selected_year = year;
        }
        if let Some(financial) = self.financial_data {
            state.financial_data = financial;
        }
        if let Some(trends) = self.trends_data {
            state.trends_data = trends;
        }
        if let Some(findings) = self.qa_findings {
            state.qa_findings = findings;
        }
        if let Some(error) = self.error {
            state.error = error;
        }
        if let Some(upload) = self.upload {
            state.upload = Some(upload);
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    generation: Generation,
    in_flight: usize,
    uploading: bool,
}

pub struct StateStore {
    tx: watch::Sender<AppState>,
    ledger: Mutex<Ledger>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AppState::default());
        Self {
            tx,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    pub fn generation(&self) -> Generation {
        self.ledger().generation
    }

    /// Applies a patch that is not tied to a selection step.
    pub fn apply(&self, patch: StatePatch) {
        let mut ledger = self.ledger();
        self.publish(&mut ledger, Some(patch));
    }

    /// Starts a fetch that does not change the selection (e.g. the company list).
    pub fn begin_fetch(&self) -> FetchTicket<'_> {
        let mut ledger = self.ledger();
        ledger.in_flight += 1;
        self.publish(&mut ledger, None);
        FetchTicket {
            store: self,
            generation: None,
            settled: false,
        }
    }

    /// Starts a selection step: supersedes every earlier step and applies its
    /// reset patch before any request is issued.
    pub fn begin_selection(&self, reset: StatePatch) -> FetchTicket<'_> {
        let mut ledger = self.ledger();
        self.start_selection(&mut ledger, reset)
    }

    /// Like `begin_selection`, but only when `guard` holds for the current
    /// snapshot. The check and the reset happen under one lock.
    pub fn begin_selection_if<F>(&self, reset: StatePatch, guard: F) -> Option<FetchTicket<'_>>
    where
        F: FnOnce(&AppState) -> bool,
    {
        let mut ledger = self.ledger();
        if !guard(&*self.tx.borrow()) {
            return None;
        }
        Some(self.start_selection(&mut ledger, reset))
    }

    fn start_selection(&self, ledger: &mut Ledger, reset: StatePatch) -> FetchTicket<'_> {
        ledger.generation += 1;
        ledger.in_flight += 1;
        let generation = ledger.generation;
        self.publish(ledger, Some(reset));
        FetchTicket {
            store: self,
            generation: Some(generation),
            settled: false,
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, ledger: &mut Ledger, patch: Option<StatePatch>) {
        if let Some(upload) = patch.as_ref().and_then(|patch| patch.upload.as_ref()) {
            ledger.uploading = upload.phase.is_active();
        }
        let is_loading = ledger.in_flight > 0 || ledger.uploading;
        self.tx.send_modify(|state| {
            if let Some(patch) = patch {
                patch.apply_to(state);
            }
            state.is_loading = is_loading;
            if let Some(violation) = state.consistency_violation() {
                warn!(violation, "store: snapshot broke a selection invariant");
            }
        });
    }

    fn settle(&self, generation: Option<Generation>, patch: Option<StatePatch>) -> bool {
        let mut ledger = self.ledger();
        ledger.in_flight = ledger.in_flight.saturating_sub(1);
        let current = generation.map_or(true, |g| g == ledger.generation);
        if !current {
            trace!(
                generation = ?generation,
                latest = ledger.generation,
                "store: dropping stale patch"
            );
        }
        self.publish(&mut ledger, patch.filter(|_| current));
        current
    }

    fn apply_for(&self, generation: Option<Generation>, patch: StatePatch) -> bool {
        let mut ledger = self.ledger();
        if generation.is_some_and(|g| g != ledger.generation) {
            return false;
        }
        self.publish(&mut ledger, Some(patch));
        true
    }
}

/// One in-flight fetch sequence. The store reports `is_loading` until every
/// outstanding ticket has settled; dropping a ticket settles it.
pub struct FetchTicket<'a> {
    store: &'a StateStore,
    generation: Option<Generation>,
    settled: bool,
}

impl FetchTicket<'_> {
    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// True while no newer selection step has started.
    pub fn is_current(&self) -> bool {
        self.generation
            .map_or(true, |g| g == self.store.generation())
    }

    /// Applies `patch` while keeping the sequence open. Returns false, without
    /// touching the snapshot, when the step has been superseded.
    pub fn apply(&self, patch: StatePatch) -> bool {
        self.store.apply_for(self.generation, patch)
    }

    /// Applies `patch` and ends the sequence in the same snapshot update.
    pub fn commit(mut self, patch: StatePatch) -> bool {
        self.settled = true;
        self.store.settle(self.generation, Some(patch))
    }
}

impl Drop for FetchTicket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.settle(self.generation, None);
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
