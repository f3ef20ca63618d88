use super::*;

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex as StdMutex,
    time::Duration,
};

use futures::{stream, StreamExt};
use shared::{
    domain::{FinancialSnapshot, SessionId, Severity, StatementRecord, TrendSeries},
    error::ApiError,
};
use tokio::sync::Notify;

use crate::transport::{ProgressStream, UploadAck};

fn company(id: &str) -> Company {
    Company {
        id: CompanyId::new(id),
        name: format!("{id} Inc"),
    }
}

fn years(values: &[i32]) -> Vec<FiscalYear> {
    values.iter().copied().map(FiscalYear).collect()
}

fn snapshot_for(company_id: &CompanyId, year: FiscalYear) -> FinancialSnapshot {
    let mut income = StatementRecord::default();
    income
        .0
        .insert("company_id".to_string(), company_id.as_str().into());
    income.0.insert("year".to_string(), year.0.into());
    income.0.insert("revenue".to_string(), 1000.into());
    FinancialSnapshot {
        income,
        ..FinancialSnapshot::default()
    }
}

fn not_found(message: &str) -> ClientError {
    ApiError::new(404, message).into()
}

fn server_error(message: &str) -> ClientError {
    ApiError::new(500, message).into()
}

/// Answers from fixed tables and records every call. Gated companies hold
/// their years request until released; gated years hold their statements.
struct ScriptedApi {
    companies: StdMutex<ClientResult<Vec<Company>>>,
    years: HashMap<String, Vec<FiscalYear>>,
    failing_trends: HashSet<String>,
    failing_financial: HashSet<String>,
    findings_missing: bool,
    upload_ack: ClientResult<UploadAck>,
    upload_panics: bool,
    gates: HashMap<String, Arc<Notify>>,
    year_gates: HashMap<String, Arc<Notify>>,
    calls: StdMutex<Vec<String>>,
}

impl ScriptedApi {
    fn new() -> Self {
        Self {
            companies: StdMutex::new(Ok(vec![company("ACME"), company("GLOBEX")])),
            years: HashMap::new(),
            failing_trends: HashSet::new(),
            failing_financial: HashSet::new(),
            findings_missing: false,
            upload_ack: Ok(UploadAck::Processed {
                message: Some("Processed".to_string()),
                filename: None,
                warning: None,
            }),
            upload_panics: false,
            gates: HashMap::new(),
            year_gates: HashMap::new(),
            calls: StdMutex::new(Vec::new()),
        }
    }

    fn with_years(mut self, company_id: &str, values: &[i32]) -> Self {
        self.years.insert(company_id.to_string(), years(values));
        self
    }

    fn gated(mut self, company_id: &str, gate: Arc<Notify>) -> Self {
        self.gates.insert(company_id.to_string(), gate);
        self
    }

    fn gated_year(mut self, company_id: &str, year: i32, gate: Arc<Notify>) -> Self {
        self.year_gates.insert(format!("{company_id}:{year}"), gate);
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn set_companies(&self, companies: ClientResult<Vec<Company>>) {
        *self.companies.lock().expect("companies lock") = companies;
    }
}

#[async_trait]
impl ReportApi for ScriptedApi {
    async fn list_companies(&self) -> ClientResult<Vec<Company>> {
        self.record("companies".to_string());
        self.companies.lock().expect("companies lock").clone()
    }

    async fn list_years(&self, company_id: &CompanyId) -> ClientResult<Vec<FiscalYear>> {
        self.record(format!("years:{company_id}"));
        if let Some(gate) = self.gates.get(company_id.as_str()) {
            gate.notified().await;
        }
        self.years
            .get(company_id.as_str())
            .cloned()
            .ok_or_else(|| not_found(&format!("No data for {company_id}")))
    }

    async fn get_financial_data(
        &self,
        company_id: &CompanyId,
        year: FiscalYear,
    ) -> ClientResult<FinancialSnapshot> {
        self.record(format!("financial:{company_id}:{year}"));
        if let Some(gate) = self.year_gates.get(&format!("{company_id}:{year}")) {
            gate.notified().await;
        }
        if self.failing_financial.contains(company_id.as_str()) {
            return Err(server_error("database offline"));
        }
        Ok(snapshot_for(company_id, year))
    }

    async fn get_trends(&self, company_id: &CompanyId) -> ClientResult<TrendSeries> {
        self.record(format!("trends:{company_id}"));
        if self.failing_trends.contains(company_id.as_str()) {
            return Err(server_error("trend view unavailable"));
        }
        Ok(TrendSeries::default())
    }

    async fn get_qa_findings(
        &self,
        company_id: &CompanyId,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<QaFinding>> {
        self.record(format!("qa:{company_id}"));
        if self.findings_missing {
            return Err(not_found("No QA findings"));
        }
        Ok(vec![QaFinding {
            company_id: company_id.clone(),
            year: year.unwrap_or(FiscalYear(2022)),
            rule_id: "BAL-001".to_string(),
            rule_name: "Balance sheet equation".to_string(),
            severity: Severity::Medium,
            details: String::new(),
            timestamp: None,
            status: None,
        }])
    }

    async fn search(
        &self,
        query: &str,
        company_id: Option<&CompanyId>,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<SearchResult>> {
        self.record(format!("search:{query}"));
        Ok(vec![SearchResult {
            score: 0.8,
            company_id: company_id
                .cloned()
                .unwrap_or_else(|| CompanyId::new("ACME")),
            year: year.unwrap_or(FiscalYear(2022)),
            section: "Notes".to_string(),
            page_no: Some(4),
            text: "Revenue recognition policy".to_string(),
            chunk_id: "c-1".to_string(),
        }])
    }

    async fn upload(&self, file: UploadFile) -> ClientResult<UploadAck> {
        self.record(format!("upload:{}", file.filename));
        if self.upload_panics {
            panic!("ingestion client crashed");
        }
        self.upload_ack.clone()
    }
}

/// Opens a stream that never yields.
struct SilentSource;

#[async_trait]
impl ProgressSource for SilentSource {
    async fn open(&self, _session_id: &SessionId) -> ClientResult<ProgressStream> {
        Ok(stream::pending().boxed())
    }
}

fn coordinator(api: Arc<ScriptedApi>) -> Arc<Coordinator> {
    Coordinator::new(api, Arc::new(SilentSource), ProgressSettings::default())
}

async fn wait_for_call(api: &ScriptedApi, call: &str) {
    while !api.calls().iter().any(|seen| seen == call) {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn loads_companies_and_clears_loading() {
    let api = Arc::new(ScriptedApi::new());
    let coordinator = coordinator(Arc::clone(&api));

    coordinator.load_companies().await.expect("load");

    let state = coordinator.snapshot();
    assert_eq!(state.companies, vec![company("ACME"), company("GLOBEX")]);
    assert!(state.is_data_loaded);
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn failed_reload_keeps_previous_companies() {
    let api = Arc::new(ScriptedApi::new());
    let coordinator = coordinator(Arc::clone(&api));
    coordinator.load_companies().await.expect("first load");

    api.set_companies(Err(server_error("database offline")));
    assert!(coordinator.load_companies().await.is_err());

    let state = coordinator.snapshot();
    assert_eq!(state.error.as_deref(), Some("Failed to load companies"));
    assert_eq!(state.companies.len(), 2);
    assert!(state.is_data_loaded);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn missing_company_data_means_an_empty_list() {
    let api = Arc::new(ScriptedApi::new());
    api.set_companies(Err(not_found("No companies data available")));
    let coordinator = coordinator(Arc::clone(&api));

    coordinator
        .load_companies()
        .await
        .expect("404 is not an error");

    let state = coordinator.snapshot();
    assert!(state.companies.is_empty());
    assert!(!state.is_data_loaded);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn selecting_a_company_cascades_to_its_latest_year() {
    let api = Arc::new(ScriptedApi::new().with_years("ACME", &[2019, 2022, 2021]));
    let coordinator = coordinator(Arc::clone(&api));

    coordinator
        .select_company(company("ACME"))
        .await
        .expect("select");

    let state = coordinator.snapshot();
    assert_eq!(state.selected_company, Some(company("ACME")));
    assert_eq!(state.available_years, years(&[2019, 2022, 2021]));
    assert_eq!(state.selected_year, Some(FiscalYear(2022)));
    assert_eq!(
        state.financial_data,
        Some(snapshot_for(&CompanyId::new("ACME"), FiscalYear(2022)))
    );
    assert_eq!(state.qa_findings.len(), 1);
    assert!(state.trends_data.is_some());
    assert!(!state.is_loading);
    assert_eq!(state.consistency_violation(), None);
    assert_eq!(api.count("financial:"), 1);
    assert!(api.calls().contains(&"financial:ACME:2022".to_string()));
}

#[tokio::test]
async fn company_without_years_stops_before_year_data() {
    let api = Arc::new(ScriptedApi::new().with_years("ACME", &[]));
    let coordinator = coordinator(Arc::clone(&api));

    coordinator
        .select_company(company("ACME"))
        .await
        .expect("select");

    let state = coordinator.snapshot();
    assert!(state.available_years.is_empty());
    assert_eq!(state.selected_year, None);
    assert_eq!(state.financial_data, None);
    assert_eq!(api.count("financial:"), 0);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn reselecting_the_same_company_is_a_no_op_until_an_error() {
    let mut scripted = ScriptedApi::new().with_years("ACME", &[2021]);
    scripted.failing_financial.insert("ACME".to_string());
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    assert!(coordinator.select_company(company("ACME")).await.is_err());
    assert_eq!(api.count("years:ACME"), 1);

    // The failed year load leaves an error, so the same company is fetched again.
    assert!(coordinator.select_company(company("ACME")).await.is_err());
    assert_eq!(api.count("years:ACME"), 2);

    let api = Arc::new(ScriptedApi::new().with_years("ACME", &[2021]));
    let coordinator = self::coordinator(Arc::clone(&api));
    coordinator
        .select_company(company("ACME"))
        .await
        .expect("first");
    coordinator
        .select_company(company("ACME"))
        .await
        .expect("second");
    assert_eq!(api.count("years:ACME"), 1);
}

#[tokio::test]
async fn superseded_company_response_is_discarded() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        ScriptedApi::new()
            .with_years("ACME", &[2020])
            .with_years("GLOBEX", &[2023, 2021])
            .gated("ACME", Arc::clone(&gate)),
    );
    let coordinator = coordinator(Arc::clone(&api));

    let slow = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.select_company(company("ACME")).await })
    };
    wait_for_call(&api, "years:ACME").await;
    assert!(coordinator.snapshot().is_loading);

    coordinator
        .select_company(company("GLOBEX"))
        .await
        .expect("select B");
    assert!(coordinator.snapshot().is_loading, "A is still in flight");

    gate.notify_one();
    slow.await
        .expect("task")
        .expect("superseded select is not an error");

    let state = coordinator.snapshot();
    assert_eq!(state.selected_company, Some(company("GLOBEX")));
    assert_eq!(state.available_years, years(&[2023, 2021]));
    assert_eq!(state.selected_year, Some(FiscalYear(2023)));
    assert_eq!(
        state.financial_data,
        Some(snapshot_for(&CompanyId::new("GLOBEX"), FiscalYear(2023)))
    );
    assert!(!state.is_loading);
    assert_eq!(state.consistency_violation(), None);
    assert_eq!(api.count("financial:ACME"), 0);
}

#[tokio::test]
async fn company_data_failure_reports_and_keeps_selection() {
    let mut scripted = ScriptedApi::new().with_years("ACME", &[2021]);
    scripted.failing_trends.insert("ACME".to_string());
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    let err = coordinator
        .select_company(company("ACME"))
        .await
        .expect_err("trends fail");
    assert_eq!(err.to_string(), "trend view unavailable");

    let state = coordinator.snapshot();
    assert_eq!(state.selected_company, Some(company("ACME")));
    assert!(state.available_years.is_empty());
    assert_eq!(
        state.error.as_deref(),
        Some("Failed to load company data: trend view unavailable")
    );
    assert!(!state.is_loading);
}

#[tokio::test]
async fn year_selection_is_checked_against_available_years() {
    let api = Arc::new(ScriptedApi::new().with_years("ACME", &[2020, 2021]));
    let coordinator = coordinator(Arc::clone(&api));

    coordinator
        .select_year(FiscalYear(2020))
        .await
        .expect("ignored without a company");
    assert_eq!(api.count("financial:"), 0);

    coordinator
        .select_company(company("ACME"))
        .await
        .expect("select");
    let err = coordinator
        .select_year(FiscalYear(2015))
        .await
        .expect_err("not available");
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(coordinator.snapshot().selected_year, Some(FiscalYear(2021)));

    coordinator
        .select_year(FiscalYear(2020))
        .await
        .expect("select year");
    let state = coordinator.snapshot();
    assert_eq!(state.selected_year, Some(FiscalYear(2020)));
    assert_eq!(state.error, None);
    assert!(state
        .qa_findings
        .iter()
        .all(|finding| finding.year == FiscalYear(2020)));
}

#[tokio::test]
async fn later_year_selection_wins_over_a_slower_one() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        ScriptedApi::new()
            .with_years("ACME", &[2020, 2021])
            .gated_year("ACME", 2020, Arc::clone(&gate)),
    );
    let coordinator = coordinator(Arc::clone(&api));
    coordinator
        .select_company(company("ACME"))
        .await
        .expect("select");

    let slow = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.select_year(FiscalYear(2020)).await })
    };
    wait_for_call(&api, "financial:ACME:2020").await;
    assert!(coordinator.snapshot().is_loading);

    coordinator
        .select_year(FiscalYear(2021))
        .await
        .expect("select 2021");
    assert!(coordinator.snapshot().is_loading, "2020 is still in flight");

    gate.notify_one();
    slow.await
        .expect("task")
        .expect("superseded year is not an error");

    let state = coordinator.snapshot();
    assert_eq!(state.selected_year, Some(FiscalYear(2021)));
    assert_eq!(
        state.financial_data,
        Some(snapshot_for(&CompanyId::new("ACME"), FiscalYear(2021)))
    );
    assert!(!state.qa_findings.is_empty());
    assert!(state
        .qa_findings
        .iter()
        .all(|finding| finding.year == FiscalYear(2021)));
    assert!(!state.is_loading);
    assert_eq!(state.consistency_violation(), None);
}

#[tokio::test]
async fn user_year_selection_supersedes_the_cascade() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        ScriptedApi::new()
            .with_years("ACME", &[2020, 2021])
            .gated_year("ACME", 2021, Arc::clone(&gate)),
    );
    let coordinator = coordinator(Arc::clone(&api));

    let cascade = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.select_company(company("ACME")).await })
    };
    wait_for_call(&api, "financial:ACME:2021").await;

    coordinator
        .select_year(FiscalYear(2020))
        .await
        .expect("select 2020");
    assert!(
        coordinator.snapshot().is_loading,
        "cascade is still in flight"
    );

    gate.notify_one();
    cascade
        .await
        .expect("task")
        .expect("superseded cascade is not an error");

    let state = coordinator.snapshot();
    assert_eq!(state.selected_company, Some(company("ACME")));
    assert_eq!(state.selected_year, Some(FiscalYear(2020)));
    assert_eq!(
        state.financial_data,
        Some(snapshot_for(&CompanyId::new("ACME"), FiscalYear(2020)))
    );
    assert!(state
        .qa_findings
        .iter()
        .all(|finding| finding.year == FiscalYear(2020)));
    assert!(!state.is_loading);
    assert_eq!(state.consistency_violation(), None);
}

#[tokio::test]
async fn financial_failure_keeps_year_and_clears_its_data() {
    let mut scripted = ScriptedApi::new().with_years("ACME", &[2021]);
    scripted.failing_financial.insert("ACME".to_string());
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    assert!(coordinator.select_company(company("ACME")).await.is_err());

    let state = coordinator.snapshot();
    assert_eq!(state.selected_year, Some(FiscalYear(2021)));
    assert_eq!(state.financial_data, None);
    assert!(state.qa_findings.is_empty());
    assert_eq!(
        state.error.as_deref(),
        Some("Failed to load financial data: database offline")
    );
    assert!(!state.is_loading);
}

#[tokio::test]
async fn missing_findings_are_treated_as_none() {
    let mut scripted = ScriptedApi::new().with_years("ACME", &[2021]);
    scripted.findings_missing = true;
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    coordinator
        .select_company(company("ACME"))
        .await
        .expect("select");

    let state = coordinator.snapshot();
    assert!(state.financial_data.is_some());
    assert!(state.qa_findings.is_empty());
    assert_eq!(state.error, None);
}

#[tokio::test(start_paused = true)]
async fn completed_upload_refreshes_companies_and_surfaces_warning() {
    let mut scripted = ScriptedApi::new();
    scripted.upload_ack = Ok(UploadAck::Processed {
        message: Some("Processed".to_string()),
        filename: Some("annual.pdf".to_string()),
        warning: Some("3 pages could not be parsed".to_string()),
    });
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    let upload = coordinator
        .upload_file(UploadFile::pdf("annual.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect("upload started");
    let outcome = upload.wait().await;

    assert_eq!(outcome.phase, UploadPhase::Completed);
    assert_eq!(api.count("companies"), 1);
    let state = coordinator.snapshot();
    assert_eq!(state.companies.len(), 2);
    assert_eq!(state.error.as_deref(), Some("3 pages could not be parsed"));
    assert!(!state.is_loading);
}

#[tokio::test(start_paused = true)]
async fn failed_upload_reports_without_refreshing() {
    let mut scripted = ScriptedApi::new();
    scripted.upload_ack = Err(ApiError::new(500, "Failed to process PDF").into());
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    let outcome = coordinator
        .upload_file(UploadFile::pdf("annual.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect("upload started")
        .wait()
        .await;

    assert_eq!(outcome.phase, UploadPhase::Failed);
    assert_eq!(api.count("companies"), 0);
    let state = coordinator.snapshot();
    assert_eq!(state.error.as_deref(), Some("Failed to process PDF"));
    assert!(!state.is_loading);
}

#[tokio::test(start_paused = true)]
async fn one_upload_at_a_time_and_cancel_skips_refresh() {
    let mut scripted = ScriptedApi::new();
    scripted.upload_ack = Ok(UploadAck::Accepted {
        session_id: SessionId::new("sess-9"),
    });
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    let first = coordinator
        .upload_file(UploadFile::pdf("q1.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect("first upload");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coordinator.snapshot().is_loading);

    let err = coordinator
        .upload_file(UploadFile::pdf("q2.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect_err("second upload rejected");
    assert_eq!(err.to_string(), "An upload is already in progress");

    coordinator.cancel_upload().await;
    let outcome = first.wait().await;

    assert_eq!(outcome.phase, UploadPhase::Cancelled);
    assert_eq!(api.count("companies"), 0);
    assert!(!coordinator.snapshot().is_loading);

    coordinator
        .upload_file(UploadFile::pdf("q2.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect("slot released after cancel");
    coordinator.shutdown().await;
}

#[tokio::test]
async fn crashed_upload_task_releases_the_slot() {
    let mut scripted = ScriptedApi::new();
    scripted.upload_panics = true;
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));

    let outcome = coordinator
        .upload_file(UploadFile::pdf("annual.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect("upload started")
        .wait()
        .await;

    assert_eq!(outcome.phase, UploadPhase::Failed);
    let state = coordinator.snapshot();
    assert!(!state.is_loading);
    assert_eq!(
        state.upload.map(|upload| upload.phase),
        Some(UploadPhase::Failed)
    );
    assert_eq!(
        state.error.as_deref(),
        Some("Upload tracking stopped unexpectedly")
    );

    coordinator
        .upload_file(UploadFile::pdf("retry.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect("slot released after a crash")
        .wait()
        .await;
    assert_eq!(api.count("upload:"), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_coordinator_cancels_its_upload() {
    let mut scripted = ScriptedApi::new();
    scripted.upload_ack = Ok(UploadAck::Accepted {
        session_id: SessionId::new("sess-4"),
    });
    let api = Arc::new(scripted);
    let coordinator = coordinator(Arc::clone(&api));
    let store = Arc::clone(coordinator.store());

    let upload = coordinator
        .upload_file(UploadFile::pdf("q3.pdf", b"%PDF-1.7".to_vec()))
        .await
        .expect("upload started");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.snapshot().is_loading);

    drop(coordinator);
    let outcome = upload.wait().await;

    assert_eq!(outcome.phase, UploadPhase::Cancelled);
    assert_eq!(api.count("companies"), 0);
    assert!(!store.snapshot().is_loading);
}

#[tokio::test]
async fn invalid_upload_file_is_rejected_up_front() {
    let api = Arc::new(ScriptedApi::new());
    let coordinator = coordinator(Arc::clone(&api));

    let err = match coordinator
        .upload_file(UploadFile::pdf("scan.png", b"png".to_vec()))
        .await
    {
        Ok(_) => panic!("png accepted"),
        Err(err) => err,
    };
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(api.count("upload:"), 0);
    assert_eq!(
        coordinator.snapshot().error.as_deref(),
        Some("Invalid file type: scan.png (expected a PDF)")
    );
}

#[tokio::test]
async fn search_validates_query_and_returns_ranked_results() {
    let api = Arc::new(ScriptedApi::new());
    let coordinator = coordinator(Arc::clone(&api));

    let err = coordinator
        .search("  ", None, None)
        .await
        .expect_err("blank query");
    assert_eq!(err.to_string(), "No query provided");
    assert_eq!(
        coordinator.snapshot().error.as_deref(),
        Some("No query provided")
    );

    let results = coordinator
        .search(
            "revenue",
            Some(&CompanyId::new("GLOBEX")),
            Some(FiscalYear(2021)),
        )
        .await
        .expect("search");
    assert_eq!(results[0].company_id, CompanyId::new("GLOBEX"));
    assert_eq!(api.count("search:"), 1);
    assert_eq!(coordinator.snapshot().error, None);
}

#[tokio::test]
async fn subscribers_observe_selection_updates() {
    let api = Arc::new(ScriptedApi::new().with_years("ACME", &[2021]));
    let coordinator = coordinator(Arc::clone(&api));
    let mut rx = coordinator.subscribe_state();

    coordinator
        .select_company(company("ACME"))
        .await
        .expect("select");

    rx.changed().await.expect("store alive");
    let state = rx.borrow_and_update().clone();
    assert_eq!(state.selected_year, Some(FiscalYear(2021)));
    assert!(!state.is_loading);
}
