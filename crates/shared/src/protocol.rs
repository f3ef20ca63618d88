use serde::{Deserialize, Serialize};

use crate::domain::{Company, CompanyId, FiscalYear, QaFinding, SearchResult, SessionId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompaniesResponse {
    #[serde(default)]
    pub companies: Vec<Company>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YearsResponse {
    #[serde(default)]
    pub years: Vec<FiscalYear>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingsResponse {
    #[serde(default)]
    pub findings: Vec<QaFinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<CompanyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<FiscalYear>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

/// Body of the ingestion call. Synchronous completions carry `message`,
/// tracked uploads carry `session_id`, partial results carry `warning`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Payload of one event on the per-session progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub completed: bool,
}
