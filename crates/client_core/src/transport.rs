use std::{borrow::Cow, collections::VecDeque};

use async_trait::async_trait;
use futures::{stream::BoxStream, Stream, StreamExt};
use reqwest::{header, multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{
        Company, CompanyId, FinancialSnapshot, FiscalYear, QaFinding, SearchResult, SessionId,
        TrendSeries,
    },
    error::ApiError,
    protocol::{
        CompaniesResponse, FindingsResponse, SearchRequest, SearchResponse, UploadResponse,
        YearsResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    config::ClientSettings,
    error::{ClientError, ClientResult},
    sse::SseDecoder,
};

/// Raw `data` payloads of the progress stream, in arrival order.
pub type ProgressStream = BoxStream<'static, ClientResult<String>>;

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn pdf(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: Some("application/pdf".to_string()),
            bytes,
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        let name = self.filename.trim();
        if name.is_empty() {
            return Err(ClientError::validation("No file selected"));
        }
        let is_pdf = name
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(ClientError::validation(format!(
                "Invalid file type: {name} (expected a PDF)"
            )));
        }
        if self.bytes.is_empty() {
            return Err(ClientError::validation(format!("File {name} is empty")));
        }
        Ok(())
    }
}

/// How the ingestion service acknowledged an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAck {
    /// Processing finished (or was not trackable) inside the upload call.
    Processed {
        message: Option<String>,
        filename: Option<String>,
        warning: Option<String>,
    },
    /// Processing continues server-side under `session_id`.
    Accepted { session_id: SessionId },
}

impl From<UploadResponse> for UploadAck {
    fn from(value: UploadResponse) -> Self {
        match value.session_id {
            Some(session_id) if !session_id.as_str().trim().is_empty() => {
                Self::Accepted { session_id }
            }
            _ => Self::Processed {
                message: value.message,
                filename: value.filename,
                warning: value.warning,
            },
        }
    }
}

#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn list_companies(&self) -> ClientResult<Vec<Company>>;
    async fn list_years(&self, company_id: &CompanyId) -> ClientResult<Vec<FiscalYear>>;
    async fn get_financial_data(
        &self,
        company_id: &CompanyId,
        year: FiscalYear,
    ) -> ClientResult<FinancialSnapshot>;
    async fn get_trends(&self, company_id: &CompanyId) -> ClientResult<TrendSeries>;
    async fn get_qa_findings(
        &self,
        company_id: &CompanyId,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<QaFinding>>;
    async fn search(
        &self,
        query: &str,
        company_id: Option<&CompanyId>,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<SearchResult>>;
    async fn upload(&self, file: UploadFile) -> ClientResult<UploadAck>;
}

#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn open(&self, session_id: &SessionId) -> ClientResult<ProgressStream>;
}

pub fn validate_company_id(company_id: &CompanyId) -> ClientResult<()> {
    if company_id.as_str().trim().is_empty() {
        return Err(ClientError::validation("company id must not be empty"));
    }
    Ok(())
}

pub fn validate_year(year: FiscalYear) -> ClientResult<()> {
    if !year.is_valid() {
        return Err(ClientError::validation(format!(
            "year must be a positive integer, got {year}"
        )));
    }
    Ok(())
}

pub fn validate_query(query: &str) -> ClientResult<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ClientError::validation("No query provided"));
    }
    Ok(trimmed)
}

/// Request/response client for the query and ingestion service.
#[derive(Clone)]
pub struct HttpReportApi {
    http: Client,
    base_url: Url,
}

impl HttpReportApi {
    pub fn new(server_url: &str) -> ClientResult<Self> {
        Self::with_client(server_url, Client::new())
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        // The progress stream is long-lived, so only connecting is bounded here.
        let http = Client::builder()
            .connect_timeout(settings.request_timeout)
            .build()?;
        Self::with_client(&settings.server_url, http)
    }

    pub fn with_client(server_url: &str, http: Client) -> ClientResult<Self> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: server_url.to_string(),
            reason,
        };
        let base_url = Url::parse(server_url)
            .map_err(|err| invalid(err.to_string()))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid("server_url must start with http:// or https://".into()));
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = ensure_success(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    /// Statement rows come straight from dataframes, so a cell that was not
    /// extracted may arrive as a bare `NaN`. Those tokens are read as `null`.
    async fn send_statement_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> ClientResult<T> {
        let response = ensure_success(request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&null_non_finite(&body)).map_err(|err| ClientError::Transport {
            status: None,
            message: format!("invalid statement payload: {err}"),
        })
    }
}

/// Replaces the non-standard `NaN`, `Infinity` and `-Infinity` literals with
/// `null`, leaving string contents untouched.
pub(crate) fn null_non_finite(body: &str) -> Cow<'_, str> {
    const TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];
    if !TOKENS.iter().any(|token| body.contains(token)) {
        return Cow::Borrowed(body);
    }

    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = body;
    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = TOKENS.iter().find(|token| rest.starts_with(**token)) {
            out.push_str("null");
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    Cow::Owned(out)
}

async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "transport: request failed");
    Err(ApiError::from_body(status.as_u16(), &body).into())
}

#[async_trait]
impl ReportApi for HttpReportApi {
    async fn list_companies(&self) -> ClientResult<Vec<Company>> {
        let body: CompaniesResponse = self
            .send_json(self.http.get(self.endpoint(&["companies"])))
            .await?;
        Ok(body.companies)
    }

    async fn list_years(&self, company_id: &CompanyId) -> ClientResult<Vec<FiscalYear>> {
        validate_company_id(company_id)?;
        let body: YearsResponse = self
            .send_json(
                self.http
                    .get(self.endpoint(&["years", company_id.as_str()])),
            )
            .await?;
        Ok(body.years)
    }

    async fn get_financial_data(
        &self,
        company_id: &CompanyId,
        year: FiscalYear,
    ) -> ClientResult<FinancialSnapshot> {
        validate_company_id(company_id)?;
        validate_year(year)?;
        let year = year.to_string();
        self.send_statement_json(self.http.get(self.endpoint(&[
            "financial-data",
            company_id.as_str(),
            year.as_str(),
        ])))
        .await
    }

    async fn get_trends(&self, company_id: &CompanyId) -> ClientResult<TrendSeries> {
        validate_company_id(company_id)?;
        self.send_statement_json(
            self.http
                .get(self.endpoint(&["trends", company_id.as_str()])),
        )
        .await
    }

    async fn get_qa_findings(
        &self,
        company_id: &CompanyId,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<QaFinding>> {
        validate_company_id(company_id)?;
        let mut request = self
            .http
            .get(self.endpoint(&["qa-findings", company_id.as_str()]));
        if let Some(year) = year {
            validate_year(year)?;
            request = request.query(&[("year", year.0)]);
        }
        let body: FindingsResponse = self.send_json(request).await?;
        Ok(body.findings)
    }

    async fn search(
        &self,
        query: &str,
        company_id: Option<&CompanyId>,
        year: Option<FiscalYear>,
    ) -> ClientResult<Vec<SearchResult>> {
        let query = validate_query(query)?;
        if let Some(company_id) = company_id {
            validate_company_id(company_id)?;
        }
        if let Some(year) = year {
            validate_year(year)?;
        }
        let body: SearchResponse = self
            .send_json(
                self.http
                    .post(self.endpoint(&["search"]))
                    .json(&SearchRequest {
                        query: query.to_string(),
                        company_id: company_id.cloned(),
                        year,
                    }),
            )
            .await?;
        Ok(body.results)
    }

    async fn upload(&self, file: UploadFile) -> ClientResult<UploadAck> {
        file.validate()?;
        let mut part = multipart::Part::bytes(file.bytes).file_name(file.filename);
        if let Some(mime_type) = file.mime_type.as_deref() {
            part = part.mime_str(mime_type)?;
        }
        let form = multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.endpoint(&["upload"]))
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = ensure_success(response).await?.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl ProgressSource for HttpReportApi {
    async fn open(&self, session_id: &SessionId) -> ClientResult<ProgressStream> {
        let response = self
            .http
            .get(self.endpoint(&["progress", session_id.as_str()]))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| ClientError::StreamConnectivity(err.to_string()))?;
        let response = ensure_success(response)
            .await
            .map_err(|err| ClientError::StreamConnectivity(err.to_string()))?;
        Ok(sse_data_stream(response.bytes_stream()))
    }
}

/// Adapts a chunked body into the `data` payloads of its server-sent events.
pub fn sse_data_stream<S, B, E>(body: S) -> ProgressStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        body: S,
        decoder: SseDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    let state = State {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.pending.pop_front() {
                return Some((Ok(data), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.pending.extend(
                    state
                        .decoder
                        .push(chunk.as_ref())
                        .into_iter()
                        .map(|event| event.data),
                ),
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(ClientError::StreamConnectivity(err.to_string())), state));
                }
                None => {
                    state.done = true;
                    state
                        .pending
                        .extend(state.decoder.finish().map(|event| event.data));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
