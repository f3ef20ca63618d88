use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

macro_rules! string_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id_newtype!(CompanyId);
string_id_newtype!(SessionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FiscalYear(pub i32);

impl FiscalYear {
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for FiscalYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
}

/// One row of an extracted statement (income, balance, cash flow or ratios).
///
/// Rows are flat objects keyed by canonical field name. A field that is absent,
/// `null` or non-numeric was not extracted; it is never read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementRecord(pub BTreeMap<String, Value>);

impl StatementRecord {
    pub fn value(&self, field: &str) -> Option<f64> {
        self.0
            .get(field)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
    }

    pub fn year(&self) -> Option<FiscalYear> {
        match self.0.get("year")? {
            Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(FiscalYear)
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.0
            .get("company_id")
            .and_then(Value::as_str)
            .map(CompanyId::new)
    }

    /// Names of the numeric fields present in this row, excluding identity columns.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(key, value)| {
                !matches!(key.as_str(), "company_id" | "year") && value.as_f64().is_some()
            })
            .map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    #[serde(default)]
    pub income: StatementRecord,
    #[serde(default)]
    pub balance: StatementRecord,
    #[serde(default)]
    pub cashflow: StatementRecord,
    #[serde(default, rename = "features", alias = "ratios")]
    pub ratios: StatementRecord,
}

impl FinancialSnapshot {
    pub fn is_empty(&self) -> bool {
        self.income.is_empty()
            && self.balance.is_empty()
            && self.cashflow.is_empty()
            && self.ratios.is_empty()
    }
}

/// Per-year series for one company. Entries are not guaranteed to be sorted;
/// look rows up by year value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    #[serde(default)]
    pub income_trends: Vec<StatementRecord>,
    #[serde(default)]
    pub balance_trends: Vec<StatementRecord>,
    #[serde(default)]
    pub ratio_trends: Vec<StatementRecord>,
}

impl TrendSeries {
    pub fn income_for(&self, year: FiscalYear) -> Option<&StatementRecord> {
        record_for(&self.income_trends, year)
    }

    pub fn balance_for(&self, year: FiscalYear) -> Option<&StatementRecord> {
        record_for(&self.balance_trends, year)
    }

    pub fn ratios_for(&self, year: FiscalYear) -> Option<&StatementRecord> {
        record_for(&self.ratio_trends, year)
    }

    /// Every year present in any of the three series, ascending.
    pub fn years(&self) -> Vec<FiscalYear> {
        let mut years: Vec<FiscalYear> = self
            .income_trends
            .iter()
            .chain(&self.balance_trends)
            .chain(&self.ratio_trends)
            .filter_map(StatementRecord::year)
            .collect();
        years.sort_unstable();
        years.dedup();
        years
    }
}

fn record_for(records: &[StatementRecord], year: FiscalYear) -> Option<&StatementRecord> {
    records.iter().find(|record| record.year() == Some(year))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    High,
    Medium,
    Low,
    Other(String),
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Other(value),
        }
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        match value {
            Severity::High => "High".to_string(),
            Severity::Medium => "Medium".to_string(),
            Severity::Low => "Low".to_string(),
            Severity::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("High"),
            Self::Medium => f.write_str("Medium"),
            Self::Low => f.write_str("Low"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaFinding {
    pub company_id: CompanyId,
    pub year: FiscalYear,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl QaFinding {
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.timestamp.as_deref()?)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    None
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeveritySummary {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub other: usize,
}

impl SeveritySummary {
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a QaFinding>) -> Self {
        findings
            .into_iter()
            .fold(Self::default(), |mut summary, finding| {
                match finding.severity {
                    Severity::High => summary.high += 1,
                    Severity::Medium => summary.medium += 1,
                    Severity::Low => summary.low += 1,
                    Severity::Other(_) => summary.other += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low + self.other
    }
}

/// Relevance-ranked passage. Results arrive ordered by descending score and are
/// kept in server order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub score: f64,
    pub company_id: CompanyId,
    pub year: FiscalYear,
    #[serde(default)]
    pub section: String,
    #[serde(default, deserialize_with = "lenient::opt_page")]
    pub page_no: Option<u32>,
    pub text: String,
    #[serde(deserialize_with = "lenient::string")]
    pub chunk_id: String,
}

/// Deserializers for columns whose JSON type varies between exporters.
mod lenient {
    use super::*;

    pub(super) fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number, got {other}"
            ))),
        }
    }

    pub(super) fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub(super) fn opt_page<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_u64().and_then(|page| u32::try_from(page).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
