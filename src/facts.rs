// 📄 Fact Record - one extracted financial line item with provenance
//
// The extraction layer upstream is heuristic (LLM driven), so the input shape
// is permissive: anything it may omit is an Option here and gets checked by
// FactRecord::validate() before it can reach a timeline.

use crate::error::MalformedFactError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STATEMENT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    #[serde(alias = "income_statement", alias = "incomestatement")]
    Income,
    #[serde(alias = "balancesheet")]
    BalanceSheet,
    #[serde(alias = "cashflow")]
    CashFlow,
    #[serde(alias = "comprehensiveincome")]
    ComprehensiveIncome,
    #[serde(alias = "equity_statement")]
    Equity,
    #[serde(alias = "scheduleofinvestment", alias = "schedule_of_investments")]
    ScheduleOfInvestment,
}

impl StatementType {
    pub const ALL: [StatementType; 6] = [
        StatementType::Income,
        StatementType::BalanceSheet,
        StatementType::CashFlow,
        StatementType::ComprehensiveIncome,
        StatementType::Equity,
        StatementType::ScheduleOfInvestment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Income => "income",
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
            StatementType::ComprehensiveIncome => "comprehensive_income",
            StatementType::Equity => "equity",
            StatementType::ScheduleOfInvestment => "schedule_of_investment",
        }
    }

    /// Flow statements accumulate over a period, so quarters add up to a year.
    /// Balance sheet and schedule of investments are point-in-time.
    pub fn is_flow(&self) -> bool {
        matches!(
            self,
            StatementType::Income | StatementType::CashFlow | StatementType::ComprehensiveIncome
        )
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "income" | "income_statement" | "incomestatement" => Ok(StatementType::Income),
            "balance_sheet" | "balancesheet" => Ok(StatementType::BalanceSheet),
            "cash_flow" | "cashflow" => Ok(StatementType::CashFlow),
            "comprehensive_income" | "comprehensiveincome" => {
                Ok(StatementType::ComprehensiveIncome)
            }
            "equity" | "equity_statement" => Ok(StatementType::Equity),
            "schedule_of_investment" | "schedule_of_investments" | "scheduleofinvestment" => {
                Ok(StatementType::ScheduleOfInvestment)
            }
            _ => Err(format!("unknown statement type: {}", s)),
        }
    }
}

// ============================================================================
// PERIOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Annual,
    Quarterly,
    #[serde(alias = "instant")]
    AsOf,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Annual => "annual",
            PeriodType::Quarterly => "quarterly",
            PeriodType::AsOf => "as_of",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "annual" | "fy" | "yearly" => Ok(PeriodType::Annual),
            "quarterly" | "quarter" | "q" => Ok(PeriodType::Quarterly),
            "as_of" | "as-of" | "instant" => Ok(PeriodType::AsOf),
            _ => Err(format!("unknown period type: {}", s)),
        }
    }
}

/// Reporting period. For `AsOf` periods start == end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period_type: PeriodType,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate, period_type: PeriodType) -> Self {
        Period {
            start,
            end,
            period_type,
        }
    }

    pub fn as_of(date: NaiveDate) -> Self {
        Period::new(date, date, PeriodType::AsOf)
    }

    /// Inclusive length in days
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// True when `other` lies wholly inside this period
    pub fn contains(&self, other: &Period) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period_type {
            PeriodType::AsOf => write!(f, "as of {}", self.end),
            _ => write!(f, "{} {}..{}", self.period_type, self.start, self.end),
        }
    }
}

// ============================================================================
// SOURCE FILING (provenance)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormType {
    TenK,
    TenKA,
    TenQ,
    TenQA,
    EightK,
    Def14A,
    Form4,
    Sc13D,
    Other(String),
}

impl FormType {
    pub fn as_str(&self) -> &str {
        match self {
            FormType::TenK => "10-K",
            FormType::TenKA => "10-K/A",
            FormType::TenQ => "10-Q",
            FormType::TenQA => "10-Q/A",
            FormType::EightK => "8-K",
            FormType::Def14A => "DEF 14A",
            FormType::Form4 => "4",
            FormType::Sc13D => "SC 13D",
            FormType::Other(s) => s,
        }
    }

    pub fn is_amendment(&self) -> bool {
        match self {
            FormType::TenKA | FormType::TenQA => true,
            FormType::Other(s) => s.ends_with("/A"),
            _ => false,
        }
    }

    /// Period type a statement from this form normally carries
    pub fn default_period_type(&self) -> Option<PeriodType> {
        match self {
            FormType::TenK | FormType::TenKA => Some(PeriodType::Annual),
            FormType::TenQ | FormType::TenQA => Some(PeriodType::Quarterly),
            _ => None,
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for FormType {
    fn from(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "10-K" | "10K" => FormType::TenK,
            "10-K/A" | "10-KA" => FormType::TenKA,
            "10-Q" | "10Q" => FormType::TenQ,
            "10-Q/A" | "10-QA" => FormType::TenQA,
            "8-K" | "8K" => FormType::EightK,
            "DEF 14A" | "DEF14A" => FormType::Def14A,
            "4" | "FORM 4" => FormType::Form4,
            "SC 13D" | "SC13D" => FormType::Sc13D,
            _ => FormType::Other(s.trim().to_string()),
        }
    }
}

impl TryFrom<String> for FormType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.trim().is_empty() {
            return Err("form type is empty".to_string());
        }
        Ok(FormType::from(s.as_str()))
    }
}

impl From<FormType> for String {
    fn from(form: FormType) -> Self {
        form.as_str().to_string()
    }
}

/// The filing a fact was extracted from.
///
/// Filings are totally ordered by (filing_date, accession_number); the
/// accession number breaks ties between two filings made on the same day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFiling {
    pub form_type: FormType,
    pub filing_date: NaiveDate,
    pub accession_number: String,
}

impl SourceFiling {
    pub fn new(form_type: &str, filing_date: NaiveDate, accession_number: &str) -> Self {
        SourceFiling {
            form_type: FormType::from(form_type),
            filing_date,
            accession_number: accession_number.to_string(),
        }
    }

    pub fn order_key(&self) -> (NaiveDate, &str) {
        (self.filing_date, self.accession_number.as_str())
    }

    pub fn is_newer_than(&self, other: &SourceFiling) -> bool {
        self.order_key() > other.order_key()
    }

    pub fn same_filing(&self, other: &SourceFiling) -> bool {
        self.accession_number == other.accession_number
    }

    /// Parse a filing folder name of the form `YYYY-MM-DD_ACCESSION`.
    ///
    /// Returns None when the date part does not parse. A missing accession
    /// part becomes "UNKNOWN".
    pub fn from_folder_name(form_type: &str, folder_name: &str) -> Option<Self> {
        let mut parts = folder_name.splitn(2, '_');
        let date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let accession = parts
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("UNKNOWN");
        Some(SourceFiling::new(form_type, date, accession))
    }
}

impl fmt::Display for SourceFiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} filed {} ({})",
            self.form_type, self.filing_date, self.accession_number
        )
    }
}

// ============================================================================
// NATURAL KEY
// ============================================================================

/// (entity_id, statement_type, line_item, period) - exactly one current value
/// per key in a timeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub entity_id: String,
    pub statement_type: StatementType,
    pub line_item: String,
    pub period: Period,
}

impl NaturalKey {
    pub fn new(entity_id: &str, statement_type: StatementType, line_item: &str, period: Period) -> Self {
        NaturalKey {
            entity_id: entity_id.to_string(),
            statement_type,
            line_item: canonical_label(line_item),
            period,
        }
    }

    /// Same entity, statement and line item; period may differ
    pub fn same_series(&self, other: &NaturalKey) -> bool {
        self.entity_id == other.entity_id
            && self.statement_type == other.statement_type
            && self.line_item == other.line_item
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} [{}]",
            self.entity_id, self.statement_type, self.line_item, self.period
        )
    }
}

/// Trim and collapse internal whitespace so "Total  revenue " == "Total revenue"
pub fn canonical_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// FACT RECORD (input)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    #[serde(default)]
    pub entity_id: String,

    #[serde(default)]
    pub statement_type: Option<StatementType>,

    #[serde(default)]
    pub period_start: Option<NaiveDate>,

    #[serde(default)]
    pub period_end: Option<NaiveDate>,

    #[serde(default)]
    pub period_type: Option<PeriodType>,

    #[serde(default)]
    pub line_item: String,

    /// None = the extractor found the line but no usable number
    #[serde(default)]
    pub value: Option<f64>,

    #[serde(default = "default_unit")]
    pub unit: String,

    pub source_filing: SourceFiling,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f64>,
}

fn default_unit() -> String {
    "USD".to_string()
}

/// A fact record that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedFact {
    pub key: NaturalKey,
    pub value: Option<f64>,
    pub unit: String,
    pub source_filing: SourceFiling,
    pub extraction_confidence: Option<f64>,
}

impl FactRecord {
    /// Check the record's shape and build its natural key.
    ///
    /// `index` is the record's position in its batch, used for reporting.
    pub fn validate(&self, index: usize) -> Result<ValidatedFact, MalformedFactError> {
        let fail = |field: &str, reason: &str| {
            MalformedFactError::new(index, &self.line_item, field, reason)
        };

        if self.entity_id.trim().is_empty() {
            return Err(fail("entity_id", "is missing"));
        }

        let line_item = canonical_label(&self.line_item);
        if line_item.is_empty() {
            return Err(fail("line_item", "is missing"));
        }

        let statement_type = self
            .statement_type
            .ok_or_else(|| fail("statement_type", "is missing"))?;

        let period_type = self
            .period_type
            .or_else(|| self.source_filing.form_type.default_period_type())
            .ok_or_else(|| fail("period_type", "is missing and cannot be inferred from the form type"))?;

        let period_end = self
            .period_end
            .ok_or_else(|| fail("period_end", "is missing"))?;

        // AsOf values are instants: start collapses onto end
        let period_start = match period_type {
            PeriodType::AsOf => period_end,
            _ => self
                .period_start
                .ok_or_else(|| fail("period_start", "is missing"))?,
        };

        if period_start > period_end {
            return Err(fail("period_start", "is after period_end"));
        }

        if let Some(value) = self.value {
            if !value.is_finite() {
                return Err(fail("value", "is not a finite number"));
            }
        }

        if let Some(confidence) = self.extraction_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(fail("extraction_confidence", "must be between 0.0 and 1.0"));
            }
        }

        let period = Period::new(period_start, period_end, period_type);

        Ok(ValidatedFact {
            key: NaturalKey::new(self.entity_id.trim(), statement_type, &line_item, period),
            value: self.value,
            unit: self.unit.clone(),
            source_filing: self.source_filing.clone(),
            extraction_confidence: self.extraction_confidence,
        })
    }
}

// ============================================================================
// FILING BATCH
// ============================================================================

/// All facts extracted from one filing, as handed over by the extraction layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingBatch {
    pub filing: SourceFiling,
    pub facts: Vec<FactRecord>,
}

impl FilingBatch {
    pub fn new(filing: SourceFiling, facts: Vec<FactRecord>) -> Self {
        FilingBatch { filing, facts }
    }

    /// SHA-256 over the serialized batch. Detects a re-sent accession number
    /// whose extracted content changed.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.filing.accession_number.as_bytes());
        for fact in &self.facts {
            // Serializing plain data into a String cannot fail
            if let Ok(json) = serde_json::to_string(fact) {
                hasher.update(json.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Entity named by the batch's first record that has one
    pub fn entity_id(&self) -> Option<&str> {
        self.facts
            .iter()
            .map(|f| f.entity_id.trim())
            .find(|id| !id.is_empty())
    }

    /// Statement types that carry at least one record
    pub fn statement_types(&self) -> Vec<StatementType> {
        let mut types: Vec<StatementType> =
            self.facts.iter().filter_map(|f| f.statement_type).collect();
        types.sort();
        types.dedup();
        types
    }
}

// ============================================================================
// TESTS
// ============================================================================
