// ⚙️ Reconciliation settings - explicit, loadable from JSON
//
// Tolerances are configuration, never inferred: every default below is a
// documented choice and can be overridden by a config file.

use crate::facts::StatementType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Absolute difference under which an incoming value counts as a
    /// confirmation rather than a restatement (default: 0.0 = exact match)
    pub restatement_epsilon: f64,

    /// Relative gap allowed between an annual figure and the sum of its
    /// quarters (default: 0.01 = 1%)
    pub quarterly_tolerance: f64,

    /// Number of quarters that make a complete fiscal year (default: 4)
    pub quarters_per_year: usize,

    /// Quarterly periods longer than this are year-to-date figures and are
    /// left out of the quarter sum (default: 100 days)
    pub max_quarter_days: i64,

    /// Statements an anchor filing must contain (default: none)
    pub anchor_required_statements: Vec<StatementType>,

    /// Ratio concept -> candidate line-item labels, matched case-insensitively
    pub concepts: BTreeMap<String, Vec<String>>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            restatement_epsilon: 0.0,
            quarterly_tolerance: 0.01,
            quarters_per_year: 4,
            max_quarter_days: 100,
            anchor_required_statements: Vec::new(),
            concepts: default_concepts(),
        }
    }
}

impl ReconcileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(quarterly_tolerance: f64) -> Self {
        ReconcileConfig {
            quarterly_tolerance,
            ..Self::default()
        }
    }

    pub fn with_thresholds(restatement_epsilon: f64, quarterly_tolerance: f64) -> Self {
        ReconcileConfig {
            restatement_epsilon,
            quarterly_tolerance,
            ..Self::default()
        }
    }

    /// Load settings from a JSON file. Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: ReconcileConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.restatement_epsilon >= 0.0) {
            anyhow::bail!("restatement_epsilon must be >= 0, got {}", self.restatement_epsilon);
        }
        if !(self.quarterly_tolerance >= 0.0) {
            anyhow::bail!("quarterly_tolerance must be >= 0, got {}", self.quarterly_tolerance);
        }
        if self.quarters_per_year == 0 {
            anyhow::bail!("quarters_per_year must be at least 1");
        }
        if self.max_quarter_days <= 0 {
            anyhow::bail!("max_quarter_days must be positive");
        }
        Ok(())
    }

    /// Two values are the same reported figure
    pub fn values_match(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.restatement_epsilon
    }

    /// Labels configured for a ratio concept
    pub fn concept_labels(&self, concept: &str) -> &[String] {
        self.concepts
            .get(concept)
            .map(|labels| labels.as_slice())
            .unwrap_or(&[])
    }
}

fn default_concepts() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 16] = [
        ("revenue", &["Revenue", "Revenues", "Total revenue", "Net sales", "Total net sales"]),
        ("cogs", &["Cost of revenue", "Cost of sales", "Cost of goods sold", "Total cost of sales"]),
        ("operating_income", &["Operating income", "Operating profit", "Income from operations"]),
        ("interest_expense", &["Interest expense", "Interest expense, net"]),
        ("net_income", &["Net income", "Net income attributable to the company", "Net earnings"]),
        ("assets_total", &["Total assets"]),
        ("assets_current", &["Total current assets"]),
        ("cash_equivalents", &["Cash and cash equivalents"]),
        ("inventory", &["Inventories", "Inventory", "Inventories, net"]),
        ("receivables", &["Accounts receivable, net", "Accounts receivable"]),
        ("liabilities_current", &["Total current liabilities"]),
        ("debt_long_term", &["Long-term debt", "Term debt", "Long-term debt, net of current portion"]),
        ("debt_short_term", &["Short-term debt", "Current portion of long-term debt", "Commercial paper"]),
        ("equity_total", &["Total shareholders' equity", "Total stockholders' equity", "Total equity"]),
        ("operating_cash_flow", &["Net cash provided by operating activities", "Cash generated by operating activities"]),
        ("capex", &["Payments for acquisition of property, plant and equipment", "Capital expenditures", "Purchases of property and equipment"]),
    ];

    entries
        .iter()
        .map(|(concept, labels)| {
            (
                concept.to_string(),
                labels.iter().map(|l| l.to_string()).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_explicit() {
        let config = ReconcileConfig::default();
        assert_eq!(config.restatement_epsilon, 0.0);
        assert_eq!(config.quarterly_tolerance, 0.01);
        assert_eq!(config.quarters_per_year, 4);
        assert!(config.anchor_required_statements.is_empty());
        assert!(config.concept_labels("revenue").contains(&"Revenue".to_string()));
        assert!(config.concept_labels("not_a_concept").is_empty());
    }

    #[test]
    fn test_values_match_uses_epsilon() {
        let exact = ReconcileConfig::default();
        assert!(exact.values_match(100.0, 100.0));
        assert!(!exact.values_match(100.0, 100.4));

        let loose = ReconcileConfig::with_thresholds(0.5, 0.02);
        assert!(loose.values_match(100.0, 100.4));
        assert_eq!(loose.quarterly_tolerance, 0.02);
    }

    #[test]
    fn test_from_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"quarterly_tolerance": 0.05, "anchor_required_statements": ["income", "balance_sheet"]}}"#
        )
        .unwrap();

        let config = ReconcileConfig::from_file(file.path()).unwrap();
        assert_eq!(config.quarterly_tolerance, 0.05);
        assert_eq!(config.quarters_per_year, 4);
        assert_eq!(
            config.anchor_required_statements,
            vec![StatementType::Income, StatementType::BalanceSheet]
        );
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"quarters_per_year": 0}}"#).unwrap();
        assert!(ReconcileConfig::from_file(file.path()).is_err());

        assert!(ReconcileConfig::from_file("/nonexistent/facet-config.json").is_err());
    }
}
