// ⚓ Anchor Snapshot Builder - the first, trusted baseline of an entity
//
// One filing in, one Timeline out: every non-null fact becomes a chain of
// length 1. Anything that cannot be anchored is reported, never guessed.

use crate::config::ReconcileConfig;
use crate::consistency::check_timeline;
use crate::delta::{group_by_key, record_findings};
use crate::error::{FacetError, Result};
use crate::facts::{FilingBatch, StatementType};
use crate::report::{ChangeEntry, ChangeKind, ChangeReport, IngestMode};
use crate::timeline::{FactVersion, Timeline};

pub struct AnchorBuilder {
    pub config: ReconcileConfig,
}

impl AnchorBuilder {
    pub fn new() -> Self {
        AnchorBuilder {
            config: ReconcileConfig::default(),
        }
    }

    pub fn with_config(config: ReconcileConfig) -> Self {
        AnchorBuilder { config }
    }

    /// Build the initial timeline for `entity_id` from its first filing.
    ///
    /// Fails with `DuplicateAnchor` when `existing` is Some, `IncompleteAnchor`
    /// when a required statement has no usable value, and `EmptyFiling` when
    /// nothing in the batch can become a version.
    pub fn build(&self, entity_id: &str, batch: &FilingBatch, existing: Option<&Timeline>) -> Result<(Timeline, ChangeReport)> {
        if existing.is_some() {
            return Err(FacetError::DuplicateAnchor(entity_id.to_string()));
        }

        let mut report = ChangeReport::new(entity_id, &batch.filing, IngestMode::Anchor);
        let grouped = group_by_key(entity_id, batch);
        report.rejected = grouped.rejected;
        report.changes = grouped.changes;

        let covered: Vec<StatementType> = grouped
            .facts
            .values()
            .filter(|f| f.value.is_some())
            .map(|f| f.key.statement_type)
            .collect();
        let missing: Vec<StatementType> = self
            .config
            .anchor_required_statements
            .iter()
            .filter(|s| !covered.contains(s))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(FacetError::IncompleteAnchor {
                entity_id: entity_id.to_string(),
                accession: batch.filing.accession_number.clone(),
                missing,
            });
        }

        let mut timeline = Timeline::new(entity_id);
        for (key, fact) in grouped.facts {
            let entry = match fact.value {
                Some(value) => {
                    timeline.insert_new(key.clone(), FactVersion::from_fact(&fact, value));
                    ChangeEntry::new(key, ChangeKind::NewKey)
                        .with_values(Some(value), None)
                        .with_chain_length(1)
                }
                None => ChangeEntry::new(key, ChangeKind::ExtractionGapIgnored),
            };
            report.changes.push(entry);
        }

        if timeline.is_empty() {
            log::warn!(
                "⚠️  {} {}: nothing to anchor ({} records, {} rejected)",
                entity_id,
                batch.filing,
                batch.facts.len(),
                report.rejected.len()
            );
            return Err(FacetError::EmptyFiling {
                entity_id: entity_id.to_string(),
                accession: batch.filing.accession_number.clone(),
            });
        }

        let findings = check_timeline(&timeline, &self.config, &batch.filing.accession_number);
        record_findings(&mut timeline, findings, &mut report);

        timeline.record_filing(&batch.filing, batch.content_hash(), IngestMode::Anchor);

        log::info!("⚓ {}", report.summary());
        Ok((timeline, report))
    }
}

impl Default for AnchorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FactRecord, NaturalKey, Period, PeriodType, SourceFiling};
    use crate::timeline::TimelineState;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ten_k() -> SourceFiling {
        SourceFiling::new("10-K", date(2023, 2, 1), "0000320193-23-000001")
    }

    fn record(statement: StatementType, line_item: &str, value: Option<f64>) -> FactRecord {
        let (start, period_type) = match statement {
            StatementType::BalanceSheet => (None, PeriodType::AsOf),
            _ => (Some(date(2022, 1, 1)), PeriodType::Annual),
        };
        FactRecord {
            entity_id: "AAPL".to_string(),
            statement_type: Some(statement),
            period_start: start,
            period_end: Some(date(2022, 12, 31)),
            period_type: Some(period_type),
            line_item: line_item.to_string(),
            value,
            unit: "USD".to_string(),
            source_filing: ten_k(),
            extraction_confidence: Some(0.95),
        }
    }

    #[test]
    fn test_anchor_revenue() {
        let batch = FilingBatch::new(ten_k(), vec![record(StatementType::Income, "Revenue", Some(100.0))]);
        let (timeline, report) = AnchorBuilder::new().build("AAPL", &batch, None).unwrap();

        let key = NaturalKey::new(
            "AAPL",
            StatementType::Income,
            "Revenue",
            Period::new(date(2022, 1, 1), date(2022, 12, 31), PeriodType::Annual),
        );
        let chain = timeline.chain(&key).unwrap();
        assert_eq!(chain.current_value(), 100.0);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.current().extraction_confidence, Some(0.95));
        assert_eq!(report.count(ChangeKind::NewKey), 1);
        assert_eq!(report.mode, IngestMode::Anchor);
        assert_eq!(timeline.state(), TimelineState::Anchored);
        assert_eq!(timeline.revision(), 1);
        assert!(timeline.has_filing("0000320193-23-000001"));

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_partial_coverage_with_gaps_and_rejects() {
        let mut broken = record(StatementType::Income, "Net income", Some(1.0));
        broken.statement_type = None;

        let batch = FilingBatch::new(
            ten_k(),
            vec![
                record(StatementType::Income, "Revenue", Some(100.0)),
                record(StatementType::BalanceSheet, "Total assets", Some(350.0)),
                record(StatementType::Income, "Cost of sales", None),
                broken,
            ],
        );
        let (timeline, report) = AnchorBuilder::new().build("AAPL", &batch, None).unwrap();

        assert_eq!(timeline.key_count(), 2);
        assert_eq!(report.count(ChangeKind::NewKey), 2);
        assert_eq!(report.count(ChangeKind::ExtractionGapIgnored), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 3);
    }

    #[test]
    fn test_duplicate_anchor_is_rejected() {
        let batch = FilingBatch::new(ten_k(), vec![record(StatementType::Income, "Revenue", Some(100.0))]);
        let builder = AnchorBuilder::new();
        let (timeline, _) = builder.build("AAPL", &batch, None).unwrap();

        let err = builder.build("AAPL", &batch, Some(&timeline)).unwrap_err();
        assert!(matches!(err, FacetError::DuplicateAnchor(ref id) if id == "AAPL"));
    }

    #[test]
    fn test_empty_filing_is_an_error() {
        let only_nulls = FilingBatch::new(ten_k(), vec![record(StatementType::Income, "Revenue", None)]);
        let err = AnchorBuilder::new().build("AAPL", &only_nulls, None).unwrap_err();
        assert!(matches!(err, FacetError::EmptyFiling { .. }));

        let nothing = FilingBatch::new(ten_k(), Vec::new());
        assert!(AnchorBuilder::new().build("AAPL", &nothing, None).is_err());
    }

    #[test]
    fn test_required_statements() {
        let mut config = ReconcileConfig::default();
        config.anchor_required_statements = vec![StatementType::Income, StatementType::BalanceSheet];
        let builder = AnchorBuilder::with_config(config);

        let income_only = FilingBatch::new(ten_k(), vec![record(StatementType::Income, "Revenue", Some(100.0))]);
        match builder.build("AAPL", &income_only, None) {
            Err(FacetError::IncompleteAnchor { missing, .. }) => {
                assert_eq!(missing, vec![StatementType::BalanceSheet]);
            }
            other => panic!("expected IncompleteAnchor, got {:?}", other.map(|(_, r)| r.summary())),
        }

        let complete = FilingBatch::new(
            ten_k(),
            vec![
                record(StatementType::Income, "Revenue", Some(100.0)),
                record(StatementType::BalanceSheet, "Total assets", Some(350.0)),
            ],
        );
        assert!(builder.build("AAPL", &complete, None).is_ok());
    }

    #[test]
    fn test_anchor_flags_inconsistent_quarters() {
        let filing = ten_k();
        let mut facts = vec![record(StatementType::Income, "Revenue", Some(120.0))];
        let quarters = [
            (date(2022, 1, 1), date(2022, 3, 31)),
            (date(2022, 4, 1), date(2022, 6, 30)),
            (date(2022, 7, 1), date(2022, 9, 30)),
            (date(2022, 10, 1), date(2022, 12, 31)),
        ];
        for (start, end) in quarters {
            let mut q = record(StatementType::Income, "Revenue", Some(25.0));
            q.period_start = Some(start);
            q.period_end = Some(end);
            q.period_type = Some(PeriodType::Quarterly);
            facts.push(q);
        }
        let (timeline, report) = AnchorBuilder::new()
            .build("AAPL", &FilingBatch::new(filing, facts), None)
            .unwrap();

        assert_eq!(report.inconsistencies.len(), 1);
        assert_eq!(report.inconsistencies[0].quarter_sum, 100.0);
        assert_eq!(timeline.inconsistencies().len(), 1);
    }
}
