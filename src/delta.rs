// 🔀 Delta Applier - merge a new filing into an existing timeline
//
// Merge rules per natural key (filing order = filing_date, accession_number):
//   absent key                      -> NewKey
//   null incoming value             -> ExtractionGapIgnored
//   same filing, same value         -> Confirmation
//   same filing, other value        -> DuplicateSourceConflict (incoming dropped)
//   older than last_confirmed       -> BackfilledRevision (current value untouched)
//   newer filing, value differs     -> Restatement
//   newer filing, value within eps  -> Confirmation (last_confirmed moves)
//
// "Newer" means newer than last_confirmed, not just the current version.
//
// Nothing is ever removed from a chain.

use crate::config::ReconcileConfig;
use crate::consistency::check_quarterly_consistency;
use crate::error::{FacetError, MalformedFactError, Result};
use crate::facts::{FilingBatch, NaturalKey, ValidatedFact};
use crate::report::{ChangeEntry, ChangeKind, ChangeReport, IngestMode, StatementInconsistency};
use crate::timeline::{FactVersion, Timeline};
use std::collections::BTreeMap;

// ============================================================================
// BATCH GROUPING (shared with the anchor builder)
// ============================================================================

/// A filing batch after validation and per-key collapsing
#[derive(Debug, Default)]
pub(crate) struct GroupedBatch {
    pub facts: BTreeMap<NaturalKey, ValidatedFact>,
    /// IntraFilingConflict entries produced while collapsing
    pub changes: Vec<ChangeEntry>,
    pub rejected: Vec<MalformedFactError>,
}

/// Validate every record and collapse duplicates of a key.
///
/// Records for another entity or from another filing than the batch's are
/// rejected. Within the batch a non-null value beats a null one; two
/// different non-null values keep the later record.
pub(crate) fn group_by_key(entity_id: &str, batch: &FilingBatch) -> GroupedBatch {
    let mut grouped = GroupedBatch::default();

    for (index, record) in batch.facts.iter().enumerate() {
        let fact = match record.validate(index) {
            Ok(fact) => fact,
            Err(e) => {
                log::warn!("⚠️  {} {}: {}", entity_id, batch.filing.accession_number, e);
                grouped.rejected.push(e);
                continue;
            }
        };

        if fact.key.entity_id != entity_id {
            let e = MalformedFactError::new(
                index,
                &record.line_item,
                "entity_id",
                &format!("is {} but the batch belongs to {}", fact.key.entity_id, entity_id),
            );
            log::warn!("⚠️  {}", e);
            grouped.rejected.push(e);
            continue;
        }

        if !fact.source_filing.same_filing(&batch.filing) {
            let e = MalformedFactError::new(
                index,
                &record.line_item,
                "source_filing",
                &format!(
                    "is {} but the batch is {}",
                    fact.source_filing.accession_number, batch.filing.accession_number
                ),
            );
            log::warn!("⚠️  {}", e);
            grouped.rejected.push(e);
            continue;
        }

        match grouped.facts.get(&fact.key) {
            None => {
                grouped.facts.insert(fact.key.clone(), fact);
            }
            Some(existing) => match (existing.value, fact.value) {
                (_, None) => {
                    log::debug!("duplicate null for {} ignored (keeping earlier record)", fact.key);
                }
                (None, Some(_)) => {
                    grouped.facts.insert(fact.key.clone(), fact);
                }
                (Some(kept), Some(incoming)) if kept == incoming => {}
                (Some(kept), Some(incoming)) => {
                    log::warn!(
                        "⚠️  {} reported twice in {}: {} then {}, keeping {}",
                        fact.key,
                        batch.filing.accession_number,
                        kept,
                        incoming,
                        incoming
                    );
                    grouped.changes.push(
                        ChangeEntry::new(fact.key.clone(), ChangeKind::IntraFilingConflict)
                            .with_values(Some(incoming), Some(kept)),
                    );
                    grouped.facts.insert(fact.key.clone(), fact);
                }
            },
        }
    }

    grouped
}

/// Record new consistency findings on the timeline and in the report
pub(crate) fn record_findings(timeline: &mut Timeline, findings: Vec<StatementInconsistency>, report: &mut ChangeReport) {
    for finding in findings {
        if timeline.record_inconsistency(finding.clone()) {
            report.inconsistencies.push(finding);
        }
    }
}

// ============================================================================
// DELTA APPLIER
// ============================================================================

pub struct DeltaApplier {
    pub config: ReconcileConfig,
}

impl DeltaApplier {
    pub fn new() -> Self {
        DeltaApplier {
            config: ReconcileConfig::default(),
        }
    }

    pub fn with_config(config: ReconcileConfig) -> Self {
        DeltaApplier { config }
    }

    /// Apply a batch to an entity's timeline, failing when it has no anchor yet
    pub fn apply_to(&self, entity_id: &str, timeline: Option<&mut Timeline>, batch: &FilingBatch) -> Result<ChangeReport> {
        match timeline {
            Some(timeline) => self.apply(timeline, batch),
            None => Err(FacetError::TimelineNotFound(entity_id.to_string())),
        }
    }

    /// Merge one filing into the timeline and report every decision made
    pub fn apply(&self, timeline: &mut Timeline, batch: &FilingBatch) -> Result<ChangeReport> {
        let entity_id = timeline.entity_id.clone();
        let mut report = ChangeReport::new(&entity_id, &batch.filing, IngestMode::Delta);
        report.replayed = timeline.has_filing(&batch.filing.accession_number);

        let content_hash = batch.content_hash();
        if report.replayed {
            let same_content = timeline
                .filings()
                .iter()
                .any(|f| f.filing.same_filing(&batch.filing) && f.content_hash == content_hash);
            if same_content {
                log::info!("🔁 {} {} already applied, replaying", entity_id, batch.filing);
            } else {
                log::warn!("⚠️  {} {} re-sent with different content", entity_id, batch.filing);
            }
        }

        let grouped = group_by_key(&entity_id, batch);
        report.rejected = grouped.rejected;
        report.changes = grouped.changes;

        let mut touched: Vec<NaturalKey> = Vec::new();
        for (key, fact) in grouped.facts {
            let entry = self.merge_fact(timeline, key, &fact);
            log::debug!("{} {}", entry.kind, entry.key);
            if entry.kind.writes_version() {
                touched.push(entry.key.clone());
            }
            report.changes.push(entry);
        }

        let findings = check_quarterly_consistency(
            timeline,
            &touched,
            &self.config,
            &batch.filing.accession_number,
        );
        record_findings(timeline, findings, &mut report);

        if !report.replayed {
            timeline.record_filing(&batch.filing, content_hash, IngestMode::Delta);
        } else if !report.is_noop() {
            timeline.touch();
        }

        log::info!("📥 {}", report.summary());
        Ok(report)
    }

    fn merge_fact(&self, timeline: &mut Timeline, key: NaturalKey, fact: &ValidatedFact) -> ChangeEntry {
        let previous = timeline.current_value(&key);

        // Null never writes
        let Some(value) = fact.value else {
            let chain_length = timeline.chain(&key).map_or(0, |c| c.len());
            if previous.is_some() {
                log::warn!("⚠️  {} null in {}, keeping current value", key, fact.source_filing.accession_number);
            }
            return ChangeEntry::new(key, ChangeKind::ExtractionGapIgnored)
                .with_values(None, previous)
                .with_chain_length(chain_length);
        };

        if !timeline.contains_key(&key) {
            timeline.insert_new(key.clone(), FactVersion::from_fact(fact, value));
            return ChangeEntry::new(key, ChangeKind::NewKey)
                .with_values(Some(value), None)
                .with_chain_length(1);
        }

        let Some(chain) = timeline.chain_mut(&key) else {
            return ChangeEntry::new(key, ChangeKind::ExtractionGapIgnored);
        };

        let kind = if let Some(existing) = chain.version_from(&fact.source_filing.accession_number) {
            if self.config.values_match(existing.value, value) {
                ChangeKind::Confirmation
            } else {
                log::warn!(
                    "⚠️  {} already holds {} from {}, dropping {}",
                    key,
                    existing.value,
                    fact.source_filing.accession_number,
                    value
                );
                ChangeKind::DuplicateSourceConflict
            }
        } else if fact.source_filing.same_filing(chain.last_confirmed()) {
            // Confirming filing re-sent: it already vouched for the current value
            if self.config.values_match(chain.current_value(), value) {
                ChangeKind::Confirmation
            } else {
                log::warn!(
                    "⚠️  {} already confirmed at {} by {}, dropping {}",
                    key,
                    chain.current_value(),
                    fact.source_filing.accession_number,
                    value
                );
                ChangeKind::DuplicateSourceConflict
            }
        } else if fact.source_filing.is_newer_than(chain.last_confirmed()) {
            if self.config.values_match(chain.current_value(), value) {
                chain.confirm(&fact.source_filing);
                ChangeKind::Confirmation
            } else {
                chain.push_current(FactVersion::from_fact(fact, value));
                ChangeKind::Restatement
            }
        } else if fact.source_filing.is_newer_than(&chain.current().source)
            && self.config.values_match(chain.current_value(), value)
        {
            // Between the current version and a later confirmation, same value
            ChangeKind::Confirmation
        } else {
            chain.insert_chronological(FactVersion::from_fact(fact, value));
            ChangeKind::BackfilledRevision
        };

        let chain_length = chain.len();
        ChangeEntry::new(key, kind)
            .with_values(Some(value), previous)
            .with_chain_length(chain_length)
    }
}

impl Default for DeltaApplier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorBuilder;
    use crate::facts::{FactRecord, Period, PeriodType, SourceFiling, StatementType};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn filing(form: &str, y: i32, m: u32, d: u32, accession: &str) -> SourceFiling {
        SourceFiling::new(form, date(y, m, d), accession)
    }

    fn fact(filing: &SourceFiling, line_item: &str, period: Period, value: Option<f64>) -> FactRecord {
        FactRecord {
            entity_id: "AAPL".to_string(),
            statement_type: Some(StatementType::Income),
            period_start: Some(period.start),
            period_end: Some(period.end),
            period_type: Some(period.period_type),
            line_item: line_item.to_string(),
            value,
            unit: "USD".to_string(),
            source_filing: filing.clone(),
            extraction_confidence: None,
        }
    }

    fn fy2022() -> Period {
        Period::new(date(2022, 1, 1), date(2022, 12, 31), PeriodType::Annual)
    }

    fn revenue_key(period: Period) -> NaturalKey {
        NaturalKey::new("AAPL", StatementType::Income, "Revenue", period)
    }

    fn revenue_batch(filing: &SourceFiling, period: Period, value: Option<f64>) -> FilingBatch {
        FilingBatch::new(filing.clone(), vec![fact(filing, "Revenue", period, value)])
    }

    fn anchored(value: f64) -> Timeline {
        let anchor = filing("10-K", 2023, 2, 1, "0000320193-23-000001");
        let (timeline, _) = AnchorBuilder::new()
            .build("AAPL", &revenue_batch(&anchor, fy2022(), Some(value)), None)
            .unwrap();
        timeline
    }

    #[test]
    fn test_restatement_becomes_current() {
        let mut timeline = anchored(100.0);
        let amendment = filing("10-K/A", 2023, 5, 1, "0000320193-23-000050");

        let report = DeltaApplier::new()
            .apply(&mut timeline, &revenue_batch(&amendment, fy2022(), Some(105.0)))
            .unwrap();

        let chain = timeline.chain(&revenue_key(fy2022())).unwrap();
        assert_eq!(chain.current_value(), 105.0);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.history()[0].version.value, 100.0);
        assert_eq!(chain.history()[0].superseded_by.accession_number, "0000320193-23-000050");

        assert_eq!(report.restatements().len(), 1);
        assert_eq!(report.restatements()[0].previous_value, Some(100.0));
        assert_eq!(timeline.revision(), 2);

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_new_quarter_key_has_no_inconsistency() {
        let mut timeline = anchored(100.0);
        let q1 = Period::new(date(2023, 1, 1), date(2023, 3, 31), PeriodType::Quarterly);
        let ten_q = filing("10-Q", 2023, 5, 5, "0000320193-23-000060");

        let report = DeltaApplier::new()
            .apply(&mut timeline, &revenue_batch(&ten_q, q1, Some(30.0)))
            .unwrap();

        assert_eq!(report.new_keys(), vec![&revenue_key(q1)]);
        assert_eq!(timeline.chain(&revenue_key(q1)).unwrap().len(), 1);
        assert!(report.inconsistencies.is_empty());
        assert!(timeline.inconsistencies().is_empty());
    }

    #[test]
    fn test_quarter_sum_mismatch_is_annotated_once() {
        let fy2023 = Period::new(date(2023, 1, 1), date(2023, 12, 31), PeriodType::Annual);
        let quarters = [
            (Period::new(date(2023, 1, 1), date(2023, 3, 31), PeriodType::Quarterly), 25.0),
            (Period::new(date(2023, 4, 1), date(2023, 6, 30), PeriodType::Quarterly), 30.0),
            (Period::new(date(2023, 7, 1), date(2023, 9, 30), PeriodType::Quarterly), 30.0),
            (Period::new(date(2023, 10, 1), date(2023, 12, 31), PeriodType::Quarterly), 30.0),
        ];
        let mut timeline = anchored(100.0);
        let applier = DeltaApplier::new();

        let ten_k = filing("10-K", 2024, 2, 1, "0000320193-24-000001");
        let mut facts = vec![fact(&ten_k, "Revenue", fy2023, Some(120.0))];
        for (period, value) in quarters {
            facts.push(fact(&ten_k, "Revenue", period, Some(value)));
        }
        let batch = FilingBatch::new(ten_k, facts);

        let report = applier.apply(&mut timeline, &batch).unwrap();
        assert_eq!(report.inconsistencies.len(), 1);
        assert_eq!(report.inconsistencies[0].quarter_sum, 115.0);
        assert_eq!(timeline.current_value(&revenue_key(fy2023)), Some(120.0));
        assert_eq!(timeline.current_value(&revenue_key(quarters[0].0)), Some(25.0));

        // Replaying does not annotate the mismatch twice
        let replay = applier.apply(&mut timeline, &batch).unwrap();
        assert!(replay.replayed);
        assert!(replay.inconsistencies.is_empty());
        assert_eq!(timeline.inconsistencies().len(), 1);
    }

    #[test]
    fn test_identical_filing_is_idempotent() {
        let mut timeline = anchored(100.0);
        let amendment = filing("10-K/A", 2023, 5, 1, "0000320193-23-000050");
        let batch = revenue_batch(&amendment, fy2022(), Some(105.0));
        let applier = DeltaApplier::new();

        applier.apply(&mut timeline, &batch).unwrap();
        let versions = timeline.version_count();
        let revision = timeline.revision();

        let replay = applier.apply(&mut timeline, &batch).unwrap();
        assert!(replay.replayed);
        assert!(replay.is_noop());
        assert_eq!(replay.count(ChangeKind::Confirmation), 1);
        assert_eq!(timeline.version_count(), versions);
        assert_eq!(timeline.revision(), revision);
        assert_eq!(timeline.filings().len(), 2);
    }

    #[test]
    fn test_newer_wins_in_either_arrival_order() {
        let older = filing("10-K/A", 2023, 3, 1, "0000320193-23-000030");
        let newer = filing("10-K/A", 2023, 6, 1, "0000320193-23-000070");
        let applier = DeltaApplier::new();

        let mut in_order = anchored(100.0);
        applier.apply(&mut in_order, &revenue_batch(&older, fy2022(), Some(110.0))).unwrap();
        applier.apply(&mut in_order, &revenue_batch(&newer, fy2022(), Some(120.0))).unwrap();

        let mut reversed = anchored(100.0);
        applier.apply(&mut reversed, &revenue_batch(&newer, fy2022(), Some(120.0))).unwrap();
        let late = applier
            .apply(&mut reversed, &revenue_batch(&older, fy2022(), Some(110.0)))
            .unwrap();

        assert_eq!(late.backfills().len(), 1);
        assert_eq!(late.backfills()[0].previous_value, Some(120.0));

        let a = in_order.chain(&revenue_key(fy2022())).unwrap();
        let b = reversed.chain(&revenue_key(fy2022())).unwrap();
        assert_eq!(a.current_value(), 120.0);
        assert_eq!(b.current_value(), 120.0);

        let values = |c: &crate::timeline::VersionChain| c.versions().iter().map(|v| v.value).collect::<Vec<_>>();
        assert_eq!(values(a), vec![100.0, 110.0, 120.0]);
        assert_eq!(values(a), values(b));
    }

    #[test]
    fn test_late_filing_older_than_confirmation_stays_in_history() {
        let amendment = filing("10-K/A", 2023, 5, 1, "0000320193-23-000050");
        let next_year = filing("10-K", 2024, 2, 1, "0000320193-24-000001");
        let applier = DeltaApplier::new();

        let mut in_order = anchored(100.0);
        applier.apply(&mut in_order, &revenue_batch(&amendment, fy2022(), Some(105.0))).unwrap();
        applier.apply(&mut in_order, &revenue_batch(&next_year, fy2022(), Some(100.0))).unwrap();

        let mut reversed = anchored(100.0);
        let confirm = applier
            .apply(&mut reversed, &revenue_batch(&next_year, fy2022(), Some(100.0)))
            .unwrap();
        assert_eq!(confirm.count(ChangeKind::Confirmation), 1);
        let late = applier
            .apply(&mut reversed, &revenue_batch(&amendment, fy2022(), Some(105.0)))
            .unwrap();
        assert_eq!(late.backfills().len(), 1);
        assert!(late.restatements().is_empty());

        let a = in_order.chain(&revenue_key(fy2022())).unwrap();
        let b = reversed.chain(&revenue_key(fy2022())).unwrap();
        assert_eq!(a.current_value(), 100.0);
        assert_eq!(b.current_value(), 100.0);
        assert_eq!(b.last_confirmed().accession_number, "0000320193-24-000001");

        let values = |c: &crate::timeline::VersionChain| c.versions().iter().map(|v| v.value).collect::<Vec<_>>();
        assert_eq!(values(a), vec![100.0, 105.0, 100.0]);
        assert_eq!(values(a), values(b));

        // Same value in between: nothing to record
        let mut quiet = anchored(100.0);
        applier.apply(&mut quiet, &revenue_batch(&next_year, fy2022(), Some(100.0))).unwrap();
        let between = applier
            .apply(&mut quiet, &revenue_batch(&amendment, fy2022(), Some(100.0)))
            .unwrap();
        assert_eq!(between.count(ChangeKind::Confirmation), 1);
        assert_eq!(quiet.version_count(), 1);

        // Confirming filing re-sent with another value
        let resent = applier
            .apply(&mut quiet, &revenue_batch(&next_year, fy2022(), Some(90.0)))
            .unwrap();
        assert_eq!(resent.count(ChangeKind::DuplicateSourceConflict), 1);
        assert_eq!(quiet.current_value(&revenue_key(fy2022())), Some(100.0));

        println!("✅ confirmed value survives a late amendment in either order");
    }

    #[test]
    fn test_same_day_filings_break_ties_on_accession() {
        let mut timeline = anchored(100.0);
        let first = filing("10-K/A", 2023, 5, 1, "0000320193-23-000050");
        let second = filing("10-K/A", 2023, 5, 1, "0000320193-23-000051");
        let applier = DeltaApplier::new();

        applier.apply(&mut timeline, &revenue_batch(&second, fy2022(), Some(107.0))).unwrap();
        applier.apply(&mut timeline, &revenue_batch(&first, fy2022(), Some(105.0))).unwrap();

        assert_eq!(timeline.current_value(&revenue_key(fy2022())), Some(107.0));
    }

    #[test]
    fn test_null_never_overwrites() {
        let mut timeline = anchored(100.0);
        let later = filing("10-Q", 2023, 5, 5, "0000320193-23-000060");

        let report = DeltaApplier::new()
            .apply(&mut timeline, &revenue_batch(&later, fy2022(), None))
            .unwrap();

        assert_eq!(report.count(ChangeKind::ExtractionGapIgnored), 1);
        let chain = timeline.chain(&revenue_key(fy2022())).unwrap();
        assert_eq!(chain.current_value(), 100.0);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_confirmation_moves_last_confirmed() {
        let mut timeline = anchored(100.0);
        let later = filing("10-K", 2024, 2, 1, "0000320193-24-000001");

        let report = DeltaApplier::new()
            .apply(&mut timeline, &revenue_batch(&later, fy2022(), Some(100.0)))
            .unwrap();

        assert_eq!(report.count(ChangeKind::Confirmation), 1);
        let chain = timeline.chain(&revenue_key(fy2022())).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.last_confirmed().accession_number, "0000320193-24-000001");
    }

    #[test]
    fn test_epsilon_treats_rounding_as_confirmation() {
        let mut timeline = anchored(100.0);
        let later = filing("10-K", 2024, 2, 1, "0000320193-24-000001");
        let applier = DeltaApplier::with_config(ReconcileConfig::with_thresholds(0.5, 0.01));

        let report = applier
            .apply(&mut timeline, &revenue_batch(&later, fy2022(), Some(100.4)))
            .unwrap();
        assert_eq!(report.count(ChangeKind::Confirmation), 1);
        assert_eq!(timeline.current_value(&revenue_key(fy2022())), Some(100.0));
    }

    #[test]
    fn test_resent_filing_with_other_value_is_a_conflict() {
        let mut timeline = anchored(100.0);
        let anchor = filing("10-K", 2023, 2, 1, "0000320193-23-000001");

        let report = DeltaApplier::new()
            .apply(&mut timeline, &revenue_batch(&anchor, fy2022(), Some(999.0)))
            .unwrap();

        assert!(report.replayed);
        assert_eq!(report.count(ChangeKind::DuplicateSourceConflict), 1);
        assert_eq!(timeline.current_value(&revenue_key(fy2022())), Some(100.0));
        assert_eq!(timeline.version_count(), 1);
    }

    #[test]
    fn test_duplicates_inside_one_batch() {
        let mut timeline = anchored(100.0);
        let later = filing("10-K/A", 2023, 5, 1, "0000320193-23-000050");
        let batch = FilingBatch::new(
            later.clone(),
            vec![
                fact(&later, "Revenue", fy2022(), Some(104.0)),
                fact(&later, "Revenue", fy2022(), None),
                fact(&later, "Revenue ", fy2022(), Some(106.0)),
            ],
        );

        let report = DeltaApplier::new().apply(&mut timeline, &batch).unwrap();

        assert_eq!(report.count(ChangeKind::IntraFilingConflict), 1);
        let conflict = report.of_kind(ChangeKind::IntraFilingConflict).next().unwrap();
        assert_eq!(conflict.value, Some(106.0));
        assert_eq!(conflict.previous_value, Some(104.0));
        assert_eq!(timeline.current_value(&revenue_key(fy2022())), Some(106.0));
        assert_eq!(timeline.chain(&revenue_key(fy2022())).unwrap().len(), 2);
    }

    #[test]
    fn test_foreign_and_malformed_records_are_rejected() {
        let mut timeline = anchored(100.0);
        let later = filing("10-Q", 2023, 5, 5, "0000320193-23-000060");
        let other_filing = filing("10-Q", 2023, 5, 6, "0000320193-23-000061");

        let mut foreign_entity = fact(&later, "Revenue", fy2022(), Some(1.0));
        foreign_entity.entity_id = "MSFT".to_string();
        let mut broken = fact(&later, "Revenue", fy2022(), Some(1.0));
        broken.period_end = None;
        let wrong_filing = fact(&other_filing, "Revenue", fy2022(), Some(1.0));

        let batch = FilingBatch::new(later, vec![foreign_entity, broken, wrong_filing]);
        let report = DeltaApplier::new().apply(&mut timeline, &batch).unwrap();

        let fields: Vec<&str> = report.rejected.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["entity_id", "period_end", "source_filing"]);
        assert!(report.changes.is_empty());
        assert_eq!(timeline.version_count(), 1);
    }

    #[test]
    fn test_chain_length_never_decreases() {
        let mut timeline = anchored(100.0);
        let applier = DeltaApplier::new();
        let mut last = timeline.version_count();

        let sequence = [
            (filing("10-K/A", 2023, 6, 1, "F3"), Some(120.0)),
            (filing("10-K/A", 2023, 3, 1, "F2"), Some(110.0)),
            (filing("10-Q", 2023, 8, 1, "F4"), None),
            (filing("10-K/A", 2023, 6, 1, "F3"), Some(121.0)),
            (filing("10-K", 2024, 2, 1, "F5"), Some(120.0)),
        ];
        for (f, value) in sequence {
            applier.apply(&mut timeline, &revenue_batch(&f, fy2022(), value)).unwrap();
            assert!(timeline.version_count() >= last);
            last = timeline.version_count();
        }
        assert_eq!(timeline.current_value(&revenue_key(fy2022())), Some(120.0));
    }

    #[test]
    fn test_apply_to_missing_timeline() {
        let later = filing("10-Q", 2023, 5, 5, "0000320193-23-000060");
        let err = DeltaApplier::new()
            .apply_to("AAPL", None, &revenue_batch(&later, fy2022(), Some(1.0)))
            .unwrap_err();
        assert!(matches!(err, FacetError::TimelineNotFound(ref id) if id == "AAPL"));
    }
}
