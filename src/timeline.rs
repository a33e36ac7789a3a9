// ⏰ Timeline - identity + append-only history of values
//
// One Timeline per entity. Each natural key owns a VersionChain ordered by
// source filing (filing_date, accession_number); the last version is current.
// "Superseded by" is never stored: the filing that replaced version i is the
// source of version i + 1.

use crate::facts::{NaturalKey, Period, PeriodType, SourceFiling, StatementType, ValidatedFact};
use crate::report::{IngestMode, StatementInconsistency};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// FACT VERSION
// ============================================================================

/// One immutable value of a key, as reported by one filing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactVersion {
    pub value: f64,
    pub unit: String,
    pub source: SourceFiling,
    pub extraction_confidence: Option<f64>,
    /// System time: when this version entered the timeline
    pub recorded_at: DateTime<Utc>,
}

impl FactVersion {
    pub fn new(value: f64, unit: &str, source: SourceFiling) -> Self {
        FactVersion {
            value,
            unit: unit.to_string(),
            source,
            extraction_confidence: None,
            recorded_at: Utc::now(),
        }
    }

    /// Build from a validated fact. Null values never become versions, so the
    /// caller passes the unwrapped number.
    pub fn from_fact(fact: &ValidatedFact, value: f64) -> Self {
        FactVersion {
            value,
            unit: fact.unit.clone(),
            source: fact.source_filing.clone(),
            extraction_confidence: fact.extraction_confidence,
            recorded_at: Utc::now(),
        }
    }
}

/// A prior version together with the filing that replaced it
#[derive(Debug, Clone, Serialize)]
pub struct HistoricalVersion<'a> {
    pub index: usize,
    pub version: &'a FactVersion,
    pub superseded_by: &'a SourceFiling,
}

// ============================================================================
// VERSION CHAIN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionChain {
    /// Strictly ascending by source filing order; never empty
    versions: Vec<FactVersion>,
    /// Newest filing that reported the current value
    last_confirmed: SourceFiling,
}

impl VersionChain {
    pub fn new(first: FactVersion) -> Self {
        let last_confirmed = first.source.clone();
        VersionChain {
            versions: vec![first],
            last_confirmed,
        }
    }

    /// Rebuild a chain from storage. Versions are re-sorted by filing order.
    /// Returns None for an empty list.
    pub(crate) fn restore(mut versions: Vec<FactVersion>, last_confirmed: Option<SourceFiling>) -> Option<Self> {
        versions.sort_by(|a, b| a.source.order_key().cmp(&b.source.order_key()));
        versions.dedup_by(|a, b| a.source.same_filing(&b.source));
        let current_source = versions.last()?.source.clone();
        let last_confirmed = last_confirmed
            .filter(|f| !current_source.is_newer_than(f))
            .unwrap_or(current_source);
        Some(VersionChain {
            versions,
            last_confirmed,
        })
    }

    pub fn current(&self) -> &FactVersion {
        // Invariant: at least one version
        &self.versions[self.versions.len() - 1]
    }

    pub fn current_value(&self) -> f64 {
        self.current().value
    }

    pub fn last_confirmed(&self) -> &SourceFiling {
        &self.last_confirmed
    }

    /// All versions, oldest filing first
    pub fn versions(&self) -> &[FactVersion] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn has_history(&self) -> bool {
        self.versions.len() > 1
    }

    /// Filing that superseded version `index`
    pub fn superseded_by(&self, index: usize) -> Option<&SourceFiling> {
        self.versions.get(index + 1).map(|v| &v.source)
    }

    /// Prior (non-current) versions, oldest first
    pub fn history(&self) -> Vec<HistoricalVersion<'_>> {
        self.versions
            .iter()
            .enumerate()
            .take(self.versions.len() - 1)
            .filter_map(|(index, version)| {
                self.superseded_by(index).map(|superseded_by| HistoricalVersion {
                    index,
                    version,
                    superseded_by,
                })
            })
            .collect()
    }

    pub fn version_from(&self, accession_number: &str) -> Option<&FactVersion> {
        self.versions
            .iter()
            .find(|v| v.source.accession_number == accession_number)
    }

    /// Value as it was known on `date` (latest version filed on or before it)
    pub fn as_known_on(&self, date: NaiveDate) -> Option<&FactVersion> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.source.filing_date <= date)
    }

    /// Newer filing replaces the current value
    pub(crate) fn push_current(&mut self, version: FactVersion) {
        self.last_confirmed = version.source.clone();
        self.versions.push(version);
    }

    /// Filing older than `last_confirmed` goes into history at its
    /// chronological position. Returns the index it landed at.
    ///
    /// When it lands after the current version, the later confirming filing
    /// is stored as a version of its own so the confirmed value stays current.
    pub(crate) fn insert_chronological(&mut self, version: FactVersion) -> usize {
        let reconfirmed = if version.source.is_newer_than(&self.current().source) {
            let current = self.current();
            Some(FactVersion {
                value: current.value,
                unit: current.unit.clone(),
                source: self.last_confirmed.clone(),
                extraction_confidence: current.extraction_confidence,
                recorded_at: Utc::now(),
            })
        } else {
            None
        };

        let position = self
            .versions
            .partition_point(|v| v.source.order_key() < version.source.order_key());
        self.versions.insert(position, version);
        if let Some(confirmation) = reconfirmed {
            self.versions.push(confirmation);
        }
        position
    }

    /// Newer filing reported the same value
    pub(crate) fn confirm(&mut self, filing: &SourceFiling) {
        if filing.is_newer_than(&self.last_confirmed) {
            self.last_confirmed = filing.clone();
        }
    }
}

// ============================================================================
// CURRENT FACT (read model)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentFact {
    pub key: NaturalKey,
    pub value: f64,
    pub unit: String,
    pub source: SourceFiling,
    pub last_confirmed: SourceFiling,
    pub version_count: usize,
}

impl CurrentFact {
    fn from_chain(key: &NaturalKey, chain: &VersionChain) -> Self {
        let current = chain.current();
        CurrentFact {
            key: key.clone(),
            value: current.value,
            unit: current.unit.clone(),
            source: current.source.clone(),
            last_confirmed: chain.last_confirmed().clone(),
            version_count: chain.len(),
        }
    }
}

// ============================================================================
// PERIOD SELECTOR
// ============================================================================

/// Which periods a query asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeriodSelector {
    Exact(Period),
    EndingOn {
        end: NaiveDate,
        period_type: Option<PeriodType>,
    },
    EndingBetween {
        from: NaiveDate,
        to: NaiveDate,
        period_type: Option<PeriodType>,
    },
    Any,
}

impl PeriodSelector {
    pub fn matches(&self, period: &Period) -> bool {
        match self {
            PeriodSelector::Exact(p) => p == period,
            PeriodSelector::EndingOn { end, period_type } => {
                period.end == *end && period_type.map_or(true, |t| t == period.period_type)
            }
            PeriodSelector::EndingBetween {
                from,
                to,
                period_type,
            } => {
                *from <= period.end
                    && period.end <= *to
                    && period_type.map_or(true, |t| t == period.period_type)
            }
            PeriodSelector::Any => true,
        }
    }
}

// ============================================================================
// TIMELINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineState {
    /// Baseline built, no delta applied yet
    Anchored,
    /// At least one delta applied
    Reconciling,
}

impl TimelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineState::Anchored => "anchored",
            TimelineState::Reconciling => "reconciling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anchored" => Some(TimelineState::Anchored),
            "reconciling" => Some(TimelineState::Reconciling),
            _ => None,
        }
    }
}

/// A filing that has been applied to the timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFiling {
    pub filing: SourceFiling,
    pub content_hash: String,
    pub mode: IngestMode,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    pub entity_id: String,
    state: TimelineState,
    /// Bumped on every ingest
    revision: u64,
    entries: BTreeMap<NaturalKey, VersionChain>,
    filings: Vec<AppliedFiling>,
    inconsistencies: Vec<StatementInconsistency>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timeline {
    pub(crate) fn new(entity_id: &str) -> Self {
        let now = Utc::now();
        Timeline {
            entity_id: entity_id.to_string(),
            state: TimelineState::Anchored,
            revision: 0,
            entries: BTreeMap::new(),
            filings: Vec::new(),
            inconsistencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        entity_id: &str,
        state: TimelineState,
        revision: u64,
        entries: BTreeMap<NaturalKey, VersionChain>,
        filings: Vec<AppliedFiling>,
        inconsistencies: Vec<StatementInconsistency>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Timeline {
            entity_id: entity_id.to_string(),
            state,
            revision,
            entries,
            filings,
            inconsistencies,
            created_at,
            updated_at,
        }
    }

    pub fn state(&self) -> TimelineState {
        self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn chain(&self, key: &NaturalKey) -> Option<&VersionChain> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &NaturalKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &NaturalKey> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&NaturalKey, &VersionChain)> {
        self.entries.iter()
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total versions across all chains
    pub fn version_count(&self) -> usize {
        self.entries.values().map(|c| c.len()).sum()
    }

    pub fn current_value(&self, key: &NaturalKey) -> Option<f64> {
        self.entries.get(key).map(|c| c.current_value())
    }

    /// Current values for one statement, filtered by period
    pub fn current_facts(&self, statement_type: StatementType, selector: &PeriodSelector) -> Vec<CurrentFact> {
        self.entries
            .iter()
            .filter(|(k, _)| k.statement_type == statement_type && selector.matches(&k.period))
            .map(|(k, chain)| CurrentFact::from_chain(k, chain))
            .collect()
    }

    /// Every current value in the timeline
    pub fn all_current(&self) -> Vec<CurrentFact> {
        self.entries
            .iter()
            .map(|(k, chain)| CurrentFact::from_chain(k, chain))
            .collect()
    }

    /// Values as they were known on `date` - filings after it are invisible
    pub fn as_known_on(&self, date: NaiveDate) -> Vec<CurrentFact> {
        self.entries
            .iter()
            .filter_map(|(k, chain)| {
                chain.as_known_on(date).map(|v| CurrentFact {
                    key: k.clone(),
                    value: v.value,
                    unit: v.unit.clone(),
                    source: v.source.clone(),
                    last_confirmed: v.source.clone(),
                    version_count: chain.len(),
                })
            })
            .collect()
    }

    /// Keys of the same statement + line item (all periods)
    pub fn series<'a>(&'a self, key: &'a NaturalKey) -> impl Iterator<Item = (&'a NaturalKey, &'a VersionChain)> + 'a {
        self.entries.iter().filter(move |(k, _)| k.same_series(key))
    }

    pub fn filings(&self) -> &[AppliedFiling] {
        &self.filings
    }

    pub fn has_filing(&self, accession_number: &str) -> bool {
        self.filings
            .iter()
            .any(|f| f.filing.accession_number == accession_number)
    }

    pub fn inconsistencies(&self) -> &[StatementInconsistency] {
        &self.inconsistencies
    }

    // ------------------------------------------------------------------------
    // Mutation (anchor builder + delta applier only)
    // ------------------------------------------------------------------------

    pub(crate) fn chain_mut(&mut self, key: &NaturalKey) -> Option<&mut VersionChain> {
        self.entries.get_mut(key)
    }

    pub(crate) fn insert_new(&mut self, key: NaturalKey, version: FactVersion) {
        self.entries.entry(key).or_insert_with(|| VersionChain::new(version));
    }

    /// Returns false when the same finding is already recorded
    pub(crate) fn record_inconsistency(&mut self, finding: StatementInconsistency) -> bool {
        if self.inconsistencies.iter().any(|i| i.same_finding(&finding)) {
            return false;
        }
        self.inconsistencies.push(finding);
        true
    }

    /// Replayed filing that still wrote something
    pub(crate) fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    pub(crate) fn record_filing(&mut self, filing: &SourceFiling, content_hash: String, mode: IngestMode) {
        let now = Utc::now();
        self.filings.push(AppliedFiling {
            filing: filing.clone(),
            content_hash,
            mode,
            ingested_at: now,
        });
        self.revision += 1;
        self.updated_at = now;
        if mode == IngestMode::Delta {
            self.state = TimelineState::Reconciling;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
