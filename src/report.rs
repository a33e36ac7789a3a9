// 🧾 Change Report - what one ingest did to a timeline
//
// Every incoming fact ends up here exactly once: as a change entry, or in
// `rejected`. Nothing is dropped without a trace.

use crate::error::MalformedFactError;
use crate::facts::{NaturalKey, Period, SourceFiling};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Anchor,
    Delta,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestMode::Anchor => "anchor",
            IngestMode::Delta => "delta",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Key not seen before: chain created with one version
    NewKey,
    /// Newer filing with a different value became current
    Restatement,
    /// Older filing inserted into history; current untouched
    BackfilledRevision,
    /// Same value reported again; no new version
    Confirmation,
    /// Null incoming value; nothing written
    ExtractionGapIgnored,
    /// The key already holds a version from this filing with another value
    DuplicateSourceConflict,
    /// The batch itself reported the key twice with different values
    IntraFilingConflict,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::NewKey => "NewKey",
            ChangeKind::Restatement => "Restatement",
            ChangeKind::BackfilledRevision => "BackfilledRevision",
            ChangeKind::Confirmation => "Confirmation",
            ChangeKind::ExtractionGapIgnored => "ExtractionGapIgnored",
            ChangeKind::DuplicateSourceConflict => "DuplicateSourceConflict",
            ChangeKind::IntraFilingConflict => "IntraFilingConflict",
        }
    }

    /// Kinds that add a version to a chain
    pub fn writes_version(&self) -> bool {
        matches!(
            self,
            ChangeKind::NewKey | ChangeKind::Restatement | ChangeKind::BackfilledRevision
        )
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub key: NaturalKey,
    pub kind: ChangeKind,
    /// Incoming value (None for extraction gaps)
    pub value: Option<f64>,
    /// Current value before this ingest, or the discarded duplicate for
    /// IntraFilingConflict
    pub previous_value: Option<f64>,
    /// Chain length after the change (0 when the key has no chain)
    pub chain_length: usize,
}

impl ChangeEntry {
    pub fn new(key: NaturalKey, kind: ChangeKind) -> Self {
        ChangeEntry {
            key,
            kind,
            value: None,
            previous_value: None,
            chain_length: 0,
        }
    }

    pub fn with_values(mut self, value: Option<f64>, previous_value: Option<f64>) -> Self {
        self.value = value;
        self.previous_value = previous_value;
        self
    }

    pub fn with_chain_length(mut self, chain_length: usize) -> Self {
        self.chain_length = chain_length;
        self
    }
}

/// Annual figure that disagrees with the sum of its quarters beyond tolerance.
/// Both sides stay in the timeline unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementInconsistency {
    pub annual_key: NaturalKey,
    pub annual_value: f64,
    pub quarters: Vec<Period>,
    pub quarter_sum: f64,
    pub difference: f64,
    pub relative_difference: f64,
    pub tolerance: f64,
    /// Filing whose ingest surfaced the mismatch
    pub detected_by: String,
}

impl StatementInconsistency {
    /// Same mismatch as `other` (ignores which filing found it)
    pub fn same_finding(&self, other: &StatementInconsistency) -> bool {
        self.annual_key == other.annual_key
            && self.annual_value == other.annual_value
            && self.quarter_sum == other.quarter_sum
            && self.quarters == other.quarters
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: annual {:.2} vs quarters {:.2} (diff {:.2}, {:.2}% > {:.2}%)",
            self.annual_key,
            self.annual_value,
            self.quarter_sum,
            self.difference,
            self.relative_difference * 100.0,
            self.tolerance * 100.0
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    pub entity_id: String,
    pub filing: SourceFiling,
    pub mode: IngestMode,
    /// The accession number had already been applied to this timeline
    pub replayed: bool,
    pub changes: Vec<ChangeEntry>,
    pub inconsistencies: Vec<StatementInconsistency>,
    pub rejected: Vec<MalformedFactError>,
    pub generated_at: DateTime<Utc>,
}

impl ChangeReport {
    pub fn new(entity_id: &str, filing: &SourceFiling, mode: IngestMode) -> Self {
        ChangeReport {
            entity_id: entity_id.to_string(),
            filing: filing.clone(),
            mode,
            replayed: false,
            changes: Vec::new(),
            inconsistencies: Vec::new(),
            rejected: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeEntry> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn new_keys(&self) -> Vec<&NaturalKey> {
        self.of_kind(ChangeKind::NewKey).map(|c| &c.key).collect()
    }

    pub fn restatements(&self) -> Vec<&ChangeEntry> {
        self.of_kind(ChangeKind::Restatement).collect()
    }

    pub fn backfills(&self) -> Vec<&ChangeEntry> {
        self.of_kind(ChangeKind::BackfilledRevision).collect()
    }

    /// Number of versions this ingest appended
    pub fn versions_written(&self) -> usize {
        self.changes.iter().filter(|c| c.kind.writes_version()).count()
    }

    /// Nothing in the timeline changed apart from confirmations
    pub fn is_noop(&self) -> bool {
        self.versions_written() == 0 && self.inconsistencies.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} [{}]: {} new, {} restated, {} backfilled, {} confirmed, {} gaps, {} conflicts, {} inconsistencies, {} rejected",
            self.entity_id,
            self.filing,
            self.mode.as_str(),
            self.count(ChangeKind::NewKey),
            self.count(ChangeKind::Restatement),
            self.count(ChangeKind::BackfilledRevision),
            self.count(ChangeKind::Confirmation),
            self.count(ChangeKind::ExtractionGapIgnored),
            self.count(ChangeKind::DuplicateSourceConflict) + self.count(ChangeKind::IntraFilingConflict),
            self.inconsistencies.len(),
            self.rejected.len()
        )
    }
}
