// 🚨 Error taxonomy for the reconciliation core
//
// Structural errors abort a whole ingest call. Record-level problems
// (MalformedFactError) are collected in the change report instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::facts::StatementType;

/// A single fact record that could not be accepted.
///
/// Fatal to that record only: the record is logged, skipped and listed in the
/// `rejected` section of the change report.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("malformed fact #{index} ({line_item}): {field} {reason}")]
pub struct MalformedFactError {
    /// Position of the record inside its filing batch
    pub index: usize,
    /// Line item label as received (may be empty)
    pub line_item: String,
    pub field: String,
    pub reason: String,
}

impl MalformedFactError {
    pub fn new(index: usize, line_item: &str, field: &str, reason: &str) -> Self {
        MalformedFactError {
            index,
            line_item: line_item.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FacetError {
    #[error(transparent)]
    MalformedFact(#[from] MalformedFactError),

    #[error("timeline already anchored for entity {0}; route the filing through the delta applier")]
    DuplicateAnchor(String),

    #[error("no timeline for entity {0}; it must be anchored first")]
    TimelineNotFound(String),

    #[error("filing {accession} for {entity_id} contains no usable facts")]
    EmptyFiling { entity_id: String, accession: String },

    #[error("anchor filing {accession} for {entity_id} is missing required statements: {missing:?}")]
    IncompleteAnchor {
        entity_id: String,
        accession: String,
        missing: Vec<StatementType>,
    },

    #[error("unknown sector: {0}")]
    UnknownSector(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FacetError>;
