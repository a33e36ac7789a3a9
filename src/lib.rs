// Facet Timeline - Core Library
// Versioned, auditable timelines of SEC financial facts.
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod facts;
pub mod config;
pub mod report;
pub mod timeline;      // Version chains + per-entity timeline
pub mod consistency;   // Annual vs quarter-sum check
pub mod anchor;        // Anchor Snapshot Builder
pub mod delta;         // Delta Applier
pub mod entity_manager;
pub mod sector;        // Sector Manager + GICS tree
pub mod ratios;
pub mod export;
pub mod db;

// Re-export commonly used types
pub use error::{FacetError, MalformedFactError, Result};
pub use facts::{
    FactRecord, FilingBatch, FormType, NaturalKey, Period, PeriodType,
    SourceFiling, StatementType, ValidatedFact, canonical_label,
};
pub use config::ReconcileConfig;
pub use report::{
    ChangeEntry, ChangeKind, ChangeReport, IngestMode, StatementInconsistency,
};
pub use timeline::{
    AppliedFiling, CurrentFact, FactVersion, HistoricalVersion, PeriodSelector,
    Timeline, TimelineState, VersionChain,
};
pub use consistency::{check_quarterly_consistency, check_timeline};
pub use anchor::AnchorBuilder;
pub use delta::DeltaApplier;
pub use entity_manager::{EntityManager, EntityState};
pub use sector::{
    AggregateOp, AggregateResult, GicsLevel, GicsNode, GicsTree, MarketCaps,
    MembershipReport, MissingMember, MissingReason, PartialAggregate, SectorManager, SectorView,
};
pub use ratios::{calculate_ratios, FinancialRatios};
pub use export::{
    export_statements, load_batch, write_aggregates_csv, write_change_report_csv,
    write_statement_csv,
};
pub use db::{
    Event, SaveStats,
    setup_database, open_database, save_timeline, load_timeline, load_all_timelines,
    list_entities, record_change_report, insert_event, get_events_for_entity,
    verify_version_count,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
