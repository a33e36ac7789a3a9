// 🏢 Entity Manager - owns one timeline per company
//
// Identity: entity_id (ticker). Value: the Timeline behind it, which only the
// anchor builder creates and only the delta applier mutates.
//
// Locking: the outer map lock is held just long enough to find or insert an
// entity; each timeline has its own RwLock, held for a whole merge so readers
// never see half a filing.

use crate::anchor::AnchorBuilder;
use crate::config::ReconcileConfig;
use crate::delta::DeltaApplier;
use crate::error::{FacetError, Result};
use crate::facts::{FilingBatch, NaturalKey, StatementType};
use crate::report::ChangeReport;
use crate::timeline::{CurrentFact, PeriodSelector, Timeline, TimelineState, VersionChain};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Uninitialized,
    Anchored,
    Reconciling,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::Uninitialized => "uninitialized",
            EntityState::Anchored => "anchored",
            EntityState::Reconciling => "reconciling",
        }
    }
}

impl From<TimelineState> for EntityState {
    fn from(state: TimelineState) -> Self {
        match state {
            TimelineState::Anchored => EntityState::Anchored,
            TimelineState::Reconciling => EntityState::Reconciling,
        }
    }
}

type SharedTimeline = Arc<RwLock<Timeline>>;

pub struct EntityManager {
    timelines: RwLock<HashMap<String, SharedTimeline>>,
    anchor: AnchorBuilder,
    delta: DeltaApplier,
}

impl EntityManager {
    pub fn new() -> Self {
        Self::with_config(ReconcileConfig::default())
    }

    pub fn with_config(config: ReconcileConfig) -> Self {
        EntityManager {
            timelines: RwLock::new(HashMap::new()),
            anchor: AnchorBuilder::with_config(config.clone()),
            delta: DeltaApplier::with_config(config),
        }
    }

    /// Rebuild a manager around timelines loaded from storage
    pub fn from_timelines(timelines: Vec<Timeline>, config: ReconcileConfig) -> Self {
        let manager = Self::with_config(config);
        let map = timelines
            .into_iter()
            .map(|t| (t.entity_id.clone(), Arc::new(RwLock::new(t))))
            .collect();
        EntityManager {
            timelines: RwLock::new(map),
            ..manager
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.delta.config
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    /// Route a filing to the anchor builder (no timeline yet) or the delta
    /// applier (timeline exists).
    pub fn ingest(&self, entity_id: &str, batch: &FilingBatch) -> Result<ChangeReport> {
        if let Some(handle) = self.handle(entity_id)? {
            return self.apply_locked(entity_id, &handle, batch);
        }

        // Build outside the map lock; other entities keep ingesting meanwhile
        let built = self.anchor.build(entity_id, batch, None);

        // Another ingest may have anchored the entity since the read above
        let mut map = self.write_map()?;
        if let Some(handle) = map.get(entity_id).cloned() {
            drop(map);
            return self.apply_locked(entity_id, &handle, batch);
        }

        let (timeline, report) = built?;
        map.insert(entity_id.to_string(), Arc::new(RwLock::new(timeline)));
        Ok(report)
    }

    /// Anchor explicitly; fails if the entity already has a timeline
    pub fn anchor(&self, entity_id: &str, batch: &FilingBatch) -> Result<ChangeReport> {
        if self.handle(entity_id)?.is_some() {
            return Err(FacetError::DuplicateAnchor(entity_id.to_string()));
        }

        let (timeline, report) = self.anchor.build(entity_id, batch, None)?;

        let mut map = self.write_map()?;
        if map.contains_key(entity_id) {
            return Err(FacetError::DuplicateAnchor(entity_id.to_string()));
        }
        map.insert(entity_id.to_string(), Arc::new(RwLock::new(timeline)));
        Ok(report)
    }

    /// Apply a delta explicitly; fails if the entity was never anchored
    pub fn apply_delta(&self, entity_id: &str, batch: &FilingBatch) -> Result<ChangeReport> {
        match self.handle(entity_id)? {
            Some(handle) => self.apply_locked(entity_id, &handle, batch),
            None => Err(FacetError::TimelineNotFound(entity_id.to_string())),
        }
    }

    /// Ingest many filings. Per entity they are applied in filing order, so
    /// the oldest filing available anchors the timeline.
    pub fn ingest_all(&self, mut batches: Vec<(String, FilingBatch)>) -> Vec<(String, Result<ChangeReport>)> {
        batches.sort_by(|(a_id, a), (b_id, b)| {
            a_id.cmp(b_id)
                .then_with(|| a.filing.order_key().cmp(&b.filing.order_key()))
        });

        batches
            .into_iter()
            .map(|(entity_id, batch)| {
                let result = self.ingest(&entity_id, &batch);
                if let Err(e) = &result {
                    log::error!("❌ {} {}: {}", entity_id, batch.filing, e);
                }
                (entity_id, result)
            })
            .collect()
    }

    fn apply_locked(&self, entity_id: &str, handle: &SharedTimeline, batch: &FilingBatch) -> Result<ChangeReport> {
        let mut timeline = handle
            .write()
            .map_err(|_| FacetError::LockPoisoned(format!("timeline {}", entity_id)))?;
        self.delta.apply(&mut timeline, batch)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Current values for one statement of one entity
    pub fn query(&self, entity_id: &str, statement_type: StatementType, selector: &PeriodSelector) -> Result<Vec<CurrentFact>> {
        self.read(entity_id, |t| t.current_facts(statement_type, selector))
    }

    /// Full version chain of one key (None if the key was never reported)
    pub fn history(&self, entity_id: &str, key: &NaturalKey) -> Result<Option<VersionChain>> {
        self.read(entity_id, |t| t.chain(key).cloned())
    }

    pub fn state(&self, entity_id: &str) -> Result<EntityState> {
        match self.handle(entity_id)? {
            Some(_) => self.read(entity_id, |t| t.state().into()),
            None => Ok(EntityState::Uninitialized),
        }
    }

    /// Consistent copy of an entity's timeline, taken under its read lock
    pub fn snapshot(&self, entity_id: &str) -> Result<Option<Timeline>> {
        match self.handle(entity_id)? {
            Some(_) => self.read(entity_id, |t| t.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Snapshots of every entity, sorted by entity_id
    pub fn snapshots(&self) -> Result<Vec<Timeline>> {
        let mut snapshots = Vec::new();
        for entity_id in self.entity_ids()? {
            if let Some(timeline) = self.snapshot(&entity_id)? {
                snapshots.push(timeline);
            }
        }
        Ok(snapshots)
    }

    pub fn entity_ids(&self) -> Result<Vec<String>> {
        let map = self
            .timelines
            .read()
            .map_err(|_| FacetError::LockPoisoned("entity map".to_string()))?;
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize> {
        let map = self
            .timelines
            .read()
            .map_err(|_| FacetError::LockPoisoned("entity map".to_string()))?;
        Ok(map.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read<T>(&self, entity_id: &str, f: impl FnOnce(&Timeline) -> T) -> Result<T> {
        let handle = self
            .handle(entity_id)?
            .ok_or_else(|| FacetError::TimelineNotFound(entity_id.to_string()))?;
        let timeline = handle
            .read()
            .map_err(|_| FacetError::LockPoisoned(format!("timeline {}", entity_id)))?;
        Ok(f(&timeline))
    }

    fn handle(&self, entity_id: &str) -> Result<Option<SharedTimeline>> {
        let map = self
            .timelines
            .read()
            .map_err(|_| FacetError::LockPoisoned("entity map".to_string()))?;
        Ok(map.get(entity_id).cloned())
    }

    fn write_map(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, SharedTimeline>>> {
        self.timelines
            .write()
            .map_err(|_| FacetError::LockPoisoned("entity map".to_string()))
    }
}

impl Default for EntityManager {
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
    use crate::facts::{FactRecord, Period, PeriodType, SourceFiling};
    use crate::report::ChangeKind;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fy2022() -> Period {
        Period::new(date(2022, 1, 1), date(2022, 12, 31), PeriodType::Annual)
    }

    fn revenue(entity_id: &str, filing: &SourceFiling, value: Option<f64>) -> FilingBatch {
        FilingBatch::new(
            filing.clone(),
            vec![FactRecord {
                entity_id: entity_id.to_string(),
                statement_type: Some(StatementType::Income),
                period_start: Some(fy2022().start),
                period_end: Some(fy2022().end),
                period_type: Some(PeriodType::Annual),
                line_item: "Revenue".to_string(),
                value,
                unit: "USD".to_string(),
                source_filing: filing.clone(),
                extraction_confidence: None,
            }],
        )
    }

    fn key(entity_id: &str) -> NaturalKey {
        NaturalKey::new(entity_id, StatementType::Income, "Revenue", fy2022())
    }

    #[test]
    fn test_state_machine() {
        let manager = EntityManager::new();
        let anchor = SourceFiling::new("10-K", date(2023, 2, 1), "A-1");
        let amendment = SourceFiling::new("10-K/A", date(2023, 5, 1), "A-2");

        assert_eq!(manager.state("AAPL").unwrap(), EntityState::Uninitialized);

        let report = manager.ingest("AAPL", &revenue("AAPL", &anchor, Some(100.0))).unwrap();
        assert_eq!(report.count(ChangeKind::NewKey), 1);
        assert_eq!(manager.state("AAPL").unwrap(), EntityState::Anchored);

        let report = manager.ingest("AAPL", &revenue("AAPL", &amendment, Some(105.0))).unwrap();
        assert_eq!(report.restatements().len(), 1);
        assert_eq!(manager.state("AAPL").unwrap(), EntityState::Reconciling);

        let chain = manager.history("AAPL", &key("AAPL")).unwrap().unwrap();
        assert_eq!(chain.current_value(), 105.0);
        assert_eq!(chain.len(), 2);

        println!("✅ AAPL reconciling with {} versions", chain.len());
    }

    #[test]
    fn test_explicit_routes() {
        let manager = EntityManager::new();
        let anchor = SourceFiling::new("10-K", date(2023, 2, 1), "A-1");

        let err = manager
            .apply_delta("AAPL", &revenue("AAPL", &anchor, Some(100.0)))
            .unwrap_err();
        assert!(matches!(err, FacetError::TimelineNotFound(_)));

        manager.anchor("AAPL", &revenue("AAPL", &anchor, Some(100.0))).unwrap();
        let err = manager
            .anchor("AAPL", &revenue("AAPL", &anchor, Some(100.0)))
            .unwrap_err();
        assert!(matches!(err, FacetError::DuplicateAnchor(_)));

        assert!(matches!(
            manager.query("MSFT", StatementType::Income, &PeriodSelector::Any),
            Err(FacetError::TimelineNotFound(_))
        ));
    }

    #[test]
    fn test_empty_anchor_leaves_entity_uninitialized() {
        let manager = EntityManager::new();
        let anchor = SourceFiling::new("10-K", date(2023, 2, 1), "A-1");

        assert!(manager.ingest("AAPL", &revenue("AAPL", &anchor, None)).is_err());
        assert_eq!(manager.state("AAPL").unwrap(), EntityState::Uninitialized);
        assert!(manager.is_empty().unwrap());
    }

    #[test]
    fn test_ingest_all_orders_filings_per_entity() {
        let manager = EntityManager::new();
        let older = SourceFiling::new("10-K", date(2023, 2, 1), "A-1");
        let newer = SourceFiling::new("10-K/A", date(2023, 5, 1), "A-2");

        let results = manager.ingest_all(vec![
            ("AAPL".to_string(), revenue("AAPL", &newer, Some(105.0))),
            ("MSFT".to_string(), revenue("MSFT", &older, Some(50.0))),
            ("AAPL".to_string(), revenue("AAPL", &older, Some(100.0))),
        ]);

        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(manager.entity_ids().unwrap(), vec!["AAPL", "MSFT"]);

        let facts = manager
            .query("AAPL", StatementType::Income, &PeriodSelector::Exact(fy2022()))
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, 105.0);
        assert_eq!(facts[0].version_count, 2);

        let snapshot = manager.snapshot("AAPL").unwrap().unwrap();
        assert_eq!(snapshot.filings().len(), 2);
        assert_eq!(manager.snapshots().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_ingest_of_different_entities() {
        let manager = EntityManager::new();
        let tickers = ["AAPL", "MSFT", "NVDA", "AMZN"];

        std::thread::scope(|scope| {
            for ticker in tickers {
                let manager = &manager;
                scope.spawn(move || {
                    let anchor = SourceFiling::new("10-K", date(2023, 2, 1), &format!("{}-1", ticker));
                    let restated = SourceFiling::new("10-K/A", date(2023, 5, 1), &format!("{}-2", ticker));
                    manager.ingest(ticker, &revenue(ticker, &anchor, Some(100.0))).unwrap();
                    manager.ingest(ticker, &revenue(ticker, &restated, Some(110.0))).unwrap();
                });
            }
        });

        for ticker in tickers {
            let chain = manager.history(ticker, &key(ticker)).unwrap().unwrap();
            assert_eq!(chain.current_value(), 110.0);
            assert_eq!(chain.len(), 2);
        }
    }

    #[test]
    fn test_from_timelines() {
        let manager = EntityManager::new();
        let anchor = SourceFiling::new("10-K", date(2023, 2, 1), "A-1");
        manager.ingest("AAPL", &revenue("AAPL", &anchor, Some(100.0))).unwrap();

        let restored = EntityManager::from_timelines(manager.snapshots().unwrap(), ReconcileConfig::default());
        assert_eq!(restored.state("AAPL").unwrap(), EntityState::Anchored);
        assert_eq!(restored.len().unwrap(), 1);
    }

    #[test]
    fn test_racing_first_filings_anchor_once() {
        let manager = EntityManager::new();
        let first = SourceFiling::new("10-K", date(2023, 2, 1), "A-1");
        let second = SourceFiling::new("10-K/A", date(2023, 5, 1), "A-2");

        let reports: Vec<ChangeReport> = std::thread::scope(|scope| {
            let a = scope.spawn(|| manager.ingest("AAPL", &revenue("AAPL", &first, Some(100.0))));
            let b = scope.spawn(|| manager.ingest("AAPL", &revenue("AAPL", &second, Some(105.0))));
            vec![a.join().unwrap().unwrap(), b.join().unwrap().unwrap()]
        });

        let anchors = reports.iter().filter(|r| r.mode == crate::report::IngestMode::Anchor).count();
        assert_eq!(anchors, 1);
        assert_eq!(manager.len().unwrap(), 1);

        // Newest filing wins no matter which one anchored
        let chain = manager.history("AAPL", &key("AAPL")).unwrap().unwrap();
        assert_eq!(chain.current_value(), 105.0);
        assert_eq!(chain.len(), 2);
        assert_eq!(manager.snapshot("AAPL").unwrap().unwrap().filings().len(), 2);
    }

    #[test]
    fn test_poisoned_map_is_reported() {
        let manager = EntityManager::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = manager.timelines.write().unwrap();
            panic!("poison the entity map");
        }));

        assert!(matches!(manager.len(), Err(FacetError::LockPoisoned(_))));
        assert!(matches!(manager.is_empty(), Err(FacetError::LockPoisoned(_))));
        assert!(matches!(manager.entity_ids(), Err(FacetError::LockPoisoned(_))));
    }
}
