// 🏭 Sector Manager - sector views composed from entity timelines
//
// Membership: ticker -> GICS sub-industry code. A sector_id is any GICS code;
// its members are the entities whose sub-industry code starts with it.
// Views and aggregates are recomputed on every call and never stored.

pub mod aggregate;
pub mod gics;

pub use aggregate::{
    Aggregate, AggregateOp, AggregateResult, Contribution, MarketCaps, MissingMember, MissingReason,
    PartialAggregate,
};
pub use gics::{GicsLevel, GicsNode, GicsTree};

use crate::entity_manager::EntityManager;
use crate::error::{FacetError, Result};
use crate::facts::{canonical_label, StatementType};
use crate::timeline::{CurrentFact, PeriodSelector, Timeline};
use aggregate::{compute, MemberValue};
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Consistent per-entity snapshots of one sector's members
#[derive(Debug, Clone)]
pub struct SectorView {
    pub sector: GicsNode,
    pub members: Vec<Timeline>,
    /// Members assigned to the sector that have no timeline yet
    pub uninitialized: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MemberRow {
    #[serde(rename = "Symbol")]
    symbol: String,
    #[serde(rename = "GICS Sub-Industry")]
    sub_industry: String,
}

/// Outcome of loading a constituents file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipReport {
    pub assigned: usize,
    /// Sub-industry name not found in the GICS tree -> symbols listed under it
    pub unmatched: BTreeMap<String, Vec<String>>,
}

impl MembershipReport {
    pub fn skipped(&self) -> usize {
        self.unmatched.values().map(|symbols| symbols.len()).sum()
    }
}

pub struct SectorManager {
    tree: GicsTree,
    /// entity_id -> sub-industry code
    members: BTreeMap<String, String>,
}

impl SectorManager {
    pub fn new(tree: GicsTree) -> Self {
        SectorManager {
            tree,
            members: BTreeMap::new(),
        }
    }

    pub fn tree(&self) -> &GicsTree {
        &self.tree
    }

    /// Assign an entity to a sub-industry by code
    pub fn assign(&mut self, entity_id: &str, sub_industry_code: &str) -> Result<()> {
        match self.tree.get(sub_industry_code) {
            Some(node) if node.level == GicsLevel::SubIndustry => {
                self.members
                    .insert(entity_id.to_string(), sub_industry_code.to_string());
                Ok(())
            }
            _ => Err(FacetError::UnknownSector(sub_industry_code.to_string())),
        }
    }

    /// Assign an entity to a sub-industry by (case-insensitive) name
    pub fn assign_by_name(&mut self, entity_id: &str, sub_industry_name: &str) -> Result<()> {
        let code = self
            .tree
            .find_sub_industry(sub_industry_name)
            .map(|n| n.code.clone())
            .ok_or_else(|| FacetError::UnknownSector(sub_industry_name.to_string()))?;
        self.assign(entity_id, &code)
    }

    /// Load memberships from a constituents CSV (`Symbol`, `GICS Sub-Industry`).
    /// Unknown sub-industry names are skipped with a warning and listed in the
    /// returned report.
    pub fn load_members_csv<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<MembershipReport> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open members file: {}", path.as_ref().display()))?;
        self.load_members(file)
    }

    pub fn load_members<R: Read>(&mut self, reader: R) -> anyhow::Result<MembershipReport> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut report = MembershipReport::default();
        for (line_num, result) in rdr.deserialize().enumerate() {
            let row: MemberRow =
                result.with_context(|| format!("Failed to parse members line {}", line_num + 2))?;
            match self.assign_by_name(&row.symbol, &row.sub_industry) {
                Ok(()) => report.assigned += 1,
                Err(_) => {
                    log::warn!(
                        "⚠️  Skipped {}: sub-industry '{}' not found in GICS tree",
                        row.symbol,
                        row.sub_industry
                    );
                    report
                        .unmatched
                        .entry(row.sub_industry)
                        .or_default()
                        .push(row.symbol);
                }
            }
        }

        log::info!(
            "🏭 {} members assigned, {} skipped",
            report.assigned,
            report.skipped()
        );
        Ok(report)
    }

    pub fn sub_industry_of(&self, entity_id: &str) -> Option<&GicsNode> {
        self.members.get(entity_id).and_then(|code| self.tree.get(code))
    }

    /// Entities under any GICS code, sorted
    pub fn members(&self, sector_id: &str) -> Result<Vec<String>> {
        if !self.tree.contains(sector_id) {
            return Err(FacetError::UnknownSector(sector_id.to_string()));
        }
        Ok(self
            .members
            .iter()
            .filter(|(_, code)| code.starts_with(sector_id))
            .map(|(entity_id, _)| entity_id.clone())
            .collect())
    }

    /// Snapshot every member's timeline (each under its own read lock)
    pub fn view(&self, entities: &EntityManager, sector_id: &str) -> Result<SectorView> {
        let sector = self
            .tree
            .get(sector_id)
            .cloned()
            .ok_or_else(|| FacetError::UnknownSector(sector_id.to_string()))?;

        let mut members = Vec::new();
        let mut uninitialized = Vec::new();
        for entity_id in self.members(sector_id)? {
            match entities.snapshot(&entity_id)? {
                Some(timeline) => members.push(timeline),
                None => uninitialized.push(entity_id),
            }
        }

        Ok(SectorView {
            sector,
            members,
            uninitialized,
        })
    }

    /// Compose one line item across the sector's members.
    ///
    /// When a member has several matching periods, the latest-ending one wins
    /// (longest period on ties). Members without a value are listed in the
    /// partial result rather than failing the call.
    pub fn aggregate(
        &self,
        entities: &EntityManager,
        sector_id: &str,
        statement_type: StatementType,
        line_item: &str,
        selector: &PeriodSelector,
        op: &AggregateOp,
    ) -> Result<AggregateResult> {
        let label = canonical_label(line_item);
        let mut values = Vec::new();

        for entity_id in self.members(sector_id)? {
            let member = match entities.query(&entity_id, statement_type, selector) {
                Ok(facts) => pick(&facts, &label),
                Err(FacetError::TimelineNotFound(_)) => MemberValue::Missing(MissingReason::NoTimeline),
                Err(e) => return Err(e),
            };
            values.push((entity_id, member));
        }

        let result = compute(sector_id, statement_type, &label, op, values);
        log::info!("➕ {}", result.summary());
        Ok(result)
    }
}

fn pick(facts: &[CurrentFact], label: &str) -> MemberValue {
    facts
        .iter()
        .filter(|f| f.key.line_item.eq_ignore_ascii_case(label))
        .max_by(|a, b| {
            a.key
                .period
                .end
                .cmp(&b.key.period.end)
                .then_with(|| b.key.period.start.cmp(&a.key.period.start))
        })
        .map_or(MemberValue::Missing(MissingReason::NoValueForPeriod), |f| MemberValue::Found {
            value: f.value,
            period: f.key.period,
        })
}
