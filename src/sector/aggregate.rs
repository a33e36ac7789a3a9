// ➕ Sector aggregates - composed from member timelines, never stored
//
// A member without a value is listed as missing; the aggregate over the
// remaining members is still returned.

use crate::facts::{Period, StatementType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Market capitalization per entity_id, supplied by the caller
pub type MarketCaps = HashMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateOp {
    Sum,
    Count,
    /// Weighted by the market caps given here
    WeightedAverage(MarketCaps),
}

impl AggregateOp {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Count => "count",
            AggregateOp::WeightedAverage(_) => "market_cap_weighted_average",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// Entity was never anchored
    NoTimeline,
    /// Timeline has no current value for the line item and period
    NoValueForPeriod,
    /// Weighted average requested but no positive market cap supplied
    NoMarketCap,
}

impl MissingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingReason::NoTimeline => "no_timeline",
            MissingReason::NoValueForPeriod => "no_value_for_period",
            MissingReason::NoMarketCap => "no_market_cap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingMember {
    pub entity_id: String,
    pub reason: MissingReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub entity_id: String,
    pub value: f64,
    pub period: Period,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub sector_id: String,
    pub statement_type: StatementType,
    pub line_item: String,
    pub op: String,
    /// None when no member contributed (except for count, which is 0)
    pub value: Option<f64>,
    pub contributors: Vec<Contribution>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialAggregate {
    pub aggregate: Aggregate,
    pub missing: Vec<MissingMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateResult {
    Complete(Aggregate),
    Partial(PartialAggregate),
}

impl AggregateResult {
    pub fn aggregate(&self) -> &Aggregate {
        match self {
            AggregateResult::Complete(a) => a,
            AggregateResult::Partial(p) => &p.aggregate,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.aggregate().value
    }

    pub fn missing(&self) -> &[MissingMember] {
        match self {
            AggregateResult::Complete(_) => &[],
            AggregateResult::Partial(p) => &p.missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, AggregateResult::Complete(_))
    }

    pub fn summary(&self) -> String {
        let a = self.aggregate();
        format!(
            "{} {} {} [{}]: {} from {} members, {} missing",
            a.sector_id,
            a.statement_type,
            a.line_item,
            a.op,
            a.value.map_or("n/a".to_string(), |v| format!("{:.2}", v)),
            a.contributors.len(),
            self.missing().len()
        )
    }
}

/// What a member offers for the aggregate
pub(crate) enum MemberValue {
    Found { value: f64, period: Period },
    Missing(MissingReason),
}

pub(crate) fn compute(
    sector_id: &str,
    statement_type: StatementType,
    line_item: &str,
    op: &AggregateOp,
    members: Vec<(String, MemberValue)>,
) -> AggregateResult {
    let mut contributors = Vec::new();
    let mut missing = Vec::new();

    for (entity_id, member) in members {
        match member {
            MemberValue::Missing(reason) => missing.push(MissingMember { entity_id, reason }),
            MemberValue::Found { value, period } => {
                let weight = match op {
                    AggregateOp::WeightedAverage(caps) => {
                        match caps.get(&entity_id).copied().filter(|c| *c > 0.0) {
                            Some(cap) => Some(cap),
                            None => {
                                missing.push(MissingMember {
                                    entity_id,
                                    reason: MissingReason::NoMarketCap,
                                });
                                continue;
                            }
                        }
                    }
                    _ => None,
                };
                contributors.push(Contribution {
                    entity_id,
                    value,
                    period,
                    weight,
                });
            }
        }
    }

    let value = match op {
        AggregateOp::Count => Some(contributors.len() as f64),
        _ if contributors.is_empty() => None,
        AggregateOp::Sum => Some(contributors.iter().map(|c| c.value).sum()),
        AggregateOp::WeightedAverage(_) => {
            let total_weight: f64 = contributors.iter().filter_map(|c| c.weight).sum();
            let weighted: f64 = contributors
                .iter()
                .map(|c| c.value * c.weight.unwrap_or(0.0))
                .sum();
            Some(weighted / total_weight)
        }
    };

    let aggregate = Aggregate {
        sector_id: sector_id.to_string(),
        statement_type,
        line_item: line_item.to_string(),
        op: op.name().to_string(),
        value,
        contributors,
        computed_at: Utc::now(),
    };

    if missing.is_empty() {
        AggregateResult::Complete(aggregate)
    } else {
        missing.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        AggregateResult::Partial(PartialAggregate { aggregate, missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::PeriodType;
    use chrono::NaiveDate;

    fn q1() -> Period {
        Period::new(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 3, 31).unwrap(),
            PeriodType::Quarterly,
        )
    }

    fn found(entity_id: &str, value: f64) -> (String, MemberValue) {
        (entity_id.to_string(), MemberValue::Found { value, period: q1() })
    }

    #[test]
    fn test_weighted_average_skips_members_without_cap() {
        let caps: MarketCaps = [("A".to_string(), 3.0), ("B".to_string(), 1.0)].into_iter().collect();
        let result = compute(
            "45",
            StatementType::Income,
            "Revenue",
            &AggregateOp::WeightedAverage(caps),
            vec![found("A", 10.0), found("B", 20.0), found("C", 1000.0)],
        );

        assert_eq!(result.value(), Some(12.5));
        assert_eq!(result.missing().len(), 1);
        assert_eq!(result.missing()[0].reason, MissingReason::NoMarketCap);
    }

    #[test]
    fn test_count_and_empty_sum() {
        let members = || vec![(String::from("A"), MemberValue::Missing(MissingReason::NoTimeline))];

        let count = compute("45", StatementType::Income, "Revenue", &AggregateOp::Count, members());
        assert_eq!(count.value(), Some(0.0));

        let sum = compute("45", StatementType::Income, "Revenue", &AggregateOp::Sum, members());
        assert_eq!(sum.value(), None);
        assert!(!sum.is_complete());
    }

    #[test]
    fn test_complete_sum() {
        let result = compute(
            "45",
            StatementType::Income,
            "Revenue",
            &AggregateOp::Sum,
            vec![found("A", 10.0), found("B", 20.0)],
        );
        assert!(result.is_complete());
        assert_eq!(result.value(), Some(30.0));
        println!("✅ {}", result.summary());
    }
}
