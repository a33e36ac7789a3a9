// 🧮 Quarterly/annual consistency check
//
// For flow statements an annual figure should equal the sum of the quarters
// it contains. Mismatches are annotations only; neither side is modified.
//
// Formula:
//   |annual - (q1 + q2 + q3 + q4)| / |annual| <= quarterly_tolerance

use crate::config::ReconcileConfig;
use crate::facts::{NaturalKey, Period, PeriodType};
use crate::report::StatementInconsistency;
use crate::timeline::Timeline;
use std::collections::BTreeSet;

/// Check every annual key affected by `touched` keys.
///
/// A touched annual key is checked directly; a touched quarterly key triggers
/// a check of each annual key in its series whose period contains it.
pub fn check_quarterly_consistency(
    timeline: &Timeline,
    touched: &[NaturalKey],
    config: &ReconcileConfig,
    detected_by: &str,
) -> Vec<StatementInconsistency> {
    let mut annual_keys: BTreeSet<&NaturalKey> = BTreeSet::new();

    for key in touched.iter().filter(|k| k.statement_type.is_flow()) {
        match key.period.period_type {
            PeriodType::Annual => {
                if timeline.contains_key(key) {
                    annual_keys.insert(key);
                }
            }
            PeriodType::Quarterly => {
                for (k, _) in timeline.series(key) {
                    if k.period.period_type == PeriodType::Annual && k.period.contains(&key.period) {
                        annual_keys.insert(k);
                    }
                }
            }
            PeriodType::AsOf => {}
        }
    }

    annual_keys
        .into_iter()
        .filter_map(|annual| check_annual(timeline, annual, config, detected_by))
        .collect()
}

/// Check every annual flow key in the timeline
pub fn check_timeline(timeline: &Timeline, config: &ReconcileConfig, detected_by: &str) -> Vec<StatementInconsistency> {
    let annual: Vec<NaturalKey> = timeline
        .keys()
        .filter(|k| k.statement_type.is_flow() && k.period.period_type == PeriodType::Annual)
        .cloned()
        .collect();
    check_quarterly_consistency(timeline, &annual, config, detected_by)
}

fn check_annual(
    timeline: &Timeline,
    annual: &NaturalKey,
    config: &ReconcileConfig,
    detected_by: &str,
) -> Option<StatementInconsistency> {
    let annual_value = timeline.current_value(annual)?;

    let mut candidates: Vec<(Period, f64)> = timeline
        .series(annual)
        .filter(|(k, _)| {
            k.period.period_type == PeriodType::Quarterly
                && annual.period.contains(&k.period)
                && k.period.days() <= config.max_quarter_days
        })
        .map(|(k, chain)| (k.period, chain.current_value()))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    // Non-overlapping quarters, earliest first
    let mut quarters: Vec<(Period, f64)> = Vec::new();
    for (period, value) in candidates {
        if quarters.last().map_or(true, |(last, _)| !last.overlaps(&period)) {
            quarters.push((period, value));
        }
    }

    // Only a complete year can be checked
    if quarters.len() != config.quarters_per_year {
        return None;
    }

    let quarter_sum: f64 = quarters.iter().map(|(_, v)| v).sum();
    let difference = annual_value - quarter_sum;
    let relative_difference = relative(difference, annual_value);

    if relative_difference <= config.quarterly_tolerance {
        return None;
    }

    log::warn!(
        "⚠️  {}: annual {:.2} vs quarter sum {:.2} ({:.2}% off)",
        annual,
        annual_value,
        quarter_sum,
        relative_difference * 100.0
    );

    Some(StatementInconsistency {
        annual_key: annual.clone(),
        annual_value,
        quarters: quarters.into_iter().map(|(p, _)| p).collect(),
        quarter_sum,
        difference,
        relative_difference,
        tolerance: config.quarterly_tolerance,
        detected_by: detected_by.to_string(),
    })
}

fn relative(difference: f64, base: f64) -> f64 {
    if difference == 0.0 {
        0.0
    } else if base == 0.0 {
        f64::INFINITY
    } else {
        (difference / base).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{SourceFiling, StatementType};
    use crate::timeline::FactVersion;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn key(statement: StatementType, start: NaiveDate, end: NaiveDate, period_type: PeriodType) -> NaturalKey {
        NaturalKey::new("AAPL", statement, "Revenue", Period::new(start, end, period_type))
    }

    fn quarters_2023() -> Vec<(NaiveDate, NaiveDate)> {
        vec![
            (date(2023, 1, 1), date(2023, 3, 31)),
            (date(2023, 4, 1), date(2023, 6, 30)),
            (date(2023, 7, 1), date(2023, 9, 30)),
            (date(2023, 10, 1), date(2023, 12, 31)),
        ]
    }

    fn timeline_with(statement: StatementType, annual: f64, quarters: &[f64]) -> (Timeline, Vec<NaturalKey>) {
        let filing = SourceFiling::new("10-K", date(2024, 2, 1), "A");
        let mut timeline = Timeline::new("AAPL");
        let mut keys = Vec::new();

        let annual_key = key(statement, date(2023, 1, 1), date(2023, 12, 31), PeriodType::Annual);
        timeline.insert_new(annual_key.clone(), FactVersion::new(annual, "USD", filing.clone()));
        keys.push(annual_key);

        for ((start, end), value) in quarters_2023().into_iter().zip(quarters) {
            let k = key(statement, start, end, PeriodType::Quarterly);
            timeline.insert_new(k.clone(), FactVersion::new(*value, "USD", filing.clone()));
            keys.push(k);
        }
        (timeline, keys)
    }

    #[test]
    fn test_mismatch_is_reported() {
        let (timeline, keys) = timeline_with(StatementType::Income, 120.0, &[25.0, 30.0, 30.0, 30.0]);
        let config = ReconcileConfig::default();

        let found = check_quarterly_consistency(&timeline, &keys[1..2], &config, "Q");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].annual_value, 120.0);
        assert_eq!(found[0].quarter_sum, 115.0);
        assert_eq!(found[0].difference, 5.0);
        assert_eq!(found[0].quarters.len(), 4);
        assert_eq!(found[0].detected_by, "Q");

        // Values are untouched
        assert_eq!(timeline.current_value(&keys[0]), Some(120.0));
        println!("✅ {}", found[0].summary());
    }

    #[test]
    fn test_within_tolerance_passes() {
        let (timeline, keys) = timeline_with(StatementType::Income, 120.0, &[30.0, 30.0, 30.0, 29.5]);
        assert!(check_quarterly_consistency(&timeline, &keys, &ReconcileConfig::default(), "Q").is_empty());
    }

    #[test]
    fn test_incomplete_year_is_not_checked() {
        let (timeline, keys) = timeline_with(StatementType::Income, 120.0, &[30.0, 30.0, 30.0]);
        assert!(check_timeline(&timeline, &ReconcileConfig::default(), "Q").is_empty());
        assert!(check_quarterly_consistency(&timeline, &keys, &ReconcileConfig::default(), "Q").is_empty());
    }

    #[test]
    fn test_point_in_time_statements_are_skipped() {
        let (timeline, keys) = timeline_with(StatementType::Equity, 120.0, &[1.0, 1.0, 1.0, 1.0]);
        assert!(check_quarterly_consistency(&timeline, &keys, &ReconcileConfig::default(), "Q").is_empty());
    }

    #[test]
    fn test_year_to_date_periods_are_ignored() {
        let (mut timeline, _) = timeline_with(StatementType::CashFlow, 120.0, &[30.0, 30.0, 30.0, 30.0]);
        let ytd = key(StatementType::CashFlow, date(2023, 1, 1), date(2023, 6, 30), PeriodType::Quarterly);
        timeline.insert_new(
            ytd,
            FactVersion::new(60.0, "USD", SourceFiling::new("10-Q", date(2023, 8, 1), "B")),
        );

        assert!(check_timeline(&timeline, &ReconcileConfig::default(), "Q").is_empty());
    }

    #[test]
    fn test_zero_annual_with_nonzero_quarters() {
        let (timeline, _) = timeline_with(StatementType::Income, 0.0, &[1.0, 0.0, 0.0, 0.0]);
        let found = check_timeline(&timeline, &ReconcileConfig::default(), "Q");
        assert_eq!(found.len(), 1);
        assert!(found[0].relative_difference.is_infinite());
    }
}
