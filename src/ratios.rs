// 📊 Derived ratios - computed from current timeline values, never stored
//
// Each ratio is Option: a missing input or a zero denominator yields None.

use crate::config::ReconcileConfig;
use crate::facts::PeriodType;
use crate::timeline::Timeline;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Concepts read from the balance sheet (point in time)
const BALANCE_CONCEPTS: [&str; 9] = [
    "assets_total",
    "assets_current",
    "cash_equivalents",
    "inventory",
    "receivables",
    "liabilities_current",
    "debt_long_term",
    "debt_short_term",
    "equity_total",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityRatios {
    pub current_ratio: Option<f64>,
    pub quick_ratio: Option<f64>,
    pub cash_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolvencyRatios {
    pub debt_to_equity: Option<f64>,
    pub debt_to_assets: Option<f64>,
    pub interest_coverage: Option<f64>,
    pub equity_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilityRatios {
    pub gross_profit_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub net_profit_margin: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub return_on_equity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyRatios {
    pub asset_turnover: Option<f64>,
    pub inventory_turnover: Option<f64>,
    pub receivables_turnover: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowRatios {
    pub operating_cash_flow_ratio: Option<f64>,
    pub free_cash_flow: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRatios {
    pub entity_id: String,
    pub period_end: NaiveDate,
    pub flow_period_type: PeriodType,
    pub liquidity: LiquidityRatios,
    pub solvency: SolvencyRatios,
    pub profitability: ProfitabilityRatios,
    pub efficiency: EfficiencyRatios,
    pub cash_flow: CashFlowRatios,
    /// Concept values the ratios were computed from
    pub inputs: BTreeMap<String, f64>,
}

/// Compute every ratio for one entity and period.
///
/// Balance-sheet concepts are read as of `period_end`; income and cash-flow
/// concepts from the `flow_period_type` period ending on `period_end`.
pub fn calculate_ratios(
    timeline: &Timeline,
    period_end: NaiveDate,
    flow_period_type: PeriodType,
    config: &ReconcileConfig,
) -> FinancialRatios {
    let inputs: BTreeMap<String, f64> = config
        .concepts
        .keys()
        .filter_map(|concept| {
            let period_type = if BALANCE_CONCEPTS.contains(&concept.as_str()) {
                PeriodType::AsOf
            } else {
                flow_period_type
            };
            lookup(timeline, config.concept_labels(concept), period_end, period_type)
                .map(|v| (concept.clone(), v))
        })
        .collect();

    let get = |concept: &str| inputs.get(concept).copied();

    // Short-term debt counts as zero when absent; long-term debt is required
    let debt = get("debt_long_term").map(|lt| lt + get("debt_short_term").unwrap_or(0.0));
    // Capex is reported with either sign
    let capex = get("capex").map(f64::abs);

    let liquidity = LiquidityRatios {
        current_ratio: div(get("assets_current"), get("liabilities_current")),
        quick_ratio: div(sub(get("assets_current"), get("inventory")), get("liabilities_current")),
        cash_ratio: div(get("cash_equivalents"), get("liabilities_current")),
    };

    let solvency = SolvencyRatios {
        debt_to_equity: div(debt, get("equity_total")),
        debt_to_assets: div(debt, get("assets_total")),
        interest_coverage: div(get("operating_income"), get("interest_expense")),
        equity_multiplier: div(get("assets_total"), get("equity_total")),
    };

    let profitability = ProfitabilityRatios {
        gross_profit_margin: div(sub(get("revenue"), get("cogs")), get("revenue")),
        operating_margin: div(get("operating_income"), get("revenue")),
        net_profit_margin: div(get("net_income"), get("revenue")),
        return_on_assets: div(get("net_income"), get("assets_total")),
        return_on_equity: div(get("net_income"), get("equity_total")),
    };

    let efficiency = EfficiencyRatios {
        asset_turnover: div(get("revenue"), get("assets_total")),
        inventory_turnover: div(get("cogs"), get("inventory")),
        receivables_turnover: div(get("revenue"), get("receivables")),
    };

    let cash_flow = CashFlowRatios {
        operating_cash_flow_ratio: div(get("operating_cash_flow"), get("liabilities_current")),
        free_cash_flow: sub(get("operating_cash_flow"), capex),
    };

    log::debug!(
        "ratios for {} {}: {} of {} concepts found",
        timeline.entity_id,
        period_end,
        inputs.len(),
        config.concepts.len()
    );

    FinancialRatios {
        entity_id: timeline.entity_id.clone(),
        period_end,
        flow_period_type,
        liquidity,
        solvency,
        profitability,
        efficiency,
        cash_flow,
        inputs,
    }
}

/// First configured label with a current value for the period
fn lookup(timeline: &Timeline, labels: &[String], period_end: NaiveDate, period_type: PeriodType) -> Option<f64> {
    labels.iter().find_map(|label| {
        timeline
            .entries()
            .find(|(k, _)| {
                k.period.end == period_end
                    && k.period.period_type == period_type
                    && k.line_item.eq_ignore_ascii_case(label)
            })
            .map(|(_, chain)| chain.current_value())
    })
}

fn div(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d),
        _ => None,
    }
}

fn sub(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}
