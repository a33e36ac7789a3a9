// 📤 CSV export + batch import
//
// Statement layout: one file per statement type, one row per line item and
// period type, one column per period end (newest first), current values only.

use crate::facts::{FilingBatch, PeriodType, StatementType};
use crate::report::ChangeReport;
use crate::sector::AggregateResult;
use crate::timeline::Timeline;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write the six statement CSVs for one entity into `dir`.
/// Statements without data still get a header-only file.
pub fn export_statements<P: AsRef<Path>>(timeline: &Timeline, dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create export dir: {}", dir.display()))?;

    let mut written = Vec::new();
    for statement in StatementType::ALL {
        let path = dir.join(format!("{}_{}.csv", timeline.entity_id, statement.as_str()));
        let file = fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_statement_csv(timeline, statement, file)?;
        written.push(path);
    }

    log::info!("📤 Exported {} statements for {} to {}", written.len(), timeline.entity_id, dir.display());
    Ok(written)
}

pub fn write_statement_csv<W: Write>(timeline: &Timeline, statement: StatementType, writer: W) -> Result<()> {
    // (line_item, period_type) -> period_end -> (period_start, value)
    let mut rows: BTreeMap<(String, PeriodType), BTreeMap<NaiveDate, (NaiveDate, f64)>> = BTreeMap::new();
    let mut columns: BTreeSet<NaiveDate> = BTreeSet::new();

    for (key, chain) in timeline.entries().filter(|(k, _)| k.statement_type == statement) {
        columns.insert(key.period.end);
        let cells = rows
            .entry((key.line_item.clone(), key.period.period_type))
            .or_default();
        // Same end and type but different start (e.g. year-to-date): keep the shortest period
        let keep = cells
            .get(&key.period.end)
            .map_or(true, |(start, _)| key.period.start > *start);
        if keep {
            cells.insert(key.period.end, (key.period.start, chain.current_value()));
        }
    }

    let columns: Vec<NaiveDate> = columns.into_iter().rev().collect();

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["line_item".to_string(), "period_type".to_string()];
    header.extend(columns.iter().map(|d| d.to_string()));
    wtr.write_record(&header).context("Failed to write CSV header")?;

    for ((line_item, period_type), cells) in &rows {
        let mut record = vec![line_item.clone(), period_type.as_str().to_string()];
        record.extend(
            columns
                .iter()
                .map(|end| cells.get(end).map(|(_, v)| v.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)
            .with_context(|| format!("Failed to write row for {}", line_item))?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    Ok(())
}

pub fn write_change_report_csv<W: Write>(report: &ChangeReport, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "entity_id",
        "accession_number",
        "mode",
        "kind",
        "statement_type",
        "line_item",
        "period_start",
        "period_end",
        "period_type",
        "value",
        "previous_value",
        "chain_length",
    ])
    .context("Failed to write CSV header")?;

    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for change in &report.changes {
        wtr.write_record([
            report.entity_id.clone(),
            report.filing.accession_number.clone(),
            report.mode.as_str().to_string(),
            change.kind.as_str().to_string(),
            change.key.statement_type.as_str().to_string(),
            change.key.line_item.clone(),
            change.key.period.start.to_string(),
            change.key.period.end.to_string(),
            change.key.period.period_type.as_str().to_string(),
            opt(change.value),
            opt(change.previous_value),
            change.chain_length.to_string(),
        ])
        .context("Failed to write change row")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    Ok(())
}

pub fn write_aggregates_csv<W: Write>(results: &[AggregateResult], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "sector_id",
        "statement_type",
        "line_item",
        "op",
        "value",
        "contributors",
        "missing",
        "computed_at",
    ])
    .context("Failed to write CSV header")?;

    for result in results {
        let a = result.aggregate();
        let missing: Vec<String> = result
            .missing()
            .iter()
            .map(|m| format!("{}:{}", m.entity_id, m.reason.as_str()))
            .collect();
        wtr.write_record([
            a.sector_id.clone(),
            a.statement_type.as_str().to_string(),
            a.line_item.clone(),
            a.op.clone(),
            a.value.map(|v| v.to_string()).unwrap_or_default(),
            a.contributors.len().to_string(),
            missing.join(";"),
            a.computed_at.to_rfc3339(),
        ])
        .context("Failed to write aggregate row")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    Ok(())
}

/// Read a JSON filing batch produced by the extraction layer
pub fn load_batch<P: AsRef<Path>>(path: P) -> Result<FilingBatch> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read batch file: {}", path.as_ref().display()))?;
    let batch: FilingBatch = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse batch JSON: {}", path.as_ref().display()))?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaApplier;
    use crate::anchor::AnchorBuilder;
    use crate::facts::{FactRecord, Period, SourceFiling};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(filing: &SourceFiling, line_item: &str, period: Period, value: Option<f64>) -> FactRecord {
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

    fn fy(year: i32) -> Period {
        Period::new(date(year, 1, 1), date(year, 12, 31), PeriodType::Annual)
    }

    fn sample() -> (Timeline, ChangeReport) {
        let first = SourceFiling::new("10-K", date(2023, 2, 1), "A-1");
        let batch = FilingBatch::new(
            first.clone(),
            vec![
                record(&first, "Revenue", fy(2022), Some(100.0)),
                record(&first, "Revenue", fy(2021), Some(90.0)),
                record(&first, "Net income", fy(2022), Some(20.0)),
            ],
        );
        let (mut timeline, _) = AnchorBuilder::new().build("AAPL", &batch, None).unwrap();

        let second = SourceFiling::new("10-K/A", date(2023, 5, 1), "A-2");
        let delta = FilingBatch::new(
            second.clone(),
            vec![
                record(&second, "Revenue", fy(2022), Some(105.0)),
                record(&second, "Net income", fy(2022), None),
            ],
        );
        let report = DeltaApplier::new().apply(&mut timeline, &delta).unwrap();
        (timeline, report)
    }

    #[test]
    fn test_statement_layout() {
        let (timeline, _) = sample();
        let mut out = Vec::new();
        write_statement_csv(&timeline, StatementType::Income, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "line_item,period_type,2022-12-31,2021-12-31");
        assert_eq!(lines[1], "Net income,annual,20,");
        assert_eq!(lines[2], "Revenue,annual,105,90");
    }

    #[test]
    fn test_export_writes_all_statements() {
        let (timeline, _) = sample();
        let dir = tempfile::tempdir().unwrap();

        let files = export_statements(&timeline, dir.path()).unwrap();
        assert_eq!(files.len(), 6);

        let balance = fs::read_to_string(dir.path().join("AAPL_balance_sheet.csv")).unwrap();
        assert_eq!(balance.trim(), "line_item,period_type");
    }

    #[test]
    fn test_change_report_rows() {
        let (_, report) = sample();
        let mut out = Vec::new();
        write_change_report_csv(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("Restatement,income,Revenue,2022-01-01,2022-12-31,annual,105,100,2"));
        assert!(text.contains("ExtractionGapIgnored"));
    }

    #[test]
    fn test_load_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        fs::write(
            &path,
            r#"{
                "filing": {"form_type": "10-Q", "filing_date": "2023-05-05", "accession_number": "A-3"},
                "facts": [{
                    "entity_id": "AAPL",
                    "statement_type": "income_statement",
                    "period_start": "2023-01-01",
                    "period_end": "2023-03-31",
                    "line_item": "Revenue",
                    "value": 30.0,
                    "source_filing": {"form_type": "10-Q", "filing_date": "2023-05-05", "accession_number": "A-3"}
                }]
            }"#,
        )
        .unwrap();

        let batch = load_batch(&path).unwrap();
        assert_eq!(batch.facts.len(), 1);
        assert_eq!(batch.facts[0].unit, "USD");
        let fact = batch.facts[0].validate(0).unwrap();
        assert_eq!(fact.key.period.period_type, PeriodType::Quarterly);

        assert!(load_batch(dir.path().join("missing.json")).is_err());
    }
}
