use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use facet_timeline::{
    calculate_ratios, check_timeline, export_statements, list_entities, load_all_timelines,
    load_batch, load_timeline, open_database, record_change_report, save_timeline,
    verify_version_count, write_aggregates_csv, write_change_report_csv, AggregateOp,
    EntityManager, GicsTree, MarketCaps, NaturalKey, Period, PeriodSelector, PeriodType,
    ReconcileConfig, SectorManager, StatementType,
};

/// 📈 Facet Timeline - versioned SEC financial facts
#[derive(Debug, Parser)]
#[command(name = "facet-timeline", version, about = "Reconcile extracted SEC filing facts into per-company timelines")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "facet_timeline.db")]
    db: PathBuf,

    /// Reconciliation settings (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest filing batches (JSON) into the database
    Ingest {
        /// One FilingBatch JSON file per filing
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Entity the batches belong to (default: taken from the facts)
        #[arg(long)]
        entity: Option<String>,

        /// Write one change report CSV per filing into this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Show current values of one statement
    Query {
        entity: String,
        #[arg(long, value_parser = parse_statement)]
        statement: StatementType,
        #[arg(long)]
        period_end: Option<NaiveDate>,
        #[arg(long, value_parser = parse_period_type)]
        period_type: Option<PeriodType>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show every version of one fact
    History {
        entity: String,
        #[arg(long, value_parser = parse_statement)]
        statement: StatementType,
        #[arg(long)]
        line_item: String,
        #[arg(long)]
        period_start: Option<NaiveDate>,
        #[arg(long)]
        period_end: NaiveDate,
        #[arg(long, value_parser = parse_period_type)]
        period_type: PeriodType,
    },

    /// Export the six statement CSVs of an entity
    Export {
        entity: String,
        #[arg(long, default_value = "export")]
        out: PathBuf,
    },

    /// Compute financial ratios for one period
    Ratios {
        entity: String,
        #[arg(long)]
        period_end: NaiveDate,
        #[arg(long, value_parser = parse_period_type, default_value = "annual")]
        period_type: PeriodType,
    },

    /// Aggregate a line item across a GICS sector
    Aggregate {
        /// GICS mapping CSV
        #[arg(long)]
        gics: PathBuf,
        /// Constituents CSV (Symbol, GICS Sub-Industry)
        #[arg(long)]
        members: PathBuf,
        /// Any GICS code (sector, group, industry or sub-industry)
        #[arg(long)]
        sector: String,
        #[arg(long, value_parser = parse_statement)]
        statement: StatementType,
        #[arg(long)]
        line_item: String,
        #[arg(long)]
        period_end: NaiveDate,
        #[arg(long, value_parser = parse_period_type)]
        period_type: Option<PeriodType>,
        #[arg(long, value_enum, default_value_t = OpArg::Sum)]
        op: OpArg,
        /// JSON object {"TICKER": market_cap} for the weighted average
        #[arg(long)]
        market_caps: Option<PathBuf>,
        /// Also write the result as CSV
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List stored entities
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OpArg {
    Sum,
    Count,
    Weighted,
}

fn parse_statement(s: &str) -> std::result::Result<StatementType, String> {
    s.parse()
}

fn parse_period_type(s: &str) -> std::result::Result<PeriodType, String> {
    s.parse()
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReconcileConfig::from_file(path)?,
        None => ReconcileConfig::default(),
    };
    let conn = open_database(&cli.db)?;

    match cli.command {
        Command::Ingest {
            files,
            entity,
            report_dir,
        } => run_ingest(&conn, config, &files, entity.as_deref(), report_dir.as_deref()),
        Command::Query {
            entity,
            statement,
            period_end,
            period_type,
            json,
        } => run_query(&conn, config, &entity, statement, period_end, period_type, json),
        Command::History {
            entity,
            statement,
            line_item,
            period_start,
            period_end,
            period_type,
        } => {
            let start = match (period_type, period_start) {
                (PeriodType::AsOf, _) => period_end,
                (_, Some(start)) => start,
                (_, None) => bail!("--period-start is required for {} periods", period_type),
            };
            let key = NaturalKey::new(&entity, statement, &line_item, Period::new(start, period_end, period_type));
            run_history(&conn, &key)
        }
        Command::Export { entity, out } => run_export(&conn, &entity, &out),
        Command::Ratios {
            entity,
            period_end,
            period_type,
        } => run_ratios(&conn, &config, &entity, period_end, period_type),
        Command::Aggregate {
            gics,
            members,
            sector,
            statement,
            line_item,
            period_end,
            period_type,
            op,
            market_caps,
            out,
        } => {
            let op = match op {
                OpArg::Sum => AggregateOp::Sum,
                OpArg::Count => AggregateOp::Count,
                OpArg::Weighted => {
                    let path = market_caps.context("--market-caps is required for --op weighted")?;
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read market caps: {}", path.display()))?;
                    let caps: MarketCaps =
                        serde_json::from_str(&content).context("Failed to parse market caps JSON")?;
                    AggregateOp::WeightedAverage(caps)
                }
            };
            let selector = PeriodSelector::EndingOn {
                end: period_end,
                period_type,
            };
            run_aggregate(
                &conn, config, &gics, &members, &sector, statement, &line_item, &selector, &op,
                out.as_deref(),
            )
        }
        Command::Status => run_status(&conn, &config),
    }
}

fn run_ingest(
    conn: &Connection,
    config: ReconcileConfig,
    files: &[PathBuf],
    entity: Option<&str>,
    report_dir: Option<&Path>,
) -> Result<()> {
    println!("📥 Facet Timeline - Ingest");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut batches = Vec::new();
    for path in files {
        let batch = load_batch(path)?;
        let entity_id = match entity {
            Some(e) => e.to_string(),
            None => batch
                .entity_id()
                .map(|e| e.to_string())
                .with_context(|| format!("No entity_id in {}; pass --entity", path.display()))?,
        };
        batches.push((entity_id, batch));
    }
    println!("✓ Loaded {} filing batches", batches.len());

    let manager = EntityManager::from_timelines(load_all_timelines(conn)?, config);
    let results = manager.ingest_all(batches);

    if let Some(dir) = report_dir {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut touched = BTreeSet::new();
    let mut failures = 0;
    for (entity_id, result) in results {
        match result {
            Ok(report) => {
                println!("✓ {}", report.summary());
                for finding in &report.inconsistencies {
                    println!("  ⚠️  {}", finding.summary());
                }
                record_change_report(conn, &report)?;
                if let Some(dir) = report_dir {
                    let path = dir.join(format!(
                        "{}_{}_changes.csv",
                        entity_id, report.filing.accession_number
                    ));
                    let file = fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    write_change_report_csv(&report, file)?;
                }
                touched.insert(entity_id);
            }
            Err(e) => {
                failures += 1;
                eprintln!("❌ {}: {}", entity_id, e);
            }
        }
    }

    for entity_id in &touched {
        if let Some(timeline) = manager.snapshot(entity_id)? {
            let stats = save_timeline(conn, &timeline)?;
            println!(
                "💾 {}: +{} keys, +{} versions",
                entity_id, stats.keys_inserted, stats.versions_inserted
            );
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "✅ {} entities updated, {} batches failed, {} versions stored",
        touched.len(),
        failures,
        verify_version_count(conn, None)?
    );
    Ok(())
}

fn run_query(
    conn: &Connection,
    config: ReconcileConfig,
    entity: &str,
    statement: StatementType,
    period_end: Option<NaiveDate>,
    period_type: Option<PeriodType>,
    json: bool,
) -> Result<()> {
    let timeline = load_timeline(conn, entity)?.with_context(|| format!("No timeline for {}", entity))?;
    let manager = EntityManager::from_timelines(vec![timeline], config);

    let selector = match period_end {
        Some(end) => PeriodSelector::EndingOn { end, period_type },
        None => PeriodSelector::Any,
    };
    let facts = manager.query(entity, statement, &selector)?;
    let facts: Vec<_> = facts
        .into_iter()
        .filter(|f| period_type.map_or(true, |t| f.key.period.period_type == t))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
        return Ok(());
    }

    println!("📊 {} {} ({} facts)", entity, statement, facts.len());
    for fact in &facts {
        println!(
            "  {:<50} {:<28} {:>18.2} {}  [{} | v{}]",
            fact.key.line_item,
            fact.key.period.to_string(),
            fact.value,
            fact.unit,
            fact.source.accession_number,
            fact.version_count
        );
    }
    Ok(())
}

fn run_history(conn: &Connection, key: &NaturalKey) -> Result<()> {
    let timeline = load_timeline(conn, &key.entity_id)?
        .with_context(|| format!("No timeline for {}", key.entity_id))?;
    let chain = timeline
        .chain(key)
        .with_context(|| format!("No versions for {}", key))?;

    println!("⏰ {}", key);
    for (index, version) in chain.versions().iter().enumerate() {
        let status = match chain.superseded_by(index) {
            Some(next) => format!("superseded by {}", next.accession_number),
            None => "current".to_string(),
        };
        println!(
            "  v{} {:>18.2} {}  {}  ({})",
            index + 1,
            version.value,
            version.unit,
            version.source,
            status
        );
    }
    println!("  last confirmed by {}", chain.last_confirmed());
    Ok(())
}

fn run_export(conn: &Connection, entity: &str, out: &Path) -> Result<()> {
    let timeline = load_timeline(conn, entity)?.with_context(|| format!("No timeline for {}", entity))?;
    let files = export_statements(&timeline, out)?;
    for file in files {
        println!("✓ {}", file.display());
    }
    Ok(())
}

fn run_ratios(
    conn: &Connection,
    config: &ReconcileConfig,
    entity: &str,
    period_end: NaiveDate,
    period_type: PeriodType,
) -> Result<()> {
    let timeline = load_timeline(conn, entity)?.with_context(|| format!("No timeline for {}", entity))?;
    let ratios = calculate_ratios(&timeline, period_end, period_type, config);
    println!("{}", serde_json::to_string_pretty(&ratios)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_aggregate(
    conn: &Connection,
    config: ReconcileConfig,
    gics: &Path,
    members: &Path,
    sector: &str,
    statement: StatementType,
    line_item: &str,
    selector: &PeriodSelector,
    op: &AggregateOp,
    out: Option<&Path>,
) -> Result<()> {
    let mut sectors = SectorManager::new(GicsTree::load_csv(gics)?);
    let membership = sectors.load_members_csv(members)?;
    println!("✓ {} members assigned", membership.assigned);
    for (sub_industry, symbols) in &membership.unmatched {
        println!("  ⚠️  Unknown sub-industry '{}': {}", sub_industry, symbols.join(", "));
    }

    let manager = EntityManager::from_timelines(load_all_timelines(conn)?, config);
    let result = sectors.aggregate(&manager, sector, statement, line_item, selector, op)?;

    println!("➕ {}", result.summary());
    for missing in result.missing() {
        println!("  ⚠️  {} ({})", missing.entity_id, missing.reason.as_str());
    }

    if let Some(path) = out {
        let file = fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        write_aggregates_csv(std::slice::from_ref(&result), file)?;
        println!("✓ {}", path.display());
    }
    Ok(())
}

fn run_status(conn: &Connection, config: &ReconcileConfig) -> Result<()> {
    println!("📈 Facet Timeline v{}", facet_timeline::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let ids = list_entities(conn)?;
    if ids.is_empty() {
        println!("No entities stored yet. Run: facet-timeline ingest <batch.json>");
        return Ok(());
    }

    for entity_id in ids {
        if let Some(timeline) = load_timeline(conn, &entity_id)? {
            let open_findings = check_timeline(&timeline, config, "status").len();
            println!(
                "{:<8} {:<12} rev {:<4} {:>6} keys {:>7} versions {:>4} filings {:>3} inconsistencies ({} open)",
                entity_id,
                timeline.state().as_str(),
                timeline.revision(),
                timeline.key_count(),
                timeline.version_count(),
                timeline.filings().len(),
                timeline.inconsistencies().len(),
                open_findings
            );
        }
    }
    Ok(())
}
