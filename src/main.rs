//! gridkey CLI
//!
//! Command-line interface for a configured index:
//! - Show insertion keys for a point or box
//! - Plan the key ranges for a query
//! - List natural split points
//! - Insert into and query the reference SQLite store

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use gridkey::config::{generate_default_config, Config, LoggingConfig};
use gridkey::dimension::{DimensionKind, NumericDimensionDefinition};
use gridkey::index::{ByteArrayId, IndexStrategy, NumericIndexStrategy};
use gridkey::numeric::{BasicNumericDataset, NumericRange};
use gridkey::query::{Constraints, QueryPlanner, TemporalConstraints, TemporalRange};
use gridkey::scan::{distinct_entries, IndexWriter, ScanCoordinator, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "gridkey")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-dimensional keys and range decomposition for ordered stores")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print insertion keys for a point or box
    Keys {
        #[command(flatten)]
        location: Location,
    },

    /// Plan the key ranges a query must scan
    Ranges {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List the index's natural split points
    Splits,

    /// Write a value into the reference store
    Insert {
        /// Data id of the entry
        data_id: String,
        /// Value to store
        value: String,
        #[command(flatten)]
        location: Location,
        /// Data type the entry belongs to
        #[arg(long, default_value = "default")]
        adapter: String,
    },

    /// Query the reference store
    Query {
        #[command(flatten)]
        query: QueryArgs,
        /// Restrict to these data types
        #[arg(long)]
        adapter: Vec<String>,
    },

    /// Print a default config file
    InitConfig,
}

#[derive(clap::Args)]
pub struct Location {
    /// Longitude or MIN:MAX
    #[arg(long, allow_hyphen_values = true)]
    pub lon: String,
    /// Latitude or MIN:MAX
    #[arg(long, allow_hyphen_values = true)]
    pub lat: String,
    /// RFC 3339 instant or START/END
    #[arg(long)]
    pub time: Option<String>,
}

#[derive(clap::Args)]
pub struct QueryArgs {
    /// Bounding box as WEST,SOUTH,EAST,NORTH
    #[arg(long, allow_hyphen_values = true)]
    pub bbox: String,
    /// Time windows as START/END, repeatable
    #[arg(long)]
    pub time: Vec<String>,
    /// Accept any time on a temporal index
    #[arg(long)]
    pub all_time: bool,
    /// Override the configured range budget
    #[arg(long)]
    pub max_ranges: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    let json = match cli.format.as_str() {
        "json" => true,
        "text" => false,
        other => bail!("unknown output format: {}", other),
    };

    match cli.command {
        Commands::InitConfig => {
            print!("{}", generate_default_config());
        }

        Commands::Keys { location } => {
            let strategy = config.index.build_strategy()?;
            let data = location_dataset(&strategy, &location)?;
            let ids = strategy.insertion_ids(&data)?;
            let hex: Vec<String> = ids.iter().map(ByteArrayId::to_hex).collect();
            if json {
                let out = serde_json::json!({ "index": strategy.id(), "keys": hex });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if hex.is_empty() {
                println!("No keys (data spans an entire unbounded dimension)");
            } else {
                for key in hex {
                    println!("{}", key);
                }
            }
        }

        Commands::Ranges { query } => {
            let strategy = config.index.build_strategy()?;
            let planner = QueryPlanner::new(query.max_ranges.unwrap_or(config.scan.max_ranges));
            let plan = planner.plan(&strategy, &query_constraints(&query)?, &[])?;
            if json {
                let ranges: Vec<serde_json::Value> = plan
                    .ranges
                    .iter()
                    .map(|r| {
                        serde_json::json!({ "start": r.start().to_hex(), "end": r.end().to_hex() })
                    })
                    .collect();
                let out = serde_json::json!({
                    "index": plan.index_id,
                    "regions": plan.regions.len(),
                    "ranges": ranges,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Index: {}", plan.index_id);
                println!("Regions: {}", plan.regions.len());
                println!("Ranges: {}", plan.ranges.len());
                for range in &plan.ranges {
                    println!("  {}", range);
                }
            }
        }

        Commands::Splits => {
            let strategy = config.index.build_strategy()?;
            let splits: Vec<String> = strategy
                .natural_split_points()
                .iter()
                .map(ByteArrayId::to_hex)
                .collect();
            if json {
                let out = serde_json::json!({ "index": strategy.id(), "splits": splits });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} split points", splits.len());
                for split in splits {
                    println!("  {}", split);
                }
            }
        }

        Commands::Insert {
            data_id,
            value,
            location,
            adapter,
        } => {
            let strategy = Arc::new(config.index.build_strategy()?);
            let data = location_dataset(&strategy, &location)?;
            let store = Arc::new(open_store(&config.store.data_dir)?);
            let writer = IndexWriter::new(store.clone(), strategy);
            let ids =
                writer.write(adapter.as_bytes(), data_id.as_bytes(), &data, value.as_bytes())?;
            store.checkpoint()?;
            if json {
                let hex: Vec<String> = ids.iter().map(ByteArrayId::to_hex).collect();
                let out = serde_json::json!({ "data_id": data_id, "keys": hex });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Wrote {} under {} keys", data_id, ids.len());
            }
        }

        Commands::Query { query, adapter } => {
            let strategy = config.index.build_strategy()?;
            let planner = QueryPlanner::new(query.max_ranges.unwrap_or(config.scan.max_ranges));
            let plan = planner.plan(&strategy, &query_constraints(&query)?, &[])?;

            let store = Arc::new(open_store(&config.store.data_dir)?);
            let coordinator = ScanCoordinator::new(store).with_adapters(
                adapter
                    .iter()
                    .map(|a| ByteArrayId::from(a.as_bytes()))
                    .collect(),
            );
            let splits = coordinator.assign(&plan, config.scan.workers)?;
            let entries = distinct_entries(coordinator.collect(splits).await?);

            if json {
                let rows: Vec<serde_json::Value> = entries
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "adapter": String::from_utf8_lossy(e.key.adapter_id.as_bytes()),
                            "data_id": String::from_utf8_lossy(e.key.data_id.as_bytes()),
                            "value": String::from_utf8_lossy(&e.value),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:<20} {:<12} {}", "Data id", "Adapter", "Value");
                println!("{}", "-".repeat(50));
                for e in &entries {
                    println!(
                        "{:<20} {:<12} {}",
                        String::from_utf8_lossy(e.key.data_id.as_bytes()),
                        String::from_utf8_lossy(e.key.adapter_id.as_bytes()),
                        String::from_utf8_lossy(&e.value)
                    );
                }
                println!();
                println!("{} entries from {} ranges", entries.len(), plan.ranges.len());
            }
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gridkey={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(config.file.is_none())
                    .with_writer(writer),
            )
            .init();
    }
    Ok(())
}

fn open_store(data_dir: &str) -> anyhow::Result<SqliteStore> {
    let dir = match data_dir.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .ok_or_else(|| anyhow!("cannot resolve home directory"))?
            .join(rest),
        None => PathBuf::from(data_dir),
    };
    SqliteStore::open(Path::new(&dir))
        .with_context(|| format!("opening store in {}", dir.display()))
}

fn parse_number_range(s: &str) -> anyhow::Result<NumericRange> {
    // Split on the separator, not a leading minus sign
    let parts: Vec<&str> = s.splitn(2, ':').collect();
    let min: f64 = parts[0].trim().parse().with_context(|| format!("invalid number: {}", s))?;
    let max: f64 = match parts.get(1) {
        Some(max) => max.trim().parse().with_context(|| format!("invalid number: {}", s))?,
        None => min,
    };
    NumericRange::try_new(min, max).ok_or_else(|| anyhow!("invalid range: {}", s))
}

fn parse_instant(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s.trim())
        .with_context(|| format!("invalid RFC 3339 time: {}", s))?
        .with_timezone(&Utc))
}

fn parse_time_range(s: &str) -> anyhow::Result<TemporalRange> {
    let (start, end) = match s.split_once('/') {
        Some((start, end)) => (parse_instant(start)?, parse_instant(end)?),
        None => {
            let instant = parse_instant(s)?;
            (instant, instant)
        }
    };
    TemporalRange::new(start, end).ok_or_else(|| anyhow!("time range ends before it starts: {}", s))
}

/// Dataset in the strategy's dimension order
fn location_dataset(
    strategy: &IndexStrategy,
    location: &Location,
) -> anyhow::Result<BasicNumericDataset> {
    let mut ranges = Vec::new();
    for dim in strategy.ordered_dimensions() {
        let range = match dim.kind() {
            DimensionKind::Longitude => parse_number_range(&location.lon)?,
            DimensionKind::Latitude => parse_number_range(&location.lat)?,
            DimensionKind::Time => match &location.time {
                Some(time) => parse_time_range(time)?.to_numeric(),
                None => bail!("index {} needs --time", strategy.id()),
            },
            DimensionKind::Custom(name) => bail!("no input for custom dimension {}", name),
        };
        ranges.push(range);
    }
    Ok(BasicNumericDataset::new(ranges))
}

fn query_constraints(query: &QueryArgs) -> anyhow::Result<Constraints> {
    let parts: Vec<f64> = query
        .bbox
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid bbox: {}", query.bbox))?;
    let [west, south, east, north] = parts[..] else {
        bail!("bbox needs four values: {}", query.bbox);
    };
    let mut constraints = Constraints::from_bbox(west, south, east, north)?;

    if query.all_time {
        constraints = constraints.merge(&Constraints::new().with_unbounded(DimensionKind::Time));
    } else if !query.time.is_empty() {
        let mut temporal = TemporalConstraints::new();
        for window in &query.time {
            temporal.add(parse_time_range(window)?);
        }
        constraints = constraints.merge(&temporal.to_constraints());
    }
    Ok(constraints)
}
