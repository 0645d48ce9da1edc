mod config;
mod io;
mod summary;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;

use driftwall_core::{
    Aggregation, Backend, Diagnostics, Direction, DriftAnalyzer, DriftCounts, DriftMetrics,
    DriftOptions, Episode, PointFilter, Predictions, Snapshot, WallQuery, WallReport,
};
use driftwall_store::open_store;

use crate::config::{load_config, show_config_path, Config};
use crate::io::{read_json, write_json};

#[derive(Parser)]
#[command(
    name = "driftwall",
    version,
    about = "Belief drift and capacity wall analysis for agent evaluation runs"
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count belief drift over a set of episodes
    Drift {
        /// Episodes file (JSON array)
        #[arg(short, long)]
        episodes: PathBuf,

        /// Predictions file (object: query_id -> value)
        #[arg(short, long)]
        predictions: Option<PathBuf>,

        /// Retrieval diagnostics file (object: query_id -> flags)
        #[arg(short, long)]
        diagnostics: Option<PathBuf>,

        /// Score queries that have no diagnostic entry
        #[arg(long)]
        assume_gold_present: bool,

        /// Analyze episodes in parallel
        #[arg(long)]
        parallel: bool,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Find the threshold crossing across a parameter sweep
    Wall {
        /// Run summaries (files, or directories containing summary.json)
        #[arg(required = true)]
        summaries: Vec<PathBuf>,

        /// Dotted path of the swept parameter
        #[arg(short, long)]
        param_key: String,

        /// Dotted path of the metric
        #[arg(short, long)]
        metric_path: String,

        /// Acceptability threshold
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Crossing direction
        #[arg(short, long)]
        direction: Option<CliDirection>,

        /// How to collapse repeated runs at the same parameter
        #[arg(long)]
        mode: Option<CliMode>,

        /// Only keep points with this state mode
        #[arg(long)]
        state_mode: Option<String>,

        /// Only keep points with this distractor profile
        #[arg(long)]
        distractor_profile: Option<String>,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Rebuild state from an event log and print the snapshot
    Replay {
        /// Event log (JSON array, or a snapshot object with an `events` field)
        #[arg(short, long)]
        events: PathBuf,

        /// Store backend (defaults to the configured one)
        #[arg(short, long)]
        backend: Option<CliBackend>,

        /// Write the snapshot here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show the active configuration
    Config,
}

#[derive(Clone, ValueEnum)]
enum CliDirection {
    Gte,
    Lte,
}

impl From<CliDirection> for Direction {
    fn from(val: CliDirection) -> Self {
        match val {
            CliDirection::Gte => Direction::Gte,
            CliDirection::Lte => Direction::Lte,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum CliMode {
    Max,
    Min,
    None,
}

impl From<CliMode> for Aggregation {
    fn from(val: CliMode) -> Self {
        match val {
            CliMode::Max => Aggregation::Max,
            CliMode::Min => Aggregation::Min,
            CliMode::None => Aggregation::None,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum CliBackend {
    Current,
    Experimental,
}

impl From<CliBackend> for Backend {
    fn from(val: CliBackend) -> Self {
        match val {
            CliBackend::Current => Backend::Current,
            CliBackend::Experimental => Backend::Experimental,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Drift {
            episodes,
            predictions,
            diagnostics,
            assume_gold_present,
            parallel,
            out,
        } => {
            let options = DriftOptions {
                assume_gold_present: assume_gold_present || config.drift.assume_gold_present,
            };
            let report = cmd_drift(
                &episodes,
                predictions.as_deref(),
                diagnostics.as_deref(),
                options,
                parallel || config.drift.parallel,
            )?;
            emit(&report, out.as_deref())
        }
        Commands::Wall {
            summaries,
            param_key,
            metric_path,
            threshold,
            direction,
            mode,
            state_mode,
            distractor_profile,
            out,
        } => {
            let Some(threshold) = threshold.or(config.wall.threshold) else {
                bail!("--threshold is required (or set [wall] threshold in the config file)");
            };
            let query = WallQuery {
                metric_path,
                param_key,
                threshold,
                direction: direction.map_or(config.wall.direction, Into::into),
                aggregation: mode.map_or(config.wall.mode, Into::into),
                filter: PointFilter {
                    state_mode,
                    distractor_profile,
                },
            };
            let report = cmd_wall(&summaries, &query)?;
            eprintln!("{report}");
            emit(&report, out.as_deref())
        }
        Commands::Replay {
            events,
            backend,
            out,
        } => {
            let backend = backend.map_or(config.store.backend, Into::into);
            let snapshot = cmd_replay(&events, backend)?;
            emit(&snapshot, out.as_deref())
        }
        Commands::Config => cmd_config(cli.config.as_deref(), &config),
    }
}

/// Print JSON to stdout, or write it to `out`.
fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            write_json(path, value)?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DriftReport {
    episodes: usize,
    counts: DriftCounts,
    metrics: DriftMetrics,
}

fn cmd_drift(
    episodes_path: &Path,
    predictions_path: Option<&Path>,
    diagnostics_path: Option<&Path>,
    options: DriftOptions,
    parallel: bool,
) -> Result<DriftReport> {
    let episodes: Vec<Episode> = read_json(episodes_path)?;
    let predictions: Predictions = match predictions_path {
        Some(p) => read_json(p)?,
        None => Predictions::new(),
    };
    let diagnostics: Diagnostics = match diagnostics_path {
        Some(p) => read_json(p)?,
        None => Diagnostics::new(),
    };
    if diagnostics.is_empty() && !options.assume_gold_present {
        tracing::warn!("no retrieval diagnostics given; every step is unscoreable");
    }

    let analyzer = DriftAnalyzer::new(&predictions, &diagnostics).with_options(options);
    let counts = if parallel {
        analyzer.analyze_parallel(&episodes)
    } else {
        analyzer.analyze(&episodes)
    };

    Ok(DriftReport {
        episodes: episodes.len(),
        counts,
        metrics: counts.metrics(),
    })
}

fn cmd_wall(summaries: &[PathBuf], query: &WallQuery) -> Result<WallReport> {
    let points = summary::load_points(summaries, &query.param_key, &query.metric_path)?;
    if points.is_empty() {
        tracing::warn!("no usable points in {} summaries", summaries.len());
    }
    query.run(points).context("wall search failed")
}

/// Accept either a bare event array or a document carrying `events`.
fn raw_events(doc: Value) -> Result<Vec<Value>> {
    match doc {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(items)) => Ok(items),
            _ => bail!("expected an `events` array in the log document"),
        },
        _ => bail!("expected a JSON array of events"),
    }
}

fn cmd_replay(events_path: &Path, backend: Backend) -> Result<Snapshot> {
    let raw = raw_events(read_json(events_path)?)?;
    let mut store = open_store(backend).context("failed to open state store")?;
    let skipped = store.replay_raw(&raw).context("replay failed")?;
    if skipped > 0 {
        tracing::warn!("skipped {skipped} malformed entries in {}", events_path.display());
    }
    Ok(store.snapshot()?)
}

fn cmd_config(explicit: Option<&Path>, config: &Config) -> Result<()> {
    println!("Config: {}", show_config_path(explicit));
    println!();
    println!("[store]");
    println!("backend = \"{}\"", config.store.backend);
    println!();
    println!("[drift]");
    println!("assume_gold_present = {}", config.drift.assume_gold_present);
    println!("parallel = {}", config.drift.parallel);
    println!();
    println!("[wall]");
    println!("direction = \"{}\"", config.wall.direction);
    println!("mode = \"{}\"", config.wall.mode);
    match config.wall.threshold {
        Some(t) => println!("threshold = {t}"),
        None => println!("# threshold = (unset)"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_raw_events_shapes() {
        assert_eq!(raw_events(json!([1, 2])).unwrap().len(), 2);
        assert_eq!(raw_events(json!({"events": [{}]})).unwrap().len(), 1);
        assert!(raw_events(json!({"records": []})).is_err());
        assert!(raw_events(json!("nope")).is_err());
    }

    #[test]
    fn test_cmd_drift_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let episodes = dir.path().join("episodes.json");
        let predictions = dir.path().join("predictions.json");
        let diagnostics = dir.path().join("diagnostics.json");
        write_json(
            &episodes,
            &json!([{
                "episode_id": "ep1",
                "queries": [
                    {"query_id": "q1", "key": "tag.01", "gold": "A", "step": 1},
                    {"query_id": "q2", "key": "tag.01", "gold": "B", "step": 2},
                    {"query_id": "q3", "key": "tag.01", "gold": "C", "step": 3}
                ]
            }]),
        )
        .unwrap();
        write_json(&predictions, &json!({"q1": "X", "q2": "X", "q3": "C"})).unwrap();
        write_json(
            &diagnostics,
            &json!({
                "q1": {"gold_missing": false},
                "q2": {"correct_included": true},
                "q3": {}
            }),
        )
        .unwrap();

        for parallel in [false, true] {
            let report = cmd_drift(
                &episodes,
                Some(&predictions),
                Some(&diagnostics),
                DriftOptions::default(),
                parallel,
            )
            .unwrap();
            assert_eq!(report.counts.steps_total, 3);
            assert_eq!(report.counts.steps_drift, 2);
            assert_eq!(report.metrics.run_rate, Some(1.0));
        }
    }

    #[test]
    fn test_cmd_wall_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, (steps, rate)) in [(80, 0.02), (120, 0.08), (160, 0.12), (120, 0.01)]
            .into_iter()
            .enumerate()
        {
            let run = dir.path().join(format!("run{i}"));
            write_json(
                &run.join("summary.json"),
                &json!({"steps": steps, "drift": {"step_rate": rate}}),
            )
            .unwrap();
            paths.push(run);
        }

        let query = WallQuery::new("drift.step_rate", "steps", 0.1);
        let report = cmd_wall(&paths, &query).unwrap();
        assert_eq!(report.points.len(), 3);
        assert_eq!(report.last_ok.as_ref().unwrap().param, 120.0);
        assert_eq!(report.last_ok.as_ref().unwrap().metric, 0.08);
        assert_eq!(report.wall.as_ref().unwrap().param, 160.0);

        let out = dir.path().join("wall.json");
        write_json(&out, &report).unwrap();
        let back: WallReport = read_json(&out).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_cmd_replay_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.json");
        write_json(
            &log,
            &json!([
                {"op": "set", "key": "a", "value": 1, "entity_id": "e1", "seq": 1},
                {"op": "set", "key": "b", "value": "x", "entity_id": "e2", "seq": 2},
                {"bogus": true},
                {"op": "clear", "key": "a", "entity_id": "e1", "seq": 3}
            ]),
        )
        .unwrap();

        for backend in [Backend::Current, Backend::Experimental] {
            let snap = cmd_replay(&log, backend).unwrap();
            assert_eq!(snap.backend, backend);
            assert_eq!(snap.events.len(), 3);
            assert_eq!(serde_json::to_value(&snap.active).unwrap(), json!({"b": "x"}));
        }
    }
}
