//! Listen Analyzer — batch runner for listening-experiment analysis.
//!
//! Reads listening events as JSON lines, runs the full pipeline and writes the
//! user metrics table, the variant summary and the decision record.

use anyhow::Context;
use clap::Parser;
use listen_analysis::run_pipeline;
use listen_core::{AnalysisConfig, ListenEvent};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "listen-analyzer")]
#[command(about = "Session, engagement and ship/no-ship analysis for listening experiments")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables override it)
    #[arg(long, env = "LISTEN_LAB_CONFIG")]
    config: Option<PathBuf>,

    /// Listening events, one JSON object per line
    #[arg(long)]
    events: PathBuf,

    /// Directory receiving the JSON outputs
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Control allocation (overrides config)
    #[arg(long)]
    control_allocation: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "listen_analyzer=info,listen_analysis=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AnalysisConfig::load(cli.config.as_deref())
        .context("failed to load analysis configuration")?;
    if let Some(allocation) = cli.control_allocation {
        config.experiment.control_allocation = allocation;
    }
    info!(
        experiment_id = %config.experiment.experiment_id,
        start_date = %config.experiment.start_date,
        end_date = %config.experiment.end_date,
        control_allocation = config.experiment.control_allocation,
        "Configuration loaded"
    );

    let events = read_events(&cli.events)?;
    let output = run_pipeline(&events, &config)?;

    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("failed to create {}", cli.output_dir.display()))?;
    write_json(&cli.output_dir.join("user_metrics.json"), &output.user_metrics)?;
    write_json(&cli.output_dir.join("variant_summary.json"), &output.variant_summary)?;
    write_json(&cli.output_dir.join("decision.json"), &output.decision)?;

    let decision = &output.decision;
    info!(
        verdict = decision.verdict(),
        confidence = ?decision.confidence,
        primary_metric = %decision.primary_metric,
        primary_lift = decision.primary_metric_lift.unwrap_or_default(),
        degraded = ?decision.degraded_guardrails,
        output_dir = %cli.output_dir.display(),
        "Analysis written"
    );
    Ok(())
}

/// Parse events line by line; any malformed line aborts the run.
fn read_events(path: &Path) -> anyhow::Result<Vec<ListenEvent>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ListenEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid listening event", path.display(), idx + 1))?;
        events.push(event);
    }
    info!(path = %path.display(), events = events.len(), "Events loaded");
    Ok(events)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
