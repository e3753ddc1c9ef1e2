use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

use ridelab::error::CalculationError;
use ridelab::{
    analyze_adaptation, analyze_durability, analyze_frontiers, init_logging, ActivityBatch,
    AdaptationEdgesResponse, AnalyticsConfig, AnalyticsError, DurabilityAnalysisResponse, Snapshot,
    SummaryBatch, TrainingFrontiersResponse,
};

/// ridelab - Cycling performance analytics
///
/// Reads normalized activity documents (JSON) and derives power frontiers,
/// durability, efficiency, repeatability, zone-dwell and training-block
/// analytics.
#[derive(Parser)]
#[command(name = "ridelab")]
#[command(author = "ridelab Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Cycling performance analytics", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Durability of each ride: segments, HR drift, fatigue efforts, score
    Durability(IoArgs),

    /// Power, throughput, fatigue, efficiency, repeatability and zone frontiers
    Frontiers(IoArgs),

    /// Hardest multi-day training blocks by TSS and kJ
    Adaptation(IoArgs),

    /// Show or initialize the configuration file
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct IoArgs {
    /// Input JSON document (stdin if omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file for JSON results (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Emit the condensed snapshot instead of the full response
    #[arg(long)]
    snapshot: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

impl IoArgs {
    /// Tables are printed for the terminal only; snapshots are always JSON
    fn prints_table(&self) -> bool {
        self.format == OutputFormat::Table && !self.snapshot
    }

    fn check(&self) -> Result<()> {
        match &self.output {
            Some(path) if self.prints_table() => anyhow::bail!(
                "--format table prints to the terminal only; use --format json to write {}",
                path.display()
            ),
            _ => Ok(()),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        let message = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<AnalyticsError>())
            .map(|e| e.user_message())
            .unwrap_or_else(|| format!("{:#}", err));
        eprintln!("{} {}", "error:".red().bold(), message);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AnalyticsConfig::load_from_file(path)?,
        None => AnalyticsConfig::load_or_default(),
    };

    let mut log_config = config.logging.clone();
    log_config.level = log_config.level.raised_by(cli.verbose);
    init_logging(&log_config).context("Failed to initialize logging")?;

    if cli.verbose > 0 {
        eprintln!("{}", format!("Log level: {}", log_config.level.to_filter()).dimmed());
    }

    match cli.command {
        Commands::Durability(io) => {
            io.check()?;
            let batch: ActivityBatch = read_document(io.input.as_deref())?;
            batch.validate()?;
            info!(activities = batch.activities.len(), "Running durability analysis");
            let response = analyze_durability(&batch, &config);
            emit(&io, &response, Snapshot::from(&response), print_durability)
        }

        Commands::Frontiers(io) => {
            io.check()?;
            let batch: ActivityBatch = read_document(io.input.as_deref())?;
            batch.validate()?;
            info!(activities = batch.activities.len(), "Running frontier analysis");
            let response = analyze_frontiers(&batch, &config);
            emit(&io, &response, Snapshot::from(&response), print_frontiers)
        }

        Commands::Adaptation(io) => {
            io.check()?;
            let batch: SummaryBatch = read_document(io.input.as_deref())?;
            batch.validate()?;
            info!(summaries = batch.summaries.len(), "Running adaptation analysis");
            let response = analyze_adaptation(&batch, &config);
            emit(&io, &response, Snapshot::from(&response), print_adaptation)
        }

        Commands::Config { init, force } => {
            let path = cli.config.unwrap_or_else(AnalyticsConfig::default_config_path);
            if init {
                if path.exists() && !force {
                    anyhow::bail!(
                        "Config file already exists: {} (use --force to overwrite)",
                        path.display()
                    );
                }
                let mut fresh = AnalyticsConfig::default();
                fresh.save_to_file(&path)?;
                println!("{} {}", "✓ Wrote default configuration to".green(), path.display());
            } else {
                println!("{}", format!("# {}", path.display()).dimmed());
                print!(
                    "{}",
                    toml::to_string_pretty(&config).context("Failed to serialize configuration")?
                );
            }
            Ok(())
        }
    }
}

fn read_document<T: DeserializeOwned>(input: Option<&Path>) -> Result<T> {
    let content = match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read input from stdin")?;
            buffer
        }
    };

    if content.trim().is_empty() {
        return Err(AnalyticsError::from(CalculationError::InsufficientData {
            calculation: "input".to_string(),
            reason: "the input document is empty".to_string(),
        })
        .into());
    }

    let document = serde_json::from_str(&content).map_err(AnalyticsError::from)?;
    Ok(document)
}

fn emit<T: Serialize>(io: &IoArgs, response: &T, snapshot: Snapshot, table: fn(&T)) -> Result<()> {
    if io.prints_table() {
        table(response);
        return Ok(());
    }

    let json = if io.snapshot {
        serde_json::to_string_pretty(&snapshot)
    } else {
        serde_json::to_string_pretty(response)
    }
    .context("Failed to serialize results")?;

    match &io.output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            eprintln!("{} {}", "✓ Results written to".green(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn opt(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", decimals, v))
}

fn hms(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn print_skipped(skipped: &[String]) {
    if !skipped.is_empty() {
        println!("{} {}", "Skipped:".yellow(), skipped.join(", "));
    }
}

#[derive(Tabled)]
struct RideRow {
    #[tabled(rename = "Activity")]
    activity: String,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Score")]
    score: u8,
    #[tabled(rename = "HR drift %")]
    drift: String,
    #[tabled(rename = "Late 20' W")]
    late: String,
    #[tabled(rename = "Durable TSS")]
    durable_tss: String,
}

fn print_durability(response: &DurabilityAnalysisResponse) {
    println!("{}", "Durability".blue().bold());
    let rows: Vec<RideRow> = response
        .rides
        .iter()
        .map(|ride| {
            let d = &ride.durability;
            RideRow {
                activity: d.activity_id.clone(),
                start: d.start_time.format("%Y-%m-%d %H:%M").to_string(),
                duration: hms(d.duration_sec),
                score: d.score,
                drift: opt(d.hr_drift_pct, 1),
                late: opt(d.best_late_effort.as_ref().map(|e| e.watts), 0),
                durable_tss: opt(d.durable_tss, 1),
            }
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    match response.mean_score {
        Some(mean) => {
            let text = format!("{:.1}", mean);
            let colored = if mean >= 80.0 {
                text.green()
            } else if mean >= 60.0 {
                text.yellow()
            } else {
                text.red()
            };
            println!("Mean score: {}", colored.bold());
        }
        None => println!("{}", "No rides analyzed".dimmed()),
    }
    print_skipped(&response.skipped_activities);
}

#[derive(Tabled)]
struct PowerRow {
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Watts")]
    watts: String,
    #[tabled(rename = "%FTP")]
    pct_ftp: String,
    #[tabled(rename = "W/kg")]
    watts_per_kg: String,
    #[tabled(rename = "Hull")]
    on_hull: String,
    #[tabled(rename = "Activity")]
    activity: String,
}

#[derive(Tabled)]
struct StreakRow {
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Band %FTP")]
    band: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Avg W")]
    watts: String,
    #[tabled(rename = "Activity")]
    activity: String,
}

fn print_frontiers(response: &TrainingFrontiersResponse) {
    let frontier = &response.frontier;
    println!(
        "{} ({} activities)",
        "Duration/power frontier".blue().bold(),
        frontier.activities_analyzed
    );
    let power_rows: Vec<PowerRow> = frontier
        .points
        .iter()
        .map(|p| PowerRow {
            duration: hms(f64::from(p.duration_sec)),
            watts: format!("{:.0}", p.watts),
            pct_ftp: opt(p.pct_ftp, 1),
            watts_per_kg: opt(p.watts_per_kg, 2),
            on_hull: if frontier.hull.iter().any(|h| h.duration_sec == p.duration_sec) {
                "●".to_string()
            } else {
                String::new()
            },
            activity: p.activity_id.clone(),
        })
        .collect();
    println!("{}", Table::new(power_rows).with(Style::rounded()));

    if let Some(peak) = &frontier.peak_kj_per_hour {
        println!(
            "Peak throughput: {} kJ/h over {} ({})",
            format!("{:.0}", peak.kj_per_hour).bold(),
            hms(f64::from(peak.window_sec)),
            peak.activity_id
        );
    }

    if !response.zone_streaks.is_empty() {
        println!("{}", "Longest zone streaks".blue().bold());
        let streak_rows: Vec<StreakRow> = response
            .zone_streaks
            .iter()
            .map(|s| StreakRow {
                zone: s.zone_key.clone(),
                band: format!("{:.0}-{:.0}", s.min_pct, s.max_pct),
                duration: hms(s.duration_sec),
                watts: opt(s.average_watts, 0),
                activity: s.activity_id.clone(),
            })
            .collect();
        println!("{}", Table::new(streak_rows).with(Style::rounded()));
    }

    for record in &response.repeatability_records {
        println!(
            "Repeatability {}: {} reps from {:.0}% FTP ({})",
            record.target_key.bold(),
            record.reps,
            record.first_rep_pct_ftp,
            record.activity_id
        );
    }
    println!(
        "{} fatigue efforts, {} efficiency windows, {} interval sequences",
        response.fatigue_efforts.len(),
        response.efficiency_windows.len(),
        response.repeatability_sequences.len()
    );
    print_skipped(&response.skipped_activities);
}

#[derive(Tabled)]
struct BlockRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Days")]
    days: u32,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Activities")]
    activities: usize,
}

fn print_adaptation(response: &AdaptationEdgesResponse) {
    match &response.ftp_estimate {
        Some(ftp) => println!("FTP: {} W ({:?})", format!("{:.0}", ftp.watts).bold(), ftp.source),
        None => println!("{}", "FTP: unknown, TSS blocks unavailable".yellow()),
    }
    println!("{} days of history", response.daily.len());

    let rows: Vec<BlockRow> = response
        .best_tss_blocks
        .iter()
        .chain(&response.best_kj_blocks)
        .map(|b| BlockRow {
            metric: format!("{:?}", b.metric).to_uppercase(),
            days: b.window_days,
            start: b.start.to_string(),
            end: b.end.to_string(),
            total: b.total_metric.round_dp(1).to_string(),
            activities: b.activity_ids.len(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_args(args: &[&str]) -> IoArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Durability(io) => io,
            _ => panic!("expected the durability subcommand"),
        }
    }

    #[test]
    fn test_table_with_output_file_is_rejected() {
        let io = io_args(&["ridelab", "durability", "--format", "table", "-o", "out.json"]);
        let err = io.check().unwrap_err();
        assert!(err.to_string().contains("out.json"));
    }

    #[test]
    fn test_output_targets_that_are_accepted() {
        assert!(io_args(&["ridelab", "durability", "--format", "table"]).check().is_ok());
        assert!(io_args(&["ridelab", "durability", "-o", "out.json"]).check().is_ok());
        let snapshot =
            io_args(&["ridelab", "durability", "-f", "table", "--snapshot", "-o", "s.json"]);
        assert!(!snapshot.prints_table());
        assert!(snapshot.check().is_ok());
    }
}
