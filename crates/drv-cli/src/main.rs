//! drv CLI
//!
//! Offline tools over the deterministic half of the verifier. Every command
//! reads JSON (or raw collaborator text) from a file or `-` for stdin and
//! prints JSON to stdout.
//!
//! # Commands
//!
//! - `fuse-track`: gate two detectors' per-frame boxes into an object track
//! - `fuse-interval`: intersect two temporal groundings
//! - `select-frames`: pick the frames a causal caption would see
//! - `route`: show the stage plan and claim/event matches for a classification
//! - `parse`: parse raw collaborator output the way the pipeline does
//! - `config`: validate a runtime configuration, or print the defaults

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

use drv_core::{
    fuse_groundings, fuse_track, match_event_for_claim, parse_classification, parse_consistency,
    parse_structured, select_interval_frames, Detection, GroundingObservation,
    HallucinationAssessment, RoutingPlan, StructuredFeedback, TimeInterval,
    MAX_CAUSAL_FRAMES,
};
use drv_runtime::{ProviderRegistry, RuntimeConfig};

#[derive(Parser)]
#[command(name = "drv")]
#[command(version)]
#[command(about = "Offline evidence fusion and claim routing for video-answer verification")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Compact JSON instead of pretty-printed
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuse per-frame detections from two detectors into a track
    ///
    /// Input: {"class_conditioned": [Detection|null], "grounded": [Detection|null], "timestamps": [f64]}
    FuseTrack {
        /// JSON input file, or - for stdin
        input: PathBuf,
    },

    /// Intersect two temporal grounding observations
    ///
    /// Input: {"primary": {"intervals": [[start, end]], "confidence": f64|null},
    ///         "secondary": {...}}
    FuseInterval {
        input: PathBuf,
    },

    /// Select the sampled frames a causal caption covers
    ///
    /// Input: {"timestamps": [f64], "interval": [start, end]}
    SelectFrames {
        input: PathBuf,

        /// Frame cap for long intervals
        #[arg(long, default_value_t = MAX_CAUSAL_FRAMES)]
        max: usize,
    },

    /// Show which stages a classification routes through
    ///
    /// Input: raw classifier output (JSON, optionally fenced)
    Route {
        input: PathBuf,
    },

    /// Parse raw collaborator output
    Parse {
        #[arg(long, value_enum)]
        kind: ParseKind,

        input: PathBuf,
    },

    /// Validate a YAML runtime configuration, or print the defaults
    Config {
        /// YAML file to validate; omit to print the default configuration
        file: Option<PathBuf>,

        /// Also check each text role's provider settings and API key
        #[arg(long)]
        providers: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParseKind {
    Classification,
    Consistency,
    Assessment,
    Feedback,
}

#[derive(Debug, Deserialize)]
struct TrackInput {
    class_conditioned: Vec<Option<Detection>>,
    grounded: Vec<Option<Detection>>,
    timestamps: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct IntervalInput {
    primary: GroundingObservation,
    secondary: GroundingObservation,
}

#[derive(Debug, Deserialize)]
struct FrameSelectionInput {
    timestamps: Vec<f64>,
    interval: TimeInterval,
}

#[derive(Debug, Serialize)]
struct ClaimRoute<'a> {
    claim: &'a str,
    event: Option<&'a str>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = match cli.command {
        Commands::Config { file, providers } => {
            let yaml = config_command(file.as_deref(), providers)?;
            print!("{}", yaml);
            return Ok(());
        }
        Commands::FuseTrack { input } => fuse_track_command(&read_input(&input)?)?,
        Commands::FuseInterval { input } => fuse_interval_command(&read_input(&input)?)?,
        Commands::SelectFrames { input, max } => {
            select_frames_command(&read_input(&input)?, max)?
        }
        Commands::Route { input } => route_command(&read_input(&input)?)?,
        Commands::Parse { kind, input } => parse_command(kind, &read_input(&input)?)?,
    };

    let rendered = if cli.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{}", rendered);
    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn fuse_track_command(raw: &str) -> Result<JsonValue> {
    let input: TrackInput = serde_json::from_str(raw).context("Invalid fuse-track input")?;
    let track = fuse_track(&input.class_conditioned, &input.grounded, &input.timestamps);
    tracing::info!(frames = input.timestamps.len(), agreed = track.len(), "Fused track");
    Ok(serde_json::to_value(track)?)
}

fn fuse_interval_command(raw: &str) -> Result<JsonValue> {
    let input: IntervalInput = serde_json::from_str(raw).context("Invalid fuse-interval input")?;
    let fused = fuse_groundings(&input.primary, &input.secondary);
    Ok(serde_json::to_value(fused)?)
}

fn select_frames_command(raw: &str, max: usize) -> Result<JsonValue> {
    let input: FrameSelectionInput =
        serde_json::from_str(raw).context("Invalid select-frames input")?;
    let indices = select_interval_frames(&input.timestamps, input.interval, max);
    let timestamps: Vec<f64> = indices.iter().map(|&i| input.timestamps[i]).collect();
    Ok(json!({ "indices": indices, "timestamps": timestamps }))
}

fn route_command(raw: &str) -> Result<JsonValue> {
    let mut classification = parse_classification(raw).unwrap_or_else(|reason| {
        tracing::warn!(reason, "Classification unparseable, routing the default");
        Default::default()
    });
    classification.entities.dedup();

    let plan = RoutingPlan::from_classification(&classification);
    let entities = &classification.entities;
    let claims: Vec<ClaimRoute<'_>> = entities
        .causal_claims
        .iter()
        .map(|claim| ClaimRoute {
            claim,
            event: match_event_for_claim(claim, entities.events.iter().map(String::as_str)),
        })
        .collect();

    Ok(json!({
        "plan": plan,
        "stages": plan.stages(),
        "claims": claims,
    }))
}

fn parse_command(kind: ParseKind, raw: &str) -> Result<JsonValue> {
    let value = match kind {
        ParseKind::Classification => serde_json::to_value(parse_classification(raw))?,
        ParseKind::Consistency => serde_json::to_value(parse_consistency(raw))?,
        ParseKind::Assessment => {
            serde_json::to_value(parse_structured::<HallucinationAssessment>(raw))?
        }
        ParseKind::Feedback => serde_json::to_value(parse_structured::<StructuredFeedback>(raw))?,
    };
    Ok(value)
}

fn config_command(file: Option<&Path>, providers: bool) -> Result<String> {
    let config = match file {
        Some(path) => {
            let config = RuntimeConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            tracing::info!(path = %path.display(), "Configuration is valid");
            config
        }
        None => RuntimeConfig::default(),
    };
    if providers {
        config
            .validate_providers(&ProviderRegistry::with_defaults())
            .context("Provider settings are incomplete")?;
    }
    Ok(config.to_yaml()?)
}
