use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use vietlott_db::db::db_path;
use vietlott_db::models::{PredictionCycle, Session, Variant};
use vietlott_db::retry::RetryConfig;
use vietlott_db::store::{ResultsStore, SqliteStore, DEFAULT_BUSY_TIMEOUT};
use vietlott_ensemble::artifacts::FsArtifactStore;
use vietlott_ensemble::config::VariantConfig;
use vietlott_ensemble::cycle::retrain::RetrainDecision;
use vietlott_ensemble::pipeline::Pipeline;
use vietlott_ensemble::{display, import};

#[derive(Parser)]
#[command(name = "vietlott", about = "Vietlott ensemble predictions and cycle tracking")]
struct Cli {
    /// SQLite database (default: ./data/vietlott.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Model artifact directory
    #[arg(long, global = true, default_value = "artifacts")]
    artifacts: PathBuf,

    /// JSON file with per-variant config overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import draws from a CSV file
    Import {
        #[arg(short, long)]
        variant: Variant,
        /// draw_id,draw_date,session,numbers,special,jackpot_amount
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Train the sequence, feature and transition models
    Train {
        /// All variants when omitted
        #[arg(short, long)]
        variant: Option<Variant>,
    },

    /// Predict for the active cycle
    Generate {
        /// All variants when omitted
        #[arg(short, long)]
        variant: Option<Variant>,
    },

    /// Compare the active prediction with a drawn result
    Check {
        #[arg(short, long)]
        variant: Variant,
        #[arg(short, long)]
        draw_id: String,
        /// AM or PM, Lotto 5/35 only
        #[arg(short, long)]
        session: Option<Session>,
    },

    /// Evaluate a cycle and shift the weights when it underperformed
    Evaluate {
        #[arg(short, long)]
        variant: Variant,
        /// Latest completed cycle not yet evaluated when omitted
        #[arg(short, long)]
        cycle: Option<u32>,
    },

    /// Recent draws, cycles and weight changes
    History {
        #[arg(short, long)]
        variant: Variant,
        #[arg(short, long, default_value = "10")]
        last: u32,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let path = cli.db.clone().unwrap_or_else(db_path);
    let store = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT, &RetryConfig::default())
        .with_context(|| format!("Cannot open results store {}", path.display()))?;

    let mut configs = Vec::new();
    for variant in Variant::ALL {
        configs.push(VariantConfig::load(variant, cli.config.as_deref())?);
    }
    let model_version = configs[0].model_version.clone();
    let artifacts = FsArtifactStore::new(&cli.artifacts, &model_version);
    let pipeline = configs.into_iter().fold(Pipeline::new(&store, &artifacts), |p, c| p.with_config(c));

    match cli.command {
        Command::Import { variant, file } => cmd_import(&pipeline, variant, &file),
        Command::Train { variant } => for_variants(variant, |v| cmd_train(&pipeline, v)),
        Command::Generate { variant } => for_variants(variant, |v| cmd_generate(&pipeline, v)),
        Command::Check { variant, draw_id, session } => cmd_check(&pipeline, variant, &draw_id, session),
        Command::Evaluate { variant, cycle } => cmd_evaluate(&pipeline, &store, variant, cycle),
        Command::History { variant, last } => cmd_history(&store, variant, last),
    }
}

/// Run `f` for one variant, or for each in turn. Recoverable failures are
/// reported and the next variant still runs.
fn for_variants(variant: Option<Variant>, mut f: impl FnMut(Variant) -> vietlott_ensemble::Result<()>) -> Result<()> {
    let variants = match variant {
        Some(v) => vec![v],
        None => Variant::ALL.to_vec(),
    };
    let mut failed = 0;
    for v in variants {
        if let Err(e) = f(v) {
            match e.remedy() {
                Some(hint) => warn!("{v}: {e} ({hint})"),
                None => warn!("{v}: {e}"),
            }
            if !e.is_recoverable() && variant.is_some() {
                return Err(e.into());
            }
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} variant(s) failed");
    }
    Ok(())
}

fn cmd_import(pipeline: &Pipeline, variant: Variant, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("Cannot read {}", file.display()))?;
    let rows = text.lines().skip(1).filter(|l| !l.trim().is_empty()).count();

    let pb = ProgressBar::new(rows as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );
    pb.set_message(format!("{variant} rows"));
    let batch = import::read_draws(variant, text.as_bytes(), || pb.inc(1))?;
    pb.finish_with_message("parsed");

    for err in &batch.errors {
        eprintln!("{}: {err}", file.display());
    }
    let mut report = pipeline.ingest_draws(&batch.draws)?;
    report.invalid += batch.errors.len();
    display::display_ingest(&report);
    Ok(())
}

fn cmd_train(pipeline: &Pipeline, variant: Variant) -> vietlott_ensemble::Result<()> {
    println!("\n== Training {} ==\n", variant.label());
    let report = pipeline.train_models(variant)?;
    display::display_train_report(&report);
    Ok(())
}

fn cmd_generate(pipeline: &Pipeline, variant: Variant) -> vietlott_ensemble::Result<()> {
    let prediction = pipeline.generate_prediction(variant)?;
    display::display_prediction(&prediction);
    Ok(())
}

fn cmd_check(pipeline: &Pipeline, variant: Variant, draw_id: &str, session: Option<Session>) -> Result<()> {
    let outcome = pipeline.check_result(variant, draw_id, session)?;
    display::display_check(&outcome);
    if outcome.is_new && outcome.cycle_completed() {
        info!("{variant}: cycle #{} complete, evaluating", outcome.cycle.cycle_number);
        let decision = pipeline.evaluate_and_retrain(variant, outcome.cycle.id)?;
        report_decision(variant, &decision);
    }
    Ok(())
}

fn cmd_evaluate(pipeline: &Pipeline, store: &SqliteStore, variant: Variant, cycle: Option<u32>) -> Result<()> {
    let cycle = match cycle {
        Some(number) => store.cycle_by_number(variant, number)?,
        None => pending_cycle(store, variant)?,
    };
    let Some(cycle) = cycle else {
        bail!("{variant}: no completed cycle awaiting evaluation");
    };
    let decision = pipeline.evaluate_and_retrain(variant, cycle.id)?;
    report_decision(variant, &decision);
    Ok(())
}

/// Most recent completed cycle without a logged evaluation.
fn pending_cycle(store: &SqliteStore, variant: Variant) -> Result<Option<PredictionCycle>> {
    for cycle in store.recent_cycles(variant, 50)? {
        if !cycle.is_active() && store.training_log_for_cycle(cycle.id)?.is_none() {
            return Ok(Some(cycle));
        }
    }
    Ok(None)
}

fn report_decision(variant: Variant, decision: &RetrainDecision) {
    display::display_decision(decision);
    if !decision.is_new {
        println!("cycle already evaluated, weights left as they were");
    } else if decision.should_retrain {
        println!("weights shifted; retrain with `vietlott train --variant {variant}` before the next generate");
    }
}

fn cmd_history(store: &SqliteStore, variant: Variant, last: u32) -> Result<()> {
    let draws = store.recent_draws(variant, last, None)?;
    if draws.is_empty() {
        bail!("No {variant} draws yet. Run: vietlott import --variant {variant} --file <csv>");
    }
    println!("\n== {} draws ==\n", variant.label());
    display::display_draws(&draws);

    let cycles = store
        .recent_cycles(variant, last)?
        .into_iter()
        .map(|c| {
            let records = store.match_results_for_cycle(c.id)?;
            Ok((c, records))
        })
        .collect::<Result<Vec<_>>>()?;
    if !cycles.is_empty() {
        println!("\n== Cycles ==\n");
        display::display_cycles(&cycles);
    }

    let logs = store.training_logs(variant, last)?;
    if !logs.is_empty() {
        println!("\n== Weight evaluations ==\n");
        display::display_training_logs(&logs);
    }
    Ok(())
}
