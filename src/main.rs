mod binding;
mod config;
mod csm;
mod doe;
mod io;
mod model;
mod optimize;
mod recorder;
mod sensitivity;


use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::binding::Bindings;
use crate::config::SecondaryVariable;
use crate::csm::{LcoeAssembly, LcoeInput, LcoeOutput};
use crate::doe::DoeDriver;
use crate::model::{Case, EvalPoint, Facade};
use crate::optimize::{OptimizationResult, Optimizer, StopReason};
use crate::recorder::CaseLog;
use crate::sensitivity::{compare_variants, SensitivityDriver, SweepResult};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SCHEMA_VERSION: &str = "1.0.0";
const TAG: &str = "[lcoe-csm]";

/// Outputs recorded by the DOE and optimizer runs
pub(crate) const STUDY_OUTPUTS: [&str; 8] = [
    "lcoe",
    "coe",
    "turbineCost",
    "BOScost",
    "OnMcost",
    "aep",
    "ratedPower",
    "maxTipSpeed",
];

#[derive(Parser, Debug)]
#[command(name = "lcoe-csm")]
#[command(version)]
#[command(about = "Design studies over a wind plant cost-and-scaling LCOE model")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML configuration file (reference plant when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Output path
    #[arg(short, long, global = true)]
    out: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate the plant once, with optional overrides
    Run {
        /// Rotor diameter (m)
        #[arg(long)]
        rd: Option<f64>,
        /// Maximum tip speed (m/s)
        #[arg(long)]
        ts: Option<f64>,
        /// Rated power (kW)
        #[arg(long)]
        rp: Option<f64>,
        /// Hub height (m)
        #[arg(long)]
        hh: Option<f64>,
        /// Sea depth (m); above zero selects offshore relations
        #[arg(long)]
        sd: Option<f64>,
        /// Generate JSON manifest and summary
        #[arg(long)]
        json: bool,
    },
    /// Full-factorial sweep of rotor diameter and tip speed (or rated power)
    Doe {
        /// Pair rotor diameter with rated power instead of tip speed
        #[arg(long)]
        rp: bool,
        /// Grid levels per variable (overrides doe.levels)
        #[arg(long)]
        levels: Option<usize>,
        /// Evaluate grid points in parallel
        #[arg(long)]
        parallel: bool,
        /// Generate JSON outputs
        #[arg(long)]
        json: bool,
    },
    /// Minimize LCOE over rotor diameter and tip speed (or rated power)
    Optimize {
        /// Pair rotor diameter with rated power instead of tip speed
        #[arg(long)]
        rp: bool,
        /// Iteration cap (overrides optimizer.max_iter)
        #[arg(long)]
        max_iter: Option<usize>,
        /// Generate JSON outputs
        #[arg(long)]
        json: bool,
    },
    /// One-at-a-time sweeps around the baseline
    Sensitivity {
        /// Generate JSON outputs
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    Validate,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct Manifest {
    schema_version: String,
    tool_version: String,
    timestamp_utc: String,
    platform: String,
    config_hash: String,
    config_snapshot: config::Root,
}

#[derive(Serialize)]
struct RunBundle {
    manifest: Manifest,
    overrides: EvalPoint,
    input: LcoeInput,
    output: LcoeOutput,
    wall_time_ms: f64,
}

#[derive(Serialize)]
struct DoeSummary {
    manifest: Manifest,
    variables: Vec<binding::DesignVariable>,
    levels: usize,
    total_cases: usize,
    parallel: bool,
    best: Option<Case>,
    wall_time_ms: f64,
    cases: CaseLog,
}

#[derive(Serialize)]
struct OptimizationOutput {
    manifest: Manifest,
    variables: Vec<binding::DesignVariable>,
    result: OptimizationResult,
    warning: Option<String>,
    trajectory: CaseLog,
    wall_time_ms: f64,
}

#[derive(Serialize)]
struct SensitivityOutput {
    manifest: Manifest,
    baseline: Case,
    blade_comparison: Option<CaseLog>,
    sweeps: Vec<SweepResult>,
    wall_time_ms: f64,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn compute_hash(data: &str) -> String {
    format!("{:x}", Sha256::digest(data.as_bytes()))
}

fn create_manifest(cfg: &config::Root, cfg_text: &str) -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: VERSION.to_string(),
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        platform: std::env::consts::OS.to_string(),
        config_hash: compute_hash(cfg_text),
        config_snapshot: cfg.clone(),
    }
}

/// `path` with its extension replaced
fn sibling(path: &str, ext: &str) -> String {
    Path::new(path).with_extension(ext).to_string_lossy().into_owned()
}

fn write_json<T: Serialize>(path: &str, value: &T) -> Result<()> {
    io::ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("writing {path}"))?;
    Ok(())
}

fn study_bindings(
    assembly: &LcoeAssembly,
    secondary: SecondaryVariable,
    diameter: config::Bounds,
    second: config::Bounds,
) -> Result<Bindings> {
    let mut b = Bindings::new(assembly);
    b.bind("rotorDiameter", diameter.lower, diameter.upper)?
        .bind(secondary.port(), second.lower, second.upper)?
        .declare_outputs(&STUDY_OUTPUTS)?;
    Ok(b)
}

fn load_config(path: Option<&str>) -> Result<(config::Root, String)> {
    let (cfg, text) = match path {
        Some(path) => config::Root::load(path)?,
        None => config::Root::reference(),
    };
    cfg.validate()?;
    Ok((cfg, text))
}

// ============================================================================
// Run Modes
// ============================================================================

struct Overrides {
    rd: Option<f64>,
    ts: Option<f64>,
    rp: Option<f64>,
    hh: Option<f64>,
    sd: Option<f64>,
}

impl Overrides {
    fn point(&self) -> EvalPoint {
        [
            ("rotorDiameter", self.rd),
            ("maxTipSpeed", self.ts),
            ("ratedPower", self.rp),
            ("hubHeight", self.hh),
            ("seaDepth", self.sd),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name.to_string(), v)))
        .collect()
    }
}

fn run_single(
    cfg: &config::Root,
    cfg_text: &str,
    overrides: &Overrides,
    out_path: &str,
    json_output: bool,
) -> Result<()> {
    let assembly = LcoeAssembly::new(cfg.input());
    let point = overrides.point();
    for (name, value) in &point {
        eprintln!("{TAG}   ...set {name} to {value:.1}");
    }

    let start = Instant::now();
    let output = assembly.solve(&point).context("plant evaluation failed")?;
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let case = Case::new(point.clone(), output.to_outputs());
    let turbines = cfg.plant.turbine_number as f64;
    println!("{}", io::case_line(&case)?);
    println!("{}", io::SHORT_HEADER);
    println!("{}", io::short_row(&case, turbines)?);

    let mut log = CaseLog::new();
    log.record(case);
    io::write_case_csv(out_path, &log)?;
    eprintln!("{TAG} CSV: {out_path}");

    if json_output {
        let json_path = sibling(out_path, "json");
        let bundle = RunBundle {
            manifest: create_manifest(cfg, cfg_text),
            input: assembly.input_at(&point)?,
            overrides: point,
            output,
            wall_time_ms,
        };
        write_json(&json_path, &bundle)?;
        eprintln!("{TAG} JSON bundle: {json_path}");
    }

    Ok(())
}

fn run_doe(
    cfg: &config::Root,
    cfg_text: &str,
    secondary: SecondaryVariable,
    levels: usize,
    parallel: bool,
    out_path: &str,
    json_output: bool,
) -> Result<()> {
    let assembly = LcoeAssembly::new(cfg.input());
    let bindings = study_bindings(
        &assembly,
        secondary,
        cfg.doe.rotor_diameter,
        cfg.doe.secondary_bounds(secondary),
    )?;
    let driver = DoeDriver::new(levels)?;
    let expected = driver.grid().size(bindings.variables().len())?;
    eprintln!(
        "{TAG} DOE: rotorDiameter x {} at {} levels, {} cases{}",
        secondary.port(),
        levels,
        expected,
        if parallel { " (parallel)" } else { "" }
    );

    let mut log = CaseLog::with_capacity(expected);
    let start = Instant::now();
    if parallel {
        driver.run_parallel(&assembly, &bindings, &mut log)?;
    } else {
        driver.run(&assembly, &bindings, &mut log)?;
    }
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    eprintln!("{TAG} Elapsed time: {:.2} seconds", wall_time_ms / 1000.0);

    for case in &log {
        println!("{}", io::case_line(case)?);
    }

    io::write_doe_points(out_path, &log)?;
    eprintln!("{TAG} Wrote output to '{out_path}'");
    let csv_path = sibling(out_path, "csv");
    io::write_case_csv(&csv_path, &log)?;
    eprintln!("{TAG} CSV: {csv_path}");

    let best = log
        .iter()
        .filter(|c| c.value("lcoe").is_some())
        .min_by(|a, b| a.outputs["lcoe"].total_cmp(&b.outputs["lcoe"]))
        .cloned();
    if let Some(best) = &best {
        eprintln!(
            "{TAG} lowest LCOE {:.5} at rotorDiameter {:.2}, {} {:.2}",
            best.outputs["lcoe"],
            best.inputs["rotorDiameter"],
            secondary.port(),
            best.inputs[secondary.port()]
        );
    }

    if json_output {
        let json_path = sibling(out_path, "json");
        let summary = DoeSummary {
            manifest: create_manifest(cfg, cfg_text),
            variables: bindings.variables().to_vec(),
            levels,
            total_cases: log.len(),
            parallel,
            best,
            wall_time_ms,
            cases: log,
        };
        write_json(&json_path, &summary)?;
        eprintln!("{TAG} JSON summary: {json_path}");
    }

    Ok(())
}

fn run_optimize(
    cfg: &config::Root,
    cfg_text: &str,
    secondary: SecondaryVariable,
    max_iter: Option<usize>,
    out_path: &str,
    json_output: bool,
) -> Result<()> {
    let assembly = LcoeAssembly::new(cfg.input());
    let bindings = study_bindings(
        &assembly,
        secondary,
        cfg.optimizer.rotor_diameter,
        cfg.optimizer.secondary_bounds(secondary),
    )?;

    let mut solver = cfg.optimizer.solver();
    if let Some(n) = max_iter {
        solver.max_iter = n;
    }
    eprintln!(
        "{TAG} minimizing lcoe over rotorDiameter x {} (max_iter={}, dabfun={:e}, delfun={:e}, itrm={})",
        secondary.port(),
        solver.max_iter,
        solver.dabfun,
        solver.delfun,
        solver.itrm
    );

    let mut log = CaseLog::new();
    let start = Instant::now();
    let result = Optimizer::new(solver).minimize(&assembly, &bindings, "lcoe", &mut log)?;
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    for case in &log {
        println!("{}", io::case_line(case)?);
    }
    println!();
    println!("  Optimum after {} iterations ({} evaluations):", result.iterations, result.evaluations);
    for (name, value) in &result.best {
        let at_bound = bindings
            .variable(name)
            .is_some_and(|v| *value == v.lower || *value == v.upper);
        println!(
            "  {:>14} = {:10.4}{}",
            name,
            value,
            if at_bound { "  (at bound)" } else { "" }
        );
    }
    println!("  {:>14} = {:10.6}", "lcoe", result.objective);
    if let Some(last) = log.last() {
        println!();
        println!("{}", io::SHORT_HEADER);
        println!("{}", io::short_row(last, cfg.plant.turbine_number as f64)?);
    }

    let stop = match result.stop_reason {
        StopReason::ObjectiveStalled => "objective change below tolerance",
        StopReason::GradientVanished => "projected gradient vanished",
        StopReason::NoDescent => "no descent along the gradient",
        StopReason::IterationCap => "iteration cap reached",
    };
    eprintln!("{TAG} stop: {stop} in {:.1}ms", wall_time_ms);

    let warning = result.warning();
    if let Some(w) = &warning {
        eprintln!("{TAG} WARNING: {w}");
    }

    io::write_case_csv(out_path, &log)?;
    eprintln!("{TAG} trajectory CSV: {out_path}");

    if json_output {
        let json_path = sibling(out_path, "json");
        let output = OptimizationOutput {
            manifest: create_manifest(cfg, cfg_text),
            variables: bindings.variables().to_vec(),
            warning: warning.map(|w| w.to_string()),
            result,
            trajectory: log,
            wall_time_ms,
        };
        write_json(&json_path, &output)?;
        eprintln!("{TAG} JSON optimization results: {json_path}");
    }

    Ok(())
}

fn run_sensitivity(
    cfg: &config::Root,
    cfg_text: &str,
    out_path: &str,
    json_output: bool,
) -> Result<()> {
    let assembly = LcoeAssembly::new(cfg.input());
    let turbines = cfg.plant.turbine_number as f64;
    let driver = SensitivityDriver::new(cfg.sensitivity.sweep.clone());
    driver.check(&assembly, &[])?;

    let start = Instant::now();
    let baseline = Case::new(EvalPoint::new(), assembly.evaluate(&EvalPoint::new())?);

    println!("{:>24}{}", "", io::SHORT_HEADER);
    println!("{:>24}{}", "baseline", io::short_row(&baseline, turbines)?);

    let blade_comparison = if cfg.sensitivity.compare_blade {
        let log = compare_variants(&assembly, "advancedBlade", &[1.0, 0.0], &[])?;
        for (case, label) in log.iter().zip(["advanced blade", "standard blade"]) {
            println!("{:>24}{}", label, io::short_row(case, turbines)?);
        }
        Some(log)
    } else {
        None
    };

    let sweeps = driver.run(&assembly, &[])?;
    for sweep in &sweeps {
        println!();
        for case in &sweep.log {
            let label = format!("{} {:.1}", sweep.name, case.inputs[&sweep.name]);
            println!("{:>24}{}", label, io::short_row(case, turbines)?);
        }
    }
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let rows = io::write_sensitivity_csv(out_path, &sweeps)?;
    eprintln!("{TAG} sensitivity analysis complete: {} sweeps, {} rows", sweeps.len(), rows);
    eprintln!("{TAG} CSV: {out_path}");

    if json_output {
        let json_path = sibling(out_path, "json");
        let output = SensitivityOutput {
            manifest: create_manifest(cfg, cfg_text),
            baseline,
            blade_comparison,
            sweeps,
            wall_time_ms,
        };
        write_json(&json_path, &output)?;
        eprintln!("{TAG} JSON: {json_path}");
    }

    Ok(())
}

fn validate_config(path: Option<&str>) -> Result<()> {
    let (cfg, text) = load_config(path)?;
    eprintln!("{TAG} configuration valid (hash {})", &compute_hash(&text)[..16]);
    eprintln!(
        "  plant: {} x {:.0} kW, D={:.1} m, H={:.1} m, {}",
        cfg.plant.turbine_number,
        cfg.turbine.rated_power,
        cfg.turbine.rotor_diameter,
        cfg.turbine.hub_height,
        if cfg.input().is_offshore() { "offshore" } else { "land-based" }
    );
    eprintln!(
        "  doe: {} levels, optimizer: max_iter={}, sensitivity: {} sweeps",
        cfg.doe.levels,
        cfg.optimizer.max_iter,
        cfg.sensitivity.sweep.len()
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg_path = args.config.as_deref();

    match args.command {
        Commands::Validate => validate_config(cfg_path),
        Commands::Run { rd, ts, rp, hh, sd, json } => {
            let (cfg, cfg_text) = load_config(cfg_path)?;
            let out_path = args.out.unwrap_or_else(|| "results/run.csv".to_string());
            let overrides = Overrides { rd, ts, rp, hh, sd };
            run_single(&cfg, &cfg_text, &overrides, &out_path, json)
        }
        Commands::Doe { rp, levels, parallel, json } => {
            let (cfg, cfg_text) = load_config(cfg_path)?;
            let out_path = args.out.unwrap_or_else(|| "results/doePts.txt".to_string());
            let levels = levels.unwrap_or(cfg.doe.levels);
            let parallel = parallel || cfg.doe.parallel;
            run_doe(
                &cfg,
                &cfg_text,
                SecondaryVariable::from_flag(rp),
                levels,
                parallel,
                &out_path,
                json,
            )
        }
        Commands::Optimize { rp, max_iter, json } => {
            let (cfg, cfg_text) = load_config(cfg_path)?;
            let out_path = args.out.unwrap_or_else(|| "results/optimization.csv".to_string());
            run_optimize(
                &cfg,
                &cfg_text,
                SecondaryVariable::from_flag(rp),
                max_iter,
                &out_path,
                json,
            )
        }
        Commands::Sensitivity { json } => {
            let (cfg, cfg_text) = load_config(cfg_path)?;
            let out_path = args.out.unwrap_or_else(|| "results/sensitivity.csv".to_string());
            run_sensitivity(&cfg, &cfg_text, &out_path, json)
        }
    }
}
