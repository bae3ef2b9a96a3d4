use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use csref::{CompareOptions, EngineConfig, Schedule};
use csref_runner::differ;
use csref_runner::runner::{evaluate, read_descriptor, read_snapshot};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "csref",
    version,
    about = "Reference execution engine for GLSL ES 3.10 compute fixtures"
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one case descriptor and check its expectations
    Run {
        /// Path to a `case.toml`
        descriptor: PathBuf,

        /// Workgroup count, overriding the descriptor
        #[arg(long, value_name = "X,Y,Z", value_parser = parse_dispatch)]
        dispatch: Option<[u32; 3]>,

        /// `sequential`, `parallel` or `shuffled:<seed>`, overriding the descriptor
        #[arg(long)]
        schedule: Option<Schedule>,

        /// Write the computed snapshot to this path as JSON
        #[arg(long, value_name = "PATH")]
        snapshot: Option<PathBuf>,
    },
    /// Parse and validate a fixture, then print its resource manifest
    Check {
        fixture: PathBuf,
    },
    /// Diff two snapshots
    Compare {
        expected: PathBuf,
        observed: PathBuf,

        /// Allowed absolute difference for float lanes
        #[arg(long)]
        epsilon: Option<f32>,
    },
}

fn parse_dispatch(s: &str) -> Result<[u32; 3], String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<u32>().map_err(|e| format!("`{p}`: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    <[u32; 3]>::try_from(parts).map_err(|parts| format!("expected 3 counts, got {}", parts.len()))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    csref_runner::init_tracing(cli.json_logs)?;

    match cli.command {
        Command::Run {
            descriptor,
            dispatch,
            schedule,
            snapshot,
        } => run(descriptor, dispatch, schedule, snapshot),
        Command::Check { fixture } => check(fixture),
        Command::Compare {
            expected,
            observed,
            epsilon,
        } => compare(expected, observed, epsilon),
    }
}

fn run(
    descriptor: PathBuf,
    dispatch: Option<[u32; 3]>,
    schedule: Option<Schedule>,
    snapshot_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let case = read_descriptor(&descriptor)?;
    if let Some(reason) = &case.compare.skipped {
        tracing::warn!("{} is marked skipped: {}", descriptor.display(), reason);
    }
    let config = EngineConfig {
        schedule: schedule.unwrap_or(case.engine.schedule),
        ..case.engine.clone()
    };
    let workgroups = dispatch.unwrap_or(case.dispatch);
    let snapshot = evaluate(&descriptor, &case, &config, workgroups)?;

    println!("{}", differ::format_summary(&snapshot));
    if let Some(diagnostics) = differ::format_diagnostics(&snapshot) {
        println!("{diagnostics}");
    }
    if let Some(path) = snapshot_path {
        fs::write(&path, snapshot.to_bytes()?)
            .with_context(|| format!("write snapshot {}", path.display()))?;
    }

    let comparison = csref::check_expectations(
        &snapshot,
        &case.expectations,
        &CompareOptions::from(&case.compare),
    )?;
    if comparison.is_match() {
        println!("{} expectation(s) met", case.expectations.len());
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{}",
            differ::format_divergences(comparison.divergences(), "expected", "csref")
        );
        Ok(ExitCode::FAILURE)
    }
}

fn check(fixture: PathBuf) -> Result<ExitCode> {
    let source = fs::read_to_string(&fixture)
        .with_context(|| format!("read fixture {}", fixture.display()))?;
    let Some(name) = fixture.file_stem() else {
        bail!("{} does not name a file", fixture.display());
    };
    let model = csref::load(&name.to_string_lossy(), &source)?;
    println!("{}", serde_json::to_string_pretty(&model.manifest())?);
    Ok(ExitCode::SUCCESS)
}

fn compare(expected: PathBuf, observed: PathBuf, epsilon: Option<f32>) -> Result<ExitCode> {
    let expected = read_snapshot(&expected)?;
    let observed = read_snapshot(&observed)?;
    let comparison = csref::compare(&expected, &observed, &CompareOptions { epsilon });
    if comparison.is_match() {
        println!("snapshots match");
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "{}",
        differ::format_divergences(comparison.divergences(), "expected", "observed")
    );
    Ok(ExitCode::FAILURE)
}
