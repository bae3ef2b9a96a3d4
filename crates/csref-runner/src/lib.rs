//! Drives the fixture corpus through csref and renders what diverges.
//!
//! Every directory below `tests/fixtures` holding a `case.toml` becomes one
//! libtest trial named after its path, so `cargo test -p csref-runner --test
//! fixtures -- atomics/0005` runs a single case.

use crate::runner::{Runner, read_descriptor};
use crate::testcase::collect_test_dirs;
use anyhow::{Context, Result, bail};
use libtest_mimic::{Arguments, Trial};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub mod differ;
pub mod runner;
pub mod testcase;

pub fn init_tracing(json: bool) -> Result<()> {
    let builder = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

pub fn run() -> Result<ExitCode> {
    init_tracing(false)?;

    let mut args = Arguments::from_args();

    // If filters are provided that look like paths (contain '/'), convert them to test names
    if let Some(filter) = &mut args.filter {
        *filter = filter.replace('/', "::");
    }

    let tests = collect_tests()?;
    Ok(libtest_mimic::run(&args, tests).exit_code())
}

fn collect_tests() -> Result<Vec<Trial>> {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let base = manifest_dir
        .join("../../tests/fixtures")
        .canonicalize()
        .context("failed to canonicalize fixtures directory")?;
    tracing::debug!("Using fixtures directory: {}", base.display());

    let output_dir = base.join("target/csref");
    fs::create_dir_all(&output_dir)?;
    tracing::debug!("Using output directory: {}", output_dir.display());

    let runner = Arc::new(Runner::new(base.clone(), output_dir));

    let test_cases = collect_test_dirs(&base).context("failed to collect test case directories")?;
    if test_cases.is_empty() {
        bail!("No valid tests found in {}", base.display());
    }

    let mut trials = Vec::with_capacity(test_cases.len());
    for case in test_cases {
        // a descriptor that fails to parse is reported by its trial
        let skipped = read_descriptor(&case.descriptor_path())
            .is_ok_and(|descriptor| descriptor.compare.skipped.is_some());
        let runner = runner.clone();
        let trial = Trial::test(case.to_string(), move || Ok(runner.run_test_case(&case)?));
        trials.push(trial.with_ignored_flag(skipped));
    }
    Ok(trials)
}
