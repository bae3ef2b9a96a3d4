use crate::differ;
use crate::testcase::TestCase;
use csref::{CompareOptions, EngineConfig, ResourceSnapshot, Schedule};
use csref_types::CaseDescriptor;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info, trace};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("TOML parse error in descriptor at {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("JSON error in snapshot at {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Engine(#[from] csref::EngineError),
    #[error("Snapshot under schedule `{schedule}` differs from the case schedule:\n\n{details}")]
    Nondeterministic { schedule: Schedule, details: String },
    #[error("Expectations not met:\n\n{0}")]
    UnmetExpectations(String),
    #[error("Outputs differ:\n\n{0}")]
    DifferingOutput(String),
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

/// Schedules every case is re-run under. Each must reproduce the snapshot
/// of the case's own schedule byte for byte.
pub const CROSS_CHECK: [Schedule; 4] = [
    Schedule::Sequential,
    Schedule::Parallel,
    Schedule::Shuffled { seed: 0x5eed },
    Schedule::Shuffled { seed: 1 << 40 },
];

pub fn read_descriptor(path: &Path) -> RunnerResult<CaseDescriptor> {
    trace!("Reading descriptor from {}", path.display());
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| RunnerError::Toml {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn read_snapshot(path: &Path) -> RunnerResult<ResourceSnapshot> {
    let bytes = fs::read(path)?;
    ResourceSnapshot::from_bytes(&bytes).map_err(|e| RunnerError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load, seed and dispatch the fixture a descriptor names.
pub fn evaluate(
    descriptor_path: &Path,
    case: &CaseDescriptor,
    config: &EngineConfig,
    workgroups: [u32; 3],
) -> RunnerResult<ResourceSnapshot> {
    let fixture_path = CaseDescriptor::resolve(descriptor_path, &case.fixture);
    let source = fs::read_to_string(&fixture_path)?;
    let name = fixture_path
        .file_stem()
        .map_or_else(|| fixture_path.to_string_lossy(), |stem| stem.to_string_lossy());
    let model = csref::load(&name, &source)?;
    let store = csref::seed::seeded_store(&model, case)?;
    let snapshot = csref::dispatch(&model, store, workgroups, config)?;
    debug!(
        "Fixture '{}' under {}: {} buffer(s), {} image(s), {} diagnostic(s)",
        name,
        config.schedule,
        snapshot.buffers.len(),
        snapshot.images.len(),
        snapshot.diagnostics.len()
    );
    Ok(snapshot)
}

#[derive(Debug, Clone)]
pub struct Runner {
    pub base_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Runner {
    pub fn new(base_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            base_dir,
            output_dir,
        }
    }

    pub fn run_test_case(&self, test_case: &TestCase) -> RunnerResult<()> {
        trace!("Starting test case: {}", test_case);
        let descriptor_path = test_case.descriptor_path();
        let case = read_descriptor(&descriptor_path)?;
        if let Some(reason) = &case.compare.skipped {
            info!("Test case '{}' skipped: {}", test_case, reason);
            return Ok(());
        }

        let snapshot = evaluate(&descriptor_path, &case, &case.engine, case.dispatch)?;
        let bytes = to_bytes(&snapshot, &descriptor_path)?;

        for schedule in CROSS_CHECK {
            if schedule == case.engine.schedule {
                continue;
            }
            let config = EngineConfig {
                schedule,
                ..case.engine.clone()
            };
            let rerun = evaluate(&descriptor_path, &case, &config, case.dispatch)?;
            if to_bytes(&rerun, &descriptor_path)? != bytes {
                error!("Test case '{}' is schedule dependent under {}", test_case, schedule);
                let kept = self.keep_snapshot(test_case, &rerun)?;
                let mut details = differ::format_divergences(
                    csref::compare(&snapshot, &rerun, &CompareOptions::default()).divergences(),
                    &case.engine.schedule.to_string(),
                    &schedule.to_string(),
                );
                if details.is_empty() {
                    details = diagnostics_details(&snapshot, &rerun);
                }
                details.push_str(&format!("╰──▶ {}\n", kept.display()));
                return Err(RunnerError::Nondeterministic { schedule, details });
            }
        }

        let options = CompareOptions::from(&case.compare);
        let comparison = csref::check_expectations(&snapshot, &case.expectations, &options)?;
        if !comparison.is_match() {
            let kept = self.keep_snapshot(test_case, &snapshot)?;
            let mut details = differ::format_divergences(comparison.divergences(), "expected", "csref");
            details.push_str(&format!("╰──▶ {}\n", kept.display()));
            return Err(RunnerError::UnmetExpectations(details));
        }

        if let Some(observed) = &case.observed {
            let observed_path = CaseDescriptor::resolve(&descriptor_path, observed);
            let observed = read_snapshot(&observed_path)?;
            let comparison = csref::compare(&snapshot, &observed, &options);
            if !comparison.is_match() {
                let kept = self.keep_snapshot(test_case, &snapshot)?;
                let mut details = differ::format_divergences(comparison.divergences(), "csref", "observed");
                details.push_str(&format!(
                    "│ observed: {}\n╰──▶ {}\n",
                    observed_path.display(),
                    kept.display()
                ));
                return Err(RunnerError::DifferingOutput(details));
            }
        }

        info!("Test case '{}' passed.", test_case);
        Ok(())
    }

    /// Persist a snapshot below the output dir, plus a readable dump next to
    /// it, and return the JSON path.
    fn keep_snapshot(&self, test_case: &TestCase, snapshot: &ResourceSnapshot) -> RunnerResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let prefix = format!("{}-", test_case.name.replace("::", "-"));
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".json")
            .tempfile_in(&self.output_dir)?;
        let bytes = to_bytes(snapshot, file.path())?;
        file.write_all(&bytes)?;
        let path = keep(file)?;
        differ::write_human_readable(snapshot, &path.with_extension("txt"))?;
        debug!("Kept snapshot of '{}' at {}", test_case, path.display());
        Ok(path)
    }
}

fn keep(file: NamedTempFile) -> RunnerResult<PathBuf> {
    Ok(file.into_temp_path().keep().map_err(|e| e.error)?)
}

fn to_bytes(snapshot: &ResourceSnapshot, path: &Path) -> RunnerResult<Vec<u8>> {
    snapshot.to_bytes().map_err(|e| RunnerError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

fn diagnostics_details(first: &ResourceSnapshot, second: &ResourceSnapshot) -> String {
    let render = |s: &ResourceSnapshot| differ::format_diagnostics(s).unwrap_or_else(|| "no diagnostics".into());
    format!("diagnostics differ\n{}\n{}\n", render(first), render(second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    const DOUBLE: &str = r#"#version 310 es
layout(local_size_x = 4) in;
layout(binding = 0) buffer Out { uint Out[]; };
void main() {
    Out[gl_LocalInvocationIndex] = gl_LocalInvocationIndex * 2u;
}
"#;

    fn case_dir(descriptor: &str) -> (TempDir, Runner, TestCase) {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let root = temp_dir.path().join("fixtures");
        let dir = root.join("buffers/double");
        fs::create_dir_all(&dir).expect("failed to create case dir");
        fs::write(dir.join("double.cs"), DOUBLE).expect("failed to write fixture");
        fs::write(dir.join(crate::testcase::DESCRIPTOR), descriptor).expect("failed to write descriptor");
        let runner = Runner::new(root.clone(), temp_dir.path().join("out"));
        let test_case = TestCase::new(&root, Path::new("buffers/double"));
        (temp_dir, runner, test_case)
    }

    const PASSING: &str = r#"
        fixture = "double.cs"
        dispatch = [1, 1, 1]

        [[buffer]]
        binding = 0
        len = 4

        [[expect]]
        buffer = 0
        index = 3
        value = 6
    "#;

    #[test]
    fn test_passing_case() {
        let (_dir, runner, test_case) = case_dir(PASSING);
        runner.run_test_case(&test_case).expect("case should pass");
        assert!(!runner.output_dir.exists());
    }

    #[test]
    fn test_unmet_expectation_keeps_snapshot() {
        let (_dir, runner, test_case) = case_dir(&PASSING.replace("value = 6", "value = 7"));
        let err = runner.run_test_case(&test_case).unwrap_err();
        let RunnerError::UnmetExpectations(details) = err else {
            panic!("unexpected error: {err}");
        };
        assert!(details.contains("buffer binding 0 [3]"), "{details}");

        let kept: Vec<PathBuf> = fs::read_dir(&runner.output_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(kept.len(), 2);
        let json = kept.iter().find(|p| p.extension().is_some_and(|e| e == "json")).unwrap();
        let snapshot = read_snapshot(json).unwrap();
        assert_eq!(snapshot.buffer(0).unwrap().lanes, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_observed_snapshot_is_compared() {
        let descriptor = PASSING.replace(
            "dispatch = [1, 1, 1]",
            "dispatch = [1, 1, 1]\nobserved = \"driver.json\"",
        );
        let (_dir, runner, test_case) = case_dir(&descriptor);
        let descriptor_path = test_case.descriptor_path();
        let case = read_descriptor(&descriptor_path).unwrap();

        let mut driver = evaluate(&descriptor_path, &case, &case.engine, case.dispatch).unwrap();
        let observed_path = test_case.absolute_path.join("driver.json");
        fs::write(&observed_path, driver.to_bytes().unwrap()).unwrap();
        runner.run_test_case(&test_case).expect("identical driver output should pass");

        driver.buffers.get_mut(&0).unwrap().lanes[1] = 99;
        fs::write(&observed_path, driver.to_bytes().unwrap()).unwrap();
        let err = runner.run_test_case(&test_case).unwrap_err();
        let RunnerError::DifferingOutput(details) = err else {
            panic!("unexpected error: {err}");
        };
        assert!(details.contains("99"), "{details}");
    }

    #[test]
    fn test_skipped_case_is_not_run() {
        let descriptor = PASSING.replace(
            "dispatch = [1, 1, 1]",
            "dispatch = [1, 1, 1]\n[compare]\nskipped = \"needs mipmaps\"",
        );
        // an unmet expectation would fail if the case ran
        let (_dir, runner, test_case) = case_dir(&descriptor.replace("value = 6", "value = 7"));
        runner.run_test_case(&test_case).expect("skipped case should pass");
    }

    #[test]
    fn test_bad_descriptor() {
        let (_dir, runner, test_case) = case_dir("fixture = ");
        assert!(matches!(
            runner.run_test_case(&test_case),
            Err(RunnerError::Toml { .. })
        ));
    }

    #[test]
    fn test_engine_errors_propagate() {
        let (_dir, runner, test_case) = case_dir(PASSING);
        fs::write(test_case.absolute_path.join("double.cs"), "void main() {").unwrap();
        assert!(matches!(
            runner.run_test_case(&test_case),
            Err(RunnerError::Engine(_))
        ));
    }
}
