use crate::runner::RunnerResult;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File that turns a directory into a test case.
pub const DESCRIPTOR: &str = "case.toml";

/// One fixture plus its descriptor, found somewhere below the corpus root.
#[derive(Debug, Clone)]
pub struct TestCase {
    /// The name of the testcase, as a rust mod path
    pub name: String,
    /// the relative path from the corpus root
    pub relative_path: PathBuf,
    /// the absolute path
    pub absolute_path: PathBuf,
}

impl TestCase {
    pub fn new(root: &Path, relative_path: &Path) -> Self {
        TestCase {
            name: format!(
                "fixtures::{}",
                relative_path.to_string_lossy().replace(['/', '\\'], "::")
            ),
            absolute_path: root.join(relative_path),
            relative_path: relative_path.to_path_buf(),
        }
    }

    pub fn try_new(root: &Path, relative_path: &Path) -> Option<Self> {
        let test_case = Self::new(root, relative_path);
        if test_case.descriptor_path().is_file() {
            debug!("Test case found: {}", relative_path.display());
            Some(test_case)
        } else {
            None
        }
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.absolute_path.join(DESCRIPTOR)
    }
}

impl Display for TestCase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Every directory below `root` holding a `case.toml`, in path order.
pub fn collect_test_dirs(root: &Path) -> RunnerResult<Vec<TestCase>> {
    fn recurse(root: &Path, traverse: &Path, test_cases: &mut Vec<TestCase>) -> RunnerResult<()> {
        let absolute_path = root.join(traverse);
        // skip target dir
        if absolute_path.file_name() == Some(std::ffi::OsStr::new("target")) {
            return Ok(());
        }

        if let Some(test_case) = TestCase::try_new(root, traverse) {
            test_cases.push(test_case);
        }
        let mut entries = fs::read_dir(absolute_path)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            if entry.path().is_dir() {
                let relative_path = traverse.join(entry.file_name());
                recurse(root, &relative_path, test_cases)?;
            }
        }
        Ok(())
    }

    let mut test_cases = Vec::new();
    recurse(root, Path::new(""), &mut test_cases)?;
    Ok(test_cases)
}
