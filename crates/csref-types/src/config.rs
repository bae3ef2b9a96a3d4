use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Knobs that fix the engine's conventions for one dispatch.
///
/// Every field has a documented default so that a descriptor only needs an
/// `[engine]` table when a case probes non-default behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of interpreter steps a single invocation may take.
    pub step_budget: u64,

    /// What happens when an index falls outside a resource's extent.
    pub oob_policy: OobPolicy,

    /// What happens when two invocations touch one element without atomics.
    pub race_policy: RacePolicy,

    /// Order in which invocations are executed.
    pub schedule: Schedule,

    /// Element count of a storage buffer that has no seed.
    pub default_buffer_len: usize,

    /// `[width, height]` of an image or texture that has no seed.
    ///
    /// Matches the 200x200 textures the GLES conformance driver binds.
    pub default_image_extent: [u32; 2],

    /// Which sampler oracle answers `texture()` calls.
    pub sampler: SamplerKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_budget: 100_000,
            oob_policy: OobPolicy::default(),
            race_policy: RacePolicy::default(),
            schedule: Schedule::default(),
            default_buffer_len: 256,
            default_image_extent: [200, 200],
            sampler: SamplerKind::default(),
        }
    }
}

/// Out-of-bounds convention. Real drivers disagree here, so the engine
/// picks one and the oracle's contract follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OobPolicy {
    /// Clamp the index to the last valid element and record a diagnostic.
    #[default]
    ClampAndReport,
    /// Drop writes, read zero, and record a diagnostic.
    DiscardAndReport,
    /// Abort the offending invocation.
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePolicy {
    /// Fail the dispatch on the first detected race.
    #[default]
    Reject,
    /// Record races as diagnostics and still return a snapshot.
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Workgroup-major, x fastest.
    #[default]
    Sequential,
    /// A seeded random permutation of every invocation in the dispatch.
    Shuffled { seed: u64 },
    /// Workgroups spread over the rayon thread pool.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScheduleError(String);

impl fmt::Display for ParseScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid schedule `{}`, expected `sequential`, `parallel` or `shuffled:<seed>`",
            self.0
        )
    }
}

impl std::error::Error for ParseScheduleError {}

impl FromStr for Schedule {
    type Err = ParseScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            _ => s
                .strip_prefix("shuffled:")
                .and_then(|seed| seed.parse().ok())
                .map(|seed| Self::Shuffled { seed })
                .ok_or_else(|| ParseScheduleError(s.to_string())),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Shuffled { seed } => write!(f, "shuffled:{seed}"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    /// `texture()` is answered by an external oracle; without one the
    /// invocation faults.
    #[default]
    External,
    /// Exact point reads: `GL_NEAREST`, `GL_CLAMP_TO_EDGE`, level 0.
    Nearest,
}

/// Comparison metadata that controls how expected and observed snapshots are
/// diffed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompareMetadata {
    /// Maximum allowed difference for floating-point lanes.
    ///
    /// When None (default), float lanes are compared bit-exactly like
    /// integer lanes. Driver float semantics vary, so cases that go through
    /// float arithmetic usually set a small epsilon (e.g. 1e-6).
    #[serde(default)]
    pub epsilon: Option<f32>,

    /// If present, indicates this case is skipped with the given reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl CompareMetadata {
    /// Create metadata with a specific epsilon value
    pub fn with_epsilon(epsilon: f32) -> Self {
        Self {
            epsilon: Some(epsilon),
            ..Default::default()
        }
    }

    /// Create metadata for bit-exact comparison
    pub fn exact() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_from_str() {
        assert_eq!("sequential".parse(), Ok(Schedule::Sequential));
        assert_eq!("parallel".parse(), Ok(Schedule::Parallel));
        assert_eq!("shuffled:42".parse(), Ok(Schedule::Shuffled { seed: 42 }));
        assert!("shuffled:".parse::<Schedule>().is_err());
        assert!("random".parse::<Schedule>().is_err());
    }

    #[test]
    fn test_schedule_display_round_trips() {
        for schedule in [
            Schedule::Sequential,
            Schedule::Parallel,
            Schedule::Shuffled { seed: 7 },
        ] {
            assert_eq!(schedule.to_string().parse(), Ok(schedule));
        }
    }

    #[test]
    fn test_engine_config_partial_table() {
        let config: EngineConfig = toml::from_str(
            r#"
            oob_policy = "fault"
            schedule = { kind = "shuffled", seed = 3 }
            "#,
        )
        .unwrap();
        assert_eq!(config.oob_policy, OobPolicy::Fault);
        assert_eq!(config.schedule, Schedule::Shuffled { seed: 3 });
        assert_eq!(config.step_budget, EngineConfig::default().step_budget);
        assert_eq!(config.race_policy, RacePolicy::Reject);
    }

    #[test]
    fn test_compare_metadata_defaults_to_exact() {
        let meta: CompareMetadata = toml::from_str("").unwrap();
        assert_eq!(meta, CompareMetadata::exact());
        assert_eq!(CompareMetadata::with_epsilon(1e-6).epsilon, Some(1e-6));
    }
}
