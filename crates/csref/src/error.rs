use serde::{Deserialize, Serialize};
use std::fmt;

/// Flat index of an invocation within a dispatch.
pub type InvocationId = u64;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EngineError {
    #[error("{fixture}:{line}:{column}: malformed fixture: {message}")]
    MalformedFixture {
        fixture: String,
        line: u32,
        column: u32,
        message: String,
    },

    #[error("{fixture}:{line}:{column}: unsupported built-in `{name}`")]
    UnsupportedBuiltin {
        fixture: String,
        line: u32,
        column: u32,
        name: String,
    },

    #[error("{fixture}: type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        fixture: String,
        context: String,
        expected: String,
        found: String,
    },

    #[error("{fixture}: index {index} out of bounds for {resource} (extent {extent})")]
    OutOfBounds {
        fixture: String,
        resource: String,
        index: i64,
        extent: usize,
    },

    #[error(
        "{fixture}: race on {resource}[{index}] between invocations {first} and {second}: {detail}"
    )]
    RaceDetected {
        fixture: String,
        resource: String,
        index: usize,
        first: InvocationId,
        second: InvocationId,
        detail: String,
    },

    #[error("{fixture}: invocation {invocation} exceeded the step budget of {budget}")]
    StepBudgetExceeded {
        fixture: String,
        invocation: InvocationId,
        budget: u64,
    },

    #[error("{fixture}: sampler at binding {binding} unavailable: {reason}")]
    SamplerUnavailable {
        fixture: String,
        binding: u32,
        reason: String,
    },

    #[error("{fixture}: invalid seed for {target}: {message}")]
    InvalidSeed {
        fixture: String,
        target: String,
        message: String,
    },

    #[error("{fixture}: dispatcher is {state}, expected initialized")]
    InvalidState { fixture: String, state: String },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedFixture { .. } => ErrorKind::MalformedFixture,
            Self::UnsupportedBuiltin { .. } => ErrorKind::UnsupportedBuiltin,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Self::RaceDetected { .. } => ErrorKind::RaceDetected,
            Self::StepBudgetExceeded { .. } => ErrorKind::StepBudgetExceeded,
            Self::SamplerUnavailable { .. } => ErrorKind::SamplerUnavailable,
            Self::InvalidSeed { .. } => ErrorKind::InvalidSeed,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// Faults that stop one invocation without aborting the dispatch.
    pub fn is_invocation_fault(&self) -> bool {
        matches!(
            self,
            Self::StepBudgetExceeded { .. }
                | Self::OutOfBounds { .. }
                | Self::SamplerUnavailable { .. }
        )
    }

    pub fn fixture(&self) -> &str {
        match self {
            Self::MalformedFixture { fixture, .. }
            | Self::UnsupportedBuiltin { fixture, .. }
            | Self::TypeMismatch { fixture, .. }
            | Self::OutOfBounds { fixture, .. }
            | Self::RaceDetected { fixture, .. }
            | Self::StepBudgetExceeded { fixture, .. }
            | Self::SamplerUnavailable { fixture, .. }
            | Self::InvalidSeed { fixture, .. }
            | Self::InvalidState { fixture, .. } => fixture,
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Classification of an [`EngineError`], as recorded in snapshot diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedFixture,
    UnsupportedBuiltin,
    TypeMismatch,
    OutOfBounds,
    RaceDetected,
    StepBudgetExceeded,
    SamplerUnavailable,
    InvalidSeed,
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MalformedFixture => "MalformedFixture",
            Self::UnsupportedBuiltin => "UnsupportedBuiltin",
            Self::TypeMismatch => "TypeMismatch",
            Self::OutOfBounds => "OutOfBounds",
            Self::RaceDetected => "RaceDetected",
            Self::StepBudgetExceeded => "StepBudgetExceeded",
            Self::SamplerUnavailable => "SamplerUnavailable",
            Self::InvalidSeed => "InvalidSeed",
            Self::InvalidState => "InvalidState",
        })
    }
}

/// A non-fatal event recorded during a dispatch. Identical messages are
/// folded into one entry with an occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub occurrences: u64,
    /// Lowest invocation id that produced this diagnostic.
    pub first_invocation: InvocationId,
}

/// Ordered, deduplicated diagnostic list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn record(&mut self, kind: ErrorKind, message: String, invocation: InvocationId) {
        match self
            .0
            .iter_mut()
            .find(|d| d.kind == kind && d.message == message)
        {
            Some(existing) => {
                existing.occurrences += 1;
                existing.first_invocation = existing.first_invocation.min(invocation);
            }
            None => self.0.push(Diagnostic {
                kind,
                message,
                occurrences: 1,
                first_invocation: invocation,
            }),
        }
    }

    pub fn record_error(&mut self, error: &EngineError, invocation: InvocationId) {
        self.record(error.kind(), error.to_string(), invocation);
    }

    pub fn merge(&mut self, other: Diagnostics) {
        for d in other.0 {
            match self
                .0
                .iter_mut()
                .find(|e| e.kind == d.kind && e.message == d.message)
            {
                Some(existing) => {
                    existing.occurrences += d.occurrences;
                    existing.first_invocation = existing.first_invocation.min(d.first_invocation);
                }
                None => self.0.push(d),
            }
        }
    }

    /// Order by kind then message so that the list does not depend on the
    /// schedule that produced it.
    pub fn normalize(&mut self) {
        self.0
            .sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.message.cmp(&b.message)));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.0
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.occurrences)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_carries_fixture_and_kind() {
        let err = EngineError::OutOfBounds {
            fixture: "0031".into(),
            resource: "buffer Out (binding 1)".into(),
            index: 300,
            extent: 256,
        };
        assert_eq!(err.kind(), ErrorKind::OutOfBounds);
        assert_eq!(err.fixture(), "0031");
        assert!(err.is_invocation_fault());
        assert_eq!(
            err.to_string(),
            "0031: index 300 out of bounds for buffer Out (binding 1) (extent 256)"
        );
    }

    #[test]
    fn test_diagnostics_fold_duplicates() {
        let mut diags = Diagnostics::default();
        diags.record(ErrorKind::OutOfBounds, "clamped".into(), 7);
        diags.record(ErrorKind::OutOfBounds, "clamped".into(), 3);
        diags.record(ErrorKind::StepBudgetExceeded, "budget".into(), 1);

        let mut other = Diagnostics::default();
        other.record(ErrorKind::OutOfBounds, "clamped".into(), 0);
        diags.merge(other);
        diags.normalize();

        let first = diags.iter().next().unwrap();
        assert_eq!(diags.len(), 2);
        assert_eq!(first.kind, ErrorKind::OutOfBounds);
        assert_eq!(first.occurrences, 3);
        assert_eq!(first.first_invocation, 0);
        assert_eq!(diags.count(ErrorKind::StepBudgetExceeded), 1);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RaceDetected).unwrap();
        assert_eq!(json, "\"race_detected\"");
        assert_eq!(ErrorKind::RaceDetected.to_string(), "RaceDetected");
    }
}
