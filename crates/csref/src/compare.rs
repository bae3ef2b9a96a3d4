//! Comparator: element-wise diff of two snapshots, and of a snapshot against
//! a case's sparse expectations.

use crate::error::{EngineError, Result};
use crate::format::ImageFormat;
use crate::race::Resource;
use crate::seed;
use crate::snapshot::{ImageSnapshot, ResourceSnapshot};
use crate::value::{ScalarKind, Value};
use csref_types::{CompareMetadata, ExpectTarget, Expectation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Tolerance for float lanes. `None` compares them bit-exactly.
    pub epsilon: Option<f32>,
}

impl From<&CompareMetadata> for CompareOptions {
    fn from(meta: &CompareMetadata) -> Self {
        Self {
            epsilon: meta.epsilon,
        }
    }
}

/// Represents the magnitude of a difference between two values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiffMagnitude {
    Numeric(f64),
    /// NaN on either side, or a zero denominator for a relative difference.
    Incomparable,
}

/// One differing lane.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneDiff {
    pub lane: usize,
    pub expected: String,
    pub observed: String,
    pub absolute: DiffMagnitude,
    pub relative: DiffMagnitude,
}

/// Lane types that can be diffed.
pub trait NumericType: Copy + PartialEq + fmt::Display + Send + Sync + 'static {
    fn from_bits(bits: u32) -> Self;
    fn abs_diff(a: Self, b: Self) -> f64;
    fn type_name() -> &'static str;
    fn format_value(value: Self) -> String;
    /// Whether the comparison epsilon applies.
    fn is_float() -> bool;
    fn as_f64(value: Self) -> f64;
}

impl NumericType for f32 {
    fn from_bits(bits: u32) -> Self {
        f32::from_bits(bits)
    }
    fn abs_diff(a: Self, b: Self) -> f64 {
        (f64::from(a) - f64::from(b)).abs()
    }
    fn type_name() -> &'static str {
        "F32"
    }
    fn format_value(value: Self) -> String {
        format!("{value:.9}")
    }
    fn is_float() -> bool {
        true
    }
    fn as_f64(value: Self) -> f64 {
        f64::from(value)
    }
}

impl NumericType for u32 {
    fn from_bits(bits: u32) -> Self {
        bits
    }
    fn abs_diff(a: Self, b: Self) -> f64 {
        f64::from(a.abs_diff(b))
    }
    fn type_name() -> &'static str {
        "U32"
    }
    fn format_value(value: Self) -> String {
        format!("{value}")
    }
    fn is_float() -> bool {
        false
    }
    fn as_f64(value: Self) -> f64 {
        f64::from(value)
    }
}

impl NumericType for i32 {
    fn from_bits(bits: u32) -> Self {
        bits as i32
    }
    fn abs_diff(a: Self, b: Self) -> f64 {
        f64::from(a.abs_diff(b))
    }
    fn type_name() -> &'static str {
        "I32"
    }
    fn format_value(value: Self) -> String {
        format!("{value}")
    }
    fn is_float() -> bool {
        false
    }
    fn as_f64(value: Self) -> f64 {
        f64::from(value)
    }
}

/// Generic lane differ for numeric types
pub struct NumericDiffer<T: NumericType> {
    _phantom: PhantomData<T>,
}

impl<T: NumericType> Default for NumericDiffer<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: NumericType> NumericDiffer<T> {
    /// Diff two equally long lane slices. Identical bit patterns always
    /// match; float lanes further apart than `epsilon` (or NaN against
    /// anything else) differ.
    pub fn diff(&self, expected: &[u32], observed: &[u32], epsilon: Option<f32>) -> Vec<LaneDiff> {
        let threshold = if T::is_float() {
            f64::from(epsilon.unwrap_or(0.0))
        } else {
            0.0
        };
        let mut differences = Vec::new();
        for (lane, (&e, &o)) in expected.iter().zip(observed).enumerate() {
            if e == o {
                continue;
            }
            let (v1, v2) = (T::from_bits(e), T::from_bits(o));
            let diff = T::abs_diff(v1, v2);
            if T::is_float() && diff <= threshold {
                continue;
            }
            let absolute = if diff.is_nan() {
                DiffMagnitude::Incomparable
            } else {
                DiffMagnitude::Numeric(diff)
            };
            let max_abs = f64::max(T::as_f64(v1).abs(), T::as_f64(v2).abs());
            let relative = match absolute {
                DiffMagnitude::Numeric(d) if max_abs > 1e-10 => DiffMagnitude::Numeric(d / max_abs),
                _ => DiffMagnitude::Incomparable,
            };
            differences.push(LaneDiff {
                lane,
                expected: T::format_value(v1),
                observed: T::format_value(v2),
                absolute,
                relative,
            });
        }
        differences
    }
}

pub type F32Differ = NumericDiffer<f32>;
pub type U32Differ = NumericDiffer<u32>;
pub type I32Differ = NumericDiffer<i32>;

/// Pick the differ for lanes of `kind`. Bool lanes compare as `u32`.
pub fn diff_lanes(
    kind: ScalarKind,
    expected: &[u32],
    observed: &[u32],
    epsilon: Option<f32>,
) -> (&'static str, Vec<LaneDiff>) {
    match kind {
        ScalarKind::Float => (f32::type_name(), F32Differ::default().diff(expected, observed, epsilon)),
        ScalarKind::Int => (i32::type_name(), I32Differ::default().diff(expected, observed, epsilon)),
        ScalarKind::Uint | ScalarKind::Bool => {
            (u32::type_name(), U32Differ::default().diff(expected, observed, epsilon))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Expected,
    Observed,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expected => "expected",
            Self::Observed => "observed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Divergence {
    /// A resource only one side holds.
    Missing { resource: Resource, absent_from: Side },
    /// Element type, length, format or extent disagree.
    Shape {
        resource: Resource,
        expected: String,
        observed: String,
    },
    Lanes {
        resource: Resource,
        /// `F32`, `U32` or `I32`.
        lane_type: &'static str,
        /// Lanes per buffer element or image texel.
        width: usize,
        diffs: Vec<LaneDiff>,
    },
    /// A sparse expectation the snapshot does not meet.
    Expectation {
        target: String,
        expected: String,
        observed: String,
    },
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing {
                resource,
                absent_from,
            } => write!(f, "{resource} is missing from the {absent_from} snapshot"),
            Self::Shape {
                resource,
                expected,
                observed,
            } => write!(f, "{resource}: expected {expected}, observed {observed}"),
            Self::Lanes {
                resource, diffs, ..
            } => write!(f, "{resource}: {} lane(s) differ", diffs.len()),
            Self::Expectation {
                target,
                expected,
                observed,
            } => write!(f, "{target}: expected {expected}, observed {observed}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Match,
    Divergence(Vec<Divergence>),
}

impl Comparison {
    fn from_divergences(divergences: Vec<Divergence>) -> Self {
        if divergences.is_empty() {
            Self::Match
        } else {
            Self::Divergence(divergences)
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }

    pub fn divergences(&self) -> &[Divergence] {
        match self {
            Self::Match => &[],
            Self::Divergence(d) => d,
        }
    }
}

/// Lane view of an image: one lane per channel, bytes for the normalized
/// formats and 32-bit words otherwise.
fn image_lanes(image: &ImageSnapshot) -> (ScalarKind, Vec<u32>) {
    match image.format {
        ImageFormat::Rgba8 | ImageFormat::Rgba8Snorm => {
            (ScalarKind::Uint, image.texels.iter().map(|&b| u32::from(b)).collect())
        }
        format => (
            format.sample_kind(),
            image
                .texels
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<u32>)
                .collect(),
        ),
    }
}

fn missing(resource: Resource, from_expected: bool) -> Divergence {
    let absent_from = if from_expected {
        Side::Expected
    } else {
        Side::Observed
    };
    Divergence::Missing {
        resource,
        absent_from,
    }
}

fn pair<'s, K: Ord + Copy, V>(
    expected: &'s BTreeMap<K, V>,
    observed: &'s BTreeMap<K, V>,
) -> impl Iterator<Item = (K, Option<&'s V>, Option<&'s V>)> {
    let mut keys: Vec<K> = expected.keys().chain(observed.keys()).copied().collect();
    keys.sort_unstable();
    keys.dedup();
    keys.into_iter()
        .map(|k| (k, expected.get(&k), observed.get(&k)))
}

/// Compare every buffer and image of two snapshots. Diagnostics are not
/// compared.
pub fn compare(
    expected: &ResourceSnapshot,
    observed: &ResourceSnapshot,
    options: &CompareOptions,
) -> Comparison {
    let mut divergences = Vec::new();

    for (binding, e, o) in pair(&expected.buffers, &observed.buffers) {
        let resource = Resource::Buffer(binding);
        let (Some(e), Some(o)) = (e, o) else {
            divergences.push(missing(resource, e.is_none()));
            continue;
        };
        if e.element != o.element || e.len() != o.len() {
            divergences.push(Divergence::Shape {
                resource,
                expected: format!("{} x {}", e.len(), e.element),
                observed: format!("{} x {}", o.len(), o.element),
            });
            continue;
        }
        let (lane_type, diffs) =
            diff_lanes(e.element.scalar_kind(), &e.lanes, &o.lanes, options.epsilon);
        if !diffs.is_empty() {
            divergences.push(Divergence::Lanes {
                resource,
                lane_type,
                width: e.element.components(),
                diffs,
            });
        }
    }

    for (binding, e, o) in pair(&expected.images, &observed.images) {
        let resource = Resource::Image(binding);
        let (Some(e), Some(o)) = (e, o) else {
            divergences.push(missing(resource, e.is_none()));
            continue;
        };
        if (e.format, e.width, e.height) != (o.format, o.width, o.height) {
            divergences.push(Divergence::Shape {
                resource,
                expected: format!("{}x{} {}", e.width, e.height, e.format),
                observed: format!("{}x{} {}", o.width, o.height, o.format),
            });
            continue;
        }
        let (kind, e_lanes) = image_lanes(e);
        let (_, o_lanes) = image_lanes(o);
        let (lane_type, diffs) = diff_lanes(kind, &e_lanes, &o_lanes, options.epsilon);
        if !diffs.is_empty() {
            divergences.push(Divergence::Lanes {
                resource,
                lane_type,
                width: e.format.channels(),
                diffs,
            });
        }
    }

    Comparison::from_divergences(divergences)
}

fn expectation_error(snapshot: &ResourceSnapshot, target: &str, message: String) -> EngineError {
    EngineError::InvalidSeed {
        fixture: snapshot.fixture.clone(),
        target: format!("expectation on {target}"),
        message,
    }
}

fn value_divergence(target: String, expected: &Value, observed: &Value, epsilon: Option<f32>) -> Option<Divergence> {
    let (mut e, mut o) = (Vec::new(), Vec::new());
    expected.write_bits(&mut e);
    observed.write_bits(&mut o);
    let (_, diffs) = diff_lanes(expected.ty().scalar_kind(), &e, &o, epsilon);
    (!diffs.is_empty()).then(|| Divergence::Expectation {
        target,
        expected: expected.to_string(),
        observed: observed.to_string(),
    })
}

/// Check the sparse expectations of a case against `snapshot`. An
/// expectation naming something the snapshot lacks is a divergence; one
/// whose literal does not fit the declared type is an `InvalidSeed` error.
pub fn check_expectations(
    snapshot: &ResourceSnapshot,
    expectations: &[Expectation],
    options: &CompareOptions,
) -> Result<Comparison> {
    let mut divergences = Vec::new();
    for expectation in expectations {
        match expectation.target {
            ExpectTarget::Buffer { buffer, index } => {
                let target = format!("buffer binding {buffer} [{index}]");
                let Some(b) = snapshot.buffer(buffer) else {
                    divergences.push(Divergence::Missing {
                        resource: Resource::Buffer(buffer),
                        absent_from: Side::Observed,
                    });
                    continue;
                };
                let expected = seed::value(&expectation.value, b.element)
                    .map_err(|message| expectation_error(snapshot, &target, message))?;
                match b.element(index) {
                    Some(observed) => {
                        divergences.extend(value_divergence(target, &expected, &observed, options.epsilon));
                    }
                    None => divergences.push(Divergence::Expectation {
                        target,
                        expected: expected.to_string(),
                        observed: format!("nothing (length {})", b.len()),
                    }),
                }
            }
            ExpectTarget::Image {
                image,
                coord: [x, y],
            } => {
                let target = format!("image binding {image} [{x}, {y}]");
                let Some(i) = snapshot.image(image) else {
                    divergences.push(Divergence::Missing {
                        resource: Resource::Image(image),
                        absent_from: Side::Observed,
                    });
                    continue;
                };
                let bytes = seed::texel(&expectation.value, i.format)
                    .map_err(|message| expectation_error(snapshot, &target, message))?;
                let expected = i.format.decode(&bytes);
                match i.texel(x, y) {
                    Some(observed) => {
                        divergences.extend(value_divergence(target, &expected, &observed, options.epsilon));
                    }
                    None => divergences.push(Divergence::Expectation {
                        target,
                        expected: expected.to_string(),
                        observed: format!("nothing (extent {}x{})", i.width, i.height),
                    }),
                }
            }
        }
    }
    Ok(Comparison::from_divergences(divergences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::BufferSnapshot;
    use crate::value::ValueType;
    use csref_types::Literal;

    fn floats(values: &[f32]) -> Vec<u32> {
        values.iter().map(|f| f.to_bits()).collect()
    }

    fn snapshot(out: Vec<u32>) -> ResourceSnapshot {
        let mut snap = ResourceSnapshot::empty("0026");
        snap.buffers.insert(
            3,
            BufferSnapshot {
                name: "Out".into(),
                element: ValueType::vector(ScalarKind::Float, 2),
                lanes: out,
            },
        );
        snap.images.insert(
            1,
            ImageSnapshot {
                name: "dst".into(),
                format: ImageFormat::Rgba8,
                width: 1,
                height: 1,
                texels: vec![255, 0, 0, 255],
            },
        );
        snap
    }

    #[test]
    fn test_u32_differ_with_differences() {
        let diffs = U32Differ::default().diff(&[1, 2, 3, 4], &[1, 5, 3, 7], None);
        assert_eq!(diffs.len(), 2);
        assert_eq!((diffs[0].lane, diffs[0].expected.as_str(), diffs[0].observed.as_str()), (1, "2", "5"));
        assert_eq!(diffs[0].absolute, DiffMagnitude::Numeric(3.0));
        assert_eq!(diffs[0].relative, DiffMagnitude::Numeric(3.0 / 5.0));
        assert_eq!(diffs[1].lane, 3);
    }

    #[test]
    fn test_i32_differ_is_signed() {
        let diffs = I32Differ::default().diff(&[(-1i32) as u32], &[1], Some(10.0));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].expected, "-1");
        assert_eq!(diffs[0].absolute, DiffMagnitude::Numeric(2.0));
    }

    #[test]
    fn test_f32_differ_with_epsilon() {
        let e = floats(&[1.0, 2.0, 3.0]);
        let o = floats(&[1.0001, 2.0, 3.01]);
        let diffs = F32Differ::default().diff(&e, &o, Some(0.001));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].lane, 2);
        assert_eq!(F32Differ::default().diff(&e, &o, None).len(), 2);

        let nan = floats(&[f32::NAN]);
        assert!(F32Differ::default().diff(&nan, &nan, None).is_empty());
        let diffs = F32Differ::default().diff(&nan, &floats(&[0.0]), Some(1.0));
        assert_eq!(diffs[0].absolute, DiffMagnitude::Incomparable);
    }

    #[test]
    fn test_identical_snapshots_match() {
        let snap = snapshot(floats(&[6.0, 6.0, 0.0, 0.0]));
        assert!(compare(&snap, &snap.clone(), &CompareOptions::default()).is_match());
    }

    #[test]
    fn test_compare_reports_each_divergence() {
        let expected = snapshot(floats(&[6.0, 6.0, 0.0, 0.0]));

        let mut observed = snapshot(floats(&[6.0, 6.5, 0.0, 0.0]));
        observed.images.get_mut(&1).unwrap().texels[1] = 3;
        let comparison = compare(&expected, &observed, &CompareOptions::default());
        let divergences = comparison.divergences();
        assert_eq!(divergences.len(), 2);
        assert!(matches!(
            &divergences[0],
            Divergence::Lanes { resource: Resource::Buffer(3), lane_type: "F32", width: 2, diffs } if diffs[0].lane == 1
        ));
        assert!(matches!(
            &divergences[1],
            Divergence::Lanes { resource: Resource::Image(1), lane_type: "U32", width: 4, .. }
        ));

        let loose = CompareOptions { epsilon: Some(1.0) };
        assert_eq!(compare(&expected, &observed, &loose).divergences().len(), 1);
    }

    #[test]
    fn test_compare_shape_and_missing() {
        let expected = snapshot(floats(&[6.0, 6.0, 0.0, 0.0]));
        let mut observed = snapshot(floats(&[6.0, 6.0]));
        observed.images.clear();
        observed.buffers.insert(
            0,
            BufferSnapshot {
                name: "In".into(),
                element: ValueType::Scalar(ScalarKind::Uint),
                lanes: vec![],
            },
        );
        let comparison = compare(&expected, &observed, &CompareOptions::default());
        let divergences = comparison.divergences();
        assert_eq!(divergences.len(), 3);
        assert_eq!(
            divergences[0],
            Divergence::Missing {
                resource: Resource::Buffer(0),
                absent_from: Side::Expected
            }
        );
        assert_eq!(divergences[1].to_string(), "buffer binding 3: expected 2 x vec2, observed 1 x vec2");
        assert_eq!(divergences[2].to_string(), "image binding 1 is missing from the observed snapshot");
    }

    #[test]
    fn test_expectations() {
        let snap = snapshot(floats(&[6.0, 6.0, 0.0, 0.0]));
        let expect = |target, value| Expectation { target, value };
        let six = Literal::List(vec![Literal::Float(6.0), Literal::Float(6.0)]);
        let met = [
            expect(ExpectTarget::Buffer { buffer: 3, index: 0 }, six.clone()),
            expect(ExpectTarget::Buffer { buffer: 3, index: 1 }, Literal::Int(0)),
            expect(
                ExpectTarget::Image { image: 1, coord: [0, 0] },
                Literal::List(vec![Literal::Float(1.0), Literal::Int(0), Literal::Int(0), Literal::Int(1)]),
            ),
        ];
        let options = CompareOptions::default();
        assert!(check_expectations(&snap, &met, &options).unwrap().is_match());

        let unmet = [
            expect(ExpectTarget::Buffer { buffer: 3, index: 1 }, six.clone()),
            expect(ExpectTarget::Buffer { buffer: 3, index: 9 }, six.clone()),
            expect(ExpectTarget::Buffer { buffer: 4, index: 0 }, six.clone()),
        ];
        let comparison = check_expectations(&snap, &unmet, &options).unwrap();
        assert_eq!(comparison.divergences().len(), 3);
        assert!(comparison.divergences()[1].to_string().contains("nothing (length 2)"));

        let malformed = [expect(ExpectTarget::Buffer { buffer: 3, index: 0 }, Literal::Bool(true))];
        let err = check_expectations(&snap, &malformed, &options).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidSeed);
    }
}
