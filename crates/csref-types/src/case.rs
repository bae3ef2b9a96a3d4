use crate::config::{CompareMetadata, EngineConfig};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Dispatch size the GLES conformance driver uses for every compute fixture.
pub const DEFAULT_DISPATCH: [u32; 3] = [1, 2, 3];

fn default_dispatch() -> [u32; 3] {
    DEFAULT_DISPATCH
}

/// One fixture plus everything the conformance driver supplies out of band:
/// workgroup count, initial resource contents, comparison metadata and the
/// values the case is expected to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseDescriptor {
    /// Fixture source, relative to the descriptor's directory.
    pub fixture: PathBuf,

    #[serde(default = "default_dispatch")]
    pub dispatch: [u32; 3],

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub compare: CompareMetadata,

    #[serde(default, rename = "buffer")]
    pub buffers: Vec<BufferSeed>,

    #[serde(default, rename = "image")]
    pub images: Vec<ImageSeed>,

    #[serde(default, rename = "sampler")]
    pub samplers: Vec<SamplerSeed>,

    #[serde(default, rename = "uniform")]
    pub uniforms: Vec<UniformSeed>,

    #[serde(default, rename = "expect")]
    pub expectations: Vec<Expectation>,

    /// Snapshot observed on a real driver, relative to the descriptor's
    /// directory. When present the computed snapshot is compared against it.
    #[serde(default)]
    pub observed: Option<PathBuf>,
}

impl CaseDescriptor {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let descriptor = toml::from_str(&content)?;
        Ok(descriptor)
    }

    /// Resolve a path named by the descriptor against the descriptor's
    /// directory.
    pub fn resolve(descriptor_path: &Path, relative: &Path) -> PathBuf {
        descriptor_path
            .parent()
            .map_or_else(|| relative.to_path_buf(), |dir| dir.join(relative))
    }
}

/// A literal value as written in a descriptor. Its GLSL type is only known
/// once it is matched against a declaration, so conversion happens in the
/// engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    List(Vec<Literal>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferSeed {
    pub binding: u32,

    /// Element count. Defaults to `data.len()` when `data` is given, else to
    /// the engine's default buffer length.
    #[serde(default)]
    pub len: Option<usize>,

    /// Value every element starts with before `data` and `set` apply.
    #[serde(default)]
    pub fill: Option<Literal>,

    /// Leading elements, in order.
    #[serde(default)]
    pub data: Vec<Literal>,

    /// Sparse element assignments, applied last.
    #[serde(default)]
    pub set: Vec<IndexedLiteral>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexedLiteral {
    pub index: usize,
    pub value: Literal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSeed {
    pub binding: u32,
    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub fill: Option<Literal>,

    /// Row-major texel values.
    #[serde(default)]
    pub data: Vec<Literal>,

    #[serde(default)]
    pub texels: Vec<TexelLiteral>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TexelLiteral {
    pub x: u32,
    pub y: u32,
    pub value: Literal,
}

/// How a sampled texture's `rgba8` texels are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TexturePattern {
    #[default]
    Zero,
    /// Texel `i` holds the little-endian bytes of `i as u32`, the pattern the
    /// GLES conformance driver uploads.
    Index,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerSeed {
    pub binding: u32,
    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub pattern: TexturePattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniformSeed {
    pub name: String,
    pub value: Literal,
}

/// A single value the computed snapshot must hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(flatten)]
    pub target: ExpectTarget,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectTarget {
    Buffer { buffer: u32, index: usize },
    Image { image: u32, coord: [u32; 2] },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OobPolicy, SamplerKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DESCRIPTOR: &str = r#"
        fixture = "0026.cs"
        dispatch = [2, 1, 1]

        [engine]
        oob_policy = "discard_and_report"
        sampler = "nearest"

        [compare]
        epsilon = 1e-6

        [[buffer]]
        binding = 0
        len = 8
        set = [{ index = 4, value = [1.0, 1.0, 1.0, 1.0] }]

        [[image]]
        binding = 1
        width = 4
        height = 2
        fill = [0, 0, 0, 0]
        texels = [{ x = 1, y = 1, value = 7 }]

        [[sampler]]
        binding = 0
        width = 200
        height = 200
        pattern = "index"

        [[uniform]]
        name = "max"
        value = 7

        [[expect]]
        buffer = 3
        index = 3
        value = [6.0, 6.0, 6.0, 6.0]

        [[expect]]
        image = 1
        coord = [1, 1]
        value = 8
    "#;

    #[test]
    fn test_descriptor_from_path() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "{DESCRIPTOR}").unwrap();
        let case = CaseDescriptor::from_path(tmp.path()).unwrap();

        assert_eq!(case.fixture, PathBuf::from("0026.cs"));
        assert_eq!(case.dispatch, [2, 1, 1]);
        assert_eq!(case.engine.oob_policy, OobPolicy::DiscardAndReport);
        assert_eq!(case.engine.sampler, SamplerKind::Nearest);
        assert_eq!(case.compare.epsilon, Some(1e-6));
        assert_eq!(case.buffers[0].len, Some(8));
        assert_eq!(case.buffers[0].set[0].index, 4);
        assert_eq!(case.images[0].texels[0].value, Literal::Int(7));
        assert_eq!(case.samplers[0].pattern, TexturePattern::Index);
        assert_eq!(case.uniforms[0].value, Literal::Int(7));
        assert_eq!(
            case.expectations[0].target,
            ExpectTarget::Buffer {
                buffer: 3,
                index: 3
            }
        );
        assert_eq!(
            case.expectations[1].target,
            ExpectTarget::Image {
                image: 1,
                coord: [1, 1]
            }
        );
    }

    #[test]
    fn test_descriptor_defaults() {
        let case: CaseDescriptor = toml::from_str(r#"fixture = "0005.cs""#).unwrap();
        assert_eq!(case.dispatch, DEFAULT_DISPATCH);
        assert!(case.buffers.is_empty());
        assert!(case.observed.is_none());
        assert_eq!(case.engine, EngineConfig::default());
    }

    #[test]
    fn test_literal_untagged_order() {
        let lits: Vec<Literal> = serde_json::from_str("[true, 3, -2, 1.5, [1, 2.0]]").unwrap();
        assert_eq!(
            lits,
            vec![
                Literal::Bool(true),
                Literal::Int(3),
                Literal::Int(-2),
                Literal::Float(1.5),
                Literal::List(vec![Literal::Int(1), Literal::Float(2.0)]),
            ]
        );
    }

    #[test]
    fn test_resolve_relative_to_descriptor() {
        let resolved = CaseDescriptor::resolve(
            Path::new("/corpus/atomics/0005/case.toml"),
            Path::new("0005.cs"),
        );
        assert_eq!(resolved, PathBuf::from("/corpus/atomics/0005/0005.cs"));
    }
}
