//! Reference execution engine for GLSL ES 3.10 compute-shader fixtures.
//!
//! A fixture is loaded into a [`ShaderModel`], its resources are allocated
//! and seeded in a [`ResourceStore`], and a [`Dispatcher`] runs every
//! invocation of the workgroup grid against that store. The result is a
//! [`ResourceSnapshot`] that [`compare`] diffs against what a driver
//! produced.
//!
//! ```no_run
//! # fn main() -> csref::Result<()> {
//! let source = std::fs::read_to_string("0005.cs").unwrap();
//! let model = csref::loader::load("0005", &source)?;
//! let config = csref::EngineConfig::default();
//! let store = csref::ResourceStore::new(&model, &config);
//! let snapshot = csref::dispatch(&model, store, [1, 1, 1], &config)?;
//! println!("{:?}", snapshot.read_buffer(0, 2));
//! # Ok(())
//! # }
//! ```

pub mod compare;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod format;
pub mod loader;
pub mod race;
pub mod sampler;
pub mod seed;
pub mod snapshot;
pub mod store;
pub mod value;

pub use compare::{CompareOptions, Comparison, Divergence, check_expectations, compare};
pub use csref_types::{CompareMetadata, EngineConfig, OobPolicy, RacePolicy, SamplerKind, Schedule};
pub use dispatch::{DispatchState, Dispatcher, dispatch};
pub use error::{Diagnostic, Diagnostics, EngineError, ErrorKind, Result};
pub use loader::{ShaderModel, load};
pub use sampler::{NearestSampler, SamplerOracle, Unavailable};
pub use snapshot::ResourceSnapshot;
pub use store::ResourceStore;
pub use value::{Scalar, ScalarKind, Value, ValueType};
