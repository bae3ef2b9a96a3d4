//! Data types shared between the csref engine and the conformance drivers
//! that feed it: test-case descriptors, seeds, expectations and the engine
//! and comparison configuration they carry.

pub mod case;
pub mod config;

pub use case::{CaseDescriptor, ExpectTarget, Expectation, Literal};
pub use config::{CompareMetadata, EngineConfig, OobPolicy, RacePolicy, SamplerKind, Schedule};
