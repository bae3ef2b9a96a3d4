//! Dispatch Coordinator: enumerates the workgroup grid, runs one executor per
//! invocation and freezes the store into a snapshot.

use crate::error::{EngineError, Result};
use crate::exec::{Executor, InvocationContext};
use crate::loader::ShaderModel;
use crate::sampler::{NearestSampler, SamplerOracle, Unavailable};
use crate::snapshot::ResourceSnapshot;
use crate::store::{ResourceStore, SharedStore};
use csref_types::{EngineConfig, RacePolicy, SamplerKind, Schedule};
use glam::UVec3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Initialized,
    Running,
    Completed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Completed => "completed",
        })
    }
}

/// `(0,0,0)`, `(1,0,0)`, ... with x fastest.
fn grid(extent: UVec3) -> impl Iterator<Item = UVec3> {
    (0..extent.z).flat_map(move |z| {
        (0..extent.y).flat_map(move |y| (0..extent.x).map(move |x| UVec3::new(x, y, z)))
    })
}

/// Runs one dispatch of one fixture. A dispatcher is single-use.
pub struct Dispatcher<'a> {
    model: &'a ShaderModel,
    config: EngineConfig,
    oracle: Box<dyn SamplerOracle>,
    state: DispatchState,
}

impl<'a> Dispatcher<'a> {
    pub fn new(model: &'a ShaderModel, config: EngineConfig) -> Self {
        let oracle: Box<dyn SamplerOracle> = match config.sampler {
            SamplerKind::External => Box::new(Unavailable),
            SamplerKind::Nearest => Box::new(NearestSampler),
        };
        Self {
            model,
            config,
            oracle,
            state: DispatchState::Initialized,
        }
    }

    /// Answer `texture()` calls with `oracle` instead of the one named by
    /// the configuration.
    pub fn with_sampler(mut self, oracle: Box<dyn SamplerOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn dispatch(&mut self, store: ResourceStore, workgroups: [u32; 3]) -> Result<ResourceSnapshot> {
        if self.state != DispatchState::Initialized {
            return Err(EngineError::InvalidState {
                fixture: self.model.fixture.clone(),
                state: self.state.to_string(),
            });
        }
        self.state = DispatchState::Running;
        let result = self.execute(store, UVec3::from_array(workgroups));
        self.state = DispatchState::Completed;
        result
    }

    fn contexts(&self, workgroups: UVec3) -> Vec<InvocationContext> {
        let local_size = self.model.local_size;
        grid(workgroups)
            .flat_map(|workgroup_id| {
                grid(local_size).map(move |local_id| InvocationContext {
                    workgroup_id,
                    local_id,
                    num_workgroups: workgroups,
                    local_size,
                })
            })
            .collect()
    }

    fn execute(&self, store: ResourceStore, workgroups: UVec3) -> Result<ResourceSnapshot> {
        let mut contexts = self.contexts(workgroups);
        tracing::debug!(
            fixture = %self.model.fixture,
            ?workgroups,
            invocations = contexts.len(),
            schedule = %self.config.schedule,
            "dispatching"
        );
        if contexts.is_empty() {
            return Ok(store.freeze());
        }

        let shared = SharedStore::new(store);
        let exec = Executor::new(
            self.model,
            &shared,
            self.oracle.as_ref(),
            self.config.step_budget,
        );
        match self.config.schedule {
            Schedule::Sequential => {
                for ctx in &contexts {
                    self.run_one(&exec, &shared, ctx)?;
                }
            }
            Schedule::Shuffled { seed } => {
                contexts.shuffle(&mut StdRng::seed_from_u64(seed));
                for ctx in &contexts {
                    self.run_one(&exec, &shared, ctx)?;
                }
            }
            Schedule::Parallel => {
                // contexts are workgroup-major, so each chunk is one workgroup
                let per_group = self.model.invocations_per_workgroup() as usize;
                contexts.par_chunks(per_group.max(1)).try_for_each(|group| {
                    group
                        .iter()
                        .try_for_each(|ctx| self.run_one(&exec, &shared, ctx))
                })?;
            }
        }

        let snapshot = shared.into_inner().freeze();
        tracing::debug!(
            fixture = %self.model.fixture,
            diagnostics = snapshot.diagnostics.len(),
            "dispatch completed"
        );
        Ok(snapshot)
    }

    /// Run one invocation and settle what it left behind: faults become
    /// diagnostics, races follow the race policy.
    fn run_one(&self, exec: &Executor<'_>, shared: &SharedStore, ctx: &InvocationContext) -> Result<()> {
        let outcome = exec.run(ctx);
        let mut store = shared.lock();
        if let Err(err) = outcome {
            if !err.is_invocation_fault() {
                return Err(err);
            }
            tracing::debug!(invocation = ctx.flat_id(), %err, "invocation faulted");
            store.record_fault(&err, ctx.flat_id());
        }
        for conflict in store.take_conflicts() {
            match self.config.race_policy {
                RacePolicy::Reject => return Err(store.race_error(&conflict)),
                RacePolicy::Report => store.report_race(&conflict),
            }
        }
        Ok(())
    }
}

/// One-shot form of [`Dispatcher::dispatch`].
pub fn dispatch(
    model: &ShaderModel,
    store: ResourceStore,
    workgroups: [u32; 3],
    config: &EngineConfig,
) -> Result<ResourceSnapshot> {
    Dispatcher::new(model, config.clone()).dispatch(store, workgroups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::loader;
    use crate::value::{Scalar, ScalarKind, Value, ValueType, construct};
    use csref_types::OobPolicy;

    const MULTI_OUTPUT: &str = r#"#version 310 es
layout(local_size_x = 2, local_size_y = 2) in;
layout(binding = 0) buffer In { vec4 In[]; };
layout(binding = 1) buffer In3 { vec4 In3[]; };
layout(binding = 2) buffer Out { vec4 Out[]; };
layout(binding = 3) buffer Out3 { vec4 Out3[]; };
void main() {
    Out3[gl_WorkGroupID.x] = Out[3] = In[4] + In3[gl_WorkGroupID.x];
}
"#;

    fn vec4(f: f32) -> Value {
        construct(ValueType::vector(ScalarKind::Float, 4), &[Value::Scalar(Scalar::Float(f))])
            .unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            default_buffer_len: 8,
            ..EngineConfig::default()
        }
    }

    fn seeded(model: &ShaderModel, config: &EngineConfig) -> ResourceStore {
        let mut store = ResourceStore::new(model, config);
        store.seed_element(0, 4, vec4(1.0)).unwrap();
        store.seed_element(1, 0, vec4(5.0)).unwrap();
        store.seed_element(1, 1, vec4(5.0)).unwrap();
        store
    }

    #[test]
    fn test_multi_output_every_schedule() {
        let model = loader::load("multi", MULTI_OUTPUT).unwrap();
        let mut outputs = Vec::new();
        for schedule in [
            Schedule::Sequential,
            Schedule::Shuffled { seed: 1 },
            Schedule::Shuffled { seed: 99 },
            Schedule::Parallel,
        ] {
            let config = EngineConfig { schedule, ..config() };
            let snap = dispatch(&model, seeded(&model, &config), [2, 1, 1], &config).unwrap();
            assert_eq!(snap.read_buffer(2, 3), Some(vec4(6.0)));
            assert_eq!(snap.read_buffer(3, 0), Some(vec4(6.0)));
            assert_eq!(snap.read_buffer(3, 1), Some(vec4(6.0)));
            assert!(snap.diagnostics.is_empty());
            outputs.push(snap.to_bytes().unwrap());
        }
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_parallel_chunks_by_workgroup() {
        let source = r#"#version 310 es
layout(local_size_x = 2, local_size_y = 2) in;
layout(binding = 0) buffer Out { uint Out[]; };
void main() {
    uint group = gl_WorkGroupID.x + gl_WorkGroupID.y * 3u + gl_WorkGroupID.z * 6u;
    Out[group * 4u + gl_LocalInvocationIndex] = group;
}
"#;
        let model = loader::load("groups", source).unwrap();
        let run = |schedule| {
            let config = EngineConfig {
                schedule,
                default_buffer_len: 48,
                ..EngineConfig::default()
            };
            dispatch(&model, ResourceStore::new(&model, &config), [3, 2, 2], &config).unwrap()
        };
        let parallel = run(Schedule::Parallel);
        let expected: Vec<u32> = (0..12).flat_map(|g| [g; 4]).collect();
        assert_eq!(parallel.buffer(0).unwrap().lanes, expected);
        assert_eq!(parallel, run(Schedule::Sequential));
    }

    #[test]
    fn test_dispatcher_is_single_use() {
        let model = loader::load("multi", MULTI_OUTPUT).unwrap();
        let mut dispatcher = Dispatcher::new(&model, config());
        assert_eq!(dispatcher.state(), DispatchState::Initialized);
        dispatcher.dispatch(seeded(&model, &config()), [1, 1, 1]).unwrap();
        assert_eq!(dispatcher.state(), DispatchState::Completed);
        let err = dispatcher
            .dispatch(seeded(&model, &config()), [1, 1, 1])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_zero_workgroups_returns_seed() {
        let model = loader::load("multi", MULTI_OUTPUT).unwrap();
        let snap = dispatch(&model, seeded(&model, &config()), [2, 0, 1], &config()).unwrap();
        assert_eq!(snap.read_buffer(0, 4), Some(vec4(1.0)));
        assert_eq!(snap.read_buffer(2, 3), Some(vec4(0.0)));
    }

    const RACY: &str = r#"#version 310 es
layout(local_size_x = 4) in;
layout(binding = 0) buffer Out { uint Out[]; };
void main() {
    Out[0] = gl_LocalInvocationIndex;
}
"#;

    #[test]
    fn test_race_policy() {
        let model = loader::load("racy", RACY).unwrap();
        let err = dispatch(&model, ResourceStore::new(&model, &config()), [1, 1, 1], &config())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RaceDetected);

        let config = EngineConfig {
            race_policy: RacePolicy::Report,
            ..config()
        };
        let snap = dispatch(&model, ResourceStore::new(&model, &config), [1, 1, 1], &config).unwrap();
        assert_eq!(snap.diagnostics.count(ErrorKind::RaceDetected), 3);
        assert_eq!(snap.read_buffer(0, 0), Some(Value::Scalar(Scalar::Uint(3))));
    }

    #[test]
    fn test_invocation_faults_become_diagnostics() {
        let source = r#"#version 310 es
layout(local_size_x = 4) in;
layout(binding = 0) buffer Out { uint Out[]; };
void main() {
    Out[gl_LocalInvocationIndex * 3u] = 1u;
}
"#;
        let model = loader::load("oob", source).unwrap();
        let config = EngineConfig {
            oob_policy: OobPolicy::Fault,
            default_buffer_len: 4,
            ..EngineConfig::default()
        };
        let snap = dispatch(&model, ResourceStore::new(&model, &config), [1, 1, 1], &config).unwrap();
        // invocations 2 and 3 fault on indices 6 and 9, 0 and 1 still store
        assert_eq!(snap.diagnostics.count(ErrorKind::OutOfBounds), 2);
        assert_eq!(snap.buffer(0).unwrap().lanes, vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_grid_order_is_x_fastest() {
        let cells: Vec<UVec3> = grid(UVec3::new(2, 2, 1)).collect();
        assert_eq!(
            cells,
            vec![
                UVec3::new(0, 0, 0),
                UVec3::new(1, 0, 0),
                UVec3::new(0, 1, 0),
                UVec3::new(1, 1, 0),
            ]
        );
        assert_eq!(grid(UVec3::new(3, 0, 2)).count(), 0);
    }
}
