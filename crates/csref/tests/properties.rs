use csref::exec::InvocationContext;
use csref::{
    EngineConfig, OobPolicy, ResourceSnapshot, ResourceStore, Scalar, Schedule, ShaderModel,
    Value, dispatch, load,
};
use glam::UVec3;
use proptest::prelude::*;

const GLOBAL_ID: &str = r#"#version 310 es
layout(local_size_x = 5, local_size_y = 6, local_size_z = 7) in;
layout(binding = 0) buffer Out { uvec3 Out[]; };
void main() {
    Out[gl_WorkGroupID.x * 210u + gl_LocalInvocationIndex] = gl_GlobalInvocationID;
}
"#;

const TICKETS: &str = r#"#version 310 es
layout(local_size_x = 16) in;
layout(binding = 0) buffer Counter { uint Counter[]; };
layout(binding = 1) buffer Swap { uint Swap[]; };
layout(binding = 2) buffer Seen { uint Seen[]; };
layout(binding = 3) buffer Ticket { uint Ticket[]; };
void main() {
    uint id = gl_WorkGroupID.x * 16u + gl_LocalInvocationIndex;
    Ticket[id] = atomicAdd(Counter[0], 1u);
    Seen[id] = atomicCompSwap(Swap[0], 3u, 5u);
}
"#;

const COPY: &str = r#"#version 310 es
layout(local_size_x = 2, local_size_y = 2) in;
layout(binding = 0) buffer In { vec4 In[]; };
layout(binding = 1) buffer Out { vec4 Out[]; };
layout(binding = 2) buffer Zero { vec4 Zero[]; };
void main() {
    uvec3 g = gl_GlobalInvocationID;
    uint i = (g.z * gl_NumWorkGroups.y * 2u + g.y) * gl_NumWorkGroups.x * 2u + g.x;
    Out[i] = In[i % 8u] * 2.0 + vec4(float(i));
    Zero[3] = vec4(0.0);
}
"#;

const OFFSET: &str = r#"#version 310 es
layout(local_size_x = 8) in;
layout(binding = 0) buffer Out { uint Out[]; };
uniform uint offset;
void main() {
    Out[gl_LocalInvocationIndex + offset] = 7u;
}
"#;

fn config(schedule: Schedule) -> EngineConfig {
    EngineConfig {
        schedule,
        default_buffer_len: 512,
        ..EngineConfig::default()
    }
}

fn run(model: &ShaderModel, config: &EngineConfig, workgroups: [u32; 3]) -> ResourceSnapshot {
    let store = ResourceStore::new(model, config);
    dispatch(model, store, workgroups, config).unwrap()
}

fn uints(snapshot: &ResourceSnapshot, binding: u32, count: usize) -> Vec<u32> {
    (0..count)
        .map(|i| match snapshot.read_buffer(binding, i) {
            Some(Value::Scalar(Scalar::Uint(u))) => u,
            other => panic!("element {i} of binding {binding}: {other:?}"),
        })
        .collect()
}

#[test]
fn global_invocation_id_for_local_size_567() {
    let model = load("global_id", GLOBAL_ID).unwrap();
    let snapshot = run(&model, &config(Schedule::Sequential), [2, 1, 1]);
    for wx in 0..2u32 {
        for lz in 0..7 {
            for ly in 0..6 {
                for lx in 0..5 {
                    let index = wx * 210 + lz * 30 + ly * 5 + lx;
                    let expected = Value::uvec3(UVec3::new(wx * 5 + lx, ly, lz));
                    assert_eq!(snapshot.read_buffer(0, index as usize), Some(expected));
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn builtins_follow_their_formulas(
        wg in (0u32..8, 0u32..8, 0u32..8),
        local in (0u32..5, 0u32..6, 0u32..7),
    ) {
        let ctx = InvocationContext {
            workgroup_id: UVec3::new(wg.0, wg.1, wg.2),
            local_id: UVec3::new(local.0, local.1, local.2),
            num_workgroups: UVec3::splat(8),
            local_size: UVec3::new(5, 6, 7),
        };
        let global = ctx.global_id();
        prop_assert_eq!(global, UVec3::new(wg.0 * 5 + local.0, wg.1 * 6 + local.1, wg.2 * 7 + local.2));

        let index = ctx.local_index();
        prop_assert!(index < 210);
        prop_assert_eq!((index % 5, index / 5 % 6, index / 30), local);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn atomics_linearize_under_any_schedule(seed in any::<u64>(), groups in 1u32..5) {
        let model = load("tickets", TICKETS).unwrap();
        let config = config(Schedule::Shuffled { seed });
        let mut store = ResourceStore::new(&model, &config);
        store.seed_element(1, 0, Value::Scalar(Scalar::Uint(3))).unwrap();
        let snapshot = dispatch(&model, store, [groups, 1, 1], &config).unwrap();

        let n = groups as usize * 16;
        let mut tickets = uints(&snapshot, 3, n);
        tickets.sort_unstable();
        prop_assert_eq!(tickets, (0..n as u32).collect::<Vec<_>>());
        prop_assert_eq!(uints(&snapshot, 0, 1), vec![n as u32]);

        // exactly one compare-and-swap sees the seeded 3, the rest see its 5
        let seen = uints(&snapshot, 2, n);
        prop_assert_eq!(seen.iter().filter(|&&v| v == 3).count(), 1);
        prop_assert_eq!(seen.iter().filter(|&&v| v == 5).count(), n - 1);
        prop_assert_eq!(uints(&snapshot, 1, 1), vec![5]);
        prop_assert!(snapshot.diagnostics.is_empty());
    }

    #[test]
    fn schedules_produce_identical_snapshots(
        seed in any::<u64>(),
        workgroups in (1u32..4, 1u32..3, 1u32..3),
    ) {
        let model = load("copy", COPY).unwrap();
        let workgroups = [workgroups.0, workgroups.1, workgroups.2];
        let seeded = |config: &EngineConfig| {
            let mut store = ResourceStore::new(&model, config);
            for i in 0..8 {
                let v = Value::Scalar(Scalar::Float(i as f32 + 0.5));
                let v = csref::value::construct(csref::ValueType::vector(csref::ScalarKind::Float, 4), &[v]).unwrap();
                store.seed_element(0, i, v).unwrap();
            }
            store
        };
        let snapshot = |schedule| {
            let config = config(schedule);
            dispatch(&model, seeded(&config), workgroups, &config)
                .unwrap()
                .to_bytes()
                .unwrap()
        };

        let sequential = snapshot(Schedule::Sequential);
        prop_assert_eq!(&snapshot(Schedule::Shuffled { seed }), &sequential);
        prop_assert_eq!(&snapshot(Schedule::Parallel), &sequential);
        // and a second sequential run is byte-identical too
        prop_assert_eq!(&snapshot(Schedule::Sequential), &sequential);
    }

    #[test]
    fn out_of_bounds_handling_is_deterministic(
        offset in 0u32..24,
        policy in prop_oneof![
            Just(OobPolicy::ClampAndReport),
            Just(OobPolicy::DiscardAndReport),
            Just(OobPolicy::Fault),
        ],
        seed in any::<u64>(),
    ) {
        let model = load("offset", OFFSET).unwrap();
        let snapshot = |schedule| {
            let config = EngineConfig {
                oob_policy: policy,
                schedule,
                default_buffer_len: 16,
                ..EngineConfig::default()
            };
            let mut store = ResourceStore::new(&model, &config);
            let (slot, _, _) = store.uniform_slot("offset").unwrap();
            store.seed_uniform(slot, vec![Value::Scalar(Scalar::Uint(offset))]).unwrap();
            dispatch(&model, store, [1, 1, 1], &config).unwrap()
        };

        let first = snapshot(Schedule::Sequential);
        prop_assert_eq!(first.to_bytes().unwrap(), snapshot(Schedule::Shuffled { seed }).to_bytes().unwrap());

        let outside = (offset + 8).saturating_sub(16).min(8) as u64;
        prop_assert_eq!(first.diagnostics.count(csref::ErrorKind::OutOfBounds), outside);
        let written = uints(&first, 0, 16).iter().filter(|&&v| v == 7).count() as u64;
        // clamped stores all land on element 15, which an in-bounds store
        // already covers unless every index is outside
        let expected = match policy {
            OobPolicy::ClampAndReport if outside == 8 => 1,
            _ => 8 - outside,
        };
        prop_assert_eq!(written, expected);
    }
}
