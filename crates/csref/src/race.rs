//! Per-element access log used to flag fixtures whose result would depend on
//! invocation order.
//!
//! Two invocations race on an element when
//! - they store different bit patterns to it,
//! - one changes it from its pre-dispatch value and the other reads it
//!   without having stored to it first, or
//! - one uses atomics on it and the other plain loads or stores.
//!
//! Every invocation storing the same value (`Out[3] = vec4(0.0)` in all of
//! them) is not a race.

use crate::error::InvocationId;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Buffer(u32),
    Image(u32),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(b) => write!(f, "buffer binding {b}"),
            Self::Image(b) => write!(f, "image binding {b}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Touch<'a> {
    Read,
    Write(&'a [u32]),
    Atomic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub resource: Resource,
    pub index: usize,
    pub first: InvocationId,
    pub second: InvocationId,
    pub detail: &'static str,
}

const MIXED: &str = "atomic and non-atomic access to one element";
const WRITE_WRITE: &str = "non-atomic stores of different values";
const READ_WRITE: &str = "non-atomic load of a value another invocation changes";

#[derive(Debug, Default)]
struct ElementLog {
    baseline: Vec<u32>,
    written: Option<Vec<u32>>,
    writers: BTreeSet<InvocationId>,
    /// Writers that stored something other than the baseline.
    changers: BTreeSet<InvocationId>,
    /// Invocations that loaded the element before storing to it.
    blind_readers: BTreeSet<InvocationId>,
    plain: BTreeSet<InvocationId>,
    atomic: BTreeSet<InvocationId>,
}

fn other(set: &BTreeSet<InvocationId>, me: InvocationId) -> Option<InvocationId> {
    set.iter().copied().find(|&i| i != me)
}

#[derive(Debug, Default)]
pub struct RaceTracker {
    elements: HashMap<(Resource, usize), ElementLog>,
}

impl RaceTracker {
    /// Log one access. `current` is the element's bits before the access.
    pub fn observe(
        &mut self,
        resource: Resource,
        index: usize,
        current: &[u32],
        touch: Touch<'_>,
        invocation: InvocationId,
    ) -> Option<Conflict> {
        let log = self
            .elements
            .entry((resource, index))
            .or_insert_with(|| ElementLog {
                baseline: current.to_vec(),
                ..ElementLog::default()
            });
        let conflict = |with: InvocationId, detail: &'static str| Conflict {
            resource,
            index,
            first: with.min(invocation),
            second: with.max(invocation),
            detail,
        };

        match touch {
            Touch::Atomic => {
                log.atomic.insert(invocation);
                other(&log.plain, invocation).map(|o| conflict(o, MIXED))
            }
            Touch::Read => {
                log.plain.insert(invocation);
                if let Some(o) = other(&log.atomic, invocation) {
                    return Some(conflict(o, MIXED));
                }
                if log.writers.contains(&invocation) {
                    return None;
                }
                log.blind_readers.insert(invocation);
                other(&log.changers, invocation).map(|o| conflict(o, READ_WRITE))
            }
            Touch::Write(bits) => {
                log.plain.insert(invocation);
                if let Some(o) = other(&log.atomic, invocation) {
                    return Some(conflict(o, MIXED));
                }
                if log.written.as_deref().is_some_and(|prev| prev != bits) {
                    if let Some(o) = other(&log.writers, invocation) {
                        return Some(conflict(o, WRITE_WRITE));
                    }
                }
                log.written = Some(bits.to_vec());
                log.writers.insert(invocation);
                if bits == log.baseline.as_slice() {
                    return None;
                }
                log.changers.insert(invocation);
                other(&log.blind_readers, invocation).map(|o| conflict(o, READ_WRITE))
            }
        }
    }
}
